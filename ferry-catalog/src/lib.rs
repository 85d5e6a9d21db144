pub mod ledger;
pub mod pricing;
pub mod schedule;

pub use ledger::SeatLedger;
pub use pricing::{FareTable, MAX_BASE_FARE};
pub use schedule::{NewSchedule, ScheduleService};

pub mod models;
pub mod pii;

pub use models::events::{
    BookingCancelledEvent, BookingConfirmedEvent, BookingEvent, SeatsChangedEvent,
    TicketCheckedInEvent,
};
pub use pii::Masked;

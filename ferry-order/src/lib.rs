pub mod checkin;
pub mod gateway;
pub mod orchestrator;
pub mod reconciler;
pub mod references;
pub mod ticketing;

#[cfg(test)]
mod testing;

pub use checkin::{Manifest, ManifestEntry, ManifestService};
pub use gateway::{MockPaymentGateway, ScriptedCharge};
pub use orchestrator::{BookingOrchestrator, CreateBookingRequest, Settlement};
pub use reconciler::{ReconcileReport, Reconciler};
pub use references::{RandomReferences, ReferenceGenerator};
pub use ticketing::TicketingEngine;

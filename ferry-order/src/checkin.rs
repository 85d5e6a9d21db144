use chrono::{DateTime, Utc};
use ferry_core::events::EventSink;
use ferry_core::identity::CustomerDirectory;
use ferry_core::models::{
    BookingStatus, CheckInStatus, Customer, ManifestLine, PassengerType, ScheduleStatus, Ticket,
};
use ferry_core::repository::{BookingRepository, ScheduleRepository};
use ferry_core::{CoreError, CoreResult};
use ferry_shared::{BookingEvent, Masked, TicketCheckedInEvent};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleSummary {
    pub schedule_id: Uuid,
    pub route_id: Uuid,
    pub vessel_id: Uuid,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    pub status: ScheduleStatus,
    pub total_capacity: i32,
    pub available_seats: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestEntry {
    pub ticket_id: Uuid,
    pub passenger_name: String,
    pub passenger_type: PassengerType,
    pub seat_number: Option<String>,
    pub booking_reference: String,
    pub check_in_status: CheckInStatus,
    pub check_in_time: Option<DateTime<Utc>>,
    pub contact_name: Option<String>,
    pub contact_email: Option<Masked<String>>,
    pub contact_phone: Option<Masked<String>>,
}

/// Printable passenger list for one sailing.
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub schedule: ScheduleSummary,
    pub total_passengers: usize,
    pub checked_in: usize,
    pub entries: Vec<ManifestEntry>,
}

pub struct ManifestService {
    schedules: Arc<dyn ScheduleRepository>,
    bookings: Arc<dyn BookingRepository>,
    customers: Arc<dyn CustomerDirectory>,
    events: Arc<dyn EventSink>,
}

impl ManifestService {
    pub fn new(
        schedules: Arc<dyn ScheduleRepository>,
        bookings: Arc<dyn BookingRepository>,
        customers: Arc<dyn CustomerDirectory>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            schedules,
            bookings,
            customers,
            events,
        }
    }

    /// Checks a passenger in by ticket code. One-way: a second attempt on
    /// the same ticket fails with `InvalidState`.
    pub async fn check_in(&self, code: &str) -> CoreResult<Ticket> {
        let code = code.trim();
        if code.is_empty() {
            return Err(CoreError::ValidationError("ticket code is required".into()));
        }

        let mut ticket = self
            .bookings
            .get_ticket_by_code(code)
            .await?
            .ok_or_else(|| CoreError::not_found("ticket", code))?;
        if ticket.is_checked_in() {
            return Err(CoreError::InvalidState(format!(
                "ticket {} is already checked in",
                code
            )));
        }

        let booking = self
            .bookings
            .get_booking(ticket.booking_id)
            .await?
            .ok_or_else(|| CoreError::not_found("booking", ticket.booking_id))?;
        if booking.booking_status != BookingStatus::Confirmed {
            return Err(CoreError::InvalidState(format!(
                "booking {} is {}",
                booking.booking_reference, booking.booking_status
            )));
        }
        if let Some(schedule) = self.schedules.get_schedule(booking.schedule_id).await? {
            if schedule.status == ScheduleStatus::Cancelled {
                return Err(CoreError::InvalidState(format!(
                    "schedule {} is cancelled",
                    schedule.id
                )));
            }
        }

        let now = Utc::now();
        if !self.bookings.check_in_ticket(ticket.id, now).await? {
            // Lost to a concurrent scan of the same code
            return Err(CoreError::InvalidState(format!(
                "ticket {} is already checked in",
                code
            )));
        }
        ticket.check_in_status = CheckInStatus::CheckedIn;
        ticket.check_in_time = Some(now);

        info!(
            "Checked in {} on booking {}",
            ticket.passenger_name, booking.booking_reference
        );
        self.events.publish(BookingEvent::TicketCheckedIn(TicketCheckedInEvent {
            ticket_id: ticket.id,
            booking_id: booking.id,
            schedule_id: booking.schedule_id,
            checked_in_at: now.timestamp(),
        }));
        Ok(ticket)
    }

    /// Confirmed passengers of the schedule, sorted by seat then name;
    /// passengers without a seat come last.
    pub async fn get_manifest(&self, schedule_id: Uuid) -> CoreResult<Manifest> {
        let schedule = self
            .schedules
            .get_schedule(schedule_id)
            .await?
            .ok_or_else(|| CoreError::not_found("schedule", schedule_id))?;

        let mut lines = self.bookings.manifest_lines(schedule_id).await?;
        lines.sort_by(manifest_order);

        let mut contacts: HashMap<Uuid, Option<Customer>> = HashMap::new();
        let mut entries = Vec::with_capacity(lines.len());
        for line in lines {
            if !contacts.contains_key(&line.customer_id) {
                let customer = match self.customers.get_customer(line.customer_id).await {
                    Ok(customer) => customer,
                    Err(e) => {
                        warn!("Contact lookup failed for customer {}: {}", line.customer_id, e);
                        None
                    }
                };
                contacts.insert(line.customer_id, customer);
            }
            let contact = contacts.get(&line.customer_id).and_then(|c| c.as_ref());

            entries.push(ManifestEntry {
                ticket_id: line.ticket.id,
                passenger_name: line.ticket.passenger_name,
                passenger_type: line.ticket.passenger_type,
                seat_number: line.ticket.seat_number,
                booking_reference: line.booking_reference,
                check_in_status: line.ticket.check_in_status,
                check_in_time: line.ticket.check_in_time,
                contact_name: contact.map(|c| c.full_name.clone()),
                contact_email: contact.map(|c| c.email.clone()),
                contact_phone: contact.and_then(|c| c.phone.clone()),
            });
        }

        let checked_in = entries
            .iter()
            .filter(|e| e.check_in_status == CheckInStatus::CheckedIn)
            .count();

        Ok(Manifest {
            schedule: ScheduleSummary {
                schedule_id: schedule.id,
                route_id: schedule.route_id,
                vessel_id: schedule.vessel_id,
                departure_time: schedule.departure_time,
                arrival_time: schedule.arrival_time,
                status: schedule.status,
                total_capacity: schedule.total_capacity,
                available_seats: schedule.available_seats,
            },
            total_passengers: entries.len(),
            checked_in,
            entries,
        })
    }
}

fn manifest_order(a: &ManifestLine, b: &ManifestLine) -> Ordering {
    let seat = match (&a.ticket.seat_number, &b.ticket.seat_number) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    seat.then_with(|| a.ticket.passenger_name.cmp(&b.ticket.passenger_name))
        .then_with(|| a.ticket.id.cmp(&b.ticket.id))
}

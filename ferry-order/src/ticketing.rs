use chrono::Utc;
use ferry_catalog::FareTable;
use ferry_core::models::{CheckInStatus, PassengerInfo, PassengerType, Ticket};
use ferry_core::{CoreError, CoreResult};
use std::sync::Arc;
use uuid::Uuid;

use crate::references::ReferenceGenerator;

/// Expands a passenger list into priced tickets.
pub struct TicketingEngine {
    fares: FareTable,
    references: Arc<dyn ReferenceGenerator>,
}

impl TicketingEngine {
    pub fn new(fares: FareTable, references: Arc<dyn ReferenceGenerator>) -> Self {
        Self { fares, references }
    }

    pub fn fares(&self) -> &FareTable {
        &self.fares
    }

    /// Issues one ticket per passenger against `booking_id`.
    ///
    /// The whole list is validated before any ticket is built: one bad entry
    /// rejects the batch.
    pub fn issue(
        &self,
        base_fare: i64,
        passengers: &[PassengerInfo],
        booking_id: Uuid,
    ) -> CoreResult<Vec<Ticket>> {
        let types = validate_passengers(passengers)?;
        let now = Utc::now();

        passengers
            .iter()
            .zip(types)
            .map(|(passenger, passenger_type)| {
                Ok(Ticket {
                    id: Uuid::new_v4(),
                    booking_id,
                    passenger_name: passenger.name.trim().to_string(),
                    passenger_type,
                    seat_number: passenger.seat_number.clone(),
                    ticket_price: self.fares.price(base_fare, passenger_type)?,
                    qr_code: self.new_code(booking_id, &passenger.name),
                    check_in_status: CheckInStatus::Pending,
                    check_in_time: None,
                    created_at: now,
                })
            })
            .collect()
    }

    /// Gives every ticket a fresh code, after the store reported a collision.
    pub fn reissue_codes(&self, tickets: &mut [Ticket]) {
        for ticket in tickets {
            ticket.qr_code = self.new_code(ticket.booking_id, &ticket.passenger_name);
        }
    }

    fn new_code(&self, booking_id: Uuid, passenger_name: &str) -> String {
        let salt = self.references.salt();
        self.references.ticket_code(booking_id, passenger_name, &salt)
    }
}

pub fn total_price(tickets: &[Ticket]) -> CoreResult<i64> {
    tickets
        .iter()
        .try_fold(0i64, |total, t| total.checked_add(t.ticket_price))
        .ok_or_else(|| CoreError::ValidationError("booking total is too large".into()))
}

fn validate_passengers(passengers: &[PassengerInfo]) -> CoreResult<Vec<PassengerType>> {
    if passengers.is_empty() {
        return Err(CoreError::ValidationError(
            "at least one passenger is required".into(),
        ));
    }

    passengers
        .iter()
        .enumerate()
        .map(|(i, p)| {
            if p.name.trim().is_empty() {
                return Err(CoreError::ValidationError(format!(
                    "passenger {} has no name",
                    i + 1
                )));
            }
            p.passenger_type.parse::<PassengerType>().map_err(|e| {
                CoreError::ValidationError(format!("passenger {}: {}", i + 1, e))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::references::RandomReferences;
    use std::collections::HashSet;

    fn engine() -> TicketingEngine {
        TicketingEngine::new(FareTable::default(), Arc::new(RandomReferences))
    }

    #[test]
    fn test_adult_child_infant_pricing() {
        let passengers = vec![
            PassengerInfo::new("Maria Santos", "adult").with_seat("12A"),
            PassengerInfo::new("Leo Santos", "child"),
            PassengerInfo::new("Bia Santos", "infant"),
        ];
        let booking_id = Uuid::new_v4();

        let tickets = engine().issue(10000, &passengers, booking_id).unwrap();

        let prices: Vec<i64> = tickets.iter().map(|t| t.ticket_price).collect();
        assert_eq!(prices, vec![10000, 5000, 0]);
        assert_eq!(total_price(&tickets).unwrap(), 15000);

        assert_eq!(tickets[0].seat_number.as_deref(), Some("12A"));
        assert!(tickets.iter().all(|t| t.booking_id == booking_id));
        assert!(tickets.iter().all(|t| t.check_in_status == CheckInStatus::Pending));

        let codes: HashSet<&str> = tickets.iter().map(|t| t.qr_code.as_str()).collect();
        assert_eq!(codes.len(), 3);
    }

    #[test]
    fn test_senior_discount() {
        let tickets = engine()
            .issue(4500, &[PassengerInfo::new("Joao Pereira", "senior")], Uuid::new_v4())
            .unwrap();
        assert_eq!(tickets[0].ticket_price, 3600);
    }

    #[test]
    fn test_unknown_type_rejects_whole_batch() {
        let passengers = vec![
            PassengerInfo::new("Maria Santos", "adult"),
            PassengerInfo::new("Rex", "pet"),
        ];
        match engine().issue(10000, &passengers, Uuid::new_v4()) {
            Err(CoreError::ValidationError(msg)) => assert!(msg.contains("passenger 2")),
            other => panic!("expected ValidationError, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_list_and_blank_name_rejected() {
        assert!(matches!(
            engine().issue(10000, &[], Uuid::new_v4()),
            Err(CoreError::ValidationError(_))
        ));
        assert!(matches!(
            engine().issue(10000, &[PassengerInfo::new("  ", "adult")], Uuid::new_v4()),
            Err(CoreError::ValidationError(_))
        ));
    }

    #[test]
    fn test_fares_that_cannot_be_priced_are_rejected() {
        let passengers = vec![PassengerInfo::new("Maria Santos", "adult")];
        assert!(matches!(
            engine().issue(i64::MAX / 2, &passengers, Uuid::new_v4()),
            Err(CoreError::ValidationError(_))
        ));

        let mut tickets = engine().issue(10000, &passengers, Uuid::new_v4()).unwrap();
        tickets.push(Ticket {
            ticket_price: i64::MAX,
            ..tickets[0].clone()
        });
        assert!(matches!(total_price(&tickets), Err(CoreError::ValidationError(_))));
    }

    #[test]
    fn test_reissue_replaces_codes() {
        let e = engine();
        let mut tickets = e
            .issue(10000, &[PassengerInfo::new("Maria Santos", "adult")], Uuid::new_v4())
            .unwrap();
        let before = tickets[0].qr_code.clone();

        e.reissue_codes(&mut tickets);
        assert_ne!(tickets[0].qr_code, before);
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Booking, BookingStatus, PaymentStatus, Schedule};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Sailings between two ports on a date with room for the party.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleSearch {
    pub departure_port: Uuid,
    pub arrival_port: Uuid,
    pub date: NaiveDate,
    #[serde(default = "default_passengers")]
    pub passengers: i32,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

fn default_passengers() -> i32 {
    1
}

/// Clamps a requested page to `1..=MAX_PAGE_SIZE` rows from a non-negative offset.
pub fn page_bounds(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    (
        limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        offset.unwrap_or(0).max(0),
    )
}

impl ScheduleSearch {
    pub fn page(&self) -> (i64, i64) {
        page_bounds(self.limit, self.offset)
    }

    /// Applies the filter to an already loaded schedule whose route runs
    /// `departure_port → arrival_port`.
    pub fn accepts(&self, schedule: &Schedule) -> bool {
        schedule.is_bookable()
            && schedule.departure_time.date_naive() == self.date
            && schedule.available_seats >= self.passengers.max(1)
    }
}

/// Operator-side booking query. Every criterion is optional; results are
/// newest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingFilter {
    pub customer_id: Option<Uuid>,
    pub schedule_id: Option<Uuid>,
    pub booking_status: Option<BookingStatus>,
    pub payment_status: Option<PaymentStatus>,
    /// Inclusive lower bound on `created_at`.
    pub created_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub created_to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl BookingFilter {
    pub fn page(&self) -> (i64, i64) {
        page_bounds(self.limit, self.offset)
    }

    /// Applies the criteria (not the page) to a loaded booking.
    pub fn accepts(&self, booking: &Booking) -> bool {
        self.customer_id.map_or(true, |id| booking.customer_id == id)
            && self.schedule_id.map_or(true, |id| booking.schedule_id == id)
            && self.booking_status.map_or(true, |s| booking.booking_status == s)
            && self.payment_status.map_or(true, |s| booking.payment_status == s)
            && self.created_from.map_or(true, |from| booking.created_at >= from)
            && self.created_to.map_or(true, |to| booking.created_at <= to)
    }
}

/// One page of a listing and the number of matches across all pages.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct ScheduleOption {
    pub schedule_id: Uuid,
    pub route_id: Uuid,
    pub vessel_id: Uuid,
    pub departure_time: chrono::DateTime<chrono::Utc>,
    pub arrival_time: chrono::DateTime<chrono::Utc>,
    pub available_seats: i32,
    pub base_fare: i64,
    pub currency: String,
}

impl From<&Schedule> for ScheduleOption {
    fn from(s: &Schedule) -> Self {
        Self {
            schedule_id: s.id,
            route_id: s.route_id,
            vessel_id: s.vessel_id,
            departure_time: s.departure_time,
            arrival_time: s.arrival_time,
            available_seats: s.available_seats,
            base_fare: s.base_fare,
            currency: s.currency.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_search_deserialization() {
        let json = r#"
            {
                "departure_port": "6b0c5a5e-54a4-4bde-9a2b-37c4f0f6b1e1",
                "arrival_port": "0f0c6d84-3b4e-41c5-8a43-0f5c1c0d2a11",
                "date": "2025-07-14"
            }
        "#;
        let search: ScheduleSearch = serde_json::from_str(json).expect("Failed to deserialize");
        assert_eq!(search.date, NaiveDate::from_ymd_opt(2025, 7, 14).unwrap());
        assert_eq!(search.passengers, 1);
        assert_eq!(search.page(), (DEFAULT_PAGE_SIZE, 0));
    }

    #[test]
    fn test_page_bounds_are_clamped() {
        assert_eq!(page_bounds(Some(0), Some(-5)), (1, 0));
        assert_eq!(page_bounds(Some(5000), Some(40)), (MAX_PAGE_SIZE, 40));
        assert_eq!(page_bounds(None, None), (DEFAULT_PAGE_SIZE, 0));
    }

    #[test]
    fn test_accepts_filters_on_seats_date_and_status() {
        let departure = Utc.with_ymd_and_hms(2025, 7, 14, 8, 30, 0).unwrap();
        let mut schedule = Schedule::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            departure,
            departure + chrono::Duration::hours(2),
            4500,
            "USD".into(),
            3,
        );
        let mut search = ScheduleSearch {
            departure_port: Uuid::new_v4(),
            arrival_port: Uuid::new_v4(),
            date: departure.date_naive(),
            passengers: 3,
            limit: None,
            offset: None,
        };
        assert!(search.accepts(&schedule));

        search.passengers = 4;
        assert!(!search.accepts(&schedule));

        search.passengers = 1;
        schedule.status = crate::models::ScheduleStatus::Cancelled;
        assert!(!search.accepts(&schedule));
    }
}

use chrono::{DateTime, Utc};
use ferry_shared::Masked;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Error returned when a stored or submitted status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

// Statuses are stored as lowercase text columns and travel as lowercase JSON.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant { kind: $kind, value: s.to_string() }),
                }
            }
        }
    };
}

/// Lifecycle of one sailing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Scheduled,
    Cancelled,
    Departed,
    Completed,
}

text_enum!(ScheduleStatus, "schedule status", {
    Scheduled => "scheduled",
    Cancelled => "cancelled",
    Departed => "departed",
    Completed => "completed",
});

impl ScheduleStatus {
    /// `scheduled → cancelled | departed`, `departed → completed`.
    pub fn can_transition_to(&self, next: ScheduleStatus) -> bool {
        matches!(
            (self, next),
            (ScheduleStatus::Scheduled, ScheduleStatus::Cancelled)
                | (ScheduleStatus::Scheduled, ScheduleStatus::Departed)
                | (ScheduleStatus::Departed, ScheduleStatus::Completed)
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

text_enum!(BookingStatus, "booking status", {
    Pending => "pending",
    Confirmed => "confirmed",
    Cancelled => "cancelled",
});

/// Shared by the booking's payment axis and individual payment rows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

text_enum!(PaymentStatus, "payment status", {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
    Refunded => "refunded",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PassengerType {
    Adult,
    Child,
    Infant,
    Senior,
}

text_enum!(PassengerType, "passenger type", {
    Adult => "adult",
    Child => "child",
    Infant => "infant",
    Senior => "senior",
});

impl PassengerType {
    pub const ALL: [PassengerType; 4] = [
        PassengerType::Adult,
        PassengerType::Child,
        PassengerType::Infant,
        PassengerType::Senior,
    ];
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CheckInStatus {
    Pending,
    CheckedIn,
}

text_enum!(CheckInStatus, "check-in status", {
    Pending => "pending",
    CheckedIn => "checked_in",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum BookingChannel {
    #[default]
    Online,
    Agent,
    Counter,
}

text_enum!(BookingChannel, "booking channel", {
    Online => "online",
    Agent => "agent",
    Counter => "counter",
});

/// One sailing of one vessel on one route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schedule {
    pub id: Uuid,
    pub route_id: Uuid,
    pub vessel_id: Uuid,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    /// Minor currency units
    pub base_fare: i64,
    pub currency: String,
    pub total_capacity: i32,
    pub available_seats: i32,
    pub status: ScheduleStatus,
    pub cancellation_reason: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    pub fn new(
        route_id: Uuid,
        vessel_id: Uuid,
        departure_time: DateTime<Utc>,
        arrival_time: DateTime<Utc>,
        base_fare: i64,
        currency: String,
        capacity: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            route_id,
            vessel_id,
            departure_time,
            arrival_time,
            base_fare,
            currency,
            total_capacity: capacity,
            available_seats: capacity,
            status: ScheduleStatus::Scheduled,
            cancellation_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_bookable(&self) -> bool {
        self.status == ScheduleStatus::Scheduled
    }

    pub fn booked_seats(&self) -> i32 {
        self.total_capacity - self.available_seats
    }
}

/// Passenger as submitted by the client; the type is validated by the
/// ticketing engine so an unknown value fails the whole batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PassengerInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub passenger_type: String,
    #[serde(default)]
    pub seat_number: Option<String>,
}

impl PassengerInfo {
    pub fn new(name: &str, passenger_type: &str) -> Self {
        Self {
            name: name.to_string(),
            passenger_type: passenger_type.to_string(),
            seat_number: None,
        }
    }

    pub fn with_seat(mut self, seat: &str) -> Self {
        self.seat_number = Some(seat.to_string());
        self
    }
}

/// One passenger's ticket. The price is fixed at issue time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticket {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub passenger_name: String,
    pub passenger_type: PassengerType,
    pub seat_number: Option<String>,
    pub ticket_price: i64,
    pub qr_code: String,
    pub check_in_status: CheckInStatus,
    pub check_in_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Ticket {
    pub fn is_checked_in(&self) -> bool {
        self.check_in_status == CheckInStatus::CheckedIn
    }
}

/// A monetary movement. Refunds are separate rows with a negative amount.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub payment_method: String,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub gateway_transaction_id: Option<String>,
    /// Set on refund rows: the charge this row reverses.
    pub refund_of: Option<Uuid>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn pending(booking_id: Uuid, payment_method: &str, amount: i64, currency: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_id,
            payment_method: payment_method.to_string(),
            amount,
            currency: currency.to_string(),
            status: PaymentStatus::Pending,
            gateway_transaction_id: None,
            refund_of: None,
            processed_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn refund_for(original: &Payment, refund_transaction_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            booking_id: original.booking_id,
            payment_method: original.payment_method.clone(),
            amount: -original.amount,
            currency: original.currency.clone(),
            status: PaymentStatus::Refunded,
            gateway_transaction_id: refund_transaction_id,
            refund_of: Some(original.id),
            processed_at: Some(now),
            created_at: now,
        }
    }

    pub fn is_refund(&self) -> bool {
        self.refund_of.is_some()
    }
}

/// Booking status pair used for conditional transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingState {
    pub booking: BookingStatus,
    pub payment: PaymentStatus,
}

impl BookingState {
    pub const fn new(booking: BookingStatus, payment: PaymentStatus) -> Self {
        Self { booking, payment }
    }
}

/// A customer's reservation against one schedule; owns its tickets and payments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub booking_reference: String,
    pub schedule_id: Uuid,
    pub customer_id: Uuid,
    pub passenger_count: i32,
    pub total_amount: i64,
    pub currency: String,
    pub booking_status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub channel: BookingChannel,
    pub special_requirements: Option<String>,
    pub booking_agent_id: Option<Uuid>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tickets: Vec<Ticket>,
    #[serde(default)]
    pub payments: Vec<Payment>,
}

impl Booking {
    pub fn state(&self) -> BookingState {
        BookingState::new(self.booking_status, self.payment_status)
    }

    pub fn apply(&mut self, state: BookingState) {
        self.booking_status = state.booking;
        self.payment_status = state.payment;
        self.updated_at = Utc::now();
    }

    /// Whether the booking still holds seats on its schedule.
    pub fn holds_seats(&self) -> bool {
        self.booking_status != BookingStatus::Cancelled
    }

    /// The original charge row, if one has been recorded.
    pub fn charge(&self) -> Option<&Payment> {
        self.payments.iter().find(|p| !p.is_refund())
    }

    /// Sum of completed payment rows: what the customer is out of pocket.
    pub fn net_charged(&self) -> i64 {
        self.payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Completed)
            .map(|p| p.amount)
            .sum()
    }
}

/// Identity-store view of a customer, used for manifest contact columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub full_name: String,
    pub email: Masked<String>,
    pub phone: Option<Masked<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Route {
    pub id: Uuid,
    pub name: String,
    pub departure_port_id: Uuid,
    pub arrival_port_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vessel {
    pub id: Uuid,
    pub name: String,
    pub capacity: i32,
}

/// A ticket on a confirmed booking, joined with the booking fields the
/// manifest needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestLine {
    pub ticket: Ticket,
    pub booking_id: Uuid,
    pub booking_reference: String,
    pub customer_id: Uuid,
}

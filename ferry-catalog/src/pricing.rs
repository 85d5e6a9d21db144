use ferry_core::models::PassengerType;
use ferry_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Largest base fare a schedule may carry, in minor units.
pub const MAX_BASE_FARE: i64 = 1_000_000_000;

/// Per-passenger-type fare multipliers, in percent of the schedule's base fare.
///
/// Amounts are integer minor units; a fractional cent rounds half up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FareTable {
    percentages: HashMap<PassengerType, u32>,
}

impl FareTable {
    pub fn from_percentages(adult: u32, child: u32, infant: u32, senior: u32) -> Self {
        let percentages = HashMap::from([
            (PassengerType::Adult, adult),
            (PassengerType::Child, child),
            (PassengerType::Infant, infant),
            (PassengerType::Senior, senior),
        ]);
        Self { percentages }
    }

    /// Overrides the multiplier for one passenger type.
    pub fn with_percentage(mut self, passenger_type: PassengerType, percent: u32) -> Self {
        self.percentages.insert(passenger_type, percent);
        self
    }

    pub fn percentage(&self, passenger_type: PassengerType) -> u32 {
        // A type missing from the table pays full fare
        self.percentages.get(&passenger_type).copied().unwrap_or(100)
    }

    /// Fails with `ValidationError` instead of wrapping when the fare is
    /// too large to price.
    pub fn price(&self, base_fare: i64, passenger_type: PassengerType) -> CoreResult<i64> {
        let percent = i64::from(self.percentage(passenger_type));
        base_fare
            .checked_mul(percent)
            .and_then(|scaled| scaled.checked_add(50))
            .map(|scaled| scaled / 100)
            .ok_or_else(|| {
                CoreError::ValidationError(format!(
                    "base fare {} is too large to price",
                    base_fare
                ))
            })
    }
}

impl Default for FareTable {
    fn default() -> Self {
        Self::from_percentages(100, 50, 0, 80)
    }
}

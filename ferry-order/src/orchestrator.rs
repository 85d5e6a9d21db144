use chrono::Utc;
use ferry_catalog::SeatLedger;
use ferry_core::events::EventSink;
use ferry_core::models::{
    Booking, BookingChannel, BookingState, BookingStatus, PassengerInfo, Payment, PaymentStatus,
    Schedule,
};
use ferry_core::payment::{ChargeReceipt, ChargeRequest, ChargeStatus, PaymentGateway, RefundStatus};
use ferry_core::repository::{BookingRepository, RefundRecord, ScheduleRepository};
use ferry_core::search::{BookingFilter, Page};
use ferry_core::{CoreError, CoreResult, StoreError, UniqueField};
use ferry_shared::{BookingCancelledEvent, BookingConfirmedEvent, BookingEvent};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::references::ReferenceGenerator;
use crate::ticketing::{total_price, TicketingEngine};

pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

const CONFIRMED: BookingState =
    BookingState::new(BookingStatus::Confirmed, PaymentStatus::Completed);
const DECLINED: BookingState = BookingState::new(BookingStatus::Cancelled, PaymentStatus::Failed);

#[derive(Debug, Clone)]
pub struct CreateBookingRequest {
    pub customer_id: Uuid,
    pub schedule_id: Uuid,
    pub passengers: Vec<PassengerInfo>,
    pub payment_method: String,
    pub channel: BookingChannel,
    pub special_requirements: Option<String>,
    pub booking_agent_id: Option<Uuid>,
}

/// What settling a booking with an unrecorded charge outcome did to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Confirmed,
    Cancelled,
    /// Already cancelled, but the charge went through: money sent back.
    Refunded,
    /// Booking status untouched (the payment row may still be closed out).
    Unchanged,
}

/// Coordinates the seat ledger, ticketing and the payment gateway.
///
/// Creation order is hold, write, charge, confirm:
/// 1. seats are reserved on the ledger,
/// 2. the booking, its tickets and a pending payment are written in one
///    atomic store call (a failed write gives the seats back),
/// 3. the gateway is charged under the booking reference before the
///    request deadline,
/// 4. the booking is confirmed, or cancelled with its seats released when
///    the charge is declined.
///
/// A charge whose outcome is unknown (gateway error or deadline) leaves the
/// booking `pending`; the reconciler settles it later via
/// [`BookingOrchestrator::settle`].
pub struct BookingOrchestrator {
    schedules: Arc<dyn ScheduleRepository>,
    bookings: Arc<dyn BookingRepository>,
    ledger: Arc<SeatLedger>,
    ticketing: TicketingEngine,
    references: Arc<dyn ReferenceGenerator>,
    gateway: Arc<dyn PaymentGateway>,
    events: Arc<dyn EventSink>,
    deadline: Duration,
    // schedules with seats that could not be handed back
    unreleased: Mutex<BTreeSet<Uuid>>,
}

impl BookingOrchestrator {
    pub fn new(
        schedules: Arc<dyn ScheduleRepository>,
        bookings: Arc<dyn BookingRepository>,
        ledger: Arc<SeatLedger>,
        ticketing: TicketingEngine,
        references: Arc<dyn ReferenceGenerator>,
        gateway: Arc<dyn PaymentGateway>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            schedules,
            bookings,
            ledger,
            ticketing,
            references,
            gateway,
            events,
            deadline: DEFAULT_DEADLINE,
            unreleased: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub async fn create_booking(&self, request: CreateBookingRequest) -> CoreResult<Booking> {
        let deadline = Instant::now() + self.deadline;

        let passenger_count = i32::try_from(request.passengers.len())
            .map_err(|_| CoreError::ValidationError("too many passengers".into()))?;
        if passenger_count == 0 {
            return Err(CoreError::ValidationError(
                "at least one passenger is required".into(),
            ));
        }
        if request.payment_method.trim().is_empty() {
            return Err(CoreError::ValidationError("payment method is required".into()));
        }

        let schedule = self.load_schedule(request.schedule_id).await?;
        if !schedule.is_bookable() {
            return Err(CoreError::InvalidState(format!(
                "schedule {} is {}",
                schedule.id, schedule.status
            )));
        }
        if passenger_count > schedule.available_seats {
            return Err(CoreError::InsufficientCapacity {
                requested: passenger_count,
                available: schedule.available_seats,
            });
        }

        // Priced and validated before anything is held or written
        let mut booking = self.draft(&schedule, &request, passenger_count)?;

        self.ledger.reserve(schedule.id, passenger_count).await?;

        if let Err(e) = self.persist(&mut booking).await {
            self.release_hold(&booking, "booking write failed").await;
            return Err(e);
        }
        info!(
            "Booking {} ({}) held {} seat(s) on schedule {}, charging {} {}",
            booking.booking_reference,
            booking.id,
            passenger_count,
            schedule.id,
            booking.total_amount,
            booking.currency
        );

        if booking.total_amount == 0 {
            return self.confirm(booking, None).await;
        }

        let charge = ChargeRequest {
            reference: booking.booking_reference.clone(),
            amount: booking.total_amount,
            currency: booking.currency.clone(),
            method: request.payment_method.clone(),
        };

        match tokio::time::timeout_at(deadline, self.gateway.charge(&charge)).await {
            Ok(Ok(receipt)) if receipt.status == ChargeStatus::Succeeded => {
                self.confirm(booking, Some(&receipt)).await
            }
            Ok(Ok(receipt)) => {
                let reason = receipt
                    .decline_reason
                    .clone()
                    .unwrap_or_else(|| "declined by gateway".to_string());
                let cancelled = self.decline(booking, &receipt, &reason).await?;
                Err(CoreError::PaymentFailed {
                    booking_id: cancelled.id,
                    booking_reference: cancelled.booking_reference,
                    reason,
                })
            }
            Ok(Err(e)) => {
                warn!(
                    "Charge for booking {} has unknown outcome ({}); leaving it pending",
                    booking.booking_reference, e
                );
                Ok(booking)
            }
            Err(_) => {
                warn!(
                    "Charge for booking {} missed the {:?} deadline; leaving it pending",
                    booking.booking_reference, self.deadline
                );
                Ok(booking)
            }
        }
    }

    pub async fn get_booking(&self, id: Uuid) -> CoreResult<Booking> {
        self.bookings
            .get_booking(id)
            .await?
            .ok_or_else(|| CoreError::not_found("booking", id))
    }

    pub async fn get_booking_by_reference(&self, reference: &str) -> CoreResult<Booking> {
        let reference = reference.trim().to_ascii_uppercase();
        self.bookings
            .get_booking_by_reference(&reference)
            .await?
            .ok_or_else(|| CoreError::not_found("booking", reference))
    }

    /// Filtered, paginated booking listing. Callers scope customers to their
    /// own bookings through `customer_id`.
    pub async fn list_bookings(&self, filter: &BookingFilter) -> CoreResult<Page<Booking>> {
        if let (Some(from), Some(to)) = (filter.created_from, filter.created_to) {
            if from > to {
                return Err(CoreError::ValidationError(
                    "created_from must not be after created_to".into(),
                ));
            }
        }
        let (limit, offset) = filter.page();
        let (items, total) = self.bookings.list_bookings(filter).await?;
        Ok(Page {
            items,
            total,
            limit,
            offset,
        })
    }

    /// Schedules whose seats a cancellation could not return, drained by the
    /// caller. The reconciler audits and repairs them.
    pub fn take_unreleased(&self) -> Vec<Uuid> {
        match self.unreleased.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending).into_iter().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub(crate) fn ledger(&self) -> &SeatLedger {
        &self.ledger
    }

    /// Cancels the booking, refunds a completed charge and returns the seats.
    ///
    /// A failed refund does not undo the cancellation: the booking stays
    /// `cancelled` with payment `completed` until [`Self::retry_refund`] or the
    /// reconciler gets the money back.
    pub async fn cancel_booking(&self, id: Uuid, reason: &str) -> CoreResult<Booking> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(CoreError::ValidationError("a cancellation reason is required".into()));
        }

        let mut booking = self.get_booking(id).await?;
        if booking.booking_status == BookingStatus::Cancelled {
            return Err(CoreError::InvalidState(format!(
                "booking {} is already cancelled",
                booking.booking_reference
            )));
        }

        let from = booking.state();
        let to = BookingState::new(BookingStatus::Cancelled, from.payment);
        if !self.bookings.transition_booking(id, from, to, Some(reason)).await? {
            return Err(CoreError::InvalidState(format!(
                "booking {} changed while being cancelled",
                booking.booking_reference
            )));
        }
        booking.apply(to);
        booking.cancellation_reason = Some(reason.to_string());
        info!("Cancelled booking {}: {}", booking.booking_reference, reason);

        if from.payment == PaymentStatus::Completed {
            if let Err(e) = self.refund(&mut booking).await {
                warn!(
                    "Refund for cancelled booking {} failed, will retry: {}",
                    booking.booking_reference, e
                );
            }
        }

        self.release_hold(&booking, "cancellation").await;
        self.announce_cancelled(&booking, reason);
        Ok(booking)
    }

    /// Re-issues the refund for a cancelled booking whose charge is still
    /// `completed`.
    pub async fn retry_refund(&self, id: Uuid) -> CoreResult<Booking> {
        let mut booking = self.get_booking(id).await?;
        if booking.state() != BookingState::new(BookingStatus::Cancelled, PaymentStatus::Completed)
        {
            return Err(CoreError::InvalidState(format!(
                "booking {} has nothing to refund ({} / {})",
                booking.booking_reference, booking.booking_status, booking.payment_status
            )));
        }

        self.refund(&mut booking).await?;
        Ok(booking)
    }

    /// Resolves a booking whose charge outcome was never recorded, by asking
    /// the gateway what happened under the booking reference.
    pub async fn settle(&self, booking: Booking) -> CoreResult<Settlement> {
        if booking.payment_status != PaymentStatus::Pending {
            return Ok(Settlement::Unchanged);
        }

        let receipt = self
            .gateway
            .find_charge(&booking.booking_reference)
            .await
            .map_err(|e| CoreError::InternalError(format!("charge lookup failed: {}", e)))?;

        match (booking.booking_status, receipt) {
            (BookingStatus::Pending, Some(r)) if r.status == ChargeStatus::Succeeded => {
                match self.confirm(booking, Some(&r)).await {
                    Ok(_) => Ok(Settlement::Confirmed),
                    // Cancelled meanwhile; the next pass refunds the charge
                    Err(CoreError::InvalidState(_)) => Ok(Settlement::Unchanged),
                    Err(e) => Err(e),
                }
            }
            (BookingStatus::Pending, Some(r)) => {
                let reason = r
                    .decline_reason
                    .clone()
                    .unwrap_or_else(|| "declined by gateway".to_string());
                self.decline(booking, &r, &reason).await?;
                Ok(Settlement::Cancelled)
            }
            (BookingStatus::Pending, None) => {
                self.abandon(booking).await?;
                Ok(Settlement::Cancelled)
            }
            // Cancelled by the customer while the charge was in flight
            (BookingStatus::Cancelled, Some(r)) if r.status == ChargeStatus::Succeeded => {
                self.refund_late_charge(booking, &r).await
            }
            (BookingStatus::Cancelled, found) => {
                let from = booking.state();
                self.record_charge(&booking, PaymentStatus::Failed, found.as_ref()).await?;
                self.bookings
                    .transition_booking(booking.id, from, DECLINED, None)
                    .await?;
                Ok(Settlement::Unchanged)
            }
            (BookingStatus::Confirmed, _) => Ok(Settlement::Unchanged),
        }
    }

    fn draft(
        &self,
        schedule: &Schedule,
        request: &CreateBookingRequest,
        passenger_count: i32,
    ) -> CoreResult<Booking> {
        let id = Uuid::new_v4();
        let tickets = self.ticketing.issue(schedule.base_fare, &request.passengers, id)?;
        let total_amount = total_price(&tickets)?;
        let payment = Payment::pending(id, &request.payment_method, total_amount, &schedule.currency);
        let now = Utc::now();

        Ok(Booking {
            id,
            booking_reference: self.references.booking_reference(),
            schedule_id: schedule.id,
            customer_id: request.customer_id,
            passenger_count,
            total_amount,
            currency: schedule.currency.clone(),
            booking_status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            channel: request.channel,
            special_requirements: request.special_requirements.clone(),
            booking_agent_id: request.booking_agent_id,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
            tickets,
            payments: vec![payment],
        })
    }

    /// Writes the booking aggregate, regenerating a colliding reference or
    /// ticket codes once.
    async fn persist(&self, booking: &mut Booking) -> CoreResult<()> {
        match self.bookings.insert_booking(booking).await {
            Err(StoreError::Duplicate(field)) => {
                warn!("{} collision writing booking {}, regenerating", field, booking.id);
                match field {
                    UniqueField::BookingReference => {
                        booking.booking_reference = self.references.booking_reference()
                    }
                    UniqueField::TicketCode => self.ticketing.reissue_codes(&mut booking.tickets),
                    UniqueField::Other(_) => {}
                }
                match self.bookings.insert_booking(booking).await {
                    Err(StoreError::Duplicate(field)) => Err(CoreError::InternalError(format!(
                        "{} collided twice for booking {}",
                        field, booking.id
                    ))),
                    other => other.map_err(CoreError::from),
                }
            }
            other => other.map_err(CoreError::from),
        }
    }

    async fn confirm(
        &self,
        mut booking: Booking,
        receipt: Option<&ChargeReceipt>,
    ) -> CoreResult<Booking> {
        let from = booking.state();
        self.record_charge(&booking, PaymentStatus::Completed, receipt).await?;

        if !self
            .bookings
            .transition_booking(booking.id, from, CONFIRMED, None)
            .await?
        {
            warn!(
                "Booking {} moved before it could be confirmed",
                booking.booking_reference
            );
            return Err(CoreError::InvalidState(format!(
                "booking {} was cancelled before its payment was confirmed; \
                 any charge will be refunded",
                booking.booking_reference
            )));
        }
        booking.apply(CONFIRMED);
        mark_charge(&mut booking, PaymentStatus::Completed, receipt);

        info!("Confirmed booking {}", booking.booking_reference);
        self.events.publish(BookingEvent::BookingConfirmed(BookingConfirmedEvent {
            booking_id: booking.id,
            booking_reference: booking.booking_reference.clone(),
            schedule_id: booking.schedule_id,
            customer_id: booking.customer_id,
            passenger_count: booking.passenger_count,
            total_amount: booking.total_amount,
            confirmed_at: Utc::now().timestamp(),
        }));
        Ok(booking)
    }

    async fn decline(
        &self,
        booking: Booking,
        receipt: &ChargeReceipt,
        reason: &str,
    ) -> CoreResult<Booking> {
        warn!("Payment declined for booking {}: {}", booking.booking_reference, reason);
        self.record_charge(&booking, PaymentStatus::Failed, Some(receipt)).await?;
        self.cancel_unpaid(booking, &format!("payment declined: {}", reason)).await
    }

    /// Gives up on a pending booking the gateway has no charge for.
    async fn abandon(&self, booking: Booking) -> CoreResult<Booking> {
        warn!(
            "No charge found for stale booking {}, cancelling",
            booking.booking_reference
        );
        self.record_charge(&booking, PaymentStatus::Failed, None).await?;
        self.cancel_unpaid(booking, "payment not completed").await
    }

    async fn cancel_unpaid(&self, mut booking: Booking, reason: &str) -> CoreResult<Booking> {
        let from = booking.state();
        if !self
            .bookings
            .transition_booking(booking.id, from, DECLINED, Some(reason))
            .await?
        {
            // Whoever moved it owns the seats now
            return self.get_booking(booking.id).await;
        }
        booking.apply(DECLINED);
        booking.cancellation_reason = Some(reason.to_string());
        mark_charge(&mut booking, PaymentStatus::Failed, None);

        self.release_hold(&booking, reason).await;
        self.announce_cancelled(&booking, reason);
        Ok(booking)
    }

    async fn refund_late_charge(
        &self,
        mut booking: Booking,
        receipt: &ChargeReceipt,
    ) -> CoreResult<Settlement> {
        let from = booking.state();
        let to = BookingState::new(BookingStatus::Cancelled, PaymentStatus::Completed);
        self.record_charge(&booking, PaymentStatus::Completed, Some(receipt)).await?;
        if !self.bookings.transition_booking(booking.id, from, to, None).await? {
            return Ok(Settlement::Unchanged);
        }
        booking.apply(to);
        mark_charge(&mut booking, PaymentStatus::Completed, Some(receipt));

        self.refund(&mut booking).await?;
        Ok(Settlement::Refunded)
    }

    /// Refunds the booking's charge and records the negative payment row.
    ///
    /// The gateway call carries the charge id as its idempotency key, and the
    /// refund row, the charge status and the booking state are written in one
    /// store call, so a retry after a failed write cannot refund twice.
    async fn refund(&self, booking: &mut Booking) -> CoreResult<()> {
        let charge = booking.charge().cloned().ok_or_else(|| {
            CoreError::InternalError(format!(
                "booking {} has no charge to refund",
                booking.booking_reference
            ))
        })?;
        let already_recorded = booking.payments.iter().any(|p| p.refund_of == Some(charge.id));

        let refund_row = if charge.amount == 0 || already_recorded {
            None
        } else {
            let transaction_id = charge.gateway_transaction_id.as_deref().ok_or_else(|| {
                CoreError::InternalError(format!(
                    "charge {} has no gateway transaction id",
                    charge.id
                ))
            })?;
            let receipt = self
                .gateway
                .refund(transaction_id, charge.amount, &charge.id.to_string())
                .await
                .map_err(|e| CoreError::InternalError(format!("refund failed: {}", e)))?;
            if receipt.status == RefundStatus::Failed {
                return Err(CoreError::InternalError(format!(
                    "gateway refused refund {}",
                    receipt.refund_id
                )));
            }
            Some(Payment::refund_for(&charge, Some(receipt.refund_id)))
        };

        let from = booking.state();
        let to = BookingState::new(from.booking, PaymentStatus::Refunded);
        let recorded = self
            .bookings
            .record_refund(&RefundRecord {
                booking_id: booking.id,
                charge_id: charge.id,
                refund_row: refund_row.as_ref(),
                from,
                to,
            })
            .await?;
        if !recorded {
            // A concurrent retry got there first
            let current = self.get_booking(booking.id).await?;
            if current.payment_status != PaymentStatus::Refunded {
                return Err(CoreError::InvalidState(format!(
                    "booking {} changed while being refunded",
                    booking.booking_reference
                )));
            }
            *booking = current;
            return Ok(());
        }

        booking.apply(to);
        if let Some(original) = booking.payments.iter_mut().find(|p| p.id == charge.id) {
            original.status = PaymentStatus::Refunded;
        }
        if let Some(row) = refund_row {
            booking.payments.push(row);
        }
        info!(
            "Refunded {} {} on booking {}",
            charge.amount, charge.currency, booking.booking_reference
        );
        Ok(())
    }

    async fn record_charge(
        &self,
        booking: &Booking,
        status: PaymentStatus,
        receipt: Option<&ChargeReceipt>,
    ) -> CoreResult<()> {
        let Some(charge) = booking.charge() else {
            return Err(CoreError::InternalError(format!(
                "booking {} has no payment row",
                booking.booking_reference
            )));
        };
        self.bookings
            .update_payment(
                charge.id,
                status,
                receipt.map(|r| r.transaction_id.as_str()),
                Some(receipt.map_or_else(Utc::now, |r| r.processed_at)),
            )
            .await?;
        Ok(())
    }

    /// Returns the booking's seats. The release itself cannot lose a race;
    /// if the store fails, the schedule is queued for the reconciler, which
    /// repairs the counter from the bookings.
    async fn release_hold(&self, booking: &Booking, why: &str) {
        if let Err(e) = self
            .ledger
            .release(booking.schedule_id, booking.passenger_count)
            .await
        {
            error!(
                "Failed to release {} seat(s) on schedule {} after {} for booking {}: {}",
                booking.passenger_count, booking.schedule_id, why, booking.booking_reference, e
            );
            if let Ok(mut pending) = self.unreleased.lock() {
                pending.insert(booking.schedule_id);
            }
        }
    }

    fn announce_cancelled(&self, booking: &Booking, reason: &str) {
        self.events.publish(BookingEvent::BookingCancelled(BookingCancelledEvent {
            booking_id: booking.id,
            booking_reference: booking.booking_reference.clone(),
            schedule_id: booking.schedule_id,
            seats_released: booking.passenger_count,
            reason: reason.to_string(),
            cancelled_at: Utc::now().timestamp(),
        }));
    }

    async fn load_schedule(&self, id: Uuid) -> CoreResult<Schedule> {
        self.schedules
            .get_schedule(id)
            .await?
            .ok_or_else(|| CoreError::not_found("schedule", id))
    }
}

fn mark_charge(booking: &mut Booking, status: PaymentStatus, receipt: Option<&ChargeReceipt>) {
    if let Some(charge) = booking.payments.iter_mut().find(|p| !p.is_refund()) {
        charge.status = status;
        if let Some(r) = receipt {
            charge.gateway_transaction_id = Some(r.transaction_id.clone());
            charge.processed_at = Some(r.processed_at);
        } else if charge.processed_at.is_none() {
            charge.processed_at = Some(Utc::now());
        }
    }
}

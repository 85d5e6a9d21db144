use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::models::{
    Booking, BookingChannel, BookingState, BookingStatus, CheckInStatus, ManifestLine,
    PassengerType, Payment, PaymentStatus, Ticket,
};
use ferry_core::repository::{BookingRepository, RefundRecord, StoreError, StoreResult};
use ferry_core::search::BookingFilter;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::database::{parse_column, store_error};

pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    booking_reference: String,
    schedule_id: Uuid,
    customer_id: Uuid,
    passenger_count: i32,
    total_amount: i64,
    currency: String,
    booking_status: String,
    payment_status: String,
    channel: String,
    special_requirements: Option<String>,
    booking_agent_id: Option<Uuid>,
    cancellation_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    booking_id: Uuid,
    passenger_name: String,
    passenger_type: String,
    seat_number: Option<String>,
    ticket_price: i64,
    qr_code: String,
    check_in_status: String,
    check_in_time: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    booking_id: Uuid,
    payment_method: String,
    amount: i64,
    currency: String,
    status: String,
    gateway_transaction_id: Option<String>,
    refund_of: Option<Uuid>,
    processed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ManifestRow {
    #[sqlx(flatten)]
    ticket: TicketRow,
    booking_reference: String,
    customer_id: Uuid,
}

impl BookingRow {
    fn into_booking(self, tickets: Vec<Ticket>, payments: Vec<Payment>) -> StoreResult<Booking> {
        Ok(Booking {
            id: self.id,
            booking_reference: self.booking_reference,
            schedule_id: self.schedule_id,
            customer_id: self.customer_id,
            passenger_count: self.passenger_count,
            total_amount: self.total_amount,
            currency: self.currency,
            booking_status: parse_column::<BookingStatus>(&self.booking_status)?,
            payment_status: parse_column::<PaymentStatus>(&self.payment_status)?,
            channel: parse_column::<BookingChannel>(&self.channel)?,
            special_requirements: self.special_requirements,
            booking_agent_id: self.booking_agent_id,
            cancellation_reason: self.cancellation_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
            tickets,
            payments,
        })
    }
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(Ticket {
            id: row.id,
            booking_id: row.booking_id,
            passenger_name: row.passenger_name,
            passenger_type: parse_column::<PassengerType>(&row.passenger_type)?,
            seat_number: row.seat_number,
            ticket_price: row.ticket_price,
            qr_code: row.qr_code,
            check_in_status: parse_column::<CheckInStatus>(&row.check_in_status)?,
            check_in_time: row.check_in_time,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: row.id,
            booking_id: row.booking_id,
            payment_method: row.payment_method,
            amount: row.amount,
            currency: row.currency,
            status: parse_column::<PaymentStatus>(&row.status)?,
            gateway_transaction_id: row.gateway_transaction_id,
            refund_of: row.refund_of,
            processed_at: row.processed_at,
            created_at: row.created_at,
        })
    }
}

const BOOKING_COLUMNS: &str = r#"
    id, booking_reference, schedule_id, customer_id, passenger_count, total_amount, currency,
    booking_status, payment_status, channel, special_requirements, booking_agent_id,
    cancellation_reason, created_at, updated_at
"#;

// Unset criteria bind as NULL and drop out of the predicate.
const BOOKING_FILTER: &str = r#"
    FROM bookings
    WHERE ($1::UUID IS NULL OR customer_id = $1)
      AND ($2::UUID IS NULL OR schedule_id = $2)
      AND ($3::TEXT IS NULL OR booking_status = $3)
      AND ($4::TEXT IS NULL OR payment_status = $4)
      AND ($5::TIMESTAMPTZ IS NULL OR created_at >= $5)
      AND ($6::TIMESTAMPTZ IS NULL OR created_at <= $6)
"#;

const TICKET_COLUMNS: &str = r#"
    t.id, t.booking_id, t.passenger_name, t.passenger_type, t.seat_number, t.ticket_price,
    t.qr_code, t.check_in_status, t.check_in_time, t.created_at
"#;

const PAYMENT_COLUMNS: &str = r#"
    id, booking_id, payment_method, amount, currency, status, gateway_transaction_id,
    refund_of, processed_at, created_at
"#;

impl PgBookingRepository {
    /// Loads tickets and payments for a page of bookings in two queries.
    async fn attach_children(&self, rows: Vec<BookingRow>) -> StoreResult<Vec<Booking>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

        let ticket_rows: Vec<TicketRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tickets t WHERE t.booking_id = ANY($1) ORDER BY t.created_at ASC, t.id ASC",
            TICKET_COLUMNS
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        let payment_rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE booking_id = ANY($1) ORDER BY created_at ASC",
            PAYMENT_COLUMNS
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        let mut tickets: HashMap<Uuid, Vec<Ticket>> = HashMap::new();
        for row in ticket_rows {
            let ticket = Ticket::try_from(row)?;
            tickets.entry(ticket.booking_id).or_default().push(ticket);
        }
        let mut payments: HashMap<Uuid, Vec<Payment>> = HashMap::new();
        for row in payment_rows {
            let payment = Payment::try_from(row)?;
            payments.entry(payment.booking_id).or_default().push(payment);
        }

        rows.into_iter()
            .map(|row| {
                let id = row.id;
                row.into_booking(
                    tickets.remove(&id).unwrap_or_default(),
                    payments.remove(&id).unwrap_or_default(),
                )
            })
            .collect()
    }

    async fn fetch_one_booking(&self, row: Option<BookingRow>) -> StoreResult<Option<Booking>> {
        match row {
            Some(row) => Ok(self.attach_children(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn insert_booking(&self, booking: &Booking) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        sqlx::query(&format!(
            "INSERT INTO bookings ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
            BOOKING_COLUMNS
        ))
        .bind(booking.id)
        .bind(&booking.booking_reference)
        .bind(booking.schedule_id)
        .bind(booking.customer_id)
        .bind(booking.passenger_count)
        .bind(booking.total_amount)
        .bind(&booking.currency)
        .bind(booking.booking_status.as_str())
        .bind(booking.payment_status.as_str())
        .bind(booking.channel.as_str())
        .bind(&booking.special_requirements)
        .bind(booking.booking_agent_id)
        .bind(&booking.cancellation_reason)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;

        for ticket in &booking.tickets {
            sqlx::query(
                r#"
                INSERT INTO tickets (
                    id, booking_id, passenger_name, passenger_type, seat_number, ticket_price,
                    qr_code, check_in_status, check_in_time, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(ticket.id)
            .bind(booking.id)
            .bind(&ticket.passenger_name)
            .bind(ticket.passenger_type.as_str())
            .bind(&ticket.seat_number)
            .bind(ticket.ticket_price)
            .bind(&ticket.qr_code)
            .bind(ticket.check_in_status.as_str())
            .bind(ticket.check_in_time)
            .bind(ticket.created_at)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        }

        for payment in &booking.payments {
            insert_payment_row(&mut *tx, payment).await?;
        }

        // Dropping `tx` on an early return rolls everything back.
        tx.commit().await.map_err(store_error)?;
        Ok(())
    }

    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        let row: Option<BookingRow> =
            sqlx::query_as(&format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error)?;

        self.fetch_one_booking(row).await
    }

    async fn get_booking_by_reference(&self, reference: &str) -> StoreResult<Option<Booking>> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bookings WHERE booking_reference = $1",
            BOOKING_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        self.fetch_one_booking(row).await
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> StoreResult<(Vec<Booking>, i64)> {
        let (limit, offset) = filter.page();
        let booking_status = filter.booking_status.map(|s| s.as_str());
        let payment_status = filter.payment_status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {}", BOOKING_FILTER))
            .bind(filter.customer_id)
            .bind(filter.schedule_id)
            .bind(booking_status)
            .bind(payment_status)
            .bind(filter.created_from)
            .bind(filter.created_to)
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)?;

        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "SELECT {} {} ORDER BY created_at DESC, id ASC LIMIT $7 OFFSET $8",
            BOOKING_COLUMNS, BOOKING_FILTER
        ))
        .bind(filter.customer_id)
        .bind(filter.schedule_id)
        .bind(booking_status)
        .bind(payment_status)
        .bind(filter.created_from)
        .bind(filter.created_to)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        Ok((self.attach_children(rows).await?, total))
    }

    async fn list_bookings_in_state(
        &self,
        state: BookingState,
        unchanged_since: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Booking>> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM bookings
            WHERE booking_status = $1 AND payment_status = $2 AND updated_at < $3
            ORDER BY updated_at ASC
            LIMIT $4
            "#,
            BOOKING_COLUMNS
        ))
        .bind(state.booking.as_str())
        .bind(state.payment.as_str())
        .bind(unchanged_since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        self.attach_children(rows).await
    }

    async fn transition_booking(
        &self,
        id: Uuid,
        from: BookingState,
        to: BookingState,
        cancellation_reason: Option<&str>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET booking_status = $4,
                payment_status = $5,
                cancellation_reason = COALESCE($6, cancellation_reason),
                updated_at = NOW()
            WHERE id = $1 AND booking_status = $2 AND payment_status = $3
            "#,
        )
        .bind(id)
        .bind(from.booking.as_str())
        .bind(from.payment.as_str())
        .bind(to.booking.as_str())
        .bind(to.payment.as_str())
        .bind(cancellation_reason)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await.map_err(store_error)?;
        insert_payment_row(&mut *conn, payment).await
    }

    async fn update_payment(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
        gateway_transaction_id: Option<&str>,
        processed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $2,
                gateway_transaction_id = COALESCE($3, gateway_transaction_id),
                processed_at = COALESCE($4, processed_at)
            WHERE id = $1
            "#,
        )
        .bind(payment_id)
        .bind(status.as_str())
        .bind(gateway_transaction_id)
        .bind(processed_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("payment {}", payment_id)));
        }
        Ok(())
    }

    async fn record_refund(&self, refund: &RefundRecord<'_>) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        let moved = sqlx::query(
            r#"
            UPDATE bookings
            SET booking_status = $4, payment_status = $5, updated_at = NOW()
            WHERE id = $1 AND booking_status = $2 AND payment_status = $3
            "#,
        )
        .bind(refund.booking_id)
        .bind(refund.from.booking.as_str())
        .bind(refund.from.payment.as_str())
        .bind(refund.to.booking.as_str())
        .bind(refund.to.payment.as_str())
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;
        if moved.rows_affected() != 1 {
            return Ok(false);
        }

        let marked = sqlx::query(
            "UPDATE payments SET status = 'refunded' WHERE id = $1 AND booking_id = $2",
        )
        .bind(refund.charge_id)
        .bind(refund.booking_id)
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;
        if marked.rows_affected() != 1 {
            return Err(StoreError::NotFound(format!("payment {}", refund.charge_id)));
        }

        if let Some(row) = refund.refund_row {
            insert_payment_row(&mut *tx, row).await?;
        }

        tx.commit().await.map_err(store_error)?;
        Ok(true)
    }

    async fn get_ticket_by_code(&self, code: &str) -> StoreResult<Option<Ticket>> {
        let row: Option<TicketRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tickets t WHERE t.qr_code = $1",
            TICKET_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(Ticket::try_from).transpose()
    }

    async fn check_in_ticket(&self, ticket_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tickets
            SET check_in_status = 'checked_in', check_in_time = $2
            WHERE id = $1 AND check_in_status = 'pending'
            "#,
        )
        .bind(ticket_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn manifest_lines(&self, schedule_id: Uuid) -> StoreResult<Vec<ManifestLine>> {
        let rows: Vec<ManifestRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}, b.booking_reference, b.customer_id
            FROM tickets t
            JOIN bookings b ON t.booking_id = b.id
            WHERE b.schedule_id = $1 AND b.booking_status = 'confirmed'
            "#,
            TICKET_COLUMNS
        ))
        .bind(schedule_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter()
            .map(|row| {
                let ticket = Ticket::try_from(row.ticket)?;
                Ok(ManifestLine {
                    booking_id: ticket.booking_id,
                    ticket,
                    booking_reference: row.booking_reference,
                    customer_id: row.customer_id,
                })
            })
            .collect()
    }

    async fn count_bookings_for_schedule(&self, schedule_id: Uuid) -> StoreResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM bookings WHERE schedule_id = $1")
            .bind(schedule_id)
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)
    }

    async fn held_passenger_count(&self, schedule_id: Uuid) -> StoreResult<i64> {
        sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(passenger_count), 0)::BIGINT
            FROM bookings
            WHERE schedule_id = $1 AND booking_status <> 'cancelled'
            "#,
        )
        .bind(schedule_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)
    }
}

async fn insert_payment_row(
    conn: &mut sqlx::PgConnection,
    payment: &Payment,
) -> StoreResult<()> {
    sqlx::query(&format!(
        "INSERT INTO payments ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        PAYMENT_COLUMNS
    ))
    .bind(payment.id)
    .bind(payment.booking_id)
    .bind(&payment.payment_method)
    .bind(payment.amount)
    .bind(&payment.currency)
    .bind(payment.status.as_str())
    .bind(&payment.gateway_transaction_id)
    .bind(payment.refund_of)
    .bind(payment.processed_at)
    .bind(payment.created_at)
    .execute(conn)
    .await
    .map_err(store_error)?;
    Ok(())
}

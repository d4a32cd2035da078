//! Postgres-backed store.
//!
//! Card reservation takes `SELECT ... FOR UPDATE SKIP LOCKED` locks on exactly
//! the rows it is about to flip, so concurrent buyers pick disjoint cards. Order transitions are single conditional `UPDATE`s whose
//! `RETURNING` row tells applied from lost race.
//!
//! ## Error Mapping
//!
//! | SQLx error | Postgres code | `StoreError` |
//! |------------|---------------|--------------|
//! | Database (unique violation) | `23505` | `Domain(Conflict)` |
//! | Database (other) | any | `Database` |
//! | Decode / missing column | n/a | `Corrupt` |
//! | Pool / IO | n/a | `Database` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use cardvault_core::{Amount, CardId, DomainError, OrderId, ProductId, Secret, UserId};
use cardvault_inventory::{Card, CardStatus};
use cardvault_products::{Catalog, Product};
use cardvault_sales::{Order, OrderEvent, OrderStatus, Transition};

use super::{InventoryLedger, OrderRepository, Store, StoreError, StoreTx, TransitionOutcome};

const SCHEMA: &str = include_str!("../../migrations/0001_cardvault.sql");

macro_rules! order_columns {
    () => {
        "id, order_no, product_id, user_id, quantity, total_amount, status, payment_method, \
         trade_no, created_at, expired_at, paid_at, refund_reason, refund_requested_at, \
         refunded_at, refund_rejection"
    };
}

macro_rules! card_columns {
    () => {
        "id, product_id, secret, status, order_id, locked_at, sold_at"
    };
}

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if missing.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// Stock import: add available cards for a product.
    #[instrument(skip(self, secrets), fields(product_id = %product_id), err)]
    pub async fn import_cards(
        &self,
        product_id: ProductId,
        secrets: Vec<Secret>,
    ) -> Result<Vec<CardId>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let mut ids = Vec::with_capacity(secrets.len());
        for secret in secrets {
            let card = Card::available(product_id, secret);
            sqlx::query(
                "INSERT INTO cards (id, product_id, secret, status) VALUES ($1, $2, $3, 'available')",
            )
            .bind(card.id.as_uuid())
            .bind(product_id.as_uuid())
            .bind(card.secret.expose_secret())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("import_cards", e))?;
            ids.push(card.id);
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(ids)
    }

    /// Write the catalog view of a product (dev seeding).
    pub async fn upsert_product(&self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, price, min_qty, max_qty, is_active)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                price = EXCLUDED.price,
                min_qty = EXCLUDED.min_qty,
                max_qty = EXCLUDED.max_qty,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.price.as_decimal())
        .bind(to_i32(product.min_qty))
        .bind(to_i32(product.max_qty))
        .bind(product.is_active)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_product", e))?;
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    type Tx = PgStoreTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PgStoreTx { tx })
    }
}

/// Open Postgres transaction. Rolled back on drop unless committed.
pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl InventoryLedger for PgStoreTx {
    #[instrument(skip(self, now), fields(product_id = %product_id, order_id = %order_id), err)]
    async fn reserve(
        &mut self,
        product_id: ProductId,
        quantity: u32,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<Vec<CardId>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM cards
            WHERE product_id = $1 AND status = 'available'
            ORDER BY id
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(i64::from(quantity))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("reserve_select", e))?;

        if ids.len() < quantity as usize {
            // Rows held by other reservers are skipped above but still count
            // as available until those transactions commit.
            let available = self.available_count(product_id).await?;
            return Err(DomainError::insufficient_stock(quantity, available).into());
        }

        let updated = sqlx::query(
            r#"
            UPDATE cards
            SET status = 'locked', order_id = $1, locked_at = $2
            WHERE id = ANY($3) AND status = 'available'
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(now)
        .bind(&ids)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("reserve_update", e))?
        .rows_affected();

        if updated != ids.len() as u64 {
            return Err(DomainError::invariant(format!(
                "locked {updated} of {} selected cards",
                ids.len()
            ))
            .into());
        }

        Ok(ids.into_iter().map(CardId::from_uuid).collect())
    }

    #[instrument(skip(self, now), fields(order_id = %order_id), err)]
    async fn fulfill(&mut self, order_id: OrderId, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE cards SET status = 'sold', sold_at = $2 WHERE order_id = $1 AND status = 'locked'",
        )
        .bind(order_id.as_uuid())
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("fulfill", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn release(&mut self, order_id: OrderId) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE cards
            SET status = 'available', order_id = NULL, locked_at = NULL
            WHERE order_id = $1 AND status = 'locked'
            "#,
        )
        .bind(order_id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("release", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn return_to_pool(&mut self, order_id: OrderId) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE cards
            SET status = 'available', order_id = NULL, locked_at = NULL, sold_at = NULL
            WHERE order_id = $1 AND status = 'sold'
            "#,
        )
        .bind(order_id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("return_to_pool", e))?;
        Ok(result.rows_affected())
    }

    async fn available_count(&mut self, product_id: ProductId) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM cards WHERE product_id = $1 AND status = 'available'",
        )
        .bind(product_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("available_count", e))?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    async fn cards_for_order(&mut self, order_id: OrderId) -> Result<Vec<Card>, StoreError> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            card_columns!(),
            " FROM cards WHERE order_id = $1 ORDER BY id"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("cards_for_order", e))?;
        rows.iter().map(card_from_row).collect()
    }
}

/// Column values a transition writes besides `status`.
#[derive(Debug, Default)]
struct TransitionColumns {
    trade_no: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    refund_reason: Option<String>,
    refund_requested_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
    /// `Some(v)` overwrites `refund_rejection` with `v` (which may be NULL).
    refund_rejection: Option<Option<String>>,
}

impl TransitionColumns {
    fn for_event(event: &OrderEvent) -> Self {
        match event {
            OrderEvent::PaymentConfirmed { trade_no, paid_at } => Self {
                trade_no: Some(trade_no.clone()),
                paid_at: Some(*paid_at),
                ..Self::default()
            },
            OrderEvent::ManuallyCompleted { trade_no, paid_at } => Self {
                trade_no: trade_no.clone(),
                paid_at: Some(*paid_at),
                ..Self::default()
            },
            OrderEvent::Expired => Self::default(),
            OrderEvent::RefundRequested { reason, at } => Self {
                refund_reason: Some(reason.clone()),
                refund_requested_at: Some(*at),
                refund_rejection: Some(None),
                ..Self::default()
            },
            OrderEvent::RefundApproved { at } => Self {
                refunded_at: Some(*at),
                ..Self::default()
            },
            OrderEvent::RefundRejected { reason } => Self {
                refund_rejection: Some(reason.clone()),
                ..Self::default()
            },
        }
    }
}

#[async_trait]
impl OrderRepository for PgStoreTx {
    #[instrument(skip(self, order), fields(order_no = %order.order_no), err)]
    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(concat!(
            "INSERT INTO orders (",
            order_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
        ))
        .bind(order.id.as_uuid())
        .bind(&order.order_no)
        .bind(order.product_id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(to_i32(order.quantity))
        .bind(order.total_amount.as_decimal())
        .bind(order.status.as_str())
        .bind(&order.payment_method)
        .bind(&order.trade_no)
        .bind(order.created_at)
        .bind(order.expired_at)
        .bind(order.paid_at)
        .bind(&order.refund_reason)
        .bind(order.refund_requested_at)
        .bind(order.refunded_at)
        .bind(&order.refund_rejection)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_order", e))?;
        Ok(())
    }

    async fn order_by_id(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(concat!("SELECT ", order_columns!(), " FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("order_by_id", e))?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn order_by_no(&mut self, order_no: &str) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(concat!(
            "SELECT ",
            order_columns!(),
            " FROM orders WHERE order_no = $1"
        ))
        .bind(order_no)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("order_by_no", e))?;
        row.as_ref().map(order_from_row).transpose()
    }

    #[instrument(
        skip(self, transition),
        fields(order_id = %transition.order_id, from = %transition.from, to = %transition.to),
        err
    )]
    async fn apply_transition(&mut self, transition: &Transition) -> Result<TransitionOutcome, StoreError> {
        let cols = TransitionColumns::for_event(&transition.event);
        let row = sqlx::query(concat!(
            r#"
            UPDATE orders SET
                status = $3,
                trade_no = COALESCE($4, trade_no),
                paid_at = COALESCE($5, paid_at),
                refund_reason = COALESCE($6, refund_reason),
                refund_requested_at = COALESCE($7, refund_requested_at),
                refunded_at = COALESCE($8, refunded_at),
                refund_rejection = CASE WHEN $9 THEN $10 ELSE refund_rejection END
            WHERE id = $1 AND status = $2
            RETURNING "#,
            order_columns!()
        ))
        .bind(transition.order_id.as_uuid())
        .bind(transition.from.as_str())
        .bind(transition.to.as_str())
        .bind(cols.trade_no)
        .bind(cols.paid_at)
        .bind(cols.refund_reason)
        .bind(cols.refund_requested_at)
        .bind(cols.refunded_at)
        .bind(cols.refund_rejection.is_some())
        .bind(cols.refund_rejection.flatten())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("apply_transition", e))?;

        match row {
            Some(row) => Ok(TransitionOutcome::Applied(order_from_row(&row)?)),
            None => Ok(TransitionOutcome::LostRace),
        }
    }

    #[instrument(skip(self), err)]
    async fn expire_overdue(&mut self, now: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(concat!(
            r#"
            UPDATE orders SET status = 'expired'
            WHERE status = 'pending' AND expired_at < $1
            RETURNING "#,
            order_columns!()
        ))
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("expire_overdue", e))?;
        rows.iter().map(order_from_row).collect()
    }

    async fn increment_sales(&mut self, product_id: ProductId, quantity: u32) -> Result<(), StoreError> {
        sqlx::query("UPDATE products SET sales_count = sales_count + $2 WHERE id = $1")
            .bind(product_id.as_uuid())
            .bind(i64::from(quantity))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("increment_sales", e))?;
        Ok(())
    }

    #[instrument(skip(self, now, stale_before), fields(order_id = %order_id), err)]
    async fn claim_refund(
        &mut self,
        order_id: OrderId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        // The order row lock orders this against a concurrent refund commit;
        // the status predicate is re-checked once that commit lands.
        let result = sqlx::query(
            r#"
            WITH target AS (
                SELECT id FROM orders
                WHERE id = $1 AND status = 'refund_pending'
                FOR UPDATE
            )
            INSERT INTO refund_claims (order_id, claimed_at)
            SELECT id, $2 FROM target
            ON CONFLICT (order_id) DO UPDATE SET claimed_at = EXCLUDED.claimed_at
            WHERE refund_claims.claimed_at < $3
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(now)
        .bind(stale_before)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("claim_refund", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn refund_claim_held(&mut self, order_id: OrderId, stale_before: DateTime<Utc>) -> Result<bool, StoreError> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM refund_claims WHERE order_id = $1 AND claimed_at >= $2)",
        )
        .bind(order_id.as_uuid())
        .bind(stale_before)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("refund_claim_held", e))
    }

    async fn release_refund_claim(&mut self, order_id: OrderId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM refund_claims WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("release_refund_claim", e))?;
        Ok(())
    }
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

/// Catalog lookups against the `products` table.
#[derive(Debug, Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn get_product(&self, id: ProductId) -> Option<Product> {
        let row = sqlx::query(
            "SELECT id, name, price, min_qty, max_qty, is_active FROM products WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(Some(row)) => match product_from_row(&row) {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::error!(product_id = %id, error = %e, "corrupt product row");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::error!(product_id = %id, error = %e, "catalog lookup failed");
                None
            }
        }
    }
}

fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Domain(DomainError::conflict(msg)),
                _ => StoreError::Database {
                    operation,
                    message: db_err.message().to_string(),
                },
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("{operation}: {err}"))
        }
        other => StoreError::database(operation, other),
    }
}

fn to_i32(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn to_u32(n: i32, column: &str) -> Result<u32, StoreError> {
    u32::try_from(n).map_err(|_| StoreError::Corrupt(format!("negative {column}: {n}")))
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Corrupt(format!("column {column}: {e}")))
}

fn amount(value: Decimal, column: &str) -> Result<Amount, StoreError> {
    Amount::new(value).map_err(|e| StoreError::Corrupt(format!("{column}: {e}")))
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let status: String = get(row, "status")?;
    Ok(Order {
        id: OrderId::from_uuid(get(row, "id")?),
        order_no: get(row, "order_no")?,
        product_id: ProductId::from_uuid(get(row, "product_id")?),
        user_id: UserId::from_uuid(get(row, "user_id")?),
        quantity: to_u32(get(row, "quantity")?, "quantity")?,
        total_amount: amount(get(row, "total_amount")?, "total_amount")?,
        status: OrderStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown order status '{status}'")))?,
        payment_method: get(row, "payment_method")?,
        trade_no: get(row, "trade_no")?,
        created_at: get(row, "created_at")?,
        expired_at: get(row, "expired_at")?,
        paid_at: get(row, "paid_at")?,
        refund_reason: get(row, "refund_reason")?,
        refund_requested_at: get(row, "refund_requested_at")?,
        refunded_at: get(row, "refunded_at")?,
        refund_rejection: get(row, "refund_rejection")?,
    })
}

fn card_from_row(row: &PgRow) -> Result<Card, StoreError> {
    let status: String = get(row, "status")?;
    let order_id: Option<Uuid> = get(row, "order_id")?;
    let secret: String = get(row, "secret")?;
    Ok(Card {
        id: CardId::from_uuid(get(row, "id")?),
        product_id: ProductId::from_uuid(get(row, "product_id")?),
        secret: Secret::new(secret),
        status: CardStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown card status '{status}'")))?,
        order_id: order_id.map(OrderId::from_uuid),
        locked_at: get(row, "locked_at")?,
        sold_at: get(row, "sold_at")?,
    })
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    Ok(Product {
        id: ProductId::from_uuid(get(row, "id")?),
        name: get(row, "name")?,
        price: amount(get(row, "price")?, "price")?,
        min_qty: to_u32(get(row, "min_qty")?, "min_qty")?,
        max_qty: to_u32(get(row, "max_qty")?, "max_qty")?,
        is_active: get(row, "is_active")?,
    })
}

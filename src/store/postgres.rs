use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{Postgres, Row, Transaction};
use tracing::Span;

use crate::models::{Delivery, Item, Order, Payment};
use crate::settings::DatabaseSettings;

use super::{OrderStore, StoreError};

// ============================================================================
// Postgres Order Store
// ============================================================================
//
// An order is spread over four tables (see sql/schema.sql):
//   orders      - one row per order_uid, scalar metadata
//   deliveries  - 1:1 with orders
//   payments    - 1:1 with orders
//   items       - 1:N with orders, ordered by `position`
//
// `save_order` upserts all four inside one transaction, replacing the item
// list entirely, so re-ingesting an order is idempotent and last-write-wins.
// Reads run in one REPEATABLE READ transaction, so an order and its items
// always come from the same committed version.
//
// ============================================================================

const SELECT_ORDERS: &str = "SELECT o.order_uid, o.track_number, o.entry, o.locale,
        o.internal_signature, o.customer_id, o.delivery_service, o.shardkey,
        o.sm_id, o.date_created, o.oof_shard,
        d.name, d.phone, d.zip, d.city, d.address, d.region, d.email,
        p.transaction_id, p.request_id, p.currency, p.provider, p.amount,
        p.payment_dt, p.bank, p.delivery_cost, p.goods_total, p.custom_fee
    FROM orders o
    JOIN deliveries d ON d.order_uid = o.order_uid
    JOIN payments p ON p.order_uid = o.order_uid";

const READ_SNAPSHOT: &str = "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY";

const SELECT_ITEMS: &str = "SELECT order_uid, chrt_id, track_number, price, rid, name,
        sale, size, total_price, nm_id, brand, status
    FROM items";

const UPSERT_ORDER: &str = "INSERT INTO orders (
        order_uid, track_number, entry, locale, internal_signature, customer_id,
        delivery_service, shardkey, sm_id, date_created, oof_shard
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
    ON CONFLICT (order_uid) DO UPDATE SET
        track_number = EXCLUDED.track_number,
        entry = EXCLUDED.entry,
        locale = EXCLUDED.locale,
        internal_signature = EXCLUDED.internal_signature,
        customer_id = EXCLUDED.customer_id,
        delivery_service = EXCLUDED.delivery_service,
        shardkey = EXCLUDED.shardkey,
        sm_id = EXCLUDED.sm_id,
        date_created = EXCLUDED.date_created,
        oof_shard = EXCLUDED.oof_shard";

const UPSERT_DELIVERY: &str = "INSERT INTO deliveries (
        order_uid, name, phone, zip, city, address, region, email
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    ON CONFLICT (order_uid) DO UPDATE SET
        name = EXCLUDED.name,
        phone = EXCLUDED.phone,
        zip = EXCLUDED.zip,
        city = EXCLUDED.city,
        address = EXCLUDED.address,
        region = EXCLUDED.region,
        email = EXCLUDED.email";

const UPSERT_PAYMENT: &str = "INSERT INTO payments (
        order_uid, transaction_id, request_id, currency, provider, amount,
        payment_dt, bank, delivery_cost, goods_total, custom_fee
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
    ON CONFLICT (order_uid) DO UPDATE SET
        transaction_id = EXCLUDED.transaction_id,
        request_id = EXCLUDED.request_id,
        currency = EXCLUDED.currency,
        provider = EXCLUDED.provider,
        amount = EXCLUDED.amount,
        payment_dt = EXCLUDED.payment_dt,
        bank = EXCLUDED.bank,
        delivery_cost = EXCLUDED.delivery_cost,
        goods_total = EXCLUDED.goods_total,
        custom_fee = EXCLUDED.custom_fee";

const INSERT_ITEM: &str = "INSERT INTO items (
        order_uid, position, chrt_id, track_number, price, rid, name, sale,
        size, total_price, nm_id, brand, status
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)";

pub struct PgOrderStore {
    pool: PgPool,
    span: Span,
}

impl PgOrderStore {
    pub async fn connect(settings: &DatabaseSettings, span: Span) -> Result<Self, StoreError> {
        let ssl_mode = PgSslMode::from_str(&settings.ssl_mode).map_err(StoreError::Connect)?;

        let options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.name)
            .ssl_mode(ssl_mode);

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.connect_timeout)
            .connect_with(options)
            .await
            .map_err(StoreError::Connect)?;

        tracing::info!(
            parent: &span,
            host = %settings.host,
            port = settings.port,
            database = %settings.name,
            "✅ Connected to Postgres"
        );

        Ok(Self { pool, span })
    }

    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!(parent: &self.span, "Postgres pool closed");
    }

    async fn begin_snapshot(
        &self,
        operation: &'static str,
    ) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::query(operation))?;
        sqlx::query(READ_SNAPSHOT)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::query(operation))?;
        Ok(tx)
    }
}

async fn load_items(
    conn: &mut PgConnection,
    order_uid: Option<&str>,
) -> Result<HashMap<String, Vec<Item>>, StoreError> {
    let rows = match order_uid {
        Some(uid) => {
            let query = format!("{SELECT_ITEMS} WHERE order_uid = $1 ORDER BY position");
            sqlx::query(&query).bind(uid).fetch_all(&mut *conn).await
        }
        None => {
            let query = format!("{SELECT_ITEMS} ORDER BY order_uid, position");
            sqlx::query(&query).fetch_all(&mut *conn).await
        }
    }
    .map_err(StoreError::query("load_items"))?;

    let mut items: HashMap<String, Vec<Item>> = HashMap::new();
    for row in rows {
        let owner: String = row.try_get("order_uid").map_err(StoreError::query("load_items"))?;
        let item = item_from_row(&row).map_err(StoreError::query("load_items"))?;
        items.entry(owner).or_default().push(item);
    }
    Ok(items)
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn get_all_orders(&self) -> Result<Vec<Order>, StoreError> {
        let mut tx = self.begin_snapshot("get_all_orders").await?;
        let rows = sqlx::query(SELECT_ORDERS)
            .fetch_all(&mut *tx)
            .await
            .map_err(StoreError::query("get_all_orders"))?;
        let mut items = load_items(&mut *tx, None).await?;
        tx.commit().await.map_err(StoreError::query("get_all_orders"))?;

        let orders = rows
            .iter()
            .map(|row| {
                let uid: String = row.try_get("order_uid")?;
                let order_items = items.remove(&uid).unwrap_or_default();
                order_from_row(row, order_items)
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(StoreError::query("get_all_orders"))?;

        tracing::debug!(parent: &self.span, count = orders.len(), "Loaded all orders");
        Ok(orders)
    }

    async fn get_order(&self, order_uid: &str) -> Result<Option<Order>, StoreError> {
        let query = format!("{SELECT_ORDERS} WHERE o.order_uid = $1");
        let mut tx = self.begin_snapshot("get_order").await?;
        let row = sqlx::query(&query)
            .bind(order_uid)
            .fetch_optional(&mut *tx)
            .await
            .map_err(StoreError::query("get_order"))?;

        // Dropping `tx` ends the read-only transaction.
        let Some(row) = row else {
            return Ok(None);
        };

        let items = load_items(&mut *tx, Some(order_uid))
            .await?
            .remove(order_uid)
            .unwrap_or_default();
        tx.commit().await.map_err(StoreError::query("get_order"))?;

        order_from_row(&row, items)
            .map(Some)
            .map_err(StoreError::query("get_order"))
    }

    async fn save_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::query("save_order"))?;

        let result: Result<(), sqlx::Error> = async {
            sqlx::query(UPSERT_ORDER)
                .bind(&order.order_uid)
                .bind(&order.track_number)
                .bind(&order.entry)
                .bind(&order.locale)
                .bind(&order.internal_signature)
                .bind(&order.customer_id)
                .bind(&order.delivery_service)
                .bind(&order.shardkey)
                .bind(order.sm_id)
                .bind(order.date_created)
                .bind(&order.oof_shard)
                .execute(&mut *tx)
                .await?;

            let delivery = &order.delivery;
            sqlx::query(UPSERT_DELIVERY)
                .bind(&order.order_uid)
                .bind(&delivery.name)
                .bind(&delivery.phone)
                .bind(&delivery.zip)
                .bind(&delivery.city)
                .bind(&delivery.address)
                .bind(&delivery.region)
                .bind(&delivery.email)
                .execute(&mut *tx)
                .await?;

            let payment = &order.payment;
            sqlx::query(UPSERT_PAYMENT)
                .bind(&order.order_uid)
                .bind(&payment.transaction)
                .bind(&payment.request_id)
                .bind(&payment.currency)
                .bind(&payment.provider)
                .bind(payment.amount)
                .bind(payment.payment_dt)
                .bind(&payment.bank)
                .bind(payment.delivery_cost)
                .bind(payment.goods_total)
                .bind(payment.custom_fee)
                .execute(&mut *tx)
                .await?;

            sqlx::query("DELETE FROM items WHERE order_uid = $1")
                .bind(&order.order_uid)
                .execute(&mut *tx)
                .await?;

            for (position, item) in order.items.iter().enumerate() {
                sqlx::query(INSERT_ITEM)
                    .bind(&order.order_uid)
                    .bind(position as i32)
                    .bind(item.chrt_id)
                    .bind(&item.track_number)
                    .bind(item.price)
                    .bind(&item.rid)
                    .bind(&item.name)
                    .bind(item.sale)
                    .bind(&item.size)
                    .bind(item.total_price)
                    .bind(item.nm_id)
                    .bind(&item.brand)
                    .bind(item.status)
                    .execute(&mut *tx)
                    .await?;
            }

            Ok(())
        }
        .await;

        // Dropping `tx` on the error path rolls the transaction back.
        result.map_err(StoreError::query("save_order"))?;
        tx.commit().await.map_err(StoreError::query("save_order"))?;

        tracing::debug!(
            parent: &self.span,
            order_uid = %order.order_uid,
            item_count = order.items.len(),
            "Order upserted"
        );
        Ok(())
    }
}

fn order_from_row(row: &PgRow, items: Vec<Item>) -> Result<Order, sqlx::Error> {
    Ok(Order {
        order_uid: row.try_get("order_uid")?,
        track_number: row.try_get("track_number")?,
        entry: row.try_get("entry")?,
        delivery: Delivery {
            name: row.try_get("name")?,
            phone: row.try_get("phone")?,
            zip: row.try_get("zip")?,
            city: row.try_get("city")?,
            address: row.try_get("address")?,
            region: row.try_get("region")?,
            email: row.try_get("email")?,
        },
        payment: Payment {
            transaction: row.try_get("transaction_id")?,
            request_id: row.try_get("request_id")?,
            currency: row.try_get("currency")?,
            provider: row.try_get("provider")?,
            amount: row.try_get("amount")?,
            payment_dt: row.try_get("payment_dt")?,
            bank: row.try_get("bank")?,
            delivery_cost: row.try_get("delivery_cost")?,
            goods_total: row.try_get("goods_total")?,
            custom_fee: row.try_get("custom_fee")?,
        },
        items,
        locale: row.try_get("locale")?,
        internal_signature: row.try_get("internal_signature")?,
        customer_id: row.try_get("customer_id")?,
        delivery_service: row.try_get("delivery_service")?,
        shardkey: row.try_get("shardkey")?,
        sm_id: row.try_get("sm_id")?,
        date_created: row.try_get("date_created")?,
        oof_shard: row.try_get("oof_shard")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<Item, sqlx::Error> {
    Ok(Item {
        chrt_id: row.try_get("chrt_id")?,
        track_number: row.try_get("track_number")?,
        price: row.try_get("price")?,
        rid: row.try_get("rid")?,
        name: row.try_get("name")?,
        sale: row.try_get("sale")?,
        size: row.try_get("size")?,
        total_price: row.try_get("total_price")?,
        nm_id: row.try_get("nm_id")?,
        brand: row.try_get("brand")?,
        status: row.try_get("status")?,
    })
}

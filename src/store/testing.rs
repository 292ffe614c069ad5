//! In-memory stores for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::models::{Item, Order};

use super::{OrderStore, StoreError};

pub(crate) fn sample_order(order_uid: &str) -> Order {
    Order {
        order_uid: order_uid.to_string(),
        track_number: "WBILMTESTTRACK".to_string(),
        entry: "WBIL".to_string(),
        items: vec![Item {
            chrt_id: 9934930,
            track_number: "WBILMTESTTRACK".to_string(),
            price: 453,
            rid: "ab4219087a764ae0btest".to_string(),
            name: "Mascaras".to_string(),
            sale: 30,
            size: "0".to_string(),
            total_price: 317,
            nm_id: 2389212,
            brand: "Vivienne Sabo".to_string(),
            status: 202,
        }],
        locale: "en".to_string(),
        customer_id: "test".to_string(),
        delivery_service: "meest".to_string(),
        shardkey: "9".to_string(),
        sm_id: 99,
        oof_shard: "1".to_string(),
        ..Default::default()
    }
}

/// Map-backed store that counts calls and can be told to fail.
#[derive(Default)]
pub(crate) struct MemoryStore {
    orders: Mutex<HashMap<String, Order>>,
    failing: AtomicBool,
    get_calls: AtomicUsize,
    save_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        let store = Self::default();
        {
            let mut map = store.orders.lock().unwrap();
            for order in orders {
                map.insert(order.order_uid.clone(), order);
            }
        }
        store
    }

    pub fn failing() -> Self {
        let store = Self::default();
        store.set_failing(true);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    pub fn stored(&self, order_uid: &str) -> Option<Order> {
        self.orders.lock().unwrap().get(order_uid).cloned()
    }

    fn check(&self, operation: &'static str) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Query {
                operation,
                source: sqlx::Error::PoolTimedOut,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn get_all_orders(&self) -> Result<Vec<Order>, StoreError> {
        self.check("get_all_orders")?;
        Ok(self.orders.lock().unwrap().values().cloned().collect())
    }

    async fn get_order(&self, order_uid: &str) -> Result<Option<Order>, StoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check("get_order")?;
        Ok(self.orders.lock().unwrap().get(order_uid).cloned())
    }

    async fn save_order(&self, order: &Order) -> Result<(), StoreError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        self.check("save_order")?;
        self.orders
            .lock()
            .unwrap()
            .insert(order.order_uid.clone(), order.clone());
        Ok(())
    }
}

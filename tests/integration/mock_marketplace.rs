//! Mock marketplace for integration testing.
//!
//! A deterministic `RentalMarketplace` whose balance, pools, order fill
//! and failure modes are all controllable from test code. Every order
//! and pool push is recorded so tests can assert on what the engine sent.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hashrent::marketplaces::{
    CancelAck, DurationQuery, MarketKind, MarketplaceError, OrderBook, OrderPayload,
    OrderReceipt, PoolAck, RentalMarketplace,
};
use hashrent::types::{Pool, PoolProfile};

/// A mock marketplace for deterministic testing.
pub struct MockMarketplace {
    kind: MarketKind,
    balance: Arc<Mutex<Decimal>>,
    pools: Arc<Mutex<Vec<Pool>>>,
    profiles: Arc<Mutex<Vec<PoolProfile>>>,
    /// What `create_order` answers with.
    fill: Arc<Mutex<OrderReceipt>>,
    orders: Arc<Mutex<Vec<OrderPayload>>>,
    pool_pushes: Arc<Mutex<Vec<Pool>>>,
    /// If set, `create_order` fails with this error.
    order_error: Arc<Mutex<Option<MarketplaceError>>>,
    /// If set, `get_market_price` fails.
    price_down: Arc<Mutex<bool>>,
    /// If set, `create_order` records the order and then stalls this long.
    order_delay: Arc<Mutex<Option<Duration>>>,
}

impl MockMarketplace {
    pub fn new(kind: MarketKind, balance: Decimal) -> Self {
        Self {
            kind,
            balance: Arc::new(Mutex::new(balance)),
            pools: Arc::new(Mutex::new(Vec::new())),
            profiles: Arc::new(Mutex::new(Vec::new())),
            fill: Arc::new(Mutex::new(OrderReceipt {
                id: "order-1".to_string(),
                status_code: "ACTIVE".to_string(),
                payed_amount: dec!(0.01),
            })),
            orders: Arc::new(Mutex::new(Vec::new())),
            pool_pushes: Arc::new(Mutex::new(Vec::new())),
            order_error: Arc::new(Mutex::new(None)),
            price_down: Arc::new(Mutex::new(false)),
            order_delay: Arc::new(Mutex::new(None)),
        }
    }

    pub fn nicehash() -> Self {
        Self::new(MarketKind::NiceHash, dec!(1))
    }

    /// Pools the marketplace reports on setup.
    pub fn with_pools(self, pools: Vec<Pool>) -> Self {
        *self.pools.lock().unwrap() = pools;
        self
    }

    pub fn with_profiles(self, profiles: Vec<PoolProfile>) -> Self {
        *self.profiles.lock().unwrap() = profiles;
        self
    }

    /// Answer subsequent orders with this receipt.
    pub fn set_fill(&self, id: &str, status_code: &str, payed_amount: Decimal) {
        *self.fill.lock().unwrap() = OrderReceipt {
            id: id.to_string(),
            status_code: status_code.to_string(),
            payed_amount,
        };
    }

    /// Fail all subsequent orders.
    pub fn set_order_error(&self, err: MarketplaceError) {
        *self.order_error.lock().unwrap() = Some(err);
    }

    /// Accept orders, then stall before answering.
    pub fn set_order_delay(&self, delay: Duration) {
        *self.order_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_price_down(&self) {
        *self.price_down.lock().unwrap() = true;
    }

    pub fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    pub fn submitted(&self) -> Vec<OrderPayload> {
        self.orders.lock().unwrap().clone()
    }

    pub fn pool_pushes(&self) -> Vec<Pool> {
        self.pool_pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl RentalMarketplace for MockMarketplace {
    fn kind(&self) -> MarketKind {
        self.kind
    }

    async fn test_authorization(&self) -> Result<bool, MarketplaceError> {
        Ok(true)
    }

    async fn get_balance(&self, _currency: &str) -> Result<Decimal, MarketplaceError> {
        Ok(*self.balance.lock().unwrap())
    }

    async fn get_pools(&self) -> Result<Vec<Pool>, MarketplaceError> {
        Ok(self.pools.lock().unwrap().clone())
    }

    async fn create_or_edit_pool(&self, pool: &Pool) -> Result<PoolAck, MarketplaceError> {
        let mut pushes = self.pool_pushes.lock().unwrap();
        pushes.push(pool.clone());
        let remote_id = pool
            .remote_id
            .clone()
            .unwrap_or_else(|| format!("remote-{}", pushes.len()));
        Ok(PoolAck {
            success: true,
            remote_id: Some(remote_id),
            message: None,
        })
    }

    async fn get_pool_profiles(&self) -> Result<Vec<PoolProfile>, MarketplaceError> {
        if self.kind == MarketKind::MiningRigRentals {
            Ok(self.profiles.lock().unwrap().clone())
        } else {
            Err(MarketplaceError::Unsupported("pool profiles"))
        }
    }

    async fn create_order(&self, order: &OrderPayload) -> Result<OrderReceipt, MarketplaceError> {
        if let Some(err) = self.order_error.lock().unwrap().clone() {
            return Err(err);
        }
        self.orders.lock().unwrap().push(order.clone());
        *self.balance.lock().unwrap() -= order.amount;
        let delay = *self.order_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.fill.lock().unwrap().clone())
    }

    async fn get_order(&self, id: &str) -> Result<OrderReceipt, MarketplaceError> {
        let fill = self.fill.lock().unwrap().clone();
        if fill.id == id {
            Ok(fill)
        } else {
            Err(MarketplaceError::Marketplace(format!("order {id} not found")))
        }
    }

    async fn get_order_book(&self, algorithm: &str) -> Result<OrderBook, MarketplaceError> {
        Ok(OrderBook {
            algorithm: algorithm.to_string(),
            display_market_factor: "TH".to_string(),
            market_factor: dec!(1000000000000),
            entries: Vec::new(),
        })
    }

    async fn cancel_order(&self, id: &str) -> Result<CancelAck, MarketplaceError> {
        if id == "gone" {
            return Err(MarketplaceError::Network("connection reset".to_string()));
        }
        Ok(CancelAck::default())
    }

    async fn estimate_duration(&self, query: &DurationQuery) -> Result<Decimal, MarketplaceError> {
        let daily_cost = query.price * query.limit;
        if daily_cost.is_zero() {
            return Err(MarketplaceError::Marketplace("limit and price must be non-zero".to_string()));
        }
        Ok(query.amount / daily_cost * dec!(86400))
    }

    async fn get_market_price(&self, _algorithm: &str) -> Result<Decimal, MarketplaceError> {
        if *self.price_down.lock().unwrap() {
            return Err(MarketplaceError::Network("stats endpoint down".to_string()));
        }
        Ok(dec!(0.45))
    }

    async fn get_deposit_addresses(&self, _currency: &str) -> Result<Vec<String>, MarketplaceError> {
        Ok(vec!["mock-deposit".to_string()])
    }
}

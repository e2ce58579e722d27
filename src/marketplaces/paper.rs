//! Paper marketplace.
//!
//! An in-memory `RentalMarketplace` for dry runs: balances, pools and
//! orders live in process memory and nothing leaves the machine. Orders
//! are filled with a configurable remote status so the whole rental
//! pipeline can be exercised end to end without spending funds.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    CancelAck, DurationQuery, MarketKind, MarketplaceError, OrderBook, OrderBookEntry,
    OrderPayload, OrderReceipt, PoolAck, RentalMarketplace,
};
use crate::types::{Pool, PoolProfile};

const SECONDS_PER_DAY: Decimal = dec!(86400);

#[derive(Debug, Default)]
struct PaperBook {
    balance: Decimal,
    pools: Vec<Pool>,
    profiles: Vec<PoolProfile>,
    orders: HashMap<String, OrderReceipt>,
}

/// Dry-run marketplace.
pub struct PaperMarketplace {
    kind: MarketKind,
    market_price: Decimal,
    fill_status: String,
    book: Mutex<PaperBook>,
}

impl PaperMarketplace {
    pub fn new(kind: MarketKind, balance: Decimal, market_price: Decimal) -> Self {
        Self {
            kind,
            market_price,
            fill_status: "ACTIVE".to_string(),
            book: Mutex::new(PaperBook {
                balance,
                ..Default::default()
            }),
        }
    }

    /// Remote status new orders are reported with.
    pub fn with_fill_status(mut self, status_code: &str) -> Self {
        self.fill_status = status_code.to_string();
        self
    }

    pub fn balance(&self) -> Decimal {
        self.book().balance
    }

    pub fn order_count(&self) -> usize {
        self.book().orders.len()
    }

    fn book(&self) -> MutexGuard<'_, PaperBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RentalMarketplace for PaperMarketplace {
    fn kind(&self) -> MarketKind {
        self.kind
    }

    async fn test_authorization(&self) -> Result<bool, MarketplaceError> {
        Ok(true)
    }

    async fn get_balance(&self, _currency: &str) -> Result<Decimal, MarketplaceError> {
        Ok(self.book().balance)
    }

    async fn get_pools(&self) -> Result<Vec<Pool>, MarketplaceError> {
        Ok(self.book().pools.clone())
    }

    async fn create_or_edit_pool(&self, pool: &Pool) -> Result<PoolAck, MarketplaceError> {
        let mut book = self.book();
        let remote_id = match &pool.remote_id {
            Some(id) => {
                let existing = book
                    .pools
                    .iter_mut()
                    .find(|p| p.remote_id.as_deref() == Some(id.as_str()))
                    .ok_or_else(|| MarketplaceError::Marketplace(format!("unknown pool {id}")))?;
                *existing = pool.clone();
                id.clone()
            }
            None => {
                let id = format!("paper-pool-{}", book.pools.len() + 1);
                let mut created = pool.clone();
                created.remote_id = Some(id.clone());
                book.pools.push(created);
                id
            }
        };
        debug!(remote_id = %remote_id, "Paper pool stored");
        Ok(PoolAck {
            success: true,
            remote_id: Some(remote_id),
            message: None,
        })
    }

    async fn get_pool_profiles(&self) -> Result<Vec<PoolProfile>, MarketplaceError> {
        Ok(self.book().profiles.clone())
    }

    async fn create_pool_profile(
        &self,
        name: &str,
        algorithm: &str,
    ) -> Result<PoolProfile, MarketplaceError> {
        let mut book = self.book();
        let profile = PoolProfile {
            id: format!("paper-profile-{}", book.profiles.len() + 1),
            name: name.to_string(),
            algorithm: Some(algorithm.to_string()),
        };
        book.profiles.push(profile.clone());
        Ok(profile)
    }

    async fn delete_pool_profile(&self, id: &str) -> Result<(), MarketplaceError> {
        self.book().profiles.retain(|p| p.id != id);
        Ok(())
    }

    async fn create_order(&self, order: &OrderPayload) -> Result<OrderReceipt, MarketplaceError> {
        let mut book = self.book();
        if order.amount > book.balance {
            return Err(MarketplaceError::Marketplace(format!(
                "insufficient balance: need {}, have {}",
                order.amount, book.balance
            )));
        }
        book.balance -= order.amount;
        let receipt = OrderReceipt {
            id: format!("paper-{}", Uuid::new_v4()),
            status_code: self.fill_status.clone(),
            payed_amount: order.amount,
        };
        book.orders.insert(receipt.id.clone(), receipt.clone());
        info!(
            order_id = %receipt.id,
            amount = %order.amount,
            limit = %order.limit,
            pool = %order.pool_host,
            "[PAPER] Order filled"
        );
        Ok(receipt)
    }

    async fn get_order(&self, id: &str) -> Result<OrderReceipt, MarketplaceError> {
        self.book()
            .orders
            .get(id)
            .cloned()
            .ok_or_else(|| MarketplaceError::Marketplace(format!("order {id} not found")))
    }

    async fn get_order_book(&self, algorithm: &str) -> Result<OrderBook, MarketplaceError> {
        let book = self.book();
        let entries = book
            .orders
            .values()
            .map(|o| OrderBookEntry {
                id: o.id.clone(),
                price: self.market_price,
                limit: Decimal::ZERO,
                alive: o.is_live(),
            })
            .collect();
        Ok(OrderBook {
            algorithm: algorithm.to_string(),
            display_market_factor: "TH".to_string(),
            market_factor: dec!(1000000000000),
            entries,
        })
    }

    async fn cancel_order(&self, id: &str) -> Result<CancelAck, MarketplaceError> {
        let mut book = self.book();
        match book.orders.get_mut(id) {
            Some(order) if order.status_code == "CANCELLED" => Ok(CancelAck {
                error: Some(format!("order {id} already cancelled")),
            }),
            Some(order) => {
                order.status_code = "CANCELLED".to_string();
                Ok(CancelAck::default())
            }
            None => Ok(CancelAck {
                error: Some(format!("order {id} not found")),
            }),
        }
    }

    async fn estimate_duration(&self, query: &DurationQuery) -> Result<Decimal, MarketplaceError> {
        let daily_cost = query.price * query.limit;
        if daily_cost <= Decimal::ZERO {
            return Err(MarketplaceError::Marketplace(
                "price and limit must be positive".to_string(),
            ));
        }
        Ok(query.amount / daily_cost * SECONDS_PER_DAY)
    }

    async fn get_market_price(&self, _algorithm: &str) -> Result<Decimal, MarketplaceError> {
        Ok(self.market_price)
    }

    async fn get_deposit_addresses(&self, currency: &str) -> Result<Vec<String>, MarketplaceError> {
        Ok(vec![format!("paper-{}-deposit", currency.to_lowercase())])
    }
}

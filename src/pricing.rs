//! Price computation for reservations
//!
//! All amounts are integer minor units. A discount never takes a positive
//! price below one minor unit.

use std::collections::HashMap;

/// Price of a reservation after discount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub price: i64,
    /// Undiscounted price, set only when a discount changed the price
    pub original_price: Option<i64>,
    pub discount_percent: Option<u8>,
}

pub trait PricingPolicy: Send + Sync {
    /// Undiscounted price for an operation type
    fn base_price(&self, operation_type: &str, model: Option<&str>) -> i64;

    fn price(&self, operation_type: &str, model: Option<&str>, discount_percent: Option<u8>) -> i64 {
        self.quote(operation_type, model, discount_percent).price
    }

    fn quote(&self, operation_type: &str, model: Option<&str>, discount_percent: Option<u8>) -> Quote {
        let base = self.base_price(operation_type, model).max(0);
        match discount_percent.filter(|pct| *pct > 0) {
            Some(pct) => {
                let price = apply_discount(base, pct);
                Quote {
                    price,
                    original_price: (price != base).then_some(base),
                    discount_percent: Some(pct),
                }
            }
            None => Quote {
                price: base,
                original_price: None,
                discount_percent: None,
            },
        }
    }
}

/// `price - round_half_up(price * pct / 100)`, floored at 1 for positive prices
pub fn apply_discount(price: i64, percent: u8) -> i64 {
    if price <= 0 {
        return 0;
    }
    let pct = i64::from(percent.min(100));
    let discount = (price * pct + 50) / 100;
    (price - discount).max(1)
}

/// Flat default price with per-operation-type overrides
#[derive(Debug, Clone, Default)]
pub struct ConfiguredPricing {
    default_price: i64,
    prices: HashMap<String, i64>,
}

impl ConfiguredPricing {
    pub fn new(default_price: i64, prices: HashMap<String, i64>) -> Self {
        Self {
            default_price,
            prices,
        }
    }

    pub fn flat(price: i64) -> Self {
        Self::new(price, HashMap::new())
    }
}

impl PricingPolicy for ConfiguredPricing {
    fn base_price(&self, operation_type: &str, _model: Option<&str>) -> i64 {
        self.prices
            .get(operation_type)
            .copied()
            .unwrap_or(self.default_price)
    }
}

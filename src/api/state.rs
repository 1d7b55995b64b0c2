use std::sync::Arc;

use crate::config::Config;
use crate::ledger::BillingLedger;
use crate::observability::Metrics;
use crate::queue::JobBroker;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ledger: BillingLedger,
    pub broker: Arc<JobBroker>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        config: Config,
        ledger: BillingLedger,
        broker: Arc<JobBroker>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            ledger,
            broker,
            metrics,
        }
    }
}

pub mod broker;

pub use broker::{BrokerError, JobBroker, JobEnvelope};

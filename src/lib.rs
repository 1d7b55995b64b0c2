pub mod api;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod humanize;
pub mod ledger;
pub mod notify;
pub mod observability;
pub mod orchestrator;
pub mod pricing;
pub mod provider;
pub mod queue;
pub mod retry;
pub mod worker;

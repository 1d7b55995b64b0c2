use clap::{Parser, Subcommand};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(name = "genledger")]
#[command(about = "Generation job orchestration with a reserve/confirm billing ledger", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the job intake API and the worker pool
    Serve(ServeArgs),
    /// Add funds to a user's balance
    Credit(CreditArgs),
    /// Show a user's account
    Balance(UserArgs),
    /// List a user's operations, newest first
    Operations(OperationsArgs),
    /// Show a user's usage statistics
    Stats(UserArgs),
    /// Refund a charged operation
    Refund(RefundArgs),
    /// Toggle unmetered (free) access for a user
    Unmetered(UnmeteredArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Overrides server.bind_addr
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[derive(clap::Args, Debug)]
pub struct UserArgs {
    pub user_id: u64,
}

#[derive(clap::Args, Debug)]
pub struct CreditArgs {
    pub user_id: u64,
    /// Amount in minor units
    pub amount: i64,
}

#[derive(clap::Args, Debug)]
pub struct OperationsArgs {
    pub user_id: u64,
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(clap::Args, Debug)]
pub struct RefundArgs {
    pub operation_id: u64,
}

#[derive(clap::Args, Debug)]
pub struct UnmeteredArgs {
    pub user_id: u64,
    /// Revoke instead of grant
    #[arg(long)]
    pub off: bool,
}

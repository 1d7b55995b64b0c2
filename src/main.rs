mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use genledger::config::Config;
use genledger::humanize::format_minor;
use genledger::ledger::BillingLedger;
use std::sync::Arc;

type AnyError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    genledger::observability::init_tracing();

    let cli = Cli::parse();
    let mut config = Config::load()?;

    match cli.command {
        Commands::Serve(args) => {
            if let Some(address) = args.address {
                config.server.bind_addr = address;
            }
            genledger::api::run(config).await?;
        }
        Commands::Credit(args) => {
            let ledger = open_ledger(&config)?;
            let balance = ledger.credit(args.user_id, args.amount)?;
            ledger.persist()?;
            println!("user {} balance: {}", args.user_id, format_minor(balance));
        }
        Commands::Balance(args) => {
            let account = open_ledger(&config)?.account(args.user_id)?;
            println!(
                "user {} balance: {}{}",
                account.user_id,
                format_minor(account.balance),
                if account.unmetered { " (unmetered)" } else { "" }
            );
        }
        Commands::Operations(args) => {
            let ledger = open_ledger(&config)?;
            for operation in ledger.operations_for_user(args.user_id, args.limit)? {
                println!("{}", serde_json::to_string(&operation)?);
            }
        }
        Commands::Stats(args) => {
            let stats = open_ledger(&config)?.user_stats(args.user_id)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Refund(args) => {
            let ledger = open_ledger(&config)?;
            if ledger.refund(args.operation_id)? {
                ledger.persist()?;
                println!("operation {} refunded", args.operation_id);
            } else {
                return Err(format!("operation {} is not refundable", args.operation_id).into());
            }
        }
        Commands::Unmetered(args) => {
            let ledger = open_ledger(&config)?;
            ledger.set_unmetered(args.user_id, !args.off)?;
            ledger.persist()?;
            println!("user {} unmetered: {}", args.user_id, !args.off);
        }
    }

    Ok(())
}

fn open_ledger(config: &Config) -> Result<BillingLedger, AnyError> {
    Ok(BillingLedger::open(
        &config.server.ledger_path,
        Arc::new(config.pricing()),
    )?)
}

//! Command-line interface.
//!
//! # Commands
//!
//! - `watch`: resolve the pool, stream its Swap/Mint/Burn events to CSV and
//!   print each one as it arrives
//! - `pool`: show which fee tiers have a pool for the configured pair
//! - `topics`: show the event selectors in use
//!
//! # Example
//!
//! ```bash
//! v3-pool-stream pool
//! v3-pool-stream watch --output-dir ./data --max-attempts 10
//! ```

use alloy::primitives::Address;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::MonitorResult;
use crate::events::{
    DecodedEvent, EventDecoder, EventKind, SelectorSet, BURN_SIGNATURE, MINT_SIGNATURE,
    SWAP_SIGNATURE,
};
use crate::pool::{choose_preferred, AlloyFactoryClient, FeeTier, PoolResolver, PREFERENCE_NOTE};
use crate::rpc::{create_provider, redact_url, LogFilter, WsConnector};
use crate::sink::RecordSink;
use crate::subscription::{SubscriptionClient, SubscriptionStats};

const OBSERVER_CAPACITY: usize = 1024;

/// Live Uniswap V3 pool event stream
#[derive(Parser, Debug)]
#[command(name = "v3-pool-stream")]
#[command(about = "Stream Uniswap V3 pool Swap/Mint/Burn events to CSV", long_about = None)]
#[command(version)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Stream pool events until Ctrl-C
    Watch {
        /// Pool to stream instead of resolving one from the token pair
        #[arg(long)]
        pool: Option<Address>,

        /// Reconnects allowed before giving up
        #[arg(short, long)]
        max_attempts: Option<u32>,

        /// Directory for the CSV files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Only write records, do not print events
        #[arg(short, long)]
        quiet: bool,
    },

    /// Query every fee tier for the configured pair
    Pool,

    /// Print the Swap/Mint/Burn selectors
    Topics,
}

/// Parse CLI arguments and execute the selected command.
///
/// # Errors
///
/// Returns the error that ended the command: configuration, pool discovery,
/// storage, or an exhausted reconnect budget.
pub async fn run() -> MonitorResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            pool,
            max_attempts,
            output_dir,
            quiet,
        } => run_watch_command(pool, max_attempts, output_dir, quiet).await,
        Commands::Pool => run_pool_command().await,
        Commands::Topics => {
            run_topics_command();
            Ok(())
        }
    }
}

async fn run_watch_command(
    pool: Option<Address>,
    max_attempts: Option<u32>,
    output_dir: Option<PathBuf>,
    quiet: bool,
) -> MonitorResult<()> {
    let mut config = Config::from_env()?;
    if let Some(pool) = pool {
        config = config.with_pool_address(pool);
    }
    if let Some(max_attempts) = max_attempts {
        config = config.with_max_attempts(max_attempts);
    }
    if let Some(dir) = output_dir {
        config = config.with_output_dir(dir);
    }

    println!(
        "{}",
        format!("🔍 Streaming {} pool events on {}", config.pair_label(), config.network())
            .cyan()
            .bold()
    );

    let pool = match config.pool_address() {
        Some(pool) => {
            info!(%pool, "Using configured pool");
            pool
        }
        None => {
            let provider = create_provider(config.http_rpc_url())?;
            let resolver =
                PoolResolver::new(AlloyFactoryClient::new(provider, config.factory_address()));
            let (tier, pool) = resolver.resolve_preferred(config.pair()?).await?;
            println!("{} Pool {} at {} fee", "📍".cyan(), pool.to_checksum(None).yellow(), tier);
            println!("   {}", format!("note: {PREFERENCE_NOTE}").dimmed());
            pool
        }
    };

    let sink = RecordSink::open(config.output_dir())?;
    for kind in EventKind::ALL {
        println!("{} {:<4} → {}", "💾".blue(), kind.slug(), sink.path(kind).display());
    }
    println!(
        "{} {}",
        "🔌".cyan(),
        redact_url(config.ws_rpc_url()).dimmed()
    );
    println!();

    let stop = CancellationToken::new();
    let signal_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_stop.cancel();
        }
    });

    let selectors = config.selectors();
    let connector = WsConnector::new(config.ws_rpc_url().to_string(), config.subscribe_timeout());
    let mut client = SubscriptionClient::new(
        connector,
        EventDecoder::new(selectors),
        LogFilter::new(pool, selectors.all()),
        sink,
        config.backoff(),
    )
    .with_stop(stop);

    let printer = if quiet {
        None
    } else {
        let (tx, rx) = broadcast::channel(OBSERVER_CAPACITY);
        client = client.with_observer(tx);
        Some(tokio::spawn(print_events(rx)))
    };

    let result = client.run().await;
    let stats = *client.stats();
    // Dropping the client closes the observer channel.
    drop(client);
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    print_summary(&stats);
    match result {
        Ok(_) => {
            println!("{}", "👋 Shutdown complete".green().bold());
            Ok(())
        }
        Err(e) => {
            println!("{} {}", "⚠️  Stopped:".red().bold(), e);
            Err(e)
        }
    }
}

async fn run_pool_command() -> MonitorResult<()> {
    let config = Config::from_env()?;
    let pair = config.pair()?;
    let provider = create_provider(config.http_rpc_url())?;
    let resolver = PoolResolver::new(AlloyFactoryClient::new(provider, config.factory_address()));

    println!(
        "{} {} ({} / {})",
        "🔎".cyan(),
        config.pair_label().bold(),
        pair.token0().to_checksum(None).dimmed(),
        pair.token1().to_checksum(None).dimmed()
    );

    let found = resolver.find_all(pair).await?;
    for tier in FeeTier::ALL {
        match found.iter().find(|(t, _)| *t == tier) {
            Some((_, pool)) => {
                println!("  {:>6}  {}", tier.to_string(), pool.to_checksum(None).green());
            }
            None => println!("  {:>6}  {}", tier.to_string(), "none".dimmed()),
        }
    }

    match choose_preferred(&found) {
        Some((tier, pool)) => {
            println!();
            println!(
                "{} {} ({})",
                "Preferred:".bold(),
                pool.to_checksum(None).yellow(),
                tier
            );
            println!("{}", format!("note: {PREFERENCE_NOTE}").dimmed());
            Ok(())
        }
        None => Err(crate::error::MonitorError::pool_not_found(
            pair.token0(),
            pair.token1(),
            FeeTier::ALL.iter().map(|t| t.fee()).collect(),
        )),
    }
}

fn run_topics_command() {
    let derived = SelectorSet::from_signatures();
    let configured = match Config::from_env() {
        Ok(config) => config.selectors(),
        Err(e) => {
            warn!(error = %e, "Configuration unavailable, showing signature-derived selectors only");
            derived
        }
    };

    for (kind, signature) in [
        (EventKind::Swap, SWAP_SIGNATURE),
        (EventKind::Mint, MINT_SIGNATURE),
        (EventKind::Burn, BURN_SIGNATURE),
    ] {
        let selector = configured.get(kind);
        let marker = if selector == derived.get(kind) {
            "✓".green()
        } else {
            "override".yellow()
        };
        println!("{:<5} {} {}", kind.to_string().bold(), selector, marker);
        println!("      {}", signature.dimmed());
    }
}

async fn print_events(mut rx: broadcast::Receiver<DecodedEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => println!("{}", format_event(&event)),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Display fell behind, events skipped on screen only");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// One colored display line for an event.
fn format_event(event: &DecodedEvent) -> String {
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    let body = match event {
        DecodedEvent::Swap(e) => format!(
            "{} amount0={} amount1={} tick={} liquidity={} sqrtPriceX96={}",
            "SWAP".magenta().bold(),
            colored_delta(&e.amount0.to_string()),
            colored_delta(&e.amount1.to_string()),
            e.tick.to_string().yellow(),
            e.liquidity,
            e.sqrt_price_x96,
        ),
        DecodedEvent::Mint(e) => format!(
            "{} owner={} ticks=[{}, {}] amount={} amount0={} amount1={}",
            "MINT".green().bold(),
            short(e.owner),
            e.tick_lower.to_string().yellow(),
            e.tick_upper.to_string().yellow(),
            e.amount,
            e.amount0,
            e.amount1,
        ),
        DecodedEvent::Burn(e) => format!(
            "{} owner={} ticks=[{}, {}] amount={} amount0={} amount1={}",
            "BURN".red().bold(),
            short(e.owner),
            e.tick_lower.to_string().yellow(),
            e.tick_upper.map_or_else(|| "-".to_string(), |t| t.to_string()).yellow(),
            e.amount,
            e.amount0,
            e.amount1,
        ),
    };
    format!("{} {}", timestamp.to_string().dimmed(), body)
}

fn colored_delta(value: &str) -> String {
    if value.starts_with('-') {
        value.red().to_string()
    } else {
        value.green().to_string()
    }
}

fn short(address: Address) -> String {
    let full = address.to_checksum(None);
    format!("{}…{}", &full[..6], &full[full.len() - 4..])
}

fn print_summary(stats: &SubscriptionStats) {
    println!();
    println!("{}", "📈 Run summary".cyan().bold());
    println!(
        "   events: {} (swap {}, mint {}, burn {})",
        stats.decoded().to_string().bold(),
        stats.swaps,
        stats.mints,
        stats.burns
    );
    println!(
        "   frames: {}  skipped: {}  rejected: {}  ignored: {}  removed: {}",
        stats.messages, stats.skipped, stats.rejected, stats.ignored, stats.removed
    );
    println!(
        "   connections: {}  reconnects: {}",
        stats.connections, stats.reconnects
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::events::BurnEvent;
    use alloy::primitives::{address, U256};

    #[test]
    fn test_cli_parsing() {
        for args in [
            vec!["v3-pool-stream", "watch"],
            vec!["v3-pool-stream", "pool"],
            vec!["v3-pool-stream", "topics"],
        ] {
            assert!(Cli::try_parse_from(args).is_ok());
        }
        assert!(Cli::try_parse_from(["v3-pool-stream", "price"]).is_err());
    }

    #[test]
    fn test_watch_flags() {
        let cli = Cli::try_parse_from([
            "v3-pool-stream",
            "watch",
            "--pool",
            "0x88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640",
            "--max-attempts",
            "3",
            "-o",
            "/tmp/x",
            "--quiet",
        ]);

        let Ok(Cli {
            command:
                Commands::Watch {
                    pool,
                    max_attempts,
                    output_dir,
                    quiet,
                },
        }) = cli
        else {
            panic!("watch should parse");
        };
        assert_eq!(pool, Some(address!("88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640")));
        assert_eq!(max_attempts, Some(3));
        assert_eq!(output_dir, Some(PathBuf::from("/tmp/x")));
        assert!(quiet);
    }

    #[test]
    fn test_watch_rejects_bad_pool() {
        assert!(Cli::try_parse_from(["v3-pool-stream", "watch", "--pool", "0x12"]).is_err());
    }

    #[test]
    fn test_format_truncated_burn() {
        let event = DecodedEvent::Burn(BurnEvent {
            pool: Address::ZERO,
            owner: address!("C36442b4a4522E871399CD717aBDD847Ab11FE88"),
            tick_lower: -60,
            tick_upper: None,
            amount: 1,
            amount0: U256::from(2u8),
            amount1: U256::from(3u8),
        });
        let line = format_event(&event);
        assert!(line.contains("BURN"));
        assert!(line.contains("0xC364"));
        assert!(line.contains("-60"));
    }

    #[test]
    fn test_short_address() {
        assert_eq!(
            short(address!("C36442b4a4522E871399CD717aBDD847Ab11FE88")),
            "0xC364…FE88"
        );
    }
}

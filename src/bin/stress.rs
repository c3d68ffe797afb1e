//! Queue storm load generator
//!
//! Registers a fleet of bots against a single coordinator, fires concurrent
//! submissions through the simulated executor, waits for the blotter to
//! drain, and then checks the coordination invariants: every submission got
//! a verdict, every accepted trade reached exactly one terminal outcome, and
//! no capacity slot or symbol lock leaked.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use rand::Rng;
use rust_decimal::Decimal;
use uuid::Uuid;

use baton::{
    AppConfig, BotKind, BotStatus, Coordinator, Side, SimulatedExecutor, SimulatorConfig,
    SubmitVerdict, TradeIntent, TradeOutcome,
};

#[derive(Parser)]
#[command(name = "baton-stress")]
#[command(about = "Concurrent load generator for the trade coordinator", long_about = None)]
struct Args {
    /// Number of bots submitting concurrently
    #[arg(long, default_value = "8")]
    bots: usize,

    /// Trades each bot submits
    #[arg(long, default_value = "50")]
    trades: usize,

    /// Dispatcher worker tasks
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Outstanding-trade capacity (queued + executing)
    #[arg(long, default_value = "64")]
    capacity: usize,

    /// Comma-separated trading pairs to spread intents across
    #[arg(long, default_value = "BTCUSDT,ETHUSDT,SOLUSDT,XRPUSDT")]
    symbols: String,

    /// Probability (0.0 to 1.0) that a simulated execution fails
    #[arg(long, default_value = "0.05")]
    failure_rate: f64,

    /// Upper bound on simulated venue latency in milliseconds
    #[arg(long, default_value = "30")]
    max_latency: u64,

    /// Seconds to wait for the queue to drain before giving up
    #[arg(long, default_value = "120")]
    drain_timeout: u64,

    /// Debug-level logging instead of the quiet default
    #[arg(short, long)]
    verbose: bool,

    /// Emit log lines as JSON instead of human-readable text
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let symbols: Arc<Vec<String>> = Arc::new(
        args.symbols
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    );
    if symbols.is_empty() {
        anyhow::bail!("--symbols must name at least one trading pair");
    }

    let total_submissions = args.bots * args.trades;
    let mut config = AppConfig::default();
    config.queue.capacity = args.capacity;
    // The invariant checks read back every record, so the retention window
    // has to hold the whole run.
    config.queue.history_capacity = total_submissions.max(config.queue.history_capacity);
    config.dispatcher.workers = args.workers;
    if args.verbose {
        config.logging.level = "debug".to_string();
    }
    config.logging.json = args.log_json;
    baton::logging::init(&config.logging);

    let executor = Arc::new(SimulatedExecutor::new(SimulatorConfig {
        min_latency_ms: 1,
        max_latency_ms: args.max_latency.max(1),
        failure_rate: args.failure_rate,
        fail_symbols: Vec::new(),
    }));

    let coordinator = Arc::new(Coordinator::new(config, executor)?);
    coordinator.start().await?;

    println!("\n╔══════════════════════════════════════════════╗");
    println!("║            Baton Queue Storm                 ║");
    println!("╚══════════════════════════════════════════════╝\n");
    println!(
        "  {} bots x {} trades over {} symbols, {} workers, capacity {}\n",
        args.bots,
        args.trades,
        symbols.len(),
        args.workers,
        args.capacity
    );

    let kinds = [BotKind::Grid, BotKind::Dca, BotKind::Macd, BotKind::AiGrid];
    let mut bot_ids = Vec::with_capacity(args.bots);
    for index in 0..args.bots {
        let handle = coordinator
            .register_bot(
                kinds[index % kinds.len()].clone(),
                &symbols[index % symbols.len()],
                Some("stress"),
                serde_json::json!({ "seed": index }),
            )
            .await?;
        coordinator
            .update_bot_status(&handle.id, BotStatus::Running, None)
            .await?;
        bot_ids.push(handle.id);
    }

    let started = Instant::now();
    let mut submitters = Vec::with_capacity(args.bots);
    for bot_id in bot_ids.iter().cloned() {
        let coordinator = coordinator.clone();
        let symbols = symbols.clone();
        let trades = args.trades;
        submitters.push(tokio::spawn(async move {
            let mut accepted: Vec<Uuid> = Vec::new();
            let mut rejected = 0u64;
            let mut errors = 0u64;
            for _ in 0..trades {
                // ThreadRng is not Send; draw everything before awaiting.
                let (symbol, side, quantity, price, priority, pause_ms) = {
                    let mut rng = rand::thread_rng();
                    let symbol = symbols[rng.gen_range(0..symbols.len())].clone();
                    let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
                    let quantity = Decimal::from(rng.gen_range(1u32..=5));
                    let price = if rng.gen_bool(0.5) {
                        Some(Decimal::from(rng.gen_range(100u32..=500)))
                    } else {
                        None
                    };
                    let priority = rng.gen_range(0..10i32);
                    let pause_ms = rng.gen_range(0u64..4);
                    (symbol, side, quantity, price, priority, pause_ms)
                };

                let mut intent =
                    TradeIntent::new(symbol, side, quantity, &bot_id).with_priority(priority);
                if let Some(price) = price {
                    intent = intent.with_price(price);
                }

                match coordinator.submit_trade(intent).await {
                    Ok(SubmitVerdict::Accepted { trade_id, .. }) => accepted.push(trade_id),
                    Ok(SubmitVerdict::Rejected { .. }) => rejected += 1,
                    Err(e) => {
                        eprintln!("  submit error from {}: {:#}", bot_id, e);
                        errors += 1;
                    }
                }
                tokio::time::sleep(Duration::from_millis(pause_ms)).await;
            }
            (accepted, rejected, errors)
        }));
    }

    let mut accepted_ids: Vec<Uuid> = Vec::new();
    let mut rejected_total = 0u64;
    let mut error_total = 0u64;
    for submitter in submitters {
        let (accepted, rejected, errors) = submitter.await?;
        accepted_ids.extend(accepted);
        rejected_total += rejected;
        error_total += errors;
    }
    let submit_elapsed = started.elapsed();

    // Wait for every outstanding trade to resolve.
    let deadline = Instant::now() + Duration::from_secs(args.drain_timeout);
    loop {
        let stats = coordinator.stats().await;
        if stats.outstanding == 0 && stats.queue_depth == 0 {
            break;
        }
        if Instant::now() > deadline {
            eprintln!("  drain timed out: {}", stats);
            anyhow::bail!(
                "queue failed to drain within {}s ({} outstanding)",
                args.drain_timeout,
                stats.outstanding
            );
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let total_elapsed = started.elapsed();

    let stats = coordinator.stats().await;
    let locked = coordinator.queue_status().await.locked_symbols;

    let mut executed = 0u64;
    let mut failed = 0u64;
    let mut cancelled = 0u64;
    let mut unresolved = 0u64;
    let mut missing = 0u64;
    for trade_id in &accepted_ids {
        match coordinator.record(*trade_id).await {
            Some(record) => match record.outcome {
                TradeOutcome::Executed => executed += 1,
                TradeOutcome::Failed => failed += 1,
                TradeOutcome::Cancelled => cancelled += 1,
                outcome if !outcome.is_terminal() => unresolved += 1,
                _ => {}
            },
            None => missing += 1,
        }
    }
    let terminal_total = executed + failed + cancelled;

    println!(
        "  submitted {} intents in {:.2}s ({:.0}/s), drained in {:.2}s\n",
        stats.submitted,
        submit_elapsed.as_secs_f64(),
        stats.submitted as f64 / submit_elapsed.as_secs_f64().max(0.001),
        total_elapsed.as_secs_f64()
    );
    println!("  accepted:             {}", stats.accepted);
    println!("  rejected duplicate:   {}", stats.rejected_duplicate);
    println!("  rejected conflict:    {}", stats.rejected_conflict);
    println!("  rejected overflow:    {}", stats.rejected_overflow);
    println!("  executed:             {}", executed);
    println!("  failed:               {}", failed);
    println!(
        "  lock timeouts:        {} ({} requeued)",
        stats.dispatch.lock_timeouts, stats.dispatch.requeues
    );
    println!("  execution timeouts:   {}", stats.dispatch.timed_out);
    println!("  stale lock evictions: {}", stats.evicted_locks);
    println!();

    let mut violations: Vec<&str> = Vec::new();
    let mut check = |ok: bool, label: &'static str| {
        if ok {
            println!("  \x1b[32m✓\x1b[0m {}", label);
        } else {
            println!("  \x1b[31m✗\x1b[0m {}", label);
            violations.push(label);
        }
    };

    check(error_total == 0, "no submission errors");
    check(
        stats.submitted == stats.accepted + rejected_total,
        "every submission was accepted or rejected",
    );
    check(
        stats.accepted == accepted_ids.len() as u64,
        "accepted counter matches the accepted verdicts",
    );
    check(
        terminal_total == accepted_ids.len() as u64 && unresolved == 0 && missing == 0,
        "every accepted trade reached exactly one terminal outcome",
    );
    check(stats.outstanding == 0, "no capacity slots leaked");
    check(stats.queue_depth == 0, "queue fully drained");
    check(locked.is_empty(), "all symbol locks released");

    coordinator.shutdown().await;

    if violations.is_empty() {
        println!("\n  \x1b[32mall invariants held\x1b[0m\n");
        Ok(())
    } else {
        anyhow::bail!("{} invariant check(s) failed", violations.len());
    }
}

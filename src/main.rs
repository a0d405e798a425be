//! CLI comparing sequential and parallel-assisted block processing.

use block_processing::{
    BlockProcessingOutcome, Executor, ParallelExecutor, SequentialExecutor, Workload,
    WorkloadConfig,
};
use clap::Parser;
use parallel_tx_executor::{EvmTransactionProcessor, ProcessorConfig};
use std::time::{Duration, Instant};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Compare sequential and parallel-assisted block processing")]
struct Args {
    /// Number of funded accounts.
    #[arg(long, default_value_t = 1000)]
    accounts: usize,

    /// Transactions per block.
    #[arg(long, default_value_t = 1000)]
    transactions: usize,

    /// Share of transactions calling the shared counter contract.
    #[arg(long, default_value_t = 0.2)]
    contract_calls: f64,

    /// Speculation worker threads.
    #[arg(long, default_value_t = 8)]
    threads: usize,

    /// Skip signature verification.
    #[arg(long)]
    no_verify: bool,

    /// Let speculation finish before reconciling.
    #[arg(long)]
    wait: bool,

    /// Run transactions through revm instead of the simple processor.
    #[arg(long)]
    evm: bool,

    /// Share of transactions that revert or run out of gas.
    #[arg(long, default_value_t = 0.0)]
    failures: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .init();
    let args = Args::parse();

    println!("=== Parallel Block Processing Benchmark ===\n");

    let configs = [
        ("No conflicts", 0.0),
        ("25% conflicts", 0.25),
        ("50% conflicts", 0.5),
        ("75% conflicts", 0.75),
        ("Full conflicts", 1.0),
    ];

    println!(
        "Configuration: {} accounts, {} transactions per block, {} threads, {} processor\n",
        args.accounts,
        args.transactions,
        args.threads,
        if args.evm { "revm" } else { "simple" }
    );

    let processor_config = ProcessorConfig {
        verify_signatures: !args.no_verify,
        ..Default::default()
    };
    let (sequential, parallel): (Box<dyn Executor>, Box<dyn Executor>) = if args.evm {
        let processor = EvmTransactionProcessor::new(processor_config);
        (
            Box::new(SequentialExecutor::with_processor(processor.clone())),
            Box::new(
                ParallelExecutor::with_processor(args.threads, processor)?
                    .with_wait_for_speculation(args.wait),
            ),
        )
    } else {
        (
            Box::new(SequentialExecutor::new(processor_config)),
            Box::new(
                ParallelExecutor::new(args.threads, processor_config)?
                    .with_wait_for_speculation(args.wait),
            ),
        )
    };

    for &(name, conflict_factor) in &configs {
        let workload = Workload::generate(WorkloadConfig {
            num_accounts: args.accounts,
            num_transactions: args.transactions,
            conflict_factor,
            contract_call_factor: args.contract_calls,
            failure_factor: args.failures,
            seed: args.seed,
            chain_id: 1,
        });

        let (sequential_outcome, sequential_time) = run(sequential.as_ref(), &workload)?;
        let (parallel_outcome, parallel_time) = run(parallel.as_ref(), &workload)?;

        let matches = sequential_outcome.state == parallel_outcome.state
            && sequential_outcome.receipts == parallel_outcome.receipts;
        println!(
            "{:16} | {:10} {:8.0} tx/s | {:10} {:8.0} tx/s | hit rate {:5.1}% | states match: {}",
            name,
            sequential.name(),
            throughput(args.transactions, sequential_time),
            parallel.name(),
            throughput(args.transactions, parallel_time),
            parallel_outcome.result.parallel_hit_rate() * 100.0,
            matches
        );
    }

    Ok(())
}

fn run(
    executor: &dyn Executor,
    workload: &Workload,
) -> Result<(BlockProcessingOutcome, Duration), Box<dyn std::error::Error>> {
    let archive = workload.archive();
    let block = workload.block();
    let start = Instant::now();
    let outcome = executor.execute(&archive, &block)?;
    Ok((outcome, start.elapsed()))
}

fn throughput(transactions: usize, elapsed: Duration) -> f64 {
    transactions as f64 / elapsed.as_secs_f64()
}

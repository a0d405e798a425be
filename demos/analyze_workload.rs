use block_processing::{Executor, ParallelExecutor, Workload, WorkloadConfig};
use parallel_tx_executor::ProcessorConfig;
use std::collections::HashMap;

fn main() {
    let config = WorkloadConfig {
        num_accounts: 50_000,
        num_transactions: 10_000,
        conflict_factor: 0.0,
        contract_call_factor: 0.1,
        failure_factor: 0.05,
        seed: 42,
        chain_id: 1,
    };

    let workload = Workload::generate(config);

    let mut sender_counts: HashMap<_, usize> = HashMap::new();
    for tx in &workload.transactions {
        *sender_counts.entry(tx.sender()).or_insert(0) += 1;
    }

    let multi_tx_accounts: Vec<_> = sender_counts
        .iter()
        .filter(|(_, &count)| count > 1)
        .collect();
    let contract_calls = workload
        .transactions
        .iter()
        .filter(|tx| tx.to() == Some(workload.contract))
        .count();
    let reverting_calls = workload
        .transactions
        .iter()
        .filter(|tx| tx.to() == Some(workload.reverter))
        .count();

    println!("Total accounts that sent txs: {}", sender_counts.len());
    println!("Accounts that sent >1 tx: {}", multi_tx_accounts.len());
    println!(
        "Max txs from one account: {}",
        sender_counts.values().max().copied().unwrap_or_default()
    );
    println!("Counter contract calls: {}", contract_calls);
    println!("Reverting contract calls: {}", reverting_calls);

    let mut hist = HashMap::new();
    for count in sender_counts.values() {
        *hist.entry(*count).or_insert(0) += 1;
    }

    println!("\nTransaction count distribution:");
    let mut hist_vec: Vec<_> = hist.iter().collect();
    hist_vec.sort_by_key(|(k, _)| *k);
    for (count, num_accounts) in hist_vec {
        println!("  {} tx: {} accounts", count, num_accounts);
    }

    // Upper bound on what speculation can deliver for this workload.
    let executor = ParallelExecutor::new(8, ProcessorConfig::default())
        .expect("thread pool")
        .with_wait_for_speculation(true);
    let outcome = executor
        .execute(&workload.archive(), &workload.block())
        .expect("block is valid");
    println!(
        "\nSpeculation hit rate: {:.1}% ({} merged, {} replayed, {} failed)",
        outcome.result.parallel_hit_rate() * 100.0,
        outcome.result.parallelized,
        outcome.result.replayed,
        outcome.result.failed
    );
}

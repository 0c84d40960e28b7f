use std::collections::BTreeMap;
use std::env;
use std::process;

use common::config::load_config;
use common::metrics::CycleResult;
use control_core::{run_experiment, ExperimentReport};
use tracing::error;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "configs/demo.toml";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let config_path = args.get(1).map(String::as_str).unwrap_or(DEFAULT_CONFIG);
    let csv_path = args.get(2);

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load {}: {}", config_path, e);
            process::exit(1);
        }
    };

    println!("===========================================");
    println!("Periodic Control Loop Demo");
    println!("===========================================");
    println!(
        "Experiment: {} ({} sensors, {} actuators, {} loops, {} ms)",
        config.experiment_name,
        config.sensors.len(),
        config.actuators.len(),
        config.loops.len(),
        config.duration_ms
    );

    let report = match run_experiment(&config) {
        Ok(report) => report,
        Err(e) => {
            error!("experiment {} failed: {}", config.experiment_name, e);
            process::exit(1);
        }
    };

    display_report(&report);

    if let Some(path) = csv_path {
        match report.cycles.save_to_csv(path) {
            Ok(rows) => println!("\n{} cycle records saved to {}", rows, path),
            Err(e) => error!("failed to write {}: {}", path, e),
        }
    }
}

fn display_report(report: &ExperimentReport) {
    println!("\n=== Experiment Results ===");
    println!("Elapsed: {:.2}s", report.elapsed.as_secs_f64());
    println!("Completed ticks: {}", report.completed_ticks);
    println!(
        "Tick failures: {} ({} dropped from the queue)",
        report.failure_count, report.dropped_failures
    );

    if !report.actuators.is_empty() {
        println!("Actuators:");
        for actuator in &report.actuators {
            match actuator.last_signal {
                Some(signal) => println!(
                    "- {}: {} adjustments, last signal {:.3}",
                    actuator.id, actuator.adjustments, signal
                ),
                None => println!("- {}: never adjusted", actuator.id),
            }
        }
    }

    display_cycles(&report.cycles.results());

    if !report.failures.is_empty() {
        println!("Most recent failures:");
        for failure in report.failures.iter().rev().take(5) {
            println!("- {}", failure);
        }
    }
}

fn display_cycles(results: &[CycleResult]) {
    if results.is_empty() {
        return;
    }

    let mut per_owner: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for result in results {
        let entry = per_owner.entry(result.owner.as_str()).or_insert((0, 0));
        entry.0 += 1;
        if !result.deadline_met {
            entry.1 += 1;
        }
    }

    println!("Deadline compliance:");
    for (owner, (total, missed)) in per_owner {
        let compliance = (total - missed) as f64 / total as f64 * 100.0;
        println!("- {}: {:.1}% ({} cycles, {} missed)", owner, compliance, total, missed);
    }
}

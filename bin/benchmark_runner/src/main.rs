use std::collections::BTreeMap;
use std::env;
use std::process;
use std::time::Duration;

use common::config::{load_config, ExperimentConfig};
use common::metrics::CycleResult;
use control_core::run_experiment;
use criterion::{black_box, Criterion};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn analyze_owner(owner: &str, results: &[&CycleResult]) {
    let total = results.len();
    let missed = results.iter().filter(|r| !r.deadline_met).count();
    let failed = results.iter().filter(|r| !r.completed).count();
    let compliance = (1.0 - missed as f64 / total as f64) * 100.0;

    let processing: Vec<f64> = results
        .iter()
        .map(|r| r.processing_time_ns as f64 / 1000.0)
        .collect();
    let avg_proc = processing.iter().sum::<f64>() / processing.len() as f64;
    let min_proc = processing.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max_proc = processing.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

    let max_lateness = results.iter().map(|r| r.lateness_ns).max().unwrap_or(0);
    let late = results.iter().filter(|r| r.lateness_ns > 0).count();

    println!("\n--- {} ---", owner);
    println!(
        "Cycles: {} ({} failed), deadline compliance {:.2}% ({} missed)",
        total, failed, compliance, missed
    );
    println!(
        "Processing time (μs): avg={:.2}, min={:.2}, max={:.2}",
        avg_proc, min_proc, max_proc
    );
    println!(
        "Max lateness: {} ns, late cycles: {} ({:.2}%)",
        max_lateness,
        late,
        late as f64 / total as f64 * 100.0
    );
}

fn analyze_results(results: &[CycleResult]) {
    if results.is_empty() {
        println!("No cycle records. Set record_cycles = true in the experiment file.");
        return;
    }

    let mut by_owner: BTreeMap<&str, Vec<&CycleResult>> = BTreeMap::new();
    for result in results {
        by_owner.entry(result.owner.as_str()).or_default().push(result);
    }

    println!("\n=== Per-owner Analysis ===");
    for (owner, owned) in &by_owner {
        analyze_owner(owner, owned);
    }
}

fn benchmark_experiment(c: &mut Criterion, config: &ExperimentConfig) {
    c.bench_function(&config.experiment_name, |b| {
        b.iter(|| match run_experiment(black_box(config)) {
            Ok(report) => {
                black_box(report.completed_ticks);
            }
            Err(e) => error!("benchmark iteration failed: {}", e),
        });
    });
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: benchmark_runner <config_file> [output.csv] [--criterion]");
        eprintln!("Example: benchmark_runner configs/demo.toml cycles.csv");
        eprintln!("Example: benchmark_runner configs/demo.toml --criterion");
        process::exit(1);
    }

    let config_path = &args[1];
    let use_criterion = args.iter().any(|a| a == "--criterion");
    let csv_path = args
        .iter()
        .skip(2)
        .find(|a| !a.starts_with("--"))
        .map(String::as_str)
        .unwrap_or("cycle_results.csv");

    let mut config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load {}: {}", config_path, e);
            process::exit(1);
        }
    };

    println!("========================================");
    println!("Periodic Control Loop Benchmark");
    println!("========================================");
    println!("Config: {}", config_path);
    println!("Experiment: {}", config.experiment_name);
    println!("Duration: {} ms", config.duration_ms);
    println!(
        "Sensors: {}, loops: {}",
        config.sensors.len(),
        config.loops.len()
    );
    println!("========================================\n");

    if use_criterion {
        // Per-tick recording would dominate the measured time.
        config.record_cycles = false;
        let mut criterion = Criterion::default()
            .sample_size(10)
            .measurement_time(Duration::from_millis(config.duration_ms * 12));
        benchmark_experiment(&mut criterion, &config);
        println!("\nCriterion reports are under target/criterion.");
        return;
    }

    config.record_cycles = true;
    let report = match run_experiment(&config) {
        Ok(report) => report,
        Err(e) => {
            error!("experiment {} failed: {}", config.experiment_name, e);
            process::exit(1);
        }
    };

    println!(
        "Experiment completed in {:.2} seconds",
        report.elapsed.as_secs_f64()
    );
    println!(
        "Completed ticks: {}, tick failures: {}",
        report.completed_ticks, report.failure_count
    );
    let results = report.cycles.results();
    analyze_results(&results);

    match report.cycles.save_to_csv(csv_path) {
        Ok(rows) => println!("\n{} records saved to {}", rows, csv_path),
        Err(e) => error!("failed to write {}: {}", csv_path, e),
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use rand::Rng;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use trace_loadgen::runner;
use trace_loadgen::tracer::{TraceClient, TracerConfig};
use trace_loadgen::workload::{EventKind, Workload};

/// Generates synthetic trace traffic (transactions, spans, errors) against a
/// tracing-ingestion endpoint and reports how much of it the backend
/// accepted versus dropped.
#[derive(Debug, Parser)]
#[command(name = "trace-loadgen", version)]
struct Cli {
    /// Stop the run after this duration; zero disables the timeout
    #[arg(long = "run", default_value = "30s")]
    run_timeout: humantime::Duration,

    /// Wait timeout for the final flush
    #[arg(long = "flush", default_value = "10s")]
    flush_timeout: humantime::Duration,

    /// Random seed for the generators' structural draws
    #[arg(long)]
    seed: Option<u64>,

    /// Intake secret token
    #[arg(long, env = "APM_SECRET_TOKEN", default_value = "", hide_env_values = true)]
    secret: String,

    /// Intake server URL
    #[arg(long, env = "APM_SERVER_URL", default_value = "http://localhost:8200")]
    url: String,

    /// Max errors to generate
    #[arg(short = 'e', long = "errors", default_value_t = usize::MAX)]
    error_limit: usize,

    /// Error frequency: generate errors up to once in this duration
    #[arg(long = "error-frequency", default_value = "1ns")]
    error_frequency: humantime::Duration,

    /// Max error frames per error
    #[arg(long = "error-frames-max", default_value_t = 10)]
    error_frames_max: usize,

    /// Min error frames per error
    #[arg(long = "error-frames-min", default_value_t = 1)]
    error_frames_min: usize,

    /// Max transactions to generate
    #[arg(short = 't', long = "transactions", default_value_t = usize::MAX)]
    transaction_limit: usize,

    /// Transaction frequency: generate transactions up to once in this duration
    #[arg(long = "transaction-frequency", default_value = "1ns")]
    transaction_frequency: humantime::Duration,

    /// Max spans per transaction
    #[arg(long = "spans-max", default_value_t = 10)]
    span_max: usize,

    /// Min spans per transaction
    #[arg(long = "spans-min", default_value_t = 1)]
    span_min: usize,

    /// Read additional workloads from a CSV file (kind, limit, period, max, min)
    #[arg(long)]
    file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    // Inverted structural bounds are clamped, not rejected.
    let span_max = cli.span_max.max(cli.span_min);
    let error_frames_max = cli.error_frames_max.max(cli.error_frames_min);

    let mut workloads = vec![
        Workload {
            kind: EventKind::Transaction,
            limit: cli.transaction_limit,
            period: *cli.transaction_frequency,
            max_structs: span_max,
            min_structs: cli.span_min,
        },
        Workload {
            kind: EventKind::Error,
            limit: cli.error_limit,
            period: *cli.error_frequency,
            max_structs: error_frames_max,
            min_structs: cli.error_frames_min,
        },
    ];
    if let Some(path) = &cli.file {
        let (more, file_error) = parse_file(path);
        if let Some(e) = file_error {
            error!("workload file: {e:#}");
        }
        workloads.extend(more);
    }

    let seed = cli.seed.unwrap_or_else(|| rand::rng().random());

    let (service, client) = TraceClient::new(TracerConfig {
        server_url: cli.url.clone(),
        secret_token: cli.secret.clone(),
        flush_timeout: *cli.flush_timeout,
        ..TracerConfig::default()
    })
    .context("failed to create trace client")?;
    tokio::spawn(service.run());

    debug!("start");
    let (report, run_error) = runner::run(&client, *cli.run_timeout, seed, &workloads).await;
    if let Some(e) = run_error {
        error!("{e}");
    }
    debug!(
        "{:?} elapsed since event generation completed",
        report.stop.elapsed()
    );

    let stats = report.stats;
    let elapsed = (report.end - report.start).as_secs_f64();
    let sent = stats.transactions_sent + stats.spans_sent + stats.errors_sent;
    let dropped = stats.transactions_dropped + stats.spans_dropped + stats.errors_dropped;
    info!("sent {sent} events in {elapsed:.1} seconds ({dropped} dropped)");
    info!(
        "    transactions (sent / dropped) : {} / {} [{:.2}%]",
        stats.transactions_sent,
        stats.transactions_dropped,
        percent_sent(stats.transactions_sent, stats.transactions_dropped)
    );
    info!(
        "    spans (sent / dropped)        : {} / {} [{:.2}%]",
        stats.spans_sent,
        stats.spans_dropped,
        percent_sent(stats.spans_sent, stats.spans_dropped)
    );
    info!(
        "    errors (sent / dropped)       : {} / {} [{:.2}%]",
        stats.errors_sent,
        stats.errors_dropped,
        percent_sent(stats.errors_sent, stats.errors_dropped)
    );
    info!("{} request errors", stats.send_errors);

    let transport_stats = client.close().await;
    if transport_stats.accepted > 0.0 {
        info!("server accepted {:.0} events", transport_stats.accepted);
    }
    for message in &transport_stats.top_errors {
        info!("server error: {message}");
    }
    debug!("finish");
    Ok(())
}

fn percent_sent(sent: u64, dropped: u64) -> f64 {
    let total = sent + dropped;
    if total == 0 {
        return 100.0;
    }
    sent as f64 * 100.0 / total as f64
}

fn init_logging() -> anyhow::Result<()> {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = format!("hyper=off,reqwest=off,{log_level}");
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).context("could not parse log level in configuration")?,
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;
    Ok(())
}

/// Reads workload rows until the first malformed one. Rows validated before
/// the failure are kept; the failure itself is reported to the caller.
fn parse_file(path: &Path) -> (Vec<Workload>, Option<anyhow::Error>) {
    let mut workloads = Vec::new();
    let mut reader = match csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)
    {
        Ok(reader) => reader,
        Err(e) => return (workloads, Some(e.into())),
    };
    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(e) => return (workloads, Some(e.into())),
        };
        let fields: Vec<&str> = record.iter().collect();
        match Workload::from_row(&fields) {
            Ok(workload) => workloads.push(workload),
            Err(e) => return (workloads, Some(e.into())),
        }
    }
    (workloads, None)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_parse_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1,100,10ms,10,1").unwrap();
        writeln!(file, "0,50,1s,4,2").unwrap();
        file.flush().unwrap();

        let (workloads, error) = parse_file(file.path());
        assert!(error.is_none());
        assert_eq!(workloads.len(), 2);
        assert_eq!(workloads[0].kind, EventKind::Error);
        assert_eq!(workloads[0].limit, 100);
        assert_eq!(workloads[1].kind, EventKind::Transaction);
        assert_eq!(workloads[1].period, Duration::from_secs(1));
    }

    #[test]
    fn test_parse_file_keeps_rows_before_the_malformed_one() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1,100,10ms,10,1").unwrap();
        writeln!(file, "9,100,10ms,10,1").unwrap();
        writeln!(file, "0,50,1s,4,2").unwrap();
        file.flush().unwrap();

        let (workloads, error) = parse_file(file.path());
        assert!(error.is_some());
        assert_eq!(workloads.len(), 1);
        assert_eq!(workloads[0].kind, EventKind::Error);
    }

    #[test]
    fn test_parse_file_missing_file() {
        let (workloads, error) = parse_file(Path::new("/does/not/exist.csv"));
        assert!(workloads.is_empty());
        assert!(error.is_some());
    }

    #[test]
    fn test_percent_sent() {
        assert_eq!(percent_sent(3, 1), 75.0);
        assert_eq!(percent_sent(0, 0), 100.0);
        assert_eq!(percent_sent(0, 5), 0.0);
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Run coordination.
//!
//! A run races one generator task per non-empty workload against a timeout
//! watchdog and an interrupt watchdog. The first participant to return,
//! success or failure alike, cancels the rest and its result becomes the
//! aggregate outcome. Timeout expiry is a graceful terminator; an interrupt
//! is an error. Either way the trace client is flushed after every
//! participant has unwound, so the reported statistics are final.

use std::future::Future;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Error;
use crate::generator::{generate_errors, generate_transactions};
use crate::tracer::{TraceClient, TracerStats};
use crate::workload::{EventKind, Workload};

/// Outcome of one run. `start <= stop <= end`: `stop` marks generation
/// complete, `end` marks flush complete. Returned even when the run ended
/// with an error; partial statistics are still meaningful.
#[derive(Debug, Clone, Copy)]
pub struct Report {
    pub stats: TracerStats,
    pub start: Instant,
    pub stop: Instant,
    pub end: Instant,
}

/// Drives all non-empty workloads to completion, cancellation by timeout
/// (when `run_timeout` is non-zero), or interrupt (ctrl-c). `seed` makes the
/// generators' structural draws reproducible.
pub async fn run(
    client: &TraceClient,
    run_timeout: Duration,
    seed: u64,
    workloads: &[Workload],
) -> (Report, Option<Error>) {
    run_with_interrupt(client, run_timeout, seed, workloads, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

/// Like [`run`], with the interrupt source supplied explicitly. Completion of
/// `interrupt` is converted into [`Error::Interrupted`]; it never terminates
/// the run gracefully.
pub async fn run_with_interrupt<F>(
    client: &TraceClient,
    run_timeout: Duration,
    seed: u64,
    workloads: &[Workload],
    interrupt: F,
) -> (Report, Option<Error>)
where
    F: Future<Output = ()> + Send + 'static,
{
    let start = Instant::now();
    let cancel = CancellationToken::new();
    let mut participants: JoinSet<Result<(), Error>> = JoinSet::new();

    for (i, workload) in workloads
        .iter()
        .copied()
        .filter(|w| !w.is_empty())
        .enumerate()
    {
        let client = client.clone();
        let token = cancel.clone();
        let rng = SmallRng::seed_from_u64(seed.wrapping_add(i as u64));
        match workload.kind {
            EventKind::Transaction => {
                participants.spawn(generate_transactions(client, workload, rng, token));
            }
            EventKind::Error => {
                participants.spawn(generate_errors(client, workload, rng, token));
            }
        }
    }
    if run_timeout > Duration::ZERO {
        participants.spawn(timeout_watchdog(run_timeout, cancel.clone()));
    }
    participants.spawn(interrupt_watchdog(interrupt, cancel.clone()));

    // The first participant to finish decides the run's outcome.
    let error = match participants.join_next().await {
        Some(Ok(Ok(()))) => None,
        Some(Ok(Err(e))) => Some(e),
        Some(Err(e)) => Some(Error::Task(e)),
        None => None,
    };
    cancel.cancel();
    while participants.join_next().await.is_some() {}
    let stop = Instant::now();

    if !client.flush().await {
        warn!("flush timed out; statistics may undercount delivered events");
    }
    let end = Instant::now();
    debug!("run complete in {:?}", end - start);

    let report = Report {
        stats: client.stats(),
        start,
        stop,
        end,
    };
    (report, error)
}

/// Expiry is a graceful way for a run to end, not a failure.
async fn timeout_watchdog(deadline: Duration, cancel: CancellationToken) -> Result<(), Error> {
    tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        _ = tokio::time::sleep(deadline) => Ok(()),
    }
}

async fn interrupt_watchdog<F>(interrupt: F, cancel: CancellationToken) -> Result<(), Error>
where
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        () = interrupt => Err(Error::Interrupted),
    }
}

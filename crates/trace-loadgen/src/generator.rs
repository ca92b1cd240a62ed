// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Rate-throttled synthetic event generators.
//!
//! Both generators share one shape: consume at most `limit` pulses, emit one
//! unit of work per pulse, and stop at the next pulse boundary once
//! cancellation is observed. An emit already in progress always completes;
//! a transaction finishes its span barrier before the stop check runs again.

use rand::rngs::SmallRng;
use rand::Rng;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::throttle::Throttle;
use crate::tracer::{ErrorData, Exception, Frame, TraceClient};
use crate::workload::Workload;

/// Emits up to `workload.limit` transactions, each carrying a uniformly drawn
/// number of concurrently generated spans in `[min_structs, max_structs]`.
///
/// The generator blocks until every span of the current transaction has
/// ended before tagging the transaction with the chosen span count and
/// ending it, so the tag always matches what was actually generated and no
/// span is attributed to a sibling transaction.
pub async fn generate_transactions(
    client: TraceClient,
    workload: Workload,
    mut rng: SmallRng,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let mut throttle = Throttle::new(workload.period);
    let mut sent = 0;
    while sent < workload.limit {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            _ = throttle.pulse() => {}
        }

        let mut tx = client.begin_transaction("generated", "gen");
        let span_count = rng.random_range(workload.min_structs..=workload.max_structs);
        let mut spans = JoinSet::new();
        for _ in 0..span_count {
            let client = client.clone();
            let ctx = tx.context();
            spans.spawn(async move {
                client.start_span(&ctx, "I'm a span", "gen.era.ted").end();
            });
        }
        // Barrier: every span of this transaction ends before the
        // transaction does.
        while spans.join_next().await.is_some() {}
        tx.set_tag("spans", &span_count.to_string());
        tx.end();
        sent += 1;
    }
    Ok(())
}

/// Emits up to `workload.limit` synthetic errors, each with a fabricated
/// stack trace of a uniformly drawn length in `[min_structs, max_structs]`.
/// Recording is fire-and-forget; delivery is governed by the trace client's
/// buffering.
pub async fn generate_errors(
    client: TraceClient,
    workload: Workload,
    mut rng: SmallRng,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let mut throttle = Throttle::new(workload.period);
    let mut sent = 0;
    while sent < workload.limit {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            _ = throttle.pulse() => {}
        }

        let frames = rng.random_range(workload.min_structs..=workload.max_structs);
        client.record_error(synthetic_error(frames));
        sent += 1;
    }
    Ok(())
}

/// A fabricated error whose stack trace has exactly `frames` entries, each
/// with a strictly increasing line marker.
fn synthetic_error(frames: usize) -> ErrorData {
    let plural = if frames == 1 { "" } else { "s" };
    ErrorData {
        id: format!("{:016x}", rand::random::<u64>()),
        culprit: "oops".to_string(),
        exception: Exception {
            message: format!("Generated error with {frames} stacktrace frame{plural}"),
            stacktrace: (0..frames)
                .map(|i| Frame {
                    filename: "fake.rs".to_string(),
                    function: "oops".to_string(),
                    lineno: 100 + i as u64,
                })
                .collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::SeedableRng;

    use super::*;
    use crate::tracer::TracerConfig;
    use crate::workload::EventKind;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(7)
    }

    fn workload(kind: EventKind, limit: usize) -> Workload {
        Workload {
            kind,
            limit,
            // Long enough that consuming even one pulse would hang the test.
            period: Duration::from_secs(3600),
            max_structs: 1,
            min_structs: 1,
        }
    }

    #[tokio::test]
    async fn test_zero_limit_returns_without_consuming_a_pulse() {
        let (_service, client) = TraceClient::new(TracerConfig::default()).unwrap();
        let cancel = CancellationToken::new();

        tokio::time::timeout(
            Duration::from_millis(100),
            generate_errors(
                client.clone(),
                workload(EventKind::Error, 0),
                rng(),
                cancel.clone(),
            ),
        )
        .await
        .expect("generator should return immediately")
        .unwrap();

        tokio::time::timeout(
            Duration::from_millis(100),
            generate_transactions(client.clone(), workload(EventKind::Transaction, 0), rng(), cancel),
        )
        .await
        .expect("generator should return immediately")
        .unwrap();

        let stats = client.stats();
        assert_eq!(stats, Default::default());
    }

    #[tokio::test]
    async fn test_cancellation_observed_at_pulse_boundary() {
        let (_service, client) = TraceClient::new(TracerConfig::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(
            Duration::from_millis(100),
            generate_errors(client, workload(EventKind::Error, usize::MAX), rng(), cancel),
        )
        .await
        .expect("cancelled generator should return without a pulse")
        .unwrap();
    }

    #[test]
    fn test_synthetic_error_frames() {
        let error = synthetic_error(3);
        assert_eq!(error.exception.message, "Generated error with 3 stacktrace frames");
        assert_eq!(error.exception.stacktrace.len(), 3);
        let lines: Vec<u64> = error.exception.stacktrace.iter().map(|f| f.lineno).collect();
        assert_eq!(lines, vec![100, 101, 102]);

        let single = synthetic_error(1);
        assert_eq!(single.exception.message, "Generated error with 1 stacktrace frame");
        assert_eq!(single.exception.stacktrace.len(), 1);
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Instrumented HTTP transport for the trace client.
//!
//! Every request bound for a recognized ingestion path is tagged to request a
//! verbose acknowledgment, and its response body is harvested into a single
//! background aggregation task that recovers the server-reported accepted
//! count and error messages. The caller still receives a byte-identical
//! response; requests to any other path pass through untouched.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::util;

pub const INTAKE_EVENTS_PATH: &str = "/intake/v2/events";
pub const INTAKE_RUM_EVENTS_PATH: &str = "/intake/v2/rum/events";

/// Statistics recovered from verbose intake acknowledgments.
///
/// Mutated only by the aggregation task; a snapshot taken after
/// [`InterceptedTransport::close`] reflects every harvested response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportStats {
    /// Running total of the server-reported `accepted` counts.
    pub accepted: f64,
    /// Distinct server-reported error messages, in first-seen order.
    pub top_errors: Vec<String>,
}

enum HarvestCommand {
    Body(Bytes),
    Shutdown,
}

struct Shared {
    stats: Mutex<TransportStats>,
    /// Responses harvested but not yet absorbed by the aggregation task.
    /// Incremented before a body is queued, decremented after it is
    /// processed; close waits for zero before releasing the channel.
    outstanding: AtomicUsize,
    idle: Notify,
}

/// Wraps a [`reqwest::Client`] and harvests ingestion-endpoint responses.
pub struct InterceptedTransport {
    client: reqwest::Client,
    harvest_tx: mpsc::UnboundedSender<HarvestCommand>,
    shared: Arc<Shared>,
    aggregation: Mutex<Option<JoinHandle<()>>>,
}

impl InterceptedTransport {
    /// Must be called from within a tokio runtime: spawns the aggregation
    /// task that owns all mutation of the statistics.
    pub fn new(client: reqwest::Client) -> InterceptedTransport {
        let (harvest_tx, harvest_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            stats: Mutex::new(TransportStats::default()),
            outstanding: AtomicUsize::new(0),
            idle: Notify::new(),
        });
        let aggregation = tokio::spawn(Self::aggregate(harvest_rx, Arc::clone(&shared)));
        InterceptedTransport {
            client,
            harvest_tx,
            shared,
            aggregation: Mutex::new(Some(aggregation)),
        }
    }

    /// Executes `request`, harvesting the response body when the request
    /// targets an ingestion path. Transport-level failures propagate
    /// unchanged; retry policy belongs to the caller.
    pub async fn send(&self, mut request: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        if !is_intake_path(request.url().path()) {
            return self.client.execute(request).await;
        }

        let mut url = request.url().clone();
        url.query_pairs_mut().append_pair("verbose", "");
        *request.url_mut() = url;

        let response = self.client.execute(request).await?;
        let status = response.status();
        let version = response.version();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        if !body.is_empty() {
            self.shared.outstanding.fetch_add(1, Ordering::AcqRel);
            if self.harvest_tx.send(HarvestCommand::Body(body.clone())).is_err() {
                // Aggregation already shut down; roll the counter back.
                if self.shared.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
                    self.shared.idle.notify_waiters();
                }
            }
        }

        let mut rebuilt = http::Response::new(body);
        *rebuilt.status_mut() = status;
        *rebuilt.version_mut() = version;
        *rebuilt.headers_mut() = headers;
        Ok(reqwest::Response::from(rebuilt))
    }

    pub fn stats(&self) -> TransportStats {
        #[allow(clippy::expect_used)]
        let stats = self.shared.stats.lock().expect("lock poisoned");
        stats.clone()
    }

    /// Waits until every harvested response has been absorbed, then shuts the
    /// aggregation task down. The wait-then-close ordering guarantees a close
    /// racing with in-flight harvesting never drops a response.
    pub async fn close(&self) {
        loop {
            // Register for the idle wakeup before checking the counter, so a
            // decrement landing in between cannot be missed.
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.outstanding.load(Ordering::Acquire) == 0 {
                break;
            }
            notified.await;
        }
        let _ = self.harvest_tx.send(HarvestCommand::Shutdown);
        let handle = {
            #[allow(clippy::expect_used)]
            let mut guard = self.aggregation.lock().expect("lock poisoned");
            guard.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn aggregate(mut rx: mpsc::UnboundedReceiver<HarvestCommand>, shared: Arc<Shared>) {
        debug!("response aggregation task started");
        while let Some(command) = rx.recv().await {
            match command {
                HarvestCommand::Body(body) => {
                    Self::absorb(&shared.stats, &body);
                    if shared.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
                        shared.idle.notify_waiters();
                    }
                }
                HarvestCommand::Shutdown => break,
            }
        }
        debug!("response aggregation task stopped");
    }

    /// Folds one acknowledgment body into the statistics. The response shape
    /// is not contractually guaranteed: unparsable bodies are skipped, absent
    /// fields read as zero/empty.
    fn absorb(stats: &Mutex<TransportStats>, body: &[u8]) {
        let doc: serde_json::Value = match serde_json::from_slice(body) {
            Ok(doc) => doc,
            Err(e) => {
                debug!("skipping unparsable intake acknowledgment: {e}");
                return;
            }
        };
        #[allow(clippy::expect_used)]
        let mut stats = stats.lock().expect("lock poisoned");
        stats.accepted += util::as_f64(&doc, "accepted");
        for entry in util::as_array(&doc, "errors") {
            let message = util::as_str(entry, "message");
            if !stats.top_errors.iter().any(|m| m == message) {
                stats.top_errors.push(message.to_string());
            }
        }
    }
}

fn is_intake_path(path: &str) -> bool {
    matches!(path, INTAKE_EVENTS_PATH | INTAKE_RUM_EVENTS_PATH)
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use reqwest::Method;

    use super::*;

    fn absorb_all(stats: &Mutex<TransportStats>, bodies: &[&str]) {
        for body in bodies {
            InterceptedTransport::absorb(stats, body.as_bytes());
        }
    }

    #[test]
    fn test_absorb_accumulates_and_dedups() {
        let stats = Mutex::new(TransportStats::default());
        absorb_all(
            &stats,
            &[
                r#"{"accepted": 3, "errors": [{"message": "queue is full"}]}"#,
                r#"{"accepted": 2, "errors": [{"message": "queue is full"}, {"message": "invalid event"}]}"#,
                r#"{"accepted": 1}"#,
            ],
        );
        let stats = stats.lock().unwrap();
        assert_eq!(stats.accepted, 6.0);
        assert_eq!(stats.top_errors, vec!["queue is full", "invalid event"]);
    }

    #[test]
    fn test_absorb_skips_unparsable_bodies() {
        let stats = Mutex::new(TransportStats::default());
        absorb_all(&stats, &["not json", r#"{"accepted": 4}"#, ""]);
        assert_eq!(stats.lock().unwrap().accepted, 4.0);
    }

    #[test]
    fn test_absorb_tolerates_unexpected_shapes() {
        let stats = Mutex::new(TransportStats::default());
        absorb_all(
            &stats,
            &[r#"{"accepted": "nope", "errors": [{"code": 7}], "extra": true}"#],
        );
        let stats = stats.lock().unwrap();
        assert_eq!(stats.accepted, 0.0);
        assert_eq!(stats.top_errors, vec![""]);
    }

    fn intake_request(base: &str) -> reqwest::Request {
        let url = format!("{base}{INTAKE_EVENTS_PATH}").parse().unwrap();
        reqwest::Request::new(Method::POST, url)
    }

    #[tokio::test]
    async fn test_intake_requests_ask_for_verbose_acknowledgment() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", INTAKE_EVENTS_PATH)
            .match_query(Matcher::UrlEncoded("verbose".into(), "".into()))
            .with_status(202)
            .with_body(r#"{"accepted": 2}"#)
            .create_async()
            .await;

        let transport = InterceptedTransport::new(reqwest::Client::new());
        let response = transport.send(intake_request(&server.url())).await.unwrap();
        assert_eq!(response.status(), 202);

        transport.close().await;
        mock.assert_async().await;
        assert_eq!(transport.stats().accepted, 2.0);
    }

    #[tokio::test]
    async fn test_response_is_reconstructed_for_the_caller() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", INTAKE_EVENTS_PATH)
            .match_query(Matcher::Any)
            .with_status(202)
            .with_header("content-type", "application/json")
            .with_body(r#"{"accepted": 5, "errors": []}"#)
            .create_async()
            .await;

        let transport = InterceptedTransport::new(reqwest::Client::new());
        let response = transport.send(intake_request(&server.url())).await.unwrap();
        assert_eq!(response.status(), 202);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
        let body = response.text().await.unwrap();
        assert_eq!(body, r#"{"accepted": 5, "errors": []}"#);

        transport.close().await;
        assert_eq!(transport.stats().accepted, 5.0);
    }

    #[tokio::test]
    async fn test_other_paths_pass_through_unharvested() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/healthz")
            .with_status(200)
            .with_body(r#"{"accepted": 99}"#)
            .create_async()
            .await;

        let transport = InterceptedTransport::new(reqwest::Client::new());
        let url = format!("{}/healthz", server.url()).parse().unwrap();
        let response = transport
            .send(reqwest::Request::new(Method::GET, url))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        transport.close().await;
        assert_eq!(transport.stats(), TransportStats::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_close_after_flood_loses_nothing() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", INTAKE_EVENTS_PATH)
            .match_query(Matcher::Any)
            .with_status(202)
            .with_body(r#"{"accepted": 1}"#)
            .expect_at_least(1)
            .create_async()
            .await;

        let transport = Arc::new(InterceptedTransport::new(reqwest::Client::new()));
        let mut sends = Vec::new();
        for _ in 0..50 {
            let transport = Arc::clone(&transport);
            let base = server.url();
            sends.push(tokio::spawn(async move {
                transport.send(intake_request(&base)).await.unwrap();
            }));
        }
        for send in sends {
            send.await.unwrap();
        }

        // Close races the aggregation task here; the outstanding-counter
        // barrier must account for every harvested response.
        transport.close().await;
        assert_eq!(transport.stats().accepted, 50.0);
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Trace client façade.
//!
//! [`TraceClient`] is the cheap-to-clone handle the generators record events
//! through; [`DeliveryService`] is the single background task that batches
//! those events into intake documents and ships them through the
//! [`InterceptedTransport`]. The pair is created together and the service is
//! spawned by the caller, so there is no process-global client: every
//! collaborator receives the handle explicitly.
//!
//! Delivery is modeled as a bounded channel plus an explicit flush: an event
//! that does not fit the buffer is dropped and counted, never blocked on, and
//! `flush` drains everything enqueued before it returns.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, Url};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::error::Error;
use crate::transport::{InterceptedTransport, TransportStats, INTAKE_EVENTS_PATH};
use crate::util;

const DEFAULT_USER_AGENT: &str = concat!("trace-loadgen/", env!("CARGO_PKG_VERSION"));
/// How often buffered events are shipped even when the batch is not full.
const DELIVERY_TICK: Duration = Duration::from_millis(200);

/// Options for [`TraceClient::new`]. The defaults target a local intake
/// server and are runnable as-is.
#[derive(Debug, Clone)]
pub struct TracerConfig {
    pub server_url: String,
    pub secret_token: String,
    /// Upper bound on how long [`TraceClient::flush`] blocks.
    pub flush_timeout: Duration,
    pub request_timeout: Duration,
    /// Capacity of the delivery buffer; events beyond it are dropped and
    /// counted, never blocked on.
    pub buffer_capacity: usize,
    /// Number of events shipped per intake request.
    pub batch_size: usize,
}

impl Default for TracerConfig {
    fn default() -> Self {
        TracerConfig {
            server_url: "http://localhost:8200".to_string(),
            secret_token: String::new(),
            flush_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            buffer_capacity: 1024,
            batch_size: 64,
        }
    }
}

/// Cumulative send/drop counters, snapshotted via [`TraceClient::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TracerStats {
    pub transactions_sent: u64,
    pub transactions_dropped: u64,
    pub spans_sent: u64,
    pub spans_dropped: u64,
    pub errors_sent: u64,
    pub errors_dropped: u64,
    /// Intake requests that failed outright or were rejected.
    pub send_errors: u64,
}

#[derive(Default)]
struct StatsCells {
    transactions_sent: AtomicU64,
    transactions_dropped: AtomicU64,
    spans_sent: AtomicU64,
    spans_dropped: AtomicU64,
    errors_sent: AtomicU64,
    errors_dropped: AtomicU64,
    send_errors: AtomicU64,
}

impl StatsCells {
    fn snapshot(&self) -> TracerStats {
        TracerStats {
            transactions_sent: self.transactions_sent.load(Ordering::Relaxed),
            transactions_dropped: self.transactions_dropped.load(Ordering::Relaxed),
            spans_sent: self.spans_sent.load(Ordering::Relaxed),
            spans_dropped: self.spans_dropped.load(Ordering::Relaxed),
            errors_sent: self.errors_sent.load(Ordering::Relaxed),
            errors_dropped: self.errors_dropped.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }

    fn record_dropped(&self, event: &IntakeEvent) {
        match event {
            IntakeEvent::Transaction(_) => &self.transactions_dropped,
            IntakeEvent::Span(_) => &self.spans_dropped,
            IntakeEvent::Error(_) => &self.errors_dropped,
        }
        .fetch_add(1, Ordering::Relaxed);
    }

    fn record_batch_sent(&self, counts: BatchCounts) {
        self.transactions_sent.fetch_add(counts.transactions, Ordering::Relaxed);
        self.spans_sent.fetch_add(counts.spans, Ordering::Relaxed);
        self.errors_sent.fetch_add(counts.errors, Ordering::Relaxed);
    }

    fn record_batch_failed(&self, counts: BatchCounts) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
        self.transactions_dropped.fetch_add(counts.transactions, Ordering::Relaxed);
        self.spans_dropped.fetch_add(counts.spans, Ordering::Relaxed);
        self.errors_dropped.fetch_add(counts.errors, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BatchCounts {
    transactions: u64,
    spans: u64,
    errors: u64,
}

impl BatchCounts {
    fn of(events: &[IntakeEvent]) -> BatchCounts {
        let mut counts = BatchCounts::default();
        for event in events {
            match event {
                IntakeEvent::Transaction(_) => counts.transactions += 1,
                IntakeEvent::Span(_) => counts.spans += 1,
                IntakeEvent::Error(_) => counts.errors += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum IntakeEvent {
    Transaction(TransactionData),
    Span(SpanData),
    Error(ErrorData),
}

#[derive(Debug, Serialize)]
struct TransactionData {
    id: String,
    trace_id: String,
    name: String,
    #[serde(rename = "type")]
    kind: String,
    /// Milliseconds.
    duration: f64,
    span_count: SpanCount,
    #[serde(skip_serializing_if = "TagContext::is_empty")]
    context: TagContext,
}

#[derive(Debug, Serialize)]
struct SpanCount {
    started: u64,
}

#[derive(Debug, Default, Serialize)]
struct TagContext {
    tags: BTreeMap<String, String>,
}

impl TagContext {
    fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

#[derive(Debug, Serialize)]
struct SpanData {
    id: String,
    transaction_id: String,
    trace_id: String,
    parent_id: String,
    name: String,
    #[serde(rename = "type")]
    kind: String,
    duration: f64,
}

/// A synthetic error payload recorded through [`TraceClient::record_error`].
#[derive(Debug, Serialize)]
pub struct ErrorData {
    pub id: String,
    pub culprit: String,
    pub exception: Exception,
}

#[derive(Debug, Serialize)]
pub struct Exception {
    pub message: String,
    pub stacktrace: Vec<Frame>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    pub filename: String,
    pub function: String,
    pub lineno: u64,
}

/// The identifiers a span needs to attach itself to its parent transaction.
/// Cloning the context keeps the span attributed to the transaction it was
/// created under, never a sibling generated concurrently.
#[derive(Debug, Clone)]
pub struct TraceContext {
    trace_id: u128,
    transaction_id: u64,
    started: Arc<AtomicU64>,
}

/// An in-flight transaction. Ended explicitly; the recorded span count is
/// whatever was actually started under its context by then.
pub struct Transaction {
    client: TraceClient,
    id: u64,
    trace_id: u128,
    name: String,
    kind: String,
    start: Instant,
    tags: BTreeMap<String, String>,
    started: Arc<AtomicU64>,
}

impl Transaction {
    pub fn context(&self) -> TraceContext {
        TraceContext {
            trace_id: self.trace_id,
            transaction_id: self.id,
            started: Arc::clone(&self.started),
        }
    }

    pub fn set_tag(&mut self, key: &str, value: &str) {
        self.tags.insert(key.to_string(), value.to_string());
    }

    pub fn end(self) {
        let data = TransactionData {
            id: format!("{:016x}", self.id),
            trace_id: format!("{:032x}", self.trace_id),
            name: self.name,
            kind: self.kind,
            duration: self.start.elapsed().as_secs_f64() * 1_000.0,
            span_count: SpanCount {
                started: self.started.load(Ordering::Relaxed),
            },
            context: TagContext { tags: self.tags },
        };
        self.client.enqueue(IntakeEvent::Transaction(data));
    }
}

/// An in-flight span; recorded when ended.
pub struct Span {
    client: TraceClient,
    id: u64,
    trace_id: u128,
    transaction_id: u64,
    name: String,
    kind: String,
    start: Instant,
}

impl Span {
    pub fn end(self) {
        let data = SpanData {
            id: format!("{:016x}", self.id),
            transaction_id: format!("{:016x}", self.transaction_id),
            trace_id: format!("{:032x}", self.trace_id),
            parent_id: format!("{:016x}", self.transaction_id),
            name: self.name,
            kind: self.kind,
            duration: self.start.elapsed().as_secs_f64() * 1_000.0,
        };
        self.client.enqueue(IntakeEvent::Span(data));
    }
}

enum Command {
    Record(IntakeEvent),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle for recording synthetic events. Cloning is cheap; all clones share
/// one delivery service and one set of counters.
#[derive(Clone)]
pub struct TraceClient {
    tx: mpsc::Sender<Command>,
    stats: Arc<StatsCells>,
    transport: Arc<InterceptedTransport>,
    flush_timeout: Duration,
}

impl TraceClient {
    /// Builds the client handle and its delivery service. The caller spawns
    /// the service (`tokio::spawn(service.run())`) and owns closing the
    /// client once the run is over. Must be called from within a runtime.
    pub fn new(config: TracerConfig) -> Result<(DeliveryService, TraceClient), Error> {
        let intake_url = util::normalize_destination(&config.server_url, INTAKE_EVENTS_PATH)?;
        let http = reqwest::Client::builder().build()?;
        let transport = Arc::new(InterceptedTransport::new(http));

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/x-ndjson"));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        if !config.secret_token.is_empty() {
            let bearer = format!("Bearer {}", config.secret_token);
            let value = HeaderValue::from_str(&bearer)
                .map_err(|e| Error::RequestAssembly(e.to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let (tx, rx) = mpsc::channel(config.buffer_capacity.max(1));
        let stats = Arc::new(StatsCells::default());
        let service = DeliveryService {
            rx,
            stats: Arc::clone(&stats),
            transport: Arc::clone(&transport),
            intake_url,
            headers,
            request_timeout: config.request_timeout,
            batch_size: config.batch_size.max(1),
            metadata: metadata_line(),
            buffer: Vec::new(),
        };
        let client = TraceClient {
            tx,
            stats,
            transport,
            flush_timeout: config.flush_timeout,
        };
        Ok((service, client))
    }

    pub fn begin_transaction(&self, name: &str, kind: &str) -> Transaction {
        Transaction {
            client: self.clone(),
            id: rand::random(),
            trace_id: rand::random(),
            name: name.to_string(),
            kind: kind.to_string(),
            start: Instant::now(),
            tags: BTreeMap::new(),
            started: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn start_span(&self, ctx: &TraceContext, name: &str, kind: &str) -> Span {
        ctx.started.fetch_add(1, Ordering::Relaxed);
        Span {
            client: self.clone(),
            id: rand::random(),
            trace_id: ctx.trace_id,
            transaction_id: ctx.transaction_id,
            name: name.to_string(),
            kind: kind.to_string(),
            start: Instant::now(),
        }
    }

    /// Fire-and-forget: a full delivery buffer drops the error and counts it.
    pub fn record_error(&self, error: ErrorData) {
        self.enqueue(IntakeEvent::Error(error));
    }

    /// Blocks until every event enqueued before this call has been delivered
    /// or counted dropped, bounded by the configured flush timeout. Returns
    /// false on timeout or when the delivery service is gone.
    pub async fn flush(&self) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(ack_tx)).await.is_err() {
            return false;
        }
        matches!(tokio::time::timeout(self.flush_timeout, ack_rx).await, Ok(Ok(())))
    }

    pub fn stats(&self) -> TracerStats {
        self.stats.snapshot()
    }

    pub fn transport_stats(&self) -> TransportStats {
        self.transport.stats()
    }

    /// Drains pending events, stops the delivery service, then closes the
    /// transport, which blocks until every harvested acknowledgment has been
    /// absorbed. The returned statistics are final.
    pub async fn close(self) -> TransportStats {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
        self.transport.close().await;
        self.transport.stats()
    }

    fn enqueue(&self, event: IntakeEvent) {
        if let Err(err) = self.tx.try_send(Command::Record(event)) {
            let command = match err {
                TrySendError::Full(command) => command,
                TrySendError::Closed(command) => command,
            };
            if let Command::Record(event) = command {
                self.stats.record_dropped(&event);
            }
        }
    }
}

/// Single background task owning the delivery buffer. Batches are shipped
/// when full, on a periodic tick, on an explicit flush, and at shutdown.
pub struct DeliveryService {
    rx: mpsc::Receiver<Command>,
    stats: Arc<StatsCells>,
    transport: Arc<InterceptedTransport>,
    intake_url: Url,
    headers: HeaderMap,
    request_timeout: Duration,
    batch_size: usize,
    metadata: Vec<u8>,
    buffer: Vec<IntakeEvent>,
}

impl DeliveryService {
    pub async fn run(mut self) {
        debug!("delivery service started");
        let mut tick = tokio::time::interval(DELIVERY_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(Command::Record(event)) => {
                        self.buffer.push(event);
                        if self.buffer.len() >= self.batch_size {
                            self.ship_batch().await;
                        }
                    }
                    Some(Command::Flush(ack)) => {
                        self.ship_batch().await;
                        let _ = ack.send(());
                    }
                    Some(Command::Shutdown(ack)) => {
                        self.ship_batch().await;
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.ship_batch().await;
                        break;
                    }
                },
                _ = tick.tick() => {
                    if !self.buffer.is_empty() {
                        self.ship_batch().await;
                    }
                }
            }
        }
        debug!("delivery service stopped");
    }

    async fn ship_batch(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let events = std::mem::take(&mut self.buffer);
        let counts = BatchCounts::of(&events);

        let document = encode_batch(&self.metadata, &events);
        let body = match util::gzip(&document) {
            Ok(body) => body,
            Err(e) => {
                error!("failed to compress intake document: {e}");
                self.stats.record_batch_failed(counts);
                return;
            }
        };

        let mut request = reqwest::Request::new(Method::POST, self.intake_url.clone());
        *request.timeout_mut() = Some(self.request_timeout);
        *request.headers_mut() = self.headers.clone();
        *request.body_mut() = Some(body.into());

        match self.transport.send(request).await {
            Ok(response) if response.status().is_success() => {
                self.stats.record_batch_sent(counts);
            }
            Ok(response) => {
                warn!("intake request rejected: {}", response.status());
                self.stats.record_batch_failed(counts);
            }
            Err(e) => {
                error!("intake request failed: {e}");
                self.stats.record_batch_failed(counts);
            }
        }
    }
}

fn metadata_line() -> Vec<u8> {
    serde_json::json!({
        "metadata": {
            "service": {
                "name": "trace-loadgen",
                "agent": {"name": "trace-loadgen", "version": env!("CARGO_PKG_VERSION")},
            }
        }
    })
    .to_string()
    .into_bytes()
}

fn encode_batch(metadata: &[u8], events: &[IntakeEvent]) -> Vec<u8> {
    let mut out = Vec::with_capacity(metadata.len() + events.len() * 128);
    out.extend_from_slice(metadata);
    out.push(b'\n');
    for event in events {
        if let Ok(line) = serde_json::to_vec(event) {
            out.extend_from_slice(&line);
            out.push(b'\n');
        }
    }
    out
}

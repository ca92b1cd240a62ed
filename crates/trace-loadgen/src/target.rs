// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Request-descriptor assembly for the external dispatch engine.
//!
//! A [`Target`] pairs a rotation of normalized destinations with a payload
//! composed once from structural parameters. [`Target::into_work`] consumes
//! it to produce the [`WorkOrder`] handed to the dispatch engine, so the
//! body's in-place compression can happen at most once per descriptor.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, Url};

use crate::config::{BodyConfig, Config};
use crate::error::Error;
use crate::util;

const DEFAULT_USER_AGENT: &str = concat!("trace-loadgen/", env!("CARGO_PKG_VERSION"));

/// Composes an intake payload from structural parameters. Supplied by the
/// caller; composition failures are fatal setup errors.
pub trait PayloadComposer {
    fn compose(&self, shape: &BodyConfig) -> Result<Vec<u8>, Error>;
}

/// The engine that actually issues a prepared work order: N requests across
/// C workers at a target rate, or a continuously driven stream. External to
/// this crate; progress and results go to `out`.
#[async_trait]
pub trait DispatchEngine {
    async fn dispatch(
        &self,
        work: WorkOrder,
        out: &mut (dyn std::io::Write + Send),
    ) -> Result<(), Error>;
}

/// Round-robin sequence of destination URLs. Advanced by a single owner;
/// each call to [`Rotation::next`] yields the current destination and moves
/// one position, wrapping after the full length.
#[derive(Debug, Clone)]
pub struct Rotation {
    urls: Vec<Url>,
    cursor: usize,
}

impl Rotation {
    fn new(urls: Vec<Url>) -> Option<Rotation> {
        if urls.is_empty() {
            return None;
        }
        Some(Rotation { urls, cursor: 0 })
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn next(&mut self) -> &Url {
        let current = self.cursor;
        self.cursor = (self.cursor + 1) % self.urls.len();
        &self.urls[current]
    }
}

/// How the dispatch engine drives the order.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestMode {
    /// Continuously driven with its own pacing and deadline.
    Stream {
        events_per_second: f64,
        pause: Duration,
        run_timeout: Duration,
    },
    /// One prepared request repeated at a target rate.
    Fixed { rate: f64 },
}

/// Fully-assembled request descriptor for the dispatch engine.
#[derive(Debug, Clone)]
pub struct WorkOrder {
    pub method: Method,
    pub rotation: Rotation,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub request_timeout: Duration,
    pub max_requests: usize,
    pub concurrency: usize,
    pub mode: RequestMode,
    pub disable_keepalives: bool,
    pub disable_redirects: bool,
}

/// A request template: destinations, method, payload and options. Built
/// once, then consumed by [`Target::into_work`]; the body is not safe to
/// reuse after compression without rebuilding.
#[derive(Debug)]
pub struct Target {
    pub rotation: Rotation,
    pub method: Method,
    pub body: Vec<u8>,
    pub config: Config,
}

impl Target {
    /// Single-destination convenience over [`Target::from_options`].
    pub fn from_config(
        url: &str,
        method: Method,
        composer: &dyn PayloadComposer,
        config: Config,
    ) -> Result<Target, Error> {
        let mut target = Target::from_options(&[url.to_string()], composer, config)?;
        target.method = method;
        Ok(target)
    }

    /// Normalizes every destination (one trailing `/` stripped, endpoint
    /// appended) and composes the payload once. Malformed destinations and
    /// composition failures abort before any traffic is generated.
    pub fn from_options(
        urls: &[String],
        composer: &dyn PayloadComposer,
        config: Config,
    ) -> Result<Target, Error> {
        let normalized = urls
            .iter()
            .map(|url| util::normalize_destination(url, &config.endpoint))
            .collect::<Result<Vec<_>, _>>()?;
        let rotation = Rotation::new(normalized).ok_or_else(|| Error::InvalidDestination {
            url: String::new(),
            reason: "no destinations".to_string(),
        })?;
        let body = composer.compose(&config.body)?;
        Ok(Target {
            rotation,
            method: Method::POST,
            body,
            config,
        })
    }

    pub fn size(&self) -> usize {
        self.body.len()
    }

    /// Finalizes headers, compresses the body in place (exactly once; the
    /// Target is consumed) and branches on the streaming flag.
    pub fn into_work(self) -> Result<WorkOrder, Error> {
        let Target {
            rotation,
            method,
            mut body,
            config,
        } = self;
        let mut headers = config.headers;

        // The default identifies this client unless the caller set their
        // own User-Agent; an explicitly blank one suppresses the header.
        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        }

        let bearer = format!("Bearer {}", config.secret_token);
        let value =
            HeaderValue::from_str(&bearer).map_err(|e| Error::RequestAssembly(e.to_string()))?;
        headers.insert(AUTHORIZATION, value);

        if !body.is_empty() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/x-ndjson"));
        }

        if !config.disable_compression {
            body = util::gzip(&body).map_err(|e| Error::RequestAssembly(e.to_string()))?;
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }

        let mode = if config.stream {
            RequestMode::Stream {
                events_per_second: config.rate,
                pause: config.pause,
                run_timeout: config.run_timeout,
            }
        } else {
            RequestMode::Fixed { rate: config.rate }
        };

        Ok(WorkOrder {
            method,
            rotation,
            headers,
            body,
            request_timeout: config.request_timeout,
            max_requests: config.max_requests,
            concurrency: config.concurrency,
            mode,
            disable_keepalives: config.disable_keepalives,
            disable_redirects: config.disable_redirects,
        })
    }
}

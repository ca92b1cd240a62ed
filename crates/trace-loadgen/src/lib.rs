// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Synthetic trace traffic generator for intake load testing.
//!
//! This crate drives configurable volumes of synthetic telemetry
//! (transactions with spans, standalone errors) against a tracing-ingestion
//! endpoint and measures how much of that traffic the backend accepted
//! versus dropped.
//!
//! The moving parts:
//! - [`runner`]: races per-workload generators against timeout and interrupt
//!   watchdogs and aggregates the outcome into a [`runner::Report`];
//! - [`generator`]: rate-throttled producers of synthetic transactions and
//!   errors, paced by [`throttle::Throttle`];
//! - [`tracer`]: the trace client façade (record events, flush, read
//!   cumulative send/drop counters);
//! - [`transport`]: the instrumented HTTP transport that harvests
//!   server-reported acceptance statistics from intake acknowledgments
//!   without disturbing response delivery;
//! - [`target`]: request-descriptor assembly for an external dispatch
//!   engine (destination rotation, headers, one-shot compression).

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod error;
pub mod generator;
pub mod runner;
pub mod target;
pub mod throttle;
pub mod tracer;
pub mod transport;
pub mod util;
pub mod workload;

pub use error::Error;

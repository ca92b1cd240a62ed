// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors that can occur while assembling or driving a load-generation run.
///
/// Setup errors (`InvalidDestination`, `Compose`, `RequestAssembly`,
/// `WorkloadRow`) indicate misconfiguration and abort before any traffic is
/// generated. `Interrupted` and `Task` end a run that is already in flight;
/// the run's `Report` remains valid alongside them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid destination {url:?}: {reason}")]
    InvalidDestination { url: String, reason: String },

    #[error("payload composition failed: {0}")]
    Compose(String),

    #[error("request assembly failed: {0}")]
    RequestAssembly(String),

    #[error("invalid workload row: {0}")]
    WorkloadRow(String),

    #[error("interrupt")]
    Interrupted,

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

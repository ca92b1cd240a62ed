// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::error::Error;

/// Kind of synthetic event a workload generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Transaction,
    Error,
}

/// One category of synthetic traffic: what to generate, how fast, and the
/// structural bounds (spans per transaction, or frames per error).
///
/// Callers must establish `max_structs >= min_structs` before construction;
/// the generators draw uniformly from that range and do not re-validate.
/// A `limit` of zero marks the workload as skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workload {
    pub kind: EventKind,
    /// Number of events to generate before the workload completes naturally.
    pub limit: usize,
    /// Pacing interval: at most one event per elapsed period.
    pub period: Duration,
    pub max_structs: usize,
    pub min_structs: usize,
}

impl Workload {
    pub fn is_empty(&self) -> bool {
        self.limit == 0
    }

    /// Validates one workload-file row: `kind, limit, period, max, min`,
    /// with kind encoded as 0 (transaction) or 1 (error). Missing columns
    /// read as empty and fail their field's parse.
    pub fn from_row(fields: &[&str]) -> Result<Workload, Error> {
        let field = |i: usize| fields.get(i).copied().unwrap_or("").trim();

        let kind = match field(0) {
            "0" => EventKind::Transaction,
            "1" => EventKind::Error,
            other => {
                return Err(Error::WorkloadRow(format!("unknown event kind {other:?}")));
            }
        };
        let limit = field(1)
            .parse::<usize>()
            .map_err(|e| Error::WorkloadRow(format!("bad limit {:?}: {e}", field(1))))?;
        let period = humantime::parse_duration(field(2))
            .map_err(|e| Error::WorkloadRow(format!("bad period {:?}: {e}", field(2))))?;
        let max_structs = field(3)
            .parse::<usize>()
            .map_err(|e| Error::WorkloadRow(format!("bad max structs {:?}: {e}", field(3))))?;
        let min_structs = field(4)
            .parse::<usize>()
            .map_err(|e| Error::WorkloadRow(format!("bad min structs {:?}: {e}", field(4))))?;

        Ok(Workload {
            kind,
            limit,
            period,
            max_structs,
            min_structs,
        })
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;

use reqwest::Url;
use serde_json::Value;

use crate::error::Error;

/// Numeric field lookup with a zero default. The intake response shape is not
/// contractually guaranteed, so absent or mistyped fields read as 0.
pub fn as_f64(doc: &Value, key: &str) -> f64 {
    doc.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

/// String field lookup with an empty default.
pub fn as_str<'a>(doc: &'a Value, key: &str) -> &'a str {
    doc.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Array field lookup with an empty default.
pub fn as_array<'a>(doc: &'a Value, key: &str) -> &'a [Value] {
    doc.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Strips at most one trailing `/` from `url`, appends `endpoint` and parses
/// the result. Malformed destinations are setup errors, never retried.
pub(crate) fn normalize_destination(url: &str, endpoint: &str) -> Result<Url, Error> {
    let full = format!("{}{}", url.strip_suffix('/').unwrap_or(url), endpoint);
    Url::parse(&full).map_err(|e| Error::InvalidDestination {
        url: full,
        reason: e.to_string(),
    })
}

pub(crate) fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

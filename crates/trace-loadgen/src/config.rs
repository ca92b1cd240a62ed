// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use reqwest::header::HeaderMap;

use crate::transport::INTAKE_EVENTS_PATH;

/// Structural parameters handed to the payload composer: how many of each
/// event kind one composed request body should carry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BodyConfig {
    pub errors: usize,
    pub transactions: usize,
    pub spans: usize,
    pub frames: usize,
}

/// Options for building a request descriptor for the dispatch engine.
///
/// Every field has a runnable default: an unconfigured instance targets the
/// standard intake path with a 10 second request timeout and no cap on total
/// requests.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of concurrent workers the dispatch engine should run.
    pub concurrency: usize,
    /// Target request (or event, when streaming) rate. Zero means unthrottled.
    pub rate: f64,
    /// Pause between repetitions in streaming mode.
    pub pause: Duration,
    /// Cap on total requests issued in fixed mode.
    pub max_requests: usize,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Overall run timeout in streaming mode.
    pub run_timeout: Duration,
    /// Path suffix appended to every destination.
    pub endpoint: String,
    pub secret_token: String,
    /// Streaming descriptors are driven continuously at an event rate;
    /// non-streaming descriptors repeat one prepared request.
    pub stream: bool,
    pub body: BodyConfig,
    pub disable_compression: bool,
    pub disable_keepalives: bool,
    pub disable_redirects: bool,
    /// Header overrides. A `User-Agent` entry here, even a blank one,
    /// suppresses the default.
    pub headers: HeaderMap,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            concurrency: 0,
            rate: 0.0,
            pause: Duration::ZERO,
            max_requests: usize::MAX,
            request_timeout: Duration::from_secs(10),
            run_timeout: Duration::ZERO,
            endpoint: INTAKE_EVENTS_PATH.to_string(),
            secret_token: String::new(),
            stream: false,
            body: BodyConfig::default(),
            disable_compression: false,
            disable_keepalives: false,
            disable_redirects: false,
            headers: HeaderMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_runnable() {
        let config = Config::default();
        assert_eq!(config.endpoint, "/intake/v2/events");
        assert_eq!(config.max_requests, usize::MAX);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(!config.stream);
        assert!(config.headers.is_empty());
    }
}

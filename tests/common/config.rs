//! Test configuration helpers for sessions pointed at a mock server

use std::path::Path;
use std::time::Duration;

use catalog_harvest::Config;
use wiremock::MockServer;

/// Token every mock expects in the `Authorization` header
pub const TEST_TOKEN: &str = "test-token";

/// Configuration for a session against `server`, with files under `dir`
///
/// Pacing and settle delays are zeroed, the cooldown is a few milliseconds,
/// and the credential probe is disabled. Only 2021 is extracted.
pub fn test_config(server: &MockServer, dir: &Path) -> Config {
    let mut config = Config::default();

    config.api.base_url = server.uri();
    config.api.api_key = TEST_TOKEN.to_string();
    config.api.timeout = Duration::from_secs(5);
    config.api.probe_id = None;

    config.pacing.request_interval = Duration::ZERO;
    config.pacing.page_settle = Duration::ZERO;
    config.pacing.empty_page_settle = Duration::ZERO;
    config.pacing.rate_limit_cooldown = Duration::from_millis(10);

    config.retry.max_attempts = 3;
    config.retry.backoff = Duration::from_millis(1);
    config.retry.jitter = false;

    config.extraction.partitions = vec![2021];
    config.extraction.output_path = dir.join("movies.csv");
    config.extraction.checkpoint_path = dir.join("progress.json");

    config
}

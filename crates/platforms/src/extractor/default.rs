use std::time::Duration;

use reqwest::Client;

pub(crate) const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Total timeout for platform REST calls.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub fn default_client() -> Client {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .expect("Failed to create HTTP client")
}

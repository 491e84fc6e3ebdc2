//! Shared HTTP plumbing used by both chat backend implementations.

use lazy_static::lazy_static;
use std::time::Duration;

lazy_static! {
    /// Shared HTTP client with persistent connection pooling. A single
    /// instance keeps TLS sessions and DNS lookups warm across turns.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = {
        reqwest::ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build shared HTTP client")
    };
}

pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

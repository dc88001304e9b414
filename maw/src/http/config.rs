use crate::defaults::{DEFAULT_HTTP_CONN_TIMEOUT, DEFAULT_HTTP_TIMEOUT};
use duration_str::deserialize_duration;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub(crate) timeout: Duration,
    #[serde(
        default = "default_conn_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub(crate) conn_timeout: Duration,
}

impl HttpConfig {
    pub fn new(timeout: Duration, conn_timeout: Duration) -> Self {
        Self {
            timeout,
            conn_timeout,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HTTP_TIMEOUT, DEFAULT_HTTP_CONN_TIMEOUT)
    }
}

fn default_timeout() -> Duration {
    DEFAULT_HTTP_TIMEOUT
}

fn default_conn_timeout() -> Duration {
    DEFAULT_HTTP_CONN_TIMEOUT
}

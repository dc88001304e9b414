//! # Helpers to build the reqwest blocking client used for every download
use super::config::HttpConfig;
use crate::defaults::USER_AGENT;
use reqwest::blocking::{Client, ClientBuilder};
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
#[error("could not build the http client: {0}")]
pub struct HttpBuildError(String);

/// Builds a reqwest blocking client according to the provided configuration.
pub fn try_build_client(config: &HttpConfig) -> Result<Client, HttpBuildError> {
    builder_with_timeout(config.timeout, config.conn_timeout)
        .build()
        .map_err(|err| HttpBuildError(err.to_string()))
}

/// Returns a reqwest [ClientBuilder] identifying maw and using the provided timeout values.
fn builder_with_timeout(timeout: Duration, conn_timeout: Duration) -> ClientBuilder {
    Client::builder()
        .use_rustls_tls()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .connect_timeout(conn_timeout)
}

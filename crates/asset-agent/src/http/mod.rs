//! HTTP transport for asset downloads.

mod client;

pub use client::{
    HttpClient, HttpClientConfig, HttpError, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_RETRIES,
    DEFAULT_TIMEOUT,
};

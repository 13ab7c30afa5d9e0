//! Per-stream request reconstruction, local-origin dispatch, and response framing.

use std::time::Duration;

use crate::request::{parse_request, serialize_response, OutboundResponse};
use thiserror::Error;

/// Local dispatch is bounded by a fixed per-request timeout.
const LOCAL_DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to parse request: {0}")]
    Parse(#[from] crate::request::RequestParseError),
    #[error("local origin request failed: {0}")]
    Dispatch(#[from] reqwest::Error),
}

/// Parse the accumulated raw request bytes, dispatch to the local origin at
/// `http://<local_host>:<local_port><target>`, and serialize the response
/// back to HTTP/1.1 wire bytes. A single entry point covering the whole
/// reconstruct, proxy, and reframe path.
pub async fn handle_request(
    client: &reqwest::Client,
    local_host: &str,
    local_port: u16,
    raw_request: &[u8],
) -> Result<Vec<u8>, StreamError> {
    let parsed = parse_request(raw_request)?;

    let url = format!("http://{local_host}:{local_port}{}", parsed.target);
    let method = http::Method::from_bytes(parsed.method.as_bytes())
        .unwrap_or(http::Method::GET);

    let mut builder = client
        .request(reqwest_method(&method), &url)
        .timeout(LOCAL_DISPATCH_TIMEOUT);

    for (name, value) in &parsed.headers {
        builder = builder.header(name, value);
    }
    if !parsed.body.is_empty() {
        builder = builder.body(parsed.body);
    }

    let response = builder.send().await?;
    let status = response.status();
    let headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect();
    let body = response.bytes().await?.to_vec();

    let outbound = OutboundResponse {
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or("").to_string(),
        headers,
        body,
    };
    Ok(serialize_response(&outbound))
}

fn reqwest_method(method: &http::Method) -> reqwest::Method {
    reqwest::Method::from_bytes(method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET)
}

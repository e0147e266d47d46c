//! Startup probe for pools configured by their getwork address.
//!
//! A pool that also speaks Stratum announces it in the `X-Stratum` header of its getwork
//! replies. One getwork request is enough to find the real upstream.
use std::time::Duration;

use base64::Engine;
use http_body_util::Full;
use hyper::{
    body::Bytes,
    header::{AUTHORIZATION, CONTENT_TYPE},
    Request,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde_json::json;
use tracing::{debug, info};

use crate::{
    error::{ProxyError, ProxyResult},
    upstream::UpstreamTarget,
};

const DETECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Asks `target` for its Stratum address. `Ok(None)` when it does not announce one.
pub async fn detect_stratum(target: &UpstreamTarget) -> ProxyResult<Option<UpstreamTarget>> {
    let client: Client<_, Full<Bytes>> = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
    let body = json!({"id": 0, "method": "getwork", "params": []}).to_string();
    let uri: hyper::Uri = format!("http://{}:{}/", target.host, target.port)
        .parse()
        .map_err(|e| ProxyError::InvalidConfig(format!("cannot probe {target}: {e}")))?;
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .header(
            AUTHORIZATION,
            format!(
                "Basic {}",
                base64::engine::general_purpose::STANDARD.encode("stratum-proxy:x")
            ),
        )
        .body(Full::<Bytes>::from(body))
        .map_err(|e| ProxyError::InvalidConfig(format!("cannot probe {target}: {e}")))?;

    debug!("Probing {target} for a Stratum endpoint");
    let response = tokio::time::timeout(DETECT_TIMEOUT, client.request(request)).await??;
    let detected = response
        .headers()
        .get("x-stratum")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_stratum_url);
    match &detected {
        Some(found) => info!("{target} announces Stratum at {found}"),
        None => info!("{target} does not announce a Stratum endpoint"),
    }
    Ok(detected)
}

/// Parses `stratum+tcp://host:port`. The port defaults to 3333.
pub fn parse_stratum_url(url: &str) -> Option<UpstreamTarget> {
    let rest = url.trim().strip_prefix("stratum+tcp://")?;
    let authority = rest.split('/').next()?;
    if authority.is_empty() {
        return None;
    }
    if let Some(v6) = authority.strip_prefix('[') {
        let (host, tail) = v6.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(port) => port.parse().ok()?,
            None => 3333,
        };
        return Some(UpstreamTarget::new(host, port));
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            Some(UpstreamTarget::new(host, port.parse().ok()?))
        }
        Some(_) => None,
        None => Some(UpstreamTarget::new(authority, 3333)),
    }
}

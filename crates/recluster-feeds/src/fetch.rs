//! HTTP fetch of a single feed sample.
//!
//! Accepted bodies: a bare number (`42.5`), a JSON number, or a JSON object
//! with a numeric `value` field (`{"value": 42.5, "unit": "EUR/MWh"}`).

use std::time::Duration;

use bytes::Bytes;
use http::Uri;
use http_body_util::{BodyExt, Empty, LengthLimitError, Limited};
use serde_json::Value as Json;
use tracing::debug;

use crate::error::{FeedError, FeedResult};

const USER_AGENT: &str = "recluster-feeds/0.1";

/// Largest response body read from a feed.
pub const MAX_BODY_BYTES: usize = 4 * 1024;

/// Fetch `url` and parse its body as a sample.
pub async fn fetch_sample(url: &str, timeout: Duration) -> FeedResult<f64> {
    let uri: Uri = url.parse().map_err(|e: http::uri::InvalidUri| FeedError::InvalidUrl {
        url: url.to_string(),
        detail: e.to_string(),
    })?;
    match uri.scheme_str() {
        Some("http") => {}
        Some(other) => return Err(FeedError::UnsupportedScheme(other.to_string())),
        None => {
            return Err(FeedError::InvalidUrl {
                url: url.to_string(),
                detail: "missing scheme".to_string(),
            });
        }
    }
    let authority = uri
        .authority()
        .ok_or_else(|| FeedError::InvalidUrl {
            url: url.to_string(),
            detail: "missing host".to_string(),
        })?
        .clone();
    let address = format!("{}:{}", authority.host(), authority.port_u16().unwrap_or(80));

    let body = tokio::time::timeout(timeout, async {
        let stream = tokio::net::TcpStream::connect(&address)
            .await
            .map_err(|e| FeedError::Connect(e.to_string()))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| FeedError::Http(e.to_string()))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
        let req = http::Request::builder()
            .method("GET")
            .uri(path)
            .header("host", authority.as_str())
            .header("user-agent", USER_AGENT)
            .header("accept", "application/json, text/plain")
            .body(Empty::<Bytes>::new())
            .map_err(|e| FeedError::Http(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| FeedError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(FeedError::Status(resp.status().as_u16()));
        }
        let collected = Limited::new(resp.into_body(), MAX_BODY_BYTES)
            .collect()
            .await
            .map_err(|e| {
                if e.downcast_ref::<LengthLimitError>().is_some() {
                    FeedError::BodyTooLarge(MAX_BODY_BYTES)
                } else {
                    FeedError::Http(e.to_string())
                }
            })?;
        Ok::<Bytes, FeedError>(collected.to_bytes())
    })
    .await
    .map_err(|_| FeedError::Timeout)??;

    let value = parse_sample(&body)?;
    debug!(%url, value, "feed sample fetched");
    Ok(value)
}

/// Parse a feed body. Non-finite values are rejected.
pub fn parse_sample(body: &[u8]) -> FeedResult<f64> {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();

    let value = match text.parse::<f64>() {
        Ok(v) => Some(v),
        Err(_) => match serde_json::from_str::<Json>(text) {
            Ok(Json::Number(n)) => n.as_f64(),
            Ok(Json::Object(map)) => map.get("value").and_then(|v| match v {
                Json::Number(n) => n.as_f64(),
                Json::String(s) => s.trim().parse().ok(),
                _ => None,
            }),
            _ => None,
        },
    };
    value
        .filter(|v| v.is_finite())
        .ok_or_else(|| FeedError::Parse(truncate(text)))
}

fn truncate(text: &str) -> String {
    text.chars().take(64).collect()
}

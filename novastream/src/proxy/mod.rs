//! Direct proxy (C4): range-forwarding GET to a remote URL with partial-content
//! semantics. Grounded on the upstream reqwest-streaming proxy pattern: a single
//! shared client, an allow-listed set of forwarded response headers, and the body
//! re-streamed via `Body::from_stream` rather than buffered.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use futures::TryStreamExt;

use crate::error::{Error, Result};
use crate::registry::{StartRequest, StreamRegistry};

fn proxy_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .tcp_nodelay(true)
            .pool_max_idle_per_host(16)
            .build()
            .expect("reqwest client configuration is static and valid")
    })
}

/// Validates that `raw_url` is a well-formed, `http`/`https` URL before it is handed
/// to the direct proxy or the HLS transcoder, rejecting malformed or non-HTTP(S)
/// target URLs before dialing out.
pub fn validate_remote_url(raw_url: &str) -> Result<()> {
    let parsed = url::Url::parse(raw_url)
        .map_err(|e| Error::bad_input(format!("invalid url: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::bad_input(format!(
            "unsupported url scheme '{other}', only http/https are allowed"
        ))),
    }
}

/// Headers mirrored from the upstream response onto the outgoing response, in order.
const FORWARDED_RESPONSE_HEADERS: &[header::HeaderName] = &[
    header::CONTENT_TYPE,
    header::ACCEPT_RANGES,
    header::CACHE_CONTROL,
    header::ETAG,
    header::LAST_MODIFIED,
    header::DATE,
];

/// Outcome of proxying a single request, ready to be turned into an axum response.
pub struct ProxiedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

struct EndOnDrop {
    registry: Arc<StreamRegistry>,
    id: u64,
}

impl Drop for EndOnDrop {
    fn drop(&mut self) {
        self.registry.end(self.id);
    }
}

/// Issues a ranged GET to `remote_url`, forwarding `client_range` upstream, and
/// streams the response body back while updating the registry's byte/activity
/// counters on every chunk.
///
/// The stream is registered for the duration of the transfer and ended when the
/// returned body is fully drained or dropped, whichever happens first — so an
/// aborted client connection still cleans up the tracked entry.
pub async fn proxy(
    registry: &Arc<StreamRegistry>,
    remote_url: &str,
    client_range: Option<&str>,
    start_request: StartRequest,
) -> Result<ProxiedResponse> {
    let mut req = proxy_client().get(remote_url);
    if let Some(range) = client_range {
        req = req.header(header::RANGE, range);
    }

    let upstream = req
        .send()
        .await
        .map_err(|e| Error::upstream_failed(format!("direct proxy GET failed: {e}")))?;

    let upstream_status = upstream.status();
    if upstream_status == StatusCode::NOT_FOUND {
        return Err(Error::not_found("remote file", remote_url));
    }
    if upstream_status.is_server_error() {
        return Err(Error::upstream_failed(format!(
            "upstream returned {upstream_status}"
        )));
    }

    let status = if client_range.is_some() {
        StatusCode::PARTIAL_CONTENT
    } else {
        upstream_status
    };

    let mut headers = HeaderMap::new();
    for name in FORWARDED_RESPONSE_HEADERS {
        if let Some(value) = upstream.headers().get(name) {
            headers.insert(name.clone(), value.clone());
        }
    }

    if let Some(content_range) = upstream.headers().get(header::CONTENT_RANGE) {
        headers.insert(header::CONTENT_RANGE, content_range.clone());
    } else if client_range.is_some() {
        if let Some(total) = upstream
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
        {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{total}")) {
                headers.insert(header::CONTENT_RANGE, value);
            }
        }
    }
    if let Some(content_length) = upstream.headers().get(header::CONTENT_LENGTH) {
        headers.insert(header::CONTENT_LENGTH, content_length.clone());
    }

    let (id, counters) = registry.start(start_request);
    let end_on_drop = Arc::new(EndOnDrop {
        registry: registry.clone(),
        id,
    });

    let stream = upstream.bytes_stream().map_ok(move |chunk| {
        counters.touch(chunk.len() as u64);
        let _keep_alive = &end_on_drop;
        chunk
    });

    Ok(ProxiedResponse {
        status,
        headers,
        body: Body::from_stream(stream.map_err(std::io::Error::other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::to_bytes;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn spawn_upstream(body: &'static [u8]) -> SocketAddr {
        let app = Router::new().route(
            "/file",
            get(move || async move { ([(header::CONTENT_TYPE, "video/mp4")], body).into_response() }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[test]
    fn rejects_malformed_and_non_http_urls() {
        assert!(validate_remote_url("not a url").is_err());
        assert!(validate_remote_url("ftp://example.com/file.mkv").is_err());
        assert!(validate_remote_url("http://example.com/file.mkv").is_ok());
        assert!(validate_remote_url("https://example.com/file.mkv").is_ok());
    }

    #[tokio::test]
    async fn proxies_full_response_and_records_bytes() {
        let addr = spawn_upstream(b"hello world").await;
        let registry = Arc::new(StreamRegistry::new(crate::config::RegistrySettings::default()));

        let result = proxy(
            &registry,
            &format!("http://{addr}/file"),
            None,
            StartRequest::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.status, StatusCode::OK);
        let body = to_bytes(result.body, usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"hello world");
    }

    #[tokio::test]
    async fn not_found_upstream_maps_to_not_found_error() {
        let app = Router::new().route("/missing", get(|| async { StatusCode::NOT_FOUND }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let registry = Arc::new(StreamRegistry::new(crate::config::RegistrySettings::default()));
        let err = proxy(
            &registry,
            &format!("http://{addr}/missing"),
            None,
            StartRequest::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}

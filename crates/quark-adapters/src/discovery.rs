//! Etcd discovery URL sources.

use async_trait::async_trait;
use bytes::Bytes;
use http::Uri;
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use tracing::{debug, info};

use quark_core::{DiscoveryService, Error, ErrorKind, OpContext, Result, ResultExt};

/// Requests a fresh token from an etcd discovery service with
/// `GET <endpoint>/new?size=<n>`. Only plain `http://` endpoints are
/// supported.
pub struct HttpDiscovery {
    endpoint: Uri,
}

impl HttpDiscovery {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint: Uri = endpoint.parse().map_err(|e| {
            Error::with_source(
                ErrorKind::Validation,
                format!("invalid discovery endpoint '{endpoint}'"),
                e,
            )
        })?;
        if endpoint.scheme_str() != Some("http") {
            return Err(Error::validation(format!(
                "discovery endpoint {endpoint} must use http://"
            )));
        }
        if endpoint.authority().is_none() {
            return Err(Error::validation(format!("discovery endpoint {endpoint} has no host")));
        }
        Ok(Self { endpoint })
    }

    fn address(&self) -> String {
        let host = self.endpoint.host().unwrap_or_default();
        let port = self.endpoint.port_u16().unwrap_or(80);
        format!("{host}:{port}")
    }

    fn request_path(&self, size: u32) -> String {
        let base = self.endpoint.path().trim_end_matches('/');
        format!("{base}/new?size={size}")
    }

    async fn fetch(&self, size: u32) -> Result<String> {
        let address = self.address();
        let path = self.request_path(size);

        let stream = tokio::net::TcpStream::connect(&address)
            .await
            .with_context(|| format!("connecting to discovery service {address}"))?;
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| Error::with_source(ErrorKind::Provider, "discovery handshake failed", e))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "discovery connection closed");
            }
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(path.as_str())
            .header("host", address.as_str())
            .header("user-agent", "quark/0.1")
            .body(Empty::<Bytes>::new())
            .map_err(|e| Error::with_source(ErrorKind::Internal, "building discovery request", e))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| Error::with_source(ErrorKind::Provider, "discovery request failed", e))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::with_source(ErrorKind::Provider, "reading discovery response", e))?
            .to_bytes();
        let body = String::from_utf8_lossy(&body).trim().to_string();

        if !status.is_success() {
            return Err(Error::provider(format!(
                "discovery service returned {status}: {body}"
            )));
        }
        if body.is_empty() {
            return Err(Error::provider("discovery service returned an empty url"));
        }
        Ok(body)
    }
}

#[async_trait]
impl DiscoveryService for HttpDiscovery {
    async fn new_discovery_url(&self, ctx: &OpContext, size: u32) -> Result<String> {
        let url = ctx
            .run("discovery", self.fetch(size))
            .await
            .with_context(|| format!("requesting discovery url from {}", self.endpoint))?;
        info!(%url, size, "etcd discovery url issued");
        Ok(url)
    }
}

/// Hands out a pre-issued discovery URL.
pub struct StaticDiscovery {
    url: String,
}

impl StaticDiscovery {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl DiscoveryService for StaticDiscovery {
    async fn new_discovery_url(&self, _ctx: &OpContext, _size: u32) -> Result<String> {
        Ok(self.url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned response and hand back the request head.
    async fn serve_once(status: &str, body: &str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&head).to_string()
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn fetches_new_token() {
        let (endpoint, server) = serve_once("200 OK", "https://discovery.etcd.io/abc123\n").await;
        let discovery = HttpDiscovery::new(&endpoint).unwrap();
        let url = discovery
            .new_discovery_url(&OpContext::new(), 3)
            .await
            .unwrap();
        assert_eq!(url, "https://discovery.etcd.io/abc123");
        let head = server.await.unwrap();
        assert!(head.starts_with("GET /new?size=3 HTTP/1.1\r\n"), "{head}");
    }

    #[tokio::test]
    async fn non_success_is_provider_error() {
        let (endpoint, _server) = serve_once("503 Service Unavailable", "busy").await;
        let err = HttpDiscovery::new(&endpoint)
            .unwrap()
            .new_discovery_url(&OpContext::new(), 3)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Provider);
    }

    #[test]
    fn only_plain_http_endpoints() {
        assert!(HttpDiscovery::new("https://discovery.etcd.io").is_err());
        assert!(HttpDiscovery::new("not a uri").is_err());
        let d = HttpDiscovery::new("http://discovery.local:8087/v2/").unwrap();
        assert_eq!(d.address(), "discovery.local:8087");
        assert_eq!(d.request_path(5), "/v2/new?size=5");
    }
}

//! Liveness probes.

use std::future::Future;

use axum::body::Body;
use axum::http::{header, Method, Request, Uri};
use futures_util::future::BoxFuture;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::error::OperationError;

/// A cheap liveness check for one provider.
///
/// Any async closure returning `Result<(), OperationError>` is a probe.
pub trait HealthProbe: Send + Sync {
    fn probe(&self) -> BoxFuture<'_, Result<(), OperationError>>;
}

impl<F, Fut> HealthProbe for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), OperationError>> + Send + 'static,
{
    fn probe(&self) -> BoxFuture<'_, Result<(), OperationError>> {
        Box::pin(self())
    }
}

/// Probe issuing `GET <url>`; healthy on any 2xx.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    uri: Uri,
    client: Client<HttpConnector, Body>,
}

impl HttpProbe {
    /// Only plain `http://` URLs are accepted.
    pub fn new(url: &str) -> Result<Self, OperationError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| OperationError::fatal(format!("invalid probe url '{}': {}", url, e)))?;
        if parsed.scheme() != "http" {
            return Err(OperationError::fatal(format!(
                "unsupported probe scheme '{}'",
                parsed.scheme()
            )));
        }
        let uri = parsed
            .as_str()
            .parse::<Uri>()
            .map_err(|e| OperationError::fatal(format!("invalid probe url '{}': {}", url, e)))?;

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Ok(Self { uri, client })
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    async fn check(&self) -> Result<(), OperationError> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(self.uri.clone())
            .header(header::USER_AGENT, "resilient-dispatch-health-probe")
            .body(Body::empty())
            .map_err(|e| OperationError::fatal(e.to_string()))?;

        match self.client.request(request).await {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => Err(OperationError::status(
                response.status().as_u16(),
                format!("health probe {} answered {}", self.uri, response.status()),
            )),
            Err(e) if e.is_connect() => Err(OperationError::transport(e.to_string())),
            Err(e) => Err(OperationError::opaque(e.to_string())),
        }
    }
}

impl HealthProbe for HttpProbe {
    fn probe(&self) -> BoxFuture<'_, Result<(), OperationError>> {
        Box::pin(self.check())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use axum::{http::StatusCode, routing::get, Router};
    use tokio::net::TcpListener;

    async fn spawn_upstream() -> std::net::SocketAddr {
        let app = Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/down", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[test]
    fn test_rejects_unsupported_urls() {
        assert!(HttpProbe::new("not a url").is_err());
        assert!(HttpProbe::new("https://example.com/health").is_err());
        assert!(HttpProbe::new("http://127.0.0.1:9000/health").is_ok());
    }

    #[tokio::test]
    async fn test_success_and_status_failure() {
        let addr = spawn_upstream().await;

        let up = HttpProbe::new(&format!("http://{}/health", addr)).unwrap();
        assert!(up.probe().await.is_ok());

        let down = HttpProbe::new(&format!("http://{}/down", addr)).unwrap();
        let err = down.probe().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Status(503));
    }

    #[tokio::test]
    async fn test_refused_connection_is_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = HttpProbe::new(&format!("http://{}/health", addr)).unwrap();
        let err = probe.probe().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_closure_probe() {
        let probe = || async { Err::<(), _>(OperationError::transport("no route")) };
        assert!(probe.probe().await.is_err());
    }
}

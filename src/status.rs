// Status server: identity plus a request counter on GET /

use crate::metrics;
use crate::server::{self, ConnectionLimits, Handler, ServeError};
use anyhow::Result;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, USER_AGENT};
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::net::TcpListener;

/// Workload identity, read from the environment once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub node_name: String,
    pub pod_name: String,
    pub pod_ip: String,
    pub namespace: String,
    pub service_account: String,
}

impl Identity {
    pub fn from_env<F>(env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| env(key).unwrap_or_default();

        Identity {
            node_name: var("NODE_NAME"),
            pod_name: var("POD_NAME"),
            pod_ip: var("POD_IP"),
            namespace: var("NAMESPACE"),
            service_account: var("SERVICE_ACCOUNT"),
        }
    }
}

/// The JSON payload served on `/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub version: String,
    #[serde(flatten)]
    pub identity: Identity,
    pub count: u64,
}

/// Identity plus the request counter. Only the counter is mutable, so only
/// the counter sits behind the lock.
#[derive(Debug)]
pub struct StatusRecord {
    version: String,
    identity: Identity,
    count: Mutex<u64>,
}

impl StatusRecord {
    pub fn new(version: impl Into<String>, identity: Identity) -> Self {
        StatusRecord {
            version: version.into(),
            identity,
            count: Mutex::new(0),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Count one request and copy out the record as of that increment.
    pub fn hit(&self) -> Status {
        let count = {
            // Poison is ignored: the only write under this lock is the increment.
            let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
            *count += 1;
            *count
        };

        self.status(count)
    }

    /// Current state without counting.
    pub fn snapshot(&self) -> Status {
        let count = *self.count.lock().unwrap_or_else(PoisonError::into_inner);
        self.status(count)
    }

    fn status(&self, count: u64) -> Status {
        Status {
            version: self.version.clone(),
            identity: self.identity.clone(),
            count,
        }
    }
}

/// Routes a single request. Only `GET /` is defined.
pub fn respond<B>(record: &StatusRecord, req: &Request<B>) -> Response<Full<Bytes>> {
    if req.method() != Method::GET || req.uri().path() != "/" {
        return server::not_found();
    }

    let status = record.hit();

    match serde_json::to_vec(&status) {
        Ok(body) => server::response(
            StatusCode::OK,
            HeaderValue::from_static("application/json; charset=utf-8"),
            body,
        ),
        Err(e) => {
            tracing::error!(error = %e, count = status.count, "Failed to encode status");
            server::response(
                StatusCode::INTERNAL_SERVER_ERROR,
                HeaderValue::from_static("text/plain; charset=utf-8"),
                "internal server error",
            )
        }
    }
}

/// `respond` plus the access log line and request metrics.
pub fn handle<B>(record: &StatusRecord, req: &Request<B>, peer: SocketAddr) -> Response<Full<Bytes>> {
    let started = Instant::now();
    let response = respond(record, req);
    let latency = started.elapsed();

    let path = req.uri().path();
    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    tracing::info!(
        status = response.status().as_u16(),
        method = %req.method(),
        path = %path,
        query = req.uri().query().unwrap_or(""),
        ip = %peer.ip(),
        user_agent = %user_agent,
        latency = ?latency,
        "{}",
        path
    );

    metrics::observe_request(req.method().as_str(), response.status().as_u16(), latency);

    response
}

pub struct StatusServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    record: Arc<StatusRecord>,
}

impl StatusServer {
    pub async fn bind(ip: &str, port: &str, record: Arc<StatusRecord>) -> Result<Self, ServeError> {
        let (listener, local_addr) = server::bind(ip, port).await?;

        tracing::info!(
            kind = "startup",
            ip = %ip,
            port = %port,
            address = %local_addr,
            version = %record.version(),
            "Starting Ok Server"
        );

        Ok(StatusServer {
            listener,
            local_addr,
            record,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn run(self) -> Result<()> {
        let record = self.record;
        let handler: Handler = Arc::new(move |req: &Request<Incoming>, peer: SocketAddr| {
            handle(&record, req, peer)
        });

        server::serve(self.listener, ConnectionLimits::default(), handler).await
    }

    /// Bind then serve; returns only on failure.
    pub async fn start(ip: &str, port: &str, record: Arc<StatusRecord>) -> Result<()> {
        Self::bind(ip, port, record).await?.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> StatusRecord {
        StatusRecord::new(
            "1.2.3",
            Identity {
                node_name: "n1".to_string(),
                pod_name: "p1".to_string(),
                ..Identity::default()
            },
        )
    }

    #[test]
    fn test_get_root_counts_and_returns_json() {
        let record = record();
        let req = Request::get("/").body(()).unwrap();

        let response = respond(&record, &req);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[hyper::header::CONTENT_TYPE],
            "application/json; charset=utf-8"
        );
        assert_eq!(record.snapshot().count, 1);
    }

    #[test]
    fn test_other_paths_and_methods_are_not_found() {
        let record = record();

        let post = Request::post("/").body(()).unwrap();
        let other = Request::get("/healthz").body(()).unwrap();

        assert_eq!(respond(&record, &post).status(), StatusCode::NOT_FOUND);
        assert_eq!(respond(&record, &other).status(), StatusCode::NOT_FOUND);
        assert_eq!(record.snapshot().count, 0);
    }

    #[test]
    fn test_version_is_read_without_counting() {
        let record = record();
        assert_eq!(record.version(), "1.2.3");
        assert_eq!(record.snapshot().count, 0);
        assert_eq!(record.hit().version, "1.2.3");
    }

    #[test]
    fn test_json_field_order() {
        let record = record();
        let body = serde_json::to_string(&record.hit()).unwrap();
        assert_eq!(
            body,
            r#"{"version":"1.2.3","node_name":"n1","pod_name":"p1","pod_ip":"","namespace":"","service_account":"","count":1}"#
        );
    }
}

// Prometheus metrics and the /metrics listener
// Everything lives in the prometheus default registry, which also carries
// the process collector on Linux.

use crate::server::{self, ConnectionLimits, Handler, ServeError};
use anyhow::{Context, Result};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::HeaderValue;
use hyper::{Request, Response, StatusCode};
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, IntCounterVec, IntGaugeVec, TEXT_FORMAT, TextEncoder, register_histogram,
    register_int_counter_vec, register_int_gauge_vec,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub const METRICS_PATH: &str = "/metrics";

pub static BUILD_INFO: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "ok_build_info",
        "Build information of the running ok server",
        &["version"]
    )
    .expect("ok_build_info is registered once")
});

pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "ok_http_requests_total",
        "Requests handled by the status server",
        &["method", "code"]
    )
    .expect("ok_http_requests_total is registered once")
});

pub static HTTP_REQUEST_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "ok_http_request_duration_seconds",
        "Time spent handling a status server request",
        vec![0.0001, 0.00025, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1]
    )
    .expect("ok_http_request_duration_seconds is registered once")
});

/// Register the service metrics so they are scrapeable before any traffic.
pub fn init(version: &str) {
    BUILD_INFO.with_label_values(&[version]).set(1);
    Lazy::force(&HTTP_REQUESTS_TOTAL);
    Lazy::force(&HTTP_REQUEST_DURATION);
}

pub fn observe_request(method: &str, code: u16, latency: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, code.to_string().as_str()])
        .inc();
    HTTP_REQUEST_DURATION.observe(latency.as_secs_f64());
}

/// Encode every registered family in the text exposition format.
pub fn render() -> Result<Vec<u8>> {
    let families = prometheus::gather();
    let mut buffer = Vec::new();

    TextEncoder::new()
        .encode(&families, &mut buffer)
        .context("Failed to encode metrics")?;

    Ok(buffer)
}

pub fn respond<B>(req: &Request<B>) -> Response<Full<Bytes>> {
    if req.uri().path() != METRICS_PATH {
        return server::not_found();
    }

    match render() {
        Ok(body) => server::response(StatusCode::OK, HeaderValue::from_static(TEXT_FORMAT), body),
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Metrics scrape failed");
            server::response(
                StatusCode::INTERNAL_SERVER_ERROR,
                HeaderValue::from_static("text/plain; charset=utf-8"),
                "failed to encode metrics",
            )
        }
    }
}

pub struct MetricsServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl MetricsServer {
    pub async fn bind(ip: &str, port: &str) -> Result<Self, ServeError> {
        let (listener, local_addr) = server::bind(ip, port).await?;

        tracing::info!(
            kind = "metrics_startup",
            ip = %ip,
            port = %port,
            address = %local_addr,
            path = METRICS_PATH,
            "Starting Ok Metrics Server"
        );

        Ok(MetricsServer {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn run(self) -> Result<()> {
        let handler: Handler =
            Arc::new(|req: &Request<Incoming>, _peer: SocketAddr| respond(req));

        server::serve(self.listener, ConnectionLimits::default(), handler).await
    }

    /// Bind then serve; returns only on failure.
    pub async fn start(ip: &str, port: &str) -> Result<()> {
        Self::bind(ip, port).await?.run().await
    }
}

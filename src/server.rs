// HTTP/1.1 serving shared by the status and metrics listeners
// One spawned task per accepted connection, each wrapped in stall timeouts

use crate::io::TimedStream;
use anyhow::Result;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

pub const READ_TIMEOUT: Duration = Duration::from_secs(10);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_HEADER_BYTES: usize = 1 << 20;

// hyper refuses read buffers smaller than this.
const MIN_BUF_SIZE: usize = 8192;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Synchronous request handler; the peer address feeds access logging.
pub type Handler = Arc<dyn Fn(&Request<Incoming>, SocketAddr) -> Response<Full<Bytes>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),

    #[error("failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),
}

/// Per-connection resource bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub max_header_bytes: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        ConnectionLimits {
            read_timeout: READ_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
            max_header_bytes: MAX_HEADER_BYTES,
        }
    }
}

/// Claim `ip:port`. Malformed values surface here, not during configuration.
pub async fn bind(ip: &str, port: &str) -> Result<(TcpListener, SocketAddr), ServeError> {
    let address = format!("{}:{}", ip, port);

    let bound = TcpListener::bind(&address).await;
    let listener = bound.map_err(|source| ServeError::Bind { address, source })?;
    let local_addr = listener.local_addr().map_err(ServeError::LocalAddr)?;

    Ok((listener, local_addr))
}

/// Accept loop. Transient accept errors are retried; any other accept error
/// ends the loop and is returned to the caller as fatal.
pub async fn serve(listener: TcpListener, limits: ConnectionLimits, handler: Handler) -> Result<()> {
    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(limits.read_timeout)
        .max_buf_size(limits.max_header_bytes.max(MIN_BUF_SIZE));

    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                tracing::debug!(peer = %peer_addr, "Connection accepted");

                let builder = builder.clone();
                let handler = Arc::clone(&handler);

                tokio::spawn(handle_connection(stream, peer_addr, builder, limits, handler));
            }
            Err(e) if is_transient_accept_error(&e) => {
                tracing::error!(error = %e, "Failed to accept connection");
                // Give in-flight connections a moment to release descriptors.
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
            Err(e) => return Err(ServeError::Accept(e).into()),
        }
    }
}

// EMFILE and ENFILE share these values on Linux, macOS and the BSDs.
const ENFILE: i32 = 23;
const EMFILE: i32 = 24;

/// Errors the listener recovers from: an aborted handshake or descriptor/memory pressure.
pub fn is_transient_accept_error(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
            | ErrorKind::OutOfMemory
    ) || matches!(e.raw_os_error(), Some(ENFILE) | Some(EMFILE))
}

#[tracing::instrument(skip_all, fields(trace_id = %Uuid::new_v4(), peer = %peer_addr))]
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    builder: http1::Builder,
    limits: ConnectionLimits,
    handler: Handler,
) {
    let io = TokioIo::new(TimedStream::new(
        stream,
        limits.read_timeout,
        limits.write_timeout,
    ));

    let service = service_fn(move |req: Request<Incoming>| {
        std::future::ready(Ok::<_, Infallible>(handler(&req, peer_addr)))
    });

    if let Err(e) = builder.serve_connection(io, service).await {
        tracing::debug!(error = %e, "Connection closed with error");
    }
}

pub fn response(
    status: StatusCode,
    content_type: HeaderValue,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, content_type);
    response
}

pub fn not_found() -> Response<Full<Bytes>> {
    response(
        StatusCode::NOT_FOUND,
        HeaderValue::from_static("text/plain; charset=utf-8"),
        "404 page not found",
    )
}

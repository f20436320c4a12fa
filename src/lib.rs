// Library exports for the Ok status server
// Makes modules accessible to tests and the binary

pub mod config;
pub mod io;
pub mod logger;
pub mod metrics;
pub mod server;
pub mod status;

/// Reported in every status response. Override at build time with `OK_VERSION`.
pub const VERSION: &str = match option_env!("OK_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};

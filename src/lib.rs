//! portkeeper (lib.rs)
//!
//! Keeps a UPnP-IGD port mapping open for a peer-to-peer process: finds the
//! gateway over SSDP, maps the port with SOAP, renews it on a fixed schedule
//! and removes it again on shutdown.
//!
//! ```no_run
//! # async fn run() -> portkeeper::NatResult<()> {
//! let mapper = portkeeper::open_port(portkeeper::Protocol::Tcp, 4000)?;
//! // ... serve peers ...
//! mapper.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod nat;

// Re-export main types
pub use nat::{
    ActiveMapping,
    CleanupOutcome,
    ControlEndpoint,
    MapperState,
    MappingRequest,
    PortMapConfig,
    PortMapper,
    PortMapperHandle,
    Protocol,
};

// Re-export error types
pub use nat::error::{NatError, NatResult};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Forward `port` for `protocol` on the local gateway until shutdown.
///
/// Returns as soon as the background task is running; discovery and mapping
/// failures are logged and retried every renewal interval, never returned.
/// Call [`PortMapperHandle::shutdown`] before exiting to remove the mapping.
pub fn open_port(protocol: Protocol, port: u16) -> NatResult<PortMapperHandle> {
    if port == 0 {
        return Err(NatError::Configuration("port 0 cannot be forwarded".to_string()));
    }
    Ok(PortMapper::new()?.start(protocol, port))
}

/// Completes on Ctrl-C or, on unix, SIGTERM.
///
/// The SIGTERM handler is installed before this returns, so a signal that
/// arrives before the future is first polled is not lost.
pub fn shutdown_signal() -> std::io::Result<impl std::future::Future<Output = ()>> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    Ok(async move {
        #[cfg(unix)]
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }

        #[cfg(not(unix))]
        let _ = tokio::signal::ctrl_c().await;
    })
}

/// Initialize logging system
///
/// # Arguments
/// * `level` - Log level (trace/debug/info/warn/error), overridden by `RUST_LOG`
pub fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
        // Reduce verbosity of some dependencies
        .add_directive("tokio=warn".parse().expect("static directive"))
        .add_directive("hyper=warn".parse().expect("static directive"))
        .add_directive("reqwest=warn".parse().expect("static directive"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
        )
        .with(filter)
        .init();
}

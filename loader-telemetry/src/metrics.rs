use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::{info, trace};

/// Interval of the background upkeep that bounds histogram memory.
const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

// A mutex instead of a `OnceLock` because installation is fallible and
// `OnceLock::get_or_try_init` is unstable. Installing a second global recorder
// fails, and tests may ask for a handle more than once.
static PROMETHEUS_HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Installs a global Prometheus recorder and returns a handle for rendering.
///
/// Safe to call repeatedly: later calls return clones of the first handle. Must
/// be called from within a tokio runtime, which runs the periodic upkeep.
pub fn init_metrics_handle() -> Result<PrometheusHandle, BuildError> {
    let mut prometheus_handle = PROMETHEUS_HANDLE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(handle) = &*prometheus_handle {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    *prometheus_handle = Some(handle.clone());

    let upkeep_handle = handle.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(UPKEEP_INTERVAL).await;
            trace!("running metrics upkeep");
            upkeep_handle.run_upkeep();
        }
    });

    Ok(handle)
}

/// Installs a global Prometheus recorder that serves `/metrics` on `listen_addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(listen_addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(listen_addr)
        .install()?;

    info!(%listen_addr, "serving prometheus metrics");

    Ok(())
}

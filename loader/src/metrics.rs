use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};

static REGISTER_METRICS: Once = Once::new();

pub const LOADER_LOADS_TOTAL: &str = "loader_loads_total";
pub const LOADER_ROWS_LOADED_TOTAL: &str = "loader_rows_loaded_total";
pub const LOADER_LOAD_DURATION_SECONDS: &str = "loader_load_duration_seconds";
pub const LOADER_CLEANUP_FAILURES_TOTAL: &str = "loader_cleanup_failures_total";
pub const KIND: &str = "kind";
pub const OUTCOME: &str = "outcome";
pub const STRATEGY: &str = "strategy";
pub const SUCCESS: &str = "success";
pub const FAILURE: &str = "failure";

/// Register metrics emitted by the loader. It is safe to call this method
/// multiple times, the metrics are described only once.
pub(crate) fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_counter!(
            LOADER_LOADS_TOTAL,
            Unit::Count,
            "Total number of load calls, labeled by destination kind and outcome"
        );

        describe_counter!(
            LOADER_ROWS_LOADED_TOTAL,
            Unit::Count,
            "Total number of rows reported as loaded by destinations"
        );

        describe_histogram!(
            LOADER_LOAD_DURATION_SECONDS,
            Unit::Seconds,
            "Time taken in seconds to stage and bulk load a source"
        );

        describe_counter!(
            LOADER_CLEANUP_FAILURES_TOTAL,
            Unit::Count,
            "Staged artifacts that could not be deleted after a load"
        );
    });
}

use lazy_static::lazy_static;
pub use prometheus::{HistogramTimer, HistogramVec, IntCounterVec, Result};
use prometheus::{HistogramOpts, Opts};

pub const HIT: &str = "hit";
pub const MISS: &str = "miss";
pub const ERROR: &str = "error";

lazy_static! {
    pub static ref ENGINE_REQUEST_TIMES: Result<HistogramVec> = try_create_histogram_vec(
        "engine_request_times",
        "Duration of JSON-RPC calls to the execution client",
        &["method"]
    );
    pub static ref ENGINE_HEADER_CACHE: Result<IntCounterVec> = try_create_int_counter_vec(
        "engine_header_cache_events_total",
        "Execution header cache hits and misses",
        &["event"]
    );
    pub static ref ENGINE_PAYLOAD_ID_CACHE: Result<IntCounterVec> = try_create_int_counter_vec(
        "engine_payload_id_cache_events_total",
        "Payload id lookups when retrieving a built payload",
        &["event"]
    );
    pub static ref ENGINE_FORKCHOICE_UPDATED: Result<IntCounterVec> = try_create_int_counter_vec(
        "engine_forkchoice_updated_total",
        "Statuses returned for forkchoice updates",
        &["status"]
    );
    pub static ref ENGINE_NEW_PAYLOAD: Result<IntCounterVec> = try_create_int_counter_vec(
        "engine_new_payload_total",
        "Statuses returned for new payload calls",
        &["status"]
    );
    pub static ref ENGINE_CLIENT_VERSION: Result<IntCounterVec> = try_create_int_counter_vec(
        "engine_client_version_reported_total",
        "Client versions reported by the execution client",
        &["code", "name", "version"]
    );
    pub static ref ENGINE_JWT_REFRESH: Result<IntCounterVec> = try_create_int_counter_vec(
        "engine_jwt_refresh_total",
        "Outcomes of signing a new engine API token",
        &["result"]
    );
}

/// Attempts to create an `IntCounterVec`, returning `Err` if the registry does not accept the
/// counter (potentially due to naming conflict).
pub fn try_create_int_counter_vec(
    name: &str,
    help: &str,
    label_names: &[&str],
) -> Result<IntCounterVec> {
    let counter_vec = IntCounterVec::new(Opts::new(name, help), label_names)?;
    prometheus::register(Box::new(counter_vec.clone()))?;
    Ok(counter_vec)
}

pub fn try_create_histogram_vec(
    name: &str,
    help: &str,
    label_names: &[&str],
) -> Result<HistogramVec> {
    let histogram_vec = HistogramVec::new(HistogramOpts::new(name, help), label_names)?;
    prometheus::register(Box::new(histogram_vec.clone()))?;
    Ok(histogram_vec)
}

pub fn inc_counter_vec(int_counter_vec: &Result<IntCounterVec>, name: &[&str]) {
    if let Ok(counter_vec) = int_counter_vec {
        if let Ok(counter) = counter_vec.get_metric_with_label_values(name) {
            counter.inc();
        }
    }
}

pub fn get_int_counter_vec_value(int_counter_vec: &Result<IntCounterVec>, name: &[&str]) -> u64 {
    int_counter_vec
        .as_ref()
        .ok()
        .and_then(|counter_vec| counter_vec.get_metric_with_label_values(name).ok())
        .map_or(0, |counter| counter.get())
}

pub fn start_timer_vec(vec: &Result<HistogramVec>, name: &[&str]) -> Option<HistogramTimer> {
    vec.as_ref()
        .ok()
        .and_then(|vec| vec.get_metric_with_label_values(name).ok())
        .map(|histogram| histogram.start_timer())
}

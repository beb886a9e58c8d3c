//! Metrics for observability
//!
//! Emits through the `metrics` facade; installing an exporter is left to
//! the embedding application.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

pub const OPS_CAPTURED: &str = "oplog.ops.captured";
pub const OPS_SKIPPED_INVALID: &str = "oplog.ops.skipped_invalid";
pub const HYDRATION_OPS_APPLIED: &str = "oplog.hydration.ops_applied";
pub const HYDRATION_DURATION_MS: &str = "oplog.hydration.duration_ms";
pub const LWW_APPLIED: &str = "oplog.lww.applied";
pub const LWW_RECREATED: &str = "oplog.lww.recreated";
pub const LWW_REJECTED: &str = "oplog.lww.rejected";
pub const CRYPTO_ENCRYPT_TOTAL: &str = "crypto.encrypt.total";
pub const CRYPTO_DECRYPT_TOTAL: &str = "crypto.decrypt.total";
pub const CRYPTO_DECRYPT_LEGACY: &str = "crypto.decrypt.legacy_fallback";
pub const KEY_ROTATION_OUTCOME: &str = "sync.key_rotation.outcome";

/// Initialize metrics with descriptions
pub fn init_metrics() {
    // Operation log
    describe_counter!(OPS_CAPTURED, "Local operations written to the log");
    describe_counter!(OPS_SKIPPED_INVALID, "Local operations dropped by payload validation");
    describe_counter!(HYDRATION_OPS_APPLIED, "Operations folded into state by bulk hydration");
    describe_histogram!(HYDRATION_DURATION_MS, "Bulk hydration duration in milliseconds");

    // Conflict resolution
    describe_counter!(LWW_APPLIED, "LWW updates applied to an existing entity");
    describe_counter!(LWW_RECREATED, "LWW updates that recreated a missing entity");
    describe_counter!(LWW_REJECTED, "LWW updates dropped for a missing id or unknown type");

    // Crypto
    describe_counter!(CRYPTO_ENCRYPT_TOTAL, "Payload encryptions");
    describe_counter!(CRYPTO_DECRYPT_TOTAL, "Payload decryptions");
    describe_counter!(CRYPTO_DECRYPT_LEGACY, "Decryptions that needed the legacy key derivation");

    // Sync
    describe_counter!(KEY_ROTATION_OUTCOME, "Key rotation terminal outcomes by label");
}

/// Record a counter metric
pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

/// Record a counter metric with an `outcome` label
pub fn record_outcome(name: &'static str, outcome: &'static str) {
    counter!(name, "outcome" => outcome).increment(1);
}

/// Record a histogram metric
pub fn record_histogram(name: &'static str, value: f64) {
    histogram!(name).record(value);
}

/// Timer for measuring operation duration
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    /// Create a new timer
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    /// Stop the timer and record the duration in milliseconds
    pub fn stop(self) -> f64 {
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        histogram!(self.name).record(elapsed_ms);
        elapsed_ms
    }
}

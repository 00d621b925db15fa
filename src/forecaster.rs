// Copyright 2026 Build Acceleration Team.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The external latency forecaster: a percentile estimate of historical
//! remote-download latency for actions sharing a label fingerprint. Only the interface the
//! race coordinator consumes is in scope here; the forecasting model itself is a collaborator.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::command::ActionFingerprint;

#[async_trait]
pub trait Forecaster: Send + Sync {
    /// The `p`-th percentile download latency over historical remote-cache-hit actions
    /// matching `fingerprint`'s labels. Errors (including "insufficient data") are reported so
    /// the caller can fall back to `max_holdoff`; they are not a reason to panic or retry.
    async fn percentile_download_latency(
        &self,
        fingerprint: &ActionFingerprint,
        percentile: u8,
    ) -> Result<Duration, String>;
}

/// A forecaster that always returns the same duration. Useful for tests and for the first
/// build of a cold daemon where no history exists yet.
pub struct FixedForecaster(pub Duration);

#[async_trait]
impl Forecaster for FixedForecaster {
    async fn percentile_download_latency(
        &self,
        _fingerprint: &ActionFingerprint,
        _percentile: u8,
    ) -> Result<Duration, String> {
        Ok(self.0)
    }
}

/// A forecaster backed by a rolling window of observed download latencies, keyed by
/// fingerprint label key. This is left unspecified beyond the interface;
/// `original_source` shows the real forecaster is fed by completed cache-hit actions, so this
/// in-memory percentile estimator is the supplemented implementation (see DESIGN.md).
#[derive(Default)]
pub struct HistogramForecaster {
    samples: Mutex<HashMap<String, Vec<Duration>>>,
    min_samples: usize,
    max_samples_per_key: usize,
}

impl HistogramForecaster {
    pub fn new() -> Self {
        HistogramForecaster {
            samples: Mutex::new(HashMap::new()),
            min_samples: 5,
            max_samples_per_key: 1000,
        }
    }

    pub fn record(&self, fingerprint: &ActionFingerprint, latency: Duration) {
        let mut samples = self.samples.lock();
        let bucket = samples.entry(fingerprint.key()).or_default();
        bucket.push(latency);
        if bucket.len() > self.max_samples_per_key {
            bucket.remove(0);
        }
    }
}

#[async_trait]
impl Forecaster for HistogramForecaster {
    async fn percentile_download_latency(
        &self,
        fingerprint: &ActionFingerprint,
        percentile: u8,
    ) -> Result<Duration, String> {
        let samples = self.samples.lock();
        let bucket = samples
            .get(&fingerprint.key())
            .ok_or_else(|| format!("no samples for fingerprint {}", fingerprint.key()))?;
        if bucket.len() < self.min_samples {
            return Err(format!(
                "insufficient data: {} samples, need at least {}",
                bucket.len(),
                self.min_samples
            ));
        }
        let mut sorted = bucket.clone();
        sorted.sort();
        let idx = ((percentile as usize) * (sorted.len() - 1)) / 100;
        Ok(sorted[idx])
    }
}

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Process-wide model telemetry: load state plus coarse inference counters.
///
/// Counters are approximate by design; concurrent chat requests may interleave
/// updates and no cross-field consistency is promised.
#[derive(Default)]
pub struct ModelStatus {
    inner: RwLock<StatusInner>,
}

#[derive(Debug, Clone, Default)]
struct StatusInner {
    loaded: bool,
    loading: bool,
    last_inference_time: Option<DateTime<Utc>>,
    inference_count: u64,
    last_inference_duration: Option<f64>,
    error: Option<String>,
}

/// Read-only snapshot served by `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub model_loaded: bool,
    pub model_loading: bool,
    pub last_inference_time: Option<DateTime<Utc>>,
    pub inference_count: u64,
    pub last_inference_duration: Option<f64>,
    pub error: Option<String>,
}

impl ModelStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_loading(&self) {
        let mut inner = self.write();
        inner.loading = true;
    }

    pub fn set_loaded(&self) {
        let mut inner = self.write();
        inner.loaded = true;
        inner.loading = false;
    }

    /// Record a fatal load failure; the feature stays unavailable for the
    /// process lifetime.
    pub fn set_load_error(&self, error: String) {
        let mut inner = self.write();
        inner.loading = false;
        inner.error = Some(error);
    }

    pub fn is_loaded(&self) -> bool {
        self.read().loaded
    }

    pub fn mark_inference_started(&self) {
        let mut inner = self.write();
        inner.last_inference_time = Some(Utc::now());
    }

    pub fn record_inference(&self, duration: Duration) {
        let mut inner = self.write();
        inner.inference_count += 1;
        inner.last_inference_duration = Some(duration.as_secs_f64());
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let inner = self.read();
        StatusSnapshot {
            model_loaded: inner.loaded,
            model_loading: inner.loading,
            last_inference_time: inner.last_inference_time,
            inference_count: inner.inference_count,
            last_inference_duration: inner.last_inference_duration,
            error: inner.error.clone(),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StatusInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StatusInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_lifecycle() {
        let status = ModelStatus::new();
        assert!(!status.is_loaded());

        status.set_loading();
        assert!(status.snapshot().model_loading);

        status.set_loaded();
        let snapshot = status.snapshot();
        assert!(snapshot.model_loaded);
        assert!(!snapshot.model_loading);
        assert!(snapshot.error.is_none());
    }

    #[test]
    fn test_load_error_keeps_model_unloaded() {
        let status = ModelStatus::new();
        status.set_loading();
        status.set_load_error("missing weights".to_string());

        let snapshot = status.snapshot();
        assert!(!snapshot.model_loaded);
        assert!(!snapshot.model_loading);
        assert_eq!(snapshot.error.as_deref(), Some("missing weights"));
    }

    #[test]
    fn test_inference_counters() {
        let status = ModelStatus::new();
        status.mark_inference_started();
        status.record_inference(Duration::from_millis(1500));
        status.record_inference(Duration::from_millis(500));

        let snapshot = status.snapshot();
        assert_eq!(snapshot.inference_count, 2);
        assert_eq!(snapshot.last_inference_duration, Some(0.5));
        assert!(snapshot.last_inference_time.is_some());
    }
}

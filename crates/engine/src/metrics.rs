use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// In-process counters, exposed as a serializable snapshot.
pub struct Metrics {
    documents_ingested: AtomicUsize,
    documents_failed: AtomicUsize,
    chunks_processed: AtomicUsize,
    chunk_failures: AtomicUsize,
    queries_total: AtomicUsize,
    queries_failed: AtomicUsize,
    resolver_runs: AtomicUsize,
    entities_merged: AtomicUsize,

    total_ingest_time_us: AtomicU64,
    total_query_time_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            documents_ingested: AtomicUsize::new(0),
            documents_failed: AtomicUsize::new(0),
            chunks_processed: AtomicUsize::new(0),
            chunk_failures: AtomicUsize::new(0),
            queries_total: AtomicUsize::new(0),
            queries_failed: AtomicUsize::new(0),
            resolver_runs: AtomicUsize::new(0),
            entities_merged: AtomicUsize::new(0),
            total_ingest_time_us: AtomicU64::new(0),
            total_query_time_us: AtomicU64::new(0),
        })
    }

    pub fn record_ingest(&self, duration: Duration, chunks: usize, failed_chunks: usize) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.chunks_processed.fetch_add(chunks, Ordering::Relaxed);
        self.chunk_failures.fetch_add(failed_chunks, Ordering::Relaxed);
        self.total_ingest_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_ingest_failure(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query(&self, duration: Duration, success: bool) {
        self.queries_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.queries_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_query_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_resolve(&self, merged: usize) {
        self.resolver_runs.fetch_add(1, Ordering::Relaxed);
        self.entities_merged.fetch_add(merged, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let documents = self.documents_ingested.load(Ordering::Relaxed);
        let queries = self.queries_total.load(Ordering::Relaxed);
        MetricsSnapshot {
            documents_ingested: documents,
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            chunks_processed: self.chunks_processed.load(Ordering::Relaxed),
            chunk_failures: self.chunk_failures.load(Ordering::Relaxed),
            queries_total: queries,
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            resolver_runs: self.resolver_runs.load(Ordering::Relaxed),
            entities_merged: self.entities_merged.load(Ordering::Relaxed),
            avg_ingest_time_ms: average_ms(&self.total_ingest_time_us, documents),
            avg_query_time_ms: average_ms(&self.total_query_time_us, queries),
        }
    }
}

fn average_ms(total_us: &AtomicU64, count: usize) -> f64 {
    if count == 0 {
        return 0.0;
    }
    total_us.load(Ordering::Relaxed) as f64 / count as f64 / 1000.0
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub documents_ingested: usize,
    pub documents_failed: usize,
    pub chunks_processed: usize,
    pub chunk_failures: usize,
    pub queries_total: usize,
    pub queries_failed: usize,
    pub resolver_runs: usize,
    pub entities_merged: usize,
    pub avg_ingest_time_ms: f64,
    pub avg_query_time_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_activity() {
        let metrics = Metrics::new();
        metrics.record_ingest(Duration::from_millis(10), 5, 1);
        metrics.record_query(Duration::from_millis(4), true);
        metrics.record_query(Duration::from_millis(6), false);
        metrics.record_resolve(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_ingested, 1);
        assert_eq!(snapshot.chunks_processed, 5);
        assert_eq!(snapshot.chunk_failures, 1);
        assert_eq!(snapshot.queries_total, 2);
        assert_eq!(snapshot.queries_failed, 1);
        assert_eq!(snapshot.entities_merged, 2);
        assert!(snapshot.avg_query_time_ms > 0.0);
    }
}

use enum_map::EnumMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::mem::gc::{GCTask, GCTaskCause};
use crate::util::conversions::bytes_to_formatted_string;

/// Counters describing the collections run so far.
#[derive(Default)]
pub struct GCStats {
    collections: AtomicU64,
    collections_by_cause: EnumMap<GCTaskCause, AtomicU64>,
    total_pause_ns: AtomicU64,
    max_pause_ns: AtomicU64,
    last_pause_ns: AtomicU64,
    last_roots: AtomicUsize,
    last_heap_size_before_gc: AtomicUsize,
    last_heap_size_after_gc: AtomicUsize,
}

impl GCStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_collection(
        &self,
        task: &GCTask,
        pause: Duration,
        roots: usize,
        heap_size_before_gc: usize,
        heap_size: usize,
    ) {
        let pause_ns = u64::try_from(pause.as_nanos()).unwrap_or(u64::MAX);
        self.collections.fetch_add(1, Ordering::Relaxed);
        self.collections_by_cause[task.reason].fetch_add(1, Ordering::Relaxed);
        self.total_pause_ns.fetch_add(pause_ns, Ordering::Relaxed);
        self.max_pause_ns.fetch_max(pause_ns, Ordering::Relaxed);
        self.last_pause_ns.store(pause_ns, Ordering::Relaxed);
        self.last_roots.store(roots, Ordering::Relaxed);
        self.last_heap_size_before_gc
            .store(heap_size_before_gc, Ordering::Relaxed);
        self.last_heap_size_after_gc.store(heap_size, Ordering::Relaxed);
    }

    pub fn get_collections(&self) -> u64 {
        self.collections.load(Ordering::Relaxed)
    }

    pub fn get_collections_by_cause(&self, cause: GCTaskCause) -> u64 {
        self.collections_by_cause[cause].load(Ordering::Relaxed)
    }

    pub fn get_total_pause(&self) -> Duration {
        Duration::from_nanos(self.total_pause_ns.load(Ordering::Relaxed))
    }

    pub fn get_max_pause(&self) -> Duration {
        Duration::from_nanos(self.max_pause_ns.load(Ordering::Relaxed))
    }

    pub fn get_last_pause(&self) -> Duration {
        Duration::from_nanos(self.last_pause_ns.load(Ordering::Relaxed))
    }

    /// Number of distinct roots visited by the last collection.
    pub fn get_last_roots(&self) -> usize {
        self.last_roots.load(Ordering::Relaxed)
    }

    pub fn get_statistics(&self) -> String {
        let mut statistics = String::new();
        let _ = writeln!(
            statistics,
            "collections: {}, total pause {:?}, max pause {:?}",
            self.get_collections(),
            self.get_total_pause(),
            self.get_max_pause()
        );
        for (cause, count) in self.collections_by_cause.iter() {
            let count = count.load(Ordering::Relaxed);
            if count != 0 {
                let _ = writeln!(statistics, "  {}: {}", cause, count);
            }
        }
        let _ = writeln!(
            statistics,
            "last collection: {} roots, heap {} -> {}",
            self.get_last_roots(),
            bytes_to_formatted_string(self.last_heap_size_before_gc.load(Ordering::Relaxed)),
            bytes_to_formatted_string(self.last_heap_size_after_gc.load(Ordering::Relaxed)),
        );
        statistics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_collections() {
        let stats = GCStats::new();
        stats.record_collection(
            &GCTask::new(GCTaskCause::ExplicitCause),
            Duration::from_micros(30),
            5,
            2048,
            2048,
        );
        stats.record_collection(
            &GCTask::new(GCTaskCause::OomCause),
            Duration::from_micros(10),
            3,
            4096,
            1024,
        );
        assert_eq!(stats.get_collections(), 2);
        assert_eq!(stats.get_collections_by_cause(GCTaskCause::OomCause), 1);
        assert_eq!(stats.get_collections_by_cause(GCTaskCause::YoungGcCause), 0);
        assert_eq!(stats.get_total_pause(), Duration::from_micros(40));
        assert_eq!(stats.get_max_pause(), Duration::from_micros(30));
        assert_eq!(stats.get_last_pause(), Duration::from_micros(10));
        assert_eq!(stats.get_last_roots(), 3);

        let text = stats.get_statistics();
        assert!(text.contains("collections: 2"));
        assert!(text.contains("oom-cause: 1"));
        assert!(text.contains("heap 4KiB -> 1KiB"));
    }
}

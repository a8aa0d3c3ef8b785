use downcast_rs::{impl_downcast, Downcast};
use itertools::Itertools;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use strum_macros::{Display, EnumString};

use crate::mem::gc::{GCCollectionType, GCListener, GCTask, GCTaskCause, GC};
use crate::mem::heap_manager::HeapSpace;
use crate::mem::mem_stats::MemStats;
use crate::util::constants::{BYTES_IN_KBYTE, BYTES_IN_MBYTE};
use crate::util::options::Options;

/// The policy selected with the `gc_trigger_type` option.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum GCTriggerType {
    HeapTriggerTest,
    HeapTrigger,
    AdaptiveHeapTrigger,
    TriggerHeapOccupancy,
    NoGcForStartUp,
    Debug,
    DebugNever,
    #[strum(serialize = "pause-time-goal")]
    PauseTimeGoalTrigger,
}

/// Target footprint used by the test heap trigger.
pub const DEFAULT_MIN_TARGET_FOOTPRINT: usize = 256 * BYTES_IN_KBYTE;
/// Growth percentage used by the test heap trigger.
pub const DEFAULT_PERCENTAGE_THRESHOLD: usize = 10;
pub const DEFAULT_MIN_EXTRA_HEAP_SIZE: usize = BYTES_IN_MBYTE;
pub const DEFAULT_MAX_EXTRA_HEAP_SIZE: usize = 8 * BYTES_IN_MBYTE;
/// Number of targets the adaptive trigger remembers.
pub const RECENT_THRESHOLDS_COUNT: usize = 3;

/// The trigger-related subset of the runtime options.
#[derive(Clone, Debug)]
pub struct GCTriggerConfig {
    trigger_type: GCTriggerType,
    debug_start: u64,
    percent_threshold: u32,
    adaptive_multiplier: u32,
    min_extra_heap_size: usize,
    max_extra_heap_size: usize,
    max_trigger_percent: u32,
    skip_startup_gc_count: u32,
    use_nth_alloc_trigger: bool,
}

impl GCTriggerConfig {
    pub fn new(options: &Options) -> Self {
        GCTriggerConfig {
            trigger_type: options.gc_trigger_type,
            debug_start: options.gc_debug_trigger_start,
            percent_threshold: options.gc_trigger_percent_threshold,
            adaptive_multiplier: options.gc_trigger_adaptive_multiplier,
            min_extra_heap_size: options.min_extra_heap_size,
            max_extra_heap_size: options.max_extra_heap_size,
            max_trigger_percent: options.max_trigger_percent,
            skip_startup_gc_count: options.skip_startup_gc_count,
            use_nth_alloc_trigger: options.gc_use_nth_alloc_trigger,
        }
    }

    pub fn get_gc_trigger_type(&self) -> GCTriggerType {
        self.trigger_type
    }

    pub fn get_debug_start(&self) -> u64 {
        self.debug_start
    }

    pub fn get_percent_threshold(&self) -> u32 {
        self.percent_threshold
    }

    pub fn get_adaptive_multiplier(&self) -> u32 {
        self.adaptive_multiplier
    }

    pub fn get_min_extra_heap_size(&self) -> usize {
        self.min_extra_heap_size
    }

    pub fn get_max_extra_heap_size(&self) -> usize {
        self.max_extra_heap_size
    }

    pub fn get_max_trigger_percent(&self) -> u32 {
        self.max_trigger_percent
    }

    pub fn get_skip_startup_gc_count(&self) -> u32 {
        self.skip_startup_gc_count
    }

    pub fn is_use_nth_alloc_trigger(&self) -> bool {
        self.use_nth_alloc_trigger
    }
}

/// GCTrigger decides when a collection is requested. It is polled after every allocation and
/// listens to the collector to learn how the heap changed.
pub struct GCTrigger {
    /// The triggering policy.
    policy: Box<dyn GCTriggerPolicy>,
}

impl GCTrigger {
    pub fn new(mem_stats: Arc<MemStats>, heap_space: Arc<HeapSpace>, config: &GCTriggerConfig) -> Self {
        let min_heap_size = heap_space.init_size();
        let percent_threshold = config.get_percent_threshold() as usize;
        let min_extra = config.get_min_extra_heap_size();
        let max_extra = config.get_max_extra_heap_size();
        let policy: Box<dyn GCTriggerPolicy> = match config.get_gc_trigger_type() {
            GCTriggerType::HeapTriggerTest => Box::new(GCTriggerHeap::new(
                GCTriggerType::HeapTriggerTest,
                mem_stats,
                heap_space,
                DEFAULT_MIN_TARGET_FOOTPRINT,
                DEFAULT_PERCENTAGE_THRESHOLD,
                DEFAULT_MIN_EXTRA_HEAP_SIZE,
                DEFAULT_MAX_EXTRA_HEAP_SIZE,
                0,
            )),
            GCTriggerType::HeapTrigger => Box::new(GCTriggerHeap::new(
                GCTriggerType::HeapTrigger,
                mem_stats,
                heap_space,
                min_heap_size,
                percent_threshold,
                min_extra,
                max_extra,
                0,
            )),
            GCTriggerType::NoGcForStartUp => Box::new(GCTriggerHeap::new(
                GCTriggerType::NoGcForStartUp,
                mem_stats,
                heap_space,
                min_heap_size,
                percent_threshold,
                min_extra,
                max_extra,
                config.get_skip_startup_gc_count(),
            )),
            GCTriggerType::AdaptiveHeapTrigger => Box::new(GCAdaptiveTriggerHeap::new(
                mem_stats,
                heap_space,
                min_heap_size,
                percent_threshold,
                config.get_adaptive_multiplier(),
                min_extra,
                max_extra,
            )),
            GCTriggerType::TriggerHeapOccupancy => Box::new(GCTriggerHeapOccupancy::new(
                mem_stats,
                heap_space,
                config.get_max_trigger_percent(),
            )),
            GCTriggerType::Debug => Box::new(GCTriggerDebug::new(config.get_debug_start())),
            GCTriggerType::DebugNever => Box::new(GCNeverTrigger),
            GCTriggerType::PauseTimeGoalTrigger => Box::new(PauseTimeGoalTrigger::new(
                mem_stats,
                min_heap_size,
                percent_threshold,
                min_extra,
                max_extra,
            )),
        };
        let policy: Box<dyn GCTriggerPolicy> = if config.is_use_nth_alloc_trigger() {
            Box::new(SchedGCOnNthAllocTrigger::new(policy))
        } else {
            policy
        };
        GCTrigger { policy }
    }

    pub fn get_type(&self) -> GCTriggerType {
        self.policy.trigger_type()
    }

    pub fn policy(&self) -> &dyn GCTriggerPolicy {
        &*self.policy
    }

    /// The scheduling wrapper, if the trigger was created with `gc_use_nth_alloc_trigger`.
    pub fn nth_alloc_trigger(&self) -> Option<&SchedGCOnNthAllocTrigger> {
        self.policy.downcast_ref::<SchedGCOnNthAllocTrigger>()
    }

    /// Called after every allocation. Requests a collection if the policy asks for one.
    pub fn trigger_gc_if_needed(&self, gc: &GC) {
        self.policy.trigger_gc_if_needed(gc);
    }
}

impl GCListener for GCTrigger {
    fn gc_started(&self, task: &GCTask, heap_size: usize) {
        self.policy.gc_started(task, heap_size);
    }

    fn gc_finished(&self, task: &GCTask, heap_size_before_gc: usize, heap_size: usize) {
        self.policy.gc_finished(task, heap_size_before_gc, heap_size);
    }
}

/// This trait describes a GC trigger policy. A triggering policy has hooks to be informed about
/// GC start/end so it can collect statistics about GC and allocation, and decides on every
/// allocation whether a collection should be requested.
pub trait GCTriggerPolicy: Downcast + Sync + Send {
    fn trigger_type(&self) -> GCTriggerType;
    /// Inform the triggering policy that a GC starts.
    fn gc_started(&self, _task: &GCTask, _heap_size: usize) {}
    /// Inform the triggering policy that a GC ends.
    fn gc_finished(&self, _task: &GCTask, _heap_size_before_gc: usize, _heap_size: usize) {}
    /// Request a collection from `gc` if one is needed now.
    fn trigger_gc_if_needed(&self, gc: &GC);
}

impl_downcast!(GCTriggerPolicy);

/// Triggers a GC when the heap footprint reaches a target. After every collection the target is
/// set a percentage above the surviving heap size.
pub struct GCTriggerHeap {
    trigger_type: GCTriggerType,
    mem_stats: Arc<MemStats>,
    heap_space: Arc<HeapSpace>,
    target_footprint: AtomicUsize,
    min_target_footprint: usize,
    percent_threshold: usize,
    min_extra_size: usize,
    max_extra_size: usize,
    /// Threshold crossings that are ignored while the runtime starts up.
    skip_gc_count: AtomicU32,
}

impl GCTriggerHeap {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trigger_type: GCTriggerType,
        mem_stats: Arc<MemStats>,
        heap_space: Arc<HeapSpace>,
        min_target_footprint: usize,
        percent_threshold: usize,
        min_extra_size: usize,
        max_extra_size: usize,
        skip_gc_count: u32,
    ) -> Self {
        GCTriggerHeap {
            trigger_type,
            mem_stats,
            heap_space,
            target_footprint: AtomicUsize::new(min_target_footprint),
            min_target_footprint,
            percent_threshold,
            min_extra_size,
            max_extra_size,
            skip_gc_count: AtomicU32::new(skip_gc_count),
        }
    }

    pub fn get_target_footprint(&self) -> usize {
        self.target_footprint.load(Ordering::Relaxed)
    }

    /// The growth allowed on top of `heap_size`.
    fn compute_delta(&self, heap_size_before_gc: usize, heap_size: usize) -> usize {
        let mut delta = heap_size / 100 * self.percent_threshold;
        if heap_size > heap_size_before_gc {
            delta = delta.min(self.max_extra_size);
        } else {
            // If the heap was squeezed from 200MB to 100MB we want a target of 150MB, not just
            // 100MB plus the percentage.
            delta = delta.max((heap_size_before_gc - heap_size) / 2);
        }
        delta.max(self.min_extra_size)
    }

    pub fn compute_target(&self, heap_size_before_gc: usize, heap_size: usize) -> usize {
        let target = heap_size + self.compute_delta(heap_size_before_gc, heap_size);
        target
            .max(self.min_target_footprint)
            .min(self.heap_space.max_size())
    }

    fn set_target(&self, target: usize) {
        debug!("{}: new target footprint {}", self.trigger_type, target);
        self.target_footprint.store(target, Ordering::Relaxed);
    }
}

impl GCTriggerPolicy for GCTriggerHeap {
    fn trigger_type(&self) -> GCTriggerType {
        self.trigger_type
    }

    fn gc_finished(&self, task: &GCTask, heap_size_before_gc: usize, heap_size: usize) {
        if task.reason == GCTaskCause::YoungGcCause {
            return;
        }
        self.set_target(self.compute_target(heap_size_before_gc, heap_size));
    }

    fn trigger_gc_if_needed(&self, gc: &GC) {
        let footprint = self.mem_stats.get_footprint_heap();
        if footprint < self.get_target_footprint() {
            return;
        }
        if self
            .skip_gc_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
        {
            debug!("{}: skipping a startup collection at {}", self.trigger_type, footprint);
            self.set_target(self.compute_target(footprint, footprint));
            return;
        }
        if gc.is_gc_pending() {
            return;
        }
        debug!(
            "{}: footprint {} reached target {}",
            self.trigger_type,
            footprint,
            self.get_target_footprint()
        );
        gc.trigger(GCTask::new(GCTaskCause::HeapUsageThresholdCause));
    }
}

/// A heap trigger that backs off when the recent targets stay in a narrow window, which means
/// collections run too often for the amount of memory they recover.
pub struct GCAdaptiveTriggerHeap {
    heap_trigger: GCTriggerHeap,
    recent_target_thresholds: Mutex<VecDeque<usize>>,
    adaptive_multiplier: u32,
}

impl GCAdaptiveTriggerHeap {
    pub fn new(
        mem_stats: Arc<MemStats>,
        heap_space: Arc<HeapSpace>,
        min_heap_size: usize,
        percent_threshold: usize,
        adaptive_multiplier: u32,
        min_extra_size: usize,
        max_extra_size: usize,
    ) -> Self {
        let heap_trigger = GCTriggerHeap::new(
            GCTriggerType::AdaptiveHeapTrigger,
            mem_stats,
            heap_space,
            min_heap_size,
            percent_threshold,
            min_extra_size,
            max_extra_size,
            0,
        );
        let mut recent = VecDeque::with_capacity(RECENT_THRESHOLDS_COUNT);
        recent.push_back(min_heap_size);
        GCAdaptiveTriggerHeap {
            heap_trigger,
            recent_target_thresholds: Mutex::new(recent),
            adaptive_multiplier,
        }
    }

    pub fn get_target_footprint(&self) -> usize {
        self.heap_trigger.get_target_footprint()
    }

    pub fn compute_target(&self, heap_size_before_gc: usize, heap_size: usize) -> usize {
        let mut recent = self.recent_target_thresholds.lock().unwrap();
        let mut delta = self.heap_trigger.compute_delta(heap_size_before_gc, heap_size);
        if recent.len() == RECENT_THRESHOLDS_COUNT {
            let window = recent
                .iter()
                .minmax()
                .into_option()
                .map_or(0, |(min, max)| max - min);
            // Recent targets are localized in a small window: leave it to avoid collecting too often.
            if window <= self.heap_trigger.max_extra_size {
                delta = delta.saturating_mul(self.adaptive_multiplier as usize);
            }
        }
        let target = (heap_size + delta)
            .max(self.heap_trigger.min_target_footprint)
            .min(self.heap_trigger.heap_space.max_size());
        if recent.len() == RECENT_THRESHOLDS_COUNT {
            recent.pop_front();
        }
        recent.push_back(target);
        target
    }
}

impl GCTriggerPolicy for GCAdaptiveTriggerHeap {
    fn trigger_type(&self) -> GCTriggerType {
        GCTriggerType::AdaptiveHeapTrigger
    }

    fn gc_finished(&self, task: &GCTask, heap_size_before_gc: usize, heap_size: usize) {
        if task.reason == GCTaskCause::YoungGcCause {
            return;
        }
        self.heap_trigger
            .set_target(self.compute_target(heap_size_before_gc, heap_size));
    }

    fn trigger_gc_if_needed(&self, gc: &GC) {
        self.heap_trigger.trigger_gc_if_needed(gc);
    }
}

/// Triggers a GC when the heap is filled to a percentage of its maximum size.
pub struct GCTriggerHeapOccupancy {
    mem_stats: Arc<MemStats>,
    heap_space: Arc<HeapSpace>,
    max_trigger_percent: u32,
}

impl GCTriggerHeapOccupancy {
    pub fn new(mem_stats: Arc<MemStats>, heap_space: Arc<HeapSpace>, max_trigger_percent: u32) -> Self {
        GCTriggerHeapOccupancy {
            mem_stats,
            heap_space,
            max_trigger_percent,
        }
    }

    pub fn get_threshold(&self) -> usize {
        self.heap_space
            .max_size()
            .saturating_mul(self.max_trigger_percent as usize)
            / 100
    }
}

impl GCTriggerPolicy for GCTriggerHeapOccupancy {
    fn trigger_type(&self) -> GCTriggerType {
        GCTriggerType::TriggerHeapOccupancy
    }

    fn trigger_gc_if_needed(&self, gc: &GC) {
        if self.mem_stats.get_footprint_heap() >= self.get_threshold() && !gc.is_gc_pending() {
            gc.trigger(GCTask::new(GCTaskCause::HeapUsageThresholdCause));
        }
    }
}

/// Requests a collection on every allocation once `debug_start` allocations happened.
pub struct GCTriggerDebug {
    debug_start: u64,
    alloc_count: AtomicU64,
}

impl GCTriggerDebug {
    pub fn new(debug_start: u64) -> Self {
        GCTriggerDebug {
            debug_start,
            alloc_count: AtomicU64::new(0),
        }
    }
}

impl GCTriggerPolicy for GCTriggerDebug {
    fn trigger_type(&self) -> GCTriggerType {
        GCTriggerType::Debug
    }

    fn trigger_gc_if_needed(&self, gc: &GC) {
        let count = self.alloc_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= self.debug_start {
            gc.trigger(GCTask::new(GCTaskCause::HeapUsageThresholdCause));
        }
    }
}

/// Never requests a collection.
pub struct GCNeverTrigger;

impl GCTriggerPolicy for GCNeverTrigger {
    fn trigger_type(&self) -> GCTriggerType {
        GCTriggerType::DebugNever
    }

    fn trigger_gc_if_needed(&self, _gc: &GC) {}
}

/// The trigger of the pause-time-goal mode of G1. It requests mixed collections when the
/// footprint reaches the target, and only moves the target after collections that covered the
/// old generation.
pub struct PauseTimeGoalTrigger {
    mem_stats: Arc<MemStats>,
    target_footprint: AtomicUsize,
    min_target_footprint: usize,
    percent_threshold: usize,
    min_extra_size: usize,
    max_extra_size: usize,
}

impl PauseTimeGoalTrigger {
    pub fn new(
        mem_stats: Arc<MemStats>,
        min_heap_size: usize,
        percent_threshold: usize,
        min_extra_size: usize,
        max_extra_size: usize,
    ) -> Self {
        PauseTimeGoalTrigger {
            mem_stats,
            target_footprint: AtomicUsize::new(min_heap_size),
            min_target_footprint: min_heap_size,
            percent_threshold,
            min_extra_size,
            max_extra_size,
        }
    }

    pub fn get_target_footprint(&self) -> usize {
        self.target_footprint.load(Ordering::Relaxed)
    }

    fn compute_target(&self, heap_size: usize) -> usize {
        let delta = (heap_size / 100 * self.percent_threshold)
            .clamp(self.min_extra_size, self.max_extra_size.max(self.min_extra_size));
        (heap_size + delta).max(self.min_target_footprint)
    }
}

impl GCTriggerPolicy for PauseTimeGoalTrigger {
    fn trigger_type(&self) -> GCTriggerType {
        GCTriggerType::PauseTimeGoalTrigger
    }

    fn gc_finished(&self, task: &GCTask, _heap_size_before_gc: usize, heap_size: usize) {
        if matches!(
            task.collection_type,
            GCCollectionType::Mixed | GCCollectionType::Tenured | GCCollectionType::Full
        ) {
            self.target_footprint
                .store(self.compute_target(heap_size), Ordering::Relaxed);
        }
    }

    fn trigger_gc_if_needed(&self, gc: &GC) {
        if self.mem_stats.get_footprint_heap() >= self.get_target_footprint() && !gc.is_gc_pending() {
            gc.trigger(GCTask::with_collection_type(
                GCTaskCause::HeapUsageThresholdCause,
                GCCollectionType::Mixed,
            ));
        }
    }
}

/// Wraps another policy and lets tests schedule a collection on the N-th allocation.
pub struct SchedGCOnNthAllocTrigger {
    origin: Box<dyn GCTriggerPolicy>,
    counter: AtomicI32,
    cause: Mutex<GCTaskCause>,
    is_triggered: AtomicBool,
}

impl SchedGCOnNthAllocTrigger {
    pub fn new(origin: Box<dyn GCTriggerPolicy>) -> Self {
        SchedGCOnNthAllocTrigger {
            origin,
            counter: AtomicI32::new(0),
            cause: Mutex::new(GCTaskCause::ExplicitCause),
            is_triggered: AtomicBool::new(false),
        }
    }

    /// Run a collection with `cause` on the `counter`-th allocation from now.
    pub fn schedule_gc(&self, cause: GCTaskCause, counter: u32) {
        *self.cause.lock().unwrap() = cause;
        self.is_triggered.store(false, Ordering::Relaxed);
        self.counter
            .store(i32::try_from(counter).unwrap_or(i32::MAX), Ordering::Relaxed);
    }

    pub fn is_triggered(&self) -> bool {
        self.is_triggered.load(Ordering::Relaxed)
    }
}

impl GCTriggerPolicy for SchedGCOnNthAllocTrigger {
    delegate::delegate! {
        to self.origin {
            fn trigger_type(&self) -> GCTriggerType;
            fn gc_started(&self, task: &GCTask, heap_size: usize);
            fn gc_finished(&self, task: &GCTask, heap_size_before_gc: usize, heap_size: usize);
        }
    }

    fn trigger_gc_if_needed(&self, gc: &GC) {
        if self.counter.load(Ordering::Relaxed) > 0 && self.counter.fetch_sub(1, Ordering::Relaxed) == 1 {
            let cause = *self.cause.lock().unwrap();
            gc.wait_for_gc(GCTask::new(cause));
            self.is_triggered.store(true, Ordering::Relaxed);
            return;
        }
        self.origin.trigger_gc_if_needed(gc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::gc::gc_stats::GCStats;
    use crate::mem::gc::GCType;
    use crate::mem::gc_settings::GCSettings;
    use crate::mem::mem_stats::SpaceType;
    use crate::runtime::language::SourceLanguage;

    const MB: usize = BYTES_IN_MBYTE;

    fn config(trigger_type: GCTriggerType) -> GCTriggerConfig {
        let mut options = Options::builtin_defaults();
        options.gc_trigger_type = trigger_type;
        GCTriggerConfig::new(&options)
    }

    fn heap_space() -> Arc<HeapSpace> {
        Arc::new(HeapSpace::new(32 * MB, 512 * MB))
    }

    fn gc(mem_stats: &Arc<MemStats>) -> GC {
        let settings = GCSettings::new(&Options::builtin_defaults(), SourceLanguage::PandaAssembly);
        GC::new(GCType::StwGc, settings, mem_stats.clone(), Arc::new(GCStats::new()))
    }

    fn heap_trigger(percent: usize) -> GCTriggerHeap {
        GCTriggerHeap::new(
            GCTriggerType::HeapTrigger,
            Arc::new(MemStats::new()),
            heap_space(),
            32 * MB,
            percent,
            MB,
            8 * MB,
            0,
        )
    }

    #[test]
    fn trigger_type_names() {
        assert_eq!("heap-trigger".parse::<GCTriggerType>(), Ok(GCTriggerType::HeapTrigger));
        assert_eq!(
            "no-gc-for-start-up".parse::<GCTriggerType>(),
            Ok(GCTriggerType::NoGcForStartUp)
        );
        assert_eq!(
            "pause-time-goal".parse::<GCTriggerType>(),
            Ok(GCTriggerType::PauseTimeGoalTrigger)
        );
        assert_eq!(GCTriggerType::DebugNever.to_string(), "debug-never");
    }

    #[test]
    fn policy_matches_config() {
        for trigger_type in [
            GCTriggerType::HeapTriggerTest,
            GCTriggerType::HeapTrigger,
            GCTriggerType::AdaptiveHeapTrigger,
            GCTriggerType::TriggerHeapOccupancy,
            GCTriggerType::NoGcForStartUp,
            GCTriggerType::Debug,
            GCTriggerType::DebugNever,
            GCTriggerType::PauseTimeGoalTrigger,
        ] {
            let trigger = GCTrigger::new(Arc::new(MemStats::new()), heap_space(), &config(trigger_type));
            assert_eq!(trigger.get_type(), trigger_type);
            assert!(trigger.nth_alloc_trigger().is_none());
        }
    }

    #[test]
    fn target_grows_by_percent_capped_by_max_extra() {
        let trigger = heap_trigger(20);
        // grew from 90MB to 100MB: 20% is 20MB, capped to 8MB
        assert_eq!(trigger.compute_target(90 * MB, 100 * MB), 108 * MB);
        // tiny growth: at least the minimum target footprint
        assert_eq!(trigger.compute_target(MB, 2 * MB), 32 * MB);
    }

    #[test]
    fn target_after_squeeze_is_halfway() {
        let trigger = heap_trigger(20);
        // squeezed from 200MB to 100MB: the target is 150MB
        assert_eq!(trigger.compute_target(200 * MB, 100 * MB), 150 * MB);
        // squeezed a little: 20% of the survivors
        assert_eq!(trigger.compute_target(104 * MB, 100 * MB), 100 * MB + 100 * MB / 100 * 20);
    }

    #[test]
    fn target_grows_by_at_least_min_extra() {
        let trigger = heap_trigger(1);
        assert_eq!(trigger.compute_target(60 * MB, 50 * MB), 55 * MB);
        assert_eq!(trigger.compute_target(50 * MB, 50 * MB), 51 * MB);
    }

    #[test]
    fn young_collections_keep_the_target() {
        let trigger = heap_trigger(20);
        trigger.gc_finished(&GCTask::new(GCTaskCause::YoungGcCause), 90 * MB, 100 * MB);
        assert_eq!(trigger.get_target_footprint(), 32 * MB);
        trigger.gc_finished(&GCTask::new(GCTaskCause::ExplicitCause), 90 * MB, 100 * MB);
        assert_eq!(trigger.get_target_footprint(), 108 * MB);
    }

    #[test]
    fn heap_trigger_fires_at_target() {
        let mem_stats = Arc::new(MemStats::new());
        let gc = gc(&mem_stats);
        let trigger = GCTriggerHeap::new(
            GCTriggerType::HeapTrigger,
            mem_stats.clone(),
            heap_space(),
            MB,
            20,
            MB,
            8 * MB,
            0,
        );
        mem_stats.record_allocate_object(MB - 1, SpaceType::Object);
        trigger.trigger_gc_if_needed(&gc);
        assert!(!gc.is_gc_pending());
        mem_stats.record_allocate_object(1, SpaceType::Object);
        trigger.trigger_gc_if_needed(&gc);
        assert!(gc.is_gc_pending());
    }

    #[test]
    fn startup_collections_are_skipped() {
        let mem_stats = Arc::new(MemStats::new());
        let gc = gc(&mem_stats);
        let trigger = GCTriggerHeap::new(
            GCTriggerType::NoGcForStartUp,
            mem_stats.clone(),
            heap_space(),
            MB,
            20,
            MB,
            8 * MB,
            1,
        );
        mem_stats.record_allocate_object(MB, SpaceType::Object);
        trigger.trigger_gc_if_needed(&gc);
        assert!(!gc.is_gc_pending());
        assert_eq!(trigger.get_target_footprint(), 2 * MB);
        mem_stats.record_allocate_object(MB, SpaceType::Object);
        trigger.trigger_gc_if_needed(&gc);
        assert!(gc.is_gc_pending());
    }

    #[test]
    fn adaptive_trigger_backs_off_in_a_narrow_window() {
        let trigger = GCAdaptiveTriggerHeap::new(
            Arc::new(MemStats::new()),
            heap_space(),
            MB,
            10,
            3,
            MB,
            8 * MB,
        );
        // the history starts with the minimum heap size, far from the new targets
        assert_eq!(trigger.compute_target(50 * MB, 50 * MB), 55 * MB);
        assert_eq!(trigger.compute_target(50 * MB, 50 * MB), 55 * MB);
        assert_eq!(trigger.compute_target(50 * MB, 50 * MB), 55 * MB);
        // three recent targets within 8MB of each other
        assert_eq!(trigger.compute_target(50 * MB, 50 * MB), 65 * MB);
    }

    #[test]
    fn occupancy_trigger_threshold() {
        let mem_stats = Arc::new(MemStats::new());
        let gc = gc(&mem_stats);
        let trigger = GCTriggerHeapOccupancy::new(mem_stats.clone(), heap_space(), 50);
        assert_eq!(trigger.get_threshold(), 256 * MB);
        mem_stats.record_allocate_object(255 * MB, SpaceType::Humongous);
        trigger.trigger_gc_if_needed(&gc);
        assert!(!gc.is_gc_pending());
        mem_stats.record_allocate_object(MB, SpaceType::Humongous);
        trigger.trigger_gc_if_needed(&gc);
        assert!(gc.is_gc_pending());
    }

    #[test]
    fn debug_trigger_starts_after_n_allocations() {
        let mem_stats = Arc::new(MemStats::new());
        let gc = gc(&mem_stats);
        let trigger = GCTriggerDebug::new(3);
        trigger.trigger_gc_if_needed(&gc);
        trigger.trigger_gc_if_needed(&gc);
        assert!(!gc.is_gc_pending());
        trigger.trigger_gc_if_needed(&gc);
        assert!(gc.is_gc_pending());
    }

    #[test]
    fn never_trigger_never_fires() {
        let mem_stats = Arc::new(MemStats::new());
        let gc = gc(&mem_stats);
        mem_stats.record_allocate_object(500 * MB, SpaceType::Object);
        GCNeverTrigger.trigger_gc_if_needed(&gc);
        assert!(!gc.is_gc_pending());
    }

    #[test]
    fn pause_time_goal_trigger_moves_target_on_mixed_collections() {
        let trigger = PauseTimeGoalTrigger::new(Arc::new(MemStats::new()), 32 * MB, 20, MB, 8 * MB);
        trigger.gc_finished(
            &GCTask::with_collection_type(GCTaskCause::YoungGcCause, GCCollectionType::Young),
            0,
            100 * MB,
        );
        assert_eq!(trigger.get_target_footprint(), 32 * MB);
        trigger.gc_finished(
            &GCTask::with_collection_type(GCTaskCause::HeapUsageThresholdCause, GCCollectionType::Mixed),
            0,
            100 * MB,
        );
        assert_eq!(trigger.get_target_footprint(), 108 * MB);
    }

    #[test]
    fn nth_alloc_trigger_delegates() {
        let mut options = Options::builtin_defaults();
        options.gc_trigger_type = GCTriggerType::DebugNever;
        options.gc_use_nth_alloc_trigger = true;
        let mem_stats = Arc::new(MemStats::new());
        let trigger = GCTrigger::new(mem_stats.clone(), heap_space(), &GCTriggerConfig::new(&options));
        assert_eq!(trigger.get_type(), GCTriggerType::DebugNever);

        let gc = gc(&mem_stats);
        let nth = trigger.nth_alloc_trigger().unwrap();
        nth.schedule_gc(GCTaskCause::ExplicitCause, 2);
        trigger.trigger_gc_if_needed(&gc);
        assert!(!nth.is_triggered());
        trigger.trigger_gc_if_needed(&gc);
        assert!(nth.is_triggered());
        // the counter is exhausted, the wrapped policy decides again
        trigger.trigger_gc_if_needed(&gc);
        assert!(nth.is_triggered());
    }
}

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::mem::gc::gc_trigger::GCTriggerType;
use crate::runtime::language::SourceLanguage;
use crate::util::options::Options;

/// Collector configuration, read once from the runtime options.
///
/// The parallel-phase switches and the worker count may be changed while the runtime runs; every
/// other setting is fixed at construction.
#[derive(Debug)]
pub struct GCSettings {
    lang: SourceLanguage,
    is_gc_enable_tracing: bool,
    gc_trigger_type: GCTriggerType,
    gc_debug_trigger_start: u64,
    is_concurrency_enabled: bool,
    run_gc_in_place: bool,
    pre_gc_heap_verification: bool,
    into_gc_heap_verification: bool,
    post_gc_heap_verification: bool,
    before_g1_concurrent_heap_verification: bool,
    fail_on_heap_verification: bool,
    g1_region_garbage_rate_threshold: f64,
    young_space_size: usize,
    log_detailed_gc_info_enabled: bool,
    g1_enable_pause_time_goal: bool,
    g1_max_gc_pause_in_millis: u32,
    g1_gc_pause_interval_in_millis: u32,
    parallel_marking_enabled: AtomicBool,
    parallel_compacting_enabled: AtomicBool,
    parallel_ref_updating_enabled: AtomicBool,
    gc_workers_count: AtomicUsize,
}

impl GCSettings {
    pub fn new(options: &Options, lang: SourceLanguage) -> Self {
        let workers = options.gc_workers_count;
        // A pause interval of zero means "right after the maximum pause".
        let pause_interval = if options.g1_gc_pause_interval_in_millis == 0 {
            options.g1_max_gc_pause_in_millis + 1
        } else {
            options.g1_gc_pause_interval_in_millis
        };
        let settings = GCSettings {
            lang,
            is_gc_enable_tracing: options.gc_enable_tracing,
            gc_trigger_type: options.gc_trigger_type,
            gc_debug_trigger_start: options.gc_debug_trigger_start,
            is_concurrency_enabled: options.concurrent_gc_enabled,
            run_gc_in_place: options.run_gc_in_place,
            pre_gc_heap_verification: options.pre_gc_heap_verify_enabled,
            into_gc_heap_verification: options.into_gc_heap_verify_enabled,
            post_gc_heap_verification: options.post_gc_heap_verify_enabled,
            before_g1_concurrent_heap_verification: options.g1_before_concurrent_heap_verification,
            fail_on_heap_verification: options.fail_on_heap_verification,
            g1_region_garbage_rate_threshold: f64::from(options.g1_region_garbage_rate_threshold) / 100.0,
            young_space_size: options.young_space_size,
            log_detailed_gc_info_enabled: options.log_detailed_gc_info_enabled,
            g1_enable_pause_time_goal: options.g1_enable_pause_time_goal,
            g1_max_gc_pause_in_millis: options.g1_max_gc_pause_in_millis,
            g1_gc_pause_interval_in_millis: pause_interval,
            parallel_marking_enabled: AtomicBool::new(options.gc_parallel_marking_enabled && workers != 0),
            parallel_compacting_enabled: AtomicBool::new(
                options.gc_parallel_compacting_enabled && workers != 0,
            ),
            parallel_ref_updating_enabled: AtomicBool::new(
                options.gc_parallel_ref_updating_enabled && workers != 0,
            ),
            gc_workers_count: AtomicUsize::new(workers),
        };
        debug!("GC settings for {}: {:?}", lang, settings);
        settings
    }

    pub fn lang(&self) -> SourceLanguage {
        self.lang
    }

    pub fn is_gc_enable_tracing(&self) -> bool {
        self.is_gc_enable_tracing
    }

    pub fn gc_trigger_type(&self) -> GCTriggerType {
        self.gc_trigger_type
    }

    pub fn gc_debug_trigger_start(&self) -> u64 {
        self.gc_debug_trigger_start
    }

    pub fn is_concurrency_enabled(&self) -> bool {
        self.is_concurrency_enabled
    }

    pub fn run_gc_in_place(&self) -> bool {
        self.run_gc_in_place
    }

    pub fn pre_gc_heap_verification(&self) -> bool {
        self.pre_gc_heap_verification
    }

    pub fn into_gc_heap_verification(&self) -> bool {
        self.into_gc_heap_verification
    }

    pub fn post_gc_heap_verification(&self) -> bool {
        self.post_gc_heap_verification
    }

    pub fn before_g1_concurrent_heap_verification(&self) -> bool {
        self.before_g1_concurrent_heap_verification
    }

    pub fn fail_on_heap_verification(&self) -> bool {
        self.fail_on_heap_verification
    }

    /// Fraction of garbage above which a G1 region is collected.
    pub fn g1_region_garbage_rate_threshold(&self) -> f64 {
        self.g1_region_garbage_rate_threshold
    }

    pub fn young_space_size(&self) -> usize {
        self.young_space_size
    }

    pub fn log_detailed_gc_info_enabled(&self) -> bool {
        self.log_detailed_gc_info_enabled
    }

    pub fn g1_enable_pause_time_goal(&self) -> bool {
        self.g1_enable_pause_time_goal
    }

    pub fn get_g1_max_gc_pause_in_millis(&self) -> u32 {
        self.g1_max_gc_pause_in_millis
    }

    pub fn get_g1_gc_pause_interval_in_millis(&self) -> u32 {
        self.g1_gc_pause_interval_in_millis
    }

    pub fn parallel_marking_enabled(&self) -> bool {
        self.parallel_marking_enabled.load(Ordering::Relaxed)
    }

    pub fn set_parallel_marking_enabled(&self, value: bool) {
        self.parallel_marking_enabled.store(value, Ordering::Relaxed);
    }

    pub fn parallel_compacting_enabled(&self) -> bool {
        self.parallel_compacting_enabled.load(Ordering::Relaxed)
    }

    pub fn set_parallel_compacting_enabled(&self, value: bool) {
        self.parallel_compacting_enabled
            .store(value, Ordering::Relaxed);
    }

    pub fn parallel_ref_updating_enabled(&self) -> bool {
        self.parallel_ref_updating_enabled.load(Ordering::Relaxed)
    }

    pub fn set_parallel_ref_updating_enabled(&self, value: bool) {
        self.parallel_ref_updating_enabled
            .store(value, Ordering::Relaxed);
    }

    pub fn gc_workers_count(&self) -> usize {
        self.gc_workers_count.load(Ordering::Relaxed)
    }

    pub fn set_gc_workers_count(&self, value: usize) {
        self.gc_workers_count.store(value, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::{serial_test, with_cleanup};

    #[test]
    fn defaults() {
        let settings = GCSettings::new(&Options::builtin_defaults(), SourceLanguage::PandaAssembly);
        assert_eq!(settings.lang(), SourceLanguage::PandaAssembly);
        assert_eq!(settings.gc_trigger_type(), GCTriggerType::HeapTrigger);
        assert!(settings.is_concurrency_enabled());
        assert!(!settings.run_gc_in_place());
        assert!(!settings.g1_enable_pause_time_goal());
        assert_eq!(settings.get_g1_max_gc_pause_in_millis(), 10);
        assert!((settings.g1_region_garbage_rate_threshold() - 0.97).abs() < f64::EPSILON);
    }

    #[test]
    fn pause_interval_defaults_to_max_pause_plus_one() {
        let mut options = Options::builtin_defaults();
        options.g1_max_gc_pause_in_millis = 25;
        let settings = GCSettings::new(&options, SourceLanguage::PandaAssembly);
        assert_eq!(settings.get_g1_gc_pause_interval_in_millis(), 26);

        options.g1_gc_pause_interval_in_millis = 100;
        let settings = GCSettings::new(&options, SourceLanguage::PandaAssembly);
        assert_eq!(settings.get_g1_gc_pause_interval_in_millis(), 100);
    }

    #[test]
    fn parallel_phases_need_workers() {
        let mut options = Options::builtin_defaults();
        options.gc_workers_count = 0;
        let settings = GCSettings::new(&options, SourceLanguage::PandaAssembly);
        assert!(!settings.parallel_marking_enabled());
        assert!(!settings.parallel_compacting_enabled());
        assert!(!settings.parallel_ref_updating_enabled());

        options.gc_workers_count = 2;
        options.gc_parallel_compacting_enabled = false;
        let settings = GCSettings::new(&options, SourceLanguage::PandaAssembly);
        assert!(settings.parallel_marking_enabled());
        assert!(!settings.parallel_compacting_enabled());
        assert!(settings.parallel_ref_updating_enabled());
    }

    #[test]
    fn tunables_can_change() {
        let settings = GCSettings::new(&Options::builtin_defaults(), SourceLanguage::PandaAssembly);
        settings.set_gc_workers_count(7);
        settings.set_parallel_marking_enabled(false);
        settings.set_parallel_ref_updating_enabled(false);
        settings.set_parallel_compacting_enabled(true);
        assert_eq!(settings.gc_workers_count(), 7);
        assert!(!settings.parallel_marking_enabled());
        assert!(!settings.parallel_ref_updating_enabled());
        assert!(settings.parallel_compacting_enabled());
    }

    #[test]
    fn settings_follow_env_vars() {
        serial_test(|| {
            with_cleanup(
                || {
                    std::env::set_var("PANDA_RUN_GC_IN_PLACE", "true");
                    std::env::set_var("PANDA_GC_TRIGGER_TYPE", "debug-never");

                    let settings = GCSettings::new(&Options::default(), SourceLanguage::PandaAssembly);
                    assert!(settings.run_gc_in_place());
                    assert_eq!(settings.gc_trigger_type(), GCTriggerType::DebugNever);
                },
                || {
                    std::env::remove_var("PANDA_RUN_GC_IN_PLACE");
                    std::env::remove_var("PANDA_GC_TRIGGER_TYPE");
                },
            )
        })
    }
}

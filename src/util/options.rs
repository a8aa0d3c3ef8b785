use crate::mem::gc::gc_trigger::GCTriggerType;
use crate::mem::gc::GCType;
use crate::util::constants::*;
use thiserror::Error;

fn always_valid<T>(_: &T) -> bool {
    true
}

/// Errors reported when setting an option by name.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("unknown runtime option '{0}'")]
    UnknownOption(String),
    #[error("cannot parse '{value}' for runtime option '{name}'")]
    ParseError { name: String, value: String },
    #[error("invalid value '{value}' for runtime option '{name}'")]
    InvalidValue { name: String, value: String },
}

/// Prefix of the environment variables that override options.
pub const ENV_PREFIX: &str = "PANDA_";

macro_rules! options {
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($(#[$outer])* $name: $type[$validator] = $default),*);
    ];
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        /// Runtime options. Every option can be overridden by an environment variable named
        /// `PANDA_<OPTION_NAME>`, or programmatically with [`Options::set_from_str`].
        #[derive(Clone, Debug)]
        pub struct Options {
            $($(#[$outer])* pub $name: $type),*
        }
        impl Options {
            /// Snake-case names of every option.
            pub const NAMES: &'static [&'static str] = &[$(stringify!($name)),*];

            /// Set an option by its name. Both `snake_case` and `kebab-case` names are accepted.
            /// On error the option keeps its previous value.
            pub fn set_from_str(&mut self, name: &str, value: &str) -> Result<(), OptionsError> {
                match name.replace('-', "_").as_str() {
                    $(stringify!($name) => {
                        let Ok(parsed) = value.parse::<$type>() else {
                            warn!("Cannot parse {:?} for option {}, keeping {:?}", value, name, self.$name);
                            return Err(OptionsError::ParseError {
                                name: name.to_string(),
                                value: value.to_string(),
                            });
                        };
                        if !($validator)(&parsed) {
                            warn!("Invalid value {:?} for option {}, keeping {:?}", parsed, name, self.$name);
                            return Err(OptionsError::InvalidValue {
                                name: name.to_string(),
                                value: format!("{:?}", parsed),
                            });
                        }
                        self.$name = parsed;
                        Ok(())
                    })*
                    _ => Err(OptionsError::UnknownOption(name.to_string())),
                }
            }

            /// Options with their default values, ignoring the environment.
            pub fn builtin_defaults() -> Self {
                Options {
                    $($name: $default),*
                }
            }
        }
    ]
}

options! {
    /// The collector to create. Parsed from names such as `g1-gc` or `epsilon-gc`.
    gc_type:                                     GCType        [always_valid] = GCType::G1Gc,
    /// The policy deciding when a collection is requested.
    gc_trigger_type:                             GCTriggerType [always_valid] = GCTriggerType::HeapTrigger,
    /// Number of allocations before the `debug` trigger starts requesting a GC on every allocation.
    gc_debug_trigger_start:                      u64           [always_valid] = 0,
    /// Percentage of the heap size after a GC that may be allocated before the next GC.
    gc_trigger_percent_threshold:                u32           [|v: &u32| *v > 0 && *v <= 100] = 20,
    /// Multiplier applied to recent targets by the adaptive heap trigger.
    gc_trigger_adaptive_multiplier:              u32           [|v: &u32| *v > 0] = 3,
    /// The smallest amount the GC target may grow by after a collection.
    min_extra_heap_size:                         usize         [always_valid] = BYTES_IN_MBYTE,
    /// The largest amount the GC target may grow by after a collection.
    max_extra_heap_size:                         usize         [always_valid] = 8 * BYTES_IN_MBYTE,
    /// Heap occupancy (in percent of the maximum heap) at which the occupancy trigger fires.
    max_trigger_percent:                         u32           [|v: &u32| *v > 0 && *v <= 100] = 100,
    /// Number of collections the startup trigger ignores.
    skip_startup_gc_count:                       u32           [always_valid] = 10,
    /// Wrap the selected trigger so a GC can be scheduled on the N-th allocation.
    gc_use_nth_alloc_trigger:                    bool          [always_valid] = false,
    /// Allow the collector to do work concurrently with mutators.
    concurrent_gc_enabled:                       bool          [always_valid] = true,
    /// Run a requested collection on the requesting thread.
    run_gc_in_place:                             bool          [always_valid] = false,
    /// Number of GC worker threads. Zero disables the parallel phases.
    gc_workers_count:                            usize         [always_valid] = num_cpus::get().min(DEFAULT_GC_WORKERS_COUNT),
    /// Size of the young space for generational collectors.
    young_space_size:                            usize         [|v: &usize| *v > 0] = 4 * BYTES_IN_MBYTE,
    pre_gc_heap_verify_enabled:                  bool          [always_valid] = false,
    into_gc_heap_verify_enabled:                 bool          [always_valid] = false,
    post_gc_heap_verify_enabled:                 bool          [always_valid] = false,
    g1_before_concurrent_heap_verification:      bool          [always_valid] = false,
    /// Abort when a heap verification finds a broken object.
    fail_on_heap_verification:                   bool          [always_valid] = false,
    /// Percentage of garbage above which a G1 region is collected.
    g1_region_garbage_rate_threshold:            u32           [|v: &u32| *v <= 100] = 97,
    g1_enable_pause_time_goal:                   bool          [always_valid] = false,
    g1_max_gc_pause_in_millis:                   u32           [|v: &u32| *v > 0] = 10,
    /// Zero means one millisecond more than the maximum pause.
    g1_gc_pause_interval_in_millis:              u32           [always_valid] = 0,
    gc_parallel_marking_enabled:                 bool          [always_valid] = true,
    gc_parallel_compacting_enabled:              bool          [always_valid] = true,
    gc_parallel_ref_updating_enabled:            bool          [always_valid] = true,
    gc_enable_tracing:                           bool          [always_valid] = false,
    log_detailed_gc_info_enabled:                bool          [always_valid] = false,
    /// Heap size the runtime starts with.
    init_heap_size_limit:                        usize         [|v: &usize| *v > 0] = DEFAULT_INIT_HEAP_SIZE,
    /// Heap size the runtime never grows beyond.
    heap_size_limit:                             usize         [|v: &usize| *v > 0] = DEFAULT_HEAP_SIZE_LIMIT,
    /// Capacity of the global reference storage.
    global_reference_size:                       usize         [|v: &usize| *v > 0] = 20_000,
    global_reference_size_check_enabled:         bool          [always_valid] = false,
    /// Store strings whose code units are all ASCII with one byte per character.
    compressed_strings_enabled:                  bool          [always_valid] = true,
    start_as_zygote:                             bool          [always_valid] = false
}

impl Default for Options {
    fn default() -> Self {
        let mut options = Self::builtin_defaults();
        options.read_env_var_settings();
        options
    }
}

impl Options {
    /// Apply every `PANDA_*` environment variable that names an option. Other variables with the
    /// prefix, such as the log filter, are left alone.
    pub fn read_env_var_settings(&mut self) {
        for (key, value) in std::env::vars() {
            let Some(name) = key.strip_prefix(ENV_PREFIX).map(str::to_lowercase) else {
                continue;
            };
            if Self::NAMES.contains(&name.as_str()) {
                // Failures are logged and leave the option unchanged.
                let _ = self.set_from_str(&name, &value);
            }
        }
    }

    /// Check relations between options that a single validator cannot see.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.init_heap_size_limit > self.heap_size_limit {
            return Err(OptionsError::InvalidValue {
                name: "init_heap_size_limit".to_string(),
                value: self.init_heap_size_limit.to_string(),
            });
        }
        if self.min_extra_heap_size > self.max_extra_heap_size {
            return Err(OptionsError::InvalidValue {
                name: "min_extra_heap_size".to_string(),
                value: self.min_extra_heap_size.to_string(),
            });
        }
        Ok(())
    }
}

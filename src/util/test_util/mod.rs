use std::panic;
use std::sync::Mutex;

pub mod fixtures;

lazy_static! {
    // Tests that set `PANDA_` environment variables hold this lock.
    static ref ENV_LOCK: Mutex<()> = Mutex::default();
}

/// Run `f` while no other test touches the environment.
pub fn serial_test<F>(f: F)
where
    F: FnOnce(),
{
    // A failed test poisons the lock. The environment is still usable for the others.
    let _guard = ENV_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f();
}

/// Run `cleanup` after `test`, even if `test` panics.
pub fn with_cleanup<T, C>(test: T, cleanup: C)
where
    T: FnOnce() + panic::UnwindSafe,
    C: FnOnce(),
{
    let res = panic::catch_unwind(test);
    cleanup();
    if let Err(e) = res {
        panic::resume_unwind(e);
    }
}

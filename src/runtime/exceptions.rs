use crate::runtime::thread::{ManagedThread, PendingException};

/// Raise a managed exception of the class `descriptor` on `thread`.
pub fn throw_exception(thread: &ManagedThread, descriptor: &[u8], message: impl Into<String>) {
    thread.set_pending_exception(PendingException::new(descriptor, message.into()));
}

/// Raise a managed exception on the thread attached to the current OS thread. Returns false if no
/// managed thread is attached, in which case the exception is only logged.
pub fn throw_exception_on_current(descriptor: &[u8], message: impl Into<String>) -> bool {
    let message = message.into();
    match ManagedThread::current() {
        Some(thread) => {
            throw_exception(&thread, descriptor, message);
            true
        }
        None => {
            warn!(
                "No managed thread to raise {}: {}",
                String::from_utf8_lossy(descriptor),
                message
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn throw_on_current_thread() {
        assert!(!throw_exception_on_current(b"Lpanda/Error;", "nobody listens"));

        let thread = Arc::new(ManagedThread::new(2));
        ManagedThread::set_current(Some(thread.clone()));
        assert!(throw_exception_on_current(b"Lpanda/Error;", "boom"));
        ManagedThread::set_current(None);

        let exception = thread.clear_pending_exception().unwrap();
        assert_eq!(exception.descriptor(), b"Lpanda/Error;");
        assert_eq!(exception.message(), "boom");
    }
}

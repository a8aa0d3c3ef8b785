use strum_macros::Display;

/// Failures of the class linker. Each language maps them to its own managed exceptions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassLinkerError {
    ClassNotFound,
    FieldNotFound,
    MethodNotFound,
    NoClassDef,
    ClassCircularity,
    OverridesFinal,
    MultipleOverride,
    MultipleImplement,
    InvalidLambdaClass,
}

/// Receives the failures of a lookup. Every lookup takes an optional handler; without one the
/// handler of the language extension is used.
pub trait ClassLinkerErrorHandler: Send + Sync {
    fn on_error(&self, error: ClassLinkerError, message: &str);
}

/// A handler that ignores every failure, for lookups whose failure is not an error.
pub struct SuppressErrorHandler;

impl ClassLinkerErrorHandler for SuppressErrorHandler {
    fn on_error(&self, error: ClassLinkerError, message: &str) {
        trace!("Suppressed {}: {}", error, message);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every failure it receives.
    #[derive(Default)]
    pub struct RecordingErrorHandler {
        pub errors: Mutex<Vec<(ClassLinkerError, String)>>,
    }

    impl ClassLinkerErrorHandler for RecordingErrorHandler {
        fn on_error(&self, error: ClassLinkerError, message: &str) {
            self.errors.lock().unwrap().push((error, message.to_string()));
        }
    }

    #[test]
    fn error_names() {
        assert_eq!(ClassLinkerError::ClassNotFound.to_string(), "CLASS_NOT_FOUND");
        assert_eq!(ClassLinkerError::NoClassDef.to_string(), "NO_CLASS_DEF");
    }

    #[test]
    fn recording_handler() {
        let handler = RecordingErrorHandler::default();
        SuppressErrorHandler.on_error(ClassLinkerError::ClassNotFound, "ignored");
        handler.on_error(ClassLinkerError::MethodNotFound, "m");
        assert_eq!(
            *handler.errors.lock().unwrap(),
            vec![(ClassLinkerError::MethodNotFound, "m".to_string())]
        );
    }
}

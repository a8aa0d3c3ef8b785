use log::SetLoggerError;

/// Environment variable holding the log filter, in `env_logger` syntax.
pub const LOG_FILTER_ENV: &str = "PANDA_LOG";
/// Environment variable selecting colored output: `auto`, `always` or `never`.
pub const LOG_STYLE_ENV: &str = "PANDA_LOG_STYLE";

/// Install the built-in logger, filtered by `PANDA_LOG` (`info` when unset). Fails if another
/// logger is installed already. Does nothing without the `builtin_env_logger` feature.
pub fn try_init() -> Result<(), SetLoggerError> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            env_logger::Builder::from_env(
                env_logger::Env::new()
                    .filter_or(LOG_FILTER_ENV, "info")
                    .write_style(LOG_STYLE_ENV),
            )
            .format_timestamp_millis()
            .try_init()
        } else {
            Ok(())
        }
    }
}

//! Tagged, conditional logging macros plus process-wide logger setup.
//!
//! Every module that logs declares two constants and then uses the macros
//! exported at the crate root:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! const LOG_TAG: &str = "sync";
//!
//! use crate::{log_info, log_warn};
//!
//! log_info!("drained {} entries", 12); // => "[sync] drained 12 entries"
//! ```
//! Flipping `ENABLE_LOGS` silences a noisy module without touching `RUST_LOG`.

use std::sync::Once;

/// Info line prefixed with the calling module's `LOG_TAG`, gated on its `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            ::log::info!("[{}] {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}

/// Warn line prefixed with the calling module's `LOG_TAG`, gated on its `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            ::log::warn!("[{}] {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}

/// Error line prefixed with the calling module's `LOG_TAG`, gated on its `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            ::log::error!("[{}] {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}

/// Debug line prefixed with the calling module's `LOG_TAG`, gated on its `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            ::log::debug!("[{}] {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}

static INIT: Once = Once::new();

/// Initialise `env_logger` from `RUST_LOG`, defaulting to `info`.
///
/// Safe to call more than once; only the first call installs the logger.
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or("info"),
        )
        .format_timestamp_millis()
        .try_init();
    });
}

/// Route panics through the logger before handing them to the previous hook.
///
/// Teardown of the capture pipeline is driven by drop guards, so unwinding
/// still releases the capture surface and removes the overlay.
pub fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let thread = std::thread::current();
        log::error!(
            "[crash] uncaught panic on thread '{}': {}",
            thread.name().unwrap_or("<unnamed>"),
            info
        );
        previous(info);
    }));
}

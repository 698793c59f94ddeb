//! # Console Logging
//!
//! A `log::Log` sink for the driver and its test client. Records are written
//! line by line to the console (standard error) as
//! `[LEVEL] target: message`.
//!
//! ```rust,no_run
//! use kernel_console::ConsoleLogger;
//! use log::{LevelFilter, info};
//!
//! ConsoleLogger::new(LevelFilter::Debug)
//!     .init()
//!     .expect("logger installed once");
//! info!("device ready");
//! ```
//!
//! For output that must not go through the `log` filter, use
//! [`console_trace!`].
//!
//! ## Features
//!
//! `enabled` (default): output goes to standard error. Without it every write
//! is a no-op, which keeps test output quiet without touching call sites.

mod logger;

pub use logger::{ConsoleLogger, write_record};

#[cfg(feature = "enabled")]
#[doc(hidden)]
pub mod console_fmt {
    use std::fmt;
    use std::io::Write;

    #[doc(hidden)]
    pub fn console_write(args: fmt::Arguments) {
        // Best effort; a closed stderr is not worth failing over.
        let _ = std::io::stderr().lock().write_fmt(args);
    }
}

#[cfg(not(feature = "enabled"))]
#[doc(hidden)]
pub mod console_fmt {
    use std::fmt;

    #[doc(hidden)]
    #[inline]
    pub fn console_write(_: fmt::Arguments) {}
}

#[macro_export]
macro_rules! console_trace {
    ($($arg:tt)*) => {{
        $crate::console_fmt::console_write(::core::format_args!($($arg)*));
    }};
}

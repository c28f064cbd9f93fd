//! Minimal leveled logging shared by the `objclink` crates.
//!
//! Library code must not write to stdout, so every record goes to stderr as
//! a single colored line tagged with the module path of the call site:
//!
//! ```text
//! [DEBUG] objclink_native::extract: copied /native/libfoo.dylib to /tmp/libfooX1a2.dylib
//! ```
//!
//! The minimum level starts at [`Level::Warn`]. On first use it is read from
//! the `OBJCLINK_LOG` environment variable (`off`, `error`, `warn`, `info`,
//! `debug` or `trace`) and can be changed at any time with [`set_level`].
//!
//! # Example
//!
//! ```
//! use objclink_log::{debug, info, Level};
//!
//! objclink_log::set_level(Level::Debug);
//!
//! let selector = "stringWithUTF8String:";
//! debug!("resolved selector {selector}");
//! info!("{} classes registered", 7);
//! ```

use std::fmt::{self, Arguments};
use std::io::Write;
use std::str::FromStr;
use std::sync::Once;
use std::sync::atomic::{AtomicU8, Ordering};

/// Environment variable consulted for the initial level.
pub const ENV_VAR: &str = "OBJCLINK_LOG";

/// Severity of a log record.
///
/// Lower values are more severe. [`Level::Off`] is only meaningful as a
/// threshold: it disables every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    const fn color_code(self) -> &'static str {
        match self {
            Level::Off => "",
            Level::Error => "\x1b[31m",
            Level::Warn => "\x1b[33m",
            Level::Info => "\x1b[32m",
            Level::Debug => "\x1b[36m",
            Level::Trace => "\x1b[35m",
        }
    }

    /// Upper-case tag printed in front of each record.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Off => "OFF",
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn from_u8(value: u8) -> Level {
        match value {
            0 => Level::Off,
            1 => Level::Error,
            2 => Level::Warn,
            3 => Level::Info,
            4 => Level::Debug,
            _ => Level::Trace,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLevelError(String);

impl fmt::Display for ParseLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid log level: {:?}", self.0)
    }
}

impl std::error::Error for ParseLevelError {}

impl FromStr for Level {
    type Err = ParseLevelError;

    /// Parses a level name, ignoring case and surrounding whitespace.
    ///
    /// ```
    /// use objclink_log::Level;
    ///
    /// assert_eq!("debug".parse(), Ok(Level::Debug));
    /// assert_eq!(" WARN ".parse(), Ok(Level::Warn));
    /// assert!("loud".parse::<Level>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(Level::Off),
            "error" => Ok(Level::Error),
            "warn" | "warning" => Ok(Level::Warn),
            "info" => Ok(Level::Info),
            "debug" => Ok(Level::Debug),
            "trace" => Ok(Level::Trace),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// Process-wide threshold.
///
/// Only one instance exists, reachable through [`get_logger`].
pub struct Logger {
    level: AtomicU8,
    env_checked: Once,
}

impl Logger {
    const fn new(level: Level) -> Self {
        Logger {
            level: AtomicU8::new(level as u8),
            env_checked: Once::new(),
        }
    }

    fn init_from_env(&self) {
        self.env_checked.call_once(|| {
            if let Ok(value) = std::env::var(ENV_VAR) {
                match value.parse::<Level>() {
                    Ok(level) => self.level.store(level as u8, Ordering::SeqCst),
                    Err(err) => {
                        let _ = writeln!(
                            std::io::stderr(),
                            "[WARN] objclink_log: {err}, keeping default"
                        );
                    }
                }
            }
        });
    }

    /// Sets the minimum level. Records above it are dropped.
    pub fn set_level(&self, level: Level) {
        // An explicit choice wins over a later environment read.
        self.env_checked.call_once(|| {});
        self.level.store(level as u8, Ordering::SeqCst);
    }

    /// Returns the current minimum level.
    pub fn level(&self) -> Level {
        self.init_from_env();
        Level::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Returns true if a record at `level` would be written.
    pub fn enabled(&self, level: Level) -> bool {
        level != Level::Off && level <= self.level()
    }
}

static LOGGER: Logger = Logger::new(Level::Warn);

/// Returns the process-wide logger.
pub fn get_logger() -> &'static Logger {
    &LOGGER
}

/// Sets the minimum level of the process-wide logger.
pub fn set_level(level: Level) {
    get_logger().set_level(level);
}

/// Parses `s` and sets it as the minimum level.
///
/// # Errors
///
/// Returns [`ParseLevelError`] if `s` is not a level name; the current level
/// is left unchanged.
pub fn set_level_from_str(s: &str) -> Result<(), ParseLevelError> {
    set_level(s.parse()?);
    Ok(())
}

#[doc(hidden)]
pub fn __log_with_target(level: Level, target: &str, args: Arguments<'_>) {
    const RESET: &str = "\x1b[0m";

    if !get_logger().enabled(level) {
        return;
    }

    let color = level.color_code();
    let mut stderr = std::io::stderr().lock();
    // Logging never fails the caller.
    let _ = writeln!(stderr, "{color}[{level}]{RESET} {target}: {args}");
}

/// Logs a record at an explicit level.
///
/// ```
/// use objclink_log::{log, Level};
///
/// log!(level: Level::Info, "loaded {} classes", 3);
/// ```
#[macro_export]
macro_rules! log {
    (level: $level:expr, $($arg:tt)*) => {
        {
            let level = $level;
            if $crate::get_logger().enabled(level) {
                $crate::__log_with_target(level, module_path!(), format_args!($($arg)*));
            }
        }
    };
}

/// Logs at [`Level::Error`].
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Error, $($arg)*)
    };
}

/// Logs at [`Level::Warn`].
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Warn, $($arg)*)
    };
}

/// Logs at [`Level::Info`].
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Info, $($arg)*)
    };
}

/// Logs at [`Level::Debug`].
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Debug, $($arg)*)
    };
}

/// Logs at [`Level::Trace`].
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Trace, $($arg)*)
    };
}

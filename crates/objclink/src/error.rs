//! Error types for `objclink`.
//!
//! Every operation returns [`Result`]. Lookup failures carry the attempted
//! name and, for selectors, a description of the receiver so a failed send
//! can be diagnosed from the message alone.

use std::fmt;

/// What a failed lookup was looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lookup {
    /// A class looked up by name.
    Class,
    /// A selector the receiver does not respond to.
    Selector,
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::Class => f.write_str("class"),
            Lookup::Selector => f.write_str("selector"),
        }
    }
}

fn for_receiver(receiver: &Option<String>) -> String {
    match receiver {
        Some(receiver) => format!(" for receiver {receiver}"),
        None => String::new(),
    }
}

/// Errors raised by the client, the coercion layer and the runtimes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A class is not registered, or the receiver does not respond to a
    /// selector.
    #[error("Cannot find {kind} {name}{}", for_receiver(.receiver))]
    NotFound {
        /// Class or selector.
        kind: Lookup,
        /// The name that was looked up.
        name: String,
        /// Description of the receiver, for selector lookups.
        receiver: Option<String>,
    },

    /// A value cannot be represented in the native slot it is bound to.
    #[error("Cannot marshal {what}: {reason}")]
    MarshalError {
        /// Which value failed, e.g. `argument 1` or `return value`.
        what: String,
        /// Human-readable reason.
        reason: String,
    },

    /// The number of arguments does not match the method signature.
    #[error("Argument count mismatch for {selector}: expected {expected}, got {got}")]
    ArgumentCountMismatch {
        /// Selector name.
        selector: String,
        /// Arguments declared by the method, excluding self and _cmd.
        expected: usize,
        /// Arguments supplied.
        got: usize,
    },

    /// A typed send received a result of another shape.
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Shape the caller asked for.
        expected: &'static str,
        /// Shape that was produced.
        found: String,
    },

    /// Instantiating a recipient or allocating its native peer failed.
    #[error("Cannot construct object: {0}")]
    ConstructionError(String),

    /// The operation is not allowed, e.g. mutating a shared configuration.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    /// A type encoding string could not be parsed.
    #[error("Invalid type encoding: {0:?}")]
    InvalidEncoding(String),

    /// A class with this name is already registered.
    #[error("Class {0} already exists")]
    ClassAlreadyExists(String),
}

impl Error {
    pub(crate) fn marshal(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MarshalError {
            what: what.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn class_not_found(name: &str) -> Self {
        Error::NotFound {
            kind: Lookup::Class,
            name: name.to_string(),
            receiver: None,
        }
    }
}

/// Result type for `objclink` operations.
pub type Result<T> = std::result::Result<T, Error>;

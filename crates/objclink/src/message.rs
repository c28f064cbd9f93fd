//! Message descriptions and send targets.

use crate::client::Coercion;
use crate::proxy::Peerable;
use crate::runtime::Handle;
use crate::value::Value;
use std::fmt;

/// A receiver or selector as the caller names it.
///
/// Names are resolved by the client: a receiver name is looked up as a
/// class, a selector name is registered.
///
/// # Example
///
/// ```
/// use objclink::{Handle, Target};
///
/// assert!(matches!(Target::from("NSString"), Target::Name("NSString")));
/// assert!(matches!(Target::from(Handle::NULL), Target::Handle(_)));
/// ```
#[derive(Clone, Copy)]
pub enum Target<'a> {
    Handle(Handle),
    Name(&'a str),
    Peer(&'a dyn Peerable),
}

impl From<Handle> for Target<'_> {
    fn from(handle: Handle) -> Self {
        Target::Handle(handle)
    }
}

impl<'a> From<&'a str> for Target<'a> {
    fn from(name: &'a str) -> Self {
        Target::Name(name)
    }
}

impl<'a> From<&'a String> for Target<'a> {
    fn from(name: &'a String) -> Self {
        Target::Name(name)
    }
}

impl<'a, T: Peerable> From<&'a T> for Target<'a> {
    fn from(peer: &'a T) -> Self {
        Target::Peer(peer)
    }
}

impl fmt::Debug for Target<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Handle(h) => write!(f, "Handle({h})"),
            Target::Name(name) => write!(f, "Name({name:?})"),
            Target::Peer(peer) => write!(f, "Peer({})", peer.peer()),
        }
    }
}

/// One resolved message: receiver, selector, arguments and the coercion
/// configuration it is dispatched with.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub receiver: Handle,
    pub selector: Handle,
    pub args: Vec<Value>,
    pub coercion: &'static Coercion,
}

impl Message {
    /// Creates a message.
    #[must_use]
    pub fn new(
        receiver: Handle,
        selector: Handle,
        args: Vec<Value>,
        coercion: &'static Coercion,
    ) -> Self {
        Self {
            receiver,
            selector,
            args,
            coercion,
        }
    }

    /// Number of explicit arguments.
    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }
}

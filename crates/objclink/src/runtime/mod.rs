//! The runtime seam.
//!
//! Everything the client needs from an Objective-C runtime goes through the
//! [`Runtime`] trait: class and selector lookup, method type encodings and
//! the message send itself. Two implementations exist:
//!
//! - [`ObjcRuntime`] (Apple targets only): the system `libobjc`, with
//!   `objc_msgSend` called through a `libffi` interface.
//! - [`SimRuntime`]: an in-process runtime with a small Foundation subset.
//!   It follows the same dispatch rules and is what the tests and benches
//!   run against.

pub mod encoding;
pub mod handle;
#[cfg(target_vendor = "apple")]
pub mod objc;
pub mod sim;

pub use encoding::{Encoding, Scalar, Signature};
pub use handle::Handle;
#[cfg(target_vendor = "apple")]
pub use objc::ObjcRuntime;
pub use sim::SimRuntime;

use crate::abi::{NativeArg, RawReturn, ReturnKind};
use crate::error::Result;

/// A native Objective-C runtime.
///
/// Methods taking a [`Handle`] are `unsafe`: a real runtime dereferences it,
/// so it must be nil or a live object, class or selector of this runtime.
pub trait Runtime: Send + Sync {
    /// Looks up a registered class.
    fn lookup_class(&self, name: &str) -> Option<Handle>;

    /// Returns the unique selector for `name`, registering it if needed.
    fn register_selector(&self, name: &str) -> Handle;

    /// Name of a class.
    ///
    /// # Safety
    ///
    /// `class` must be nil or a class of this runtime.
    unsafe fn class_name(&self, class: Handle) -> Option<String>;

    /// Name of a selector.
    ///
    /// # Safety
    ///
    /// `selector` must be nil or a selector of this runtime.
    unsafe fn selector_name(&self, selector: Handle) -> Option<String>;

    /// The class of an object.
    ///
    /// # Safety
    ///
    /// `object` must be nil or a live object or class.
    unsafe fn class_of(&self, object: Handle) -> Option<Handle>;

    /// Returns true if `handle` is a class rather than an instance.
    ///
    /// # Safety
    ///
    /// `handle` must be nil or a live object or class.
    unsafe fn is_class(&self, handle: Handle) -> bool;

    /// Type encoding of the method `receiver` would run for `selector`.
    ///
    /// For a class receiver this is a class method. `None` means the
    /// receiver does not respond to the selector.
    ///
    /// # Safety
    ///
    /// `receiver` must be a live object or class; `selector` a selector of
    /// this runtime.
    unsafe fn method_types(&self, receiver: Handle, selector: Handle) -> Option<String>;

    /// Sends a message.
    ///
    /// # Safety
    ///
    /// `args` must match the method's signature in count and native class,
    /// and `ret` its return type. Any handle among them must be valid for
    /// the method being invoked.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MarshalError`] if the arguments cannot be
    /// passed as the method declares them.
    unsafe fn msg_send(
        &self,
        receiver: Handle,
        selector: Handle,
        args: &[NativeArg],
        ret: &ReturnKind,
    ) -> Result<RawReturn>;

    /// Short name of the runtime, used in logs.
    fn name(&self) -> &'static str;

    /// Human-readable description of a receiver: a class name, or
    /// `<ClassName: 0x...>` for instances.
    ///
    /// # Safety
    ///
    /// `handle` must be nil or a live object or class.
    unsafe fn describe(&self, handle: Handle) -> String {
        if handle.is_null() {
            return "nil".to_string();
        }
        unsafe {
            if self.is_class(handle) {
                if let Some(name) = self.class_name(handle) {
                    return name;
                }
            }
            match self.class_of(handle).and_then(|class| self.class_name(class)) {
                Some(name) => format!("<{name}: {handle}>"),
                None => handle.to_string(),
            }
        }
    }
}

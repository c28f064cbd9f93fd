//! Opaque native handles.

use std::fmt;

/// Address of a native runtime entity: an object, a class or a selector.
///
/// `Handle` is a plain machine word. It carries no ownership and no type
/// information; what it points at is known only to the runtime that produced
/// it. `Handle::NULL` is the nil value.
///
/// # Example
///
/// ```
/// use objclink::Handle;
///
/// let h = Handle::from_raw(0x1000);
/// assert!(!h.is_null());
/// assert!(Handle::NULL.is_null());
/// assert_eq!(h.to_string(), "0x1000");
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(usize);

impl Handle {
    /// The nil handle.
    pub const NULL: Handle = Handle(0);

    /// Wraps a raw address.
    #[must_use]
    pub const fn from_raw(addr: usize) -> Self {
        Handle(addr)
    }

    /// Wraps a pointer.
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Handle(ptr as usize)
    }

    /// Returns the raw address.
    #[must_use]
    pub const fn addr(self) -> usize {
        self.0
    }

    /// Returns the address as a pointer.
    #[must_use]
    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// Returns true for nil.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("nil")
        } else {
            write!(f, "{:#x}", self.0)
        }
    }
}

impl From<usize> for Handle {
    fn from(addr: usize) -> Self {
        Handle(addr)
    }
}

//! Managed wrappers around native objects.
//!
//! [`Peerable`] is the capability of exposing a native peer handle. Any
//! `Peerable` can be used as a send receiver. [`Proxy`] is the stock
//! implementation: a handle plus the client used to message it.
//!
//! A proxy does not own its peer. Retain and release are explicit, as in
//! manual reference counting.

use crate::client::Client;
use crate::error::Result;
use crate::message::Target;
use crate::runtime::Handle;
use crate::value::Value;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Boxed error returned by [`Recipient::instantiate`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A host object backed by a native object.
pub trait Peerable {
    /// The native peer; nil if not linked yet.
    fn peer(&self) -> Handle;
}

/// A host type that [`Client::new_object`] can create.
///
/// # Example
///
/// ```
/// use objclink::{BoxError, Client, Handle, Peerable, Recipient, SimRuntime};
/// use std::sync::Arc;
///
/// #[derive(Default)]
/// struct Counter {
///     peer: Handle,
/// }
///
/// impl Peerable for Counter {
///     fn peer(&self) -> Handle {
///         self.peer
///     }
/// }
///
/// impl Recipient for Counter {
///     fn instantiate() -> Result<Self, BoxError> {
///         Ok(Self::default())
///     }
///
///     fn set_peer(&mut self, peer: Handle) {
///         self.peer = peer;
///     }
/// }
///
/// let client = Client::coercing(Arc::new(SimRuntime::new()));
/// let counter: Counter = unsafe { client.new_object() }.unwrap();
/// assert!(!counter.peer().is_null());
/// ```
pub trait Recipient: Peerable + Sized {
    /// Native class allocated for instances without a peer.
    const CLASS_NAME: &'static str = "NSObject";

    /// Creates the host value. It may link a peer itself.
    ///
    /// # Errors
    ///
    /// Any failure aborts [`Client::new_object`].
    fn instantiate() -> std::result::Result<Self, BoxError>;

    /// Links the host value to a freshly allocated peer.
    fn set_peer(&mut self, peer: Handle);
}

/// A native object together with the client used to message it.
///
/// Two proxies are equal when they wrap the same handle.
#[derive(Clone)]
pub struct Proxy {
    peer: Handle,
    client: Client,
}

impl Proxy {
    /// Wraps `peer`.
    #[must_use]
    pub fn new(peer: Handle, client: Client) -> Self {
        Self { peer, client }
    }

    /// The client this proxy sends through.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Sends `selector` to the peer.
    ///
    /// # Safety
    ///
    /// The peer must still be alive. See [`Client::send`].
    ///
    /// # Errors
    ///
    /// As [`Client::send`].
    pub unsafe fn send<'a>(
        &self,
        selector: impl Into<Target<'a>>,
        args: &[Value],
    ) -> Result<Value> {
        unsafe { self.client.send(self.peer, selector, args) }
    }

    /// Sends and returns a proxy.
    ///
    /// # Safety
    ///
    /// See [`Proxy::send`].
    ///
    /// # Errors
    ///
    /// As [`Client::send_proxy`].
    pub unsafe fn send_proxy<'a>(
        &self,
        selector: impl Into<Target<'a>>,
        args: &[Value],
    ) -> Result<Proxy> {
        unsafe { self.client.send_proxy(self.peer, selector, args) }
    }

    /// Sends and returns a native address.
    ///
    /// # Safety
    ///
    /// See [`Proxy::send`].
    ///
    /// # Errors
    ///
    /// As [`Client::send_pointer`].
    pub unsafe fn send_pointer<'a>(
        &self,
        selector: impl Into<Target<'a>>,
        args: &[Value],
    ) -> Result<Handle> {
        unsafe { self.client.send_pointer(self.peer, selector, args) }
    }

    /// Sends and returns a boolean.
    ///
    /// # Safety
    ///
    /// See [`Proxy::send`].
    ///
    /// # Errors
    ///
    /// As [`Client::send_bool`].
    pub unsafe fn send_bool<'a>(
        &self,
        selector: impl Into<Target<'a>>,
        args: &[Value],
    ) -> Result<bool> {
        unsafe { self.client.send_bool(self.peer, selector, args) }
    }

    /// Sends and returns an integer.
    ///
    /// # Safety
    ///
    /// See [`Proxy::send`].
    ///
    /// # Errors
    ///
    /// As [`Client::send_int`].
    pub unsafe fn send_int<'a>(
        &self,
        selector: impl Into<Target<'a>>,
        args: &[Value],
    ) -> Result<i64> {
        unsafe { self.client.send_int(self.peer, selector, args) }
    }

    /// Sends and returns a double.
    ///
    /// # Safety
    ///
    /// See [`Proxy::send`].
    ///
    /// # Errors
    ///
    /// As [`Client::send_double`].
    pub unsafe fn send_double<'a>(
        &self,
        selector: impl Into<Target<'a>>,
        args: &[Value],
    ) -> Result<f64> {
        unsafe { self.client.send_double(self.peer, selector, args) }
    }

    /// Sends and returns a string.
    ///
    /// # Safety
    ///
    /// See [`Proxy::send`].
    ///
    /// # Errors
    ///
    /// As [`Client::send_string`].
    pub unsafe fn send_string<'a>(
        &self,
        selector: impl Into<Target<'a>>,
        args: &[Value],
    ) -> Result<Option<String>> {
        unsafe { self.client.send_string(self.peer, selector, args) }
    }

    /// Sends `retain`.
    ///
    /// # Safety
    ///
    /// See [`Proxy::send`].
    ///
    /// # Errors
    ///
    /// Propagates dispatch failures.
    pub unsafe fn retain(&self) -> Result<()> {
        unsafe { self.client.to_raw().send(self.peer, "retain", &[]) }.map(drop)
    }

    /// Sends `release`. The proxy must not be messaged again if this was
    /// the last reference.
    ///
    /// # Safety
    ///
    /// See [`Proxy::send`].
    ///
    /// # Errors
    ///
    /// Propagates dispatch failures.
    pub unsafe fn release(&self) -> Result<()> {
        unsafe { self.client.to_raw().send(self.peer, "release", &[]) }.map(drop)
    }
}

impl Peerable for Proxy {
    fn peer(&self) -> Handle {
        self.peer
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.peer == other.peer
    }
}

impl Eq for Proxy {}

impl Hash for Proxy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.peer.hash(state);
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Proxy({})", self.peer)
    }
}

/// An autorelease pool scope.
///
/// Created with `[[NSAutoreleasePool alloc] init]`; dropping it sends
/// `drain`, releasing everything autoreleased since.
///
/// ```
/// use objclink::{AutoreleasePool, Client, SimRuntime};
/// use std::sync::Arc;
///
/// let rt = Arc::new(SimRuntime::new());
/// let client = Client::coercing(rt.clone());
/// let before = rt.live_objects();
/// {
///     let _pool = unsafe { AutoreleasePool::new(&client) }.unwrap();
///     unsafe { client.send("NSArray", "array", &[]) }.unwrap();
/// }
/// assert_eq!(rt.live_objects(), before);
/// ```
pub struct AutoreleasePool {
    pool: Handle,
    client: Client,
}

impl AutoreleasePool {
    /// Opens a pool.
    ///
    /// # Safety
    ///
    /// Pools must be dropped in reverse creation order on the thread that
    /// created them.
    ///
    /// # Errors
    ///
    /// Propagates dispatch failures, including a missing
    /// `NSAutoreleasePool` class.
    pub unsafe fn new(client: &Client) -> Result<Self> {
        let client = client.to_raw();
        let allocated = unsafe { client.send_pointer("NSAutoreleasePool", "alloc", &[]) }?;
        let pool = unsafe { client.send_pointer(allocated, "init", &[]) }?;
        Ok(Self { pool, client })
    }

    /// The native pool object.
    #[must_use]
    pub fn handle(&self) -> Handle {
        self.pool
    }
}

impl Drop for AutoreleasePool {
    fn drop(&mut self) {
        // SAFETY: the pool was created by `new` and is drained exactly once.
        if let Err(err) = unsafe { self.client.send(self.pool, "drain", &[]) } {
            objclink_log::warn!("failed to drain autorelease pool {}: {err}", self.pool);
        }
    }
}

impl fmt::Debug for AutoreleasePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AutoreleasePool({})", self.pool)
    }
}

//! The message client.
//!
//! A [`Client`] pairs a [`Runtime`] with a [`Coercion`] configuration and
//! turns `send(receiver, selector, args)` calls into native dispatches:
//!
//! 1. Resolve the receiver and selector ([`Target`]).
//! 2. Look up the method signature. A non-nil receiver without one fails
//!    with [`Error::NotFound`].
//! 3. Marshal every argument, then dispatch once.
//! 4. Interpret the result.
//!
//! Nothing is sent for the message itself until all arguments have been
//! marshaled.

use crate::abi::ReturnKind;
use crate::coerce;
use crate::error::{Error, Lookup, Result};
use crate::message::{Message, Target};
use crate::proxy::{Peerable, Proxy, Recipient};
use crate::runtime::{Handle, Runtime, Signature};
use crate::value::Value;
use objclink_log::{debug, trace};
use std::fmt;
use std::sync::Arc;

/// Which directions of value conversion a client performs.
///
/// Only the two shared configurations exist: [`Coercion::all`] and
/// [`Coercion::none`]. They are immutable; the setters always fail.
///
/// # Example
///
/// ```
/// use objclink::Coercion;
///
/// assert!(std::ptr::eq(Coercion::all(), Coercion::all()));
/// assert!(Coercion::all().inputs() && Coercion::all().outputs());
/// assert!(Coercion::none().set_inputs(true).is_err());
/// ```
#[derive(Debug, PartialEq, Eq)]
pub struct Coercion {
    inputs: bool,
    outputs: bool,
}

static ALL: Coercion = Coercion {
    inputs: true,
    outputs: true,
};

static NONE: Coercion = Coercion {
    inputs: false,
    outputs: false,
};

impl Coercion {
    /// Coerce arguments and results.
    #[must_use]
    pub fn all() -> &'static Coercion {
        &ALL
    }

    /// Pass arguments and results through untouched.
    #[must_use]
    pub fn none() -> &'static Coercion {
        &NONE
    }

    /// Whether arguments are coerced.
    #[must_use]
    pub const fn inputs(&self) -> bool {
        self.inputs
    }

    /// Whether results are coerced.
    #[must_use]
    pub const fn outputs(&self) -> bool {
        self.outputs
    }

    /// Always fails: shared configurations cannot change.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedOperation`].
    pub fn set_inputs(&self, _inputs: bool) -> Result<()> {
        Err(Error::UnsupportedOperation(
            "cannot change input coercion of a shared configuration",
        ))
    }

    /// Always fails: shared configurations cannot change.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedOperation`].
    pub fn set_outputs(&self, _outputs: bool) -> Result<()> {
        Err(Error::UnsupportedOperation(
            "cannot change output coercion of a shared configuration",
        ))
    }
}

/// Sends messages through a runtime.
///
/// Cloning is cheap; clones share the runtime.
///
/// # Example
///
/// ```
/// use objclink::{Client, SimRuntime, Value};
/// use std::sync::Arc;
///
/// let client = Client::coercing(Arc::new(SimRuntime::new()));
/// let s = unsafe { client.send("NSString", "stringWithUTF8String:", &["Test String".into()]) }
///     .unwrap();
/// assert_eq!(s, Value::from("Test String"));
/// ```
#[derive(Clone)]
pub struct Client {
    runtime: Arc<dyn Runtime>,
    coercion: &'static Coercion,
}

impl Client {
    /// Creates a client with the given configuration.
    #[must_use]
    pub fn new(runtime: Arc<dyn Runtime>, coercion: &'static Coercion) -> Self {
        Self { runtime, coercion }
    }

    /// Creates a client that coerces inputs and outputs.
    #[must_use]
    pub fn coercing(runtime: Arc<dyn Runtime>) -> Self {
        Self::new(runtime, Coercion::all())
    }

    /// Creates a client that coerces nothing.
    #[must_use]
    pub fn raw(runtime: Arc<dyn Runtime>) -> Self {
        Self::new(runtime, Coercion::none())
    }

    /// A client for the system Objective-C runtime.
    #[cfg(target_vendor = "apple")]
    #[must_use]
    pub fn native() -> Self {
        Self::coercing(crate::runtime::ObjcRuntime::shared())
    }

    /// The same runtime with another configuration.
    #[must_use]
    pub fn with_coercion(&self, coercion: &'static Coercion) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
            coercion,
        }
    }

    /// The same runtime without coercion.
    #[must_use]
    pub fn to_raw(&self) -> Self {
        self.with_coercion(Coercion::none())
    }

    /// The configuration.
    #[must_use]
    pub fn coercion(&self) -> &'static Coercion {
        self.coercion
    }

    /// The runtime.
    #[must_use]
    pub fn runtime(&self) -> &dyn Runtime {
        self.runtime.as_ref()
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Looks up a class by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such class is registered.
    pub fn class(&self, name: &str) -> Result<Handle> {
        self.runtime
            .lookup_class(name)
            .ok_or_else(|| Error::class_not_found(name))
    }

    /// Returns the selector for `name`.
    #[must_use]
    pub fn selector(&self, name: &str) -> Handle {
        self.runtime.register_selector(name)
    }

    /// Name of a class.
    ///
    /// # Safety
    ///
    /// `class` must be nil or a class of this runtime.
    #[must_use]
    pub unsafe fn class_name(&self, class: Handle) -> Option<String> {
        unsafe { self.runtime.class_name(class) }
    }

    /// Name of a selector.
    ///
    /// # Safety
    ///
    /// `selector` must be nil or a selector of this runtime.
    #[must_use]
    pub unsafe fn selector_name(&self, selector: Handle) -> Option<String> {
        unsafe { self.runtime.selector_name(selector) }
    }

    /// Reads an `NSString`; nil yields `None`.
    ///
    /// # Safety
    ///
    /// `string` must be nil or a live `NSString`.
    ///
    /// # Errors
    ///
    /// Propagates dispatch failures.
    pub unsafe fn string(&self, string: Handle) -> Result<Option<String>> {
        unsafe { coerce::read_nsstring(self.runtime(), string) }
    }

    fn resolve_receiver(&self, target: Target<'_>) -> Result<Handle> {
        match target {
            Target::Handle(h) => Ok(h),
            Target::Name(name) => self.class(name),
            Target::Peer(peer) => Ok(peer.peer()),
        }
    }

    fn resolve_selector(&self, target: Target<'_>) -> Handle {
        match target {
            Target::Handle(h) => h,
            Target::Name(name) => self.selector(name),
            Target::Peer(peer) => peer.peer(),
        }
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Sends `selector` to `receiver` with `args`.
    ///
    /// # Safety
    ///
    /// Handles among the receiver, selector and arguments must be nil or
    /// live entities of this runtime, and pointer arguments must be valid
    /// for what the method does with them.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`]: unknown class name, or the receiver does not
    ///   respond to the selector.
    /// - [`Error::ArgumentCountMismatch`]: wrong number of arguments.
    /// - [`Error::MarshalError`]: an argument or the result has no native
    ///   representation under this configuration.
    pub unsafe fn send<'a>(
        &self,
        receiver: impl Into<Target<'a>>,
        selector: impl Into<Target<'a>>,
        args: &[Value],
    ) -> Result<Value> {
        let receiver = self.resolve_receiver(receiver.into())?;
        let selector = self.resolve_selector(selector.into());
        let message = Message::new(receiver, selector, args.to_vec(), self.coercion);
        unsafe { self.dispatch(&message) }
    }

    /// Sends and returns the result as a native address.
    ///
    /// # Safety
    ///
    /// See [`Client::send`].
    ///
    /// # Errors
    ///
    /// As [`Client::send`], plus [`Error::TypeMismatch`].
    pub unsafe fn send_pointer<'a>(
        &self,
        receiver: impl Into<Target<'a>>,
        selector: impl Into<Target<'a>>,
        args: &[Value],
    ) -> Result<Handle> {
        unsafe { self.send(receiver, selector, args) }?.to_pointer()
    }

    /// Sends and returns the result as a proxy.
    ///
    /// # Safety
    ///
    /// See [`Client::send`].
    ///
    /// # Errors
    ///
    /// As [`Client::send`], plus [`Error::TypeMismatch`].
    pub unsafe fn send_proxy<'a>(
        &self,
        receiver: impl Into<Target<'a>>,
        selector: impl Into<Target<'a>>,
        args: &[Value],
    ) -> Result<Proxy> {
        unsafe { self.send(receiver, selector, args) }?.into_proxy()
    }

    /// Sends and returns the result as a boolean.
    ///
    /// # Safety
    ///
    /// See [`Client::send`].
    ///
    /// # Errors
    ///
    /// As [`Client::send`], plus [`Error::TypeMismatch`].
    pub unsafe fn send_bool<'a>(
        &self,
        receiver: impl Into<Target<'a>>,
        selector: impl Into<Target<'a>>,
        args: &[Value],
    ) -> Result<bool> {
        unsafe { self.send(receiver, selector, args) }?.to_bool()
    }

    /// Sends and returns the result as an integer.
    ///
    /// # Safety
    ///
    /// See [`Client::send`].
    ///
    /// # Errors
    ///
    /// As [`Client::send`], plus [`Error::TypeMismatch`].
    pub unsafe fn send_int<'a>(
        &self,
        receiver: impl Into<Target<'a>>,
        selector: impl Into<Target<'a>>,
        args: &[Value],
    ) -> Result<i64> {
        unsafe { self.send(receiver, selector, args) }?.to_int()
    }

    /// Sends and returns the result as a double.
    ///
    /// # Safety
    ///
    /// See [`Client::send`].
    ///
    /// # Errors
    ///
    /// As [`Client::send`], plus [`Error::TypeMismatch`].
    pub unsafe fn send_double<'a>(
        &self,
        receiver: impl Into<Target<'a>>,
        selector: impl Into<Target<'a>>,
        args: &[Value],
    ) -> Result<f64> {
        unsafe { self.send(receiver, selector, args) }?.to_double()
    }

    /// Sends and returns the result as a string.
    ///
    /// # Safety
    ///
    /// See [`Client::send`].
    ///
    /// # Errors
    ///
    /// As [`Client::send`], plus [`Error::TypeMismatch`].
    pub unsafe fn send_string<'a>(
        &self,
        receiver: impl Into<Target<'a>>,
        selector: impl Into<Target<'a>>,
        args: &[Value],
    ) -> Result<Option<String>> {
        unsafe { self.send(receiver, selector, args) }?.into_string()
    }

    /// Sends without coercion and wraps the resulting handle in a proxy
    /// bound to this client.
    ///
    /// Typical use is `[[Class alloc] init]` style chains:
    ///
    /// ```
    /// use objclink::{Client, SimRuntime};
    /// use std::sync::Arc;
    ///
    /// let client = Client::coercing(Arc::new(SimRuntime::new()));
    /// let array = unsafe { client.chain("NSMutableArray", "alloc", &[]) }.unwrap();
    /// let array = unsafe { client.chain(&array, "init", &[]) }.unwrap();
    /// assert_eq!(unsafe { array.send_int("count", &[]) }.unwrap(), 0);
    /// ```
    ///
    /// # Safety
    ///
    /// See [`Client::send`]. Arguments must already be native values.
    ///
    /// # Errors
    ///
    /// As [`Client::send`] on a raw client.
    pub unsafe fn chain<'a>(
        &self,
        receiver: impl Into<Target<'a>>,
        selector: impl Into<Target<'a>>,
        args: &[Value],
    ) -> Result<Proxy> {
        let handle = unsafe { self.to_raw().send_pointer(receiver, selector, args) }?;
        Ok(Proxy::new(handle, self.clone()))
    }

    /// Splits a flat list into messages.
    ///
    /// Each group is `receiver, selector, args...`; a [`Value::Null`] ends
    /// the group. A receiver of `"_"` is nil, other text is a class name.
    /// Because [`Value::Null`] always ends a group, a nil argument inside it
    /// has to be written `Value::Pointer(Handle::NULL)`.
    ///
    /// ```
    /// use objclink::{Client, SimRuntime, Value};
    /// use std::sync::Arc;
    ///
    /// let client = Client::coercing(Arc::new(SimRuntime::new()));
    /// let messages = client
    ///     .build_message_chain(vec![
    ///         "NSString".into(), "stringWithUTF8String:".into(), "a".into(), Value::Null,
    ///         "_".into(), "description".into(),
    ///     ])
    ///     .unwrap();
    /// assert_eq!(messages.len(), 2);
    /// assert!(messages[1].receiver.is_null());
    /// ```
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for an unknown class name.
    /// - [`Error::TypeMismatch`] for a receiver or selector of the wrong kind.
    /// - [`Error::MarshalError`] for a group without a selector.
    pub fn build_message_chain(&self, parts: Vec<Value>) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        let mut parts = parts.into_iter();

        while let Some(first) = parts.next() {
            let receiver = match first {
                // Empty group.
                Value::Null => continue,
                Value::Text(name) if name == "_" => Handle::NULL,
                Value::Text(name) => self.class(&name)?,
                Value::Pointer(h) => h,
                Value::Proxy(p) => p.peer(),
                other => {
                    return Err(Error::TypeMismatch {
                        expected: "receiver",
                        found: other.kind().to_string(),
                    });
                }
            };
            let selector = match parts.next() {
                Some(Value::Text(name)) => self.selector(&name),
                Some(Value::Pointer(h)) => h,
                Some(Value::Proxy(p)) => p.peer(),
                None | Some(Value::Null) => {
                    return Err(Error::marshal(
                        format!("message {}", messages.len()),
                        "no selector",
                    ));
                }
                Some(other) => {
                    return Err(Error::TypeMismatch {
                        expected: "selector",
                        found: other.kind().to_string(),
                    });
                }
            };
            let args = parts.by_ref().take_while(|v| *v != Value::Null).collect();
            messages.push(Message::new(receiver, selector, args, self.coercion));
        }
        Ok(messages)
    }

    /// Dispatches messages in order and returns every result.
    ///
    /// Stops at the first failure.
    ///
    /// # Safety
    ///
    /// See [`Client::send`].
    ///
    /// # Errors
    ///
    /// As [`Client::send`].
    pub unsafe fn send_messages(&self, messages: &[Message]) -> Result<Vec<Value>> {
        messages
            .iter()
            .map(|message| unsafe { self.with_coercion(message.coercion).dispatch(message) })
            .collect()
    }

    /// Creates a `T` and links it to a native peer.
    ///
    /// If `T::instantiate` leaves the peer nil, `[T::CLASS_NAME alloc]` is
    /// sent followed by `init`.
    ///
    /// # Safety
    ///
    /// `T::CLASS_NAME` must name a class whose `alloc` and `init` behave as
    /// in `NSObject`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstructionError`] if instantiation fails or the
    /// allocation yields nil.
    pub unsafe fn new_object<T: Recipient>(&self) -> Result<T> {
        let type_name = std::any::type_name::<T>();
        let construction =
            |reason: String| Error::ConstructionError(format!("{type_name}: {reason}"));

        let mut instance = T::instantiate().map_err(|e| construction(e.to_string()))?;
        if instance.peer().is_null() {
            let raw = self.to_raw();
            let allocated = unsafe { raw.send_pointer(T::CLASS_NAME, "alloc", &[]) }
                .map_err(|e| construction(e.to_string()))?;
            let peer = unsafe { raw.send_pointer(allocated, "init", &[]) }
                .map_err(|e| construction(e.to_string()))?;
            if peer.is_null() {
                return Err(construction(format!("[{} alloc] init returned nil", T::CLASS_NAME)));
            }
            debug!("new_object: linked {type_name} to {} {peer}", T::CLASS_NAME);
            instance.set_peer(peer);
        }
        Ok(instance)
    }

    /// Dispatches one message with this client's configuration.
    unsafe fn dispatch(&self, message: &Message) -> Result<Value> {
        let rt = self.runtime();
        let Message {
            receiver,
            selector,
            ref args,
            ..
        } = *message;

        let signature = if receiver.is_null() {
            None
        } else {
            let types =
                unsafe { rt.method_types(receiver, selector) }.ok_or_else(|| Error::NotFound {
                    kind: Lookup::Selector,
                    name: unsafe { self.selector_label(selector) },
                    receiver: Some(unsafe { rt.describe(receiver) }),
                })?;
            Some(Signature::parse(&types)?)
        };

        if let Some(sig) = &signature {
            let expected = sig.explicit_args().len();
            if expected != args.len() {
                return Err(Error::ArgumentCountMismatch {
                    selector: unsafe { self.selector_label(selector) },
                    expected,
                    got: args.len(),
                });
            }
        }

        let ret = match &signature {
            Some(sig) => ReturnKind::for_encoding(sig.ret())?,
            None => ReturnKind::Word,
        };
        let marshaled = unsafe {
            coerce::marshal_args(self, signature.as_ref().map(Signature::explicit_args), args)
        }?;

        trace!(
            "{}: [{} {}] with {} args",
            rt.name(),
            receiver,
            unsafe { self.selector_label(selector) },
            args.len()
        );
        let raw = unsafe { rt.msg_send(receiver, selector, &marshaled.args, &ret) }?;
        drop(marshaled);

        unsafe { coerce::coerce_result(self, raw, signature.as_ref().map(Signature::ret)) }
    }

    unsafe fn selector_label(&self, selector: Handle) -> String {
        unsafe { self.runtime.selector_name(selector) }.unwrap_or_else(|| selector.to_string())
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("runtime", &self.runtime.name())
            .field("coercion", self.coercion)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::SimRuntime;

    fn client() -> (Arc<SimRuntime>, Client) {
        let rt = Arc::new(SimRuntime::new());
        (rt.clone(), Client::coercing(rt))
    }

    #[test]
    fn test_coercion_singletons() {
        assert!(std::ptr::eq(Coercion::all(), Coercion::all()));
        assert!(std::ptr::eq(Coercion::none(), Coercion::none()));
        assert_ne!(Coercion::all(), Coercion::none());
        assert!(matches!(
            Coercion::all().set_outputs(false),
            Err(Error::UnsupportedOperation(_))
        ));
        assert!(Coercion::all().outputs());
    }

    #[test]
    fn test_with_coercion_shares_runtime() {
        let (_, client) = client();
        let raw = client.to_raw();
        assert!(std::ptr::eq(raw.coercion(), Coercion::none()));
        assert_eq!(client.selector("count"), raw.selector("count"));
    }

    #[test]
    fn test_unknown_class() {
        let (_, client) = client();
        let err = unsafe { client.send("NSNope", "alloc", &[]) }.unwrap_err();
        assert_eq!(err, Error::class_not_found("NSNope"));
    }

    #[test]
    fn test_nil_receiver_returns_null() {
        let (rt, client) = client();
        let before = rt.sends();
        let result = unsafe { client.send(Handle::NULL, "anything:", &[Value::Int(1)]) }.unwrap();
        assert_eq!(result, Value::Null);
        assert_eq!(rt.sends(), before + 1);

        let raw = unsafe { client.to_raw().send(Handle::NULL, "anything", &[]) }.unwrap();
        assert_eq!(raw, Value::Pointer(Handle::NULL));
    }

    #[test]
    fn test_argument_count_checked_before_dispatch() {
        let (rt, client) = client();
        let before = rt.sends();
        let err = unsafe { client.send("NSString", "stringWithUTF8String:", &[]) }.unwrap_err();
        assert!(matches!(err, Error::ArgumentCountMismatch { expected: 1, got: 0, .. }));
        assert_eq!(rt.sends(), before);
    }

    #[test]
    fn test_marshal_failure_sends_nothing() {
        let (rt, client) = client();
        let array = unsafe { client.send_proxy("NSMutableArray", "array", &[]) }.unwrap();
        let before = rt.sends();
        let err = unsafe { array.send("objectAtIndex:", &[Value::Float(0.5)]) }.unwrap_err();
        assert!(matches!(err, Error::MarshalError { .. }));
        assert_eq!(rt.sends(), before);
    }

    #[test]
    fn test_typed_wrappers() {
        let (_, client) = client();
        let n = unsafe { client.send_proxy("NSNumber", "numberWithLongLong:", &[Value::Int(-7)]) }
            .unwrap();
        assert_eq!(unsafe { client.send_int(&n, "longLongValue", &[]) }.unwrap(), -7);
        assert_eq!(unsafe { client.send_double(&n, "doubleValue", &[]) }.unwrap(), -7.0);
        assert!(unsafe { client.send_bool(&n, "boolValue", &[]) }.unwrap());
        assert!(matches!(
            unsafe { client.send_string(&n, "longLongValue", &[]) },
            Err(Error::TypeMismatch { expected: "string", .. })
        ));
    }

    #[test]
    fn test_build_message_chain_errors() {
        let (_, client) = client();
        assert!(matches!(
            client.build_message_chain(vec!["NSString".into()]),
            Err(Error::MarshalError { .. })
        ));
        assert!(matches!(
            client.build_message_chain(vec![Value::Int(1), "count".into()]),
            Err(Error::TypeMismatch { expected: "receiver", .. })
        ));
        assert!(matches!(
            client.build_message_chain(vec!["NSNope".into(), "count".into()]),
            Err(Error::NotFound { .. })
        ));
        assert!(client.build_message_chain(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_messages_carry_client_coercion() {
        let (_, client) = client();
        let raw = client.to_raw();
        let messages = raw
            .build_message_chain(vec!["NSArray".into(), "array".into()])
            .unwrap();
        assert!(std::ptr::eq(messages[0].coercion, Coercion::none()));
        let results = unsafe { client.send_messages(&messages) }.unwrap();
        assert!(matches!(results[0], Value::Pointer(_)));
    }
}

//! The system Objective-C runtime.
//!
//! Links `libobjc` and `Foundation` and implements [`Runtime`] on top of
//! them. `objc_msgSend` is called through a `libffi` interface built from
//! the method's type encoding, so every argument goes where the C ABI puts
//! it for its declared type. Interfaces are cached per thread by encoding.

use super::{Encoding, Handle, Runtime, Signature};
use crate::abi::{ForeignCall, NativeArg, RawReturn, ReturnKind};
use crate::error::{Error, Result};
use fxhash::FxHashMap;
use objclink_log::trace;
use std::cell::RefCell;
use std::ffi::{CStr, CString, c_char, c_void};
use std::rc::Rc;
use std::sync::{Arc, OnceLock};

type Id = *mut c_void;
type Sel = *mut c_void;
type Class = *mut c_void;
type Method = *mut c_void;

#[link(name = "objc", kind = "dylib")]
unsafe extern "C" {
    fn objc_lookUpClass(name: *const c_char) -> Class;
    fn sel_registerName(name: *const c_char) -> Sel;
    fn sel_getName(sel: Sel) -> *const c_char;
    fn class_getName(cls: Class) -> *const c_char;
    fn class_isMetaClass(cls: Class) -> u8;
    fn class_getInstanceMethod(cls: Class, sel: Sel) -> Method;
    fn method_getTypeEncoding(method: Method) -> *const c_char;
    fn object_getClass(obj: Id) -> Class;
    fn objc_msgSend();
    #[cfg(target_arch = "x86_64")]
    fn objc_msgSend_stret();
}

// Registers the Foundation classes with the runtime.
#[link(name = "Foundation", kind = "framework")]
unsafe extern "C" {}

/// `libobjc` behind the [`Runtime`] trait.
#[derive(Debug)]
pub struct ObjcRuntime {
    _private: (),
}

static SHARED: OnceLock<Arc<ObjcRuntime>> = OnceLock::new();

impl ObjcRuntime {
    /// The process-wide instance.
    #[must_use]
    pub fn shared() -> Arc<ObjcRuntime> {
        Arc::clone(SHARED.get_or_init(|| Arc::new(ObjcRuntime { _private: () })))
    }
}

thread_local! {
    static CALL_CACHE: RefCell<FxHashMap<String, Rc<ForeignCall>>> =
        RefCell::new(FxHashMap::default());
}

/// Returns the cached interface for `key`, building it on first use.
fn cached_call(
    key: String,
    build: impl FnOnce() -> Result<ForeignCall>,
) -> Result<Rc<ForeignCall>> {
    CALL_CACHE.with(|cache| {
        if let Some(call) = cache.borrow().get(&key) {
            return Ok(Rc::clone(call));
        }
        let call = Rc::new(build()?);
        cache.borrow_mut().insert(key, Rc::clone(&call));
        Ok(call)
    })
}

/// The interface for a method of known types.
fn declared_call(types: &str) -> Result<Rc<ForeignCall>> {
    cached_call(types.to_string(), || {
        let sig = Signature::parse(types)?;
        ForeignCall::new(sig.args(), sig.ret())
    })
}

/// The interface implied by the arguments alone, for methods the runtime
/// has no encoding for.
fn inferred_call(args: &[NativeArg], ret: &ReturnKind) -> Result<Rc<ForeignCall>> {
    let ret = match ret {
        ReturnKind::Word => Encoding::Pointer(Box::new(Encoding::Void)),
        ReturnKind::F32 => Encoding::Float,
        ReturnKind::F64 => Encoding::Double,
        ReturnKind::Struct(layout) => layout.clone(),
    };
    let mut encodings = vec![Encoding::Object, Encoding::Selector];
    encodings.extend(args.iter().map(NativeArg::default_encoding));
    let key = encodings.iter().fold(ret.to_string(), |mut key, e| {
        key.push_str(&e.to_string());
        key
    });
    cached_call(key, || ForeignCall::new(&encodings, &ret))
}

/// The send entry point for `call`.
///
/// On x86-64 a structure returned through memory needs the variant that
/// expects the hidden result pointer ahead of self.
#[cfg(target_arch = "x86_64")]
fn entry_point(call: &ForeignCall) -> unsafe extern "C" fn() {
    if call.returns_in_memory() {
        objc_msgSend_stret
    } else {
        objc_msgSend
    }
}

/// The send entry point for `call`.
#[cfg(not(target_arch = "x86_64"))]
fn entry_point(_call: &ForeignCall) -> unsafe extern "C" fn() {
    objc_msgSend
}

unsafe fn owned(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

impl Runtime for ObjcRuntime {
    fn lookup_class(&self, name: &str) -> Option<Handle> {
        let name = CString::new(name).ok()?;
        let class = unsafe { objc_lookUpClass(name.as_ptr()) };
        (!class.is_null()).then(|| Handle::from_ptr(class))
    }

    fn register_selector(&self, name: &str) -> Handle {
        // Selector names never contain NUL; one that does maps to nil.
        let Ok(name) = CString::new(name) else {
            return Handle::NULL;
        };
        Handle::from_ptr(unsafe { sel_registerName(name.as_ptr()) })
    }

    unsafe fn class_name(&self, class: Handle) -> Option<String> {
        if class.is_null() {
            return None;
        }
        unsafe { owned(class_getName(class.as_ptr())) }
    }

    unsafe fn selector_name(&self, selector: Handle) -> Option<String> {
        if selector.is_null() {
            return None;
        }
        unsafe { owned(sel_getName(selector.as_ptr())) }
    }

    unsafe fn class_of(&self, object: Handle) -> Option<Handle> {
        if object.is_null() {
            return None;
        }
        let class = unsafe { object_getClass(object.as_ptr()) };
        (!class.is_null()).then(|| Handle::from_ptr(class))
    }

    unsafe fn is_class(&self, handle: Handle) -> bool {
        unsafe { self.class_of(handle) }
            .is_some_and(|class| unsafe { class_isMetaClass(class.as_ptr()) } != 0)
    }

    unsafe fn method_types(&self, receiver: Handle, selector: Handle) -> Option<String> {
        // For a class this is its metaclass, whose instance methods are the
        // class methods.
        let class = unsafe { self.class_of(receiver) }?;
        let method = unsafe { class_getInstanceMethod(class.as_ptr(), selector.as_ptr()) };
        if method.is_null() {
            return None;
        }
        unsafe { owned(method_getTypeEncoding(method)) }
    }

    unsafe fn msg_send(
        &self,
        receiver: Handle,
        selector: Handle,
        args: &[NativeArg],
        ret: &ReturnKind,
    ) -> Result<RawReturn> {
        if receiver.is_null() {
            return Ok(RawReturn::zero(ret));
        }
        let call = match unsafe { self.method_types(receiver, selector) } {
            Some(types) => declared_call(&types)?,
            None => inferred_call(args, ret)?,
        };
        if call.return_kind() != ret {
            return Err(Error::marshal(
                "return value",
                format!("method returns {:?} but caller expects {ret:?}", call.return_kind()),
            ));
        }

        let mut native = Vec::with_capacity(args.len() + 2);
        native.push(NativeArg::Word(receiver.addr()));
        native.push(NativeArg::Word(selector.addr()));
        native.extend_from_slice(args);
        trace!("objc: send with {} args", args.len());
        // SAFETY: the interface matches the method's declared types and the
        // caller vouches for the handles among `args`.
        unsafe { call.call(entry_point(&call), &native) }
    }

    fn name(&self) -> &'static str {
        "objc"
    }
}

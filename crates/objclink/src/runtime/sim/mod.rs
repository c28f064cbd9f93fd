//! In-process Objective-C runtime.
//!
//! `SimRuntime` keeps classes, selectors and objects in registries of its
//! own and runs method implementations written as Rust closures. Dispatch
//! follows the Objective-C rules the client depends on:
//!
//! - Selectors are interned: one handle per name.
//! - Instances look up instance methods along the superclass chain.
//! - Classes look up class methods along the chain, then the root class's
//!   instance methods.
//! - A message to nil does nothing and returns zero.
//! - Objects are reference counted and deallocated at zero.
//!
//! A Foundation subset (`NSObject`, `NSString`, `NSNumber`, `NSArray`,
//! `NSMutableArray`, `NSEnumerator`, `NSAutoreleasePool`) is installed by
//! [`SimRuntime::new`]. More classes can be added with
//! [`SimRuntime::define_class`] and [`SimRuntime::add_method`].
//!
//! # Thread Safety
//!
//! Registries sit behind `RwLock`/`Mutex`. No lock is held while a method
//! implementation runs, so implementations may send further messages.

mod foundation;

use crate::abi::{NativeArg, RawReturn, ReturnKind};
use crate::error::{Error, Lookup, Result};
use crate::runtime::{Encoding, Handle, Runtime, Signature};
use fxhash::FxHashMap;
use objclink_log::{debug, trace};
use std::ffi::CString;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// First address handed out. Low enough to read, high enough to never be
/// mistaken for a small integer.
const BASE_ADDRESS: usize = 0x1000_0000;

/// Distance between handles; keeps them 16-byte aligned like malloc.
const ADDRESS_STRIDE: usize = 16;

/// Method implementation: `(runtime, self, arguments) -> return value`.
pub type SimImp = Arc<dyn Fn(&SimRuntime, Handle, &[NativeArg]) -> Result<RawReturn> + Send + Sync>;

struct SimMethod {
    types: String,
    signature: Signature,
    imp: SimImp,
}

struct SimClass {
    name: String,
    superclass: Option<Handle>,
    instance_methods: FxHashMap<Handle, Arc<SimMethod>>,
    class_methods: FxHashMap<Handle, Arc<SimMethod>>,
}

/// Instance state of a simulated object.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// No state beyond identity.
    Plain,
    /// String contents. The `CString` buffer is what `UTF8String` returns.
    String(CString),
    Number(Number),
    /// Array elements, each retained by the array.
    Array(Vec<Handle>),
    /// Enumeration snapshot, each element retained.
    Enumerator { items: Vec<Handle>, next: usize },
    /// Objects to release when the pool drains.
    Pool(Vec<Handle>),
}

impl Payload {
    fn into_owned_handles(self) -> Vec<Handle> {
        match self {
            Payload::Array(items) | Payload::Enumerator { items, .. } | Payload::Pool(items) => {
                items
            }
            _ => Vec::new(),
        }
    }
}

/// Value boxed by an `NSNumber`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl Number {
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn as_i64(self) -> i64 {
        match self {
            Number::Int(v) => v,
            Number::UInt(v) => v as i64,
            Number::Float(v) => v as i64,
            Number::Bool(v) => i64::from(v),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(v) => v as f64,
            Number::UInt(v) => v as f64,
            Number::Float(v) => v,
            Number::Bool(v) => f64::from(u8::from(v)),
        }
    }
}

struct SimObject {
    class: Handle,
    retain_count: usize,
    payload: Payload,
}

#[derive(Default)]
struct SelectorTable {
    by_name: FxHashMap<String, Handle>,
    names: FxHashMap<Handle, String>,
}

#[derive(Default)]
struct ClassTable {
    by_name: FxHashMap<String, Handle>,
    classes: FxHashMap<Handle, SimClass>,
}

/// An Objective-C runtime simulated in process.
///
/// # Example
///
/// ```
/// use objclink::{Runtime, SimRuntime};
///
/// let rt = SimRuntime::new();
/// let string_class = rt.lookup_class("NSString").unwrap();
/// let sel = rt.register_selector("stringWithUTF8String:");
/// assert_eq!(sel, rt.register_selector("stringWithUTF8String:"));
///
/// let types = unsafe { rt.method_types(string_class, sel) }.unwrap();
/// assert_eq!(types, "@@:r*");
/// ```
pub struct SimRuntime {
    next_address: AtomicUsize,
    selectors: RwLock<SelectorTable>,
    classes: RwLock<ClassTable>,
    objects: Mutex<FxHashMap<Handle, SimObject>>,
    /// Open autorelease pools, innermost last.
    pools: Mutex<Vec<Handle>>,
    sends: AtomicU64,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimRuntime {
    /// Creates a runtime with the Foundation subset installed.
    #[must_use]
    pub fn new() -> Self {
        let rt = Self::bare();
        foundation::install(&rt);
        rt
    }

    /// Creates a runtime with no classes at all.
    #[must_use]
    pub fn bare() -> Self {
        Self {
            next_address: AtomicUsize::new(BASE_ADDRESS),
            selectors: RwLock::new(SelectorTable::default()),
            classes: RwLock::new(ClassTable::default()),
            objects: Mutex::new(FxHashMap::default()),
            pools: Mutex::new(Vec::new()),
            sends: AtomicU64::new(0),
        }
    }

    fn next_handle(&self) -> Handle {
        Handle::from_raw(self.next_address.fetch_add(ADDRESS_STRIDE, Ordering::Relaxed))
    }

    /// Registers a new class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassAlreadyExists`] if the name is taken, and
    /// [`Error::NotFound`] if `superclass` names no class.
    pub fn define_class(&self, name: &str, superclass: Option<&str>) -> Result<Handle> {
        let mut table = write(&self.classes);
        if table.by_name.contains_key(name) {
            return Err(Error::ClassAlreadyExists(name.to_string()));
        }
        let superclass = match superclass {
            Some(parent) => Some(
                *table
                    .by_name
                    .get(parent)
                    .ok_or_else(|| Error::class_not_found(parent))?,
            ),
            None => None,
        };
        let handle = self.next_handle();
        table.by_name.insert(name.to_string(), handle);
        table.classes.insert(
            handle,
            SimClass {
                name: name.to_string(),
                superclass,
                instance_methods: FxHashMap::default(),
                class_methods: FxHashMap::default(),
            },
        );
        trace!("sim: defined class {name} at {handle}");
        Ok(handle)
    }

    /// Adds or replaces an instance method.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEncoding`] if `types` is not a method
    /// signature, and [`Error::NotFound`] if `class` is not a class.
    pub fn add_method<F>(&self, class: Handle, selector: &str, types: &str, imp: F) -> Result<()>
    where
        F: Fn(&SimRuntime, Handle, &[NativeArg]) -> Result<RawReturn> + Send + Sync + 'static,
    {
        self.insert_method(class, selector, types, Arc::new(imp), false)
    }

    /// Adds or replaces a class method.
    ///
    /// # Errors
    ///
    /// Same as [`SimRuntime::add_method`].
    pub fn add_class_method<F>(
        &self,
        class: Handle,
        selector: &str,
        types: &str,
        imp: F,
    ) -> Result<()>
    where
        F: Fn(&SimRuntime, Handle, &[NativeArg]) -> Result<RawReturn> + Send + Sync + 'static,
    {
        self.insert_method(class, selector, types, Arc::new(imp), true)
    }

    fn insert_method(
        &self,
        class: Handle,
        selector: &str,
        types: &str,
        imp: SimImp,
        class_side: bool,
    ) -> Result<()> {
        let signature = Signature::parse(types)?;
        let sel = self.register_selector(selector);
        let mut table = write(&self.classes);
        let entry = table.classes.get_mut(&class).ok_or_else(|| Error::NotFound {
            kind: Lookup::Class,
            name: class.to_string(),
            receiver: None,
        })?;
        let methods = if class_side {
            &mut entry.class_methods
        } else {
            &mut entry.instance_methods
        };
        methods.insert(
            sel,
            Arc::new(SimMethod {
                types: types.to_string(),
                signature,
                imp,
            }),
        );
        Ok(())
    }

    /// Allocates an instance of `class` with retain count one.
    pub fn alloc_instance(&self, class: Handle, payload: Payload) -> Handle {
        let handle = self.next_handle();
        lock(&self.objects).insert(
            handle,
            SimObject {
                class,
                retain_count: 1,
                payload,
            },
        );
        handle
    }

    /// Runs `f` on the payload of a live object.
    ///
    /// `f` runs under the object registry lock and must not call back into
    /// the runtime.
    pub fn with_payload<R>(&self, object: Handle, f: impl FnOnce(&mut Payload) -> R) -> Option<R> {
        lock(&self.objects).get_mut(&object).map(|o| f(&mut o.payload))
    }

    /// Increments the retain count.
    pub fn retain(&self, object: Handle) {
        if let Some(o) = lock(&self.objects).get_mut(&object) {
            o.retain_count += 1;
        }
    }

    /// Decrements the retain count, deallocating at zero.
    ///
    /// Deallocating a container releases its elements.
    pub fn release(&self, object: Handle) {
        let mut pending = vec![object];
        while let Some(handle) = pending.pop() {
            let freed = {
                let mut objects = lock(&self.objects);
                let Some(o) = objects.get_mut(&handle) else {
                    continue;
                };
                o.retain_count = o.retain_count.saturating_sub(1);
                if o.retain_count > 0 {
                    continue;
                }
                objects.remove(&handle)
            };
            if let Some(o) = freed {
                trace!("sim: dealloc {handle}");
                pending.extend(o.payload.into_owned_handles());
            }
        }
    }

    /// Adds `object` to the innermost autorelease pool.
    pub fn autorelease(&self, object: Handle) {
        let Some(pool) = lock(&self.pools).last().copied() else {
            debug!("sim: {object} autoreleased with no pool in place, just leaking");
            return;
        };
        self.with_payload(pool, |payload| {
            if let Payload::Pool(items) = payload {
                items.push(object);
            }
        });
    }

    fn push_pool(&self, pool: Handle) {
        lock(&self.pools).push(pool);
    }

    fn pop_pool(&self, pool: Handle) {
        let mut pools = lock(&self.pools);
        if let Some(index) = pools.iter().rposition(|p| *p == pool) {
            // Draining an outer pool drains everything nested in it.
            pools.truncate(index);
        }
    }

    /// Current retain count, or `None` once deallocated.
    #[must_use]
    pub fn retain_count(&self, object: Handle) -> Option<usize> {
        lock(&self.objects).get(&object).map(|o| o.retain_count)
    }

    /// Returns true while the object is allocated.
    #[must_use]
    pub fn is_alive(&self, object: Handle) -> bool {
        lock(&self.objects).contains_key(&object)
    }

    /// Number of live objects.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        lock(&self.objects).len()
    }

    /// Messages sent so far, including sends to nil.
    #[must_use]
    pub fn sends(&self) -> u64 {
        self.sends.load(Ordering::Relaxed)
    }

    /// Contents of a string object.
    #[must_use]
    pub fn string_value(&self, object: Handle) -> Option<String> {
        self.with_payload(object, |payload| match payload {
            Payload::String(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .flatten()
    }

    /// Returns true if `class` is `ancestor` or inherits from it.
    #[must_use]
    pub fn is_subclass(&self, class: Handle, ancestor: Handle) -> bool {
        let table = read(&self.classes);
        let mut current = Some(class);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = table.classes.get(&c).and_then(|entry| entry.superclass);
        }
        false
    }

    fn object_class(&self, object: Handle) -> Option<Handle> {
        lock(&self.objects).get(&object).map(|o| o.class)
    }

    fn find_method(&self, receiver: Handle, selector: Handle) -> Option<Arc<SimMethod>> {
        let instance_class = if read(&self.classes).classes.contains_key(&receiver) {
            None
        } else {
            Some(self.object_class(receiver)?)
        };

        let table = read(&self.classes);
        let mut current = Some(instance_class.unwrap_or(receiver));
        let mut root = None;
        while let Some(c) = current {
            let entry = table.classes.get(&c)?;
            let methods = if instance_class.is_some() {
                &entry.instance_methods
            } else {
                &entry.class_methods
            };
            if let Some(method) = methods.get(&selector) {
                return Some(Arc::clone(method));
            }
            root = Some(entry);
            current = entry.superclass;
        }
        // Class objects also answer the root class's instance methods.
        if instance_class.is_none() {
            return root.and_then(|r| r.instance_methods.get(&selector).map(Arc::clone));
        }
        None
    }

    fn check_args(
        &self,
        selector: Handle,
        signature: &Signature,
        args: &[NativeArg],
    ) -> Result<()> {
        let declared = signature.explicit_args();
        if declared.len() != args.len() {
            return Err(Error::ArgumentCountMismatch {
                selector: self.name_of_selector(selector),
                expected: declared.len(),
                got: args.len(),
            });
        }
        for (index, (decl, arg)) in declared.iter().zip(args).enumerate() {
            let fits = match (decl, arg) {
                (Encoding::Float, NativeArg::F32(_))
                | (Encoding::Double, NativeArg::F64(_)) => true,
                (Encoding::Struct { .. }, NativeArg::Struct(value)) => {
                    decl.same_layout(value.layout())
                }
                (Encoding::Float | Encoding::Double | Encoding::Struct { .. }, _) => false,
                (_, NativeArg::Word(_)) => true,
                _ => false,
            };
            if !fits {
                return Err(Error::marshal(
                    format!("argument {index}"),
                    format!("{decl} slot given {}", arg.kind()),
                ));
            }
        }
        Ok(())
    }

    fn name_of_selector(&self, selector: Handle) -> String {
        read(&self.selectors)
            .names
            .get(&selector)
            .cloned()
            .unwrap_or_else(|| selector.to_string())
    }

    /// Sends a message by selector name from inside the runtime.
    fn send_named(
        &self,
        receiver: Handle,
        selector: &str,
        args: &[NativeArg],
    ) -> Result<RawReturn> {
        let sel = self.register_selector(selector);
        let ret = self
            .find_method(receiver, sel)
            .map_or(Ok(ReturnKind::Word), |m| {
                ReturnKind::for_encoding(m.signature.ret())
            })?;
        // SAFETY: the simulated runtime never dereferences handles.
        unsafe { self.msg_send(receiver, sel, args, &ret) }
    }
}

impl Default for SimRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimRuntime")
            .field("classes", &read(&self.classes).classes.len())
            .field("selectors", &read(&self.selectors).names.len())
            .field("objects", &lock(&self.objects).len())
            .finish_non_exhaustive()
    }
}

impl Runtime for SimRuntime {
    fn lookup_class(&self, name: &str) -> Option<Handle> {
        read(&self.classes).by_name.get(name).copied()
    }

    fn register_selector(&self, name: &str) -> Handle {
        if let Some(sel) = read(&self.selectors).by_name.get(name) {
            return *sel;
        }
        let mut table = write(&self.selectors);
        // Another thread may have won the race.
        if let Some(sel) = table.by_name.get(name) {
            return *sel;
        }
        let sel = self.next_handle();
        table.by_name.insert(name.to_string(), sel);
        table.names.insert(sel, name.to_string());
        sel
    }

    unsafe fn class_name(&self, class: Handle) -> Option<String> {
        read(&self.classes).classes.get(&class).map(|c| c.name.clone())
    }

    unsafe fn selector_name(&self, selector: Handle) -> Option<String> {
        read(&self.selectors).names.get(&selector).cloned()
    }

    unsafe fn class_of(&self, object: Handle) -> Option<Handle> {
        self.object_class(object)
    }

    unsafe fn is_class(&self, handle: Handle) -> bool {
        read(&self.classes).classes.contains_key(&handle)
    }

    unsafe fn method_types(&self, receiver: Handle, selector: Handle) -> Option<String> {
        self.find_method(receiver, selector).map(|m| m.types.clone())
    }

    unsafe fn msg_send(
        &self,
        receiver: Handle,
        selector: Handle,
        args: &[NativeArg],
        ret: &ReturnKind,
    ) -> Result<RawReturn> {
        self.sends.fetch_add(1, Ordering::Relaxed);
        if receiver.is_null() {
            return Ok(RawReturn::zero(ret));
        }
        let Some(method) = self.find_method(receiver, selector) else {
            return Err(Error::NotFound {
                kind: Lookup::Selector,
                name: self.name_of_selector(selector),
                receiver: Some(unsafe { self.describe(receiver) }),
            });
        };
        self.check_args(selector, &method.signature, args)?;
        let declared = ReturnKind::for_encoding(method.signature.ret())?;
        if declared != *ret {
            return Err(Error::marshal(
                "return value",
                format!("method returns {} but caller expects {ret:?}", method.signature.ret()),
            ));
        }
        trace!(
            "sim: {} {} ({} args)",
            receiver,
            self.name_of_selector(selector),
            args.len()
        );
        (method.imp)(self, receiver, args)
    }

    fn name(&self) -> &'static str {
        "sim"
    }
}

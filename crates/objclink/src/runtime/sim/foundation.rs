//! Foundation classes of the simulated runtime.
//!
//! Only the behaviour the client and its tests touch is modelled. Factory
//! methods (`+array`, `+stringWithUTF8String:`, `+numberWith...:`) return
//! autoreleased objects, `alloc` returns an owned one, and containers retain
//! their elements.
//!
//! Index and range violations that Foundation reports by raising an
//! exception come back as [`Error::MarshalError`].

use super::{Number, Payload, SimRuntime};
use crate::abi::{NativeArg, RawReturn, StructValue};
use crate::error::{Error, Result};
use crate::runtime::{Handle, Runtime};
use objclink_log::debug;
use std::ffi::{CStr, CString, c_char};

/// `NSNotFound`.
const NOT_FOUND: usize = isize::MAX as usize;

type Imp = fn(&SimRuntime, Handle, &[NativeArg]) -> Result<RawReturn>;

pub(super) fn install(rt: &SimRuntime) {
    let classes: &[(&str, Option<&str>, &[(&str, &str, Imp)], &[(&str, &str, Imp)])] = &[
        ("NSObject", None, NSOBJECT_CLASS_METHODS, NSOBJECT_METHODS),
        ("NSString", Some("NSObject"), NSSTRING_CLASS_METHODS, NSSTRING_METHODS),
        ("NSNumber", Some("NSObject"), NSNUMBER_CLASS_METHODS, NSNUMBER_METHODS),
        ("NSArray", Some("NSObject"), NSARRAY_CLASS_METHODS, NSARRAY_METHODS),
        ("NSMutableArray", Some("NSArray"), &[], NSMUTABLEARRAY_METHODS),
        ("NSEnumerator", Some("NSObject"), &[], NSENUMERATOR_METHODS),
        ("NSAutoreleasePool", Some("NSObject"), &[], NSAUTORELEASEPOOL_METHODS),
    ];

    for (name, superclass, class_methods, methods) in classes {
        // The table above is static and only ever installed into a fresh
        // runtime, so these registrations cannot fail.
        let Ok(class) = rt.define_class(name, *superclass) else {
            continue;
        };
        for (selector, types, imp) in *class_methods {
            let _ = rt.add_class_method(class, selector, types, *imp);
        }
        for (selector, types, imp) in *methods {
            let _ = rt.add_method(class, selector, types, *imp);
        }
    }
    debug!("sim: installed {} Foundation classes", classes.len());
}

// ============================================================================
// Argument and result helpers
// ============================================================================

fn word(args: &[NativeArg], index: usize) -> Result<usize> {
    args.get(index)
        .and_then(NativeArg::as_word)
        .ok_or_else(|| Error::marshal(format!("argument {index}"), "expected a word"))
}

fn handle(args: &[NativeArg], index: usize) -> Result<Handle> {
    word(args, index).map(Handle::from_raw)
}

fn float(args: &[NativeArg], index: usize) -> Result<f64> {
    match args.get(index) {
        Some(NativeArg::F64(v)) => Ok(*v),
        Some(NativeArg::F32(v)) => Ok(f64::from(*v)),
        _ => Err(Error::marshal(format!("argument {index}"), "expected a float")),
    }
}

fn range(args: &[NativeArg], index: usize) -> Result<(usize, usize)> {
    let bad = || Error::marshal(format!("argument {index}"), "expected an NSRange");
    let Some(NativeArg::Struct(value)) = args.get(index) else {
        return Err(bad());
    };
    Ok((value.word(0).ok_or_else(bad)?, value.word(8).ok_or_else(bad)?))
}

#[allow(clippy::unnecessary_wraps)]
const fn ret_word(w: usize) -> Result<RawReturn> {
    Ok(RawReturn::Word(w))
}

fn ret_handle(h: Handle) -> Result<RawReturn> {
    ret_word(h.addr())
}

fn ret_bool(b: bool) -> Result<RawReturn> {
    ret_word(usize::from(b))
}

fn ret_void() -> Result<RawReturn> {
    ret_word(0)
}

fn elements(rt: &SimRuntime, array: Handle) -> Vec<Handle> {
    rt.with_payload(array, |payload| match payload {
        Payload::Array(items) => items.clone(),
        _ => Vec::new(),
    })
    .unwrap_or_default()
}

fn out_of_bounds(index: usize, count: usize) -> Error {
    Error::marshal(
        "argument 0",
        format!("index {index} beyond bounds [0 .. {}]", count.saturating_sub(1)),
    )
}

impl SimRuntime {
    /// Allocates an `NSString` holding `text`, retain count one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MarshalError`] if `text` contains a NUL byte.
    pub fn new_string(&self, text: &str) -> Result<Handle> {
        let contents = CString::new(text)
            .map_err(|_| Error::marshal("string", "interior NUL byte"))?;
        let class = self
            .lookup_class("NSString")
            .ok_or_else(|| Error::class_not_found("NSString"))?;
        Ok(self.alloc_instance(class, Payload::String(contents)))
    }

    /// Allocates an `NSNumber`, retain count one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the runtime has no `NSNumber` class.
    pub fn new_number(&self, value: Number) -> Result<Handle> {
        let class = self
            .lookup_class("NSNumber")
            .ok_or_else(|| Error::class_not_found("NSNumber"))?;
        Ok(self.alloc_instance(class, Payload::Number(value)))
    }

    fn autoreleased(&self, object: Handle) -> Handle {
        self.autorelease(object);
        object
    }

    fn initial_payload(&self, class: Handle) -> Payload {
        let is = |name: &str| {
            self.lookup_class(name)
                .is_some_and(|ancestor| self.is_subclass(class, ancestor))
        };
        if is("NSArray") {
            Payload::Array(Vec::new())
        } else if is("NSString") {
            Payload::String(CString::default())
        } else if is("NSAutoreleasePool") {
            Payload::Pool(Vec::new())
        } else {
            Payload::Plain
        }
    }

    fn objects_equal(&self, a: Handle, b: Handle) -> bool {
        if a == b {
            return true;
        }
        let left = self.with_payload(a, |p| p.clone());
        let right = self.with_payload(b, |p| p.clone());
        match (left, right) {
            (Some(Payload::String(x)), Some(Payload::String(y))) => x == y,
            (Some(Payload::Number(x)), Some(Payload::Number(y))) => x.as_f64() == y.as_f64(),
            _ => false,
        }
    }
}

// ============================================================================
// NSObject
// ============================================================================

const NSOBJECT_CLASS_METHODS: &[(&str, &str, Imp)] = &[
    ("alloc", "@16@0:8", |rt, this, _| {
        ret_handle(rt.alloc_instance(this, rt.initial_payload(this)))
    }),
    ("new", "@16@0:8", |rt, this, _| {
        let object = rt.alloc_instance(this, rt.initial_payload(this));
        rt.send_named(object, "init", &[])
    }),
    ("class", "#16@0:8", |_, this, _| ret_handle(this)),
];

const NSOBJECT_METHODS: &[(&str, &str, Imp)] = &[
    ("init", "@16@0:8", |_, this, _| ret_handle(this)),
    ("retain", "@16@0:8", |rt, this, _| {
        rt.retain(this);
        ret_handle(this)
    }),
    ("release", "Vv16@0:8", |rt, this, _| {
        rt.release(this);
        ret_void()
    }),
    ("autorelease", "@16@0:8", |rt, this, _| ret_handle(rt.autoreleased(this))),
    ("retainCount", "Q16@0:8", |rt, this, _| {
        ret_word(rt.retain_count(this).unwrap_or(0))
    }),
    ("class", "#16@0:8", |rt, this, _| {
        ret_handle(unsafe { rt.class_of(this) }.unwrap_or(Handle::NULL))
    }),
    ("isKindOfClass:", "B24@0:8#16", |rt, this, args| {
        let class = handle(args, 0)?;
        let own = unsafe { rt.class_of(this) }.unwrap_or(this);
        ret_bool(rt.is_subclass(own, class))
    }),
    ("respondsToSelector:", "B24@0:8:16", |rt, this, args| {
        let selector = handle(args, 0)?;
        ret_bool(rt.find_method(this, selector).is_some())
    }),
    ("isEqual:", "B24@0:8@16", |rt, this, args| {
        ret_bool(rt.objects_equal(this, handle(args, 0)?))
    }),
    ("hash", "Q16@0:8", |_, this, _| ret_word(this.addr())),
    ("description", "@16@0:8", |rt, this, _| {
        let text = unsafe { rt.describe(this) };
        ret_handle(rt.autoreleased(rt.new_string(&text)?))
    }),
];

// ============================================================================
// NSString
// ============================================================================

fn read_c_string(ptr: usize) -> Option<CString> {
    if ptr == 0 {
        return None;
    }
    // SAFETY: callers of `msg_send` guarantee that a `*` argument points to
    // a NUL-terminated string.
    Some(unsafe { CStr::from_ptr(ptr as *const c_char) }.to_owned())
}

fn string_contents(rt: &SimRuntime, object: Handle) -> Option<CString> {
    rt.with_payload(object, |payload| match payload {
        Payload::String(s) => Some(s.clone()),
        _ => None,
    })
    .flatten()
}

const NSSTRING_CLASS_METHODS: &[(&str, &str, Imp)] = &[
    ("stringWithUTF8String:", "@@:r*", |rt, this, args| {
        let Some(contents) = read_c_string(word(args, 0)?) else {
            return ret_handle(Handle::NULL);
        };
        let object = rt.alloc_instance(this, Payload::String(contents));
        ret_handle(rt.autoreleased(object))
    }),
    ("string", "@@:", |rt, this, _| {
        let object = rt.alloc_instance(this, Payload::String(CString::default()));
        ret_handle(rt.autoreleased(object))
    }),
];

const NSSTRING_METHODS: &[(&str, &str, Imp)] = &[
    ("initWithUTF8String:", "@@:r*", |rt, this, args| {
        let Some(contents) = read_c_string(word(args, 0)?) else {
            rt.release(this);
            return ret_handle(Handle::NULL);
        };
        rt.with_payload(this, |payload| *payload = Payload::String(contents));
        ret_handle(this)
    }),
    ("UTF8String", "r*@:", |rt, this, _| {
        // The buffer lives inside the payload, so the pointer stays valid
        // for as long as the string object does.
        let ptr = rt
            .with_payload(this, |payload| match payload {
                Payload::String(s) => s.as_ptr() as usize,
                _ => 0,
            })
            .unwrap_or(0);
        ret_word(ptr)
    }),
    ("length", "Q@:", |rt, this, _| {
        let len = string_contents(rt, this)
            .map_or(0, |s| s.to_string_lossy().encode_utf16().count());
        ret_word(len)
    }),
    ("isEqualToString:", "B@:@", |rt, this, args| {
        let other = handle(args, 0)?;
        let mine = string_contents(rt, this);
        ret_bool(mine.is_some() && mine == string_contents(rt, other))
    }),
    ("stringByAppendingString:", "@@:@", |rt, this, args| {
        let mut text = rt.string_value(this).unwrap_or_default();
        text.push_str(&rt.string_value(handle(args, 0)?).unwrap_or_default());
        ret_handle(rt.autoreleased(rt.new_string(&text)?))
    }),
    ("rangeOfString:", "{_NSRange=QQ}@:@", |rt, this, args| {
        let haystack = rt.string_value(this).unwrap_or_default();
        let needle = rt.string_value(handle(args, 0)?).unwrap_or_default();
        let found = if needle.is_empty() {
            None
        } else {
            haystack.find(&needle).map(|at| {
                let location = haystack[..at].encode_utf16().count();
                (location, needle.encode_utf16().count())
            })
        };
        let (location, length) = found.unwrap_or((NOT_FOUND, 0));
        Ok(RawReturn::Struct(StructValue::range(location, length)))
    }),
    ("description", "@@:", |_, this, _| ret_handle(this)),
];

// ============================================================================
// NSNumber
// ============================================================================

fn number_value(rt: &SimRuntime, object: Handle) -> Number {
    rt.with_payload(object, |payload| match payload {
        Payload::Number(n) => *n,
        _ => Number::Int(0),
    })
    .unwrap_or(Number::Int(0))
}

fn boxed(rt: &SimRuntime, class: Handle, value: Number) -> Result<RawReturn> {
    ret_handle(rt.autoreleased(rt.alloc_instance(class, Payload::Number(value))))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
const NSNUMBER_CLASS_METHODS: &[(&str, &str, Imp)] = &[
    ("numberWithInt:", "@@:i", |rt, this, args| {
        boxed(rt, this, Number::Int(i64::from(word(args, 0)? as u32 as i32)))
    }),
    ("numberWithLongLong:", "@@:q", |rt, this, args| {
        boxed(rt, this, Number::Int(word(args, 0)? as i64))
    }),
    ("numberWithUnsignedLongLong:", "@@:Q", |rt, this, args| {
        boxed(rt, this, Number::UInt(word(args, 0)? as u64))
    }),
    ("numberWithDouble:", "@@:d", |rt, this, args| {
        boxed(rt, this, Number::Float(float(args, 0)?))
    }),
    ("numberWithFloat:", "@@:f", |rt, this, args| {
        boxed(rt, this, Number::Float(float(args, 0)?))
    }),
    ("numberWithBool:", "@@:B", |rt, this, args| {
        boxed(rt, this, Number::Bool(word(args, 0)? & 0xff != 0))
    }),
];

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]
const NSNUMBER_METHODS: &[(&str, &str, Imp)] = &[
    ("intValue", "i@:", |rt, this, _| {
        ret_word(number_value(rt, this).as_i64() as i32 as isize as usize)
    }),
    ("longLongValue", "q@:", |rt, this, _| {
        ret_word(number_value(rt, this).as_i64() as usize)
    }),
    ("unsignedLongLongValue", "Q@:", |rt, this, _| {
        ret_word(number_value(rt, this).as_i64() as usize)
    }),
    ("doubleValue", "d@:", |rt, this, _| {
        Ok(RawReturn::F64(number_value(rt, this).as_f64()))
    }),
    ("floatValue", "f@:", |rt, this, _| {
        Ok(RawReturn::F32(number_value(rt, this).as_f64() as f32))
    }),
    ("boolValue", "B@:", |rt, this, _| {
        ret_bool(number_value(rt, this).as_f64() != 0.0)
    }),
];

// ============================================================================
// NSArray, NSMutableArray, NSEnumerator
// ============================================================================

fn new_array(rt: &SimRuntime, class: Handle, items: Vec<Handle>) -> Handle {
    for item in &items {
        rt.retain(*item);
    }
    rt.autoreleased(rt.alloc_instance(class, Payload::Array(items)))
}

const NSARRAY_CLASS_METHODS: &[(&str, &str, Imp)] = &[
    ("array", "@16@0:8", |rt, this, _| {
        ret_handle(new_array(rt, this, Vec::new()))
    }),
    ("arrayWithObject:", "@24@0:8@16", |rt, this, args| {
        ret_handle(new_array(rt, this, vec![handle(args, 0)?]))
    }),
];

const NSARRAY_METHODS: &[(&str, &str, Imp)] = &[
    ("count", "Q16@0:8", |rt, this, _| ret_word(elements(rt, this).len())),
    ("objectAtIndex:", "@24@0:8Q16", |rt, this, args| {
        let index = word(args, 0)?;
        let items = elements(rt, this);
        items
            .get(index)
            .map_or_else(|| Err(out_of_bounds(index, items.len())), |h| ret_handle(*h))
    }),
    ("firstObject", "@16@0:8", |rt, this, _| {
        ret_handle(elements(rt, this).first().copied().unwrap_or(Handle::NULL))
    }),
    ("lastObject", "@16@0:8", |rt, this, _| {
        ret_handle(elements(rt, this).last().copied().unwrap_or(Handle::NULL))
    }),
    ("containsObject:", "B24@0:8@16", |rt, this, args| {
        let needle = handle(args, 0)?;
        ret_bool(elements(rt, this).iter().any(|h| rt.objects_equal(*h, needle)))
    }),
    ("indexOfObject:", "Q24@0:8@16", |rt, this, args| {
        let needle = handle(args, 0)?;
        let index = elements(rt, this)
            .iter()
            .position(|h| rt.objects_equal(*h, needle));
        ret_word(index.unwrap_or(NOT_FOUND))
    }),
    ("getObjects:range:", "v40@0:8^@16{_NSRange=QQ}24", |rt, this, args| {
        let buffer = word(args, 0)? as *mut usize;
        let (location, length) = range(args, 1)?;
        let items = elements(rt, this);
        let end = location
            .checked_add(length)
            .filter(|end| *end <= items.len())
            .ok_or_else(|| {
                Error::marshal(
                    "argument 1",
                    format!("range {{{location}, {length}}} beyond bounds [0 .. {}]", items.len()),
                )
            })?;
        if buffer.is_null() && length > 0 {
            return Err(Error::marshal("argument 0", "nil object buffer"));
        }
        for (i, item) in items[location..end].iter().enumerate() {
            // SAFETY: the caller supplies a buffer of at least `length`
            // object slots.
            unsafe { buffer.add(i).write(item.addr()) };
        }
        ret_void()
    }),
    ("objectEnumerator", "@16@0:8", |rt, this, _| {
        let items = elements(rt, this);
        for item in &items {
            rt.retain(*item);
        }
        let class = rt
            .lookup_class("NSEnumerator")
            .ok_or_else(|| Error::class_not_found("NSEnumerator"))?;
        let enumerator = rt.alloc_instance(class, Payload::Enumerator { items, next: 0 });
        ret_handle(rt.autoreleased(enumerator))
    }),
    ("arrayByAddingObject:", "@24@0:8@16", |rt, this, args| {
        let mut items = elements(rt, this);
        items.push(handle(args, 0)?);
        let class = rt
            .lookup_class("NSArray")
            .ok_or_else(|| Error::class_not_found("NSArray"))?;
        ret_handle(new_array(rt, class, items))
    }),
];

const NSMUTABLEARRAY_METHODS: &[(&str, &str, Imp)] = &[
    ("addObject:", "v24@0:8@16", |rt, this, args| {
        let item = handle(args, 0)?;
        if item.is_null() {
            return Err(Error::marshal("argument 0", "attempt to insert nil object"));
        }
        rt.retain(item);
        rt.with_payload(this, |payload| {
            if let Payload::Array(items) = payload {
                items.push(item);
            }
        });
        ret_void()
    }),
    ("insertObject:atIndex:", "v32@0:8@16Q24", |rt, this, args| {
        let item = handle(args, 0)?;
        let index = word(args, 1)?;
        let count = elements(rt, this).len();
        if item.is_null() || index > count {
            return Err(out_of_bounds(index, count + 1));
        }
        rt.retain(item);
        rt.with_payload(this, |payload| {
            if let Payload::Array(items) = payload {
                items.insert(index, item);
            }
        });
        ret_void()
    }),
    ("removeLastObject", "v16@0:8", |rt, this, _| {
        let removed = rt
            .with_payload(this, |payload| match payload {
                Payload::Array(items) => items.pop(),
                _ => None,
            })
            .flatten();
        if let Some(item) = removed {
            rt.release(item);
        }
        ret_void()
    }),
    ("removeAllObjects", "v16@0:8", |rt, this, _| {
        let removed = rt
            .with_payload(this, |payload| match payload {
                Payload::Array(items) => std::mem::take(items),
                _ => Vec::new(),
            })
            .unwrap_or_default();
        for item in removed {
            rt.release(item);
        }
        ret_void()
    }),
];

const NSENUMERATOR_METHODS: &[(&str, &str, Imp)] = &[("nextObject", "@16@0:8", |rt, this, _| {
    let next = rt
        .with_payload(this, |payload| match payload {
            Payload::Enumerator { items, next } => {
                let item = items.get(*next).copied();
                *next += 1;
                item
            }
            _ => None,
        })
        .flatten();
    ret_handle(next.unwrap_or(Handle::NULL))
})];

// ============================================================================
// NSAutoreleasePool
// ============================================================================

const NSAUTORELEASEPOOL_METHODS: &[(&str, &str, Imp)] = &[
    ("init", "@16@0:8", |rt, this, _| {
        rt.push_pool(this);
        ret_handle(this)
    }),
    ("drain", "v16@0:8", |rt, this, _| {
        rt.pop_pool(this);
        rt.release(this);
        ret_void()
    }),
];

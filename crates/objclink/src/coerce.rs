//! Conversion between host values and native arguments and results.
//!
//! Inputs are converted per argument from the pair (value kind, declared
//! encoding). Outputs are interpreted from the declared return encoding.
//! Both directions are explicit tables; nothing is inferred from the bits.

use crate::abi::{NativeArg, RawReturn, ReturnKind};
use crate::client::Client;
use crate::error::{Error, Result};
use crate::proxy::{Peerable, Proxy};
use crate::runtime::{Encoding, Handle, Runtime};
use crate::value::Value;
use std::ffi::{CStr, CString, c_char};

/// Register class of a declared argument type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot<'a> {
    Object,
    CString,
    Selector,
    Class,
    Pointer,
    Integer,
    Float,
    Double,
    Struct(&'a Encoding),
}

impl<'a> Slot<'a> {
    fn of(decl: &'a Encoding) -> Option<Self> {
        Some(match decl {
            Encoding::Object => Slot::Object,
            Encoding::CString => Slot::CString,
            Encoding::Selector => Slot::Selector,
            Encoding::Class => Slot::Class,
            Encoding::Pointer(_) | Encoding::Unknown => Slot::Pointer,
            Encoding::Float => Slot::Float,
            Encoding::Double => Slot::Double,
            Encoding::Struct { .. } => Slot::Struct(decl),
            Encoding::Bool
            | Encoding::Char
            | Encoding::UChar
            | Encoding::Short
            | Encoding::UShort
            | Encoding::Int
            | Encoding::UInt
            | Encoding::Long
            | Encoding::ULong
            | Encoding::LongLong
            | Encoding::ULongLong => Slot::Integer,
            Encoding::Void | Encoding::Array { .. } | Encoding::Union { .. } => return None,
        })
    }

    /// Slots that hold a machine word in an integer register.
    const fn is_word(self) -> bool {
        !matches!(self, Slot::Float | Slot::Double | Slot::Struct(_))
    }

    /// Slots that hold an address.
    const fn is_reference(self) -> bool {
        matches!(
            self,
            Slot::Object | Slot::CString | Slot::Selector | Slot::Class | Slot::Pointer
        )
    }
}

/// Encoding a value is bound to when the method signature is unknown.
fn default_encoding(value: &Value) -> Encoding {
    match value {
        Value::Bool(_) => Encoding::Char,
        Value::Int(_) => Encoding::LongLong,
        Value::UInt(_) => Encoding::ULongLong,
        Value::Float(_) => Encoding::Double,
        Value::Struct(s) => s.layout().clone(),
        Value::Null | Value::Text(_) | Value::Pointer(_) | Value::Proxy(_) => Encoding::Object,
    }
}

/// Arguments ready for dispatch, plus the C strings they point into.
pub(crate) struct Marshaled {
    pub(crate) args: Vec<NativeArg>,
    _strings: Vec<CString>,
}

/// Converts `args` to native form.
///
/// `declared` holds the explicit argument types of the method, when known.
/// Input coercion is taken from the client's configuration. Converting
/// text or numbers to objects sends messages to `NSString` and `NSNumber`.
///
/// # Safety
///
/// Any handle in `args` must be valid for the runtime behind `client`.
pub(crate) unsafe fn marshal_args(
    client: &Client,
    declared: Option<&[Encoding]>,
    args: &[Value],
) -> Result<Marshaled> {
    let mut marshaled = Marshaled {
        args: Vec::with_capacity(args.len()),
        _strings: Vec::new(),
    };
    let coerce = client.coercion().inputs();

    for (index, value) in args.iter().enumerate() {
        let default;
        let decl = match declared.and_then(|d| d.get(index)) {
            Some(decl) => decl,
            None => {
                default = default_encoding(value);
                &default
            }
        };
        let what = || format!("argument {index}");
        let slot = Slot::of(decl)
            .ok_or_else(|| Error::marshal(what(), format!("cannot pass {decl} by value")))?;
        let arg = if coerce {
            unsafe { coerce_arg(client, &mut marshaled._strings, value, slot) }
        } else {
            pass_through(&mut marshaled._strings, value, slot)
        };
        let arg = arg.ok_or_else(|| {
            Error::marshal(
                what(),
                format!(
                    "{} value does not fit {decl} slot{}",
                    value.kind(),
                    if coerce { "" } else { " without input coercion" }
                ),
            )
        })??;
        marshaled.args.push(arg);
    }
    Ok(marshaled)
}

/// Native values only, except that text still reaches C string and
/// pointer slots as a NUL-terminated copy kept in `strings`.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn pass_through(
    strings: &mut Vec<CString>,
    value: &Value,
    slot: Slot<'_>,
) -> Option<Result<NativeArg>> {
    let arg = match (value, slot) {
        (Value::Text(text), Slot::CString | Slot::Pointer) => {
            return Some(kept_c_string(strings, text));
        }
        (Value::Float(v), Slot::Float) => NativeArg::F32(*v as f32),
        (Value::Float(v), Slot::Double) => NativeArg::F64(*v),
        (Value::Struct(s), Slot::Struct(decl)) if decl.same_layout(s.layout()) => {
            NativeArg::Struct(s.clone())
        }
        (_, slot) if !slot.is_word() => return None,
        (Value::Null, _) => NativeArg::Word(0),
        (Value::Bool(b), _) => NativeArg::Word(usize::from(*b)),
        (Value::Int(v), _) => NativeArg::Word(*v as usize),
        (Value::UInt(v), _) => NativeArg::Word(*v as usize),
        (Value::Pointer(h), _) => NativeArg::Word(h.addr()),
        _ => return None,
    };
    Some(Ok(arg))
}

/// Returns `None` for cells of the table that have no conversion, and
/// `Some(Err)` when a conversion exists but failed.
#[allow(
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]
unsafe fn coerce_arg(
    client: &Client,
    strings: &mut Vec<CString>,
    value: &Value,
    slot: Slot<'_>,
) -> Option<Result<NativeArg>> {
    let rt = client.runtime();
    let word = |w: usize| Some(Ok(NativeArg::Word(w)));
    let boxed = |selector: &str, arg: NativeArg| -> Option<Result<NativeArg>> {
        let number = unsafe { send_class(rt, "NSNumber", selector, arg) };
        Some(number.map(|h| NativeArg::Word(h.addr())))
    };

    match (value, slot) {
        (Value::Null, slot) if slot.is_word() => word(0),

        (Value::Bool(b), Slot::Object) => {
            boxed("numberWithBool:", NativeArg::Word(usize::from(*b)))
        }
        (Value::Bool(b), Slot::Integer) => word(usize::from(*b)),

        (Value::Int(v), Slot::Object) => boxed("numberWithLongLong:", NativeArg::Word(*v as usize)),
        (Value::UInt(v), Slot::Object) => {
            boxed("numberWithUnsignedLongLong:", NativeArg::Word(*v as usize))
        }
        (Value::Int(v), Slot::Pointer | Slot::Integer) => word(*v as usize),
        (Value::UInt(v), Slot::Pointer | Slot::Integer) => word(*v as usize),
        (Value::Int(v), Slot::Float) => Some(Ok(NativeArg::F32(*v as f32))),
        (Value::UInt(v), Slot::Float) => Some(Ok(NativeArg::F32(*v as f32))),
        (Value::Int(v), Slot::Double) => Some(Ok(NativeArg::F64(*v as f64))),
        (Value::UInt(v), Slot::Double) => Some(Ok(NativeArg::F64(*v as f64))),

        (Value::Float(v), Slot::Object) => boxed("numberWithDouble:", NativeArg::F64(*v)),
        (Value::Float(v), Slot::Float) => Some(Ok(NativeArg::F32(*v as f32))),
        (Value::Float(v), Slot::Double) => Some(Ok(NativeArg::F64(*v))),

        (Value::Text(text), Slot::Object) => {
            Some(unsafe { new_nsstring(rt, text) }.map(|h| NativeArg::Word(h.addr())))
        }
        (Value::Text(text), Slot::CString | Slot::Pointer) => Some(kept_c_string(strings, text)),
        (Value::Text(text), Slot::Selector) => word(rt.register_selector(text).addr()),
        (Value::Text(text), Slot::Class) => Some(
            rt.lookup_class(text)
                .map(|h| NativeArg::Word(h.addr()))
                .ok_or_else(|| Error::class_not_found(text)),
        ),

        (Value::Pointer(h), slot) if slot.is_word() => word(h.addr()),
        (Value::Proxy(p), slot) if slot.is_reference() => word(p.peer().addr()),

        (Value::Struct(s), Slot::Struct(decl)) if decl.same_layout(s.layout()) => {
            Some(Ok(NativeArg::Struct(s.clone())))
        }
        _ => None,
    }
}

fn c_string(text: &str) -> Result<CString> {
    CString::new(text).map_err(|_| Error::marshal("string", "interior NUL byte"))
}

/// Copies `text` into `strings` and passes its address.
fn kept_c_string(strings: &mut Vec<CString>, text: &str) -> Result<NativeArg> {
    let s = c_string(text)?;
    let ptr = s.as_ptr() as usize;
    strings.push(s);
    Ok(NativeArg::Word(ptr))
}

/// Sends `[class selector: arg]` and returns the object it yields.
unsafe fn send_class(
    rt: &dyn Runtime,
    class: &str,
    selector: &str,
    arg: NativeArg,
) -> Result<Handle> {
    let class = rt
        .lookup_class(class)
        .ok_or_else(|| Error::class_not_found(class))?;
    let sel = rt.register_selector(selector);
    let raw = unsafe { rt.msg_send(class, sel, &[arg], &ReturnKind::Word) }?;
    Ok(Handle::from_raw(raw.word().unwrap_or(0)))
}

/// Creates an autoreleased `NSString` with `text`.
///
/// # Safety
///
/// `rt` must provide a working `NSString` class.
pub(crate) unsafe fn new_nsstring(rt: &dyn Runtime, text: &str) -> Result<Handle> {
    let contents = c_string(text)?;
    // NSString copies the bytes, so `contents` only has to outlive the send.
    unsafe {
        send_class(
            rt,
            "NSString",
            "stringWithUTF8String:",
            NativeArg::Word(contents.as_ptr() as usize),
        )
    }
}

/// Reads a NUL-terminated string; null yields `None`.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn read_c_string(ptr: usize) -> Option<String> {
    if ptr == 0 {
        return None;
    }
    let s = unsafe { CStr::from_ptr(ptr as *const c_char) };
    Some(s.to_string_lossy().into_owned())
}

/// Reads the contents of an `NSString` through `UTF8String`.
///
/// # Safety
///
/// `object` must be nil or a live `NSString`.
pub(crate) unsafe fn read_nsstring(rt: &dyn Runtime, object: Handle) -> Result<Option<String>> {
    if object.is_null() {
        return Ok(None);
    }
    let sel = rt.register_selector("UTF8String");
    let raw = unsafe { rt.msg_send(object, sel, &[], &ReturnKind::Word) }?;
    Ok(unsafe { read_c_string(raw.word().unwrap_or(0)) })
}

/// Returns true if `object` is an instance of `NSString` or a subclass.
///
/// # Safety
///
/// `object` must be a live object.
unsafe fn is_string(rt: &dyn Runtime, object: Handle) -> Result<bool> {
    let Some(string_class) = rt.lookup_class("NSString") else {
        return Ok(false);
    };
    let sel = rt.register_selector("isKindOfClass:");
    let raw = unsafe {
        rt.msg_send(
            object,
            sel,
            &[NativeArg::Word(string_class.addr())],
            &ReturnKind::Word,
        )
    }?;
    Ok(raw.word().is_some_and(|w| w & 0xff != 0))
}

/// Interprets a raw return value.
///
/// `ret` is the declared return type, when known. Output coercion is taken
/// from the client's configuration, and proxies are bound to `client`.
///
/// # Safety
///
/// `raw` must be the result of a send whose method returns `ret`.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub(crate) unsafe fn coerce_result(
    client: &Client,
    raw: RawReturn,
    ret: Option<&Encoding>,
) -> Result<Value> {
    let w = match raw {
        RawReturn::Word(w) => w,
        RawReturn::F32(v) => return Ok(Value::Float(f64::from(v))),
        RawReturn::F64(v) => return Ok(Value::Float(v)),
        RawReturn::Struct(s) => return Ok(Value::Struct(s)),
    };
    let handle = Handle::from_raw(w);
    if !client.coercion().outputs() {
        return Ok(Value::Pointer(handle));
    }
    let rt = client.runtime();
    let proxy = || {
        if handle.is_null() {
            Value::Null
        } else {
            Value::Proxy(Proxy::new(handle, client.clone()))
        }
    };

    let Some(ret) = ret else {
        return Ok(proxy());
    };
    let value = match ret {
        Encoding::Void => Value::Null,
        Encoding::Bool => Value::Bool(w as u8 != 0),
        Encoding::Char => Value::Int(i64::from(w as u8 as i8)),
        Encoding::Short => Value::Int(i64::from(w as u16 as i16)),
        Encoding::Int | Encoding::Long => Value::Int(i64::from(w as u32 as i32)),
        Encoding::LongLong => Value::Int(w as u64 as i64),
        Encoding::UChar => Value::UInt(u64::from(w as u8)),
        Encoding::UShort => Value::UInt(u64::from(w as u16)),
        Encoding::UInt | Encoding::ULong => Value::UInt(u64::from(w as u32)),
        Encoding::ULongLong => Value::UInt(w as u64),
        Encoding::Float | Encoding::Double => {
            return Err(Error::marshal(
                "return value",
                format!("{ret} result arrived in an integer register"),
            ));
        }
        Encoding::CString => unsafe { read_c_string(w) }.map_or(Value::Null, Value::Text),
        Encoding::Selector => {
            if handle.is_null() {
                Value::Null
            } else {
                unsafe { rt.selector_name(handle) }.map_or(Value::Pointer(handle), Value::Text)
            }
        }
        Encoding::Object => {
            if !handle.is_null() && unsafe { is_string(rt, handle) }? {
                unsafe { read_nsstring(rt, handle) }?.map_or(Value::Null, Value::Text)
            } else {
                proxy()
            }
        }
        Encoding::Class => proxy(),
        Encoding::Pointer(_) | Encoding::Unknown => Value::Pointer(handle),
        Encoding::Struct { .. } => {
            return Err(Error::marshal(
                "return value",
                format!("{ret} result arrived in an integer register"),
            ));
        }
        Encoding::Union { .. } | Encoding::Array { .. } => {
            return Err(Error::marshal(
                "return value",
                format!("cannot return {ret} by value"),
            ));
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::StructValue;
    use crate::client::Coercion;
    use crate::runtime::SimRuntime;
    use std::sync::Arc;

    fn clients() -> (Arc<SimRuntime>, Client, Client) {
        let rt = Arc::new(SimRuntime::new());
        let coerced = Client::new(rt.clone(), Coercion::all());
        let raw = Client::new(rt.clone(), Coercion::none());
        (rt, coerced, raw)
    }

    fn marshal_one(client: &Client, decl: &str, value: Value) -> Result<NativeArg> {
        let decl = Encoding::parse(decl).unwrap();
        let mut m = unsafe { marshal_args(client, Some(std::slice::from_ref(&decl)), &[value]) }?;
        Ok(m.args.remove(0))
    }

    #[test]
    fn test_input_scalars() {
        let (_, client, _) = clients();
        assert_eq!(marshal_one(&client, "q", Value::Int(-1)).unwrap(), NativeArg::Word(usize::MAX));
        assert_eq!(marshal_one(&client, "B", Value::Bool(true)).unwrap(), NativeArg::Word(1));
        assert_eq!(marshal_one(&client, "d", Value::Int(2)).unwrap(), NativeArg::F64(2.0));
        assert_eq!(marshal_one(&client, "f", Value::Float(0.5)).unwrap(), NativeArg::F32(0.5));
        assert_eq!(marshal_one(&client, "@", Value::Null).unwrap(), NativeArg::Word(0));
        assert!(marshal_one(&client, "d", Value::Bool(true)).is_err());
        assert!(marshal_one(&client, "i", Value::Float(1.0)).is_err());
    }

    #[test]
    fn test_input_text_becomes_objects() {
        let (rt, client, _) = clients();

        let NativeArg::Word(addr) = marshal_one(&client, "@", Value::from("hello")).unwrap() else {
            panic!("expected a word");
        };
        assert_eq!(rt.string_value(Handle::from_raw(addr)).as_deref(), Some("hello"));

        let sel = marshal_one(&client, ":", Value::from("count")).unwrap();
        assert_eq!(sel, NativeArg::Word(rt.register_selector("count").addr()));

        let class = marshal_one(&client, "#", Value::from("NSArray")).unwrap();
        assert_eq!(class, NativeArg::Word(rt.lookup_class("NSArray").unwrap().addr()));
        assert!(matches!(
            marshal_one(&client, "#", Value::from("NSNope")),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_c_strings_outlive_marshaling() {
        let (_, client, _) = clients();
        let decl = [Encoding::CString];
        let m = unsafe { marshal_args(&client, Some(&decl), &[Value::from("kept")]) }.unwrap();
        let NativeArg::Word(ptr) = m.args[0] else {
            panic!("expected a word");
        };
        let read = unsafe { read_c_string(ptr) };
        assert_eq!(read.as_deref(), Some("kept"));
    }

    #[test]
    fn test_numbers_are_boxed() {
        let (rt, client, _) = clients();
        let NativeArg::Word(addr) = marshal_one(&client, "@", Value::Float(1.25)).unwrap() else {
            panic!("expected a word");
        };
        let number = Handle::from_raw(addr);
        assert_eq!(unsafe { rt.class_of(number) }, rt.lookup_class("NSNumber"));
    }

    #[test]
    fn test_struct_layout_must_match() {
        let (_, client, raw) = clients();
        let range = Value::Struct(StructValue::range(0, 1));
        assert!(marshal_one(&client, "{_NSRange=QQ}", range.clone()).is_ok());
        assert!(marshal_one(&raw, "{_NSRange=QQ}", range.clone()).is_ok());
        assert!(marshal_one(&client, "{CGPoint=dd}", range.clone()).is_err());
        assert!(marshal_one(&client, "@", range).is_err());
    }

    #[test]
    fn test_raw_inputs_must_be_native() {
        let (_, client, raw) = clients();
        let proxy = Value::Proxy(Proxy::new(Handle::from_raw(0x10), client.clone()));
        assert!(matches!(
            marshal_one(&raw, "@", Value::from("text")),
            Err(Error::MarshalError { .. })
        ));
        assert!(marshal_one(&raw, "@", proxy).is_err());
        assert!(marshal_one(&raw, "d", Value::Int(1)).is_err());
        assert_eq!(marshal_one(&raw, "@", Value::UInt(0x20)).unwrap(), NativeArg::Word(0x20));
        assert_eq!(marshal_one(&raw, "d", Value::Float(3.0)).unwrap(), NativeArg::F64(3.0));
    }

    #[test]
    fn test_raw_text_reaches_c_string_slots() {
        let (_, _, raw) = clients();
        let decl = [Encoding::CString, Encoding::Pointer(Box::new(Encoding::Void))];
        let m = unsafe { marshal_args(&raw, Some(&decl), &["one".into(), "two".into()]) }.unwrap();
        let read = |arg: &NativeArg| unsafe { read_c_string(arg.as_word().unwrap()) };
        assert_eq!(read(&m.args[0]).as_deref(), Some("one"));
        assert_eq!(read(&m.args[1]).as_deref(), Some("two"));
        assert!(marshal_one(&raw, "*", Value::from("nul\0inside")).is_err());
    }

    #[test]
    fn test_default_slots_without_signature() {
        let (_, client, _) = clients();
        let m = unsafe {
            marshal_args(
                &client,
                None,
                &[Value::Bool(true), Value::Int(4), Value::Float(1.0), Value::Null],
            )
        }
        .unwrap();
        assert_eq!(
            m.args,
            vec![
                NativeArg::Word(1),
                NativeArg::Word(4),
                NativeArg::F64(1.0),
                NativeArg::Word(0)
            ]
        );
    }

    #[test]
    fn test_default_text_slot_is_an_object() {
        let (rt, client, _) = clients();
        let m = unsafe { marshal_args(&client, None, &[Value::from("boxed")]) }.unwrap();
        let addr = m.args[0].as_word().unwrap();
        assert_eq!(rt.string_value(Handle::from_raw(addr)).as_deref(), Some("boxed"));
    }

    #[test]
    fn test_output_table() {
        let (rt, client, _) = clients();
        let out = |raw: RawReturn, ret: &str| {
            let ret = Encoding::parse(ret).unwrap();
            unsafe { coerce_result(&client, raw, Some(&ret)) }
        };

        assert_eq!(out(RawReturn::Word(0), "v").unwrap(), Value::Null);
        assert_eq!(out(RawReturn::Word(0x100), "B").unwrap(), Value::Bool(false));
        assert_eq!(out(RawReturn::Word(0xff), "c").unwrap(), Value::Int(-1));
        assert_eq!(out(RawReturn::Word(0xffff_ffff), "i").unwrap(), Value::Int(-1));
        assert_eq!(out(RawReturn::Word(0xffff_ffff), "I").unwrap(), Value::UInt(0xffff_ffff));
        assert_eq!(out(RawReturn::F64(0.5), "d").unwrap(), Value::Float(0.5));
        assert_eq!(out(RawReturn::Word(0), "@").unwrap(), Value::Null);
        assert_eq!(
            out(RawReturn::Word(0x30), "^v").unwrap(),
            Value::Pointer(Handle::from_raw(0x30))
        );
        assert!(out(RawReturn::Word(0), "{_NSRange=QQ}").is_err());
        assert_eq!(
            out(RawReturn::Struct(StructValue::range(3, 4)), "{_NSRange=QQ}").unwrap(),
            Value::Struct(StructValue::range(3, 4))
        );

        let sel = rt.register_selector("length");
        assert_eq!(out(RawReturn::Word(sel.addr()), ":").unwrap(), Value::from("length"));

        let s = rt.new_string("out").unwrap();
        assert_eq!(out(RawReturn::Word(s.addr()), "@").unwrap(), Value::from("out"));

        let class = rt.lookup_class("NSArray").unwrap();
        let proxy = out(RawReturn::Word(class.addr()), "#").unwrap().into_proxy().unwrap();
        assert_eq!(proxy.peer(), class);
    }

    #[test]
    fn test_raw_outputs_are_untouched() {
        let (rt, _, raw) = clients();
        let s = rt.new_string("raw").unwrap();
        let ret = Encoding::Object;
        let value = unsafe { coerce_result(&raw, RawReturn::Word(s.addr()), Some(&ret)) }.unwrap();
        assert_eq!(value, Value::Pointer(s));
        let value =
            unsafe { coerce_result(&raw, RawReturn::F32(1.5), Some(&Encoding::Float)) }.unwrap();
        assert_eq!(value, Value::Float(1.5));
        let range = RawReturn::Struct(StructValue::range(1, 2));
        let value = unsafe { coerce_result(&raw, range, None) }.unwrap();
        assert_eq!(value, Value::Struct(StructValue::range(1, 2)));
    }
}

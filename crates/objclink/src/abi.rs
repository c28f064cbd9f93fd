//! Native argument values and foreign calls.
//!
//! A [`ForeignCall`] is a `libffi` call interface built from Objective-C
//! type encodings. It lays out integers, floats and structures of any size
//! the way the platform C ABI expects, including arguments passed on the
//! stack and structures returned through memory.

use crate::error::{Error, Result};
use crate::runtime::{Encoding, Handle};
use libffi::middle::{Cif, Type};
use libffi::raw;
use std::ffi::c_void;

/// A value in native form, ready to be passed to a foreign call.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeArg {
    /// Integer, pointer, object or selector.
    Word(usize),
    F32(f32),
    F64(f64),
    /// A structure passed by value.
    Struct(StructValue),
}

impl NativeArg {
    /// The integer payload, if this is a word.
    #[must_use]
    pub const fn as_word(&self) -> Option<usize> {
        match self {
            NativeArg::Word(w) => Some(*w),
            _ => None,
        }
    }

    /// The payload as a handle, if this is a word.
    #[must_use]
    pub const fn as_handle(&self) -> Option<Handle> {
        match self {
            NativeArg::Word(w) => Some(Handle::from_raw(*w)),
            _ => None,
        }
    }

    /// Short description used in diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            NativeArg::Word(_) => "word",
            NativeArg::F32(_) => "f32",
            NativeArg::F64(_) => "f64",
            NativeArg::Struct(_) => "struct",
        }
    }

    /// The encoding this value is passed as when no signature says
    /// otherwise.
    #[must_use]
    pub fn default_encoding(&self) -> Encoding {
        match self {
            NativeArg::Word(_) => Encoding::Pointer(Box::new(Encoding::Void)),
            NativeArg::F32(_) => Encoding::Float,
            NativeArg::F64(_) => Encoding::Double,
            NativeArg::Struct(value) => value.layout().clone(),
        }
    }
}

/// Raw bytes of a C structure together with its layout.
///
/// # Example
///
/// ```
/// use objclink::StructValue;
///
/// let range = StructValue::range(2, 3);
/// assert_eq!(range.word(0), Some(2));
/// assert_eq!(range.word(8), Some(3));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructValue {
    layout: Encoding,
    bytes: Vec<u8>,
}

impl StructValue {
    /// Wraps `bytes` laid out as `layout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEncoding`] if `layout` is not a struct, and
    /// [`Error::MarshalError`] if the byte count does not match its size.
    pub fn new(layout: Encoding, bytes: Vec<u8>) -> Result<Self> {
        if !layout.is_struct() {
            return Err(Error::InvalidEncoding(layout.to_string()));
        }
        if bytes.len() != layout.size() {
            return Err(Error::marshal(
                format!("struct {layout}"),
                format!("expected {} bytes, got {}", layout.size(), bytes.len()),
            ));
        }
        Ok(Self { layout, bytes })
    }

    /// Builds a struct whose fields are all machine words.
    ///
    /// `name` becomes the struct tag; the layout is `{name=QQ...}`.
    #[must_use]
    pub fn from_words(name: &str, words: &[usize]) -> Self {
        let fields = vec![Encoding::ULongLong; words.len()];
        let bytes = words.iter().flat_map(|w| (*w as u64).to_ne_bytes()).collect();
        Self {
            layout: Encoding::Struct {
                name: name.to_string(),
                fields,
            },
            bytes,
        }
    }

    /// An `NSRange` with the given location and length.
    #[must_use]
    pub fn range(location: usize, length: usize) -> Self {
        Self::from_words("_NSRange", &[location, length])
    }

    /// All-zero bytes of `layout`.
    fn zeroed(layout: &Encoding) -> Self {
        Self {
            layout: layout.clone(),
            bytes: vec![0; layout.size()],
        }
    }

    /// The layout.
    #[must_use]
    pub fn layout(&self) -> &Encoding {
        &self.layout
    }

    /// The raw bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Reads a 64-bit word at `offset`.
    #[must_use]
    pub fn word(&self, offset: usize) -> Option<usize> {
        let chunk = self.bytes.get(offset..offset.checked_add(8)?)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(chunk);
        usize::try_from(u64::from_ne_bytes(buf)).ok()
    }

    /// Reads a double at `offset`.
    #[must_use]
    pub fn double(&self, offset: usize) -> Option<f64> {
        let chunk = self.bytes.get(offset..offset.checked_add(8)?)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(chunk);
        Some(f64::from_ne_bytes(buf))
    }
}

/// How the return value of a send comes back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnKind {
    /// Integer register. Also used for void.
    Word,
    F32,
    F64,
    /// A structure returned by value.
    Struct(Encoding),
}

impl ReturnKind {
    /// Chooses the return kind for a declared return type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MarshalError`] for union and array returns, which
    /// C cannot express by value.
    pub fn for_encoding(ret: &Encoding) -> Result<Self> {
        match ret {
            Encoding::Float => Ok(ReturnKind::F32),
            Encoding::Double => Ok(ReturnKind::F64),
            Encoding::Struct { .. } => Ok(ReturnKind::Struct(ret.clone())),
            Encoding::Union { .. } | Encoding::Array { .. } => Err(Error::marshal(
                "return value",
                format!("cannot return {ret} by value"),
            )),
            _ => Ok(ReturnKind::Word),
        }
    }
}

/// A return value as it came back from the callee.
#[derive(Debug, Clone, PartialEq)]
pub enum RawReturn {
    Word(usize),
    F32(f32),
    F64(f64),
    Struct(StructValue),
}

impl RawReturn {
    /// The zero value of the given kind, which is what a send to nil yields.
    #[must_use]
    pub fn zero(kind: &ReturnKind) -> Self {
        match kind {
            ReturnKind::Word => RawReturn::Word(0),
            ReturnKind::F32 => RawReturn::F32(0.0),
            ReturnKind::F64 => RawReturn::F64(0.0),
            ReturnKind::Struct(layout) => RawReturn::Struct(StructValue::zeroed(layout)),
        }
    }

    /// The integer payload. Other returns yield `None`.
    #[must_use]
    pub const fn word(&self) -> Option<usize> {
        match self {
            RawReturn::Word(w) => Some(*w),
            _ => None,
        }
    }
}

/// The `libffi` type of an argument or return encoding.
///
/// Top-level arrays decay to pointers; arrays inside structures are laid
/// out inline, one member per element.
fn ffi_type(encoding: &Encoding) -> Result<Type> {
    let ty = match encoding {
        Encoding::Void => Type::void(),
        Encoding::Bool | Encoding::UChar => Type::u8(),
        Encoding::Char => Type::i8(),
        Encoding::Short => Type::i16(),
        Encoding::UShort => Type::u16(),
        Encoding::Int | Encoding::Long => Type::i32(),
        Encoding::UInt | Encoding::ULong => Type::u32(),
        Encoding::LongLong => Type::i64(),
        Encoding::ULongLong => Type::u64(),
        Encoding::Float => Type::f32(),
        Encoding::Double => Type::f64(),
        Encoding::CString
        | Encoding::Object
        | Encoding::Class
        | Encoding::Selector
        | Encoding::Pointer(_)
        | Encoding::Unknown
        | Encoding::Array { .. } => Type::pointer(),
        Encoding::Struct { fields, .. } => {
            let mut members = Vec::with_capacity(fields.len());
            for field in fields {
                push_inline(field, &mut members)?;
            }
            Type::structure(members)
        }
        Encoding::Union { .. } => {
            return Err(Error::marshal(
                format!("type {encoding}"),
                "unions cannot be passed by value",
            ));
        }
    };
    Ok(ty)
}

fn push_inline(field: &Encoding, members: &mut Vec<Type>) -> Result<()> {
    match field {
        Encoding::Array { len, elem } => {
            for _ in 0..*len {
                push_inline(elem, members)?;
            }
            Ok(())
        }
        _ => {
            members.push(ffi_type(field)?);
            Ok(())
        }
    }
}

/// Byte width of an encoding passed as an integer, or `None` if it is not
/// passed as one.
fn integer_width(encoding: &Encoding) -> Option<usize> {
    match encoding {
        Encoding::Bool | Encoding::Char | Encoding::UChar => Some(1),
        Encoding::Short | Encoding::UShort => Some(2),
        Encoding::Int | Encoding::UInt | Encoding::Long | Encoding::ULong => Some(4),
        Encoding::LongLong | Encoding::ULongLong => Some(8),
        Encoding::CString
        | Encoding::Object
        | Encoding::Class
        | Encoding::Selector
        | Encoding::Pointer(_)
        | Encoding::Unknown
        | Encoding::Array { .. } => Some(std::mem::size_of::<usize>()),
        _ => None,
    }
}

/// Copies `bytes` into word-aligned storage of at least one word.
fn aligned(bytes: &[u8]) -> Vec<u64> {
    let mut storage = vec![0u64; bytes.len().div_ceil(8).max(1)];
    for (slot, chunk) in storage.iter_mut().zip(bytes.chunks(8)) {
        let mut buf = [0u8; 8];
        buf[..chunk.len()].copy_from_slice(chunk);
        *slot = u64::from_ne_bytes(buf);
    }
    storage
}

fn storage_bytes(storage: &[u64], len: usize) -> Vec<u8> {
    storage.iter().flat_map(|w| w.to_ne_bytes()).take(len).collect()
}

#[allow(clippy::cast_possible_truncation)]
fn encode_arg(index: usize, decl: &Encoding, arg: &NativeArg) -> Result<Vec<u64>> {
    let bytes = match (decl, arg) {
        (Encoding::Float, NativeArg::F32(v)) => v.to_ne_bytes().to_vec(),
        (Encoding::Double, NativeArg::F64(v)) => v.to_ne_bytes().to_vec(),
        (Encoding::Struct { .. }, NativeArg::Struct(value)) if decl.same_layout(value.layout()) => {
            value.bytes().to_vec()
        }
        (_, NativeArg::Word(w)) => match integer_width(decl) {
            Some(1) => (*w as u8).to_ne_bytes().to_vec(),
            Some(2) => (*w as u16).to_ne_bytes().to_vec(),
            Some(4) => (*w as u32).to_ne_bytes().to_vec(),
            Some(_) => (*w as u64).to_ne_bytes().to_vec(),
            None => return Err(slot_error(index, decl, arg)),
        },
        _ => return Err(slot_error(index, decl, arg)),
    };
    Ok(aligned(&bytes))
}

fn slot_error(index: usize, decl: &Encoding, arg: &NativeArg) -> Error {
    Error::marshal(
        format!("argument {index}"),
        format!("{decl} slot given {}", arg.kind()),
    )
}

/// A C call interface prepared from type encodings.
///
/// # Example
///
/// ```
/// use objclink::{Encoding, ForeignCall, NativeArg, RawReturn};
///
/// extern "C" fn add(a: i32, b: i64) -> i64 {
///     i64::from(a) + b
/// }
///
/// let call = ForeignCall::new(&[Encoding::Int, Encoding::LongLong], &Encoding::LongLong)?;
/// let add: extern "C" fn(i32, i64) -> i64 = add;
/// let code: unsafe extern "C" fn() = unsafe { std::mem::transmute(add) };
/// let sum = unsafe { call.call(code, &[NativeArg::Word(2), NativeArg::Word(40)]) }?;
/// assert_eq!(sum, RawReturn::Word(42));
/// # Ok::<(), objclink::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct ForeignCall {
    cif: Cif,
    args: Vec<Encoding>,
    ret: Encoding,
    ret_kind: ReturnKind,
}

impl ForeignCall {
    /// Prepares a call taking `args` and returning `ret`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MarshalError`] for unions and for array returns.
    pub fn new(args: &[Encoding], ret: &Encoding) -> Result<Self> {
        let ret_kind = ReturnKind::for_encoding(ret)?;
        let arg_types = args.iter().map(ffi_type).collect::<Result<Vec<_>>>()?;
        let cif = Cif::new(arg_types, ffi_type(ret)?);
        Ok(Self {
            cif,
            args: args.to_vec(),
            ret: ret.clone(),
            ret_kind,
        })
    }

    /// Argument encodings.
    #[must_use]
    pub fn args(&self) -> &[Encoding] {
        &self.args
    }

    /// How the result comes back.
    #[must_use]
    pub fn return_kind(&self) -> &ReturnKind {
        &self.ret_kind
    }

    /// Whether the result is a structure larger than two words, which the
    /// callee writes through a hidden pointer.
    #[must_use]
    pub fn returns_in_memory(&self) -> bool {
        matches!(self.ret_kind, ReturnKind::Struct(_)) && self.ret.size() > 16
    }

    /// Calls `code` with `args`.
    ///
    /// # Safety
    ///
    /// `code` must be a C function whose signature matches this call, and
    /// every pointer among `args` must be valid for what it does with them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MarshalError`] if `args` does not match the
    /// argument encodings in count or native class.
    pub unsafe fn call(
        &self,
        code: unsafe extern "C" fn(),
        args: &[NativeArg],
    ) -> Result<RawReturn> {
        if args.len() != self.args.len() {
            return Err(Error::marshal(
                "arguments",
                format!("call takes {} arguments, got {}", self.args.len(), args.len()),
            ));
        }
        let mut storage = self
            .args
            .iter()
            .zip(args)
            .enumerate()
            .map(|(index, (decl, arg))| encode_arg(index, decl, arg))
            .collect::<Result<Vec<_>>>()?;
        let mut arg_ptrs: Vec<*mut c_void> =
            storage.iter_mut().map(|s| s.as_mut_ptr().cast::<c_void>()).collect();

        // Integer results are widened to a full word by libffi.
        let mut ret = vec![0u64; self.ret.size().div_ceil(8).max(1)];
        // SAFETY: the interface was prepared from these encodings, every
        // argument slot holds a value of its declared size, and the return
        // buffer covers both the result and a full word.
        unsafe {
            raw::ffi_call(
                self.cif.as_raw_ptr(),
                Some(code),
                ret.as_mut_ptr().cast::<c_void>(),
                arg_ptrs.as_mut_ptr(),
            );
        }

        let raw = match &self.ret_kind {
            ReturnKind::Word => RawReturn::Word(ret[0] as usize),
            ReturnKind::F64 => RawReturn::F64(f64::from_bits(ret[0])),
            ReturnKind::F32 => {
                let bytes = storage_bytes(&ret, 4);
                RawReturn::F32(f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            ReturnKind::Struct(layout) => RawReturn::Struct(StructValue {
                layout: layout.clone(),
                bytes: storage_bytes(&ret, layout.size()),
            }),
        };
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Rect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    }

    #[repr(C)]
    struct Tagged {
        tag: u8,
        value: [i32; 3],
    }

    #[allow(clippy::too_many_arguments)]
    extern "C" fn sum_nine(
        a: u64,
        b: u64,
        c: u64,
        d: u64,
        e: u64,
        f: u64,
        g: u64,
        h: u64,
        i: u64,
    ) -> u64 {
        a + 2 * b + 3 * c + 4 * d + 5 * e + 6 * f + 7 * g + 8 * h + 9 * i
    }

    extern "C" fn mixed(a: i8, b: f32, c: u16, d: f64, e: i32) -> f64 {
        f64::from(a) + f64::from(b) + f64::from(c) + d + f64::from(e)
    }

    extern "C" fn area(rect: Rect, scale: f64) -> f64 {
        rect.width * rect.height * scale
    }

    extern "C" fn inset(rect: Rect, by: f64) -> Rect {
        Rect {
            x: rect.x + by,
            y: rect.y + by,
            width: rect.width - 2.0 * by,
            height: rect.height - 2.0 * by,
        }
    }

    extern "C" fn tagged_sum(t: Tagged) -> i32 {
        i32::from(t.tag) + t.value.iter().sum::<i32>()
    }

    extern "C" fn halve(x: f32) -> f32 {
        x / 2.0
    }

    extern "C" fn negate(x: i32) -> i32 {
        -x
    }

    fn code<F: Copy>(f: F) -> unsafe extern "C" fn() {
        assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<unsafe extern "C" fn()>());
        // SAFETY: `F` is an `extern "C"` function pointer of the same size.
        unsafe { std::mem::transmute_copy(&f) }
    }

    fn rect_layout() -> Encoding {
        Encoding::parse("{CGRect={CGPoint=dd}{CGSize=dd}}").unwrap()
    }

    fn rect_value(rect: Rect) -> StructValue {
        let bytes = [rect.x, rect.y, rect.width, rect.height]
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect();
        StructValue::new(rect_layout(), bytes).unwrap()
    }

    #[test]
    fn test_many_word_arguments() {
        let call = ForeignCall::new(&[const { Encoding::ULongLong }; 9], &Encoding::ULongLong).unwrap();
        let args: Vec<_> = (1..=9).map(NativeArg::Word).collect();
        let f: extern "C" fn(u64, u64, u64, u64, u64, u64, u64, u64, u64) -> u64 = sum_nine;
        let result = unsafe { call.call(code(f), &args) }.unwrap();
        assert_eq!(result, RawReturn::Word((1..=9).map(|i| i * i).sum()));
    }

    #[test]
    fn test_mixed_widths() {
        let call = ForeignCall::new(
            &[Encoding::Char, Encoding::Float, Encoding::UShort, Encoding::Double, Encoding::Int],
            &Encoding::Double,
        )
        .unwrap();
        let f: extern "C" fn(i8, f32, u16, f64, i32) -> f64 = mixed;
        let result = unsafe {
            call.call(
                code(f),
                &[
                    NativeArg::Word((-3i8) as u8 as usize),
                    NativeArg::F32(0.5),
                    NativeArg::Word(1000),
                    NativeArg::F64(0.25),
                    NativeArg::Word((-7i32) as u32 as usize),
                ],
            )
        }
        .unwrap();
        assert_eq!(result, RawReturn::F64(990.75));
    }

    #[test]
    fn test_large_struct_argument() {
        let call = ForeignCall::new(&[rect_layout(), Encoding::Double], &Encoding::Double).unwrap();
        let rect = Rect { x: 1.0, y: 2.0, width: 3.0, height: 4.0 };
        let f: extern "C" fn(Rect, f64) -> f64 = area;
        let result = unsafe {
            call.call(code(f), &[NativeArg::Struct(rect_value(rect)), NativeArg::F64(0.5)])
        }
        .unwrap();
        assert_eq!(result, RawReturn::F64(6.0));
    }

    #[test]
    fn test_struct_return() {
        let call = ForeignCall::new(&[rect_layout(), Encoding::Double], &rect_layout()).unwrap();
        assert!(call.returns_in_memory());
        let f: extern "C" fn(Rect, f64) -> Rect = inset;
        let rect = Rect { x: 0.0, y: 0.0, width: 10.0, height: 8.0 };
        let result = unsafe {
            call.call(code(f), &[NativeArg::Struct(rect_value(rect)), NativeArg::F64(1.0)])
        }
        .unwrap();
        let RawReturn::Struct(value) = result else {
            panic!("expected a struct, got {result:?}");
        };
        assert_eq!(value.layout(), &rect_layout());
        let fields: Vec<_> = (0..4).map(|i| value.double(i * 8).unwrap()).collect();
        assert_eq!(fields, [1.0, 1.0, 8.0, 6.0]);
    }

    #[test]
    fn test_inline_array_field() {
        let layout = Encoding::parse("{Tagged=C[3i]}").unwrap();
        assert_eq!(layout.size(), 16);
        let mut bytes = vec![5u8, 0, 0, 0];
        for v in [10i32, 20, 30] {
            bytes.extend_from_slice(&v.to_ne_bytes());
        }
        let value = StructValue::new(layout.clone(), bytes).unwrap();

        let call = ForeignCall::new(&[layout], &Encoding::Int).unwrap();
        let f: extern "C" fn(Tagged) -> i32 = tagged_sum;
        let result = unsafe { call.call(code(f), &[NativeArg::Struct(value)]) }.unwrap();
        assert_eq!(result, RawReturn::Word(65));
    }

    #[test]
    fn test_narrow_returns() {
        let call = ForeignCall::new(&[Encoding::Float], &Encoding::Float).unwrap();
        let f: extern "C" fn(f32) -> f32 = halve;
        let half = unsafe { call.call(code(f), &[NativeArg::F32(3.0)]) }.unwrap();
        assert_eq!(half, RawReturn::F32(1.5));

        // Signed results come back sign-extended; callers truncate to the
        // declared width.
        let call = ForeignCall::new(&[Encoding::Int], &Encoding::Int).unwrap();
        let f: extern "C" fn(i32) -> i32 = negate;
        let raw = unsafe { call.call(code(f), &[NativeArg::Word(5)]) }.unwrap();
        assert_eq!(raw.word().map(|w| w as u32 as i32), Some(-5));
    }

    #[test]
    fn test_argument_checks() {
        let call = ForeignCall::new(&[Encoding::Double], &Encoding::Double).unwrap();
        let f: extern "C" fn(f32) -> f32 = halve;
        let err = unsafe { call.call(code(f), &[NativeArg::Word(1)]) }.unwrap_err();
        assert!(matches!(err, Error::MarshalError { ref what, .. } if what == "argument 0"));
        let err = unsafe { call.call(code(f), &[]) }.unwrap_err();
        assert!(matches!(err, Error::MarshalError { .. }));

        let call = ForeignCall::new(&[rect_layout()], &Encoding::Void).unwrap();
        let err = unsafe { call.call(code(f), &[NativeArg::Struct(StructValue::range(0, 1))]) }
            .unwrap_err();
        assert!(matches!(err, Error::MarshalError { .. }));
    }

    #[test]
    fn test_unions_rejected() {
        let union = Encoding::parse("(Value=id)").unwrap();
        assert!(ForeignCall::new(&[union], &Encoding::Void).is_err());
        assert!(ForeignCall::new(&[], &Encoding::parse("[4i]").unwrap()).is_err());
    }

    #[test]
    fn test_struct_value_checks_size() {
        let layout = Encoding::parse("{_NSRange=QQ}").unwrap();
        assert!(StructValue::new(layout.clone(), vec![0; 8]).is_err());
        assert!(StructValue::new(Encoding::Int, vec![0; 4]).is_err());
        let range = StructValue::new(layout, vec![0; 16]).unwrap();
        assert_eq!(range.word(8), Some(0));
        assert_eq!(range.word(9), None);
    }

    #[test]
    fn test_return_kind() {
        assert_eq!(ReturnKind::for_encoding(&Encoding::Void).unwrap(), ReturnKind::Word);
        assert_eq!(ReturnKind::for_encoding(&Encoding::Double).unwrap(), ReturnKind::F64);
        assert_eq!(ReturnKind::for_encoding(&Encoding::Float).unwrap(), ReturnKind::F32);
        let range = Encoding::parse("{_NSRange=QQ}").unwrap();
        assert_eq!(
            ReturnKind::for_encoding(&range).unwrap(),
            ReturnKind::Struct(range.clone())
        );
        assert_eq!(
            RawReturn::zero(&ReturnKind::Struct(range)),
            RawReturn::Struct(StructValue::range(0, 0))
        );
        assert_eq!(RawReturn::zero(&ReturnKind::F64), RawReturn::F64(0.0));
    }
}

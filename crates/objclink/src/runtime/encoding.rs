//! Objective-C type encodings.
//!
//! Method signatures are described by `@encode()` strings such as
//! `"v@:@"` or `"v24@0:8^@16{_NSRange=QQ}24"`. This module parses them into
//! [`Encoding`] trees and computes the C layout of each type, which is what
//! argument marshalling needs.
//!
// Allow match arms with identical bodies - several types share a size
#![allow(clippy::match_same_arms)]
//!
//! # Encoding Format
//!
//! - `v` void, `B` bool, `c`/`C` char, `s`/`S` short, `i`/`I` int
//! - `l`/`L` long (always 32 bits in encodings), `q`/`Q` long long
//! - `f` float, `d` double
//! - `*` C string, `@` object, `#` class, `:` selector, `?` unknown
//! - `^T` pointer to `T`, `[NT]` array, `{name=...}` struct, `(name=...)` union
//!
//! Method qualifiers (`r n N o O R V`) and frame offsets (the digits after
//! each type) are accepted and ignored.

use crate::error::{Error, Result};
use std::fmt;

const POINTER_SIZE: usize = std::mem::size_of::<usize>();

/// A parsed type encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoding {
    Void,
    Bool,
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    CString,
    Object,
    Class,
    Selector,
    Unknown,
    Pointer(Box<Encoding>),
    Array { len: usize, elem: Box<Encoding> },
    Struct { name: String, fields: Vec<Encoding> },
    Union { name: String, fields: Vec<Encoding> },
}

/// A scalar leaf of a flattened type: what a register would hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    /// Integer or pointer of the given byte width.
    Integer(usize),
    F32,
    F64,
}

impl Scalar {
    /// Byte width of the scalar.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Scalar::Integer(size) => size,
            Scalar::F32 => 4,
            Scalar::F64 => 8,
        }
    }

    /// Returns true for floating-point scalars.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Scalar::F32 | Scalar::F64)
    }
}

impl Encoding {
    /// Parses exactly one type.
    ///
    /// # Example
    ///
    /// ```
    /// use objclink::Encoding;
    ///
    /// let range = Encoding::parse("{_NSRange=QQ}").unwrap();
    /// assert_eq!(range.size(), 16);
    /// assert!(Encoding::parse("@@").is_err());
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEncoding`] if the string is not a single
    /// well-formed type.
    pub fn parse(encoding: &str) -> Result<Encoding> {
        let mut parser = Parser::new(encoding);
        let ty = parser.parse_type()?;
        parser.skip_offset();
        if !parser.at_end() {
            return Err(parser.error());
        }
        Ok(ty)
    }

    /// Size in bytes under the host's C layout rules.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Encoding::Void => 0,
            Encoding::Bool | Encoding::Char | Encoding::UChar => 1,
            Encoding::Short | Encoding::UShort => 2,
            Encoding::Int | Encoding::UInt | Encoding::Long | Encoding::ULong => 4,
            Encoding::Float => 4,
            Encoding::LongLong | Encoding::ULongLong | Encoding::Double => 8,
            Encoding::CString
            | Encoding::Object
            | Encoding::Class
            | Encoding::Selector
            | Encoding::Unknown
            | Encoding::Pointer(_) => POINTER_SIZE,
            Encoding::Array { len, elem } => len * elem.size(),
            Encoding::Struct { fields, .. } => {
                let mut offset = 0;
                for field in fields {
                    offset = align_up(offset, field.align()) + field.size();
                }
                align_up(offset, self.align())
            }
            Encoding::Union { fields, .. } => {
                let size = fields.iter().map(Encoding::size).max().unwrap_or(0);
                align_up(size, self.align())
            }
        }
    }

    /// Alignment in bytes.
    #[must_use]
    pub fn align(&self) -> usize {
        match self {
            Encoding::Array { elem, .. } => elem.align(),
            Encoding::Struct { fields, .. } | Encoding::Union { fields, .. } => {
                fields.iter().map(Encoding::align).max().unwrap_or(1)
            }
            Encoding::Void => 1,
            other => other.size(),
        }
    }

    /// Byte offsets of the fields of a struct.
    ///
    /// Returns an empty vector for anything that is not a struct.
    #[must_use]
    pub fn field_offsets(&self) -> Vec<usize> {
        let Encoding::Struct { fields, .. } = self else {
            return Vec::new();
        };
        let mut offsets = Vec::with_capacity(fields.len());
        let mut offset = 0;
        for field in fields {
            offset = align_up(offset, field.align());
            offsets.push(offset);
            offset += field.size();
        }
        offsets
    }

    /// Flattens the type into `(offset, scalar)` leaves.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEncoding`] for unions and void, which have no
    /// well-defined register classification.
    pub fn flatten(&self) -> Result<Vec<(usize, Scalar)>> {
        let mut leaves = Vec::new();
        self.flatten_into(0, &mut leaves)?;
        Ok(leaves)
    }

    fn flatten_into(&self, base: usize, leaves: &mut Vec<(usize, Scalar)>) -> Result<()> {
        match self {
            Encoding::Void | Encoding::Union { .. } => {
                return Err(Error::InvalidEncoding(self.to_string()));
            }
            Encoding::Float => leaves.push((base, Scalar::F32)),
            Encoding::Double => leaves.push((base, Scalar::F64)),
            Encoding::Array { len, elem } => {
                let stride = elem.size();
                for i in 0..*len {
                    elem.flatten_into(base + i * stride, leaves)?;
                }
            }
            Encoding::Struct { fields, .. } => {
                for (field, offset) in fields.iter().zip(self.field_offsets()) {
                    field.flatten_into(base + offset, leaves)?;
                }
            }
            scalar => leaves.push((base, Scalar::Integer(scalar.size()))),
        }
        Ok(())
    }

    /// Returns true if two struct types have the same memory layout,
    /// regardless of their tag names.
    #[must_use]
    pub fn same_layout(&self, other: &Encoding) -> bool {
        if self.size() != other.size() {
            return false;
        }
        match (self.flatten(), other.flatten()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    /// Returns true for `@` and `#`, the types that hold object references.
    #[must_use]
    pub const fn is_object(&self) -> bool {
        matches!(self, Encoding::Object | Encoding::Class)
    }

    /// Returns true for struct types.
    #[must_use]
    pub const fn is_struct(&self) -> bool {
        matches!(self, Encoding::Struct { .. })
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Encoding::Void => "v",
            Encoding::Bool => "B",
            Encoding::Char => "c",
            Encoding::UChar => "C",
            Encoding::Short => "s",
            Encoding::UShort => "S",
            Encoding::Int => "i",
            Encoding::UInt => "I",
            Encoding::Long => "l",
            Encoding::ULong => "L",
            Encoding::LongLong => "q",
            Encoding::ULongLong => "Q",
            Encoding::Float => "f",
            Encoding::Double => "d",
            Encoding::CString => "*",
            Encoding::Object => "@",
            Encoding::Class => "#",
            Encoding::Selector => ":",
            Encoding::Unknown => "?",
            Encoding::Pointer(inner) => return write!(f, "^{inner}"),
            Encoding::Array { len, elem } => return write!(f, "[{len}{elem}]"),
            Encoding::Struct { name, fields } => return write_aggregate(f, '{', '}', name, fields),
            Encoding::Union { name, fields } => return write_aggregate(f, '(', ')', name, fields),
        };
        f.write_str(code)
    }
}

fn write_aggregate(
    f: &mut fmt::Formatter<'_>,
    open: char,
    close: char,
    name: &str,
    fields: &[Encoding],
) -> fmt::Result {
    write!(f, "{open}{name}")?;
    if !fields.is_empty() {
        f.write_str("=")?;
        for field in fields {
            write!(f, "{field}")?;
        }
    }
    write!(f, "{close}")
}

/// A parsed method signature.
///
/// The first two arguments are always the receiver (`@`) and the selector
/// (`:`); [`Signature::explicit_args`] skips them.
///
/// # Example
///
/// ```
/// use objclink::{Encoding, Signature};
///
/// let sig = Signature::parse("v24@0:8^@16{_NSRange=QQ}24").unwrap();
/// assert_eq!(sig.ret(), &Encoding::Void);
/// assert_eq!(sig.explicit_args().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    ret: Encoding,
    args: Vec<Encoding>,
}

impl Signature {
    /// Parses a full method type encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEncoding`] if any type is malformed or the
    /// signature does not start with the receiver and selector arguments.
    pub fn parse(types: &str) -> Result<Signature> {
        let mut parser = Parser::new(types);
        let ret = parser.parse_type()?;
        parser.skip_offset();

        let mut args = Vec::new();
        while !parser.at_end() {
            args.push(parser.parse_type()?);
            parser.skip_offset();
        }

        if args.len() < 2 || args[0] != Encoding::Object || args[1] != Encoding::Selector {
            return Err(Error::InvalidEncoding(types.to_string()));
        }
        Ok(Signature { ret, args })
    }

    /// The return type.
    #[must_use]
    pub fn ret(&self) -> &Encoding {
        &self.ret
    }

    /// All arguments, including self and _cmd.
    #[must_use]
    pub fn args(&self) -> &[Encoding] {
        &self.args
    }

    /// The arguments a caller supplies.
    #[must_use]
    pub fn explicit_args(&self) -> &[Encoding] {
        &self.args[2..]
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ret)?;
        for arg in &self.args {
            write!(f, "{arg}")?;
        }
        Ok(())
    }
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self) -> Error {
        Error::InvalidEncoding(self.src.to_string())
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn skip_offset(&mut self) {
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
    }

    fn number(&mut self) -> Result<usize> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        self.src[start..self.pos].parse().map_err(|_| self.error())
    }

    fn name_until(&mut self, stops: &[u8]) -> Result<String> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if stops.contains(&b) {
                return Ok(self.src[start..self.pos].to_string());
            }
            self.pos += 1;
        }
        Err(self.error())
    }

    fn parse_type(&mut self) -> Result<Encoding> {
        while self.peek().is_some_and(|b| b"rnNoORV".contains(&b)) {
            self.pos += 1;
        }
        let ty = match self.bump().ok_or_else(|| self.error())? {
            b'v' => Encoding::Void,
            b'B' => Encoding::Bool,
            b'c' => Encoding::Char,
            b'C' => Encoding::UChar,
            b's' => Encoding::Short,
            b'S' => Encoding::UShort,
            b'i' => Encoding::Int,
            b'I' => Encoding::UInt,
            b'l' => Encoding::Long,
            b'L' => Encoding::ULong,
            b'q' => Encoding::LongLong,
            b'Q' => Encoding::ULongLong,
            b'f' => Encoding::Float,
            b'd' => Encoding::Double,
            b'*' => Encoding::CString,
            b'#' => Encoding::Class,
            b':' => Encoding::Selector,
            b'?' => Encoding::Unknown,
            b'@' => {
                match self.peek() {
                    // Block
                    Some(b'?') => self.pos += 1,
                    // Class name annotation: @"NSString"
                    Some(b'"') => {
                        self.pos += 1;
                        self.name_until(b"\"")?;
                        self.pos += 1;
                    }
                    _ => {}
                }
                Encoding::Object
            }
            b'^' => Encoding::Pointer(Box::new(self.parse_type()?)),
            b'[' => {
                let len = self.number()?;
                let elem = Box::new(self.parse_type()?);
                if self.bump() != Some(b']') {
                    return Err(self.error());
                }
                Encoding::Array { len, elem }
            }
            b'{' => {
                let (name, fields) = self.aggregate(b'}')?;
                Encoding::Struct { name, fields }
            }
            b'(' => {
                let (name, fields) = self.aggregate(b')')?;
                Encoding::Union { name, fields }
            }
            _ => return Err(self.error()),
        };
        Ok(ty)
    }

    fn aggregate(&mut self, close: u8) -> Result<(String, Vec<Encoding>)> {
        let name = self.name_until(&[b'=', close])?;
        let mut fields = Vec::new();
        if self.bump() == Some(b'=') {
            while self.peek() != Some(close) {
                if self.at_end() {
                    return Err(self.error());
                }
                fields.push(self.parse_type()?);
            }
            self.pos += 1;
        }
        Ok((name, fields))
    }
}

const fn align_up(offset: usize, align: usize) -> usize {
    if align <= 1 {
        offset
    } else {
        offset.div_ceil(align) * align
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalars() {
        assert_eq!(Encoding::parse("q").unwrap(), Encoding::LongLong);
        assert_eq!(Encoding::parse("rQ").unwrap(), Encoding::ULongLong);
        assert_eq!(Encoding::parse("@\"NSString\"").unwrap(), Encoding::Object);
        assert_eq!(Encoding::parse("@?").unwrap(), Encoding::Object);
        assert_eq!(
            Encoding::parse("^@").unwrap(),
            Encoding::Pointer(Box::new(Encoding::Object))
        );
    }

    #[test]
    fn test_parse_invalid() {
        assert!(Encoding::parse("").is_err());
        assert!(Encoding::parse("x").is_err());
        assert!(Encoding::parse("{Open=ii").is_err());
        assert!(Encoding::parse("[4i").is_err());
        assert!(Encoding::parse("ii").is_err());
    }

    #[test]
    fn test_struct_layout() {
        let range = Encoding::parse("{_NSRange=QQ}").unwrap();
        assert_eq!(range.size(), 16);
        assert_eq!(range.align(), 8);
        assert_eq!(range.field_offsets(), vec![0, 8]);

        let padded = Encoding::parse("{Mixed=cdi}").unwrap();
        assert_eq!(padded.field_offsets(), vec![0, 8, 16]);
        assert_eq!(padded.size(), 24);

        let nested = Encoding::parse("{CGRect={CGPoint=dd}{CGSize=dd}}").unwrap();
        assert_eq!(nested.size(), 32);
        assert_eq!(nested.flatten().unwrap().len(), 4);
    }

    #[test]
    fn test_flatten_classifies_floats() {
        let point = Encoding::parse("{Point=ff}").unwrap();
        assert_eq!(
            point.flatten().unwrap(),
            vec![(0, Scalar::F32), (4, Scalar::F32)]
        );

        let array = Encoding::parse("{Buf=[3s]}").unwrap();
        assert_eq!(
            array.flatten().unwrap(),
            vec![
                (0, Scalar::Integer(2)),
                (2, Scalar::Integer(2)),
                (4, Scalar::Integer(2))
            ]
        );
        assert!(Encoding::parse("(U=id)").unwrap().flatten().is_err());
    }

    #[test]
    fn test_same_layout_ignores_names() {
        let a = Encoding::parse("{_NSRange=QQ}").unwrap();
        let b = Encoding::parse("{NSRange=qq}").unwrap();
        let c = Encoding::parse("{Pair=dd}").unwrap();
        assert!(a.same_layout(&b));
        assert!(!a.same_layout(&c));
    }

    #[test]
    fn test_display_round_trip() {
        for src in ["v", "^@", "{_NSRange=QQ}", "[8c]", "{Opaque}", "(U=id)"] {
            assert_eq!(Encoding::parse(src).unwrap().to_string(), src);
        }
    }

    #[test]
    fn test_signature_with_offsets() {
        let sig = Signature::parse("v40@0:8^@16{_NSRange=QQ}24").unwrap();
        assert_eq!(sig.ret(), &Encoding::Void);
        assert_eq!(sig.args().len(), 4);
        assert_eq!(
            sig.explicit_args()[0],
            Encoding::Pointer(Box::new(Encoding::Object))
        );
        assert!(sig.explicit_args()[1].is_struct());
        assert_eq!(sig.to_string(), "v@:^@{_NSRange=QQ}");
    }

    #[test]
    fn test_signature_requires_self_and_cmd() {
        assert!(Signature::parse("v@:").is_ok());
        assert!(Signature::parse("@").is_err());
        assert!(Signature::parse("v:@").is_err());
        assert!(Signature::parse("").is_err());
    }
}

//! Type encoding grammar
//!
//! Type encodings are compact strings describing C-level types. A single
//! type is one token (possibly nested); a signature is a return type followed
//! by parameter types, each optionally followed by a frame offset.
//!
//! ```text
//! type      := qualifier* base
//! qualifier := r | n | N | o | O | R | V | A
//! base      := c | i | s | l | q | C | I | S | L | Q | f | d | B | v
//!            | * | # | : | ?
//!            | @ | @"Name" | @? | @?<signature>
//!            | ^ type
//!            | [ count type ]
//!            | { name } | { name = field* }
//!            | ( name ) | ( name = field* )
//!            | b count
//! field     := ("Name")? type
//! signature := type offset? (type offset?)*
//! offset    := -? digit+
//! ```
//!
//! Unknown characters are a hard error; nothing is guessed. Parsing drops
//! frame offsets, class-name annotations on objects and nested block
//! signatures, so `Display` always prints the canonical sanitized form.

use std::fmt;
use std::str::FromStr;

use dynobj_runtime::Value;

use crate::error::EncodingError;

/// Size of pointers and pointer-like types (LP64)
const POINTER_SIZE: usize = 8;

/// Type qualifier set
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Qualifiers(u8);

impl Qualifiers {
    /// `r`
    pub const CONST: Qualifiers = Qualifiers(1 << 0);
    /// `n`
    pub const IN: Qualifiers = Qualifiers(1 << 1);
    /// `N`
    pub const INOUT: Qualifiers = Qualifiers(1 << 2);
    /// `o`
    pub const OUT: Qualifiers = Qualifiers(1 << 3);
    /// `O`
    pub const BYCOPY: Qualifiers = Qualifiers(1 << 4);
    /// `R`
    pub const BYREF: Qualifiers = Qualifiers(1 << 5);
    /// `V`
    pub const ONEWAY: Qualifiers = Qualifiers(1 << 6);
    /// `A`
    pub const ATOMIC: Qualifiers = Qualifiers(1 << 7);

    const ORDER: [(char, Qualifiers); 8] = [
        ('r', Self::CONST),
        ('n', Self::IN),
        ('N', Self::INOUT),
        ('o', Self::OUT),
        ('O', Self::BYCOPY),
        ('R', Self::BYREF),
        ('V', Self::ONEWAY),
        ('A', Self::ATOMIC),
    ];

    fn from_char(c: char) -> Option<Qualifiers> {
        Self::ORDER.iter().find(|(q, _)| *q == c).map(|(_, flag)| *flag)
    }

    /// Whether every flag of `other` is set
    pub fn contains(self, other: Qualifiers) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no flag is set
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn insert(&mut self, other: Qualifiers) {
        self.0 |= other.0;
    }
}

impl fmt::Display for Qualifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (c, flag) in Self::ORDER {
            if self.contains(flag) {
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}

/// One parsed type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// `c`
    Char,
    /// `i`
    Int,
    /// `s`
    Short,
    /// `l` (32 bits)
    Long,
    /// `q`
    LongLong,
    /// `C`
    UChar,
    /// `I`
    UInt,
    /// `S`
    UShort,
    /// `L` (32 bits)
    ULong,
    /// `Q`
    ULongLong,
    /// `f`
    Float,
    /// `d`
    Double,
    /// `B`
    Bool,
    /// `v`
    Void,
    /// `*`
    CString,
    /// `@`
    Object,
    /// `@?`
    Block,
    /// `#`
    Class,
    /// `:`
    Selector,
    /// `?` (unknown type, usually a function pointer target)
    Unknown,
    /// `^T`
    Pointer(Box<Encoding>),
    /// `[NT]`
    Array {
        /// Element count
        len: usize,
        /// Element type
        element: Box<Encoding>,
    },
    /// `{name=...}`; `fields` is `None` for an opaque `{name}`
    Struct {
        /// Struct tag (`?` for anonymous)
        name: String,
        /// Field types in declaration order
        fields: Option<Vec<Encoding>>,
    },
    /// `(name=...)`; `fields` is `None` for an opaque `(name)`
    Union {
        /// Union tag
        name: String,
        /// Member types
        fields: Option<Vec<Encoding>>,
    },
    /// `bN`
    BitField(u32),
    /// Qualifier prefix on another type
    Qualified(Qualifiers, Box<Encoding>),
}

impl Encoding {
    /// Parse exactly one type
    pub fn parse(input: &str) -> Result<Encoding, EncodingError> {
        let mut parser = Parser::new(input);
        if parser.at_end() {
            return Err(EncodingError::Empty);
        }
        let encoding = parser.parse_type()?;
        parser.expect_end()?;
        Ok(encoding)
    }

    /// Parse one type from the start of `input`, returning it and the number
    /// of bytes consumed
    pub fn parse_prefix(input: &str) -> Result<(Encoding, usize), EncodingError> {
        let mut parser = Parser::new(input);
        if parser.at_end() {
            return Err(EncodingError::Empty);
        }
        let encoding = parser.parse_type()?;
        Ok((encoding, parser.pos))
    }

    /// The type with qualifiers removed
    pub fn unqualified(&self) -> &Encoding {
        match self {
            Encoding::Qualified(_, inner) => inner.unqualified(),
            other => other,
        }
    }

    /// Qualifiers on the outermost type
    pub fn qualifiers(&self) -> Qualifiers {
        match self {
            Encoding::Qualified(q, _) => *q,
            _ => Qualifiers::default(),
        }
    }

    /// `v`
    pub fn is_void(&self) -> bool {
        matches!(self.unqualified(), Encoding::Void)
    }

    /// Object, block or class: the types that have an owner
    pub fn is_reference(&self) -> bool {
        matches!(
            self.unqualified(),
            Encoding::Object | Encoding::Block | Encoding::Class
        )
    }

    /// Whether a [`Value`] can be stored in a slot of this type
    ///
    /// Aggregates are checked field by field; there is no numeric widening.
    pub fn admits(&self, value: &Value) -> bool {
        match (self.unqualified(), value) {
            (Encoding::Char, Value::Char(_))
            | (Encoding::Int | Encoding::Long, Value::Int(_))
            | (Encoding::Short, Value::Short(_))
            | (Encoding::LongLong, Value::Long(_))
            | (Encoding::UChar, Value::UChar(_))
            | (Encoding::UInt | Encoding::ULong, Value::UInt(_))
            | (Encoding::UShort, Value::UShort(_))
            | (Encoding::ULongLong, Value::ULong(_))
            | (Encoding::Float, Value::Float(_))
            | (Encoding::Double, Value::Double(_))
            | (Encoding::Bool, Value::Bool(_))
            | (Encoding::Void, Value::Null) => true,
            (Encoding::BitField(_), Value::UInt(_) | Value::ULong(_)) => true,
            (Encoding::CString, Value::Str(_) | Value::Null) => true,
            (
                Encoding::Object,
                Value::Object(_) | Value::Block(_) | Value::Class(_) | Value::Null,
            ) => true,
            (Encoding::Block, Value::Block(_) | Value::Null) => true,
            (Encoding::Class, Value::Class(_) | Value::Null) => true,
            (Encoding::Selector, Value::Selector(_) | Value::Null) => true,
            (Encoding::Pointer(_) | Encoding::Unknown, Value::Pointer(_) | Value::Null) => true,
            (Encoding::Array { len, element }, Value::Array(elems)) => {
                elems.len() == *len && elems.iter().all(|e| element.admits(e))
            }
            (
                Encoding::Struct {
                    fields: Some(fields),
                    ..
                },
                Value::Struct(values),
            ) => {
                fields.len() == values.len()
                    && fields.iter().zip(values.iter()).all(|(f, v)| f.admits(v))
            }
            (
                Encoding::Union {
                    fields: Some(fields),
                    ..
                },
                value,
            ) => fields.iter().any(|f| f.admits(value)),
            _ => false,
        }
    }

    /// Number of [`Value`]s `zero_value` builds (aggregates count themselves
    /// plus their contents), or `None` if that number overflows `usize`
    pub fn value_count(&self) -> Option<usize> {
        match self.unqualified() {
            Encoding::Array { len, element } => {
                element.value_count()?.checked_mul(*len)?.checked_add(1)
            }
            Encoding::Struct {
                fields: Some(fields),
                ..
            } => fields
                .iter()
                .try_fold(1usize, |total, field| total.checked_add(field.value_count()?)),
            _ => Some(1),
        }
    }

    /// Value of a never-written slot, or of a message sent to nil
    ///
    /// Allocates [`Encoding::value_count`] values; bound that first for
    /// encodings from untrusted input.
    pub fn zero_value(&self) -> Value {
        match self.unqualified() {
            Encoding::Char => Value::Char(0),
            Encoding::Int | Encoding::Long => Value::Int(0),
            Encoding::Short => Value::Short(0),
            Encoding::LongLong => Value::Long(0),
            Encoding::UChar => Value::UChar(0),
            Encoding::UInt | Encoding::ULong | Encoding::BitField(_) => Value::UInt(0),
            Encoding::UShort => Value::UShort(0),
            Encoding::ULongLong => Value::ULong(0),
            Encoding::Float => Value::Float(0.0),
            Encoding::Double => Value::Double(0.0),
            Encoding::Bool => Value::Bool(false),
            Encoding::Array { len, element } => {
                Value::Array((0..*len).map(|_| element.zero_value()).collect())
            }
            Encoding::Struct {
                fields: Some(fields),
                ..
            } => Value::Struct(fields.iter().map(Encoding::zero_value).collect()),
            _ => Value::Null,
        }
    }

    /// Natural size and alignment in bytes (LP64, `l`/`L` are 32 bits)
    ///
    /// `None` for types without a storage layout (`v`, `?`, bit fields and
    /// opaque aggregates) and for layouts whose size overflows `usize`.
    pub fn size_and_alignment(&self) -> Option<(usize, usize)> {
        let scalar = |n: usize| Some((n, n));
        match self.unqualified() {
            Encoding::Char | Encoding::UChar | Encoding::Bool => scalar(1),
            Encoding::Short | Encoding::UShort => scalar(2),
            Encoding::Int | Encoding::UInt | Encoding::Long | Encoding::ULong | Encoding::Float => {
                scalar(4)
            }
            Encoding::LongLong | Encoding::ULongLong | Encoding::Double => scalar(8),
            Encoding::CString
            | Encoding::Object
            | Encoding::Block
            | Encoding::Class
            | Encoding::Selector
            | Encoding::Pointer(_) => scalar(POINTER_SIZE),
            Encoding::Void | Encoding::Unknown | Encoding::BitField(_) => None,
            Encoding::Array { len, element } => {
                let (size, align) = element.size_and_alignment()?;
                Some((size.checked_mul(*len)?, align))
            }
            Encoding::Struct {
                fields: Some(fields),
                ..
            } => {
                let mut offset = 0;
                let mut max_align = 1;
                for field in fields {
                    let (size, align) = field.size_and_alignment()?;
                    offset = round_up(offset, align)?.checked_add(size)?;
                    max_align = max_align.max(align);
                }
                Some((round_up(offset, max_align)?, max_align))
            }
            Encoding::Union {
                fields: Some(fields),
                ..
            } => {
                let mut max_size = 0;
                let mut max_align = 1;
                for field in fields {
                    let (size, align) = field.size_and_alignment()?;
                    max_size = max_size.max(size);
                    max_align = max_align.max(align);
                }
                Some((round_up(max_size, max_align)?, max_align))
            }
            Encoding::Struct { fields: None, .. } | Encoding::Union { fields: None, .. } => None,
            Encoding::Qualified(..) => unreachable!("unqualified() strips qualifiers"),
        }
    }
}

fn round_up(n: usize, align: usize) -> Option<usize> {
    n.div_ceil(align).checked_mul(align)
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Char => f.write_str("c"),
            Encoding::Int => f.write_str("i"),
            Encoding::Short => f.write_str("s"),
            Encoding::Long => f.write_str("l"),
            Encoding::LongLong => f.write_str("q"),
            Encoding::UChar => f.write_str("C"),
            Encoding::UInt => f.write_str("I"),
            Encoding::UShort => f.write_str("S"),
            Encoding::ULong => f.write_str("L"),
            Encoding::ULongLong => f.write_str("Q"),
            Encoding::Float => f.write_str("f"),
            Encoding::Double => f.write_str("d"),
            Encoding::Bool => f.write_str("B"),
            Encoding::Void => f.write_str("v"),
            Encoding::CString => f.write_str("*"),
            Encoding::Object => f.write_str("@"),
            Encoding::Block => f.write_str("@?"),
            Encoding::Class => f.write_str("#"),
            Encoding::Selector => f.write_str(":"),
            Encoding::Unknown => f.write_str("?"),
            Encoding::Pointer(inner) => write!(f, "^{}", inner),
            Encoding::Array { len, element } => write!(f, "[{}{}]", len, element),
            Encoding::Struct { name, fields } => write_aggregate(f, '{', '}', name, fields),
            Encoding::Union { name, fields } => write_aggregate(f, '(', ')', name, fields),
            Encoding::BitField(bits) => write!(f, "b{}", bits),
            Encoding::Qualified(q, inner) => write!(f, "{}{}", q, inner),
        }
    }
}

fn write_aggregate(
    f: &mut fmt::Formatter<'_>,
    open: char,
    close: char,
    name: &str,
    fields: &Option<Vec<Encoding>>,
) -> fmt::Result {
    write!(f, "{}{}", open, name)?;
    if let Some(fields) = fields {
        f.write_str("=")?;
        for field in fields {
            write!(f, "{}", field)?;
        }
    }
    write!(f, "{}", close)
}

impl FromStr for Encoding {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Encoding::parse(s)
    }
}

/// Return type plus parameter types
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    /// Return type
    pub ret: Encoding,
    /// Parameter types in order
    pub params: Vec<Encoding>,
}

impl MethodSignature {
    /// Create a signature from its parts
    pub fn new(ret: Encoding, params: Vec<Encoding>) -> Self {
        Self { ret, params }
    }

    /// Parse a signature, dropping frame offsets
    pub fn parse(input: &str) -> Result<MethodSignature, EncodingError> {
        let mut parser = Parser::new(input);
        if parser.at_end() {
            return Err(EncodingError::Empty);
        }
        let ret = parser.parse_type()?;
        parser.skip_offset();
        let mut params = Vec::new();
        while !parser.at_end() {
            params.push(parser.parse_type()?);
            parser.skip_offset();
        }
        Ok(MethodSignature { ret, params })
    }

    /// Every token in order: return type first
    pub fn tokens(&self) -> impl Iterator<Item = &Encoding> {
        std::iter::once(&self.ret).chain(self.params.iter())
    }

    /// Whether the layout is `return receiver selector args...`
    pub fn is_method_layout(&self) -> bool {
        matches!(
            self.params.as_slice(),
            [receiver, sel, ..]
                if matches!(receiver.unqualified(), Encoding::Object | Encoding::Class)
                    && matches!(sel.unqualified(), Encoding::Selector)
        )
    }

    /// Declared arguments after the receiver and selector slots
    pub fn arguments(&self) -> &[Encoding] {
        self.params.get(2..).unwrap_or(&[])
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in self.tokens() {
            write!(f, "{}", token)?;
        }
        Ok(())
    }
}

impl FromStr for MethodSignature {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MethodSignature::parse(s)
    }
}

/// Recursive-descent parser over the encoding bytes
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect_end(&self) -> Result<(), EncodingError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(EncodingError::TrailingInput { offset: self.pos })
        }
    }

    fn truncated(&self) -> EncodingError {
        EncodingError::Truncated { offset: self.pos }
    }

    fn parse_type(&mut self) -> Result<Encoding, EncodingError> {
        let mut qualifiers = Qualifiers::default();
        while let Some(q) = self.peek().and_then(Qualifiers::from_char) {
            qualifiers.insert(q);
            self.pos += 1;
        }
        let base = self.parse_base()?;
        if qualifiers.is_empty() {
            Ok(base)
        } else {
            Ok(Encoding::Qualified(qualifiers, Box::new(base)))
        }
    }

    fn parse_base(&mut self) -> Result<Encoding, EncodingError> {
        let start = self.pos;
        let c = self.bump().ok_or_else(|| self.truncated())?;
        let encoding = match c {
            'c' => Encoding::Char,
            'i' => Encoding::Int,
            's' => Encoding::Short,
            'l' => Encoding::Long,
            'q' => Encoding::LongLong,
            'C' => Encoding::UChar,
            'I' => Encoding::UInt,
            'S' => Encoding::UShort,
            'L' => Encoding::ULong,
            'Q' => Encoding::ULongLong,
            'f' => Encoding::Float,
            'd' => Encoding::Double,
            'B' => Encoding::Bool,
            'v' => Encoding::Void,
            '*' => Encoding::CString,
            '#' => Encoding::Class,
            ':' => Encoding::Selector,
            '?' => Encoding::Unknown,
            '@' => self.parse_object()?,
            '^' => Encoding::Pointer(Box::new(self.parse_type()?)),
            '[' => {
                let len = self.parse_count()?;
                let element = self.parse_type()?;
                if !self.eat(']') {
                    return Err(self.unexpected());
                }
                Encoding::Array {
                    len,
                    element: Box::new(element),
                }
            }
            '{' => {
                let (name, fields) = self.parse_aggregate('}')?;
                Encoding::Struct { name, fields }
            }
            '(' => {
                let (name, fields) = self.parse_aggregate(')')?;
                Encoding::Union { name, fields }
            }
            'b' => {
                let bits = self.parse_count()?;
                Encoding::BitField(
                    u32::try_from(bits).map_err(|_| EncodingError::InvalidCount { offset: start })?,
                )
            }
            other => {
                return Err(EncodingError::UnknownToken {
                    token: other,
                    offset: start,
                })
            }
        };
        Ok(encoding)
    }

    /// After `@`: plain object, `@"Class"`, `@?` or `@?<signature>`
    fn parse_object(&mut self) -> Result<Encoding, EncodingError> {
        if self.eat('?') {
            if self.eat('<') {
                let inner_start = self.pos;
                let close = self.find_matching('<', '>')?;
                MethodSignature::parse(&self.input[inner_start..close]).map_err(|e| {
                    e.shifted(inner_start)
                })?;
                self.pos = close + 1;
            }
            return Ok(Encoding::Block);
        }
        if self.peek() == Some('"') {
            self.skip_quoted()?;
        }
        Ok(Encoding::Object)
    }

    /// `name` or `name=fields` followed by `close`; the opener is consumed
    fn parse_aggregate(
        &mut self,
        close: char,
    ) -> Result<(String, Option<Vec<Encoding>>), EncodingError> {
        let name_start = self.pos;
        while let Some(c) = self.peek() {
            if c == '=' || c == close {
                break;
            }
            if matches!(c, '{' | '}' | '(' | ')' | '[' | ']' | '"') {
                return Err(self.unexpected());
            }
            self.pos += c.len_utf8();
        }
        let name = self.input[name_start..self.pos].to_string();
        match self.bump() {
            Some(c) if c == close => return Ok((name, None)),
            Some('=') => {}
            Some(_) => unreachable!("name scan stops at '=' or the closer"),
            None => return Err(self.truncated()),
        }

        let mut fields = Vec::new();
        loop {
            if self.eat(close) {
                return Ok((name, Some(fields)));
            }
            if self.at_end() {
                return Err(self.truncated());
            }
            if self.peek() == Some('"') {
                self.skip_quoted()?;
            }
            fields.push(self.parse_type()?);
        }
    }

    fn parse_count(&mut self) -> Result<usize, EncodingError> {
        let start = self.pos;
        while matches!(self.peek(), Some('0'..='9')) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(if self.at_end() {
                self.truncated()
            } else {
                EncodingError::InvalidCount { offset: start }
            });
        }
        self.input[start..self.pos]
            .parse()
            .map_err(|_| EncodingError::InvalidCount { offset: start })
    }

    /// Frame offset after a signature token
    fn skip_offset(&mut self) {
        let rest = &self.input.as_bytes()[self.pos..];
        let sign = usize::from(rest.first() == Some(&b'-'));
        let digits = rest[sign..].iter().take_while(|b| b.is_ascii_digit()).count();
        if digits > 0 {
            self.pos += sign + digits;
        }
    }

    fn skip_quoted(&mut self) -> Result<(), EncodingError> {
        self.eat('"');
        match self.input[self.pos..].find('"') {
            Some(len) => {
                self.pos += len + 1;
                Ok(())
            }
            None => Err(EncodingError::Truncated {
                offset: self.input.len(),
            }),
        }
    }

    /// Index of the `close` balancing an already consumed `open`
    fn find_matching(&self, open: char, close: char) -> Result<usize, EncodingError> {
        let mut depth = 1usize;
        for (i, c) in self.input[self.pos..].char_indices() {
            if c == open {
                depth += 1;
            } else if c == close {
                depth -= 1;
                if depth == 0 {
                    return Ok(self.pos + i);
                }
            }
        }
        Err(EncodingError::Truncated {
            offset: self.input.len(),
        })
    }

    fn unexpected(&self) -> EncodingError {
        match self.peek() {
            Some(token) => EncodingError::UnknownToken {
                token,
                offset: self.pos,
            },
            None => self.truncated(),
        }
    }
}

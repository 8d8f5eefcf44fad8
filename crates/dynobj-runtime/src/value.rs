//! Dynamically typed values
//!
//! Every argument, return value and stored property of the object model is a
//! [`Value`]. Scalars are stored inline; objects are reference counted.
//!
//! # Ownership
//!
//! ```text
//! Id      strong claim   clone = retain, drop = release
//! WeakId  observation    upgrade() -> None once the object is destroyed
//! ```
//!
//! Blocks and classes are shared (`Arc`) and never mutated after creation, so
//! copying one is the same as sharing it.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use crate::block::Block;
use crate::object::{Class, Object};
use crate::selector::Sel;

/// A dynamically typed value
#[derive(Clone, Default)]
pub enum Value {
    /// nil / NULL
    #[default]
    Null,
    /// `B`
    Bool(bool),
    /// `c`
    Char(i8),
    /// `s`
    Short(i16),
    /// `i` and `l`
    Int(i32),
    /// `q`
    Long(i64),
    /// `C`
    UChar(u8),
    /// `S`
    UShort(u16),
    /// `I` and `L`
    UInt(u32),
    /// `Q`
    ULong(u64),
    /// `f`
    Float(f32),
    /// `d`
    Double(f64),
    /// `*` (immutable C string)
    Str(Arc<str>),
    /// `@` strong object reference
    Object(Id),
    /// `#`
    Class(Arc<Class>),
    /// `:`
    Selector(Sel),
    /// `@?`
    Block(Arc<Block>),
    /// `^T` and `?` (opaque address, never dereferenced)
    Pointer(usize),
    /// `{name=...}` fields in declaration order
    Struct(Arc<[Value]>),
    /// `[NT]` elements in order
    Array(Arc<[Value]>),
}

impl Value {
    /// Create a null value
    #[inline]
    pub const fn null() -> Self {
        Value::Null
    }

    /// Create a boolean value
    #[inline]
    pub const fn bool(b: bool) -> Self {
        Value::Bool(b)
    }

    /// Create an int value
    #[inline]
    pub const fn i32(i: i32) -> Self {
        Value::Int(i)
    }

    /// Create a long long value
    #[inline]
    pub const fn i64(i: i64) -> Self {
        Value::Long(i)
    }

    /// Create a double value
    #[inline]
    pub const fn f64(f: f64) -> Self {
        Value::Double(f)
    }

    /// Create a C string value
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    /// Create a struct value from its fields
    pub fn structure(fields: Vec<Value>) -> Self {
        Value::Struct(fields.into())
    }

    /// Check if this value is null
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Extract boolean value
    #[inline]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Extract int value
    #[inline]
    pub const fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Extract long long value
    #[inline]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Long(i) => Some(*i),
            _ => None,
        }
    }

    /// Extract double value
    #[inline]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(f) => Some(*f),
            _ => None,
        }
    }

    /// Borrow the object reference, if any
    pub fn as_object(&self) -> Option<&Id> {
        match self {
            Value::Object(id) => Some(id),
            _ => None,
        }
    }

    /// Borrow the class, if any
    pub fn as_class(&self) -> Option<&Arc<Class>> {
        match self {
            Value::Class(class) => Some(class),
            _ => None,
        }
    }

    /// Borrow the block, if any
    pub fn as_block(&self) -> Option<&Arc<Block>> {
        match self {
            Value::Block(block) => Some(block),
            _ => None,
        }
    }

    /// Borrow the string contents, if any
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Short name of the value's kind, used in diagnostics
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Char(_) => "char",
            Value::Short(_) => "short",
            Value::Int(_) => "int",
            Value::Long(_) => "long long",
            Value::UChar(_) => "unsigned char",
            Value::UShort(_) => "unsigned short",
            Value::UInt(_) => "unsigned int",
            Value::ULong(_) => "unsigned long long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
            Value::Class(_) => "class",
            Value::Selector(_) => "selector",
            Value::Block(_) => "block",
            Value::Pointer(_) => "pointer",
            Value::Struct(_) => "struct",
            Value::Array(_) => "array",
        }
    }

    /// Whether the value participates in reference counting
    pub const fn is_reference(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Class(_) | Value::Block(_))
    }
}

impl PartialEq for Value {
    /// Scalars compare by value, references by identity
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Short(a), Value::Short(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::UChar(a), Value::UChar(b)) => a == b,
            (Value::UShort(a), Value::UShort(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::ULong(a), Value::ULong(b)) => a == b,
            // bit equality, so NaN round-trips compare equal
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Class(a), Value::Class(b)) => Arc::ptr_eq(a, b),
            (Value::Selector(a), Value::Selector(b)) => a == b,
            (Value::Block(a), Value::Block(b)) => Arc::ptr_eq(a, b),
            (Value::Pointer(a), Value::Pointer(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Char(v) => write!(f, "{}c", v),
            Value::Short(v) => write!(f, "{}s", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}q", v),
            Value::UChar(v) => write!(f, "{}C", v),
            Value::UShort(v) => write!(f, "{}S", v),
            Value::UInt(v) => write!(f, "{}u", v),
            Value::ULong(v) => write!(f, "{}Q", v),
            Value::Float(v) => write!(f, "{}f", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Object(id) => write!(f, "<{} #{}>", id.class().name(), id.object_id()),
            Value::Class(class) => write!(f, "{}", class.name()),
            Value::Selector(sel) => write!(f, "@selector({})", sel),
            Value::Block(_) => write!(f, "<block>"),
            Value::Pointer(addr) => write!(f, "{:#x}", addr),
            Value::Struct(fields) => f.debug_set().entries(fields.iter()).finish(),
            Value::Array(elems) => f.debug_list().entries(elems.iter()).finish(),
        }
    }
}

impl From<Id> for Value {
    fn from(id: Id) -> Self {
        Value::Object(id)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Double(f)
    }
}

/// Strong reference to a heap object
///
/// Holding an `Id` is a claim on the object's lifetime.
#[derive(Clone)]
pub struct Id(Arc<Object>);

impl Id {
    pub(crate) fn new(object: Object) -> Self {
        Id(Arc::new(object))
    }

    /// Number of outstanding strong claims, this one included
    pub fn retain_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Create a non-owning observation of the object
    pub fn downgrade(&self) -> WeakId {
        WeakId(Arc::downgrade(&self.0))
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Id) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for Id {
    type Target = Object;

    fn deref(&self) -> &Object {
        &self.0
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Value::Object(self.clone()), f)
    }
}

/// Non-owning reference to a heap object
#[derive(Clone, Default)]
pub struct WeakId(Weak<Object>);

impl WeakId {
    /// Re-acquire a strong claim, or `None` if the object was destroyed
    pub fn upgrade(&self) -> Option<Id> {
        self.0.upgrade().map(Id)
    }

    /// Whether the object is still alive
    pub fn is_live(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl fmt::Debug for WeakId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(id) => write!(f, "weak {:?}", id),
            None => write!(f, "weak nil"),
        }
    }
}

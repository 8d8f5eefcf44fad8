//! Extension errors

use dynobj_runtime::{RuntimeError, Sel};
use thiserror::Error;

use crate::property::OwnershipPolicy;

/// Errors produced while parsing a type encoding
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodingError {
    /// Nothing to parse
    #[error("Empty type encoding")]
    Empty,

    /// Character that starts no known type
    #[error("Unknown type token '{token}' at offset {offset}")]
    UnknownToken {
        /// Offending character
        token: char,
        /// Byte offset in the input
        offset: usize,
    },

    /// Input ended inside a nested type
    #[error("Type encoding truncated at offset {offset}")]
    Truncated {
        /// Byte offset where more input was expected
        offset: usize,
    },

    /// Characters after a complete single type
    #[error("Unexpected trailing input at offset {offset}")]
    TrailingInput {
        /// Byte offset of the first extra character
        offset: usize,
    },

    /// Array length or bit-field width missing or out of range
    #[error("Invalid count at offset {offset}")]
    InvalidCount {
        /// Byte offset of the count
        offset: usize,
    },
}

impl EncodingError {
    /// Move reported offsets by `base` (errors from a nested parse)
    pub(crate) fn shifted(self, base: usize) -> Self {
        match self {
            EncodingError::Empty => EncodingError::Truncated { offset: base },
            EncodingError::UnknownToken { token, offset } => EncodingError::UnknownToken {
                token,
                offset: offset + base,
            },
            EncodingError::Truncated { offset } => EncodingError::Truncated {
                offset: offset + base,
            },
            EncodingError::TrailingInput { offset } => EncodingError::TrailingInput {
                offset: offset + base,
            },
            EncodingError::InvalidCount { offset } => EncodingError::InvalidCount {
                offset: offset + base,
            },
        }
    }
}

/// Why a block's type metadata yields no method signature
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeriveError {
    /// Block carries no type encoding
    #[error("Block has no type metadata")]
    MissingMetadata,

    /// Block's type encoding is malformed
    #[error("Malformed block signature: {0}")]
    Malformed(#[from] EncodingError),

    /// First parameter is not the block's own `@?` slot
    #[error("Block signature does not start with a block slot: {0}")]
    NotBlockLayout(String),

    /// No receiver after the block slot, or a receiver that is not `@` or `#`
    #[error("Block signature has no object receiver: {0}")]
    MissingReceiver(String),
}

/// Errors from installing closures into method tables
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InjectError {
    /// Type string does not parse
    #[error("Invalid method types: {0}")]
    InvalidTypes(#[from] EncodingError),

    /// Type string lacks the receiver and selector slots
    #[error("Method types must be `return receiver selector args..`: {0}")]
    NotMethodLayout(String),

    /// Block declares a different number of arguments than the type string
    #[error("Block takes {block} arguments but the method declares {declared}")]
    ArityMismatch {
        /// Arguments in the method types
        declared: usize,
        /// Arguments in the block's own metadata
        block: usize,
    },

    /// Selector already has an entry in the conflict scope
    #[error("Method {0} already exists")]
    AlreadyPresent(Sel),

    /// Signature derivation failed
    #[error(transparent)]
    Derive(#[from] DeriveError),

    /// Accessor synthesis failed
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
}

/// Errors from accessor synthesis
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SynthesisError {
    /// Type encoding does not parse
    #[error("Invalid property type: {0}")]
    InvalidEncoding(#[from] EncodingError),

    /// Type has no storable representation
    #[error("Type {0} cannot back a property")]
    Unstorable(String),

    /// Policy needs a reference type
    #[error("{policy:?} policy requires an object type, got {encoding}")]
    PolicyMismatch {
        /// Requested policy
        policy: OwnershipPolicy,
        /// Property type
        encoding: String,
    },
}

/// Errors from parsing property attribute strings
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttributeError {
    /// No leading `T` attribute
    #[error("Property attributes must start with a T<type> attribute")]
    MissingType,

    /// `T` attribute holds a malformed type
    #[error("Invalid property type: {0}")]
    InvalidType(#[from] EncodingError),

    /// Attribute letter not understood
    #[error("Unknown property attribute '{0}'")]
    UnknownAttribute(char),

    /// More than one of `C`, `&`, `W`
    #[error("Conflicting ownership attributes")]
    ConflictingPolicies,

    /// `G`, `S` or `V` without a name
    #[error("Attribute '{0}' requires a name")]
    MissingName(char),
}

/// Type mismatch reported through dispatch
pub(crate) fn type_mismatch(expected: &impl ToString, actual: &'static str) -> RuntimeError {
    RuntimeError::TypeMismatch {
        expected: expected.to_string(),
        actual,
    }
}

/// Result alias for injection
pub type InjectResult<T> = Result<T, InjectError>;

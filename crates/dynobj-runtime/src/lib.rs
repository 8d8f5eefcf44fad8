//! Dynobj Object Model Runtime
//!
//! This crate provides the dynamic, message-dispatching object model that the
//! `dynobj-ext` crate extends:
//! - Dynamically typed values with reference-counted objects
//! - Classes with copy-on-write method tables and metaclasses
//! - Interned selectors
//! - Message dispatch (including super dispatch)
//! - Closures with attached type metadata ("blocks")
//! - Per-instance associated storage keyed by identity tokens

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod association;
pub mod block;
pub mod class_registry;
pub mod dispatch;
pub mod object;
pub mod runtime;
pub mod selector;
pub mod value;

pub use association::{AssociatedSlot, AssociationKey, SlotContents};
pub use block::{Block, BlockFn};
pub use class_registry::ClassRegistry;
pub use dispatch::{class_of, copy_value, resolve, responds_to, send, send_super};
pub use object::{Class, Imp, Method, MethodMap, MethodTable, Object};
pub use runtime::{Runtime, RuntimeOptions};
pub use selector::Sel;
pub use value::{Id, Value, WeakId};

/// Object model errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    /// No method for the selector anywhere in the receiver's class chain
    #[error("-[{class} {selector}]: unrecognized selector")]
    UnrecognizedSelector {
        /// Receiver's class name
        class: String,
        /// Selector that was sent
        selector: Sel,
    },

    /// Wrong number of arguments for a method
    #[error("{selector}: expected {expected} arguments, got {actual}")]
    ArgumentCount {
        /// Selector being invoked
        selector: Sel,
        /// Declared argument count
        expected: usize,
        /// Supplied argument count
        actual: usize,
    },

    /// Value does not fit the declared type
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Declared type
        expected: String,
        /// Kind of the supplied value
        actual: &'static str,
    },

    /// Message sent to a value that is not an object or class
    #[error("Cannot send a message to a {0} value")]
    NotAnObject(&'static str),

    /// Class name already registered
    #[error("Class {0} is already defined")]
    DuplicateClass(String),

    /// Class name not registered
    #[error("Unknown class: {0}")]
    UnknownClass(String),

    /// Object's class does not implement `copy`
    #[error("Instances of {0} cannot be copied")]
    NotCopyable(String),

    /// Failure raised by a method implementation
    #[error("Invocation failed: {0}")]
    Invocation(String),
}

/// Object model result
pub type RuntimeResult<T> = Result<T, RuntimeError>;

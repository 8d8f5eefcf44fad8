//! Closure-backed methods and properties for the dynobj object model
//!
//! This crate extends [`dynobj_runtime`] with:
//! - A parser for type encodings and method signatures
//! - Deriving a method signature from a block's own type metadata
//! - Adding or replacing methods whose implementation is a block
//! - Synthesizing getter/setter blocks backed by associated storage
//! - Parsing property attribute strings and installing whole properties
//!
//! ```ignore
//! let runtime = Runtime::new();
//! let class = runtime.define_class("Counter", None, 0)?;
//! let block = Arc::new(Block::with_signature("B@?@i", |_, args| {
//!     Ok(Value::bool(args[0].as_i32() == Some(0)))
//! }));
//! add_block_method_derived(&class, Sel::register("isZero:"), &block)?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod attributes;
pub mod encoding;
pub mod error;
pub mod method;
pub mod property;
pub mod signature;

pub use attributes::{default_setter_name, PropertyAttributes};
pub use encoding::{Encoding, MethodSignature, Qualifiers};
pub use error::{AttributeError, DeriveError, EncodingError, InjectError, InjectResult, SynthesisError};
pub use method::{
    add_block_method_derived, add_method, add_property, replace_block_method_derived,
    replace_method, try_add_method, try_replace_method, ConflictScope, InjectOptions,
    MethodInjector,
};
pub use property::{synthesize_accessors, try_synthesize_accessors, AccessorPair, OwnershipPolicy};
pub use signature::{derive_from_block_encoding, derive_method_signature, derive_signature};

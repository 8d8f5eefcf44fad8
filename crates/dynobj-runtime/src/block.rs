//! Closures with attached type metadata
//!
//! A [`Block`] is the object model's closure value. Its body is called with a
//! receiver and the declared arguments; its optional type encoding describes
//! the body in block layout:
//!
//! ```text
//! return  @?  receiver  arg1 .. argN
//!         ^^ the block's own hidden slot
//! ```
//!
//! Frame offsets may follow each token (`B20@?0@8i16`). The runtime stores the
//! encoding verbatim; validating it is the job of whoever consumes it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::value::Value;
use crate::RuntimeResult;

/// Global counter for block IDs
static NEXT_BLOCK_ID: AtomicU64 = AtomicU64::new(1);

/// Signature of a block body: `(receiver, args) -> result`
pub type BlockFn = dyn Fn(&Value, &[Value]) -> RuntimeResult<Value> + Send + Sync;

/// Closure value with optional runtime type metadata
pub struct Block {
    id: u64,
    signature: Option<Box<str>>,
    body: Box<BlockFn>,
}

impl Block {
    /// Create a block without type metadata
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        Self {
            id: NEXT_BLOCK_ID.fetch_add(1, Ordering::Relaxed),
            signature: None,
            body: Box::new(body),
        }
    }

    /// Create a block carrying a block-layout type encoding
    pub fn with_signature<F>(signature: &str, body: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        let mut block = Self::new(body);
        block.signature = Some(signature.into());
        block
    }

    /// Unique block ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The attached type encoding, if the block carries one
    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    /// Invoke the body
    pub fn call(&self, receiver: &Value, args: &[Value]) -> RuntimeResult<Value> {
        (self.body)(receiver, args)
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("signature", &self.signature)
            .finish()
    }
}

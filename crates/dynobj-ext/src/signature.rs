//! Method signatures from block metadata
//!
//! A block's encoding lists its return type, its own hidden `@?` slot, the
//! receiver it expects, then its arguments. Dispatch calls a method with the
//! receiver first and the selector second, so the derived method signature
//! drops the block slot and inserts `:` right after the receiver:
//!
//! ```text
//! block:  B  @?  @  i
//! method: B      @  :  i
//! ```

use dynobj_runtime::Block;
use log::debug;

use crate::encoding::{Encoding, MethodSignature};
use crate::error::DeriveError;

/// Derive the method signature for `block`, or `None` if its metadata is
/// missing or unusable
pub fn derive_signature(block: &Block) -> Option<String> {
    match derive_method_signature(block) {
        Ok(signature) => Some(signature.to_string()),
        Err(e) => {
            debug!("no method signature for block {}: {}", block.id(), e);
            None
        }
    }
}

/// Derive the method signature for `block`
pub fn derive_method_signature(block: &Block) -> Result<MethodSignature, DeriveError> {
    let encoding = block.signature().ok_or(DeriveError::MissingMetadata)?;
    derive_from_block_encoding(encoding)
}

/// Derive a method signature from a block-layout encoding string
pub fn derive_from_block_encoding(encoding: &str) -> Result<MethodSignature, DeriveError> {
    let block_sig = MethodSignature::parse(encoding)?;
    let mut params = block_sig.params.into_iter();

    match params.next() {
        Some(slot) if matches!(slot.unqualified(), Encoding::Block) => {}
        _ => return Err(DeriveError::NotBlockLayout(encoding.to_string())),
    }
    let receiver = match params.next() {
        Some(r) if matches!(r.unqualified(), Encoding::Object | Encoding::Class) => r,
        _ => return Err(DeriveError::MissingReceiver(encoding.to_string())),
    };

    let mut method_params = Vec::with_capacity(params.len() + 2);
    method_params.push(receiver);
    method_params.push(Encoding::Selector);
    method_params.extend(params);
    Ok(MethodSignature::new(block_sig.ret, method_params))
}

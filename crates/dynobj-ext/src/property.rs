//! Property accessor synthesis
//!
//! [`synthesize_accessors`] builds a getter/setter pair of blocks backed by
//! per-instance associated storage. Each pair owns a fresh
//! [`AssociationKey`], so two pairs never share a slot even when they are
//! installed under the same selector names.
//!
//! Ownership policies follow the usual reference semantics:
//! - `Assign` stores the value as is; an object is held without a claim and
//!   reads back as null once it is destroyed
//! - `Retain` holds a strong claim on the stored object
//! - `Copy` stores the result of sending `copy` to the incoming object
//! - `Weak` holds the object without a claim
//!
//! Every read and every store is indivisible whether or not the pair is
//! atomic: the backing [`dynobj_runtime::AssociatedSlot`] guards its contents
//! with its own mutex, one per (instance, pair), so a getter never observes a
//! partially written aggregate and distinct pairs never contend. The
//! `atomic` flag is recorded on the pair for callers that report property
//! attributes. Conversion for the `Copy` policy runs before the slot is
//! locked, and old values are released after it is unlocked.

use std::fmt;
use std::sync::Arc;

use dynobj_runtime::{
    copy_value, AssociationKey, Block, Object, RuntimeError, RuntimeResult, SlotContents, Value,
};
use crate::encoding::Encoding;
use crate::error::{type_mismatch, SynthesisError};

/// Memory policy of a synthesized setter
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum OwnershipPolicy {
    /// Store without taking ownership
    #[default]
    Assign,
    /// Take a strong claim
    Retain,
    /// Store a copy
    Copy,
    /// Non-owning reference that reads as null after destruction
    Weak,
}

impl OwnershipPolicy {
    /// Whether the policy only makes sense for reference types
    pub fn requires_reference(self) -> bool {
        !matches!(self, OwnershipPolicy::Assign)
    }
}

/// Synthesized getter and setter sharing one storage slot
///
/// Getter block layout: `T@?@`. Setter: `v@?@T`.
#[derive(Clone)]
pub struct AccessorPair {
    /// Returns the stored value
    pub getter: Arc<Block>,
    /// Stores its single argument
    pub setter: Arc<Block>,
    storage: Arc<Storage>,
}

impl AccessorPair {
    /// Key of the backing slot in each instance's associated storage
    pub fn key(&self) -> AssociationKey {
        self.storage.key
    }

    /// Property type
    pub fn encoding(&self) -> &Encoding {
        &self.storage.encoding
    }

    /// Setter policy
    pub fn policy(&self) -> OwnershipPolicy {
        self.storage.policy
    }

    /// Whether the pair was synthesized as atomic
    pub fn is_atomic(&self) -> bool {
        self.storage.atomic
    }

    /// Method types for installing the getter: `T@:`
    pub fn getter_types(&self) -> String {
        format!("{}@:", self.storage.encoding)
    }

    /// Method types for installing the setter: `v@:T`
    pub fn setter_types(&self) -> String {
        format!("v@:{}", self.storage.encoding)
    }
}

impl fmt::Debug for AccessorPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessorPair")
            .field("key", &self.storage.key)
            .field("encoding", &self.storage.encoding.to_string())
            .field("policy", &self.storage.policy)
            .field("atomic", &self.is_atomic())
            .finish()
    }
}

/// Synthesize accessors, or `None` if the encoding or policy is unusable
pub fn synthesize_accessors(
    type_encoding: &str,
    policy: OwnershipPolicy,
    atomic: bool,
) -> Option<AccessorPair> {
    match try_synthesize_accessors(type_encoding, policy, atomic) {
        Ok(pair) => Some(pair),
        Err(e) => {
            log::warn!("cannot synthesize accessors for {}: {}", type_encoding, e);
            None
        }
    }
}

/// Synthesize accessors for a property of `type_encoding`
pub fn try_synthesize_accessors(
    type_encoding: &str,
    policy: OwnershipPolicy,
    atomic: bool,
) -> Result<AccessorPair, SynthesisError> {
    let encoding = Encoding::parse(type_encoding)?;
    check_storable(&encoding)?;
    if policy.requires_reference() && !encoding.is_reference() {
        return Err(SynthesisError::PolicyMismatch {
            policy,
            encoding: encoding.to_string(),
        });
    }
    if policy == OwnershipPolicy::Weak && !matches!(encoding.unqualified(), Encoding::Object) {
        return Err(SynthesisError::PolicyMismatch {
            policy,
            encoding: encoding.to_string(),
        });
    }

    let getter_sig = format!("{}@?@", encoding);
    let setter_sig = format!("v@?@{}", encoding);
    let storage = Arc::new(Storage {
        key: AssociationKey::new(),
        encoding,
        policy,
        atomic,
    });

    let getter = {
        let storage = storage.clone();
        Block::with_signature(&getter_sig, move |receiver, args| {
            expect_args("getter", 0, args)?;
            storage.get(receiver)
        })
    };
    let setter = {
        let storage = storage.clone();
        Block::with_signature(&setter_sig, move |receiver, args| {
            expect_args("setter", 1, args)?;
            storage.set(receiver, &args[0])?;
            Ok(Value::null())
        })
    };

    Ok(AccessorPair {
        getter: Arc::new(getter),
        setter: Arc::new(setter),
        storage,
    })
}

/// Most values a single aggregate property may hold
const MAX_AGGREGATE_VALUES: usize = 1 << 16;

fn check_storable(encoding: &Encoding) -> Result<(), SynthesisError> {
    let unstorable = match encoding.unqualified() {
        Encoding::Void | Encoding::BitField(_) | Encoding::Union { .. } => true,
        Encoding::Struct { .. } | Encoding::Array { .. } => {
            encoding.size_and_alignment().is_none()
                || encoding
                    .value_count()
                    .map_or(true, |count| count > MAX_AGGREGATE_VALUES)
        }
        _ => false,
    };
    if unstorable {
        Err(SynthesisError::Unstorable(encoding.to_string()))
    } else {
        Ok(())
    }
}

fn expect_args(accessor: &str, expected: usize, args: &[Value]) -> RuntimeResult<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(RuntimeError::Invocation(format!(
            "{} expects {} arguments, got {}",
            accessor,
            expected,
            args.len()
        )))
    }
}

/// State shared by the two blocks of a pair
struct Storage {
    key: AssociationKey,
    encoding: Encoding,
    policy: OwnershipPolicy,
    atomic: bool,
}

impl Storage {
    fn instance<'v>(&self, receiver: &'v Value) -> RuntimeResult<Option<&'v Object>> {
        match receiver {
            Value::Object(id) => Ok(Some(&**id)),
            Value::Null => Ok(None),
            other => Err(RuntimeError::NotAnObject(other.kind_name())),
        }
    }

    fn get(&self, receiver: &Value) -> RuntimeResult<Value> {
        let Some(object) = self.instance(receiver)? else {
            return Ok(self.encoding.zero_value());
        };
        let Some(slot) = object.existing_associated_slot(self.key) else {
            return Ok(self.encoding.zero_value());
        };
        Ok(slot.load().unwrap_or_else(|| self.encoding.zero_value()))
    }

    fn set(&self, receiver: &Value, value: &Value) -> RuntimeResult<()> {
        if !self.encoding.admits(value) {
            return Err(type_mismatch(&self.encoding, value.kind_name()));
        }
        let Some(object) = self.instance(receiver)? else {
            return Ok(());
        };

        // the new claim (or copy) exists before the old one is given up
        let contents = match (self.policy, value) {
            (OwnershipPolicy::Assign | OwnershipPolicy::Weak, Value::Object(id)) => {
                SlotContents::Weak(id.downgrade())
            }
            (OwnershipPolicy::Weak, Value::Block(_)) => {
                return Err(type_mismatch(&"weak object", value.kind_name()));
            }
            (OwnershipPolicy::Copy, value) => SlotContents::Value(copy_value(value)?),
            (_, value) => SlotContents::Value(value.clone()),
        };

        let previous = object.associated_slot(self.key).swap(contents);
        drop(previous);
        Ok(())
    }
}

//! Message dispatch
//!
//! Dispatch resolves the receiver's class (the metaclass for class
//! receivers), walks the superclass chain for the selector and calls the
//! implementation with `(receiver, selector, args)`. Each table is read
//! through a snapshot, so no lock is held while an implementation runs and
//! implementations are free to mutate method tables themselves.

use std::sync::Arc;

use log::trace;

use crate::object::{Class, Method};
use crate::selector::Sel;
use crate::value::Value;
use crate::{RuntimeError, RuntimeResult};

/// Class that answers messages sent to `receiver`
pub fn class_of(receiver: &Value) -> Option<Arc<Class>> {
    match receiver {
        Value::Object(id) => Some(id.class().clone()),
        Value::Class(class) => class.metaclass().cloned(),
        _ => None,
    }
}

/// Resolve the method `receiver` would run for `sel`
pub fn resolve(receiver: &Value, sel: Sel) -> Option<Arc<Method>> {
    class_of(receiver)?.lookup(sel)
}

/// Send a message
///
/// Messages to nil answer nil without running anything.
pub fn send(receiver: &Value, sel: Sel, args: &[Value]) -> RuntimeResult<Value> {
    let class = match class_of(receiver) {
        Some(class) => class,
        None if receiver.is_null() => return Ok(Value::null()),
        None => return Err(RuntimeError::NotAnObject(receiver.kind_name())),
    };
    let method = class
        .lookup(sel)
        .ok_or_else(|| RuntimeError::UnrecognizedSelector {
            class: class.name().to_string(),
            selector: sel,
        })?;
    trace!("dispatch -[{} {}] ({})", class.name(), sel, method.types());
    method.invoke(receiver, args)
}

/// Send a message starting the lookup at `class`'s superclass
///
/// `class` is the class whose implementation is making the super call, not
/// necessarily the receiver's class.
pub fn send_super(class: &Class, receiver: &Value, sel: Sel, args: &[Value]) -> RuntimeResult<Value> {
    if receiver.is_null() {
        return Ok(Value::null());
    }
    let method = class
        .superclass()
        .and_then(|s| s.lookup(sel))
        .ok_or_else(|| RuntimeError::UnrecognizedSelector {
            class: class.name().to_string(),
            selector: sel,
        })?;
    trace!("dispatch super -[{} {}]", class.name(), sel);
    method.invoke(receiver, args)
}

/// Whether `receiver` answers `sel`
pub fn responds_to(receiver: &Value, sel: Sel) -> bool {
    resolve(receiver, sel).is_some()
}

/// Produce an owned duplicate of `value`
///
/// Objects are asked to `copy` themselves and must answer an object (or nil).
/// Strings, blocks and classes are immutable and are shared. Scalars and
/// aggregates are copied by value.
pub fn copy_value(value: &Value) -> RuntimeResult<Value> {
    match value {
        Value::Object(id) => {
            let copy_sel = Sel::register("copy");
            if !id.class().responds_to(copy_sel) {
                return Err(RuntimeError::NotCopyable(id.class().name().to_string()));
            }
            match send(value, copy_sel, &[])? {
                copied @ (Value::Object(_) | Value::Null) => Ok(copied),
                other => Err(RuntimeError::TypeMismatch {
                    expected: "object".to_string(),
                    actual: other.kind_name(),
                }),
            }
        }
        other => Ok(other.clone()),
    }
}

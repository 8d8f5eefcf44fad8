//! Installing closures as methods
//!
//! A block's body takes `(receiver, args)`; the dispatcher calls methods with
//! `(receiver, selector, args)`. [`MethodInjector`] wraps a block in an
//! implementation that drops the selector, checks the arguments against the
//! declared types and checks the block's result against the declared return
//! type before handing it back to the caller.
//!
//! Adding never overwrites: whether an existing entry counts as a conflict is
//! decided by [`ConflictScope`]. Replacing always installs, and only ever
//! touches the target class's own table.

use std::sync::Arc;

use dynobj_runtime::{Block, Class, Imp, Method, RuntimeError, Sel};
use log::{debug, warn};

use crate::attributes::PropertyAttributes;
use crate::encoding::MethodSignature;
use crate::error::{type_mismatch, InjectError, InjectResult};
use crate::property::{try_synthesize_accessors, AccessorPair};
use crate::signature::derive_method_signature;

/// Which existing entries make an add fail
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ConflictScope {
    /// Only methods declared directly on the target class
    #[default]
    ExactClass,
    /// Methods on the target class or any ancestor
    IncludeInherited,
}

/// Injection options
#[derive(Debug, Clone)]
pub struct InjectOptions {
    /// Conflict rule for adds
    pub conflict_scope: ConflictScope,

    /// Compare the argument count of a block's own metadata (when it has
    /// usable metadata) against the explicit method types
    pub verify_block_signature: bool,
}

impl Default for InjectOptions {
    fn default() -> Self {
        Self {
            conflict_scope: ConflictScope::ExactClass,
            verify_block_signature: true,
        }
    }
}

/// Installs blocks into method tables
#[derive(Debug, Clone, Default)]
pub struct MethodInjector {
    options: InjectOptions,
}

impl MethodInjector {
    /// Create an injector with default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an injector with specific options
    pub fn with_options(options: InjectOptions) -> Self {
        Self { options }
    }

    /// Current options
    pub fn options(&self) -> &InjectOptions {
        &self.options
    }

    /// Add `block` as the implementation of `sel` unless it conflicts
    pub fn try_add_method(
        &self,
        class: &Arc<Class>,
        sel: Sel,
        block: &Arc<Block>,
        types: &str,
    ) -> InjectResult<()> {
        let method = self.prepare(sel, block, types)?;
        let added = match self.options.conflict_scope {
            ConflictScope::ExactClass => class.add_method(method),
            ConflictScope::IncludeInherited => class.add_method_unless_inherited(method),
        };
        if !added {
            return Err(InjectError::AlreadyPresent(sel));
        }
        debug!("added -[{} {}] {}", class.name(), sel, types);
        Ok(())
    }

    /// Install `block` as the implementation of `sel`, returning the entry it
    /// displaced on this class
    pub fn try_replace_method(
        &self,
        class: &Arc<Class>,
        sel: Sel,
        block: &Arc<Block>,
        types: &str,
    ) -> InjectResult<Option<Arc<Method>>> {
        let method = self.prepare(sel, block, types)?;
        let previous = class.replace_method(method);
        debug!(
            "{} -[{} {}] {}",
            if previous.is_some() { "replaced" } else { "installed" },
            class.name(),
            sel,
            types
        );
        Ok(previous)
    }

    /// Add `block` as the implementation of `sel`; `false` on a conflict or
    /// on invalid types
    pub fn add_method(&self, class: &Arc<Class>, sel: Sel, block: &Arc<Block>, types: &str) -> bool {
        match self.try_add_method(class, sel, block, types) {
            Ok(()) => true,
            Err(InjectError::AlreadyPresent(_)) => {
                debug!("-[{} {}] already exists, not adding", class.name(), sel);
                false
            }
            Err(e) => {
                warn!("cannot add -[{} {}]: {}", class.name(), sel, e);
                false
            }
        }
    }

    /// Install `block` as the implementation of `sel`; invalid types leave
    /// the table untouched
    pub fn replace_method(&self, class: &Arc<Class>, sel: Sel, block: &Arc<Block>, types: &str) {
        if let Err(e) = self.try_replace_method(class, sel, block, types) {
            warn!("cannot replace -[{} {}]: {}", class.name(), sel, e);
        }
    }

    /// Add `block` using the signature derived from its own metadata
    pub fn add_block_method(&self, class: &Arc<Class>, sel: Sel, block: &Arc<Block>) -> InjectResult<()> {
        let types = derive_method_signature(block)?.to_string();
        self.try_add_method(class, sel, block, &types)
    }

    /// Replace with `block` using the signature derived from its own metadata
    pub fn replace_block_method(
        &self,
        class: &Arc<Class>,
        sel: Sel,
        block: &Arc<Block>,
    ) -> InjectResult<Option<Arc<Method>>> {
        let types = derive_method_signature(block)?.to_string();
        self.try_replace_method(class, sel, block, &types)
    }

    /// Synthesize accessors for a property and add them to `class`
    ///
    /// Both selectors are added together or not at all. A read-only property
    /// gets only a getter.
    pub fn add_property(
        &self,
        class: &Arc<Class>,
        name: &str,
        attributes: &PropertyAttributes,
    ) -> InjectResult<AccessorPair> {
        let pair = try_synthesize_accessors(
            &attributes.type_encoding,
            attributes.policy,
            attributes.is_atomic(),
        )?;

        let getter_sel = Sel::register(&attributes.getter_name(name));
        let mut methods = vec![self.prepare(getter_sel, &pair.getter, &pair.getter_types())?];
        if !attributes.readonly {
            let setter_sel = Sel::register(&attributes.setter_name(name));
            methods.push(self.prepare(setter_sel, &pair.setter, &pair.setter_types())?);
        }

        let include_inherited = self.options.conflict_scope == ConflictScope::IncludeInherited;
        class
            .add_methods(methods, include_inherited)
            .map_err(InjectError::AlreadyPresent)?;
        debug!(
            "added property {}.{} ({}, {:?})",
            class.name(),
            name,
            attributes.type_encoding,
            attributes.policy
        );
        Ok(pair)
    }

    fn prepare(&self, sel: Sel, block: &Arc<Block>, types: &str) -> InjectResult<Method> {
        let signature = MethodSignature::parse(types)?;
        if !signature.is_method_layout() {
            return Err(InjectError::NotMethodLayout(types.to_string()));
        }
        if self.options.verify_block_signature {
            self.verify_block(block, &signature)?;
        }
        Ok(Method::from_imp(sel, &signature.to_string(), block_imp(signature, block.clone())))
    }

    fn verify_block(&self, block: &Block, declared: &MethodSignature) -> InjectResult<()> {
        let Some(encoding) = block.signature() else {
            return Ok(());
        };
        match derive_method_signature(block) {
            Ok(own) if own.arguments().len() != declared.arguments().len() => {
                Err(InjectError::ArityMismatch {
                    declared: declared.arguments().len(),
                    block: own.arguments().len(),
                })
            }
            Ok(_) => Ok(()),
            Err(e) => {
                debug!("ignoring unusable block metadata {:?}: {}", encoding, e);
                Ok(())
            }
        }
    }
}

/// Wrap `block` in the dispatcher's calling convention
fn block_imp(signature: MethodSignature, block: Arc<Block>) -> Imp {
    Arc::new(move |receiver, sel, args| {
        let declared = signature.arguments();
        if args.len() != declared.len() {
            return Err(RuntimeError::ArgumentCount {
                selector: sel,
                expected: declared.len(),
                actual: args.len(),
            });
        }
        if let Some((ty, arg)) = declared.iter().zip(args).find(|(ty, arg)| !ty.admits(arg)) {
            return Err(type_mismatch(ty, arg.kind_name()));
        }

        let result = block.call(receiver, args)?;
        if signature.ret.is_void() {
            return Ok(Default::default());
        }
        if !signature.ret.admits(&result) {
            return Err(type_mismatch(&signature.ret, result.kind_name()));
        }
        Ok(result)
    })
}

/// [`MethodInjector::add_method`] with default options
pub fn add_method(class: &Arc<Class>, sel: Sel, block: &Arc<Block>, types: &str) -> bool {
    MethodInjector::new().add_method(class, sel, block, types)
}

/// [`MethodInjector::replace_method`] with default options
pub fn replace_method(class: &Arc<Class>, sel: Sel, block: &Arc<Block>, types: &str) {
    MethodInjector::new().replace_method(class, sel, block, types)
}

/// [`MethodInjector::try_add_method`] with default options
pub fn try_add_method(class: &Arc<Class>, sel: Sel, block: &Arc<Block>, types: &str) -> InjectResult<()> {
    MethodInjector::new().try_add_method(class, sel, block, types)
}

/// [`MethodInjector::try_replace_method`] with default options
pub fn try_replace_method(
    class: &Arc<Class>,
    sel: Sel,
    block: &Arc<Block>,
    types: &str,
) -> InjectResult<Option<Arc<Method>>> {
    MethodInjector::new().try_replace_method(class, sel, block, types)
}

/// Add a method whose types come from the block's own metadata
pub fn add_block_method_derived(class: &Arc<Class>, sel: Sel, block: &Arc<Block>) -> InjectResult<()> {
    MethodInjector::new().add_block_method(class, sel, block)
}

/// Replace a method using types from the block's own metadata
pub fn replace_block_method_derived(
    class: &Arc<Class>,
    sel: Sel,
    block: &Arc<Block>,
) -> InjectResult<Option<Arc<Method>>> {
    MethodInjector::new().replace_block_method(class, sel, block)
}

/// [`MethodInjector::add_property`] with default options
pub fn add_property(
    class: &Arc<Class>,
    name: &str,
    attributes: &PropertyAttributes,
) -> InjectResult<AccessorPair> {
    MethodInjector::new().add_property(class, name, attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynobj_runtime::{send, Runtime, Value};

    fn int_block(v: i32) -> Arc<Block> {
        Arc::new(Block::new(move |_, _| Ok(Value::i32(v))))
    }

    #[test]
    fn test_add_then_dispatch() {
        let runtime = Runtime::new();
        let class = runtime.define_class("Adder", None, 0).unwrap();
        let sel = Sel::register("methodTestAdd:to:");
        let block = Arc::new(Block::new(|_, args| {
            Ok(Value::i32(args[0].as_i32().unwrap_or(0) + args[1].as_i32().unwrap_or(0)))
        }));

        assert!(add_method(&class, sel, &block, "i@:ii"));
        let obj = Value::from(runtime.alloc(&class));
        assert_eq!(send(&obj, sel, &[Value::i32(2), Value::i32(3)]).unwrap(), Value::i32(5));
    }

    #[test]
    fn test_add_does_not_overwrite() {
        let runtime = Runtime::new();
        let class = runtime.define_class("Once", None, 0).unwrap();
        let sel = Sel::register("methodTestOnce");

        assert!(add_method(&class, sel, &int_block(1), "i@:"));
        assert!(!add_method(&class, sel, &int_block(2), "i@:"));
        assert_eq!(
            try_add_method(&class, sel, &int_block(3), "i@:").unwrap_err(),
            InjectError::AlreadyPresent(sel)
        );

        let obj = Value::from(runtime.alloc(&class));
        assert_eq!(send(&obj, sel, &[]).unwrap(), Value::i32(1));
    }

    #[test]
    fn test_conflict_scope() {
        let runtime = Runtime::new();
        let base = runtime.define_class("ScopeBase", None, 0).unwrap();
        let derived = runtime.define_class("ScopeDerived", Some(&base), 0).unwrap();
        let sel = Sel::register("methodTestScope");
        assert!(add_method(&base, sel, &int_block(1), "i@:"));

        let strict = MethodInjector::with_options(InjectOptions {
            conflict_scope: ConflictScope::IncludeInherited,
            ..Default::default()
        });
        assert!(!strict.add_method(&derived, sel, &int_block(2), "i@:"));
        assert!(MethodInjector::new().add_method(&derived, sel, &int_block(2), "i@:"));
    }

    #[test]
    fn test_replace_installs_or_overwrites() {
        let runtime = Runtime::new();
        let class = runtime.define_class("Replaced", None, 0).unwrap();
        let sel = Sel::register("methodTestReplace");
        let obj = Value::from(runtime.alloc(&class));

        assert!(try_replace_method(&class, sel, &int_block(1), "i@:").unwrap().is_none());
        assert_eq!(send(&obj, sel, &[]).unwrap(), Value::i32(1));

        replace_method(&class, sel, &int_block(2), "i@:");
        assert_eq!(send(&obj, sel, &[]).unwrap(), Value::i32(2));
    }

    #[test]
    fn test_invalid_types_leave_table_unchanged() {
        let runtime = Runtime::new();
        let class = runtime.define_class("Untouched", None, 0).unwrap();
        let sel = Sel::register("methodTestInvalid");

        assert!(!add_method(&class, sel, &int_block(1), "i@:z"));
        replace_method(&class, sel, &int_block(1), "");
        replace_method(&class, sel, &int_block(1), "ii");
        assert!(matches!(
            try_add_method(&class, sel, &int_block(1), "i@i"),
            Err(InjectError::NotMethodLayout(_))
        ));
        assert_eq!(class.method_table().version(), 0);
    }

    #[test]
    fn test_arity_checked_against_block_metadata() {
        let runtime = Runtime::new();
        let class = runtime.define_class("Arity", None, 0).unwrap();
        let sel = Sel::register("methodTestArity:");
        let block = Arc::new(Block::with_signature("i@?@ii", |_, _| Ok(Value::i32(0))));

        assert_eq!(
            try_add_method(&class, sel, &block, "i@:i").unwrap_err(),
            InjectError::ArityMismatch {
                declared: 1,
                block: 2
            }
        );

        let lax = MethodInjector::with_options(InjectOptions {
            verify_block_signature: false,
            ..Default::default()
        });
        assert!(lax.add_method(&class, sel, &block, "i@:i"));
    }

    #[test]
    fn test_thunk_checks_arguments_and_result() {
        let runtime = Runtime::new();
        let class = runtime.define_class("Checked", None, 0).unwrap();
        let sel = Sel::register("methodTestChecked:");
        let liar = Arc::new(Block::new(|_, _| Ok(Value::str("not an int"))));
        assert!(add_method(&class, sel, &liar, "i@:d"));

        let obj = Value::from(runtime.alloc(&class));
        assert!(matches!(
            send(&obj, sel, &[]),
            Err(RuntimeError::ArgumentCount { expected: 1, actual: 0, .. })
        ));
        assert!(matches!(
            send(&obj, sel, &[Value::i32(1)]),
            Err(RuntimeError::TypeMismatch { .. })
        ));
        assert!(matches!(
            send(&obj, sel, &[Value::f64(1.0)]),
            Err(RuntimeError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_void_return_discards_result() {
        let runtime = Runtime::new();
        let class = runtime.define_class("Voided", None, 0).unwrap();
        let sel = Sel::register("methodTestVoid");
        assert!(add_method(&class, sel, &int_block(5), "v@:"));

        let obj = Value::from(runtime.alloc(&class));
        assert_eq!(send(&obj, sel, &[]).unwrap(), Value::null());
    }

    #[test]
    fn test_derived_add() {
        let runtime = Runtime::new();
        let class = runtime.define_class("Derived", None, 0).unwrap();
        let sel = Sel::register("methodTestDerived:");
        let block = Arc::new(Block::with_signature("B@?@i", |_, args| {
            Ok(Value::bool(args[0].as_i32() == Some(3)))
        }));

        add_block_method_derived(&class, sel, &block).unwrap();
        assert_eq!(class.method(sel).unwrap().types(), "B@:i");

        let obj = Value::from(runtime.alloc(&class));
        assert_eq!(send(&obj, sel, &[Value::i32(3)]).unwrap(), Value::bool(true));

        let bare = Arc::new(Block::new(|_, _| Ok(Value::null())));
        assert!(matches!(
            replace_block_method_derived(&class, sel, &bare),
            Err(InjectError::Derive(_))
        ));
    }

    #[test]
    fn test_class_methods_via_metaclass() {
        let runtime = Runtime::new();
        let class = runtime.define_class("Factory", None, 0).unwrap();
        let meta = class.metaclass().unwrap().clone();
        let sel = Sel::register("methodTestMake");
        let block = Arc::new(Block::with_signature("i@?#", |_, _| Ok(Value::i32(11))));

        add_block_method_derived(&meta, sel, &block).unwrap();
        assert_eq!(send(&Value::Class(class), sel, &[]).unwrap(), Value::i32(11));
    }

    #[test]
    fn test_add_property() {
        let runtime = Runtime::new();
        let class = runtime.define_class("Person", None, 0).unwrap();
        let attrs = PropertyAttributes::parse("Ti,N").unwrap();
        add_property(&class, "age", &attrs).unwrap();

        let obj = Value::from(runtime.alloc(&class));
        send(&obj, Sel::register("setAge:"), &[Value::i32(30)]).unwrap();
        assert_eq!(send(&obj, Sel::register("age"), &[]).unwrap(), Value::i32(30));

        assert!(matches!(
            add_property(&class, "age", &attrs),
            Err(InjectError::AlreadyPresent(_))
        ));
    }

    #[test]
    fn test_add_property_is_all_or_nothing() {
        let runtime = Runtime::new();
        let class = runtime.define_class("Partial", None, 0).unwrap();
        let setter = Sel::register("setTaken:");
        assert!(add_method(&class, setter, &int_block(0), "v@:i"));

        let attrs = PropertyAttributes::parse("Ti").unwrap();
        assert_eq!(
            add_property(&class, "taken", &attrs).unwrap_err(),
            InjectError::AlreadyPresent(setter)
        );
        assert!(class.method(Sel::register("taken")).is_none());
    }

    #[test]
    fn test_readonly_property_has_no_setter() {
        let runtime = Runtime::new();
        let class = runtime.define_class("ReadOnly", None, 0).unwrap();
        let attrs = PropertyAttributes::parse("T@,R,&").unwrap();
        add_property(&class, "owner", &attrs).unwrap();

        assert!(class.method(Sel::register("owner")).is_some());
        assert!(class.method(Sel::register("setOwner:")).is_none());
    }
}

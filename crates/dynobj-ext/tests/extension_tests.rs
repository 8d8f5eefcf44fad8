//! Integration tests for closure-backed methods and synthesized accessors
//!
//! Exercises the public surface end to end: derive a signature, install a
//! block, dispatch to it, and drive synthesized accessors from several
//! threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use dynobj_ext::{
    add_block_method_derived, add_method, add_property, derive_method_signature,
    derive_signature, replace_method, synthesize_accessors, try_synthesize_accessors, Encoding,
    InjectError, OwnershipPolicy, PropertyAttributes, SynthesisError,
};
use dynobj_runtime::{send, Block, Runtime, RuntimeError, Sel, Value};
use rand::Rng;

// ============================================================================
// Signature derivation
// ============================================================================

mod derivation {
    use super::*;

    #[test]
    fn test_three_argument_closure() {
        let block = Block::with_signature("B@?@i", |_, _| Ok(Value::bool(true)));
        let sig = derive_method_signature(&block).unwrap();
        let tokens: Vec<Encoding> = sig.tokens().cloned().collect();
        assert_eq!(
            tokens,
            [Encoding::Bool, Encoding::Object, Encoding::Selector, Encoding::Int]
        );
    }

    #[test]
    fn test_no_metadata_is_absent() {
        let block = Block::new(|_, _| Ok(Value::null()));
        assert_eq!(derive_signature(&block), None);
    }

    #[test]
    fn test_derived_signature_installs() {
        let runtime = Runtime::new();
        let class = runtime.define_class("Shape", None, 0).unwrap();
        let sel = Sel::register("scaledBy:");
        let block = Arc::new(Block::with_signature("d24@?0@8d16", |_, args| {
            Ok(Value::f64(args[0].as_f64().unwrap_or_default() * 2.0))
        }));

        add_block_method_derived(&class, sel, &block).unwrap();
        let obj = Value::from(runtime.alloc(&class));
        assert_eq!(send(&obj, sel, &[Value::f64(1.5)]).unwrap(), Value::f64(3.0));
    }
}

// ============================================================================
// Method tables
// ============================================================================

mod methods {
    use super::*;

    #[test]
    fn test_add_foo_twice() {
        let runtime = Runtime::new();
        let class = runtime.define_class("Fooable", None, 0).unwrap();
        let foo = Sel::register("foo");
        let first = Arc::new(Block::new(|_, _| Ok(Value::str("first"))));
        let second = Arc::new(Block::new(|_, _| Ok(Value::str("second"))));

        assert!(add_method(&class, foo, &first, "*@:"));
        assert!(!add_method(&class, foo, &second, "*@:"));

        let obj = Value::from(runtime.alloc(&class));
        assert_eq!(send(&obj, foo, &[]).unwrap(), Value::str("first"));
    }

    #[test]
    fn test_replace_then_dispatch_sees_new_block() {
        let runtime = Runtime::new();
        let class = runtime.define_class("Swappable", None, 0).unwrap();
        let sel = Sel::register("version");
        let obj = Value::from(runtime.alloc(&class));

        for v in 1..=3 {
            let block = Arc::new(Block::new(move |_, _| Ok(Value::i32(v))));
            replace_method(&class, sel, &block, "i@:");
            assert_eq!(send(&obj, sel, &[]).unwrap(), Value::i32(v));
        }
    }

    #[test]
    fn test_nil_receiver_gets_null() {
        let runtime = Runtime::new();
        let class = runtime.define_class("Nilable", None, 0).unwrap();
        let sel = Sel::register("anything");
        let block = Arc::new(Block::new(|_, _| Ok(Value::i32(1))));
        assert!(add_method(&class, sel, &block, "i@:"));

        assert_eq!(send(&Value::null(), sel, &[]).unwrap(), Value::null());
    }

    #[test]
    fn test_block_may_replace_its_own_method() {
        let runtime = Runtime::new();
        let class = runtime.define_class("Rewriter", None, 0).unwrap();
        let sel = Sel::register("rewrite");

        let target = class.clone();
        let block = Arc::new(Block::new(move |_, _| {
            let next = Arc::new(Block::new(|_, _| Ok(Value::i32(2))));
            replace_method(&target, Sel::register("rewrite"), &next, "i@:");
            Ok(Value::i32(1))
        }));
        assert!(add_method(&class, sel, &block, "i@:"));

        let obj = Value::from(runtime.alloc(&class));
        assert_eq!(send(&obj, sel, &[]).unwrap(), Value::i32(1));
        assert_eq!(send(&obj, sel, &[]).unwrap(), Value::i32(2));
    }

    #[test]
    fn test_replace_under_concurrent_readers() {
        let runtime = Runtime::new();
        let class = runtime.define_class("HotSwap", None, 0).unwrap();
        let sel = Sel::register("current:");
        let initial = Arc::new(Block::new(|_, args| Ok(args[0].clone())));
        assert!(add_method(&class, sel, &initial, "i@:i"));

        let obj = Value::from(runtime.alloc(&class));
        let done = Arc::new(AtomicBool::new(false));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let obj = obj.clone();
                let done = done.clone();
                thread::spawn(move || {
                    while !done.load(Ordering::Acquire) {
                        let v = send(&obj, sel, &[Value::i32(5)]).unwrap().as_i32().unwrap();
                        // either the identity block or one of the offset blocks
                        assert!(v == 5 || (1005..=1204).contains(&v));
                    }
                })
            })
            .collect();

        for offset in 1000..1200 {
            let block = Arc::new(Block::new(move |_, args| {
                Ok(Value::i32(args[0].as_i32().unwrap_or_default() + offset))
            }));
            replace_method(&class, sel, &block, "i@:i");
        }
        done.store(true, Ordering::Release);
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(send(&obj, sel, &[Value::i32(5)]).unwrap(), Value::i32(1204));
    }

    #[test]
    fn test_arity_mismatch_rejected() {
        let runtime = Runtime::new();
        let class = runtime.define_class("Strict", None, 0).unwrap();
        let sel = Sel::register("takesTwo::");
        let block = Arc::new(Block::with_signature("v@?@i", |_, _| Ok(Value::null())));

        assert!(!add_method(&class, sel, &block, "v@:ii"));
        assert!(class.method(sel).is_none());
    }
}

// ============================================================================
// Synthesized accessors
// ============================================================================

mod accessors {
    use super::*;

    #[test]
    fn test_installed_accessors_round_trip() {
        let runtime = Runtime::new();
        let class = runtime.define_class("Account", None, 0).unwrap();
        let pair = synthesize_accessors("q", OwnershipPolicy::Assign, true).unwrap();

        let getter = Sel::register("balance");
        let setter = Sel::register("setBalance:");
        assert!(add_method(&class, getter, &pair.getter, &pair.getter_types()));
        assert!(add_method(&class, setter, &pair.setter, &pair.setter_types()));

        let a = Value::from(runtime.alloc(&class));
        let b = Value::from(runtime.alloc(&class));
        assert_eq!(send(&a, getter, &[]).unwrap(), Value::i64(0));

        send(&a, setter, &[Value::i64(100)]).unwrap();
        assert_eq!(send(&a, getter, &[]).unwrap(), Value::i64(100));
        assert_eq!(send(&b, getter, &[]).unwrap(), Value::i64(0));
    }

    #[test]
    fn test_weak_on_int_rejected() {
        assert!(synthesize_accessors("i", OwnershipPolicy::Weak, false).is_none());
        assert!(matches!(
            try_synthesize_accessors("i", OwnershipPolicy::Weak, false),
            Err(SynthesisError::PolicyMismatch {
                policy: OwnershipPolicy::Weak,
                ..
            })
        ));
    }

    #[test]
    fn test_retain_holds_until_overwritten() {
        let runtime = Runtime::new();
        let holder = Value::from(runtime.alloc(runtime.root_class()));
        let pair = synthesize_accessors("@", OwnershipPolicy::Retain, true).unwrap();

        let first = runtime.alloc(runtime.root_class());
        let watch = first.downgrade();
        pair.setter.call(&holder, &[Value::from(first)]).unwrap();
        assert!(watch.is_live());

        // setting the same value again must not release it
        let same = pair.getter.call(&holder, &[]).unwrap();
        pair.setter.call(&holder, &[same]).unwrap();
        assert!(watch.is_live());

        let second = runtime.alloc(runtime.root_class());
        pair.setter.call(&holder, &[Value::from(second)]).unwrap();
        assert!(!watch.is_live());
    }

    #[test]
    fn test_weak_does_not_extend_lifetime() {
        let runtime = Runtime::new();
        let holder = Value::from(runtime.alloc(runtime.root_class()));
        let pair = synthesize_accessors("@", OwnershipPolicy::Weak, false).unwrap();

        let target = runtime.alloc(runtime.root_class());
        pair.setter.call(&holder, &[Value::from(target.clone())]).unwrap();
        assert!(!pair.getter.call(&holder, &[]).unwrap().is_null());

        drop(target);
        assert!(pair.getter.call(&holder, &[]).unwrap().is_null());
    }

    #[test]
    fn test_slot_released_with_instance() {
        let runtime = Runtime::new();
        let holder = runtime.alloc(runtime.root_class());
        let pair = synthesize_accessors("@", OwnershipPolicy::Retain, false).unwrap();

        let child = runtime.alloc(runtime.root_class());
        let watch = child.downgrade();
        pair.setter
            .call(&Value::from(holder.clone()), &[Value::from(child)])
            .unwrap();
        assert!(watch.is_live());

        drop(holder);
        assert!(!watch.is_live());
    }

    #[test]
    fn test_atomic_struct_never_torn() {
        let runtime = Runtime::new();
        let obj = Value::from(runtime.alloc(runtime.root_class()));
        let pair = synthesize_accessors("{Pair=qq}", OwnershipPolicy::Assign, true).unwrap();
        let pair_value = |n: i64| Value::structure(vec![Value::i64(n), Value::i64(-n)]);

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let obj = obj.clone();
                let setter = pair.setter.clone();
                thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    for _ in 0..500 {
                        let n = rng.gen_range(1..1_000_000i64);
                        setter.call(&obj, &[pair_value(n)]).unwrap();
                    }
                })
            })
            .collect();
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let obj = obj.clone();
                let getter = pair.getter.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let Value::Struct(fields) = getter.call(&obj, &[]).unwrap() else {
                            panic!("getter returned a non-struct value");
                        };
                        let a = fields[0].as_i64().unwrap();
                        let b = fields[1].as_i64().unwrap();
                        assert_eq!(a, -b);
                    }
                })
            })
            .collect();

        for handle in writers.into_iter().chain(readers) {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_atomic_pairs_on_one_object_are_independent() {
        let runtime = Runtime::new();
        let obj = Value::from(runtime.alloc(runtime.root_class()));
        let pairs: Vec<_> = (0..8)
            .map(|_| synthesize_accessors("q", OwnershipPolicy::Assign, true).unwrap())
            .collect();

        let handles: Vec<_> = pairs
            .iter()
            .enumerate()
            .map(|(index, pair)| {
                let obj = obj.clone();
                let getter = pair.getter.clone();
                let setter = pair.setter.clone();
                thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    for _ in 0..500 {
                        let v = rng.gen_range(0..1_000_000i64) * 8 + index as i64;
                        setter.call(&obj, &[Value::i64(v)]).unwrap();
                        assert_eq!(getter.call(&obj, &[]).unwrap(), Value::i64(v));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_setter_type_checked_through_dispatch() {
        let runtime = Runtime::new();
        let class = runtime.define_class("Typed", None, 0).unwrap();
        let attrs = PropertyAttributes::parse("Td,N").unwrap();
        add_property(&class, "ratio", &attrs).unwrap();

        let obj = Value::from(runtime.alloc(&class));
        let err = send(&obj, Sel::register("setRatio:"), &[Value::i32(1)]).unwrap_err();
        assert!(matches!(err, RuntimeError::TypeMismatch { .. }));
    }

    #[test]
    fn test_property_with_custom_names() {
        let runtime = Runtime::new();
        let class = runtime.define_class("Switch", None, 0).unwrap();
        let attrs = PropertyAttributes::parse("TB,N,GisOn,SturnOn:").unwrap();
        add_property(&class, "on", &attrs).unwrap();

        let obj = Value::from(runtime.alloc(&class));
        send(&obj, Sel::register("turnOn:"), &[Value::bool(true)]).unwrap();
        assert_eq!(send(&obj, Sel::register("isOn"), &[]).unwrap(), Value::bool(true));
        assert!(matches!(
            add_property(&class, "on", &attrs),
            Err(InjectError::AlreadyPresent(_))
        ));
    }
}

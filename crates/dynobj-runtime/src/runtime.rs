//! Runtime instance: class registry plus the root class

use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::class_registry::ClassRegistry;
use crate::object::{Class, Method, Object};
use crate::selector::Sel;
use crate::value::{Id, Value};
use crate::{RuntimeError, RuntimeResult};

/// Options for creating a [`Runtime`]
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Name of the root class every `define_class(.., None, ..)` derives from
    pub root_class_name: String,

    /// Install the root class's built-in methods (`copy`, `class`,
    /// `respondsToSelector:`)
    pub install_root_methods: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            root_class_name: "Object".to_string(),
            install_root_methods: true,
        }
    }
}

/// Object model instance
///
/// Owns the class registry. Dispatch itself needs no runtime handle: a
/// receiver reaches its methods through its class.
pub struct Runtime {
    classes: RwLock<ClassRegistry>,
    root: Arc<Class>,
}

impl Runtime {
    /// Create a runtime with default options
    pub fn new() -> Self {
        Self::with_options(RuntimeOptions::default())
    }

    /// Create a runtime with specific options
    pub fn with_options(options: RuntimeOptions) -> Self {
        let mut classes = ClassRegistry::new();
        let root = classes
            .define_class(&options.root_class_name, None, 0)
            .unwrap_or_else(|_| unreachable!("registry is empty"));
        if options.install_root_methods {
            install_root_methods(&root);
        }
        debug!("runtime created with root class {}", root.name());
        Self {
            classes: RwLock::new(classes),
            root,
        }
    }

    /// The root class
    pub fn root_class(&self) -> &Arc<Class> {
        &self.root
    }

    /// Define a class; `None` as superclass means the root class
    pub fn define_class(
        &self,
        name: &str,
        superclass: Option<&Arc<Class>>,
        extra_fields: usize,
    ) -> RuntimeResult<Arc<Class>> {
        let superclass = superclass.unwrap_or(&self.root);
        let class = self
            .classes
            .write()
            .define_class(name, Some(superclass), extra_fields)?;
        debug!("defined class {} : {}", name, superclass.name());
        Ok(class)
    }

    /// Define a class with no superclass at all
    pub fn define_root_class(&self, name: &str, fields: usize) -> RuntimeResult<Arc<Class>> {
        self.classes.write().define_class(name, None, fields)
    }

    /// Look up a class by name
    pub fn class_named(&self, name: &str) -> Option<Arc<Class>> {
        self.classes.read().get_class_by_name(name).cloned()
    }

    /// Look up a class by name, failing with [`RuntimeError::UnknownClass`]
    pub fn expect_class(&self, name: &str) -> RuntimeResult<Arc<Class>> {
        self.class_named(name)
            .ok_or_else(|| RuntimeError::UnknownClass(name.to_string()))
    }

    /// Number of registered classes
    pub fn class_count(&self) -> usize {
        self.classes.read().len()
    }

    /// Allocate an instance of `class`
    pub fn alloc(&self, class: &Arc<Class>) -> Id {
        Id::new(Object::new(class.clone()))
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

fn install_root_methods(root: &Arc<Class>) {
    root.add_method(Method::new(Sel::register("copy"), "@@:", |receiver, _, _| {
        let Some(id) = receiver.as_object() else {
            return Ok(receiver.clone());
        };
        // shallow copy: fields are shared, associations are not carried over
        let copy = Id::new(Object::new(id.class().clone()));
        for (index, value) in id.fields().into_iter().enumerate() {
            copy.set_field(index, value).map_err(RuntimeError::Invocation)?;
        }
        Ok(Value::Object(copy))
    }));

    root.add_method(Method::new(Sel::register("class"), "#@:", |receiver, _, _| {
        Ok(receiver
            .as_object()
            .map(|id| Value::Class(id.class().clone()))
            .unwrap_or_default())
    }));

    root.add_method(Method::new(
        Sel::register("respondsToSelector:"),
        "B@::",
        |receiver, _, args| match args {
            [Value::Selector(sel)] => Ok(Value::Bool(crate::dispatch::responds_to(receiver, *sel))),
            _ => Err(RuntimeError::ArgumentCount {
                selector: Sel::register("respondsToSelector:"),
                expected: 1,
                actual: args.len(),
            }),
        },
    ));
}

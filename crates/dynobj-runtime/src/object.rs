//! Object model and class system

use std::fmt;
use std::hash::BuildHasherDefault;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHasher};

use crate::association::{AssociatedSlot, AssociationKey, SlotContents};
use crate::selector::Sel;
use crate::value::Value;
use crate::RuntimeResult;

/// Global counter for generating unique object IDs
static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a new unique object ID
fn generate_object_id() -> u64 {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

type AssociationMap = DashMap<AssociationKey, Arc<AssociatedSlot>, BuildHasherDefault<FxHasher>>;

/// Object instance (heap-allocated, reached through [`crate::Id`])
pub struct Object {
    /// Unique object ID (assigned on creation)
    object_id: u64,
    /// Class of the instance
    class: Arc<Class>,
    /// Field values
    fields: Mutex<Vec<Value>>,
    /// Associated storage arena
    associations: AssociationMap,
}

impl Object {
    /// Create a new object with null fields
    pub(crate) fn new(class: Arc<Class>) -> Self {
        let field_count = class.field_count();
        Self {
            object_id: generate_object_id(),
            class,
            fields: Mutex::new(vec![Value::null(); field_count]),
            associations: AssociationMap::default(),
        }
    }

    /// Unique object ID
    pub fn object_id(&self) -> u64 {
        self.object_id
    }

    /// The instance's class
    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    /// Get a field value by index
    pub fn get_field(&self, index: usize) -> Option<Value> {
        self.fields.lock().get(index).cloned()
    }

    /// Set a field value by index
    pub fn set_field(&self, index: usize, value: Value) -> Result<(), String> {
        let previous = {
            let mut fields = self.fields.lock();
            let count = fields.len();
            match fields.get_mut(index) {
                Some(slot) => std::mem::replace(slot, value),
                None => {
                    return Err(format!(
                        "Field index {} out of bounds (object has {} fields)",
                        index, count
                    ))
                }
            }
        };
        drop(previous);
        Ok(())
    }

    /// Get number of fields
    pub fn field_count(&self) -> usize {
        self.fields.lock().len()
    }

    /// Snapshot of all field values
    pub fn fields(&self) -> Vec<Value> {
        self.fields.lock().clone()
    }

    /// Get the associated slot for `key`, creating an empty one on first use
    pub fn associated_slot(&self, key: AssociationKey) -> Arc<AssociatedSlot> {
        if let Some(slot) = self.associations.get(&key) {
            return slot.clone();
        }
        self.associations.entry(key).or_default().clone()
    }

    /// Get the associated slot for `key` without creating it
    pub fn existing_associated_slot(&self, key: AssociationKey) -> Option<Arc<AssociatedSlot>> {
        self.associations.get(&key).map(|slot| slot.clone())
    }

    /// Read an associated value
    pub fn associated_value(&self, key: AssociationKey) -> Option<Value> {
        self.existing_associated_slot(key)?.load()
    }

    /// Store an associated value (the slot keeps the value's claims)
    pub fn set_associated_value(&self, key: AssociationKey, value: Value) {
        let previous = self
            .associated_slot(key)
            .swap(SlotContents::Value(value));
        drop(previous);
    }

    /// Drop every associated value
    pub fn remove_associations(&self) {
        self.associations.clear();
    }

    /// Number of associated slots in use
    pub fn association_count(&self) -> usize {
        self.associations.len()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("object_id", &self.object_id)
            .field("class", &self.class.name())
            .field("associations", &self.associations.len())
            .finish()
    }
}

/// Method implementation in dispatcher convention: `(receiver, selector, args)`
pub type Imp = Arc<dyn Fn(&Value, Sel, &[Value]) -> RuntimeResult<Value> + Send + Sync>;

/// Entry in a class's method table
pub struct Method {
    sel: Sel,
    types: Arc<str>,
    imp: Imp,
}

impl Method {
    /// Create a method entry
    pub fn new<F>(sel: Sel, types: &str, imp: F) -> Self
    where
        F: Fn(&Value, Sel, &[Value]) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        Self::from_imp(sel, types, Arc::new(imp))
    }

    /// Create a method entry from an existing implementation
    pub fn from_imp(sel: Sel, types: &str, imp: Imp) -> Self {
        Self {
            sel,
            types: Arc::from(types),
            imp,
        }
    }

    /// Selector this entry answers
    pub fn selector(&self) -> Sel {
        self.sel
    }

    /// Type encoding (return, receiver, selector, arguments)
    pub fn types(&self) -> &str {
        &self.types
    }

    /// Shared handle to the implementation
    pub fn imp(&self) -> Imp {
        self.imp.clone()
    }

    /// Call the implementation with the dispatcher's convention
    pub fn invoke(&self, receiver: &Value, args: &[Value]) -> RuntimeResult<Value> {
        (self.imp)(receiver, self.sel, args)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("sel", &self.sel)
            .field("types", &self.types)
            .finish()
    }
}

/// Immutable snapshot of a method table
pub type MethodMap = FxHashMap<Sel, Arc<Method>>;

/// Copy-on-write dispatch table
///
/// Readers clone the current `Arc<MethodMap>` under a brief read lock and
/// then work on that snapshot; a reader therefore sees either the whole old
/// table or the whole new one. Writers serialize on `writer`, build the new
/// map off to the side and swap it in.
pub struct MethodTable {
    current: RwLock<Arc<MethodMap>>,
    writer: Mutex<()>,
    version: AtomicU64,
}

impl MethodTable {
    /// Create a new empty table
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(MethodMap::default())),
            writer: Mutex::new(()),
            version: AtomicU64::new(0),
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<MethodMap> {
        self.current.read().clone()
    }

    /// Look up a method declared directly in this table
    pub fn get(&self, sel: Sel) -> Option<Arc<Method>> {
        self.current.read().get(&sel).cloned()
    }

    /// Number of methods
    pub fn method_count(&self) -> usize {
        self.current.read().len()
    }

    /// Number of completed mutations
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Insert `method` unless `conflicts` reports a conflict
    ///
    /// `conflicts` runs under the writer lock with the current snapshot.
    /// Returns whether the method was inserted.
    pub fn insert_unless<F>(&self, method: Method, conflicts: F) -> bool
    where
        F: FnOnce(&MethodMap) -> bool,
    {
        let _writer = self.writer.lock();
        let snapshot = self.snapshot();
        if snapshot.contains_key(&method.sel) || conflicts(&snapshot) {
            return false;
        }
        let mut next = (*snapshot).clone();
        next.insert(method.sel, Arc::new(method));
        self.publish(next);
        true
    }

    /// Insert every method or none of them
    ///
    /// Fails with the first selector that is already present, appears twice
    /// in `methods`, or is flagged by `conflicts`.
    pub fn insert_all_unless<F>(&self, methods: Vec<Method>, conflicts: F) -> Result<(), Sel>
    where
        F: Fn(Sel) -> bool,
    {
        let _writer = self.writer.lock();
        let snapshot = self.snapshot();
        let mut next = (*snapshot).clone();
        for method in methods {
            let sel = method.sel;
            if next.contains_key(&sel) || conflicts(sel) {
                return Err(sel);
            }
            next.insert(sel, Arc::new(method));
        }
        self.publish(next);
        Ok(())
    }

    /// Insert `method`, discarding any previous entry for its selector
    pub fn replace(&self, method: Method) -> Option<Arc<Method>> {
        let _writer = self.writer.lock();
        let mut next = (*self.snapshot()).clone();
        let previous = next.insert(method.sel, Arc::new(method));
        self.publish(next);
        previous
    }

    fn publish(&self, next: MethodMap) {
        let old = std::mem::replace(&mut *self.current.write(), Arc::new(next));
        self.version.fetch_add(1, Ordering::Release);
        // the superseded snapshot is released outside the read/write lock
        drop(old);
    }
}

impl Default for MethodTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Class definition (the type descriptor of the object model)
pub struct Class {
    /// Class ID (unique identifier)
    id: usize,
    /// Class name
    name: String,
    /// Number of instance fields (including inherited)
    field_count: usize,
    /// Parent class (None for root classes)
    superclass: Option<Arc<Class>>,
    /// Class whose methods answer messages sent to this class
    metaclass: Option<Arc<Class>>,
    /// Dispatch table
    methods: MethodTable,
}

impl Class {
    /// Create a class and its metaclass
    pub(crate) fn new(
        id: usize,
        name: String,
        field_count: usize,
        superclass: Option<Arc<Class>>,
    ) -> Arc<Self> {
        let meta_super = superclass.as_ref().and_then(|s| s.metaclass.clone());
        let metaclass = Arc::new(Class {
            id,
            name: name.clone(),
            field_count: 0,
            superclass: meta_super,
            metaclass: None,
            methods: MethodTable::new(),
        });
        Arc::new(Class {
            id,
            name,
            field_count,
            superclass,
            metaclass: Some(metaclass),
            methods: MethodTable::new(),
        })
    }

    /// Class ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Class name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of instance fields
    pub fn field_count(&self) -> usize {
        self.field_count
    }

    /// Parent class
    pub fn superclass(&self) -> Option<&Arc<Class>> {
        self.superclass.as_ref()
    }

    /// Metaclass (None if this already is a metaclass)
    pub fn metaclass(&self) -> Option<&Arc<Class>> {
        self.metaclass.as_ref()
    }

    /// Whether this is a metaclass
    pub fn is_metaclass(&self) -> bool {
        self.metaclass.is_none()
    }

    /// The class's own dispatch table
    pub fn method_table(&self) -> &MethodTable {
        &self.methods
    }

    /// Method declared directly on this class
    pub fn method(&self, sel: Sel) -> Option<Arc<Method>> {
        self.methods.get(sel)
    }

    /// Method declared on this class or inherited from an ancestor
    pub fn lookup(&self, sel: Sel) -> Option<Arc<Method>> {
        let mut class = Some(self);
        while let Some(current) = class {
            if let Some(method) = current.methods.get(sel) {
                return Some(method);
            }
            class = current.superclass.as_deref();
        }
        None
    }

    /// Whether instances answer `sel`
    pub fn responds_to(&self, sel: Sel) -> bool {
        self.lookup(sel).is_some()
    }

    /// Add a method unless this exact class already declares `sel`
    pub fn add_method(&self, method: Method) -> bool {
        self.methods.insert_unless(method, |_| false)
    }

    /// Add a method unless this class declares or inherits `sel`
    pub fn add_method_unless_inherited(&self, method: Method) -> bool {
        let sel = method.sel;
        self.methods.insert_unless(method, |_| self.inherits(sel))
    }

    /// Add several methods atomically; with `include_inherited`, a selector
    /// answered by an ancestor also counts as a conflict
    ///
    /// On failure nothing is added and the conflicting selector is returned.
    pub fn add_methods(&self, methods: Vec<Method>, include_inherited: bool) -> Result<(), Sel> {
        self.methods
            .insert_all_unless(methods, |sel| include_inherited && self.inherits(sel))
    }

    /// Install a method, returning the one it displaced on this class
    pub fn replace_method(&self, method: Method) -> Option<Arc<Method>> {
        self.methods.replace(method)
    }

    /// Whether `self` is `other` or one of its subclasses
    pub fn is_subclass_of(&self, other: &Class) -> bool {
        let mut class = Some(self);
        while let Some(current) = class {
            if std::ptr::eq(current, other) {
                return true;
            }
            class = current.superclass.as_deref();
        }
        false
    }

    fn inherits(&self, sel: Sel) -> bool {
        self.superclass.as_ref().is_some_and(|s| s.responds_to(sel))
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("meta", &self.is_metaclass())
            .field("superclass", &self.superclass.as_ref().map(|s| s.name()))
            .field("methods", &self.methods.method_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(v: i32) -> impl Fn(&Value, Sel, &[Value]) -> RuntimeResult<Value> {
        move |_, _, _| Ok(Value::i32(v))
    }

    #[test]
    fn test_class_creation() {
        let class = Class::new(0, "Point".to_string(), 2, None);
        assert_eq!(class.id(), 0);
        assert_eq!(class.name(), "Point");
        assert_eq!(class.field_count(), 2);
        assert!(class.superclass().is_none());
        assert!(!class.is_metaclass());
        assert!(class.metaclass().unwrap().is_metaclass());
    }

    #[test]
    fn test_metaclass_chain_follows_superclass() {
        let base = Class::new(0, "Base".to_string(), 0, None);
        let derived = Class::new(1, "Derived".to_string(), 0, Some(base.clone()));
        let meta = derived.metaclass().unwrap();
        assert!(Arc::ptr_eq(meta.superclass().unwrap(), base.metaclass().unwrap()));
    }

    #[test]
    fn test_method_table_add_is_exclusive() {
        let table = MethodTable::new();
        let sel = Sel::register("objectTestValue");

        assert!(table.insert_unless(Method::new(sel, "i@:", constant(1)), |_| false));
        assert!(!table.insert_unless(Method::new(sel, "i@:", constant(2)), |_| false));
        assert_eq!(table.method_count(), 1);
        assert_eq!(table.version(), 1);

        let method = table.get(sel).unwrap();
        assert_eq!(method.invoke(&Value::null(), &[]).unwrap(), Value::i32(1));
    }

    #[test]
    fn test_method_table_replace() {
        let table = MethodTable::new();
        let sel = Sel::register("objectTestReplace");

        assert!(table.replace(Method::new(sel, "i@:", constant(1))).is_none());
        let old = table.replace(Method::new(sel, "i@:", constant(2))).unwrap();
        assert_eq!(old.invoke(&Value::null(), &[]).unwrap(), Value::i32(1));
        assert_eq!(table.get(sel).unwrap().invoke(&Value::null(), &[]).unwrap(), Value::i32(2));
        assert_eq!(table.version(), 2);
    }

    #[test]
    fn test_snapshot_is_stable_across_replace() {
        let table = MethodTable::new();
        let sel = Sel::register("objectTestSnapshot");
        table.replace(Method::new(sel, "i@:", constant(1)));

        let before = table.snapshot();
        table.replace(Method::new(sel, "i@:", constant(2)));

        assert_eq!(before[&sel].invoke(&Value::null(), &[]).unwrap(), Value::i32(1));
        assert_eq!(table.snapshot()[&sel].invoke(&Value::null(), &[]).unwrap(), Value::i32(2));
    }

    #[test]
    fn test_lookup_walks_superclasses() {
        let base = Class::new(0, "Base".to_string(), 0, None);
        let derived = Class::new(1, "Derived".to_string(), 0, Some(base.clone()));
        let sel = Sel::register("objectTestInherited");

        base.add_method(Method::new(sel, "i@:", constant(7)));
        assert!(derived.method(sel).is_none());
        assert!(derived.lookup(sel).is_some());
        assert!(derived.is_subclass_of(&base));
        assert!(!base.is_subclass_of(&derived));
    }

    #[test]
    fn test_add_unless_inherited() {
        let base = Class::new(0, "Base".to_string(), 0, None);
        let derived = Class::new(1, "Derived".to_string(), 0, Some(base.clone()));
        let sel = Sel::register("objectTestShadow");

        base.add_method(Method::new(sel, "i@:", constant(1)));
        assert!(!derived.add_method_unless_inherited(Method::new(sel, "i@:", constant(2))));
        assert!(derived.add_method(Method::new(sel, "i@:", constant(2))));
    }

    #[test]
    fn test_add_methods_all_or_nothing() {
        let class = Class::new(0, "Pair".to_string(), 0, None);
        let first = Sel::register("objectTestFirst");
        let second = Sel::register("objectTestSecond");

        class.add_method(Method::new(second, "i@:", constant(0)));
        let batch = vec![
            Method::new(first, "i@:", constant(1)),
            Method::new(second, "i@:", constant(2)),
        ];
        assert_eq!(class.add_methods(batch, false), Err(second));
        assert!(class.method(first).is_none());
        assert_eq!(class.method_table().version(), 1);

        let dup = vec![
            Method::new(first, "i@:", constant(1)),
            Method::new(first, "i@:", constant(2)),
        ];
        assert_eq!(class.add_methods(dup, false), Err(first));

        assert_eq!(
            class.add_methods(vec![Method::new(first, "i@:", constant(1))], false),
            Ok(())
        );
        assert_eq!(class.method_table().method_count(), 2);
    }
}

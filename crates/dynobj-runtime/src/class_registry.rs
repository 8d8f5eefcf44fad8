//! Class registry for managing runtime classes

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::object::Class;
use crate::{RuntimeError, RuntimeResult};

/// Class registry for the runtime
#[derive(Debug)]
pub struct ClassRegistry {
    /// Classes indexed by ID
    classes: Vec<Arc<Class>>,
    /// Class name to ID mapping
    name_to_id: FxHashMap<String, usize>,
}

impl ClassRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            classes: Vec::new(),
            name_to_id: FxHashMap::default(),
        }
    }

    /// Create and register a new class
    pub fn define_class(
        &mut self,
        name: &str,
        superclass: Option<&Arc<Class>>,
        extra_fields: usize,
    ) -> RuntimeResult<Arc<Class>> {
        if self.name_to_id.contains_key(name) {
            return Err(RuntimeError::DuplicateClass(name.to_string()));
        }

        let id = self.next_class_id();
        let field_count = superclass.map_or(0, |s| s.field_count()) + extra_fields;
        let class = Class::new(id, name.to_string(), field_count, superclass.cloned());

        self.classes.push(class.clone());
        self.name_to_id.insert(name.to_string(), id);

        Ok(class)
    }

    /// Get class by ID
    pub fn get_class(&self, id: usize) -> Option<&Arc<Class>> {
        self.classes.get(id)
    }

    /// Get class by name
    pub fn get_class_by_name(&self, name: &str) -> Option<&Arc<Class>> {
        self.name_to_id
            .get(name)
            .and_then(|id| self.classes.get(*id))
    }

    /// Get next available class ID
    pub fn next_class_id(&self) -> usize {
        self.classes.len()
    }

    /// Number of registered classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Iterate over all classes with their IDs
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Arc<Class>)> {
        self.classes.iter().enumerate()
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

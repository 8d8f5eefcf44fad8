//! Interned message selectors
//!
//! Selector names are interned once for the life of the process; equal names
//! always produce equal [`Sel`] handles, so selectors compare and hash as
//! plain integers.

use std::fmt;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Global selector table
static SELECTORS: Lazy<RwLock<SelectorTable>> = Lazy::new(|| RwLock::new(SelectorTable::new()));

/// Interned selector handle
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sel(u32);

impl Sel {
    /// Intern a selector name
    pub fn register(name: &str) -> Sel {
        if let Some(sel) = SELECTORS.read().get(name) {
            return sel;
        }
        SELECTORS.write().intern(name)
    }

    /// Look up an already interned selector without creating it
    pub fn lookup(name: &str) -> Option<Sel> {
        SELECTORS.read().get(name)
    }

    /// The selector's name
    pub fn name(self) -> &'static str {
        SELECTORS.read().name(self)
    }

    /// Number of arguments the selector takes (one per `:`)
    pub fn arity(self) -> usize {
        self.name().bytes().filter(|&b| b == b':').count()
    }

    /// Get the numeric ID value
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Sel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sel({})", self.name())
    }
}

impl fmt::Display for Sel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<&str> for Sel {
    fn from(name: &str) -> Self {
        Sel::register(name)
    }
}

/// Name <-> handle table
///
/// Names are leaked on purpose: a selector lives as long as the process.
struct SelectorTable {
    names: Vec<&'static str>,
    ids: FxHashMap<&'static str, Sel>,
}

impl SelectorTable {
    fn new() -> Self {
        Self {
            names: Vec::new(),
            ids: FxHashMap::default(),
        }
    }

    fn get(&self, name: &str) -> Option<Sel> {
        self.ids.get(name).copied()
    }

    fn intern(&mut self, name: &str) -> Sel {
        // another writer may have won the race since the read lock was dropped
        if let Some(sel) = self.get(name) {
            return sel;
        }
        let name: &'static str = Box::leak(name.to_owned().into_boxed_str());
        let sel = Sel(self.names.len() as u32);
        self.names.push(name);
        self.ids.insert(name, sel);
        sel
    }

    fn name(&self, sel: Sel) -> &'static str {
        self.names[sel.0 as usize]
    }
}

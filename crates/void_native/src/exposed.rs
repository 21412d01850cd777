//! Classes exposed by the host
//!
//! Custom types may name classes the host already knows how to wrap
//! (vectors, entity handles). Those are plugged in through [`NativeClass`]
//! and looked up after custom types.

use crate::address::NativeAddress;
use crate::class::ClassRef;
use crate::error::Result;
use crate::instance::Object;
use crate::types::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A class implemented by the host
pub trait NativeClass: Send + Sync {
    /// Class name as used in type documents
    fn name(&self) -> &str;

    /// Instance size in bytes
    fn size(&self) -> Option<usize> {
        None
    }

    /// Read a member; `None` if the class has no such member
    fn get(&self, _object: &Object, _member: &str) -> Option<Result<Value>> {
        None
    }

    /// Write a member; `None` if the class has no such member
    fn set(&self, _object: &Object, _member: &str, _value: &Value) -> Option<Result<()>> {
        None
    }
}

/// An exposed class with a name and size but no members
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueClass {
    name: String,
    size: Option<usize>,
}

impl OpaqueClass {
    /// Create an opaque class
    pub fn new(name: impl Into<String>, size: Option<usize>) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

impl NativeClass for OpaqueClass {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> Option<usize> {
        self.size
    }
}

/// Wrap `address` as an object of an exposed class
pub fn make_object(class: &Arc<dyn NativeClass>, address: NativeAddress) -> Object {
    Object::new(ClassRef::Exposed(Arc::clone(class)), address)
}

/// Name-keyed table of exposed classes
#[derive(Clone, Default)]
pub struct ExposedClasses {
    classes: HashMap<String, Arc<dyn NativeClass>>,
}

impl ExposedClasses {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a class, replacing one with the same name
    pub fn insert(&mut self, class: impl NativeClass + 'static) -> &mut Self {
        let class: Arc<dyn NativeClass> = Arc::new(class);
        self.classes.insert(class.name().to_string(), class);
        self
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, class: impl NativeClass + 'static) -> Self {
        self.insert(class);
        self
    }

    /// Look up a class
    pub fn get(&self, name: &str) -> Option<&Arc<dyn NativeClass>> {
        self.classes.get(name)
    }

    /// Check for a class
    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl fmt::Debug for ExposedClasses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.classes.keys().collect();
        names.sort();
        f.debug_struct("ExposedClasses").field("classes", &names).finish()
    }
}

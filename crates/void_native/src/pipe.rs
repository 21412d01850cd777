//! Pipes: named sets of free functions

use crate::binary::Identifier;
use crate::error::{BindError, Result};
use crate::function::{NativeFunction, Signature};
use crate::types::Value;
use std::collections::BTreeMap;

/// An unresolved free function
#[derive(Debug, Clone, PartialEq)]
pub struct PipeFunction {
    /// Binary exporting the function
    pub binary: String,
    /// Symbol, address or byte signature
    pub identifier: Identifier,
    /// Signature, without receiver
    pub signature: Signature,
    /// Prefer the dedicated server binary
    pub server_check: bool,
    /// Documentation
    pub doc: Option<String>,
}

impl PipeFunction {
    /// Create a function entry with the server check enabled
    pub fn new(binary: impl Into<String>, identifier: Identifier, signature: Signature) -> Self {
        Self {
            binary: binary.into(),
            identifier,
            signature,
            server_check: true,
            doc: None,
        }
    }

    /// Set the server check
    pub fn with_server_check(mut self, server_check: bool) -> Self {
        self.server_check = server_check;
        self
    }

    /// Set documentation
    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }
}

/// Declarative description of a pipe
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipeDefinition {
    functions: BTreeMap<String, PipeFunction>,
}

impl PipeDefinition {
    /// Create an empty definition
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a function
    pub fn function(mut self, name: impl Into<String>, function: PipeFunction) -> Self {
        self.functions.insert(name.into(), function);
        self
    }

    /// Declared functions
    pub fn functions(&self) -> impl Iterator<Item = (&str, &PipeFunction)> {
        self.functions.iter().map(|(name, f)| (name.as_str(), f))
    }

    /// Number of functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Resolved free functions, callable by name
#[derive(Debug, Clone, Default)]
pub struct Pipe {
    functions: BTreeMap<String, NativeFunction>,
}

impl Pipe {
    pub(crate) fn new(functions: BTreeMap<String, NativeFunction>) -> Self {
        Self { functions }
    }

    /// Look up a function
    pub fn function(&self, name: &str) -> Result<&NativeFunction> {
        self.functions
            .get(name)
            .ok_or_else(|| BindError::unknown_member("pipe", name))
    }

    /// Call a function by name
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.function(name)?.call(args)
    }

    /// Function names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Number of functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

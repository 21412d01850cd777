//! Custom type classes and their definitions
//!
//! A [`TypeDefinition`] is the declarative description of a type: its
//! fields, functions and hooks. The [`crate::TypeManager`] turns it into a
//! [`CustomTypeClass`], a fixed descriptor table that [`crate::Object`]
//! interprets on every access.

use crate::binary::Identifier;
use crate::error::{BindError, Result};
use crate::exposed::NativeClass;
use crate::function::{NativeFunction, Signature, VirtualFunction};
use crate::instance::Object;
use crate::manager::TypeManager;
use crate::types::{TypeDescriptor, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

/// How a field is laid out relative to the object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Value stored inline (`Vector vec;`)
    Instance,
    /// Value behind a pointer (`Vector* vec;`)
    Pointer,
    /// Inline array of values (`Vector vecs[10];`)
    StaticInstanceArray,
    /// Pointer to an array of values (`Vector* vecs;`)
    DynamicInstanceArray,
    /// Inline array of pointers (`Vector* vecs[10];`)
    StaticPointerArray,
    /// Pointer to an array of pointers (`Vector** vecs;`)
    DynamicPointerArray,
}

impl FieldKind {
    /// All field kinds, in type document order
    pub const ALL: [FieldKind; 6] = [
        FieldKind::Instance,
        FieldKind::Pointer,
        FieldKind::StaticInstanceArray,
        FieldKind::DynamicInstanceArray,
        FieldKind::StaticPointerArray,
        FieldKind::DynamicPointerArray,
    ];

    /// Type document section declaring fields of this kind
    pub fn section(self) -> &'static str {
        match self {
            FieldKind::Instance => "instance_attribute",
            FieldKind::Pointer => "pointer_attribute",
            FieldKind::StaticInstanceArray => "static_instance_array",
            FieldKind::DynamicInstanceArray => "dynamic_instance_array",
            FieldKind::StaticPointerArray => "static_pointer_array",
            FieldKind::DynamicPointerArray => "dynamic_pointer_array",
        }
    }

    /// Check for array kinds
    pub fn is_array(self) -> bool {
        !matches!(self, FieldKind::Instance | FieldKind::Pointer)
    }

    /// Check whether array elements are pointers
    pub fn holds_pointers(self) -> bool {
        matches!(self, FieldKind::StaticPointerArray | FieldKind::DynamicPointerArray)
    }

    /// Check whether the array storage lives behind a pointer
    pub fn is_dynamic(self) -> bool {
        matches!(self, FieldKind::DynamicInstanceArray | FieldKind::DynamicPointerArray)
    }
}

/// A field at a fixed offset
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Field type
    pub type_desc: TypeDescriptor,
    /// Byte offset from the object address
    pub offset: usize,
    /// Layout
    pub kind: FieldKind,
    /// Array length; `None` means unbounded
    pub length: Option<usize>,
    /// Documentation
    pub doc: Option<String>,
}

impl FieldDescriptor {
    /// Create a field
    pub fn new(type_desc: impl Into<TypeDescriptor>, offset: usize, kind: FieldKind) -> Self {
        Self {
            type_desc: type_desc.into(),
            offset,
            kind,
            length: None,
            doc: None,
        }
    }

    /// Set the array length
    pub fn with_length(mut self, length: Option<usize>) -> Self {
        self.length = length;
        self
    }

    /// Set documentation
    pub fn with_doc(mut self, doc: Option<String>) -> Self {
        self.doc = doc;
        self
    }
}

/// Where a function's entry point comes from
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionTarget {
    /// Resolved in the type's binary
    Identifier(Identifier),
    /// Slot in the receiver's vtable
    VirtualIndex(usize),
}

/// An unresolved member function
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDescriptor {
    /// Entry point
    pub target: FunctionTarget,
    /// Signature including the receiver
    pub signature: Signature,
    /// Documentation
    pub doc: Option<String>,
}

/// A member of a type definition
#[derive(Debug, Clone, PartialEq)]
pub enum MemberDef {
    Field(FieldDescriptor),
    Function(FunctionDescriptor),
}

/// A constructor or destructor hook
#[derive(Clone)]
pub enum Hook {
    /// Call a function member of the type
    Member(String),
    /// Call back into the host
    Callback(Arc<dyn Fn(&Object, &[Value]) -> Result<()> + Send + Sync>),
}

impl Hook {
    /// Create a callback hook
    pub fn callback(f: impl Fn(&Object, &[Value]) -> Result<()> + Send + Sync + 'static) -> Self {
        Hook::Callback(Arc::new(f))
    }

    /// Run the hook on `object`
    pub fn run(&self, object: &Object, args: &[Value]) -> Result<()> {
        match self {
            Hook::Member(name) => object.call(name, args).map(|_| ()),
            Hook::Callback(f) => f(object, args),
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::Member(name) => f.debug_tuple("Member").field(name).finish(),
            Hook::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Declarative description of a custom type
#[derive(Debug, Clone, Default)]
pub struct TypeDefinition {
    /// Binary hosting the type's functions
    pub binary: Option<String>,
    /// Server check passed to binary lookups
    pub server_check: Option<bool>,
    /// Instance size in bytes
    pub size: Option<usize>,
    /// Constructor hook
    pub constructor: Option<Hook>,
    /// Destructor hook
    pub destructor: Option<Hook>,
    members: BTreeMap<String, MemberDef>,
}

impl TypeDefinition {
    /// Create an empty definition
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the binary
    pub fn binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    /// Set the server check
    pub fn server_check(mut self, server_check: bool) -> Self {
        self.server_check = Some(server_check);
        self
    }

    /// Set the instance size
    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the constructor hook
    pub fn constructor(mut self, hook: Hook) -> Self {
        self.constructor = Some(hook);
        self
    }

    /// Set the destructor hook
    pub fn destructor(mut self, hook: Hook) -> Self {
        self.destructor = Some(hook);
        self
    }

    /// Add or replace a member
    pub fn member(mut self, name: impl Into<String>, member: MemberDef) -> Self {
        self.members.insert(name.into(), member);
        self
    }

    /// Add a field
    pub fn field(self, name: impl Into<String>, field: FieldDescriptor) -> Self {
        self.member(name, MemberDef::Field(field))
    }

    /// Add an inline attribute
    pub fn instance_attribute(
        self,
        name: impl Into<String>,
        type_desc: impl Into<TypeDescriptor>,
        offset: usize,
    ) -> Self {
        self.field(name, FieldDescriptor::new(type_desc, offset, FieldKind::Instance))
    }

    /// Add an attribute behind a pointer
    pub fn pointer_attribute(
        self,
        name: impl Into<String>,
        type_desc: impl Into<TypeDescriptor>,
        offset: usize,
    ) -> Self {
        self.field(name, FieldDescriptor::new(type_desc, offset, FieldKind::Pointer))
    }

    /// Add an array of the given kind
    pub fn array(
        self,
        name: impl Into<String>,
        kind: FieldKind,
        type_desc: impl Into<TypeDescriptor>,
        offset: usize,
        length: Option<usize>,
    ) -> Self {
        self.field(name, FieldDescriptor::new(type_desc, offset, kind).with_length(length))
    }

    /// Add a virtual function; the receiver is prepended to `signature`
    pub fn virtual_function(self, name: impl Into<String>, index: usize, signature: Signature) -> Self {
        self.member(
            name,
            MemberDef::Function(FunctionDescriptor {
                target: FunctionTarget::VirtualIndex(index),
                signature: signature.with_receiver(),
                doc: None,
            }),
        )
    }

    /// Add a member function; the receiver is prepended to `signature`
    pub fn function(self, name: impl Into<String>, identifier: Identifier, signature: Signature) -> Self {
        self.member(
            name,
            MemberDef::Function(FunctionDescriptor {
                target: FunctionTarget::Identifier(identifier),
                signature: signature.with_receiver(),
                doc: None,
            }),
        )
    }

    /// Members declared so far
    pub fn members(&self) -> &BTreeMap<String, MemberDef> {
        &self.members
    }

    /// Check if a member is declared
    pub fn has_member(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }
}

/// A resolved member of a custom type
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    Field(FieldDescriptor),
    Function(NativeFunction),
    VirtualFunction(VirtualFunction),
}

impl Member {
    /// Documentation
    pub fn doc(&self) -> Option<&str> {
        match self {
            Member::Field(field) => field.doc.as_deref(),
            Member::Function(function) => function.doc(),
            Member::VirtualFunction(function) => function.doc(),
        }
    }
}

/// A dynamically defined type over native memory
pub struct CustomTypeClass {
    name: String,
    binary: Option<String>,
    server_check: bool,
    size: Option<usize>,
    members: HashMap<String, Member>,
    constructor: Option<Hook>,
    destructor: Option<Hook>,
    /// Set when the class is registered
    manager: OnceLock<Weak<TypeManager>>,
}

impl CustomTypeClass {
    pub(crate) fn new(
        name: String,
        binary: Option<String>,
        server_check: bool,
        size: Option<usize>,
        members: HashMap<String, Member>,
        constructor: Option<Hook>,
        destructor: Option<Hook>,
    ) -> Self {
        Self {
            name,
            binary,
            server_check,
            size,
            members,
            constructor,
            destructor,
            manager: OnceLock::new(),
        }
    }

    /// Class name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Binary hosting the class's functions
    pub fn binary(&self) -> Option<&str> {
        self.binary.as_deref()
    }

    /// Server check used for binary lookups
    pub fn server_check(&self) -> bool {
        self.server_check
    }

    /// Instance size
    pub fn size(&self) -> Option<usize> {
        self.size
    }

    /// Look up a member
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    /// All members
    pub fn members(&self) -> impl Iterator<Item = (&str, &Member)> {
        self.members.iter().map(|(name, member)| (name.as_str(), member))
    }

    /// Constructor hook
    pub fn constructor(&self) -> Option<&Hook> {
        self.constructor.as_ref()
    }

    /// Destructor hook
    pub fn destructor(&self) -> Option<&Hook> {
        self.destructor.as_ref()
    }

    /// The manager this class was registered with
    pub fn manager(&self) -> Option<Arc<TypeManager>> {
        self.manager.get().and_then(Weak::upgrade)
    }

    /// Check whether a manager registered this class
    pub fn is_registered(&self) -> bool {
        self.manager.get().is_some()
    }

    /// Bind the class to `manager`; a class belongs to one manager only
    pub(crate) fn mark_registered(&self, manager: &Weak<TypeManager>) -> Result<()> {
        let owner = self.manager.get_or_init(|| manager.clone());
        if !Weak::ptr_eq(owner, manager) {
            return Err(BindError::ForeignManager(self.name.clone()));
        }
        Ok(())
    }
}

impl fmt::Debug for CustomTypeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomTypeClass")
            .field("name", &self.name)
            .field("binary", &self.binary)
            .field("size", &self.size)
            .field("members", &self.members.len())
            .field("registered", &self.is_registered())
            .finish()
    }
}

/// A class known to the type manager
#[derive(Clone)]
pub enum ClassRef {
    /// Dynamically defined type
    Custom(Arc<CustomTypeClass>),
    /// Class exposed by the host
    Exposed(Arc<dyn NativeClass>),
}

impl ClassRef {
    /// Class name
    pub fn name(&self) -> &str {
        match self {
            ClassRef::Custom(class) => class.name(),
            ClassRef::Exposed(class) => class.name(),
        }
    }

    /// Instance size, if declared
    pub fn size(&self) -> Option<usize> {
        match self {
            ClassRef::Custom(class) => class.size(),
            ClassRef::Exposed(class) => class.size(),
        }
    }

    /// The custom class, if this is one
    pub fn as_custom(&self) -> Option<&Arc<CustomTypeClass>> {
        match self {
            ClassRef::Custom(class) => Some(class),
            ClassRef::Exposed(_) => None,
        }
    }

    /// Check for custom classes
    pub fn is_custom(&self) -> bool {
        self.as_custom().is_some()
    }

    fn identity(&self) -> *const () {
        match self {
            ClassRef::Custom(class) => Arc::as_ptr(class) as *const (),
            ClassRef::Exposed(class) => Arc::as_ptr(class) as *const (),
        }
    }
}

impl PartialEq for ClassRef {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl From<Arc<CustomTypeClass>> for ClassRef {
    fn from(class: Arc<CustomTypeClass>) -> Self {
        ClassRef::Custom(class)
    }
}

impl From<CustomTypeClass> for ClassRef {
    fn from(class: CustomTypeClass) -> Self {
        ClassRef::Custom(Arc::new(class))
    }
}

impl fmt::Debug for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassRef::Custom(class) => f.debug_tuple("Custom").field(&class.name()).finish(),
            ClassRef::Exposed(class) => f.debug_tuple("Exposed").field(&class.name()).finish(),
        }
    }
}

//! Objects and instances of custom types
//!
//! An [`Object`] is a typed, non-owning view of native memory. Every member
//! access goes through the class's descriptor table, so reads always
//! observe the current bytes. An [`Instance`] adds ownership for memory
//! allocated by this crate.

use crate::address::NativeAddress;
use crate::array::Array;
use crate::class::{ClassRef, CustomTypeClass, FieldDescriptor, FieldKind, Member};
use crate::codec;
use crate::error::{BindError, Result};
use crate::function::BoundFunction;
use crate::manager::TypeManager;
use crate::memory::{self, Allocation};
use crate::types::{TypeDescriptor, Value};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// A typed view of native memory
#[derive(Clone)]
pub struct Object {
    class: ClassRef,
    address: NativeAddress,
}

impl Object {
    pub(crate) fn new(class: ClassRef, address: NativeAddress) -> Self {
        Self { class, address }
    }

    /// Address of the viewed memory
    pub fn address(&self) -> NativeAddress {
        self.address
    }

    /// Class of this object
    pub fn class(&self) -> &ClassRef {
        &self.class
    }

    /// Class name
    pub fn class_name(&self) -> &str {
        self.class.name()
    }

    /// Documentation of a member
    pub fn doc(&self, name: &str) -> Option<&str> {
        self.class.as_custom()?.member(name)?.doc()
    }

    fn member(&self, name: &str) -> Result<(&Arc<CustomTypeClass>, &Member)> {
        let class = self
            .class
            .as_custom()
            .ok_or_else(|| BindError::unknown_member(self.class_name(), name))?;
        let member = class
            .member(name)
            .ok_or_else(|| BindError::unknown_member(class.name(), name))?;
        Ok((class, member))
    }

    /// Read an attribute
    pub fn get(&self, name: &str) -> Result<Value> {
        if let ClassRef::Exposed(class) = &self.class {
            return class
                .get(self, name)
                .unwrap_or_else(|| Err(BindError::unknown_member(class.name(), name)));
        }

        match self.member(name)? {
            (class, Member::Field(field)) => self.read_field(class, field),
            (_, Member::Function(_) | Member::VirtualFunction(_)) => {
                Err(BindError::type_mismatch("attribute", "function"))
            }
        }
    }

    /// Write an attribute
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        if let ClassRef::Exposed(class) = &self.class {
            return class
                .set(self, name, &value)
                .unwrap_or_else(|| Err(BindError::unknown_member(class.name(), name)));
        }

        match self.member(name)? {
            (class, Member::Field(field)) => self.write_field(class, field, &value),
            (_, Member::Function(_) | Member::VirtualFunction(_)) => {
                Err(BindError::type_mismatch("attribute", "function"))
            }
        }
    }

    /// View an array attribute
    pub fn array(&self, name: &str) -> Result<Array> {
        match self.get(name)? {
            Value::Array(array) => Ok(array),
            other => Err(BindError::type_mismatch("array", other.type_name())),
        }
    }

    /// Bind a function member to this object
    pub fn method(&self, name: &str) -> Result<BoundFunction> {
        match self.member(name)? {
            (_, Member::Function(function)) => Ok(function.bind(self.address)),
            (_, Member::VirtualFunction(function)) => Ok(function.bind(self.address)),
            (_, Member::Field(_)) => Err(BindError::type_mismatch("function", "attribute")),
        }
    }

    /// Call a function member with this object as receiver
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.method(name)?.call(args)
    }

    /// Copy this object's bytes to `dest`
    pub fn copy_to(&self, dest: NativeAddress) -> Result<()> {
        let size = self
            .class
            .size()
            .ok_or_else(|| BindError::MissingSize(self.class_name().to_string()))?;
        if self.address.is_null() || dest.is_null() {
            return Err(BindError::NullPointer(format!("copy of '{}'", self.class_name())));
        }
        // Safety: both addresses view objects of this class
        unsafe { self.address.copy_to(dest, size) };
        Ok(())
    }

    fn read_field(&self, class: &CustomTypeClass, field: &FieldDescriptor) -> Result<Value> {
        let at = self.address + field.offset;

        match field.kind {
            FieldKind::Instance => read_value(class, &field.type_desc, at),
            FieldKind::Pointer => {
                // Safety: the field holds a pointer per the class layout
                let target = unsafe { at.get_pointer(0) };
                match &field.type_desc {
                    TypeDescriptor::Custom(_) if target.is_null() => Ok(Value::Void),
                    _ if target.is_null() => Err(null_field(class, field)),
                    ty => read_value(class, ty, target),
                }
            }
            kind => {
                let base = if kind.is_dynamic() {
                    // Safety: dynamic arrays store a pointer to their storage
                    unsafe { at.get_pointer(0) }
                } else {
                    at
                };
                Ok(Value::Array(Array::new(
                    manager_of(class)?,
                    field.type_desc.clone(),
                    kind.holds_pointers(),
                    base,
                    field.length,
                )))
            }
        }
    }

    fn write_field(&self, class: &CustomTypeClass, field: &FieldDescriptor, value: &Value) -> Result<()> {
        let at = self.address + field.offset;

        match field.kind {
            FieldKind::Instance => write_value(class, &field.type_desc, at, value),
            FieldKind::Pointer => {
                // Safety: the field holds a pointer per the class layout
                let target = unsafe { at.get_pointer(0) };
                if target.is_null() {
                    return Err(null_field(class, field));
                }
                write_value(class, &field.type_desc, target, value)
            }
            _ => match self.read_field(class, field)? {
                Value::Array(array) => array.assign(value),
                other => Err(BindError::type_mismatch("array", other.type_name())),
            },
        }
    }
}

fn null_field(class: &CustomTypeClass, field: &FieldDescriptor) -> BindError {
    BindError::NullPointer(format!(
        "'{}' field at offset {:#x} points nowhere",
        class.name(),
        field.offset
    ))
}

pub(crate) fn manager_of(class: &CustomTypeClass) -> Result<Arc<TypeManager>> {
    if !class.is_registered() {
        return Err(BindError::NotRegistered(class.name().to_string()));
    }
    class
        .manager()
        .ok_or_else(|| BindError::ManagerDropped(class.name().to_string()))
}

fn read_value(class: &CustomTypeClass, ty: &TypeDescriptor, at: NativeAddress) -> Result<Value> {
    match ty {
        TypeDescriptor::Native(native) => Ok(codec::read(at, 0, *native)),
        TypeDescriptor::Custom(name) => Ok(Value::Object(manager_of(class)?.convert(name, at)?)),
    }
}

fn write_value(class: &CustomTypeClass, ty: &TypeDescriptor, at: NativeAddress, value: &Value) -> Result<()> {
    match ty {
        TypeDescriptor::Native(native) => codec::write(at, 0, *native, value),
        TypeDescriptor::Custom(name) => {
            let source = value
                .as_object()
                .ok_or_else(|| BindError::type_mismatch(name.as_str(), value.type_name()))?;
            // The declared type decides how many bytes are copied
            let size = manager_of(class)?
                .get_class(name)?
                .size()
                .ok_or_else(|| BindError::MissingSize(name.clone()))?;
            if source.address().is_null() {
                return Err(BindError::NullPointer(format!("copy from a null '{}'", name)));
            }
            // Safety: the source views an object of at least `size` bytes
            unsafe { source.address().copy_to(at, size) };
            Ok(())
        }
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class && self.address == other.address
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.class_name())
            .field("address", &format_args!("{}", self.address))
            .finish()
    }
}

/// An object that may own its memory
///
/// Wrapped instances view memory owned by native code. Allocated instances
/// own their block; it is released exactly once, after the destructor hook
/// ran, either through [`Instance::dealloc`] or on drop when `auto_dealloc`
/// was requested. Without `auto_dealloc` the block is handed over to native
/// code when the instance is dropped.
pub struct Instance {
    object: Object,
    allocation: Option<Allocation>,
    auto_dealloc: bool,
}

impl Instance {
    /// Wrap existing memory; `args` must hold exactly the address
    pub fn wrap(class: &Arc<CustomTypeClass>, args: &[Value]) -> Result<Self> {
        let address = match args {
            [address] => codec::pointer(address)?,
            _ => {
                return Err(BindError::invalid_arguments(
                    class.name(),
                    format!("wrapping takes exactly one address, got {} arguments", args.len()),
                ))
            }
        };
        Self::check_registered(class)?;

        Ok(Self {
            object: Object::new(ClassRef::Custom(Arc::clone(class)), address),
            allocation: None,
            auto_dealloc: false,
        })
    }

    /// Allocate `size` bytes and run the constructor with `args`
    pub fn allocate(class: &Arc<CustomTypeClass>, args: &[Value], auto_dealloc: bool) -> Result<Self> {
        let size = class
            .size()
            .ok_or_else(|| BindError::MissingSize(class.name().to_string()))?;
        if class.constructor().is_none() && !args.is_empty() {
            return Err(BindError::invalid_arguments(
                class.name(),
                format!("no constructor declared, got {} arguments", args.len()),
            ));
        }
        Self::check_registered(class)?;

        let allocation = memory::alloc(size, false)?;
        let object = Object::new(ClassRef::Custom(Arc::clone(class)), allocation.address());

        // Dropping `allocation` on failure releases the block without the destructor
        if let Some(constructor) = class.constructor() {
            constructor.run(&object, args)?;
        }

        log::debug!(
            "Allocated '{}' ({} bytes) at {}",
            class.name(),
            size,
            object.address()
        );

        Ok(Self {
            object,
            allocation: Some(allocation),
            auto_dealloc,
        })
    }

    fn check_registered(class: &CustomTypeClass) -> Result<()> {
        if class.is_registered() {
            Ok(())
        } else {
            Err(BindError::NotRegistered(class.name().to_string()))
        }
    }

    /// Check whether this instance owns its memory
    pub fn is_owning(&self) -> bool {
        self.allocation.is_some()
    }

    /// Check whether the memory is released on drop
    pub fn auto_dealloc(&self) -> bool {
        self.auto_dealloc
    }

    /// The non-owning view
    pub fn object(&self) -> &Object {
        &self.object
    }

    /// Run the destructor and release the memory now
    pub fn dealloc(mut self) -> Result<()> {
        let allocation = self.allocation.take().ok_or_else(|| {
            BindError::invalid_arguments(self.object.class_name(), "instance does not own its memory")
        })?;
        let result = self.destroy();
        drop(allocation);
        result
    }

    /// Give up ownership, leaving the memory to native code
    pub fn into_raw(mut self) -> NativeAddress {
        if let Some(allocation) = self.allocation.take() {
            allocation.into_raw();
        }
        self.object.address
    }

    fn destroy(&self) -> Result<()> {
        let destructor = self
            .object
            .class
            .as_custom()
            .and_then(|class| class.destructor());
        match destructor {
            Some(hook) => hook.run(&self.object, &[]),
            None => Ok(()),
        }
    }
}

impl Deref for Instance {
    type Target = Object;

    fn deref(&self) -> &Object {
        &self.object
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        let Some(allocation) = self.allocation.take() else {
            return;
        };

        if self.auto_dealloc {
            if let Err(e) = self.destroy() {
                log::error!("Destructor of '{}' failed: {}", self.object.class_name(), e);
            }
            drop(allocation);
        } else {
            allocation.into_raw();
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("object", &self.object)
            .field("owning", &self.is_owning())
            .field("auto_dealloc", &self.auto_dealloc)
            .finish()
    }
}

//! # void_native - Schema-driven Native Bindings
//!
//! Lets engine-side code read and write fields of native, in-process objects
//! at raw offsets, call free, member and virtual functions through raw
//! addresses, and register types defined at runtime from TOML documents.
//!
//! ## Overview
//!
//! A type document describes where fields live and how functions are
//! found. The [`TypeManager`] compiles it into a [`CustomTypeClass`], a
//! table of descriptors. An [`Object`] pairs a class with an address and
//! interprets that table on every access.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │  Type Document  │────▶│     schema      │
//! │  (entity.toml)  │     │ (TypeDefinition)│
//! └─────────────────┘     └────────┬────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ BinaryResolver  │◀────│   TypeManager   │
//! │  (libloading)   │     │   (registry)    │
//! └────────┬────────┘     └────────┬────────┘
//!          │                       │
//!          ▼                       ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ NativeFunction  │◀────│ CustomTypeClass │
//! │ (call lowering) │     │  (descriptors)  │
//! └─────────────────┘     └────────┬────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │      codec      │◀────│ Object/Instance │
//! │  (raw cells)    │     │  (per address)  │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use void_native::prelude::*;
//!
//! let manager = TypeManager::new(ManagerConfig::default());
//! let entity = manager.create_type_from_file("Entity", "types/entity.toml", &[])?;
//!
//! // View an entity owned by the engine
//! let player = Instance::wrap(&entity, &[Value::Pointer(address)])?;
//! player.set("health", 100)?;
//! let health = player.call("get_health", &[])?;
//! ```
//!
//! ## Type Documents
//!
//! ```toml
//! binary = "server"
//! size = 64
//!
//! [instance_attribute.health]
//! type = "int"
//! offset = 4
//!
//! [virtual_function.get_health]
//! index = 2
//! return_type = "int"
//! ```

mod address;
mod array;
mod binary;
mod class;
mod config;
mod error;
mod exposed;
mod function;
mod instance;
mod manager;
mod pipe;
mod types;

pub mod codec;
pub mod memory;
pub mod schema;

pub use address::{NativeAddress, POINTER_SIZE};
pub use array::Array;
pub use binary::{
    BinaryHandle, BinaryResolver, BytePattern, Identifier, LibraryBinary, NativeBinary, SymbolTable,
    SIGNATURE_WILDCARD,
};
pub use class::{
    ClassRef, CustomTypeClass, FieldDescriptor, FieldKind, FunctionDescriptor, FunctionTarget, Hook, Member,
    MemberDef, TypeDefinition,
};
pub use config::{current_platform, BinaryConfig, ManagerConfig};
pub use error::{BindError, Result};
pub use exposed::{make_object, ExposedClasses, NativeClass, OpaqueClass};
pub use function::{
    invoke, BoundFunction, Convention, FunctionTypedef, NativeFunction, Signature, VirtualFunction,
    MAX_FLOAT_ARGS, MAX_GENERAL_ARGS,
};
pub use instance::{Instance, Object};
pub use manager::{Converter, TypeManager};
pub use memory::Allocation;
pub use pipe::{Pipe, PipeDefinition, PipeFunction};
pub use types::{NativeType, TypeDescriptor, Value};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::address::NativeAddress;
    pub use crate::class::{ClassRef, CustomTypeClass, FieldKind, Hook, TypeDefinition};
    pub use crate::config::ManagerConfig;
    pub use crate::error::{BindError, Result};
    pub use crate::function::{Convention, Signature};
    pub use crate::instance::{Instance, Object};
    pub use crate::manager::TypeManager;
    pub use crate::pipe::Pipe;
    pub use crate::types::{NativeType, Value};
}

//! Type registry
//!
//! The [`TypeManager`] owns every registered custom type and resolves type
//! names for fields, arrays and function returns. Names are looked up
//! lazily, so a type may refer to one registered after it.

use crate::address::NativeAddress;
use crate::binary::{BinaryHandle, BinaryResolver, Identifier};
use crate::class::{ClassRef, CustomTypeClass, FunctionTarget, Hook, Member, MemberDef, TypeDefinition};
use crate::config::ManagerConfig;
use crate::error::{BindError, Result};
use crate::exposed::{self, ExposedClasses};
use crate::function::{FunctionTypedef, NativeFunction, Signature, VirtualFunction};
use crate::instance::Object;
use crate::pipe::{Pipe, PipeDefinition, PipeFunction};
use crate::schema;
use crate::types::TypeDescriptor;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Weak};

/// Deferred conversion of an address into an object of a named type
///
/// The type is looked up when [`convert`](Self::convert) runs, not when the
/// converter is created.
#[derive(Clone)]
pub struct Converter {
    name: String,
    manager: Weak<TypeManager>,
}

impl Converter {
    /// Target type name
    pub fn type_name(&self) -> &str {
        &self.name
    }

    /// Wrap `address` as an object of the target type
    pub fn convert(&self, address: NativeAddress) -> Result<Object> {
        self.manager
            .upgrade()
            .ok_or_else(|| BindError::ManagerDropped(self.name.clone()))?
            .convert(&self.name, address)
    }
}

impl PartialEq for Converter {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Weak::ptr_eq(&self.manager, &other.manager)
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Converter").field(&self.name).finish()
    }
}

/// Registry of custom types
pub struct TypeManager {
    config: ManagerConfig,
    /// Registered custom types
    classes: RwLock<HashMap<String, Arc<CustomTypeClass>>>,
    /// Classes supplied by the host
    exposed: ExposedClasses,
    binaries: Arc<BinaryResolver>,
    this: Weak<TypeManager>,
}

impl TypeManager {
    /// Create a manager with its own binary resolver and no exposed classes
    pub fn new(config: ManagerConfig) -> Arc<Self> {
        let binaries = Arc::new(BinaryResolver::new(config.binaries.clone()));
        Self::with_collaborators(config, binaries, ExposedClasses::new())
    }

    /// Create a manager over a shared resolver and the host's classes
    pub fn with_collaborators(
        config: ManagerConfig,
        binaries: Arc<BinaryResolver>,
        exposed: ExposedClasses,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            classes: RwLock::new(HashMap::new()),
            exposed,
            binaries,
            this: this.clone(),
        })
    }

    /// Configuration
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Binary resolver
    pub fn binaries(&self) -> &Arc<BinaryResolver> {
        &self.binaries
    }

    /// Classes supplied by the host
    pub fn exposed(&self) -> &ExposedClasses {
        &self.exposed
    }

    /// Register a custom class under `name`, replacing any previous one
    pub fn register(&self, name: impl Into<String>, class: ClassRef) -> Result<Arc<CustomTypeClass>> {
        let name = name.into();
        let class = match class {
            ClassRef::Custom(class) => class,
            ClassRef::Exposed(class) => return Err(BindError::NotCustomType(class.name().to_string())),
        };
        class.mark_registered(&self.this)?;

        let previous = self.classes.write().insert(name.clone(), Arc::clone(&class));
        if previous.is_some() {
            log::warn!("Replaced custom type '{}'", name);
        } else {
            log::debug!("Registered custom type '{}'", name);
        }
        Ok(class)
    }

    /// Remove a custom class
    pub fn unregister(&self, name: &str) -> Option<Arc<CustomTypeClass>> {
        let removed = self.classes.write().remove(name);
        if removed.is_some() {
            log::debug!("Unregistered custom type '{}'", name);
        }
        removed
    }

    /// Look up a registered custom class
    pub fn custom_class(&self, name: &str) -> Option<Arc<CustomTypeClass>> {
        self.classes.read().get(name).cloned()
    }

    /// Check if a custom class is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.classes.read().contains_key(name)
    }

    /// Names of all registered custom classes, sorted
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.classes.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve a type name: custom classes first, then exposed classes
    pub fn resolve_class(&self, name: &str) -> Result<ClassRef> {
        // Check custom types first
        if let Some(class) = self.custom_class(name) {
            return Ok(ClassRef::Custom(class));
        }
        self.exposed
            .get(name)
            .map(|class| ClassRef::Exposed(Arc::clone(class)))
            .ok_or_else(|| BindError::UnknownClass(name.to_string()))
    }

    /// Alias of [`resolve_class`](Self::resolve_class)
    pub fn get_class(&self, name: &str) -> Result<ClassRef> {
        self.resolve_class(name)
    }

    /// Wrap `address` as an object of the named type
    pub fn convert(&self, name: &str, address: NativeAddress) -> Result<Object> {
        match self.resolve_class(name)? {
            class @ ClassRef::Custom(_) => Ok(Object::new(class, address)),
            ClassRef::Exposed(class) => Ok(exposed::make_object(&class, address)),
        }
    }

    /// Create a converter for the named type
    pub fn create_converter(&self, name: impl Into<String>) -> Converter {
        Converter {
            name: name.into(),
            manager: self.this.clone(),
        }
    }

    /// Create a function pointer type
    pub fn function_typedef(&self, signature: Signature, doc: Option<String>) -> FunctionTypedef {
        FunctionTypedef::new(self.with_converter(signature), doc)
    }

    fn with_converter(&self, signature: Signature) -> Signature {
        let name = match &signature.return_type {
            Some(TypeDescriptor::Custom(name)) => name.clone(),
            _ => return signature,
        };
        let converter = self.create_converter(name);
        signature.with_converter(converter)
    }

    /// Build a class from a definition without registering it
    ///
    /// Members and settings of `bases` are inherited; earlier bases win over
    /// later ones and the definition wins over all of them. Member functions
    /// are resolved against the class binary here.
    pub fn build_type(&self, name: &str, definition: TypeDefinition, bases: &[ClassRef]) -> Result<CustomTypeClass> {
        let mut members = HashMap::new();
        let mut binary = None;
        let mut server_check = None;
        let mut size = None;
        let mut constructor = None;
        let mut destructor = None;

        for base in bases.iter().rev() {
            let base = base
                .as_custom()
                .ok_or_else(|| BindError::NotCustomType(base.name().to_string()))?;
            members.extend(base.members().map(|(name, member)| (name.to_string(), member.clone())));
            binary = base.binary().map(str::to_string).or(binary);
            server_check = Some(base.server_check());
            size = base.size().or(size);
            constructor = base.constructor().cloned().or(constructor);
            destructor = base.destructor().cloned().or(destructor);
        }

        let binary = definition.binary.clone().or(binary);
        let server_check = definition.server_check.or(server_check).unwrap_or(true);
        let mut handle: Option<BinaryHandle> = None;

        for (member_name, member) in definition.members() {
            let member = match member {
                MemberDef::Field(field) => Member::Field(field.clone()),
                MemberDef::Function(function) => {
                    let signature = self.with_converter(function.signature.clone());
                    signature.validate()?;
                    match &function.target {
                        FunctionTarget::VirtualIndex(index) => Member::VirtualFunction(
                            VirtualFunction::new(*index, signature).with_doc(function.doc.clone()),
                        ),
                        FunctionTarget::Identifier(Identifier::Address(address)) => Member::Function(
                            NativeFunction::new(*address, signature).with_doc(function.doc.clone()),
                        ),
                        FunctionTarget::Identifier(identifier) => {
                            let resolved = match handle.clone() {
                                Some(resolved) => resolved,
                                None => {
                                    let binary_name = binary.as_deref().ok_or_else(|| {
                                        BindError::schema(
                                            schema::FUNCTION_SECTION,
                                            member_name.as_str(),
                                            format!("type '{}' declares no binary", name),
                                        )
                                    })?;
                                    let found = self.binaries.find_binary(binary_name, server_check)?;
                                    handle = Some(found.clone());
                                    found
                                }
                            };
                            Member::Function(
                                resolved
                                    .make_function(identifier, signature)?
                                    .with_doc(function.doc.clone()),
                            )
                        }
                    }
                }
            };
            members.insert(member_name.clone(), member);
        }

        let constructor = definition.constructor.clone().or(constructor);
        let destructor = definition.destructor.clone().or(destructor);
        for (role, hook) in [("constructor", &constructor), ("destructor", &destructor)] {
            if let Some(Hook::Member(member)) = hook {
                let is_function = matches!(
                    members.get(member),
                    Some(Member::Function(_) | Member::VirtualFunction(_))
                );
                if !is_function {
                    return Err(BindError::schema(
                        role,
                        member.as_str(),
                        format!("'{}' is not a function of '{}'", member, name),
                    ));
                }
            }
        }

        Ok(CustomTypeClass::new(
            name.to_string(),
            binary,
            server_check,
            definition.size.or(size),
            members,
            constructor,
            destructor,
        ))
    }

    /// Build and register a class
    ///
    /// Nothing is registered unless the whole definition builds.
    pub fn create_type(
        &self,
        name: &str,
        definition: TypeDefinition,
        bases: &[ClassRef],
    ) -> Result<Arc<CustomTypeClass>> {
        let class = self.build_type(name, definition, bases)?;
        self.register(name, ClassRef::Custom(Arc::new(class)))
    }

    /// Build and register a class from a type document
    pub fn create_type_from_str(&self, name: &str, text: &str, bases: &[ClassRef]) -> Result<Arc<CustomTypeClass>> {
        let definition = schema::parse_type_document(text, &self.config.platform)?;
        self.create_type(name, definition, bases)
    }

    /// Build and register a class from a type document on disk
    pub fn create_type_from_file(
        &self,
        name: &str,
        path: impl AsRef<Path>,
        bases: &[ClassRef],
    ) -> Result<Arc<CustomTypeClass>> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let class = self.create_type_from_str(name, &text, bases)?;
        log::info!("Loaded type '{}' from {:?}", name, path);
        Ok(class)
    }

    /// Resolve a free function
    pub fn pipe_function(&self, function: &PipeFunction) -> Result<NativeFunction> {
        let signature = self.with_converter(function.signature.clone());
        let resolved = match &function.identifier {
            Identifier::Address(address) => {
                signature.validate()?;
                NativeFunction::new(*address, signature)
            }
            identifier => self
                .binaries
                .find_binary(&function.binary, function.server_check)?
                .make_function(identifier, signature)?,
        };
        Ok(resolved.with_doc(function.doc.clone()))
    }

    /// Resolve every function of a pipe
    pub fn create_pipe(&self, definition: &PipeDefinition) -> Result<Pipe> {
        let functions = definition
            .functions()
            .map(|(name, function)| -> Result<(String, NativeFunction)> {
                Ok((name.to_string(), self.pipe_function(function)?))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        log::debug!("Created pipe with {} functions", functions.len());
        Ok(Pipe::new(functions))
    }

    /// Resolve a pipe document
    pub fn create_pipe_from_str(&self, text: &str) -> Result<Pipe> {
        let definition = schema::parse_pipe_document(text, &self.config.platform)?;
        self.create_pipe(&definition)
    }

    /// Resolve a pipe document on disk
    pub fn create_pipe_from_file(&self, path: impl AsRef<Path>) -> Result<Pipe> {
        let text = std::fs::read_to_string(path)?;
        self.create_pipe_from_str(&text)
    }
}

impl fmt::Debug for TypeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeManager")
            .field("platform", &self.config.platform)
            .field("classes", &self.type_names())
            .field("exposed", &self.exposed)
            .finish()
    }
}

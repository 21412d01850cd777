//! Error types for the native binding layer

use std::path::PathBuf;
use thiserror::Error;

/// Result type for binding operations
pub type Result<T> = std::result::Result<T, BindError>;

/// Errors that can occur while binding to native memory and code
#[derive(Debug, Error)]
pub enum BindError {
    /// Malformed or incomplete type document
    #[error("Schema error in [{section}.{entry}]: {message}")]
    Schema {
        section: String,
        entry: String,
        message: String,
    },

    /// Type document is not valid TOML
    #[error("Failed to parse schema document: {0}")]
    Parse(#[from] toml::de::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Type name is neither a custom type nor an exposed class
    #[error("Unknown class '{0}'")]
    UnknownClass(String),

    /// Native module could not be found or loaded
    #[error("Binary '{name}' not found (tried {tried:?})")]
    BinaryNotFound {
        name: String,
        tried: Vec<PathBuf>,
    },

    /// Binary does not contain the requested symbol
    #[error("Symbol '{symbol}' not found in binary '{binary}'")]
    SymbolNotFound {
        binary: String,
        symbol: String,
    },

    /// Class has no member with the given name
    #[error("'{class_name}' has no member '{member}'")]
    UnknownMember {
        class_name: String,
        member: String,
    },

    /// The manager a class was registered with no longer exists
    #[error("Type manager for '{0}' has been dropped")]
    ManagerDropped(String),

    /// Class is used before it was registered with a manager
    #[error("Class '{0}' was not registered by a TypeManager")]
    NotRegistered(String),

    /// Class is already registered with a different manager
    #[error("Class '{0}' belongs to another TypeManager")]
    ForeignManager(String),

    /// Only custom types can be registered or inherited from
    #[error("Custom type '{0}' has to be built from custom types only")]
    NotCustomType(String),

    /// Instance construction received unusable arguments
    #[error("Invalid arguments for '{class_name}': {message}")]
    InvalidArguments {
        class_name: String,
        message: String,
    },

    /// Operation needs the size of a class that declares none
    #[error("Class '{0}' does not declare a size")]
    MissingSize(String),

    /// Native call made with the wrong number of arguments
    #[error("Expected {expected} arguments, got {got}")]
    ArgumentCount { expected: usize, got: usize },

    /// Array index past the declared length
    #[error("Index {index} out of bounds for array of length {length}")]
    IndexOutOfBounds { index: usize, length: usize },

    /// Whole-array operation on an array without a declared length
    #[error("Array has no declared length")]
    UnboundedArray,

    /// Numeric value does not fit the native type
    #[error("Value {value} out of range for native type '{native_type}'")]
    ValueOutOfRange {
        native_type: &'static str,
        value: String,
    },

    /// Value of the wrong kind for the native type
    #[error("Expected {expected}, got {got}")]
    TypeMismatch {
        expected: String,
        got: &'static str,
    },

    /// Dereference of a null native pointer
    #[error("Null pointer: {0}")]
    NullPointer(String),

    /// Signature cannot be lowered onto the call ABI
    #[error("Unsupported signature: {0}")]
    UnsupportedSignature(String),

    /// Native calls are not available on this target
    #[error("Native calls are not supported on this platform")]
    UnsupportedPlatform,
}

impl BindError {
    /// Create a schema error for an entry in a section
    pub fn schema(
        section: impl Into<String>,
        entry: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        BindError::Schema {
            section: section.into(),
            entry: entry.into(),
            message: message.into(),
        }
    }

    /// Create a symbol not found error
    pub fn symbol_not_found(binary: impl Into<String>, symbol: impl Into<String>) -> Self {
        BindError::SymbolNotFound {
            binary: binary.into(),
            symbol: symbol.into(),
        }
    }

    /// Create an unknown member error
    pub fn unknown_member(class_name: impl Into<String>, member: impl Into<String>) -> Self {
        BindError::UnknownMember {
            class_name: class_name.into(),
            member: member.into(),
        }
    }

    /// Create an invalid arguments error
    pub fn invalid_arguments(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        BindError::InvalidArguments {
            class_name: class_name.into(),
            message: message.into(),
        }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(expected: impl Into<String>, got: &'static str) -> Self {
        BindError::TypeMismatch {
            expected: expected.into(),
            got,
        }
    }

    /// Create a value out of range error
    pub fn out_of_range(native_type: &'static str, value: impl ToString) -> Self {
        BindError::ValueOutOfRange {
            native_type,
            value: value.to_string(),
        }
    }

    /// Whether this is a value error (out of range or wrong kind)
    pub fn is_value_error(&self) -> bool {
        matches!(
            self,
            BindError::ValueOutOfRange { .. }
                | BindError::TypeMismatch { .. }
                | BindError::InvalidArguments { .. }
                | BindError::MissingSize(_)
        )
    }

    /// Whether this is a name resolution error
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            BindError::UnknownClass(_)
                | BindError::BinaryNotFound { .. }
                | BindError::SymbolNotFound { .. }
                | BindError::UnknownMember { .. }
                | BindError::ManagerDropped(_)
        )
    }
}

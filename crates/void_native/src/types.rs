//! Native type tags and the dynamic values that cross the binding boundary

use crate::address::{NativeAddress, POINTER_SIZE};
use crate::array::Array;
use crate::instance::Object;
use std::fmt;

/// Scalar types the codec can read and write directly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeType {
    Bool,
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    Pointer,
    /// `char*` cell
    StringPointer,
    /// Inline NUL-terminated `char[]`
    StringArray,
}

impl NativeType {
    /// All native types, in declaration order
    pub const ALL: [NativeType; 16] = [
        NativeType::Bool,
        NativeType::Char,
        NativeType::UChar,
        NativeType::Short,
        NativeType::UShort,
        NativeType::Int,
        NativeType::UInt,
        NativeType::Long,
        NativeType::ULong,
        NativeType::LongLong,
        NativeType::ULongLong,
        NativeType::Float,
        NativeType::Double,
        NativeType::Pointer,
        NativeType::StringPointer,
        NativeType::StringArray,
    ];

    /// Parse a type name as used in type documents
    pub fn from_name(name: &str) -> Option<Self> {
        let ty = match name.trim().to_ascii_lowercase().as_str() {
            "bool" => NativeType::Bool,
            "char" | "i8" | "int8" => NativeType::Char,
            "uchar" | "u8" | "uint8" => NativeType::UChar,
            "short" | "i16" | "int16" => NativeType::Short,
            "ushort" | "u16" | "uint16" => NativeType::UShort,
            "int" | "i32" | "int32" => NativeType::Int,
            "uint" | "u32" | "uint32" => NativeType::UInt,
            "long" => NativeType::Long,
            "ulong" => NativeType::ULong,
            "long_long" | "i64" | "int64" => NativeType::LongLong,
            "ulong_long" | "u64" | "uint64" => NativeType::ULongLong,
            "float" | "f32" | "float32" => NativeType::Float,
            "double" | "f64" | "float64" => NativeType::Double,
            "pointer" | "ptr" => NativeType::Pointer,
            "string_pointer" | "string" => NativeType::StringPointer,
            "string_array" => NativeType::StringArray,
            _ => return None,
        };
        Some(ty)
    }

    /// Check whether a type name refers to a native type
    pub fn is_native(name: &str) -> bool {
        Self::from_name(name).is_some()
    }

    /// Canonical name
    pub fn name(self) -> &'static str {
        match self {
            NativeType::Bool => "bool",
            NativeType::Char => "char",
            NativeType::UChar => "uchar",
            NativeType::Short => "short",
            NativeType::UShort => "ushort",
            NativeType::Int => "int",
            NativeType::UInt => "uint",
            NativeType::Long => "long",
            NativeType::ULong => "ulong",
            NativeType::LongLong => "long_long",
            NativeType::ULongLong => "ulong_long",
            NativeType::Float => "float",
            NativeType::Double => "double",
            NativeType::Pointer => "pointer",
            NativeType::StringPointer => "string_pointer",
            NativeType::StringArray => "string_array",
        }
    }

    /// Width of a cell of this type, `None` for inline strings
    pub fn size(self) -> Option<usize> {
        let size = match self {
            NativeType::Bool | NativeType::Char | NativeType::UChar => 1,
            NativeType::Short | NativeType::UShort => 2,
            NativeType::Int | NativeType::UInt | NativeType::Long | NativeType::ULong => 4,
            NativeType::Float => 4,
            NativeType::LongLong | NativeType::ULongLong | NativeType::Double => 8,
            NativeType::Pointer | NativeType::StringPointer => POINTER_SIZE,
            NativeType::StringArray => return None,
        };
        Some(size)
    }

    /// Check for signed integer types
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            NativeType::Char
                | NativeType::Short
                | NativeType::Int
                | NativeType::Long
                | NativeType::LongLong
        )
    }

    /// Check for integer types (signed or unsigned)
    pub fn is_integer(self) -> bool {
        self.is_signed()
            || matches!(
                self,
                NativeType::UChar
                    | NativeType::UShort
                    | NativeType::UInt
                    | NativeType::ULong
                    | NativeType::ULongLong
            )
    }

    /// Check for floating point types
    pub fn is_float(self) -> bool {
        matches!(self, NativeType::Float | NativeType::Double)
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A logical type: native scalar or a name resolved through the type manager
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    Native(NativeType),
    Custom(String),
}

impl TypeDescriptor {
    /// Classify a type name
    pub fn parse(name: &str) -> Self {
        match NativeType::from_name(name) {
            Some(native) => TypeDescriptor::Native(native),
            None => TypeDescriptor::Custom(name.trim().to_string()),
        }
    }

    /// The native type, if any
    pub fn native(&self) -> Option<NativeType> {
        match self {
            TypeDescriptor::Native(native) => Some(*native),
            TypeDescriptor::Custom(_) => None,
        }
    }

    /// Type name
    pub fn name(&self) -> &str {
        match self {
            TypeDescriptor::Native(native) => native.name(),
            TypeDescriptor::Custom(name) => name,
        }
    }
}

impl From<NativeType> for TypeDescriptor {
    fn from(native: NativeType) -> Self {
        TypeDescriptor::Native(native)
    }
}

impl From<&str> for TypeDescriptor {
    fn from(name: &str) -> Self {
        TypeDescriptor::parse(name)
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value read from or written to native memory
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No value (void returns)
    Void,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Unsigned integer
    UInt(u64),
    /// Floating point
    Float(f64),
    /// Raw address
    Pointer(NativeAddress),
    /// String
    String(String),
    /// Typed view over native memory
    Object(Object),
    /// Array view over native memory
    Array(Array),
    /// Sequence of values for whole-array writes
    List(Vec<Value>),
}

impl Value {
    /// Get type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Pointer(_) => "pointer",
            Value::String(_) => "string",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
            Value::List(_) => "list",
        }
    }

    /// Get as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as signed integer, if it fits
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Get as unsigned integer, if it fits
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Get as float (integers convert)
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Get as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// Get as object
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(v) => Some(v),
            _ => None,
        }
    }

    /// Get as array view
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Interpret as an address: pointers, objects and non-negative integers
    pub fn as_address(&self) -> Option<NativeAddress> {
        match self {
            Value::Pointer(address) => Some(*address),
            Value::Object(object) => Some(object.address()),
            Value::Int(v) => usize::try_from(*v).ok().map(NativeAddress::new),
            Value::UInt(v) => usize::try_from(*v).ok().map(NativeAddress::new),
            _ => None,
        }
    }

    /// Check for void
    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v as u64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<NativeAddress> for Value {
    fn from(v: NativeAddress) -> Self {
        Value::Pointer(v)
    }
}

impl From<Object> for Value {
    fn from(v: Object) -> Self {
        Value::Object(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

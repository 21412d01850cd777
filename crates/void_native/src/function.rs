//! Function binding engine
//!
//! Turns an entry address plus a [`Signature`] into something callable with
//! [`Value`]s. Member functions are bound to a receiver up front; virtual
//! functions look their entry up in the receiver's vtable on every call, so
//! a subclass that overrides the slot is dispatched correctly.

use crate::address::{NativeAddress, POINTER_SIZE};
use crate::codec;
use crate::error::{BindError, Result};
use crate::manager::Converter;
use crate::types::{NativeType, TypeDescriptor, Value};
use std::ffi::CString;
use std::fmt;

/// Maximum number of general purpose register arguments
pub const MAX_GENERAL_ARGS: usize = 8;

/// Maximum number of floating point register arguments
pub const MAX_FLOAT_ARGS: usize = 8;

/// Calling convention of a native function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Convention {
    #[default]
    Cdecl,
    Thiscall,
    Stdcall,
    Fastcall,
}

impl Convention {
    /// Parse a convention name as used in type documents
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "cdecl" => Some(Convention::Cdecl),
            "thiscall" => Some(Convention::Thiscall),
            "stdcall" => Some(Convention::Stdcall),
            "fastcall" => Some(Convention::Fastcall),
            _ => None,
        }
    }

    /// Canonical name
    pub fn name(self) -> &'static str {
        match self {
            Convention::Cdecl => "cdecl",
            Convention::Thiscall => "thiscall",
            Convention::Stdcall => "stdcall",
            Convention::Fastcall => "fastcall",
        }
    }
}

/// Argument and return types of a native function
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    /// Argument types, receiver included for member functions
    pub args: Vec<TypeDescriptor>,
    /// Return type, `None` for void
    pub return_type: Option<TypeDescriptor>,
    /// Calling convention
    pub convention: Convention,
    /// Converter for custom return types
    converter: Option<Converter>,
}

impl Signature {
    /// Create a signature
    pub fn new(
        args: Vec<TypeDescriptor>,
        return_type: Option<TypeDescriptor>,
        convention: Convention,
    ) -> Self {
        Self {
            args,
            return_type,
            convention,
            converter: None,
        }
    }

    /// Prepend the implicit receiver argument
    pub fn with_receiver(mut self) -> Self {
        self.args.insert(0, TypeDescriptor::Native(NativeType::Pointer));
        self
    }

    /// Attach the converter used for a custom return type
    pub fn with_converter(mut self, converter: Converter) -> Self {
        self.converter = Some(converter);
        self
    }

    /// The converter for custom return values
    pub fn converter(&self) -> Option<&Converter> {
        self.converter.as_ref()
    }

    /// Check the signature fits the register ABI
    pub fn validate(&self) -> Result<()> {
        let floats = self
            .args
            .iter()
            .filter(|arg| arg.native().is_some_and(NativeType::is_float))
            .count();
        let general = self.args.len() - floats;
        if general > MAX_GENERAL_ARGS || floats > MAX_FLOAT_ARGS {
            return Err(BindError::UnsupportedSignature(format!(
                "{} integer and {} floating point arguments (max {} and {})",
                general, floats, MAX_GENERAL_ARGS, MAX_FLOAT_ARGS
            )));
        }
        Ok(())
    }
}

/// A callable native function at a fixed address
#[derive(Debug, Clone, PartialEq)]
pub struct NativeFunction {
    address: NativeAddress,
    signature: Signature,
    doc: Option<String>,
}

impl NativeFunction {
    /// Wrap the function at `address`
    pub fn new(address: NativeAddress, signature: Signature) -> Self {
        Self {
            address,
            signature,
            doc: None,
        }
    }

    /// Attach documentation
    pub fn with_doc(mut self, doc: Option<String>) -> Self {
        self.doc = doc;
        self
    }

    /// Entry address
    pub fn address(&self) -> NativeAddress {
        self.address
    }

    /// Signature
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Documentation
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// Call with every declared argument supplied
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        invoke(self.address, &self.signature, args)
    }

    /// Bind to a receiver, producing a member thunk
    pub fn bind(&self, receiver: NativeAddress) -> BoundFunction {
        BoundFunction {
            target: BoundTarget::Entry(self.address),
            signature: self.signature.clone(),
            receiver,
            doc: self.doc.clone(),
        }
    }
}

/// A virtual function identified by its vtable slot
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualFunction {
    index: usize,
    signature: Signature,
    doc: Option<String>,
}

impl VirtualFunction {
    /// Create a virtual function; `signature` must include the receiver
    pub fn new(index: usize, signature: Signature) -> Self {
        Self {
            index,
            signature,
            doc: None,
        }
    }

    /// Attach documentation
    pub fn with_doc(mut self, doc: Option<String>) -> Self {
        self.doc = doc;
        self
    }

    /// Vtable slot
    pub fn index(&self) -> usize {
        self.index
    }

    /// Signature
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Documentation
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// Bind to a receiver; the slot is looked up on each call
    pub fn bind(&self, receiver: NativeAddress) -> BoundFunction {
        BoundFunction {
            target: BoundTarget::Slot(self.index),
            signature: self.signature.clone(),
            receiver,
            doc: self.doc.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BoundTarget {
    Entry(NativeAddress),
    Slot(usize),
}

/// A function with its receiver captured
///
/// Calling it with N arguments supplies the receiver as argument 0 and the
/// N arguments after it.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundFunction {
    target: BoundTarget,
    signature: Signature,
    receiver: NativeAddress,
    doc: Option<String>,
}

impl BoundFunction {
    /// The captured receiver
    pub fn receiver(&self) -> NativeAddress {
        self.receiver
    }

    /// Signature, receiver included
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Documentation
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// Resolve the entry address for the next call
    pub fn entry(&self) -> Result<NativeAddress> {
        match self.target {
            BoundTarget::Entry(address) => Ok(address),
            BoundTarget::Slot(index) => {
                if self.receiver.is_null() {
                    return Err(BindError::NullPointer(format!(
                        "virtual call through slot {} on a null receiver",
                        index
                    )));
                }
                // Safety: receivers are trusted to start with a vtable pointer
                let vtable = unsafe { self.receiver.get_pointer(0) };
                Ok(unsafe { vtable.get_pointer(index * POINTER_SIZE) })
            }
        }
    }

    /// Call with the receiver prepended
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(Value::Pointer(self.receiver));
        full.extend_from_slice(args);
        invoke(self.entry()?, &self.signature, &full)
    }
}

/// A function pointer type, used to call pointers read out of memory
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionTypedef {
    signature: Signature,
    doc: Option<String>,
}

impl FunctionTypedef {
    /// Create a typedef
    pub fn new(signature: Signature, doc: Option<String>) -> Self {
        Self { signature, doc }
    }

    /// Signature
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Build a function for the entry at `address`
    pub fn make_function(&self, address: NativeAddress) -> NativeFunction {
        NativeFunction::new(address, self.signature.clone()).with_doc(self.doc.clone())
    }
}

#[derive(Default)]
struct Registers {
    general: [u64; MAX_GENERAL_ARGS],
    float: [f64; MAX_FLOAT_ARGS],
    general_count: usize,
    float_count: usize,
}

impl Registers {
    fn push_general(&mut self, value: u64) -> Result<()> {
        if self.general_count == MAX_GENERAL_ARGS {
            return Err(BindError::UnsupportedSignature("too many integer arguments".into()));
        }
        self.general[self.general_count] = value;
        self.general_count += 1;
        Ok(())
    }

    fn push_float(&mut self, value: f64) -> Result<()> {
        if self.float_count == MAX_FLOAT_ARGS {
            return Err(BindError::UnsupportedSignature(
                "too many floating point arguments".into(),
            ));
        }
        self.float[self.float_count] = value;
        self.float_count += 1;
        Ok(())
    }
}

impl fmt::Debug for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registers")
            .field("general", &&self.general[..self.general_count])
            .field("float", &&self.float[..self.float_count])
            .finish()
    }
}

/// Encode `value` through the codec into a 64-bit scratch cell
fn cell_bits(ty: NativeType, value: &Value) -> Result<u64> {
    let mut cell = 0u64;
    let address = NativeAddress::from_ptr(&mut cell as *mut u64);
    codec::write(address, 0, ty, value)?;
    let bits = match codec::read(address, 0, ty) {
        // Sign-extend through the decoded value
        Value::Int(v) => v as u64,
        _ => cell,
    };
    Ok(bits)
}

fn marshal(signature: &Signature, args: &[Value]) -> Result<(Registers, Vec<CString>)> {
    let mut registers = Registers::default();
    let mut strings = Vec::new();

    for (ty, value) in signature.args.iter().zip(args) {
        match ty {
            TypeDescriptor::Native(NativeType::Float) => {
                let bits = cell_bits(NativeType::Float, value)?;
                registers.push_float(f64::from_bits(bits & 0xffff_ffff))?;
            }
            TypeDescriptor::Native(NativeType::Double) => {
                let bits = cell_bits(NativeType::Double, value)?;
                registers.push_float(f64::from_bits(bits))?;
            }
            TypeDescriptor::Native(ty @ (NativeType::StringPointer | NativeType::StringArray)) => {
                let text = codec::c_string(*ty, value)?;
                registers.push_general(text.as_ptr() as usize as u64)?;
                strings.push(text);
            }
            TypeDescriptor::Native(NativeType::Pointer) | TypeDescriptor::Custom(_) => {
                registers.push_general(codec::pointer(value)?.value() as u64)?;
            }
            TypeDescriptor::Native(native) => {
                registers.push_general(cell_bits(*native, value)?)?;
            }
        }
    }

    Ok((registers, strings))
}

fn unmarshal(signature: &Signature, raw: u64) -> Result<Value> {
    let ty = match &signature.return_type {
        None => return Ok(Value::Void),
        Some(ty) => ty,
    };

    match ty {
        TypeDescriptor::Native(NativeType::Float) => {
            Ok(Value::Float(f32::from_bits(raw as u32) as f64))
        }
        TypeDescriptor::Native(NativeType::Double) => Ok(Value::Float(f64::from_bits(raw))),
        TypeDescriptor::Native(NativeType::Pointer) => {
            Ok(Value::Pointer(NativeAddress::new(raw as usize)))
        }
        TypeDescriptor::Native(NativeType::StringPointer | NativeType::StringArray) => Ok(
            Value::String(codec::read_c_string(NativeAddress::new(raw as usize))),
        ),
        TypeDescriptor::Native(native) => {
            let cell = raw;
            Ok(codec::read(NativeAddress::from_ptr(&cell as *const u64), 0, *native))
        }
        TypeDescriptor::Custom(_) => {
            let address = NativeAddress::new(raw as usize);
            if address.is_null() {
                return Ok(Value::Void);
            }
            match &signature.converter {
                Some(converter) => Ok(Value::Object(converter.convert(address)?)),
                None => Ok(Value::Pointer(address)),
            }
        }
    }
}

/// Call `entry` with every argument of `signature` supplied in `args`
pub fn invoke(entry: NativeAddress, signature: &Signature, args: &[Value]) -> Result<Value> {
    if args.len() != signature.args.len() {
        return Err(BindError::ArgumentCount {
            expected: signature.args.len(),
            got: args.len(),
        });
    }
    if entry.is_null() {
        return Err(BindError::NullPointer("call to a null function".into()));
    }

    let (registers, _strings) = marshal(signature, args)?;
    let returns_float = signature
        .return_type
        .as_ref()
        .and_then(TypeDescriptor::native)
        .is_some_and(NativeType::is_float);

    log::trace!(
        "Calling {} ({}) with {:?}",
        entry,
        signature.convention.name(),
        registers
    );

    // Safety: the entry and signature come from the binding schema
    let raw = unsafe { call_registers(entry, &registers, returns_float)? };
    unmarshal(signature, raw)
}

#[cfg(any(all(target_arch = "x86_64", not(windows)), target_arch = "aarch64"))]
unsafe fn call_registers(entry: NativeAddress, registers: &Registers, returns_float: bool) -> Result<u64> {
    // Integer and floating point arguments are assigned to separate register
    // files on these ABIs, so passing all eight of each is harmless for a
    // callee that reads fewer. Every convention lowers to the C ABI here.
    type GeneralFn =
        unsafe extern "C" fn(u64, u64, u64, u64, u64, u64, u64, u64, f64, f64, f64, f64, f64, f64, f64, f64) -> u64;
    type FloatFn =
        unsafe extern "C" fn(u64, u64, u64, u64, u64, u64, u64, u64, f64, f64, f64, f64, f64, f64, f64, f64) -> f64;

    let g = &registers.general;
    let f = &registers.float;

    let raw = if returns_float {
        let func: FloatFn = std::mem::transmute::<usize, FloatFn>(entry.value());
        func(g[0], g[1], g[2], g[3], g[4], g[5], g[6], g[7], f[0], f[1], f[2], f[3], f[4], f[5], f[6], f[7])
            .to_bits()
    } else {
        let func: GeneralFn = std::mem::transmute::<usize, GeneralFn>(entry.value());
        func(g[0], g[1], g[2], g[3], g[4], g[5], g[6], g[7], f[0], f[1], f[2], f[3], f[4], f[5], f[6], f[7])
    };
    Ok(raw)
}

#[cfg(not(any(all(target_arch = "x86_64", not(windows)), target_arch = "aarch64")))]
unsafe fn call_registers(_entry: NativeAddress, _registers: &Registers, _returns_float: bool) -> Result<u64> {
    Err(BindError::UnsupportedPlatform)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convention_names() {
        assert_eq!(Convention::from_name("THISCALL"), Some(Convention::Thiscall));
        assert_eq!(Convention::from_name("vectorcall"), None);
        assert_eq!(Convention::default(), Convention::Cdecl);
    }

    #[test]
    fn test_receiver_is_prepended() {
        let signature = Signature::new(vec![NativeType::Int.into()], None, Convention::Thiscall)
            .with_receiver();
        assert_eq!(
            signature.args,
            vec![NativeType::Pointer.into(), NativeType::Int.into()]
        );
    }

    #[test]
    fn test_signature_limits() {
        let many = vec![TypeDescriptor::Native(NativeType::Int); MAX_GENERAL_ARGS + 1];
        let signature = Signature::new(many, None, Convention::Cdecl);
        assert!(matches!(signature.validate(), Err(BindError::UnsupportedSignature(_))));

        let mixed = vec![
            TypeDescriptor::Native(NativeType::Int),
            TypeDescriptor::Native(NativeType::Float),
        ];
        assert!(Signature::new(mixed, None, Convention::Cdecl).validate().is_ok());
    }

    #[test]
    fn test_wrong_arity() {
        let signature = Signature::new(vec![NativeType::Int.into()], None, Convention::Cdecl);
        let function = NativeFunction::new(NativeAddress::new(0x1000), signature);
        let err = function.call(&[]).unwrap_err();
        assert!(matches!(err, BindError::ArgumentCount { expected: 1, got: 0 }));
    }

    #[test]
    fn test_marshal_sign_extends() {
        let signature = Signature::new(
            vec![NativeType::Char.into(), NativeType::Float.into(), NativeType::UShort.into()],
            None,
            Convention::Cdecl,
        );
        let (registers, _) =
            marshal(&signature, &[Value::Int(-1), Value::Float(2.0), Value::UInt(7)]).unwrap();
        assert_eq!(registers.general_count, 2);
        assert_eq!(registers.general[0], u64::MAX);
        assert_eq!(registers.general[1], 7);
        assert_eq!(registers.float[0].to_bits() as u32, 2.0f32.to_bits());
    }

    #[test]
    fn test_marshal_range_checked() {
        let signature = Signature::new(vec![NativeType::UChar.into()], None, Convention::Cdecl);
        assert!(marshal(&signature, &[Value::Int(256)]).is_err());
    }

    #[test]
    fn test_unmarshal_truncates() {
        let signature = Signature::new(vec![], Some(NativeType::Short.into()), Convention::Cdecl);
        assert_eq!(unmarshal(&signature, 0xdead_ffff).unwrap(), Value::Int(-1));

        let signature = Signature::new(vec![], Some(NativeType::Bool.into()), Convention::Cdecl);
        assert_eq!(unmarshal(&signature, 0xff00).unwrap(), Value::Bool(false));

        let signature = Signature::new(vec![], None, Convention::Cdecl);
        assert_eq!(unmarshal(&signature, 42).unwrap(), Value::Void);
    }

    #[cfg(any(all(target_arch = "x86_64", not(windows)), target_arch = "aarch64"))]
    mod calls {
        use super::*;

        extern "C" fn add(a: i32, b: i32) -> i32 {
            a + b
        }

        extern "C" fn scale(factor: f32, value: i64, offset: f64) -> f64 {
            factor as f64 * value as f64 + offset
        }

        extern "C" fn half(value: f32) -> f32 {
            value / 2.0
        }

        extern "C" fn length(text: *const std::ffi::c_char) -> u64 {
            unsafe { std::ffi::CStr::from_ptr(text) }.to_bytes().len() as u64
        }

        fn address_of(entry: usize) -> NativeAddress {
            NativeAddress::new(entry)
        }

        #[test]
        fn test_call_integer_function() {
            let signature = Signature::new(
                vec![NativeType::Int.into(), NativeType::Int.into()],
                Some(NativeType::Int.into()),
                Convention::Cdecl,
            );
            let function = NativeFunction::new(address_of(add as usize), signature);
            assert_eq!(function.call(&[Value::Int(-5), Value::Int(3)]).unwrap(), Value::Int(-2));
        }

        #[test]
        fn test_call_mixed_function() {
            let signature = Signature::new(
                vec![NativeType::Float.into(), NativeType::LongLong.into(), NativeType::Double.into()],
                Some(NativeType::Double.into()),
                Convention::Cdecl,
            );
            let function = NativeFunction::new(address_of(scale as usize), signature);
            let result = function
                .call(&[Value::Float(1.5), Value::Int(4), Value::Float(0.25)])
                .unwrap();
            assert_eq!(result, Value::Float(6.25));
        }

        #[test]
        fn test_call_float_return() {
            let signature = Signature::new(
                vec![NativeType::Float.into()],
                Some(NativeType::Float.into()),
                Convention::Cdecl,
            );
            let function = NativeFunction::new(address_of(half as usize), signature);
            assert_eq!(function.call(&[Value::Float(3.0)]).unwrap(), Value::Float(1.5));
        }

        #[test]
        fn test_call_string_argument() {
            let signature = Signature::new(
                vec![NativeType::StringPointer.into()],
                Some(NativeType::ULongLong.into()),
                Convention::Cdecl,
            );
            let function = NativeFunction::new(address_of(length as usize), signature);
            assert_eq!(function.call(&[Value::from("four")]).unwrap(), Value::UInt(4));
        }
    }
}

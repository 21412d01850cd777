//! Native value codec
//!
//! Converts between raw memory cells and [`Value`]s. The codec trusts the
//! addresses it is given: reading or writing outside mapped memory is the
//! caller's responsibility, the same way a C++ field access would be.

use crate::address::NativeAddress;
use crate::error::{BindError, Result};
use crate::types::{NativeType, Value};
use std::ffi::{CStr, CString};

/// Read the cell of type `ty` at `address + offset`
pub fn read(address: NativeAddress, offset: usize, ty: NativeType) -> Value {
    // Safety: addresses are trusted at this layer
    unsafe {
        match ty {
            NativeType::Bool => Value::Bool(address.read::<u8>(offset) != 0),
            NativeType::Char => Value::Int(address.read::<i8>(offset) as i64),
            NativeType::UChar => Value::UInt(address.read::<u8>(offset) as u64),
            NativeType::Short => Value::Int(address.read::<i16>(offset) as i64),
            NativeType::UShort => Value::UInt(address.read::<u16>(offset) as u64),
            NativeType::Int | NativeType::Long => Value::Int(address.read::<i32>(offset) as i64),
            NativeType::UInt | NativeType::ULong => {
                Value::UInt(address.read::<u32>(offset) as u64)
            }
            NativeType::LongLong => Value::Int(address.read::<i64>(offset)),
            NativeType::ULongLong => Value::UInt(address.read::<u64>(offset)),
            NativeType::Float => Value::Float(address.read::<f32>(offset) as f64),
            NativeType::Double => Value::Float(address.read::<f64>(offset)),
            NativeType::Pointer => Value::Pointer(address.get_pointer(offset)),
            NativeType::StringPointer => {
                Value::String(read_c_string(address.get_pointer(offset)))
            }
            NativeType::StringArray => Value::String(read_c_string(address + offset)),
        }
    }
}

/// Write `value` into the cell of type `ty` at `address + offset`
pub fn write(address: NativeAddress, offset: usize, ty: NativeType, value: &Value) -> Result<()> {
    // Safety: addresses are trusted at this layer
    unsafe {
        match ty {
            NativeType::Bool => {
                let flag = match value {
                    Value::Bool(b) => *b,
                    Value::Int(_) | Value::UInt(_) => integer(ty, value)? != 0,
                    other => return Err(BindError::type_mismatch("bool", other.type_name())),
                };
                address.write::<u8>(offset, flag as u8);
            }
            NativeType::Char => address.write(offset, narrow::<i8>(ty, value)?),
            NativeType::UChar => address.write(offset, narrow::<u8>(ty, value)?),
            NativeType::Short => address.write(offset, narrow::<i16>(ty, value)?),
            NativeType::UShort => address.write(offset, narrow::<u16>(ty, value)?),
            NativeType::Int | NativeType::Long => address.write(offset, narrow::<i32>(ty, value)?),
            NativeType::UInt | NativeType::ULong => {
                address.write(offset, narrow::<u32>(ty, value)?)
            }
            NativeType::LongLong => address.write(offset, narrow::<i64>(ty, value)?),
            NativeType::ULongLong => address.write(offset, narrow::<u64>(ty, value)?),
            NativeType::Float => address.write(offset, single(value)?),
            NativeType::Double => address.write(offset, double(ty, value)?),
            NativeType::Pointer => address.set_pointer(offset, pointer(value)?),
            NativeType::StringPointer => {
                let text = c_string(ty, value)?;
                let target = address.get_pointer(offset);
                if target.is_null() {
                    return Err(BindError::NullPointer(format!(
                        "string pointer at {} is null",
                        address + offset
                    )));
                }
                write_c_string(target, &text);
            }
            NativeType::StringArray => {
                let text = c_string(ty, value)?;
                write_c_string(address + offset, &text);
            }
        }
    }
    Ok(())
}

/// Read a NUL-terminated string; null reads as empty
pub(crate) fn read_c_string(address: NativeAddress) -> String {
    if address.is_null() {
        return String::new();
    }
    // Safety: non-null string addresses are trusted to be NUL-terminated
    unsafe { CStr::from_ptr(address.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

unsafe fn write_c_string(address: NativeAddress, text: &CStr) {
    let bytes = text.to_bytes_with_nul();
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), address.as_ptr::<u8>(), bytes.len());
}

fn integer(ty: NativeType, value: &Value) -> Result<i128> {
    match value {
        Value::Int(v) => Ok(*v as i128),
        Value::UInt(v) => Ok(*v as i128),
        Value::Bool(b) => Ok(*b as i128),
        other => Err(BindError::type_mismatch(ty.name(), other.type_name())),
    }
}

fn narrow<T: TryFrom<i128>>(ty: NativeType, value: &Value) -> Result<T> {
    let wide = integer(ty, value)?;
    T::try_from(wide).map_err(|_| BindError::out_of_range(ty.name(), wide))
}

fn double(ty: NativeType, value: &Value) -> Result<f64> {
    value
        .as_float()
        .ok_or_else(|| BindError::type_mismatch(ty.name(), value.type_name()))
}

fn single(value: &Value) -> Result<f32> {
    let wide = double(NativeType::Float, value)?;
    if wide.is_finite() && wide.abs() > f32::MAX as f64 {
        return Err(BindError::out_of_range(NativeType::Float.name(), wide));
    }
    Ok(wide as f32)
}

pub(crate) fn pointer(value: &Value) -> Result<NativeAddress> {
    match value {
        Value::Int(v) if *v < 0 => Err(BindError::out_of_range(NativeType::Pointer.name(), v)),
        _ => value
            .as_address()
            .ok_or_else(|| BindError::type_mismatch("pointer", value.type_name())),
    }
}

pub(crate) fn c_string(ty: NativeType, value: &Value) -> Result<CString> {
    let text = value
        .as_str()
        .ok_or_else(|| BindError::type_mismatch(ty.name(), value.type_name()))?;
    CString::new(text).map_err(|_| BindError::out_of_range(ty.name(), "string with interior NUL"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> (Vec<u64>, NativeAddress) {
        let mut storage = vec![0u64; 8];
        let address = NativeAddress::from_ptr(storage.as_mut_ptr());
        (storage, address)
    }

    #[test]
    fn test_integer_round_trips() {
        let (_storage, address) = block();
        let cases = [
            (NativeType::Char, Value::Int(i8::MIN as i64)),
            (NativeType::UChar, Value::UInt(u8::MAX as u64)),
            (NativeType::Short, Value::Int(-12345)),
            (NativeType::UShort, Value::UInt(54321)),
            (NativeType::Int, Value::Int(i32::MIN as i64)),
            (NativeType::UInt, Value::UInt(u32::MAX as u64)),
            (NativeType::Long, Value::Int(-7)),
            (NativeType::ULong, Value::UInt(7)),
            (NativeType::LongLong, Value::Int(i64::MIN)),
            (NativeType::ULongLong, Value::UInt(u64::MAX)),
        ];
        for (ty, value) in cases {
            write(address, 3, ty, &value).unwrap();
            assert_eq!(read(address, 3, ty), value, "round trip of {}", ty);
        }
    }

    #[test]
    fn test_float_bool_pointer_round_trips() {
        let (_storage, address) = block();

        write(address, 0, NativeType::Float, &Value::Float(1.5)).unwrap();
        assert_eq!(read(address, 0, NativeType::Float), Value::Float(1.5));

        write(address, 8, NativeType::Double, &Value::Float(-0.1)).unwrap();
        assert_eq!(read(address, 8, NativeType::Double), Value::Float(-0.1));

        write(address, 16, NativeType::Bool, &Value::Bool(true)).unwrap();
        assert_eq!(read(address, 16, NativeType::Bool), Value::Bool(true));

        let target = NativeAddress::new(0xdead_beef);
        write(address, 24, NativeType::Pointer, &Value::Pointer(target)).unwrap();
        assert_eq!(read(address, 24, NativeType::Pointer), Value::Pointer(target));
    }

    #[test]
    fn test_out_of_range_writes() {
        let (_storage, address) = block();

        let err = write(address, 0, NativeType::Char, &Value::Int(128)).unwrap_err();
        assert!(matches!(err, BindError::ValueOutOfRange { native_type: "char", .. }));

        assert!(write(address, 0, NativeType::UChar, &Value::Int(-1)).is_err());
        assert!(write(address, 0, NativeType::UInt, &Value::UInt(1 << 32)).is_err());
        assert!(write(address, 0, NativeType::LongLong, &Value::UInt(u64::MAX)).is_err());
        assert!(write(address, 0, NativeType::Float, &Value::Float(1e300)).is_err());
        assert!(write(address, 0, NativeType::Pointer, &Value::Int(-5)).is_err());

        let err = write(address, 0, NativeType::Int, &Value::from("nope")).unwrap_err();
        assert!(err.is_value_error());
    }

    #[test]
    fn test_strings() {
        let (_storage, address) = block();

        write(address, 0, NativeType::StringArray, &Value::from("hello")).unwrap();
        assert_eq!(read(address, 0, NativeType::StringArray), Value::from("hello"));

        let mut buffer = [0u8; 16];
        let (_holder, holder) = block();
        write(holder, 0, NativeType::Pointer, &Value::Pointer(NativeAddress::from_ptr(buffer.as_mut_ptr())))
            .unwrap();
        write(holder, 0, NativeType::StringPointer, &Value::from("world")).unwrap();
        assert_eq!(read(holder, 0, NativeType::StringPointer), Value::from("world"));
        assert_eq!(&buffer[..6], b"world\0");
    }

    #[test]
    fn test_null_string_pointer() {
        let (_storage, address) = block();
        assert_eq!(read(address, 0, NativeType::StringPointer), Value::from(""));
        let err = write(address, 0, NativeType::StringPointer, &Value::from("x")).unwrap_err();
        assert!(matches!(err, BindError::NullPointer(_)));
    }
}

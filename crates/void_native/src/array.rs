//! Array views over native memory
//!
//! Instance arrays place element `i` at `base + i * element_size`. Pointer
//! arrays place a pointer at `base + i * POINTER_SIZE` and the element
//! behind it.

use crate::address::{NativeAddress, POINTER_SIZE};
use crate::codec;
use crate::error::{BindError, Result};
use crate::manager::TypeManager;
use crate::types::{TypeDescriptor, Value};
use std::fmt;
use std::sync::{Arc, Weak};

/// A view of an array field
#[derive(Clone)]
pub struct Array {
    manager: Weak<TypeManager>,
    element: TypeDescriptor,
    holds_pointers: bool,
    base: NativeAddress,
    length: Option<usize>,
}

impl Array {
    pub(crate) fn new(
        manager: Arc<TypeManager>,
        element: TypeDescriptor,
        holds_pointers: bool,
        base: NativeAddress,
        length: Option<usize>,
    ) -> Self {
        Self {
            manager: Arc::downgrade(&manager),
            element,
            holds_pointers,
            base,
            length,
        }
    }

    /// Address of element (or slot) 0
    pub fn base(&self) -> NativeAddress {
        self.base
    }

    /// Element type
    pub fn element(&self) -> &TypeDescriptor {
        &self.element
    }

    /// Check whether elements are stored behind pointers
    pub fn holds_pointers(&self) -> bool {
        self.holds_pointers
    }

    /// Declared length
    pub fn len(&self) -> Option<usize> {
        self.length
    }

    /// Check for a declared length of zero
    pub fn is_empty(&self) -> bool {
        self.length == Some(0)
    }

    fn manager(&self) -> Result<Arc<TypeManager>> {
        self.manager
            .upgrade()
            .ok_or_else(|| BindError::ManagerDropped(self.element.name().to_string()))
    }

    fn stride(&self) -> Result<usize> {
        if self.holds_pointers {
            return Ok(POINTER_SIZE);
        }
        match &self.element {
            TypeDescriptor::Native(native) => native
                .size()
                .ok_or_else(|| BindError::type_mismatch("fixed-size element", native.name())),
            TypeDescriptor::Custom(name) => self
                .manager()?
                .get_class(name)?
                .size()
                .ok_or_else(|| BindError::MissingSize(name.clone())),
        }
    }

    fn check(&self, index: usize) -> Result<()> {
        match self.length {
            Some(length) if index >= length => Err(BindError::IndexOutOfBounds { index, length }),
            _ => Ok(()),
        }
    }

    fn slot(&self, index: usize) -> Result<NativeAddress> {
        self.check(index)?;
        if self.base.is_null() {
            return Err(BindError::NullPointer("array storage".into()));
        }
        let offset = index
            .checked_mul(self.stride()?)
            .ok_or_else(|| BindError::out_of_range("array offset", index))?;
        Ok(self.base + offset)
    }

    /// Read element `index`
    pub fn get(&self, index: usize) -> Result<Value> {
        let slot = self.slot(index)?;
        let at = if self.holds_pointers {
            // Safety: pointer arrays hold pointer-sized slots
            unsafe { slot.get_pointer(0) }
        } else {
            slot
        };

        match &self.element {
            TypeDescriptor::Custom(_) if at.is_null() => Ok(Value::Void),
            TypeDescriptor::Custom(name) => Ok(Value::Object(self.manager()?.convert(name, at)?)),
            TypeDescriptor::Native(_) if at.is_null() => {
                Err(BindError::NullPointer(format!("array element {}", index)))
            }
            TypeDescriptor::Native(native) => Ok(codec::read(at, 0, *native)),
        }
    }

    /// Write element `index`
    ///
    /// Custom elements of pointer arrays are stored by address; every other
    /// element is written in place.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let slot = self.slot(index)?;

        match &self.element {
            TypeDescriptor::Custom(name) if self.holds_pointers => {
                let source = value
                    .as_object()
                    .ok_or_else(|| BindError::type_mismatch(name.as_str(), value.type_name()))?;
                // Safety: pointer arrays hold pointer-sized slots
                unsafe { slot.set_pointer(0, source.address()) };
                Ok(())
            }
            TypeDescriptor::Custom(name) => {
                let source = value
                    .as_object()
                    .ok_or_else(|| BindError::type_mismatch(name.as_str(), value.type_name()))?;
                if source.address().is_null() {
                    return Err(BindError::NullPointer(format!("copy from a null '{}'", name)));
                }
                let size = self.stride()?;
                // Safety: the slot and the source hold `size` bytes each
                unsafe { source.address().copy_to(slot, size) };
                Ok(())
            }
            TypeDescriptor::Native(native) => {
                let at = if self.holds_pointers {
                    // Safety: pointer arrays hold pointer-sized slots
                    unsafe { slot.get_pointer(0) }
                } else {
                    slot
                };
                if at.is_null() {
                    return Err(BindError::NullPointer(format!("array element {}", index)));
                }
                codec::write(at, 0, *native, &value)
            }
        }
    }

    /// Read every element
    pub fn to_vec(&self) -> Result<Vec<Value>> {
        let length = self.length.ok_or(BindError::UnboundedArray)?;
        (0..length).map(|index| self.get(index)).collect()
    }

    /// Write a list or another array element by element
    pub fn assign(&self, value: &Value) -> Result<()> {
        let values = match value {
            Value::List(values) => values.clone(),
            Value::Array(other) => other.to_vec()?,
            other => return Err(BindError::type_mismatch("list or array", other.type_name())),
        };
        if let Some(length) = self.length {
            if values.len() > length {
                return Err(BindError::IndexOutOfBounds {
                    index: values.len() - 1,
                    length,
                });
            }
        }
        for (index, value) in values.into_iter().enumerate() {
            self.set(index, value)?;
        }
        Ok(())
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base
            && self.element == other.element
            && self.holds_pointers == other.holds_pointers
            && self.length == other.length
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("element", &self.element.name())
            .field("holds_pointers", &self.holds_pointers)
            .field("base", &format_args!("{}", self.base))
            .field("length", &self.length)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerConfig;
    use crate::types::NativeType;

    fn view(storage: &mut [u8], element: NativeType, length: Option<usize>) -> (Arc<TypeManager>, Array) {
        let manager = TypeManager::new(ManagerConfig::default());
        let base = NativeAddress::from_ptr(storage.as_mut_ptr());
        let array = Array::new(manager.clone(), element.into(), false, base, length);
        (manager, array)
    }

    #[test]
    fn test_instance_elements() {
        let mut storage = [0u8; 16];
        let (_manager, array) = view(&mut storage, NativeType::Short, Some(4));

        array.set(2, -7).unwrap();
        assert_eq!(array.get(2).unwrap(), Value::Int(-7));
        assert_eq!(i16::from_ne_bytes([storage[4], storage[5]]), -7);
    }

    #[test]
    fn test_bounds() {
        let mut storage = [0u8; 16];
        let (_manager, array) = view(&mut storage, NativeType::Int, Some(4));

        let err = array.get(4).unwrap_err();
        assert!(matches!(err, BindError::IndexOutOfBounds { index: 4, length: 4 }));
        assert!(array.assign(&Value::from(vec![1, 2, 3, 4, 5])).is_err());
    }

    #[test]
    fn test_unbounded() {
        let mut storage = [0u8; 16];
        let (_manager, array) = view(&mut storage, NativeType::Int, None);

        array.set(3, 9).unwrap();
        assert_eq!(array.get(3).unwrap(), Value::Int(9));
        assert!(matches!(array.to_vec(), Err(BindError::UnboundedArray)));
    }

    #[test]
    fn test_pointer_elements() {
        let mut values = [1i32, 2, 3];
        let mut slots: Vec<usize> = values.iter_mut().map(|v| v as *mut i32 as usize).collect();
        let manager = TypeManager::new(ManagerConfig::default());
        let array = Array::new(
            manager.clone(),
            NativeType::Int.into(),
            true,
            NativeAddress::from_ptr(slots.as_mut_ptr()),
            Some(3),
        );

        array.set(1, 20).unwrap();
        assert_eq!(array.to_vec().unwrap(), vec![Value::Int(1), Value::Int(20), Value::Int(3)]);
        assert_eq!(values[1], 20);

        slots[2] = 0;
        assert!(matches!(array.get(2), Err(BindError::NullPointer(_))));
    }

    #[test]
    fn test_unbounded_offset_overflow() {
        let mut storage = [0u8; 16];
        let (_manager, array) = view(&mut storage, NativeType::Int, None);

        assert!(matches!(
            array.get(usize::MAX / 2),
            Err(BindError::ValueOutOfRange { native_type: "array offset", .. })
        ));
        assert!(array.set(usize::MAX / 2, 1).is_err());
    }
}

//! Raw process addresses
//!
//! `NativeAddress` is an opaque integer handle into the host process. It is
//! never owned by this crate unless it came out of [`crate::memory::alloc`].

use std::fmt;
use std::ops::{Add, Sub};

/// Size of a native pointer in bytes
pub const POINTER_SIZE: usize = std::mem::size_of::<usize>();

/// Address of a location in the host process
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeAddress(usize);

impl NativeAddress {
    /// The null address
    pub const NULL: Self = Self(0);

    /// Create an address from its integer value
    pub const fn new(value: usize) -> Self {
        Self(value)
    }

    /// Create an address from a pointer
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    /// Create an address pointing at a reference
    pub fn of<T: ?Sized>(value: &T) -> Self {
        Self(value as *const T as *const u8 as usize)
    }

    /// Integer value of the address
    pub const fn value(self) -> usize {
        self.0
    }

    /// Check if the address is null
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Reinterpret as a typed pointer
    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// Signed offset arithmetic
    pub fn offset(self, delta: isize) -> Self {
        Self(self.0.wrapping_add_signed(delta))
    }

    /// Read a value at `offset` bytes past this address
    ///
    /// # Safety
    /// `self + offset` must be valid for reads of `size_of::<T>()` bytes.
    pub unsafe fn read<T: Copy>(self, offset: usize) -> T {
        std::ptr::read_unaligned((self + offset).as_ptr::<T>())
    }

    /// Write a value at `offset` bytes past this address
    ///
    /// # Safety
    /// `self + offset` must be valid for writes of `size_of::<T>()` bytes.
    pub unsafe fn write<T: Copy>(self, offset: usize, value: T) {
        std::ptr::write_unaligned((self + offset).as_ptr::<T>(), value)
    }

    /// Dereference the pointer stored at `offset`
    ///
    /// # Safety
    /// `self + offset` must hold a readable pointer-sized cell.
    pub unsafe fn get_pointer(self, offset: usize) -> NativeAddress {
        NativeAddress(self.read::<usize>(offset))
    }

    /// Store `value` into the pointer-sized cell at `offset`
    ///
    /// # Safety
    /// `self + offset` must hold a writable pointer-sized cell.
    pub unsafe fn set_pointer(self, offset: usize, value: NativeAddress) {
        self.write::<usize>(offset, value.0)
    }

    /// Copy `len` raw bytes from this address to `dest`
    ///
    /// # Safety
    /// Both ranges must be valid for `len` bytes. They may overlap.
    pub unsafe fn copy_to(self, dest: NativeAddress, len: usize) {
        std::ptr::copy(self.as_ptr::<u8>() as *const u8, dest.as_ptr::<u8>(), len)
    }
}

impl Add<usize> for NativeAddress {
    type Output = NativeAddress;

    fn add(self, rhs: usize) -> Self::Output {
        NativeAddress(self.0.wrapping_add(rhs))
    }
}

impl Sub<NativeAddress> for NativeAddress {
    type Output = isize;

    fn sub(self, rhs: NativeAddress) -> Self::Output {
        self.0.wrapping_sub(rhs.0) as isize
    }
}

impl From<usize> for NativeAddress {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl<T> From<*const T> for NativeAddress {
    fn from(ptr: *const T) -> Self {
        Self::from_ptr(ptr)
    }
}

impl<T> From<*mut T> for NativeAddress {
    fn from(ptr: *mut T) -> Self {
        Self::from_ptr(ptr as *const T)
    }
}

impl fmt::Display for NativeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for NativeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

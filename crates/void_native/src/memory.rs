//! Native memory allocation for owning instances

use crate::address::NativeAddress;
use crate::error::{BindError, Result};
use std::alloc::{self, Layout};

/// Alignment of every allocation handed out by [`alloc`]
pub const ALLOC_ALIGN: usize = 16;

/// An owned block of native memory, released on drop
#[derive(Debug)]
pub struct Allocation {
    address: NativeAddress,
    layout: Layout,
}

// Safety: the block is plain bytes exclusively owned by this handle
unsafe impl Send for Allocation {}
unsafe impl Sync for Allocation {}

/// Allocate `size` bytes, optionally zero-initialized
pub fn alloc(size: usize, zero_init: bool) -> Result<Allocation> {
    if size == 0 {
        return Err(BindError::out_of_range("size", 0));
    }
    let layout = Layout::from_size_align(size, ALLOC_ALIGN)
        .map_err(|_| BindError::out_of_range("size", size))?;

    // Safety: layout has a non-zero size
    let ptr = unsafe {
        if zero_init {
            alloc::alloc_zeroed(layout)
        } else {
            alloc::alloc(layout)
        }
    };
    if ptr.is_null() {
        alloc::handle_alloc_error(layout);
    }

    log::trace!("Allocated {} bytes at {:p}", size, ptr);

    Ok(Allocation {
        address: NativeAddress::from_ptr(ptr),
        layout,
    })
}

impl Allocation {
    /// Address of the block
    pub fn address(&self) -> NativeAddress {
        self.address
    }

    /// Size of the block in bytes
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Give up ownership; the block is never released by this crate
    pub fn into_raw(self) -> NativeAddress {
        let address = self.address;
        std::mem::forget(self);
        address
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        log::trace!("Releasing {} bytes at {}", self.layout.size(), self.address);
        // Safety: allocated in `alloc` with this exact layout
        unsafe { alloc::dealloc(self.address.as_ptr(), self.layout) }
    }
}

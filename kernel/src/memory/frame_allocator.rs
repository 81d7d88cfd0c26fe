//! The global frame allocator.
//!
//! Physical frames come from two allocators over the kernel's lifetime:
//! the boot allocator while the kernel bootstraps itself and the bitmap
//! allocator afterwards. Whichever is current sits in `FRAME_ALLOCATOR`;
//! the switch happens exactly once, in `memory::init`. The page table
//! walker and the runtime adaptation layer borrow the installed allocator
//! through the `x86_64` `FrameAllocator` trait.

use spin::Mutex;
use x86_64::structures::paging::{FrameAllocator, FrameDeallocator, PhysFrame, Size4KiB};

use crate::error::KernelError;
use crate::memory::bitmap_frame_allocator::BitmapFrameAllocator;
use crate::memory::boot_frame_allocator::BootFrameAllocator;
use crate::memory::frame::Frame;

pub enum GlobalFrameAllocator {
    Boot(BootFrameAllocator),
    Bitmap(BitmapFrameAllocator),
}

pub static FRAME_ALLOCATOR: Mutex<Option<GlobalFrameAllocator>> = Mutex::new(None);

/// Reserves a frame from whichever allocator is currently installed.
pub fn alloc_frame() -> Result<Frame, &'static KernelError> {
    match FRAME_ALLOCATOR
        .lock()
        .as_mut()
        .expect("global frame allocator not initialized")
    {
        GlobalFrameAllocator::Boot(alloc) => alloc.alloc_frame(),
        GlobalFrameAllocator::Bitmap(alloc) => alloc.alloc_frame(),
    }
}

/// Releases a previously allocated frame.
pub fn free_frame(frame: Frame) -> Result<(), &'static KernelError> {
    match FRAME_ALLOCATOR
        .lock()
        .as_mut()
        .expect("global frame allocator not initialized")
    {
        GlobalFrameAllocator::Boot(_) => {
            panic!("cannot free frames while the boot allocator is active")
        }
        GlobalFrameAllocator::Bitmap(alloc) => alloc.free_frame(frame),
    }
}

/// Frees `frame`, reporting rather than propagating failure. Meant for
/// release paths that have nothing useful to do with the error.
pub fn dealloc_frame(frame: Frame) {
    if let Err(err) = free_frame(frame) {
        log::error!("failed to free frame {:#x}: {}", frame.number(), err);
    }
}

unsafe impl FrameAllocator<Size4KiB> for GlobalFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame> {
        match self {
            GlobalFrameAllocator::Boot(alloc) => alloc.allocate_frame(),
            GlobalFrameAllocator::Bitmap(alloc) => alloc.allocate_frame(),
        }
    }
}

impl FrameDeallocator<Size4KiB> for GlobalFrameAllocator {
    unsafe fn deallocate_frame(&mut self, frame: PhysFrame<Size4KiB>) {
        match self {
            GlobalFrameAllocator::Boot(alloc) => alloc.deallocate_frame(frame),
            GlobalFrameAllocator::Bitmap(alloc) => alloc.deallocate_frame(frame),
        }
    }
}

//! The kernel heap.
//!
//! Backed by the Talc allocator. Every byte of heap memory travels through
//! the runtime adaptation layer: the initial claim and each on-demand
//! extension are `sys_alloc` regions, so the frame allocator and the
//! virtual memory manager account for all of it.

use core::alloc::Layout;

use spin::Mutex;
use talc::{OomHandler, Span, Talc, Talck};

use crate::constants::memory::{HEAP_EXTEND_SIZE, HEAP_INITIAL_SIZE};
use crate::error::KernelError;
use crate::memory::frame::round_to_pages;
use crate::runtime;

static ERR_HEAP_EXHAUSTED: KernelError = KernelError {
    module: "heap",
    message: "out of memory",
};

/// Bytes mapped for the heap so far.
static HEAP_MAPPED: Mutex<u64> = Mutex::new(0);

/// Grows the heap arena when an allocation does not fit.
struct ExtendOnOom;

impl OomHandler for ExtendOnOom {
    fn handle_oom(talc: &mut Talc<Self>, layout: Layout) -> Result<(), ()> {
        let bytes = round_to_pages((layout.size() as u64).max(HEAP_EXTEND_SIZE));
        let mut mapped = HEAP_MAPPED.lock();
        let start = runtime::sys_alloc(bytes, &mut mapped).ok_or(())?;
        unsafe { talc.claim(Span::from_base_size(start.as_mut_ptr(), bytes as usize)) }
            .map(|_| ())
            .map_err(|_| ())
    }
}

// Only the freestanding kernel routes its allocations through Talc; host
// test builds keep their native allocator.
#[cfg_attr(target_os = "none", global_allocator)]
static ALLOCATOR: Talck<spin::Mutex<()>, ExtendOnOom> = Talc::new(ExtendOnOom).lock();

/// Claims the initial heap span. Requires the bitmap frame allocator and
/// the virtual memory manager; heap allocation works from here on.
pub fn init() -> Result<(), &'static KernelError> {
    let start = {
        let mut mapped = HEAP_MAPPED.lock();
        runtime::sys_alloc(HEAP_INITIAL_SIZE, &mut mapped).ok_or(&ERR_HEAP_EXHAUSTED)?
    };

    unsafe {
        ALLOCATOR
            .lock()
            .claim(Span::from_base_size(
                start.as_mut_ptr(),
                HEAP_INITIAL_SIZE as usize,
            ))
            .map_err(|_| &ERR_HEAP_EXHAUSTED)?;
    }

    Ok(())
}

/// Total bytes currently mapped for the heap.
pub fn mapped_bytes() -> u64 {
    *HEAP_MAPPED.lock()
}

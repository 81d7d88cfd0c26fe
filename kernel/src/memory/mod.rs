//! Memory management.
//!
//! `init` brings the subsystem up in a fixed order: the boot frame
//! allocator first, then the virtual memory manager (which draws its
//! setup frames from it), then the bitmap allocator, which takes over
//! every frame handed out so far and becomes the global allocator.

pub mod bitmap_frame_allocator;
pub mod boot_frame_allocator;
pub mod frame;
pub mod frame_allocator;
pub mod heap;
pub mod paging;
pub mod tlb;

use bitmap_frame_allocator::BitmapFrameAllocator;
use boot_frame_allocator::BootFrameAllocator;
use frame_allocator::{GlobalFrameAllocator, FRAME_ALLOCATOR};

use crate::multiboot;

/// Brings up physical and virtual memory management. Runs once, on the
/// bootstrap CPU, before anything may allocate.
pub fn init(kernel_start: u64, kernel_end: u64, kernel_page_offset: u64) {
    let regions = multiboot::memory_regions();

    let boot = BootFrameAllocator::new(regions, kernel_start, kernel_end);
    boot.log_memory_map();
    *FRAME_ALLOCATOR.lock() = Some(GlobalFrameAllocator::Boot(boot));

    unsafe {
        paging::init(
            kernel_page_offset,
            FRAME_ALLOCATOR
                .lock()
                .as_mut()
                .expect("global frame allocator not initialized"),
        )
    }
    .expect("virtual memory manager init failed");

    // The bitmap allocator replays the boot allocator's history, so take
    // it out of the global slot for the handoff.
    let mut boot = match FRAME_ALLOCATOR.lock().take() {
        Some(GlobalFrameAllocator::Boot(boot)) => boot,
        _ => panic!("boot frame allocator must be active for the handoff"),
    };

    let bitmap = {
        let mut space = paging::KERNEL_SPACE.lock();
        let space = space
            .as_mut()
            .expect("virtual memory manager not initialized");
        BitmapFrameAllocator::init(regions, &mut boot, space)
            .expect("bitmap frame allocator init failed")
    };
    bitmap.log_stats();

    *FRAME_ALLOCATOR.lock() = Some(GlobalFrameAllocator::Bitmap(bitmap));
}

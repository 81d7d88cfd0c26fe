//! Boot-time physical frame allocator.
//!
//! A rudimentary allocator that carries the kernel through its own
//! bootstrap. It walks the memory regions reported by the bootloader and
//! hands out the next unused frame, stepping around the frames occupied by
//! the kernel image. Nothing can be freed; once the bitmap allocator is
//! online it replays this allocator's history to take over its frames and
//! the boot allocator is retired.

use x86_64::structures::paging::{FrameAllocator, FrameDeallocator, PhysFrame, Size4KiB};

use crate::constants::memory::{PAGE_SHIFT, PAGE_SIZE};
use crate::error::KernelError;
use crate::memory::frame::Frame;
use crate::multiboot::{MemoryRegion, RegionType};

static ERR_OUT_OF_MEMORY: KernelError = KernelError {
    module: "boot_mem_alloc",
    message: "out of memory",
};

pub struct BootFrameAllocator {
    regions: &'static [MemoryRegion],

    /// Total number of frames handed out so far.
    alloc_count: u64,

    /// The frame returned by the most recent allocation. Together with the
    /// memory map this is the allocator's entire state: the next frame is
    /// always derived from it, which is what makes replaying the
    /// allocation sequence possible.
    last_alloc_frame: Frame,

    kernel_start_addr: u64,
    kernel_end_addr: u64,
    kernel_start_frame: Frame,
    /// First frame at or past the kernel image once its end address is
    /// rounded up to a page boundary.
    kernel_end_frame: Frame,
}

impl BootFrameAllocator {
    pub fn new(regions: &'static [MemoryRegion], kernel_start: u64, kernel_end: u64) -> Self {
        BootFrameAllocator {
            regions,
            alloc_count: 0,
            last_alloc_frame: Frame(0),
            kernel_start_addr: kernel_start,
            kernel_end_addr: kernel_end,
            kernel_start_frame: Frame(kernel_start >> PAGE_SHIFT),
            kernel_end_frame: Frame((kernel_end + PAGE_SIZE - 1) >> PAGE_SHIFT),
        }
    }

    /// Reserves the next available frame.
    ///
    /// Regions are visited in the bootloader's order. Within a region the
    /// candidate frame is the successor of the last allocation (or the
    /// region's first frame when entering it); a candidate about to land
    /// on the kernel image jumps to the frame after `kernel_end_frame`
    /// instead. A candidate pushed past the region end moves on to the
    /// next region.
    pub fn alloc_frame(&mut self) -> Result<Frame, &'static KernelError> {
        for region in self.regions {
            if region.kind != RegionType::Available || region.length < PAGE_SIZE {
                continue;
            }
            let Some((region_start, region_end)) = region.frame_span() else {
                continue;
            };

            let mut next = if self.alloc_count == 0 || self.last_alloc_frame < region_start {
                region_start
            } else {
                self.last_alloc_frame + 1
            };

            if next == self.kernel_start_frame {
                next = self.kernel_end_frame + 1;
            }

            if next >= region_end {
                continue;
            }

            self.alloc_count += 1;
            self.last_alloc_frame = next;
            return Ok(next);
        }

        Err(&ERR_OUT_OF_MEMORY)
    }

    /// Forgets every allocation so the sequence can be replayed from the
    /// start. Only the bitmap allocator handoff may do this; any frame
    /// handed out between a snapshot of `alloc_count` and the replay would
    /// silently leak.
    pub(crate) fn reset(&mut self) {
        self.alloc_count = 0;
        self.last_alloc_frame = Frame(0);
    }

    pub fn alloc_count(&self) -> u64 {
        self.alloc_count
    }

    /// First and last frame of the kernel image, both inclusive.
    pub fn kernel_frame_span(&self) -> (Frame, Frame) {
        (self.kernel_start_frame, Frame(self.kernel_end_frame.0 - 1))
    }

    /// Logs the bootloader memory map together with the kernel placement.
    pub fn log_memory_map(&self) {
        log::info!("system memory map:");
        let mut total_free = 0u64;
        for region in self.regions {
            log::info!(
                "  [{:#014x} - {:#014x}] size: {:>10} type: {}",
                region.phys_address,
                region.phys_address + region.length,
                region.length,
                region.kind.name()
            );
            if region.kind == RegionType::Available {
                total_free += region.length;
            }
        }
        log::info!("available memory: {} KiB", total_free / 1024);
        log::info!(
            "kernel loaded at {:#x} - {:#x}: {} bytes, {} reserved frames",
            self.kernel_start_addr,
            self.kernel_end_addr,
            self.kernel_end_addr - self.kernel_start_addr,
            self.kernel_end_frame.0 - self.kernel_start_frame.0
        );
    }
}

unsafe impl FrameAllocator<Size4KiB> for BootFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame> {
        self.alloc_frame()
            .ok()
            .map(|frame| PhysFrame::containing_address(frame.address()))
    }
}

impl FrameDeallocator<Size4KiB> for BootFrameAllocator {
    unsafe fn deallocate_frame(&mut self, _frame: PhysFrame<Size4KiB>) {
        panic!("cannot free frames while the boot allocator is active")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::testing::{available, leak_regions, reserved};

    fn collect(alloc: &mut BootFrameAllocator, count: usize) -> Vec<Frame> {
        (0..count).map(|_| alloc.alloc_frame().unwrap()).collect()
    }

    #[test]
    fn skips_kernel_and_trailing_guard_frame() {
        // One usable region with the kernel image one page into it.
        let regions = leak_regions(vec![available(0x0, 0x200000)]);
        let mut alloc = BootFrameAllocator::new(regions, 0x100000, 0x101000);

        let frames = collect(&mut alloc, 0x102);
        for (index, frame) in frames.iter().take(0x100).enumerate() {
            assert_eq!(*frame, Frame(index as u64));
        }
        // 0x100 holds the kernel, 0x101 is the frame its rounded-up end
        // points at; both are skipped.
        assert_eq!(frames[0x100], Frame(0x102));
        assert_eq!(frames[0x101], Frame(0x103));
    }

    #[test]
    fn never_enters_a_reserved_gap() {
        let regions = leak_regions(vec![
            available(0x0, 0x100000),
            reserved(0x100000, 0x100000),
            available(0x200000, 0x100000),
        ]);
        let mut alloc = BootFrameAllocator::new(regions, 0x100000, 0x200000);

        let frames = collect(&mut alloc, 0x200);
        for (index, frame) in frames.iter().take(0x100).enumerate() {
            assert_eq!(*frame, Frame(index as u64));
        }
        for (index, frame) in frames.iter().skip(0x100).enumerate() {
            assert_eq!(*frame, Frame(0x200 + index as u64));
        }

        // Both regions are exhausted now.
        assert!(alloc.alloc_frame().is_err());
    }

    #[test]
    fn jumps_over_kernel_at_region_start() {
        let regions = leak_regions(vec![available(0x100000, 0x200000)]);
        let mut alloc = BootFrameAllocator::new(regions, 0x100000, 0x101000);

        assert_eq!(alloc.alloc_frame().unwrap(), Frame(0x102));
        assert_eq!(alloc.alloc_frame().unwrap(), Frame(0x103));
    }

    #[test]
    fn rounds_unaligned_regions_inward() {
        let regions = leak_regions(vec![available(0x1234, 0x5000)]);
        let mut alloc = BootFrameAllocator::new(regions, 0x100000, 0x101000);

        // 0x1234..0x6234 covers whole frames 2..=5.
        assert_eq!(collect(&mut alloc, 4), vec![Frame(2), Frame(3), Frame(4), Frame(5)]);
        assert!(alloc.alloc_frame().is_err());
    }

    #[test]
    fn ignores_subpage_regions() {
        let regions = leak_regions(vec![available(0x1000, 0xFFF), available(0x10000, 0x2000)]);
        let mut alloc = BootFrameAllocator::new(regions, 0x100000, 0x101000);

        assert_eq!(collect(&mut alloc, 2), vec![Frame(0x10), Frame(0x11)]);
        assert!(alloc.alloc_frame().is_err());
    }

    #[test]
    fn fails_when_no_region_is_usable() {
        let regions = leak_regions(vec![reserved(0x0, 0x100000)]);
        let mut alloc = BootFrameAllocator::new(regions, 0x100000, 0x101000);
        assert!(alloc.alloc_frame().is_err());
    }

    #[test]
    fn allocations_are_distinct_increasing_and_outside_the_kernel() {
        let regions = leak_regions(vec![
            available(0x0, 0x80000),
            available(0x100000, 0x100000),
        ]);
        let mut alloc = BootFrameAllocator::new(regions, 0x140000, 0x142000);
        let (kernel_first, kernel_last) = alloc.kernel_frame_span();

        let mut previous: Option<Frame> = None;
        while let Ok(frame) = alloc.alloc_frame() {
            if let Some(previous) = previous {
                assert!(frame > previous);
            }
            assert!(frame < kernel_first || frame > kernel_last);
            let in_region = regions.iter().any(|region| {
                let (start, end) = region.frame_span().unwrap();
                frame >= start && frame < end
            });
            assert!(in_region);
            previous = Some(frame);
        }
    }

    #[test]
    fn replay_reproduces_the_original_sequence() {
        let regions = leak_regions(vec![
            available(0x0, 0x100000),
            reserved(0x100000, 0x100000),
            available(0x200000, 0x100000),
        ]);
        let mut alloc = BootFrameAllocator::new(regions, 0x100000, 0x200000);

        let first_run = collect(&mut alloc, 0x180);
        let count = alloc.alloc_count();
        alloc.reset();
        let second_run = collect(&mut alloc, count as usize);

        assert_eq!(first_run, second_run);
    }

    #[test]
    fn kernel_frame_span_is_inclusive() {
        let regions = leak_regions(vec![available(0x0, 0x200000)]);
        let alloc = BootFrameAllocator::new(regions, 0x100000, 0x101000);
        assert_eq!(alloc.kernel_frame_span(), (Frame(0x100), Frame(0x100)));

        let alloc = BootFrameAllocator::new(regions, 0x100000, 0x101800);
        assert_eq!(alloc.kernel_frame_span(), (Frame(0x100), Frame(0x101)));
    }
}

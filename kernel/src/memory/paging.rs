//! Virtual memory management.
//!
//! Owns the active 4-level page table: mapping, unmapping and translating
//! single pages, reserving stretches of virtual address space before any
//! backing exists, and the shared zeroed frame that fresh copy-on-write
//! mappings resolve to.

use spin::Mutex;
use x86_64::registers::control::Cr3;
use x86_64::structures::paging::page_table::PageTableEntry;
use x86_64::structures::paging::{FrameAllocator, PageTable, PageTableFlags, Size4KiB};
use x86_64::VirtAddr;

use crate::constants::memory::{EARLY_RESERVE_BASE, EARLY_RESERVE_END, PAGE_SIZE};
use crate::error::KernelError;
use crate::memory::frame::{round_to_pages, Frame, Page};
use crate::memory::tlb;

/// Marks a mapping as copy-on-write. The bit is ignored by the MMU and
/// available to the OS; the fault path uses it to tell a shared read-only
/// mapping from a genuine protection violation.
pub const FLAG_COPY_ON_WRITE: PageTableFlags = PageTableFlags::BIT_9;

static ERR_OUT_OF_MEMORY: KernelError = KernelError {
    module: "vmm",
    message: "out of memory",
};
static ERR_NO_ADDRESS_SPACE: KernelError = KernelError {
    module: "vmm",
    message: "no address space",
};
static ERR_MAP_EXISTS: KernelError = KernelError {
    module: "vmm",
    message: "map exists",
};
static ERR_UNMAPPED: KernelError = KernelError {
    module: "vmm",
    message: "unmapped",
};
static ERR_MISALIGNED: KernelError = KernelError {
    module: "vmm",
    message: "misaligned",
};

/// The kernel's address space, installed by `init`.
pub static KERNEL_SPACE: Mutex<Option<AddressSpace>> = Mutex::new(None);

/// The mapping and reservation operations the bitmap allocator and the
/// runtime adaptation layer need while the kernel is still assembling
/// itself. Implemented by [`AddressSpace`]; tests substitute a host-backed
/// arena.
pub trait BootstrapMemory {
    fn early_reserve_region(&mut self, size: u64) -> Result<VirtAddr, &'static KernelError>;

    fn map_to<A: FrameAllocator<Size4KiB>>(
        &mut self,
        page: Page,
        frame: Frame,
        flags: PageTableFlags,
        frames: &mut A,
    ) -> Result<(), &'static KernelError>;
}

#[derive(Debug)]
pub struct AddressSpace {
    /// Frame holding the level 4 table.
    root: Frame,
    /// Where physical memory is visible in this address space. Page table
    /// frames are read and written through it.
    phys_offset: VirtAddr,
    /// Bump cursor over the reservation arena.
    reserve_next: VirtAddr,
    reserve_end: VirtAddr,
    zeroed_frame: Frame,
}

impl AddressSpace {
    pub fn new(root: Frame, phys_offset: VirtAddr) -> Result<AddressSpace, &'static KernelError> {
        if !phys_offset.is_aligned(PAGE_SIZE) {
            return Err(&ERR_MISALIGNED);
        }
        Ok(AddressSpace {
            root,
            phys_offset,
            reserve_next: VirtAddr::new(EARLY_RESERVE_BASE),
            reserve_end: VirtAddr::new(EARLY_RESERVE_END),
            zeroed_frame: Frame::INVALID,
        })
    }

    /// Allocates and clears the shared frame backing fresh copy-on-write
    /// mappings. The frame is only ever mapped read-only, so its contents
    /// stay zero for the life of the kernel.
    pub fn init_zeroed_frame(
        &mut self,
        frames: &mut impl FrameAllocator<Size4KiB>,
    ) -> Result<(), &'static KernelError> {
        let phys = frames.allocate_frame().ok_or(&ERR_OUT_OF_MEMORY)?;
        let frame = Frame::containing(phys.start_address());
        unsafe { core::ptr::write_bytes(self.frame_ptr(frame), 0, PAGE_SIZE as usize) };
        self.zeroed_frame = frame;
        Ok(())
    }

    pub fn zeroed_frame(&self) -> Frame {
        self.zeroed_frame
    }

    fn frame_ptr(&self, frame: Frame) -> *mut u8 {
        (self.phys_offset + frame.address().as_u64()).as_mut_ptr()
    }

    fn table_ptr(&self, frame: Frame) -> *mut PageTable {
        self.frame_ptr(frame) as *mut PageTable
    }

    /// Walks down to the level 1 entry for `page`, allocating and zeroing
    /// intermediate tables as needed.
    fn walk_create(
        &mut self,
        page: Page,
        frames: &mut impl FrameAllocator<Size4KiB>,
    ) -> Result<*mut PageTableEntry, &'static KernelError> {
        let addr = page.address();
        let mut table = self.table_ptr(self.root);

        for index in [addr.p4_index(), addr.p3_index(), addr.p2_index()] {
            let entry = unsafe { &mut (&mut *table)[index] };
            if entry.is_unused() {
                let phys = frames.allocate_frame().ok_or(&ERR_OUT_OF_MEMORY)?;
                let frame = Frame::containing(phys.start_address());
                unsafe { (*self.table_ptr(frame)).zero() };
                entry.set_addr(
                    frame.address(),
                    PageTableFlags::PRESENT | PageTableFlags::WRITABLE,
                );
            } else if entry.flags().contains(PageTableFlags::HUGE_PAGE) {
                // A large mapping already covers this range.
                return Err(&ERR_MAP_EXISTS);
            }
            table = self.table_ptr(Frame::containing(entry.addr()));
        }

        Ok(unsafe { &mut (&mut *table)[addr.p1_index()] as *mut PageTableEntry })
    }

    /// Walks down to the level 1 entry for `page` without modifying the
    /// tables. `None` when an intermediate table is missing.
    fn walk(&self, page: Page) -> Option<*mut PageTableEntry> {
        let addr = page.address();
        let mut table = self.table_ptr(self.root);

        for index in [addr.p4_index(), addr.p3_index(), addr.p2_index()] {
            let entry = unsafe { &(&*table)[index] };
            if !entry.flags().contains(PageTableFlags::PRESENT)
                || entry.flags().contains(PageTableFlags::HUGE_PAGE)
            {
                return None;
            }
            table = self.table_ptr(Frame::containing(entry.addr()));
        }

        Some(unsafe { &mut (&mut *table)[addr.p1_index()] as *mut PageTableEntry })
    }

    /// Points `page` at `frame`. An existing mapping is only replaced when
    /// it is a copy-on-write template; anything else is a caller bug.
    pub fn map_with(
        &mut self,
        page: Page,
        frame: Frame,
        flags: PageTableFlags,
        frames: &mut impl FrameAllocator<Size4KiB>,
    ) -> Result<(), &'static KernelError> {
        let entry = self.walk_create(page, frames)?;
        let entry = unsafe { &mut *entry };

        if entry.flags().contains(PageTableFlags::PRESENT)
            && !entry.flags().contains(FLAG_COPY_ON_WRITE)
        {
            return Err(&ERR_MAP_EXISTS);
        }

        entry.set_addr(frame.address(), flags);
        tlb::flush(page.address());
        Ok(())
    }

    /// Removes the mapping for `page`, returning the frame it pointed at.
    pub fn unmap(&mut self, page: Page) -> Result<Frame, &'static KernelError> {
        let entry = self.walk(page).ok_or(&ERR_UNMAPPED)?;
        let entry = unsafe { &mut *entry };

        if !entry.flags().contains(PageTableFlags::PRESENT) {
            return Err(&ERR_UNMAPPED);
        }

        let frame = Frame::containing(entry.addr());
        entry.set_unused();
        tlb::flush(page.address());
        Ok(frame)
    }

    /// Looks up the frame and flags `page` currently maps to.
    pub fn translate(&self, page: Page) -> Result<(Frame, PageTableFlags), &'static KernelError> {
        let entry = self.walk(page).ok_or(&ERR_UNMAPPED)?;
        let entry = unsafe { &*entry };

        if !entry.flags().contains(PageTableFlags::PRESENT) {
            return Err(&ERR_UNMAPPED);
        }

        Ok((Frame::containing(entry.addr()), entry.flags()))
    }

    /// Hands out a page-aligned stretch of virtual address space from the
    /// reservation arena. Nothing is mapped; callers must map every page
    /// before touching it. The cursor only ever advances, so reservations
    /// never overlap.
    pub fn early_reserve_region(&mut self, size: u64) -> Result<VirtAddr, &'static KernelError> {
        let size = round_to_pages(size);
        let start = self.reserve_next;
        if size > self.reserve_end - start {
            return Err(&ERR_NO_ADDRESS_SPACE);
        }
        self.reserve_next = start + size;
        Ok(start)
    }
}

impl BootstrapMemory for AddressSpace {
    fn early_reserve_region(&mut self, size: u64) -> Result<VirtAddr, &'static KernelError> {
        AddressSpace::early_reserve_region(self, size)
    }

    fn map_to<A: FrameAllocator<Size4KiB>>(
        &mut self,
        page: Page,
        frame: Frame,
        flags: PageTableFlags,
        frames: &mut A,
    ) -> Result<(), &'static KernelError> {
        self.map_with(page, frame, flags, frames)
    }
}

/// Adopts the page table root installed by the boot stubs and sets up the
/// zeroed frame. The kernel address space is usable afterwards.
///
/// # Safety
///
/// Paging must be live with physical memory visible at
/// `kernel_page_offset`, and `frames` must hand out frames that are
/// themselves reachable through that window.
pub unsafe fn init(
    kernel_page_offset: u64,
    frames: &mut impl FrameAllocator<Size4KiB>,
) -> Result<(), &'static KernelError> {
    let (root, _) = Cr3::read();
    let mut space = AddressSpace::new(
        Frame::containing(root.start_address()),
        VirtAddr::new(kernel_page_offset),
    )?;
    space.init_zeroed_frame(frames)?;
    *KERNEL_SPACE.lock() = Some(space);
    Ok(())
}

fn with_kernel_space<T>(f: impl FnOnce(&mut AddressSpace) -> T) -> T {
    let mut guard = KERNEL_SPACE.lock();
    f(guard
        .as_mut()
        .expect("virtual memory manager not initialized"))
}

/// Reserves address space in the kernel address space.
pub fn early_reserve_region(size: u64) -> Result<VirtAddr, &'static KernelError> {
    with_kernel_space(|space| space.early_reserve_region(size))
}

/// The shared frame backing fresh copy-on-write mappings.
pub fn reserved_zeroed_frame() -> Frame {
    with_kernel_space(|space| space.zeroed_frame())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::testing::TestFrames;

    fn test_space(frames: &mut TestFrames) -> AddressSpace {
        let root = frames.alloc_frame();
        unsafe { (*(root.address().as_u64() as *mut PageTable)).zero() };
        AddressSpace::new(root, VirtAddr::new(0)).unwrap()
    }

    #[test]
    fn rejects_unaligned_physical_offset() {
        let err = AddressSpace::new(Frame(0), VirtAddr::new(0x800)).unwrap_err();
        assert!(core::ptr::eq(err, &ERR_MISALIGNED));
    }

    #[test]
    fn map_then_translate() {
        let mut frames = TestFrames::new();
        let mut space = test_space(&mut frames);
        let page = Page::containing(VirtAddr::new(0x4000_0000));
        let target = frames.alloc_frame();
        let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;

        space.map_with(page, target, flags, &mut frames).unwrap();

        let (frame, seen) = space.translate(page).unwrap();
        assert_eq!(frame, target);
        assert_eq!(seen, flags);
    }

    #[test]
    fn mapping_twice_fails() {
        let mut frames = TestFrames::new();
        let mut space = test_space(&mut frames);
        let page = Page::containing(VirtAddr::new(0x4000_0000));
        let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;

        let frame = frames.alloc_frame();
        space.map_with(page, frame, flags, &mut frames).unwrap();

        let other = frames.alloc_frame();
        let err = space.map_with(page, other, flags, &mut frames).unwrap_err();
        assert!(core::ptr::eq(err, &ERR_MAP_EXISTS));
    }

    #[test]
    fn copy_on_write_templates_may_be_replaced() {
        let mut frames = TestFrames::new();
        let mut space = test_space(&mut frames);
        space.init_zeroed_frame(&mut frames).unwrap();
        let page = Page::containing(VirtAddr::new(0x4000_0000));

        let template =
            PageTableFlags::PRESENT | PageTableFlags::NO_EXECUTE | FLAG_COPY_ON_WRITE;
        space
            .map_with(page, space.zeroed_frame(), template, &mut frames)
            .unwrap();

        // The write fault path swaps in a private read-write copy.
        let private = frames.alloc_frame();
        let flags =
            PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::NO_EXECUTE;
        space.map_with(page, private, flags, &mut frames).unwrap();

        let (frame, seen) = space.translate(page).unwrap();
        assert_eq!(frame, private);
        assert_eq!(seen, flags);

        // No longer a template, so a further remap is refused.
        let err = space
            .map_with(page, private, flags, &mut frames)
            .unwrap_err();
        assert!(core::ptr::eq(err, &ERR_MAP_EXISTS));
    }

    #[test]
    fn unmap_returns_the_frame() {
        let mut frames = TestFrames::new();
        let mut space = test_space(&mut frames);
        let page = Page::containing(VirtAddr::new(0x4000_0000));
        let target = frames.alloc_frame();
        let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;

        space.map_with(page, target, flags, &mut frames).unwrap();
        assert_eq!(space.unmap(page).unwrap(), target);

        let err = space.translate(page).unwrap_err();
        assert!(core::ptr::eq(err, &ERR_UNMAPPED));
        let err = space.unmap(page).unwrap_err();
        assert!(core::ptr::eq(err, &ERR_UNMAPPED));
    }

    #[test]
    fn translate_without_tables_fails() {
        let mut frames = TestFrames::new();
        let space = test_space(&mut frames);
        let err = space
            .translate(Page::containing(VirtAddr::new(0x7000_0000)))
            .unwrap_err();
        assert!(core::ptr::eq(err, &ERR_UNMAPPED));
    }

    #[test]
    fn intermediate_tables_are_allocated_once() {
        let mut frames = TestFrames::new();
        let mut space = test_space(&mut frames);
        let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;

        let page = Page::containing(VirtAddr::new(0x4000_0000));
        let first = frames.alloc_frame();
        let before = frames.handed_out.len();
        space.map_with(page, first, flags, &mut frames).unwrap();
        // One table per intermediate level.
        assert_eq!(frames.handed_out.len(), before + 3);

        let second = frames.alloc_frame();
        let before = frames.handed_out.len();
        space.map_with(page + 1, second, flags, &mut frames).unwrap();
        assert_eq!(frames.handed_out.len(), before);
    }

    #[test]
    fn early_reserve_returns_aligned_disjoint_ranges() {
        let mut frames = TestFrames::new();
        let mut space = test_space(&mut frames);

        let first = space.early_reserve_region(0x1800).unwrap();
        let second = space.early_reserve_region(0x1000).unwrap();
        let third = space.early_reserve_region(1).unwrap();

        assert!(first.is_aligned(PAGE_SIZE));
        assert_eq!(second, first + 0x2000u64);
        assert_eq!(third, second + 0x1000u64);
    }

    #[test]
    fn early_reserve_exhaustion() {
        let mut frames = TestFrames::new();
        let mut space = test_space(&mut frames);

        let arena = EARLY_RESERVE_END - EARLY_RESERVE_BASE;
        let err = space.early_reserve_region(arena + PAGE_SIZE).unwrap_err();
        assert!(core::ptr::eq(err, &ERR_NO_ADDRESS_SPACE));

        // A failed reservation must not advance the cursor.
        let next = space.early_reserve_region(PAGE_SIZE).unwrap();
        assert_eq!(next, VirtAddr::new(EARLY_RESERVE_BASE));
    }

    #[test]
    fn zeroed_frame_is_zero_filled() {
        let mut frames = TestFrames::new();
        let mut space = test_space(&mut frames);
        space.init_zeroed_frame(&mut frames).unwrap();

        let frame = space.zeroed_frame();
        assert_ne!(frame, Frame::INVALID);
        let bytes = unsafe {
            core::slice::from_raw_parts(frame.address().as_u64() as *const u8, PAGE_SIZE as usize)
        };
        assert!(bytes.iter().all(|&byte| byte == 0));
    }
}

/// Size of a physical frame and of a virtual page, in bytes.
pub const PAGE_SIZE: u64 = 4096;
/// log2 of `PAGE_SIZE`; shift between addresses and frame/page numbers.
pub const PAGE_SHIFT: u64 = 12;

/// Virtual base of the higher-half kernel mapping established by the boot
/// stubs before they jump to `kmain`.
pub const KERNEL_PAGE_OFFSET: u64 = 0xFFFF_8000_0000_0000;

/// Upper bound on memory map entries retained from the bootloader. Also
/// bounds the number of frame pools the bitmap allocator manages.
pub const MAX_MEMORY_REGIONS: usize = 32;

/// Virtual arena that early region reservations are carved from. Lives in
/// its own part of the upper canonical half, away from the kernel image
/// and the physical mapping window.
pub const EARLY_RESERVE_BASE: u64 = 0xFFFF_8080_0000_0000;
pub const EARLY_RESERVE_END: u64 = 0xFFFF_8100_0000_0000;

/// Initial kernel heap claim and the step the heap grows by on demand.
pub const HEAP_INITIAL_SIZE: u64 = 1024 * 1024;
pub const HEAP_EXTEND_SIZE: u64 = 256 * 1024;

/// Bits per block of a frame pool's free bitmap.
pub const BITMAP_ENTRY_BITS: u64 = 64;
/// A bitmap block with every frame reserved.
pub const FULL_BITMAP_ENTRY: u64 = u64::MAX;

/// Physical address of the VGA text buffer used by the panic path.
pub const VGA_TEXT_BUFFER: u64 = 0xB8000;

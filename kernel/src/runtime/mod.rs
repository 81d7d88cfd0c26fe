//! Host adaptation layer.
//!
//! The services a hosted runtime normally gets from its operating system —
//! address-space reservation, demand-zero mappings, eagerly backed
//! allocation, a monotonic clock, random bytes — provided by the kernel
//! itself. The kernel heap draws all of its memory from here, and payloads
//! with their own memory layer are diverted into these entry points via
//! the redirect table.

pub mod redirect;

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::Mutex;
use x86_64::structures::paging::{FrameAllocator, PageTableFlags, Size4KiB};
use x86_64::VirtAddr;

use crate::constants::memory::PAGE_SIZE;
use crate::memory::frame::{round_to_pages, Frame, Page};
use crate::memory::frame_allocator::FRAME_ALLOCATOR;
use crate::memory::heap;
use crate::memory::paging::{self, BootstrapMemory, FLAG_COPY_ON_WRITE};

/// Seed for the boot-time pseudo-random generator. There is no entropy
/// source this early; consumers get a deterministic stream.
const PRNG_SEED: i64 = 0x0bad_c0de;
const PRNG_MUL: i64 = 58321;
const PRNG_INC: i64 = 11113;

static RANDOM_STATE: Mutex<i64> = Mutex::new(PRNG_SEED);
static CPU_COUNT: AtomicU32 = AtomicU32::new(0);
static RUNTIME_READY: AtomicBool = AtomicBool::new(false);

/// Reserves address space without allocating frames or touching the page
/// tables. Bootstrap cannot continue without address space, so failure is
/// fatal.
pub fn sys_reserve(size: u64) -> VirtAddr {
    paging::early_reserve_region(round_to_pages(size))
        .expect("address space exhausted during bootstrap")
}

/// Backs `[virt, virt + size)` with copy-on-write mappings of the shared
/// zeroed frame. The range must lie inside a reservation obtained from
/// `sys_reserve`; reads see zeroes, the first write to a page faults and
/// gets a private copy. Returns the page-rounded start, or `None` when a
/// mapping cannot be established.
pub fn sys_map(virt: VirtAddr, size: u64, sys_stat: &mut u64) -> Option<VirtAddr> {
    let mut guard = paging::KERNEL_SPACE.lock();
    let space = guard
        .as_mut()
        .expect("virtual memory manager not initialized");
    let zeroed = space.zeroed_frame();
    map_reserved(
        space,
        FRAME_ALLOCATOR
            .lock()
            .as_mut()
            .expect("global frame allocator not initialized"),
        zeroed,
        virt,
        size,
        sys_stat,
    )
}

/// Reserves a region and eagerly backs every page with its own zeroed
/// frame, mapped read-write. Returns `None` when memory runs out.
pub fn sys_alloc(size: u64, sys_stat: &mut u64) -> Option<VirtAddr> {
    let mut guard = paging::KERNEL_SPACE.lock();
    let space = guard
        .as_mut()
        .expect("virtual memory manager not initialized");
    alloc_backed(
        space,
        FRAME_ALLOCATOR
            .lock()
            .as_mut()
            .expect("global frame allocator not initialized"),
        size,
        sys_stat,
    )
}

fn map_reserved(
    mem: &mut impl BootstrapMemory,
    frames: &mut impl FrameAllocator<Size4KiB>,
    zeroed: Frame,
    virt: VirtAddr,
    size: u64,
    sys_stat: &mut u64,
) -> Option<VirtAddr> {
    let start = VirtAddr::new(round_to_pages(virt.as_u64()));
    let size = round_to_pages(size);
    let flags = PageTableFlags::PRESENT | PageTableFlags::NO_EXECUTE | FLAG_COPY_ON_WRITE;

    let mut page = Page::containing(start);
    for _ in 0..size / PAGE_SIZE {
        mem.map_to(page, zeroed, flags, frames).ok()?;
        page += 1;
    }

    *sys_stat += size;
    Some(start)
}

fn alloc_backed(
    mem: &mut impl BootstrapMemory,
    frames: &mut impl FrameAllocator<Size4KiB>,
    size: u64,
    sys_stat: &mut u64,
) -> Option<VirtAddr> {
    let size = round_to_pages(size);
    let start = mem.early_reserve_region(size).ok()?;
    let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::NO_EXECUTE;

    let mut page = Page::containing(start);
    for _ in 0..size / PAGE_SIZE {
        let frame = Frame::containing(frames.allocate_frame()?.start_address());
        mem.map_to(page, frame, flags, frames).ok()?;
        unsafe { core::ptr::write_bytes(page.address().as_mut_ptr::<u8>(), 0, PAGE_SIZE as usize) };
        page += 1;
    }

    *sys_stat += size;
    Some(start)
}

/// Monotonic clock placeholder until a timekeeper exists. `black_box`
/// keeps calls from being folded away at the call site.
pub fn nanotime() -> u64 {
    core::hint::black_box(1)
}

/// Fills `buf` with bytes from the boot-time generator.
pub fn get_random_data(buf: &mut [u8]) {
    let mut state = RANDOM_STATE.lock();
    fill_random(&mut state, buf);
}

fn fill_random(state: &mut i64, buf: &mut [u8]) {
    for byte in buf {
        *state = state.wrapping_mul(PRNG_MUL).wrapping_add(PRNG_INC);
        *byte = (*state >> 16) as u8;
    }
}

/// Records how many CPUs may run kernel code. Fixed at one until
/// application processors are brought up.
pub fn set_cpu_count(count: u32) {
    CPU_COUNT.store(count, Ordering::Relaxed);
}

pub fn cpu_count() -> u32 {
    CPU_COUNT.load(Ordering::Relaxed)
}

/// Brings the hosted services online. The order is fixed: nothing else
/// here works until the heap exists, and the ready flag goes up last.
pub fn init() -> Result<(), &'static crate::error::KernelError> {
    heap::init()?;
    set_cpu_count(1);
    RUNTIME_READY.store(true, Ordering::Release);
    log::info!(
        "runtime services online: heap {} KiB mapped, {} cpu",
        heap::mapped_bytes() / 1024,
        cpu_count()
    );
    Ok(())
}

/// Whether `init` has completed and the hosted services may be used.
pub fn ready() -> bool {
    RUNTIME_READY.load(Ordering::Acquire)
}

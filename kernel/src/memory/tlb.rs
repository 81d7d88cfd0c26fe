//! TLB invalidation.
//!
//! Bootstrap runs on a single CPU, so invalidating the local TLB entry is
//! all a mapping change needs.

use x86_64::VirtAddr;

/// Drops the cached translation for the page containing `addr`.
pub fn flush(addr: VirtAddr) {
    // invlpg is privileged; host-side tests exercise the page tables
    // without a live TLB.
    if cfg!(not(test)) {
        x86_64::instructions::tlb::flush(addr);
    }
}

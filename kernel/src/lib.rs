//! The anser kernel.
//!
//! A freestanding x86-64 kernel bootstrapping itself from a multiboot
//! loader: physical frame allocation in two stages, a virtual memory
//! manager with copy-on-write support, and the host adaptation layer that
//! makes heap allocation usable inside the kernel.

#![cfg_attr(not(test), no_std)]

pub mod constants;
pub mod devices;
pub mod error;
pub mod logging;
pub mod memory;
pub mod multiboot;
pub mod runtime;

pub use devices::serial;

pub mod prelude {
    pub use crate::serial_print;
    pub use crate::serial_println;
}

/// Disables interrupts and parks the CPU.
pub fn halt_loop() -> ! {
    x86_64::instructions::interrupts::disable();
    loop {
        x86_64::instructions::hlt();
    }
}

//! Kernel entry point.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
extern crate alloc;

#[cfg(target_os = "none")]
use anser::error::KernelError;
#[cfg(target_os = "none")]
use anser::{devices, logging, memory, multiboot, runtime};

#[cfg(target_os = "none")]
static ERR_KMAIN_RETURNED: KernelError = KernelError {
    module: "kmain",
    message: "kmain returned",
};

/// Entry from the boot stubs. They run first: long mode, the GDT, a 4 KiB
/// stack, identity and higher-half mappings of the low 8 MiB, and the
/// thread-pointer MSR are all set up before this is reached. We receive
/// the multiboot info pointer, the physical kernel span and the virtual
/// base of the higher half.
///
/// Must not return; the stubs halt the CPU if it does.
#[cfg(target_os = "none")]
#[no_mangle]
pub extern "C" fn kmain(
    multiboot_info: usize,
    kernel_start: usize,
    kernel_end: usize,
    kernel_page_offset: usize,
) -> ! {
    unsafe { multiboot::set_info_ptr(multiboot_info) };
    logging::init(0);
    log::info!(
        "booting: kernel at {:#x} - {:#x}, higher half at {:#x}",
        kernel_start,
        kernel_end,
        kernel_page_offset
    );

    // Divert redirected payload symbols before anything can call them.
    unsafe { runtime::redirect::install_boot_redirects() };

    memory::init(
        kernel_start as u64,
        kernel_end as u64,
        kernel_page_offset as u64,
    );
    if let Err(err) = runtime::init() {
        panic!("runtime init failed: {}", err);
    }

    // Heap, maps and boxed values work from here on.
    let banner = alloc::format!("anser online, {} cpu", runtime::cpu_count());
    log::info!("{}", banner);

    devices::init(0);

    // Nothing schedules yet, so falling through is itself a fatal error.
    panic!("{}", ERR_KMAIN_RETURNED);
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    anser::serial_println!("kernel panic: {}", info);
    devices::vga::print_panic(format_args!("{}", info));
    anser::halt_loop()
}

#[cfg(not(target_os = "none"))]
fn main() {}

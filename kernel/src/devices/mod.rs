pub mod serial;
pub mod vga;

/// Device probe entry point, handed control once the memory subsystem and
/// the runtime services are up. The serial console is the only device the
/// bootstrap path itself touches.
pub fn init(cpu_id: u32) {
    if cpu_id == 0 {
        log::info!("device probe: serial console online");
    }
}

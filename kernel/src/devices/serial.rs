//! Serial port console.
//!
//! COM1 carries all bootstrap output. The port is brought up on first use
//! so even failures from before `logging::init` can report something.

use lazy_static::lazy_static;
use spin::Mutex;
use uart_16550::SerialPort;

use crate::constants::ports::SERIAL_PORT;

lazy_static! {
    pub static ref SERIAL1: Mutex<SerialPort> = Mutex::new(init_port());
}

fn init_port() -> SerialPort {
    let mut port = unsafe { SerialPort::new(SERIAL_PORT) };
    port.init();
    port
}

/// Writes formatted text to COM1. Output is best effort: the panic path
/// runs through here, and a failed write must not panic again.
pub fn write(args: core::fmt::Arguments) {
    use core::fmt::Write;
    let _ = SERIAL1.lock().write_fmt(args);
}

/// Prints formatted text to the serial port.
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::write(format_args!($($arg)*))
    };
}

/// Prints formatted text to the serial port, followed by a newline.
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => ($crate::serial_print!("{}\n", format_args!($($arg)*)));
}

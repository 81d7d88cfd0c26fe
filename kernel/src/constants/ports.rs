/// I/O port of the first serial port (COM1).
pub const SERIAL_PORT: u16 = 0x3F8;

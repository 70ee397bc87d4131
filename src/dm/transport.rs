//! The Debug Module Interface (DMI): the sole primitive the back end is
//! parameterized over. The concrete transport (JTAG, a simulator's IPC
//! channel, a hardware register window) is out of scope for this crate;
//! it is specified here only as the two operations it must provide.

/// A DMI transport with no error channel of its own — failures are
/// observed by the caller reading back DM status registers (`cmderr`,
/// `sberror`).
pub trait DmiTransport {
    fn dmi_read(&mut self, addr: u16) -> u32;
    fn dmi_write(&mut self, addr: u16, data: u32);
}

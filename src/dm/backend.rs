//! Translator from abstract register/memory operations into DMI register
//! reads and writes, per the RISC-V External Debug Support v0.13.
//!
//! Drives halt/resume/step and register access via `dmcontrol`/`dmstatus`
//! and abstract commands, and memory access via the Debug Module's System
//! Bus (`sbcs`/`sbaddress*`/`sbdata*`), with the busy-wait polling and
//! cmderr/sberror handling both paths need.

use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::dm::regs::{
    addr, csr, fpr_regno, gpr_regno, regno_is_csr, regno_is_fpr, regno_is_gpr, Abstractcs,
    Command, Dcsr, DcsrCause, Dmcontrol, Dmstatus, SbAccess, Sbcs,
};
use crate::dm::transport::DmiTransport;
use crate::elf::ElfImage;
use crate::error::{Error, Result};

/// Architectural register width of the target hart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Xlen {
    Bits32,
    Bits64,
}

impl Xlen {
    pub fn bits(self) -> u32 {
        match self {
            Xlen::Bits32 => 32,
            Xlen::Bits64 => 64,
        }
    }

    /// Number of hex digits used to render one register in an RSP payload.
    pub fn hex_digits(self) -> usize {
        (self.bits() / 4) as usize
    }

    fn abstract_size(self) -> u32 {
        match self {
            Xlen::Bits32 => Command::SIZE_32,
            Xlen::Bits64 => Command::SIZE_64,
        }
    }
}

/// Outcome of a non-blocking `get_stop_reason` poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Running,
    Timeout,
    Halted(DcsrCause),
}

/// Whether the back end is actively driving the transport. Every
/// operation issued while `Disabled` is a safe no-op that returns `Ok`,
/// used by test harnesses during boot before a target is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Disabled,
    Enabled,
}

const ABSTRACT_CMD_BUDGET: Duration = Duration::from_secs(1);
const SB_BUDGET: Duration = Duration::from_secs(1);
const POLL_SLEEP: Duration = Duration::from_micros(1);
const MAX_POLL_ITERS: u64 = 1_000_000;

pub struct DmBackend<T: DmiTransport> {
    transport: T,
    lifecycle: Lifecycle,
    /// Whether `Drop` should automatically finalize the back end.
    autoclose: bool,
    xlen: Xlen,
    /// Deadline for the stop-reason-waiting loop started by the last
    /// `continue_`/`step`; cleared once a halt is observed.
    halt_deadline: Option<Instant>,
    halt_poll_budget: Duration,
}

impl<T: DmiTransport> DmBackend<T> {
    /// Constructs an already-initialized back end. `autoclose` controls
    /// whether `Drop` finalizes automatically.
    pub fn new(transport: T, autoclose: bool) -> Self {
        DmBackend {
            transport,
            lifecycle: Lifecycle::Enabled,
            autoclose,
            xlen: Xlen::Bits64,
            halt_deadline: None,
            halt_poll_budget: Duration::from_secs(30),
        }
    }

    pub fn xlen(&self) -> Xlen {
        self.xlen
    }

    pub fn set_xlen(&mut self, xlen: Xlen) {
        self.xlen = xlen;
    }

    pub fn enable(&mut self) {
        self.lifecycle = Lifecycle::Enabled;
    }

    pub fn disable(&mut self) {
        self.lifecycle = Lifecycle::Disabled;
    }

    pub fn shutdown(&mut self) {
        self.lifecycle = Lifecycle::Disabled;
    }

    fn enabled(&self) -> bool {
        self.lifecycle == Lifecycle::Enabled
    }

    // ---- raw DMI helpers -------------------------------------------------

    fn raw_read(&mut self, a: u16) -> u32 {
        let v = self.transport.dmi_read(a);
        trace!("dmi_read(0x{a:02x}) = 0x{v:08x}");
        v
    }

    fn raw_write(&mut self, a: u16, v: u32) {
        trace!("dmi_write(0x{a:02x}, 0x{v:08x})");
        self.transport.dmi_write(a, v);
    }

    fn read_dmstatus(&mut self) -> Dmstatus {
        Dmstatus::from(self.raw_read(addr::DMSTATUS))
    }

    fn write_dmcontrol(&mut self, configure: impl FnOnce(&mut Dmcontrol)) {
        let mut c = Dmcontrol(0);
        c.set_dmactive(true);
        configure(&mut c);
        self.raw_write(addr::DMCONTROL, c.raw());
    }

    fn read_abstractcs(&mut self) -> Abstractcs {
        Abstractcs(self.raw_read(addr::ABSTRACTCS))
    }

    fn clear_cmderr(&mut self) {
        self.raw_write(addr::ABSTRACTCS, Abstractcs::CMDERR_CLEAR);
    }

    fn read_sbcs(&mut self) -> Sbcs {
        Sbcs(self.raw_read(addr::SBCS))
    }

    fn clear_sberror(&mut self) {
        let mut sbcs = self.read_sbcs();
        sbcs.0 |= Sbcs::SBERROR_CLEAR;
        self.raw_write(addr::SBCS, sbcs.raw());
    }

    /// Polls `predicate` every `POLL_SLEEP`, up to `MAX_POLL_ITERS` times
    /// or until `budget` has elapsed (whichever is hit first).
    fn poll_until(
        &mut self,
        budget: Duration,
        mut predicate: impl FnMut(&mut Self) -> bool,
    ) -> Result<()> {
        let start = Instant::now();
        for _ in 0..MAX_POLL_ITERS {
            if predicate(self) {
                return Ok(());
            }
            if start.elapsed() > budget {
                break;
            }
            std::thread::sleep(POLL_SLEEP);
        }
        warn!("poll_until timed out after {:?}", start.elapsed());
        Err(Error::Timeout)
    }

    fn wait_abstract_idle(&mut self) -> Result<()> {
        self.poll_until(ABSTRACT_CMD_BUDGET, |be| !be.read_abstractcs().busy())
    }

    fn wait_sb_idle(&mut self) -> Result<()> {
        self.poll_until(SB_BUDGET, |be| !be.read_sbcs().sbbusy())
    }

    fn check_abstract_cmd_err(&mut self) -> Result<()> {
        let cs = self.read_abstractcs();
        let err = cs.cmderr();
        if err != crate::dm::regs::CmdErr::None {
            self.clear_cmderr();
            return Err(Error::DmCmdErr(err));
        }
        Ok(())
    }

    fn check_sb_err(&mut self) -> Result<()> {
        let sbcs = self.read_sbcs();
        if sbcs.sbbusyerror() || sbcs.sberror() != crate::dm::regs::SbError::None {
            let err = sbcs.sberror();
            self.clear_sberror();
            return Err(Error::SysBusError(err));
        }
        Ok(())
    }

    // ---- reset / halt / resume -------------------------------------------

    pub fn dm_reset(&mut self) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        self.write_dmcontrol(|c| c.set_dmactive(false));
        self.write_dmcontrol(|_| {});
        self.poll_until(Duration::from_secs(1), |be| be.read_dmstatus().version() != 0)
    }

    pub fn ndm_reset(&mut self, halt_after: bool) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        self.write_dmcontrol(|c| {
            c.set_ndmreset(true);
            if halt_after {
                c.set_haltreq(true);
            }
        });
        self.write_dmcontrol(|c| {
            if halt_after {
                c.set_haltreq(true);
            }
        });
        self.poll_until(Duration::from_secs(2), |be| be.read_dmstatus().allhavereset())?;
        self.write_dmcontrol(|c| {
            c.set_ackhavereset(true);
            if halt_after {
                c.set_haltreq(true);
            }
        });
        if halt_after {
            self.poll_until(Duration::from_secs(2), |be| be.read_dmstatus().allhalted())?;
        }
        debug!("ndm_reset complete (halt_after={halt_after})");
        Ok(())
    }

    pub fn hart_reset(&mut self, halt_after: bool) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        self.write_dmcontrol(|c| {
            c.set_hartreset(true);
            if halt_after {
                c.set_haltreq(true);
            }
        });
        self.write_dmcontrol(|c| {
            if halt_after {
                c.set_haltreq(true);
            }
        });
        self.poll_until(Duration::from_secs(2), |be| be.read_dmstatus().allhavereset())?;
        self.write_dmcontrol(|c| {
            c.set_ackhavereset(true);
            if halt_after {
                c.set_haltreq(true);
            }
        });
        if halt_after {
            self.poll_until(Duration::from_secs(2), |be| be.read_dmstatus().allhalted())?;
        }
        Ok(())
    }

    pub fn verbosity(&mut self, n: u32) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        self.raw_write(addr::VERBOSITY, n);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        self.write_dmcontrol(|c| c.set_haltreq(true));
        self.poll_until(Duration::from_secs(2), |be| be.read_dmstatus().allhalted())?;
        self.halt_deadline = None;
        Ok(())
    }

    pub fn continue_(&mut self, addr_override: Option<u64>) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        if let Some(new_pc) = addr_override {
            self.pc_write(new_pc)?;
        }
        let mut dcsr = Dcsr::from_raw(self.csr_read(csr::DCSR)? as u32);
        dcsr.set_step(false);
        self.csr_write(csr::DCSR, dcsr.raw() as u64)?;
        self.write_dmcontrol(|c| c.set_resumereq(true));
        self.halt_deadline = Some(Instant::now() + self.halt_poll_budget);
        Ok(())
    }

    pub fn step(&mut self, addr_override: Option<u64>) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        if let Some(new_pc) = addr_override {
            self.pc_write(new_pc)?;
        }
        let mut dcsr = Dcsr::from_raw(self.csr_read(csr::DCSR)? as u32);
        dcsr.set_step(true);
        self.csr_write(csr::DCSR, dcsr.raw() as u64)?;
        self.write_dmcontrol(|c| c.set_resumereq(true));
        self.poll_until(Duration::from_secs(5), |be| be.read_dmstatus().allhalted())?;
        self.halt_deadline = None;
        Ok(())
    }

    pub fn get_stop_reason(&mut self) -> Result<StopReason> {
        if !self.enabled() {
            return Ok(StopReason::Running);
        }
        let dmstatus = self.read_dmstatus();
        if dmstatus.allhalted() {
            self.halt_deadline = None;
            let dcsr = Dcsr::from_raw(self.csr_read(csr::DCSR)? as u32);
            return match dcsr.cause_enum() {
                Some(cause) => Ok(StopReason::Halted(cause)),
                None => Err(Error::BadRegister),
            };
        }
        if let Some(deadline) = self.halt_deadline {
            if Instant::now() >= deadline {
                return Ok(StopReason::Timeout);
            }
        }
        Ok(StopReason::Running)
    }

    // ---- register access ---------------------------------------------------

    /// Shared register-access algorithm: marshal, issue the abstract
    /// command, poll for completion, surface `cmderr`.
    fn reg_access(&mut self, regno: u32, write_value: Option<u64>) -> Result<u64> {
        if !self.enabled() {
            return Ok(0);
        }
        if let Some(value) = write_value {
            self.raw_write(addr::DATA0, value as u32);
            if self.xlen == Xlen::Bits64 {
                self.raw_write(addr::DATA1, (value >> 32) as u32);
            }
        }
        let cmd = Command::access_reg(
            self.xlen.abstract_size(),
            write_value.is_some(),
            true,
            regno,
        );
        self.raw_write(addr::COMMAND, cmd.raw());
        self.wait_abstract_idle()?;
        self.check_abstract_cmd_err()?;

        if write_value.is_some() {
            return Ok(0);
        }
        let lo = self.raw_read(addr::DATA0) as u64;
        let hi = if self.xlen == Xlen::Bits64 {
            self.raw_read(addr::DATA1) as u64
        } else {
            0
        };
        Ok(lo | (hi << 32))
    }

    pub fn gpr_read(&mut self, n: u32) -> Result<u64> {
        if n > 31 {
            return Err(Error::BadRegister);
        }
        self.reg_access(gpr_regno(n), None)
    }

    pub fn gpr_write(&mut self, n: u32, value: u64) -> Result<()> {
        if n > 31 {
            return Err(Error::BadRegister);
        }
        self.reg_access(gpr_regno(n), Some(value)).map(|_| ())
    }

    pub fn fpr_read(&mut self, n: u32) -> Result<u64> {
        if n > 31 {
            return Err(Error::BadRegister);
        }
        self.reg_access(fpr_regno(n), None)
    }

    pub fn fpr_write(&mut self, n: u32, value: u64) -> Result<()> {
        if n > 31 {
            return Err(Error::BadRegister);
        }
        self.reg_access(fpr_regno(n), Some(value)).map(|_| ())
    }

    pub fn csr_read(&mut self, regno: u32) -> Result<u64> {
        if !regno_is_csr(regno) {
            return Err(Error::BadRegister);
        }
        self.reg_access(regno, None)
    }

    pub fn csr_write(&mut self, regno: u32, value: u64) -> Result<()> {
        if !regno_is_csr(regno) {
            return Err(Error::BadRegister);
        }
        self.reg_access(regno, Some(value)).map(|_| ())
    }

    pub fn pc_read(&mut self) -> Result<u64> {
        self.csr_read(csr::DPC)
    }

    pub fn pc_write(&mut self, value: u64) -> Result<()> {
        self.csr_write(csr::DPC, value)
    }

    /// PRIV is a virtual register: the privilege mode bits of `dcsr`.
    pub fn priv_read(&mut self) -> Result<u64> {
        let dcsr = Dcsr::from_raw(self.csr_read(csr::DCSR)? as u32);
        Ok(dcsr.prv() as u64)
    }

    pub fn priv_write(&mut self, value: u64) -> Result<()> {
        let mut dcsr = Dcsr::from_raw(self.csr_read(csr::DCSR)? as u32);
        dcsr.set_prv(value as u32 & 0x3);
        self.csr_write(csr::DCSR, dcsr.raw() as u64)
    }

    // ---- memory access (System Bus) ----------------------------------------

    fn sb_write_address(&mut self, addr_value: u64) {
        if self.xlen == Xlen::Bits64 {
            self.raw_write(addr::SBADDRESS1, (addr_value >> 32) as u32);
        }
        self.raw_write(addr::SBADDRESS0, addr_value as u32);
    }

    /// Reads `len` bytes starting at `address`, any alignment.
    pub fn mem_read(&mut self, address: u64, len: u64) -> Result<Vec<u8>> {
        if !self.enabled() {
            return Ok(vec![0; len as usize]);
        }
        if len == 0 {
            return Ok(Vec::new());
        }
        self.wait_sb_idle()?;

        let start_word = address & !3;
        let end = address + len;
        let end_word = (end + 3) & !3;
        let num_words = (end_word - start_word) / 4;

        let sbcs = Sbcs::configure_for_read(SbAccess::Access32);
        self.raw_write(addr::SBCS, sbcs.raw());
        // Writing sbaddress0 (after sbaddress1, if present) with
        // sbreadonaddr=1 kicks off the first bus read.
        self.sb_write_address(start_word);

        let mut out = Vec::with_capacity(len as usize);
        for word_idx in 0..num_words {
            self.wait_sb_idle()?;
            let word = self.raw_read(addr::SBDATA0);
            let word_bytes = word.to_le_bytes();
            let word_addr = start_word + word_idx * 4;
            for (i, byte) in word_bytes.iter().enumerate() {
                let byte_addr = word_addr + i as u64;
                if byte_addr >= address && byte_addr < end {
                    out.push(*byte);
                }
            }
        }
        self.check_sb_err()?;
        Ok(out)
    }

    /// Writes `data` starting at `address`, any alignment.
    pub fn mem_write(&mut self, address: u64, data: &[u8]) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        if data.is_empty() {
            return Ok(());
        }
        self.wait_sb_idle()?;

        let end = address + data.len() as u64;
        let mut cursor = address;
        let mut src = data;

        // Unaligned prefix: read-modify-write the first word.
        if cursor % 4 != 0 {
            let word_addr = cursor & !3;
            let prefix_in_word = (cursor - word_addr) as usize;
            let bytes_here = (4 - prefix_in_word).min(src.len());
            let mut word = self.rmw_read_word(word_addr)?;
            word[prefix_in_word..prefix_in_word + bytes_here]
                .copy_from_slice(&src[..bytes_here]);
            self.rmw_write_word(word_addr, word)?;
            cursor += bytes_here as u64;
            src = &src[bytes_here..];
        }

        if src.is_empty() {
            return Ok(());
        }

        let whole_words = src.len() / 4;
        if whole_words > 0 {
            let sbcs = Sbcs::configure_for_write(SbAccess::Access32);
            self.raw_write(addr::SBCS, sbcs.raw());
            self.sb_write_address(cursor);
            for w in 0..whole_words {
                let word = u32::from_le_bytes(src[w * 4..w * 4 + 4].try_into().unwrap());
                self.wait_sb_idle()?;
                self.raw_write(addr::SBDATA0, word);
            }
            cursor += (whole_words * 4) as u64;
            src = &src[whole_words * 4..];
        }

        // Unaligned tail: read-modify-write the last partial word.
        if !src.is_empty() {
            debug_assert_eq!(cursor % 4, 0);
            debug_assert!(src.len() < 4);
            let mut word = self.rmw_read_word(cursor)?;
            word[..src.len()].copy_from_slice(src);
            self.rmw_write_word(cursor, word)?;
        }

        debug_assert_eq!(cursor + src.len() as u64, end);
        self.wait_sb_idle()?;
        self.check_sb_err()
    }

    fn rmw_read_word(&mut self, word_addr: u64) -> Result<[u8; 4]> {
        let bytes = self.mem_read(word_addr, 4)?;
        Ok(bytes.try_into().unwrap_or([0; 4]))
    }

    fn rmw_write_word(&mut self, word_addr: u64, word: [u8; 4]) -> Result<()> {
        self.wait_sb_idle()?;
        let sbcs = Sbcs::configure_for_write(SbAccess::Access32);
        self.raw_write(addr::SBCS, sbcs.raw());
        self.sb_write_address(word_addr);
        self.wait_sb_idle()?;
        self.raw_write(addr::SBDATA0, u32::from_le_bytes(word));
        self.wait_sb_idle()?;
        self.check_sb_err()
    }

    /// Naturally-aligned access of 1, 2, or 4 bytes that must not cross a
    /// 32-bit boundary.
    pub fn mem_read_subword(&mut self, address: u64, len: u64) -> Result<Vec<u8>> {
        self.check_subword(address, len)?;
        self.mem_read(address, len)
    }

    pub fn mem_write_subword(&mut self, address: u64, data: &[u8]) -> Result<()> {
        self.check_subword(address, data.len() as u64)?;
        self.mem_write(address, data)
    }

    fn check_subword(&self, address: u64, len: u64) -> Result<()> {
        if !matches!(len, 1 | 2 | 4) || address % len != 0 {
            return Err(Error::UnalignedAccess);
        }
        if (address & !3) != ((address + len - 1) & !3) {
            return Err(Error::UnalignedAccess);
        }
        Ok(())
    }

    /// Loads an ELF image (via `crate::elf`), records its XLEN, then
    /// streams the prepared buffer into target memory via `mem_write`.
    pub fn elf_load(&mut self, path: &std::path::Path) -> Result<ElfImage> {
        let image = crate::elf::load(path)?;
        self.xlen = image.xlen;
        self.mem_write(image.min_addr, &image.buffer)?;
        Ok(image)
    }
}

impl<T: DmiTransport> Drop for DmBackend<T> {
    fn drop(&mut self) {
        if self.autoclose {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dm::sim::DmSimulator;

    fn backend() -> DmBackend<DmSimulator> {
        DmBackend::new(DmSimulator::new(Xlen::Bits64), true)
    }

    #[test]
    fn gpr_read_after_write() {
        let mut be = backend();
        be.gpr_write(5, 0xdead_beef_1234_5678).unwrap();
        assert_eq!(be.gpr_read(5).unwrap(), 0xdead_beef_1234_5678);
    }

    #[test]
    fn csr_read_after_write() {
        let mut be = backend();
        be.csr_write(csr::DPC, 0x8000_0000).unwrap();
        assert_eq!(be.csr_read(csr::DPC).unwrap(), 0x8000_0000);
        assert_eq!(be.pc_read().unwrap(), 0x8000_0000);
    }

    #[test]
    fn mem_read_after_write_aligned() {
        let mut be = backend();
        be.mem_write(0x1000, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        assert_eq!(be.mem_read(0x1000, 4).unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn mem_read_after_write_unaligned() {
        let mut be = backend();
        be.mem_write(0x1001, &[0x01, 0x02, 0x03]).unwrap();
        assert_eq!(be.mem_read(0x1001, 3).unwrap(), vec![0x01, 0x02, 0x03]);
        // Byte 0x1000 and 0x1004 must be untouched (still zero).
        assert_eq!(be.mem_read(0x1000, 1).unwrap(), vec![0]);
        assert_eq!(be.mem_read(0x1004, 1).unwrap(), vec![0]);
    }

    #[test]
    fn mem_read_zero_length() {
        let mut be = backend();
        assert_eq!(be.mem_read(0x1000, 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn mem_write_spanning_multiple_words() {
        let mut be = backend();
        let data: Vec<u8> = (0u8..16).collect();
        be.mem_write(0x2002, &data).unwrap();
        assert_eq!(be.mem_read(0x2002, 16).unwrap(), data);
    }

    #[test]
    fn continue_then_stop_reaches_allhalted() {
        let mut be = backend();
        be.continue_(None).unwrap();
        be.stop().unwrap();
        assert!(be.read_dmstatus().allhalted());
    }

    #[test]
    fn disabled_backend_is_safe_noop() {
        let mut be = backend();
        be.disable();
        assert!(be.gpr_write(0, 42).is_ok());
        assert_eq!(be.gpr_read(0).unwrap(), 0);
    }

    #[test]
    fn subword_access_rejects_crossing_boundary() {
        let mut be = backend();
        assert_eq!(
            be.mem_read_subword(0x1003, 4).unwrap_err(),
            Error::UnalignedAccess
        );
    }
}

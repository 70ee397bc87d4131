//! RISC-V External Debug Support v0.13 register codec.
//!
//! Pure, total, side-effect-free. Each DM register is a newtype wrapping a
//! `u32` with typed accessors for its bitfields, generated with the
//! `bitfield` crate. Nothing here touches the DMI transport; these types
//! only pack and unpack values that `dm::backend` reads and writes.

use bitfield::bitfield;

/// 16-bit DMI register addresses, per the RISC-V Debug Spec v0.13 §3.12.
///
/// `data10`/`data11` follow the standard's own addresses (`0x0E`/`0x0F`);
/// see DESIGN.md for the rationale.
pub mod addr {
    pub const DATA0: u16 = 0x04;
    pub const DATA1: u16 = 0x05;
    pub const DATA2: u16 = 0x06;
    pub const DATA3: u16 = 0x07;
    pub const DATA4: u16 = 0x08;
    pub const DATA5: u16 = 0x09;
    pub const DATA6: u16 = 0x0A;
    pub const DATA7: u16 = 0x0B;
    pub const DATA8: u16 = 0x0C;
    pub const DATA9: u16 = 0x0D;
    pub const DATA10: u16 = 0x0E;
    pub const DATA11: u16 = 0x0F;
    pub const DMCONTROL: u16 = 0x10;
    pub const DMSTATUS: u16 = 0x11;
    pub const HARTINFO: u16 = 0x12;
    pub const ABSTRACTCS: u16 = 0x16;
    pub const COMMAND: u16 = 0x17;
    pub const SBCS: u16 = 0x38;
    pub const SBADDRESS0: u16 = 0x39;
    pub const SBADDRESS1: u16 = 0x3A;
    pub const SBADDRESS2: u16 = 0x3B;
    pub const SBDATA0: u16 = 0x3C;
    pub const SBDATA1: u16 = 0x3D;
    pub const SBDATA2: u16 = 0x3E;
    pub const SBDATA3: u16 = 0x3F;
    /// Non-standard verbosity register.
    pub const VERBOSITY: u16 = 0x60;
}

/// Debug CSRs, addressed via an abstract command with a CSR regno.
pub mod csr {
    pub const DCSR: u32 = 0x7B0;
    pub const DPC: u32 = 0x7B1;
}

/// Abstract-command register-number encoding.
pub fn regno_is_csr(regno: u32) -> bool {
    regno <= 0x0FFF
}

pub fn regno_is_gpr(regno: u32) -> bool {
    (0x1000..=0x101F).contains(&regno)
}

pub fn regno_is_fpr(regno: u32) -> bool {
    (0x1020..=0x103F).contains(&regno)
}

pub fn gpr_regno(n: u32) -> u32 {
    0x1000 + n
}

pub fn fpr_regno(n: u32) -> u32 {
    0x1020 + n
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Dmcontrol(u32);
    impl Debug;
    pub haltreq, set_haltreq: 31;
    pub resumereq, set_resumereq: 30;
    pub hartreset, set_hartreset: 29;
    pub ackhavereset, set_ackhavereset: 28;
    pub hasel, set_hasel: 26;
    pub hartsello, set_hartsello: 25, 16;
    pub hartselhi, set_hartselhi: 15, 6;
    pub setresethaltreq, set_setresethaltreq: 3;
    pub clrresethaltreq, set_clrresethaltreq: 2;
    pub ndmreset, set_ndmreset: 1;
    pub dmactive, set_dmactive: 0;
}

impl Dmcontrol {
    pub fn raw(&self) -> u32 {
        self.0
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Dmstatus(u32);
    impl Debug;
    pub impebreak, _: 22;
    pub allhavereset, _: 19;
    pub anyhavereset, _: 18;
    pub allresumeack, _: 17;
    pub anyresumeack, _: 16;
    pub allnonexistent, _: 15;
    pub anynonexistent, _: 14;
    pub allunavail, _: 13;
    pub anyunavail, _: 12;
    pub allrunning, _: 11;
    pub anyrunning, _: 10;
    pub allhalted, _: 9;
    pub anyhalted, _: 8;
    pub authenticated, _: 7;
    pub authbusy, _: 6;
    pub hasresethaltreq, _: 5;
    pub confstrptrvalid, _: 4;
    pub version, _: 3, 0;
}

impl From<u32> for Dmstatus {
    fn from(v: u32) -> Self {
        Dmstatus(v)
    }
}

/// `abstractcs.cmderr` — sticky, write-1-to-clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdErr {
    None = 0,
    Busy = 1,
    NotSupported = 2,
    Exception = 3,
    HaltResume = 4,
    Other = 7,
}

impl From<u8> for CmdErr {
    fn from(v: u8) -> Self {
        match v & 0x7 {
            0 => CmdErr::None,
            1 => CmdErr::Busy,
            2 => CmdErr::NotSupported,
            3 => CmdErr::Exception,
            4 => CmdErr::HaltResume,
            _ => CmdErr::Other,
        }
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Abstractcs(u32);
    impl Debug;
    pub progbufsize, _: 28, 24;
    pub busy, _: 12;
    pub cmderr_raw, _: 10, 8;
    pub datacount, _: 4, 0;
}

impl Abstractcs {
    /// Value to write back to W1C `cmderr` (the field is `0b111`).
    pub const CMDERR_CLEAR: u32 = 0x7 << 8;

    pub fn cmderr(&self) -> CmdErr {
        CmdErr::from(self.cmderr_raw() as u8)
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Command(u32);
    impl Debug;
    pub cmdtype, set_cmdtype: 31, 24;
    pub size, set_size: 22, 20;
    pub aarpostincrement, set_aarpostincrement: 19;
    pub postexec, set_postexec: 18;
    pub transfer, set_transfer: 17;
    pub write, set_write: 16;
    pub regno, set_regno: 15, 0;
}

impl Command {
    pub const CMDTYPE_ACCESS_REG: u32 = 0;
    pub const SIZE_32: u32 = 2;
    pub const SIZE_64: u32 = 3;

    pub fn access_reg(size: u32, write: bool, transfer: bool, regno: u32) -> Self {
        let mut cmd = Command(0);
        cmd.set_cmdtype(Self::CMDTYPE_ACCESS_REG);
        cmd.set_size(size);
        cmd.set_transfer(transfer);
        cmd.set_write(write);
        cmd.set_regno(regno);
        cmd
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// `sbcs.sberror` — sticky, write-1-to-clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbError {
    None = 0,
    Timeout = 1,
    BadAddr = 2,
    Alignment = 3,
    UnsupportedSize = 4,
    Other = 7,
}

impl From<u8> for SbError {
    fn from(v: u8) -> Self {
        match v & 0x7 {
            0 => SbError::None,
            1 => SbError::Timeout,
            2 => SbError::BadAddr,
            3 => SbError::Alignment,
            4 => SbError::UnsupportedSize,
            _ => SbError::Other,
        }
    }
}

/// `sbcs.sbaccess` — the System Bus access width to use for a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbAccess {
    Access8 = 0,
    Access16 = 1,
    Access32 = 2,
    Access64 = 3,
    Access128 = 4,
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Sbcs(u32);
    impl Debug;
    pub sbversion, _: 31, 29;
    pub sbbusyerror, set_sbbusyerror: 22;
    pub sbbusy, _: 21;
    pub sbreadonaddr, set_sbreadonaddr: 20;
    pub sbaccess, set_sbaccess: 19, 17;
    pub sbautoincrement, set_sbautoincrement: 16;
    pub sbreadondata, set_sbreadondata: 15;
    pub sberror_raw, _: 14, 12;
    pub sbasize, _: 11, 5;
    pub sbaccess_supported, _: 4, 0;
}

impl Sbcs {
    /// Value to write back to W1C `sberror` (the field is `0b111`).
    pub const SBERROR_CLEAR: u32 = 0x7 << 12;

    pub fn sberror(&self) -> SbError {
        SbError::from(self.sberror_raw() as u8)
    }

    pub fn configure_for_read(access: SbAccess) -> Self {
        let mut sbcs = Sbcs(0);
        sbcs.set_sbreadonaddr(true);
        sbcs.set_sbautoincrement(true);
        sbcs.set_sbreadondata(true);
        sbcs.set_sbaccess(access as u32);
        sbcs.0 |= Self::SBERROR_CLEAR | (1 << 22); // W1C sberror, W1C sbbusyerror
        sbcs
    }

    pub fn configure_for_write(access: SbAccess) -> Self {
        let mut sbcs = Sbcs(0);
        sbcs.set_sbreadonaddr(false);
        sbcs.set_sbreadondata(false);
        sbcs.set_sbautoincrement(true);
        sbcs.set_sbaccess(access as u32);
        sbcs.0 |= Self::SBERROR_CLEAR | (1 << 22);
        sbcs
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// `dcsr.cause` — why the hart last entered debug mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcsrCause {
    Ebreak = 1,
    Trigger = 2,
    Haltreq = 3,
    Step = 4,
    Resethaltreq = 5,
}

impl TryFrom<u8> for DcsrCause {
    type Error = ();
    fn try_from(v: u8) -> Result<Self, ()> {
        match v & 0x7 {
            1 => Ok(DcsrCause::Ebreak),
            2 => Ok(DcsrCause::Trigger),
            3 => Ok(DcsrCause::Haltreq),
            4 => Ok(DcsrCause::Step),
            5 => Ok(DcsrCause::Resethaltreq),
            _ => Err(()),
        }
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Dcsr(u32);
    impl Debug;
    pub xdebugver, _: 31, 28;
    pub ebreakm, set_ebreakm: 15;
    pub ebreaks, set_ebreaks: 13;
    pub ebreaku, set_ebreaku: 12;
    pub stepie, set_stepie: 11;
    pub stopcount, set_stopcount: 10;
    pub stoptime, set_stoptime: 9;
    pub cause, _: 8, 6;
    pub mprven, set_mprven: 4;
    pub nmip, _: 3;
    pub step, set_step: 2;
    pub prv, set_prv: 1, 0;
}

impl Dcsr {
    pub fn raw(&self) -> u32 {
        self.0
    }

    pub fn from_raw(v: u32) -> Self {
        Dcsr(v)
    }

    pub fn cause_enum(&self) -> Option<DcsrCause> {
        DcsrCause::try_from(self.cause() as u8).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dmcontrol_haltreq_roundtrip() {
        let mut c = Dmcontrol(0);
        c.set_haltreq(true);
        c.set_dmactive(true);
        assert!(c.haltreq());
        assert!(c.dmactive());
        assert!(!c.resumereq());
        assert_eq!(c.raw(), (1u32 << 31) | 1);
    }

    #[test]
    fn dmcontrol_hartsello_field() {
        let mut c = Dmcontrol(0);
        c.set_hartsello(0x3FF);
        assert_eq!(c.hartsello(), 0x3FF);
        assert_eq!(c.raw(), 0x3FF << 16);
    }

    #[test]
    fn dmstatus_allhalted_bit() {
        let s = Dmstatus::from(1 << 9);
        assert!(s.allhalted());
        assert!(!s.anyrunning());
    }

    #[test]
    fn abstractcs_cmderr_decode() {
        let cs = Abstractcs(0x3 << 8);
        assert_eq!(cs.cmderr(), CmdErr::Exception);
    }

    #[test]
    fn command_access_reg_encoding() {
        let cmd = Command::access_reg(Command::SIZE_64, true, true, gpr_regno(10));
        assert_eq!(cmd.cmdtype(), Command::CMDTYPE_ACCESS_REG);
        assert_eq!(cmd.size(), Command::SIZE_64);
        assert!(cmd.write());
        assert!(cmd.transfer());
        assert_eq!(cmd.regno(), 0x100A);
    }

    #[test]
    fn sbcs_configure_for_read_sets_expected_bits() {
        let sbcs = Sbcs::configure_for_read(SbAccess::Access32);
        assert!(sbcs.sbreadonaddr());
        assert!(sbcs.sbautoincrement());
        assert!(sbcs.sbreadondata());
        assert_eq!(sbcs.sbaccess(), SbAccess::Access32 as u32);
    }

    #[test]
    fn dcsr_cause_decode() {
        let mut d = Dcsr(0);
        d.0 |= 0x1 << 6; // cause = ebreak
        assert_eq!(d.cause_enum(), Some(DcsrCause::Ebreak));
    }

    #[test]
    fn regno_classification() {
        assert!(regno_is_csr(csr::DCSR));
        assert!(regno_is_gpr(gpr_regno(0)));
        assert!(regno_is_gpr(gpr_regno(31)));
        assert!(regno_is_fpr(fpr_regno(0)));
        assert!(regno_is_fpr(fpr_regno(31)));
    }
}

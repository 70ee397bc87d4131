//! An in-memory stand-in for a real DMI transport. It implements just
//! enough of the v0.13 register semantics (abstract commands resolve
//! instantly, halt/resume/step toggle a single simulated hart) to
//! exercise the back end's algorithms without real hardware — used by
//! the unit tests throughout `dm::backend`/`rsp::dispatcher`, and
//! available at runtime via the binary's `--sim` flag for smoke-testing
//! the bridge with no real DMI transport wired up.

use std::collections::HashMap;

use crate::dm::backend::Xlen;
use crate::dm::regs::{addr, csr, Command, DcsrCause};

pub struct DmSimulator {
    mem: HashMap<u64, u8>,
    gprs: [u64; 32],
    fprs: [u64; 32],
    dcsr: u32,
    dpc: u64,
    data: [u32; 2],
    halted: bool,
    havereset: bool,
    sbcs: u32,
    sbaddress: u64,
    xlen: Xlen,
}

impl DmSimulator {
    pub fn new(xlen: Xlen) -> Self {
        DmSimulator {
            mem: HashMap::new(),
            gprs: [0; 32],
            fprs: [0; 32],
            dcsr: 0,
            dpc: 0,
            data: [0; 2],
            halted: true,
            havereset: false,
            sbcs: 0,
            sbaddress: 0,
            xlen,
        }
    }

    fn set_cause(&mut self, cause: DcsrCause) {
        self.dcsr = (self.dcsr & !(0x7 << 6)) | ((cause as u32) << 6);
    }

    fn sb_sbreadonaddr(&self) -> bool {
        self.sbcs & (1 << 20) != 0
    }

    fn sb_sbreadondata(&self) -> bool {
        self.sbcs & (1 << 15) != 0
    }

    fn sb_sbautoincrement(&self) -> bool {
        self.sbcs & (1 << 16) != 0
    }

    fn sb_word(&self, addr: u64) -> u32 {
        let mut bytes = [0u8; 4];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = *self.mem.get(&(addr + i as u64)).unwrap_or(&0);
        }
        u32::from_le_bytes(bytes)
    }

    fn sb_store_word(&mut self, addr: u64, word: u32) {
        for (i, b) in word.to_le_bytes().iter().enumerate() {
            self.mem.insert(addr + i as u64, *b);
        }
    }

    fn run_command(&mut self, cmd: Command) {
        let regno = cmd.regno();
        let value = if cmd.size() == Command::SIZE_64 {
            self.data[0] as u64 | ((self.data[1] as u64) << 32)
        } else {
            self.data[0] as u64
        };

        if crate::dm::regs::regno_is_gpr(regno) {
            let idx = (regno - 0x1000) as usize;
            if cmd.write() {
                self.gprs[idx] = value;
            } else {
                self.store_result(self.gprs[idx]);
            }
            return;
        }
        if crate::dm::regs::regno_is_fpr(regno) {
            let idx = (regno - 0x1020) as usize;
            if cmd.write() {
                self.fprs[idx] = value;
            } else {
                self.store_result(self.fprs[idx]);
            }
            return;
        }
        match regno {
            csr::DCSR => {
                if cmd.write() {
                    self.dcsr = value as u32;
                } else {
                    self.store_result(self.dcsr as u64);
                }
            }
            csr::DPC => {
                if cmd.write() {
                    self.dpc = value;
                } else {
                    self.store_result(self.dpc);
                }
            }
            _ => {}
        }
    }

    fn store_result(&mut self, value: u64) {
        self.data[0] = value as u32;
        if self.xlen == Xlen::Bits64 {
            self.data[1] = (value >> 32) as u32;
        }
    }
}

impl super::transport::DmiTransport for DmSimulator {
    fn dmi_read(&mut self, a: u16) -> u32 {
        match a {
            addr::DATA0 => self.data[0],
            addr::DATA1 => self.data[1],
            addr::DMSTATUS => {
                let mut v: u32 = 2; // xdebugver = 0.13
                if self.halted {
                    v |= (1 << 9) | (1 << 8); // allhalted | anyhalted
                } else {
                    v |= (1 << 11) | (1 << 10); // allrunning | anyrunning
                }
                if self.havereset {
                    v |= (1 << 19) | (1 << 18);
                }
                v
            }
            addr::ABSTRACTCS => 0, // cmderr never set in simulation
            addr::SBCS => self.sbcs & !((0x7 << 12) | (1 << 21) | (1 << 22)),
            addr::SBDATA0 => {
                let v = self.sb_word(self.sbaddress);
                if self.sb_sbreadondata() {
                    if self.sb_sbautoincrement() {
                        self.sbaddress += 4;
                    }
                }
                v
            }
            addr::VERBOSITY => 0,
            _ => 0,
        }
    }

    fn dmi_write(&mut self, a: u16, v: u32) {
        match a {
            addr::DATA0 => self.data[0] = v,
            addr::DATA1 => self.data[1] = v,
            addr::DMCONTROL => {
                let c = crate::dm::regs::Dmcontrol(v);
                if c.ackhavereset() {
                    self.havereset = false;
                }
                if c.ndmreset() || c.hartreset() {
                    self.havereset = true;
                }
                if c.haltreq() {
                    self.halted = true;
                    self.set_cause(DcsrCause::Haltreq);
                } else if c.resumereq() {
                    let stepping = self.dcsr & (1 << 2) != 0;
                    if stepping {
                        self.halted = true;
                        self.set_cause(DcsrCause::Step);
                    } else {
                        self.halted = false;
                    }
                }
            }
            addr::COMMAND => self.run_command(Command(v)),
            addr::SBCS => self.sbcs = v,
            addr::SBADDRESS1 => {
                self.sbaddress = (self.sbaddress & 0xFFFF_FFFF) | ((v as u64) << 32);
            }
            addr::SBADDRESS0 => {
                self.sbaddress = (self.sbaddress & !0xFFFF_FFFF) | v as u64;
            }
            addr::SBDATA0 => {
                self.sb_store_word(self.sbaddress, v);
                if self.sb_sbautoincrement() {
                    self.sbaddress += 4;
                }
            }
            addr::VERBOSITY => {}
            _ => {}
        }
    }
}

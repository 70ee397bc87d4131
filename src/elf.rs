//! Loads a little-endian RISC-V ELF into a flat memory image and, when a
//! symbol table is present, writes a small `symbol_table.txt` side file
//! alongside the binary.
//!
//! Built on the `object` crate for parsing and binary introspection.

use std::path::Path;

use object::{Architecture, Object, ObjectSegment, ObjectSymbol};

use crate::dm::backend::Xlen;
use crate::error::{Error, Result};

/// The symbols looked up for the `symbol_table.txt` side file, in the
/// order they are written when present.
const WANTED_SYMBOLS: [&str; 3] = ["_start", "exit", "tohost"];

pub struct ElfImage {
    pub xlen: Xlen,
    pub min_addr: u64,
    pub max_addr: u64,
    pub buffer: Vec<u8>,
}

/// Loads `path`, rejecting anything that isn't little-endian with
/// `e_machine == EM_RISCV`.
pub fn load(path: &Path) -> Result<ElfImage> {
    let data = std::fs::read(path)?;
    let file = object::File::parse(&*data).map_err(|e| Error::Elf(e.to_string()))?;

    if !file.is_little_endian() {
        return Err(Error::Elf("ELF is not little-endian".into()));
    }
    let xlen = match file.architecture() {
        Architecture::Riscv32 => Xlen::Bits32,
        Architecture::Riscv64 => Xlen::Bits64,
        other => {
            return Err(Error::Elf(format!(
                "unsupported e_machine (got {other:?}, want EM_RISCV)"
            )))
        }
    };

    let segments: Vec<_> = file.segments().filter(|s| s.size() > 0).collect();
    if segments.is_empty() {
        return Err(Error::Elf("no loadable segments".into()));
    }
    let min_addr = segments.iter().map(|s| s.address()).min().unwrap();
    let max_addr = segments
        .iter()
        .map(|s| s.address() + s.size())
        .max()
        .unwrap();

    let mut buffer = vec![0u8; (max_addr - min_addr) as usize];
    for seg in &segments {
        let seg_data = seg.data().map_err(|e| Error::Elf(e.to_string()))?;
        let offset = (seg.address() - min_addr) as usize;
        buffer[offset..offset + seg_data.len()].copy_from_slice(seg_data);
    }

    write_symbol_table(&file, path)?;

    Ok(ElfImage {
        xlen,
        min_addr,
        max_addr,
        buffer,
    })
}

fn write_symbol_table(file: &object::File, elf_path: &Path) -> Result<()> {
    let mut lines = String::new();
    for name in WANTED_SYMBOLS {
        if let Some(sym) = file.symbols().find(|s| s.name().ok() == Some(name)) {
            lines.push_str(&format!("{name} 0x{:x}\n", sym.address()));
        }
    }
    // Only symbols actually found get a line; an ELF with none of the
    // three present gets no side file.
    if lines.is_empty() {
        return Ok(());
    }
    std::fs::write(elf_path.with_file_name("symbol_table.txt"), lines)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_elf_data() {
        let dir = std::env::temp_dir();
        let path = dir.join("riscv_gdb_bridge_test_not_elf.bin");
        std::fs::write(&path, b"not an elf file").unwrap();
        let result = load(&path);
        std::fs::remove_file(&path).ok();
        assert!(result.is_err());
    }
}

//! In-memory writer for small ELF32 images.
//!
//! Produces images with one section per segment, optional `SHT_NOBITS` marker sections, a
//! symbol table of absolute symbols and a single REL table. Enough to exercise loaders without
//! shipping binary fixtures.

use alloc::{string::String, vec, vec::Vec};

use crate::abi;

struct Segment {
    vaddr: u32,
    data: Vec<u8>,
    memsz: u32,
    flags: u32,
}

/// Builder for ELF32 little-endian images.
pub struct ImageBuilder {
    e_type: u16,
    machine: u16,
    entry: u32,
    segments: Vec<Segment>,
    sections: Vec<(String, u32, u32)>,
    symbols: Vec<(String, u32)>,
    relocations: Vec<(u32, String, u8)>,
}

impl ImageBuilder {
    /// Starts an image of type `e_type` (see [`abi`]) with entry point `entry`.
    pub fn new(e_type: u16, entry: u32) -> Self {
        Self {
            e_type,
            machine: abi::EM_TI_C6000,
            entry,
            segments: Vec::new(),
            sections: Vec::new(),
            symbols: Vec::new(),
            relocations: Vec::new(),
        }
    }

    /// Adds a `PT_LOAD` segment at `vaddr`. Memory past the file data is zero filled by loaders.
    pub fn segment(mut self, vaddr: u32, data: &[u8], memsz: u32, flags: u32) -> Self {
        self.segments.push(Segment {
            vaddr,
            data: data.to_vec(),
            memsz,
            flags,
        });
        self
    }

    /// Adds a named `SHT_NOBITS` section covering `[addr, addr + size)`.
    pub fn section(mut self, name: &str, addr: u32, size: u32) -> Self {
        self.sections.push((name.into(), addr, size));
        self
    }

    /// Adds an absolute global symbol.
    pub fn symbol(mut self, name: &str, value: u32) -> Self {
        self.symbols.push((name.into(), value));
        self
    }

    /// Adds a relocation at `offset` against `symbol`. An empty name refers to symbol zero.
    pub fn relocation(mut self, offset: u32, symbol: &str, kind: u8) -> Self {
        self.relocations.push((offset, symbol.into(), kind));
        self
    }

    /// Serializes the image.
    pub fn build(&self) -> Vec<u8> {
        let phnum = self.segments.len();
        let mut out = vec![0u8; 52 + 32 * phnum];

        // Segment contents
        let mut seg_offsets = Vec::new();
        for seg in &self.segments {
            pad(&mut out);
            seg_offsets.push(out.len() as u32);
            out.extend_from_slice(&seg.data);
        }

        // Section names; index 0 is the empty string.
        let mut shstrtab = vec![0u8];
        let mut add_name = |name: &str| {
            let off = shstrtab.len() as u32;
            shstrtab.extend_from_slice(name.as_bytes());
            shstrtab.push(0);
            off
        };

        // (name, type, addr, offset, size, link, info, entsize)
        let mut shdrs: Vec<[u32; 8]> = vec![[0; 8]];
        for (i, seg) in self.segments.iter().enumerate() {
            let name = add_name(alloc::format!(".seg{}", i).as_str());
            shdrs.push([
                name,
                abi::SHT_PROGBITS,
                seg.vaddr,
                seg_offsets[i],
                seg.data.len() as u32,
                0,
                0,
                0,
            ]);
        }
        for (name, addr, size) in &self.sections {
            let name = add_name(name.as_str());
            shdrs.push([name, abi::SHT_NOBITS, *addr, 0, *size, 0, 0, 0]);
        }

        if !self.symbols.is_empty() {
            let mut strtab = vec![0u8];
            let mut symtab = vec![0u8; 16];
            for (name, value) in &self.symbols {
                let st_name = strtab.len() as u32;
                strtab.extend_from_slice(name.as_bytes());
                strtab.push(0);

                symtab.extend_from_slice(&st_name.to_le_bytes());
                symtab.extend_from_slice(&value.to_le_bytes());
                symtab.extend_from_slice(&0u32.to_le_bytes());
                symtab.push(0x10); // STB_GLOBAL, STT_NOTYPE
                symtab.push(0);
                symtab.extend_from_slice(&abi::SHN_ABS.to_le_bytes());
            }

            let symtab_idx = shdrs.len() as u32;
            let strtab_idx = symtab_idx + 1;

            pad(&mut out);
            let symtab_off = out.len() as u32;
            out.extend_from_slice(&symtab);
            let strtab_off = out.len() as u32;
            out.extend_from_slice(&strtab);

            let name = add_name(".symtab");
            shdrs.push([
                name,
                abi::SHT_SYMTAB,
                0,
                symtab_off,
                symtab.len() as u32,
                strtab_idx,
                1,
                16,
            ]);
            let name = add_name(".strtab");
            shdrs.push([
                name,
                abi::SHT_STRTAB,
                0,
                strtab_off,
                strtab.len() as u32,
                0,
                0,
                0,
            ]);

            if !self.relocations.is_empty() {
                pad(&mut out);
                let rel_off = out.len() as u32;
                for (offset, symbol, kind) in &self.relocations {
                    let sym = self
                        .symbols
                        .iter()
                        .position(|(name, _)| name == symbol)
                        .map_or(0, |i| i as u32 + 1);
                    out.extend_from_slice(&offset.to_le_bytes());
                    out.extend_from_slice(&((sym << 8) | u32::from(*kind)).to_le_bytes());
                }

                let name = add_name(".rel.dyn");
                shdrs.push([
                    name,
                    abi::SHT_REL,
                    0,
                    rel_off,
                    8 * self.relocations.len() as u32,
                    symtab_idx,
                    0,
                    8,
                ]);
            }
        }

        let shstrndx = shdrs.len() as u16;
        let name = add_name(".shstrtab");
        let shstrtab_off = out.len() as u32;
        out.extend_from_slice(&shstrtab);
        shdrs.push([
            name,
            abi::SHT_STRTAB,
            0,
            shstrtab_off,
            shstrtab.len() as u32,
            0,
            0,
            0,
        ]);

        // Section header table
        pad(&mut out);
        let shoff = out.len() as u32;
        for [name, kind, addr, offset, size, link, info, entsize] in &shdrs {
            for field in [*name, *kind, 0, *addr, *offset, *size, *link, *info, 4, *entsize] {
                out.extend_from_slice(&field.to_le_bytes());
            }
        }

        // Program header table
        for (i, seg) in self.segments.iter().enumerate() {
            let ph = 52 + 32 * i;
            let fields = [
                abi::PT_LOAD,
                seg_offsets[i],
                seg.vaddr,
                seg.vaddr,
                seg.data.len() as u32,
                seg.memsz,
                seg.flags,
                4,
            ];
            for (j, field) in fields.iter().enumerate() {
                out[ph + 4 * j..ph + 4 * j + 4].copy_from_slice(&field.to_le_bytes());
            }
        }

        // ELF header
        out[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
        out[4] = 1; // ELFCLASS32
        out[5] = 1; // ELFDATA2LSB
        out[6] = 1; // EV_CURRENT
        put_u16(&mut out, 0x10, self.e_type);
        put_u16(&mut out, 0x12, self.machine);
        put_u32(&mut out, 0x14, 1);
        put_u32(&mut out, 0x18, self.entry);
        put_u32(&mut out, 0x1C, if phnum > 0 { 52 } else { 0 });
        put_u32(&mut out, 0x20, shoff);
        put_u16(&mut out, 0x28, 52);
        put_u16(&mut out, 0x2A, 32);
        put_u16(&mut out, 0x2C, phnum as u16);
        put_u16(&mut out, 0x2E, 40);
        put_u16(&mut out, 0x30, shdrs.len() as u16);
        put_u16(&mut out, 0x32, shstrndx);

        out
    }
}

fn pad(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn put_u16(out: &mut [u8], off: usize, v: u16) {
    out[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut [u8], off: usize, v: u32) {
    out[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

//! Minimal ELF32 little-endian parser for DSP executables.
//! Supports reading the ELF header, iterating program and section headers, looking up symbols
//! and walking REL relocation tables.
//!
//! Safety model:
//! - Uses bounds-checked slicing + manual LE decoding.
//! - No unsafe required.

#![cfg_attr(not(test), no_std)]

#[cfg(any(test, feature = "builder"))]
extern crate alloc;

pub mod abi;
#[cfg(any(test, feature = "builder"))]
pub mod builder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    TooSmall,
    BadMagic,
    NotElf32,
    NotLittleEndian,
    BadHeaderSize,
    BadPhEntSize,
    BadShEntSize,
    BadString,
    OutOfBounds,
}

impl core::fmt::Display for ElfError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ElfError::TooSmall => write!(f, "file too small"),
            ElfError::BadMagic => write!(f, "bad ELF magic"),
            ElfError::NotElf32 => write!(f, "not an ELF32 file"),
            ElfError::NotLittleEndian => write!(f, "not a little-endian file"),
            ElfError::BadHeaderSize => write!(f, "unexpected ELF header size"),
            ElfError::BadPhEntSize => write!(f, "unexpected program header entry size"),
            ElfError::BadShEntSize => write!(f, "unexpected section header entry size"),
            ElfError::BadString => write!(f, "malformed string table entry"),
            ElfError::OutOfBounds => write!(f, "reference past the end of the file"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf32Header {
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u32,
    pub e_phoff: u32,
    pub e_shoff: u32,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf32Phdr {
    pub p_type: u32,
    pub p_offset: u32,
    pub p_vaddr: u32,
    pub p_paddr: u32,
    pub p_filesz: u32,
    pub p_memsz: u32,
    pub p_flags: u32,
    pub p_align: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf32Shdr {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u32,
    pub sh_addr: u32,
    pub sh_offset: u32,
    pub sh_size: u32,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u32,
    pub sh_entsize: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf32Sym {
    pub st_name: u32,
    pub st_value: u32,
    pub st_size: u32,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf32Rel {
    pub r_offset: u32,
    pub r_info: u32,
}

/// ELF identification constants.
const EI_NIDENT: usize = 16;
const ELFMAG: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;
const SHDR_SIZE: usize = 40;
const SYM_SIZE: usize = 16;
const REL_SIZE: usize = 8;

pub struct Elf32<'a> {
    data: &'a [u8],
    hdr: Elf32Header,
}

impl<'a> Elf32<'a> {
    /// Parse ELF header from `data`.
    pub fn parse(data: &'a [u8]) -> Result<Self, ElfError> {
        // Need at least the full ELF32 header (52 bytes).
        if data.len() < EHDR_SIZE {
            return Err(ElfError::TooSmall);
        }

        // e_ident
        let ident = get_range(data, 0, EI_NIDENT)?;
        if ident[0..4] != ELFMAG {
            return Err(ElfError::BadMagic);
        }
        if ident[4] != ELFCLASS32 {
            return Err(ElfError::NotElf32);
        }
        if ident[5] != ELFDATA2LSB {
            return Err(ElfError::NotLittleEndian);
        }

        // Fixed offsets for ELF32 header fields (System V ABI).
        // Layout:
        // 0x00 e_ident[16]
        // 0x10 e_type (2)
        // 0x12 e_machine (2)
        // 0x14 e_version (4)
        // 0x18 e_entry (4)
        // 0x1C e_phoff (4)
        // 0x20 e_shoff (4)
        // 0x24 e_flags (4)
        // 0x28 e_ehsize (2)
        // 0x2A e_phentsize (2)
        // 0x2C e_phnum (2)
        // 0x2E e_shentsize (2)
        // 0x30 e_shnum (2)
        // 0x32 e_shstrndx (2)

        let hdr = Elf32Header {
            e_type: read_u16_le(data, 0x10)?,
            e_machine: read_u16_le(data, 0x12)?,
            e_version: read_u32_le(data, 0x14)?,
            e_entry: read_u32_le(data, 0x18)?,
            e_phoff: read_u32_le(data, 0x1C)?,
            e_shoff: read_u32_le(data, 0x20)?,
            e_flags: read_u32_le(data, 0x24)?,
            e_ehsize: read_u16_le(data, 0x28)?,
            e_phentsize: read_u16_le(data, 0x2A)?,
            e_phnum: read_u16_le(data, 0x2C)?,
            e_shentsize: read_u16_le(data, 0x2E)?,
            e_shnum: read_u16_le(data, 0x30)?,
            e_shstrndx: read_u16_le(data, 0x32)?,
        };

        // Sanity checks.
        if usize::from(hdr.e_ehsize) != EHDR_SIZE {
            return Err(ElfError::BadHeaderSize);
        }
        if hdr.e_phnum != 0 && usize::from(hdr.e_phentsize) != PHDR_SIZE {
            return Err(ElfError::BadPhEntSize);
        }
        if hdr.e_shnum != 0 && usize::from(hdr.e_shentsize) != SHDR_SIZE {
            return Err(ElfError::BadShEntSize);
        }

        // Validate header table bounds, if present.
        check_table(data, hdr.e_phoff, PHDR_SIZE, hdr.e_phnum)?;
        check_table(data, hdr.e_shoff, SHDR_SIZE, hdr.e_shnum)?;

        Ok(Self { data, hdr })
    }

    pub fn header(&self) -> &Elf32Header {
        &self.hdr
    }

    pub fn program_headers(&self) -> TableIter<'a, Elf32Phdr> {
        TableIter::new(
            self.data,
            self.hdr.e_phoff as usize,
            usize::from(self.hdr.e_phnum),
            PHDR_SIZE,
            parse_phdr,
        )
    }

    pub fn section_headers(&self) -> TableIter<'a, Elf32Shdr> {
        TableIter::new(
            self.data,
            self.hdr.e_shoff as usize,
            usize::from(self.hdr.e_shnum),
            SHDR_SIZE,
            parse_shdr,
        )
    }

    /// Returns the section header at `index`.
    pub fn section(&self, index: u32) -> Result<Elf32Shdr, ElfError> {
        if index >= u32::from(self.hdr.e_shnum) {
            return Err(ElfError::OutOfBounds);
        }
        let off = self.hdr.e_shoff as usize + index as usize * SHDR_SIZE;
        parse_shdr(get_range(self.data, off, SHDR_SIZE)?)
    }

    pub fn segment_data(&self, ph: &Elf32Phdr) -> Result<&'a [u8], ElfError> {
        get_range(self.data, ph.p_offset as usize, ph.p_filesz as usize)
    }

    /// Returns the file contents of a section. Sections without file data yield an empty slice.
    pub fn section_data(&self, sh: &Elf32Shdr) -> Result<&'a [u8], ElfError> {
        if sh.sh_type == abi::SHT_NOBITS {
            return Ok(&[]);
        }
        get_range(self.data, sh.sh_offset as usize, sh.sh_size as usize)
    }

    /// Returns the name of a section, read from the section name string table.
    pub fn section_name(&self, sh: &Elf32Shdr) -> Result<&'a str, ElfError> {
        let strtab = self.section(u32::from(self.hdr.e_shstrndx))?;
        read_str(self.section_data(&strtab)?, sh.sh_name as usize)
    }

    /// Looks up a section by name.
    pub fn section_by_name(&self, name: &str) -> Result<Option<Elf32Shdr>, ElfError> {
        if self.hdr.e_shnum == 0 {
            return Ok(None);
        }
        for sh in self.section_headers() {
            let sh = sh?;
            if self.section_name(&sh)? == name {
                return Ok(Some(sh));
            }
        }
        Ok(None)
    }

    /// Iterates the entries of the static symbol table, skipping the reserved null entry.
    /// Images without a symbol table yield no symbols.
    pub fn symbols(&self) -> Result<SymbolIter<'a>, ElfError> {
        let mut symtab = None;
        for sh in self.section_headers() {
            let sh = sh?;
            if sh.sh_type == abi::SHT_SYMTAB {
                symtab = Some(sh);
                break;
            }
        }

        let Some(symtab) = symtab else {
            return Ok(SymbolIter {
                syms: TableIter::new(&[], 0, 0, SYM_SIZE, parse_sym),
                strtab: &[],
            });
        };

        let strtab = self.section(symtab.sh_link)?;
        let data = self.section_data(&symtab)?;
        let count = data.len() / SYM_SIZE;

        let mut syms = TableIter::new(data, 0, count, SYM_SIZE, parse_sym);
        syms.next();

        Ok(SymbolIter {
            syms,
            strtab: self.section_data(&strtab)?,
        })
    }

    /// Looks up a symbol by name.
    pub fn find_symbol(&self, name: &str) -> Result<Option<Elf32Sym>, ElfError> {
        for sym in self.symbols()? {
            let (sym_name, sym) = sym?;
            if sym_name == name {
                return Ok(Some(sym));
            }
        }
        Ok(None)
    }

    /// Returns the symbol at `index` in the symbol table referenced by relocation section `rel`.
    pub fn relocation_symbol(&self, rel: &Elf32Shdr, index: u32) -> Result<Elf32Sym, ElfError> {
        let symtab = self.section(rel.sh_link)?;
        let data = self.section_data(&symtab)?;
        parse_sym(get_range(data, index as usize * SYM_SIZE, SYM_SIZE)?)
    }

    /// Iterates the entries of a `SHT_REL` section.
    pub fn relocations(&self, sh: &Elf32Shdr) -> Result<TableIter<'a, Elf32Rel>, ElfError> {
        let data = self.section_data(sh)?;
        Ok(TableIter::new(
            data,
            0,
            data.len() / REL_SIZE,
            REL_SIZE,
            parse_rel,
        ))
    }
}

impl Elf32Header {
    pub fn is_executable(&self) -> bool {
        self.e_type == abi::ET_EXEC
    }

    pub fn is_position_independent(&self) -> bool {
        self.e_type == abi::ET_DYN
    }
}

impl Elf32Phdr {
    pub fn is_load(&self) -> bool {
        self.p_type == abi::PT_LOAD
    }

    pub fn is_readable(&self) -> bool {
        (self.p_flags & abi::PF_R) != 0
    }

    pub fn is_writable(&self) -> bool {
        (self.p_flags & abi::PF_W) != 0
    }

    pub fn is_executable(&self) -> bool {
        (self.p_flags & abi::PF_X) != 0
    }

    /// Returns whether the virtual address `addr` falls inside this segment's memory image.
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.p_vaddr && addr - self.p_vaddr < self.p_memsz
    }
}

impl Elf32Sym {
    pub fn is_defined(&self) -> bool {
        self.st_shndx != abi::SHN_UNDEF
    }
}

impl Elf32Rel {
    pub fn sym(&self) -> u32 {
        self.r_info >> 8
    }

    pub fn kind(&self) -> u8 {
        self.r_info as u8
    }
}

/// Iterator over a table of fixed-size records.
pub struct TableIter<'a, T> {
    data: &'a [u8],
    off: usize,
    idx: usize,
    count: usize,
    entsz: usize,
    parse: fn(&[u8]) -> Result<T, ElfError>,
}

impl<'a, T> TableIter<'a, T> {
    fn new(
        data: &'a [u8],
        off: usize,
        count: usize,
        entsz: usize,
        parse: fn(&[u8]) -> Result<T, ElfError>,
    ) -> Self {
        Self {
            data,
            off,
            idx: 0,
            count,
            entsz,
            parse,
        }
    }
}

impl<T> Iterator for TableIter<'_, T> {
    type Item = Result<T, ElfError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.idx >= self.count {
            return None;
        }
        let start = self.off + self.idx * self.entsz;
        self.idx += 1;

        Some(get_range(self.data, start, self.entsz).and_then(self.parse))
    }
}

/// Iterator over named symbols.
pub struct SymbolIter<'a> {
    syms: TableIter<'a, Elf32Sym>,
    strtab: &'a [u8],
}

impl<'a> Iterator for SymbolIter<'a> {
    type Item = Result<(&'a str, Elf32Sym), ElfError>;

    fn next(&mut self) -> Option<Self::Item> {
        let strtab = self.strtab;
        self.syms.next().map(|sym| {
            let sym = sym?;
            Ok((read_str(strtab, sym.st_name as usize)?, sym))
        })
    }
}

fn parse_phdr(ph: &[u8]) -> Result<Elf32Phdr, ElfError> {
    // ELF32 Phdr is 32 bytes:
    // 0x00 p_type   (4)
    // 0x04 p_offset (4)
    // 0x08 p_vaddr  (4)
    // 0x0C p_paddr  (4)
    // 0x10 p_filesz (4)
    // 0x14 p_memsz  (4)
    // 0x18 p_flags  (4)
    // 0x1C p_align  (4)
    Ok(Elf32Phdr {
        p_type: read_u32_le(ph, 0x00)?,
        p_offset: read_u32_le(ph, 0x04)?,
        p_vaddr: read_u32_le(ph, 0x08)?,
        p_paddr: read_u32_le(ph, 0x0C)?,
        p_filesz: read_u32_le(ph, 0x10)?,
        p_memsz: read_u32_le(ph, 0x14)?,
        p_flags: read_u32_le(ph, 0x18)?,
        p_align: read_u32_le(ph, 0x1C)?,
    })
}

fn parse_shdr(sh: &[u8]) -> Result<Elf32Shdr, ElfError> {
    Ok(Elf32Shdr {
        sh_name: read_u32_le(sh, 0x00)?,
        sh_type: read_u32_le(sh, 0x04)?,
        sh_flags: read_u32_le(sh, 0x08)?,
        sh_addr: read_u32_le(sh, 0x0C)?,
        sh_offset: read_u32_le(sh, 0x10)?,
        sh_size: read_u32_le(sh, 0x14)?,
        sh_link: read_u32_le(sh, 0x18)?,
        sh_info: read_u32_le(sh, 0x1C)?,
        sh_addralign: read_u32_le(sh, 0x20)?,
        sh_entsize: read_u32_le(sh, 0x24)?,
    })
}

fn parse_sym(sym: &[u8]) -> Result<Elf32Sym, ElfError> {
    Ok(Elf32Sym {
        st_name: read_u32_le(sym, 0x00)?,
        st_value: read_u32_le(sym, 0x04)?,
        st_size: read_u32_le(sym, 0x08)?,
        st_info: *sym.get(0x0C).ok_or(ElfError::TooSmall)?,
        st_other: *sym.get(0x0D).ok_or(ElfError::TooSmall)?,
        st_shndx: read_u16_le(sym, 0x0E)?,
    })
}

fn parse_rel(rel: &[u8]) -> Result<Elf32Rel, ElfError> {
    Ok(Elf32Rel {
        r_offset: read_u32_le(rel, 0x00)?,
        r_info: read_u32_le(rel, 0x04)?,
    })
}

fn check_table(data: &[u8], off: u32, entsz: usize, num: u16) -> Result<(), ElfError> {
    if num == 0 {
        return Ok(());
    }
    let bytes = entsz
        .checked_mul(usize::from(num))
        .ok_or(ElfError::OutOfBounds)?;
    get_range(data, off as usize, bytes).map(|_| ())
}

fn read_str(strtab: &[u8], off: usize) -> Result<&str, ElfError> {
    let tail = strtab.get(off..).ok_or(ElfError::OutOfBounds)?;
    let len = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or(ElfError::BadString)?;
    core::str::from_utf8(&tail[..len]).map_err(|_| ElfError::BadString)
}

fn read_u16_le(b: &[u8], off: usize) -> Result<u16, ElfError> {
    let b = b.get(off..off + 2).ok_or(ElfError::TooSmall)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32_le(b: &[u8], off: usize) -> Result<u32, ElfError> {
    let b = b.get(off..off + 4).ok_or(ElfError::TooSmall)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn get_range(data: &[u8], off: usize, len: usize) -> Result<&[u8], ElfError> {
    let end = off.checked_add(len).ok_or(ElfError::OutOfBounds)?;
    data.get(off..end).ok_or(ElfError::OutOfBounds)
}

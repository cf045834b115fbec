//! Loading DSP executables.
//!
//! Images are ELF32 files for the C6000 core. Loadable segments are copied to DSP memory through
//! the board, position-independent images are relocated by the device load bias, and the
//! program arguments are laid out in the `.args` section so the DSP runtime can find them.

use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
    vec::Vec,
};

use elf::{abi, Elf32, Elf32Phdr};
use log::{debug, error};
use spin::Mutex;

use crate::{
    board::{Board, BoardError},
    config::ARGS_SECTION,
    error::{DspError, DspResult},
};

/// A trait for stores DSP executables are looked up in.
pub trait ImageSource: Send + Sync {
    /// Returns the contents of the image called `name`.
    fn open(&self, name: &str) -> Option<Vec<u8>>;
}

/// An [`ImageSource`] holding images in memory.
#[derive(Debug, Default)]
pub struct MemoryImages {
    images: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryImages {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the image called `name`.
    pub fn insert(&self, name: &str, image: Vec<u8>) {
        self.images.lock().insert(name.to_string(), image);
    }

    /// Removes the image called `name`, returning whether it existed.
    pub fn remove(&self, name: &str) -> bool {
        self.images.lock().remove(name).is_some()
    }
}

impl ImageSource for MemoryImages {
    fn open(&self, name: &str) -> Option<Vec<u8>> {
        self.images.lock().get(name).cloned()
    }
}

/// An image written to DSP memory.
#[derive(Debug, Clone)]
pub struct CodImage {
    name: String,
    entry: u32,
    symbols: BTreeMap<String, u32>,
}

impl CodImage {
    /// Writes the image in `bytes` to DSP memory and passes it `argv` and `envp`.
    ///
    /// `bias` is added to every address of a position-independent image and ignored otherwise.
    pub fn load(
        board: &dyn Board,
        name: &str,
        bytes: &[u8],
        argv: &[&str],
        envp: &[&str],
        bias: u32,
    ) -> DspResult<Self> {
        let elf = Elf32::parse(bytes).map_err(|e| {
            error!("{}: {}", name, e);
            DspError::CorruptFile
        })?;

        let hdr = elf.header();
        let bias = if hdr.is_position_independent() {
            bias
        } else if hdr.is_executable() {
            0
        } else {
            error!("{}: not an executable image", name);
            return Err(DspError::CorruptFile);
        };

        let mut segments = Vec::new();
        for ph in elf.program_headers() {
            let ph = ph?;
            if !ph.is_load() {
                continue;
            }
            if ph.p_filesz > ph.p_memsz {
                error!("{}: segment at {:#x} larger on file than in memory", name, ph.p_vaddr);
                return Err(DspError::CorruptFile);
            }
            let fits = ph
                .p_vaddr
                .checked_add(bias)
                .and_then(|addr| addr.checked_add(ph.p_memsz))
                .is_some();
            if !fits {
                error!("{}: segment at {:#x} past the end of memory", name, ph.p_vaddr);
                return Err(DspError::CorruptFile);
            }
            segments.push((ph, elf.segment_data(&ph)?.to_vec()));
        }

        if bias != 0 {
            relocate(&elf, &mut segments, bias)?;
        }

        for (ph, data) in &segments {
            let addr = ph.p_vaddr + bias;
            debug!(
                "{}: segment {:#010x}-{:#010x} {}{}{}",
                name,
                addr,
                addr + ph.p_memsz,
                if ph.is_readable() { 'r' } else { '-' },
                if ph.is_writable() { 'w' } else { '-' },
                if ph.is_executable() { 'x' } else { '-' },
            );
            board.write(addr, data).map_err(|e| {
                error!("{}: writing segment at {:#x}: {}", name, addr, e);
                DspError::Fail
            })?;
            zero_fill(board, addr + ph.p_filesz, ph.p_memsz - ph.p_filesz).map_err(|e| {
                error!("{}: clearing segment at {:#x}: {}", name, addr, e);
                DspError::Fail
            })?;
        }

        let mut symbols = BTreeMap::new();
        for sym in elf.symbols()? {
            let (sym_name, sym) = sym?;
            if sym.is_defined() && !sym_name.is_empty() {
                symbols.insert(sym_name.to_string(), sym.st_value.wrapping_add(bias));
            }
        }

        if let Some(args) = elf.section_by_name(ARGS_SECTION)? {
            let addr = args
                .sh_addr
                .checked_add(bias)
                .filter(|addr| addr.checked_add(args.sh_size).is_some())
                .ok_or_else(|| {
                    error!("{}: {} past the end of memory", name, ARGS_SECTION);
                    DspError::CorruptFile
                })?;
            let block = args_block(addr, args.sh_size, argv, envp).ok_or_else(|| {
                error!("{}: arguments do not fit in {}", name, ARGS_SECTION);
                DspError::Fail
            })?;
            board.write(addr, &block).map_err(|e| {
                error!("{}: writing arguments at {:#x}: {}", name, addr, e);
                DspError::Fail
            })?;
        }

        let entry = hdr.e_entry.checked_add(bias).ok_or(DspError::CorruptFile)?;

        Ok(Self {
            name: name.to_string(),
            entry,
            symbols,
        })
    }

    /// Returns the name the image was loaded from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the DSP address execution starts at.
    pub fn entry(&self) -> u32 {
        self.entry
    }

    /// Returns the DSP address of the symbol called `name`.
    pub fn symbol(&self, name: &str) -> Option<u32> {
        self.symbols.get(name).copied()
    }
}

/// Applies the REL tables of `elf` to the segment contents, assuming the image is moved by
/// `bias`.
fn relocate(elf: &Elf32<'_>, segments: &mut [(Elf32Phdr, Vec<u8>)], bias: u32) -> DspResult<()> {
    for sh in elf.section_headers() {
        let sh = sh?;
        if sh.sh_type != abi::SHT_REL {
            continue;
        }

        for rel in elf.relocations(&sh)? {
            let rel = rel?;
            match rel.kind() {
                abi::R_C6000_NONE => continue,
                abi::R_C6000_ABS32 => {}
                kind => {
                    error!("unsupported relocation type {}", kind);
                    return Err(DspError::CorruptFile);
                }
            }

            let (ph, data) = segments
                .iter_mut()
                .find(|(ph, _)| ph.contains(rel.r_offset))
                .ok_or(DspError::CorruptFile)?;
            let off = (rel.r_offset - ph.p_vaddr) as usize;
            let word = data.get_mut(off..off + 4).ok_or(DspError::CorruptFile)?;
            let addend = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);

            let value = if rel.sym() == 0 {
                addend.wrapping_add(bias)
            } else {
                let sym = elf.relocation_symbol(&sh, rel.sym())?;
                if !sym.is_defined() {
                    error!("relocation at {:#x} against an undefined symbol", rel.r_offset);
                    return Err(DspError::CorruptFile);
                }
                sym.st_value.wrapping_add(bias).wrapping_add(addend)
            };
            word.copy_from_slice(&value.to_le_bytes());
        }
    }
    Ok(())
}

/// Clears `len` bytes of DSP memory at `addr`, the part of a segment with no file contents.
fn zero_fill(board: &dyn Board, addr: u32, len: u32) -> Result<(), BoardError> {
    const ZEROES: [u8; 256] = [0; 256];

    let mut done = 0;
    while done < len {
        let n = (len - done).min(ZEROES.len() as u32);
        board.write(addr + done, &ZEROES[..n as usize])?;
        done += n;
    }
    Ok(())
}

/// Lays out the argument block placed at `base`:
///
/// ```text
/// argc | argv | envp | argv[0..argc] 0 | envp[..] 0 | strings
/// ```
///
/// All words are little-endian and pointers are DSP addresses. `base + size` must not overflow.
/// Returns `None` if the block does not fit in `size` bytes.
fn args_block(base: u32, size: u32, argv: &[&str], envp: &[&str]) -> Option<Vec<u8>> {
    let words = 3 + argv.len() + 1 + envp.len() + 1;
    let strings: usize = argv.iter().chain(envp).map(|s| s.len() + 1).sum();
    let total = words * 4 + strings;
    if total > size as usize {
        return None;
    }

    let argv_addr = base + 12;
    let envp_addr = argv_addr + 4 * (argv.len() as u32 + 1);
    let mut str_addr = envp_addr + 4 * (envp.len() as u32 + 1);

    let mut block = Vec::with_capacity(total);
    let mut strings = Vec::with_capacity(strings);
    block.extend_from_slice(&(argv.len() as u32).to_le_bytes());
    block.extend_from_slice(&argv_addr.to_le_bytes());
    block.extend_from_slice(&envp_addr.to_le_bytes());

    for list in [argv, envp] {
        for s in list {
            block.extend_from_slice(&str_addr.to_le_bytes());
            strings.extend_from_slice(s.as_bytes());
            strings.push(0);
            str_addr += s.len() as u32 + 1;
        }
        block.extend_from_slice(&0u32.to_le_bytes());
    }

    block.extend_from_slice(&strings);
    Some(block)
}

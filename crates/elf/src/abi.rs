//! Numeric constants from the System V ELF ABI and the TI C6000 ELF supplement.

/// Relocatable object file.
pub const ET_REL: u16 = 1;
/// Executable file loaded at fixed addresses.
pub const ET_EXEC: u16 = 2;
/// Position-independent image.
pub const ET_DYN: u16 = 3;

/// TI TMS320C6000 DSP family.
pub const EM_TI_C6000: u16 = 140;

/// Loadable segment.
pub const PT_LOAD: u32 = 1;

/// Executable segment.
pub const PF_X: u32 = 0x1;
/// Writable segment.
pub const PF_W: u32 = 0x2;
/// Readable segment.
pub const PF_R: u32 = 0x4;

/// Section with program-defined contents.
pub const SHT_PROGBITS: u32 = 1;
/// Symbol table.
pub const SHT_SYMTAB: u32 = 2;
/// String table.
pub const SHT_STRTAB: u32 = 3;
/// Section occupying no file space.
pub const SHT_NOBITS: u32 = 8;
/// Relocation entries without addends.
pub const SHT_REL: u32 = 9;

/// Absolute symbol, not relative to any section.
pub const SHN_ABS: u16 = 0xfff1;
/// Undefined symbol.
pub const SHN_UNDEF: u16 = 0;

/// No relocation.
pub const R_C6000_NONE: u8 = 0;
/// Direct 32-bit relocation.
pub const R_C6000_ABS32: u8 = 1;

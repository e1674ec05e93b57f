//! Cartridge loading
//!
//! Parses iNES images. Only the fixed-mapping board (NROM) is modeled: the
//! program image is placed so it ends at $FFFF and the pattern image fills PPU
//! $0000-$1FFF.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

/// iNES header size
pub const HEADER_SIZE: usize = 16;

/// Program bank size (16KB)
pub const PRG_BANK_SIZE: usize = 16 * 1024;

/// Pattern bank size (8KB)
pub const CHR_BANK_SIZE: usize = 8 * 1024;

/// Trainer size, present when flags 6 bit 2 is set
pub const TRAINER_SIZE: usize = 512;

const MAGIC: [u8; 4] = [b'N', b'E', b'S', 0x1A];

/// Nametable mirroring, fixed by the cartridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mirroring {
    /// $2000/$2400 share a bank, $2800/$2C00 share the other
    #[default]
    Horizontal,
    /// $2000/$2800 share a bank, $2400/$2C00 share the other
    Vertical,
}

/// iNES header structure
#[derive(Debug, Clone)]
pub struct InesHeader {
    /// PRG ROM size in 16KB units
    pub prg_rom_banks: u8,
    /// CHR ROM size in 8KB units
    pub chr_rom_banks: u8,
    /// Flags 6
    pub flags_6: u8,
    /// Flags 7
    pub flags_7: u8,
}

impl InesHeader {
    /// Parse an iNES header from bytes
    pub fn parse(bytes: &[u8]) -> Result<Self, CartridgeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CartridgeError::InvalidHeader("too short"));
        }
        if bytes[0..4] != MAGIC {
            return Err(CartridgeError::InvalidHeader("missing NES<EOF> signature"));
        }

        Ok(Self {
            prg_rom_banks: bytes[4],
            chr_rom_banks: bytes[5],
            flags_6: bytes[6],
            flags_7: bytes[7],
        })
    }

    /// Mapper number from the high nibbles of flags 6 and 7
    pub fn mapper_number(&self) -> u8 {
        (self.flags_6 >> 4) | (self.flags_7 & 0xF0)
    }

    /// Check if a 512-byte trainer precedes the program data
    pub fn has_trainer(&self) -> bool {
        (self.flags_6 & 0x04) != 0
    }

    /// Flags 6 bit 0 selects vertical mirroring
    pub fn mirroring(&self) -> Mirroring {
        if self.flags_6 & 0x01 != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        }
    }
}

/// Cartridge contents ready to be copied onto the bus
#[derive(Debug, Clone)]
pub struct Cartridge {
    prg_rom: Vec<u8>,
    chr_rom: Vec<u8>,
    mirroring: Mirroring,
}

impl Cartridge {
    /// Build a cartridge from raw program and pattern images
    pub fn new(prg_rom: Vec<u8>, chr_rom: Vec<u8>, mirroring: Mirroring) -> Self {
        Self {
            prg_rom,
            chr_rom,
            mirroring,
        }
    }

    /// Read and parse an iNES file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CartridgeError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| CartridgeError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_rom(&bytes)
    }

    /// Parse an in-memory iNES image
    pub fn from_rom(rom_data: &[u8]) -> Result<Self, CartridgeError> {
        let header = InesHeader::parse(rom_data)?;

        let mut offset = HEADER_SIZE;
        if header.has_trainer() {
            offset += TRAINER_SIZE;
        }

        let prg_size = header.prg_rom_banks as usize * PRG_BANK_SIZE;
        let prg_rom = slice_section(rom_data, offset, prg_size)?.to_vec();
        offset += prg_size;

        let chr_size = header.chr_rom_banks as usize * CHR_BANK_SIZE;
        let chr_rom = slice_section(rom_data, offset, chr_size)?.to_vec();

        let mapper = header.mapper_number();
        if mapper != 0 {
            warn!(mapper, "only fixed mapping is emulated; bank switching is ignored");
        }

        let mirroring = header.mirroring();
        info!(
            prg_banks = header.prg_rom_banks,
            chr_banks = header.chr_rom_banks,
            ?mirroring,
            "loaded cartridge"
        );

        Ok(Self {
            prg_rom,
            chr_rom,
            mirroring,
        })
    }

    /// Get PRG ROM data
    pub fn prg_rom(&self) -> &[u8] {
        &self.prg_rom
    }

    /// Get CHR ROM data; empty when the board uses pattern RAM
    pub fn chr_rom(&self) -> &[u8] {
        &self.chr_rom
    }

    /// Nametable mirroring selected by the header
    pub fn mirroring(&self) -> Mirroring {
        self.mirroring
    }
}

fn slice_section(data: &[u8], offset: usize, len: usize) -> Result<&[u8], CartridgeError> {
    data.get(offset..offset + len)
        .ok_or(CartridgeError::Truncated {
            expected: offset + len,
            actual: data.len(),
        })
}

/// Cartridge error types
#[derive(Debug, Error)]
pub enum CartridgeError {
    #[error("failed to open cartridge {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid iNES header: {0}")]
    InvalidHeader(&'static str),

    #[error("truncated image: header needs {expected} bytes, file has {actual}")]
    Truncated { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_rom(prg_banks: u8, chr_banks: u8, flags_6: u8) -> Vec<u8> {
        let mut rom = Vec::new();
        rom.extend_from_slice(&MAGIC);
        rom.push(prg_banks);
        rom.push(chr_banks);
        rom.push(flags_6);
        rom.extend_from_slice(&[0u8; 9]);
        if flags_6 & 0x04 != 0 {
            rom.extend_from_slice(&[0xEEu8; TRAINER_SIZE]);
        }
        rom.extend(std::iter::repeat(0xAA).take(prg_banks as usize * PRG_BANK_SIZE));
        rom.extend(std::iter::repeat(0x55).take(chr_banks as usize * CHR_BANK_SIZE));
        rom
    }

    #[test]
    fn test_header_parsing() {
        let rom = build_rom(2, 1, 0x01);
        let header = InesHeader::parse(&rom).unwrap();
        assert_eq!(header.prg_rom_banks, 2);
        assert_eq!(header.chr_rom_banks, 1);
        assert_eq!(header.mirroring(), Mirroring::Vertical);
        assert_eq!(header.mapper_number(), 0);
    }

    #[test]
    fn test_mirroring_bit_clear_is_horizontal() {
        let header = InesHeader::parse(&build_rom(1, 1, 0x00)).unwrap();
        assert_eq!(header.mirroring(), Mirroring::Horizontal);
    }

    #[test]
    fn test_cartridge_from_rom() {
        let cart = Cartridge::from_rom(&build_rom(1, 1, 0)).unwrap();
        assert_eq!(cart.prg_rom().len(), PRG_BANK_SIZE);
        assert_eq!(cart.chr_rom().len(), CHR_BANK_SIZE);
        assert!(cart.prg_rom().iter().all(|&b| b == 0xAA));
        assert!(cart.chr_rom().iter().all(|&b| b == 0x55));
    }

    #[test]
    fn test_trainer_is_skipped() {
        let cart = Cartridge::from_rom(&build_rom(1, 0, 0x04)).unwrap();
        assert_eq!(cart.prg_rom()[0], 0xAA);
        assert!(cart.chr_rom().is_empty());
    }

    #[test]
    fn test_truncated_image() {
        let mut rom = build_rom(2, 1, 0);
        rom.truncate(HEADER_SIZE + PRG_BANK_SIZE);
        assert!(matches!(
            Cartridge::from_rom(&rom),
            Err(CartridgeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_bad_signature() {
        let mut rom = build_rom(1, 1, 0);
        rom[3] = 0;
        assert!(matches!(
            Cartridge::from_rom(&rom),
            Err(CartridgeError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_missing_file_is_open_error() {
        let err = Cartridge::load("/nonexistent/definitely-missing.nes").unwrap_err();
        assert!(matches!(err, CartridgeError::Open { .. }));
    }
}

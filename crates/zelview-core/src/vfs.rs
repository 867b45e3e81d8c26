/// ZELVIEW0 container format.
///
/// A portable repack of one scene plus its rooms:
///   [0x00..0x08]  Magic: "ZELVIEW0"
///   [0x08..0x0C]  Entry count: u32 LE
///   [0x0C..0x10]  Main (scene) entry index: u32 LE
///   then `count` 0x40-byte records:
///   [0x00..0x30]  Filename, NUL-padded
///   [0x30..0x34]  pStart: u32 LE   (payload range in this file)
///   [0x34..0x38]  pEnd:   u32 LE
///   [0x38..0x3C]  vStart: u32 LE   (range used for address resolution)
///   [0x3C..0x40]  vEnd:   u32 LE
/// File payloads follow the record table in record order.
use crate::segment::Bank;

pub const MAGIC: &[u8; 8] = b"ZELVIEW0";

const ENTRY_SIZE: usize = 0x40;
const FILENAME_SIZE: usize = 0x30;

#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    #[error("Not a ZELVIEW0 file (bad magic)")]
    BadMagic,
    #[error("Truncated container (need {needed} bytes, have {have})")]
    Truncated { needed: usize, have: usize },
    #[error("Main entry index {0} out of range ({1} entries)")]
    BadMainIndex(u32, u32),
}

/// One file record. Immutable once parsed; uniquely keyed by `p_start`.
#[derive(Debug, Clone)]
pub struct VfsEntry {
    pub filename: String,
    pub p_start: u32,
    pub p_end: u32,
    pub v_start: u32,
    pub v_end: u32,
}

impl VfsEntry {
    /// The bank this file provides when bound as scene or room data.
    pub fn bank(&self) -> Bank {
        Bank::new(self.v_start, self.v_end)
    }

    /// Logical (decompressed) byte length.
    pub fn virtual_len(&self) -> u32 {
        self.v_end.wrapping_sub(self.v_start)
    }
}

/// A parsed container: the source buffer plus its file directory.
pub struct Vfs {
    data: Vec<u8>,
    entries: Vec<VfsEntry>,
    main_index: usize,
}

/// Decode a NUL-padded fixed-width string field.
fn read0_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn read_u32_le(data: &[u8], offs: usize) -> u32 {
    let b = &data[offs..offs + 4];
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

impl Vfs {
    pub fn parse(data: Vec<u8>) -> Result<Self, VfsError> {
        if data.len() < MAGIC.len() || &data[0..8] != MAGIC {
            return Err(VfsError::BadMagic);
        }
        if data.len() < 0x10 {
            return Err(VfsError::Truncated {
                needed: 0x10,
                have: data.len(),
            });
        }

        let count = read_u32_le(&data, 0x08);
        let main_index = read_u32_le(&data, 0x0C);

        let table_end = 0x10 + count as usize * ENTRY_SIZE;
        if data.len() < table_end {
            return Err(VfsError::Truncated {
                needed: table_end,
                have: data.len(),
            });
        }
        if main_index >= count {
            return Err(VfsError::BadMainIndex(main_index, count));
        }

        let mut entries = Vec::with_capacity(count as usize);
        let mut offs = 0x10;
        for _ in 0..count {
            entries.push(VfsEntry {
                filename: read0_string(&data[offs..offs + FILENAME_SIZE]),
                p_start: read_u32_le(&data, offs + 0x30),
                p_end: read_u32_le(&data, offs + 0x34),
                v_start: read_u32_le(&data, offs + 0x38),
                v_end: read_u32_le(&data, offs + 0x3C),
            });
            offs += ENTRY_SIZE;
        }

        Ok(Self {
            data,
            entries,
            main_index: main_index as usize,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn entries(&self) -> &[VfsEntry] {
        &self.entries
    }

    /// The container's designated scene file.
    pub fn main_entry(&self) -> &VfsEntry {
        &self.entries[self.main_index]
    }

    pub fn lookup_by_filename(&self, filename: &str) -> Option<&VfsEntry> {
        self.entries.iter().find(|e| e.filename == filename)
    }

    pub fn lookup_by_p_start(&self, p_start: u32) -> Option<&VfsEntry> {
        self.entries.iter().find(|e| e.p_start == p_start)
    }

    /// The raw (possibly compressed) payload bytes for an entry.
    pub fn entry_data(&self, entry: &VfsEntry) -> Option<&[u8]> {
        self.data.get(entry.p_start as usize..entry.p_end as usize)
    }
}

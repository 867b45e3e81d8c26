/// Segmented address resolution.
///
/// Scene data references other data through 32-bit virtual addresses:
/// the top byte selects a bank (0x02 = scene file, 0x03 = room file),
/// the low 24 bits are an offset into that file. Banks are bound while
/// a scene or room is being decoded and map into one flat byte buffer.

/// Segment tag for the scene file bank.
pub const SEGMENT_SCENE: u8 = 0x02;
/// Segment tag for the room file bank.
pub const SEGMENT_ROOM: u8 = 0x03;

/// The byte range of the file currently providing a bank's data,
/// as absolute offsets into the flat source buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bank {
    pub v_start: u32,
    pub v_end: u32,
}

impl Bank {
    pub fn new(v_start: u32, v_end: u32) -> Self {
        Self { v_start, v_end }
    }
}

/// The banks active while decoding one scene or one room.
///
/// Exactly one scene bank and at most one room bank are bound at a
/// time. Entering a room constructs a fresh set via [`BankSet::with_room`];
/// the parent's set is never mutated.
#[derive(Clone, Copy, Debug, Default)]
pub struct BankSet {
    pub scene: Option<Bank>,
    pub room: Option<Bank>,
}

impl BankSet {
    pub fn for_scene(scene: Bank) -> Self {
        Self {
            scene: Some(scene),
            room: None,
        }
    }

    /// A new set with the room bank (re)bound. Used when recursing
    /// into a room header.
    pub fn with_room(&self, room: Bank) -> Self {
        Self {
            scene: self.scene,
            room: Some(room),
        }
    }

    /// Translate a virtual address into an absolute buffer offset.
    ///
    /// Returns `None` for an unknown segment tag, an unbound bank, or
    /// an offset past the bank's end. Callers treat `None` as "absent"
    /// and skip the dependent read.
    pub fn resolve(&self, addr: u32) -> Option<usize> {
        let bank = match (addr >> 24) as u8 {
            SEGMENT_SCENE => self.scene?,
            SEGMENT_ROOM => self.room?,
            _ => return None,
        };
        let offs = addr & 0x00FF_FFFF;
        let abs = bank.v_start.checked_add(offs)?;
        if abs >= bank.v_end {
            return None;
        }
        Some(abs as usize)
    }
}

/// A [`BankSet`] paired with the source buffer: checked big-endian
/// reads through virtual addresses. Every accessor returns `None` when
/// the address does not resolve or the read would run off the buffer.
#[derive(Clone, Copy)]
pub struct SegmentReader<'a> {
    data: &'a [u8],
    banks: BankSet,
}

impl<'a> SegmentReader<'a> {
    pub fn new(data: &'a [u8], banks: BankSet) -> Self {
        Self { data, banks }
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn banks(&self) -> BankSet {
        self.banks
    }

    pub fn resolve(&self, addr: u32) -> Option<usize> {
        let offs = self.banks.resolve(addr)?;
        if offs < self.data.len() {
            Some(offs)
        } else {
            None
        }
    }

    pub fn read_u8(&self, addr: u32) -> Option<u8> {
        let offs = self.resolve(addr)?;
        self.data.get(offs).copied()
    }

    pub fn read_u16(&self, addr: u32) -> Option<u16> {
        let offs = self.resolve(addr)?;
        let b = self.data.get(offs..offs + 2)?;
        Some(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_i16(&self, addr: u32) -> Option<i16> {
        self.read_u16(addr).map(|v| v as i16)
    }

    pub fn read_u32(&self, addr: u32) -> Option<u32> {
        let offs = self.resolve(addr)?;
        let b = self.data.get(offs..offs + 4)?;
        Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Read a big-endian u16 at an absolute offset. Returns 0 past the end.
pub(crate) fn read_u16_at(data: &[u8], offs: usize) -> u16 {
    match data.get(offs..offs + 2) {
        Some(b) => u16::from_be_bytes([b[0], b[1]]),
        None => 0,
    }
}

/// Read a big-endian u32 at an absolute offset. Returns 0 past the end.
pub(crate) fn read_u32_at(data: &[u8], offs: usize) -> u32 {
    match data.get(offs..offs + 4) {
        Some(b) => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
        None => 0,
    }
}

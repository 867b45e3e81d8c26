/// Ocarina of Time ROM layout.
///
/// Reads the file directory straight out of the original ROM: a DMA
/// table of {vStart, vEnd, pStart, pEnd} quads followed by a packed
/// filename table, plus a few header strings. Scene files in the
/// supported ROM build are stored uncompressed, so a scene's pStart is
/// also where its data lives.
use crate::segment::{read_u32_at, Bank};

/// DMA table offset in the debug ROM build.
pub const DMA_TABLE_OFFSET: usize = 0x12F70;
/// Filename table offset in the debug ROM build.
pub const FILE_TABLE_OFFSET: usize = 0xBE80;

const SENTINEL: u32 = 0xFFFF_FFFF;

#[derive(Debug, thiserror::Error)]
pub enum RomError {
    #[error("ROM too small ({0} bytes)")]
    TooSmall(usize),
    #[error("DMA table at {0:#X} runs past the end of the ROM")]
    BadDmaTable(usize),
}

/// Coarse file classification from the filename table. Advisory only;
/// the decoders never branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Scene,
    Room,
    Overlay,
    Object,
    Unknown,
}

impl FileKind {
    fn classify(filename: &str) -> Self {
        if filename.ends_with("_scene") {
            FileKind::Scene
        } else if filename.contains("_room_") {
            FileKind::Room
        } else if filename.starts_with("ovl_") {
            FileKind::Overlay
        } else if filename.starts_with("object_") {
            FileKind::Object
        } else {
            FileKind::Unknown
        }
    }
}

/// One DMA table record.
#[derive(Debug, Clone)]
pub struct DmaEntry {
    pub filename: String,
    pub kind: FileKind,
    pub v_start: u32,
    pub v_end: u32,
    pub p_start: u32,
    pub p_end: u32,
    /// False when pStart/pEnd hold the all-ones sentinel; such entries
    /// are excluded from lookup.
    pub valid: bool,
}

impl DmaEntry {
    pub fn length(&self) -> u32 {
        self.v_end.wrapping_sub(self.v_start)
    }
}

pub struct Rom {
    data: Vec<u8>,
    pub title: String,
    pub game_id: String,
    pub version: u8,
    pub creator: String,
    pub build_date: String,
    dma_table: Vec<DmaEntry>,
}

/// Decode a NUL-terminated string of at most `max_len` bytes.
fn read0_string(data: &[u8], offs: usize, max_len: usize) -> String {
    let end = (offs + max_len).min(data.len());
    let field = &data[offs.min(data.len())..end];
    let len = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..len]).into_owned()
}

fn read_dma_table(data: &[u8], mut offs: usize) -> Result<Vec<DmaEntry>, RomError> {
    let mut table = Vec::new();
    loop {
        if offs + 0x10 > data.len() {
            return Err(RomError::BadDmaTable(offs));
        }
        let v_start = read_u32_at(data, offs);
        let v_end = read_u32_at(data, offs + 0x4);
        let p_start = read_u32_at(data, offs + 0x8);
        let mut p_end = read_u32_at(data, offs + 0xC);
        offs += 0x10;

        // All-zero entry terminates the table.
        if v_start == 0 && v_end == 0 && p_start == 0 {
            break;
        }

        let valid = p_start != SENTINEL && p_end != SENTINEL;
        // Uncompressed files leave pEnd blank.
        if p_end == 0 {
            p_end = p_start.wrapping_add(v_end.wrapping_sub(v_start));
        }

        table.push(DmaEntry {
            filename: String::new(),
            kind: FileKind::Unknown,
            v_start,
            v_end,
            p_start,
            p_end,
            valid,
        });
    }
    Ok(table)
}

/// Fill in filenames from the packed name table: NUL-terminated
/// strings, one per valid DMA entry, stepped by length + 1 and then
/// rounded to the next 4-byte boundary.
fn read_file_table(data: &[u8], mut offs: usize, table: &mut [DmaEntry]) {
    for entry in table.iter_mut() {
        if !entry.valid {
            continue;
        }
        let filename = read0_string(data, offs, 64);
        offs += filename.len() + 1;
        offs = (offs + 4) & !3;
        entry.kind = FileKind::classify(&filename);
        entry.filename = filename;
    }
}

impl Rom {
    pub fn parse(data: Vec<u8>) -> Result<Self, RomError> {
        if data.len() < DMA_TABLE_OFFSET + 0x10 {
            return Err(RomError::TooSmall(data.len()));
        }

        let title = read0_string(&data, 0x20, 0x14);
        let game_id = read0_string(&data, 0x3B, 0x4);
        let version = data[0x3F];
        let creator = read0_string(&data, 0x12F40, 0x10);
        let build_date = read0_string(&data, 0x12F50, 0x20);

        let mut dma_table = read_dma_table(&data, DMA_TABLE_OFFSET)?;
        read_file_table(&data, FILE_TABLE_OFFSET, &mut dma_table);
        log::info!(
            "ROM \"{}\" ({}, v{}): {} files, built {}",
            title,
            game_id,
            version,
            dma_table.len(),
            build_date
        );

        Ok(Self {
            data,
            title,
            game_id,
            version,
            creator,
            build_date,
            dma_table,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn dma_table(&self) -> &[DmaEntry] {
        &self.dma_table
    }

    pub fn lookup_by_filename(&self, filename: &str) -> Option<&DmaEntry> {
        self.dma_table
            .iter()
            .find(|e| e.valid && e.filename == filename)
    }

    pub fn lookup_by_p_start(&self, p_start: u32) -> Option<&DmaEntry> {
        self.dma_table
            .iter()
            .find(|e| e.valid && e.p_start == p_start)
    }

    /// The bank a file provides when its data is addressed in place
    /// (uncompressed files only).
    pub fn bank_for(&self, entry: &DmaEntry) -> Bank {
        Bank::new(entry.p_start, entry.p_end)
    }

    /// Well-known scene start offsets for this ROM build, with display
    /// names. Offsets are pStart values in the DMA table.
    pub fn scene_table() -> &'static [(u32, &'static str)] {
        SCENE_TABLE
    }
}

/// Scene file offsets in the debug ROM, in no particular order.
#[rustfmt::skip]
static SCENE_TABLE: &[(u32, &str)] = &[
    (0x01FC2000, "Inside the Deku Tree"),
    (0x0203A000, "Dodongo's Cavern"),
    (0x020E0000, "Inside Jabu-Jabu's Belly"),
    (0x02149000, "Forest Temple"),
    (0x02213000, "Fire Temple"),
    (0x0230B000, "Water Temple"),
    (0x023DC000, "Spirit Temple"),
    (0x024EA000, "Shadow Temple"),
    (0x0258E000, "Bottom of the Well"),
    (0x025CC000, "Ice Cavern"),
    (0x03130000, "Ganon's Castle Tower"),
    (0x02635000, "Gerudo Training Grounds"),
    (0x0340B000, "Thieves' Hideout"),
    (0x026A4000, "Ganon's Castle"),
    (0x03505000, "Ganon's Castle Tower (Crumbling)"),
    (0x0358C000, "Ganon's Castle (Crumbling)"),
    (0x034E1000, "Treasure Chest Contest"),
    (0x03101000, "Inside the Deku Tree (Boss)"),
    (0x030F5000, "Dodongo's Cavern (Boss)"),
    (0x02EFD000, "Inside Jabu-Jabu's Belly (Boss)"),
    (0x02C74000, "Forest Temple (Boss)"),
    (0x02F08000, "Fire Temple (Boss)"),
    (0x0311D000, "Water Temple (Boss)"),
    (0x031A4000, "Spirit Temple (Mid-Boss)"),
    (0x03111000, "Shadow Temple (Boss)"),
    (0x03196000, "Second-To-Last Boss Ganondorf"),
    (0x03234000, "Ganondorf, Death Scene"),
    (0x02C4D000, "Market Entrance (Day)"),
    (0x02D9D000, "Market Entrance (Night)"),
    (0x02DC4000, "Market Entrance (Adult)"),
    (0x02D07000, "Back Alley (Day)"),
    (0x02DEB000, "Back Alley (Night)"),
    (0x02AE4000, "Market (Day)"),
    (0x02AED000, "Market (Night)"),
    (0x02D98000, "Market (Adult)"),
    (0x032DD000, "Temple of Time (Outside, Day)"),
    (0x0334C000, "Temple of Time (Outside, Night)"),
    (0x033A1000, "Temple of Time (Outside, Adult)"),
    (0x02BBC000, "Know-it-all Brothers"),
    (0x02E68000, "House of Twins"),
    (0x031C6000, "Mido's House"),
    (0x03201000, "Saria's House"),
    (0x02ED1000, "Kakariko Village House"),
    (0x03254000, "Back Alley Village House"),
    (0x02C9F000, "Kakariko Bazaar"),
    (0x02B8A000, "Kokiri Shop"),
    (0x02F7F000, "Goron Shop"),
    (0x02FA7000, "Zora Shop"),
    (0x02FCF000, "Kakariko Potion Shop"),
    (0x02FFC000, "Market Potion Shop"),
    (0x03024000, "Bombchu Shop"),
    (0x0354B000, "Happy Mask Shop"),
    (0x02B60000, "Link's House"),
    (0x0304E000, "Puppy Woman's House"),
    (0x02EA1000, "Stables"),
    (0x03076000, "Impa's House"),
    (0x0347F000, "Lakeside Laboratory"),
    (0x030A4000, "Carpenter's Tent"),
    (0x02F19000, "Dampé's Hut"),
    (0x02F44000, "Great Fairy Fountain"),
    (0x02F5F000, "Small Fairy Fountain"),
    (0x02F6D000, "Magic Fairy Fountain"),
    (0x02BE9000, "Grottos"),
    (0x02F56000, "Grave (1)"),
    (0x033F6000, "Grave (2)"),
    (0x03463000, "Royal Family's Tomb"),
    (0x02C8A000, "Shooting Gallery"),
    (0x02B24000, "Temple of Time Inside"),
    (0x02B0C000, "Chamber of Sages"),
    (0x02CCA000, "Castle Courtyard (Day)"),
    (0x0343F000, "Castle Courtyard (Night)"),
    (0x02E63000, "Cutscene Map"),
    (0x0329B000, "Dampé's Grave & Kakariko Windmill"),
    (0x03332000, "Fishing Pond"),
    (0x030D9000, "Zelda's Courtyard"),
    (0x0344D000, "Bombchu Bowling Alley"),
    (0x03499000, "Talon's House"),
    (0x034BE000, "Lots'o Pots"),
    (0x034CF000, "Granny's Potion Shop"),
    (0x03535000, "Final Battle against Ganon"),
    (0x0357B000, "Skulltula House"),
    (0x027D6000, "Hyrule Field"),
    (0x02817000, "Kakariko Village"),
    (0x0283E000, "Kakariko Graveyard"),
    (0x0286B000, "Zora's River"),
    (0x0288D000, "Kokiri Forest"),
    (0x028CA000, "Sacred Forest Meadow"),
    (0x028E9000, "Lake Hylia"),
    (0x02910000, "Zora's Domain"),
    (0x0292E000, "Zora's Fountain"),
    (0x02949000, "Gerudo Valley"),
    (0x02964000, "Lost Woods"),
    (0x029A4000, "Desert Colossus"),
    (0x029CB000, "Gerudo's Fortress"),
    (0x029FA000, "Haunted Wasteland"),
    (0x02A14000, "Hyrule Castle"),
    (0x02A3B000, "Death Mountain"),
    (0x02A65000, "Death Mountain Crater"),
    (0x02A8F000, "Goron City"),
    (0x02D7F000, "Lon Lon Ranch"),
    (0x02CE7000, "Ganon's Tower (Outside)"),
    (0x035B3000, "Collision Testing Area"),
    (0x03544000, "Besitu / Treasure Chest Warp"),
    (0x027AF000, "Depth Test"),
    (0x02793000, "Stalfos Middle Room"),
    (0x027A2000, "Stalfos Boss Room"),
    (0x02B57000, "Dark Link Testing Area"),
    (0x03280000, "Beta Castle Courtyard"),
    (0x02D00000, "Action Testing Room"),
    (0x02AF6000, "Item Testing Room"),
];

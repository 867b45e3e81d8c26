/// Scene/room header command streams.
///
/// A scene file begins with 8-byte `(cmd, arg)` pairs, terminated by
/// the End tag. Rooms have header streams of their own, reached
/// through the Rooms command; room headers resolve against both the
/// scene bank and their own room bank.
use super::collision::{read_collision, Collision};
use super::FileSource;
use crate::gfx::f3dex2::read_display_list;
use crate::gfx::texture::TileCache;
use crate::gfx::{DrawOp, TextureBackend};
use crate::segment::{read_u32_at, BankSet, SegmentReader};

// Header command tags. Only End, Rooms, Mesh and Collision change
// decoder state; the rest are listed for diagnostics.
pub const CMD_SPAWNS: u8 = 0x00;
pub const CMD_ACTORS: u8 = 0x01;
pub const CMD_CAMERA: u8 = 0x02;
pub const CMD_COLLISION: u8 = 0x03;
pub const CMD_ROOMS: u8 = 0x04;
pub const CMD_WIND_SETTINGS: u8 = 0x05;
pub const CMD_ENTRANCE_LIST: u8 = 0x06;
pub const CMD_SPECIAL_OBJECTS: u8 = 0x07;
pub const CMD_SPECIAL_BEHAVIOR: u8 = 0x08;
pub const CMD_MESH: u8 = 0x0A;
pub const CMD_OBJECTS: u8 = 0x0B;
pub const CMD_WAYPOINTS: u8 = 0x0D;
pub const CMD_TRANSITIONS: u8 = 0x0E;
pub const CMD_ENVIRONMENT: u8 = 0x0F;
pub const CMD_TIME: u8 = 0x10;
pub const CMD_SKYBOX: u8 = 0x11;
pub const CMD_END: u8 = 0x14;

/// Parallel display-list batches for one mesh: opaque geometry draws
/// before transparent. A list that decodes to zero DrawOps is kept;
/// only null pointers are dropped.
#[derive(Debug, Default)]
pub struct Mesh {
    pub opaque: Vec<Vec<DrawOp>>,
    pub transparent: Vec<Vec<DrawOp>>,
}

/// The result of walking one header stream. Scene headers carry rooms;
/// room headers usually carry a mesh.
#[derive(Debug, Default)]
pub struct Headers {
    pub rooms: Vec<Headers>,
    pub mesh: Option<Mesh>,
    pub collision: Option<Collision>,
}

pub(super) struct HeaderWalker<'a, B: TextureBackend + ?Sized> {
    pub source: &'a dyn FileSource,
    pub cache: &'a mut TileCache,
    pub backend: &'a mut B,
}

impl<'a, B: TextureBackend + ?Sized> HeaderWalker<'a, B> {
    /// Walk the header stream starting at absolute offset `offs`,
    /// resolving addresses against `banks`.
    pub fn read_headers(&mut self, offs: usize, banks: BankSet) -> Headers {
        let mut headers = Headers::default();
        let data = self.source.data();
        let mut offs = offs;

        loop {
            if offs + 8 > data.len() {
                log::warn!("Header stream ran off the end of the buffer");
                break;
            }
            let cmd1 = read_u32_at(data, offs);
            let cmd2 = read_u32_at(data, offs + 4);
            offs += 8;

            let tag = (cmd1 >> 24) as u8;
            if tag == CMD_END {
                break;
            }

            match tag {
                CMD_ROOMS => {
                    let n_rooms = (cmd1 >> 16) & 0xFF;
                    headers
                        .rooms
                        .extend(self.read_rooms(n_rooms, cmd2, banks));
                }
                CMD_MESH => {
                    assert!(
                        headers.mesh.is_none(),
                        "duplicate mesh command in one header stream"
                    );
                    headers.mesh = Some(self.read_mesh(cmd2, banks));
                }
                CMD_COLLISION => {
                    assert!(
                        headers.collision.is_none(),
                        "duplicate collision command in one header stream"
                    );
                    let reader = SegmentReader::new(data, banks);
                    headers.collision = read_collision(&reader, cmd2);
                }
                _ => {
                    log::trace!("Skipping header command {:#04X}", tag);
                }
            }
        }
        headers
    }

    /// Rooms(count, tableAddr): each 8-byte table entry names a room
    /// file by its start offset. A room that cannot be located is
    /// skipped; the rest of the scene still decodes.
    fn read_rooms(&mut self, n_rooms: u32, table_addr: u32, banks: BankSet) -> Vec<Headers> {
        let mut rooms = Vec::new();
        for i in 0..n_rooms {
            let reader = SegmentReader::new(self.source.data(), banks);
            let Some(p_start) = reader.read_u32(table_addr.wrapping_add(i * 8)) else {
                log::warn!("Room table entry {} is unmapped", i);
                continue;
            };
            let Some(room_bank) = self.source.room_bank(p_start) else {
                log::warn!("No file found for room start {:#010X}", p_start);
                continue;
            };
            let room_banks = banks.with_room(room_bank);
            rooms.push(self.read_headers(room_bank.v_start as usize, room_banks));
        }
        rooms
    }

    /// Mesh(addr): header word packs the mesh type and entry count;
    /// the entry table follows at the address in the next word.
    /// Types 0 and 2 both carry parallel opaque/transparent display
    /// list pointers, at different strides. Type 1 is a background
    /// image reference and carries no lists.
    fn read_mesh(&mut self, mesh_addr: u32, banks: BankSet) -> Mesh {
        let reader = SegmentReader::new(self.source.data(), banks);
        let mut mesh = Mesh::default();

        let Some(hdr) = reader.read_u32(mesh_addr) else {
            log::warn!("Mesh header at {:#010X} is unmapped", mesh_addr);
            return mesh;
        };
        let mesh_type = hdr >> 24;
        let n_entries = (hdr >> 16) & 0xFF;
        let Some(entries_addr) = reader.read_u32(mesh_addr.wrapping_add(4)) else {
            return mesh;
        };

        let (stride, opaque_offs, transparent_offs) = match mesh_type {
            0 => (8, 0, 4),
            2 => (16, 8, 12),
            1 => {
                log::debug!("Background-image mesh, no display lists");
                return mesh;
            }
            other => {
                log::warn!("Unknown mesh type {}", other);
                return mesh;
            }
        };

        for i in 0..n_entries {
            let entry = entries_addr.wrapping_add(i * stride);
            if let Some(dl) = self.read_dl(&reader, entry.wrapping_add(opaque_offs)) {
                mesh.opaque.push(dl);
            }
            if let Some(dl) = self.read_dl(&reader, entry.wrapping_add(transparent_offs)) {
                mesh.transparent.push(dl);
            }
        }
        mesh
    }

    /// Follow a display-list pointer slot; a null pointer means "no
    /// list", distinct from a list that draws nothing.
    fn read_dl(&mut self, reader: &SegmentReader<'_>, addr: u32) -> Option<Vec<DrawOp>> {
        let dl_start = reader.read_u32(addr)?;
        if dl_start == 0 {
            return None;
        }
        Some(read_display_list(
            *reader,
            self.cache,
            self.backend,
            dl_start,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::NullBackend;
    use crate::segment::Bank;
    use std::collections::HashMap;

    const SCENE_BASE: u32 = 0x0200_0000;
    const ROOM_BASE: u32 = 0x0300_0000;

    struct TestSource {
        data: Vec<u8>,
        rooms: HashMap<u32, Bank>,
    }

    impl FileSource for TestSource {
        fn data(&self) -> &[u8] {
            &self.data
        }

        fn room_bank(&self, p_start: u32) -> Option<Bank> {
            self.rooms.get(&p_start).copied()
        }
    }

    fn put_u32(data: &mut [u8], offs: usize, v: u32) {
        data[offs..offs + 4].copy_from_slice(&v.to_be_bytes());
    }

    fn put_cmd(data: &mut [u8], offs: usize, w0: u32, w1: u32) -> usize {
        put_u32(data, offs, w0);
        put_u32(data, offs + 4, w1);
        offs + 8
    }

    fn walk(source: &TestSource, offs: usize, banks: BankSet) -> Headers {
        let mut cache = TileCache::new();
        let mut backend = NullBackend::default();
        let mut walker = HeaderWalker {
            source,
            cache: &mut cache,
            backend: &mut backend,
        };
        walker.read_headers(offs, banks)
    }

    fn scene_banks(len: usize) -> BankSet {
        BankSet::for_scene(Bank::new(0, len as u32))
    }

    #[test]
    fn terminal_tag_alone_yields_empty_headers() {
        let mut data = vec![0u8; 0x40];
        put_cmd(&mut data, 0, (CMD_END as u32) << 24, 0);
        let source = TestSource {
            data,
            rooms: HashMap::new(),
        };
        let banks = scene_banks(source.data.len());
        let h = walk(&source, 0, banks);
        assert!(h.rooms.is_empty());
        assert!(h.mesh.is_none());
        assert!(h.collision.is_none());
    }

    #[test]
    fn unknown_tags_are_consumed_without_effect() {
        let mut data = vec![0u8; 0x80];
        let mut o = put_cmd(&mut data, 0, (CMD_ACTORS as u32) << 24 | 0x0005_0000, 0x0200_1234);
        o = put_cmd(&mut data, o, (CMD_SKYBOX as u32) << 24, 0);
        o = put_cmd(&mut data, o, 0x1300_0000, 0); // unassigned tag
        put_cmd(&mut data, o, (CMD_END as u32) << 24, 0);
        let source = TestSource {
            data,
            rooms: HashMap::new(),
        };
        let banks = scene_banks(source.data.len());
        let h = walk(&source, 0, banks);
        assert!(h.rooms.is_empty());
        assert!(h.mesh.is_none());
    }

    #[test]
    fn rooms_recurse_with_a_room_bank() {
        let mut data = vec![0u8; 0x400];
        // Scene header: Rooms(2) at table 0x100, then End.
        let o = put_cmd(&mut data, 0, (CMD_ROOMS as u32) << 24 | 0x0002_0000, SCENE_BASE + 0x100);
        put_cmd(&mut data, o, (CMD_END as u32) << 24, 0);
        // Room table: two 8-byte entries naming room starts.
        put_u32(&mut data, 0x100, 0x2000);
        put_u32(&mut data, 0x108, 0x3000);
        // Rooms live at 0x200 and 0x280; each header ends immediately,
        // the second carries a mesh with zero entries first.
        put_cmd(&mut data, 0x200, (CMD_END as u32) << 24, 0);
        let o = put_cmd(&mut data, 0x280, (CMD_MESH as u32) << 24, ROOM_BASE + 0x60);
        put_cmd(&mut data, o, (CMD_END as u32) << 24, 0);
        // Mesh header for room 2, type 0, zero entries, in the room bank.
        put_u32(&mut data, 0x280 + 0x60, 0x0000_0000);
        put_u32(&mut data, 0x280 + 0x64, ROOM_BASE + 0x70);

        let mut rooms = HashMap::new();
        rooms.insert(0x2000u32, Bank::new(0x200, 0x280));
        rooms.insert(0x3000u32, Bank::new(0x280, 0x400));
        let source = TestSource { data, rooms };
        let banks = scene_banks(source.data.len());

        let h = walk(&source, 0, banks);
        assert_eq!(h.rooms.len(), 2);
        assert!(h.rooms[0].mesh.is_none());
        let mesh = h.rooms[1].mesh.as_ref().unwrap();
        assert!(mesh.opaque.is_empty());
        assert!(mesh.transparent.is_empty());
    }

    #[test]
    fn missing_room_file_degrades_to_fewer_rooms() {
        let mut data = vec![0u8; 0x200];
        let o = put_cmd(&mut data, 0, (CMD_ROOMS as u32) << 24 | 0x0002_0000, SCENE_BASE + 0x100);
        put_cmd(&mut data, o, (CMD_END as u32) << 24, 0);
        put_u32(&mut data, 0x100, 0x2000); // known room
        put_u32(&mut data, 0x108, 0xDEAD); // unknown room
        put_cmd(&mut data, 0x180, (CMD_END as u32) << 24, 0);

        let mut rooms = HashMap::new();
        rooms.insert(0x2000u32, Bank::new(0x180, 0x200));
        let source = TestSource { data, rooms };
        let banks = scene_banks(source.data.len());

        let h = walk(&source, 0, banks);
        assert_eq!(h.rooms.len(), 1);
    }

    #[test]
    fn room_table_near_the_address_space_end_is_skipped() {
        let mut data = vec![0u8; 0x100];
        let o = put_cmd(&mut data, 0, (CMD_ROOMS as u32) << 24 | 0x0002_0000, 0xFFFF_FFFC);
        put_cmd(&mut data, o, (CMD_END as u32) << 24, 0);

        let source = TestSource {
            data,
            rooms: HashMap::new(),
        };
        let banks = scene_banks(source.data.len());
        let h = walk(&source, 0, banks);
        assert!(h.rooms.is_empty());
    }

    #[test]
    fn mesh_table_near_the_address_space_end_is_skipped() {
        let mut data = vec![0u8; 0x200];
        let o = put_cmd(&mut data, 0, (CMD_MESH as u32) << 24, SCENE_BASE + 0x100);
        put_cmd(&mut data, o, (CMD_END as u32) << 24, 0);
        // Type 0, 2 entries, table at the top of the address space.
        put_u32(&mut data, 0x100, 0x0002_0000);
        put_u32(&mut data, 0x104, 0xFFFF_FFF8);

        let source = TestSource {
            data,
            rooms: HashMap::new(),
        };
        let banks = scene_banks(source.data.len());
        let h = walk(&source, 0, banks);
        let mesh = h.mesh.as_ref().unwrap();
        assert!(mesh.opaque.is_empty());
        assert!(mesh.transparent.is_empty());
    }

    #[test]
    fn type0_mesh_reads_parallel_lists() {
        let mut data = vec![0u8; 0x300];
        let o = put_cmd(&mut data, 0, (CMD_MESH as u32) << 24, SCENE_BASE + 0x100);
        put_cmd(&mut data, o, (CMD_END as u32) << 24, 0);
        // Mesh header: type 0, 2 entries, table at 0x110.
        put_u32(&mut data, 0x100, 0x0002_0000);
        put_u32(&mut data, 0x104, SCENE_BASE + 0x110);
        // Entry 0: opaque list at 0x200, null transparent.
        put_u32(&mut data, 0x110, SCENE_BASE + 0x200);
        put_u32(&mut data, 0x114, 0);
        // Entry 1: null opaque, transparent list at 0x200.
        put_u32(&mut data, 0x118, 0);
        put_u32(&mut data, 0x11C, SCENE_BASE + 0x200);
        // The display list draws nothing.
        put_cmd(&mut data, 0x200, 0xDF00_0000, 0);

        let source = TestSource {
            data,
            rooms: HashMap::new(),
        };
        let banks = scene_banks(source.data.len());
        let h = walk(&source, 0, banks);
        let mesh = h.mesh.as_ref().unwrap();
        assert_eq!(mesh.opaque.len(), 1);
        assert_eq!(mesh.transparent.len(), 1);
        assert!(mesh.opaque[0].is_empty());
    }

    #[test]
    fn type2_mesh_uses_the_wide_stride() {
        let mut data = vec![0u8; 0x300];
        let o = put_cmd(&mut data, 0, (CMD_MESH as u32) << 24, SCENE_BASE + 0x100);
        put_cmd(&mut data, o, (CMD_END as u32) << 24, 0);
        // Type 2, 1 entry: list pointers sit at +8/+12 of the record.
        put_u32(&mut data, 0x100, 0x0201_0000);
        put_u32(&mut data, 0x104, SCENE_BASE + 0x110);
        put_u32(&mut data, 0x118, SCENE_BASE + 0x200);
        put_u32(&mut data, 0x11C, 0);
        put_cmd(&mut data, 0x200, 0xDF00_0000, 0);

        let source = TestSource {
            data,
            rooms: HashMap::new(),
        };
        let banks = scene_banks(source.data.len());
        let h = walk(&source, 0, banks);
        let mesh = h.mesh.as_ref().unwrap();
        assert_eq!(mesh.opaque.len(), 1);
        assert!(mesh.transparent.is_empty());
    }

    #[test]
    fn background_mesh_type_has_no_lists() {
        let mut data = vec![0u8; 0x200];
        let o = put_cmd(&mut data, 0, (CMD_MESH as u32) << 24, SCENE_BASE + 0x100);
        put_cmd(&mut data, o, (CMD_END as u32) << 24, 0);
        put_u32(&mut data, 0x100, 0x0101_0000);
        put_u32(&mut data, 0x104, SCENE_BASE + 0x110);

        let source = TestSource {
            data,
            rooms: HashMap::new(),
        };
        let banks = scene_banks(source.data.len());
        let h = walk(&source, 0, banks);
        let mesh = h.mesh.as_ref().unwrap();
        assert!(mesh.opaque.is_empty());
        assert!(mesh.transparent.is_empty());
    }

    #[test]
    #[should_panic(expected = "duplicate mesh command")]
    fn duplicate_mesh_command_is_a_protocol_violation() {
        let mut data = vec![0u8; 0x200];
        let mut o = put_cmd(&mut data, 0, (CMD_MESH as u32) << 24, SCENE_BASE + 0x100);
        o = put_cmd(&mut data, o, (CMD_MESH as u32) << 24, SCENE_BASE + 0x100);
        put_cmd(&mut data, o, (CMD_END as u32) << 24, 0);
        put_u32(&mut data, 0x100, 0x0100_0000); // type 1: no lists

        let source = TestSource {
            data,
            rooms: HashMap::new(),
        };
        let banks = scene_banks(source.data.len());
        walk(&source, 0, banks);
    }
}

/// Scene decoding entry points.
///
/// A scene is decoded from either container flavor through the same
/// path: bind the scene file as the scene bank, walk its header
/// stream, and recurse into each room with a two-bank context.
pub mod collision;
pub mod header;

pub use collision::Collision;
pub use header::{Headers, Mesh};

use header::HeaderWalker;

use crate::gfx::texture::TileCache;
use crate::gfx::TextureBackend;
use crate::rom::Rom;
use crate::segment::{Bank, BankSet};
use crate::vfs::Vfs;

/// What the header walker needs from a container: the flat byte
/// buffer, and a way to turn a room-table entry into the bank that
/// room's file provides.
pub trait FileSource {
    fn data(&self) -> &[u8];
    fn room_bank(&self, p_start: u32) -> Option<Bank>;
}

impl FileSource for Vfs {
    fn data(&self) -> &[u8] {
        Vfs::data(self)
    }

    fn room_bank(&self, p_start: u32) -> Option<Bank> {
        self.lookup_by_p_start(p_start).map(|e| e.bank())
    }
}

impl FileSource for Rom {
    fn data(&self) -> &[u8] {
        Rom::data(self)
    }

    fn room_bank(&self, p_start: u32) -> Option<Bank> {
        self.lookup_by_p_start(p_start).map(|e| self.bank_for(e))
    }
}

/// Decode the scene whose file occupies `scene_bank`.
///
/// Infallible by design: sub-structures that fail to resolve are
/// skipped with a log line and the rest of the scene decodes.
pub fn read_scene<B: TextureBackend + ?Sized>(
    source: &dyn FileSource,
    scene_bank: Bank,
    cache: &mut TileCache,
    backend: &mut B,
) -> Headers {
    let mut walker = HeaderWalker {
        source,
        cache,
        backend,
    };
    walker.read_headers(
        scene_bank.v_start as usize,
        BankSet::for_scene(scene_bank),
    )
}

/// Decode a container's designated main scene.
pub fn read_main_scene<B: TextureBackend + ?Sized>(
    vfs: &Vfs,
    cache: &mut TileCache,
    backend: &mut B,
) -> Headers {
    let bank = vfs.main_entry().bank();
    read_scene(vfs, bank, cache, backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::NullBackend;
    use crate::vfs::tests::build_container;

    fn put_u32(data: &mut [u8], offs: usize, v: u32) {
        data[offs..offs + 4].copy_from_slice(&v.to_be_bytes());
    }

    /// A scene file whose header names one room, which in turn carries
    /// an empty type-0 mesh, packed into a ZELVIEW0 container.
    #[test]
    fn main_scene_decodes_from_a_container() {
        let mut scene = vec![0u8; 0x40];
        // Rooms(1) at table 0x20, then End.
        put_u32(&mut scene, 0x00, 0x0401_0000);
        put_u32(&mut scene, 0x04, 0x0200_0020);
        put_u32(&mut scene, 0x08, 0x1400_0000);
        put_u32(&mut scene, 0x20, 0); // patched below to the room pStart

        let mut room = vec![0u8; 0x30];
        put_u32(&mut room, 0x00, 0x0A00_0000);
        put_u32(&mut room, 0x04, 0x0300_0020);
        put_u32(&mut room, 0x08, 0x1400_0000);
        // Mesh header: type 0, zero entries.
        put_u32(&mut room, 0x20, 0x0000_0000);
        put_u32(&mut room, 0x24, 0x0300_0028);

        let mut buf = build_container(&[("scene", &scene), ("room", &room)], 0);
        let vfs = Vfs::parse(buf.clone()).unwrap();
        let room_p_start = vfs.lookup_by_filename("room").unwrap().p_start;
        let scene_v_start = vfs.main_entry().v_start as usize;
        // Point the room table at the room file.
        let table = scene_v_start + 0x20;
        buf[table..table + 4].copy_from_slice(&room_p_start.to_be_bytes());
        let vfs = Vfs::parse(buf).unwrap();

        let mut cache = TileCache::new();
        let mut backend = NullBackend::default();
        let h = read_main_scene(&vfs, &mut cache, &mut backend);
        assert_eq!(h.rooms.len(), 1);
        let mesh = h.rooms[0].mesh.as_ref().unwrap();
        assert!(mesh.opaque.is_empty());
        assert!(cache.is_empty());
    }
}

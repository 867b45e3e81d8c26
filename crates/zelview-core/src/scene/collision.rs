/// Collision block decoding.
///
/// The block header holds counts and table addresses at fixed offsets;
/// the tables themselves live elsewhere in the scene file and are
/// reached through the segmented resolver. Anything that does not
/// resolve decodes to "absent" rather than failing the scene.
use std::f32::consts::{PI, TAU};

use crate::gfx::matrix::Mat4;
use crate::segment::SegmentReader;

/// Decoded collision data for one scene.
#[derive(Debug, Default)]
pub struct Collision {
    /// Vertex positions, signed 16-bit world units.
    pub verts: Vec<[i16; 3]>,
    /// Triangles as vertex-table indices.
    pub polys: Vec<[u16; 3]>,
    /// Water surfaces as quad corners, strip order.
    pub waters: Vec<[[f32; 3]; 4]>,
    /// Default camera transform, when the block names one.
    pub camera: Option<Mat4>,
}

/// Decode the collision block at `addr`. Returns `None` only when the
/// block header itself is unmapped; missing sub-tables leave their
/// fields empty.
pub fn read_collision(reader: &SegmentReader, addr: u32) -> Option<Collision> {
    reader.resolve(addr)?;

    let mut collision = Collision {
        verts: read_verts(reader, addr),
        polys: read_polys(reader, addr),
        waters: read_waters(reader, addr),
        camera: read_camera(reader, addr),
    };

    let max_index = collision.verts.len() as u16;
    if collision.polys.iter().flatten().any(|&i| i >= max_index) {
        log::warn!("Collision polygons index past the vertex table");
        collision.polys.retain(|p| p.iter().all(|&i| i < max_index));
    }
    Some(collision)
}

fn read_verts(reader: &SegmentReader, addr: u32) -> Vec<[i16; 3]> {
    let count = reader.read_u16(addr.wrapping_add(0x0C)).unwrap_or(0) as u32;
    let Some(table) = reader.read_u32(addr.wrapping_add(0x10)) else {
        return Vec::new();
    };

    let mut verts = Vec::with_capacity(count as usize);
    for i in 0..count {
        let at = table.wrapping_add(i * 6);
        let Some(v) = read_vec3(reader, at) else {
            break;
        };
        verts.push(v);
    }
    verts
}

/// Each polygon record is 16 bytes; only the three vertex indices at
/// +0x02/+0x04/+0x06 are kept, masked to 12 bits (the top nibble
/// carries surface flags).
fn read_polys(reader: &SegmentReader, addr: u32) -> Vec<[u16; 3]> {
    let count = reader.read_u16(addr.wrapping_add(0x14)).unwrap_or(0) as u32;
    let Some(table) = reader.read_u32(addr.wrapping_add(0x18)) else {
        return Vec::new();
    };

    let mut polys = Vec::with_capacity(count as usize);
    for i in 0..count {
        let at = table.wrapping_add(i * 16);
        let (Some(a), Some(b), Some(c)) = (
            reader.read_u16(at.wrapping_add(0x02)),
            reader.read_u16(at.wrapping_add(0x04)),
            reader.read_u16(at.wrapping_add(0x06)),
        ) else {
            break;
        };
        polys.push([a & 0x0FFF, b & 0x0FFF, c & 0x0FFF]);
    }
    polys
}

/// Water volumes are stored as `(x, y, z, dx, dz)`: an origin corner
/// and two extents. Each expands to the four corners of an axis-aligned
/// quad at height y, ordered for a triangle strip.
fn read_waters(reader: &SegmentReader, addr: u32) -> Vec<[[f32; 3]; 4]> {
    let count = reader.read_u16(addr.wrapping_add(0x24)).unwrap_or(0) as u32;
    let Some(table) = reader.read_u32(addr.wrapping_add(0x28)) else {
        return Vec::new();
    };

    let mut waters = Vec::with_capacity(count as usize);
    for i in 0..count {
        let at = table.wrapping_add(i * 16);
        let (Some(x), Some(y), Some(z), Some(dx), Some(dz)) = (
            reader.read_i16(at),
            reader.read_i16(at.wrapping_add(2)),
            reader.read_i16(at.wrapping_add(4)),
            reader.read_i16(at.wrapping_add(6)),
            reader.read_i16(at.wrapping_add(8)),
        ) else {
            break;
        };
        let (x, y, z) = (x as f32, y as f32, z as f32);
        let (dx, dz) = (dx as f32, dz as f32);
        waters.push([
            [x, y, z],
            [x + dx, y, z],
            [x, y, z + dz],
            [x + dx, y, z + dz],
        ]);
    }
    waters
}

/// The camera field is an indirection: the address at +0x20 names a
/// record holding a position (3 x i16) and three angles (u16 turn
/// fractions). The rotation order and signs below match the source
/// asset's view convention.
fn read_camera(reader: &SegmentReader, addr: u32) -> Option<Mat4> {
    let cam_addr = reader.read_u32(addr.wrapping_add(0x20))?;
    let pos = read_vec3(reader, cam_addr)?;

    let mut angles = [0.0f32; 3];
    for (i, a) in angles.iter_mut().enumerate() {
        *a = reader.read_u16(cam_addr.wrapping_add(6 + i as u32 * 2))? as f32 / 65536.0 * TAU;
    }

    let m = Mat4::translation(pos[0] as f32, pos[1] as f32, pos[2] as f32)
        .mul(&Mat4::rotation_z(angles[2]))
        .mul(&Mat4::rotation_y(angles[1] + PI))
        .mul(&Mat4::rotation_x(-angles[0]));
    Some(m)
}

fn read_vec3(reader: &SegmentReader, addr: u32) -> Option<[i16; 3]> {
    Some([
        reader.read_i16(addr)?,
        reader.read_i16(addr.wrapping_add(2))?,
        reader.read_i16(addr.wrapping_add(4))?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{Bank, BankSet};

    const BASE: u32 = 0x0200_0000;

    fn put_u16(data: &mut [u8], offs: usize, v: u16) {
        data[offs..offs + 2].copy_from_slice(&v.to_be_bytes());
    }

    fn put_u32(data: &mut [u8], offs: usize, v: u32) {
        data[offs..offs + 4].copy_from_slice(&v.to_be_bytes());
    }

    fn reader(data: &[u8]) -> SegmentReader<'_> {
        SegmentReader::new(data, BankSet::for_scene(Bank::new(0, data.len() as u32)))
    }

    #[test]
    fn unmapped_block_is_absent() {
        let data = vec![0u8; 0x100];
        assert!(read_collision(&reader(&data), 0x0300_0000).is_none());
        assert!(read_collision(&reader(&data), 0x02FF_0000).is_none());
    }

    #[test]
    fn empty_block_decodes_empty() {
        // All counts zero, all table addresses unmapped (zero resolves
        // to segment 0x00, which is unknown).
        let data = vec![0u8; 0x100];
        let c = read_collision(&reader(&data), BASE).unwrap();
        assert!(c.verts.is_empty());
        assert!(c.polys.is_empty());
        assert!(c.waters.is_empty());
        assert!(c.camera.is_none());
    }

    #[test]
    fn tables_near_the_address_space_end_are_skipped() {
        let mut data = vec![0u8; 0x100];
        put_u16(&mut data, 0x0C, 2);
        put_u32(&mut data, 0x10, 0xFFFF_FFFC);
        put_u16(&mut data, 0x14, 1);
        put_u32(&mut data, 0x18, 0xFFFF_FFF4);
        put_u32(&mut data, 0x20, 0xFFFF_FFFC);
        put_u16(&mut data, 0x24, 1);
        put_u32(&mut data, 0x28, 0xFFFF_FFF8);

        let c = read_collision(&reader(&data), BASE).unwrap();
        assert!(c.verts.is_empty());
        assert!(c.polys.is_empty());
        assert!(c.waters.is_empty());
        assert!(c.camera.is_none());
    }

    #[test]
    fn vertices_and_masked_polygons_decode() {
        let mut data = vec![0u8; 0x300];
        put_u16(&mut data, 0x0C, 3);
        put_u32(&mut data, 0x10, BASE + 0x100);
        put_u16(&mut data, 0x14, 1);
        put_u32(&mut data, 0x18, BASE + 0x200);

        let verts: [i16; 9] = [10, 20, 30, -1, -2, -3, 0, 100, 0];
        for (i, v) in verts.iter().enumerate() {
            put_u16(&mut data, 0x100 + i * 2, *v as u16);
        }
        // Indices carry surface flags in the top nibble.
        put_u16(&mut data, 0x202, 0xE000);
        put_u16(&mut data, 0x204, 0x1001);
        put_u16(&mut data, 0x206, 0x0002);

        let c = read_collision(&reader(&data), BASE).unwrap();
        assert_eq!(c.verts, vec![[10, 20, 30], [-1, -2, -3], [0, 100, 0]]);
        assert_eq!(c.polys, vec![[0, 1, 2]]);
    }

    #[test]
    fn out_of_range_polygons_are_dropped() {
        let mut data = vec![0u8; 0x300];
        put_u16(&mut data, 0x0C, 1);
        put_u32(&mut data, 0x10, BASE + 0x100);
        put_u16(&mut data, 0x14, 1);
        put_u32(&mut data, 0x18, BASE + 0x200);
        put_u16(&mut data, 0x204, 0x0005); // only one vertex exists

        let c = read_collision(&reader(&data), BASE).unwrap();
        assert_eq!(c.verts.len(), 1);
        assert!(c.polys.is_empty());
    }

    #[test]
    fn water_volumes_expand_to_quads() {
        let mut data = vec![0u8; 0x300];
        put_u16(&mut data, 0x24, 1);
        put_u32(&mut data, 0x28, BASE + 0x100);
        // (x=0, y=0, z=0, dx=10, dz=20)
        put_u16(&mut data, 0x106, 10);
        put_u16(&mut data, 0x108, 20);

        let c = read_collision(&reader(&data), BASE).unwrap();
        assert_eq!(
            c.waters,
            vec![[
                [0.0, 0.0, 0.0],
                [10.0, 0.0, 0.0],
                [0.0, 0.0, 20.0],
                [10.0, 0.0, 20.0],
            ]]
        );
    }

    #[test]
    fn camera_record_decodes_to_a_transform() {
        let mut data = vec![0u8; 0x300];
        put_u32(&mut data, 0x20, BASE + 0x100);
        // Position (5, 6, 7), all angles zero.
        put_u16(&mut data, 0x100, 5);
        put_u16(&mut data, 0x102, 6);
        put_u16(&mut data, 0x104, 7);

        let c = read_collision(&reader(&data), BASE).unwrap();
        let m = c.camera.unwrap();
        // Zero angles still apply the Y half-turn.
        let p = m.transform_point([1.0, 0.0, 0.0]);
        assert!((p[0] - 4.0).abs() < 1e-4);
        assert!((p[1] - 6.0).abs() < 1e-4);
        assert!((p[2] - 7.0).abs() < 1e-4);

        // A quarter-turn first angle rotates about X with negated sign.
        put_u16(&mut data, 0x106, 0x4000);
        let c = read_collision(&reader(&data), BASE).unwrap();
        let m = c.camera.unwrap();
        let p = m.transform_point([0.0, 1.0, 0.0]);
        assert!((p[0] - 5.0).abs() < 1e-4);
        assert!((p[1] - 6.0).abs() < 1e-4);
        assert!((p[2] - (7.0 + 1.0)).abs() < 1e-4);
    }
}

/// F3DEX2 display list interpreter.
///
/// Scene and room meshes are stored as display lists: streams of
/// 64-bit commands (two 32-bit words, opcode in the top byte of the
/// first) for the F3DEX2 microcode. This module executes the subset of
/// opcodes that scene/room geometry uses and emits a deferred
/// [`DrawOp`] sequence instead of touching a renderer directly.
use std::rc::Rc;

use super::matrix::Mat4;
use super::texture::{decode_palette, TileCache, TileParams};
use super::{
    DrawOp, GeometryState, RenderMode, TextureBackend, TextureBinding, Vertex, WrapMode,
    VERTEX_BUFFER_SIZE,
};
use crate::segment::{read_u32_at, SegmentReader};

// ─── F3DEX2 opcodes used by scene display lists ───

pub const G_NOOP: u8 = 0x00;
pub const G_VTX: u8 = 0x01;
pub const G_TRI1: u8 = 0x05;
pub const G_TRI2: u8 = 0x06;
pub const G_TEXTURE: u8 = 0xD7;
pub const G_POPMTX: u8 = 0xD8;
pub const G_GEOMETRYMODE: u8 = 0xD9;
pub const G_MTX: u8 = 0xDA;
pub const G_DL: u8 = 0xDE;
pub const G_ENDDL: u8 = 0xDF;
pub const G_SETOTHERMODE_L: u8 = 0xE2;
pub const G_RDPLOADSYNC: u8 = 0xE6;
pub const G_RDPPIPESYNC: u8 = 0xE7;
pub const G_LOADTLUT: u8 = 0xF0;
pub const G_SETTILESIZE: u8 = 0xF2;
pub const G_LOADBLOCK: u8 = 0xF3;
pub const G_SETTILE: u8 = 0xF5;
pub const G_SETTIMG: u8 = 0xFD;

// ─── Geometry mode bits ───

const G_CULL_FRONT: u32 = 0x0000_0200;
const G_CULL_BACK: u32 = 0x0000_0400;
const G_LIGHTING: u32 = 0x0002_0000;

// ─── OtherModeL render-mode bits ───

const Z_CMP: u32 = 0x0010;
const Z_UPD: u32 = 0x0020;
const ZMODE_DEC: u32 = 0x0C00;
const CVG_X_ALPHA: u32 = 0x1000;
const ALPHA_CVG_SEL: u32 = 0x2000;
const FORCE_BL: u32 = 0x4000;

/// A texture upload is a fixed run of these seven commands; it is
/// consumed atomically and marks the configured tile pending-bind.
const TEXTURE_BLOCK: [u8; 7] = [
    G_SETTIMG,
    G_SETTILE,
    G_RDPLOADSYNC,
    G_LOADBLOCK,
    G_RDPPIPESYNC,
    G_SETTILE,
    G_SETTILESIZE,
];

/// Maximum sub-display-list nesting (F3DEX2 supports 10 levels).
const MAX_DL_DEPTH: usize = 18;

/// Safety limit on commands per display list.
const MAX_COMMANDS: usize = 1_000_000;

/// Source image descriptor set by G_SETTIMG.
#[derive(Clone, Copy, Debug, Default)]
struct TextureImage {
    format: u8,
    size: u8,
    width: u32,
    addr: u32,
}

/// Texture coordinate scale set by G_TEXTURE.
#[derive(Clone, Copy, Debug, Default)]
pub struct BoundTexture {
    pub scale_s: f32,
    pub scale_t: f32,
}

/// Interpreter state: one value threaded through the whole walk,
/// including recursive sub-lists (which share the vertex buffer and
/// matrix stack rather than getting a fresh frame).
pub struct Interpreter<'a, B: TextureBackend + ?Sized> {
    reader: SegmentReader<'a>,
    cache: &'a mut TileCache,
    backend: &'a mut B,

    mtx: Mat4,
    mtx_stack: Vec<Mat4>,
    geometry_mode: u32,

    vertex_buffer: [Vertex; VERTEX_BUFFER_SIZE],
    vertices_dirty: [bool; VERTEX_BUFFER_SIZE],
    vertex_snapshot: Option<Rc<[Vertex; VERTEX_BUFFER_SIZE]>>,

    texture_image: TextureImage,
    bound_texture: Option<BoundTexture>,
    tiles: [TileParams; 8],
    palette: Option<Vec<u8>>,
    pending_tile: Option<usize>,

    ops: Vec<DrawOp>,
}

/// Interpret the display list at `addr` and return its DrawOp
/// sequence. An unmapped start address yields an empty sequence.
pub fn read_display_list<B: TextureBackend + ?Sized>(
    reader: SegmentReader<'_>,
    cache: &mut TileCache,
    backend: &mut B,
    addr: u32,
) -> Vec<DrawOp> {
    let mut interp = Interpreter {
        reader,
        cache,
        backend,
        mtx: Mat4::IDENTITY,
        mtx_stack: Vec::new(),
        geometry_mode: 0,
        vertex_buffer: [Vertex::default(); VERTEX_BUFFER_SIZE],
        vertices_dirty: [false; VERTEX_BUFFER_SIZE],
        vertex_snapshot: None,
        texture_image: TextureImage::default(),
        bound_texture: None,
        tiles: [TileParams::default(); 8],
        palette: None,
        pending_tile: None,
        ops: Vec::new(),
    };
    interp.run(addr, 0);
    interp.ops
}

impl<'a, B: TextureBackend + ?Sized> Interpreter<'a, B> {
    fn run(&mut self, addr: u32, depth: usize) {
        if depth > MAX_DL_DEPTH {
            log::warn!("Display list nesting exceeded {} levels", MAX_DL_DEPTH);
            return;
        }
        let Some(mut offs) = self.reader.resolve(addr) else {
            log::debug!("Display list start {:#010X} is unmapped", addr);
            return;
        };

        let data = self.reader.data();
        let mut cmd_count = 0usize;

        loop {
            if offs + 8 > data.len() {
                log::warn!("Display list ran off the end of the buffer");
                break;
            }
            if cmd_count >= MAX_COMMANDS {
                log::warn!("Display list exceeded {} commands, stopping", MAX_COMMANDS);
                break;
            }
            cmd_count += 1;

            let w0 = read_u32_at(data, offs);
            let w1 = read_u32_at(data, offs + 4);
            let cmd = (w0 >> 24) as u8;

            if cmd == G_ENDDL {
                break;
            }

            // Texture uploads arrive as a fixed command run; treat the
            // whole run as one operation.
            if cmd == G_SETTIMG && self.matches_texture_block(offs) {
                self.load_texture_block(offs);
                offs += TEXTURE_BLOCK.len() * 8;
                continue;
            }
            offs += 8;

            match cmd {
                G_NOOP => {}
                G_VTX => self.cmd_vertex(w0, w1),
                G_TRI1 => self.cmd_tri1(w0),
                G_TRI2 => self.cmd_tri2(w0, w1),
                G_GEOMETRYMODE => self.cmd_geometry_mode(w0, w1),
                G_SETOTHERMODE_L => self.cmd_set_other_mode_l(w0, w1),
                G_DL => self.run(w1, depth + 1),
                G_MTX => self.cmd_mtx(w1),
                G_POPMTX => self.cmd_pop_matrix(),
                G_TEXTURE => self.cmd_texture(w1),
                G_SETTIMG => self.cmd_set_timg(w0, w1),
                G_SETTILE => self.cmd_set_tile(w0, w1),
                G_SETTILESIZE => self.cmd_set_tile_size(w0, w1),
                G_LOADTLUT => self.cmd_load_tlut(w1),
                _ => {
                    // Unimplemented microcode: consume and carry on.
                    log::trace!("Skipping GBI command {:#04X} ({:#010X} {:#010X})", cmd, w0, w1);
                }
            }
        }
    }

    // ─── Geometry ───

    /// G_VTX: w0 = [01][n:8 at 12][(v0+n):7 at 1], w1 = vertex data address.
    /// Each record is 16 bytes: position (3 x i16), pad, UV (2 x i16,
    /// 11.5 fixed -> scaled by 1/32), color-or-normal (4 x u8).
    fn cmd_vertex(&mut self, w0: u32, w1: u32) {
        let n = ((w0 >> 12) & 0xFF) as usize;
        let v0 = (((w0 >> 1) & 0x7F) as usize).saturating_sub(n);

        for i in 0..n {
            let slot = v0 + i;
            if slot >= VERTEX_BUFFER_SIZE {
                break;
            }
            let addr = w1.wrapping_add((i * 16) as u32);
            let Some(vertex) = self.read_vertex(addr) else {
                continue;
            };
            self.vertex_buffer[slot] = vertex;
            self.vertices_dirty[slot] = true;
        }
    }

    fn read_vertex(&self, addr: u32) -> Option<Vertex> {
        let r = &self.reader;
        let x = r.read_i16(addr)? as f32;
        let y = r.read_i16(addr.wrapping_add(2))? as f32;
        let z = r.read_i16(addr.wrapping_add(4))? as f32;
        let u = r.read_i16(addr.wrapping_add(8))? as f32 * (1.0 / 32.0);
        let v = r.read_i16(addr.wrapping_add(10))? as f32 * (1.0 / 32.0);
        let color = [
            r.read_u8(addr.wrapping_add(12))?,
            r.read_u8(addr.wrapping_add(13))?,
            r.read_u8(addr.wrapping_add(14))?,
            r.read_u8(addr.wrapping_add(15))?,
        ];
        Some(Vertex {
            pos: self.mtx.transform_point([x, y, z]),
            uv: [u, v],
            color,
        })
    }

    /// G_TRI1: three 7-bit slot indices at bits 17/9/1 of w0.
    fn cmd_tri1(&mut self, w0: u32) {
        self.flush_texture();
        self.emit_triangles(vec![tri_index(w0, 17), tri_index(w0, 9), tri_index(w0, 1)]);
    }

    /// G_TRI2: two triangles, one packed per word.
    fn cmd_tri2(&mut self, w0: u32, w1: u32) {
        self.flush_texture();
        self.emit_triangles(vec![
            tri_index(w0, 17),
            tri_index(w0, 9),
            tri_index(w0, 1),
            tri_index(w1, 17),
            tri_index(w1, 9),
            tri_index(w1, 1),
        ]);
    }

    fn emit_triangles(&mut self, indices: Vec<u8>) {
        if indices.iter().any(|&i| i as usize >= VERTEX_BUFFER_SIZE) {
            log::warn!("Triangle references vertex slot out of range, dropped");
            return;
        }

        // Reuse the previous snapshot unless a referenced slot was
        // overwritten since it was taken. The dirty set is cleared
        // only here; it is a buffer-reuse hint for the backend.
        let stale = self.vertex_snapshot.is_none()
            || indices.iter().any(|&i| self.vertices_dirty[i as usize]);
        if stale {
            self.vertex_snapshot = Some(Rc::new(self.vertex_buffer));
            self.vertices_dirty = [false; VERTEX_BUFFER_SIZE];
        }
        let vertices = Rc::clone(self.vertex_snapshot.as_ref().unwrap());
        self.ops.push(DrawOp::Triangles { vertices, indices });
    }

    // ─── Mode state ───

    /// G_GEOMETRYMODE: w0 low 24 bits clear, w1 sets.
    fn cmd_geometry_mode(&mut self, w0: u32, w1: u32) {
        self.geometry_mode = (self.geometry_mode & !(w0 & 0x00FF_FFFF)) | w1;
        let mode = self.geometry_mode;
        self.ops.push(DrawOp::SetGeometryMode(GeometryState {
            cull_front: mode & G_CULL_FRONT != 0,
            cull_back: mode & G_CULL_BACK != 0,
            use_vertex_colors: mode & G_LIGHTING == 0,
        }));
    }

    /// G_SETOTHERMODE_L: only the render-mode field (position 3 from
    /// bit 31 down, so a shift byte of 28) is recognized. Other shift
    /// bytes, including malformed ones past 31, are ignored.
    fn cmd_set_other_mode_l(&mut self, w0: u32, w1: u32) {
        if w0 & 0xFF != 28 {
            return;
        }
        self.ops.push(DrawOp::SetRenderMode(decode_render_mode(w1)));
    }

    // ─── Matrices ───

    /// G_MTX: multiply the current matrix by one loaded from memory,
    /// pushing the old current. Bit 31 of the address pops first. Any
    /// matrix load also resets the geometry mode.
    fn cmd_mtx(&mut self, w1: u32) {
        if w1 & 0x8000_0000 != 0 {
            if let Some(m) = self.mtx_stack.pop() {
                self.mtx = m;
            }
        }
        let addr = w1 & !0x8000_0000;

        self.geometry_mode = 0;

        self.mtx_stack.push(self.mtx);
        if let Some(loaded) = self.read_matrix(addr) {
            self.mtx = self.mtx.mul(&loaded);
        }
    }

    /// Matrices are stored as 16 fixed-point entries split in half:
    /// the 16-bit integer parts first, the fractional parts 32 bytes
    /// later, combined as ((hi << 16) | lo) / 65536.
    fn read_matrix(&self, addr: u32) -> Option<Mat4> {
        let mut m = [0.0f32; 16];
        for (k, slot) in m.iter_mut().enumerate() {
            let hi = self.reader.read_u16(addr.wrapping_add(k as u32 * 2))?;
            let lo = self.reader.read_u16(addr.wrapping_add(32 + k as u32 * 2))?;
            *slot = (((hi as u32) << 16) | lo as u32) as i32 as f32 / 65536.0;
        }
        Some(Mat4(m))
    }

    fn cmd_pop_matrix(&mut self) {
        if let Some(m) = self.mtx_stack.pop() {
            self.mtx = m;
        }
    }

    // ─── Texture state ───

    /// G_TEXTURE: S/T coordinate scale, 0.16 fixed-point.
    fn cmd_texture(&mut self, w1: u32) {
        let s = w1 >> 16;
        let t = w1 & 0xFFFF;
        self.bound_texture = Some(BoundTexture {
            scale_s: (s + 1) as f32 / 65536.0,
            scale_t: (t + 1) as f32 / 65536.0,
        });
    }

    fn cmd_set_timg(&mut self, w0: u32, w1: u32) {
        self.texture_image = TextureImage {
            format: ((w0 >> 21) & 0x7) as u8,
            size: ((w0 >> 19) & 0x3) as u8,
            width: (w0 & 0xFFF) + 1,
            addr: w1,
        };
        log::trace!(
            "SETTIMG fmt {} siz {} width {} addr {:#010X}",
            self.texture_image.format,
            self.texture_image.size,
            self.texture_image.width,
            self.texture_image.addr
        );
    }

    fn cmd_set_tile(&mut self, w0: u32, w1: u32) {
        let slot = ((w1 >> 24) & 0x7) as usize;
        let tile = &mut self.tiles[slot];
        tile.format = ((((w0 >> 21) & 0x7) << 5) | (((w0 >> 19) & 0x3) << 3)) as u8;
        tile.line = ((w0 >> 9) & 0x1FF) as u16;
        tile.palette = ((w1 >> 20) & 0xF) as u8;
        tile.cm_t = ((w1 >> 18) & 0x3) as u8;
        tile.mask_t = ((w1 >> 14) & 0xF) as u8;
        tile.shift_t = ((w1 >> 10) & 0xF) as u8;
        tile.cm_s = ((w1 >> 8) & 0x3) as u8;
        tile.mask_s = ((w1 >> 4) & 0xF) as u8;
        tile.shift_s = (w1 & 0xF) as u8;
    }

    fn cmd_set_tile_size(&mut self, w0: u32, w1: u32) {
        let slot = ((w1 >> 24) & 0x7) as usize;
        let tile = &mut self.tiles[slot];
        tile.uls = ((w0 >> 14) & 0x3FF) as u16;
        tile.ult = ((w0 >> 2) & 0x3FF) as u16;
        tile.lrs = ((w1 >> 14) & 0x3FF) as u16;
        tile.lrt = ((w1 >> 2) & 0x3FF) as u16;
    }

    /// G_LOADTLUT: decode the palette for subsequent indexed tiles.
    fn cmd_load_tlut(&mut self, w1: u32) {
        let count = (((w1 & 0x00FF_F000) >> 14) + 1) as usize;
        self.palette = decode_palette(&self.reader, self.texture_image.addr, count);
    }

    fn matches_texture_block(&self, offs: usize) -> bool {
        let data = self.reader.data();
        TEXTURE_BLOCK
            .iter()
            .enumerate()
            .all(|(i, &op)| (read_u32_at(data, offs + i * 8) >> 24) as u8 == op)
    }

    /// Apply the commands of a texture-block run that matter for
    /// decoding: the image source, the second SETTILE, and the
    /// SETTILESIZE. The tile becomes pending and is materialized
    /// before the next primitive.
    fn load_texture_block(&mut self, offs: usize) {
        let data = self.reader.data();
        let word = |i: usize| {
            (
                read_u32_at(data, offs + i * 8),
                read_u32_at(data, offs + i * 8 + 4),
            )
        };
        let (timg0, timg1) = word(0);
        let (tile0, tile1) = word(5);
        let (size0, size1) = word(6);

        self.cmd_set_timg(timg0, timg1);
        self.cmd_set_tile(tile0, tile1);
        self.cmd_set_tile_size(size0, size1);

        let slot = ((tile1 >> 24) & 0x7) as usize;
        self.tiles[slot].addr = self.texture_image.addr;
        self.pending_tile = Some(slot);
    }

    /// Materialize a pending tile before the primitive that samples
    /// it: decode (or fetch from cache), register with the backend,
    /// and record the bind.
    fn flush_texture(&mut self) {
        let Some(slot) = self.pending_tile.take() else {
            return;
        };
        let tile = self.tiles[slot];
        let texture = self.cache.get_or_decode(
            &self.reader,
            &tile,
            self.palette.as_deref(),
            self.backend,
        );
        let scale = self.bound_texture.unwrap_or(BoundTexture {
            scale_s: 1.0,
            scale_t: 1.0,
        });
        self.ops.push(DrawOp::BindTexture(TextureBinding {
            texture,
            wrap_s: WrapMode::from_cm(tile.cm_s),
            wrap_t: WrapMode::from_cm(tile.cm_t),
            scale_s: scale.scale_s,
            scale_t: scale.scale_t,
        }));
    }
}

fn tri_index(word: u32, shift: u32) -> u8 {
    ((word >> shift) & 0x7F) as u8
}

/// Derive backend render flags from an OtherModeL render-mode word.
/// The alpha-test values follow the reference viewer: forced blending
/// disables the test outright, otherwise CVG_X_ALPHA selects mode 1
/// and ALPHA_CVG_SEL mode 2.
fn decode_render_mode(bits: u32) -> RenderMode {
    let blend = bits & FORCE_BL != 0;
    let alpha_test_mode = if blend {
        0
    } else if bits & CVG_X_ALPHA != 0 {
        1
    } else if bits & ALPHA_CVG_SEL != 0 {
        2
    } else {
        0
    };
    RenderMode {
        depth_test: bits & Z_CMP != 0,
        depth_write: bits & Z_UPD != 0,
        blend,
        decal_z_bias: bits & ZMODE_DEC != 0,
        alpha_test_mode,
    }
}

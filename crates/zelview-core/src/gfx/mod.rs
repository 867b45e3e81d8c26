/// Backend-agnostic drawable output.
///
/// The display-list interpreter produces an ordered sequence of
/// [`DrawOp`] values; a rendering backend replays them later. Nothing
/// in this module issues draw calls.
pub mod f3dex2;
pub mod matrix;
pub mod texture;

use std::rc::Rc;

/// One interpreted vertex: model-space position, texel-unit UV, and
/// the raw color-or-normal bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub uv: [f32; 2],
    pub color: [u8; 4],
}

/// Capacity of the microcode's vertex register file.
pub const VERTEX_BUFFER_SIZE: usize = 32;

/// Lightweight handle to a backend texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// Channel layout of a decoded pixel buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureChannels {
    Intensity,
    IntensityAlpha,
    Rgba,
}

impl TextureChannels {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureChannels::Intensity => 1,
            TextureChannels::IntensityAlpha => 2,
            TextureChannels::Rgba => 4,
        }
    }
}

/// Texture coordinate wrap behavior per axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WrapMode {
    Repeat,
    Mirror,
    Clamp,
}

impl WrapMode {
    /// Decode the 2-bit clamp/mirror field of a tile descriptor.
    pub fn from_cm(cm: u8) -> Self {
        match cm {
            1 => WrapMode::Mirror,
            2 | 3 => WrapMode::Clamp,
            _ => WrapMode::Repeat,
        }
    }
}

/// A decoded, backend-registered texture. Shared between the tile
/// cache and every DrawOp that binds it.
#[derive(Debug)]
pub struct DecodedTexture {
    pub id: TextureId,
    pub width: u32,
    pub height: u32,
    pub channels: TextureChannels,
    pub pixels: Vec<u8>,
}

/// Face culling and shading flags derived from the geometry mode word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GeometryState {
    pub cull_front: bool,
    pub cull_back: bool,
    /// Set when lighting is off and vertex colors drive shading.
    pub use_vertex_colors: bool,
}

/// Render-mode flags derived from the OtherModeL render-mode field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderMode {
    pub depth_test: bool,
    pub depth_write: bool,
    /// Forced blending (FORCE_BL).
    pub blend: bool,
    /// Decal z-bias (ZMODE_DEC).
    pub decal_z_bias: bool,
    /// 0 = off, 1 = coverage-times-alpha, 2 = alpha-selects-coverage.
    pub alpha_test_mode: u8,
}

/// A texture bind recorded ahead of the primitives that sample it.
/// The scale factors come from the most recent G_TEXTURE command and
/// apply to vertex UVs at sampling time.
#[derive(Clone, Debug)]
pub struct TextureBinding {
    pub texture: Rc<DecodedTexture>,
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
    pub scale_s: f32,
    pub scale_t: f32,
}

/// One deferred unit of backend work.
#[derive(Clone, Debug)]
pub enum DrawOp {
    /// A primitive batch: indices into a snapshot of the interpreter's
    /// vertex buffer. Consecutive batches share the same `Rc` snapshot
    /// until a referenced slot is overwritten.
    Triangles {
        vertices: Rc<[Vertex; VERTEX_BUFFER_SIZE]>,
        indices: Vec<u8>,
    },
    SetGeometryMode(GeometryState),
    SetRenderMode(RenderMode),
    BindTexture(TextureBinding),
}

/// Collaborator that turns decoded pixels into a backend texture
/// handle. The core needs nothing else from the renderer.
pub trait TextureBackend {
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        channels: TextureChannels,
        pixels: &[u8],
    ) -> TextureId;
}

/// Backend that hands out sequential ids and discards pixels. Used by
/// tests and the CLI dumper.
#[derive(Default)]
pub struct NullBackend {
    next_id: u32,
}

impl TextureBackend for NullBackend {
    fn create_texture(
        &mut self,
        _width: u32,
        _height: u32,
        _channels: TextureChannels,
        _pixels: &[u8],
    ) -> TextureId {
        let id = TextureId(self.next_id);
        self.next_id += 1;
        id
    }
}

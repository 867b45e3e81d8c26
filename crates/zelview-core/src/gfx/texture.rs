/// Texel decoding: raw tile bytes in one of the hardware pixel
/// encodings, expanded to a canonical 8-bit-per-channel buffer.
///
/// The tile's format byte packs the color format in bits 5-7 and the
/// texel size in bits 3-4, e.g. 0x40 = 4-bit color-indexed, 0x10 =
/// 16-bit RGBA. Indexed formats depend on the most recently loaded
/// palette (TLUT).
use std::collections::HashMap;
use std::rc::Rc;

use super::{DecodedTexture, TextureBackend, TextureChannels, TextureId};
use crate::segment::{read_u16_at, SegmentReader};

/// Texture-sampling parameters accumulated from SETTILE / SETTILESIZE,
/// plus the source address captured when a texture-block upload
/// completes.
#[derive(Clone, Copy, Debug, Default)]
pub struct TileParams {
    /// Packed format byte: color format in bits 5-7, size in bits 3-4.
    pub format: u8,
    /// TMEM line stride, in 64-bit words.
    pub line: u16,
    pub palette: u8,
    pub cm_s: u8,
    pub cm_t: u8,
    pub mask_s: u8,
    pub mask_t: u8,
    pub shift_s: u8,
    pub shift_t: u8,
    /// Source rectangle in texel units.
    pub uls: u16,
    pub ult: u16,
    pub lrs: u16,
    pub lrt: u16,
    /// Virtual address of the texel data.
    pub addr: u32,
}

/// Expand a 16-bit R5G5B5A1 pixel to 8-bit channels by bit
/// replication; the alpha bit maps to 0 or 255.
pub fn expand_r5g5b5a1(p: u16) -> [u8; 4] {
    let r = ((p & 0xF800) >> 11) as u8;
    let g = ((p & 0x07C0) >> 6) as u8;
    let b = ((p & 0x003E) >> 1) as u8;
    [
        (r << 3) | (r >> 2),
        (g << 3) | (g >> 2),
        (b << 3) | (b >> 2),
        if p & 1 != 0 { 0xFF } else { 0x00 },
    ]
}

/// Decode a TLUT of `count` R5G5B5A1 entries into 4-byte RGBA entries.
/// Returns `None` when the source address does not resolve.
pub fn decode_palette(reader: &SegmentReader, addr: u32, count: usize) -> Option<Vec<u8>> {
    let mut offs = reader.resolve(addr)?;
    let data = reader.data();
    let mut out = Vec::with_capacity(count * 4);
    for _ in 0..count {
        out.extend_from_slice(&expand_r5g5b5a1(read_u16_at(data, offs)));
        offs += 2;
    }
    Some(out)
}

/// Per-format texel budget and line-width shift. Unknown format bytes
/// yield `None` and decode to an empty texture.
fn texel_budget(format: u8) -> Option<(u32, u32)> {
    Some(match format {
        // 4-bit
        0x00 => (4096, 4), // RGBA
        0x40 => (4096, 4), // CI
        0x60 => (8196, 4), // IA
        0x80 => (8196, 4), // I
        // 8-bit
        0x08 => (2048, 3), // RGBA
        0x48 => (2048, 3), // CI
        0x68 => (4096, 3), // IA
        0x88 => (4096, 3), // I
        // 16-bit
        0x10 => (2048, 2), // RGBA
        0x50 => (2048, 0), // CI
        0x70 => (2048, 2), // IA
        0x90 => (2048, 0), // I
        // 32-bit
        0x18 => (1024, 2), // RGBA
        _ => return None,
    })
}

/// Destination channel layout, chosen from the format class bits
/// alone (indexed formats expand through an RGBA palette).
pub fn dest_channels(format: u8) -> Option<TextureChannels> {
    match format & 0xE0 {
        0x00 => Some(TextureChannels::Rgba),
        0x40 => Some(TextureChannels::Rgba),
        0x60 => Some(TextureChannels::IntensityAlpha),
        0x80 => Some(TextureChannels::Intensity),
        _ => None,
    }
}

/// Derive the output width and height for a tile.
///
/// Three-way fallback: the mask dimensions win if masking is enabled
/// and they fit the texel budget; else the explicit tile rectangle if
/// it fits; else the raw line length. The choice decides the output
/// buffer size, so all three branches matter.
pub fn calc_tile_size(tile: &TileParams) -> Option<(u32, u32)> {
    let (max_texel, line_shift) = texel_budget(tile.format)?;

    let line_w = (tile.line as u32) << line_shift;
    let tile_w = (tile.lrs as u32).wrapping_sub(tile.uls as u32).wrapping_add(1);
    let tile_h = (tile.lrt as u32).wrapping_sub(tile.ult as u32).wrapping_add(1);
    let mask_w = 1u32 << tile.mask_s;
    let mask_h = 1u32 << tile.mask_t;

    let line_h = if line_w > 0 {
        (max_texel / line_w).min(tile_h)
    } else {
        0
    };

    let width = if tile.mask_s > 0 && mask_w * mask_h <= max_texel {
        mask_w
    } else if tile_w * tile_h <= max_texel {
        tile_w
    } else {
        line_w
    };

    let height = if tile.mask_t > 0 && mask_w * mask_h <= max_texel {
        mask_h
    } else if tile_w * tile_h <= max_texel {
        tile_h
    } else {
        line_h
    };

    Some((width, height))
}

/// Replicate a 4-bit value into both halves of a byte.
fn expand_nibble(n: u8) -> u8 {
    (n << 4) | n
}

fn src_byte(data: &[u8], base: usize, offs: usize) -> u8 {
    data.get(base + offs).copied().unwrap_or(0)
}

fn decode_ci4(data: &[u8], base: usize, n: usize, palette: &[u8], out: &mut Vec<u8>) {
    for t in 0..n {
        let b = src_byte(data, base, t / 2);
        let idx = if t & 1 == 0 { b >> 4 } else { b & 0x0F } as usize * 4;
        match palette.get(idx..idx + 4) {
            Some(rgba) => out.extend_from_slice(rgba),
            None => out.extend_from_slice(&[0; 4]),
        }
    }
}

fn decode_ci8(data: &[u8], base: usize, n: usize, palette: &[u8], out: &mut Vec<u8>) {
    for t in 0..n {
        let idx = src_byte(data, base, t) as usize * 4;
        match palette.get(idx..idx + 4) {
            Some(rgba) => out.extend_from_slice(rgba),
            None => out.extend_from_slice(&[0; 4]),
        }
    }
}

fn decode_i4(data: &[u8], base: usize, n: usize, out: &mut Vec<u8>) {
    for t in 0..n {
        let b = src_byte(data, base, t / 2);
        let nib = if t & 1 == 0 { b >> 4 } else { b & 0x0F };
        out.push(expand_nibble(nib));
    }
}

fn decode_i8(data: &[u8], base: usize, n: usize, out: &mut Vec<u8>) {
    for t in 0..n {
        out.push(src_byte(data, base, t));
    }
}

fn decode_ia4(data: &[u8], base: usize, n: usize, out: &mut Vec<u8>) {
    // 3-bit intensity replicated to a byte, 1-bit alpha.
    for t in 0..n {
        let b = src_byte(data, base, t / 2);
        let nib = if t & 1 == 0 { b >> 4 } else { b & 0x0F };
        let i = nib & 0x0E;
        out.push((i << 4) | i);
        out.push(if nib & 0x01 != 0 { 0xFF } else { 0x00 });
    }
}

fn decode_ia8(data: &[u8], base: usize, n: usize, out: &mut Vec<u8>) {
    for t in 0..n {
        let b = src_byte(data, base, t);
        out.push(expand_nibble(b >> 4));
        out.push(expand_nibble(b & 0x0F));
    }
}

fn decode_ia16(data: &[u8], base: usize, n: usize, out: &mut Vec<u8>) {
    for t in 0..n {
        out.push(src_byte(data, base, t * 2));
        out.push(src_byte(data, base, t * 2 + 1));
    }
}

fn decode_rgba16(data: &[u8], base: usize, n: usize, out: &mut Vec<u8>) {
    for t in 0..n {
        out.extend_from_slice(&expand_r5g5b5a1(read_u16_at(data, base + t * 2)));
    }
}

/// Decoded pixels before backend registration.
pub struct DecodedPixels {
    pub width: u32,
    pub height: u32,
    pub channels: TextureChannels,
    pub pixels: Vec<u8>,
}

/// Decode one tile's texels into canonical 8-bit channels.
///
/// Never fails: an unsupported format yields an empty buffer, an
/// indexed format without a loaded palette (or an unresolvable source
/// address) yields a fully zeroed buffer of the expected length.
pub fn decode_tile(
    reader: &SegmentReader,
    tile: &TileParams,
    palette: Option<&[u8]>,
) -> DecodedPixels {
    let (width, height, channels) = match (calc_tile_size(tile), dest_channels(tile.format)) {
        (Some((w, h)), Some(c)) => (w, h, c),
        _ => {
            log::error!("Unsupported texture format {:#04X}", tile.format);
            return DecodedPixels {
                width: 0,
                height: 0,
                channels: TextureChannels::Rgba,
                pixels: Vec::new(),
            };
        }
    };

    let n = (width * height) as usize;
    let out_len = n * channels.bytes_per_pixel();
    let mut out = Vec::with_capacity(out_len);

    let base = reader.resolve(tile.addr);
    let palette_missing =
        matches!(tile.format, 0x40 | 0x48) && palette.map_or(true, |p| p.is_empty());
    if base.is_none() || palette_missing {
        // Keep the output length exact so the backend still gets a
        // well-formed (black/transparent) texture.
        out.resize(out_len, 0);
        return DecodedPixels {
            width,
            height,
            channels,
            pixels: out,
        };
    }
    let base = base.unwrap_or(0);
    let data = reader.data();
    let palette = palette.unwrap_or(&[]);

    match tile.format {
        0x40 => decode_ci4(data, base, n, palette, &mut out),
        0x48 => decode_ci8(data, base, n, palette, &mut out),
        0x60 => decode_ia4(data, base, n, &mut out),
        0x68 => decode_ia8(data, base, n, &mut out),
        0x70 => decode_ia16(data, base, n, &mut out),
        0x80 => decode_i4(data, base, n, &mut out),
        0x88 => decode_i8(data, base, n, &mut out),
        0x10 => decode_rgba16(data, base, n, &mut out),
        other => {
            log::error!("Unsupported texture format {:#04X}", other);
            out.resize(out_len, 0);
        }
    }

    DecodedPixels {
        width,
        height,
        channels,
        pixels: out,
    }
}

/// Decoded-tile cache keyed by source address. Owned by one container
/// load session and dropped with it; two tiles naming the same address
/// share pixels and the backend handle.
#[derive(Default)]
pub struct TileCache {
    map: HashMap<u32, Rc<DecodedTexture>>,
}

impl TileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Fetch a decoded tile, decoding and registering it with the
    /// backend on first sight of its source address.
    pub fn get_or_decode<B: TextureBackend + ?Sized>(
        &mut self,
        reader: &SegmentReader,
        tile: &TileParams,
        palette: Option<&[u8]>,
        backend: &mut B,
    ) -> Rc<DecodedTexture> {
        if let Some(cached) = self.map.get(&tile.addr) {
            return Rc::clone(cached);
        }

        let decoded = decode_tile(reader, tile, palette);
        let id = backend.create_texture(
            decoded.width,
            decoded.height,
            decoded.channels,
            &decoded.pixels,
        );
        let texture = Rc::new(DecodedTexture {
            id,
            width: decoded.width,
            height: decoded.height,
            channels: decoded.channels,
            pixels: decoded.pixels,
        });
        self.map.insert(tile.addr, Rc::clone(&texture));
        texture
    }
}

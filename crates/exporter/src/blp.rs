// BLP2 texture decoding (first mip level only)
//
// Header: magic, type, compression, alpha depth, alpha type, has-mips,
// width, height, 16 mip offsets, 16 mip sizes, 256-entry BGRA palette.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use image::RgbaImage;

use crate::error::{ExportError, Result};

const HEADER_SIZE: usize = 1172;

const COMPRESSION_PALETTE: u8 = 1;
const COMPRESSION_DXT: u8 = 2;
const COMPRESSION_RAW: u8 = 3;

const ALPHA_TYPE_DXT3: u8 = 1;
const ALPHA_TYPE_DXT5: u8 = 7;

struct BlpHeader {
    compression: u8,
    alpha_depth: u8,
    alpha_type: u8,
    width: u32,
    height: u32,
    mip_offset: u32,
    mip_size: u32,
    palette: [u32; 256],
}

pub fn decode_blp(bytes: &[u8]) -> Result<RgbaImage> {
    let header = read_header(bytes).map_err(|err| ExportError::decode("BLP header", err))?;
    if header.width == 0 || header.height == 0 || header.width > 4096 || header.height > 4096 {
        return Err(ExportError::decode(
            "BLP",
            format!("unsupported size {}x{}", header.width, header.height),
        ));
    }

    let start = header.mip_offset as usize;
    let end = start.saturating_add(header.mip_size as usize);
    let data = bytes
        .get(start..end)
        .ok_or_else(|| ExportError::decode("BLP", "mip level 0 out of bounds"))?;

    let (width, height) = (header.width as usize, header.height as usize);
    let pixels = match header.compression {
        COMPRESSION_PALETTE => decode_palette(&header, data, width, height),
        COMPRESSION_DXT => match header.alpha_type {
            ALPHA_TYPE_DXT3 => decode_blocks(data, width, height, 16, decode_dxt3_block),
            ALPHA_TYPE_DXT5 => decode_blocks(data, width, height, 16, decode_dxt5_block),
            _ => decode_blocks(data, width, height, 8, decode_dxt1_block),
        },
        COMPRESSION_RAW => decode_raw(data, width, height),
        other => return Err(ExportError::decode("BLP", format!("unknown compression {}", other))),
    }
    .ok_or_else(|| ExportError::decode("BLP", "truncated pixel data"))?;

    RgbaImage::from_raw(header.width, header.height, pixels)
        .ok_or_else(|| ExportError::decode("BLP", "pixel buffer size mismatch"))
}

fn read_header(bytes: &[u8]) -> std::io::Result<BlpHeader> {
    if bytes.len() < HEADER_SIZE {
        return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "file shorter than header"));
    }
    let mut cursor = Cursor::new(bytes);
    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic)?;
    if &magic != b"BLP2" {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "not a BLP2 file"));
    }

    let _kind = cursor.read_u32::<LittleEndian>()?;
    let compression = cursor.read_u8()?;
    let alpha_depth = cursor.read_u8()?;
    let alpha_type = cursor.read_u8()?;
    let _has_mips = cursor.read_u8()?;
    let width = cursor.read_u32::<LittleEndian>()?;
    let height = cursor.read_u32::<LittleEndian>()?;

    let mut offsets = [0u32; 16];
    cursor.read_u32_into::<LittleEndian>(&mut offsets)?;
    let mut sizes = [0u32; 16];
    cursor.read_u32_into::<LittleEndian>(&mut sizes)?;
    let mut palette = [0u32; 256];
    cursor.read_u32_into::<LittleEndian>(&mut palette)?;

    Ok(BlpHeader {
        compression,
        alpha_depth,
        alpha_type,
        width,
        height,
        mip_offset: offsets[0],
        mip_size: sizes[0],
        palette,
    })
}

fn decode_palette(header: &BlpHeader, data: &[u8], width: usize, height: usize) -> Option<Vec<u8>> {
    let count = width * height;
    let indices = data.get(..count)?;
    let alpha = &data[count..];

    let mut pixels = Vec::with_capacity(count * 4);
    for (i, &index) in indices.iter().enumerate() {
        let bgra = header.palette[index as usize];
        let a = match header.alpha_depth {
            0 => 255,
            1 => {
                let byte = *alpha.get(i / 8)?;
                if byte & (1 << (i % 8)) != 0 { 255 } else { 0 }
            }
            4 => {
                let byte = *alpha.get(i / 2)?;
                let nibble = if i % 2 == 0 { byte & 0x0F } else { byte >> 4 };
                nibble * 17
            }
            _ => *alpha.get(i)?,
        };
        pixels.extend_from_slice(&[(bgra >> 16) as u8, (bgra >> 8) as u8, bgra as u8, a]);
    }
    Some(pixels)
}

fn decode_raw(data: &[u8], width: usize, height: usize) -> Option<Vec<u8>> {
    let raw = data.get(..width * height * 4)?;
    let mut pixels = Vec::with_capacity(raw.len());
    for bgra in raw.chunks_exact(4) {
        pixels.extend_from_slice(&[bgra[2], bgra[1], bgra[0], bgra[3]]);
    }
    Some(pixels)
}

/// Walk 4x4 blocks and scatter the decoded texels, clipping at the edges
fn decode_blocks(
    data: &[u8],
    width: usize,
    height: usize,
    block_size: usize,
    decode: fn(&[u8]) -> [[u8; 4]; 16],
) -> Option<Vec<u8>> {
    let blocks_x = width.div_ceil(4);
    let blocks_y = height.div_ceil(4);
    let mut pixels = vec![0u8; width * height * 4];

    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            let offset = (by * blocks_x + bx) * block_size;
            let block = data.get(offset..offset + block_size)?;
            let texels = decode(block);
            for (t, texel) in texels.iter().enumerate() {
                let x = bx * 4 + t % 4;
                let y = by * 4 + t / 4;
                if x < width && y < height {
                    let idx = (y * width + x) * 4;
                    pixels[idx..idx + 4].copy_from_slice(texel);
                }
            }
        }
    }
    Some(pixels)
}

fn rgb565(value: u16) -> [u8; 3] {
    let r = ((value >> 11) & 0x1F) as u32;
    let g = ((value >> 5) & 0x3F) as u32;
    let b = (value & 0x1F) as u32;
    [(r * 255 / 31) as u8, (g * 255 / 63) as u8, (b * 255 / 31) as u8]
}

fn blend(a: [u8; 3], b: [u8; 3], wa: u32, wb: u32) -> [u8; 3] {
    let total = wa + wb;
    [
        ((a[0] as u32 * wa + b[0] as u32 * wb) / total) as u8,
        ((a[1] as u32 * wa + b[1] as u32 * wb) / total) as u8,
        ((a[2] as u32 * wa + b[2] as u32 * wb) / total) as u8,
    ]
}

/// Colour half of a DXT block; `allow_punch` enables DXT1's 3-colour mode
fn decode_color_block(block: &[u8], allow_punch: bool) -> [[u8; 4]; 16] {
    let c0 = u16::from_le_bytes([block[0], block[1]]);
    let c1 = u16::from_le_bytes([block[2], block[3]]);
    let bits = u32::from_le_bytes([block[4], block[5], block[6], block[7]]);
    let (rgb0, rgb1) = (rgb565(c0), rgb565(c1));

    let palette = if c0 > c1 || !allow_punch {
        [
            [rgb0[0], rgb0[1], rgb0[2], 255],
            [rgb1[0], rgb1[1], rgb1[2], 255],
            with_alpha(blend(rgb0, rgb1, 2, 1), 255),
            with_alpha(blend(rgb0, rgb1, 1, 2), 255),
        ]
    } else {
        [
            [rgb0[0], rgb0[1], rgb0[2], 255],
            [rgb1[0], rgb1[1], rgb1[2], 255],
            with_alpha(blend(rgb0, rgb1, 1, 1), 255),
            [0, 0, 0, 0],
        ]
    };

    let mut texels = [[0u8; 4]; 16];
    for (i, texel) in texels.iter_mut().enumerate() {
        *texel = palette[((bits >> (i * 2)) & 0x3) as usize];
    }
    texels
}

fn with_alpha(rgb: [u8; 3], a: u8) -> [u8; 4] {
    [rgb[0], rgb[1], rgb[2], a]
}

fn decode_dxt1_block(block: &[u8]) -> [[u8; 4]; 16] {
    decode_color_block(block, true)
}

fn decode_dxt3_block(block: &[u8]) -> [[u8; 4]; 16] {
    let mut texels = decode_color_block(&block[8..16], false);
    for (i, texel) in texels.iter_mut().enumerate() {
        let byte = block[i / 2];
        let nibble = if i % 2 == 0 { byte & 0x0F } else { byte >> 4 };
        texel[3] = nibble * 17;
    }
    texels
}

fn decode_dxt5_block(block: &[u8]) -> [[u8; 4]; 16] {
    let (a0, a1) = (block[0] as u32, block[1] as u32);
    let mut alphas = [0u8; 8];
    alphas[0] = a0 as u8;
    alphas[1] = a1 as u8;
    if a0 > a1 {
        for i in 1..7u32 {
            alphas[i as usize + 1] = ((a0 * (7 - i) + a1 * i) / 7) as u8;
        }
    } else {
        for i in 1..5u32 {
            alphas[i as usize + 1] = ((a0 * (5 - i) + a1 * i) / 5) as u8;
        }
        alphas[6] = 0;
        alphas[7] = 255;
    }

    let mut bits = 0u64;
    for (i, byte) in block[2..8].iter().enumerate() {
        bits |= (*byte as u64) << (8 * i);
    }

    let mut texels = decode_color_block(&block[8..16], false);
    for (i, texel) in texels.iter_mut().enumerate() {
        texel[3] = alphas[((bits >> (3 * i)) & 0x7) as usize];
    }
    texels
}

/// Builds BLP2 files for tests
#[cfg(test)]
pub(crate) mod fixture {
    use byteorder::{LittleEndian, WriteBytesExt};

    pub fn build(
        compression: u8,
        alpha_depth: u8,
        alpha_type: u8,
        width: u32,
        height: u32,
        palette: &[u32],
        data: &[u8],
    ) -> Vec<u8> {
        let mut out = b"BLP2".to_vec();
        out.write_u32::<LittleEndian>(1).unwrap();
        out.extend_from_slice(&[compression, alpha_depth, alpha_type, 0]);
        out.write_u32::<LittleEndian>(width).unwrap();
        out.write_u32::<LittleEndian>(height).unwrap();
        out.write_u32::<LittleEndian>(super::HEADER_SIZE as u32).unwrap();
        for _ in 1..16 {
            out.write_u32::<LittleEndian>(0).unwrap();
        }
        out.write_u32::<LittleEndian>(data.len() as u32).unwrap();
        for _ in 1..16 {
            out.write_u32::<LittleEndian>(0).unwrap();
        }
        for i in 0..256 {
            out.write_u32::<LittleEndian>(palette.get(i).copied().unwrap_or(0)).unwrap();
        }
        out.extend_from_slice(data);
        out
    }

    /// 2x2 palettized image without alpha: red, green, blue, white
    pub fn palettized_2x2() -> Vec<u8> {
        build(
            1,
            0,
            0,
            2,
            2,
            &[0x00FF0000, 0x0000FF00, 0x000000FF, 0x00FFFFFF],
            &[0, 1, 2, 3],
        )
    }
}

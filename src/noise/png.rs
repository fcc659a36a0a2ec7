//! Minimal PNG container handling.
//!
//! Enough to rewrite the IHDR dimensions of an encoded canvas and to
//! produce uncompressed (stored-deflate) PNGs for the software host.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{Result, SpoofError};
use crate::noise::image::ImageBuffer;

pub const SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];
const MAX_DIMENSION: u32 = 0x7fff_ffff;
const STORED_BLOCK_MAX: usize = 65_535;

fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    for (n, slot) in table.iter_mut().enumerate() {
        let mut c = n as u32;
        for _ in 0..8 {
            c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
        }
        *slot = c;
    }
    table
}

/// CRC-32 (ISO-HDLC), as used by PNG chunks.
pub fn crc32(bytes: &[u8]) -> u32 {
    let table = crc_table();
    let mut c = 0xFFFF_FFFFu32;
    for b in bytes {
        c = table[((c ^ u32::from(*b)) & 0xFF) as usize] ^ (c >> 8);
    }
    c ^ 0xFFFF_FFFF
}

fn adler32(bytes: &[u8]) -> u32 {
    const MOD: u32 = 65_521;
    let (mut a, mut b) = (1u32, 0u32);
    for chunk in bytes.chunks(5552) {
        for v in chunk {
            a += u32::from(*v);
            b += a;
        }
        a %= MOD;
        b %= MOD;
    }
    (b << 16) | a
}

fn has_ihdr(png: &[u8]) -> bool {
    png.len() >= 33
        && png[..8] == SIGNATURE
        && png[8..12] == [0, 0, 0, 13]
        && &png[12..16] == b"IHDR"
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Declared `(width, height)` of a PNG.
pub fn dimensions(png: &[u8]) -> Result<(u32, u32)> {
    if !has_ihdr(png) {
        return Err(SpoofError::InvalidImage("not a PNG with a leading IHDR".into()));
    }
    Ok((be_u32(&png[16..20]), be_u32(&png[20..24])))
}

/// Rewrite the IHDR width and height in place and fix its CRC.
pub fn patch_ihdr(png: &mut [u8], width: u32, height: u32) -> Result<()> {
    if !has_ihdr(png) {
        return Err(SpoofError::InvalidImage("not a PNG with a leading IHDR".into()));
    }
    let w = width.clamp(1, MAX_DIMENSION);
    let h = height.clamp(1, MAX_DIMENSION);
    png[16..20].copy_from_slice(&w.to_be_bytes());
    png[20..24].copy_from_slice(&h.to_be_bytes());
    let crc = crc32(&png[12..29]);
    png[29..33].copy_from_slice(&crc.to_be_bytes());
    Ok(())
}

/// Split a `data:<mime>;base64,<payload>` URL.
pub fn parse_data_url(url: &str) -> Result<(String, Vec<u8>)> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| SpoofError::InvalidImage("not a data URL".into()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| SpoofError::InvalidImage("data URL without payload".into()))?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or_else(|| SpoofError::InvalidImage("data URL is not base64".into()))?;
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| SpoofError::InvalidImage(e.to_string()))?;
    Ok((mime.to_string(), bytes))
}

pub fn to_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Patch the IHDR inside a PNG data URL.
pub fn patch_data_url(url: &str, width: u32, height: u32) -> Result<String> {
    let (mime, mut bytes) = parse_data_url(url)?;
    if mime != "image/png" {
        return Err(SpoofError::Unsupported(format!("IHDR patch on {mime}")));
    }
    patch_ihdr(&mut bytes, width, height)?;
    Ok(to_data_url(&mime, &bytes))
}

fn push_chunk(out: &mut Vec<u8>, kind: &[u8; 4], body: &[u8]) {
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    let start = out.len();
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    let crc = crc32(&out[start..]);
    out.extend_from_slice(&crc.to_be_bytes());
}

/// Encode RGBA8 pixels as a PNG with stored (uncompressed) deflate blocks.
pub fn encode_rgba(img: &ImageBuffer) -> Vec<u8> {
    let row_len = img.width() as usize * 4;
    let mut raw = Vec::with_capacity((row_len + 1) * img.height() as usize);
    for row in img.data().chunks(row_len.max(1)).take(img.height() as usize) {
        raw.push(0);
        raw.extend_from_slice(row);
    }

    let mut zlib = vec![0x78, 0x01];
    let blocks: Vec<&[u8]> = if raw.is_empty() {
        vec![&raw[..]]
    } else {
        raw.chunks(STORED_BLOCK_MAX).collect()
    };
    let last = blocks.len() - 1;
    for (i, block) in blocks.iter().enumerate() {
        zlib.push(u8::from(i == last));
        let len = block.len() as u16;
        zlib.extend_from_slice(&len.to_le_bytes());
        zlib.extend_from_slice(&(!len).to_le_bytes());
        zlib.extend_from_slice(block);
    }
    zlib.extend_from_slice(&adler32(&raw).to_be_bytes());

    let mut ihdr = Vec::with_capacity(13);
    ihdr.extend_from_slice(&img.width().to_be_bytes());
    ihdr.extend_from_slice(&img.height().to_be_bytes());
    // 8-bit RGBA, deflate, adaptive filtering, no interlace.
    ihdr.extend_from_slice(&[8, 6, 0, 0, 0]);

    let mut out = SIGNATURE.to_vec();
    push_chunk(&mut out, b"IHDR", &ihdr);
    push_chunk(&mut out, b"IDAT", &zlib);
    push_chunk(&mut out, b"IEND", &[]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_known_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b"IEND"), 0xAE42_6082);
    }

    #[test]
    fn test_adler32_known_value() {
        assert_eq!(adler32(b"Wikipedia"), 0x11E6_0398);
    }

    #[test]
    fn test_encode_layout() {
        let png = encode_rgba(&ImageBuffer::filled(10, 10, [255, 0, 0, 255]));
        assert_eq!(&png[..8], &SIGNATURE);
        assert_eq!(dimensions(&png).unwrap(), (10, 10));
        assert_eq!(&png[png.len() - 12..], &[0, 0, 0, 0, b'I', b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82]);
        // IHDR CRC is valid.
        assert_eq!(be_u32(&png[29..33]), crc32(&png[12..29]));
    }

    #[test]
    fn test_patch_ihdr_rewrites_and_recrcs() {
        let mut png = encode_rgba(&ImageBuffer::filled(4, 3, [0, 0, 0, 255]));
        patch_ihdr(&mut png, 300, 150).unwrap();
        assert_eq!(dimensions(&png).unwrap(), (300, 150));
        assert_eq!(be_u32(&png[29..33]), crc32(&png[12..29]));

        patch_ihdr(&mut png, 0, u32::MAX).unwrap();
        assert_eq!(dimensions(&png).unwrap(), (1, MAX_DIMENSION));
    }

    #[test]
    fn test_patch_rejects_non_png() {
        let mut junk = vec![0u8; 40];
        assert!(patch_ihdr(&mut junk, 1, 1).is_err());
        assert!(patch_data_url("data:image/jpeg;base64,AAAA", 1, 1).is_err());
        assert!(parse_data_url("nope").is_err());
    }

    #[test]
    fn test_data_url_patch() {
        let png = encode_rgba(&ImageBuffer::filled(2, 2, [1, 2, 3, 4]));
        let url = to_data_url("image/png", &png);
        let patched = patch_data_url(&url, 64, 32).unwrap();
        let (mime, bytes) = parse_data_url(&patched).unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(dimensions(&bytes).unwrap(), (64, 32));
    }
}

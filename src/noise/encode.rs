//! Content signatures and the per-canvas encode cache.

use std::collections::HashMap;

use crate::noise::image::ImageBuffer;
use crate::noise::png;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 16_777_619;
const FNV64_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV64_PRIME: u64 = 0x0000_0100_0000_01b3;

fn stride_for(len: usize) -> usize {
    if len >= 1 << 19 {
        32
    } else if len >= 1 << 17 {
        16
    } else if len >= 1 << 15 {
        8
    } else {
        4
    }
}

/// Strided FNV-1a over the pixel bytes plus the trailing bytes, mixed with
/// the dimensions.
///
/// Larger buffers are sampled more sparsely; the tail is always hashed so
/// edits in the last row are not missed.
pub fn content_signature(img: &ImageBuffer) -> u32 {
    let bytes = img.data();
    let stride = stride_for(bytes.len());
    let mut h = FNV_OFFSET;
    for b in bytes.iter().step_by(stride) {
        h ^= u32::from(*b);
        h = h.wrapping_mul(FNV_PRIME);
    }
    let tail = stride.min(16).min(bytes.len());
    for b in &bytes[bytes.len() - tail..] {
        h ^= u32::from(*b);
        h = h.wrapping_mul(FNV_PRIME);
    }
    h ^ (img.width() << 1) ^ (img.height() << 17)
}

/// 64-bit FNV-1a over every pixel byte and both dimensions.
///
/// The sampled [`content_signature`] picks the cache slot; this confirms a
/// hit really is the same image.
pub fn content_digest(img: &ImageBuffer) -> u64 {
    let dims = [img.width().to_le_bytes(), img.height().to_le_bytes()];
    dims.iter()
        .flatten()
        .chain(img.data())
        .fold(FNV64_OFFSET, |h, b| (h ^ u64::from(*b)).wrapping_mul(FNV64_PRIME))
}

/// Cache key for an encode of content `sig`.
pub fn encode_key(sig: u32, mime: &str, quality: Option<f64>) -> String {
    match quality {
        Some(q) => format!("v2:{sig}|{mime}|{q}"),
        None => format!("v2:{sig}|{mime}|"),
    }
}

/// An encoded image and the MIME type the encoder actually produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl Blob {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { mime: mime.into(), bytes }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn to_data_url(&self) -> String {
        png::to_data_url(&self.mime, &self.bytes)
    }
}

/// Encoded output by content key. One per canvas.
///
/// Each entry remembers the full digest of the pixels it was encoded from;
/// a key match with a different digest is a miss.
#[derive(Debug, Default)]
pub struct EncodeCache {
    entries: HashMap<String, (u64, Blob)>,
    hits: u64,
}

impl EncodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, key: &str, digest: u64) -> Option<Blob> {
        let found = self
            .entries
            .get(key)
            .filter(|(d, _)| *d == digest)
            .map(|(_, blob)| blob.clone());
        if found.is_some() {
            self.hits += 1;
        }
        found
    }

    pub fn insert(&mut self, key: String, digest: u64, blob: Blob) {
        self.entries.insert(key, (digest, blob));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_tracks_content_and_size() {
        let a = ImageBuffer::filled(10, 10, [255, 0, 0, 255]);
        let b = ImageBuffer::filled(10, 10, [254, 0, 0, 255]);
        let c = ImageBuffer::filled(20, 5, [255, 0, 0, 255]);
        assert_eq!(content_signature(&a), content_signature(&a.clone()));
        assert_ne!(content_signature(&a), content_signature(&b));
        assert_ne!(content_signature(&a), content_signature(&c));
    }

    #[test]
    fn test_signature_sees_last_byte() {
        let a = ImageBuffer::filled(300, 300, [0, 0, 0, 255]);
        let mut b = a.clone();
        let n = b.data().len();
        b.data_mut()[n - 2] = 1;
        assert_ne!(content_signature(&a), content_signature(&b));
    }

    #[test]
    fn test_digest_sees_every_channel() {
        let a = ImageBuffer::filled(10, 10, [0, 0, 0, 255]);
        let mut b = a.clone();
        b.set_pixel(2, 5, [0, 200, 0, 255]);
        // The sampled signature only sees the red byte of small images.
        assert_eq!(content_signature(&a), content_signature(&b));
        assert_ne!(content_digest(&a), content_digest(&b));
        assert_ne!(
            content_digest(&ImageBuffer::filled(2, 8, [1; 4])),
            content_digest(&ImageBuffer::filled(8, 2, [1; 4]))
        );
    }

    #[test]
    fn test_empty_image_signature() {
        let img = ImageBuffer::filled(0, 0, [0; 4]);
        assert_eq!(content_signature(&img), FNV_OFFSET);
    }

    #[test]
    fn test_cache_roundtrip() {
        let mut cache = EncodeCache::new();
        let key = encode_key(7, "image/png", None);
        assert!(cache.get(&key, 1).is_none());
        let blob = Blob::new("image/png", vec![1, 2, 3]);
        cache.insert(key.clone(), 1, blob.clone());
        assert_eq!(cache.get(&key, 1), Some(blob));
        assert_eq!(cache.get(&key, 2), None);
        assert_eq!(cache.hits(), 1);
        assert_ne!(key, encode_key(7, "image/jpeg", Some(0.9)));
    }
}

use crate::core::hash::{FuzzyHash, StrictHash};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use image_hasher::{HashAlg, Hasher, HasherConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Hash computation failed: {message}")]
    ComputationFailed { message: String },
}

/// A decoded image together with its two fingerprints.
#[derive(Debug, Clone)]
pub struct HashedImage {
    pub strict: StrictHash,
    pub fuzzy: FuzzyHash,
    pub format: Option<ImageFormat>,
    pub image: DynamicImage,
}

/// Turns raw downloaded bytes into fingerprints.
pub trait ImagePipeline {
    fn decode_and_hash(&self, bytes: &[u8]) -> Result<HashedImage, ImagingError>;
}

/// DCT median hash (pHash) pipeline: 16x16 for the strict hash, 8x8 for the
/// bucket key.
pub struct PerceptualPipeline {
    strict_hasher: Hasher,
    fuzzy_hasher: Hasher,
}

impl PerceptualPipeline {
    pub fn new() -> Self {
        Self {
            strict_hasher: dct_hasher(16),
            fuzzy_hasher: dct_hasher(8),
        }
    }

    /// Hashes an already decoded image.
    pub fn hash_image(&self, image: &DynamicImage) -> Result<(StrictHash, FuzzyHash), ImagingError> {
        let strict = self.strict_hasher.hash_image(image);
        let fuzzy = self.fuzzy_hasher.hash_image(image);

        let strict = StrictHash::from_slice(strict.as_bytes()).ok_or_else(|| {
            ImagingError::ComputationFailed {
                message: format!("strict hash has {} bytes", strict.as_bytes().len()),
            }
        })?;
        let fuzzy = FuzzyHash::from_slice(fuzzy.as_bytes()).ok_or_else(|| {
            ImagingError::ComputationFailed {
                message: format!("fuzzy hash has {} bytes", fuzzy.as_bytes().len()),
            }
        })?;
        Ok((strict, fuzzy))
    }
}

impl Default for PerceptualPipeline {
    fn default() -> Self {
        Self::new()
    }
}

fn dct_hasher(side: u32) -> Hasher {
    HasherConfig::new()
        .hash_size(side, side)
        .hash_alg(HashAlg::Median)
        .preproc_dct()
        .to_hasher()
}

impl ImagePipeline for PerceptualPipeline {
    fn decode_and_hash(&self, bytes: &[u8]) -> Result<HashedImage, ImagingError> {
        let format = image::guess_format(bytes).ok();
        let image = image::load_from_memory(bytes)?;
        let (strict, fuzzy) = self.hash_image(&image)?;
        Ok(HashedImage {
            strict,
            fuzzy,
            format,
            image,
        })
    }
}

/// Re-encodes as JPEG at the given quality; alpha is dropped.
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImagingError> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(encoder)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    fn gradient(width: u32, height: u32, flip: bool) -> DynamicImage {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let v = ((x * 255) / width.max(1)) as u8;
            let w = ((y * 255) / height.max(1)) as u8;
            if flip { Rgb([w, v, 255 - v]) } else { Rgb([v, w, v / 2]) }
        });
        DynamicImage::ImageRgb8(img)
    }

    fn png_bytes(image: &DynamicImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_decode_and_hash_png() {
        let pipeline = PerceptualPipeline::new();
        let hashed = pipeline
            .decode_and_hash(&png_bytes(&gradient(64, 48, false)))
            .unwrap();
        assert_eq!(hashed.format, Some(ImageFormat::Png));
        assert_eq!(hashed.strict.to_token().len(), 66);
        assert_eq!(hashed.fuzzy.to_token().len(), 18);
    }

    #[test]
    fn test_same_image_same_hashes() {
        let pipeline = PerceptualPipeline::new();
        let bytes = png_bytes(&gradient(80, 80, false));
        let a = pipeline.decode_and_hash(&bytes).unwrap();
        let b = pipeline.decode_and_hash(&bytes).unwrap();
        assert_eq!(a.strict, b.strict);
        assert_eq!(a.fuzzy, b.fuzzy);
    }

    #[test]
    fn test_resized_copy_is_close() {
        let pipeline = PerceptualPipeline::new();
        let (big, _) = pipeline.hash_image(&gradient(256, 256, false)).unwrap();
        let (small, _) = pipeline.hash_image(&gradient(128, 128, false)).unwrap();
        let (other, _) = pipeline.hash_image(&gradient(256, 256, true)).unwrap();
        assert!(big.distance(&small) < big.distance(&other));
    }

    #[test]
    fn test_different_images_get_different_hashes() {
        let pipeline = PerceptualPipeline::new();
        let (strict_a, fuzzy_a) = pipeline.hash_image(&gradient(256, 256, false)).unwrap();
        let (strict_b, fuzzy_b) = pipeline.hash_image(&gradient(256, 256, true)).unwrap();
        assert_ne!(strict_a, strict_b);
        assert_ne!(fuzzy_a, fuzzy_b);
        assert!(strict_a.distance(&strict_b) > crate::core::matcher::FUZZY_THRESHOLD);
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        let pipeline = PerceptualPipeline::new();
        assert!(matches!(
            pipeline.decode_and_hash(b"definitely not an image"),
            Err(ImagingError::Image(_))
        ));
    }

    #[test]
    fn test_encode_jpeg() {
        let bytes = encode_jpeg(&gradient(32, 32, false), 100).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
    }
}

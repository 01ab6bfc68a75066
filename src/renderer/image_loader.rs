use std::path::Path;
use crate::renderer::error::AssetError;

/// Tightly packed RGBA8 pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl DecodedImage {
    pub const CHANNELS: u32 = 4;

    /// 1x1 transparent black image bound to channels without a file.
    pub fn placeholder() -> Self {
        Self {
            pixels: vec![0; Self::CHANNELS as usize],
            width: 1,
            height: 1,
        }
    }

    pub fn byte_size(&self) -> u64 {
        self.pixels.len() as u64
    }
}

pub trait ImageDecoder {
    fn load(&self, path: &Path) -> Result<DecodedImage, AssetError>;
}

/// Decodes PNG and JPEG files, forcing four channels.
#[derive(Default)]
pub struct FileImageDecoder;

impl ImageDecoder for FileImageDecoder {
    fn load(&self, path: &Path) -> Result<DecodedImage, AssetError> {
        if !path.is_file() {
            return Err(AssetError::ImageNotFound(path.to_path_buf()));
        }

        let rgba = image::open(path)
            .map_err(|e| AssetError::ImageDecode {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
            .to_rgba8();

        let (width, height) = rgba.dimensions();
        Ok(DecodedImage {
            pixels: rgba.into_raw(),
            width,
            height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_png_to_rgba() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channel0.png");
        let img = image::RgbImage::from_pixel(3, 2, image::Rgb([10, 20, 30]));
        img.save(&path).unwrap();

        let decoded = FileImageDecoder.load(&path).unwrap();
        assert_eq!((decoded.width, decoded.height), (3, 2));
        assert_eq!(decoded.byte_size(), 3 * 2 * 4);
        assert_eq!(&decoded.pixels[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileImageDecoder.load(&dir.path().join("channel1.png")).unwrap_err();
        assert!(matches!(err, AssetError::ImageNotFound(_)));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channel2.png");
        std::fs::write(&path, b"not an image").unwrap();
        let err = FileImageDecoder.load(&path).unwrap_err();
        assert!(matches!(err, AssetError::ImageDecode { .. }));
    }

    #[test]
    fn placeholder_is_one_texel() {
        let placeholder = DecodedImage::placeholder();
        assert_eq!(placeholder.byte_size(), 4);
        assert_eq!((placeholder.width, placeholder.height), (1, 1));
    }
}

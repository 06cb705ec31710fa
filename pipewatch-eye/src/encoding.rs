use crate::error::VisionError;
use crate::frame::Frame;
use image::codecs::jpeg::JpegEncoder;

/// Encode a frame as baseline JPEG.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, VisionError> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(&frame.image)
        .map_err(|err| VisionError::Encode(format!("JPEG encode failed: {}", err)))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_encode_jpeg_magic() {
        let frame = Frame::new(RgbImage::new(16, 8));
        let bytes = encode_jpeg(&frame, 80).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_encode_jpeg_decodes_back() {
        let frame = Frame::new(RgbImage::from_pixel(32, 24, image::Rgb([200, 10, 10])));
        let bytes = encode_jpeg(&frame, 0).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }
}

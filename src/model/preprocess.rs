use image::{imageops::FilterType, RgbImage};

use super::ModelError;

/// Decode PNG/JPEG bytes into an RGB grid of `size x size` pixels.
pub fn decode_image(bytes: &[u8], size: u32) -> Result<RgbImage, ModelError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| ModelError::Decode(format!("failed to load image: {e}")))?;
    if img.width() == 0 || img.height() == 0 {
        return Err(ModelError::Decode("image has no pixels".into()));
    }
    Ok(img
        .resize_exact(size, size, FilterType::Triangle)
        .to_rgb8())
}

#[cfg(test)]
pub(crate) fn png_fixture(width: u32, height: u32) -> Vec<u8> {
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .expect("encode png fixture");
    buf.into_inner()
}

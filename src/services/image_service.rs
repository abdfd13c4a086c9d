use crate::error::{ClassifierError, Result};
use crate::models::image_types::RawImage;
use image::{DynamicImage, ImageReader};
use std::io::Cursor;
use std::path::Path;

/// Decode an encoded image (JPEG, PNG, ...) into an upright RGB bitmap.
/// Respects EXIF orientation.
pub fn decode_bytes(bytes: &[u8]) -> Result<RawImage> {
    let img = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ClassifierError::ImageDecode {
            source: image::ImageError::IoError(e),
        })?
        .decode()?;

    let orientation = read_orientation(bytes);
    Ok(apply_orientation(img, orientation).into())
}

pub fn decode_file(path: &Path) -> Result<RawImage> {
    let bytes = std::fs::read(path).map_err(|e| ClassifierError::ImageDecode {
        source: image::ImageError::IoError(e),
    })?;
    decode_bytes(&bytes)
}

/// EXIF orientation tag, 1 if absent or unreadable.
fn read_orientation(bytes: &[u8]) -> u32 {
    let exif = match exif::Reader::new().read_from_container(&mut Cursor::new(bytes)) {
        Ok(e) => e,
        Err(_) => return 1,
    };

    match exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY) {
        Some(field) => match field.value {
            exif::Value::Short(ref v) => *v.first().unwrap_or(&1) as u32,
            exif::Value::Long(ref v) => *v.first().unwrap_or(&1),
            _ => 1,
        },
        None => 1,
    }
}

fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.fliph().rotate90(),
        6 => img.rotate90(),
        7 => img.fliph().rotate270(),
        8 => img.rotate270(),
        _ => img,
    }
}

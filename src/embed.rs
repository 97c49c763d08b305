use crate::error::{ComposeError, ComposeResult};
use image::GenericImageView;
use std::io::Write;

/// Which decoder an image source is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormatHint {
    Jpeg,
    Png,
}

impl ImageFormatHint {
    /// JPEG when the declared type says so, PNG for everything else. With no
    /// declared type the bytes are sniffed.
    pub fn from_mime(mime: Option<&str>, data: &[u8]) -> Self {
        match mime {
            Some(mime) => {
                let mime = mime.trim().to_ascii_lowercase();
                if mime == "image/jpeg" || mime == "image/jpg" {
                    ImageFormatHint::Jpeg
                } else {
                    ImageFormatHint::Png
                }
            }
            None => match image::guess_format(data) {
                Ok(image::ImageFormat::Jpeg) => ImageFormatHint::Jpeg,
                _ => ImageFormatHint::Png,
            },
        }
    }
}

/// An image XObject payload, ready to be installed on a page.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageResource {
    pub width: u32,
    pub height: u32,
    pub color_space: &'static str,
    pub bits_per_component: u8,
    pub filter: &'static str,
    pub data: Vec<u8>,
    pub alpha: Option<AlphaMask>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlphaMask {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

pub fn decode_image(data: &[u8], hint: ImageFormatHint) -> ComposeResult<ImageResource> {
    match hint {
        ImageFormatHint::Jpeg => decode_jpeg(data),
        ImageFormatHint::Png => decode_png(data),
    }
}

fn decode_jpeg(data: &[u8]) -> ComposeResult<ImageResource> {
    let decoded = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .map_err(|err| ComposeError::image(format!("invalid jpeg: {err}")))?;
    let (width, height) = decoded.dimensions();
    let color_space = match decoded.color() {
        image::ColorType::L8 | image::ColorType::La8 => "DeviceGray",
        _ => "DeviceRGB",
    };
    // DCT data is embedded untouched; decoding only validates it.
    Ok(ImageResource {
        width,
        height,
        color_space,
        bits_per_component: 8,
        filter: "DCTDecode",
        data: data.to_vec(),
        alpha: None,
    })
}

fn decode_png(data: &[u8]) -> ComposeResult<ImageResource> {
    let decoded = image::load_from_memory_with_format(data, image::ImageFormat::Png)
        .map_err(|err| ComposeError::image(format!("invalid png: {err}")))?;
    let (width, height) = decoded.dimensions();

    let rgba = decoded.to_rgba8();
    let mut rgb = Vec::with_capacity((width as usize) * (height as usize) * 3);
    let mut alpha = Vec::with_capacity((width as usize) * (height as usize));
    let mut has_alpha = false;
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        if a != 255 {
            has_alpha = true;
        }
        rgb.extend_from_slice(&[r, g, b]);
        alpha.push(a);
    }

    let alpha = if has_alpha {
        Some(AlphaMask {
            width,
            height,
            data: flate_compress(&alpha)?,
        })
    } else {
        None
    };
    Ok(ImageResource {
        width,
        height,
        color_space: "DeviceRGB",
        bits_per_component: 8,
        filter: "FlateDecode",
        data: flate_compress(&rgb)?,
        alpha,
    })
}

pub(crate) fn flate_compress(data: &[u8]) -> ComposeResult<Vec<u8>> {
    use flate2::Compression;
    use flate2::write::ZlibEncoder;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    pub(crate) fn png_bytes(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .expect("encode png");
        buf
    }

    pub(crate) fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 10, 10]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)
            .expect("encode jpeg");
        buf
    }

    #[test]
    fn mime_dispatch_prefers_declared_type() {
        let png = png_bytes(1, 1, [0, 0, 0, 255]);
        assert_eq!(
            ImageFormatHint::from_mime(Some("image/jpeg"), &png),
            ImageFormatHint::Jpeg
        );
        assert_eq!(
            ImageFormatHint::from_mime(Some("image/gif"), &png),
            ImageFormatHint::Png
        );
        assert_eq!(
            ImageFormatHint::from_mime(None, &jpeg_bytes(2, 2)),
            ImageFormatHint::Jpeg
        );
        assert_eq!(ImageFormatHint::from_mime(None, &png), ImageFormatHint::Png);
    }

    #[test]
    fn jpeg_is_embedded_verbatim() {
        let jpeg = jpeg_bytes(4, 3);
        let resource = decode_image(&jpeg, ImageFormatHint::Jpeg).expect("jpeg");
        assert_eq!((resource.width, resource.height), (4, 3));
        assert_eq!(resource.filter, "DCTDecode");
        assert_eq!(resource.color_space, "DeviceRGB");
        assert_eq!(resource.data, jpeg);
        assert!(resource.alpha.is_none());
    }

    #[test]
    fn opaque_png_has_no_soft_mask() {
        let resource =
            decode_image(&png_bytes(2, 2, [1, 2, 3, 255]), ImageFormatHint::Png).expect("png");
        assert_eq!(resource.filter, "FlateDecode");
        assert!(resource.alpha.is_none());
    }

    #[test]
    fn translucent_png_gets_a_soft_mask() {
        let resource =
            decode_image(&png_bytes(3, 1, [1, 2, 3, 128]), ImageFormatHint::Png).expect("png");
        let alpha = resource.alpha.expect("alpha");
        assert_eq!((alpha.width, alpha.height), (3, 1));
        assert!(!alpha.data.is_empty());
    }

    #[test]
    fn declared_type_mismatch_fails_to_decode() {
        let png = png_bytes(1, 1, [0, 0, 0, 255]);
        assert!(decode_image(&png, ImageFormatHint::Jpeg).is_err());
        assert!(decode_image(&jpeg_bytes(1, 1), ImageFormatHint::Png).is_err());
        assert!(decode_image(b"not an image", ImageFormatHint::Png).is_err());
    }
}

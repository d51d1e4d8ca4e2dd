use std::io::Cursor;

use bytes::Bytes;
use image::{
    codecs::{
        jpeg::JpegEncoder,
        png::{CompressionType, FilterType as PngFilterType, PngEncoder},
    },
    imageops::{self, FilterType},
    DynamicImage, ExtendedColorType, ImageEncoder, ImageError, ImageFormat, ImageReader, Rgba,
    RgbaImage,
};

use crate::classifier::ContentInfo;

/// Size ceilings and encoder settings for derived images.
#[derive(Debug, Clone, Copy)]
pub struct TranscodeSettings {
    /// Largest side allowed for the stored full-size image.
    pub max_image_size: u32,
    /// Largest side of every thumbnail.
    pub max_thumb_size: u32,
    pub jpeg_quality: u8,
    /// 0-9, as accepted by the config.
    pub png_compression: u8,
}

#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

/// Result of preparing submitted bytes for storage.
#[derive(Debug, Clone)]
pub struct Transcoded {
    /// Bytes to store as the full-size blob: the input when it already fits.
    pub data: Bytes,
    pub original_width: u32,
    pub original_height: u32,
    pub width: u32,
    pub height: u32,
    pub resized: bool,
    pub thumbnail: Option<EncodedImage>,
}

/// Scale so the larger side equals `cap`, flooring the smaller side.
/// Square images scale both sides to `cap`.
pub fn scaled_dimensions(width: u32, height: u32, cap: u32) -> (u32, u32) {
    let (w, h, c) = (width as u64, height as u64, cap as u64);
    if w > h {
        (cap, ((h * c) / w).max(1) as u32)
    } else {
        (((w * c) / h.max(1)).max(1) as u32, cap)
    }
}

pub fn exceeds(width: u32, height: u32, cap: u32) -> bool {
    width > cap || height > cap
}

fn png_compression(level: u8) -> CompressionType {
    match level {
        0..=3 => CompressionType::Fast,
        4..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

/// Encode following the target extension: JPEG for jpg/jpeg, PNG (with
/// alpha) for everything else.
pub fn encode(
    img: &DynamicImage,
    extension: &str,
    settings: &TranscodeSettings,
) -> Result<Vec<u8>, ImageError> {
    let (width, height) = (img.width(), img.height());
    let mut buffer = Vec::with_capacity(width as usize * height as usize);

    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => {
            let rgb = img.to_rgb8();
            JpegEncoder::new_with_quality(&mut buffer, settings.jpeg_quality).write_image(
                rgb.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?;
        }
        _ => {
            // Composite onto a fully transparent canvas so alpha survives.
            let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 0]));
            imageops::overlay(&mut canvas, &img.to_rgba8(), 0, 0);
            PngEncoder::new_with_quality(
                &mut buffer,
                png_compression(settings.png_compression),
                PngFilterType::Adaptive,
            )
            .write_image(canvas.as_raw(), width, height, ExtendedColorType::Rgba8)?;
        }
    }

    Ok(buffer)
}

fn scale_to(
    img: &DynamicImage,
    cap: u32,
    extension: &str,
    settings: &TranscodeSettings,
) -> Result<EncodedImage, ImageError> {
    let (width, height) = scaled_dimensions(img.width(), img.height(), cap);
    let scaled = img.resize_exact(width, height, FilterType::CatmullRom);
    let data = encode(&scaled, extension, settings)?;
    Ok(EncodedImage {
        data: Bytes::from(data),
        width,
        height,
    })
}

/// Formats the `image` crate can decode; SVG, HEIC and friends are stored
/// as-is with zero dimensions.
fn decodable(mime_type: &str) -> bool {
    ImageFormat::from_mime_type(mime_type)
        .map(|format| format.reading_enabled())
        .unwrap_or(false)
}

fn reader(data: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, ImageError> {
    Ok(ImageReader::new(Cursor::new(data)).with_guessed_format()?)
}

/// Read dimensions from the header only.
pub fn dimensions(data: &[u8]) -> Result<(u32, u32), ImageError> {
    reader(data)?.into_dimensions()
}

/// Bound the full-size image and derive a thumbnail when asked to.
///
/// Non-images pass through untouched. Any decode failure aborts: nothing is
/// returned for partially processed input.
pub fn transcode(
    data: Bytes,
    content: &ContentInfo,
    settings: &TranscodeSettings,
    make_thumbnail: bool,
) -> Result<Transcoded, ImageError> {
    let passthrough = |data: Bytes| Transcoded {
        data,
        original_width: 0,
        original_height: 0,
        width: 0,
        height: 0,
        resized: false,
        thumbnail: None,
    };

    if !content.is_image || (!make_thumbnail && !decodable(&content.mime_type)) {
        return Ok(passthrough(data));
    }

    let (original_width, original_height) = dimensions(&data)?;
    let needs_resize = exceeds(original_width, original_height, settings.max_image_size);

    if !needs_resize && !make_thumbnail {
        return Ok(Transcoded {
            width: original_width,
            height: original_height,
            original_width,
            original_height,
            ..passthrough(data)
        });
    }

    let img = reader(&data)?.decode()?;

    let thumbnail = if make_thumbnail {
        Some(scale_to(&img, settings.max_thumb_size, &content.extension, settings)?)
    } else {
        None
    };

    let (stored, width, height) = if needs_resize {
        let resized = scale_to(&img, settings.max_image_size, &content.extension, settings)?;
        (resized.data, resized.width, resized.height)
    } else {
        (data, original_width, original_height)
    };

    Ok(Transcoded {
        data: stored,
        original_width,
        original_height,
        width,
        height,
        resized: needs_resize,
        thumbnail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify;
    use image::{GenericImageView, Rgb, RgbImage};

    const SETTINGS: TranscodeSettings = TranscodeSettings {
        max_image_size: 700,
        max_thumb_size: 300,
        jpeg_quality: 95,
        png_compression: 6,
    };

    fn jpeg(width: u32, height: u32) -> Bytes {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 100, 50]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg).unwrap();
        Bytes::from(buffer)
    }

    fn transparent_png(width: u32, height: u32) -> Bytes {
        let img = RgbaImage::from_pixel(width, height, Rgba([0, 0, 255, 0]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png).unwrap();
        Bytes::from(buffer)
    }

    #[test]
    fn scaling_keeps_aspect_ratio_with_floor() {
        assert_eq!(scaled_dimensions(1400, 700, 700), (700, 350));
        assert_eq!(scaled_dimensions(700, 1400, 700), (350, 700));
        assert_eq!(scaled_dimensions(1000, 333, 300), (300, 99));
        assert_eq!(scaled_dimensions(800, 800, 300), (300, 300));
        // A sliver never collapses to zero pixels.
        assert_eq!(scaled_dimensions(10_000, 1, 300), (300, 1));
    }

    #[test]
    fn small_images_pass_through_unchanged() {
        let data = jpeg(200, 100);
        let content = classify(&data);

        let out = transcode(data.clone(), &content, &SETTINGS, false).unwrap();

        assert_eq!(out.data, data);
        assert!(!out.resized);
        assert_eq!((out.width, out.height), (200, 100));
        assert_eq!((out.original_width, out.original_height), (200, 100));
        assert!(out.thumbnail.is_none());
    }

    #[test]
    fn oversized_images_are_bounded_to_the_cap() {
        for (w, h) in [(1600, 900), (900, 1600), (1000, 1000), (701, 3)] {
            let data = jpeg(w, h);
            let content = classify(&data);

            let out = transcode(data, &content, &SETTINGS, true).unwrap();

            assert!(out.resized);
            assert_eq!(out.width.max(out.height), SETTINGS.max_image_size);
            assert_eq!((out.original_width, out.original_height), (w, h));
            assert_eq!((out.width, out.height), scaled_dimensions(w, h, SETTINGS.max_image_size));

            let stored = image::load_from_memory(&out.data).unwrap();
            assert_eq!(stored.dimensions(), (out.width, out.height));
        }
    }

    #[test]
    fn thumbnails_always_hit_the_thumbnail_cap() {
        for (w, h) in [(200, 100), (1600, 900), (90, 120)] {
            let data = jpeg(w, h);
            let content = classify(&data);

            let out = transcode(data, &content, &SETTINGS, true).unwrap();
            let thumb = out.thumbnail.unwrap();

            assert_eq!(thumb.width.max(thumb.height), SETTINGS.max_thumb_size);
            let decoded = image::load_from_memory(&thumb.data).unwrap();
            assert_eq!(decoded.dimensions(), (thumb.width, thumb.height));
            assert_eq!(image::guess_format(&thumb.data).unwrap(), ImageFormat::Jpeg);
        }
    }

    #[test]
    fn png_output_keeps_transparency() {
        let data = transparent_png(900, 450);
        let content = classify(&data);

        let out = transcode(data, &content, &SETTINGS, true).unwrap();

        assert_eq!(image::guess_format(&out.data).unwrap(), ImageFormat::Png);
        let stored = image::load_from_memory(&out.data).unwrap().to_rgba8();
        assert_eq!(stored.dimensions(), (700, 350));
        assert_eq!(stored.get_pixel(10, 10)[3], 0);

        let thumb = image::load_from_memory(&out.thumbnail.unwrap().data).unwrap().to_rgba8();
        assert_eq!(thumb.get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn non_images_are_untouched() {
        let data = Bytes::from_static(b"not an image at all");
        let content = classify(&data);

        let out = transcode(data.clone(), &content, &SETTINGS, false).unwrap();

        assert_eq!(out.data, data);
        assert_eq!((out.width, out.height, out.original_width), (0, 0, 0));
    }

    #[test]
    fn corrupt_image_is_a_decode_error() {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend_from_slice(&[0u8; 64]);
        let data = Bytes::from(bytes);
        let content = classify(&data);
        assert!(content.is_image);

        assert!(transcode(data, &content, &SETTINGS, true).is_err());
    }

    #[test]
    fn undecodable_formats_are_stored_with_zero_dimensions() {
        let data = Bytes::from_static(br#"<svg xmlns="http://www.w3.org/2000/svg"/>"#);
        let content = classify(&data);

        let out = transcode(data.clone(), &content, &SETTINGS, false).unwrap();

        assert_eq!(out.data, data);
        assert_eq!((out.width, out.height), (0, 0));
    }
}

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::utils::is_image_mime_type;

/// Extension used for any MIME type missing from the table.
pub const FALLBACK_EXTENSION: &str = "bin";
pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

static MIME_TO_EXTENSION: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        // Images
        ("image/jpeg", "jpg"),
        ("image/jpg", "jpg"),
        ("image/png", "png"),
        ("image/gif", "gif"),
        ("image/webp", "webp"),
        ("image/bmp", "bmp"),
        ("image/tiff", "tiff"),
        ("image/svg+xml", "svg"),
        ("image/x-icon", "ico"),
        ("image/vnd.microsoft.icon", "ico"),
        ("image/avif", "avif"),
        ("image/heic", "heic"),
        ("image/heif", "heif"),
        // Video containers
        ("video/mp4", "mp4"),
        ("video/webm", "webm"),
        ("video/avi", "avi"),
        ("video/quicktime", "mov"),
        ("video/x-msvideo", "avi"),
        ("video/x-ms-wmv", "wmv"),
        ("video/x-flv", "flv"),
        ("video/x-matroska", "mkv"),
        ("video/x-m4v", "m4v"),
        ("video/3gpp", "3gp"),
        ("video/ogg", "ogv"),
    ])
});

/// What the bytes actually are, independent of any client-declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentInfo {
    pub mime_type: String,
    pub is_image: bool,
    pub extension: String,
}

/// Classify a buffer by its magic bytes. Never fails: unknown content comes
/// back as `application/octet-stream` / `bin` and is left for the extension
/// allow-list to reject.
pub fn classify(data: &[u8]) -> ContentInfo {
    let mime_type = match infer::get(data).map(|kind| kind.mime_type()) {
        Some(mime) if mime == "text/xml" || mime == "application/xml" => {
            if looks_like_svg(data) { "image/svg+xml" } else { mime }
        }
        Some(mime) => mime,
        None if looks_like_svg(data) => "image/svg+xml",
        None => FALLBACK_MIME_TYPE,
    };

    ContentInfo {
        mime_type: mime_type.to_string(),
        is_image: is_image_mime_type(mime_type),
        extension: extension_for_mime(mime_type).to_string(),
    }
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    MIME_TO_EXTENSION
        .get(mime_type)
        .copied()
        .unwrap_or(FALLBACK_EXTENSION)
}

// infer has no signature for SVG; look for the root element near the top.
fn looks_like_svg(data: &[u8]) -> bool {
    let window = &data[..data.len().min(8192)];
    let text = match std::str::from_utf8(window) {
        Ok(t) => t.trim_start_matches('\u{feff}').trim_start(),
        Err(_) => return false,
    };
    (text.starts_with('<')) && text.to_lowercase().contains("<svg")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn encode(format: ImageFormat) -> Vec<u8> {
        let img = RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), format).unwrap();
        buffer
    }

    #[test]
    fn detects_jpeg_and_png_from_content() {
        let jpeg = classify(&encode(ImageFormat::Jpeg));
        assert_eq!(jpeg.mime_type, "image/jpeg");
        assert_eq!(jpeg.extension, "jpg");
        assert!(jpeg.is_image);

        let png = classify(&encode(ImageFormat::Png));
        assert_eq!(png.mime_type, "image/png");
        assert_eq!(png.extension, "png");
        assert!(png.is_image);
    }

    #[test]
    fn detects_svg_markup() {
        let svg = br#"<?xml version="1.0"?><svg xmlns="http://www.w3.org/2000/svg"></svg>"#;
        let info = classify(svg);
        assert_eq!(info.mime_type, "image/svg+xml");
        assert_eq!(info.extension, "svg");
        assert!(info.is_image);
    }

    #[test]
    fn unknown_content_falls_back_to_bin() {
        let info = classify(b"just some plain words");
        assert_eq!(info.mime_type, FALLBACK_MIME_TYPE);
        assert_eq!(info.extension, FALLBACK_EXTENSION);
        assert!(!info.is_image);
    }

    #[test]
    fn known_but_unmapped_mime_keeps_type_with_fallback_extension() {
        // PDF magic: recognised by content, absent from the extension table.
        let info = classify(b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n");
        assert_eq!(info.mime_type, "application/pdf");
        assert_eq!(info.extension, FALLBACK_EXTENSION);
        assert!(!info.is_image);
    }

    #[test]
    fn video_mime_types_map_to_container_extensions() {
        assert_eq!(extension_for_mime("video/quicktime"), "mov");
        assert_eq!(extension_for_mime("video/x-matroska"), "mkv");
        assert_eq!(extension_for_mime("video/3gpp"), "3gp");
    }
}

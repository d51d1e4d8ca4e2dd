use sha2::{Digest, Sha256};

/// Calculates the SHA-256 content hash of the given data slice.
pub fn calculate_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
    // {:x} means format the value as lowercase hexadecimal string
}

/// Checks if a MIME type represents an image.
pub fn is_image_mime_type(mime_type: &str) -> bool {
    mime_type.starts_with("image/")
}

/// Case-insensitive membership test for extension lists coming from config.
pub fn extension_in(extension: &str, list: &[String]) -> bool {
    list.iter().any(|e| e.eq_ignore_ascii_case(extension))
}

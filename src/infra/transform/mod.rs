//! Image transformer backends.

use imagesize::ImageType;

pub mod cli;
pub mod passthrough;

pub use cli::CliTransformer;
pub use passthrough::PassthroughTransformer;

/// Content type of an encoded image, detected from its header bytes.
pub fn sniff_content_type(bytes: &[u8]) -> Option<&'static str> {
    let content_type = match imagesize::image_type(bytes).ok()? {
        ImageType::Bmp => "image/bmp",
        ImageType::Gif => "image/gif",
        ImageType::Jpeg => "image/jpeg",
        ImageType::Png => "image/png",
        ImageType::Webp => "image/webp",
        ImageType::Tiff => "image/tiff",
        ImageType::Ico => "image/x-icon",
        _ => "application/octet-stream",
    };
    Some(content_type)
}

/// Content type implied by a canonical `format` command value.
pub fn format_content_type(format: &str) -> Option<&'static str> {
    match format {
        "bmp" => Some("image/bmp"),
        "gif" => Some("image/gif"),
        "jpg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "tga" => Some("image/x-tga"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_png_and_rejects_text() {
        assert_eq!(sniff_content_type(fixtures::PNG_HEADER), Some("image/png"));
        assert_eq!(sniff_content_type(b"plain text, not an image"), None);
    }

    #[test]
    fn format_values_map_to_media_types() {
        assert_eq!(format_content_type("jpg"), Some("image/jpeg"));
        assert_eq!(format_content_type("webp"), Some("image/webp"));
        assert_eq!(format_content_type("jpeg"), None);
    }
}

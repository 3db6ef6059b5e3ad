//! Content types keyed by file extension.

/// Maps a file extension (with or without the leading dot) to a MIME
/// content type.
pub fn content_type_for_extension(extension: &str) -> Option<&'static str> {
    let extension = extension.strip_prefix('.').unwrap_or(extension);
    let content_type = match extension {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "txt" | "text" | "log" => "text/plain",
        "xml" => "text/xml",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "bin" => "application/octet-stream",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/vnd.microsoft.icon",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        _ => return None,
    };
    Some(content_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions() {
        assert_eq!(content_type_for_extension("html"), Some("text/html"));
        assert_eq!(content_type_for_extension(".html"), Some("text/html"));
        assert_eq!(content_type_for_extension("json"), Some("application/json"));
        assert_eq!(content_type_for_extension("woff2"), Some("font/woff2"));
    }

    #[test]
    fn unknown_extension() {
        assert_eq!(content_type_for_extension("nope"), None);
    }
}

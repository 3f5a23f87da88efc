//! Static extension → MIME type table, resolved by a linear scan rather than
//! a hash map: the table is small and fixed at compile time, so there is
//! nothing for a hash map to buy us.

const DEFAULT_MIME: &str = "application/octet-stream";

static MIME_TABLE: &[(&str, &str)] = &[
    ("xml", "application/xml; charset=utf-8"),
    ("xhtml", "application/xhtml+xml; charset=utf-8"),
    ("html", "text/html; charset=utf-8"),
    ("htm", "text/html; charset=utf-8"),
    ("css", "text/css; charset=utf-8"),
    ("js", "text/javascript; charset=utf-8"),
    ("json", "application/json; charset=utf-8"),
    ("txt", "text/plain; charset=utf-8"),
    ("vtt", "text/plain; charset=utf-8"),
    ("md", "text/plain; charset=utf-8"),
    ("c", "text/plain; charset=utf-8"),
    ("h", "text/plain; charset=utf-8"),
    ("gz", "application/x-gtar"),
    ("tar", "application/tar"),
    ("pdf", "application/pdf"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("jpeg", "image/jpg"),
    ("jpg", "image/jpg"),
    ("ico", "image/x-icon"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("iso", "application/x-iso9660-image"),
    ("webp", "image/webp"),
    ("svg", "image/svg+xml; charset=utf-8"),
    ("flac", "audio/flac"),
    ("mp3", "audio/mpeg"),
    ("ogg", "audio/ogg"),
    ("mp4", "video/mp4"),
    ("ogv", "video/ogg"),
    ("webm", "video/webm"),
];

/// Resolve a MIME type from a request target by its extension. The
/// extension is whatever follows the last `.` that isn't the first
/// character of the target (so a leading dotfile like `.gitignore` has no
/// extension).
pub fn mime_for_target(target: &str) -> &'static str {
    let Some(dot) = target.rfind('.') else {
        return DEFAULT_MIME;
    };
    if dot == 0 {
        return DEFAULT_MIME;
    }
    let ext = &target[dot + 1..];

    for &(candidate, mime) in MIME_TABLE {
        if ext.eq_ignore_ascii_case(candidate) {
            return mime;
        }
    }

    DEFAULT_MIME
}

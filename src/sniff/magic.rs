//! Content-type detection by magic numbers.

/// One byte pattern that must appear at `offset`.
struct Part {
    offset: usize,
    bytes: &'static [u8],
}

/// A format: all parts must match.
struct Magic {
    parts: &'static [Part],
    mime: &'static str,
}

const fn at(offset: usize, bytes: &'static [u8]) -> Part {
    Part { offset, bytes }
}

/// Checked in order; more specific entries precede general ones.
static MAGIC_TABLE: &[Magic] = &[
    // images
    Magic { parts: &[at(0, b"\xff\xd8\xff")], mime: "image/jpeg" },
    Magic { parts: &[at(0, b"\x89PNG\r\n\x1a\n")], mime: "image/png" },
    Magic { parts: &[at(0, b"GIF87a")], mime: "image/gif" },
    Magic { parts: &[at(0, b"GIF89a")], mime: "image/gif" },
    Magic { parts: &[at(0, b"II*\x00")], mime: "image/tiff" },
    Magic { parts: &[at(0, b"MM\x00*")], mime: "image/tiff" },
    Magic { parts: &[at(0, b"RIFF"), at(8, b"WEBP")], mime: "image/webp" },
    Magic { parts: &[at(0, b"\x00\x00\x01\x00")], mime: "image/vnd.microsoft.icon" },
    Magic { parts: &[at(0, b"BM"), at(6, b"\x00\x00\x00\x00")], mime: "image/bmp" },
    // documents
    Magic { parts: &[at(0, b"%PDF-")], mime: "application/pdf" },
    Magic { parts: &[at(0, b"%!PS-Adobe-")], mime: "application/postscript" },
    Magic { parts: &[at(0, b"SQLite format 3\x00")], mime: "application/vnd.sqlite3" },
    // archives
    Magic { parts: &[at(0, b"PK\x03\x04")], mime: "application/zip" },
    Magic { parts: &[at(0, b"\x1f\x8b")], mime: "application/x-gzip" },
    Magic { parts: &[at(0, b"BZh")], mime: "application/x-bzip2" },
    Magic { parts: &[at(0, b"\xfd7zXZ\x00")], mime: "application/x-xz" },
    Magic { parts: &[at(0, b"\x28\xb5\x2f\xfd")], mime: "application/zstd" },
    Magic { parts: &[at(0, b"7z\xbc\xaf\x27\x1c")], mime: "application/x-7z-compressed" },
    Magic { parts: &[at(257, b"ustar")], mime: "application/x-tar" },
    // audio
    Magic { parts: &[at(0, b"OggS")], mime: "audio/ogg" },
    Magic { parts: &[at(0, b"fLaC")], mime: "audio/x-flac" },
    Magic { parts: &[at(0, b"ID3")], mime: "audio/mpeg" },
    Magic { parts: &[at(0, b"RIFF"), at(8, b"WAVE")], mime: "audio/x-wav" },
    // video
    Magic { parts: &[at(0, b"RIFF"), at(8, b"AVI ")], mime: "video/x-msvideo" },
    Magic { parts: &[at(4, b"ftypqt  ")], mime: "video/quicktime" },
    Magic { parts: &[at(4, b"ftyp")], mime: "video/mp4" },
    Magic { parts: &[at(0, b"\x1a\x45\xdf\xa3")], mime: "video/x-matroska" },
    // executables
    Magic { parts: &[at(0, b"\x7fELF")], mime: "application/x-executable" },
    Magic { parts: &[at(0, b"\xfe\xed\xfa\xce")], mime: "application/x-mach-binary" },
    Magic { parts: &[at(0, b"\xfe\xed\xfa\xcf")], mime: "application/x-mach-binary" },
    Magic { parts: &[at(0, b"\xce\xfa\xed\xfe")], mime: "application/x-mach-binary" },
    Magic { parts: &[at(0, b"\xcf\xfa\xed\xfe")], mime: "application/x-mach-binary" },
];

/// Case-insensitive markup prefixes, matched after leading whitespace.
static MARKUP_TABLE: &[(&[u8], &str)] = &[
    (b"<!doctype html", "text/html"),
    (b"<html", "text/html"),
    (b"<head", "text/html"),
    (b"<body", "text/html"),
    (b"<?xml", "text/xml"),
    (b"<svg", "image/svg+xml"),
];

/// Content type of a blob from its leading bytes, or `""` if unknown.
pub fn mime_type(prefix: &[u8]) -> &'static str {
    for magic in MAGIC_TABLE {
        if magic.parts.iter().all(|p| matches_at(prefix, p)) {
            return magic.mime;
        }
    }

    let text = trim_leading_whitespace(prefix);
    for (marker, mime) in MARKUP_TABLE {
        if text.len() >= marker.len() && text[..marker.len()].eq_ignore_ascii_case(marker) {
            return mime;
        }
    }
    ""
}

fn matches_at(buf: &[u8], part: &Part) -> bool {
    buf.get(part.offset..part.offset + part.bytes.len()) == Some(part.bytes)
}

fn trim_leading_whitespace(buf: &[u8]) -> &[u8] {
    let start = buf
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(buf.len());
    &buf[start..]
}

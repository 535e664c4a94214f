use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum FileKind {
    Image,
    Pdf,
    Document,
    Spreadsheet,
    Other,
}

impl FileKind {
    /// Coarse classification of an evidence file by MIME type, used to
    /// pick a glyph in listings. The matching is substring-based so
    /// vendor-specific types like
    /// `application/vnd.openxmlformats-officedocument.spreadsheetml.sheet`
    /// land in the right bucket.
    pub fn from_mime(mime: &str) -> FileKind {
        if mime.starts_with("image/") {
            FileKind::Image
        } else if mime.contains("pdf") {
            FileKind::Pdf
        } else if mime.contains("word") || mime.contains("document") {
            FileKind::Document
        } else if mime.contains("excel") || mime.contains("spreadsheet") {
            FileKind::Spreadsheet
        } else {
            FileKind::Other
        }
    }

    pub fn glyph(self) -> &'static str {
        match self {
            FileKind::Image => "img",
            FileKind::Pdf => "pdf",
            FileKind::Document => "doc",
            FileKind::Spreadsheet => "xls",
            FileKind::Other => "file",
        }
    }
}

/// Guesses a MIME type from a file extension; evidence uploads carry no
/// other type information once they leave the browser.
pub fn guess_mime(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        Some("doc") => "application/msword",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("xls") => "application/vnd.ms-excel",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("csv") => "text/csv",
        Some("txt") | Some("md") => "text/plain",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

/// Renders a byte count the way the console did: base 1024, unit names
/// `Bytes`/`KB`/`MB`/`GB`, at most two decimals with trailing zeros
/// trimmed, and a literal `0 Bytes` for empty files.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut unit = 0usize;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = (value * 100.0).round() / 100.0;
    let mut rendered = format!("{rounded:.2}");
    while rendered.ends_with('0') {
        rendered.pop();
    }
    if rendered.ends_with('.') {
        rendered.pop();
    }
    format!("{} {}", rendered, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_mime_types() {
        assert_eq!(FileKind::from_mime("image/png"), FileKind::Image);
        assert_eq!(FileKind::from_mime("application/pdf"), FileKind::Pdf);
        assert_eq!(
            FileKind::from_mime(
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            ),
            FileKind::Document
        );
        assert_eq!(
            FileKind::from_mime("application/vnd.ms-excel"),
            FileKind::Spreadsheet
        );
        assert_eq!(FileKind::from_mime("text/csv"), FileKind::Other);
    }

    #[test]
    fn guesses_mime_from_extension_case_insensitively() {
        assert_eq!(guess_mime(Path::new("shot.PNG")), "image/png");
        assert_eq!(guess_mime(Path::new("report.pdf")), "application/pdf");
        assert_eq!(guess_mime(Path::new("mystery")), "application/octet-stream");
    }

    #[test]
    fn formats_sizes_with_trimmed_decimals() {
        assert_eq!(format_file_size(0), "0 Bytes");
        assert_eq!(format_file_size(512), "512 Bytes");
        assert_eq!(format_file_size(1024), "1 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(1_572_864), "1.5 MB");
        assert_eq!(format_file_size(1_073_741_824), "1 GB");
    }
}

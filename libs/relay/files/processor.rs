use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

pub const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FileError {
    #[error("empty file: {0}")]
    Empty(String),

    #[error("{kind} exceeds the {limit_mb} MB limit")]
    TooLarge { kind: &'static str, limit_mb: usize },

    #[error("not a valid image")]
    InvalidImage,

    #[error("{0} extraction is not supported")]
    Unsupported(&'static str),

    #[error("total file size exceeds the {limit_mb} MB limit")]
    TotalTooLarge { limit_mb: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Code,
    Json,
    Yaml,
    Xml,
    Markdown,
    Csv,
    Text,
    Binary,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Image => "image",
            FileKind::Code => "code",
            FileKind::Json => "json",
            FileKind::Yaml => "yaml",
            FileKind::Xml => "xml",
            FileKind::Markdown => "markdown",
            FileKind::Csv => "csv",
            FileKind::Text => "text",
            FileKind::Binary => "binary",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file turned into something a prompt can carry
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedFile {
    pub name: String,
    pub kind: FileKind,
    pub content_type: String,
    /// UTF-8 text, or base64 for images
    pub content: String,
    pub size: usize,
    pub metadata: BTreeMap<String, String>,
}

pub trait FileProcessor: Send + Sync {
    fn process_file(&self, name: &str, bytes: &[u8]) -> Result<ProcessedFile, FileError>;
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "svg", "ico"];

const CODE_EXTENSIONS: &[&str] = &[
    "go", "rs", "js", "ts", "py", "java", "c", "cpp", "h", "cs", "rb", "php",
];

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "go", "rs", "js", "ts", "py", "java", "c", "cpp", "h", "cs", "rb", "php",
    "html", "css", "scss", "sass", "less", "json", "yaml", "yml", "xml", "toml", "ini", "conf",
    "config", "sh", "bash", "zsh", "fish", "ps1", "bat", "cmd", "sql", "log", "csv", "tsv", "env",
    "gitignore", "dockerignore", "dockerfile", "makefile", "rst", "tex", "r", "scala", "swift",
    "kt", "groovy", "lua", "vim", "el", "clj", "erl", "ex", "exs", "dart", "proto",
];

/// Lower-cased extension; dotfiles like `.gitignore` count as their own extension
fn extension(name: &str) -> String {
    let path = Path::new(name);
    match path.extension() {
        Some(ext) => ext.to_string_lossy().to_lowercase(),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy())
            .and_then(|n| n.strip_prefix('.').map(str::to_lowercase))
            .unwrap_or_default(),
    }
}

/// Image format from magic bytes
fn sniff_image(bytes: &[u8]) -> Option<(&'static str, &'static str)> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some(("png", "image/png"))
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(("jpg", "image/jpeg"))
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some(("gif", "image/gif"))
    } else if bytes.starts_with(b"BM") {
        Some(("bmp", "image/bmp"))
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some(("webp", "image/webp"))
    } else if bytes.starts_with(&[0x00, 0x00, 0x01, 0x00]) {
        Some(("ico", "image/x-icon"))
    } else {
        None
    }
}

fn looks_like_svg(bytes: &[u8]) -> bool {
    std::str::from_utf8(bytes)
        .map(|text| text.contains("<svg"))
        .unwrap_or(false)
}

fn is_text(bytes: &[u8]) -> bool {
    !bytes.contains(&0) && std::str::from_utf8(bytes).is_ok()
}

/// Best-effort content type from magic bytes
pub fn detect_content_type(bytes: &[u8]) -> &'static str {
    if let Some((_, mime)) = sniff_image(bytes) {
        mime
    } else if bytes.starts_with(b"%PDF") {
        "application/pdf"
    } else if bytes.starts_with(b"PK\x03\x04") {
        "application/zip"
    } else if is_text(bytes) {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}

/// Handles text-like files and images; office documents and PDFs are refused
#[derive(Debug, Default, Clone)]
pub struct BasicFileProcessor;

impl BasicFileProcessor {
    pub fn new() -> Self {
        Self
    }

    fn process_image(&self, mut file: ProcessedFile, bytes: &[u8], ext: &str) -> Result<ProcessedFile, FileError> {
        if bytes.len() > MAX_IMAGE_SIZE {
            return Err(FileError::TooLarge {
                kind: "image",
                limit_mb: MAX_IMAGE_SIZE / 1024 / 1024,
            });
        }

        let (format, content_type) = match sniff_image(bytes) {
            Some(found) => found,
            None if ext == "svg" && looks_like_svg(bytes) => ("svg", "image/svg+xml"),
            None => return Err(FileError::InvalidImage),
        };

        file.kind = FileKind::Image;
        file.content_type = content_type.to_string();
        file.content = STANDARD.encode(bytes);
        file.metadata.insert("kind".to_string(), format.to_string());

        debug!(name = %file.name, format, "Image processed");
        Ok(file)
    }

    fn process_text(&self, mut file: ProcessedFile, bytes: &[u8], ext: &str) -> ProcessedFile {
        let text = String::from_utf8_lossy(bytes).into_owned();

        file.kind = match ext {
            "json" => FileKind::Json,
            "yaml" | "yml" => FileKind::Yaml,
            "xml" => FileKind::Xml,
            "md" | "markdown" => FileKind::Markdown,
            "csv" => FileKind::Csv,
            ext if CODE_EXTENSIONS.contains(&ext) => {
                file.metadata.insert("language".to_string(), ext.to_string());
                FileKind::Code
            }
            _ => FileKind::Text,
        };

        let lines = text.matches('\n').count() + 1;
        file.metadata.insert("lines".to_string(), lines.to_string());
        file.content = text;

        debug!(name = %file.name, kind = %file.kind, lines, "Text file processed");
        file
    }

    fn process_binary(&self, mut file: ProcessedFile) -> ProcessedFile {
        file.kind = FileKind::Binary;
        file.content = format!(
            "[Binary file: {} - {} bytes - Type: {}]",
            file.name, file.size, file.content_type
        );

        warn!(name = %file.name, content_type = %file.content_type, "Binary file not processed");
        file
    }
}

impl FileProcessor for BasicFileProcessor {
    fn process_file(&self, name: &str, bytes: &[u8]) -> Result<ProcessedFile, FileError> {
        if bytes.is_empty() {
            return Err(FileError::Empty(name.to_string()));
        }

        let ext = extension(name);
        let content_type = detect_content_type(bytes);

        let file = ProcessedFile {
            name: name.to_string(),
            kind: FileKind::Binary,
            content_type: content_type.to_string(),
            content: String::new(),
            size: bytes.len(),
            metadata: BTreeMap::new(),
        };

        let text_ext = TEXT_EXTENSIONS.contains(&ext.as_str());
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) || (content_type.starts_with("image/") && !text_ext) {
            return self.process_image(file, bytes, &ext);
        }

        match ext.as_str() {
            "pdf" => return Err(FileError::Unsupported("PDF")),
            "docx" => return Err(FileError::Unsupported("Word document")),
            "xlsx" => return Err(FileError::Unsupported("Excel spreadsheet")),
            _ if content_type == "application/pdf" => return Err(FileError::Unsupported("PDF")),
            _ => {}
        }

        if text_ext || content_type.starts_with("text/") {
            return Ok(self.process_text(file, bytes, &ext));
        }

        Ok(self.process_binary(file))
    }
}

//! Turns attached files into a markdown context block for the prompt

use super::processor::{FileError, FileKind, FileProcessor, ProcessedFile};
use crate::protocol::{FilePayload, Outbox, ServerEnvelope};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{info, warn};

pub const MAX_FILE_SIZE: usize = 5 * 1024 * 1024;
pub const MAX_TOTAL_UPLOAD_SIZE: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileLimits {
    /// Per-file limit; images and PDFs are exempt
    pub max_file_size: usize,
    /// Aggregate limit for one request
    pub max_total_size: usize,
}

impl Default for FileLimits {
    fn default() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
            max_total_size: MAX_TOTAL_UPLOAD_SIZE,
        }
    }
}

/// Human readable size: `512 B`, `1.5 KB`, `2.0 MB`
pub fn format_size(bytes: usize) -> String {
    const UNIT: usize = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    let unit = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {}B", bytes as f64 / div as f64, unit)
}

fn fence_language(file: &ProcessedFile) -> &str {
    if let Some(language) = file.metadata.get("language") {
        return language;
    }
    match file.kind {
        FileKind::Json => "json",
        FileKind::Yaml => "yaml",
        FileKind::Xml => "xml",
        _ => "",
    }
}

fn exempt_from_size_limit(content_type: &str) -> bool {
    content_type.starts_with("image/") || content_type == "application/pdf"
}

pub struct FileContextBuilder {
    processor: Arc<dyn FileProcessor>,
    limits: FileLimits,
}

impl FileContextBuilder {
    pub fn new(processor: Arc<dyn FileProcessor>, limits: FileLimits) -> Self {
        Self { processor, limits }
    }

    /// Process `files` and render the context block
    ///
    /// Emits one progress envelope before starting, one per file and one
    /// before rendering. Files that fail individually are listed in the
    /// context; exceeding the aggregate limit aborts the whole request.
    pub async fn build(&self, files: &[FilePayload], outbox: &dyn Outbox) -> Result<String, FileError> {
        if files.is_empty() {
            return Ok(String::new());
        }

        let total = files.len();
        outbox
            .deliver(ServerEnvelope::progress("Starting file processing...", 0, total))
            .await;

        let mut total_size = 0usize;
        let mut processed = Vec::new();
        let mut failed = Vec::new();

        for (i, file) in files.iter().enumerate() {
            outbox
                .deliver(ServerEnvelope::progress(
                    format!("Processing file {} of {}: {}", i + 1, total, file.name),
                    i + 1,
                    total,
                ))
                .await;

            let bytes = if file.is_base64 {
                match STANDARD.decode(file.content.as_bytes()) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(file = %file.name, error = %e, "Base64 decode failed");
                        failed.push(format!("{} (base64 decode error)", file.name));
                        continue;
                    }
                }
            } else {
                file.content.as_bytes().to_vec()
            };

            if bytes.len() > self.limits.max_file_size && !exempt_from_size_limit(&file.content_type) {
                failed.push(format!(
                    "{} (exceeds {}MB)",
                    file.name,
                    self.limits.max_file_size / 1024 / 1024
                ));
                continue;
            }

            total_size += bytes.len();
            if total_size > self.limits.max_total_size {
                return Err(FileError::TotalTooLarge {
                    limit_mb: self.limits.max_total_size / 1024 / 1024,
                });
            }

            match self.processor.process_file(&file.name, &bytes) {
                Ok(file) => processed.push(file),
                Err(e) => {
                    warn!(file = %file.name, error = %e, "File processing failed");
                    failed.push(format!("{} ({})", file.name, e));
                }
            }
        }

        outbox
            .deliver(ServerEnvelope::progress("Generating file context...", total, total))
            .await;

        info!(
            total,
            success = processed.len(),
            failed = failed.len(),
            total_size,
            "Files processed for context"
        );

        Ok(render(&processed, &failed, total_size))
    }
}

/// Render the markdown context block
pub fn render(processed: &[ProcessedFile], failed: &[String], total_size: usize) -> String {
    let mut out = String::new();

    out.push_str("# FILE CONTEXT PROVIDED BY USER\n\n");
    out.push_str("## FILE INDEX:\n\n");

    for (i, file) in processed.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. **{}** `{}` ({})",
            i + 1,
            file.name,
            file.kind,
            format_size(file.size)
        );
    }

    if !failed.is_empty() {
        out.push_str("\n### Files that failed processing:\n");
        for entry in failed {
            let _ = writeln!(out, "- {}", entry);
        }
    }

    out.push_str("\n---\n\n");

    for (i, file) in processed.iter().enumerate() {
        let _ = write!(out, "## FILE {}/{}: {}\n\n", i + 1, processed.len(), file.name);

        if !file.metadata.is_empty() {
            out.push_str("**Metadata:**\n");
            for (key, value) in &file.metadata {
                let _ = writeln!(out, "- {}: {}", key, value);
            }
            out.push('\n');
        }

        match file.kind {
            FileKind::Image => {
                let _ = write!(
                    out,
                    "![{}](data:{};base64,{})\n\n",
                    file.name, file.content_type, file.content
                );
                out.push_str("*Note: image attached for visual analysis.*\n\n");
            }
            FileKind::Code | FileKind::Json | FileKind::Yaml | FileKind::Xml => {
                let _ = write!(out, "```{}\n{}\n```\n\n", fence_language(file), file.content);
            }
            _ => {
                let _ = write!(out, "```\n{}\n```\n\n", file.content);
            }
        }

        out.push_str("---\n\n");
    }

    let _ = write!(
        out,
        "\n**Summary:** {} file(s) processed successfully, {} failure(s), total size: {}\n\n",
        processed.len(),
        failed.len(),
        format_size(total_size)
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::BasicFileProcessor;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<ServerEnvelope>>,
    }

    #[async_trait]
    impl Outbox for Recorder {
        async fn deliver(&self, envelope: ServerEnvelope) {
            self.sent.lock().push(envelope);
        }
    }

    fn text_file(name: &str, content: &str) -> FilePayload {
        FilePayload {
            name: name.to_string(),
            content: content.to_string(),
            content_type: "text/plain".to_string(),
            size: content.len() as u64,
            ..Default::default()
        }
    }

    fn builder(limits: FileLimits) -> FileContextBuilder {
        FileContextBuilder::new(Arc::new(BasicFileProcessor::new()), limits)
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[tokio::test]
    async fn test_no_files_no_progress() {
        let recorder = Recorder::default();
        let context = builder(FileLimits::default()).build(&[], &recorder).await.unwrap();
        assert!(context.is_empty());
        assert!(recorder.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_context_and_progress() {
        let recorder = Recorder::default();
        let files = vec![
            text_file("main.go", "package main"),
            FilePayload {
                name: "broken.bin".to_string(),
                content: "%%%".to_string(),
                is_base64: true,
                ..Default::default()
            },
        ];

        let context = builder(FileLimits::default()).build(&files, &recorder).await.unwrap();

        assert!(context.starts_with("# FILE CONTEXT PROVIDED BY USER\n\n## FILE INDEX:\n\n"));
        assert!(context.contains("1. **main.go** `code` (12 B)\n"));
        assert!(context.contains("### Files that failed processing:\n- broken.bin (base64 decode error)\n"));
        assert!(context.contains("## FILE 1/1: main.go\n\n**Metadata:**\n- language: go\n- lines: 1\n\n"));
        assert!(context.contains("```go\npackage main\n```\n\n---\n\n"));
        assert!(context.ends_with(
            "\n**Summary:** 1 file(s) processed successfully, 1 failure(s), total size: 12 B\n\n"
        ));

        let progress: Vec<(String, usize, usize, u32)> = recorder
            .sent
            .lock()
            .iter()
            .map(|envelope| match envelope {
                ServerEnvelope::Progress(p) => (p.message.clone(), p.current, p.total, p.percentage),
                other => panic!("unexpected envelope {:?}", other),
            })
            .collect();
        assert_eq!(
            progress,
            vec![
                ("Starting file processing...".to_string(), 0, 2, 0),
                ("Processing file 1 of 2: main.go".to_string(), 1, 2, 50),
                ("Processing file 2 of 2: broken.bin".to_string(), 2, 2, 100),
                ("Generating file context...".to_string(), 2, 2, 100),
            ]
        );
    }

    #[tokio::test]
    async fn test_per_file_limit_skips_file() {
        let recorder = Recorder::default();
        let limits = FileLimits {
            max_file_size: 8,
            max_total_size: 1024,
        };
        let files = vec![text_file("big.txt", "0123456789"), text_file("ok.txt", "fine")];

        let context = builder(limits).build(&files, &recorder).await.unwrap();
        assert!(context.contains("- big.txt (exceeds 0MB)"));
        assert!(context.contains("**ok.txt**"));
    }

    #[tokio::test]
    async fn test_aggregate_limit_aborts() {
        let recorder = Recorder::default();
        let limits = FileLimits {
            max_file_size: 1024 * 1024,
            max_total_size: 2 * 1024 * 1024,
        };
        let chunk = "x".repeat(1024 * 1024);
        let files = vec![
            text_file("a.txt", &chunk),
            text_file("b.txt", &chunk),
            text_file("c.txt", &chunk),
        ];

        let err = builder(limits).build(&files, &recorder).await.unwrap_err();
        assert_eq!(err, FileError::TotalTooLarge { limit_mb: 2 });
        assert_eq!(err.to_string(), "total file size exceeds the 2 MB limit");
    }

    #[test]
    fn test_image_rendered_as_data_uri() {
        let image = ProcessedFile {
            name: "a.png".to_string(),
            kind: FileKind::Image,
            content_type: "image/png".to_string(),
            content: "AAAA".to_string(),
            size: 3,
            metadata: Default::default(),
        };
        let context = render(&[image], &[], 3);
        assert!(context.contains("![a.png](data:image/png;base64,AAAA)\n\n*Note: image attached for visual analysis.*"));
    }
}

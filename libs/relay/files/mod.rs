//! File attachments: per-file processing and prompt context rendering

pub mod context;
pub mod processor;

pub use context::{format_size, FileContextBuilder, FileLimits, MAX_FILE_SIZE, MAX_TOTAL_UPLOAD_SIZE};
pub use processor::{BasicFileProcessor, FileError, FileKind, FileProcessor, ProcessedFile};

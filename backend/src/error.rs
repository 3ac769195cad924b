//! Error types for the generation pipeline.
//!
//! The taxonomy mirrors how faults are handled, not where they occur:
//! - `InputError` rejects a request synchronously with 400; no job is created.
//! - `ResourceError` happens while a job loads its template and font. A font
//!   failure fails the job; a template failure degrades it to a run without a
//!   background.
//! - `RenderError` is scoped to one row. The row is recorded as failed and the
//!   job carries on.
//! - `ArchiveError` is fatal to the job: a broken archive must never be
//!   offered for download.
//!
//! Cancellation is an outcome, not an error, and has no variant here.

use thiserror::Error;

/// Problems with the submitted payload, reported before a job exists.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("no rows were provided")]
    EmptyRows,

    #[error("row count {0} exceeds the limit of {1}")]
    TooManyRows(usize, usize),

    #[error("field #{0} has an empty name")]
    EmptyFieldName(usize),

    #[error("field '{0}' has an invalid color '{1}', expected six hex digits")]
    BadColor(String, String),

    #[error("field '{0}' has an invalid font size {1}")]
    BadFontSize(String, f32),

    #[error("field '{0}' has a non-finite position")]
    BadPosition(String),

    #[error("template reference is not usable: {0}")]
    BadTemplateRef(String),
}

/// Failures while resolving a job's shared template and font.
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("font could not be loaded: {0}")]
    FontLoad(String),

    #[error("template could not be loaded: {0}")]
    TemplateLoad(String),

    #[error("timed out loading {0}")]
    Timeout(&'static str),
}

/// Per-row rendering faults. Never fatal to the job.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("background image could not be decoded: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("template PDF could not be imported: {0}")]
    TemplateImport(String),

    #[error("font could not be embedded: {0}")]
    FontEmbed(String),

    #[error("pdf assembly failed: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Archive construction faults. Fatal to the job.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("duplicate archive entry '{0}'")]
    DuplicateEntry(String),

    #[error("zip write failed: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

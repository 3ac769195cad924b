//! Document rendering: one row in, one PDF out.

pub mod fonts;
pub mod pdf;
pub mod sanitize;

use std::sync::Arc;

use common::model::field::FieldPlacement;
use common::model::row::Row;

use crate::error::RenderError;
use fonts::FontAssets;

/// Page size used when a job has no template to size against.
pub const DEFAULT_PAGE: (f32, f32) = (600.0, 400.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    /// PNG or JPEG drawn as a full-page background image.
    Image,
    /// A PDF whose first page becomes the background.
    Document,
}

/// The background shared by every row of a job, resolved once.
#[derive(Debug, Clone)]
pub struct TemplateAsset {
    pub kind: TemplateKind,
    pub bytes: Vec<u8>,
}

/// Everything a single render call needs. Shared parts are borrowed; the
/// renderer itself holds no per-job state.
pub struct RenderRequest<'a> {
    pub row: &'a Row,
    pub fields: &'a [FieldPlacement],
    pub template: Option<&'a TemplateAsset>,
    pub fonts: &'a FontAssets,
}

/// Per-job bundle of the shared render inputs, cheap to clone across chunks.
#[derive(Clone)]
pub struct RenderContext {
    pub fields: Arc<Vec<FieldPlacement>>,
    pub template: Option<Arc<TemplateAsset>>,
    pub fonts: Arc<FontAssets>,
}

impl RenderContext {
    pub fn request<'a>(&'a self, row: &'a Row) -> RenderRequest<'a> {
        RenderRequest {
            row,
            fields: &self.fields,
            template: self.template.as_deref(),
            fonts: &self.fonts,
        }
    }
}

/// Output of one render attempt, tagged with the row it belongs to so the
/// archive loop can keep entries in submission order.
#[derive(Debug)]
pub struct RenderResult {
    pub index: usize,
    pub outcome: Result<Vec<u8>, String>,
}

/// The seam between the pipeline and the document format. Implementations
/// must be stateless per call: the worker pool invokes `render` from several
/// threads at once.
pub trait DocumentRenderer: Send + Sync {
    fn render(&self, request: &RenderRequest<'_>) -> Result<Vec<u8>, RenderError>;
}

//! Template and font resolution.
//!
//! Both happen once per job, before any row renders, under the configured
//! timeout. The two resources fail differently: a job without its font is
//! useless and fails outright, while a job without its template degrades to
//! text on a blank page (the caller decides; this module only reports).
//!
//! A template reference is either a plain file name resolved against the
//! templates directory or an inline `data:<mime>;base64,<payload>` URL.
//! Whatever the source, the bytes are sniffed and probe-parsed here so a
//! corrupt template surfaces as one resource error instead of one render
//! error per row.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use lopdf::Document;

use crate::config::Config;
use crate::error::ResourceError;
use crate::render::fonts::{self, FontAssets, FontBlob};
use crate::render::{TemplateAsset, TemplateKind};

/// Resolves a job's font assets per the configuration, under the resource
/// timeout. An error here is fatal to the job.
pub async fn load_fonts(config: &Config) -> Result<FontAssets, ResourceError> {
    let regular = config.font_regular.clone();
    let bold = config.font_bold.clone();
    let family = config.font_family.clone();

    let handle = tokio::task::spawn_blocking(move || resolve_fonts(regular, bold, family));
    let joined = tokio::time::timeout(config.resource_timeout, handle)
        .await
        .map_err(|_| ResourceError::Timeout("font"))?;
    joined.map_err(|e| ResourceError::FontLoad(format!("loader crashed: {e}")))?
}

/// Resolves a job's template, under the resource timeout. `None` in, `None`
/// out; the caller treats an error as a degrade to no background.
pub async fn load_template(
    config: &Config,
    template_ref: Option<&str>,
) -> Result<Option<TemplateAsset>, ResourceError> {
    let Some(reference) = template_ref.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    let reference = reference.to_string();
    let templates_dir = config.templates_dir.clone();

    let handle = tokio::task::spawn_blocking(move || resolve_template(&templates_dir, &reference));
    let joined = tokio::time::timeout(config.resource_timeout, handle)
        .await
        .map_err(|_| ResourceError::Timeout("template"))?;
    let asset = joined.map_err(|e| ResourceError::TemplateLoad(format!("loader crashed: {e}")))??;
    Ok(Some(asset))
}

fn resolve_fonts(
    regular: Option<PathBuf>,
    bold: Option<PathBuf>,
    family: Option<String>,
) -> Result<FontAssets, ResourceError> {
    if let Some(path) = regular {
        let regular = read_font(&path)?;
        let bold = bold.map(|path| read_font(&path)).transpose()?;
        return Ok(FontAssets::Embedded { regular, bold });
    }
    if let Some(family) = family {
        return system_family(&family);
    }
    Ok(FontAssets::builtin())
}

fn read_font(path: &Path) -> Result<FontBlob, ResourceError> {
    let bytes = std::fs::read(path)
        .map_err(|e| ResourceError::FontLoad(format!("{}: {e}", path.display())))?;
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Custom")
        .to_string();
    let blob = FontBlob { name, bytes };
    // Parse now so a broken file fails the job here, not once per row.
    fonts::face_metrics(&blob).map_err(|e| ResourceError::FontLoad(e.to_string()))?;
    Ok(blob)
}

/// Looks a family up in the system font database, regular and bold faces.
fn system_family(family: &str) -> Result<FontAssets, ResourceError> {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    let regular = query_family(&db, family, fontdb::Weight::NORMAL)?;
    let bold = query_family(&db, family, fontdb::Weight::BOLD).ok();
    Ok(FontAssets::Embedded { regular, bold })
}

fn query_family(
    db: &fontdb::Database,
    family: &str,
    weight: fontdb::Weight,
) -> Result<FontBlob, ResourceError> {
    let query = fontdb::Query {
        families: &[fontdb::Family::Name(family)],
        weight,
        stretch: fontdb::Stretch::Normal,
        style: fontdb::Style::Normal,
    };
    let id = db
        .query(&query)
        .ok_or_else(|| ResourceError::FontLoad(format!("font family '{family}' not found")))?;
    let suffix = if weight == fontdb::Weight::BOLD { "Bold" } else { "Regular" };
    db.with_face_data(id, |data, _index| FontBlob {
        name: format!("{family}-{suffix}"),
        bytes: data.to_vec(),
    })
    .ok_or_else(|| ResourceError::FontLoad(format!("font family '{family}' has no face data")))
}

fn resolve_template(templates_dir: &Path, reference: &str) -> Result<TemplateAsset, ResourceError> {
    if let Some(rest) = reference.strip_prefix("data:") {
        return decode_data_url(rest);
    }
    let path = template_path(templates_dir, reference)?;
    let bytes = std::fs::read(&path)
        .map_err(|e| ResourceError::TemplateLoad(format!("{}: {e}", path.display())))?;
    template_asset(bytes)
}

fn decode_data_url(rest: &str) -> Result<TemplateAsset, ResourceError> {
    let (_mime, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| ResourceError::TemplateLoad("data URL payload must be base64".into()))?;
    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|e| ResourceError::TemplateLoad(format!("base64: {e}")))?;
    template_asset(bytes)
}

/// Template references name a file directly inside the templates directory;
/// anything that could step outside it is refused.
fn template_path(dir: &Path, reference: &str) -> Result<PathBuf, ResourceError> {
    if reference.contains(['/', '\\']) || reference.contains("..") {
        return Err(ResourceError::TemplateLoad(format!(
            "'{reference}' must be a plain file name"
        )));
    }
    Ok(dir.join(reference))
}

fn template_asset(bytes: Vec<u8>) -> Result<TemplateAsset, ResourceError> {
    let kind = detect_kind(&bytes).ok_or_else(|| {
        ResourceError::TemplateLoad("unrecognized format, expected PNG, JPEG or PDF".into())
    })?;
    validate_template(kind, &bytes)?;
    Ok(TemplateAsset { kind, bytes })
}

fn detect_kind(bytes: &[u8]) -> Option<TemplateKind> {
    if bytes.starts_with(b"%PDF") {
        Some(TemplateKind::Document)
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) || bytes.starts_with(&[0xFF, 0xD8]) {
        Some(TemplateKind::Image)
    } else {
        None
    }
}

fn validate_template(kind: TemplateKind, bytes: &[u8]) -> Result<(), ResourceError> {
    match kind {
        TemplateKind::Image => {
            image::load_from_memory(bytes)
                .map_err(|e| ResourceError::TemplateLoad(format!("image: {e}")))?;
        }
        TemplateKind::Document => {
            let doc = Document::load_mem(bytes)
                .map_err(|e| ResourceError::TemplateLoad(format!("pdf: {e}")))?;
            if doc.get_pages().is_empty() {
                return Err(ResourceError::TemplateLoad("template PDF has no pages".into()));
            }
        }
    }
    Ok(())
}

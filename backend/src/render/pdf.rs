//! The lopdf-backed [`DocumentRenderer`].
//!
//! Each call assembles a complete single-page document from scratch: an
//! optional background (raster image or the first page of a template PDF,
//! drawn as an XObject), then one text run per placed field. Nothing is cached
//! between calls, so the worker pool can invoke it from any thread.
//!
//! Coordinates arrive with the origin at the top-left corner; PDF user space
//! has it at the bottom-left, so every y is flipped against the page height.

use std::collections::HashMap;
use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};

use crate::error::RenderError;
use crate::render::fonts::{self, FontAssets, FontBlob, FIRST_CHAR, LAST_CHAR};
use crate::render::sanitize::sanitize_text;
use crate::render::{DocumentRenderer, RenderRequest, TemplateAsset, TemplateKind, DEFAULT_PAGE};

/// Resource name the background XObject is registered under.
const BACKGROUND_NAME: &str = "Bg";

/// Fraction of the font size between the top of a text box and its baseline.
const BASELINE_RATIO: f32 = 0.8;

pub struct PdfRenderer;

impl PdfRenderer {
    pub fn new() -> Self {
        PdfRenderer
    }
}

impl Default for PdfRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentRenderer for PdfRenderer {
    fn render(&self, request: &RenderRequest<'_>) -> Result<Vec<u8>, RenderError> {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();

        let background = match request.template {
            Some(asset) => Some(prepare_background(&mut doc, asset)?),
            None => None,
        };
        let (page_width, page_height) = background
            .as_ref()
            .map(|bg| bg.size)
            .unwrap_or(DEFAULT_PAGE);

        let page_fonts = register_fonts(&mut doc, request.fonts)?;

        let content = page_content(request, background.as_ref(), page_height)?;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&content)?;
        let content_id = doc.add_object(Stream::new(
            dictionary! { "Filter" => "FlateDecode" },
            encoder.finish()?,
        ));

        let mut resources = dictionary! {
            "Font" => dictionary! {
                "F1" => page_fonts.regular,
                "F2" => page_fonts.bold,
            },
        };
        if let Some(bg) = &background {
            resources.set("XObject", dictionary! { BACKGROUND_NAME => bg.object });
        }
        let resources_id = doc.add_object(resources);

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                0.into(),
                0.into(),
                page_width.into(),
                page_height.into(),
            ],
            "Contents" => content_id,
            "Resources" => resources_id,
        });

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out)?;
        Ok(out)
    }
}

/// A background registered in the document, ready to be drawn with `Do`.
struct Background {
    object: ObjectId,
    kind: TemplateKind,
    /// Page size the background dictates, in points.
    size: (f32, f32),
    /// Lower-left corner of an imported page's MediaBox. Non-zero origins are
    /// translated away so the page content lands at our origin.
    origin: (f32, f32),
}

fn prepare_background(
    doc: &mut Document,
    asset: &TemplateAsset,
) -> Result<Background, RenderError> {
    match asset.kind {
        TemplateKind::Image => image_background(doc, &asset.bytes),
        TemplateKind::Document => pdf_background(doc, &asset.bytes),
    }
}

/// Decodes a raster template and registers it as an image XObject.
///
/// Alpha is flattened over white first: the XObject carries no soft mask, and
/// transparent PNG corners would otherwise come out black in most viewers.
/// Pixels are embedded as FlateDecode RGB, so the round trip is lossless and
/// one pixel maps to one point.
fn image_background(doc: &mut Document, bytes: &[u8]) -> Result<Background, RenderError> {
    let decoded = image::load_from_memory(bytes)?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();

    let mut canvas = image::RgbaImage::from_pixel(width, height, image::Rgba([255, 255, 255, 255]));
    image::imageops::overlay(&mut canvas, &rgba, 0, 0);
    let rgb = image::DynamicImage::ImageRgba8(canvas).to_rgb8();

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(rgb.as_raw())?;
    let object = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        },
        encoder.finish()?,
    ));
    Ok(Background {
        object,
        kind: TemplateKind::Image,
        size: (width as f32, height as f32),
        origin: (0.0, 0.0),
    })
}

/// Imports the first page of a template PDF as a form XObject.
///
/// The page's content stream becomes the form body and its resource tree is
/// deep-copied into the output document, so fonts and images the template
/// refers to keep working.
fn pdf_background(doc: &mut Document, bytes: &[u8]) -> Result<Background, RenderError> {
    let template = Document::load_mem(bytes)
        .map_err(|e| RenderError::TemplateImport(format!("parse: {e}")))?;
    let first_page = template
        .get_pages()
        .into_iter()
        .next()
        .map(|(_, id)| id)
        .ok_or_else(|| RenderError::TemplateImport("template has no pages".into()))?;

    let media_box = page_rect(&template, first_page, b"MediaBox")?
        .unwrap_or([0.0, 0.0, DEFAULT_PAGE.0, DEFAULT_PAGE.1]);
    let (width, height) = (media_box[2] - media_box[0], media_box[3] - media_box[1]);
    if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
        return Err(RenderError::TemplateImport(format!(
            "degenerate page size {width}x{height}"
        )));
    }

    let content = template
        .get_page_content(first_page)
        .map_err(|e| RenderError::TemplateImport(format!("content: {e}")))?;

    let mut importer = ObjectImporter::new(&template, doc);
    let resources = match page_attribute(&template, first_page, b"Resources") {
        Some(object) => {
            let object = object.clone();
            importer.import(&object)?
        }
        None => Object::Dictionary(Dictionary::new()),
    };

    let mut form = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Form",
        "BBox" => vec![
            media_box[0].into(),
            media_box[1].into(),
            media_box[2].into(),
            media_box[3].into(),
        ],
    };
    form.set("Resources", resources);
    let object = doc.add_object(Stream::new(form, content));
    Ok(Background {
        object,
        kind: TemplateKind::Document,
        size: (width, height),
        origin: (media_box[0], media_box[1]),
    })
}

/// Deep-copies objects from one document into another, remapping references
/// as it goes. Each source object is copied once; revisiting it (including
/// through a cycle) resolves to the id already handed out.
struct ObjectImporter<'a> {
    source: &'a Document,
    target: &'a mut Document,
    imported: HashMap<ObjectId, ObjectId>,
}

impl<'a> ObjectImporter<'a> {
    fn new(source: &'a Document, target: &'a mut Document) -> Self {
        ObjectImporter {
            source,
            target,
            imported: HashMap::new(),
        }
    }

    fn import(&mut self, object: &Object) -> Result<Object, RenderError> {
        match object {
            Object::Reference(id) => Ok(Object::Reference(self.import_ref(*id)?)),
            Object::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.import(item)?);
                }
                Ok(Object::Array(out))
            }
            Object::Dictionary(dict) => Ok(Object::Dictionary(self.import_dict(dict)?)),
            Object::Stream(stream) => {
                let dict = self.import_dict(&stream.dict)?;
                Ok(Object::Stream(Stream::new(dict, stream.content.clone())))
            }
            other => Ok(other.clone()),
        }
    }

    fn import_dict(&mut self, dict: &Dictionary) -> Result<Dictionary, RenderError> {
        let mut out = Dictionary::new();
        for (key, value) in dict.iter() {
            out.set(key.clone(), self.import(value)?);
        }
        Ok(out)
    }

    fn import_ref(&mut self, id: ObjectId) -> Result<ObjectId, RenderError> {
        if let Some(&mapped) = self.imported.get(&id) {
            return Ok(mapped);
        }
        let new_id = self.target.new_object_id();
        self.imported.insert(id, new_id);
        let object = self
            .source
            .get_object(id)
            .map_err(|e| RenderError::TemplateImport(format!("object {}: {e}", id.0)))?
            .clone();
        let copied = self.import(&object)?;
        self.target.objects.insert(new_id, copied);
        Ok(new_id)
    }
}

/// Looks `key` up on a page, walking `Parent` links for inheritable
/// attributes like MediaBox and Resources.
fn page_attribute<'a>(doc: &'a Document, page: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut node = page;
    // Page trees are shallow; the bound stops malformed Parent cycles.
    for _ in 0..32 {
        let dict = doc.get_object(node).ok()?.as_dict().ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        node = dict.get(b"Parent").ok()?.as_reference().ok()?;
    }
    None
}

fn page_rect(doc: &Document, page: ObjectId, key: &[u8]) -> Result<Option<[f32; 4]>, RenderError> {
    let Some(object) = page_attribute(doc, page, key) else {
        return Ok(None);
    };
    let object = match object {
        Object::Reference(id) => doc
            .get_object(*id)
            .map_err(|e| RenderError::TemplateImport(format!("rect: {e}")))?,
        other => other,
    };
    let array = object
        .as_array()
        .map_err(|e| RenderError::TemplateImport(format!("rect: {e}")))?;
    if array.len() != 4 {
        return Err(RenderError::TemplateImport(format!(
            "rect has {} elements",
            array.len()
        )));
    }
    let mut raw = [0f32; 4];
    for (slot, value) in raw.iter_mut().zip(array) {
        *slot = number(value)
            .ok_or_else(|| RenderError::TemplateImport("rect holds a non-number".into()))?;
    }
    Ok(Some([
        raw[0].min(raw[2]),
        raw[1].min(raw[3]),
        raw[0].max(raw[2]),
        raw[1].max(raw[3]),
    ]))
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(v) => Some(*v as f32),
        Object::Real(v) => Some(*v),
        _ => None,
    }
}

/// Font object ids the page's `F1` (regular) and `F2` (bold) names resolve to.
struct PageFonts {
    regular: ObjectId,
    bold: ObjectId,
}

fn register_fonts(doc: &mut Document, fonts: &FontAssets) -> Result<PageFonts, RenderError> {
    match fonts {
        FontAssets::Builtin => Ok(PageFonts {
            regular: doc.add_object(builtin_font("Helvetica")),
            bold: doc.add_object(builtin_font("Helvetica-Bold")),
        }),
        FontAssets::Embedded { regular, bold } => {
            let regular_id = embed_truetype(doc, regular)?;
            let bold_id = match bold {
                Some(blob) => embed_truetype(doc, blob)?,
                None => regular_id,
            };
            Ok(PageFonts {
                regular: regular_id,
                bold: bold_id,
            })
        }
    }
}

fn builtin_font(base: &str) -> Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => base,
        "Encoding" => "WinAnsiEncoding",
    }
}

/// Embeds a TrueType file and returns the font dictionary's id. Widths cover
/// the full WinAnsi range so viewers do not fall back to guessed metrics.
fn embed_truetype(doc: &mut Document, blob: &FontBlob) -> Result<ObjectId, RenderError> {
    let metrics = fonts::face_metrics(blob)?;
    let file_id = doc.add_object(Stream::new(
        dictionary! { "Length1" => blob.bytes.len() as i64 },
        blob.bytes.clone(),
    ));

    // PostScript names carry no spaces.
    let base_font = blob.name.replace(' ', "-");
    let descriptor_id = doc.add_object(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => base_font.clone(),
        "Flags" => 32,
        "FontBBox" => metrics.bbox.iter().map(|v| Object::Integer(*v)).collect::<Vec<_>>(),
        "ItalicAngle" => 0,
        "Ascent" => metrics.ascent,
        "Descent" => metrics.descent,
        "CapHeight" => metrics.cap_height,
        "StemV" => 80,
        "FontFile2" => file_id,
    });

    Ok(doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "TrueType",
        "BaseFont" => base_font,
        "FirstChar" => FIRST_CHAR as i64,
        "LastChar" => LAST_CHAR as i64,
        "Widths" => metrics.widths.iter().map(|w| Object::Integer(*w)).collect::<Vec<_>>(),
        "Encoding" => "WinAnsiEncoding",
        "FontDescriptor" => descriptor_id,
    }))
}

/// Builds the page's content stream: background first, then one text run per
/// field that has a non-empty value in the row.
fn page_content(
    request: &RenderRequest<'_>,
    background: Option<&Background>,
    page_height: f32,
) -> Result<Vec<u8>, RenderError> {
    let mut ops = Vec::new();

    if let Some(bg) = background {
        ops.push(Operation::new("q", vec![]));
        let cm = match bg.kind {
            // Image space is the unit square; scale it up to the page.
            TemplateKind::Image => vec![
                bg.size.0.into(),
                0.into(),
                0.into(),
                bg.size.1.into(),
                0.into(),
                0.into(),
            ],
            // Imported pages keep their own scale; shift a non-zero MediaBox
            // origin back onto ours.
            TemplateKind::Document => vec![
                1.into(),
                0.into(),
                0.into(),
                1.into(),
                (-bg.origin.0).into(),
                (-bg.origin.1).into(),
            ],
        };
        ops.push(Operation::new("cm", cm));
        ops.push(Operation::new("Do", vec![BACKGROUND_NAME.into()]));
        ops.push(Operation::new("Q", vec![]));
    }

    for placement in request.fields {
        let Some(raw) = request.row.get(&placement.field_name) else {
            continue;
        };
        let text = sanitize_text(raw);
        if text.trim().is_empty() {
            continue;
        }

        let (r, g, b) = placement.color_rgb().unwrap_or((0, 0, 0));
        let font = if placement.bold { "F2" } else { "F1" };
        let baseline_y = placement.y + placement.font_size_px * BASELINE_RATIO;

        ops.push(Operation::new("BT", vec![]));
        ops.push(Operation::new(
            "Tf",
            vec![font.into(), placement.font_size_px.into()],
        ));
        ops.push(Operation::new(
            "rg",
            vec![
                (r as f32 / 255.0).into(),
                (g as f32 / 255.0).into(),
                (b as f32 / 255.0).into(),
            ],
        ));
        ops.push(Operation::new(
            "Td",
            vec![placement.x.into(), (page_height - baseline_y).into()],
        ));
        ops.push(Operation::new(
            "Tj",
            vec![Object::String(
                fonts::encode_winansi(&text),
                StringFormat::Literal,
            )],
        ));
        ops.push(Operation::new("ET", vec![]));
    }

    Ok(Content { operations: ops }.encode()?)
}

//! Font handling for the PDF renderer.
//!
//! Two modes, chosen at load time and carried in [`FontAssets`]:
//! - `Builtin`: the viewer-provided Helvetica / Helvetica-Bold Type1 faces.
//!   Nothing is parsed or embedded; this is the zero-configuration path.
//! - `Embedded`: TrueType files supplied through the configuration, embedded
//!   as FontFile2 with WinAnsi widths so the output is self-contained.
//!
//! Text is encoded to WinAnsi (cp1252). Characters without a WinAnsi code are
//! drawn as `?` rather than dropped, so a bad cell is visible in the output.

use crate::error::RenderError;
use ttf_parser::Face;

pub const FIRST_CHAR: u8 = 32;
pub const LAST_CHAR: u8 = 255;

/// A TrueType font ready for embedding: the raw file plus the name the PDF
/// will call it by.
#[derive(Debug, Clone)]
pub struct FontBlob {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// The faces a job renders with, resolved once and shared read-only.
#[derive(Debug, Clone)]
pub enum FontAssets {
    Builtin,
    Embedded {
        regular: FontBlob,
        /// Falls back to `regular` when absent.
        bold: Option<FontBlob>,
    },
}

impl FontAssets {
    pub fn builtin() -> Self {
        FontAssets::Builtin
    }
}

/// Metrics pulled out of a TrueType face, in 1000-per-em PDF glyph space.
pub struct FaceMetrics {
    pub widths: Vec<i64>,
    pub ascent: i64,
    pub descent: i64,
    pub cap_height: i64,
    pub bbox: [i64; 4],
}

/// Parses `blob` and extracts the metrics a TrueType font dictionary needs.
pub fn face_metrics(blob: &FontBlob) -> Result<FaceMetrics, RenderError> {
    let face = Face::parse(&blob.bytes, 0)
        .map_err(|e| RenderError::FontEmbed(format!("{}: {e}", blob.name)))?;
    let upem = face.units_per_em() as f32;
    if upem <= 0.0 {
        return Err(RenderError::FontEmbed(format!("{}: zero units per em", blob.name)));
    }
    let scale = |v: f32| (v * 1000.0 / upem).round() as i64;

    let widths = (FIRST_CHAR..=LAST_CHAR)
        .map(|code| match winansi_char(code) {
            Some(c) => face
                .glyph_index(c)
                .and_then(|gid| face.glyph_hor_advance(gid))
                .map(|adv| scale(adv as f32))
                .unwrap_or(0),
            None => 0,
        })
        .collect();

    let bbox = face.global_bounding_box();
    let ascent = scale(face.ascender() as f32);
    Ok(FaceMetrics {
        widths,
        ascent,
        descent: scale(face.descender() as f32),
        cap_height: face
            .capital_height()
            .map(|v| scale(v as f32))
            .unwrap_or(ascent * 7 / 10),
        bbox: [
            scale(bbox.x_min as f32),
            scale(bbox.y_min as f32),
            scale(bbox.x_max as f32),
            scale(bbox.y_max as f32),
        ],
    })
}

/// Encodes `text` to WinAnsi bytes, substituting `?` for anything unmappable.
pub fn encode_winansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| winansi_byte(c).unwrap_or(b'?'))
        .collect()
}

/// WinAnsi (cp1252) code for `c`, if it has one.
pub fn winansi_byte(c: char) -> Option<u8> {
    match c as u32 {
        0x20..=0x7E => Some(c as u8),
        0xA0..=0xFF => Some(c as u8),
        _ => match c {
            '\u{20AC}' => Some(0x80),
            '\u{201A}' => Some(0x82),
            '\u{0192}' => Some(0x83),
            '\u{201E}' => Some(0x84),
            '\u{2026}' => Some(0x85),
            '\u{2020}' => Some(0x86),
            '\u{2021}' => Some(0x87),
            '\u{02C6}' => Some(0x88),
            '\u{2030}' => Some(0x89),
            '\u{0160}' => Some(0x8A),
            '\u{2039}' => Some(0x8B),
            '\u{0152}' => Some(0x8C),
            '\u{017D}' => Some(0x8E),
            '\u{2018}' => Some(0x91),
            '\u{2019}' => Some(0x92),
            '\u{201C}' => Some(0x93),
            '\u{201D}' => Some(0x94),
            '\u{2022}' => Some(0x95),
            '\u{2013}' => Some(0x96),
            '\u{2014}' => Some(0x97),
            '\u{02DC}' => Some(0x98),
            '\u{2122}' => Some(0x99),
            '\u{0161}' => Some(0x9A),
            '\u{203A}' => Some(0x9B),
            '\u{0153}' => Some(0x9C),
            '\u{017E}' => Some(0x9E),
            '\u{0178}' => Some(0x9F),
            _ => None,
        },
    }
}

/// Character for a WinAnsi code, used when building width tables.
pub fn winansi_char(code: u8) -> Option<char> {
    match code {
        0x20..=0x7E => Some(code as char),
        0xA0..=0xFF => char::from_u32(code as u32),
        0x80 => Some('\u{20AC}'),
        0x82 => Some('\u{201A}'),
        0x83 => Some('\u{0192}'),
        0x84 => Some('\u{201E}'),
        0x85 => Some('\u{2026}'),
        0x86 => Some('\u{2020}'),
        0x87 => Some('\u{2021}'),
        0x88 => Some('\u{02C6}'),
        0x89 => Some('\u{2030}'),
        0x8A => Some('\u{0160}'),
        0x8B => Some('\u{2039}'),
        0x8C => Some('\u{0152}'),
        0x8E => Some('\u{017D}'),
        0x91 => Some('\u{2018}'),
        0x92 => Some('\u{2019}'),
        0x93 => Some('\u{201C}'),
        0x94 => Some('\u{201D}'),
        0x95 => Some('\u{2022}'),
        0x96 => Some('\u{2013}'),
        0x97 => Some('\u{2014}'),
        0x98 => Some('\u{02DC}'),
        0x99 => Some('\u{2122}'),
        0x9A => Some('\u{0161}'),
        0x9B => Some('\u{203A}'),
        0x9C => Some('\u{0153}'),
        0x9E => Some('\u{017E}'),
        0x9F => Some('\u{0178}'),
        _ => None,
    }
}

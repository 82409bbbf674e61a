//! Companion PDF generation.
//!
//! Two entry points share one document skeleton:
//!
//! * [`compile_images`]: one page per rectified image, in input order. JPEG
//!   pages are embedded as-is (`DCTDecode`); anything else is re-encoded to
//!   JPEG first. Page size is the pixel size at 96 dpi.
//! * [`compile_text`]: A4 pages of wrapped text in the standard Helvetica
//!   font. Characters outside Latin-1 are rendered as `?`.
//!
//! Both are blocking; the `_in_background` wrappers run them on the blocking
//! pool.

use crate::error::IngestError;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageDecoder, ImageFormat, ImageReader};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Points per pixel at 96 dpi.
const PT_PER_PX: f32 = 0.75;

const A4: (f32, f32) = (595.0, 842.0);
const MARGIN: f32 = 56.0;
const BODY_SIZE: f32 = 11.0;
const TITLE_SIZE: f32 = 16.0;
const LEADING: f32 = 15.0;
/// Rough Helvetica line capacity at 11 pt across the A4 text column.
const CHARS_PER_LINE: usize = 88;

/// Build a PDF with one page per image file, in the given order.
///
/// # Errors
/// * [`IngestError::Validation`]: `image_paths` is empty
/// * [`IngestError::DocumentGeneration`]: a file can't be read or decoded,
///   or the document can't be serialised
pub fn compile_images(image_paths: &[PathBuf], title: &str) -> Result<Vec<u8>, IngestError> {
    if image_paths.is_empty() {
        return Err(IngestError::Validation(
            "cannot compile a PDF from zero images".into(),
        ));
    }

    let mut builder = PdfBuilder::new(title);
    for path in image_paths {
        let image = EmbeddedImage::load(path)?;
        let page_w = image.width as f32 * PT_PER_PX;
        let page_h = image.height as f32 * PT_PER_PX;

        let image_id = builder.doc.add_object(image.into_stream());
        let resources = dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        };
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        real(page_w),
                        0.into(),
                        0.into(),
                        real(page_h),
                        0.into(),
                        0.into(),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        builder.add_page((page_w, page_h), resources, content)?;
    }

    debug!("Compiled {} image page(s) into PDF", image_paths.len());
    builder.finish()
}

/// Build a text-only PDF: the title on top of the first page, then `body`
/// wrapped and paginated.
pub fn compile_text(title: &str, body: &str) -> Result<Vec<u8>, IngestError> {
    if body.trim().is_empty() {
        return Err(IngestError::Validation(
            "cannot compile a PDF from empty text".into(),
        ));
    }

    let mut builder = PdfBuilder::new(title);
    let font_id = builder.doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });

    let lines = wrap_lines(body, CHARS_PER_LINE);
    let lines_per_page = ((A4.1 - 2.0 * MARGIN) / LEADING) as usize;
    // The title takes two lines of the first page.
    let first_page = lines_per_page.saturating_sub(2).max(1);

    let mut pages: Vec<&[String]> = Vec::new();
    let (head, mut rest) = lines.split_at(first_page.min(lines.len()));
    pages.push(head);
    while !rest.is_empty() {
        let (page, tail) = rest.split_at(lines_per_page.min(rest.len()));
        pages.push(page);
        rest = tail;
    }

    for (idx, page_lines) in pages.iter().enumerate() {
        let mut ops = vec![
            Operation::new("BT", vec![]),
            Operation::new("TL", vec![real(LEADING)]),
            Operation::new("Td", vec![real(MARGIN), real(A4.1 - MARGIN)]),
        ];
        if idx == 0 && !title.trim().is_empty() {
            ops.push(Operation::new("Tf", vec!["F1".into(), real(TITLE_SIZE)]));
            ops.push(Operation::new("Tj", vec![latin1_literal(title)]));
            ops.push(Operation::new("T*", vec![]));
            ops.push(Operation::new("T*", vec![]));
        }
        ops.push(Operation::new("Tf", vec!["F1".into(), real(BODY_SIZE)]));
        for line in page_lines.iter() {
            ops.push(Operation::new("Tj", vec![latin1_literal(line)]));
            ops.push(Operation::new("T*", vec![]));
        }
        ops.push(Operation::new("ET", vec![]));

        let resources = dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        };
        builder.add_page(A4, resources, Content { operations: ops })?;
    }

    debug!("Compiled {} text page(s) into PDF", pages.len());
    builder.finish()
}

/// [`compile_images`] on the blocking thread pool.
pub async fn compile_images_in_background(
    image_paths: Vec<PathBuf>,
    title: String,
) -> Result<Vec<u8>, IngestError> {
    tokio::task::spawn_blocking(move || compile_images(&image_paths, &title))
        .await
        .map_err(|e| IngestError::Internal(format!("PDF task panicked: {}", e)))?
}

/// [`compile_text`] on the blocking thread pool.
pub async fn compile_text_in_background(title: String, body: String) -> Result<Vec<u8>, IngestError> {
    tokio::task::spawn_blocking(move || compile_text(&title, &body))
        .await
        .map_err(|e| IngestError::Internal(format!("PDF task panicked: {}", e)))?
}

// ── Document skeleton ────────────────────────────────────────────────────

struct PdfBuilder {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
    title: String,
}

impl PdfBuilder {
    fn new(title: &str) -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
            title: title.to_string(),
        }
    }

    fn add_page(
        &mut self,
        (width, height): (f32, f32),
        resources: Dictionary,
        content: Content,
    ) -> Result<(), IngestError> {
        let encoded = content.encode().map_err(generation_error)?;
        let content_id = self.doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![0.into(), 0.into(), real(width), real(height)],
            "Resources" => resources,
            "Contents" => content_id,
        });
        self.kids.push(page_id.into());
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<u8>, IngestError> {
        let count = self.kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => self.kids,
                "Count" => count,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        let info_id = self.doc.add_object(dictionary! {
            "Title" => utf16_text(&self.title),
            "Producer" => Object::string_literal("scan2voice"),
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc.trailer.set("Info", info_id);

        let mut out = Vec::new();
        self.doc.save_to(&mut out).map_err(generation_error)?;
        Ok(out)
    }
}

// ── Images ───────────────────────────────────────────────────────────────

struct EmbeddedImage {
    jpeg: Vec<u8>,
    width: u32,
    height: u32,
    colour_space: &'static str,
}

impl EmbeddedImage {
    fn load(path: &Path) -> Result<Self, IngestError> {
        let bytes = std::fs::read(path).map_err(|e| {
            IngestError::DocumentGeneration(format!("cannot read '{}': {e}", path.display()))
        })?;

        if image::guess_format(&bytes).ok() == Some(ImageFormat::Jpeg) {
            if let Some(embedded) = Self::passthrough_jpeg(&bytes) {
                return Ok(embedded);
            }
        }

        let decoded = image::load_from_memory(&bytes).map_err(|e| {
            IngestError::DocumentGeneration(format!("cannot decode '{}': {e}", path.display()))
        })?;
        let rgb = decoded.to_rgb8();
        let (width, height) = rgb.dimensions();
        let mut jpeg = Vec::new();
        image::DynamicImage::ImageRgb8(rgb)
            .write_with_encoder(JpegEncoder::new_with_quality(&mut jpeg, 90))
            .map_err(generation_error)?;

        Ok(Self {
            jpeg,
            width,
            height,
            colour_space: "DeviceRGB",
        })
    }

    /// Use JPEG bytes directly when their colour model maps onto a PDF
    /// device colour space; CMYK and friends get re-encoded instead.
    fn passthrough_jpeg(bytes: &[u8]) -> Option<Self> {
        let decoder = ImageReader::with_format(Cursor::new(bytes), ImageFormat::Jpeg)
            .into_decoder()
            .ok()?;
        let colour_space = match decoder.original_color_type() {
            ExtendedColorType::Rgb8 => "DeviceRGB",
            ExtendedColorType::L8 => "DeviceGray",
            _ => return None,
        };
        let (width, height) = decoder.dimensions();
        Some(Self {
            jpeg: bytes.to_vec(),
            width,
            height,
            colour_space,
        })
    }

    fn into_stream(self) -> Stream {
        let dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => self.width as i64,
            "Height" => self.height as i64,
            "ColorSpace" => self.colour_space,
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        };
        Stream::new(dict, self.jpeg).with_compression(false)
    }
}

// ── Text helpers ─────────────────────────────────────────────────────────

/// Greedy word wrap; paragraphs follow newlines, over-long words are split.
fn wrap_lines(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut line = String::new();
        let mut line_len = 0usize;
        for word in paragraph.split_whitespace() {
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(width) {
                let piece_len = piece.len();
                if line_len > 0 && line_len + 1 + piece_len > width {
                    lines.push(std::mem::take(&mut line));
                    line_len = 0;
                }
                if line_len > 0 {
                    line.push(' ');
                    line_len += 1;
                }
                line.extend(piece);
                line_len += piece_len;
            }
        }
        lines.push(line);
    }
    lines
}

fn latin1_literal(text: &str) -> Object {
    let bytes: Vec<u8> = text
        .chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect();
    Object::String(bytes, StringFormat::Literal)
}

/// PDF text string in UTF-16BE with BOM, so non-Latin titles survive.
fn utf16_text(text: &str) -> Object {
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

fn real(v: f32) -> Object {
    Object::Real(v)
}

fn generation_error(e: impl std::fmt::Display) -> IngestError {
    IngestError::DocumentGeneration(e.to_string())
}

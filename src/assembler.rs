//! Document Assembler - Certificate PDFs
//!
//! Wraps one rendered image into a one-page PDF and merges per-name PDFs into
//! a single document. Inputs are only read, never modified.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegDecoder;
use image::{ColorType, ImageDecoder, ImageFormat};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use thiserror::Error;
use tracing::{info, warn};

use crate::print::PrintSpec;
use crate::storage::write_atomic;

/// Page attributes a page may inherit from its parent node.
const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Image {path} could not be decoded: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("None of the {0} input PDF(s) could be merged")]
    NoInputs(usize),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Pixel data ready to embed as an image XObject.
struct EmbeddedImage {
    width: u32,
    height: u32,
    stream: Stream,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentAssembler {
    print: PrintSpec,
}

impl DocumentAssembler {
    pub fn new(print: PrintSpec) -> Self {
        Self { print }
    }

    /// Write a single-page PDF showing `image_path` edge to edge.
    ///
    /// JPEG data is embedded untouched; other formats are embedded as raw
    /// RGB samples with lossless Flate compression.
    pub fn image_to_pdf(&self, image_path: &Path, pdf_path: &Path) -> Result<(), AssemblyError> {
        let bytes = fs::read(image_path).map_err(|source| AssemblyError::Read {
            path: image_path.to_path_buf(),
            source,
        })?;
        let embedded = embed_image(image_path, bytes)?;
        let (width_pt, height_pt) = self.print.page_size_pt(embedded.width, embedded.height);

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let image_id = doc.add_object(embedded.stream);

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        width_pt.into(),
                        0.0f32.into(),
                        0.0f32.into(),
                        height_pt.into(),
                        0.0f32.into(),
                        0.0f32.into(),
                    ],
                ),
                Operation::new("Do", vec!["Im0".into()]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode()?));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.0f32.into(), 0.0f32.into(), width_pt.into(), height_pt.into()],
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => 1i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        save(&mut doc, pdf_path)
    }

    /// Append the pages of `inputs`, in order, into `output`.
    ///
    /// Missing or unreadable inputs are skipped with a warning. Returns the
    /// number of pages written.
    pub fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<usize, AssemblyError> {
        let mut merged = Document::with_version("1.5");
        let mut page_ids: Vec<ObjectId> = Vec::new();
        let mut max_id = 1;

        for path in inputs {
            if !path.exists() {
                warn!(op = "assembler::merge", path = %path.display(), "Input PDF missing, skipping");
                continue;
            }
            let mut doc = match Document::load(path) {
                Ok(doc) => doc,
                Err(err) => {
                    warn!(op = "assembler::merge", path = %path.display(), error = %err, "Input PDF unreadable, skipping");
                    continue;
                }
            };

            doc.renumber_objects_with(max_id);
            max_id = doc.max_id + 1;

            for page_id in doc.get_pages().into_values() {
                inherit_page_attributes(&mut doc, page_id);
                page_ids.push(page_id);
            }
            merged.objects.extend(doc.objects);
        }

        if page_ids.is_empty() {
            return Err(AssemblyError::NoInputs(inputs.len()));
        }

        // Old catalogs and page trees are replaced by a single new tree.
        let stale: BTreeSet<ObjectId> = merged
            .objects
            .iter()
            .filter(|(_, object)| matches!(object_type(object), Some(b"Catalog") | Some(b"Pages")))
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            merged.objects.remove(id);
        }

        merged.max_id = max_id;
        let pages_id = merged.new_object_id();
        for page_id in &page_ids {
            merged.get_dictionary_mut(*page_id)?.set("Parent", pages_id);
        }
        merged.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => page_ids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
                "Count" => page_ids.len() as i64,
            }),
        );
        let catalog_id = merged.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        merged.trailer.set("Root", catalog_id);

        save(&mut merged, output)?;
        info!(
            op = "assembler::merge",
            output = %output.display(),
            pages = page_ids.len(),
            "Merged PDFs"
        );
        Ok(page_ids.len())
    }
}

fn embed_image(path: &Path, bytes: Vec<u8>) -> Result<EmbeddedImage, AssemblyError> {
    let decode_err = |reason: String| AssemblyError::Decode {
        path: path.to_path_buf(),
        reason,
    };

    let format = image::guess_format(&bytes).map_err(|e| decode_err(e.to_string()))?;
    if format == ImageFormat::Jpeg {
        let (color_space, (width, height)) = {
            let decoder =
                JpegDecoder::new(Cursor::new(&bytes)).map_err(|e| decode_err(e.to_string()))?;
            let color_space = match decoder.color_type() {
                ColorType::L8 => Some("DeviceGray"),
                ColorType::Rgb8 => Some("DeviceRGB"),
                _ => None,
            };
            (color_space, decoder.dimensions())
        };
        if let Some(color_space) = color_space {
            let stream = Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => width as i64,
                    "Height" => height as i64,
                    "ColorSpace" => color_space,
                    "BitsPerComponent" => 8i64,
                    "Filter" => "DCTDecode",
                },
                bytes,
            )
            .with_compression(false);
            return Ok(EmbeddedImage { width, height, stream });
        }
    }

    let rgb = image::load_from_memory(&bytes)
        .map_err(|e| decode_err(e.to_string()))?
        .to_rgb8();
    let (width, height) = rgb.dimensions();
    let stream = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8i64,
        },
        rgb.into_raw(),
    );
    Ok(EmbeddedImage { width, height, stream })
}

fn object_type(object: &Object) -> Option<&[u8]> {
    object.as_dict().ok()?.get(b"Type").ok()?.as_name().ok()
}

/// Copy attributes a page inherits from its parent onto the page itself, so
/// the page survives being moved under a new page tree.
fn inherit_page_attributes(doc: &mut Document, page_id: ObjectId) {
    let parent: Option<Dictionary> = doc
        .get_dictionary(page_id)
        .ok()
        .and_then(|page| page.get(b"Parent").ok())
        .and_then(|parent| parent.as_reference().ok())
        .and_then(|parent_id| doc.get_dictionary(parent_id).ok())
        .cloned();
    let (Some(parent), Ok(page)) = (parent, doc.get_dictionary_mut(page_id)) else {
        return;
    };
    for key in INHERITABLE {
        if !page.has(key) {
            if let Ok(value) = parent.get(key) {
                page.set(key.to_vec(), value.clone());
            }
        }
    }
}

fn save(doc: &mut Document, path: &Path) -> Result<(), AssemblyError> {
    doc.compress();
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).map_err(|source| AssemblyError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &bytes).map_err(|source| AssemblyError::Write {
        path: path.to_path_buf(),
        source,
    })
}

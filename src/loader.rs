//! Document loading: file path in, normalized text and source id out.
//!
//! The loader picks an extractor by file extension:
//!
//! | Extension | Extraction |
//! |-----------|------------|
//! | `.pdf` | `pdf-extract` |
//! | `.html`, `.htm` | text of the docs main area (`div#content.content-inner`), else `<body>` |
//! | anything else | read as UTF-8 text |
//!
//! Extraction never panics: unreadable files surface as [`IndexError::Io`]
//! and unparsable ones as [`IndexError::Load`].

use scraper::{ElementRef, Html, Selector};
use std::path::Path;

use crate::error::{IndexError, Result};

/// Text extracted from one source, ready for chunking.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDocument {
    pub source_id: String,
    pub text: String,
}

/// Supplies document text for the indexing pipeline.
pub trait DocumentLoader: Send + Sync {
    /// The identity records for `path` are stored under.
    fn source_id(&self, path: &Path) -> String {
        path.display().to_string()
    }

    fn load(&self, path: &Path) -> Result<LoadedDocument>;
}

/// Loader for local PDF, HTML, and plain-text files.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileLoader;

impl DocumentLoader for FileLoader {
    fn load(&self, path: &Path) -> Result<LoadedDocument> {
        let source_id = self.source_id(path);
        let bytes = std::fs::read(path).map_err(|e| IndexError::io(path, e))?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let raw = match ext.as_str() {
            // pdf-extract panics on some malformed inputs.
            "pdf" => std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(&bytes))
                .map_err(|_| IndexError::Load {
                    source_id: source_id.clone(),
                    reason: "PDF extraction panicked".to_string(),
                })?
                .map_err(|e| IndexError::Load {
                    source_id: source_id.clone(),
                    reason: format!("PDF extraction failed: {}", e),
                })?,
            "html" | "htm" => {
                let html = String::from_utf8_lossy(&bytes);
                extract_html_text(&html)
            }
            _ => String::from_utf8(bytes).map_err(|e| IndexError::Load {
                source_id: source_id.clone(),
                reason: format!("not valid UTF-8: {}", e),
            })?,
        };

        Ok(LoadedDocument {
            source_id,
            text: normalize_text(&raw),
        })
    }
}

/// Collapse every whitespace run to a single space and trim.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract visible text from an HTML page, preferring the docs main area.
pub fn extract_html_text(html: &str) -> String {
    let document = Html::parse_document(html);

    for css in ["div#content.content-inner", "body"] {
        // Both selectors are static and known-valid.
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        if let Some(root) = document.select(&selector).next() {
            return visible_text(root);
        }
    }

    visible_text(document.root_element())
}

fn visible_text(root: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style" | "noscript"))
        });
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    normalize_text(&out)
}

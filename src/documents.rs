//! Context documents: uploaded files whose text is prepended to prompts.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::ContextDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Txt,
    Md,
    Pdf,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Txt => "txt",
            DocumentKind::Md => "md",
            DocumentKind::Pdf => "pdf",
        }
    }

    /// Detect by file extension; anything else is not accepted.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "txt" | "text" => Some(DocumentKind::Txt),
            "md" | "markdown" => Some(DocumentKind::Md),
            "pdf" => Some(DocumentKind::Pdf),
            _ => None,
        }
    }
}

pub fn extract_text(path: &Path, kind: DocumentKind) -> Result<String> {
    match kind {
        DocumentKind::Txt | DocumentKind::Md => extract_plaintext(path),
        DocumentKind::Pdf => extract_pdf(path),
    }
}

fn extract_plaintext(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(e) => Ok(String::from_utf8_lossy(e.as_bytes()).into_owned()),
    }
}

fn extract_pdf(path: &Path) -> Result<String> {
    // pdf-extract panics on some malformed files
    let path_buf = path.to_path_buf();
    match std::panic::catch_unwind(move || pdf_extract::extract_text(&path_buf)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(anyhow!("PDF extraction failed: {}", e)),
        Err(_) => Err(anyhow!("PDF extraction panicked (malformed file)")),
    }
}

/// Copy an upload to `<documents_dir>/<user_id>/<millis>-<name>`.
pub fn store_copy(documents_dir: &Path, user_id: i64, source: &Path) -> Result<PathBuf> {
    let name = source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("Invalid file name: {}", source.display()))?;

    let dir = documents_dir.join(user_id.to_string());
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let target = dir.join(format!("{}-{}", Utc::now().timestamp_millis(), name));
    fs::copy(source, &target)
        .with_context(|| format!("Failed to store {}", source.display()))?;
    Ok(target)
}

pub fn remove_copy(path: &Path) -> Result<()> {
    fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))
}

pub fn combine(documents: &[ContextDocument]) -> String {
    documents
        .iter()
        .map(|doc| {
            format!(
                "--- CONTEXT DOCUMENT: {} ---\n{}\n--- END: {} ---",
                doc.name, doc.content, doc.name
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str, content: &str) -> ContextDocument {
        ContextDocument {
            id: 1,
            user_id: 1,
            name: name.to_string(),
            file_url: String::new(),
            file_type: "txt".to_string(),
            content: content.to_string(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(DocumentKind::from_path(Path::new("bio.TXT")), Some(DocumentKind::Txt));
        assert_eq!(DocumentKind::from_path(Path::new("notes.md")), Some(DocumentKind::Md));
        assert_eq!(DocumentKind::from_path(Path::new("cv.pdf")), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_path(Path::new("deck.pptx")), None);
        assert_eq!(DocumentKind::from_path(Path::new("README")), None);
    }

    #[test]
    fn test_plaintext_falls_back_to_lossy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bio.txt");
        fs::write(&path, b"caf\xe9 coaching").unwrap();
        let text = extract_text(&path, DocumentKind::Txt).unwrap();
        assert!(text.starts_with("caf"));
        assert!(text.ends_with(" coaching"));
    }

    #[test]
    fn test_malformed_pdf_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"not really a pdf").unwrap();
        assert!(extract_text(&path, DocumentKind::Pdf).is_err());
    }

    #[test]
    fn test_store_and_remove_copy() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("approach.md");
        fs::write(&source, "# My approach").unwrap();

        let stored = store_copy(&dir.path().join("context-documents"), 7, &source).unwrap();
        assert!(stored.starts_with(dir.path().join("context-documents").join("7")));
        let file_name = stored.file_name().unwrap().to_str().unwrap();
        assert!(file_name.ends_with("-approach.md"));
        assert_eq!(fs::read_to_string(&stored).unwrap(), "# My approach");

        remove_copy(&stored).unwrap();
        assert!(!stored.exists());
        assert!(remove_copy(&stored).is_err());
    }

    #[test]
    fn test_combine_wraps_each_document() {
        let combined = combine(&[doc("bio.txt", "Coach bio"), doc("style.md", "Direct")]);
        assert_eq!(
            combined,
            "--- CONTEXT DOCUMENT: bio.txt ---\nCoach bio\n--- END: bio.txt ---\n\n\
             --- CONTEXT DOCUMENT: style.md ---\nDirect\n--- END: style.md ---"
        );
        assert_eq!(combine(&[]), "");
    }
}

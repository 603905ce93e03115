//! Loading a directory tree into documents.

use ragchain_core::Document;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Read every UTF-8 file under `root` into one document each.
///
/// Hidden entries are skipped and files that are not valid UTF-8 are logged
/// and ignored. Metadata `source` holds the path relative to `root`. Results
/// are sorted by path.
pub async fn load_directory(root: &Path) -> anyhow::Result<Vec<Document>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    let mut documents = Vec::with_capacity(files.len());
    for path in files {
        let bytes = tokio::fs::read(&path).await?;
        let Ok(text) = String::from_utf8(bytes) else {
            warn!(path = %path.display(), "Skipping non-UTF-8 file");
            continue;
        };
        if text.trim().is_empty() {
            continue;
        }
        let source = path.strip_prefix(root).unwrap_or(&path).display().to_string();
        let mut metadata = HashMap::new();
        metadata.insert("source".to_string(), json!(source));
        documents.push(Document::with_metadata(text, metadata));
    }

    debug!(root = %root.display(), count = documents.len(), "Loaded documents");
    Ok(documents)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

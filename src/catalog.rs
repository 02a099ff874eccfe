//! Sample image catalog: `{dataset_split: {clothing_category: [identifiers]}}`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{Result, SegError};

/// Split used by the demo page's sidebar.
pub const DEFAULT_SPLIT: &str = "test";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    splits: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl Catalog {
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| SegError::Catalog {
            message: format!("malformed catalog document: {}", e),
        })
    }

    /// Identifiers for a category of a split. The category is matched
    /// lowercased, so title-cased display names can be passed back in.
    pub fn available_images(&self, split: &str, category: &str) -> Option<&[String]> {
        self.splits
            .get(split)?
            .get(&category.to_lowercase())
            .map(Vec::as_slice)
    }

    /// Category names of a split, sorted and title cased for display.
    pub fn categories(&self, split: &str) -> Vec<String> {
        self.splits
            .get(split)
            .map(|types| types.keys().map(|k| title_case(k)).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, split: &str, category: &str, id: &str) -> bool {
        self.available_images(split, category)
            .is_some_and(|ids| ids.iter().any(|i| i == id))
    }
}

pub fn load_catalog(path: &Path) -> Result<Catalog> {
    let content = fs::read_to_string(path).map_err(|e| SegError::FileSystem {
        path: path.to_path_buf(),
        operation: "read catalog".to_string(),
        source: e,
    })?;
    Catalog::from_json(&content)
}

/// Process-wide cache of parsed catalogs keyed by path. Entries are never
/// invalidated; the documents are static for the process lifetime.
#[derive(Default)]
pub struct CatalogCache {
    entries: RwLock<HashMap<PathBuf, Arc<Catalog>>>,
}

impl CatalogCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(&self, path: &Path) -> Result<Arc<Catalog>> {
        if let Some(catalog) = self.entries.read().get(path) {
            return Ok(Arc::clone(catalog));
        }

        let mut entries = self.entries.write();
        // another caller may have loaded it between the two locks
        if let Some(catalog) = entries.get(path) {
            return Ok(Arc::clone(catalog));
        }
        let catalog = Arc::new(load_catalog(path)?);
        debug!(path = %path.display(), "catalog loaded");
        entries.insert(path.to_path_buf(), Arc::clone(&catalog));
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `"t-shirt"` -> `"T-Shirt"`, `"long sleeve"` -> `"Long Sleeve"`.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DOCUMENT: &str = r#"{
        "test": {"shirt": ["test/shirt/1.jpg", "test/shirt/2.jpg"], "dress": ["test/dress/7.jpg"], "t-shirt": []},
        "train": {"pants": ["train/pants/3.jpg"]}
    }"#;

    #[test]
    fn test_categories_sorted_and_title_cased() -> Result<()> {
        let catalog = Catalog::from_json(DOCUMENT)?;
        assert_eq!(catalog.categories("test"), vec!["Dress", "Shirt", "T-Shirt"]);
        assert!(catalog.categories("validation").is_empty());
        Ok(())
    }

    #[test]
    fn test_available_images_lowercases_category() -> Result<()> {
        let catalog = Catalog::from_json(DOCUMENT)?;
        assert_eq!(
            catalog.available_images("test", "Shirt"),
            Some(&["test/shirt/1.jpg".to_string(), "test/shirt/2.jpg".to_string()][..])
        );
        assert_eq!(catalog.available_images("test", "T-Shirt"), Some(&[][..]));
        assert_eq!(catalog.available_images("test", "pants"), None);
        assert_eq!(catalog.available_images("missing", "shirt"), None);
        assert!(catalog.contains("train", "Pants", "train/pants/3.jpg"));
        assert!(!catalog.contains("train", "pants", "train/pants/4.jpg"));
        Ok(())
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(
            Catalog::from_json(r#"{"test": ["flat"]}"#),
            Err(SegError::Catalog { .. })
        ));
    }

    #[test]
    fn test_cache_loads_once() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("all_image_files.json");
        fs::write(&path, DOCUMENT)?;

        let cache = CatalogCache::new();
        let first = cache.get_or_load(&path)?;
        // the cached copy survives the file disappearing
        fs::remove_file(&path)?;
        let second = cache.get_or_load(&path)?;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
        Ok(())
    }

    #[test]
    fn test_missing_file() {
        let cache = CatalogCache::new();
        assert!(matches!(
            cache.get_or_load(Path::new("/nonexistent/all_image_files.json")),
            Err(SegError::FileSystem { .. })
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("dress"), "Dress");
        assert_eq!(title_case("t-shirt"), "T-Shirt");
        assert_eq!(title_case("LONG sleeve"), "Long Sleeve");
        assert_eq!(title_case(""), "");
    }
}

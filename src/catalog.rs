use std::collections::{BTreeMap, HashMap};

use include_dir::{include_dir, Dir};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::models::StyleDefinition;

static STYLES_DIR: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/styles");

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid catalog file {file}: {source}")]
    Parse { file: String, source: serde_json::Error },
    #[error("duplicate style id '{0}'")]
    Duplicate(String),
    #[error("catalog file {0} is not valid UTF-8")]
    Encoding(String),
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    category: String,
    styles: Vec<StyleDefinition>,
}

/// Read-only registry of hairstyle prompts, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct StyleCatalog {
    styles: BTreeMap<String, StyleDefinition>,
}

impl StyleCatalog {
    /// Loads the catalog embedded in the binary.
    pub fn load_embedded() -> Result<Self, CatalogError> {
        let mut sources = Vec::new();
        for file in STYLES_DIR.files() {
            if file.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let name = file.path().display().to_string();
            let text = file.contents_utf8().ok_or_else(|| CatalogError::Encoding(name.clone()))?;
            sources.push((name, text));
        }
        // include_dir does not guarantee order
        sources.sort_by(|a, b| a.0.cmp(&b.0));
        let catalog = Self::from_sources(sources.iter().map(|(n, t)| (n.as_str(), *t)))?;
        info!("📚 Loaded style catalog with {} styles in {} categories", catalog.len(), catalog.categories().len());
        Ok(catalog)
    }

    pub fn from_sources<'a>(sources: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self, CatalogError> {
        let mut styles = BTreeMap::new();
        for (file, text) in sources {
            let parsed: CatalogFile = serde_json::from_str(text)
                .map_err(|source| CatalogError::Parse { file: file.to_string(), source })?;
            for mut style in parsed.styles {
                if style.category.is_empty() {
                    style.category = parsed.category.clone();
                }
                if styles.contains_key(&style.id) {
                    return Err(CatalogError::Duplicate(style.id));
                }
                styles.insert(style.id.clone(), style);
            }
        }
        Ok(Self { styles })
    }

    pub fn get(&self, id: &str) -> Option<&StyleDefinition> {
        self.styles.get(id)
    }

    pub fn len(&self) -> usize {
        self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }

    /// Style id to prompt text.
    pub fn prompts(&self) -> BTreeMap<&str, &str> {
        self.styles.iter().map(|(id, s)| (id.as_str(), s.prompt_text.as_str())).collect()
    }

    /// Category name to the ids of the styles it contains.
    pub fn categories(&self) -> HashMap<&str, Vec<&str>> {
        let mut out: HashMap<&str, Vec<&str>> = HashMap::new();
        for style in self.styles.values() {
            out.entry(style.category.as_str()).or_default().push(style.id.as_str());
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &StyleDefinition> {
        self.styles.values()
    }
}

//! Directory catalog of ruleset documents.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::Pattern;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::document::{DocumentId, RulesetDocument};
use super::loader::{load_with_format, DocumentFormat};
use crate::error::StructuralError;

const RULESET_PATTERNS: &[&str] = &["*.json", "*.yaml", "*.yml"];

/// A ruleset file found on disk. Only its metadata has been read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: DocumentId,
    pub name: String,
    pub path: PathBuf,
}

#[derive(Deserialize)]
struct Header {
    metadata: HeaderMetadata,
}

#[derive(Deserialize)]
struct HeaderMetadata {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: Value,
}

/// Ruleset files under a directory, keyed by `id@version`.
#[derive(Debug, Clone, Default)]
pub struct RulesetCatalog {
    root: PathBuf,
    entries: BTreeMap<DocumentId, CatalogEntry>,
}

impl RulesetCatalog {
    /// Walk `dir` and index every ruleset file in it.
    ///
    /// Files that cannot be read or lack usable metadata are skipped with a warning;
    /// full validation happens when a ruleset is loaded.
    pub fn scan(dir: impl AsRef<Path>) -> Result<Self> {
        let root = dir.as_ref().to_path_buf();
        if !root.is_dir() {
            anyhow::bail!("Ruleset directory does not exist: {}", root.display());
        }

        let patterns = RULESET_PATTERNS
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<Result<Vec<_>, _>>()
            .context("Invalid ruleset file pattern")?;

        let mut entries: BTreeMap<DocumentId, CatalogEntry> = BTreeMap::new();
        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable catalog entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy();
            if !patterns.iter().any(|p| p.matches(&file_name)) {
                continue;
            }

            let path = entry.path();
            match read_header(path) {
                Ok(found) => {
                    if let Some(existing) = entries.get(&found.id) {
                        warn!(
                            ruleset = %found.id,
                            kept = %existing.path.display(),
                            ignored = %path.display(),
                            "Duplicate ruleset id in catalog"
                        );
                        continue;
                    }
                    debug!(ruleset = %found.id, path = %path.display(), "Catalogued ruleset");
                    entries.insert(found.id.clone(), found);
                }
                Err(e) => warn!(path = %path.display(), "Skipping ruleset file: {:#}", e),
            }
        }

        Ok(Self { root, entries })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find an entry by `id@version`, or by bare id (highest version wins).
    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        if let Ok(full) = id.parse::<DocumentId>() {
            if let Some(entry) = self.entries.get(&full) {
                return Some(entry);
            }
        }
        self.entries
            .values()
            .filter(|entry| entry.id.name() == id)
            .max_by(|a, b| compare_versions(a.id.version(), b.id.version()))
    }

    /// Raw bytes of a catalogued ruleset.
    pub fn read_source(&self, id: &str) -> Result<(Vec<u8>, DocumentFormat)> {
        let entry = self
            .get(id)
            .with_context(|| format!("Ruleset '{}' is not in the catalog", id))?;
        let bytes = std::fs::read(&entry.path)
            .with_context(|| format!("Failed to read ruleset: {}", entry.path.display()))?;
        let format = DocumentFormat::for_path(&entry.path, &bytes);
        Ok((bytes, format))
    }
}

/// Order versions segment by segment, numerically where both segments are numbers.
///
/// `10` sorts after `9`, and `1.10` after `1.9`. Non-numeric segments compare as text.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(x), Some(y)) => {
                let ordering = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    (Ok(_), Err(_)) => Ordering::Greater,
                    (Err(_), Ok(_)) => Ordering::Less,
                    (Err(_), Err(_)) => x.cmp(y),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

/// Read and fully validate a ruleset file.
pub fn load_file(path: impl AsRef<Path>) -> Result<Result<RulesetDocument, Vec<StructuralError>>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read ruleset: {}", path.display()))?;
    let format = DocumentFormat::for_path(path, &bytes);
    Ok(load_with_format(&bytes, format))
}

fn read_header(path: &Path) -> Result<CatalogEntry> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read ruleset: {}", path.display()))?;

    let header: Header = match DocumentFormat::for_path(path, &bytes) {
        DocumentFormat::Json => serde_json::from_slice(&bytes).context("Invalid JSON")?,
        DocumentFormat::Yaml => serde_yaml::from_slice(&bytes).context("Invalid YAML")?,
    };

    let version = match header.metadata.version {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    };
    if header.metadata.id.is_empty() || version.is_empty() {
        anyhow::bail!("metadata is missing an id or version");
    }
    if header.metadata.id.contains('@') {
        anyhow::bail!("metadata id '{}' must not contain '@'", header.metadata.id);
    }

    Ok(CatalogEntry {
        id: DocumentId::new(&header.metadata.id, &version),
        name: header.metadata.name,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    fn json_rules(id: &str, version: &str) -> String {
        format!(
            r#"{{"metadata": {{"id": "{}", "name": "Rules {}", "version": "{}"}}, "functionsByPhase": {{}}}}"#,
            id, id, version
        )
    }

    #[test]
    fn test_scan_finds_json_and_yaml() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.json", &json_rules("alpha", "1.0"));
        std::fs::create_dir(temp.path().join("nested")).unwrap();
        write(
            &temp.path().join("nested"),
            "b.yml",
            "metadata:\n  id: beta\n  name: Beta\n  version: 3\n",
        );
        write(temp.path(), "notes.txt", "not a ruleset");

        let catalog = RulesetCatalog::scan(temp.path()).unwrap();
        let ids: Vec<_> = catalog.entries().map(|e| e.id.to_string()).collect();
        assert_eq!(ids, vec!["alpha@1.0", "beta@3"]);
        assert_eq!(catalog.get("beta").unwrap().name, "Beta");
    }

    #[test]
    fn test_scan_skips_broken_files() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "broken.json", "{ nope");
        write(temp.path(), "good.json", &json_rules("good", "1"));

        let catalog = RulesetCatalog::scan(temp.path()).unwrap();
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.json", &json_rules("same", "1"));
        write(temp.path(), "b.json", &json_rules("same", "1"));

        let catalog = RulesetCatalog::scan(temp.path()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("same@1").unwrap().path.ends_with("a.json"));
    }

    #[test]
    fn test_bare_id_picks_highest_version() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "v1.json", &json_rules("core", "1.0"));
        write(temp.path(), "v2.json", &json_rules("core", "2.0"));

        let catalog = RulesetCatalog::scan(temp.path()).unwrap();
        assert_eq!(catalog.get("core").unwrap().id.as_str(), "core@2.0");
        assert_eq!(catalog.get("core@1.0").unwrap().id.as_str(), "core@1.0");
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn test_bare_id_orders_versions_numerically() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "v9.json", &json_rules("core", "9"));
        write(temp.path(), "v10.json", &json_rules("core", "10"));
        write(temp.path(), "m9.json", &json_rules("mods", "1.9"));
        write(temp.path(), "m10.json", &json_rules("mods", "1.10"));

        let catalog = RulesetCatalog::scan(temp.path()).unwrap();
        assert_eq!(catalog.get("core").unwrap().id.as_str(), "core@10");
        assert_eq!(catalog.get("mods").unwrap().id.as_str(), "mods@1.10");
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("10", "9"), Ordering::Greater);
        assert_eq!(compare_versions("1.2", "1.2.1"), Ordering::Less);
        assert_eq!(compare_versions("2.0", "2.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.0-beta", "1.0-alpha"), Ordering::Greater);
    }

    #[test]
    fn test_id_with_at_sign_is_skipped() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "bad.json", &json_rules("core@evil", "1"));

        let catalog = RulesetCatalog::scan(temp.path()).unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_read_source() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.json", &json_rules("alpha", "1.0"));
        let catalog = RulesetCatalog::scan(temp.path()).unwrap();

        let (bytes, format) = catalog.read_source("alpha@1.0").unwrap();
        assert_eq!(format, DocumentFormat::Json);
        assert!(load_with_format(&bytes, format).is_ok());
        assert!(catalog.read_source("other").is_err());
    }

    #[test]
    fn test_missing_directory() {
        assert!(RulesetCatalog::scan("/definitely/not/here").is_err());
    }
}

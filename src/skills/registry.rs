//! Skill registry: discovers manifests under a root and serves them from an
//! atomically-swapped in-memory snapshot.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

use super::manifest::{parse_manifest_file, Manifest, ManifestError};

/// Fixed filename every skill manifest must use to be discovered.
pub const MANIFEST_FILENAME: &str = "SKILL_MANIFEST.md";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate skill name `{name}` found at both {first} and {second}")]
    DuplicateName {
        name: String,
        first: String,
        second: String,
    },
    #[error("failed to walk skills root {path}: {source}")]
    WalkFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("skill `{0}` not found in registry")]
    NotFound(String),
}

/// An immutable mapping of skill name to manifest, plus build metadata.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    pub root: PathBuf,
    pub built_at: DateTime<Utc>,
    manifests: BTreeMap<String, Manifest>,
}

impl RegistrySnapshot {
    pub fn get(&self, name: &str) -> Option<&Manifest> {
        self.manifests.get(name)
    }

    /// Stable, name-sorted iteration (the map is already ordered by name).
    pub fn list(&self) -> impl Iterator<Item = &Manifest> {
        self.manifests.values()
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    /// A compact textual catalog of executable manifests plus the
    /// descriptions of any related (documentation-only) manifests attached
    /// to them.
    pub fn summarize_for_prompt(&self) -> String {
        let mut lines = Vec::new();
        for manifest in self.manifests.values().filter(|m| m.executable) {
            lines.push(format!("{} — {}", manifest.name, manifest.description));
            for related_name in &manifest.related_tools {
                if let Some(related) = self.manifests.get(related_name) {
                    lines.push(format!(
                        "  via {}: {}",
                        related.name, related.description
                    ));
                }
            }
        }
        lines.join("\n")
    }
}

/// Recursively walk `root` for files named [`MANIFEST_FILENAME`], parsing
/// each into a manifest. Individual parse failures are logged and excluded
/// (non-fatal); a duplicate `name` across two files fails the whole build.
pub fn build(root: &Path) -> Result<RegistrySnapshot, RegistryError> {
    let mut manifests: BTreeMap<String, Manifest> = BTreeMap::new();
    let mut paths_by_name: BTreeMap<String, PathBuf> = BTreeMap::new();
    walk(root, &mut manifests, &mut paths_by_name)?;
    Ok(RegistrySnapshot {
        root: root.to_path_buf(),
        built_at: Utc::now(),
        manifests,
    })
}

fn walk(
    dir: &Path,
    manifests: &mut BTreeMap<String, Manifest>,
    paths_by_name: &mut BTreeMap<String, PathBuf>,
) -> Result<(), RegistryError> {
    if !dir.is_dir() {
        return Ok(());
    }
    let entries = std::fs::read_dir(dir).map_err(|e| RegistryError::WalkFailed {
        path: dir.display().to_string(),
        source: e,
    })?;

    for entry in entries.flatten() {
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(_) => continue,
        };
        if file_type.is_dir() {
            walk(&path, manifests, paths_by_name)?;
            continue;
        }
        if path.file_name().and_then(|n| n.to_str()) != Some(MANIFEST_FILENAME) {
            continue;
        }
        match parse_manifest_file(&path) {
            Ok(manifest) => {
                if let Some(existing) = paths_by_name.get(&manifest.name) {
                    return Err(RegistryError::DuplicateName {
                        name: manifest.name.clone(),
                        first: existing.display().to_string(),
                        second: path.display().to_string(),
                    });
                }
                paths_by_name.insert(manifest.name.clone(), path.clone());
                manifests.insert(manifest.name.clone(), manifest);
            }
            Err(err @ ManifestError::Io { .. }) => {
                warn!(path = %path.display(), error = %err, "failed to read manifest");
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping malformed manifest");
            }
        }
    }
    Ok(())
}

/// A single-writer, many-readers holder for the current registry snapshot.
/// Readers clone the `Arc` under a brief read lock and release it
/// immediately, so a concurrent `refresh()` never blocks an in-flight
/// request past the moment of the clone.
pub struct SkillRegistry {
    cell: RwLock<Arc<RegistrySnapshot>>,
}

impl SkillRegistry {
    pub fn build(root: &Path) -> Result<Self, RegistryError> {
        let snapshot = build(root)?;
        Ok(Self {
            cell: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Borrow the current snapshot for the lifetime of one request.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.cell.read().expect("registry lock poisoned").clone()
    }

    /// Rebuild from the same root and atomically replace the snapshot.
    /// On a build failure the prior snapshot is left in place.
    pub fn refresh(&self) -> Result<Arc<RegistrySnapshot>, RegistryError> {
        let root = self.snapshot().root.clone();
        let fresh = Arc::new(build(&root)?);
        *self.cell.write().expect("registry lock poisoned") = fresh.clone();
        Ok(fresh)
    }

    pub fn get(&self, name: &str) -> Result<Arc<RegistrySnapshot>, RegistryError> {
        let snapshot = self.snapshot();
        if snapshot.get(name).is_some() {
            Ok(snapshot)
        } else {
            Err(RegistryError::NotFound(name.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn write_manifest(dir: &Path, name: &str, content: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(MANIFEST_FILENAME), content).unwrap();
    }

    #[test]
    fn builds_empty_registry_for_empty_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let snapshot = build(tmp.path()).unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn discovers_nested_manifests() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            &tmp.path().join("websearch"),
            "websearch_service",
            "---\nname: websearch_service\ndescription: Search the web.\n---\nbody\n",
        );
        write_manifest(
            &tmp.path().join("nested").join("finance"),
            "finance",
            "---\nname: finance\ndescription: Finance lookups.\n---\nbody\n",
        );
        let snapshot = build(tmp.path()).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.get("websearch_service").is_some());
        assert!(snapshot.get("finance").is_some());
    }

    #[test]
    fn duplicate_name_fails_build() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            &tmp.path().join("a"),
            "dup",
            "---\nname: dup\ndescription: A.\n---\n",
        );
        write_manifest(
            &tmp.path().join("b"),
            "dup",
            "---\nname: dup\ndescription: B.\n---\n",
        );
        let err = build(tmp.path()).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName { .. }));
    }

    #[test]
    fn malformed_manifest_excluded_non_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            &tmp.path().join("good"),
            "good",
            "---\nname: good\ndescription: Good one.\n---\n",
        );
        write_manifest(&tmp.path().join("bad"), "bad", "not a manifest at all");
        let snapshot = build(tmp.path()).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get("good").is_some());
    }

    #[test]
    fn list_is_name_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            &tmp.path().join("z"),
            "zeta",
            "---\nname: zeta\ndescription: Z.\n---\n",
        );
        write_manifest(
            &tmp.path().join("a"),
            "alpha",
            "---\nname: alpha\ndescription: A.\n---\n",
        );
        let snapshot = build(tmp.path()).unwrap();
        let names: Vec<&str> = snapshot.list().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn summarize_includes_related_tools_inline() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            &tmp.path().join("finance"),
            "finance",
            "---\nname: finance\ndescription: Finance lookups.\nrelated_tools: finance_docs\n---\n",
        );
        write_manifest(
            &tmp.path().join("finance_docs"),
            "finance_docs",
            "---\nname: finance_docs\ndescription: Finance reference docs.\nexecutable: false\n---\n",
        );
        let snapshot = build(tmp.path()).unwrap();
        let catalog = snapshot.summarize_for_prompt();
        assert!(catalog.contains("finance — Finance lookups."));
        assert!(catalog.contains("via finance_docs: Finance reference docs."));
        // Non-executable manifests never appear as their own top-level entry.
        assert!(!catalog.contains("finance_docs — Finance reference docs."));
    }

    #[test]
    fn refresh_replaces_snapshot_atomically() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            &tmp.path().join("a"),
            "a",
            "---\nname: a\ndescription: A.\n---\n",
        );
        let registry = SkillRegistry::build(tmp.path()).unwrap();
        let before = registry.snapshot();
        assert_eq!(before.len(), 1);

        write_manifest(
            &tmp.path().join("b"),
            "b",
            "---\nname: b\ndescription: B.\n---\n",
        );
        registry.refresh().unwrap();
        let after = registry.snapshot();
        assert_eq!(after.len(), 2);
        // The reference captured before refresh still observes the old snapshot.
        assert_eq!(before.len(), 1);
    }
}

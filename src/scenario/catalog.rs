//! Scenario catalog
//!
//! The built-in table is always present. Preset files found under the
//! configured data path override built-ins of the same name and are either
//! parsed at creation or on first use.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use log::{debug, info, warn};
use walkdir::WalkDir;

use super::preset::{self, ScenarioPreset};
use crate::engine::config::EngineConfig;
use crate::error::{EngineError, Result};

/// Where a catalog entry comes from
#[derive(Debug)]
enum Source {
    Builtin(ScenarioPreset),
    File {
        path: PathBuf,
        parsed: OnceLock<ScenarioPreset>,
    },
}

#[derive(Debug)]
struct Entry {
    name: String,
    source: Source,
}

/// Name-indexed collection of scenario presets
///
/// Indices are stable for the life of the catalog, so the audio side can
/// refer to the active scenario by index.
#[derive(Debug)]
pub struct ScenarioCatalog {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl ScenarioCatalog {
    /// Catalog holding only the built-in presets
    pub fn builtin() -> Self {
        let mut catalog = Self {
            entries: Vec::new(),
            index: HashMap::new(),
        };
        for preset in preset::builtin_presets() {
            catalog.insert(preset.name.clone(), Source::Builtin(preset));
        }
        catalog
    }

    /// Build the catalog for `config`
    ///
    /// Fails with `LoadFailure` when the data path is not a directory, or
    /// when preloading is enabled and any preset file fails to parse.
    pub fn load(config: &EngineConfig) -> Result<Self> {
        let mut catalog = Self::builtin();
        let Some(dir) = config.data_dir() else {
            debug!("No data path configured, using {} built-in presets", catalog.len());
            return Ok(catalog);
        };
        if !dir.is_dir() {
            return Err(EngineError::load_failure(dir, "data path is not a directory"));
        }

        let mut found = 0;
        for file in discover(dir)? {
            let Some(name) = file.file_stem().and_then(|s| s.to_str()).map(str::to_string)
            else {
                warn!("Skipping preset with non UTF-8 name: {}", file.display());
                continue;
            };
            let parsed = OnceLock::new();
            if config.preload_all_presets {
                let preset = parse_file(&file, &name)?;
                let _ = parsed.set(preset);
            }
            if catalog.index.contains_key(&name) {
                debug!("Preset '{}' from {} overrides an earlier entry", name, file.display());
            }
            catalog.insert(name, Source::File { path: file, parsed });
            found += 1;
        }

        info!(
            "Scenario catalog ready: {} presets ({} from {})",
            catalog.len(),
            found,
            dir.display()
        );
        Ok(catalog)
    }

    fn insert(&mut self, name: String, source: Source) {
        match self.index.get(&name) {
            Some(&existing) => self.entries[existing].source = source,
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push(Entry { name, source });
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Preset names in catalog order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Name of the entry at `index`
    pub fn name(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|e| e.name.as_str())
    }

    /// Look up `name`, parsing its file on first use
    pub fn resolve(&self, name: &str) -> Result<(usize, &ScenarioPreset)> {
        let index = self
            .index_of(name)
            .ok_or_else(|| EngineError::UnknownScenario {
                name: name.to_string(),
            })?;
        Ok((index, self.preset_at(index)))
    }

    fn preset_at(&self, index: usize) -> &ScenarioPreset {
        let entry = &self.entries[index];
        match &entry.source {
            Source::Builtin(preset) => preset,
            Source::File { path, parsed } => parsed.get_or_init(|| {
                parse_file(path, &entry.name).unwrap_or_else(|err| {
                    warn!("{}; falling back", err);
                    preset::builtin(&entry.name).unwrap_or_else(|| {
                        ScenarioPreset::neutral(entry.name.clone())
                    })
                })
            }),
        }
    }
}

/// Every `*.json` file under `dir`, sorted for a stable override order
fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| EngineError::load_failure(dir, e))?;
        let path = entry.path();
        if entry.file_type().is_file()
            && path.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("json"))
        {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

fn parse_file(path: &Path, name: &str) -> Result<ScenarioPreset> {
    let text = std::fs::read_to_string(path).map_err(|e| EngineError::load_failure(path, e))?;
    let mut preset =
        ScenarioPreset::from_json_str(&text).map_err(|e| EngineError::load_failure(path, e))?;
    if preset.name.is_empty() || preset.name == preset::NEUTRAL_PRESET {
        preset.name = name.to_string();
    } else if preset.name != name {
        warn!(
            "Preset {} declares name '{}', using file name '{}'",
            path.display(),
            preset.name,
            name
        );
        preset.name = name.to_string();
    }
    debug!("Parsed preset '{}' from {}", name, path.display());
    Ok(preset)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::fs;
    use tempfile::TempDir;

    fn config_for(dir: &Path, preload: bool) -> EngineConfig {
        EngineConfig {
            data_path: Some(dir.to_path_buf()),
            preload_all_presets: preload,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_builtin_catalog() {
        let catalog = ScenarioCatalog::builtin();
        assert_eq!(catalog.len(), 17);
        assert_eq!(catalog.names()[0], "deep_sea");
        let (index, cave) = catalog.resolve("cave").unwrap();
        assert_eq!(catalog.name(index), Some("cave"));
        assert_relative_eq!(cave.defaults.room_size, 0.7);
    }

    #[test]
    fn test_unknown_scenario() {
        let catalog = ScenarioCatalog::builtin();
        let err = catalog.resolve("does_not_exist").unwrap_err();
        assert!(matches!(err, EngineError::UnknownScenario { .. }));
    }

    #[test]
    fn test_data_path_adds_and_overrides() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("hall.json"),
            r#"{ "defaults": { "room_size": 0.95 } }"#,
        )
        .unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(
            dir.path().join("nested").join("cave.json"),
            r#"{ "defaults": { "room_size": 0.1 } }"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let catalog = ScenarioCatalog::load(&config_for(dir.path(), false)).unwrap();
        assert_eq!(catalog.len(), 18);
        let (_, hall) = catalog.resolve("hall").unwrap();
        assert_eq!(hall.name, "hall");
        assert_relative_eq!(hall.defaults.room_size, 0.95);
        let (_, cave) = catalog.resolve("cave").unwrap();
        assert_relative_eq!(cave.defaults.room_size, 0.1);
    }

    #[test]
    fn test_missing_data_path_fails() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir.path().join("missing"), false);
        let err = ScenarioCatalog::load(&config).unwrap_err();
        assert!(matches!(err, EngineError::LoadFailure { .. }));
    }

    #[test]
    fn test_corrupt_preset_fatal_when_preloading() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.json"), "{ nope").unwrap();
        let err = ScenarioCatalog::load(&config_for(dir.path(), true)).unwrap_err();
        assert!(matches!(err, EngineError::LoadFailure { .. }));
    }

    #[test]
    fn test_corrupt_preset_falls_back_when_lazy() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.json"), "{ nope").unwrap();
        fs::write(
            dir.path().join("forest.json"),
            r#"{ "defaults": { "width": 9.0 } }"#,
        )
        .unwrap();
        let catalog = ScenarioCatalog::load(&config_for(dir.path(), false)).unwrap();

        let (_, broken) = catalog.resolve("broken").unwrap();
        assert_eq!(broken, &ScenarioPreset::neutral("broken"));

        let (_, forest) = catalog.resolve("forest").unwrap();
        assert_eq!(forest, &preset::builtin("forest").unwrap());
    }

    #[test]
    fn test_mismatched_name_uses_file_stem() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("booth.json"), r#"{ "name": "other" }"#).unwrap();
        let catalog = ScenarioCatalog::load(&config_for(dir.path(), true)).unwrap();
        assert!(catalog.index_of("other").is_none());
        assert_eq!(catalog.resolve("booth").unwrap().1.name, "booth");
    }
}

//! User settings from `config.toml`.
//!
//! Problems never stop startup: they are returned as warnings and the
//! affected settings fall back to their defaults.

use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAX_CONFIG_FILE_BYTES: u64 = 1_048_576; // 1 MiB

const DEFAULT_AUTOSAVE_MS: u64 = 500;
const DEFAULT_USER: &str = "local";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    autosave_ms: Option<u64>,
    max_undo: Option<usize>,
    data_dir: Option<PathBuf>,
    user: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub autosave: Duration,
    pub max_undo: usize,
    /// Where stored tables live; `None` keeps them in memory only
    pub data_dir: Option<PathBuf>,
    pub user: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            autosave: Duration::from_millis(DEFAULT_AUTOSAVE_MS),
            max_undo: rowsheet_core::history::DEFAULT_MAX_UNDO,
            data_dir: default_data_dir(),
            user: DEFAULT_USER.to_string(),
        }
    }
}

impl Settings {
    fn apply(&mut self, file: ConfigFile, warnings: &mut Vec<String>) {
        if let Some(ms) = file.autosave_ms {
            self.autosave = Duration::from_millis(ms);
        }
        if let Some(max_undo) = file.max_undo {
            self.max_undo = max_undo;
        }
        if let Some(dir) = file.data_dir {
            self.data_dir = Some(dir);
        }
        if let Some(user) = file.user {
            let user = user.trim();
            if user.is_empty() {
                warnings.push("Ignoring empty 'user' setting".to_string());
            } else {
                self.user = user.to_string();
            }
        }
    }
}

/// Load settings from `explicit` or the per-user config file.
pub fn load_settings(explicit: Option<&Path>) -> (Settings, Vec<String>) {
    let mut warnings = Vec::new();
    let mut settings = Settings::default();
    let path = explicit.map(Path::to_path_buf).or_else(user_config_path);

    let Some(path) = path else {
        return (settings, warnings);
    };
    if !path.exists() {
        if explicit.is_some() {
            warnings.push(format!("Config file not found: {}", path.display()));
        }
        return (settings, warnings);
    }

    match read_config(&path) {
        Ok(file) => settings.apply(file, &mut warnings),
        Err(warning) => warnings.push(warning),
    }
    (settings, warnings)
}

fn read_config(path: &Path) -> Result<ConfigFile, String> {
    let meta = std::fs::metadata(path)
        .map_err(|err| format!("Failed to read metadata for {}: {}", path.display(), err))?;
    if meta.len() > MAX_CONFIG_FILE_BYTES {
        return Err(format!(
            "Refusing to read {}: file too large ({} bytes, max {})",
            path.display(),
            meta.len(),
            MAX_CONFIG_FILE_BYTES
        ));
    }
    let content = std::fs::read_to_string(path)
        .map_err(|err| format!("Failed to read {}: {}", path.display(), err))?;
    toml::from_str::<ConfigFile>(&content)
        .map_err(|err| format!("Failed to parse {}: {}", path.display(), err))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "rowsheet")
}

fn user_config_path() -> Option<PathBuf> {
    let mut path = project_dirs()?.config_dir().to_path_buf();
    path.push("config.toml");
    Some(path)
}

fn default_data_dir() -> Option<PathBuf> {
    Some(project_dirs()?.data_dir().join("tables"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_reads_all_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "autosave_ms = 50\nmax_undo = 10\ndata_dir = \"/tmp/rs\"\nuser = \"ann\"\n",
        );
        let (settings, warnings) = load_settings(Some(&path));
        assert!(warnings.is_empty(), "{:?}", warnings);
        assert_eq!(settings.autosave, Duration::from_millis(50));
        assert_eq!(settings.max_undo, 10);
        assert_eq!(settings.data_dir, Some(PathBuf::from("/tmp/rs")));
        assert_eq!(settings.user, "ann");
    }

    #[test]
    fn test_unknown_key_falls_back_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "autosave_ms = 50\ncolour = \"red\"\n");
        let (settings, warnings) = load_settings(Some(&path));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("Failed to parse"));
        assert_eq!(settings.autosave, Duration::from_millis(DEFAULT_AUTOSAVE_MS));
    }

    #[test]
    fn test_missing_explicit_file_warns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let (settings, warnings) = load_settings(Some(&path));
        assert_eq!(warnings.len(), 1);
        assert_eq!(settings.user, DEFAULT_USER);
    }

    #[test]
    fn test_blank_user_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "user = \"  \"\n");
        let (settings, warnings) = load_settings(Some(&path));
        assert_eq!(warnings, vec!["Ignoring empty 'user' setting".to_string()]);
        assert_eq!(settings.user, DEFAULT_USER);
    }
}

use anyhow::Context;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Loads a JSON document, falling back to defaults when the file is absent.
///
/// A file that no longer parses is copied to `<name>.backup` before defaults are used.
pub fn load_or_default<T>(path: &Path) -> anyhow::Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let data =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    match serde_json::from_str(&data) {
        Ok(value) => Ok(value),
        Err(err) => {
            let backup = with_suffix(path, ".backup");
            fs::copy(path, &backup)
                .with_context(|| format!("back up corrupt file to {}", backup.display()))?;
            warn!(
                path = %path.display(),
                backup = %backup.display(),
                error = %err,
                "corrupt JSON file; using defaults"
            );
            Ok(T::default())
        }
    }
}

/// Writes `value` to a sibling temp file, then renames it over `path`.
pub fn save_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let data = serde_json::to_string_pretty(value).context("serialize JSON")?;
    let tmp = with_suffix(path, ".tmp");
    fs::write(&tmp, data).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

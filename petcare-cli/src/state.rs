use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// `$PETCARE_HOME`, or `~/.petcare`.
pub fn petcare_home() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("PETCARE_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".petcare"))
}

pub fn ensure_petcare_home() -> Result<PathBuf> {
    let dir = petcare_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

/// Root of the per-pet schedule mirror.
pub fn cache_dir() -> Result<PathBuf> {
    let dir = ensure_petcare_home()?.join("cache");
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

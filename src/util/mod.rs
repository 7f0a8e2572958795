use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

/// Makes `path` absolute against the working directory without requiring it to exist.
pub fn resolve_root(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path)
        .with_context(|| format!("failed to resolve storage root {}", path.display()))
}

pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

pub fn format_megabytes(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
}

pub fn tool_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use serde::Serialize;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncSeek};
use walkdir::WalkDir;

use crate::models::fixed_width_number;

const SAMPLE_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub name: String,
    pub is_dir: bool,
}

/// A regular file opened for streaming, with its length in bytes.
#[derive(Debug)]
pub struct OpenedFile<R> {
    pub reader: R,
    pub len: u64,
}

/// File access consumed by the aggregator, addressed relative to the store root.
///
/// Listing an absent directory yields no entries, and removing an absent tree
/// succeeds, so callers never have to special-case "not there yet".
pub trait DirectoryStore: Send + Sync {
    type Reader: AsyncRead + AsyncSeek + Send + Unpin + 'static;

    fn root(&self) -> &Path;

    fn probe_root(&self) -> impl Future<Output = io::Result<()>> + Send;

    /// Entries sorted by name.
    fn list_entries(&self, dir: &Path) -> impl Future<Output = io::Result<Vec<StoreEntry>>> + Send;

    fn stat_size(&self, file: &Path) -> impl Future<Output = io::Result<u64>> + Send;

    fn remove_tree(&self, dir: &Path) -> impl Future<Output = io::Result<()>> + Send;

    /// Anything that is not a regular file reports `NotFound`.
    fn open_file(
        &self,
        file: &Path,
    ) -> impl Future<Output = io::Result<OpenedFile<Self::Reader>>> + Send;
}

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, relative: &Path) -> io::Result<PathBuf> {
        if relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            Ok(self.root.join(relative))
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path escapes store root: {}", relative.display()),
            ))
        }
    }
}

impl DirectoryStore for FsStore {
    type Reader = fs::File;

    fn root(&self) -> &Path {
        &self.root
    }

    async fn probe_root(&self) -> io::Result<()> {
        fs::read_dir(&self.root).await.map(|_| ())
    }

    async fn list_entries(&self, dir: &Path) -> io::Result<Vec<StoreEntry>> {
        let path = self.resolve(dir)?;
        let mut reader = match fs::read_dir(&path).await {
            Ok(reader) => reader,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                tracing::debug!(path = %entry.path().display(), "skipping non UTF-8 entry");
                continue;
            };
            // metadata() follows symlinks, so linked day directories are walked too
            let is_dir = match fs::metadata(entry.path()).await {
                Ok(meta) => meta.is_dir(),
                Err(err) => {
                    tracing::debug!(path = %entry.path().display(), error = %err, "stat failed");
                    false
                }
            };
            entries.push(StoreEntry { name, is_dir });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn stat_size(&self, file: &Path) -> io::Result<u64> {
        let meta = fs::metadata(self.resolve(file)?).await?;
        Ok(meta.len())
    }

    async fn remove_tree(&self, dir: &Path) -> io::Result<()> {
        match fs::remove_dir_all(self.resolve(dir)?).await {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    async fn open_file(&self, file: &Path) -> io::Result<OpenedFile<fs::File>> {
        let reader = fs::File::open(self.resolve(file)?).await?;
        let meta = reader.metadata().await?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not a regular file: {}", file.display()),
            ));
        }
        Ok(OpenedFile {
            reader,
            len: meta.len(),
        })
    }
}

/// In-memory store with fault injection, for exercising the aggregator without disk I/O.
#[derive(Debug)]
pub struct MemoryStore {
    root: PathBuf,
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    dirs: BTreeSet<PathBuf>,
    files: BTreeMap<PathBuf, MemoryFile>,
    unreadable: BTreeSet<PathBuf>,
    unremovable: BTreeSet<PathBuf>,
    root_unavailable: bool,
}

#[derive(Debug)]
struct MemoryFile {
    contents: Vec<u8>,
    stat_fails: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("memory"),
            state: RwLock::new(MemoryState::default()),
        }
    }

    pub fn add_file(&self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) {
        let path = path.as_ref();
        let mut state = self.write();
        add_ancestors(&mut state.dirs, path);
        state.files.insert(
            path.to_path_buf(),
            MemoryFile {
                contents: contents.into(),
                stat_fails: false,
            },
        );
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut state = self.write();
        add_ancestors(&mut state.dirs, path);
        state.dirs.insert(path.to_path_buf());
    }

    pub fn fail_stat(&self, path: impl AsRef<Path>) {
        if let Some(file) = self.write().files.get_mut(path.as_ref()) {
            file.stat_fails = true;
        }
    }

    pub fn make_unreadable(&self, dir: impl AsRef<Path>) {
        self.write().unreadable.insert(dir.as_ref().to_path_buf());
    }

    pub fn make_unremovable(&self, dir: impl AsRef<Path>) {
        self.write().unremovable.insert(dir.as_ref().to_path_buf());
    }

    pub fn set_root_unavailable(&self, unavailable: bool) {
        self.write().root_unavailable = unavailable;
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        let state = self.read();
        let path = path.as_ref();
        state.files.contains_key(path) || state.dirs.contains(path)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn add_ancestors(dirs: &mut BTreeSet<PathBuf>, path: &Path) {
    for ancestor in path.ancestors().skip(1) {
        if !ancestor.as_os_str().is_empty() {
            dirs.insert(ancestor.to_path_buf());
        }
    }
}

fn denied(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::PermissionDenied,
        format!("permission denied: {}", path.display()),
    )
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no such file: {}", path.display()),
    )
}

impl DirectoryStore for MemoryStore {
    type Reader = io::Cursor<Vec<u8>>;

    fn root(&self) -> &Path {
        &self.root
    }

    async fn probe_root(&self) -> io::Result<()> {
        if self.read().root_unavailable {
            return Err(not_found(&self.root));
        }
        Ok(())
    }

    async fn list_entries(&self, dir: &Path) -> io::Result<Vec<StoreEntry>> {
        let state = self.read();
        if state.root_unavailable {
            return Err(not_found(&self.root));
        }
        if state.unreadable.contains(dir) {
            return Err(denied(dir));
        }
        let is_child = |path: &&PathBuf| path.parent() == Some(dir);
        let mut entries: Vec<StoreEntry> = state
            .dirs
            .iter()
            .filter(is_child)
            .map(|path| (path, true))
            .chain(state.files.keys().filter(is_child).map(|path| (path, false)))
            .filter_map(|(path, is_dir)| {
                let name = path.file_name()?.to_str()?.to_string();
                Some(StoreEntry { name, is_dir })
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn stat_size(&self, file: &Path) -> io::Result<u64> {
        match self.read().files.get(file) {
            Some(entry) if entry.stat_fails => Err(denied(file)),
            Some(entry) => Ok(entry.contents.len() as u64),
            None => Err(not_found(file)),
        }
    }

    async fn remove_tree(&self, dir: &Path) -> io::Result<()> {
        let mut state = self.write();
        if state.unremovable.contains(dir) {
            return Err(denied(dir));
        }
        state.dirs.retain(|path| !path.starts_with(dir));
        state.files.retain(|path, _| !path.starts_with(dir));
        Ok(())
    }

    async fn open_file(&self, file: &Path) -> io::Result<OpenedFile<io::Cursor<Vec<u8>>>> {
        let contents = self
            .read()
            .files
            .get(file)
            .map(|entry| entry.contents.clone())
            .ok_or_else(|| not_found(file))?;
        Ok(OpenedFile {
            len: contents.len() as u64,
            reader: io::Cursor::new(contents),
        })
    }
}

/// Snapshot of how the store root is laid out, for health and debugging output.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutProbe {
    pub root: String,
    pub exists: bool,
    pub readable: bool,
    pub year_directories: Vec<String>,
    pub month_directories: usize,
    pub day_directories: usize,
    pub files: usize,
    pub ignored_entries: usize,
    pub sample: Vec<String>,
    pub errors: Vec<String>,
}

pub fn probe_layout(root: &Path) -> LayoutProbe {
    let mut probe = LayoutProbe {
        root: root.display().to_string(),
        exists: root.is_dir(),
        ..LayoutProbe::default()
    };
    if let Err(err) = std::fs::read_dir(root) {
        probe.errors.push(format!("failed to read {}: {err}", root.display()));
        return probe;
    }
    probe.readable = true;

    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(4)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !entry.file_type().is_dir() || is_layout_dir(entry.depth(), entry.file_name().to_str())
        });
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                probe.errors.push(err.to_string());
                continue;
            }
        };
        let relative = entry
            .path()
            .strip_prefix(root)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        let is_dir = entry.file_type().is_dir();
        match (entry.depth(), is_dir) {
            (1, true) => probe.year_directories.push(relative.clone()),
            (2, true) => probe.month_directories += 1,
            (3, true) => probe.day_directories += 1,
            (4, false) => probe.files += 1,
            _ => {
                probe.ignored_entries += 1;
                continue;
            }
        }
        if probe.sample.len() < SAMPLE_LIMIT {
            probe.sample.push(relative);
        }
    }
    probe
}

fn is_layout_dir(depth: usize, name: Option<&str>) -> bool {
    let Some(name) = name else {
        return false;
    };
    match depth {
        0 => true,
        1 => fixed_width_number::<u16>(name, 4).is_some(),
        2 | 3 => fixed_width_number::<u8>(name, 2).is_some(),
        _ => false,
    }
}

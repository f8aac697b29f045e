//! File tree behind the in-memory server.
//!
//! Paths are stored normalized and relative to the root (`""` is `/`).
//! Failures are reported the way the real server reports them: filesystem
//! errors carry an errno, everything else is a typed service error.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};

use crate::constants::status::{EXPECTATION_FAILED, INTERNAL_SERVER_ERROR};

pub(crate) mod errno {
    pub const ENOENT: i32 = 2;
    pub const EAGAIN: i32 = 11;
    pub const EBUSY: i32 = 16;
    pub const EEXIST: i32 = 17;
    pub const ENOTDIR: i32 = 20;
    pub const EISDIR: i32 = 21;
    pub const EINVAL: i32 = 22;
    pub const EFBIG: i32 = 27;
    pub const ENOTEMPTY: i32 = 39;
}

fn strerror(code: i32) -> &'static str {
    match code {
        errno::ENOENT => "No such file or directory",
        errno::EAGAIN => "Resource temporarily unavailable",
        errno::EBUSY => "Device or resource busy",
        errno::EEXIST => "File exists",
        errno::ENOTDIR => "Not a directory",
        errno::EISDIR => "Is a directory",
        errno::EINVAL => "Invalid argument",
        errno::EFBIG => "File too large",
        errno::ENOTEMPTY => "Directory not empty",
        _ => "Unknown error",
    }
}

/// A failure as the server would report it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Failure {
    Os { errno: i32, filename: String },
    Service { error_type: &'static str, message: String },
}

impl Failure {
    pub fn os(errno: i32, path: &Path) -> Self {
        Failure::Os {
            errno,
            filename: display(path),
        }
    }

    pub fn service(error_type: &'static str, message: impl Into<String>) -> Self {
        Failure::Service {
            error_type,
            message: message.into(),
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            Failure::Os { .. } => EXPECTATION_FAILED,
            Failure::Service { .. } => INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON error body, `status` included.
    pub fn body(&self) -> Value {
        match self {
            Failure::Os { errno, filename } => json!({
                "status": self.status(),
                "errno": errno,
                "strerror": strerror(*errno),
                "filename": filename,
            }),
            Failure::Service {
                error_type,
                message,
            } => json!({
                "status": self.status(),
                "type": error_type,
                "message": message,
                "tracebacks": [],
            }),
        }
    }
}

pub(crate) type FsResult<T> = Result<T, Failure>;

#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, mtime: SystemTime },
    Directory { mtime: SystemTime },
}

impl Entry {
    fn directory() -> Self {
        Entry::Directory {
            mtime: SystemTime::now(),
        }
    }

    fn mtime(&self) -> SystemTime {
        match self {
            Entry::File { mtime, .. } | Entry::Directory { mtime } => *mtime,
        }
    }
}

/// Normalize a path: drop the leading `/`, resolve `.` and `..`.
pub(crate) fn normalize(path: &str) -> PathBuf {
    let mut result = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::ParentDir => {
                result.pop();
            }
            Component::Normal(s) => result.push(s),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    result
}

/// Absolute form of a normalized path, as reported to clients.
pub(crate) fn display(path: &Path) -> String {
    format!("/{}", path.display())
}

#[derive(Debug)]
pub(crate) struct Tree {
    entries: BTreeMap<PathBuf, Entry>,
}

impl Default for Tree {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        // Root directory always exists
        entries.insert(PathBuf::new(), Entry::directory());
        Self { entries }
    }
}

impl Tree {
    pub fn exists(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn is_file(&self, path: &Path) -> bool {
        matches!(self.entries.get(path), Some(Entry::File { .. }))
    }

    pub fn is_dir(&self, path: &Path) -> bool {
        matches!(self.entries.get(path), Some(Entry::Directory { .. }))
    }

    pub fn info(&self, path: &Path) -> FsResult<Value> {
        let entry = self
            .entries
            .get(path)
            .ok_or_else(|| Failure::os(errno::ENOENT, path))?;
        Ok(info_value(path, entry))
    }

    /// Direct children of a directory, or the entry itself for a file.
    pub fn ls(&self, path: &Path, detail: bool) -> FsResult<Value> {
        let listed: Vec<(&PathBuf, &Entry)> = match self.entries.get(path) {
            None => return Err(Failure::os(errno::ENOENT, path)),
            Some(Entry::File { .. }) => self.entries.get_key_value(path).into_iter().collect(),
            Some(Entry::Directory { .. }) => self.children(path).collect(),
        };
        Ok(Value::Array(
            listed
                .into_iter()
                .map(|(p, entry)| {
                    if detail {
                        info_value(p, entry)
                    } else {
                        Value::String(display(p))
                    }
                })
                .collect(),
        ))
    }

    pub fn mkdir(&mut self, path: &Path, create_parents: bool, exist_ok: bool) -> FsResult<()> {
        if let Some(existing) = self.entries.get(path) {
            return match existing {
                Entry::Directory { .. } if exist_ok => Ok(()),
                _ => Err(Failure::os(errno::EEXIST, path)),
            };
        }

        if create_parents {
            let mut current = PathBuf::new();
            for component in path.components() {
                current.push(component);
                match self.entries.get(&current) {
                    Some(Entry::Directory { .. }) => {}
                    Some(Entry::File { .. }) => return Err(Failure::os(errno::ENOTDIR, &current)),
                    None => {
                        self.entries.insert(current.clone(), Entry::directory());
                    }
                }
            }
            return Ok(());
        }

        self.require_parent(path)?;
        self.entries.insert(path.to_path_buf(), Entry::directory());
        Ok(())
    }

    pub fn rmdir(&mut self, path: &Path) -> FsResult<()> {
        if path.as_os_str().is_empty() {
            return Err(Failure::os(errno::EBUSY, path));
        }
        match self.entries.get(path) {
            Some(Entry::Directory { .. }) => {}
            Some(Entry::File { .. }) => return Err(Failure::os(errno::ENOTDIR, path)),
            None => return Err(Failure::os(errno::ENOENT, path)),
        }
        if self.children(path).next().is_some() {
            return Err(Failure::os(errno::ENOTEMPTY, path));
        }
        self.entries.remove(path);
        Ok(())
    }

    pub fn unlink(&mut self, path: &Path, missing_ok: bool) -> FsResult<()> {
        match self.entries.get(path) {
            Some(Entry::File { .. }) => {
                self.entries.remove(path);
                Ok(())
            }
            Some(Entry::Directory { .. }) => Err(Failure::os(errno::EISDIR, path)),
            None if missing_ok => Ok(()),
            None => Err(Failure::os(errno::ENOENT, path)),
        }
    }

    /// Copy a file. Without `metadata` the copy gets a fresh mtime.
    pub fn copy(&mut self, src: &Path, dst: &Path, metadata: bool) -> FsResult<()> {
        let (data, mtime) = match self.entries.get(src) {
            Some(Entry::File { data, mtime }) => (data.clone(), *mtime),
            Some(Entry::Directory { .. }) => return Err(Failure::os(errno::EISDIR, src)),
            None => return Err(Failure::os(errno::ENOENT, src)),
        };
        if self.is_dir(dst) {
            return Err(Failure::os(errno::EISDIR, dst));
        }
        self.require_parent(dst)?;
        let mtime = if metadata { mtime } else { SystemTime::now() };
        self.entries
            .insert(dst.to_path_buf(), Entry::File { data, mtime });
        Ok(())
    }

    /// Move a file or a whole directory subtree, replacing `dst`.
    pub fn rename(&mut self, src: &Path, dst: &Path) -> FsResult<()> {
        if src.as_os_str().is_empty() {
            return Err(Failure::os(errno::EBUSY, src));
        }
        let Some(entry) = self.entries.get(src) else {
            return Err(Failure::os(errno::ENOENT, src));
        };
        if src == dst {
            return Ok(());
        }
        if dst.starts_with(src) {
            return Err(Failure::os(errno::EINVAL, dst));
        }
        self.require_parent(dst)?;

        let src_is_dir = matches!(entry, Entry::Directory { .. });
        match self.entries.get(dst) {
            Some(Entry::Directory { .. }) if !src_is_dir => {
                return Err(Failure::os(errno::EISDIR, dst));
            }
            Some(Entry::File { .. }) if src_is_dir => {
                return Err(Failure::os(errno::ENOTDIR, dst));
            }
            Some(Entry::Directory { .. }) if self.children(dst).next().is_some() => {
                return Err(Failure::os(errno::ENOTEMPTY, dst));
            }
            _ => {}
        }

        // The subtree is contiguous in key order, starting at `src` itself.
        let moved: Vec<PathBuf> = self
            .entries
            .range(src.to_path_buf()..)
            .map(|(p, _)| p)
            .take_while(|p| p.starts_with(src))
            .cloned()
            .collect();
        for old in moved {
            if let Some(entry) = self.entries.remove(&old) {
                let new = match old.strip_prefix(src) {
                    Ok(relative) if !relative.as_os_str().is_empty() => dst.join(relative),
                    _ => dst.to_path_buf(),
                };
                self.entries.insert(new, entry);
            }
        }
        Ok(())
    }

    /// Create an empty file, or bump the mtime (and optionally truncate)
    /// of an existing one.
    pub fn touch(&mut self, path: &Path, truncate: bool) -> FsResult<()> {
        match self.entries.get_mut(path) {
            Some(Entry::File { data, mtime }) => {
                if truncate {
                    data.clear();
                }
                *mtime = SystemTime::now();
                Ok(())
            }
            Some(Entry::Directory { mtime }) => {
                *mtime = SystemTime::now();
                Ok(())
            }
            None => self.write_file(path, Vec::new()),
        }
    }

    pub fn read_file(&self, path: &Path) -> FsResult<Vec<u8>> {
        match self.entries.get(path) {
            Some(Entry::File { data, .. }) => Ok(data.clone()),
            Some(Entry::Directory { .. }) => Err(Failure::os(errno::EISDIR, path)),
            None => Err(Failure::os(errno::ENOENT, path)),
        }
    }

    /// Replace a file's contents, creating it if its parent exists.
    pub fn write_file(&mut self, path: &Path, data: Vec<u8>) -> FsResult<()> {
        if self.is_dir(path) {
            return Err(Failure::os(errno::EISDIR, path));
        }
        self.require_parent(path)?;
        self.entries.insert(
            path.to_path_buf(),
            Entry::File {
                data,
                mtime: SystemTime::now(),
            },
        );
        Ok(())
    }

    /// Fail unless the parent of `path` is an existing directory.
    pub fn require_parent(&self, path: &Path) -> FsResult<()> {
        let parent = path.parent().unwrap_or(Path::new(""));
        match self.entries.get(parent) {
            Some(Entry::Directory { .. }) => Ok(()),
            Some(Entry::File { .. }) => Err(Failure::os(errno::ENOTDIR, path)),
            None => Err(Failure::os(errno::ENOENT, path)),
        }
    }

    fn children<'a>(&'a self, dir: &'a Path) -> impl Iterator<Item = (&'a PathBuf, &'a Entry)> {
        self.entries
            .iter()
            .filter(move |(p, _)| p.parent() == Some(dir) && p.as_path() != dir)
    }
}

fn info_value(path: &Path, entry: &Entry) -> Value {
    let mtime = entry
        .mtime()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    let (kind, size) = match entry {
        Entry::File { data, .. } => ("file", data.len()),
        Entry::Directory { .. } => ("directory", 0),
    };
    json!({
        "name": display(path),
        "size": size,
        "type": kind,
        "mtime": mtime,
    })
}

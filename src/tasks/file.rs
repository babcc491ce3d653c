//! Files and directories on the node

use super::{host, io_error};
use reconcile::{Context, Delta, Lifecycle, LocalTarget, Renderers, Task, TaskError};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    #[default]
    File,
    Directory,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => f.write_str("file"),
            Self::Directory => f.write_str("directory"),
        }
    }
}

/// A file on the node, identified by its absolute path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub path: String,
    pub contents: Option<String>,
    /// Octal permission bits, e.g. "0644"
    pub mode: Option<String>,
    pub file_type: FileType,
    pub lifecycle: Lifecycle,
}

#[derive(Debug, Default, Serialize)]
pub struct FileChanges {
    pub contents: Option<String>,
    pub mode: Option<String>,
    #[serde(rename = "type")]
    pub file_type: Option<FileType>,
}

impl File {
    /// A regular file with contents and mode
    pub fn new(path: impl Into<String>, contents: impl Into<String>, mode: &str) -> Self {
        Self {
            path: path.into(),
            contents: Some(contents.into()),
            mode: Some(mode.to_string()),
            file_type: FileType::File,
            lifecycle: Lifecycle::Sync,
        }
    }
}

/// Canonical four-digit octal form of a mode string
fn normalize_mode(mode: &str) -> Result<String, TaskError> {
    let bits = u32::from_str_radix(mode, 8)
        .ok()
        .filter(|bits| *bits <= 0o7777)
        .ok_or_else(|| TaskError::Validation(format!("invalid file mode {mode:?}")))?;
    Ok(format!("{bits:04o}"))
}

#[cfg(unix)]
fn read_mode(metadata: &fs::Metadata) -> Option<String> {
    use std::os::unix::fs::PermissionsExt;
    Some(format!("{:04o}", metadata.permissions().mode() & 0o7777))
}

#[cfg(not(unix))]
fn read_mode(_metadata: &fs::Metadata) -> Option<String> {
    None
}

#[cfg(unix)]
fn write_mode(path: &std::path::Path, mode: &str) -> Result<(), TaskError> {
    use std::os::unix::fs::PermissionsExt;
    let bits = u32::from_str_radix(mode, 8)
        .map_err(|_| TaskError::Validation(format!("invalid file mode {mode:?}")))?;
    fs::set_permissions(path, fs::Permissions::from_mode(bits))
        .map_err(|e| io_error("setting mode on", path, &e))
}

#[cfg(not(unix))]
fn write_mode(_path: &std::path::Path, _mode: &str) -> Result<(), TaskError> {
    Ok(())
}

impl Task for File {
    const KIND: &'static str = "File";
    type Changes = FileChanges;

    fn name(&self) -> String {
        self.path.clone()
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn find(&mut self, ctx: &Context) -> Result<Option<Self>, TaskError> {
        let path = host(ctx)?.path(&self.path);
        let metadata = match fs::symlink_metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("inspecting", &path, &e)),
        };

        let (file_type, contents) = if metadata.is_dir() {
            (FileType::Directory, None)
        } else {
            let bytes = fs::read(&path).map_err(|e| io_error("reading", &path, &e))?;
            (FileType::File, Some(String::from_utf8_lossy(&bytes).into_owned()))
        };

        Ok(Some(Self {
            path: self.path.clone(),
            contents,
            mode: read_mode(&metadata),
            file_type,
            lifecycle: self.lifecycle,
        }))
    }

    fn normalize(&mut self, _ctx: &Context) -> Result<(), TaskError> {
        if !self.path.starts_with('/') {
            return Err(TaskError::Validation(format!(
                "file path {:?} must be absolute",
                self.path
            )));
        }
        if let Some(mode) = &self.mode {
            self.mode = Some(normalize_mode(mode)?);
        }
        Ok(())
    }

    fn changes(actual: Option<&Self>, expected: &Self) -> FileChanges {
        let d = Delta::new(actual, expected);
        FileChanges {
            contents: d.opt(|f| &f.contents),
            mode: d.opt(|f| &f.mode),
            file_type: d.exact(|f| &f.file_type),
        }
    }

    fn check_changes(
        actual: Option<&Self>,
        expected: &Self,
        changes: &FileChanges,
    ) -> Result<(), TaskError> {
        if let (Some(actual), Some(_)) = (actual, changes.file_type) {
            return Err(TaskError::cannot_change(
                "type",
                actual.file_type,
                expected.file_type,
            ));
        }
        Ok(())
    }

    fn renderers() -> Renderers<Self> {
        Renderers::new().local(render_local)
    }
}

fn render_local(
    _ctx: &Context,
    target: &LocalTarget,
    _actual: Option<&File>,
    expected: &mut File,
    changes: &FileChanges,
) -> Result<(), TaskError> {
    let path = target.path(&expected.path);

    match expected.file_type {
        FileType::Directory => {
            fs::create_dir_all(&path).map_err(|e| io_error("creating", &path, &e))?;
        }
        FileType::File => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| io_error("creating", parent, &e))?;
            }
            if changes.contents.is_some() || !path.exists() {
                let contents = expected.contents.as_deref().unwrap_or_default();
                fs::write(&path, contents).map_err(|e| io_error("writing", &path, &e))?;
            }
        }
    }

    if let Some(mode) = &expected.mode {
        write_mode(&path, mode)?;
    }
    Ok(())
}

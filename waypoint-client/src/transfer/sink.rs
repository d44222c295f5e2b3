use std::{
    fs, io,
    path::{Path, PathBuf},
};

use bytes::Bytes;

/// Where a finished download ends up. Called on the blocking pool.
pub trait DownloadSink: Send + Sync {
    fn save(&self, file_name: &str, data: Bytes) -> io::Result<PathBuf>;
}

/// Writes downloads into one directory, via a `.partial` file and a rename.
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn target_path(&self, file_name: &str) -> io::Result<PathBuf> {
        let name = Path::new(file_name)
            .file_name()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("not a usable file name: {file_name:?}"),
                )
            })?;
        Ok(self.root.join(name))
    }
}

impl DownloadSink for DirectorySink {
    fn save(&self, file_name: &str, data: Bytes) -> io::Result<PathBuf> {
        let target = self.target_path(file_name)?;
        fs::create_dir_all(&self.root)?;
        let partial = partial_path(&target);
        fs::write(&partial, &data)?;
        fs::rename(&partial, &target)?;
        Ok(target)
    }
}

fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::warn;

use crate::errors::{PromoGenError, Result};

/// Staged output directories for one run: raw generations, matted cutouts,
/// and composited finals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub model_dir: PathBuf,
    pub matted_dir: PathBuf,
    pub composed_dir: PathBuf,
}

impl Default for Workspace {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("output_model"),
            matted_dir: PathBuf::from("output_remover"),
            composed_dir: PathBuf::from("output_final"),
        }
    }
}

impl Workspace {
    /// The default stage layout rooted under `root` instead of the working
    /// directory.
    pub fn under(root: &Path) -> Self {
        Self {
            model_dir: root.join("output_model"),
            matted_dir: root.join("output_remover"),
            composed_dir: root.join("output_final"),
        }
    }

    /// Clear leftovers from previous runs and make sure every stage
    /// directory exists.
    pub fn reset(&self) -> Result<()> {
        for dir in [&self.model_dir, &self.matted_dir, &self.composed_dir] {
            clear_directory(dir)?;
            fs::create_dir_all(dir).map_err(|e| PromoGenError::FileSystem {
                path: dir.clone(),
                operation: "create output directory".to_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    pub fn model_path(&self, name: &str) -> PathBuf {
        self.model_dir.join(name)
    }

    pub fn matted_path(&self, name: &str) -> PathBuf {
        self.matted_dir.join(name)
    }

    pub fn composed_path(&self, name: &str) -> PathBuf {
        self.composed_dir.join(name)
    }
}

/// Stage filename for the `index`-th image of a run, starting at 1.
pub fn image_name(index: usize) -> String {
    format!("image_{index}.png")
}

/// Delete the direct children of `dir`, tolerating whatever gets in the way.
///
/// A missing directory is a no-op. Files and symlinks are unlinked, empty
/// subdirectories removed; anything that refuses is skipped with a warning
/// so a run never dies over stale output.
pub fn clear_directory(dir: &Path) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            warn!("not clearing {}: {e}", dir.display());
            return Ok(());
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("skipping unreadable entry in {}: {e}", dir.display());
                continue;
            }
        };
        let path = entry.path();
        // file_type() does not follow symlinks, so links count as files.
        let removal = match entry.file_type() {
            Ok(file_type) if file_type.is_dir() => fs::remove_dir(&path),
            Ok(_) => fs::remove_file(&path),
            Err(e) => Err(e),
        };
        if let Err(e) = removal {
            warn!("leaving {} in place: {e}", path.display());
        }
    }
    Ok(())
}

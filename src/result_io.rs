//! Run results on disk.
//!
//! [RunResult::save] writes to a `.tmp` sibling and renames it into place, so
//! a monitor polling the file never reads a half-written result.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::error::ResultIoError;
use crate::types::RunResult;

/// File name used when a result is written into an output directory.
pub const RESULT_FILENAME: &str = "run_result.json";

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ResultIoError + '_ {
  move |source| ResultIoError::Io {
    path: path.to_path_buf(),
    source,
  }
}

fn temp_path(path: &Path) -> PathBuf {
  let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
  name.push(".tmp");
  path.with_file_name(name)
}

impl RunResult {
  /// Writes the result as pretty JSON. Parent directories are created and an
  /// existing file is replaced in one rename.
  #[instrument(level = "trace", skip(self), fields(trans = %self.trans_name))]
  pub fn save(&self, path: &Path) -> Result<(), ResultIoError> {
    let json = serde_json::to_vec_pretty(self).map_err(|source| ResultIoError::Json {
      path: path.to_path_buf(),
      source,
    })?;
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let tmp = temp_path(path);
    fs::write(&tmp, json).map_err(io_error(&tmp))?;
    if let Err(e) = fs::rename(&tmp, path) {
      let _ = fs::remove_file(&tmp);
      return Err(io_error(path)(e));
    }
    debug!(path = %path.display(), "run result saved");
    Ok(())
  }

  /// Reads a result written by [RunResult::save].
  #[instrument(level = "trace")]
  pub fn load(path: &Path) -> Result<Self, ResultIoError> {
    let text = fs::read_to_string(path).map_err(io_error(path))?;
    serde_json::from_str(&text).map_err(|source| ResultIoError::Json {
      path: path.to_path_buf(),
      source,
    })
  }
}

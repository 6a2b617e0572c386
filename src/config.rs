//! Interpreter configuration: home directory and module search paths.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Python environment configuration, loaded from a JSON file.
///
/// An empty config is valid and means "use the interpreter the process was
/// linked against, with its default search path".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PythonConfig {
    /// Interpreter home directory (exported as PYTHONHOME before bring-up).
    pub python_home: Option<PathBuf>,
    /// Extra directories appended to `sys.path` after bring-up.
    pub python_paths: Vec<PathBuf>,
}

impl PythonConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Fill in `python_home` by probing well-known interpreter locations.
    ///
    /// Only the CLI front-end calls this; library callers get no implicit
    /// environment rewriting. Probes the usual conda environment location,
    /// then gives up and leaves the home unset.
    pub fn detect_python_home(mut self) -> Self {
        if self.python_home.is_some() {
            return self;
        }
        let Some(home_dir) = std::env::var_os("HOME") else {
            return self;
        };
        let home_dir = PathBuf::from(home_dir);
        let candidates = [
            home_dir.join(".conda/envs/py310"),
            home_dir.join("miniconda3"),
            home_dir.join("anaconda3"),
        ];
        for candidate in candidates {
            if candidate.is_dir() {
                tracing::debug!(path = %candidate.display(), "detected conda python home");
                self.python_home = Some(candidate);
                break;
            }
        }
        self
    }

    pub fn add_python_path(&mut self, path: PathBuf) {
        if !self.python_paths.contains(&path) {
            self.python_paths.push(path);
        }
    }
}

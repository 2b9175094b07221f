//! Load-time variable expansion for boards-file values.
//!
//! Only a closed set of names is recognised. `$ramfs_file` and `$version`
//! are runtime placeholders of the `update_ramfs` command and pass through
//! untouched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Names that are expanded later, when the initramfs command is rendered.
pub const DEFERRED_PLACEHOLDERS: &[&str] = &["ramfs_file", "version"];

/// Variable naming the boards directory.
pub const BOARDS_DIR_VAR: &str = "kdt_boards";

/// Variable naming the build root.
pub const BUILD_ROOT_VAR: &str = "kdt_build";

/// The values a boards file may reference.
#[derive(Debug, Clone)]
pub struct Variables {
    base_dir: PathBuf,
    home: Option<PathBuf>,
    values: BTreeMap<String, String>,
}

impl Variables {
    /// Variables rooted at `boards_dir`, which relative paths resolve against.
    pub fn new(boards_dir: &Path) -> Self {
        let mut values = BTreeMap::new();
        values.insert(
            BOARDS_DIR_VAR.to_string(),
            boards_dir.to_string_lossy().into_owned(),
        );
        Self {
            base_dir: boards_dir.to_path_buf(),
            home: None,
            values,
        }
    }

    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        if let Some(home) = &home {
            self.values
                .insert("HOME".to_string(), home.to_string_lossy().into_owned());
        }
        self.home = home;
        self
    }

    pub fn with_build_root(mut self, build_root: &Path) -> Self {
        self.values.insert(
            BUILD_ROOT_VAR.to_string(),
            build_root.to_string_lossy().into_owned(),
        );
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Expand `~`, `$name` and `${name}` in `raw`.
    ///
    /// Returns the offending variable name on an undefined reference.
    pub fn expand(&self, raw: &str) -> Result<String, String> {
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;

        if let Some(home) = &self.home {
            if rest == "~" || rest.starts_with("~/") {
                out.push_str(&home.to_string_lossy());
                rest = &rest[1..];
            }
        }

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];

            let (name, consumed, braced) = if let Some(inner) = after.strip_prefix('{') {
                match inner.find('}') {
                    Some(end) => (&inner[..end], end + 2, true),
                    None => return Err(inner.to_string()),
                }
            } else {
                let end = after
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(after.len());
                (&after[..end], end, false)
            };

            if name.is_empty() && !braced {
                out.push('$');
                rest = after;
                continue;
            }

            if DEFERRED_PLACEHOLDERS.contains(&name) {
                out.push('$');
                out.push_str(&after[..consumed]);
            } else {
                match self.values.get(name) {
                    Some(value) => out.push_str(value),
                    None => return Err(name.to_string()),
                }
            }
            rest = &after[consumed..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Make `path` absolute by joining it onto the boards directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.base_dir.join(candidate)
        }
    }
}

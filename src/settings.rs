//! User settings (`config.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::board::Variables;
use crate::error::ConfigError;
use crate::package::DEFAULT_PKGBASE;

pub const APP_DIR: &str = "kernel-packager";
pub const BOARDS_FILE: &str = "boards_config";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsToml {
    boards_dir: Option<PathBuf>,
    build_root: Option<PathBuf>,
    pkgbase: Option<String>,
    make: Option<String>,
    jobs: Option<usize>,
    timeout_secs: Option<u64>,
}

/// Resolved settings with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub boards_dir: PathBuf,
    pub build_root: PathBuf,
    pub pkgbase: String,
    pub make: String,
    pub jobs: Option<usize>,
    pub timeout: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_toml(SettingsToml::default())
    }
}

impl Settings {
    /// `<config_dir>/kernel-packager/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
    }

    /// Load `explicit`, or the default file if there is one.
    ///
    /// An explicitly named file must exist. A missing default file just
    /// means default settings.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::read(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::read(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let parsed: SettingsToml = toml::from_str(text).map_err(|source| ConfigError::Settings {
            path: origin.to_path_buf(),
            source,
        })?;
        log::debug!("loaded settings from {}", origin.display());
        Ok(Self::from_toml(parsed))
    }

    fn from_toml(raw: SettingsToml) -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let boards_dir = raw.boards_dir.unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| home.join(".local/share"))
                .join(APP_DIR)
                .join("boards")
        });
        Self {
            boards_dir,
            build_root: raw
                .build_root
                .unwrap_or_else(|| home.join(format!(".{APP_DIR}")).join("builds")),
            pkgbase: raw.pkgbase.unwrap_or_else(|| DEFAULT_PKGBASE.to_string()),
            make: raw.make.unwrap_or_else(|| "make".to_string()),
            jobs: raw.jobs.filter(|&j| j > 0),
            timeout: raw.timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn boards_file(&self) -> PathBuf {
        self.boards_dir.join(BOARDS_FILE)
    }

    /// Variables available to the boards file.
    pub fn variables(&self) -> Variables {
        self.variables_at(&self.boards_dir)
    }

    fn variables_at(&self, boards_dir: &Path) -> Variables {
        Variables::new(boards_dir)
            .with_home(dirs::home_dir())
            .with_build_root(&self.build_root)
    }

    /// The boards file to load and the variables it sees.
    ///
    /// An explicit file moves `$kdt_boards`, and the base for relative
    /// paths, to the directory containing it.
    pub fn boards_source(&self, explicit: Option<&Path>) -> (PathBuf, Variables) {
        match explicit {
            None => (self.boards_file(), self.variables()),
            Some(file) => {
                let dir = file
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or(Path::new("."));
                (file.to_path_buf(), self.variables_at(dir))
            }
        }
    }

    pub fn board_build_dir(&self, board: &str) -> PathBuf {
        self.build_root.join(board).join("kernel")
    }

    pub fn board_staging_dir(&self, board: &str) -> PathBuf {
        self.build_root.join(board).join("package")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn full_settings_file() {
        let text = r#"
boards_dir = "/srv/boards"
build_root = "/var/tmp/kbuild"
pkgbase = "linux-rk"
make = "gmake"
jobs = 12
timeout_secs = 3600
"#;
        let s = Settings::parse(text, Path::new("config.toml")).unwrap();
        assert_eq!(s.boards_file(), PathBuf::from("/srv/boards/boards_config"));
        assert_eq!(s.pkgbase, "linux-rk");
        assert_eq!(s.make, "gmake");
        assert_eq!(s.jobs, Some(12));
        assert_eq!(s.timeout, Some(Duration::from_secs(3600)));
        assert_eq!(
            s.board_staging_dir("rk3399_arm64"),
            PathBuf::from("/var/tmp/kbuild/rk3399_arm64/package")
        );
        assert_eq!(s.variables().get("kdt_build"), Some("/var/tmp/kbuild"));
    }

    #[test]
    fn empty_file_gives_defaults() {
        let s = Settings::parse("", Path::new("config.toml")).unwrap();
        assert_eq!(s.pkgbase, "linux-devel");
        assert_eq!(s.make, "make");
        assert_eq!(s.timeout, None);
        assert!(s.boards_dir.ends_with("kernel-packager/boards"));
    }

    #[test]
    fn explicit_boards_file_moves_the_boards_dir() {
        let s = Settings::parse("boards_dir = \"/srv/boards\"\n", Path::new("config.toml")).unwrap();

        let (file, vars) = s.boards_source(None);
        assert_eq!(file, PathBuf::from("/srv/boards/boards_config"));
        assert_eq!(vars.get("kdt_boards"), Some("/srv/boards"));

        let (file, vars) = s.boards_source(Some(Path::new("/work/lab/my_boards")));
        assert_eq!(file, PathBuf::from("/work/lab/my_boards"));
        assert_eq!(vars.get("kdt_boards"), Some("/work/lab"));
        assert_eq!(vars.resolve_path("rk3399/pkg"), PathBuf::from("/work/lab/rk3399/pkg"));

        let (_, vars) = s.boards_source(Some(Path::new("boards_config")));
        assert_eq!(vars.base_dir(), Path::new("."));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = Settings::parse("pkg_base = \"x\"\n", Path::new("config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Settings { .. }));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let err = Settings::load(Some(&temp.path().join("missing.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}

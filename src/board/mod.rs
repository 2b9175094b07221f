//! Board registry.
//!
//! The boards file holds one section per supported board:
//!
//! ```text
//! [rk3399_arm64]
//! cc = aarch64-linux-gnu-
//! cc_path = ~/toolchains/aarch64/bin
//! kernel_target = Image
//! kernel_file = Image-devel
//! config_file = $kdt_boards/rk3399/config
//! dtb_path = dtbs_devel
//! ramfs_file = initramfs-linux-devel.img
//! update_ramfs = mkinitcpio -k $version -g $ramfs_file
//! pkg_folder = $kdt_boards/rk3399/pkg
//! ```
//!
//! The registry is read once and never mutated afterwards.

mod parse;
pub mod vars;

use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::error::ConfigError;
use parse::{parse_sections, RawSection};
pub use vars::Variables;

/// Keys the registry understands. Anything else in a section is kept in
/// [`BoardConfig::entries`] but otherwise ignored.
pub const RECOGNIZED_KEYS: &[&str] = &[
    "cc",
    "cc_path",
    "kernel_target",
    "kernel_file",
    "config_file",
    "config_target",
    "dtb_path",
    "vendor",
    "overlay_path",
    "ramfs_file",
    "update_ramfs",
    "on",
    "off",
    "pkg_folder",
];

/// Target architecture, inferred from the section-name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    X86_64,
    X86,
    Arm64,
    Arm,
    Riscv,
}

impl Arch {
    // Longest suffixes first so `_x86_64` is not read as `_64`.
    const SUFFIXES: &'static [(&'static str, Arch)] = &[
        ("x86_64", Arch::X86_64),
        ("arm64", Arch::Arm64),
        ("riscv", Arch::Riscv),
        ("arm", Arch::Arm),
        ("x86", Arch::X86),
    ];

    pub fn from_section_name(name: &str) -> Option<Arch> {
        Self::SUFFIXES.iter().find_map(|(suffix, arch)| {
            name.strip_suffix(suffix)
                .filter(|board| board.ends_with('_') && board.len() > 1)
                .map(|_| *arch)
        })
    }

    /// Value passed as `ARCH=` to the kernel build.
    pub fn make_arch(self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::X86 => "x86",
            Arch::Arm64 => "arm64",
            Arch::Arm => "arm",
            Arch::Riscv => "riscv",
        }
    }

    /// Directory under `arch/` in the kernel tree.
    pub fn kernel_dir(self) -> &'static str {
        match self {
            Arch::X86_64 | Arch::X86 => "x86",
            other => other.make_arch(),
        }
    }

    pub fn is_x86(self) -> bool {
        matches!(self, Arch::X86_64 | Arch::X86)
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.make_arch())
    }
}

/// How the kernel is configured before building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelConfigSource<'a> {
    /// `make <target>`
    Target(&'a str),
    /// Copy the file to `.config`, then `make olddefconfig`.
    File(&'a Path),
}

/// One board section, with variables expanded and paths resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardConfig {
    pub name: String,
    pub cross_compiler_prefix: Option<String>,
    pub cross_compiler_path: Option<PathBuf>,
    pub kernel_target: String,
    pub kernel_file: String,
    pub config_file: Option<PathBuf>,
    pub config_target: Option<String>,
    pub dtb_path: Option<PathBuf>,
    pub vendor: Option<String>,
    pub overlay_path: Option<PathBuf>,
    pub ramfs_file: Option<String>,
    pub update_ramfs_command: Option<String>,
    pub on_command: Option<String>,
    pub off_command: Option<String>,
    pub pkg_folder: Option<PathBuf>,
    /// Line of the section header in the boards file.
    #[serde(skip)]
    line: usize,
    #[serde(skip)]
    entries: Vec<(String, String)>,
}

impl BoardConfig {
    fn from_section(section: &RawSection, vars: &Variables) -> Result<Self, ConfigError> {
        let name = section.name.clone();

        // Empty values count as unset.
        let get = |key: &str| -> Result<Option<String>, ConfigError> {
            match section.get(key).filter(|v| !v.is_empty()) {
                None => Ok(None),
                Some(raw) => vars
                    .expand(raw)
                    .map(Some)
                    .map_err(|variable| ConfigError::UndefinedVariable {
                        section: name.clone(),
                        key: key.to_string(),
                        line: section.line_of(key),
                        variable,
                    }),
            }
        };
        let required = |key: &str| -> Result<String, ConfigError> {
            get(key)?.ok_or_else(|| ConfigError::MissingKey {
                section: name.clone(),
                key: key.to_string(),
            })
        };
        let path = |key: &str| -> Result<Option<PathBuf>, ConfigError> {
            Ok(get(key)?.map(|p| vars.resolve_path(&p)))
        };
        let subdir = |key: &str| -> Result<Option<PathBuf>, ConfigError> {
            get(key)?
                .map(|raw| {
                    parse_relative_path(&raw).map_err(|message| ConfigError::InvalidValue {
                        section: name.clone(),
                        key: key.to_string(),
                        line: section.line_of(key),
                        message,
                    })
                })
                .transpose()
        };

        let config = BoardConfig {
            cross_compiler_prefix: get("cc")?,
            cross_compiler_path: path("cc_path")?,
            kernel_target: required("kernel_target")?,
            kernel_file: required("kernel_file")?,
            config_file: path("config_file")?,
            config_target: get("config_target")?,
            dtb_path: subdir("dtb_path")?,
            vendor: get("vendor")?,
            overlay_path: subdir("overlay_path")?,
            ramfs_file: get("ramfs_file")?,
            update_ramfs_command: get("update_ramfs")?,
            on_command: get("on")?,
            off_command: get("off")?,
            pkg_folder: path("pkg_folder")?,
            line: section.line,
            entries: section
                .entries
                .iter()
                .map(|e| (e.key.clone(), e.value.clone()))
                .collect(),
            name,
        };

        if config.config_file.is_some() && config.config_target.is_some() {
            return Err(ConfigError::InvalidValue {
                section: config.name,
                key: "config_target".to_string(),
                line: section.line_of("config_target"),
                message: "more than one kernel config is set (config_file and config_target)"
                    .to_string(),
            });
        }
        if config.ramfs_file.is_some() && config.update_ramfs_command.is_none() {
            return Err(ConfigError::MissingKey {
                section: config.name,
                key: "update_ramfs".to_string(),
            });
        }

        for key in config.unknown_keys() {
            log::warn!(
                "{}: ignoring unknown key '{key}' in [{}]",
                section.line_of(key),
                config.name
            );
        }

        Ok(config)
    }

    /// Line of the section header in the boards file.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Keys present in the section that the registry does not use.
    pub fn unknown_keys(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .map(|(key, _)| key.as_str())
            .filter(|key| !RECOGNIZED_KEYS.contains(key))
    }

    /// Architecture inferred from the section name, e.g. `rk3399_arm64`.
    pub fn arch(&self) -> Option<Arch> {
        Arch::from_section_name(&self.name)
    }

    pub fn config_source(&self) -> Option<KernelConfigSource<'_>> {
        if let Some(target) = &self.config_target {
            return Some(KernelConfigSource::Target(target.as_str()));
        }
        self.config_file.as_deref().map(KernelConfigSource::File)
    }

    /// Whether the build must produce device trees.
    pub fn wants_dtbs(&self) -> bool {
        self.dtb_path.is_some() || self.vendor.is_some() || self.overlay_path.is_some()
    }

    /// Raw `key = value` pairs in file order, unknown keys included.
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    /// The initramfs command with its runtime placeholders filled in.
    pub fn render_update_ramfs(&self, kernel_release: &str) -> Option<String> {
        let command = self.update_ramfs_command.as_deref()?;
        let ramfs_file = self.ramfs_file.as_deref()?;
        Some(
            command
                .replace("${ramfs_file}", &format!("/boot/{ramfs_file}"))
                .replace("$ramfs_file", &format!("/boot/{ramfs_file}"))
                .replace("${version}", kernel_release)
                .replace("$version", kernel_release),
        )
    }
}

/// Parsed boards file.
#[derive(Debug, Clone)]
pub struct Registry {
    path: PathBuf,
    boards: Vec<BoardConfig>,
}

impl Registry {
    /// Read and parse the boards file at `path`.
    pub fn load(path: &Path, vars: &Variables) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path, vars)
    }

    pub fn parse(text: &str, origin: &Path, vars: &Variables) -> Result<Self, ConfigError> {
        let boards = parse_sections(text, origin)?
            .iter()
            .map(|section| BoardConfig::from_section(section, vars))
            .collect::<Result<Vec<_>, _>>()?;
        log::debug!(
            "loaded {} board(s) from {}",
            boards.len(),
            origin.display()
        );
        Ok(Self {
            path: origin.to_path_buf(),
            boards,
        })
    }

    /// Exact, case-sensitive lookup by section name.
    pub fn lookup(&self, name: &str) -> Result<&BoardConfig, ConfigError> {
        self.boards
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| ConfigError::UnknownBoard {
                name: name.to_string(),
                available: self.names().map(str::to_string).collect(),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.boards.iter().map(|b| b.name.as_str())
    }

    pub fn boards(&self) -> &[BoardConfig] {
        &self.boards
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_relative_path(raw: &str) -> Result<PathBuf, String> {
    let candidate = Path::new(raw);
    if candidate.is_absolute() {
        return Err(format!("must be relative to boot/, got absolute path '{raw}'"));
    }
    for component in candidate.components() {
        if matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        ) {
            return Err(format!("contains invalid traversal/root component in '{raw}'"));
        }
    }
    Ok(candidate.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOARDS: &str = "\
# Development boards
[rk3399_arm64]
cc = aarch64-linux-gnu-
cc_path = /opt/cross/bin
kernel_target = Image
kernel_file = Image-devel
config_file = $kdt_boards/rk3399/config
dtb_path = dtbs_devel
ramfs_file = initramfs-linux-devel.img
update_ramfs = mkinitcpio -k $version -g $ramfs_file
on = relay 1 on
off = relay 1 off
pkg_folder = rk3399/pkg
colour = blue

[rpi4_arm]
cc = arm-linux-gnueabihf-
kernel_target = zImage
kernel_file = kernel7l.img
config_target = bcm2711_defconfig
vendor = broadcom
overlay_path = overlays
";

    fn vars() -> Variables {
        Variables::new(Path::new("/srv/boards")).with_home(Some(PathBuf::from("/home/dev")))
    }

    fn registry() -> Registry {
        Registry::parse(BOARDS, Path::new("/srv/boards/boards_config"), &vars()).unwrap()
    }

    #[test]
    fn fields_match_source_pairs() {
        let reg = registry();
        let board = reg.lookup("rk3399_arm64").unwrap();
        assert_eq!(board.cross_compiler_prefix.as_deref(), Some("aarch64-linux-gnu-"));
        assert_eq!(board.cross_compiler_path, Some(PathBuf::from("/opt/cross/bin")));
        assert_eq!(board.kernel_target, "Image");
        assert_eq!(board.kernel_file, "Image-devel");
        assert_eq!(
            board.config_file,
            Some(PathBuf::from("/srv/boards/rk3399/config"))
        );
        assert_eq!(board.config_target, None);
        assert_eq!(board.dtb_path, Some(PathBuf::from("dtbs_devel")));
        assert_eq!(board.vendor, None);
        assert_eq!(board.ramfs_file.as_deref(), Some("initramfs-linux-devel.img"));
        assert_eq!(
            board.update_ramfs_command.as_deref(),
            Some("mkinitcpio -k $version -g $ramfs_file")
        );
        assert_eq!(board.on_command.as_deref(), Some("relay 1 on"));
        assert_eq!(board.off_command.as_deref(), Some("relay 1 off"));
        assert_eq!(board.pkg_folder, Some(PathBuf::from("/srv/boards/rk3399/pkg")));
        assert_eq!(board.arch(), Some(Arch::Arm64));

        let rpi = reg.lookup("rpi4_arm").unwrap();
        assert_eq!(rpi.vendor.as_deref(), Some("broadcom"));
        assert_eq!(rpi.overlay_path, Some(PathBuf::from("overlays")));
        assert_eq!(rpi.arch(), Some(Arch::Arm));
        assert_eq!(
            rpi.config_source(),
            Some(KernelConfigSource::Target("bcm2711_defconfig"))
        );
    }

    #[test]
    fn names_keep_file_order() {
        let reg = registry();
        assert_eq!(reg.names().collect::<Vec<_>>(), ["rk3399_arm64", "rpi4_arm"]);
    }

    #[test]
    fn unknown_keys_are_kept_raw_but_ignored() {
        let reg = registry();
        let board = reg.lookup("rk3399_arm64").unwrap();
        assert!(board
            .entries()
            .iter()
            .any(|(k, v)| k == "colour" && v == "blue"));
        assert_eq!(board.unknown_keys().collect::<Vec<_>>(), ["colour"]);
        assert_eq!(reg.lookup("rpi4_arm").unwrap().unknown_keys().count(), 0);
    }

    #[test]
    fn lookup_is_exact_and_never_defaults() {
        let reg = registry();
        for name in ["RK3399_arm64", "rk3399", "", "rk3399_arm64 "] {
            match reg.lookup(name) {
                Err(ConfigError::UnknownBoard { available, .. }) => {
                    assert_eq!(available, ["rk3399_arm64", "rpi4_arm"]);
                }
                other => panic!("expected UnknownBoard for {name:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn duplicate_sections_fail_load() {
        let text = format!("{BOARDS}\n[rpi4_arm]\nkernel_target = zImage\nkernel_file = k\n");
        let err = Registry::parse(&text, Path::new("boards_config"), &vars()).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateSection { .. }));
    }

    #[test]
    fn undefined_variable_names_key_and_section() {
        let text = "[b_arm64]\nkernel_target = Image\nkernel_file = $nowhere/Image\n";
        let err = Registry::parse(text, Path::new("boards_config"), &vars()).unwrap_err();
        match err {
            ConfigError::UndefinedVariable {
                section,
                key,
                line,
                variable,
            } => {
                assert_eq!(section, "b_arm64");
                assert_eq!(key, "kernel_file");
                assert_eq!(line, 3);
                assert_eq!(variable, "nowhere");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_mandatory_key_fails() {
        let text = "[b_arm64]\nkernel_target = Image\n";
        let err = Registry::parse(text, Path::new("boards_config"), &vars()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey { ref key, .. } if key == "kernel_file"));
    }

    #[test]
    fn ramfs_file_requires_update_command() {
        let text = "[b_arm64]\nkernel_target = Image\nkernel_file = I\nramfs_file = init.img\n";
        let err = Registry::parse(text, Path::new("boards_config"), &vars()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey { ref key, .. } if key == "update_ramfs"));
    }

    #[test]
    fn both_config_kinds_conflict() {
        let text = "[b_arm64]\nkernel_target = Image\nkernel_file = I\n\
                    config_file = /c\nconfig_target = defconfig\n";
        let err = Registry::parse(text, Path::new("boards_config"), &vars()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn dtb_path_must_stay_under_boot() {
        for bad in ["../dtbs", "/boot/dtbs"] {
            let text = format!("[b_arm64]\nkernel_target = Image\nkernel_file = I\ndtb_path = {bad}\n");
            let err = Registry::parse(&text, Path::new("boards_config"), &vars()).unwrap_err();
            assert!(matches!(
                err,
                ConfigError::InvalidValue { ref key, line: 4, .. } if key == "dtb_path"
            ));
        }
    }

    #[test]
    fn empty_value_counts_as_absent() {
        let text = "[b_arm64]\nkernel_target = Image\nkernel_file = I\ndtb_path =\n";
        let reg = Registry::parse(text, Path::new("boards_config"), &vars()).unwrap();
        let board = reg.lookup("b_arm64").unwrap();
        assert_eq!(board.dtb_path, None);
        assert!(!board.wants_dtbs());
    }

    #[test]
    fn arch_inference() {
        assert_eq!(Arch::from_section_name("pc_x86_64"), Some(Arch::X86_64));
        assert_eq!(Arch::from_section_name("old_x86"), Some(Arch::X86));
        assert_eq!(Arch::from_section_name("visionfive_riscv"), Some(Arch::Riscv));
        assert_eq!(Arch::from_section_name("rock5_arm64"), Some(Arch::Arm64));
        assert_eq!(Arch::from_section_name("arm64"), None);
        assert_eq!(Arch::from_section_name("rpi4"), None);
        assert_eq!(Arch::X86_64.kernel_dir(), "x86");
        assert_eq!(Arch::Arm64.kernel_dir(), "arm64");
    }

    #[test]
    fn update_ramfs_is_rendered() {
        let reg = registry();
        let board = reg.lookup("rk3399_arm64").unwrap();
        assert_eq!(
            board.render_update_ramfs("5.10.0-devel").as_deref(),
            Some("mkinitcpio -k 5.10.0-devel -g /boot/initramfs-linux-devel.img")
        );
        assert_eq!(reg.lookup("rpi4_arm").unwrap().render_update_ramfs("x"), None);
    }
}

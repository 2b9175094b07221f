//! mkinitcpio preset and pacman hook templates.
//!
//! Substitution is literal: `%PKGBASE%` and `%KERNVER%` are replaced, and
//! the 90 hook additionally has the whole word `linux` rewritten to the
//! package base name.

use std::path::{Path, PathBuf};

pub const PKGBASE_TOKEN: &str = "%PKGBASE%";
pub const KERNVER_TOKEN: &str = "%KERNVER%";

/// Word in the 90 hook that names the stock kernel package.
pub const HOOK_MARKER_WORD: &str = "linux";

/// One template shipped in the board's package folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Template {
    pub source: &'static str,
    dest_dir: &'static str,
    dest_prefix: &'static str,
    dest_suffix: &'static str,
    qualify_marker: bool,
}

pub const TEMPLATES: [Template; 3] = [
    Template {
        source: "linux.preset",
        dest_dir: "etc/mkinitcpio.d",
        dest_prefix: "",
        dest_suffix: ".preset",
        qualify_marker: false,
    },
    Template {
        source: "60-linux.hook",
        dest_dir: "usr/share/libalpm/hooks",
        dest_prefix: "60-",
        dest_suffix: ".hook",
        qualify_marker: false,
    },
    Template {
        source: "90-linux.hook",
        dest_dir: "usr/share/libalpm/hooks",
        dest_prefix: "90-",
        dest_suffix: ".hook",
        qualify_marker: true,
    },
];

impl Template {
    pub fn source_path(&self, pkg_folder: &Path) -> PathBuf {
        pkg_folder.join(self.source)
    }

    /// Destination relative to the staging root.
    pub fn destination(&self, pkgbase: &str) -> PathBuf {
        Path::new(self.dest_dir).join(format!(
            "{}{}{}",
            self.dest_prefix, pkgbase, self.dest_suffix
        ))
    }

    pub fn render(&self, text: &str, pkgbase: &str, kernel_release: &str) -> String {
        let text = if self.qualify_marker {
            replace_word(text, HOOK_MARKER_WORD, pkgbase)
        } else {
            text.to_string()
        };
        substitute(&text, pkgbase, kernel_release)
    }
}

/// Replace every `%PKGBASE%` and `%KERNVER%`.
pub fn substitute(text: &str, pkgbase: &str, kernel_release: &str) -> String {
    text.replace(PKGBASE_TOKEN, pkgbase)
        .replace(KERNVER_TOKEN, kernel_release)
}

/// Replace `word` where it is not part of a longer identifier.
fn replace_word(text: &str, word: &str, replacement: &str) -> String {
    let is_word_char = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find(word) {
        let before = rest[..pos].chars().next_back();
        let after = rest[pos + word.len()..].chars().next();
        let standalone = !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char);

        out.push_str(&rest[..pos]);
        out.push_str(if standalone { replacement } else { word });
        rest = &rest[pos + word.len()..];
    }
    out.push_str(rest);
    out
}

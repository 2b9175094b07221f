//! Sectioned `key = value` reader for the boards file.

use std::path::Path;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawEntry {
    pub(crate) key: String,
    pub(crate) value: String,
    pub(crate) line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawSection {
    pub(crate) name: String,
    pub(crate) line: usize,
    pub(crate) entries: Vec<RawEntry>,
}

impl RawSection {
    pub(crate) fn entry(&self, key: &str) -> Option<&RawEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    pub(crate) fn get(&self, key: &str) -> Option<&str> {
        self.entry(key).map(|e| e.value.as_str())
    }

    /// Line of `key`, or of the section header when the key is absent.
    pub(crate) fn line_of(&self, key: &str) -> usize {
        self.entry(key).map_or(self.line, |e| e.line)
    }
}

/// Split `text` into sections in file order.
///
/// Rejects duplicate section names and duplicate keys within a section.
pub(crate) fn parse_sections(text: &str, origin: &Path) -> Result<Vec<RawSection>, ConfigError> {
    let mut sections: Vec<RawSection> = Vec::new();

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(header) = line.strip_prefix('[') {
            let name = header
                .strip_suffix(']')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .ok_or_else(|| ConfigError::Syntax {
                    path: origin.to_path_buf(),
                    line: line_no,
                    message: format!("malformed section header '{line}'"),
                })?;

            if sections.iter().any(|s| s.name == name) {
                return Err(ConfigError::DuplicateSection {
                    path: origin.to_path_buf(),
                    line: line_no,
                    name: name.to_string(),
                });
            }
            sections.push(RawSection {
                name: name.to_string(),
                line: line_no,
                entries: Vec::new(),
            });
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError::Syntax {
                path: origin.to_path_buf(),
                line: line_no,
                message: format!("expected 'key = value', got '{line}'"),
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::Syntax {
                path: origin.to_path_buf(),
                line: line_no,
                message: "empty key".to_string(),
            });
        }

        let Some(section) = sections.last_mut() else {
            return Err(ConfigError::Syntax {
                path: origin.to_path_buf(),
                line: line_no,
                message: format!("key '{key}' appears before any [section]"),
            });
        };
        if section.entries.iter().any(|e| e.key == key) {
            return Err(ConfigError::DuplicateKey {
                path: origin.to_path_buf(),
                line: line_no,
                section: section.name.clone(),
                key: key.to_string(),
            });
        }
        section.entries.push(RawEntry {
            key: key.to_string(),
            value: value.trim().to_string(),
            line: line_no,
        });
    }

    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Vec<RawSection>, ConfigError> {
        parse_sections(text, Path::new("boards_config"))
    }

    #[test]
    fn sections_keep_file_order() {
        let sections = parse(
            "# boards\n[rpi4_arm64]\nkernel_target = Image\n\n[rk3399_arm64]\nkernel_file=Image-devel\n",
        )
        .unwrap();
        let names: Vec<_> = sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["rpi4_arm64", "rk3399_arm64"]);
        assert_eq!(sections[0].get("kernel_target"), Some("Image"));
        assert_eq!(sections[1].get("kernel_file"), Some("Image-devel"));
        assert_eq!(sections[1].line, 5);
        assert_eq!(sections[1].line_of("kernel_file"), 6);
        assert_eq!(sections[1].line_of("cc"), 5);
    }

    #[test]
    fn value_may_contain_equals() {
        let sections = parse("[b_arm]\non = relay --set=1\n").unwrap();
        assert_eq!(sections[0].get("on"), Some("relay --set=1"));
    }

    #[test]
    fn duplicate_section_is_rejected() {
        let err = parse("[b_arm]\nkernel_target = zImage\n[b_arm]\n").unwrap_err();
        match err {
            ConfigError::DuplicateSection { line, name, .. } => {
                assert_eq!(line, 3);
                assert_eq!(name, "b_arm");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let err = parse("[b_arm]\ncc = a-\ncc = b-\n").unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateKey { line: 3, .. }));
    }

    #[test]
    fn key_before_section_is_rejected() {
        let err = parse("cc = a-\n[b_arm]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Syntax { line: 1, .. }));
    }

    #[test]
    fn garbage_line_is_rejected() {
        let err = parse("[b_arm]\njust words\n").unwrap_err();
        assert!(matches!(err, ConfigError::Syntax { line: 2, .. }));
    }

    #[test]
    fn unterminated_header_is_rejected() {
        assert!(parse("[b_arm\n").is_err());
        assert!(parse("[]\n").is_err());
    }
}

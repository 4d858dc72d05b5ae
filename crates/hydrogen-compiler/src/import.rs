//! Import path validation and package-name derivation.
//!
//! A path is a sequence of `/`-separated components of ASCII letters,
//! digits, `_`, `.`, `,`; no empty components, no trailing `/`, and `.` only
//! ever appears as part of a `../` component or as the sole leading
//! segment (a single `.`).

use tracing::debug;

use hydrogen_core::HyError;

fn is_path_char(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_' || ch == b'.' || ch == b','
}

/// Validates an import path per the rules above, without touching the
/// filesystem.
pub fn validate_path(path: &str) -> Result<(), HyError> {
    if path.is_empty() || path.ends_with('/') {
        return Err(HyError::Parse {
            message: format!("invalid import path '{path}'"),
            line: 0,
            column: 0,
            length: path.len() as u32,
        });
    }
    for component in path.split('/') {
        if component.is_empty() {
            return Err(invalid(path));
        }
        if component == "." || component == ".." {
            continue;
        }
        if component.contains('.') && component != ".." {
            // A `.` inside a component is only valid as a leading `../`
            // already handled above; anywhere else it's invalid.
            return Err(invalid(path));
        }
        if !component.bytes().all(is_path_char) {
            return Err(invalid(path));
        }
    }
    Ok(())
}

fn invalid(path: &str) -> HyError {
    HyError::Parse { message: format!("invalid import path '{path}'"), line: 0, column: 0, length: path.len() as u32 }
}

/// Derives the package name from an import path: the final component with
/// any extension stripped, mirroring `hy_pkg_name`.
pub fn package_name(path: &str) -> String {
    let last = path.rsplit('/').next().unwrap_or(path);
    match last.find('.') {
        Some(idx) => last[..idx].to_string(),
        None => last.to_string(),
    }
}

/// Where a parser fetches the text of an imported package from. The
/// filesystem-backed implementation lives in the embedding entry points;
/// tests use an in-memory map.
pub trait SourceLoader {
    fn load(&mut self, path: &str) -> Result<String, HyError>;
}

pub struct FsLoader {
    pub base_dir: std::path::PathBuf,
}

impl SourceLoader for FsLoader {
    fn load(&mut self, path: &str) -> Result<String, HyError> {
        let full = self.base_dir.join(path);
        std::fs::read_to_string(&full).map_err(|e| {
            debug!("could not read {}: {e}", full.display());
            HyError::io(format!("{}: {e}", full.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_trailing_slash() {
        assert!(validate_path("").is_err());
        assert!(validate_path("foo/").is_err());
    }

    #[test]
    fn rejects_dot_outside_dotdot_component() {
        assert!(validate_path("foo.bar/baz").is_err());
        assert!(validate_path("foo/../bar").is_ok());
    }

    #[test]
    fn accepts_plain_paths() {
        assert!(validate_path("std/collections").is_ok());
        assert!(validate_path("util").is_ok());
    }

    #[test]
    fn derives_package_name_from_final_component() {
        assert_eq!(package_name("std/collections.hy"), "collections");
        assert_eq!(package_name("util"), "util");
    }
}

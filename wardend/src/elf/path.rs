use std::path::{Path, PathBuf};

const VALID_EXTENSIONS: &[&str] = &[".bin", ".out", ".elf", ".exe", ".run"];
const MAX_SYMLINK_HOPS: usize = 5;

/// Basename of `path`, left-trimmed of spaces.
pub fn clean_path(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default()
        .trim_start()
        .to_string()
}

/// True if `path`'s extension is one of the recognized executable suffixes.
/// Used by the masquerading detector: a binary with no matching suffix
/// *and* a trailing space in its name is flagged. The extension is taken
/// from the last `.` onward (so trailing bytes after it, e.g. a stray
/// space, don't themselves invalidate it) and matched case-insensitively.
pub fn valid_extension(path: &str) -> bool {
    let Some(dot) = path.rfind('.') else {
        return false;
    };
    let ext = path[dot..].to_lowercase();
    VALID_EXTENSIONS.iter().any(|valid| ext.starts_with(valid))
}

/// Resolve `path` relative to `cwd`, honoring a mount namespace's root when
/// present. Inside a mount namespace, absolute paths are unconditionally
/// joined under the namespace root before symlink resolution — this is
/// preserved exactly as the original implementation does it, pending a
/// security review, rather than silently "fixed" to validate containment.
pub fn resolve_in_namespace(path: &str, cwd: &str, ns_root: Option<&str>) -> PathBuf {
    let mut candidate = if path.starts_with('/') {
        PathBuf::from(path)
    } else {
        Path::new(cwd).join(path)
    };

    if let Some(root) = ns_root {
        if !candidate.starts_with(root) {
            candidate = Path::new(root).join(candidate.strip_prefix("/").unwrap_or(&candidate));
        }
    }

    follow_symlinks(&candidate)
}

fn follow_symlinks(start: &Path) -> PathBuf {
    let mut current = start.to_path_buf();
    for _ in 0..MAX_SYMLINK_HOPS {
        match std::fs::read_link(&current) {
            Ok(target) => {
                current = if target.is_absolute() {
                    target
                } else {
                    current.parent().unwrap_or(Path::new("/")).join(target)
                };
            }
            Err(_) => break,
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_path_strips_dir_and_leading_space() {
        assert_eq!(clean_path("/tmp/ sample.bin"), "sample.bin");
    }

    #[test]
    fn valid_extension_recognizes_known_suffixes() {
        assert!(valid_extension("/usr/bin/tool.run"));
        assert!(!valid_extension("/usr/bin/tool.txt"));
    }

    #[test]
    fn valid_extension_is_case_insensitive_and_tolerates_trailing_bytes() {
        assert!(valid_extension("notepad.EXE "));
        assert!(valid_extension("tool.Bin"));
    }

    #[test]
    fn resolve_relative_path_joins_cwd() {
        let resolved = resolve_in_namespace("foo", "/tmp", None);
        assert_eq!(resolved, PathBuf::from("/tmp/foo"));
    }

    #[test]
    fn resolve_inside_mount_namespace_forces_root() {
        let resolved = resolve_in_namespace("/bin/sh", "/", Some("/var/containers/c1"));
        assert_eq!(resolved, PathBuf::from("/var/containers/c1/bin/sh"));
    }
}

use std::env::split_paths;
use std::io::BufRead;
use std::io::BufReader;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Stdio;

use crate::fs::File;
use log::log_enabled;
use log::trace;
use log::warn;
use log::Level::Trace;

/// Get library search directories from via `<rootfs_dir>/etc/ld-musl-<arch>.path`.
///
/// If the file is empty, returns default search directories: `/lib:/usr/local/lib:/usr/lib`.
pub fn get_search_dirs<P: AsRef<Path>>(
    rootfs_dir: P,
    arch: &str,
) -> Result<Vec<PathBuf>, std::io::Error> {
    let rootfs_dir = rootfs_dir.as_ref();
    let mut paths = Vec::new();
    parse_paths(
        rootfs_dir.join(format!("etc/ld-musl-{arch}.path")),
        rootfs_dir,
        &mut paths,
    )?;
    if paths.is_empty() {
        paths.extend([
            rootfs_dir.join("lib"),
            rootfs_dir.join("usr/local/lib"),
            rootfs_dir.join("usr/lib"),
        ]);
    }
    if log_enabled!(Trace) {
        for path in paths.iter() {
            trace!("Found system library path {:?}", path);
        }
    }
    Ok(paths)
}

fn parse_paths(
    path: PathBuf,
    rootfs_dir: &Path,
    paths: &mut Vec<PathBuf>,
) -> Result<(), std::io::Error> {
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(ref e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            warn!("Failed to open {path:?}: {e}");
            return Ok(());
        }
    };
    let reader = BufReader::new(file);
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        for path in split_paths(line) {
            let path = match path.strip_prefix("/") {
                Ok(path) => path,
                Err(_) => path.as_path(),
            };
            paths.push(rootfs_dir.join(path));
        }
    }
    Ok(())
}

/// Probe the version of the musl libc shipped as `ld_musl_path`, the dynamic
/// loader's own interpreter.
///
/// Musl's loader prints a banner such as:
/// ```text
/// musl libc (x86_64)
/// Version 1.2.5
/// Dynamic Program Loader
/// ```
/// to stderr and exits non-zero when run with no arguments. Returns `None` on any
/// probe failure — the flavor is still `Musl` either way, only the version is
/// informational.
pub fn probe_version(ld_musl_path: &Path) -> Option<String> {
    let output = Command::new(ld_musl_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .output()
        .ok()?;
    parse_version_banner(&String::from_utf8_lossy(&output.stderr))
}

fn parse_version_banner(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .find_map(|line| line.trim().strip_prefix("Version "))
        .map(|version| version.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_version_from_banner() {
        let banner = "musl libc (x86_64)\nVersion 1.2.5\nDynamic Program Loader\n";
        assert_eq!(parse_version_banner(banner), Some("1.2.5".to_string()));
    }

    #[test]
    fn falls_back_to_default_dirs_when_path_file_missing() {
        let dirs = get_search_dirs("/nonexistent/rootfs", "x86_64").unwrap();
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("/nonexistent/rootfs/lib"),
                PathBuf::from("/nonexistent/rootfs/usr/local/lib"),
                PathBuf::from("/nonexistent/rootfs/usr/lib"),
            ]
        );
    }
}

use std::collections::VecDeque;
use std::io::BufRead;
use std::io::BufReader;
use std::io::ErrorKind;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Stdio;

use crate::fs::File;
use glob::glob;
use log::log_enabled;
use log::trace;
use log::warn;
use log::Level::Trace;

/// Get default library search directories plus the paths from `<rootfs_dir>/etc/ld.so.conf`.
///
/// Default search directories: `/lib:/usr/local/lib:/usr/lib`.
pub fn get_search_dirs<P: AsRef<Path>>(rootfs_dir: P) -> Result<Vec<PathBuf>, std::io::Error> {
    let rootfs_dir = rootfs_dir.as_ref();
    let mut paths = Vec::new();
    paths.extend([
        rootfs_dir.join("lib"),
        rootfs_dir.join("usr/local/lib"),
        rootfs_dir.join("usr/lib"),
    ]);
    parse_ld_so_conf(rootfs_dir.join("etc/ld.so.conf"), rootfs_dir, &mut paths)?;
    if log_enabled!(Trace) {
        for path in paths.iter() {
            trace!("Found system library path {:?}", path);
        }
    }
    Ok(paths)
}

fn parse_ld_so_conf(
    path: PathBuf,
    rootfs_dir: &Path,
    paths: &mut Vec<PathBuf>,
) -> Result<(), std::io::Error> {
    let mut conf_files = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back(path);
    while let Some(path) = queue.pop_front() {
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(ref e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => {
                warn!("Failed to open {path:?}: {e}");
                continue;
            }
        };
        conf_files.push(path);
        let reader = BufReader::new(file);
        for line in reader.lines() {
            let line = line?;
            let line = match line.find('#') {
                Some(i) => &line[..i],
                None => &line[..],
            }
            .trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with("include") {
                let Some(i) = line.find(char::is_whitespace) else {
                    // Malformed "include" directive.
                    continue;
                };
                let pattern = if line.as_bytes().get(i + 1).copied() == Some(b'/') {
                    &line[i + 2..]
                } else {
                    &line[i + 1..]
                };
                let pattern = rootfs_dir.join(pattern);
                let Some(pattern) = pattern.to_str() else {
                    // Not a valid UTF-8 string.
                    continue;
                };
                let Ok(more_paths) = glob(pattern) else {
                    // Unparsable glob pattern.
                    continue;
                };
                for path in more_paths {
                    let Ok(path) = path else {
                        continue;
                    };
                    if !conf_files.contains(&path) {
                        queue.push_back(path);
                    }
                }
            }
            if let Some(path) = line.strip_prefix("/") {
                let path = rootfs_dir.join(path);
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
    }
    Ok(())
}

/// Get library search directories from via `ld.so --list-diagnostics`.
///
/// Useful for Nix and Guix.
pub fn get_hard_coded_search_dirs(
    ld_so_exe: Option<Command>,
) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut child = ld_so_exe
        .unwrap_or_else(|| Command::new("ld.so"))
        .arg("--list-diagnostics")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;
    let mut paths = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        let reader = BufReader::new(stdout);
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if !line.starts_with("path.system_dirs") {
                continue;
            }
            let Some(i) = line.find('=') else {
                continue;
            };
            let mut start = i + 1;
            let mut end = line.len() - 1;
            // Remove quotes.
            if line.as_bytes().get(i + 1) == Some(&b'"') {
                start += 1;
            }
            if line.as_bytes().last() == Some(&b'"') {
                end -= 1;
            }
            let path = &line[start..end];
            paths.push(Path::new(path).to_path_buf());
        }
    }
    Ok(paths)
}

/// Probe the version of a resolved `libc.so.*`.
///
/// Since glibc 2.34 the shared object itself is directly executable and prints a
/// line such as `GNU C Library (Ubuntu GLIBC 2.39-0ubuntu8.3) stable release
/// version 2.39.` to stdout when run with `--version`; this extracts the last
/// dotted version number on that line. Returns `None` on older glibcs (where the
/// library refuses to execute) or on any probe failure — the flavor is still
/// `Glibc` either way, only the version is informational.
pub fn probe_version(libc_path: &Path) -> Option<String> {
    let output = Command::new(libc_path)
        .arg("--version")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    parse_version_banner(&String::from_utf8_lossy(&output.stdout))
}

fn parse_version_banner(stdout: &str) -> Option<String> {
    let first_line = stdout.lines().next()?;
    first_line
        .split_whitespace()
        .rev()
        .find(|word| word.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .map(|word| word.trim_end_matches('.').to_string())
}

const CACHE_MAGIC_OLD: &[u8] = b"ld.so-1.7.0\0";
const CACHE_MAGIC_NEW: &[u8] = b"glibc-ld.so.cache1.1\0";

/// One entry of `/etc/ld.so.cache`: a soname mapped to the absolute path glibc's
/// dynamic loader would resolve it to, bypassing the regular search path walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// The soname recorded in the cache, e.g. `libc.so.6`.
    pub soname: String,
    /// The absolute path the loader resolves `soname` to.
    pub path: PathBuf,
}

/// Parse `<rootfs_dir>/etc/ld.so.cache`.
///
/// The cache has an old ("legacy") header (`ld.so-1.7.0\0` followed by a 32-bit
/// entry count and a flat array of fixed-size legacy entries) immediately followed
/// by the new format glibc actually uses today (`glibc-ld.so.cache1.1\0`, a 32-bit
/// entry count, then an array of `{flags: i32, key: u32, value: u32}` entries whose
/// `key`/`value` are byte offsets into a string pool that trails the new-format
/// entry array). Returns an empty vector if the file doesn't exist.
pub fn read_ld_so_cache<P: AsRef<Path>>(rootfs_dir: P) -> Result<Vec<CacheEntry>, std::io::Error> {
    let path = rootfs_dir.as_ref().join("etc/ld.so.cache");
    let mut file = match File::open(&path) {
        Ok(file) => file,
        Err(ref e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    parse_ld_so_cache(&bytes)
}

fn parse_ld_so_cache(bytes: &[u8]) -> Result<Vec<CacheEntry>, std::io::Error> {
    if !bytes.starts_with(CACHE_MAGIC_OLD) {
        return Err(malformed("missing legacy ld.so.cache header"));
    }
    let mut offset = CACHE_MAGIC_OLD.len();
    let legacy_count = read_u32(bytes, offset)? as usize;
    offset += 4;
    // Skip legacy entries: each is {key: i32, value: i32, flags: i32} = 12 bytes.
    offset += legacy_count * 12;
    // The new-format header is padded to an 8-byte boundary from the start of the file.
    offset = align_up(offset, 8);
    let new_format = bytes
        .get(offset..)
        .map(|rest| rest.starts_with(CACHE_MAGIC_NEW))
        .unwrap_or(false);
    if !new_format {
        // Older systems only have the legacy format; no soname->path cache to mine.
        return Ok(Vec::new());
    }
    offset += CACHE_MAGIC_NEW.len();
    let entry_count = read_u32(bytes, offset)? as usize;
    offset += 4;
    // string_table_len, unused[5]
    offset += 4 * 6;
    let mut entries = Vec::with_capacity(entry_count);
    for i in 0..entry_count {
        let entry_offset = offset + i * 16;
        let key_offset = read_u32(bytes, entry_offset + 4)? as usize;
        let value_offset = read_u32(bytes, entry_offset + 8)? as usize;
        let soname = read_cstr(bytes, key_offset)?;
        let path = read_cstr(bytes, value_offset)?;
        entries.push(CacheEntry {
            soname,
            path: PathBuf::from(path),
        });
    }
    Ok(entries)
}

const fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) / align * align
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, std::io::Error> {
    let raw: [u8; 4] = bytes
        .get(offset..offset + 4)
        .ok_or_else(|| malformed("truncated ld.so.cache"))?
        .try_into()
        .expect("slice of length 4");
    Ok(u32::from_ne_bytes(raw))
}

fn read_cstr(bytes: &[u8], offset: usize) -> Result<String, std::io::Error> {
    let slice = bytes
        .get(offset..)
        .ok_or_else(|| malformed("string offset out of range in ld.so.cache"))?;
    let end = slice
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| malformed("unterminated string in ld.so.cache"))?;
    Ok(String::from_utf8_lossy(&slice[..end]).into_owned())
}

fn malformed(message: &str) -> std::io::Error {
    std::io::Error::new(ErrorKind::InvalidData, message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_cstr(bytes: &mut Vec<u8>, s: &str) -> u32 {
        let offset = bytes.len() as u32;
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        offset
    }

    #[test]
    fn parses_new_format_cache() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(CACHE_MAGIC_OLD);
        bytes.extend_from_slice(&0_u32.to_ne_bytes()); // no legacy entries
        while bytes.len() % 8 != 0 {
            bytes.push(0);
        }
        bytes.extend_from_slice(CACHE_MAGIC_NEW);
        bytes.extend_from_slice(&1_u32.to_ne_bytes()); // entry_count
        bytes.extend_from_slice(&[0_u8; 24]); // string_table_len + unused[5]
        let entry_header_offset = bytes.len();
        bytes.extend_from_slice(&[0_u8; 16]); // placeholder entry
        let key_offset = push_cstr(&mut bytes, "libz.so.1");
        let value_offset = push_cstr(&mut bytes, "/lib/x86_64-linux-gnu/libz.so.1");
        bytes[entry_header_offset + 4..entry_header_offset + 8]
            .copy_from_slice(&key_offset.to_ne_bytes());
        bytes[entry_header_offset + 8..entry_header_offset + 12]
            .copy_from_slice(&value_offset.to_ne_bytes());

        let entries = parse_ld_so_cache(&bytes).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].soname, "libz.so.1");
        assert_eq!(
            entries[0].path,
            PathBuf::from("/lib/x86_64-linux-gnu/libz.so.1")
        );
    }

    #[test]
    fn missing_file_is_empty() {
        let entries = read_ld_so_cache("/nonexistent/rootfs").unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn parses_version_from_banner() {
        let banner = "GNU C Library (Ubuntu GLIBC 2.39-0ubuntu8.3) stable release version 2.39.\n";
        assert_eq!(parse_version_banner(banner), Some("2.39".to_string()));
    }

    #[test]
    fn no_version_in_banner_is_none() {
        assert_eq!(parse_version_banner("nothing numeric here\n"), None);
        assert_eq!(parse_version_banner(""), None);
    }
}

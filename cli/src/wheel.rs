//! Wheel (zip-format archive) I/O: §4.E.
//!
//! A wheel is a zip archive whose name encodes distribution tags and whose
//! `*.dist-info/WHEEL` and `*.dist-info/RECORD` entries describe its contents.
//! This module extracts an archive into a scratch directory, classifies its
//! entries, and re-packs a repaired tree deterministically.

use std::collections::BTreeMap;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use fs_err::File;
use sha2::Digest;
use sha2::Sha256;
use zip::write::FileOptions;
use zip::CompressionMethod;
use zip::ZipArchive;
use zip::ZipWriter;

use crate::Error;

/// A wheel filename's distribution tags: `{name}-{ver}(-{build})?-{py}-{abi}-{plat}.whl`.
#[derive(Debug, Clone)]
pub struct WheelName {
    /// Project name segment, as it appears in the filename (already normalized).
    pub distribution: String,
    /// Version segment.
    pub version: String,
    /// Optional numeric-prefixed build tag segment.
    pub build: Option<String>,
    /// Compressed Python tags, e.g. `["cp39"]` or `["py2", "py3"]`.
    pub python_tags: Vec<String>,
    /// Compressed ABI tags, e.g. `["cp39"]` or `["none"]`.
    pub abi_tags: Vec<String>,
    /// Compressed platform tags, e.g. `["linux_x86_64"]` or
    /// `["manylinux_2_17_x86_64", "manylinux2014_x86_64"]`.
    pub platform_tags: Vec<String>,
}

impl WheelName {
    /// Parse a wheel archive's filename into its dash-separated tag segments.
    pub fn parse(path: &Path) -> Result<Self, Error> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::MalformedWheel(path.to_path_buf(), "not a valid file name"))?;
        let stem = file_name
            .strip_suffix(".whl")
            .ok_or_else(|| Error::MalformedWheel(path.to_path_buf(), "missing .whl extension"))?;
        let parts: Vec<&str> = stem.split('-').collect();
        let (distribution, version, build, python, abi, platform) = match parts.as_slice() {
            [dist, ver, py, abi, plat] => (*dist, *ver, None, *py, *abi, *plat),
            [dist, ver, build, py, abi, plat] => (*dist, *ver, Some(*build), *py, *abi, *plat),
            _ => {
                return Err(Error::MalformedWheel(
                    path.to_path_buf(),
                    "expected 5 or 6 dash-separated segments",
                ))
            }
        };
        Ok(Self {
            distribution: distribution.to_string(),
            version: version.to_string(),
            build: build.map(str::to_string),
            python_tags: python.split('.').map(str::to_string).collect(),
            abi_tags: abi.split('.').map(str::to_string).collect(),
            platform_tags: platform.split('.').map(str::to_string).collect(),
        })
    }

    /// Re-render the filename, optionally substituting the platform tag segment.
    pub fn to_file_name(&self, platform_tags: &[String]) -> String {
        let plat = if platform_tags.is_empty() {
            self.platform_tags.join(".")
        } else {
            platform_tags.join(".")
        };
        let mut out = format!(
            "{}-{}",
            self.distribution,
            self.version
        );
        if let Some(build) = self.build.as_ref() {
            out.push('-');
            out.push_str(build);
        }
        out.push('-');
        out.push_str(&self.python_tags.join("."));
        out.push('-');
        out.push_str(&self.abi_tags.join("."));
        out.push('-');
        out.push_str(&plat);
        out.push_str(".whl");
        out
    }

    /// The distribution name a grafted-library directory is named after, e.g.
    /// `mypackage` out of `mypackage-1.0-...-linux_x86_64.whl`.
    pub fn libs_dir_name(&self) -> String {
        format!("{}.libs", self.distribution)
    }

    /// Full `Tag:` lines for the `WHEEL` metadata file: the cross product of
    /// Python tags, ABI tags, and the given (possibly updated) platform tags.
    pub fn compatibility_tags(&self, platform_tags: &[String]) -> Vec<String> {
        let mut tags = Vec::new();
        for py in self.python_tags.iter() {
            for abi in self.abi_tags.iter() {
                for plat in platform_tags.iter() {
                    tags.push(format!("{py}-{abi}-{plat}"));
                }
            }
        }
        tags
    }
}

/// The parsed contents of a `*.dist-info/WHEEL` metadata file.
#[derive(Debug, Clone)]
pub struct WheelMetadata {
    /// `Wheel-Version:` value, e.g. `"1.0"`.
    pub wheel_version: String,
    /// `Generator:` value, if present.
    pub generator: Option<String>,
    /// `Root-Is-Purelib:` value.
    pub root_is_purelib: bool,
    /// Every `Tag:` line's value, in file order.
    pub tags: Vec<String>,
    /// `Build:` value, if present.
    pub build: Option<String>,
}

impl WheelMetadata {
    /// Parse the `key: value` lines of a `WHEEL` file.
    pub fn parse(content: &str) -> Result<Self, Error> {
        let mut wheel_version = None;
        let mut generator = None;
        let mut root_is_purelib = false;
        let mut tags = Vec::new();
        let mut build = None;
        for line in content.lines() {
            let line = line.trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "Wheel-Version" => wheel_version = Some(value.to_string()),
                "Generator" => generator = Some(value.to_string()),
                "Root-Is-Purelib" => root_is_purelib = value.eq_ignore_ascii_case("true"),
                "Tag" => tags.push(value.to_string()),
                "Build" => build = Some(value.to_string()),
                _ => {}
            }
        }
        let wheel_version = wheel_version
            .ok_or_else(|| Error::MalformedWheel(PathBuf::new(), "WHEEL is missing Wheel-Version"))?;
        if tags.is_empty() {
            return Err(Error::MalformedWheel(PathBuf::new(), "WHEEL has no Tag: lines"));
        }
        Ok(Self {
            wheel_version,
            generator,
            root_is_purelib,
            tags,
            build,
        })
    }

    /// Render back into `WHEEL` file text, replacing the `Tag:` lines with `tags`.
    pub fn render(&self, tags: &[String]) -> String {
        let mut out = String::new();
        out.push_str(&format!("Wheel-Version: {}\n", self.wheel_version));
        if let Some(generator) = self.generator.as_ref() {
            out.push_str(&format!("Generator: {generator}\n"));
        }
        out.push_str(&format!(
            "Root-Is-Purelib: {}\n",
            if self.root_is_purelib { "true" } else { "false" }
        ));
        for tag in tags {
            out.push_str(&format!("Tag: {tag}\n"));
        }
        if let Some(build) = self.build.as_ref() {
            out.push_str(&format!("Build: {build}\n"));
        }
        out
    }
}

/// One row of a `RECORD` file: `path,sha256=<b64>,length`.
#[derive(Debug, Clone)]
pub struct RecordEntry {
    /// Archive-relative path, forward-slash separated.
    pub path: String,
    /// `sha256=<urlsafe-base64-no-pad>` digest, absent for `RECORD` itself.
    pub digest: Option<String>,
    /// Byte length, absent for `RECORD` itself.
    pub length: Option<u64>,
}

/// Parse a `RECORD` file's CSV rows.
pub fn parse_record(content: &str) -> Vec<RecordEntry> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let mut fields = line.splitn(3, ',');
            let path = fields.next().unwrap_or_default().to_string();
            let digest = fields.next().filter(|s| !s.is_empty()).map(str::to_string);
            let length = fields
                .next()
                .and_then(|s| s.trim().parse::<u64>().ok());
            RecordEntry { path, digest, length }
        })
        .collect()
}

/// Recompute a `RECORD` file over every entry under `root`, hashing each file's
/// current bytes except `record_rel` itself, which carries no digest (§6).
pub fn compute_record(root: &Path, entries: &[String], record_rel: &str) -> Result<String, Error> {
    let mut out = String::new();
    for rel in entries {
        if rel == record_rel {
            out.push_str(&format!("{rel},,\n"));
            continue;
        }
        let mut bytes = Vec::new();
        File::open(root.join(rel))?.read_to_end(&mut bytes)?;
        let digest = Sha256::digest(&bytes);
        let hash = URL_SAFE_NO_PAD.encode(digest);
        out.push_str(&format!("{rel},sha256={hash},{}\n", bytes.len()));
    }
    Ok(out)
}

/// An archive extracted into a private scratch directory; removed on drop.
pub struct ExtractedWheel {
    /// The scratch directory's path.
    pub root: PathBuf,
    /// Every file entry's archive-relative path, in original zip order.
    pub entries: Vec<String>,
    /// Unix permission bits recorded for each entry, where the archive carried them.
    pub modes: BTreeMap<String, u32>,
    /// The filename's parsed tag segments.
    pub name: WheelName,
    /// The `*.dist-info` directory's relative path, no trailing slash.
    pub dist_info_dir: String,
    _scratch: tempfile::TempDir,
}

impl ExtractedWheel {
    /// Open `path`, parse its filename tags, and extract every entry into a fresh
    /// scratch directory, preserving Unix file modes (§4.E).
    pub fn open(path: &Path) -> Result<Self, Error> {
        let name = WheelName::parse(path)?;
        let scratch = tempfile::Builder::new().prefix("auditelf-wheel-").tempdir()?;
        let root = scratch.path().to_path_buf();

        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file)?;
        let mut entries = Vec::with_capacity(archive.len());
        let mut modes = BTreeMap::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let rel = entry.name().to_string();
            let out_path = root.join(&rel);
            if entry.is_dir() || rel.ends_with('/') {
                fs_err::create_dir_all(&out_path)?;
                continue;
            }
            if let Some(parent) = out_path.parent() {
                fs_err::create_dir_all(parent)?;
            }
            let mut out_file = File::create(&out_path)?;
            std::io::copy(&mut entry, &mut out_file)?;
            if let Some(mode) = entry.unix_mode() {
                modes.insert(rel.clone(), mode);
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let _ = std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode));
                }
            }
            entries.push(rel);
        }

        let dist_info_dir = entries
            .iter()
            .find_map(|rel| {
                let (dir, file) = rel.rsplit_once('/')?;
                (file == "WHEEL" && dir.ends_with(".dist-info")).then(|| dir.to_string())
            })
            .ok_or_else(|| Error::MalformedWheel(path.to_path_buf(), "missing *.dist-info/WHEEL"))?;
        let record_rel = format!("{dist_info_dir}/RECORD");
        if !entries.iter().any(|e| e == &record_rel) {
            return Err(Error::MalformedWheel(path.to_path_buf(), "missing *.dist-info/RECORD"));
        }

        Ok(Self {
            root,
            entries,
            modes,
            name,
            dist_info_dir,
            _scratch: scratch,
        })
    }

    /// Absolute path of an archive-relative entry inside the scratch directory.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Relative path of the `WHEEL` metadata file.
    pub fn wheel_rel(&self) -> String {
        format!("{}/WHEEL", self.dist_info_dir)
    }

    /// Relative path of the `RECORD` manifest file.
    pub fn record_rel(&self) -> String {
        format!("{}/RECORD", self.dist_info_dir)
    }

    /// Entries, relative to `root`, whose first four bytes are the ELF magic.
    pub fn elf_entries(&self) -> Result<Vec<String>, Error> {
        let mut out = Vec::new();
        for rel in self.entries.iter() {
            if is_elf_file(&self.path(rel))? {
                out.push(rel.clone());
            }
        }
        Ok(out)
    }

    /// Read and parse this wheel's `WHEEL` metadata file.
    pub fn metadata(&self) -> Result<WheelMetadata, Error> {
        let content = fs_err::read_to_string(self.path(&self.wheel_rel()))?;
        WheelMetadata::parse(&content)
    }
}

/// Whether `path`'s first four bytes are the ELF magic number.
pub fn is_elf_file(path: &Path) -> Result<bool, Error> {
    let mut file = File::open(path)?;
    let mut magic = [0_u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == [0x7f, b'E', b'L', b'F']),
        Err(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Re-pack `root`'s tree into a new wheel archive named `file_name` inside
/// `output_dir`, deterministically: entries are written in sorted order, Unix
/// modes are carried over (new entries default to `0o644`, directories implicit),
/// and DEFLATE-compressed. Every written entry's timestamp is taken from
/// `SOURCE_DATE_EPOCH` when set (§6), so that two repairs of the same input
/// produce byte-identical output.
pub fn repack(
    root: &Path,
    entries: &[String],
    modes: &BTreeMap<String, u32>,
    output_dir: &Path,
    file_name: &str,
    source_date_epoch: Option<u64>,
) -> Result<PathBuf, Error> {
    fs_err::create_dir_all(output_dir)?;
    let output_path = output_dir.join(file_name);
    let mut sorted: Vec<&String> = entries.iter().collect();
    sorted.sort();

    let datetime = source_date_epoch.and_then(epoch_to_zip_datetime);
    let file = File::create(&output_path)?;
    let mut writer = ZipWriter::new(file);
    for rel in sorted {
        let mode = modes.get(rel).copied().unwrap_or(0o644);
        let mut options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(mode);
        if let Some(datetime) = datetime {
            options = options.last_modified_time(datetime);
        }
        writer.start_file(rel.as_str(), options)?;
        let mut input = File::open(root.join(rel))?;
        std::io::copy(&mut input, &mut writer)?;
    }
    writer.finish()?;
    Ok(output_path)
}

/// Convert a Unix timestamp to a zip `DateTime`, clamped to the MS-DOS epoch
/// (1980-01-01) the zip format requires. Uses Howard Hinnant's `civil_from_days`
/// algorithm to avoid pulling in a calendar dependency for one conversion.
fn epoch_to_zip_datetime(epoch_seconds: u64) -> Option<zip::DateTime> {
    let epoch_seconds = epoch_seconds as i64;
    let days = epoch_seconds.div_euclid(86_400);
    let secs_of_day = epoch_seconds.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);
    if year < 1980 {
        return None;
    }
    let hour = (secs_of_day / 3600) as u8;
    let minute = ((secs_of_day % 3600) / 60) as u8;
    let second = (secs_of_day % 60) as u8;
    zip::DateTime::from_date_and_time(year as u16, month as u8, day as u8, hour, minute, second).ok()
}

/// Civil (year, month, day) from a day count since the Unix epoch, proleptic
/// Gregorian calendar. Public-domain algorithm, standard in `chrono`-less code.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_five_segment_name() {
        let name = WheelName::parse(Path::new("foo-1.0-py3-none-any.whl")).unwrap();
        assert_eq!(name.distribution, "foo");
        assert_eq!(name.version, "1.0");
        assert!(name.build.is_none());
        assert_eq!(name.platform_tags, vec!["any".to_string()]);
    }

    #[test]
    fn parses_six_segment_name_with_build_tag() {
        let name = WheelName::parse(Path::new("foo-1.0-2-py3-none-any.whl")).unwrap();
        assert_eq!(name.build, Some("2".to_string()));
    }

    #[test]
    fn rejects_missing_extension() {
        assert!(WheelName::parse(Path::new("foo-1.0-py3-none-any.tar.gz")).is_err());
    }

    #[test]
    fn renders_new_platform_segment() {
        let name = WheelName::parse(Path::new("foo-1.0-cp39-cp39-linux_x86_64.whl")).unwrap();
        let renamed = name.to_file_name(&[
            "manylinux_2_17_x86_64".to_string(),
            "manylinux2014_x86_64".to_string(),
        ]);
        assert_eq!(
            renamed,
            "foo-1.0-cp39-cp39-manylinux_2_17_x86_64.manylinux2014_x86_64.whl"
        );
    }

    #[test]
    fn compatibility_tags_cross_product() {
        let name = WheelName::parse(Path::new("foo-1.0-py2.py3-none-any.whl")).unwrap();
        let tags = name.compatibility_tags(&["any".to_string()]);
        assert_eq!(tags, vec!["py2-none-any".to_string(), "py3-none-any".to_string()]);
    }

    #[test]
    fn parses_wheel_metadata() {
        let content = "Wheel-Version: 1.0\nGenerator: auditelf\nRoot-Is-Purelib: false\nTag: cp39-cp39-linux_x86_64\n";
        let meta = WheelMetadata::parse(content).unwrap();
        assert_eq!(meta.wheel_version, "1.0");
        assert!(!meta.root_is_purelib);
        assert_eq!(meta.tags, vec!["cp39-cp39-linux_x86_64".to_string()]);
    }

    #[test]
    fn parses_record_rows() {
        let content = "a/b.py,sha256=abc,10\nc.dist-info/RECORD,,\n";
        let rows = parse_record(content);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].length, Some(10));
        assert!(rows[1].digest.is_none());
    }

    #[test]
    fn civil_from_days_matches_known_epoch() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(19_723), (2023, 12, 25));
    }
}

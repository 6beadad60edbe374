//! Repair execution: §4.G — copying grafted libraries, invoking `patchelf` and
//! `strip`, and handing the rewritten tree back to the wheel adapter to re-tag
//! and re-pack.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Stdio;

use auditelf_resolve::BinaryPatch;
use auditelf_resolve::DependencyGraph;
use auditelf_resolve::DynamicLoader;
use auditelf_resolve::Policy;
use auditelf_resolve::RepairPlan;
use auditelf_resolve::Violation;
use fs_err as fs;
use log::info;
use log::warn;

use crate::wheel::compute_record;
use crate::wheel::repack;
use crate::wheel::ExtractedWheel;
use crate::wheel::WheelMetadata;
use crate::Error;

/// Options governing one `repair` invocation, gathered from the CLI and the
/// environment at the process boundary (§9: read once, threaded explicitly).
pub struct RepairOptions {
    /// Policies not whitelisted by the target but left alone anyway (`--exclude`).
    pub exclude: BTreeSet<String>,
    /// Don't append the target policy's legacy aliases to the output filename.
    pub only_plat: bool,
    /// Run `strip` on every grafted library after copying it.
    pub strip: bool,
    /// Directory repaired wheels are written to.
    pub output_dir: PathBuf,
    /// `SOURCE_DATE_EPOCH`, if set, for reproducible archive timestamps.
    pub source_date_epoch: Option<u64>,
    /// Path or name of the external `patchelf` binary.
    pub patchelf_bin: String,
    /// Path or name of the external `strip` binary.
    pub strip_bin: String,
    /// ELF page size passed to the inspector.
    pub page_size: u64,
}

/// The outcome of a `repair` invocation, for the CLI to report and exit with.
pub enum RepairOutcome {
    /// The archive carries no ELF binaries at all (§6, §8: `NonPlatformWheel`).
    NonPlatformWheel,
    /// A repaired archive was written.
    Repaired {
        /// Where the repaired archive was written.
        output_path: PathBuf,
        /// The policy it now satisfies.
        policy_name: String,
        /// Sonames grafted into the archive, empty for a tag-only pass.
        grafted: Vec<String>,
    },
}

/// Repair `input` to satisfy `target`, per §4.F/§4.G.
///
/// `loader` must already be configured with the search state (root, `LD_LIBRARY_PATH`
/// policy, libc flavor) the caller wants the resolver to use.
pub fn run(
    input: &Path,
    target: &Policy,
    loader: &DynamicLoader,
    options: &RepairOptions,
) -> Result<RepairOutcome, Error> {
    let extracted = ExtractedWheel::open(input)?;
    let elf_entries = extracted.elf_entries()?;
    if elf_entries.is_empty() {
        return Ok(RepairOutcome::NonPlatformWheel);
    }

    let roots: Vec<PathBuf> = elf_entries.iter().map(|rel| extracted.path(rel)).collect();
    let graph = DependencyGraph::build(&roots, loader)?;
    let arch = graph
        .arch
        .ok_or_else(|| Error::Infeasible(input.to_path_buf(), target.name.clone(), "no recognized architecture among root binaries".into()))?;
    if target.arch().as_deref() != Some(arch) && target.name != "linux" {
        return Err(Error::Infeasible(
            input.to_path_buf(),
            target.name.clone(),
            format!("target policy architecture does not match archive architecture {arch}"),
        ));
    }

    let scoring = auditelf_resolve::score_policy(&graph, target);
    if !scoring.is_symbol_compatible() {
        let reason = describe_violations(&scoring.violations);
        return Err(Error::Infeasible(input.to_path_buf(), target.name.clone(), reason));
    }

    let libs_dir_name = extracted.name.libs_dir_name();
    let plan = auditelf_resolve::plan(
        &graph,
        target,
        &options.exclude,
        &extracted.root,
        &libs_dir_name,
        options.page_size,
    )?;

    let mut new_entries = execute_plan(
        &plan,
        &extracted.root,
        &options.patchelf_bin,
        &options.strip_bin,
        options.strip,
    )?;

    let mut manifest: Vec<String> = extracted.entries.clone();
    manifest.append(&mut new_entries.clone());

    let mut platform_tags = vec![target.name.clone()];
    if !options.only_plat {
        platform_tags.extend(target.aliases.iter().cloned());
    }
    let metadata = extracted.metadata()?;
    let tags = extracted.name.compatibility_tags(&platform_tags);
    let rendered = metadata.render(&tags);
    fs::write(extracted.path(&extracted.wheel_rel()), rendered)?;

    let record_rel = extracted.record_rel();
    let record = compute_record(&extracted.root, &manifest, &record_rel)?;
    fs::write(extracted.path(&record_rel), record)?;

    let file_name = extracted.name.to_file_name(&platform_tags);
    let mut modes = extracted.modes.clone();
    for rel in new_entries.iter() {
        modes.entry(rel.clone()).or_insert(0o755);
    }
    let output_path = repack(
        &extracted.root,
        &manifest,
        &modes,
        &options.output_dir,
        &file_name,
        options.source_date_epoch,
    )?;

    let grafted: Vec<String> = plan.grafts.iter().map(|g| g.soname.clone()).collect();
    Ok(RepairOutcome::Repaired {
        output_path,
        policy_name: target.name.clone(),
        grafted,
    })
}

fn describe_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| match v {
            Violation::PolicyViolation { group, actual, max } => {
                format!("PolicyViolation({group}, {actual}, {max})")
            }
            Violation::BlacklistedSymbol { library, symbol } => {
                format!("BlacklistedSymbol({library}, {symbol})")
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Execute a repair plan on the scratch tree: §4.G steps 1-3. Returns the
/// archive-relative paths of every newly grafted file, for the caller to fold
/// into the repacked manifest.
fn execute_plan(
    plan: &RepairPlan,
    archive_root: &Path,
    patchelf_bin: &str,
    strip_bin: &str,
    strip: bool,
) -> Result<Vec<String>, Error> {
    if plan.grafts.is_empty() {
        return Ok(Vec::new());
    }
    let libs_dir = archive_root.join(&plan.libs_dir_name);
    fs::create_dir_all(&libs_dir)?;

    let mut new_entries = Vec::with_capacity(plan.grafts.len());
    for graft in plan.grafts.iter() {
        let dest = libs_dir.join(&graft.bundled_name);
        fs::copy(&graft.source_path, &dest)?;
        chmod_writable(&dest)?;
        if strip {
            run_strip(strip_bin, &dest)?;
        }
        new_entries.push(format!("{}/{}", plan.libs_dir_name, graft.bundled_name));
        info!("grafted {:?} as {:?}", graft.soname, graft.bundled_name);
    }

    for patch in plan.patches.iter() {
        apply_patch(patchelf_bin, patch)?;
    }
    Ok(new_entries)
}

#[cfg(unix)]
fn chmod_writable(path: &Path) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn chmod_writable(_path: &Path) -> Result<(), Error> {
    Ok(())
}

/// Invoke `patchelf` for every action this binary's patch carries, one rewrite
/// per call (§6): `--set-soname`, then one `--replace-needed` per rewrite, then
/// `--set-rpath` for the new search path.
fn apply_patch(patchelf_bin: &str, patch: &BinaryPatch) -> Result<(), Error> {
    if let Some(soname) = patch.set_soname.as_ref() {
        run_patchelf(patchelf_bin, &["--set-soname", soname], &patch.path)?;
    }
    for rewrite in patch.replace_needed.iter() {
        run_patchelf(
            patchelf_bin,
            &["--replace-needed", &rewrite.old, &rewrite.new],
            &patch.path,
        )?;
    }
    if !patch.set_runpath.is_empty() {
        let joined = patch.set_runpath.join(":");
        run_patchelf(patchelf_bin, &["--set-rpath", &joined], &patch.path)?;
    }
    Ok(())
}

fn run_patchelf(patchelf_bin: &str, args: &[&str], path: &Path) -> Result<(), Error> {
    let output = Command::new(patchelf_bin)
        .args(args)
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::PatcherFailed(path.to_path_buf(), e.to_string()))?;
    if !output.status.success() {
        return Err(Error::PatcherFailed(
            path.to_path_buf(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    Ok(())
}

/// Best-effort `strip --strip-debug` on a grafted file. A non-writable path is
/// recoverable per §7; any other failure is fatal.
fn run_strip(strip_bin: &str, path: &Path) -> Result<(), Error> {
    let result = Command::new(strip_bin)
        .arg("--strip-debug")
        .arg(path)
        .stdin(Stdio::null())
        .output();
    let output = match result {
        Ok(output) => output,
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            warn!("skipping strip of {path:?}: {e}");
            return Ok(());
        }
        Err(e) => return Err(Error::StripFailed(path.to_path_buf(), e.to_string())),
    };
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.to_lowercase().contains("permission denied") {
            warn!("skipping strip of {path:?}: {stderr}");
            return Ok(());
        }
        return Err(Error::StripFailed(path.to_path_buf(), stderr.into_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditelf::SymbolVersion;

    #[test]
    fn describe_violations_joins_each_kind() {
        let violations = vec![
            Violation::PolicyViolation {
                group: "GLIBC".to_string(),
                actual: SymbolVersion::new("GLIBC_2.30"),
                max: SymbolVersion::new("GLIBC_2.17"),
            },
            Violation::BlacklistedSymbol {
                library: "libstdc++.so.6".to_string(),
                symbol: "__cxa_throw".to_string(),
            },
        ];
        let rendered = describe_violations(&violations);
        assert!(rendered.contains("PolicyViolation(GLIBC"));
        assert!(rendered.contains("BlacklistedSymbol(libstdc++.so.6, __cxa_throw)"));
        assert!(rendered.contains("; "));
    }

    #[test]
    fn describe_violations_empty_is_empty_string() {
        assert_eq!(describe_violations(&[]), "");
    }

    #[test]
    fn apply_patch_with_no_actions_is_a_no_op() {
        let patch = BinaryPatch {
            path: PathBuf::from("/does/not/matter.so"),
            set_soname: None,
            replace_needed: Vec::new(),
            set_runpath: Vec::new(),
        };
        // No patchelf actions means no subprocess should be spawned; an
        // unresolvable binary name would otherwise surface as an error here.
        apply_patch("/nonexistent/patchelf-binary-for-tests", &patch).unwrap();
    }
}

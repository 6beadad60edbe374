//! Deciding which external libraries to graft, what to rename them to, and how to
//! rewrite each affected binary's `DT_NEEDED`/`DT_RUNPATH`: §4.F.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;

use auditelf::Elf;
use sha2::Digest;
use sha2::Sha256;

use crate::fs::File;
use crate::DependencyGraph;
use crate::Error;
use crate::Policy;

/// One external library copied into the archive's graft directory.
#[derive(Debug, Clone)]
pub struct GraftedLibrary {
    /// The library's original soname, e.g. `libfoo.so.1`.
    pub soname: String,
    /// Where to copy the library's bytes from (a resolved host path).
    pub source_path: PathBuf,
    /// The collision-free filename it is copied to inside the graft directory,
    /// e.g. `libfoo-89abcdef.so.1`.
    pub bundled_name: String,
}

/// One `DT_NEEDED` entry that must be rewritten in a patched binary.
#[derive(Debug, Clone)]
pub struct NeededRewrite {
    /// The soname currently present in `DT_NEEDED`.
    pub old: String,
    /// The grafted library's bundled filename to replace it with.
    pub new: String,
}

/// The set of patcher actions for one binary: §4.G step 3.
#[derive(Debug, Clone)]
pub struct BinaryPatch {
    /// Where the binary to patch will live in the scratch copy at execution time
    /// (the extracted root path for a root binary, the graft directory destination
    /// for a grafted library).
    pub path: PathBuf,
    /// Set this binary's own `DT_SONAME`, if it is a grafted copy.
    pub set_soname: Option<String>,
    /// `DT_NEEDED` entries to rewrite to their grafted replacement.
    pub replace_needed: Vec<NeededRewrite>,
    /// The new `DT_RUNPATH` entries, in order, `$ORIGIN`-relative.
    pub set_runpath: Vec<String>,
}

/// A complete repair plan: what to graft and how to patch every affected binary.
#[derive(Debug, Clone)]
pub struct RepairPlan {
    /// The graft directory's name, e.g. `mypackage.libs`.
    pub libs_dir_name: String,
    /// Libraries to copy into the graft directory.
    pub grafts: Vec<GraftedLibrary>,
    /// Binaries to patch, in dependency order: grafted libraries before the
    /// binaries that depend on them (§5).
    pub patches: Vec<BinaryPatch>,
}

impl RepairPlan {
    /// An empty plan: nothing to graft, nothing to patch. Used for pure archives
    /// and archives already satisfying the target policy (§4.F step 6).
    pub fn empty(libs_dir_name: impl Into<String>) -> Self {
        Self {
            libs_dir_name: libs_dir_name.into(),
            grafts: Vec::new(),
            patches: Vec::new(),
        }
    }

    /// Whether this plan has nothing to do beyond re-tagging the archive.
    pub fn is_tag_only(&self) -> bool {
        self.grafts.is_empty() && self.patches.is_empty()
    }
}

/// Plan a repair of `graph` against `target`, using `archive_root` as the scratch
/// extraction root every binary's path in `graph` lives under.
///
/// `exclude` lists sonames the caller wants left alone even though the target
/// policy does not whitelist them (`--exclude`); they are treated like whitelisted
/// libraries for planning purposes.
pub fn plan(
    graph: &DependencyGraph,
    target: &Policy,
    exclude: &BTreeSet<String>,
    archive_root: &Path,
    libs_dir_name: &str,
    page_size: u64,
) -> Result<RepairPlan, Error> {
    if let Some(unresolved) = graph.unresolved.first() {
        return Err(Error::FailedToResolve(
            unresolved.soname.clone(),
            unresolved.dependent.clone(),
        ));
    }

    let mut grafts = Vec::new();
    let mut bundled_name_by_soname: BTreeMap<String, String> = BTreeMap::new();
    let mut dest_by_source: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();

    for node in graph.externals.values() {
        if target.lib_whitelist.contains(&node.soname) || exclude.contains(&node.soname) {
            continue;
        }
        let bundled_name = bundled_name(&node.soname, &node.path)?;
        let dest = archive_root.join(libs_dir_name).join(&bundled_name);
        bundled_name_by_soname.insert(node.soname.clone(), bundled_name.clone());
        dest_by_source.insert(node.path.clone(), dest);
        grafts.push(GraftedLibrary {
            soname: node.soname.clone(),
            source_path: node.path.clone(),
            bundled_name,
        });
    }
    grafts.sort_by(|a, b| a.soname.cmp(&b.soname));

    let mut patches = Vec::new();
    for root in graph.roots.iter() {
        let final_rel_dir = root
            .strip_prefix(archive_root)
            .ok()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        if let Some(patch) = build_patch(
            root,
            root.clone(),
            None,
            &bundled_name_by_soname,
            &final_rel_dir,
            libs_dir_name,
            page_size,
        )? {
            patches.push(patch);
        }
    }
    for graft in grafts.iter() {
        let dest = dest_by_source
            .get(&graft.source_path)
            .expect("every graft has a destination")
            .clone();
        if let Some(patch) = build_patch(
            &graft.source_path,
            dest,
            Some(graft.bundled_name.clone()),
            &bundled_name_by_soname,
            Path::new(libs_dir_name),
            libs_dir_name,
            page_size,
        )? {
            patches.push(patch);
        }
    }

    let patches = topological_order(graph, patches, &dest_by_source);
    Ok(RepairPlan {
        libs_dir_name: libs_dir_name.to_string(),
        grafts,
        patches,
    })
}

/// Build the patch for one binary, read from `source` (where it lives today) but
/// addressed at `patch_path` (where the executor will actually find it to patch:
/// the root's own scratch path, or the grafted copy's destination).
#[allow(clippy::too_many_arguments)]
fn build_patch(
    source: &Path,
    patch_path: PathBuf,
    set_soname: Option<String>,
    bundled_name_by_soname: &BTreeMap<String, String>,
    final_rel_dir: &Path,
    libs_dir_name: &str,
    page_size: u64,
) -> Result<Option<BinaryPatch>, Error> {
    let mut file = File::open(source)?;
    let elf = Elf::load(&mut file, page_size)?;

    let replace_needed: Vec<NeededRewrite> = elf
        .needed()
        .into_iter()
        .filter_map(|name| {
            bundled_name_by_soname.get(name).map(|new| NeededRewrite {
                old: name.to_string(),
                new: new.clone(),
            })
        })
        .collect();

    if replace_needed.is_empty() && set_soname.is_none() {
        return Ok(None);
    }

    let graft_entry = origin_relative_to_libs(final_rel_dir, libs_dir_name);
    let mut set_runpath: Vec<String> = Vec::new();
    let preserved = if !elf.runpath().is_empty() {
        elf.runpath()
    } else {
        elf.rpath()
    };
    for entry in preserved {
        if !entry.starts_with('/') && entry != graft_entry {
            set_runpath.push(entry.to_string());
        }
    }
    set_runpath.push(graft_entry);

    Ok(Some(BinaryPatch {
        path: patch_path,
        set_soname,
        replace_needed,
        set_runpath,
    }))
}

/// Compute a `$ORIGIN`-relative path from a binary living `final_rel_dir` deep
/// under the archive root, to the top-level graft directory.
///
/// A binary living directly inside the graft directory itself (a grafted library
/// looking for its own grafted siblings) gets `$ORIGIN` plainly, since all grafted
/// files share one flat directory.
fn origin_relative_to_libs(final_rel_dir: &Path, libs_dir_name: &str) -> String {
    if final_rel_dir == Path::new(libs_dir_name) {
        return "$ORIGIN".to_string();
    }
    let depth = final_rel_dir.components().count();
    let mut out = String::from("$ORIGIN");
    for _ in 0..depth {
        out.push_str("/..");
    }
    out.push('/');
    out.push_str(libs_dir_name);
    out
}

/// `{stem}-{hash8}.so.{suffix}` per §4.F step 3, `hash8` being the first 8 hex
/// characters of the SHA-256 digest of the source file's bytes.
fn bundled_name(soname: &str, source_path: &Path) -> Result<String, Error> {
    let mut file = File::open(source_path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    let digest = Sha256::digest(&bytes);
    let mut hash8 = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        use std::fmt::Write;
        write!(&mut hash8, "{byte:02x}").expect("writing to a String never fails");
    }
    let (stem, suffix) = split_soname(soname);
    Ok(match suffix {
        Some(suffix) => format!("{stem}-{hash8}.so.{suffix}"),
        None => format!("{stem}-{hash8}.so"),
    })
}

/// Split a soname such as `libfoo.so.1.2.3` into `("libfoo", Some("1.2.3"))`, or
/// `libz.so` into `("libz", None)`. Falls back to treating the whole soname as the
/// stem if it has no `.so` component at all.
fn split_soname(soname: &str) -> (&str, Option<&str>) {
    let Some(index) = soname.find(".so") else {
        return (soname, None);
    };
    let stem = &soname[..index];
    let rest = &soname[index + 3..];
    match rest.strip_prefix('.') {
        Some(suffix) if !suffix.is_empty() => (stem, Some(suffix)),
        _ => (stem, None),
    }
}

/// Order patches so every grafted library is patched before its dependents (§5),
/// using Kahn's algorithm over the subgraph of patched binaries. A cycle among
/// grafted libraries (libc/libdl-style) has no semantic effect on scoring, so any
/// leftover cycle members are appended in a deterministic (path) order rather than
/// left unordered.
fn topological_order(
    graph: &DependencyGraph,
    patches: Vec<BinaryPatch>,
    dest_by_source: &BTreeMap<PathBuf, PathBuf>,
) -> Vec<BinaryPatch> {
    let index_by_path: BTreeMap<PathBuf, usize> = patches
        .iter()
        .enumerate()
        .map(|(i, p)| (p.path.clone(), i))
        .collect();
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); patches.len()];
    let mut in_degree: Vec<usize> = vec![0; patches.len()];

    for node in graph.externals.values() {
        let Some(dest) = dest_by_source.get(&node.path) else {
            continue;
        };
        let Some(&library_index) = index_by_path.get(dest) else {
            continue;
        };
        for importer in node.importers.iter() {
            let importer_identity = if graph.roots.contains(importer) {
                importer.clone()
            } else if let Some(dest) = dest_by_source.get(importer) {
                dest.clone()
            } else {
                continue;
            };
            let Some(&importer_index) = index_by_path.get(&importer_identity) else {
                continue;
            };
            if importer_index != library_index {
                adjacency[library_index].push(importer_index);
                in_degree[importer_index] += 1;
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..patches.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut visited = vec![false; patches.len()];
    let mut order = Vec::with_capacity(patches.len());
    while let Some(i) = queue.pop_front() {
        if visited[i] {
            continue;
        }
        visited[i] = true;
        order.push(i);
        for &next in adjacency[i].iter() {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }
    let mut leftover: Vec<usize> = (0..patches.len()).filter(|&i| !visited[i]).collect();
    leftover.sort_by(|&a, &b| patches[a].path.cmp(&patches[b].path));
    order.extend(leftover);

    let mut slots: Vec<Option<BinaryPatch>> = patches.into_iter().map(Some).collect();
    order
        .into_iter()
        .map(|i| slots[i].take().expect("each index appears once"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_soname_with_numeric_suffix() {
        assert_eq!(split_soname("libfoo.so.1.2.3"), ("libfoo", Some("1.2.3")));
    }

    #[test]
    fn splits_bare_soname() {
        assert_eq!(split_soname("libz.so"), ("libz", None));
    }

    #[test]
    fn falls_back_when_no_so_component() {
        assert_eq!(split_soname("libweird"), ("libweird", None));
    }

    #[test]
    fn origin_relative_path_for_nested_root() {
        assert_eq!(
            origin_relative_to_libs(Path::new("mypackage"), "mypackage.libs"),
            "$ORIGIN/../mypackage.libs"
        );
    }

    #[test]
    fn origin_relative_path_for_top_level_root() {
        assert_eq!(
            origin_relative_to_libs(Path::new(""), "mypackage.libs"),
            "$ORIGIN/mypackage.libs"
        );
    }

    #[test]
    fn origin_relative_path_for_grafted_sibling() {
        assert_eq!(
            origin_relative_to_libs(Path::new("mypackage.libs"), "mypackage.libs"),
            "$ORIGIN"
        );
    }
}

//! The transitive dependency graph over a set of root binaries: §4.C.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::path::PathBuf;

use auditelf::Elf;
use auditelf::SymbolVersion;

use crate::fs::File;
use crate::DynamicLoader;
use crate::Error;

/// One external library reached, directly or transitively, from a root binary.
///
/// Keyed by soname in [`DependencyGraph::externals`]; a soname that resolves to two
/// different absolute paths from two search contexts is a [`Error::SonameConflict`],
/// not two nodes.
#[derive(Debug, Clone)]
pub struct ExternalNode {
    /// This library's soname, as every importer referred to it by.
    pub soname: String,
    /// The single absolute path this soname resolved to.
    pub path: PathBuf,
    /// Every root or external binary that depends on this library, directly.
    pub importers: BTreeSet<PathBuf>,
    /// The union, over every importer, of the versioned symbols it requests from
    /// this library.
    pub symbol_versions: BTreeSet<SymbolVersion>,
    /// The union, over every importer, of the plain (unversioned) symbol names it
    /// requests from this library — used only for blacklist scoring.
    pub imported_names: BTreeSet<String>,
}

/// A `DT_NEEDED` entry that did not resolve to a file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
    /// The soname that could not be found.
    pub soname: String,
    /// The binary that depends on it.
    pub dependent: PathBuf,
}

/// The transitive closure of resolved library paths reachable from a set of root
/// binaries, plus the versioned symbols actually imported from each.
#[derive(Debug)]
pub struct DependencyGraph {
    /// The archive's own binaries; never treated as external, even if some other
    /// binary happens to depend on one of them by path.
    pub roots: Vec<PathBuf>,
    /// External libraries reached from the roots, keyed by soname.
    pub externals: BTreeMap<String, ExternalNode>,
    /// `DT_NEEDED` entries that did not resolve.
    pub unresolved: Vec<Unresolved>,
    /// The architecture token shared by every root (§4.D); `None` if no root had a
    /// recognized architecture.
    pub arch: Option<&'static str>,
}

impl DependencyGraph {
    /// Build the dependency graph over `roots`, using `loader` to resolve each
    /// `DT_NEEDED` entry and `page_size` to load each ELF file.
    ///
    /// Fails with [`Error::HeterogeneousArchive`] if the roots span more than one
    /// architecture; never fails on an individual unresolved dependency (see
    /// [`DependencyGraph::unresolved`]) since that is only fatal once a repair plan
    /// tries to graft it.
    pub fn build(roots: &[PathBuf], loader: &DynamicLoader) -> Result<Self, Error> {
        let roots: Vec<PathBuf> = roots.to_vec();
        let mut arch = None;
        for root in roots.iter() {
            let mut file = File::open(root)?;
            let elf = Elf::load(&mut file, loader.page_size())?;
            let root_arch = auditelf::policy_arch(elf.arch(), elf.class(), elf.byte_order());
            match (arch, root_arch) {
                (None, _) => arch = root_arch,
                (Some(a), Some(b)) if a != b => {
                    return Err(Error::HeterogeneousArchive(a.to_string(), b.to_string()));
                }
                _ => {}
            }
        }

        let mut externals: BTreeMap<String, ExternalNode> = BTreeMap::new();
        let mut unresolved = Vec::new();
        let mut enqueued: BTreeSet<PathBuf> = roots.iter().cloned().collect();
        let mut queue: VecDeque<(PathBuf, Vec<PathBuf>)> =
            roots.iter().map(|root| (root.clone(), Vec::new())).collect();

        while let Some((dependent, ancestor_rpaths)) = queue.pop_front() {
            let (needed, _interpreter) = loader.resolve_needed(&dependent, &ancestor_rpaths)?;
            let mut file = File::open(&dependent)?;
            let elf = Elf::load(&mut file, loader.page_size())?;
            let versioned = elf.versioned_symbols();

            for (soname, resolved) in needed {
                let Some(path) = resolved else {
                    unresolved.push(Unresolved {
                        soname,
                        dependent: dependent.clone(),
                    });
                    continue;
                };
                if roots.contains(&path) {
                    // A binary in the archive depending on a sibling binary by path;
                    // siblings are never grafted into themselves.
                    continue;
                }
                let imported_names = elf.imported_symbol_names_from(&soname);
                let node = match externals.get_mut(&soname) {
                    Some(node) if node.path == path => node,
                    Some(node) => {
                        return Err(Error::SonameConflict(soname, node.path.clone(), path));
                    }
                    None => externals.entry(soname.clone()).or_insert_with(|| ExternalNode {
                        soname: soname.clone(),
                        path: path.clone(),
                        importers: BTreeSet::new(),
                        symbol_versions: BTreeSet::new(),
                        imported_names: BTreeSet::new(),
                    }),
                };
                node.importers.insert(dependent.clone());
                if let Some(versions) = versioned.get(soname.as_str()) {
                    node.symbol_versions.extend(versions.iter().map(|v| (*v).clone()));
                }
                node.imported_names.extend(imported_names.into_iter().map(str::to_string));

                if enqueued.insert(path.clone()) {
                    let mut child_ancestors = Vec::with_capacity(ancestor_rpaths.len() + 1);
                    child_ancestors.extend(loader.rpath_dirs(&dependent)?);
                    child_ancestors.extend(ancestor_rpaths.iter().cloned());
                    queue.push_back((path, child_ancestors));
                }
            }
        }

        Ok(Self {
            roots,
            externals,
            unresolved,
            arch,
        })
    }

    /// Whether this graph's roots include no ELF binaries at all — a "pure" Python
    /// wheel with no native extensions.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Look up an external node by soname.
    pub fn external(&self, soname: &str) -> Option<&ExternalNode> {
        self.externals.get(soname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_roots_produce_empty_graph() {
        let loader = DynamicLoader::options().new_loader();
        let graph = DependencyGraph::build(&[], &loader).unwrap();
        assert!(graph.is_empty());
        assert!(graph.externals.is_empty());
        assert!(graph.unresolved.is_empty());
    }
}

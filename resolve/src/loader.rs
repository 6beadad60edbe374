use std::borrow::Borrow;
use std::env::split_paths;
use std::ffi::OsStr;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::iter::IntoIterator;
use std::os::unix::ffi::OsStrExt;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use crate::fs::File;
use auditelf::Class;
use auditelf::Elf;
use auditelf::Machine;
use log::trace;
use log::warn;

use crate::Error;

/// Dependency table.
///
/// Acts as a dependency resolution cache as well.
#[derive(Debug)]
pub struct DependencyTree {
    dependencies: Vec<(PathBuf, Vec<PathBuf>)>,
}

impl DependencyTree {
    /// Create empty dependency tree.
    pub const fn new() -> Self {
        Self {
            dependencies: Vec::new(),
        }
    }

    /// Check if the tree contains the dependent specified by its canonical path.
    pub fn contains<P>(&self, canonical_path: &P) -> bool
    where
        PathBuf: Borrow<P>,
        P: Ord + ?Sized,
    {
        self.dependencies
            .binary_search_by(|(dependent, _)| dependent.borrow().cmp(canonical_path))
            .is_ok()
    }

    /// Get dependencies by canonical path of the dependent.
    pub fn get<P>(&self, canonical_path: &P) -> Option<&[PathBuf]>
    where
        PathBuf: Borrow<P>,
        P: Ord + ?Sized,
    {
        self.dependencies
            .binary_search_by(|(dependent, _)| dependent.borrow().cmp(canonical_path))
            .ok()
            .map(|i| self.dependencies[i].1.as_slice())
    }

    /// Insert new dependent and its dependencies.
    ///
    /// Returns the previous value if any.
    pub fn insert(
        &mut self,
        dependent: PathBuf,
        dependencies: Vec<PathBuf>,
    ) -> Option<Vec<PathBuf>> {
        match self
            .dependencies
            .binary_search_by(|(x, _)| x.cmp(&dependent))
        {
            Ok(i) => Some(std::mem::replace(&mut self.dependencies[i].1, dependencies)),
            Err(i) => {
                self.dependencies.insert(i, (dependent, dependencies));
                None
            }
        }
    }

    /// Remove the dependent and its dependencies from the tree.
    pub fn remove<P>(&mut self, canonical_path: &P) -> Option<Vec<PathBuf>>
    where
        PathBuf: Borrow<P>,
        P: Ord + ?Sized,
    {
        self.dependencies
            .binary_search_by(|(dependent, _)| dependent.borrow().cmp(canonical_path))
            .ok()
            .map(|i| self.dependencies.remove(i).1)
    }

    /// Get the number of dependents in the tree.
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// Returns `true` if the tree doesn't have any dependents.
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}

impl Default for DependencyTree {
    fn default() -> Self {
        Self::new()
    }
}

impl IntoIterator for DependencyTree {
    type Item = (PathBuf, Vec<PathBuf>);
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.dependencies.into_iter()
    }
}

/// Dynamic linker implementation that we're emulating.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub enum Libc {
    /// GNU libc.
    #[default]
    Glibc,
    /// Musl libc.
    Musl,
    /// Could not be determined from the interpreter path.
    Unknown,
}

impl Libc {
    /// Infer the libc flavor consumed by a binary from its `PT_INTERP` path.
    ///
    /// Matches `/lib*/ld-linux*.so.*` for glibc and `/lib/ld-musl-*` for musl, the
    /// same patterns the loaders themselves install under.
    pub fn detect(interpreter: Option<&str>) -> Self {
        let Some(interpreter) = interpreter else {
            return Libc::Unknown;
        };
        let file_name = Path::new(interpreter)
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or(interpreter);
        if file_name.starts_with("ld-musl-") {
            Libc::Musl
        } else if file_name.starts_with("ld-linux") || file_name == "ld.so.1" {
            Libc::Glibc
        } else {
            Libc::Unknown
        }
    }
}

/// Dynamic loader options.
pub struct LoaderOptions {
    search_dirs: Vec<PathBuf>,
    search_dirs_override: Vec<PathBuf>,
    ld_so_cache: Vec<(String, PathBuf)>,
    lib: Option<OsString>,
    platform: Option<OsString>,
    page_size: u64,
    libc: Libc,
    chain_walk: bool,
}

impl LoaderOptions {
    /// Default options.
    pub fn new() -> Self {
        Self {
            search_dirs: Default::default(),
            search_dirs_override: Default::default(),
            ld_so_cache: Default::default(),
            lib: None,
            platform: None,
            page_size: 4096,
            libc: Default::default(),
            chain_walk: true,
        }
    }

    /// Glibc-specific options.
    ///
    /// Also loads `<rootfs_dir>/etc/ld.so.cache`, consulted as a fallback once a
    /// `DT_NEEDED` entry isn't found by walking `RUNPATH`/`RPATH`/`LD_LIBRARY_PATH`
    /// and the configured search directories directly (§4.B step 2(d)).
    #[cfg(feature = "glibc")]
    pub fn glibc<P: AsRef<Path>>(rootfs_dir: P) -> Result<Self, std::io::Error> {
        let rootfs_dir = rootfs_dir.as_ref();
        let ld_so_cache = crate::glibc::read_ld_so_cache(rootfs_dir)?
            .into_iter()
            .map(|entry| (entry.soname, entry.path))
            .collect();
        Ok(Self {
            search_dirs: crate::glibc::get_search_dirs(rootfs_dir)?,
            search_dirs_override: get_search_dirs_from_env(),
            ld_so_cache,
            libc: Libc::Glibc,
            ..Default::default()
        })
    }

    /// Musl-specific options.
    #[cfg(feature = "musl")]
    pub fn musl<P: AsRef<Path>>(rootfs_dir: P, arch: &str) -> Result<Self, std::io::Error> {
        Ok(Self {
            search_dirs: crate::musl::get_search_dirs(rootfs_dir, arch)?,
            search_dirs_override: get_search_dirs_from_env(),
            libc: Libc::Musl,
            ..Default::default()
        })
    }

    /// Dynamic linker implementation that we're emulating.
    ///
    /// Affects library search order only.
    ///
    /// To also set library search directories, use [`glibc`](Self::glibc) and [`musl`](Self::musl)
    /// constructors.
    pub fn libc(mut self, libc: Libc) -> Self {
        self.libc = libc;
        self
    }

    /// Directories where to look for libraries *after* searching in the `RUNPATH` or in the
    /// `RPATH`.
    ///
    /// Use the following functions to initialize this field.
    /// - Glibc: [`glibc::get_search_dirs`](crate::glibc::get_search_dirs).
    /// - Musl: [`musl::get_search_dirs`](crate::musl::get_search_dirs).
    pub fn search_dirs(mut self, search_dirs: Vec<PathBuf>) -> Self {
        self.search_dirs = search_dirs;
        self
    }

    /// Directories where to look for libraries *before* searching in the `RUNPATH`.
    ///
    /// This list doesn't affect `RPATH`-based lookup.
    ///
    /// Use [`get_search_dirs_from_env`](crate::get_search_dirs_from_env) to initialize this field.
    pub fn search_dirs_override(mut self, search_dirs: Vec<PathBuf>) -> Self {
        self.search_dirs_override = search_dirs;
        self
    }

    /// Set page size.
    ///
    /// Panics if the size is not a power of two.
    pub fn page_size(mut self, page_size: u64) -> Self {
        assert!(page_size.is_power_of_two());
        self.page_size = page_size;
        self
    }

    /// Set library directory name.
    ///
    /// This value is used to substitute `$LIB` variable in `RPATH` and `RUNPATH`.
    ///
    /// When not set `lib` is used for 32-bit arhitectures and `lib64` is used for 64-bit
    /// architectures.
    pub fn lib(mut self, lib: Option<OsString>) -> Self {
        self.lib = lib;
        self
    }

    /// Set platform directory name.
    ///
    /// This value is used to substitute `$PLATFORM` variable in `RPATH` and `RUNPATH`.
    ///
    /// When not set the platform is interpolated based on [`Machine`](auditelf::Machine)
    /// (best-effort).
    pub fn platform(mut self, platform: Option<OsString>) -> Self {
        self.platform = platform;
        self
    }

    /// Whether to fall back to the legacy ancestor-`RPATH` chain walk when a
    /// dependent has no `RUNPATH` of its own.
    ///
    /// Defaults to `true`, matching the historical GNU ld.so behaviour. Disable
    /// this in stricter test environments that want to pin the search order to
    /// the dependent's own paths only.
    pub fn chain_walk(mut self, chain_walk: bool) -> Self {
        self.chain_walk = chain_walk;
        self
    }

    /// Create new dynamic loader using the current options.
    pub fn new_loader(self) -> DynamicLoader {
        DynamicLoader {
            search_dirs: self.search_dirs,
            search_dirs_override: self.search_dirs_override,
            ld_so_cache: self.ld_so_cache,
            lib: self.lib,
            platform: self.platform,
            page_size: self.page_size,
            libc: self.libc,
            chain_walk: self.chain_walk,
        }
    }
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Dynamic loader.
///
/// Resolves ELF dependencies without loading and executing the files.
pub struct DynamicLoader {
    search_dirs: Vec<PathBuf>,
    search_dirs_override: Vec<PathBuf>,
    ld_so_cache: Vec<(String, PathBuf)>,
    lib: Option<OsString>,
    platform: Option<OsString>,
    page_size: u64,
    libc: Libc,
    chain_walk: bool,
}

impl DynamicLoader {
    /// Get default loader options.
    pub fn options() -> LoaderOptions {
        LoaderOptions::new()
    }

    /// Page size this loader was configured with.
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Dynamic linker implementation this loader emulates.
    pub fn libc(&self) -> Libc {
        self.libc
    }

    /// Read `path`'s own `DT_RPATH` entries, interpolated relative to `path`.
    ///
    /// Used by callers (the dependency graph builder) to implement the legacy
    /// ancestor chain-walk: `RPATH` of everything between a dependent and the root
    /// binary is searched when the dependent itself carries no `RUNPATH`.
    pub fn rpath_dirs(&self, path: &Path) -> Result<Vec<PathBuf>, Error> {
        let mut file = File::open(path)?;
        let elf = Elf::load(&mut file, self.page_size)?;
        Ok(elf
            .rpath()
            .into_iter()
            .map(|raw| interpolate(Path::new(raw), path, &elf, self.lib.as_deref(), self.platform.as_deref()))
            .collect())
    }

    /// Find immediate dependencies of the ELF `file`.
    ///
    /// `ancestor_rpaths` lists the already-interpolated `RPATH` directories of every
    /// ancestor between `file` and the root binary, nearest first; pass an empty
    /// slice for a root binary. They are only consulted when `file` carries no
    /// `RUNPATH` of its own and [`chain_walk`](LoaderOptions::chain_walk) is enabled.
    ///
    /// To find all dependencies, recursively pass each returned path to this method again.
    pub fn resolve_dependencies<P: Into<PathBuf>>(
        &self,
        file: P,
        tree: &mut DependencyTree,
        ancestor_rpaths: &[PathBuf],
    ) -> Result<Vec<PathBuf>, Error> {
        let dependent_file: PathBuf = file.into();
        if tree.contains(&dependent_file) {
            return Ok(Default::default());
        }
        let mut dependencies: Vec<PathBuf> = Vec::new();
        let mut file = File::open(&dependent_file)?;
        let elf = Elf::load(&mut file, self.page_size)?;
        let interpreter = elf.interpreter(&mut file)?.map(PathBuf::from);
        let search_dirs = self.search_dirs_for(&dependent_file, &elf, ancestor_rpaths);

        for dep_name in elf.needed() {
            trace!("{:?} depends on {:?}", dependent_file, dep_name);
            if dep_name.contains('/') {
                let path = if let Some(parent) = dependent_file.parent() {
                    parent.join(dep_name)
                } else {
                    PathBuf::from(dep_name)
                };
                dependencies.push(path);
                continue;
            }
            if !self.resolve_one(dep_name, &elf, &search_dirs, interpreter.as_deref(), &mut dependencies)? {
                return Err(Error::FailedToResolve(dep_name.into(), dependent_file));
            }
        }
        if let Some(interpreter) = interpreter {
            if !dependencies.contains(&interpreter) {
                dependencies.push(interpreter);
            }
        }
        tree.insert(dependent_file, dependencies.clone());
        dependencies.retain(|dep| !tree.contains(dep));
        Ok(dependencies)
    }

    /// Resolve `file`'s immediate `DT_NEEDED` entries without aborting on the first
    /// unresolved one.
    ///
    /// Returns one `(soname, resolved path)` pair per `DT_NEEDED` entry, in order;
    /// the path is `None` when the soname could not be found in the search path.
    /// This is what the dependency graph builder uses, since an unresolved library
    /// is recorded rather than fatal at this stage (`show` only fails to grant a
    /// policy over it; `repair` fails only if asked to graft it).
    pub fn resolve_needed(
        &self,
        dependent_file: &Path,
        ancestor_rpaths: &[PathBuf],
    ) -> Result<(Vec<(String, Option<PathBuf>)>, Option<PathBuf>), Error> {
        let mut file = File::open(dependent_file)?;
        let elf = Elf::load(&mut file, self.page_size)?;
        let interpreter = elf.interpreter(&mut file)?.map(PathBuf::from);
        let search_dirs = self.search_dirs_for(dependent_file, &elf, ancestor_rpaths);

        let mut needed = Vec::new();
        for dep_name in elf.needed() {
            if dep_name.contains('/') {
                let path = match dependent_file.parent() {
                    Some(parent) => parent.join(dep_name),
                    None => PathBuf::from(dep_name),
                };
                needed.push((dep_name.to_string(), Some(path)));
                continue;
            }
            let mut resolved = Vec::new();
            let found = self.resolve_one(dep_name, &elf, &search_dirs, interpreter.as_deref(), &mut resolved)?;
            needed.push((dep_name.to_string(), found.then(|| resolved.pop()).flatten()));
        }
        Ok((needed, interpreter))
    }

    /// Compute the ordered list of directories searched to resolve `dependent_file`'s
    /// own `DT_NEEDED` entries: §4.B steps 2(a)-2(e).
    fn search_dirs_for(
        &self,
        dependent_file: &Path,
        elf: &Elf,
        ancestor_rpaths: &[PathBuf],
    ) -> Vec<PathBuf> {
        let runpath = elf.runpath();
        let rpath = elf.rpath();
        let has_runpath = !runpath.is_empty();
        let override_dirs = match self.libc {
            Libc::Glibc | Libc::Unknown => has_runpath,
            Libc::Musl => true,
        };

        let mut search_dirs = Vec::new();
        if override_dirs {
            // Directories that are searched before RUNPATH/RPATH.
            search_dirs.extend_from_slice(self.search_dirs_override.as_slice());
        }
        let interpolate_each = |raws: Vec<&str>, search_dirs: &mut Vec<PathBuf>| {
            search_dirs.extend(raws.into_iter().map(|raw| {
                interpolate(
                    Path::new(raw),
                    dependent_file,
                    elf,
                    self.lib.as_deref(),
                    self.platform.as_deref(),
                )
            }));
        };
        match self.libc {
            Libc::Glibc | Libc::Unknown => {
                if has_runpath {
                    interpolate_each(runpath, &mut search_dirs);
                } else {
                    // Legacy semantics: GNU ld.so searches the RPATH of every binary
                    // on the way from the root to the dependent (nearest first)
                    // before its own RPATH, but only when the dependent has no
                    // RUNPATH at all.
                    if self.chain_walk {
                        search_dirs.extend(ancestor_rpaths.iter().cloned());
                    }
                    interpolate_each(rpath, &mut search_dirs);
                }
            }
            Libc::Musl => interpolate_each(
                rpath.into_iter().chain(runpath).collect(),
                &mut search_dirs,
            ),
        }
        // Directories that are searched after RUNPATH or RPATH.
        search_dirs.extend_from_slice(self.search_dirs.as_slice());
        search_dirs
    }

    /// Try each directory in `search_dirs` in order, returning `true` and pushing
    /// the resolved path once a matching-class, matching-machine ELF file named
    /// `dep_name` is found.
    fn resolve_one(
        &self,
        dep_name: &str,
        dependent: &Elf,
        search_dirs: &[PathBuf],
        interpreter: Option<&Path>,
        dependencies: &mut Vec<PathBuf>,
    ) -> Result<bool, Error> {
        for dir in search_dirs.iter() {
            let path = dir.join(dep_name);
            let mut file = match File::open(&path) {
                Ok(file) => file,
                Err(ref e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!("Failed to open {path:?}: {e}");
                    continue;
                }
            };
            let dep = match Elf::read_unchecked(&mut file, self.page_size) {
                Ok(dep) => dep,
                Err(auditelf::Error::NotElf) => continue,
                Err(e) => return Err(e.into()),
            };
            if dep.byte_order() == dependent.byte_order()
                && dep.class() == dependent.class()
                && dep.arch() == dependent.arch()
            {
                trace!("Resolved {:?} as {:?}", dep_name, path);
                if Some(path.as_path()) != interpreter {
                    dependencies.push(path);
                }
                return Ok(true);
            }
        }
        // Fall back to `/etc/ld.so.cache`: consulted by the real glibc loader after
        // RUNPATH/RPATH/LD_LIBRARY_PATH and before returning a not-found error.
        for (soname, path) in self.ld_so_cache.iter() {
            if soname != dep_name {
                continue;
            }
            let mut file = match File::open(path) {
                Ok(file) => file,
                Err(_) => continue,
            };
            let dep = match Elf::read_unchecked(&mut file, self.page_size) {
                Ok(dep) => dep,
                Err(auditelf::Error::NotElf) => continue,
                Err(e) => return Err(e.into()),
            };
            if dep.byte_order() == dependent.byte_order()
                && dep.class() == dependent.class()
                && dep.arch() == dependent.arch()
            {
                trace!("Resolved {:?} via ld.so.cache as {:?}", dep_name, path);
                if Some(path.as_path()) != interpreter {
                    dependencies.push(path.clone());
                }
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Get library search directories from the environment variables.
///
/// These directories override default search directories unless an executable has `RPATH`.
///
/// Uses `LD_LIBRARY_PATH` environemnt variable.
pub fn get_search_dirs_from_env() -> Vec<PathBuf> {
    std::env::var_os("LD_LIBRARY_PATH")
        .map(|path| split_paths(&path).collect())
        .unwrap_or_default()
}

fn interpolate(
    dir: &Path,
    file: &Path,
    elf: &Elf,
    lib: Option<&OsStr>,
    platform: Option<&OsStr>,
) -> PathBuf {
    use Component::*;
    let mut interpolated = PathBuf::new();
    for comp in dir.components() {
        match comp {
            Normal(comp) if comp == "$ORIGIN" || comp == "${ORIGIN}" => {
                if let Some(parent) = file.parent() {
                    interpolated.push(parent);
                } else {
                    interpolated.push(comp);
                }
            }
            Normal(comp) if comp == "$LIB" || comp == "${LIB}" => {
                let lib = match lib {
                    Some(lib) => lib,
                    None => match elf.class() {
                        Class::Elf32 => OsStr::new("lib"),
                        Class::Elf64 => OsStr::new("lib64"),
                    },
                };
                interpolated.push(lib);
            }
            Normal(comp) if comp == "$PLATFORM" || comp == "${PLATFORM}" => {
                if let Some(platform) = platform {
                    interpolated.push(platform);
                } else {
                    let platform = match elf.arch() {
                        Machine::X86_64 => "x86_64",
                        _ => {
                            warn!(
                                "Failed to interpolate $PLATFORM, machine is {:?} ({})",
                                elf.arch(),
                                elf.arch().as_u16()
                            );
                            interpolated.push(comp);
                            continue;
                        }
                    };
                    interpolated.push(platform);
                }
            }
            comp => interpolated.push(comp),
        }
    }
    interpolated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_glibc_interpreter() {
        assert_eq!(
            Libc::detect(Some("/lib64/ld-linux-x86-64.so.2")),
            Libc::Glibc
        );
    }

    #[test]
    fn detects_musl_interpreter() {
        assert_eq!(
            Libc::detect(Some("/lib/ld-musl-x86_64.so.1")),
            Libc::Musl
        );
    }

    #[test]
    fn unknown_interpreter_is_unknown() {
        assert_eq!(Libc::detect(Some("/opt/custom/ld.so")), Libc::Unknown);
        assert_eq!(Libc::detect(None), Libc::Unknown);
    }
}

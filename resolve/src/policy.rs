//! Platform ABI policies and scoring a dependency graph against them.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use auditelf::SymbolVersion;
use serde::Deserialize;
use serde::Serialize;

use crate::DependencyGraph;
use crate::Error;

/// One entry of the policy table as it appears in the JSON document: `name`,
/// `aliases`, `priority`, `symbol_versions`, `lib_whitelist`, `blacklist`.
///
/// Deserialized directly from the embedded or user-supplied `policies.json`; see
/// [`Policy`] for the form scoring actually uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyElement {
    /// The policy's canonical name, e.g. `manylinux_2_17_x86_64`.
    pub name: String,
    /// Other names this policy is also known by, e.g. `manylinux2014_x86_64`.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Higher priority means a stricter (more portable) policy.
    pub priority: i64,
    /// Maximum allowed version per symbol-version group, e.g. `"GLIBC" -> "2.17"`.
    #[serde(default)]
    pub symbol_versions: BTreeMap<String, String>,
    /// Sonames of libraries assumed present on any conforming host.
    #[serde(default)]
    pub lib_whitelist: BTreeSet<String>,
    /// Plain symbol names that are never allowed from a given whitelisted library.
    #[serde(default)]
    pub blacklist: BTreeMap<String, BTreeSet<String>>,
}

/// A policy, with its `symbol_versions` parsed into comparable [`SymbolVersion`]s.
#[derive(Debug, Clone)]
pub struct Policy {
    /// The policy's canonical name.
    pub name: String,
    /// Other names this policy is also known by.
    pub aliases: Vec<String>,
    /// Higher priority means a stricter (more portable) policy.
    pub priority: i64,
    /// Maximum allowed version per symbol-version group.
    pub symbol_versions: BTreeMap<String, SymbolVersion>,
    /// Sonames of libraries assumed present on any conforming host.
    pub lib_whitelist: BTreeSet<String>,
    /// Plain symbol names that are never allowed from a given whitelisted library.
    pub blacklist: BTreeMap<String, BTreeSet<String>>,
}

impl From<PolicyElement> for Policy {
    fn from(element: PolicyElement) -> Self {
        let symbol_versions = element
            .symbol_versions
            .into_iter()
            .map(|(group, version)| (group.clone(), SymbolVersion::new(format!("{group}_{version}"))))
            .collect();
        Policy {
            name: element.name,
            aliases: element.aliases,
            priority: element.priority,
            symbol_versions,
            lib_whitelist: element.lib_whitelist,
            blacklist: element.blacklist,
        }
    }
}

impl Policy {
    /// Architecture token this policy's name ends in, e.g. `"x86_64"` out of
    /// `"manylinux_2_28_x86_64"`.
    ///
    /// Assumes policy names end in the arch token the way the embedded table's
    /// `manylinux`/`musllinux`/`linux` families all do.
    pub fn arch(&self) -> Option<&str> {
        POLICY_ARCH_TOKENS
            .iter()
            .find(|arch| self.name.ends_with(*arch))
            .copied()
    }
}

/// Architecture tokens recognized in policy names, longest first so e.g.
/// `"aarch64"` doesn't get shadowed by a shorter false match.
const POLICY_ARCH_TOKENS: &[&str] = &[
    "loongarch64",
    "riscv64",
    "ppc64le",
    "aarch64",
    "armv7l",
    "s390x",
    "ppc64",
    "x86_64",
    "i686",
];

/// An ordered table of policies, indexed by priority descending.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: Vec<Policy>,
}

impl PolicyTable {
    /// Parse a `PolicyElement[]` JSON document into a table sorted by priority,
    /// highest (strictest) first.
    pub fn from_json(data: &[u8]) -> Result<Self, Error> {
        let elements: Vec<PolicyElement> =
            serde_json::from_slice(data).map_err(|e| Error::Policy(e.to_string()))?;
        let mut policies: Vec<Policy> = elements.into_iter().map(Policy::from).collect();
        policies.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(Self { policies })
    }

    /// All policies, highest priority first.
    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter()
    }

    /// Policies whose architecture token matches `arch`, highest priority first.
    pub fn for_arch<'a>(&'a self, arch: &'a str) -> impl Iterator<Item = &'a Policy> {
        self.policies
            .iter()
            .filter(move |policy| policy.arch() == Some(arch) || policy.name == "linux")
    }

    /// Find a policy by name or alias.
    pub fn find(&self, name: &str) -> Option<&Policy> {
        self.policies
            .iter()
            .find(|policy| policy.name == name || policy.aliases.iter().any(|a| a == name))
    }
}

/// One violation found while scoring a graph against a policy. Does not
/// disqualify the graph outright by itself — see [`Scoring`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A whitelisted library's imported symbol version exceeds the policy maximum.
    PolicyViolation {
        /// The symbol version group, e.g. `GLIBC`.
        group: String,
        /// The version actually requested.
        actual: SymbolVersion,
        /// The highest version the policy allows for this group.
        max: SymbolVersion,
    },
    /// A whitelisted library's imported symbol is blacklisted by the policy.
    BlacklistedSymbol {
        /// The library the symbol is imported from.
        library: String,
        /// The blacklisted plain symbol name.
        symbol: String,
    },
}

/// The result of scoring one [`DependencyGraph`] against one [`Policy`].
#[derive(Debug, Clone)]
pub struct Scoring {
    /// Sonames of external libraries not in the policy's whitelist.
    pub graft_candidates: Vec<String>,
    /// Every symbol-version or blacklist violation found among whitelisted
    /// libraries. Non-empty means the policy is not symbol-compatible.
    pub violations: Vec<Violation>,
}

impl Scoring {
    /// Whether this policy is symbol-compatible with the scored graph: every
    /// whitelisted library's imported symbols respect the version ceiling and
    /// none are blacklisted. Graft candidates don't disqualify this — they are
    /// what `repair` fixes.
    pub fn is_symbol_compatible(&self) -> bool {
        self.violations.is_empty()
    }

    /// Whether this policy is whitelist-compatible: every external library the
    /// graph depends on is already whitelisted, so `repair` would have nothing
    /// to graft.
    pub fn is_whitelist_compatible(&self) -> bool {
        self.graft_candidates.is_empty()
    }
}

/// Score `graph` against `policy`: §4.D steps 1-3.
pub fn score_policy(graph: &DependencyGraph, policy: &Policy) -> Scoring {
    let mut graft_candidates = Vec::new();
    let mut violations = Vec::new();
    for node in graph.externals.values() {
        if !policy.lib_whitelist.contains(&node.soname) {
            graft_candidates.push(node.soname.clone());
            continue;
        }
        for version in node.symbol_versions.iter() {
            let group = version.group();
            if let Some(max) = policy.symbol_versions.get(group) {
                if version > max {
                    violations.push(Violation::PolicyViolation {
                        group: group.to_string(),
                        actual: version.clone(),
                        max: max.clone(),
                    });
                }
            }
        }
        if let Some(blacklisted) = policy.blacklist.get(&node.soname) {
            for symbol in node.imported_names.iter() {
                if blacklisted.contains(symbol) {
                    violations.push(Violation::BlacklistedSymbol {
                        library: node.soname.clone(),
                        symbol: symbol.clone(),
                    });
                }
            }
        }
    }
    graft_candidates.sort();
    Scoring {
        graft_candidates,
        violations,
    }
}

/// The outcome of scoring a graph against every eligible policy: §4.D step 4.
#[derive(Debug)]
pub struct BestPolicy<'a> {
    /// Every eligible policy together with its scoring, highest priority first.
    pub scored: Vec<(&'a Policy, Scoring)>,
    /// The highest-priority policy whose whitelisted libraries all pass symbol
    /// and blacklist checks.
    pub symbol_compatible: &'a Policy,
    /// The highest-priority policy with zero graft candidates, if any graph
    /// dependency is whitelisted by some eligible policy at all.
    pub whitelist_compatible: Option<&'a Policy>,
    /// `min(symbol_compatible, whitelist_compatible)` by priority: the policy the
    /// graph actually satisfies today, before any repair.
    pub overall: &'a Policy,
}

/// Score `graph` against every policy in `table` eligible for `graph`'s
/// architecture, and select the overall best one (§4.D step 4).
///
/// `table` must contain at least the permissive `"linux"` policy for `arch`, or
/// this returns [`Error::Policy`].
pub fn best_policy<'a>(
    graph: &DependencyGraph,
    table: &'a PolicyTable,
    arch: &str,
) -> Result<BestPolicy<'a>, Error> {
    let scored: Vec<(&Policy, Scoring)> = table
        .for_arch(arch)
        .map(|policy| (policy, score_policy(graph, policy)))
        .collect();
    if scored.is_empty() {
        return Err(Error::Policy(format!(
            "no policy in the table covers architecture {arch:?}"
        )));
    }
    let symbol_compatible = scored
        .iter()
        .find(|(_, scoring)| scoring.is_symbol_compatible())
        .map(|(policy, _)| *policy)
        .ok_or_else(|| Error::Policy("no policy (not even \"linux\") is symbol-compatible".into()))?;
    let whitelist_compatible = scored
        .iter()
        .find(|(_, scoring)| scoring.is_whitelist_compatible())
        .map(|(policy, _)| *policy);
    let overall = match whitelist_compatible {
        Some(whitelist_compatible) if whitelist_compatible.priority < symbol_compatible.priority => {
            whitelist_compatible
        }
        _ => symbol_compatible,
    };
    Ok(BestPolicy {
        scored,
        symbol_compatible,
        whitelist_compatible,
        overall,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExternalNode;
    use std::collections::BTreeMap as Map;
    use std::path::PathBuf;

    fn policy(name: &str, priority: i64, whitelist: &[&str], max_glibc: Option<&str>) -> Policy {
        let mut symbol_versions = Map::new();
        if let Some(max) = max_glibc {
            symbol_versions.insert("GLIBC".to_string(), SymbolVersion::new(format!("GLIBC_{max}")));
        }
        Policy {
            name: name.to_string(),
            aliases: Vec::new(),
            priority,
            symbol_versions,
            lib_whitelist: whitelist.iter().map(|s| s.to_string()).collect(),
            blacklist: Map::new(),
        }
    }

    fn graph_with(externals: Vec<ExternalNode>) -> DependencyGraph {
        DependencyGraph {
            roots: vec![PathBuf::from("/ext.so")],
            externals: externals
                .into_iter()
                .map(|node| (node.soname.clone(), node))
                .collect(),
            unresolved: Vec::new(),
            arch: Some("x86_64"),
        }
    }

    #[test]
    fn whitelisted_low_version_passes() {
        let node = ExternalNode {
            soname: "libc.so.6".into(),
            path: PathBuf::from("/lib/libc.so.6"),
            importers: Default::default(),
            symbol_versions: [SymbolVersion::new("GLIBC_2.5")].into_iter().collect(),
            imported_names: Default::default(),
        };
        let graph = graph_with(vec![node]);
        let p = policy("manylinux_2_17_x86_64", 100, &["libc.so.6"], Some("2.17"));
        let scoring = score_policy(&graph, &p);
        assert!(scoring.is_symbol_compatible());
        assert!(scoring.is_whitelist_compatible());
    }

    #[test]
    fn excess_version_demotes() {
        let node = ExternalNode {
            soname: "libc.so.6".into(),
            path: PathBuf::from("/lib/libc.so.6"),
            importers: Default::default(),
            symbol_versions: [SymbolVersion::new("GLIBC_2.30")].into_iter().collect(),
            imported_names: Default::default(),
        };
        let graph = graph_with(vec![node]);
        let p = policy("manylinux_2_17_x86_64", 100, &["libc.so.6"], Some("2.17"));
        let scoring = score_policy(&graph, &p);
        assert!(!scoring.is_symbol_compatible());
    }

    #[test]
    fn non_whitelisted_library_is_graft_candidate_not_a_violation() {
        let node = ExternalNode {
            soname: "libfoo.so.1".into(),
            path: PathBuf::from("/usr/local/lib/libfoo.so.1"),
            importers: Default::default(),
            symbol_versions: Default::default(),
            imported_names: Default::default(),
        };
        let graph = graph_with(vec![node]);
        let p = policy("manylinux_2_17_x86_64", 100, &["libc.so.6"], Some("2.17"));
        let scoring = score_policy(&graph, &p);
        assert!(scoring.is_symbol_compatible());
        assert!(!scoring.is_whitelist_compatible());
        assert_eq!(scoring.graft_candidates, vec!["libfoo.so.1".to_string()]);
    }

    #[test]
    fn blacklisted_symbol_demotes() {
        let node = ExternalNode {
            soname: "libz.so.1".into(),
            path: PathBuf::from("/lib/libz.so.1"),
            importers: Default::default(),
            symbol_versions: Default::default(),
            imported_names: ["deflate_old".to_string()].into_iter().collect(),
        };
        let graph = graph_with(vec![node]);
        let mut p = policy("manylinux_2_17_x86_64", 100, &["libz.so.1"], None);
        p.blacklist
            .insert("libz.so.1".to_string(), ["deflate_old".to_string()].into_iter().collect());
        let scoring = score_policy(&graph, &p);
        assert!(!scoring.is_symbol_compatible());
        assert!(matches!(
            scoring.violations[0],
            Violation::BlacklistedSymbol { .. }
        ));
    }

    #[test]
    fn best_policy_picks_min_of_symbol_and_whitelist_compatible() {
        let node = ExternalNode {
            soname: "libfoo.so.1".into(),
            path: PathBuf::from("/usr/local/lib/libfoo.so.1"),
            importers: Default::default(),
            symbol_versions: Default::default(),
            imported_names: Default::default(),
        };
        let graph = graph_with(vec![node]);
        let strict = policy("manylinux_2_17_x86_64", 100, &["libc.so.6"], Some("2.17"));
        let permissive = policy("linux_x86_64", 0, &[], None);
        let table = PolicyTable {
            policies: vec![strict, permissive],
        };
        let best = best_policy(&graph, &table, "x86_64").unwrap();
        assert_eq!(best.overall.name, "linux_x86_64");
    }
}

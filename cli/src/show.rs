//! Presentation: §4.H. Renders a `show` report over a dependency graph and the
//! policies scored against it, either as a colorized text report or as JSON.

use std::io::BufWriter;
use std::io::Stdout;
use std::io::Write;

use auditelf_resolve::BestPolicy;
use auditelf_resolve::DependencyGraph;
use auditelf_resolve::Violation;
use colored::Colorize;
use serde::Serialize;

use crate::Error;

/// `--format` choice for `show`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Colorized report for a terminal.
    Text,
    /// Structured output for scripting.
    Json,
}

/// One external library's report row.
#[derive(Debug, Serialize)]
struct LibraryReport {
    soname: String,
    resolved_path: Option<String>,
    symbol_versions: Vec<String>,
}

/// One policy's report row: whether the archive satisfies it today, and why not.
#[derive(Debug, Serialize)]
struct PolicyReport {
    name: String,
    priority: i64,
    satisfied: bool,
    graft_candidates: Vec<String>,
    violations: Vec<String>,
}

/// The full `show` report, serializable as-is for `--format json`.
#[derive(Debug, Serialize)]
struct Report {
    arch: Option<String>,
    current_tags: Vec<String>,
    overall_policy: String,
    libraries: Vec<LibraryReport>,
    unresolved: Vec<String>,
    policies: Vec<PolicyReport>,
}

fn describe_violation(violation: &Violation) -> String {
    match violation {
        Violation::PolicyViolation { group, actual, max } => {
            format!("{group} symbol version {actual} exceeds policy maximum {max}")
        }
        Violation::BlacklistedSymbol { library, symbol } => {
            format!("symbol {symbol:?} of {library:?} is blacklisted")
        }
    }
}

fn build_report(graph: &DependencyGraph, best: &BestPolicy<'_>, current_tags: &[String]) -> Report {
    let libraries: Vec<LibraryReport> = graph
        .externals
        .values()
        .map(|node| LibraryReport {
            soname: node.soname.clone(),
            resolved_path: Some(node.path.display().to_string()),
            symbol_versions: node.symbol_versions.iter().map(|v| v.to_string()).collect(),
        })
        .collect();
    let unresolved: Vec<String> = graph
        .unresolved
        .iter()
        .map(|u| format!("{} (needed by {})", u.soname, u.dependent.display()))
        .collect();
    let policies: Vec<PolicyReport> = best
        .scored
        .iter()
        .map(|(policy, scoring)| PolicyReport {
            name: policy.name.clone(),
            priority: policy.priority,
            satisfied: scoring.is_symbol_compatible() && scoring.is_whitelist_compatible(),
            graft_candidates: scoring.graft_candidates.clone(),
            violations: scoring.violations.iter().map(describe_violation).collect(),
        })
        .collect();
    Report {
        arch: graph.arch.map(str::to_string),
        current_tags: current_tags.to_vec(),
        overall_policy: best.overall.name.clone(),
        libraries,
        unresolved,
        policies,
    }
}

/// Render `show`'s findings to stdout in the requested format.
pub fn run(
    graph: &DependencyGraph,
    best: &BestPolicy<'_>,
    current_tags: &[String],
    format: Format,
) -> Result<(), Error> {
    let report = build_report(graph, best, current_tags);
    match format {
        Format::Json => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            serde_json::to_writer_pretty(&mut lock, &report)?;
            writeln!(lock)?;
        }
        Format::Text => {
            let mut printer = Printer::new();
            print_text(&report, &mut printer);
        }
    }
    Ok(())
}

fn print_text(report: &Report, printer: &mut Printer) {
    printer.title("Archive");
    printer.kv("Architecture", report.arch.as_deref().unwrap_or("unknown"));
    printer.kv("Current tags", report.current_tags.join(", "));
    printer.kv("Best satisfied policy", report.overall_policy.clone());

    printer.title("External libraries");
    if report.libraries.is_empty() {
        printer.row("(none)".dimmed());
    }
    for library in report.libraries.iter() {
        let path = library.resolved_path.as_deref().unwrap_or("<unresolved>");
        printer.row(format!("{} -> {}", library.soname.bold(), path));
        if !library.symbol_versions.is_empty() {
            printer.row(format!("  versions: {}", library.symbol_versions.join(", ")));
        }
    }

    if !report.unresolved.is_empty() {
        printer.title("Unresolved dependencies");
        for entry in report.unresolved.iter() {
            printer.row(entry.red().to_string());
        }
    }

    printer.title("Policies");
    for policy in report.policies.iter() {
        let status = if policy.satisfied {
            "satisfied".green()
        } else {
            "not satisfied".yellow()
        };
        printer.row(format!("{} (priority {}): {status}", policy.name.bold(), policy.priority));
        for candidate in policy.graft_candidates.iter() {
            printer.row(format!("  would graft: {candidate}"));
        }
        for violation in policy.violations.iter() {
            printer.row(format!("  violation: {violation}"));
        }
    }
}

/// A minimal titled/indented stdout printer, for the human-readable report.
struct Printer {
    first_title: bool,
    writer: BufWriter<Stdout>,
}

impl Printer {
    fn new() -> Self {
        Self {
            first_title: true,
            writer: BufWriter::new(std::io::stdout()),
        }
    }

    fn title(&mut self, title: &str) {
        let newline = if self.first_title {
            self.first_title = false;
            ""
        } else {
            "\n"
        };
        let _ = writeln!(self.writer, "{newline}{}", title.bold().underline());
    }

    fn kv<V: std::fmt::Display>(&mut self, key: &str, value: V) {
        let _ = writeln!(self.writer, "  {}: {value}", key.bold().blue());
    }

    fn row<V: std::fmt::Display>(&mut self, value: V) {
        let _ = writeln!(self.writer, "  {value}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditelf_resolve::score_policy;
    use auditelf_resolve::ExternalNode;
    use auditelf_resolve::Policy;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn graph_with(externals: Vec<ExternalNode>) -> DependencyGraph {
        DependencyGraph {
            roots: vec![PathBuf::from("/root.so")],
            externals: externals.into_iter().map(|n| (n.soname.clone(), n)).collect(),
            unresolved: Vec::new(),
            arch: Some("x86_64"),
        }
    }

    #[test]
    fn report_lists_unsatisfied_policy_violations() {
        let node = ExternalNode {
            soname: "libc.so.6".into(),
            path: PathBuf::from("/lib/libc.so.6"),
            importers: Default::default(),
            symbol_versions: [auditelf::SymbolVersion::new("GLIBC_2.30")].into_iter().collect(),
            imported_names: Default::default(),
        };
        let graph = graph_with(vec![node]);
        let strict = Policy {
            name: "manylinux_2_17_x86_64".into(),
            aliases: Vec::new(),
            priority: 100,
            symbol_versions: [("GLIBC".to_string(), auditelf::SymbolVersion::new("GLIBC_2.17"))]
                .into_iter()
                .collect(),
            lib_whitelist: ["libc.so.6".to_string()].into_iter().collect(),
            blacklist: BTreeMap::new(),
        };
        let permissive = Policy {
            name: "linux_x86_64".into(),
            aliases: Vec::new(),
            priority: 0,
            symbol_versions: BTreeMap::new(),
            lib_whitelist: Default::default(),
            blacklist: BTreeMap::new(),
        };
        let scored = vec![
            (&strict, score_policy(&graph, &strict)),
            (&permissive, score_policy(&graph, &permissive)),
        ];
        let best = BestPolicy {
            scored,
            symbol_compatible: &permissive,
            whitelist_compatible: Some(&permissive),
            overall: &permissive,
        };
        let report = build_report(&graph, &best, &["cp39-cp39-linux_x86_64".to_string()]);
        assert_eq!(report.overall_policy, "linux_x86_64");
        let strict_row = report.policies.iter().find(|p| p.name == "manylinux_2_17_x86_64").unwrap();
        assert!(!strict_row.satisfied);
        assert!(!strict_row.violations.is_empty());
    }
}

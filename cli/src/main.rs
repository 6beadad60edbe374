use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;

use auditelf_resolve::best_policy;
use auditelf_resolve::DependencyGraph;
use auditelf_resolve::DynamicLoader;
use auditelf_resolve::PolicyTable;
use clap::Parser;

mod error;
mod logger;
mod repair;
mod show;
mod wheel;

pub(crate) use self::error::Error;
use self::logger::Logger;
use self::repair::RepairOptions;
use self::show::Format;
use self::wheel::ExtractedWheel;

/// Embedded default policy table, covering every `manylinux`/`musllinux`/`linux`
/// policy current as of this tool's release.
const DEFAULT_POLICIES: &str = include_str!("policies.json");

#[derive(clap::Parser)]
#[clap(version, about = "Audit and repair manylinux/musllinux-style wheel archives.")]
struct Args {
    /// Increase log verbosity; repeatable.
    #[clap(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Inspect a wheel and report which platform policy it satisfies.
    Show(ShowArgs),
    /// Repair a wheel to satisfy a target platform policy.
    Repair(RepairArgs),
}

#[derive(clap::Args)]
struct CommonArgs {
    /// File system root the dynamic resolver searches under.
    #[clap(short = 'r', long = "root", value_name = "DIR", default_value = "/")]
    root: PathBuf,

    /// Which dynamic linker implementation to emulate.
    #[clap(long = "libc", value_name = "LIBC", default_value = "glibc")]
    libc: LibcArg,

    /// Architecture name used to interpolate `$PLATFORM` and, for musl, to locate
    /// `/etc/ld-musl-<arch>.path`.
    #[clap(long = "arch", value_name = "ARCH", default_value = "x86_64")]
    arch: String,

    /// Memory page size used to validate segment alignment.
    #[clap(long = "page-size", value_name = "NUM", default_value_t = 4096)]
    page_size: u64,

    /// Path to a policy table JSON file, overriding the embedded default.
    #[clap(long = "policy-file", value_name = "FILE")]
    policy_file: Option<PathBuf>,
}

#[derive(clap::ValueEnum, Clone, Copy)]
enum LibcArg {
    Glibc,
    Musl,
}

#[derive(clap::Args)]
struct ShowArgs {
    #[clap(flatten)]
    common: CommonArgs,

    /// Report format.
    #[clap(short = 'f', long = "format", value_name = "FORMAT", default_value = "text")]
    format: Format,

    /// The wheel archive to inspect.
    #[clap(value_name = "WHEEL")]
    wheel: PathBuf,
}

#[derive(clap::Args)]
struct RepairArgs {
    #[clap(flatten)]
    common: CommonArgs,

    /// Target platform policy name or alias, e.g. `manylinux_2_17_x86_64`.
    ///
    /// Defaults to `$AUDITWHEEL_PLAT`, then to the archive's own best-satisfied policy.
    #[clap(long = "plat", value_name = "POLICY")]
    plat: Option<String>,

    /// Soname to leave alone even though the target policy does not whitelist it.
    #[clap(long = "exclude", value_name = "SONAME")]
    exclude: Vec<String>,

    /// Don't append the target policy's legacy aliases to the output tag.
    #[clap(long = "only-plat")]
    only_plat: bool,

    /// Strip debug symbols from every grafted library.
    #[clap(long = "strip")]
    strip: bool,

    /// Directory repaired wheels are written to.
    #[clap(short = 'o', long = "output-dir", value_name = "DIR", default_value = "wheelhouse")]
    output_dir: PathBuf,

    /// Path or name of the external `patchelf` binary.
    #[clap(long = "patchelf", value_name = "BIN", default_value = "patchelf")]
    patchelf_bin: String,

    /// Path or name of the external `strip` binary.
    #[clap(long = "strip-bin", value_name = "BIN", default_value = "strip")]
    strip_bin: String,

    /// The wheel archive to repair.
    #[clap(value_name = "WHEEL")]
    wheel: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();
    if Logger::init(args.verbose).is_err() {
        eprintln!("logger already initialized");
    }
    match args.command {
        Command::Show(show_args) => match run_show(show_args) {
            Ok(code) => code,
            Err(e) => {
                log::error!("{e}");
                usage_exit_code(&e)
            }
        },
        Command::Repair(repair_args) => match run_repair(repair_args) {
            Ok(code) => code,
            Err(e) => {
                log::error!("{e}");
                usage_exit_code(&e)
            }
        },
    }
}

/// Map a fatal error to an exit code per §6: a policy-incompatible/infeasible
/// archive is `1`, anything else (usage, I/O, malformed archive) is `2`.
fn usage_exit_code(error: &Error) -> ExitCode {
    match error {
        Error::Infeasible(..) => ExitCode::from(1),
        _ => ExitCode::from(2),
    }
}

fn load_policy_table(common: &CommonArgs) -> Result<PolicyTable, Error> {
    match common.policy_file.as_ref() {
        Some(path) => {
            let data = fs_err::read(path)?;
            Ok(PolicyTable::from_json(&data)?)
        }
        None => Ok(PolicyTable::from_json(DEFAULT_POLICIES.as_bytes())?),
    }
}

fn build_loader(common: &CommonArgs) -> Result<DynamicLoader, Error> {
    let options = match common.libc {
        LibcArg::Glibc => DynamicLoader::options().glibc(&common.root)?,
        LibcArg::Musl => DynamicLoader::options().musl(&common.root, &common.arch)?,
    };
    Ok(options.page_size(common.page_size).new_loader())
}

fn run_show(args: ShowArgs) -> Result<ExitCode, Error> {
    let table = load_policy_table(&args.common)?;
    let loader = build_loader(&args.common)?;
    let extracted = ExtractedWheel::open(&args.wheel)?;
    let elf_entries = extracted.elf_entries()?;

    if elf_entries.is_empty() {
        log::warn!("{:?} is not a platform wheel", args.wheel);
        return Ok(ExitCode::from(1));
    }

    let roots: Vec<PathBuf> = elf_entries.iter().map(|rel| extracted.path(rel)).collect();
    let graph = DependencyGraph::build(&roots, &loader)?;
    let arch = graph.arch.ok_or_else(|| {
        Error::MalformedWheel(args.wheel.clone(), "no recognized architecture among its binaries")
    })?;
    let best = best_policy(&graph, &table, arch)?;
    let current_tags = extracted.metadata()?.tags;

    show::run(&graph, &best, &current_tags, args.format)?;

    let satisfied = best.scored.iter().any(|(policy, scoring)| {
        policy.priority > 0 && scoring.is_symbol_compatible() && scoring.is_whitelist_compatible()
    });
    Ok(if satisfied { ExitCode::SUCCESS } else { ExitCode::from(1) })
}

fn run_repair(args: RepairArgs) -> Result<ExitCode, Error> {
    let table = load_policy_table(&args.common)?;
    let loader = build_loader(&args.common)?;

    let target_name = resolve_target_name(&args, &table, &loader)?;
    let target = table
        .find(&target_name)
        .ok_or_else(|| Error::UnknownPolicy(target_name.clone()))?
        .clone();

    let exclude: BTreeSet<String> = args.exclude.into_iter().collect();
    let options = RepairOptions {
        exclude,
        only_plat: args.only_plat,
        strip: args.strip,
        output_dir: args.output_dir,
        source_date_epoch: read_source_date_epoch(),
        patchelf_bin: args.patchelf_bin,
        strip_bin: args.strip_bin,
        page_size: args.common.page_size,
    };

    match repair::run(&args.wheel, &target, &loader, &options)? {
        repair::RepairOutcome::NonPlatformWheel => {
            log::info!("{:?} has no ELF binaries; nothing to repair", args.wheel);
            Ok(ExitCode::SUCCESS)
        }
        repair::RepairOutcome::Repaired {
            output_path,
            policy_name,
            grafted,
        } => {
            log::info!("wrote {output_path:?} satisfying {policy_name}");
            for soname in grafted {
                log::info!("grafted {soname}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Pick the target policy name: `--plat`, then `$AUDITWHEEL_PLAT`, then the
/// archive's own best-satisfied policy today (§6).
fn resolve_target_name(args: &RepairArgs, table: &PolicyTable, loader: &DynamicLoader) -> Result<String, Error> {
    if let Some(plat) = args.plat.as_ref() {
        return Ok(plat.clone());
    }
    if let Ok(plat) = std::env::var("AUDITWHEEL_PLAT") {
        if !plat.is_empty() {
            return Ok(plat);
        }
    }
    let extracted = ExtractedWheel::open(&args.wheel)?;
    let elf_entries = extracted.elf_entries()?;
    if elf_entries.is_empty() {
        // No binaries to score; `repair` on a pure archive is a tag-preserving
        // no-op regardless of which permissive policy name is picked here.
        return Ok("linux_x86_64".to_string());
    }
    let roots: Vec<PathBuf> = elf_entries.iter().map(|rel| extracted.path(rel)).collect();
    let graph = DependencyGraph::build(&roots, loader)?;
    let arch = graph.arch.ok_or_else(|| {
        Error::MalformedWheel(args.wheel.clone(), "no recognized architecture among its binaries")
    })?;
    let best = best_policy(&graph, table, arch)?;
    Ok(best.overall.name.clone())
}

fn read_source_date_epoch() -> Option<u64> {
    std::env::var("SOURCE_DATE_EPOCH").ok()?.parse().ok()
}

//! rechunk - Check and patch binary files through region trees
//!
//! `check` proves that a file survives a load/write cycle through a region
//! tree byte for byte. `patch` splices new bytes over a range of a file and
//! writes everything else back untouched.

use anyhow::{bail, ensure, Context, Result};
use clap::{Args, Parser, Subcommand};
use rechunk_core::{Properties, RegionId, RegionKind, RegionTree};
use std::fs::{self, File, OpenOptions};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Check and patch binary files through region trees
#[derive(Parser, Debug)]
#[command(name = "rechunk")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rewrite files through a region tree and compare digests
    Check(CheckArgs),
    /// Splice bytes over a range of a file
    Patch(PatchArgs),
}

#[derive(Args, Debug)]
struct CheckArgs {
    #[command(flatten)]
    input: InputMode,

    /// Size of the blocks the file is split into when no regions are given
    #[arg(long, default_value = "4096", value_parser = parse_number)]
    block_size: u64,

    /// Explicit region START:LEN (decimal or 0x-prefixed hex), repeatable
    #[arg(long = "region", value_parser = parse_span)]
    regions: Vec<Span>,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Path to a single file to check
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Path to a directory of files to check recursively
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PatchArgs {
    /// File to patch
    #[arg(short, long)]
    file: PathBuf,

    /// Absolute offset the patch starts at (decimal or 0x-prefixed hex)
    #[arg(long, value_parser = parse_number)]
    offset: u64,

    /// File holding the replacement bytes
    #[arg(short, long)]
    input: PathBuf,

    /// Write the patched file here instead of in place
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Dry run - report what would change without writing
    #[arg(long)]
    dry_run: bool,

    /// Overwrite an existing output file
    #[arg(long)]
    force: bool,
}

/// A `[start, start + len)` range given on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: u64,
    len: u64,
}

fn parse_number(s: &str) -> std::result::Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn parse_span(s: &str) -> std::result::Result<Span, String> {
    let (start, len) = s
        .split_once(':')
        .ok_or_else(|| format!("expected START:LEN, got '{}'", s))?;
    Ok(Span {
        start: parse_number(start)?,
        len: parse_number(len)?,
    })
}

/// Outcome of checking one file
#[derive(Debug)]
struct CheckReport {
    regions: usize,
    original: blake3::Hash,
    rewritten: blake3::Hash,
}

impl CheckReport {
    fn matches(&self) -> bool {
        self.original == self.rewritten
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    match &cli.command {
        Command::Check(args) => run_check(args),
        Command::Patch(args) => run_patch(args),
    }
}

fn run_check(args: &CheckArgs) -> Result<()> {
    if let Some(ref file) = args.input.file {
        ensure!(file.is_file(), "Input path is not a file: {}", file.display());
        let report = check_file(file, args)?;
        print_report(file, &report);
        if !report.matches() {
            bail!("{} did not survive the rewrite", file.display());
        }
        return Ok(());
    }

    let Some(ref directory) = args.input.directory else {
        bail!("Either --file or --directory must be specified");
    };
    ensure!(
        directory.is_dir(),
        "Path is not a directory: {}",
        directory.display()
    );

    info!("Checking directory: {}", directory.display());
    let mut checked = 0usize;
    let mut mismatches = 0usize;

    for entry in WalkDir::new(directory)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() || is_hidden(path) {
            continue;
        }

        match check_file(path, args) {
            Ok(report) => {
                print_report(path, &report);
                checked += 1;
                if !report.matches() {
                    mismatches += 1;
                }
            }
            Err(e) => warn!("Error checking {}: {:#}", path.display(), e),
        }
    }

    info!("Checked {} files, {} mismatches", checked, mismatches);
    if mismatches > 0 {
        bail!("{} of {} files did not survive the rewrite", mismatches, checked);
    }
    Ok(())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

fn print_report(path: &Path, report: &CheckReport) {
    let status = if report.matches() { "ok" } else { "MISMATCH" };
    println!(
        "{} {} ({} regions, {})",
        status,
        path.display(),
        report.regions,
        &report.rewritten.to_hex()[..16]
    );
}

/// Loads a file into a region tree and writes it back to memory
fn check_file(path: &Path, args: &CheckArgs) -> Result<CheckReport> {
    let original = fs::read(path)
        .with_context(|| format!("Failed to read input file: {}", path.display()))?;
    let len = original.len() as u64;
    trace!("Read {} bytes from {}", len, path.display());

    let file = File::open(path)
        .with_context(|| format!("Failed to open input file: {}", path.display()))?;
    let properties = Arc::new(Properties::new().with_backing_map(file));
    let mut tree = RegionTree::new(Arc::clone(&properties));

    let root = tree.create(0, len)?;
    let spans = if args.regions.is_empty() {
        block_spans(len, args.block_size)?
    } else {
        args.regions.clone()
    };
    for span in spans {
        let child = tree
            .create(span.start, span.len)
            .with_context(|| format!("Invalid region {}:{}", span.start, span.len))?;
        tree.add_child(root, child)?;
    }
    tree.sort_children(root)?;
    tree.load_subtree(root)
        .with_context(|| format!("Failed to load regions of {}", path.display()))?;

    let mut out = Cursor::new(Vec::with_capacity(original.len()));
    let written = tree
        .write(root, &mut out)
        .with_context(|| format!("Failed to rewrite {}", path.display()))?;
    debug!("Rewrote {} bytes of {}", written, path.display());

    let report = CheckReport {
        regions: tree.len(),
        original: blake3::hash(&original),
        rewritten: blake3::hash(out.get_ref()),
    };

    drop(tree);
    debug_assert_eq!(properties.registry().count(), 0);
    Ok(report)
}

/// Splits `[0, len)` into consecutive blocks
fn block_spans(len: u64, block_size: u64) -> Result<Vec<Span>> {
    ensure!(block_size > 0, "--block-size must be positive");
    let step = usize::try_from(block_size)
        .with_context(|| format!("--block-size {} is too large for this platform", block_size))?;
    Ok((0..len)
        .step_by(step)
        .map(|start| Span {
            start,
            len: block_size.min(len - start),
        })
        .collect())
}

fn run_patch(args: &PatchArgs) -> Result<()> {
    let patch = fs::read(&args.input)
        .with_context(|| format!("Failed to read patch file: {}", args.input.display()))?;
    let file_len = fs::metadata(&args.file)
        .with_context(|| format!("Failed to stat {}", args.file.display()))?
        .len();
    let Some(end) = args.offset.checked_add(patch.len() as u64) else {
        bail!(
            "Patch of {} bytes at {} overflows the file offset range",
            patch.len(),
            args.offset
        );
    };
    ensure!(
        end <= file_len,
        "Patch {}..{} extends past the end of {} ({} bytes)",
        args.offset,
        end,
        args.file.display(),
        file_len
    );

    if let Some(ref output) = args.output {
        if output.exists() && !args.force {
            bail!(
                "File already exists: {} (use --force to overwrite)",
                output.display()
            );
        }
    }

    let file = OpenOptions::new()
        .read(true)
        .write(args.output.is_none() && !args.dry_run)
        .open(&args.file)
        .with_context(|| format!("Failed to open {}", args.file.display()))?;
    let properties = Arc::new(Properties::new().with_backing_map(file));
    let mut tree = RegionTree::new(properties);
    let (root, target) = build_patch_tree(&mut tree, file_len, args.offset, patch.len() as u64)?;

    tree.load(target, None, None)?;
    let before = tree
        .get(target)
        .and_then(|region| region.content())
        .map(|content| blake3::hash(content))
        .unwrap_or_else(|| blake3::hash(&[]));
    let after = blake3::hash(&patch);

    if args.dry_run {
        println!(
            "Would patch {} bytes at {} in {} ({} -> {})",
            patch.len(),
            args.offset,
            args.file.display(),
            &before.to_hex()[..16],
            &after.to_hex()[..16]
        );
        return Ok(());
    }

    if let Some(region) = tree.get_mut(target) {
        region.set_content(patch);
    }

    match args.output {
        Some(ref output) => {
            tree.load(root, None, None)?;
            tree.get_mut(root)
                .context("patch tree lost its root")?
                .set_kind(RegionKind::Data);
            let mut out = File::create(output)
                .with_context(|| format!("Failed to create file: {}", output.display()))?;
            let written = tree
                .write(root, &mut out)
                .with_context(|| format!("Failed to write file: {}", output.display()))?;
            println!("Wrote {} ({} bytes)", output.display(), written);
        }
        None => {
            tree.write_back(root)
                .with_context(|| format!("Failed to patch {}", args.file.display()))?;
            println!("Patched {} at {}", args.file.display(), args.offset);
        }
    }

    Ok(())
}

/// Builds a root over the whole file with one child over the patched range.
///
/// The root preserves what is on disk until it is given content.
fn build_patch_tree(
    tree: &mut RegionTree,
    file_len: u64,
    offset: u64,
    len: u64,
) -> Result<(RegionId, RegionId)> {
    let root = tree.create(0, file_len)?;
    tree.get_mut(root)
        .context("patch tree lost its root")?
        .set_kind(RegionKind::Preserve);
    let target = tree.create(offset, len)?;
    tree.add_child(root, target)?;
    Ok((root, target))
}

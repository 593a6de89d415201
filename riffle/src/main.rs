use clap::Parser;
use libriffle::OrderOptions;
use libriffle::Section as _;
use libriffle::elf::InputFiles;
use libriffle::elf::candidate_sections;
use std::io::BufWriter;
use std::io::Write as _;
use std::num::NonZeroUsize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Order executable sections for compressed output size.
    #[arg(long)]
    compress_code: bool,

    /// Order non-executable sections for compressed output size.
    #[arg(long)]
    compress_data: bool,

    /// Startup profile to put first-accessed code first: one symbol name per line.
    #[arg(long, value_name = "FILE")]
    profile: Option<PathBuf>,

    /// Similarity-sort the startup group too, keeping profile order as the tie-break.
    #[arg(long)]
    sort_startup: bool,

    /// Hash section contents only, ignoring relocation structure.
    #[arg(long)]
    no_structural: bool,

    /// Print per-phase wall times.
    #[arg(long)]
    time: bool,

    /// Number of worker threads. Defaults to the number of CPUs.
    #[arg(long, value_name = "N")]
    threads: Option<NonZeroUsize>,

    /// Log grouping and signature statistics.
    #[arg(long)]
    verbose: bool,

    /// Relocatable object files whose allocatable sections should be ordered.
    #[arg(required = true, value_name = "FILE")]
    inputs: Vec<PathBuf>,
}

fn main() {
    if let Err(error) = run() {
        libriffle::error::report_error_and_exit(&error)
    }
}

fn run() -> libriffle::error::Result {
    let args = Args::parse();

    libriffle::setup_tracing(args.time)?;
    libriffle::setup_thread_pool(args.threads.unwrap_or_else(libriffle::available_parallelism))?;

    let files = InputFiles::load(&args.inputs)?;
    let sections = candidate_sections(&files)?;

    let options = OrderOptions {
        compress_code: args.compress_code,
        compress_data: args.compress_data,
        profile_path: args.profile,
        compression_sort_startup: args.sort_startup,
        structural_features: !args.no_structural,
        verbose: args.verbose,
        ..OrderOptions::default()
    };

    let positions = libriffle::order(&sections, &options)?;

    // One line per section in placement order, so the output can be fed to a linker's
    // section-ordering flag or diffed between runs.
    let mut out = BufWriter::new(std::io::stdout().lock());
    for index in positions.placement_order() {
        let section = &sections[index.as_usize()];
        let path = files.path(section.file_index()).display();
        let name = String::from_utf8_lossy(section.name());
        writeln!(out, "{path}:{name}")?;
    }
    out.flush()?;

    Ok(())
}

// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

use std::io;
use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;
use simplelog::{ColorChoice, ConfigBuilder, Level, LevelFilter, TermLogger, TerminalMode};
use tracing::warn;

use grokdump::{analyze_minidump, AnnotationStore, DumpFile, ObjdumpDisassembler, Options};

/// Analyzes a minidump of a process running a V8-style heap.
#[derive(Debug, Parser)]
#[command(version, next_line_help = true)]
struct Cli {
    /// Path to the minidump file to analyze.
    minidump: PathBuf,

    /// Start an interactive inspector shell.
    #[arg(short, long)]
    shell: bool,

    /// Run one inspector shell command and exit.
    #[arg(short, long, value_name = "COMMAND")]
    command: Option<String>,

    /// Dump all information contained in the minidump.
    #[arg(short, long)]
    full: bool,

    /// Directory containing *.pdb.sym files with symbols.
    #[arg(long, default_value = ".")]
    symdir: PathBuf,

    /// objdump tool to use.
    #[arg(long, default_value = grokdump::disasm::DEFAULT_OBJDUMP)]
    objdump: PathBuf,

    /// Set the logging level.
    ///
    /// Logs go to stderr; the report goes to stdout.
    #[arg(
        long,
        default_value = "error",
        value_parser = ["off", "error", "warn", "info", "debug", "trace"]
    )]
    verbose: String,
}

fn init_logging(verbose: &str) {
    let verbosity = match verbose {
        "off" => LevelFilter::Off,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Error,
    };
    let _ = TermLogger::init(
        verbosity,
        ConfigBuilder::new()
            .set_location_level(LevelFilter::Off)
            .set_time_level(LevelFilter::Off)
            .set_thread_level(LevelFilter::Off)
            .set_target_level(LevelFilter::Off)
            .set_level_color(Level::Trace, None)
            .build(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut options = Options {
        symdir: cli.symdir,
        full: cli.full,
        command: cli.command,
        shell: cli.shell,
        ..Options::default()
    };
    if cli.objdump.exists() {
        options.objdump = cli.objdump;
    } else {
        warn!(
            "Cannot find {}, falling back to default objdump",
            cli.objdump.display()
        );
    }

    let minidump = &cli.minidump;
    let dump = DumpFile::read_path(minidump)
        .with_context(|| format!("couldn't read {}", minidump.display()))?;
    let annotations = AnnotationStore::for_dump(&cli.minidump);
    let disassembler = ObjdumpDisassembler::new(&options.objdump);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    analyze_minidump(&dump, &options, annotations, &disassembler, &mut out)
        .context("analysis failed")?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.verbose);
    if let Err(e) = run(cli) {
        eprintln!("error: {:#}", e);
        process::exit(1);
    }
}

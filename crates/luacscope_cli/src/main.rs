use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{CommandFactory, Parser};
use luacscope_lib::{Chunk, LuacError, mapper};

use crate::cli::Cli;
use crate::report::{DumpOptions, ReportFormat};

mod cli;
mod report;

fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    if let Err(e) = run(cli) {
        match e.downcast_ref::<LuacError>() {
            Some(err) => eprintln!("{}: {e:#}", err.kind()),
            None => eprintln!("error: {e:#}"),
        }
        std::process::exit(1);
    }
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        let bin_name = cmd.get_name().to_string();
        clap_complete::generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
        return Ok(());
    }

    let format = ReportFormat::from(cli.format);

    if let Some(files) = &cli.compare {
        let [standard, shuffled] = files.as_slice() else {
            bail!("--compare takes exactly two files");
        };
        let standard = load(standard)?;
        let shuffled = load(shuffled)?;
        let report = mapper::map_opcodes(&standard.main, &shuffled.main);
        if !report.is_clean() {
            log::warn!(
                "mapping is inconsistent: {} conflicts, {} count mismatches",
                report.conflicts.len(),
                report.mismatches.len()
            );
        }
        return emit(cli.output.as_deref(), &report::mapping_report(&report, format)?);
    }

    let Some(input) = cli.input.as_deref() else {
        bail!("no input file given");
    };

    if cli.encrypt || cli.decrypt {
        // An absent key is reported by the cipher like an empty one.
        let key = cli.key.as_deref().unwrap_or_default().as_bytes();
        let bytes = read(input)?;
        let (result, suffix) = if cli.encrypt {
            (luacscope_lib::encrypt(&bytes, key), "encrypt")
        } else {
            (luacscope_lib::decrypt(&bytes, key), "decrypt")
        };
        let out = result.with_context(|| input.display().to_string())?;
        let dest = cli.output.clone().unwrap_or_else(|| default_output(input, suffix));
        fs::write(&dest, out).with_context(|| format!("failed to write {}", dest.display()))?;
        log::info!("wrote {}", dest.display());
        return Ok(());
    }

    let chunk = load(input)?;
    let opts = DumpOptions {
        format,
        strip_debug: cli.strip_debug,
    };
    emit(cli.output.as_deref(), &report::dump_report(&chunk, &opts)?)
}

fn read(path: &Path) -> anyhow::Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn load(path: &Path) -> anyhow::Result<Chunk> {
    let bytes = read(path)?;
    let chunk = luacscope_lib::parse(&bytes).with_context(|| path.display().to_string())?;
    log::info!(
        "{}: {} functions, {} instructions",
        path.display(),
        chunk.proto_count(),
        chunk.instruction_count()
    );
    Ok(chunk)
}

/// Writes a report to `output`, or to stdout when none is given.
fn emit(output: Option<&Path>, text: &str) -> anyhow::Result<()> {
    match output {
        Some(path) => fs::write(path, text).with_context(|| format!("failed to write {}", path.display())),
        None => {
            std::io::stdout().write_all(text.as_bytes())?;
            Ok(())
        }
    }
}

/// `dir/name.luac` -> `dir/name_<suffix>.luac`.
fn default_output(input: &Path, suffix: &str) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    input.with_file_name(format!("{stem}_{suffix}.luac"))
}

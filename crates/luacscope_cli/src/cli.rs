use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum, builder::{Styles, styling::{AnsiColor, Effects}}, crate_description, crate_version};
use clap_complete::Shell;

use crate::report::ReportFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormatCli {
    Text,
    Json,
}

impl From<ReportFormatCli> for ReportFormat {
    fn from(f: ReportFormatCli) -> Self {
        match f {
            ReportFormatCli::Text => ReportFormat::Text,
            ReportFormatCli::Json => ReportFormat::Json,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "luacscope",
    version = crate_version!(),
    about = crate_description!(),
    styles = Styles::styled()
        .header(AnsiColor::BrightGreen.on_default() | Effects::BOLD | Effects::UNDERLINE)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default()))]
pub struct Cli {
    /// Compiled Lua 5.4 chunk to dump, encrypt or decrypt
    #[arg(required_unless_present_any = ["compare", "completions"])]
    pub input: Option<PathBuf>,

    /// Decrypt the instruction bytes of INPUT
    #[arg(short, long, conflicts_with = "encrypt")]
    pub decrypt: bool,

    /// Encrypt the instruction bytes of INPUT
    #[arg(short, long)]
    pub encrypt: bool,

    /// Cipher key, used byte for byte
    #[arg(short, long)]
    pub key: Option<String>,

    /// Destination file (default: <stem>_encrypt.luac / <stem>_decrypt.luac, or stdout for reports)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Infer the opcode mapping of SHUFFLED against STANDARD
    #[arg(short, long, num_args = 2, value_names = ["STANDARD", "SHUFFLED"], conflicts_with_all = ["input", "decrypt", "encrypt"])]
    pub compare: Option<Vec<PathBuf>>,

    /// Report format
    #[arg(long, value_enum, default_value_t = ReportFormatCli::Text)]
    pub format: ReportFormatCli,

    /// Leave line info, locals and upvalue names out of the dump
    #[arg(long, default_value_t = false)]
    pub strip_debug: bool,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Generate shell completion
    #[arg(long, value_enum, exclusive = true)]
    pub completions: Option<Shell>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn plain_input_dumps() {
        let cli = Cli::try_parse_from(["luacscope", "a.luac"]).unwrap();
        assert_eq!(cli.input, Some(PathBuf::from("a.luac")));
        assert!(!cli.encrypt && !cli.decrypt);
        assert_eq!(cli.format, ReportFormatCli::Text);
    }

    #[test]
    fn encrypt_and_decrypt_conflict() {
        assert!(Cli::try_parse_from(["luacscope", "a.luac", "-e", "-d", "-k", "x"]).is_err());
    }

    #[test]
    fn compare_takes_two_files() {
        let cli = Cli::try_parse_from(["luacscope", "-c", "std.luac", "shuf.luac", "--format", "json"]).unwrap();
        assert_eq!(
            cli.compare,
            Some(vec![PathBuf::from("std.luac"), PathBuf::from("shuf.luac")])
        );
        assert_eq!(cli.format, ReportFormatCli::Json);
        assert!(Cli::try_parse_from(["luacscope", "-c", "std.luac"]).is_err());
    }

    #[test]
    fn input_required_without_compare() {
        assert!(Cli::try_parse_from(["luacscope", "-e", "-k", "x"]).is_err());
        assert!(Cli::try_parse_from(["luacscope", "--completions", "bash"]).is_ok());
    }

    #[test]
    fn verbosity_counts() {
        let cli = Cli::try_parse_from(["luacscope", "a.luac", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }
}

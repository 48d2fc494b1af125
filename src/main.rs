//! unbind - EPUB to editable text and back

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use unbind::{BuildOptions, ExtractOptions, MetadataOverrides};

#[derive(Parser)]
#[command(name = "unbind")]
#[command(version, about = "Unpack EPUBs into editable text, then rebuild them", long_about = None)]
#[command(after_help = "EXAMPLES:
    unbind extract book.epub workspace/       Unpack into an editable workspace
    unbind build workspace/ book_new.epub     Rebuild the EPUB
    unbind build workspace/ book_zh.epub --translations translated/")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract an EPUB into an editable workspace directory
    Extract {
        /// Input EPUB file
        #[arg(value_name = "EPUB")]
        epub: PathBuf,

        /// Destination workspace directory
        #[arg(value_name = "DIR")]
        out_dir: PathBuf,

        /// Clear the destination directory if it is not empty
        #[arg(short, long)]
        force: bool,

        /// Fail on the first chapter that cannot be decoded
        #[arg(long)]
        strict: bool,
    },

    /// Rebuild an EPUB from an extracted workspace
    Build {
        /// Workspace directory produced by extract
        #[arg(value_name = "DIR")]
        in_dir: PathBuf,

        /// Output EPUB file
        #[arg(value_name = "EPUB")]
        output: PathBuf,

        /// Override the book title
        #[arg(long)]
        title: Option<String>,

        /// Override the book identifier
        #[arg(long)]
        identifier: Option<String>,

        /// Override the book language
        #[arg(long)]
        language: Option<String>,

        /// Override the author list (repeatable)
        #[arg(long = "author", value_name = "AUTHOR")]
        authors: Vec<String>,

        /// Directory with *_translated.txt files to merge in
        #[arg(long, value_name = "DIR")]
        translations: Option<PathBuf>,

        /// Book language when translations are applied
        #[arg(long, default_value = "zh", value_name = "LANG")]
        target_language: String,

        /// Run this epubcheck executable on the result
        #[arg(long, value_name = "PATH")]
        epubcheck: Option<PathBuf>,

        /// Extra arguments passed to epubcheck
        #[arg(long = "epubcheck-arg", value_name = "ARG")]
        epubcheck_args: Vec<String>,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Extract {
            epub,
            out_dir,
            force,
            strict,
        } => run_extract(&epub, &out_dir, force, strict),
        Commands::Build {
            in_dir,
            output,
            title,
            identifier,
            language,
            authors,
            translations,
            target_language,
            epubcheck,
            epubcheck_args,
        } => {
            let opts = BuildOptions {
                overrides: MetadataOverrides {
                    title,
                    identifier,
                    language,
                    authors,
                },
                translations,
                target_language,
                validator: epubcheck,
                validator_args: epubcheck_args,
            };
            run_build(&in_dir, &output, &opts)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_extract(
    epub: &std::path::Path,
    out_dir: &std::path::Path,
    force: bool,
    strict: bool,
) -> unbind::Result<()> {
    let report = unbind::extract(epub, out_dir, &ExtractOptions { force, strict })?;
    println!(
        "Extracted {} chapters and {} assets to {}",
        report.chapters,
        report.assets,
        out_dir.display()
    );
    for failure in &report.failures {
        println!(
            "Warning: chapter {} kept as raw markup ({})",
            failure.href, failure.reason
        );
    }
    Ok(())
}

fn run_build(
    in_dir: &std::path::Path,
    output: &std::path::Path,
    opts: &BuildOptions,
) -> unbind::Result<()> {
    let report = unbind::build(in_dir, output, opts)?;
    println!(
        "Built {} ({} chapters, {} translated)",
        output.display(),
        report.chapters,
        report.translated
    );
    for warning in &report.warnings {
        println!("Warning: {warning}");
    }
    Ok(())
}

//! chunk2md command-line interface.
//!
//! One binary covers every entry point of the pipeline: single-document
//! processing (the default), the cron-style daemon pass (`--daemon`), the
//! offline post-processing steps (`--renumber`, `--concat`), DJVU conversion
//! on its own (`--convert-only`), and raw status inspection
//! (`--file-status`).

use anyhow::{bail, Context, Result};
use chunk2md::{
    concatenate_markdown_files, convert_djvu_to_pdf, converted_pdf_name, process_document,
    renumber_markdown_files, run_pass, DocumentFormat, NanonetsClient, PipelineConfig,
    ProcessOptions,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "chunk2md",
    version,
    about = "Convert large PDF/DJVU documents to Markdown via the NanoNets extraction API",
    long_about = "Converts PDF and DJVU documents to Markdown, splitting documents that \
exceed the extraction service's limits (50 MB / 200 pages) into page-range chunks. \
All progress is persisted as files in the output folder, so the same command can be \
re-run until the document is done — nothing is ever submitted twice."
)]
struct Cli {
    /// Document to process (PDF or DJVU). Optional with --daemon and
    /// --file-status.
    input: Option<PathBuf>,

    /// Folder for chunk artifacts, lock records, and Markdown outputs
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Folder scanned for new documents in daemon mode
    #[arg(long, default_value = "input")]
    input_dir: PathBuf,

    /// NanoNets API key
    #[arg(long, env = "NANONETS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Print the chunk plan without converting or contacting the service
    #[arg(long)]
    dry_run: bool,

    /// Only poll outstanding submissions; never upload
    #[arg(long)]
    retrieve_only: bool,

    /// Only convert a DJVU input to PDF, then stop
    #[arg(long)]
    convert_only: bool,

    /// Renumber the `## Page N` markers of existing chunk outputs, then stop
    #[arg(long)]
    renumber: bool,

    /// Concatenate existing chunk outputs into one Markdown file, then stop
    #[arg(long)]
    concat: bool,

    /// Run one daemon pass over the input folder and exit
    #[arg(long)]
    daemon: bool,

    /// Print the raw service status of these record ids (comma-separated)
    #[arg(long, value_name = "IDS")]
    file_status: Option<String>,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn init_tracing(&self) {
        let default = if self.quiet {
            "chunk2md=warn"
        } else {
            match self.verbose {
                0 => "chunk2md=info",
                1 => "chunk2md=debug",
                _ => "trace",
            }
        };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .context("an API key is required: pass --api-key or set NANONETS_API_KEY")
    }

    fn input(&self) -> Result<&PathBuf> {
        self.input.as_ref().context("an input document is required")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.init_tracing();

    let config = PipelineConfig::builder()
        .input_folder(&cli.input_dir)
        .output_folder(&cli.output_dir)
        .build()
        .context("invalid configuration")?;

    // Offline modes: no API key, no network.
    if cli.renumber {
        let input = cli.input()?;
        let n = renumber_markdown_files(input, &config.output_folder)?;
        println!("renumbered {n} file(s)");
        return Ok(());
    }
    if cli.concat {
        let input = cli.input()?;
        let path = concatenate_markdown_files(input, &config.output_folder)?;
        println!("{}", path.display());
        return Ok(());
    }
    if cli.convert_only {
        let input = cli.input()?;
        if DocumentFormat::from_path(input) != Some(DocumentFormat::Djvu) {
            bail!("--convert-only expects a DJVU input, got {}", input.display());
        }
        let target = config.output_folder.join(converted_pdf_name(input));
        let pdf = convert_djvu_to_pdf(input, &target, config.djvu_timeout_secs).await?;
        println!("{}", pdf.display());
        return Ok(());
    }
    if cli.dry_run && cli.input.is_some() {
        // Dry runs never contact the service; a placeholder key keeps the
        // client constructible without requiring credentials.
        let client = Arc::new(NanonetsClient::new("dry-run", config.api_timeout_secs)?);
        let input = cli.input()?;
        process_document(
            input,
            &config,
            client,
            ProcessOptions {
                dry_run: true,
                retrieve_only: false,
            },
        )
        .await?;
        return Ok(());
    }

    let client = Arc::new(NanonetsClient::new(cli.api_key()?, config.api_timeout_secs)?);

    if let Some(ids) = &cli.file_status {
        for id in ids.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let status = client
                .file_status(id)
                .await
                .with_context(|| format!("fetching status of record {id}"))?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        return Ok(());
    }

    if cli.daemon {
        let report = run_pass(&config, client).await?;
        println!(
            "pass complete: {} document(s), {} retrieved, {} finished, {} submitted, {} error(s)",
            report.documents_seen,
            report.retrieval.completed,
            report.finished,
            report.new_work.submitted,
            report.errored,
        );
        return Ok(());
    }

    let input = cli.input()?;
    let report = process_document(
        input,
        &config,
        client,
        ProcessOptions {
            dry_run: false,
            retrieve_only: cli.retrieve_only,
        },
    )
    .await?;

    println!(
        "submitted {}, completed {}, still processing {}, failed {}, skipped {}",
        report.submitted, report.completed, report.processing, report.failed, report.skipped,
    );
    if report.has_pending_work() {
        println!("re-run the same command later to continue");
    }
    Ok(())
}

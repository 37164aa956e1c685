use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
};

use anyhow::Context;
use atty::Stream;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use serde_json::json;

use annexport_core::{
    ArchiveExportService, ArchiveFormat, ExportError, ExportRequest, ExportSummary, Repository,
    ResolverStrategy, UnknownFormatError,
};

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = AnnexportCli::parse();
    init_tracing(cli.trace, cli.verbose);

    let code = match run(&cli) {
        Ok(()) => 0,
        Err(err) => {
            let code = exit_code(&err);
            if cli.json {
                let payload = json!({
                    "status": "error",
                    "message": format!("{err:#}"),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                eprintln!("error: {err:#}");
            }
            code
        }
    };

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8) {
    let level = if trace {
        "trace"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("annexport_core={level},annexport_cli={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Validation failures exit 1; collaborator and stream failures exit 2.
fn exit_code(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ExportError>().is_some()
        || err.downcast_ref::<UnknownFormatError>().is_some()
    {
        1
    } else {
        2
    }
}

fn run(cli: &AnnexportCli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Export(args) => run_export(cli, args),
    }
}

fn run_export(cli: &AnnexportCli, args: &ExportArgs) -> anyhow::Result<()> {
    let format = ArchiveFormat::from_token(&args.format)?;
    let repo_path = match &cli.repo {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("determining current directory")?,
    };
    let repo = Repository::open(repo_path)?;
    let service = ArchiveExportService::new(repo);
    let request = ExportRequest {
        commit: &args.commit,
        format,
        use_prefix: args.prefix,
        strategy: args.resolver.into(),
    };

    let summary = match &args.out {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating output file {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            let summary = service.export(&request, &mut writer)?;
            writer.flush().context("flushing output file")?;
            summary
        }
        None => {
            if atty::is(Stream::Stdout) {
                anyhow::bail!(
                    "refusing to write an archive to a terminal; pass --out FILE or redirect stdout"
                );
            }
            let stdout = io::stdout();
            let mut writer = stdout.lock();
            let summary = service.export(&request, &mut writer)?;
            writer.flush().context("flushing stdout")?;
            summary
        }
    };

    emit_summary(cli, args, &summary);
    Ok(())
}

fn emit_summary(cli: &AnnexportCli, args: &ExportArgs, summary: &ExportSummary) {
    // The archive itself may own stdout, so the summary goes to stderr unless
    // an output file leaves stdout free for the JSON envelope.
    let destination = args
        .out
        .as_ref()
        .map_or_else(|| "stdout".to_string(), |p| p.display().to_string());
    if cli.json && args.out.is_some() {
        let payload = json!({
            "status": "ok",
            "message": format!("exported {} as {}", summary.commit, summary.format),
            "details": summary,
        });
        if let Ok(rendered) = serde_json::to_string_pretty(&payload) {
            println!("{rendered}");
        }
        return;
    }
    if !cli.quiet {
        eprintln!(
            "Exported {} ({}) to {destination}: {} entries, {} substituted from the annex",
            summary.commit, summary.format, summary.entries, summary.substituted
        );
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Annex-aware repository archive export",
    long_about = "Exports a commit's full content as tar.gz or zip, replacing \
git-annex pointer files with the real bytes from the object store.",
    after_help = "Examples:\n  annexport export HEAD --format tar.gz --out snapshot.tar.gz\n  annexport --repo /srv/data.git export v1.2 --format zip --prefix --out data.zip\n  annexport export HEAD --format tar.gz > snapshot.tar.gz"
)]
struct AnnexportCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still print to stderr)",
        global = true
    )]
    quiet: bool,
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)")]
    verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    trace: bool,
    #[arg(long, help = "Emit {status,message,details} JSON envelopes", global = true)]
    json: bool,
    #[arg(
        long,
        value_name = "DIR",
        help = "Repository to export from (defaults to the current directory)",
        global = true
    )]
    repo: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(
        about = "Export a commit as a single archive with annexed content substituted.",
        override_usage = "annexport export <COMMIT> --format <FORMAT> [--prefix] [--out FILE]",
        after_help = "Examples:\n  annexport export HEAD --format tar.gz --out snapshot.tar.gz\n  annexport export main --format zip --resolver annex --out main.zip\n"
    )]
    Export(ExportArgs),
}

#[derive(Args, Debug)]
struct ExportArgs {
    #[arg(value_name = "COMMIT", help = "Commit-ish naming the snapshot to export")]
    commit: String,
    #[arg(long, value_name = "FORMAT", help = "Archive format: zip or tar.gz")]
    format: String,
    #[arg(long, help = "Prefix entry names with the repository name")]
    prefix: bool,
    #[arg(
        long,
        value_enum,
        default_value_t = ResolverKind::Direct,
        help = "Annex detection strategy"
    )]
    resolver: ResolverKind,
    #[arg(long, value_name = "FILE", help = "Write the archive here instead of stdout")]
    out: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ResolverKind {
    /// Parse pointer blobs in-process; no annex tooling required.
    Direct,
    /// Enumerate and locate content through the git-annex CLI.
    Annex,
}

impl From<ResolverKind> for ResolverStrategy {
    fn from(kind: ResolverKind) -> Self {
        match kind {
            ResolverKind::Direct => Self::Direct,
            ResolverKind::Annex => Self::Annex,
        }
    }
}

mod session;

use anyhow::{Context, Result};
use clap::Parser;
use pagebinder::data::FieldCodec;
use pagebinder::validation::{default_max_concurrency, CoordinatorOptions};
use pagebinder::{ManifestSink, OutputDocument, StatusValidationCoordinator, Workspace};
use session::Session;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "pagebinder",
    about = "Replay a page composition session and validate every document",
    version,
    author
)]
struct Cli {
    /// Session file (JSON)
    #[arg(short, long)]
    session: PathBuf,

    /// Maximum concurrent validations (default: CPU count - 1, at most 3)
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// How long to wait for validations and for shutdown, in milliseconds
    #[arg(short, long, default_value_t = 10_000)]
    timeout_ms: u64,

    /// Write an output manifest per document into this directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Re-validate documents whose requests were dropped while busy
    #[arg(long)]
    revalidate: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "pagebinder=debug,pagebinder_cli=debug"
    } else {
        "pagebinder=info,pagebinder_cli=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn status_line(document: &OutputDocument) -> String {
    let status = document.data().status();
    let flag = |value: bool| if value { "yes" } else { "no" };
    let error = match (&status.error_message, status.data_error) {
        (Some(message), true) => message.as_str(),
        (None, true) => "error",
        _ => "-",
    };
    format!(
        "{}\t{}\t{} page(s)\tinitialized={}\tmodified={}\terror={}\tsummary={}",
        document.id(),
        document.file_name(),
        document.page_count(),
        flag(status.initialized),
        flag(status.modified),
        error,
        status.summary
    )
}

fn print_statuses(workspace: &Workspace) {
    for document in workspace.documents() {
        println!("{}", status_line(document));
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let session = Session::load(&cli.session)?;
    let timeout = Duration::from_millis(cli.timeout_ms);

    let options = CoordinatorOptions::default()
        .with_max_concurrency(cli.concurrency.unwrap_or_else(default_max_concurrency))
        .with_revalidate_on_completion(cli.revalidate);
    let coordinator =
        StatusValidationCoordinator::new(options, Arc::new(FieldCodec), Arc::new(session.lookup()));

    let mut workspace = session.workspace();
    coordinator.attach(&mut workspace);
    for document in session.open_sources(&mut workspace)? {
        coordinator.request_validation(&workspace, document)?;
    }

    for (index, operation) in session.operations.iter().enumerate() {
        let touched = session::apply(&mut workspace, operation)
            .with_context(|| format!("Operation {} failed: {operation:?}", index + 1))?;
        for document in touched {
            coordinator.request_validation(&workspace, document)?;
        }
        for outcome in coordinator.process_completions(&mut workspace) {
            info!(%outcome, "validation finished");
        }
    }

    // Requests dropped while busy are not replayed unless --revalidate is set,
    // so settle and then validate the final state once more
    coordinator.wait_for_completions(&mut workspace, timeout);
    coordinator.request_all(&workspace)?;
    for outcome in coordinator.wait_for_completions(&mut workspace, timeout) {
        if outcome.is_failed() {
            warn!(%outcome, "validation failed");
        }
    }

    print_statuses(&workspace);
    info!(stats = %coordinator.stats().format_stats(), "validation finished");

    if let Some(dir) = &cli.output_dir {
        let sink = ManifestSink::new(dir);
        for document in workspace.document_ids() {
            let path = workspace
                .output_document(document, &sink)
                .with_context(|| format!("Failed to write {document}"))?;
            println!("Wrote {}", path.display());
        }
    }

    if !coordinator.shutdown(timeout) {
        warn!("Some validation workers did not stop in time");
    }
    Ok(())
}

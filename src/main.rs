//! src/main.rs – rime console launcher: run scripts, explain, browse history
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use rime::config::Config;
use rime::history::{HistoryEntry, HistoryRecorder};
use rime::output::{self, OutputFormat};
use rime::{
    CancellationController, ExecutionCoordinator, HttpTransport, Page, RunOutcome, RunStateStore,
    TabId, Transport,
};

/*──────────────────────── CLI structures ──────────────────────*/
#[derive(Parser)]
#[command(name = "rime")]
#[command(about = "Query console for a columnar database server", long_about = None)]
struct Cli {
    /// Server base URL (overrides config)
    #[arg(long, global = true, value_name = "URL")]
    url: Option<String>,

    /// Session token (overrides config)
    #[arg(long, global = true, value_name = "TOKEN")]
    token: Option<String>,

    /// Debug logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute every statement of a script (or the one under --cursor)
    Run {
        #[command(flatten)]
        source: SqlSource,

        /// Run only the statement containing this character offset
        #[arg(long)]
        cursor: Option<usize>,

        /// Request one page of rows (1-based)
        #[arg(long, requires = "page_size", conflicts_with = "cursor")]
        page: Option<u32>,

        #[arg(long, requires = "page")]
        page_size: Option<u32>,

        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Show the server's plan for one statement
    Explain {
        #[command(flatten)]
        source: SqlSource,

        #[arg(long)]
        cursor: Option<usize>,
    },
    /// Inspect or clear the run history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct SqlSource {
    /// SQL text
    #[arg(long)]
    sql: Option<String>,

    /// SQL file to execute
    #[arg(long, value_name = "FILE")]
    file: Option<PathBuf>,
}

impl SqlSource {
    fn read(&self) -> Result<String> {
        match (&self.sql, &self.file) {
            (Some(sql), _) => Ok(sql.clone()),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display())),
            (None, None) => bail!("either --sql or --file is required"),
        }
    }
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Newest entries first
    List {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    Clear,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("rime=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    /* Load configuration */
    let mut config = Config::load()?;
    if let Some(url) = cli.url {
        config.server.url = url;
    }
    if let Some(token) = cli.token {
        config.server.token = Some(token);
    }

    let history = match config.history_path() {
        Some(path) => HistoryRecorder::open(&path, config.console.history_capacity)?,
        None => HistoryRecorder::in_memory(config.console.history_capacity),
    };

    let code = match cli.command {
        Commands::History { action } => {
            history_command(history, action)?;
            0
        }
        Commands::Run { source, cursor, page, page_size, format } => {
            let sql = source.read()?;
            let page = page.zip(page_size).map(|(page, page_size)| Page { page, page_size });
            execute(&config, history, move |c, tab| async move {
                let outcome = match (cursor, page) {
                    (Some(at), _) => c.run_at_cursor(&tab, &sql, at).await,
                    (None, Some(p)) => c.run_page(&tab, &sql, p).await,
                    (None, None) => c.run(&tab, &sql).await,
                };
                let shown = c.store().get(&tab).result;
                (outcome, shown.map(|r| (output::render(&r, format), output::summary_line(&r))))
            })?
        }
        Commands::Explain { source, cursor } => {
            let sql = source.read()?;
            execute(&config, history, move |c, tab| async move {
                let outcome = c.explain(&tab, &sql, cursor).await;
                let shown = c.store().get(&tab).explain_result;
                (outcome, shown.map(|r| (output::format_as_table(&r), output::summary_line(&r))))
            })?
        }
    };
    process::exit(code);
}

/// Spin up the runtime, wire Ctrl-C to cancellation, drive one run and
/// print what it left in the tab. Returns the process exit code.
fn execute<F, Fut>(config: &Config, history: HistoryRecorder, drive: F) -> Result<i32>
where
    F: FnOnce(ExecutionCoordinator, TabId) -> Fut,
    Fut: std::future::Future<Output = (RunOutcome, Option<(String, String)>)>,
{
    let runtime = tokio::runtime::Runtime::new()?;
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(
        config.server.url.clone(),
        config.server.token.clone(),
        config.connect_timeout(),
    )?);
    let store = RunStateStore::new();
    let coordinator = ExecutionCoordinator::new(
        Arc::clone(&transport),
        store.clone(),
        history.shared(),
        config.policy(),
    )
    .with_user(config.console.user.clone());
    let tab = TabId::from("cli");

    let canceller = CancellationController::new(transport, store.clone())
        .with_runtime(runtime.handle().clone());
    let cancel_tab = tab.clone();
    ctrlc::set_handler(move || {
        if !canceller.cancel(&cancel_tab) {
            process::exit(130);
        }
    })?;

    let (outcome, shown) = runtime.block_on(async {
        let watcher = tokio::spawn(report_progress(store.clone(), tab.clone()));
        let out = drive(coordinator, tab.clone()).await;
        watcher.abort();
        out
    });
    // Let a fire-and-forget cancel request go out before the runtime drops.
    runtime.shutdown_timeout(std::time::Duration::from_secs(2));
    debug!(?outcome, "run finished");

    Ok(match outcome {
        RunOutcome::Completed => {
            if let Some((body, summary)) = shown {
                let mut stdout = io::stdout().lock();
                write!(stdout, "{body}")?;
                if !body.ends_with('\n') {
                    writeln!(stdout)?;
                }
                eprintln!("{summary}");
            }
            0
        }
        RunOutcome::Failed(err) => {
            eprintln!("Error: {err}");
            1
        }
        RunOutcome::Cancelled => {
            eprintln!("Query cancelled by user");
            130
        }
        RunOutcome::Superseded => 1,
        RunOutcome::Rejected(reason) => {
            eprintln!("Nothing to run ({reason:?})");
            2
        }
    })
}

/// Statement position on stderr whenever it changes.
async fn report_progress(store: RunStateStore, tab: TabId) {
    let mut changes = store.subscribe();
    let mut last = None;
    while changes.changed().await.is_ok() {
        let progress = store.get(&tab).progress;
        if let Some((current, total)) = progress.filter(|p| p.1 > 1 && Some(*p) != last) {
            if current > 0 {
                eprintln!("[{current}/{total}] running");
            }
        }
        last = progress;
    }
}

fn history_command(mut history: HistoryRecorder, action: HistoryAction) -> Result<()> {
    match action {
        HistoryAction::List { limit } => {
            let mut stdout = io::stdout().lock();
            for entry in history.list().iter().take(limit) {
                writeln!(stdout, "{}", history_line(entry))?;
            }
        }
        HistoryAction::Clear => {
            history.clear()?;
            eprintln!("History cleared");
        }
    }
    Ok(())
}

fn history_line(entry: &HistoryEntry) -> String {
    let status = match &entry.error {
        Some(e) => format!("FAILED: {}", e.lines().next().unwrap_or_default()),
        None => format!("{} rows", entry.rows_returned.unwrap_or(0)),
    };
    let sql: String = entry.sql.split_whitespace().collect::<Vec<_>>().join(" ");
    let sql = if sql.chars().count() > 60 {
        format!("{}…", sql.chars().take(59).collect::<String>())
    } else {
        sql
    };
    format!(
        "{}  {:>7}ms  {:<24}  {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.duration_ms.unwrap_or(0),
        status,
        sql
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_window_and_cursor_are_exclusive() {
        let both = Cli::try_parse_from([
            "rime", "run", "--sql", "SELECT 1", "--cursor", "3", "--page", "1", "--page-size", "10",
        ]);
        assert!(both.is_err());

        let paged = Cli::try_parse_from(["rime", "run", "--sql", "SELECT 1", "--page", "2", "--page-size", "10"])
            .unwrap();
        let Commands::Run { page, page_size, cursor, .. } = paged.command else {
            panic!("expected run");
        };
        assert_eq!((page, page_size, cursor), (Some(2), Some(10), None));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

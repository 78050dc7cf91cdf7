//! smartmark - bookmark collection CLI
//!
//! Opens the local collection through a sync session, runs one command and
//! prints the resulting view.

mod cli;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

use smartmark_core::{
    BookmarkRecord, ConfigError, ErrorSink, MemoryFeed, SmartmarkConfig, SqliteBookmarkStore,
    StoreError, SyncError, SyncSession,
};

use cli::{Cli, Command};

const DEFAULT_OWNER: &str = "local";

/// How long `visit` waits for the background write to settle.
const VISIT_SETTLE: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cannot open collection: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Cannot create {0}: {1}")]
    Io(PathBuf, std::io::Error),
}

/// Keeps background failures so the command can report them on exit.
#[derive(Default)]
struct CollectingSink {
    errors: Mutex<Vec<SyncError>>,
    reported: Notify,
}

impl CollectingSink {
    fn take(&self) -> Vec<SyncError> {
        match self.errors.lock() {
            Ok(mut errors) => std::mem::take(&mut *errors),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl ErrorSink for CollectingSink {
    fn report(&self, error: &SyncError) {
        tracing::warn!(%error, "background sync error");
        match self.errors.lock() {
            Ok(mut errors) => errors.push(error.clone()),
            Err(poisoned) => poisoned.into_inner().push(error.clone()),
        }
        self.reported.notify_one();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<SmartmarkConfig, ConfigError> {
    match path {
        Some(path) => SmartmarkConfig::load(path),
        None => SmartmarkConfig::load_standard(),
    }
}

fn database_path(cli: &Cli, config: &SmartmarkConfig) -> PathBuf {
    cli.db
        .clone()
        .or_else(|| config.storage.database_path.clone())
        .or_else(|| SmartmarkConfig::standard_path().map(|p| p.with_file_name("bookmarks.db")))
        .unwrap_or_else(|| PathBuf::from("smartmark.db"))
}

fn print_view(records: &[BookmarkRecord]) {
    if records.is_empty() {
        println!("(no bookmarks)");
        return;
    }
    for record in records {
        let visited = record
            .last_visited
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!("{}  {}", record.id, record.title);
        println!("    {}  (visited: {})", record.url, visited);
    }
}

async fn run(cli: Cli, config: SmartmarkConfig) -> Result<(), CliError> {
    let db_path = database_path(&cli, &config);
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| CliError::Io(parent.to_path_buf(), e))?;
    }
    let owner = cli
        .owner
        .clone()
        .or_else(|| config.storage.default_owner.clone())
        .unwrap_or_else(|| DEFAULT_OWNER.to_string());

    let feed = Arc::new(MemoryFeed::new());
    let store = Arc::new(SqliteBookmarkStore::open(&db_path)?.with_feed(Arc::clone(&feed)));
    let sink = Arc::new(CollectingSink::default());
    let session = SyncSession::builder(store, feed)
        .error_sink(sink.clone())
        .link_config(config.links.clone())
        .build();

    tracing::debug!(db = %db_path.display(), %owner, "opening collection");
    session.start(owner).await?;

    let outcome = match cli.cmd {
        Command::List { filter } => {
            if let Some(filter) = filter {
                session.set_filter(filter);
            }
            Ok(())
        }
        Command::Add { url, title } => session
            .add_bookmark(title.as_deref().unwrap_or(""), &url)
            .await
            .map(|record| println!("Added {} ({})\n", record.id, record.url)),
        Command::Visit { id } => {
            let mut revisions = session.subscribe_view();
            match session.touch_bookmark(&id.into()) {
                Ok(()) => {
                    revisions.borrow_and_update();
                    // The write is done once its change notification has
                    // been reloaded, or it failed and was reported.
                    let settled = tokio::time::timeout(VISIT_SETTLE, async {
                        tokio::select! {
                            _ = revisions.changed() => {}
                            _ = sink.reported.notified() => {}
                        }
                    })
                    .await;
                    if settled.is_err() {
                        tracing::warn!("visit not confirmed before exit");
                    }
                    match sink.take().into_iter().next() {
                        Some(err) => Err(err),
                        None => Ok(()),
                    }
                }
                Err(err) => Err(err),
            }
        }
        Command::Delete { id } => session.delete_bookmark(&id.into()).await,
    };

    print_view(&session.current_view());
    session.stop();
    outcome.map_err(CliError::from)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    run(cli, config).await?;
    Ok(())
}

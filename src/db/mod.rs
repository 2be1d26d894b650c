//! Embedded, crash-surviving store for detection events awaiting sync.
//!
//! All SQLite access happens on one dedicated thread that owns the
//! connection; async callers hand it closures through [`Database::execute`]
//! and await the reply, so no tokio worker ever blocks on disk I/O.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;
use tokio::sync::oneshot;

pub mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use models::{BufferEntry, EntryDefect};

use migrations::run_migrations;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "db";

use crate::{log_error, log_info, log_warn};

const BUSY_TIMEOUT_MS: i64 = 5_000;

type BufferTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum Request {
    Run(BufferTask),
    /// Fold the WAL back into the main file and leave the loop.
    Stop,
}

struct BufferThread {
    requests: mpsc::Sender<Request>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for BufferThread {
    fn drop(&mut self) {
        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return;
        };

        if let Err(err) = self.requests.send(Request::Stop) {
            log_error!("buffer thread already gone at shutdown: {err}");
        }
        if let Err(join_err) = handle.join() {
            log_error!("buffer thread panicked: {join_err:?}");
        }
    }
}

/// Cheaply cloneable handle to the event buffer. The thread stops when the
/// last clone is dropped.
#[derive(Clone)]
pub struct Database {
    thread: Arc<BufferThread>,
    path: Arc<PathBuf>,
}

impl Database {
    /// Open (creating if needed) the buffer at `path` and bring its schema
    /// up to date before returning.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create buffer directory {}", parent.display())
            })?;
        }

        let (request_tx, request_rx) = mpsc::channel::<Request>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let thread_path = path.clone();

        let handle = thread::Builder::new()
            .name("screenguard-db".into())
            .spawn(move || {
                let opened = open_connection(&thread_path).and_then(|mut conn| {
                    run_migrations(&mut conn).context("failed to migrate event buffer")?;
                    Ok(conn)
                });
                match opened {
                    Ok(conn) => {
                        if ready_tx.send(Ok(())).is_ok() {
                            serve(conn, request_rx);
                        }
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                    }
                }
            })
            .context("failed to spawn buffer thread")?;

        ready_rx
            .recv()
            .context("buffer thread exited before signaling readiness")??;

        log_info!("event buffer opened at {}", path.display());

        Ok(Self {
            thread: Arc::new(BufferThread {
                requests: request_tx,
                handle: Mutex::new(Some(handle)),
            }),
            path: Arc::new(path),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Run `task` against the connection on the buffer thread.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let request = Request::Run(Box::new(move |conn| {
            if reply_tx.send(task(conn)).is_err() {
                log_warn!("buffer caller went away before its reply");
            }
        }));

        self.thread
            .requests
            .send(request)
            .map_err(|_| anyhow!("buffer thread is not running"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("buffer thread dropped the request"))?
    }
}

fn serve(mut conn: Connection, requests: mpsc::Receiver<Request>) {
    while let Ok(request) = requests.recv() {
        match request {
            Request::Run(task) => task(&mut conn),
            Request::Stop => break,
        }
    }

    if let Err(err) = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);") {
        log_warn!("final WAL checkpoint failed: {err}");
    }
    log_info!("buffer thread stopped");
}

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).context("failed to open SQLite database")?;

    // WAL + FULL: a returned append is on disk before the caller moves on.
    let mode: String = conn
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
        .context("failed to enable WAL mode")?;
    if !mode.eq_ignore_ascii_case("wal") {
        log_error!("journal_mode is '{mode}', expected WAL");
    }
    conn.pragma_update(None, "synchronous", "FULL")
        .context("failed to set synchronous=FULL")?;
    if let Err(err) = conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS) {
        log_warn!("failed to set busy_timeout: {err}");
    }

    Ok(conn)
}

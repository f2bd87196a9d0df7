//! # Execution Engine
//!
//! One dedicated OS thread owns the SQLite connection. Async callers talk to
//! it through a bounded channel and receive replies on a oneshot, so the
//! blocking SQLite calls never run on a runtime worker.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                     Tokio runtime (callers)                     │
//! │   create_table ─┐    get ─┐    put ─┐    retention ─┐          │
//! │                 └─────────┴─────────┴───────────────┘          │
//! │                              │ tokio::sync::mpsc               │
//! └──────────────────────────────┼─────────────────────────────────┘
//!                                ▼
//!                   ┌─────────────────────────┐
//!                   │   revstore-engine       │  ← std::thread
//!                   │   rusqlite::Connection  │
//!                   │   run:  one transaction │
//!                   │   all:  one query       │
//!                   └─────────────────────────┘
//!                                │ oneshot reply
//!                                ▼
//! ```
//!
//! ## Atomicity
//!
//! [`Engine::run`] executes its whole batch inside one transaction. Either
//! every statement applies or none does. Separate calls are not atomic with
//! respect to each other.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::sql::Statement;

/// Rows returned by a query, in SQLite's column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

/// Requests handled by the engine thread.
enum EngineRequest {
    Run {
        batch: Vec<Statement>,
        response: oneshot::Sender<Result<()>>,
    },
    All {
        statement: Statement,
        response: oneshot::Sender<Result<RowSet>>,
    },
    Shutdown,
}

/// Handle to the engine thread.
///
/// Cheap to clone; every clone feeds the same connection.
#[derive(Clone, Debug)]
pub struct Engine {
    request_tx: mpsc::Sender<EngineRequest>,
    thread_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Engine {
    /// Opens the database described by `config` and starts the engine thread.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let conn = match &config.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        configure(&conn, config)?;

        let (request_tx, request_rx) = mpsc::channel(config.channel_size);
        let thread_handle = thread::Builder::new()
            .name("revstore-engine".to_string())
            .spawn(move || run_engine(conn, request_rx))
            .map_err(|e| Error::internal(format!("failed to spawn engine thread: {e}")))?;

        Ok(Self {
            request_tx,
            thread_handle: Arc::new(Mutex::new(Some(thread_handle))),
        })
    }

    /// Executes a batch of statements in one transaction.
    pub async fn run(&self, batch: Vec<Statement>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let (response, response_rx) = oneshot::channel();
        self.send(EngineRequest::Run { batch, response }).await?;
        response_rx
            .await
            .map_err(|_| Error::internal("engine dropped response channel"))?
    }

    /// Runs a query and collects every row.
    pub async fn all(&self, statement: Statement) -> Result<RowSet> {
        let (response, response_rx) = oneshot::channel();
        self.send(EngineRequest::All {
            statement,
            response,
        })
        .await?;
        response_rx
            .await
            .map_err(|_| Error::internal("engine dropped response channel"))?
    }

    /// Stops the engine thread and waits for it to close the connection.
    ///
    /// Requests already queued are served first. Every clone of this handle
    /// fails with [`Error::Internal`] afterwards.
    pub async fn shutdown(&self) {
        let _ = self.request_tx.send(EngineRequest::Shutdown).await;
        let handle = match self.thread_handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    async fn send(&self, request: EngineRequest) -> Result<()> {
        self.request_tx
            .send(request)
            .await
            .map_err(|_| Error::internal("engine has shut down"))
    }
}

fn configure(conn: &Connection, config: &StoreConfig) -> Result<()> {
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    if config.path.is_some() && config.wal {
        conn.execute_batch("PRAGMA journal_mode = WAL")?;
        conn.execute_batch("PRAGMA synchronous = NORMAL")?;
    }
    Ok(())
}

/// The engine thread's main loop.
fn run_engine(mut conn: Connection, mut request_rx: mpsc::Receiver<EngineRequest>) {
    while let Some(request) = request_rx.blocking_recv() {
        match request {
            EngineRequest::Run { batch, response } => {
                let result = execute_batch(&mut conn, &batch);
                let _ = response.send(result);
            }
            EngineRequest::All {
                statement,
                response,
            } => {
                let result = query_all(&conn, &statement);
                let _ = response.send(result);
            }
            EngineRequest::Shutdown => break,
        }
    }
    debug!("engine thread stopped");
}

fn execute_batch(conn: &mut Connection, batch: &[Statement]) -> Result<()> {
    let tx = conn.transaction()?;
    for statement in batch {
        tx.execute(&statement.sql, params_from_iter(statement.params.iter()))
            .map_err(classify)?;
    }
    tx.commit()?;
    debug!(statements = batch.len(), "engine batch committed");
    Ok(())
}

fn query_all(conn: &Connection, statement: &Statement) -> Result<RowSet> {
    let mut stmt = conn.prepare(&statement.sql).map_err(classify)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let mut rows = stmt
        .query(params_from_iter(statement.params.iter()))
        .map_err(classify)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(row.get::<_, SqlValue>(i)?);
        }
        out.push(values);
    }
    Ok(RowSet { columns, rows: out })
}

/// Separates missing relations from every other SQLite failure.
fn classify(err: rusqlite::Error) -> Error {
    if let rusqlite::Error::SqliteFailure(_, Some(message)) = &err {
        if let Some(relation) = message.strip_prefix("no such table: ") {
            let relation = relation.strip_prefix("main.").unwrap_or(relation);
            return Error::TableNotFound {
                relation: relation.to_string(),
            };
        }
    }
    Error::Sqlite(err)
}

//! Log lines stored in the document store.
//!
//! [`StoreLogger`] plugs into `tracing-subscriber` as a writer:
//!
//! ```rust,no_run
//! use goat::logger::StoreLogger;
//! use goat::store::Connection;
//!
//! # async fn run() -> Result<(), goat::Error> {
//! let conn = Connection::open("memory://localhost/app")?;
//! let logger = StoreLogger::new(conn.database("app"), "log")?;
//! tracing_subscriber::fmt().with_writer(logger).init();
//! # Ok(())
//! # }
//! ```
//!
//! Every formatted line becomes one `{ _id, seq, message }` document. Inserts
//! happen on a background task, so a slow store never holds up a request.
//! [`StoreLogger::tail`] follows a log collection and copies new messages to
//! any writer.

use std::io::{self, Write};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::store::{Collection, Database, Filter, StoreError};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize, Serialize)]
struct Entry {
    #[serde(rename = "_id")]
    id: String,
    seq: u64,
    message: String,
}

impl Entry {
    fn new(seq: u64, message: String) -> Self {
        // Zero padded so identifiers sort like sequence numbers.
        Self { id: format!("{seq:020}"), seq, message }
    }
}

/// A `MakeWriter` that appends log lines to a collection.
///
/// Cloning is cheap; clones feed the same background task.
#[derive(Clone, Debug)]
pub struct StoreLogger {
    tx: mpsc::UnboundedSender<String>,
}

impl StoreLogger {
    /// Starts the insert task. Lines go to `collection` in `db`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(db: Database, collection: &str) -> Result<Self, Error> {
        let handle = Handle::try_current()
            .map_err(|e| Error::Config(format!("store logger needs a tokio runtime: {e}")))?;
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let collection = collection.to_owned();

        handle.spawn(async move {
            let log = db.collection(&collection);
            // Continue after the highest stored entry; removed entries leave
            // gaps, so the count is not a safe starting point.
            let mut seq = match latest(&log).await {
                Ok(seq) => seq,
                Err(e) => {
                    eprintln!("goat logger: cannot read `{collection}`: {e}");
                    0
                }
            };
            while let Some(message) = rx.recv().await {
                seq += 1;
                let entry = Entry::new(seq, message);
                if let Err(e) = log.upsert_id(&entry.id, &entry).await {
                    eprintln!("goat logger: {e}");
                }
            }
        });

        Ok(Self { tx })
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for StoreLogger {
    type Writer = LineWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LineWriter { tx: self.tx.clone(), buf: Vec::new() }
    }
}

/// Buffers one formatted event and hands it to the insert task when dropped.
pub struct LineWriter {
    tx: mpsc::UnboundedSender<String>,
    buf: Vec<u8>,
}

impl Write for LineWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LineWriter {
    fn drop(&mut self) {
        let line = String::from_utf8_lossy(&self.buf);
        let line = line.trim();
        if !line.is_empty() {
            // The task only goes away with the runtime; nothing left to log to.
            let _ = self.tx.send(line.to_owned());
        }
    }
}

// ── Tail ──────────────────────────────────────────────────────────────────────

/// Follows a tail started with [`StoreLogger::tail`].
pub struct TailHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TailHandle {
    /// Stops following and waits for the task to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for TailHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl StoreLogger {
    /// Copies messages written to `collection` from now on onto `out`, one per
    /// line. Entries already stored when the tail starts are skipped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn tail<W>(from: Database, collection: &str, mut out: W) -> TailHandle
    where
        W: Write + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let collection = collection.to_owned();

        let task = tokio::spawn(async move {
            let log = from.collection(&collection);
            let mut last = match latest(&log).await {
                Ok(seq) => seq,
                Err(e) => {
                    eprintln!("goat logger: cannot tail `{collection}`: {e}");
                    return;
                }
            };
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {}
                }
                let entries: Vec<Entry> = match log.find_many(&Filter::new()).await {
                    Ok(entries) => entries,
                    Err(e) => {
                        eprintln!("goat logger: tail of `{collection}` stopped: {e}");
                        break;
                    }
                };
                for entry in entries {
                    if entry.seq <= last {
                        continue;
                    }
                    last = entry.seq;
                    if writeln!(out, "{}", entry.message).is_err() {
                        return;
                    }
                }
                let _ = out.flush();
            }
        });

        TailHandle { stop: Some(stop_tx), task }
    }
}

/// Highest sequence number stored in `log`, `0` when it is empty.
async fn latest(log: &Collection) -> Result<u64, StoreError> {
    let entries: Vec<Entry> = log.find_many(&Filter::new()).await?;
    Ok(entries.iter().map(|e| e.seq).max().unwrap_or(0))
}

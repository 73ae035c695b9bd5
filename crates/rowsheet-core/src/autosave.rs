//! Debounced background saving.
//!
//! Requests are queued to a worker thread which waits for a quiet window,
//! folds everything queued for the same table into one update and hands it
//! to the store. Queuing a request for a table whose save is in flight
//! cancels that save; the cancelled update is folded back under the newer
//! request so nothing is lost. Failures are logged and not retried.

use crate::error::RowsheetError;
use crate::persistence::{CancellationToken, TableStore, TableUpdate, UserId};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Default quiet window before a queued save is dispatched.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Clone, Debug, PartialEq)]
pub struct SaveRequest {
    pub owner: UserId,
    pub id: String,
    pub update: TableUpdate,
}

enum Message {
    Save(SaveRequest),
    Flush(Sender<()>),
}

type InFlight = Arc<Mutex<Option<(String, CancellationToken)>>>;

pub struct AutoSaver {
    tx: Option<Sender<Message>>,
    worker: Option<JoinHandle<()>>,
    in_flight: InFlight,
}

impl AutoSaver {
    pub fn new(store: Arc<dyn TableStore>, debounce: Duration) -> Self {
        let (tx, rx) = mpsc::channel();
        let in_flight: InFlight = Arc::new(Mutex::new(None));
        let worker_in_flight = in_flight.clone();
        let worker = std::thread::Builder::new()
            .name("rowsheet-autosave".into())
            .spawn(move || run_worker(rx, store, debounce, worker_in_flight));
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::warn!(%err, "failed to start autosave worker; saves are disabled");
                None
            }
        };
        Self {
            tx: Some(tx),
            worker,
            in_flight,
        }
    }

    /// Queue a save. Returns immediately.
    pub fn schedule(&self, request: SaveRequest) {
        if let Ok(guard) = self.in_flight.lock()
            && let Some((id, token)) = guard.as_ref()
            && *id == request.id
        {
            token.cancel();
        }
        if let Some(tx) = &self.tx
            && tx.send(Message::Save(request)).is_err()
        {
            tracing::warn!("autosave worker is gone; dropping save request");
        }
    }

    /// Dispatch anything pending now and wait for it to finish.
    pub fn flush(&self) {
        let Some(tx) = &self.tx else {
            return;
        };
        let (ack_tx, ack_rx) = mpsc::channel();
        if tx.send(Message::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }
}

impl Drop for AutoSaver {
    fn drop(&mut self) {
        // Closing the channel makes the worker flush and exit.
        self.tx.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::warn!("autosave worker panicked");
        }
    }
}

fn run_worker(
    rx: Receiver<Message>,
    store: Arc<dyn TableStore>,
    debounce: Duration,
    in_flight: InFlight,
) {
    let mut pending: Vec<SaveRequest> = Vec::new();
    loop {
        let message = if pending.is_empty() {
            rx.recv().map_err(|_| RecvTimeoutError::Disconnected)
        } else {
            rx.recv_timeout(debounce)
        };
        match message {
            Ok(Message::Save(request)) => queue(&mut pending, request),
            Ok(Message::Flush(ack)) => {
                dispatch_all(&mut pending, store.as_ref(), &in_flight);
                let _ = ack.send(());
            }
            Err(RecvTimeoutError::Timeout) => {
                dispatch_all(&mut pending, store.as_ref(), &in_flight);
            }
            Err(RecvTimeoutError::Disconnected) => {
                dispatch_all(&mut pending, store.as_ref(), &in_flight);
                break;
            }
        }
    }
}

fn queue(pending: &mut Vec<SaveRequest>, request: SaveRequest) {
    match pending
        .iter_mut()
        .find(|p| p.id == request.id && p.owner == request.owner)
    {
        Some(existing) => existing.update.merge(request.update),
        None => pending.push(request),
    }
}

fn dispatch_all(pending: &mut Vec<SaveRequest>, store: &dyn TableStore, in_flight: &InFlight) {
    let mut retry = Vec::new();
    for request in pending.drain(..) {
        if request.update.is_empty() {
            continue;
        }
        let token = CancellationToken::new();
        if let Ok(mut guard) = in_flight.lock() {
            *guard = Some((request.id.clone(), token.clone()));
        }
        let result = store.save(&request.owner, &request.id, &request.update, &token);
        if let Ok(mut guard) = in_flight.lock() {
            *guard = None;
        }
        match result {
            Ok(()) => tracing::debug!(id = %request.id, "autosaved table"),
            Err(RowsheetError::Cancelled) => {
                tracing::debug!(id = %request.id, "autosave superseded");
                retry.push(request);
            }
            Err(err) => tracing::warn!(id = %request.id, %err, "autosave failed"),
        }
    }
    // Cancelled updates sit underneath whatever superseded them.
    *pending = retry;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryStore, TableRecord, TableSummary};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store whose writes take `delay` and honour cancellation afterwards.
    struct SlowStore {
        inner: MemoryStore,
        delay: Duration,
        started: AtomicUsize,
        finished: AtomicUsize,
    }

    impl SlowStore {
        fn new(delay: Duration) -> Self {
            Self {
                inner: MemoryStore::new(),
                delay,
                started: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
            }
        }
    }

    impl TableStore for SlowStore {
        fn create(&self, owner: &UserId, name: Option<&str>) -> crate::error::Result<TableRecord> {
            self.inner.create(owner, name)
        }

        fn load(&self, owner: &UserId, id: &str) -> crate::error::Result<TableRecord> {
            self.inner.load(owner, id)
        }

        fn save(
            &self,
            owner: &UserId,
            id: &str,
            update: &TableUpdate,
            cancel: &CancellationToken,
        ) -> crate::error::Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if cancel.is_cancelled() {
                return Err(RowsheetError::Cancelled);
            }
            self.inner.save(owner, id, update, cancel)?;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn delete(&self, owner: &UserId, id: &str) -> crate::error::Result<()> {
            self.inner.delete(owner, id)
        }

        fn list(&self, owner: &UserId) -> crate::error::Result<Vec<TableSummary>> {
            self.inner.list(owner)
        }
    }

    fn request(id: &str, csv: Option<&str>, name: Option<&str>) -> SaveRequest {
        SaveRequest {
            owner: UserId::new("u"),
            id: id.to_string(),
            update: TableUpdate {
                csv: csv.map(str::to_string),
                name: name.map(str::to_string),
                query_spec: None,
            },
        }
    }

    #[test]
    fn test_flush_saves_latest_state() {
        let store = Arc::new(MemoryStore::new());
        let saver = AutoSaver::new(store.clone(), Duration::from_secs(60));
        saver.schedule(request("t1", Some("a"), Some("First")));
        saver.schedule(request("t1", Some("b"), None));
        saver.flush();
        let record = store.load(&UserId::new("u"), "t1").unwrap();
        assert_eq!(record.csv, "b");
        assert_eq!(record.name, "First");
    }

    #[test]
    fn test_drop_flushes_pending() {
        let store = Arc::new(MemoryStore::new());
        {
            let saver = AutoSaver::new(store.clone(), Duration::from_secs(60));
            saver.schedule(request("t2", Some("x"), None));
        }
        assert_eq!(store.load(&UserId::new("u"), "t2").unwrap().csv, "x");
    }

    #[test]
    fn test_debounce_window_elapses() {
        let store = Arc::new(MemoryStore::new());
        let saver = AutoSaver::new(store.clone(), Duration::from_millis(20));
        saver.schedule(request("t3", Some("y"), None));
        let owner = UserId::new("u");
        let mut saved = false;
        for _ in 0..100 {
            if store.load(&owner, "t3").is_ok() {
                saved = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(saved);
    }

    #[test]
    fn test_queue_merges_same_table() {
        let mut pending = Vec::new();
        queue(&mut pending, request("a", Some("1"), None));
        queue(&mut pending, request("b", Some("2"), None));
        queue(&mut pending, request("a", None, Some("A")));
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].update.csv.as_deref(), Some("1"));
        assert_eq!(pending[0].update.name.as_deref(), Some("A"));
    }

    #[test]
    fn test_newer_request_cancels_in_flight_save() {
        let store = Arc::new(SlowStore::new(Duration::from_millis(200)));
        let saver = AutoSaver::new(store.clone(), Duration::from_millis(10));
        saver.schedule(request("t4", Some("a"), Some("A")));
        for _ in 0..200 {
            if store.started.load(Ordering::SeqCst) >= 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(store.started.load(Ordering::SeqCst), 1);

        saver.schedule(request("t4", Some("b"), None));
        saver.schedule(request("t4", Some("c"), None));
        saver.flush();

        let record = store.load(&UserId::new("u"), "t4").unwrap();
        assert_eq!(record.csv, "c");
        assert_eq!(record.name, "A");
        assert_eq!(store.started.load(Ordering::SeqCst), 2);
        assert_eq!(store.finished.load(Ordering::SeqCst), 1);
    }
}

//! Cursor registry: id allocation, batch draining, and idle reclamation.
//!
//! The registry lock is held only to look up or insert/remove slots; batch
//! production happens under the per-cursor mutex, so concurrent `getMore`
//! calls on one id serialize and never hand out the same document twice.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use bson::{Bson, Document};
use parking_lot::{Mutex, RwLock};
use rand::Rng;

use crate::config::ProxyConfig;
use crate::document::{format_value, type_alias};
use crate::errors::CommandError;
use crate::session::SessionId;

pub struct CursorManager {
    cursors: Arc<RwLock<HashMap<i64, Arc<Cursor>>>>,
    next_id: AtomicI64,
    default_batch: usize,
    max_batch: usize,
    idle: Duration,
    sweep_stop: Mutex<Option<mpsc::Sender<()>>>,
}

struct Cursor {
    state: Mutex<CursorState>,
}

struct CursorState {
    ns: String,
    session: Option<SessionId>,
    remaining: Vec<Document>,
    last_used: Instant,
}

/// One drained batch and the id to report with it: the cursor's own id, or
/// 0 when this batch exhausted it.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorBatch {
    pub docs: Vec<Document>,
    pub id: i64,
}

impl CursorManager {
    /// Builds the registry and, unless `sweep_interval_secs` is zero, starts
    /// the idle-cursor sweeper thread.
    #[must_use]
    pub fn new(config: &ProxyConfig) -> Self {
        let manager = Self {
            cursors: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicI64::new(seed_id()),
            default_batch: config.default_batch_size.try_into().unwrap_or(usize::MAX),
            max_batch: config.max_batch_size.try_into().unwrap_or(usize::MAX),
            idle: Duration::from_secs(config.cursor_idle_secs),
            sweep_stop: Mutex::new(None),
        };
        if config.sweep_interval_secs > 0 {
            manager.spawn_sweeper(Duration::from_secs(config.sweep_interval_secs));
        }
        manager
    }

    /// First-batch size: the requested value when present (0 is a valid
    /// "empty first batch"), the configured default otherwise, capped.
    #[must_use]
    pub fn first_batch_size(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_batch).min(self.max_batch)
    }

    /// `getMore` batch size: missing or zero drains up to the configured
    /// maximum.
    #[must_use]
    pub fn more_batch_size(&self, requested: Option<usize>) -> usize {
        match requested {
            Some(n) if n > 0 => n.min(self.max_batch),
            _ => self.max_batch,
        }
    }

    /// Registers leftover results under a fresh non-zero id. Callers only
    /// register when results remain past the first batch.
    pub fn register(&self, ns: &str, session: Option<SessionId>, remaining: Vec<Document>) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        crate::diag!("cursor {id} opened on {ns} with {} buffered", remaining.len());
        let cursor = Arc::new(Cursor {
            state: Mutex::new(CursorState {
                ns: ns.to_owned(),
                session,
                remaining,
                last_used: Instant::now(),
            }),
        });
        self.cursors.write().insert(id, cursor);
        id
    }

    /// Drains the next batch. The final batch removes the cursor and reports
    /// id 0; a cursor owned by a different session is reported as not found.
    pub fn get_more(
        &self,
        id: i64,
        ns: &str,
        session: Option<&SessionId>,
        batch: usize,
    ) -> Result<CursorBatch, CommandError> {
        let cursor = self
            .cursors
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found(id))?;

        let mut state = cursor.state.lock();
        if state.session.as_ref() != session {
            return Err(not_found(id));
        }
        if state.ns != ns {
            return Err(CommandError::Unauthorized(format!(
                "Requested getMore on namespace '{ns}', \
                 but cursor belongs to a different namespace {}",
                state.ns
            )));
        }
        state.last_used = Instant::now();
        let n = batch.min(state.remaining.len());
        let tail = state.remaining.split_off(n);
        let docs = std::mem::replace(&mut state.remaining, tail);
        let exhausted = state.remaining.is_empty();
        drop(state);

        if exhausted {
            self.cursors.write().remove(&id);
        }
        Ok(CursorBatch { docs, id: if exhausted { 0 } else { id } })
    }

    /// Removes one cursor. False when no such cursor was open.
    pub fn kill(&self, id: i64) -> bool {
        self.cursors.write().remove(&id).is_some()
    }

    /// Removes every cursor owned by the session; returns how many died.
    pub fn kill_session(&self, session: &SessionId) -> usize {
        let snapshot: Vec<(i64, Arc<Cursor>)> =
            self.cursors.read().iter().map(|(id, c)| (*id, Arc::clone(c))).collect();
        let mut doomed = Vec::new();
        for (id, cursor) in snapshot {
            let state = cursor.state.lock();
            if state.session.as_ref() == Some(session) {
                doomed.push(id);
            }
        }
        let mut map = self.cursors.write();
        doomed.into_iter().filter(|id| map.remove(id).is_some()).count()
    }

    #[must_use]
    pub fn open_cursors(&self) -> usize {
        self.cursors.read().len()
    }

    fn spawn_sweeper(&self, interval: Duration) {
        let (tx, rx) = mpsc::channel::<()>();
        *self.sweep_stop.lock() = Some(tx);

        let cursors = Arc::clone(&self.cursors);
        let idle = self.idle;
        thread::Builder::new()
            .name("bisongate-cursor-sweep".into())
            .spawn(move || {
                loop {
                    match rx.recv_timeout(interval) {
                        Err(mpsc::RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }
                    let swept = sweep_idle(&cursors, idle);
                    if swept > 0 {
                        crate::diag!("cursor sweep reclaimed {swept} idle cursors");
                    }
                }
            })
            .ok();
    }
}

impl Drop for CursorManager {
    fn drop(&mut self) {
        if let Some(tx) = self.sweep_stop.lock().take() {
            let _ = tx.send(());
        }
    }
}

impl fmt::Debug for CursorManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorManager").field("open", &self.open_cursors()).finish()
    }
}

fn not_found(id: i64) -> CommandError {
    CommandError::CursorNotFound(format!("cursor id {id} not found"))
}

/// Non-zero starting id with headroom; ids only grow within a process run.
fn seed_id() -> i64 {
    rand::rng().random_range(1..i64::MAX / 2)
}

/// One sweep pass. Takes per-cursor locks only; a cursor mid-advance is
/// busy, not idle, and is skipped.
fn sweep_idle(cursors: &RwLock<HashMap<i64, Arc<Cursor>>>, idle: Duration) -> usize {
    let snapshot: Vec<(i64, Arc<Cursor>)> =
        cursors.read().iter().map(|(id, c)| (*id, Arc::clone(c))).collect();
    let mut expired = Vec::new();
    for (id, cursor) in snapshot {
        if let Some(state) = cursor.state.try_lock()
            && state.last_used.elapsed() >= idle
        {
            expired.push(id);
        }
    }
    if expired.is_empty() {
        return 0;
    }
    let mut map = cursors.write();
    expired.into_iter().filter(|id| map.remove(id).is_some()).count()
}

/// Parses a `batchSize` operand. Whole numbers of any width are accepted;
/// negatives are refused with the field-validation shape clients expect.
pub fn parse_batch_size(value: &Bson) -> Result<usize, CommandError> {
    #[allow(clippy::cast_possible_truncation)]
    let n = match value {
        Bson::Int32(n) => i64::from(*n),
        Bson::Int64(n) => *n,
        Bson::Double(d) if d.is_finite() && d.trunc() == *d => *d as i64,
        Bson::Double(d) => {
            return Err(CommandError::BadValue(format!(
                "Expected an integer: batchSize: {}",
                format_value(&Bson::Double(*d))
            )));
        }
        other => {
            return Err(CommandError::TypeMismatch(format!(
                "BSON field 'batchSize' is the wrong type '{}', \
                 expected types '[long, int, decimal, double]'",
                type_alias(other)
            )));
        }
    };
    if n < 0 {
        return Err(CommandError::Location(
            51024,
            format!("BSON field 'batchSize' value must be >= 0, actual value '{n}'"),
        ));
    }
    Ok(usize::try_from(n).unwrap_or(usize::MAX))
}

//! In-process remote backend.
//!
//! Behaves like the hosted document store closely enough for tests and demo
//! setups: server timestamps, echo-then-confirm change notifications, arrays
//! flattened into index-keyed maps by path updates, and a write-once history
//! collection. Failures can be injected per operation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::Value;

use super::{Document, RemoteBackend, RemoteError, RemoteResult, Subscription, WatchCallback, WatchEvent};
use crate::guard::parse_timestamp;
use crate::models::{HistorySnapshot, Namespace};
use crate::patch::{apply_patch, ArrayPolicy, FieldPatch};

/// Backend operations, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Get,
    SetFull,
    UpdatePaths,
    Delete,
    ListInRange,
    AppendSnapshot,
    ListSnapshots,
}

type DocKey = (Namespace, String);

#[derive(Default)]
struct State {
    docs: HashMap<DocKey, Document>,
    /// Snapshots by storage key; write-once
    history: BTreeMap<(Namespace, String), HistorySnapshot>,
    watchers: HashMap<DocKey, Vec<(u64, WatchCallback)>>,
    next_watch_id: u64,
    offline: bool,
    failures: HashMap<RemoteOp, VecDeque<RemoteError>>,
    calls: HashMap<RemoteOp, usize>,
}

impl State {
    /// Count the call and decide whether it fails.
    fn enter(&mut self, op: RemoteOp) -> RemoteResult<()> {
        *self.calls.entry(op).or_default() += 1;
        if self.offline {
            return Err(RemoteError::Unavailable("remote is offline".into()));
        }
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn callbacks(&self, key: &DocKey) -> Vec<WatchCallback> {
        self.watchers
            .get(key)
            .map(|subs| subs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }
}

/// In-memory [`RemoteBackend`].
#[derive(Clone, Default)]
pub struct InMemoryRemote {
    state: Arc<Mutex<State>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Simulate loss of connectivity. Every operation fails with
    /// [`RemoteError::Unavailable`] while offline.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Make the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: RemoteOp, error: RemoteError) {
        self.lock().failures.entry(op).or_default().push_back(error);
    }

    /// Number of calls made to `op`, failed ones included.
    pub fn calls(&self, op: RemoteOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Store a document as-is, bypassing stamping and notifications.
    pub fn seed(&self, namespace: Namespace, date: &str, document: Value) {
        if let Value::Object(doc) = document {
            self.lock().docs.insert((namespace, date.to_string()), doc);
        }
    }

    /// Current raw document.
    pub fn document(&self, namespace: Namespace, date: &str) -> Option<Document> {
        self.lock().docs.get(&(namespace, date.to_string())).cloned()
    }

    /// Number of stored documents in a namespace.
    pub fn document_count(&self, namespace: Namespace) -> usize {
        self.lock().docs.keys().filter(|(ns, _)| *ns == namespace).count()
    }

    fn notify(callbacks: &[WatchCallback], document: Option<&Document>, echo: bool) {
        for cb in callbacks {
            if echo {
                cb(WatchEvent {
                    document: document.cloned(),
                    has_pending_writes: true,
                });
            }
            cb(WatchEvent {
                document: document.cloned(),
                has_pending_writes: false,
            });
        }
    }
}

/// Next server timestamp for a document; never earlier than its last one.
fn next_stamp(existing: Option<&Document>) -> DateTime<Utc> {
    let now = Utc::now();
    match existing
        .and_then(|doc| doc.get("lastUpdated"))
        .and_then(parse_timestamp)
    {
        Some(previous) if previous >= now => previous + Duration::microseconds(1),
        _ => now,
    }
}

#[async_trait]
impl RemoteBackend for InMemoryRemote {
    async fn get(&self, namespace: Namespace, date: &str) -> RemoteResult<Option<Document>> {
        let mut state = self.lock();
        state.enter(RemoteOp::Get)?;
        Ok(state.docs.get(&(namespace, date.to_string())).cloned())
    }

    async fn set_full(&self, namespace: Namespace, date: &str, mut document: Document) -> RemoteResult<DateTime<Utc>> {
        let key = (namespace, date.to_string());
        let (stamp, callbacks) = {
            let mut state = self.lock();
            state.enter(RemoteOp::SetFull)?;
            let stamp = next_stamp(state.docs.get(&key));
            document.insert(
                "lastUpdated".into(),
                Value::String(stamp.to_rfc3339_opts(SecondsFormat::Nanos, true)),
            );
            state.docs.insert(key.clone(), document.clone());
            (stamp, state.callbacks(&key))
        };

        Self::notify(&callbacks, Some(&document), true);
        Ok(stamp)
    }

    async fn update_paths(&self, namespace: Namespace, date: &str, patch: &FieldPatch) -> RemoteResult<DateTime<Utc>> {
        let key = (namespace, date.to_string());
        let (stamp, updated, callbacks) = {
            let mut state = self.lock();
            state.enter(RemoteOp::UpdatePaths)?;

            let mut doc = match state.docs.get(&key) {
                Some(existing) => Value::Object(existing.clone()),
                None => serde_json::json!({ "date": date }),
            };
            apply_patch(&mut doc, patch, ArrayPolicy::KeyedMap)
                .map_err(|e| RemoteError::Rejected(e.to_string()))?;

            let Value::Object(mut updated) = doc else {
                return Err(RemoteError::Encoding("patched document is not an object".into()));
            };
            let stamp = next_stamp(state.docs.get(&key));
            updated.insert(
                "lastUpdated".into(),
                Value::String(stamp.to_rfc3339_opts(SecondsFormat::Nanos, true)),
            );
            state.docs.insert(key.clone(), updated.clone());
            (stamp, updated, state.callbacks(&key))
        };

        Self::notify(&callbacks, Some(&updated), true);
        Ok(stamp)
    }

    async fn delete(&self, namespace: Namespace, date: &str) -> RemoteResult<()> {
        let key = (namespace, date.to_string());
        let callbacks = {
            let mut state = self.lock();
            state.enter(RemoteOp::Delete)?;
            state.docs.remove(&key);
            state.callbacks(&key)
        };

        Self::notify(&callbacks, None, false);
        Ok(())
    }

    fn watch(&self, namespace: Namespace, date: &str, callback: WatchCallback) -> Subscription {
        let key = (namespace, date.to_string());
        let (id, current) = {
            let mut state = self.lock();
            let id = state.next_watch_id;
            state.next_watch_id += 1;
            state
                .watchers
                .entry(key.clone())
                .or_default()
                .push((id, Arc::clone(&callback)));
            (id, state.docs.get(&key).cloned())
        };

        callback(WatchEvent {
            document: current,
            has_pending_writes: false,
        });

        let weak: Weak<Mutex<State>> = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Some(subs) = state.watchers.get_mut(&key) {
                    subs.retain(|(sub_id, _)| *sub_id != id);
                }
            }
        })
    }

    async fn list_in_range(&self, namespace: Namespace, start: &str, end: &str) -> RemoteResult<Vec<Document>> {
        let mut state = self.lock();
        state.enter(RemoteOp::ListInRange)?;

        let mut hits: Vec<(&String, &Document)> = state
            .docs
            .iter()
            .filter(|((ns, date), _)| *ns == namespace && date.as_str() >= start && date.as_str() <= end)
            .map(|((_, date), doc)| (date, doc))
            .collect();
        hits.sort_by(|a, b| a.0.cmp(b.0));
        Ok(hits.into_iter().map(|(_, doc)| doc.clone()).collect())
    }

    async fn append_snapshot(&self, snapshot: &HistorySnapshot) -> RemoteResult<()> {
        let mut state = self.lock();
        state.enter(RemoteOp::AppendSnapshot)?;

        let key = (snapshot.namespace, snapshot.key());
        if state.history.contains_key(&key) {
            return Err(RemoteError::Rejected(format!("snapshot {} already exists", snapshot.key())));
        }
        state.history.insert(key, snapshot.clone());
        Ok(())
    }

    async fn list_snapshots(&self, namespace: Namespace, date: &str) -> RemoteResult<Vec<HistorySnapshot>> {
        let mut state = self.lock();
        state.enter(RemoteOp::ListSnapshots)?;

        let mut snapshots: Vec<HistorySnapshot> = state
            .history
            .values()
            .filter(|s| s.namespace == namespace && s.record_id == date)
            .cloned()
            .collect();
        snapshots.sort_by_key(|s| s.snapshot_at);
        Ok(snapshots)
    }
}

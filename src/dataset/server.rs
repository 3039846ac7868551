//! Server side of the remote dataset protocol.
//!
//! One session per client rank:
//!
//! ```text
//! Idle --RequestLoad--> Active --Release--> Closed --RequestLoad--> Active ...
//! ```
//!
//! `RequestView`, `RequestArray` and `Release` are only valid while Active;
//! anywhere else they are answered with a `SessionNotActive` error. Loaded
//! datasets are shared between sessions through weak back-references keyed by
//! path, with an explicit count of the sessions using each one.
//!
//! Each session keeps the resolved rows and derived fields of its most
//! recently used views only, up to [`DEFAULT_VIEW_LIMIT`]; an evicted view is
//! resolved again if it is asked for later.

use super::{Array, Dataset, DatasetLoader, Derivations, Evaluator, Selector, resolve};
use crate::comm::Rank;
use crate::message::Outbox;
use crate::message::catalog::{ConfirmLoad, ReturnArray, ServerError, ViewInfo};
use crate::task_error::TaskError;
use crate::wire::WireArray;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};

/// Views a session keeps resolved at once unless configured otherwise.
pub const DEFAULT_VIEW_LIMIT: usize = 4;

struct CacheEntry {
    dataset: Weak<dyn Dataset>,
    sessions: usize,
}

#[derive(Default)]
struct ViewState {
    index: Vec<usize>,
    derived: HashMap<String, Array>,
}

struct ActiveSession {
    path: String,
    dataset: Arc<dyn Dataset>,
    views: LruCache<Vec<u8>, ViewState>,
}

enum Session {
    Active(ActiveSession),
    Closed,
}

impl Session {
    fn state_name(s: Option<&Session>) -> &'static str {
        match s {
            None => "idle",
            Some(Session::Active(_)) => "active",
            Some(Session::Closed) => "closed",
        }
    }
}

pub struct DatasetServer {
    loader: Arc<dyn DatasetLoader>,
    derivations: Arc<Derivations>,
    cache: HashMap<String, CacheEntry>,
    sessions: HashMap<Rank, Session>,
    view_limit: NonZeroUsize,
}

impl DatasetServer {
    pub fn new(loader: Arc<dyn DatasetLoader>, derivations: Arc<Derivations>) -> Self {
        Self {
            loader,
            derivations,
            cache: HashMap::new(),
            sessions: HashMap::new(),
            view_limit: NonZeroUsize::new(DEFAULT_VIEW_LIMIT).unwrap_or(NonZeroUsize::MIN),
        }
    }

    /// Keep at most `limit` (at least one) views resolved per session.
    pub fn with_view_limit(mut self, limit: usize) -> Self {
        self.view_limit = NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN);
        self
    }

    fn active(&mut self, rank: Rank, request: &'static str) -> Result<&mut ActiveSession, TaskError> {
        match self.sessions.get_mut(&rank) {
            Some(Session::Active(s)) => Ok(s),
            other => Err(TaskError::SessionNotActive {
                rank,
                state: Session::state_name(other.map(|s| &*s)),
                request,
            }),
        }
    }

    /// Reuse the live dataset for `path` or load it.
    fn acquire_dataset(&mut self, path: &str) -> Result<Arc<dyn Dataset>, TaskError> {
        if let Some(entry) = self.cache.get_mut(path) {
            if let Some(ds) = entry.dataset.upgrade() {
                entry.sessions += 1;
                log::debug!("reusing loaded dataset `{path}` ({} sessions)", entry.sessions);
                return Ok(ds);
            }
        }
        let ds = self.loader.load(path)?;
        log::info!("loaded dataset `{path}` ({} rows)", ds.len());
        self.cache.insert(
            path.to_string(),
            CacheEntry {
                dataset: Arc::downgrade(&ds),
                sessions: 1,
            },
        );
        Ok(ds)
    }

    fn release_dataset(&mut self, path: &str, dataset: Arc<dyn Dataset>) {
        let Some(entry) = self.cache.get_mut(path) else {
            return;
        };
        entry.sessions = entry.sessions.saturating_sub(1);
        drop(dataset);
        if entry.sessions == 0 {
            if entry.dataset.strong_count() == 0 {
                log::info!("unloaded dataset `{path}`");
                self.cache.remove(path);
            } else {
                log::debug!("dataset `{path}` has no sessions but is still held elsewhere");
            }
        }
    }

    /// Open a session for `rank` on `path`.
    pub fn load(&mut self, rank: Rank, path: &str) -> Result<ConfirmLoad, TaskError> {
        if let Some(Session::Active(s)) = self.sessions.get(&rank) {
            log::error!("rank {rank} asked for `{path}` while `{}` is still open", s.path);
            return Err(TaskError::SessionNotActive {
                rank,
                state: "already active",
                request: "RequestLoad",
            });
        }
        let dataset = self.acquire_dataset(path)?;
        let reply = ConfirmLoad {
            len: dataset.len(),
            properties: dataset.properties(),
        };
        self.sessions.insert(
            rank,
            Session::Active(ActiveSession {
                path: path.to_string(),
                dataset,
                views: LruCache::new(self.view_limit),
            }),
        );
        Ok(reply)
    }

    /// Validate `selector` and remember its rows for later array requests.
    pub fn view(&mut self, rank: Rank, selector: &Selector) -> Result<ViewInfo, TaskError> {
        let session = self.active(rank, "RequestView")?;
        let view = Self::view_state(session, selector)?;
        Ok(ViewInfo {
            len: view.index.len(),
        })
    }

    /// The session's state for `selector`, resolved if needed and marked
    /// most recently used.
    fn view_state<'s>(session: &'s mut ActiveSession, selector: &Selector) -> Result<&'s mut ViewState, TaskError> {
        let key = selector.key()?;
        if !session.views.contains(&key) {
            let index = resolve(session.dataset.as_ref(), selector)?;
            let fresh = ViewState {
                index,
                derived: HashMap::new(),
            };
            if let Some((_, old)) = session.views.push(key.clone(), fresh) {
                log::trace!(
                    "dropped view over {} rows of `{}` ({} derived fields)",
                    old.index.len(),
                    session.path,
                    old.derived.len()
                );
            }
        }
        session
            .views
            .get_mut(&key)
            .ok_or_else(|| TaskError::InvalidSelector("view vanished".into()))
    }

    /// Field `field` over `selector`'s rows, derived at most once per view.
    pub fn array(&mut self, rank: Rank, selector: &Selector, field: &str) -> Result<Array, TaskError> {
        let derivations = Arc::clone(&self.derivations);
        let session = self.active(rank, "RequestArray")?;
        let dataset = Arc::clone(&session.dataset);
        let view = Self::view_state(session, selector)?;
        let mut eval = Evaluator::new(dataset.as_ref(), &derivations, &view.index, &mut view.derived);
        eval.field(field)
    }

    /// Close `rank`'s session.
    pub fn release(&mut self, rank: Rank) -> Result<(), TaskError> {
        self.active(rank, "Release")?;
        if let Some(Session::Active(s)) = self.sessions.insert(rank, Session::Closed) {
            self.release_dataset(&s.path, s.dataset);
        }
        Ok(())
    }

    // ----- message-level entry points ---------------------------------------

    /// Answer `RequestLoad`: `ConfirmLoad` or `ServerError`.
    pub fn handle_load(&mut self, rank: Rank, path: &str, out: &mut Outbox) -> Result<(), TaskError> {
        match self.load(rank, path) {
            Ok(reply) => out.post(rank, &reply),
            Err(e) => Self::reply_error(rank, &e, out),
        }
    }

    /// Answer `RequestView`: `ViewInfo` or `ServerError`.
    pub fn handle_view(&mut self, rank: Rank, selector: &Selector, out: &mut Outbox) -> Result<(), TaskError> {
        match self.view(rank, selector) {
            Ok(reply) => out.post(rank, &reply),
            Err(e) => Self::reply_error(rank, &e, out),
        }
    }

    /// Answer `RequestArray`: `ReturnArray` or `ServerError`. A missing field
    /// leaves the session active.
    pub fn handle_array(
        &mut self,
        rank: Rank,
        selector: &Selector,
        field: &str,
        out: &mut Outbox,
    ) -> Result<(), TaskError> {
        match self.array(rank, selector, field) {
            Ok(array) => out.post(
                rank,
                &ReturnArray {
                    array: WireArray::encode(&array),
                },
            ),
            Err(e) => Self::reply_error(rank, &e, out),
        }
    }

    /// Handle `Release`. There is no reply on success; releasing a session
    /// that is not active is answered with `ServerError`.
    pub fn handle_release(&mut self, rank: Rank, out: &mut Outbox) -> Result<(), TaskError> {
        match self.release(rank) {
            Ok(()) => Ok(()),
            Err(e) => Self::reply_error(rank, &e, out),
        }
    }

    fn reply_error(rank: Rank, e: &TaskError, out: &mut Outbox) -> Result<(), TaskError> {
        if e.is_protocol() {
            log::error!("protocol error from rank {rank}: {e}");
        } else {
            log::warn!("request from rank {rank} failed: {e}");
        }
        out.post(rank, &ServerError::from_error(e))
    }

    // ----- introspection ----------------------------------------------------

    /// Paths of datasets that are still alive, sorted.
    pub fn resident(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .cache
            .iter()
            .filter(|(_, e)| e.dataset.strong_count() > 0)
            .map(|(p, _)| p.clone())
            .collect();
        paths.sort();
        paths
    }

    /// Number of active sessions using `path`.
    pub fn session_count(&self, path: &str) -> usize {
        self.cache.get(path).map_or(0, |e| e.sessions)
    }

    /// Views `rank`'s session currently keeps resolved.
    pub fn view_count(&self, rank: Rank) -> usize {
        match self.sessions.get(&rank) {
            Some(Session::Active(s)) => s.views.len(),
            _ => 0,
        }
    }

    pub fn is_active(&self, rank: Rank) -> bool {
        matches!(self.sessions.get(&rank), Some(Session::Active(_)))
    }

    /// Ranks whose sessions are still open.
    pub fn open_sessions(&self) -> Vec<Rank> {
        let mut ranks: Vec<Rank> = self
            .sessions
            .iter()
            .filter(|(_, s)| matches!(s, Session::Active(_)))
            .map(|(r, _)| *r)
            .collect();
        ranks.sort_unstable();
        ranks
    }
}

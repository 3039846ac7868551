//! Client side of the remote dataset protocol.
//!
//! A [`RemoteDataset`] is one session with the dataset server, which runs on
//! the coordinator rank. Views over it
//! fetch arrays lazily and keep them; once the client modifies an array in a
//! view, fields derived from it are recomputed locally instead of being
//! fetched, so the view always reflects the client's changes.

use super::{Array, Derivations, Properties, Selector};
use crate::comm::{COORDINATOR, Rank};
use crate::message::Message;
use crate::message::catalog::{
    ConfirmLoad, Release, RequestArray, RequestLoad, RequestView, ReturnArray, ServerError, ViewInfo,
};
use crate::task_error::TaskError;
use crate::worker::Worker;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// An open session on a dataset held by the coordinator.
///
/// Dropping it releases the session; call [`RemoteDataset::release`] to see
/// a send failure instead of having it logged.
pub struct RemoteDataset<'w> {
    worker: &'w Worker,
    path: String,
    len: usize,
    properties: Properties,
    open: bool,
}

impl<'w> RemoteDataset<'w> {
    /// Ask the coordinator to load `path` and wait for confirmation.
    pub fn connect(worker: &'w Worker, path: &str) -> Result<Self, TaskError> {
        worker.send(
            &RequestLoad {
                path: path.to_string(),
            },
            COORDINATOR,
        )?;
        let confirm: ConfirmLoad = reply(worker, COORDINATOR)?;
        log::debug!(
            "[rank {}] opened `{path}` ({} rows)",
            worker.rank(),
            confirm.len
        );
        Ok(Self {
            worker,
            path: path.to_string(),
            len: confirm.len,
            properties: confirm.properties,
            open: true,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// A view over the rows chosen by `selector`. The server resolves the
    /// selector up front, so a bad selector fails here.
    pub fn view(&self, selector: impl Into<Selector>) -> Result<RemoteView<'_, 'w>, TaskError> {
        let selector = selector.into();
        self.worker.send(
            &RequestView {
                selector: selector.clone(),
            },
            COORDINATOR,
        )?;
        let info: ViewInfo = reply(self.worker, COORDINATOR)?;
        Ok(RemoteView {
            session: self,
            selector,
            len: info.len,
            arrays: HashMap::new(),
            modified: HashSet::new(),
        })
    }

    /// Fetch `field` over `selector`'s rows straight from the server.
    pub fn fetch(&self, selector: &Selector, field: &str) -> Result<Array, TaskError> {
        self.worker.send(
            &RequestArray {
                selector: selector.clone(),
                field: field.to_string(),
            },
            COORDINATOR,
        )?;
        let ret: ReturnArray = reply(self.worker, COORDINATOR)?;
        ret.array.decode()
    }

    /// Close the session.
    pub fn release(mut self) -> Result<(), TaskError> {
        self.open = false;
        self.worker.send(&Release, COORDINATOR)
    }
}

impl Drop for RemoteDataset<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.worker.send(&Release, COORDINATOR) {
                log::error!("[rank {}] failed to release `{}`: {e}", self.worker.rank(), self.path);
            }
        }
    }
}

/// Wait for the reply to a request sent to `server`: either `M` or a
/// `ServerError`, which is turned back into the matching local error.
fn reply<M: Message>(worker: &Worker, server: Rank) -> Result<M, TaskError> {
    let incoming = worker.receive_any(Some(server))?;
    let incoming = match incoming.downcast::<ServerError>() {
        Ok(err) => {
            let err = TaskError::from_remote(err.body.kind, err.body.message, server);
            log::debug!("[rank {}] server rank {server} replied with error: {err}", worker.rank());
            return Err(err);
        }
        Err(other) => other,
    };
    incoming
        .downcast::<M>()
        .map(|r| r.body)
        .map_err(|other| TaskError::UnexpectedReply(format!("expected `{}`, got `{}`", M::NAME, other.name)))
}

/// Rows of a [`RemoteDataset`] chosen by one selector.
pub struct RemoteView<'d, 'w> {
    session: &'d RemoteDataset<'w>,
    selector: Selector,
    len: usize,
    arrays: HashMap<String, Array>,
    modified: HashSet<String>,
}

impl<'d, 'w> RemoteView<'d, 'w> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn properties(&self) -> &Properties {
        self.session.properties()
    }

    /// A new view over this view's rows of particle family `family`. It
    /// starts from the server's arrays; local edits made here are not carried
    /// over.
    pub fn family(&self, family: &str) -> Result<RemoteView<'d, 'w>, TaskError> {
        let session: &'d RemoteDataset<'w> = self.session;
        session.view(self.selector.clone().family(family))
    }

    /// Whether `field` is already held locally.
    pub fn contains(&self, field: &str) -> bool {
        self.arrays.contains_key(field)
    }

    pub fn is_modified(&self, field: &str) -> bool {
        self.modified.contains(field)
    }

    fn derivations(&self) -> Arc<Derivations> {
        Arc::clone(self.session.worker.derivations())
    }

    /// Field `field` over this view.
    ///
    /// Arrays come from the server the first time they are asked for, except
    /// derived fields with a locally modified input, which are computed here.
    /// A field that exists nowhere is [`TaskError::FieldNotFound`] and the
    /// view stays usable.
    pub fn get(&mut self, field: &str) -> Result<&Array, TaskError> {
        if !self.arrays.contains_key(field) {
            let value = if self.derives_locally(field) {
                self.derive_locally(field)?
            } else {
                self.session.fetch(&self.selector, field)?
            };
            self.arrays.insert(field.to_string(), value);
        }
        self.arrays
            .get(field)
            .ok_or_else(|| TaskError::FieldNotFound(field.to_string()))
    }

    /// Mutable access to `field`. Cached fields derived from it are dropped
    /// and will be recomputed locally on the next [`RemoteView::get`].
    pub fn get_mut(&mut self, field: &str) -> Result<&mut Array, TaskError> {
        self.get(field)?;
        let derivations = self.derivations();
        self.arrays.retain(|name, _| !derivations.depends_on(name, field));
        self.modified.insert(field.to_string());
        self.arrays
            .get_mut(field)
            .ok_or_else(|| TaskError::FieldNotFound(field.to_string()))
    }

    fn derives_locally(&self, field: &str) -> bool {
        let modified = &self.modified;
        self.derivations()
            .depends_on_any(field, &mut |input| modified.contains(input))
    }

    fn derive_locally(&mut self, field: &str) -> Result<Array, TaskError> {
        let derivations = self.derivations();
        let derivation = derivations
            .get(field)
            .ok_or_else(|| TaskError::FieldNotFound(field.to_string()))?;
        let mut inputs = Vec::with_capacity(derivation.inputs.len());
        for input in &derivation.inputs {
            inputs.push(self.get(input)?.clone());
        }
        let refs: Vec<&Array> = inputs.iter().collect();
        log::debug!("re-deriving `{field}` locally over {} rows", self.len);
        (derivation.compute)(&refs)
    }
}

//! The protocol's message types.
//!
//! Every rank calls [`register_all`] at startup so all ranks agree on the
//! tag table.

use super::MessageRegistry;
use crate::dataset::{Properties, Selector};
use crate::impl_message;
use crate::task_error::{RemoteErrorKind, TaskError};
use crate::wire::WireArray;
use serde::{Deserialize, Serialize};

// ----- remote dataset ------------------------------------------------------

/// Client → server: open a session on the dataset at `path`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestLoad {
    pub path: String,
}

/// Server → client: the dataset is loaded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfirmLoad {
    pub len: usize,
    pub properties: Properties,
}

/// Client → server: check a selector before the client builds a view on it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestView {
    pub selector: Selector,
}

/// Server → client: acknowledgement of `RequestView`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewInfo {
    pub len: usize,
}

/// Client → server: field `field` over the rows chosen by `selector`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestArray {
    pub selector: Selector,
    pub field: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReturnArray {
    pub array: WireArray,
}

/// Client → server: close the session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Release;

/// Server → client: the request failed; sent in place of the normal reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl ServerError {
    pub fn from_error(e: &TaskError) -> Self {
        let (kind, message) = e.to_remote();
        Self { kind, message }
    }
}

// ----- locks ---------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LockAcquire {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LockGranted {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LockRelease {
    pub name: String,
}

// ----- jobs ----------------------------------------------------------------

/// Worker → coordinator: next job of the worker's `iteration`-th job loop,
/// over a list of `n_jobs` jobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub iteration: u64,
    pub n_jobs: usize,
}

/// Coordinator → worker: a job index, or `None` once the list is exhausted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobGrant {
    pub iteration: u64,
    pub job: Option<usize>,
}

// ----- group ---------------------------------------------------------------

/// Worker → coordinator: this worker is done.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Finished;

impl_message!(
    RequestLoad,
    ConfirmLoad,
    RequestView,
    ViewInfo,
    RequestArray,
    ReturnArray,
    Release,
    ServerError,
    LockAcquire,
    LockGranted,
    LockRelease,
    JobRequest,
    JobGrant,
    Finished,
);

/// Register the full catalog, in a fixed order.
pub fn register_all(reg: &mut MessageRegistry) -> Result<(), TaskError> {
    reg.register::<RequestLoad>()?;
    reg.register::<ConfirmLoad>()?;
    reg.register::<RequestView>()?;
    reg.register::<ViewInfo>()?;
    reg.register::<RequestArray>()?;
    reg.register::<ReturnArray>()?;
    reg.register::<Release>()?;
    reg.register::<ServerError>()?;
    reg.register::<LockAcquire>()?;
    reg.register::<LockGranted>()?;
    reg.register::<LockRelease>()?;
    reg.register::<JobRequest>()?;
    reg.register::<JobGrant>()?;
    reg.register::<Finished>()?;
    Ok(())
}

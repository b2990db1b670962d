use crate::error::CallError;
use crate::pipeline::types::{RemoteCall, RemoteResponse};
use futures::future::BoxFuture;

/// The injected remote-call seam.
///
/// The pipeline is agnostic to wire formats; a real implementation shapes
/// `RemoteCall` into whatever its backend speaks and classifies failures
/// into [`CallError`]. Implementations may be slow and may fail; they
/// should honor `call.signal` where the underlying transport supports
/// cancellation.
pub trait RemoteExecutor: Send + Sync {
    fn execute(&self, call: RemoteCall) -> BoxFuture<'static, Result<RemoteResponse, CallError>>;
}

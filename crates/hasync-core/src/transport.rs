// ── Request seam ──
//
// The stores only need "send a request, await its result". Production
// code passes a live `SessionHandle`; tests pass a scripted fake.

use std::future::Future;

use hasync_api::{Request, SessionHandle};
use serde_json::Value;

/// Something that can answer one-shot requests.
pub trait Transport: Send + Sync {
    /// Send `request` and wait for its result.
    ///
    /// Must fail with [`hasync_api::Error::NotConnected`] at call time when
    /// no authenticated session exists; requests are never queued.
    fn request(
        &self,
        request: Request,
    ) -> impl Future<Output = Result<Value, hasync_api::Error>> + Send;
}

impl Transport for SessionHandle {
    fn request(
        &self,
        request: Request,
    ) -> impl Future<Output = Result<Value, hasync_api::Error>> + Send {
        let sent = self.send(request);
        async move { sent?.wait().await }
    }
}

//! Pending-request table (spec §4.3 step 4, §5, component D): tracks
//! in-flight calls by `RequestID` until their single completion arrives.
//!
//! Grounded on the teacher's `stream_manager.rs`, which pairs an
//! `OpenBidiStream` command with a `oneshot::channel` awaited under a
//! timeout; this generalizes that one-shot-per-command idiom into a keyed
//! table shared by every in-flight call.

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::error::{HubError, HubResult};
use crate::ids::RequestId;
use crate::response::Response;

type Slot = oneshot::Sender<Response>;

/// `RequestID -> waiting completion slot`. Registration fails with
/// [`HubError::DuplicateRequestId`] rather than silently overwriting an
/// existing waiter (spec §5: request IDs MUST be unique among in-flight
/// calls).
#[derive(Default)]
pub struct PendingTable {
    slots: DashMap<RequestId, Slot, ahash::RandomState>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            slots: DashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    /// Reserves a slot for `request_id` and returns the receiving half the
    /// caller awaits. Call exactly once per `invoke()`.
    pub fn register(
        &self,
        request_id: RequestId,
    ) -> HubResult<oneshot::Receiver<Response>> {
        let (tx, rx) = oneshot::channel();
        match self.slots.entry(request_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(HubError::DuplicateRequestId(request_id.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(tx);
                Ok(rx)
            }
        }
    }

    /// Same as [`Self::register`], but additionally returns a guard that
    /// removes the slot on drop. Because async-fn locals run their `Drop`
    /// impl even when the enclosing future is cancelled mid-await, holding
    /// this guard across the completion await is what makes "the pending
    /// slot is removed on every exit path, including caller cancellation"
    /// (spec §5) true without relying on code after the await running.
    pub fn register_guarded(
        &self,
        request_id: RequestId,
    ) -> HubResult<(oneshot::Receiver<Response>, PendingGuard<'_>)> {
        let rx = self.register(request_id)?;
        Ok((rx, PendingGuard {
            table: self,
            request_id,
        }))
    }

    /// Delivers a completion for `request_id`. Spec §5: at most one
    /// `Complete` call takes effect; later calls (no slot left, or the
    /// waiter already dropped) are no-ops returning `false`.
    pub fn complete(&self, request_id: RequestId, response: Response) -> bool {
        match self.slots.remove(&request_id) {
            Some((_, tx)) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Releases a slot without ever completing it (timeout, cancellation,
    /// or any other exit path that didn't consume the waiter). Always safe
    /// to call even if the slot is already gone.
    pub fn remove(&self, request_id: RequestId) {
        self.slots.remove(&request_id);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Guarantees a pending slot is released exactly once, however the holding
/// future ends.
pub struct PendingGuard<'a> {
    table: &'a PendingTable,
    request_id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(self.request_id);
    }
}

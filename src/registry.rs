use std::collections::HashMap;

use crate::timer::{RequestTimer, Transport};
use crate::types::{RequestDescriptor, RequestId};

/// Identifies one transport attempt. A request gets a new attempt per retry.
pub type AttemptId = u64;

#[derive(Debug)]
struct PendingReply {
    endpoint: String,
    request_id: RequestId,
    transport: Transport,
}

/// Sole owner of the fetcher's bookkeeping.
///
/// Holds the endpoint → request index (at most one active request per
/// endpoint), the request descriptors, the attempt → request index used to
/// correlate transport completions, and the per-request timers. All
/// mutation goes through these methods.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    active: HashMap<String, RequestId>,
    descriptors: HashMap<RequestId, RequestDescriptor>,
    pending: HashMap<AttemptId, PendingReply>,
    timers: HashMap<RequestId, RequestTimer>,
    next_attempt: AttemptId,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Endpoint index ──────────────────────────────────────────────

    /// Register `id` as the active request for `endpoint`.
    ///
    /// Fails with the already-registered id when the endpoint is taken.
    pub fn register(&mut self, endpoint: &str, id: RequestId) -> Result<(), RequestId> {
        if let Some(existing) = self.active.get(endpoint) {
            return Err(*existing);
        }
        self.active.insert(endpoint.to_string(), id);
        Ok(())
    }

    /// Register `id` for `endpoint` unconditionally. Returns the superseded id.
    pub fn replace(&mut self, endpoint: &str, id: RequestId) -> Option<RequestId> {
        self.active.insert(endpoint.to_string(), id)
    }

    /// Remove the endpoint mapping, but only if it still points at `id`.
    pub fn release(&mut self, endpoint: &str, id: RequestId) -> bool {
        if self.active.get(endpoint) == Some(&id) {
            self.active.remove(endpoint);
            true
        } else {
            false
        }
    }

    pub fn active_for(&self, endpoint: &str) -> Option<RequestId> {
        self.active.get(endpoint).copied()
    }

    pub fn is_active(&self, endpoint: &str, id: RequestId) -> bool {
        self.active.get(endpoint) == Some(&id)
    }

    // ── Descriptors ─────────────────────────────────────────────────

    pub fn insert_descriptor(&mut self, descriptor: RequestDescriptor) {
        self.descriptors.insert(descriptor.id, descriptor);
    }

    pub fn descriptor(&self, id: RequestId) -> Option<&RequestDescriptor> {
        self.descriptors.get(&id)
    }

    pub fn descriptor_mut(&mut self, id: RequestId) -> Option<&mut RequestDescriptor> {
        self.descriptors.get_mut(&id)
    }

    /// Ids of every request that has not reached a terminal state.
    pub fn request_ids(&self) -> Vec<RequestId> {
        self.descriptors.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    // ── Pending replies ─────────────────────────────────────────────

    pub(crate) fn next_attempt_id(&mut self) -> AttemptId {
        self.next_attempt += 1;
        self.next_attempt
    }

    pub(crate) fn track_reply(
        &mut self,
        attempt: AttemptId,
        endpoint: &str,
        id: RequestId,
        transport: Transport,
    ) {
        self.pending.insert(
            attempt,
            PendingReply {
                endpoint: endpoint.to_string(),
                request_id: id,
                transport,
            },
        );
    }

    /// Consume the pending entry of a completed attempt.
    ///
    /// Returns `None` if the attempt was already timed out or cancelled.
    pub(crate) fn take_reply(&mut self, attempt: AttemptId) -> Option<(String, RequestId)> {
        self.pending.remove(&attempt).map(|reply| {
            reply.transport.disarm();
            (reply.endpoint, reply.request_id)
        })
    }

    pub(crate) fn has_reply(&self, attempt: AttemptId) -> bool {
        self.pending.contains_key(&attempt)
    }

    /// Remove and abort every in-flight attempt of `id`. Returns the endpoint.
    pub(crate) fn abort_replies(&mut self, id: RequestId) -> Option<String> {
        let attempts: Vec<AttemptId> = self
            .pending
            .iter()
            .filter(|(_, reply)| reply.request_id == id)
            .map(|(attempt, _)| *attempt)
            .collect();
        let mut endpoint = None;
        for attempt in attempts {
            if let Some(reply) = self.pending.remove(&attempt) {
                endpoint = Some(reply.endpoint);
                // Dropping `reply.transport` aborts the call.
            }
        }
        endpoint
    }

    pub fn pending_replies(&self) -> usize {
        self.pending.len()
    }

    // ── Timers ──────────────────────────────────────────────────────

    /// Install the timer for `id`, stopping any previous one.
    pub fn arm_timer(&mut self, id: RequestId, timer: RequestTimer) {
        if let Some(previous) = self.timers.insert(id, timer) {
            previous.stop();
        }
    }

    pub fn stop_timer(&mut self, id: RequestId) -> bool {
        match self.timers.remove(&id) {
            Some(timer) => {
                timer.stop();
                true
            }
            None => false,
        }
    }

    pub fn has_timer(&self, id: RequestId) -> bool {
        self.timers.contains_key(&id)
    }

    // ── Teardown ────────────────────────────────────────────────────

    /// Drop every record of `id` except the endpoint mapping.
    pub fn forget(&mut self, id: RequestId) -> Option<RequestDescriptor> {
        self.stop_timer(id);
        self.abort_replies(id);
        self.descriptors.remove(&id)
    }

    /// Terminal cleanup: drop every record of `id`, including its endpoint
    /// mapping if it still owns it.
    pub fn finish(&mut self, id: RequestId) -> Option<RequestDescriptor> {
        let descriptor = self.forget(id)?;
        self.release(&descriptor.endpoint, id);
        Some(descriptor)
    }
}

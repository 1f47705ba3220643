// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Request correlation
//!
//! The `request` module provides the request/response correlator: ids,
//! the pending-request table and the timeout timers. Issuing a request
//! registers it in the requester supervisor's table *synchronously*, because
//! a foreign responder may answer before the requester's pump runs again and
//! the response must find the pending entry when it arrives. Completion is a
//! single `take` from the table, so exactly one of {response, timeout,
//! discard} wins; the two losers find nothing and do nothing.
//!
//! Timers are owned by the pump. Arming travels over the control channel and
//! is skipped when the pending entry is already gone; cancellation is lazy on
//! the table plus eager on the timer wheel.

use crate::{
    address::Address,
    message::{self, Message, MessagePtr, Request, Requestable},
    supervisor::PumpLink,
};

use tokio_util::time::delay_queue::{DelayQueue, Key};

use futures::StreamExt;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Monotonically increasing request identity.
pub type RequestId = u64;

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_request_id() -> RequestId {
    REQUEST_SEQ.fetch_add(1, Ordering::Relaxed)
}

/// A registered, not yet completed request.
pub(crate) struct Pending {
    /// Builds the synthetic timeout response.
    pub synth: Box<dyn FnOnce() -> MessagePtr + Send>,
}

/// Shared table of outstanding requests, keyed by request id.
#[derive(Clone, Default)]
pub(crate) struct RequestTable {
    inner: Arc<Mutex<HashMap<RequestId, Pending>>>,
}

impl RequestTable {
    pub(crate) fn insert(&self, id: RequestId, pending: Pending) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, pending);
    }

    /// Completes the request: removes and returns the pending entry. At most
    /// one caller wins.
    pub(crate) fn take(&self, id: RequestId) -> Option<Pending> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    pub(crate) fn contains(&self, id: RequestId) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }
}

/// Control operations a supervisor's pump accepts from outside the queue.
pub(crate) enum Control {
    /// Arm the timeout timer for a just-issued request.
    Arm { id: RequestId, timeout: Duration },
    /// Drop the timer of a discarded request.
    Cancel { id: RequestId },
}

/// The pump's timer wheel: one one-shot timer per outstanding request.
pub(crate) struct Timers {
    queue: DelayQueue<RequestId>,
    keys: HashMap<RequestId, Key>,
}

impl Timers {
    pub(crate) fn new() -> Self {
        Self {
            queue: DelayQueue::new(),
            keys: HashMap::new(),
        }
    }

    pub(crate) fn arm(&mut self, id: RequestId, timeout: Duration) {
        let key = self.queue.insert(id, timeout);
        self.keys.insert(id, key);
    }

    pub(crate) fn cancel(&mut self, id: RequestId) {
        if let Some(key) = self.keys.remove(&id) {
            self.queue.try_remove(&key);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Waits for the next timer to fire. Only polled while non-empty.
    pub(crate) async fn next(&mut self) -> Option<RequestId> {
        let expired = self.queue.next().await?;
        let id = expired.into_inner();
        self.keys.remove(&id);
        Some(id)
    }
}

/// Issues a request: registers the pending entry, arms the timer and
/// dispatches the request envelope to the target address.
pub(crate) fn issue<T: Requestable>(
    link: &PumpLink,
    reply_to: Address,
    target: &Address,
    payload: T,
    timeout: Duration,
) -> RequestId {
    let id = next_request_id();
    let request = Arc::new(Request::<T> {
        id,
        reply_to,
        payload,
    });
    let source = request.clone();
    link.requests.insert(
        id,
        Pending {
            synth: Box::new(move || message::timeout_response::<T>(source)),
        },
    );
    let _ = link.control.send(Control::Arm { id, timeout });
    target.enqueue(Message::from_arc(target.clone(), request, None));
    id
}

/// Forgets an outstanding request: cancels the timer and suppresses both the
/// response and the timeout.
pub(crate) fn discard(link: &PumpLink, id: RequestId) {
    link.requests.take(id);
    let _ = link.control.send(Control::Cancel { id });
}

/// An unsent request. Dispatch it with [`RequestBuilder::send`].
pub struct RequestBuilder<T: Requestable> {
    link: PumpLink,
    reply_to: Address,
    target: Address,
    payload: T,
}

impl<T: Requestable> RequestBuilder<T> {
    pub(crate) fn new(
        link: PumpLink,
        reply_to: Address,
        target: Address,
        payload: T,
    ) -> Self {
        Self {
            link,
            reply_to,
            target,
            payload,
        }
    }

    /// Dispatches the request.
    ///
    /// # Arguments
    ///
    /// * `timeout` - How long to wait before the synthetic timeout response
    ///   is delivered.
    ///
    /// # Returns
    ///
    /// Returns the id of the issued request.
    ///
    pub fn send(self, timeout: Duration) -> RequestId {
        issue(
            &self.link,
            self.reply_to,
            &self.target,
            self.payload,
            timeout,
        )
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_ids_are_monotonic() {
        let a = next_request_id();
        let b = next_request_id();
        assert!(b > a);
    }

    #[test]
    fn test_table_take_is_exclusive() {
        let table = RequestTable::default();
        table.insert(
            1,
            Pending {
                synth: Box::new(|| unreachable!()),
            },
        );
        assert!(table.contains(1));
        assert!(table.take(1).is_some());
        assert!(table.take(1).is_none());
        assert!(!table.contains(1));
    }

    #[tokio::test]
    async fn test_timer_fires_and_cancels() {
        tokio::time::pause();
        let mut timers = Timers::new();
        timers.arm(1, Duration::from_millis(50));
        timers.arm(2, Duration::from_millis(50));
        timers.cancel(2);
        assert!(!timers.is_empty());
        let fired = timers.next().await;
        assert_eq!(fired, Some(1));
        assert!(timers.is_empty());
    }
}

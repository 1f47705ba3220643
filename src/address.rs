// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Addresses
//!
//! The `address` module provides the `Address` type, the routing key of the
//! runtime. An address is an opaque identity owned by the supervisor that
//! produced it: every message sent to an address is enqueued on the owning
//! supervisor's queue, and only that supervisor dispatches it. Many handlers
//! may subscribe to one address, and one address may carry several payload
//! types.
//!

use crate::message::MessagePtr;

use tokio::sync::mpsc;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

static ADDRESS_SEQ: AtomicU64 = AtomicU64::new(1);

/// Sender half of a supervisor's inbound queue.
pub(crate) type MessageSender = mpsc::UnboundedSender<MessagePtr>;

/// The delivery route to a supervisor: its identity plus the sender half of
/// its inbound queue. Enqueueing on a route whose supervisor is gone fails
/// silently; dangling addresses drop messages instead of erroring.
#[derive(Clone)]
pub(crate) struct MessageRoute {
    pub supervisor_id: u64,
    pub sender: MessageSender,
}

impl MessageRoute {
    pub(crate) fn send(&self, message: MessagePtr) {
        let _ = self.sender.send(message);
    }
}

/// Routing key owned by the supervisor that produced it.
///
/// Two addresses are equal iff they carry the same identity; cloning an
/// address clones the identity, not the destination. Addresses are created on
/// demand: implicitly as an actor's primary address, or explicitly through
/// [`SupervisorRef::create_address`](crate::SupervisorRef::create_address) for
/// plain publish/subscribe rendezvous points without a backing actor.
#[derive(Clone)]
pub struct Address {
    id: u64,
    route: MessageRoute,
}

impl Address {
    /// Allocates a fresh address routed to the given supervisor.
    pub(crate) fn new(route: MessageRoute) -> Self {
        Self {
            id: ADDRESS_SEQ.fetch_add(1, Ordering::Relaxed),
            route,
        }
    }

    /// Returns the unique identity of this address.
    ///
    /// # Returns
    ///
    /// Returns the address id.
    ///
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the identity of the owning supervisor.
    ///
    /// # Returns
    ///
    /// Returns the supervisor id the address routes to.
    ///
    pub fn supervisor_id(&self) -> u64 {
        self.route.supervisor_id
    }

    pub(crate) fn route(&self) -> &MessageRoute {
        &self.route
    }

    /// Enqueues a message on the owning supervisor's queue.
    pub(crate) fn enqueue(&self, message: MessagePtr) {
        self.route.send(message);
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(#{}@{})", self.id, self.route.supervisor_id)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.id)
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn route() -> MessageRoute {
        let (sender, _receiver) = mpsc::unbounded_channel();
        MessageRoute {
            supervisor_id: 7,
            sender,
        }
    }

    #[test]
    fn test_address_identity() {
        let route = route();
        let a = Address::new(route.clone());
        let b = Address::new(route);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(a.supervisor_id(), 7);
    }

    #[test]
    fn test_dangling_address_fails_silently() {
        let (sender, receiver) = mpsc::unbounded_channel();
        let address = Address::new(MessageRoute {
            supervisor_id: 1,
            sender,
        });
        drop(receiver);
        let message = crate::message::Message::new(address.clone(), Probe);
        // No panic, no error: the datagram is dropped.
        address.enqueue(message);
    }

    struct Probe;

    impl crate::message::Payload for Probe {}
}

// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Handlers
//!
//! A handler binds an owning actor, a payload type and an invocation. Handlers
//! are reference counted and live in the subscription tables of the supervisors
//! whose addresses they watch; dispatch walks the table in insertion order and
//! invokes every handler whose payload tag matches the envelope. A tag
//! mismatch is not an error, since one address may be shared across payload
//! types; the message is silently ignored by that handler.
//!
//! A handler always runs on the supervisor owning its actor. When the handler
//! is subscribed at an address owned by another supervisor, the dispatching
//! side forwards a `handler_call` instead of invoking it in place.

use crate::{
    actor::{Actor, ActorContext, ContextSeed, StateCell},
    address::{Address, MessageRoute},
    message::{MessagePtr, Payload},
};

use async_trait::async_trait;

use tokio::sync::mpsc;

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Which component owns a subscription point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnerTag {
    /// Held by a lifecycle plugin.
    Plugin,
    /// Held in the owning supervisor's table for one of its own actors.
    Supervisor,
    /// Held in a foreign supervisor's table on behalf of a remote actor.
    Foreign,
}

/// A subscription point: (address, owning actor, payload tag, owner tag).
///
/// Equality ignores the owner tag, because the same logical point may be
/// seen with different tags on the two supervisors involved in a foreign
/// subscription.
#[derive(Clone)]
pub struct SubscriptionPoint {
    /// The subscribed address.
    pub address: Address,
    /// The address of the actor owning the handler.
    pub owner: Address,
    /// The payload type the handler expects.
    pub tag: TypeId,
    /// Which component holds the subscription.
    pub owner_tag: OwnerTag,
}

impl SubscriptionPoint {
    pub(crate) fn new<P: Payload>(address: Address, owner: Address) -> Self {
        Self {
            address,
            owner,
            tag: TypeId::of::<P>(),
            owner_tag: OwnerTag::Supervisor,
        }
    }
}

impl PartialEq for SubscriptionPoint {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
            && self.owner == other.owner
            && self.tag == other.tag
    }
}

impl Eq for SubscriptionPoint {}

impl fmt::Debug for SubscriptionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionPoint")
            .field("address", &self.address)
            .field("owner", &self.owner)
            .field("owner_tag", &self.owner_tag)
            .finish()
    }
}

/// Message handling for one payload type. Implement it once per payload the
/// actor subscribes to:
///
/// ```ignore
/// #[async_trait]
/// impl Handle<Tick> for Clock {
///     async fn handle(&mut self, tick: &Tick, ctx: &mut ActorContext<Self>) {
///         self.count += tick.0;
///     }
/// }
/// ```
#[async_trait]
pub trait Handle<P: Payload>: Actor {
    /// Handles a delivered payload.
    ///
    /// # Arguments
    ///
    /// * `message` - The payload to handle.
    /// * `ctx` - The actor context.
    ///
    async fn handle(&mut self, message: &P, ctx: &mut ActorContext<Self>);
}

/// The invocation half of a handler.
#[async_trait]
pub(crate) trait Invoke: Send + Sync {
    async fn invoke(&self, message: &MessagePtr);
}

/// The (actor, payload type, invocation) binding invoked on matching
/// messages. Cheap to clone; equality is by (owning actor, payload tag).
#[derive(Clone)]
pub struct Handler {
    pub(crate) owner: u64,
    pub(crate) owner_state: StateCell,
    pub(crate) home: MessageRoute,
    pub(crate) tag: TypeId,
    pub(crate) shim: Arc<dyn Invoke>,
}

impl Handler {
    /// Returns the identity of the owning actor.
    ///
    /// # Returns
    ///
    /// Returns the owner's address id.
    ///
    pub fn owner(&self) -> u64 {
        self.owner
    }

    /// Returns the payload tag this handler expects.
    ///
    /// # Returns
    ///
    /// Returns the payload type tag.
    ///
    pub fn tag(&self) -> TypeId {
        self.tag
    }

    /// Identity of the supervisor the handler runs on.
    pub(crate) fn home_supervisor(&self) -> u64 {
        self.home.supervisor_id
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && self.tag == other.tag
    }
}

impl Eq for Handler {}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler(owner #{})", self.owner)
    }
}

/// Typed shim dispatching to an actor's [`Handle`] implementation.
struct MethodShim<A, P> {
    seed: ContextSeed,
    phantom: PhantomData<fn() -> (A, P)>,
}

#[async_trait]
impl<A, P> Invoke for MethodShim<A, P>
where
    A: Actor + Handle<P>,
    P: Payload,
{
    async fn invoke(&self, message: &MessagePtr) {
        let Some(payload) = message.payload::<P>() else {
            return;
        };
        let mut guard = self.seed.cell.lock().await;
        let Some(actor) = guard.as_any().downcast_mut::<A>() else {
            return;
        };
        let mut ctx = ActorContext::<A>::new(self.seed.clone(), message.clone());
        actor.handle(payload, &mut ctx).await;
    }
}

/// Shim dispatching to a lambda owned by an actor.
struct LambdaShim<P, F> {
    f: F,
    phantom: PhantomData<fn() -> P>,
}

#[async_trait]
impl<P, F> Invoke for LambdaShim<P, F>
where
    P: Payload,
    F: Fn(&P) + Send + Sync,
{
    async fn invoke(&self, message: &MessagePtr) {
        if let Some(payload) = message.payload::<P>() {
            (self.f)(payload);
        }
    }
}

/// Builds a handler bound to an actor's [`Handle<P>`] implementation.
pub(crate) fn method_handler<A, P>(seed: &ContextSeed) -> Handler
where
    A: Actor + Handle<P>,
    P: Payload,
{
    Handler {
        owner: seed.address.id(),
        owner_state: seed.state.clone(),
        home: seed.address.route().clone(),
        tag: TypeId::of::<P>(),
        shim: Arc::new(MethodShim::<A, P> {
            seed: seed.clone(),
            phantom: PhantomData,
        }),
    }
}

/// Builds a handler around a lambda owned by the seeded actor.
pub(crate) fn lambda_handler<P, F>(seed: &ContextSeed, f: F) -> Handler
where
    P: Payload,
    F: Fn(&P) + Send + Sync + 'static,
{
    Handler {
        owner: seed.address.id(),
        owner_state: seed.state.clone(),
        home: seed.address.route().clone(),
        tag: TypeId::of::<P>(),
        shim: Arc::new(LambdaShim::<P, F> {
            f,
            phantom: PhantomData,
        }),
    }
}

/// Mailbox receiver.
pub(crate) type MailboxReceiver = mpsc::UnboundedReceiver<MessagePtr>;

/// Mailbox sender.
pub(crate) type MailboxSender = mpsc::UnboundedSender<MessagePtr>;

/// Mailbox factory.
pub(crate) fn mailbox() -> (MailboxSender, MailboxReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_mailbox() {
        let (sender, receiver) = mailbox();
        assert!(!sender.is_closed());
        assert!(!receiver.is_closed());
    }
}

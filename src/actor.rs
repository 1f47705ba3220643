// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actors
//!
//! The `actor` module provides the `Actor` trait and the `ActorContext` type.
//! The `Actor` trait carries the lifecycle hooks an actor may override; the
//! `ActorContext` is handed to every hook and handler invocation and is the
//! actor's only door to the runtime: sending, requesting, subscribing and
//! shutting down all go through it and are delivered as messages, never as
//! direct calls into another actor's state.
//!
//! An actor's life is a monotone progression:
//!
//! ```text
//! New -> Initializing -> Initialized -> Operational -> ShuttingDown -> ShutDown
//! ```
//!
//! driven entirely by messages dispatched on the owning supervisor's pump. No
//! state is ever revisited, and after `ShutDown` no handler of the actor runs
//! again.

use crate::{
    address::Address,
    error::ExtendedError,
    handler::{
        lambda_handler, method_handler, Handle, SubscriptionPoint,
    },
    message::{
        InitCheck, Message, MessagePtr, Payload, Requestable, ShutdownCheck,
        ShutdownTrigger, SubscriptionRequest, UnsubscriptionRequest,
    },
    plugin::Plugin,
    request::{self, RequestBuilder, RequestId},
    supervisor::{PumpLink, SupervisorRef},
};

use async_trait::async_trait;

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// The lifecycle states of an actor.
///
/// States are ordered: a supervisor's init barrier, for instance, holds while
/// any child is still at or below `Initializing`.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActorState {
    /// Constructed, not yet activated.
    New = 0,
    /// Activated; the init request may be held open by plugins.
    Initializing = 1,
    /// Init confirmed; waiting for start.
    Initialized = 2,
    /// Running; user handlers are live.
    Operational = 3,
    /// Winding down; the shutdown request may be held open by plugins.
    ShuttingDown = 4,
    /// Terminal. No further delivery.
    ShutDown = 5,
}

impl ActorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ActorState::New,
            1 => ActorState::Initializing,
            2 => ActorState::Initialized,
            3 => ActorState::Operational,
            4 => ActorState::ShuttingDown,
            _ => ActorState::ShutDown,
        }
    }
}

/// Shared, atomically published lifecycle state.
///
/// Every actor owns one cell; its supervisor (and, for a nested supervisor,
/// the parent) reads snapshots from it without touching the owning pump.
#[derive(Clone)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub(crate) fn new(state: ActorState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    pub(crate) fn get(&self) -> ActorState {
        ActorState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ActorState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Type-erased actor instance owned by its supervisor.
pub(crate) type ActorCell =
    Arc<tokio::sync::Mutex<Box<dyn AnyActor + Send>>>;

/// Everything needed to rebuild an [`ActorContext`] for one actor: its
/// address, its state cell, the owning pump's link and the actor cell itself
/// (the cell is what method handlers capture).
#[derive(Clone)]
pub(crate) struct ContextSeed {
    pub address: Address,
    pub state: StateCell,
    pub link: PumpLink,
    pub cell: ActorCell,
}

/// Declarative configuration an actor hands back from [`Actor::configure`].
///
/// Timeouts bound the init and shutdown requests the supervisor issues for
/// the actor. Tracked subscription points feed the prestart gate: init is not
/// confirmed until every tracked point has been confirmed, so an actor cannot
/// miss messages sent right after its start. Additional plugins join the
/// lifecycle chain in the order they were added.
pub struct ActorConfig {
    /// How long the supervisor waits for the actor's init confirmation.
    pub init_timeout: Duration,
    /// How long the supervisor waits for the actor's shutdown confirmation.
    pub shutdown_timeout: Duration,
    pub(crate) tracked: Vec<TrackedPoint>,
    pub(crate) plugins: Vec<Box<dyn Plugin>>,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
            tracked: Vec::new(),
            plugins: Vec::new(),
        }
    }
}

impl ActorConfig {
    /// Declares that init must wait until the actor's subscription for
    /// payload `P` at `address` has been confirmed.
    ///
    /// # Arguments
    ///
    /// * `address` - The address the tracked subscription points at.
    ///
    pub fn track<P: Payload>(&mut self, address: &Address) {
        self.tracked.push(TrackedPoint {
            address: address.clone(),
            tag: TypeId::of::<P>(),
        });
    }

    /// Appends a plugin to the actor's lifecycle chain.
    ///
    /// # Arguments
    ///
    /// * `plugin` - The plugin to activate with the actor.
    ///
    pub fn add_plugin(&mut self, plugin: impl Plugin + 'static) {
        self.plugins.push(Box::new(plugin));
    }
}

/// A subscription point awaited by the prestart gate.
#[derive(Clone)]
pub(crate) struct TrackedPoint {
    pub address: Address,
    pub tag: TypeId,
}

/// The `Actor` trait carries the lifecycle hooks of an actor. All hooks have
/// default implementations that simply let the state machine advance.
///
/// Message handling lives on the separate [`Handle`] trait, one implementation
/// per payload type the actor subscribes to.
#[async_trait]
pub trait Actor: Send + Sync + Sized + 'static {
    /// Called during activation, before the actor is registered with its
    /// supervisor. Override this method to declare tracked subscriptions,
    /// timeouts and extra plugins.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration the actor may adjust.
    ///
    fn configure(&mut self, _config: &mut ActorConfig) {}

    /// Called when the init request arrives.
    /// Override this method to perform initialization, typically the
    /// actor's subscriptions.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The context of the actor.
    ///
    /// # Returns
    ///
    /// Returns a void result.
    ///
    /// # Errors
    ///
    /// Returns an error if the actor could not be initialized. The
    /// supervisor shuts the actor down and applies its failure policy.
    ///
    async fn on_initialize(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), ExtendedError> {
        Ok(())
    }

    /// Called when the actor becomes operational. `on_start` is never
    /// observed before `on_initialize` has returned successfully.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The context of the actor.
    ///
    async fn on_start(&mut self, _ctx: &mut ActorContext<Self>) {}

    /// Called when the actor enters shutdown, before the confirmation is
    /// emitted. Cancel outstanding requests here.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The context of the actor.
    ///
    async fn on_shutdown(&mut self, _ctx: &mut ActorContext<Self>) {}

    /// Supervisor hook: a child finished (or failed) initialisation.
    ///
    /// # Arguments
    ///
    /// * `child` - The address of the child.
    /// * `error` - The init error, if the child failed.
    /// * `ctx` - The context of the supervisor's own actor.
    ///
    async fn on_child_init(
        &mut self,
        _child: &Address,
        _error: Option<&ExtendedError>,
        _ctx: &mut ActorContext<Self>,
    ) {
    }

    /// Supervisor hook: a child has shut down and been removed.
    ///
    /// # Arguments
    ///
    /// * `child` - The address of the child.
    /// * `error` - The shutdown error, if the child reported one.
    /// * `ctx` - The context of the supervisor's own actor.
    ///
    async fn on_child_shutdown(
        &mut self,
        _child: &Address,
        _error: Option<&ExtendedError>,
        _ctx: &mut ActorContext<Self>,
    ) {
    }
}

/// Object-safe view of an actor used by the pump and by handler shims.
#[async_trait]
pub(crate) trait AnyActor: Send {
    async fn do_initialize(
        &mut self,
        seed: &ContextSeed,
        message: &MessagePtr,
    ) -> Result<(), ExtendedError>;

    async fn do_start(&mut self, seed: &ContextSeed, message: &MessagePtr);

    async fn do_shutdown_hook(
        &mut self,
        seed: &ContextSeed,
        message: &MessagePtr,
    );

    async fn do_child_init(
        &mut self,
        child: &Address,
        error: Option<&ExtendedError>,
        seed: &ContextSeed,
        message: &MessagePtr,
    );

    async fn do_child_shutdown(
        &mut self,
        child: &Address,
        error: Option<&ExtendedError>,
        seed: &ContextSeed,
        message: &MessagePtr,
    );

    fn as_any(&mut self) -> &mut (dyn Any + Send);
}

#[async_trait]
impl<A: Actor> AnyActor for A {
    async fn do_initialize(
        &mut self,
        seed: &ContextSeed,
        message: &MessagePtr,
    ) -> Result<(), ExtendedError> {
        let mut ctx = ActorContext::<A>::new(seed.clone(), message.clone());
        self.on_initialize(&mut ctx).await
    }

    async fn do_start(&mut self, seed: &ContextSeed, message: &MessagePtr) {
        let mut ctx = ActorContext::<A>::new(seed.clone(), message.clone());
        self.on_start(&mut ctx).await;
    }

    async fn do_shutdown_hook(
        &mut self,
        seed: &ContextSeed,
        message: &MessagePtr,
    ) {
        let mut ctx = ActorContext::<A>::new(seed.clone(), message.clone());
        self.on_shutdown(&mut ctx).await;
    }

    async fn do_child_init(
        &mut self,
        child: &Address,
        error: Option<&ExtendedError>,
        seed: &ContextSeed,
        message: &MessagePtr,
    ) {
        let mut ctx = ActorContext::<A>::new(seed.clone(), message.clone());
        self.on_child_init(child, error, &mut ctx).await;
    }

    async fn do_child_shutdown(
        &mut self,
        child: &Address,
        error: Option<&ExtendedError>,
        seed: &ContextSeed,
        message: &MessagePtr,
    ) {
        let mut ctx = ActorContext::<A>::new(seed.clone(), message.clone());
        self.on_child_shutdown(child, error, &mut ctx).await;
    }

    fn as_any(&mut self) -> &mut (dyn Any + Send) {
        self
    }
}

/// The `ActorContext` is the context of the actor. It is rebuilt for every
/// hook and handler invocation around the message being processed, and every
/// operation on it turns into a message. Nothing here blocks or reaches into
/// another actor.
pub struct ActorContext<A: Actor> {
    seed: ContextSeed,
    message: MessagePtr,
    phantom: PhantomData<fn() -> A>,
}

impl<A: Actor> ActorContext<A> {
    pub(crate) fn new(seed: ContextSeed, message: MessagePtr) -> Self {
        Self {
            seed,
            message,
            phantom: PhantomData,
        }
    }

    /// Returns the actor's own address.
    ///
    /// # Returns
    ///
    /// Returns the primary address of the actor.
    ///
    pub fn address(&self) -> &Address {
        &self.seed.address
    }

    /// Returns the actor's current lifecycle state.
    ///
    /// # Returns
    ///
    /// Returns a snapshot of the lifecycle state.
    ///
    pub fn state(&self) -> ActorState {
        self.seed.state.get()
    }

    /// Returns a reference to the owning supervisor.
    ///
    /// # Returns
    ///
    /// Returns a supervisor reference.
    ///
    pub fn supervisor(&self) -> SupervisorRef {
        SupervisorRef::from_link(self.seed.link.clone())
    }

    /// Sends a payload to an address as a fire-and-forget datagram.
    ///
    /// # Arguments
    ///
    /// * `target` - The destination address.
    /// * `payload` - The payload to send.
    ///
    pub fn send<P: Payload>(&self, target: &Address, payload: P) {
        target.enqueue(Message::new(target.clone(), payload));
    }

    /// Begins a request to `target`; call `.send(timeout)` on the returned
    /// builder to dispatch it. The response, or a synthetic timeout, is
    /// delivered to this actor's address exactly once, so the actor should
    /// subscribe for `Response<T>`.
    ///
    /// # Arguments
    ///
    /// * `target` - The destination address.
    /// * `payload` - The request payload.
    ///
    /// # Returns
    ///
    /// Returns the unsent request builder.
    ///
    pub fn request<T: Requestable>(
        &self,
        target: &Address,
        payload: T,
    ) -> RequestBuilder<T> {
        RequestBuilder::new(
            self.seed.link.clone(),
            self.seed.address.clone(),
            target.clone(),
            payload,
        )
    }

    /// Forgets an outstanding request: cancels its timer and suppresses both
    /// the response and the timeout.
    ///
    /// # Arguments
    ///
    /// * `id` - The id of the request to forget.
    ///
    pub fn discard_request(&self, id: RequestId) {
        request::discard(&self.seed.link, id);
    }

    /// Answers the request currently being handled. No-op when the current
    /// message is not a `Request<T>`.
    ///
    /// # Arguments
    ///
    /// * `result` - The outcome to deliver to the requester.
    ///
    pub fn reply<T: Requestable>(
        &self,
        result: Result<T::Response, ExtendedError>,
    ) {
        crate::message::respond::<T>(&self.message, result);
    }

    /// Subscribes this actor for payload `P` at its own address.
    pub fn subscribe<P: Payload>(&self)
    where
        A: Handle<P>,
    {
        let address = self.seed.address.clone();
        self.subscribe_to::<P>(&address);
    }

    /// Subscribes this actor for payload `P` at `address`. The subscription
    /// becomes active once the confirmation for the point has been
    /// delivered back to this actor.
    ///
    /// # Arguments
    ///
    /// * `address` - The address to subscribe at; may belong to another
    ///   supervisor.
    ///
    pub fn subscribe_to<P: Payload>(&self, address: &Address)
    where
        A: Handle<P>,
    {
        let handler = method_handler::<A, P>(&self.seed);
        let point = SubscriptionPoint::new::<P>(
            address.clone(),
            self.seed.address.clone(),
        );
        let supervisor = self.seed.link.self_address.clone();
        supervisor.enqueue(Message::new(
            supervisor.clone(),
            SubscriptionRequest { point, handler },
        ));
    }

    /// Subscribes a lambda owned by this actor for payload `P` at `address`.
    ///
    /// # Arguments
    ///
    /// * `address` - The address to subscribe at.
    /// * `f` - The lambda invoked on matching messages.
    ///
    pub fn subscribe_fn<P, F>(&self, address: &Address, f: F)
    where
        P: Payload,
        F: Fn(&P) + Send + Sync + 'static,
    {
        let handler = lambda_handler::<P, F>(&self.seed, f);
        let point = SubscriptionPoint::new::<P>(
            address.clone(),
            self.seed.address.clone(),
        );
        let supervisor = self.seed.link.self_address.clone();
        supervisor.enqueue(Message::new(
            supervisor.clone(),
            SubscriptionRequest { point, handler },
        ));
    }

    /// Revokes this actor's subscription for payload `P` at `address`.
    /// Complete once the matching unsubscription confirmation arrives.
    ///
    /// # Arguments
    ///
    /// * `address` - The address the subscription points at.
    ///
    pub fn unsubscribe_from<P: Payload>(&self, address: &Address) {
        let point = SubscriptionPoint::new::<P>(
            address.clone(),
            self.seed.address.clone(),
        );
        let supervisor = self.seed.link.self_address.clone();
        supervisor.enqueue(Message::new(
            supervisor.clone(),
            UnsubscriptionRequest { point },
        ));
    }

    /// Requests this actor's own shutdown.
    ///
    /// # Arguments
    ///
    /// * `reason` - The shutdown reason; the first assigned reason wins.
    ///
    pub fn shutdown(&self, reason: impl Into<ExtendedError>) {
        let supervisor = self.seed.link.self_address.clone();
        supervisor.enqueue(Message::new(
            supervisor.clone(),
            ShutdownTrigger {
                address: self.seed.address.clone(),
                reason: reason.into(),
            },
        ));
    }

    /// Re-drives this actor's init gate after a plugin held it open.
    pub fn init_continue(&self) {
        let supervisor = self.seed.link.self_address.clone();
        supervisor.enqueue(Message::new(
            supervisor.clone(),
            InitCheck {
                address: self.seed.address.clone(),
            },
        ));
    }

    /// Re-drives this actor's shutdown gate after a plugin held it open.
    pub fn shutdown_continue(&self) {
        let supervisor = self.seed.link.self_address.clone();
        supervisor.enqueue(Message::new(
            supervisor.clone(),
            ShutdownCheck {
                address: self.seed.address.clone(),
            },
        ));
    }
}

/// Reference to a created actor.
pub struct ActorRef<A: Actor> {
    address: Address,
    state: StateCell,
    phantom: PhantomData<fn() -> A>,
}

impl<A: Actor> ActorRef<A> {
    pub(crate) fn new(address: Address, state: StateCell) -> Self {
        Self {
            address,
            state,
            phantom: PhantomData,
        }
    }

    /// Returns the actor's primary address.
    ///
    /// # Returns
    ///
    /// Returns the address of the actor.
    ///
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Returns a snapshot of the actor's lifecycle state.
    ///
    /// # Returns
    ///
    /// Returns the lifecycle state at the time of the call.
    ///
    pub fn state(&self) -> ActorState {
        self.state.get()
    }
}

impl<A: Actor> Clone for ActorRef<A> {
    fn clone(&self) -> Self {
        Self {
            address: self.address.clone(),
            state: self.state.clone(),
            phantom: PhantomData,
        }
    }
}

impl<A: Actor> fmt::Debug for ActorRef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRef")
            .field("address", &self.address)
            .field("state", &self.state.get())
            .finish()
    }
}

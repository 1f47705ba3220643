// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Supervisor core
//!
//! A supervisor is the root of a local scheduling domain: it owns a set of
//! actors, generates their addresses, and pumps one inbound queue of
//! messages. The pump is the serial execution context. A supervisor
//! processes at most one message at a time, handlers run to completion, and
//! anything arriving while a handler runs is appended to the queue. Multiple
//! supervisors run in parallel on separate tasks and interact only through
//! messages.
//!
//! Dispatch is owner-local: an address is only ever dispatched by the
//! supervisor that produced it. When a subscribed handler belongs to an actor
//! on another supervisor, the dispatching pump forwards a `handler_call`
//! instead of invoking the handler in place, so actor state is only ever
//! touched from its owning pump.

use crate::{
    actor::{
        Actor, ActorCell, ActorConfig, ActorRef, ActorState, ContextSeed,
        StateCell,
    },
    address::{Address, MessageRoute},
    error::{ErrorCode, ExtendedError, ShutdownCode},
    handler::{mailbox, Handler, MailboxReceiver, OwnerTag, SubscriptionPoint},
    message::{
        respond, CommitUnsubscription, CreateActor, ExternalSubscription,
        ExternalUnsubscription, HandlerCall, InitCheck, InitializeActor,
        InitializeConfirmation, Message, MessagePtr, Payload, Request,
        Response, ShutdownCheck, ShutdownRequest, StartActor, StateRequest,
        StateResponse, SubscriptionConfirmation, SubscriptionRequest,
        ShutdownTrigger, UnsubscriptionConfirmation, UnsubscriptionRequest,
    },
    plugin::ProcessingResult,
    request::{self, Control, RequestTable, Timers},
    supervision::{
        spawn_entry, ChildManager, ChildState, RequestState, SupervisorPolicy,
    },
    system::SystemContext,
};

use tokio::sync::mpsc;

use tracing::{debug, error};

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

static SUPERVISOR_SEQ: AtomicU64 = AtomicU64::new(1);

/// Configuration of a supervisor.
#[derive(Clone, Debug)]
pub struct SupervisorOptions {
    /// Reaction to a child init failure.
    pub policy: SupervisorPolicy,
    /// Defer child starts until the supervisor itself starts.
    pub synchronize_start: bool,
    /// Timeout for the supervisor's own init request.
    pub init_timeout: Duration,
    /// Timeout for the supervisor's own shutdown request.
    pub shutdown_timeout: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            policy: SupervisorPolicy::ShutdownSelf,
            synchronize_start: false,
            init_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Everything needed to reach a supervisor's pump from outside it: its
/// address, its published state, the control channel and the shared table of
/// outstanding requests.
#[derive(Clone)]
pub(crate) struct PumpLink {
    pub self_address: Address,
    pub self_state: StateCell,
    pub control: mpsc::UnboundedSender<Control>,
    pub requests: RequestTable,
    pub system: SystemContext,
}

/// Reference to a supervisor. Cheap to clone; all operations enqueue.
#[derive(Clone)]
pub struct SupervisorRef {
    pub(crate) link: PumpLink,
}

impl SupervisorRef {
    pub(crate) fn from_link(link: PumpLink) -> Self {
        Self { link }
    }

    /// Returns the supervisor's own address.
    ///
    /// # Returns
    ///
    /// Returns the address of the supervisor.
    ///
    pub fn address(&self) -> &Address {
        &self.link.self_address
    }

    /// Returns a snapshot of the supervisor's lifecycle state.
    ///
    /// # Returns
    ///
    /// Returns the lifecycle state at the time of the call.
    ///
    pub fn state(&self) -> ActorState {
        self.link.self_state.get()
    }

    /// Creates a plain address owned by this supervisor, without a backing
    /// actor. Useful as a publish/subscribe rendezvous point.
    ///
    /// # Returns
    ///
    /// Returns the new address.
    ///
    pub fn create_address(&self) -> Address {
        Address::new(self.link.self_address.route().clone())
    }

    /// Creates an actor with the default configuration.
    ///
    /// # Arguments
    ///
    /// * `actor` - The actor to create.
    ///
    /// # Returns
    ///
    /// Returns the actor reference of the new actor.
    ///
    pub fn create_actor<A: Actor>(&self, actor: A) -> ActorRef<A> {
        self.create_actor_with(actor, ActorConfig::default())
    }

    /// Creates an actor: activates it, registers it with the supervisor and
    /// lets the init protocol run. The returned reference is usable
    /// immediately; messages queue until the actor is operational.
    ///
    /// # Arguments
    ///
    /// * `actor` - The actor to create.
    /// * `config` - The configuration to activate it with.
    ///
    /// # Returns
    ///
    /// Returns the actor reference of the new actor.
    ///
    pub fn create_actor_with<A: Actor>(
        &self,
        actor: A,
        config: ActorConfig,
    ) -> ActorRef<A> {
        let address = Address::new(self.link.self_address.route().clone());
        let state = StateCell::new(ActorState::New);
        let (child, actor_ref) =
            spawn_entry(actor, config, &self.link, address, state);
        let init_timeout = child.init_timeout;
        let supervisor = self.link.self_address.clone();
        supervisor.enqueue(Message::new(
            supervisor.clone(),
            CreateActor {
                slot: Mutex::new(Some(child)),
                init_timeout,
            },
        ));
        actor_ref
    }

    /// Creates a nested supervisor supervised by this one.
    ///
    /// # Arguments
    ///
    /// * `body` - The actor serving as the new supervisor's own body.
    /// * `options` - The configuration of the new supervisor.
    ///
    /// # Returns
    ///
    /// Returns the reference of the new supervisor.
    ///
    pub fn create_supervisor<A: Actor>(
        &self,
        body: A,
        options: SupervisorOptions,
    ) -> SupervisorRef {
        Supervisor::spawn(body, options, &self.link.system, Some(self))
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

    /// Requests this supervisor's shutdown.
    ///
    /// # Arguments
    ///
    /// * `reason` - The shutdown reason; the first assigned reason wins.
    ///
    pub fn shutdown(&self, reason: impl Into<ExtendedError>) {
        let supervisor = self.link.self_address.clone();
        supervisor.enqueue(Message::new(
            supervisor.clone(),
            ShutdownTrigger {
                address: supervisor.clone(),
                reason: reason.into(),
            },
        ));
    }
}

/// One entry of a subscription table: the point and its handler, in
/// insertion order.
pub(crate) struct TableEntry {
    pub point: SubscriptionPoint,
    pub handler: Handler,
}

/// The supervisor pump and its owned state.
pub struct Supervisor {
    pub(crate) id: u64,
    pub(crate) address: Address,
    pub(crate) link: PumpLink,
    pub(crate) queue: MailboxReceiver,
    pub(crate) control: mpsc::UnboundedReceiver<Control>,
    pub(crate) timers: Timers,
    /// address id -> handlers, in subscription order
    pub(crate) subscriptions: HashMap<u64, Vec<TableEntry>>,
    /// owner actor id -> subscription points held against this supervisor
    pub(crate) address_mapping: HashMap<u64, Vec<SubscriptionPoint>>,
    pub(crate) manager: ChildManager,
    pub(crate) parent: Option<Address>,
    pub(crate) system: SystemContext,
    pub(crate) running: bool,
    stop_seen: bool,
}

impl Supervisor {
    /// Creates a root supervisor with `body` as its own actor and spawns its
    /// pump onto the current tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `body` - The actor serving as the supervisor's own body.
    /// * `options` - The configuration of the supervisor.
    /// * `system` - The shared system context.
    ///
    /// # Returns
    ///
    /// Returns the reference of the new supervisor.
    ///
    pub fn create<A: Actor>(
        body: A,
        options: SupervisorOptions,
        system: &SystemContext,
    ) -> SupervisorRef {
        Self::spawn(body, options, system, None)
    }

    pub(crate) fn spawn<A: Actor>(
        body: A,
        options: SupervisorOptions,
        system: &SystemContext,
        parent: Option<&SupervisorRef>,
    ) -> SupervisorRef {
        let (sender, queue) = mailbox();
        let (control_sender, control) = mpsc::unbounded_channel();
        let id = SUPERVISOR_SEQ.fetch_add(1, Ordering::Relaxed);
        let route = MessageRoute {
            supervisor_id: id,
            sender,
        };
        let self_address = Address::new(route);
        let self_state = StateCell::new(ActorState::New);
        let link = PumpLink {
            self_address: self_address.clone(),
            self_state: self_state.clone(),
            control: control_sender,
            requests: RequestTable::default(),
            system: system.clone(),
        };

        let config = ActorConfig {
            init_timeout: options.init_timeout,
            shutdown_timeout: options.shutdown_timeout,
            ..ActorConfig::default()
        };
        let (mut self_child, _body_ref) = spawn_entry(
            body,
            config,
            &link,
            self_address.clone(),
            self_state.clone(),
        );

        match parent {
            None => {
                // a root supervisor asks itself for initialization
                let request_id = request::issue::<InitializeActor>(
                    &link,
                    self_address.clone(),
                    &self_address,
                    InitializeActor {
                        address: self_address.clone(),
                    },
                    self_child.init_timeout,
                );
                self_child.init_request_id = Some(request_id);
            }
            Some(parent) => {
                let registration = ChildState {
                    address: self_address.clone(),
                    state: self_state.clone(),
                    entry: None,
                    initialized: false,
                    started: false,
                    shutdown: RequestState::None,
                    init_request_id: None,
                    init_timeout: self_child.init_timeout,
                    shutdown_timeout: self_child.shutdown_timeout,
                };
                let init_timeout = registration.init_timeout;
                let target = parent.address().clone();
                target.enqueue(Message::new(
                    target.clone(),
                    CreateActor {
                        slot: Mutex::new(Some(registration)),
                        init_timeout,
                    },
                ));
            }
        }

        let mut manager = ChildManager {
            children: HashMap::new(),
            policy: options.policy,
            synchronize_start: options.synchronize_start,
        };
        manager.children.insert(self_address.id(), self_child);

        let supervisor = Supervisor {
            id,
            address: self_address,
            link: link.clone(),
            queue,
            control,
            timers: Timers::new(),
            subscriptions: HashMap::new(),
            address_mapping: HashMap::new(),
            manager,
            parent: parent.map(|p| p.address().clone()),
            system: system.clone(),
            running: true,
            stop_seen: false,
        };
        tokio::spawn(supervisor.run());
        SupervisorRef { link }
    }

    /// The pump. Runs until this supervisor reaches `ShutDown`.
    async fn run(mut self) {
        debug!("Supervisor {} running.", self.id);
        while self.running {
            tokio::select! {
                maybe = self.queue.recv() => {
                    match maybe {
                        Some(message) => self.process(message).await,
                        None => break,
                    }
                }
                maybe = self.control.recv() => {
                    if let Some(control) = maybe {
                        self.on_control(control);
                    }
                }
                Some(id) = self.timers.next() => {
                    self.on_timer(id).await;
                }
                _ = self.system.token().cancelled(), if !self.stop_seen => {
                    self.stop_seen = true;
                    self.on_system_stop().await;
                }
            }
        }
        debug!("Supervisor {} stopped.", self.id);
    }

    /// Processes one inbound message: correlate responses, then deliver.
    async fn process(&mut self, message: MessagePtr) {
        if let Some(id) = message.correlation() {
            // exactly one of response, timeout or discard completes a
            // request; losers find the table entry gone
            if self.link.requests.take(id).is_none() {
                debug!("Dropping stale response for request {}.", id);
                return;
            }
            self.timers.cancel(id);
        }
        self.deliver(message).await;
    }

    /// Routes a message through the lifecycle machinery and then dispatches
    /// it through the subscription table, so lifecycle traffic stays
    /// observable by ordinary subscribers.
    async fn deliver(&mut self, message: MessagePtr) {
        self.route_system(message.clone()).await;
        self.dispatch(message).await;
    }

    async fn route_system(&mut self, message: MessagePtr) {
        let tag = message.tag();
        let to_self = message.destination().id() == self.address.id();

        if tag == TypeId::of::<CreateActor>() {
            if to_self {
                self.on_create(&message);
            }
        } else if tag == TypeId::of::<Request<InitializeActor>>() {
            self.on_initialize_request(message).await;
        } else if tag == TypeId::of::<Response<InitializeActor>>() {
            if to_self {
                self.on_init_response(message).await;
            }
        } else if tag == TypeId::of::<StartActor>() {
            self.on_start_actor(message).await;
        } else if tag == TypeId::of::<ShutdownTrigger>() {
            if to_self {
                self.on_shutdown_trigger(message).await;
            }
        } else if tag == TypeId::of::<Request<ShutdownRequest>>() {
            if to_self {
                self.handle_shutdown_self(message).await;
            } else {
                self.on_shutdown_request_entry(message).await;
            }
        } else if tag == TypeId::of::<Response<ShutdownRequest>>() {
            if to_self {
                self.on_shutdown_confirm(message).await;
            }
        } else if tag == TypeId::of::<Request<StateRequest>>() {
            if to_self {
                self.on_state_request(&message);
            }
        } else if tag == TypeId::of::<InitCheck>() {
            let id = message.payload::<InitCheck>().map(|c| c.address.id());
            if let Some(id) = id {
                self.try_complete_init(id);
            }
        } else if tag == TypeId::of::<ShutdownCheck>() {
            let id =
                message.payload::<ShutdownCheck>().map(|c| c.address.id());
            if let Some(id) = id {
                self.try_complete_shutdown(id);
            }
        } else if tag == TypeId::of::<SubscriptionRequest>() {
            self.on_subscription_request(&message);
        } else if tag == TypeId::of::<ExternalSubscription>() {
            self.on_external_subscription(&message);
        } else if tag == TypeId::of::<SubscriptionConfirmation>() {
            self.on_subscription_confirmation(&message);
        } else if tag == TypeId::of::<UnsubscriptionRequest>() {
            self.on_unsubscription_request(&message);
        } else if tag == TypeId::of::<ExternalUnsubscription>() {
            self.on_external_unsubscription(&message);
        } else if tag == TypeId::of::<CommitUnsubscription>() {
            self.on_commit_unsubscription(&message);
        } else if tag == TypeId::of::<UnsubscriptionConfirmation>() {
            self.on_unsubscription_confirmation(&message);
        } else if tag == TypeId::of::<HandlerCall>() {
            self.on_handler_call(&message).await;
        }
    }

    /// Walks the destination's handler list in insertion order. Local
    /// handlers are invoked in place (unless their owner is shut down);
    /// foreign handlers are forwarded to their owning supervisor.
    async fn dispatch(&mut self, message: MessagePtr) {
        let handlers: Vec<Handler> = match self
            .subscriptions
            .get(&message.destination().id())
        {
            Some(entries) => entries
                .iter()
                .filter(|entry| entry.handler.tag() == message.tag())
                .map(|entry| entry.handler.clone())
                .collect(),
            None => return,
        };
        for handler in handlers {
            if handler.home_supervisor() == self.id {
                if handler.owner_state.get() == ActorState::ShutDown {
                    continue;
                }
                handler.shim.invoke(&message).await;
            } else {
                let home = handler.home.clone();
                home.send(Message::new(
                    message.destination().clone(),
                    HandlerCall {
                        message: message.clone(),
                        handler,
                    },
                ));
            }
        }
    }

    fn on_control(&mut self, control: Control) {
        match control {
            Control::Arm { id, timeout } => {
                // skip requests already completed or discarded
                if self.link.requests.contains(id) {
                    self.timers.arm(id, timeout);
                }
            }
            Control::Cancel { id } => self.timers.cancel(id),
        }
    }

    async fn on_timer(&mut self, id: u64) {
        let Some(pending) = self.link.requests.take(id) else {
            return;
        };
        debug!("Request {} timed out.", id);
        let message = (pending.synth)();
        self.deliver(message).await;
    }

    async fn on_system_stop(&mut self) {
        debug!("Supervisor {} received system stop.", self.id);
        let reason = ExtendedError::shutdown(ShutdownCode::SupervisorShutdown);
        if self.parent.is_some() {
            self.shutdown_child(self.address.id(), &reason);
        } else {
            self.begin_self_shutdown(reason).await;
        }
    }

    // --- Actor lifecycle entry points -------------------------------------

    pub(crate) fn entry_parts(
        &self,
        id: u64,
    ) -> Option<(ActorCell, ContextSeed)> {
        let child = self.manager.children.get(&id)?;
        let entry = child.entry.as_ref()?;
        Some((entry.cell.clone(), entry.seed.clone()))
    }

    async fn on_initialize_request(&mut self, message: MessagePtr) {
        let id = message.destination().id();
        let Some((cell, seed)) = self.entry_parts(id) else {
            return;
        };
        {
            let Some(child) = self.manager.children.get_mut(&id) else {
                return;
            };
            if child.state.get() >= ActorState::Initialized {
                return;
            }
            child.state.set(ActorState::Initializing);
            if let Some(entry) = child.entry.as_mut() {
                entry.init_request = Some(message.clone());
            }
        }
        debug!("Actor {} initializing.", message.destination());
        let result = {
            let mut guard = cell.lock().await;
            guard.do_initialize(&seed, &message).await
        };
        match result {
            Ok(()) => {
                // re-check the gate only after everything the hook enqueued
                // (subscriptions, children) has been processed
                let target = message.destination().clone();
                self.address.enqueue(Message::new(
                    self.address.clone(),
                    InitCheck { address: target },
                ));
            }
            Err(cause) => {
                error!(
                    "Actor {} failed to initialize: {}",
                    message.destination(),
                    cause
                );
                if let Some(entry) = self
                    .manager
                    .children
                    .get_mut(&id)
                    .and_then(|child| child.entry.as_mut())
                {
                    entry.init_request = None;
                }
                respond::<InitializeActor>(&message, Err(cause));
            }
        }
    }

    /// Runs the init gate: every plugin with an armed `init` reaction must
    /// agree, and for the supervisor itself the child barrier must be open.
    /// Emits the confirmation and moves to `Initialized` once all clear.
    pub(crate) fn try_complete_init(&mut self, id: u64) {
        let is_self = id == self.address.id();
        if is_self && self.manager.has_initializing(self.address.id()) {
            return;
        }
        let Some(child) = self.manager.children.get_mut(&id) else {
            return;
        };
        if child.state.get() != ActorState::Initializing {
            return;
        }
        let Some(entry) = child.entry.as_mut() else {
            return;
        };
        if entry.init_request.is_none() {
            return;
        }
        for slot in entry.plugins.iter_mut() {
            if slot.reactions.init && !slot.plugin.handle_init() {
                return;
            }
        }
        let request = entry.init_request.take();
        child.state.set(ActorState::Initialized);
        debug!("Actor #{} initialized.", id);
        if let Some(request) = request {
            respond::<InitializeActor>(&request, Ok(InitializeConfirmation));
        }
    }

    async fn on_start_actor(&mut self, message: MessagePtr) {
        let id = message.destination().id();
        let Some((cell, seed)) = self.entry_parts(id) else {
            return;
        };
        {
            let Some(child) = self.manager.children.get_mut(&id) else {
                return;
            };
            if child.state.get() != ActorState::Initialized {
                return;
            }
            child.state.set(ActorState::Operational);
        }
        debug!("Actor {} operational.", message.destination());
        {
            let mut guard = cell.lock().await;
            guard.do_start(&seed, &message).await;
        }
        if let Some(entry) = self
            .manager
            .children
            .get_mut(&id)
            .and_then(|child| child.entry.as_mut())
        {
            for slot in entry.plugins.iter_mut() {
                if slot.reactions.start {
                    slot.plugin.handle_start();
                }
            }
        }
        if id == self.address.id() {
            self.start_children();
        }
    }

    async fn on_shutdown_request_entry(&mut self, message: MessagePtr) {
        let id = message.destination().id();
        let Some((cell, seed)) = self.entry_parts(id) else {
            return;
        };
        {
            let Some(child) = self.manager.children.get_mut(&id) else {
                return;
            };
            if child.state.get() >= ActorState::ShuttingDown {
                return;
            }
            child.state.set(ActorState::ShuttingDown);
            if let Some(entry) = child.entry.as_mut() {
                if let Some(request) =
                    message.payload::<Request<ShutdownRequest>>()
                {
                    crate::supervision::assign_shutdown_reason(
                        entry,
                        request.payload.reason.clone(),
                    );
                }
                entry.shutdown_request = Some(message.clone());
            }
        }
        debug!("Actor {} shutting down.", message.destination());
        {
            let mut guard = cell.lock().await;
            guard.do_shutdown_hook(&seed, &message).await;
        }
        self.try_complete_shutdown(id);
    }

    /// Runs the shutdown gate of a hosted actor; emits the confirmation and
    /// moves to `ShutDown` once every armed plugin agrees.
    pub(crate) fn try_complete_shutdown(&mut self, id: u64) {
        if id == self.address.id() {
            self.shutdown_continue();
            return;
        }
        let Some(child) = self.manager.children.get_mut(&id) else {
            return;
        };
        if child.state.get() != ActorState::ShuttingDown {
            return;
        }
        let Some(entry) = child.entry.as_mut() else {
            return;
        };
        if entry.shutdown_request.is_none() {
            return;
        }
        for slot in entry.plugins.iter_mut() {
            if slot.reactions.shutdown && !slot.plugin.handle_shutdown() {
                return;
            }
        }
        let request = entry.shutdown_request.take();
        child.state.set(ActorState::ShutDown);
        debug!("Actor #{} shut down.", id);
        if let Some(request) = request {
            respond::<ShutdownRequest>(
                &request,
                Ok(crate::message::ShutdownConfirmation),
            );
        }
    }

    fn on_state_request(&mut self, message: &MessagePtr) {
        let Some(request) = message.payload::<Request<StateRequest>>() else {
            return;
        };
        let subject = &request.payload.subject;
        let result = match self.manager.children.get(&subject.id()) {
            Some(child) => Ok(StateResponse {
                state: child.state.get(),
            }),
            None => Err(ExtendedError::code(ErrorCode::UnknownService)),
        };
        respond::<StateRequest>(message, result);
    }

    // --- Subscription fabric ----------------------------------------------

    fn on_subscription_request(&mut self, message: &MessagePtr) {
        let Some(subscription) = message.payload::<SubscriptionRequest>()
        else {
            return;
        };
        let mut point = subscription.point.clone();
        let handler = subscription.handler.clone();
        if point.address.supervisor_id() == self.id {
            point.owner_tag = OwnerTag::Supervisor;
            self.address_mapping
                .entry(point.owner.id())
                .or_default()
                .push(point.clone());
            self.subscriptions
                .entry(point.address.id())
                .or_default()
                .push(TableEntry {
                    point: point.clone(),
                    handler,
                });
            debug!("Subscribed {} at {}.", point.owner, point.address);
            let owner = point.owner.clone();
            owner.enqueue(Message::new(
                owner.clone(),
                SubscriptionConfirmation { point },
            ));
        } else {
            point.owner_tag = OwnerTag::Foreign;
            self.address_mapping
                .entry(point.owner.id())
                .or_default()
                .push(point.clone());
            debug!(
                "Forwarding subscription of {} to foreign address {}.",
                point.owner, point.address
            );
            let target = point.address.clone();
            target.enqueue(Message::new(
                target.clone(),
                ExternalSubscription { point, handler },
            ));
        }
    }

    fn on_external_subscription(&mut self, message: &MessagePtr) {
        let Some(subscription) = message.payload::<ExternalSubscription>()
        else {
            return;
        };
        let point = subscription.point.clone();
        self.subscriptions
            .entry(point.address.id())
            .or_default()
            .push(TableEntry {
                point: point.clone(),
                handler: subscription.handler.clone(),
            });
        debug!(
            "Recorded foreign subscription of {} at {}.",
            point.owner, point.address
        );
        let owner = point.owner.clone();
        owner.enqueue(Message::new(
            owner.clone(),
            SubscriptionConfirmation { point },
        ));
    }

    fn on_subscription_confirmation(&mut self, message: &MessagePtr) {
        let Some(confirmation) =
            message.payload::<SubscriptionConfirmation>()
        else {
            return;
        };
        let owner_id = confirmation.point.owner.id();
        if let Some(entry) = self
            .manager
            .children
            .get_mut(&owner_id)
            .and_then(|child| child.entry.as_mut())
        {
            for slot in entry.plugins.iter_mut() {
                if !slot.reactions.subscription {
                    continue;
                }
                let outcome =
                    slot.plugin.handle_subscription(&confirmation.point);
                if outcome == ProcessingResult::Finished {
                    slot.reactions.subscription = false;
                    slot.reactions.init = false;
                }
            }
        }
        self.try_complete_init(owner_id);
    }

    fn on_unsubscription_request(&mut self, message: &MessagePtr) {
        let Some(unsubscription) =
            message.payload::<UnsubscriptionRequest>()
        else {
            return;
        };
        self.revoke(unsubscription.point.clone());
    }

    /// Revokes one subscription point, local or foreign. Completion is
    /// signalled by the unsubscription confirmation.
    pub(crate) fn revoke(&mut self, point: SubscriptionPoint) {
        if point.address.supervisor_id() == self.id {
            self.revoke_local(point);
        } else {
            let target = point.address.clone();
            target.enqueue(Message::new(
                target.clone(),
                ExternalUnsubscription { point },
            ));
        }
    }

    fn revoke_local(&mut self, point: SubscriptionPoint) {
        if let Some(entries) = self.subscriptions.get_mut(&point.address.id())
        {
            entries.retain(|entry| entry.point != point);
            if entries.is_empty() {
                self.subscriptions.remove(&point.address.id());
            }
        }
        debug!("Unsubscribed {} from {}.", point.owner, point.address);
        let owner = point.owner.clone();
        owner.enqueue(Message::new(
            owner.clone(),
            UnsubscriptionConfirmation { point },
        ));
    }

    fn on_external_unsubscription(&mut self, message: &MessagePtr) {
        let Some(unsubscription) =
            message.payload::<ExternalUnsubscription>()
        else {
            return;
        };
        let point = unsubscription.point.clone();
        if let Some(entries) = self.subscriptions.get_mut(&point.address.id())
        {
            entries.retain(|entry| entry.point != point);
            if entries.is_empty() {
                self.subscriptions.remove(&point.address.id());
            }
        }
        let owner = point.owner.clone();
        owner.enqueue(Message::new(
            owner.clone(),
            CommitUnsubscription { point },
        ));
    }

    fn on_commit_unsubscription(&mut self, message: &MessagePtr) {
        let Some(commit) = message.payload::<CommitUnsubscription>() else {
            return;
        };
        let point = commit.point.clone();
        let owner = point.owner.clone();
        owner.enqueue(Message::new(
            owner.clone(),
            UnsubscriptionConfirmation { point },
        ));
    }

    fn on_unsubscription_confirmation(&mut self, message: &MessagePtr) {
        let Some(confirmation) =
            message.payload::<UnsubscriptionConfirmation>()
        else {
            return;
        };
        let point = confirmation.point.clone();
        let owner_id = point.owner.id();
        if let Some(points) = self.address_mapping.get_mut(&owner_id) {
            points.retain(|p| p != &point);
            if points.is_empty() {
                self.address_mapping.remove(&owner_id);
            }
        }
        if owner_id == self.address.id() {
            return;
        }
        let removable = self
            .manager
            .children
            .get(&owner_id)
            .map(|child| child.shutdown == RequestState::Confirmed)
            .unwrap_or(false);
        if removable && !self.address_mapping.contains_key(&owner_id) {
            self.remove_child(owner_id);
        }
    }

    async fn on_handler_call(&mut self, message: &MessagePtr) {
        let Some(call) = message.payload::<HandlerCall>() else {
            return;
        };
        if call.handler.home_supervisor() != self.id {
            return;
        }
        if call.handler.owner_state.get() == ActorState::ShutDown {
            return;
        }
        call.handler.shim.invoke(&call.message).await;
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use tracing_test::traced_test;

    struct Idle;

    #[async_trait::async_trait]
    impl Actor for Idle {}

    #[tokio::test]
    #[traced_test]
    async fn test_supervisor_initializes_and_stops() {
        let system = SystemContext::new();
        let sup =
            Supervisor::create(Idle, SupervisorOptions::default(), &system);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(logs_contain("running"));
        assert_eq!(sup.state(), ActorState::Operational);

        system.stop();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(sup.state(), ActorState::ShutDown);
        assert!(logs_contain("shut down"));
    }

    #[tokio::test]
    async fn test_supervisor_shutdown_by_trigger() {
        let system = SystemContext::new();
        let sup =
            Supervisor::create(Idle, SupervisorOptions::default(), &system);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(sup.state(), ActorState::Operational);

        sup.shutdown(ShutdownCode::Normal);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(sup.state(), ActorState::ShutDown);
    }
}

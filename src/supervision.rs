// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Supervision
//!
//! This module provides the child manager: the part of a supervisor that owns
//! its children. It tracks every child from creation to removal, gates the
//! supervisor's own initialisation on the init barrier (a supervisor is not
//! operational while a child is still initialising), applies the failure
//! policy when a child's init fails, and drives the shutdown cascade that
//! winds a subtree down in an orderly way.
//!
//! The failure model is shutdown and escalation, never restart: a failed
//! actor proceeds deterministically to `ShutDown`, and whether its failure
//! becomes the parent's failure is decided by [`SupervisorPolicy`].

use crate::{
    actor::{
        Actor, ActorCell, ActorConfig, ActorRef, ActorState, ContextSeed,
        StateCell,
    },
    address::Address,
    error::{ErrorCode, ExtendedError, ShutdownCode},
    handler::SubscriptionPoint,
    message::{
        respond, CreateActor, InitializeActor, Message, MessagePtr, Request,
        Response, ShutdownRequest, ShutdownTrigger, StartActor,
    },
    plugin::PluginSlot,
    prestarter::Prestarter,
    request,
    supervisor::{PumpLink, Supervisor},
};

use tracing::{debug, error, warn};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How a supervisor reacts when a child fails to initialise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorPolicy {
    /// The child's failure escalates: the supervisor itself shuts down (or
    /// answers its own pending init with a failure escalation).
    ShutdownSelf,
    /// The failure is absorbed: only the failed child is shut down.
    ShutdownFailed,
}

/// Progress of an outstanding request towards a child.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RequestState {
    None,
    Sent,
    Confirmed,
}

/// The lifecycle record of a locally hosted actor: its instance, its plugin
/// chain and the requests currently held open.
pub(crate) struct ActorEntry {
    pub cell: ActorCell,
    pub seed: ContextSeed,
    pub plugins: Vec<PluginSlot>,
    /// The init request being held until every init gate clears.
    pub init_request: Option<MessagePtr>,
    /// The shutdown request being held until every shutdown gate clears.
    pub shutdown_request: Option<MessagePtr>,
    pub shutdown_reason: Option<ExtendedError>,
}

/// One child as seen by its supervisor.
///
/// `entry` is present for actors hosted on this supervisor; a nested
/// supervisor keeps its own entry and is tracked here only through its
/// shared state cell and the request protocol.
pub(crate) struct ChildState {
    pub address: Address,
    pub state: StateCell,
    pub entry: Option<ActorEntry>,
    pub initialized: bool,
    pub started: bool,
    pub shutdown: RequestState,
    /// Id of the in-flight init request issued for this child, if any.
    pub init_request_id: Option<request::RequestId>,
    pub init_timeout: Duration,
    pub shutdown_timeout: Duration,
}

/// The children map plus the knobs governing it.
pub(crate) struct ChildManager {
    pub children: HashMap<u64, ChildState>,
    pub policy: SupervisorPolicy,
    pub synchronize_start: bool,
}

impl ChildManager {
    /// The init barrier: the supervisor's own init does not complete while
    /// it holds.
    ///
    /// # Arguments
    ///
    /// * `self_id` - The supervisor's own address id, excluded from the
    ///   check.
    ///
    /// # Returns
    ///
    /// Returns true while any other child is still at or below
    /// `Initializing` without a confirmed init.
    ///
    pub(crate) fn has_initializing(&self, self_id: u64) -> bool {
        self.children.values().any(|child| {
            child.address.id() != self_id
                && child.state.get() <= ActorState::Initializing
                && !child.initialized
        })
    }
}

/// Assigns a shutdown reason; the first assignment wins and one later reason
/// may be chained as a cause.
pub(crate) fn assign_shutdown_reason(
    entry: &mut ActorEntry,
    reason: ExtendedError,
) {
    match &entry.shutdown_reason {
        None => entry.shutdown_reason = Some(reason),
        Some(current) if current.cause().is_none() => {
            entry.shutdown_reason = Some(current.clone().with_cause(reason));
        }
        Some(_) => {}
    }
}

/// Activates an actor: runs `configure`, builds the plugin chain and the
/// lifecycle record, and moves the actor to `Initializing`.
///
/// # Arguments
///
/// * `actor` - The actor to activate.
/// * `config` - The configuration the actor may adjust in `configure`.
/// * `link` - The owning supervisor's pump link.
/// * `address` - The primary address allocated for the actor.
/// * `state` - The shared state cell to publish through.
///
/// # Returns
///
/// Returns the child record and the actor reference.
///
pub(crate) fn spawn_entry<A: Actor>(
    mut actor: A,
    mut config: ActorConfig,
    link: &PumpLink,
    address: Address,
    state: StateCell,
) -> (ChildState, ActorRef<A>) {
    actor.configure(&mut config);
    let boxed: Box<dyn crate::actor::AnyActor + Send> = Box::new(actor);
    let cell: ActorCell = Arc::new(tokio::sync::Mutex::new(boxed));
    let seed = ContextSeed {
        address: address.clone(),
        state: state.clone(),
        link: link.clone(),
        cell: cell.clone(),
    };
    let mut plugins = vec![PluginSlot::activate(Box::new(Prestarter::new(
        config.tracked.clone(),
    )))];
    for plugin in config.plugins {
        plugins.push(PluginSlot::activate(plugin));
    }
    state.set(ActorState::Initializing);
    let actor_ref = ActorRef::new(address.clone(), state.clone());
    let entry = ActorEntry {
        cell,
        seed,
        plugins,
        init_request: None,
        shutdown_request: None,
        shutdown_reason: None,
    };
    let child = ChildState {
        address,
        state,
        entry: Some(entry),
        initialized: false,
        started: false,
        shutdown: RequestState::None,
        init_request_id: None,
        init_timeout: config.init_timeout,
        shutdown_timeout: config.shutdown_timeout,
    };
    (child, actor_ref)
}

// Child management. These run on the owning supervisor's pump; everything
// they send goes through the queues, so re-entrancy is never an issue.
impl Supervisor {
    /// A freshly constructed actor registers with its supervisor; issue the
    /// init request that activates it.
    pub(crate) fn on_create(&mut self, message: &MessagePtr) {
        let Some(create) = message.payload::<CreateActor>() else {
            return;
        };
        let Some(mut child) =
            create.slot.lock().ok().and_then(|mut slot| slot.take())
        else {
            return;
        };
        let address = child.address.clone();
        debug!("Supervisor {} creating actor {}.", self.id, address);
        let request_id = request::issue::<InitializeActor>(
            &self.link,
            self.address.clone(),
            &address,
            InitializeActor {
                address: address.clone(),
            },
            create.init_timeout,
        );
        child.init_request_id = Some(request_id);
        self.manager.children.insert(address.id(), child);
    }

    /// A child answered (or timed out) its init request.
    pub(crate) async fn on_init_response(&mut self, message: MessagePtr) {
        let Some(response) = message.payload::<Response<InitializeActor>>()
        else {
            return;
        };
        let address = response.request.payload.address.clone();
        let error = response.result.as_ref().err().cloned();
        let self_id = self.address.id();
        let self_state = self.link.self_state.get();

        if let Some(child) = self.manager.children.get_mut(&address.id()) {
            child.init_request_id = None;
        }
        let found = self.manager.children.contains_key(&address.id());
        let mut continue_init =
            error.is_none() && !self.manager.has_initializing(self_id);

        if let Some(cause) = error.clone() {
            let shutdown_self = self_state == ActorState::Initializing
                && self.manager.policy == SupervisorPolicy::ShutdownSelf;
            if shutdown_self {
                continue_init = false;
                let pending = self
                    .manager
                    .children
                    .get_mut(&self_id)
                    .and_then(|child| child.entry.as_mut())
                    .and_then(|entry| entry.init_request.take());
                if let Some(request) = pending {
                    error!(
                        "Supervisor {} escalating init failure of {}: {}",
                        self.id, address, cause
                    );
                    respond::<InitializeActor>(
                        &request,
                        Err(ExtendedError::code(ErrorCode::FailureEscalation)
                            .with_cause(cause)),
                    );
                } else {
                    let reason = ExtendedError::shutdown(
                        ShutdownCode::ChildInitFailed,
                    )
                    .with_cause(cause);
                    self.trigger_self_shutdown(reason);
                }
            } else {
                warn!(
                    "Supervisor {} shutting down {} after failed init: {}",
                    self.id, address, cause
                );
                let reason =
                    ExtendedError::shutdown(ShutdownCode::InitFailed)
                        .with_cause(cause);
                if found {
                    self.shutdown_child(address.id(), &reason);
                } else {
                    // rare race: the child is already gone
                    self.trigger_self_shutdown(reason);
                }
            }
        } else if found {
            let do_start = {
                let Some(child) =
                    self.manager.children.get_mut(&address.id())
                else {
                    return;
                };
                child.initialized = true;
                if address.id() == self_id {
                    self_state <= ActorState::Operational
                } else {
                    !self.manager.synchronize_start
                }
            };
            if do_start {
                if let Some(child) =
                    self.manager.children.get_mut(&address.id())
                {
                    child.started = true;
                }
                address.enqueue(Message::new(
                    address.clone(),
                    StartActor {
                        address: address.clone(),
                    },
                ));
            }
        }
        if continue_init {
            self.try_complete_init(self_id);
        }
        // no need of treating self as a child
        if address.id() != self_id {
            self.call_child_init_hook(&address, error.as_ref(), &message)
                .await;
        }
    }

    /// Entry point of every shutdown: route the trigger to the child (or to
    /// this supervisor itself).
    pub(crate) async fn on_shutdown_trigger(&mut self, message: MessagePtr) {
        let Some(trigger) = message.payload::<ShutdownTrigger>() else {
            return;
        };
        let address = trigger.address.clone();
        let reason = trigger.reason.clone();
        if address.id() == self.address.id() && self.parent.is_none() {
            self.begin_self_shutdown(reason).await;
        } else {
            self.shutdown_child(address.id(), &reason);
        }
    }

    /// Requests the shutdown of one child. Idempotent: a child whose
    /// shutdown is already in flight is left alone, so the recursive cascade
    /// cannot double-send.
    ///
    /// # Arguments
    ///
    /// * `id` - The address id of the child.
    /// * `reason` - The reason carried by the shutdown request.
    ///
    pub(crate) fn shutdown_child(&mut self, id: u64, reason: &ExtendedError) {
        let self_id = self.address.id();
        match self.manager.children.get(&id) {
            Some(child) if child.shutdown == RequestState::None => {}
            _ => return,
        }
        self.cancel_init(id);
        if id == self_id {
            // routed via the parent, which answers with a shutdown request
            if let Some(parent) = self.parent.clone() {
                if let Some(child) = self.manager.children.get_mut(&id) {
                    child.shutdown = RequestState::Sent;
                }
                parent.enqueue(Message::new(
                    parent.clone(),
                    ShutdownTrigger {
                        address: self.address.clone(),
                        reason: reason.clone(),
                    },
                ));
            }
            return;
        }
        let (address, timeout) = match self.manager.children.get_mut(&id) {
            Some(child) => {
                child.shutdown = RequestState::Sent;
                (child.address.clone(), child.shutdown_timeout)
            }
            None => return,
        };
        debug!(
            "Supervisor {} requesting shutdown of {}.",
            self.id, address
        );
        request::issue::<ShutdownRequest>(
            &self.link,
            self.address.clone(),
            &address,
            ShutdownRequest {
                address: address.clone(),
                reason: reason.clone(),
            },
            timeout,
        );
    }

    /// Self-shutdown of a supervisor without a parent: assign the reason,
    /// wind the actor down, cascade over the children, then try to finish.
    pub(crate) async fn begin_self_shutdown(&mut self, reason: ExtendedError) {
        let self_id = self.address.id();
        if self.link.self_state.get() >= ActorState::ShuttingDown {
            return;
        }
        {
            let Some(child) = self.manager.children.get_mut(&self_id) else {
                return;
            };
            child.shutdown = RequestState::Confirmed;
            if let Some(entry) = child.entry.as_mut() {
                assign_shutdown_reason(entry, reason.clone());
            }
        }
        self.cancel_init(self_id);
        let message = Message::new(
            self.address.clone(),
            ShutdownTrigger {
                address: self.address.clone(),
                reason: reason.clone(),
            },
        );
        self.shutdown_start(message).await;
        self.cascade_shutdown(&reason);
        self.shutdown_continue();
    }

    /// A shutdown request arrived for this supervisor itself (from the
    /// parent, or routed back from its own trigger).
    pub(crate) async fn handle_shutdown_self(&mut self, message: MessagePtr) {
        let self_id = self.address.id();
        let reason = message
            .payload::<Request<ShutdownRequest>>()
            .map(|request| request.payload.reason.clone())
            .unwrap_or_else(|| {
                ExtendedError::shutdown(ShutdownCode::Normal)
            });
        {
            let Some(child) = self.manager.children.get_mut(&self_id) else {
                return;
            };
            // prevent double sending, i.e. from parent and from self
            child.shutdown = RequestState::Confirmed;
            if let Some(entry) = child.entry.as_mut() {
                assign_shutdown_reason(entry, reason.clone());
                entry.shutdown_request = Some(message.clone());
            }
        }
        self.cancel_init(self_id);
        self.shutdown_start(message).await;
        self.cascade_shutdown(&reason);
        self.shutdown_continue();
    }

    /// Moves this supervisor to `ShuttingDown` and runs its body's shutdown
    /// hook. No-op when already winding down.
    async fn shutdown_start(&mut self, message: MessagePtr) {
        if self.link.self_state.get() >= ActorState::ShuttingDown {
            return;
        }
        self.link.self_state.set(ActorState::ShuttingDown);
        debug!("Supervisor {} shutting down.", self.id);
        let Some((cell, seed)) = self.entry_parts(self.address.id()) else {
            return;
        };
        let mut guard = cell.lock().await;
        guard.do_shutdown_hook(&seed, &message).await;
    }

    /// Requests shutdown of every child with the given reason.
    fn cascade_shutdown(&mut self, reason: &ExtendedError) {
        let ids: Vec<u64> = self.manager.children.keys().copied().collect();
        for id in ids {
            self.shutdown_child(id, reason);
        }
    }

    /// Finishes this supervisor's shutdown once only it remains: confirm to
    /// the parent (if the shutdown was requested), publish `ShutDown` and
    /// stop the pump.
    pub(crate) fn shutdown_continue(&mut self) {
        if self.link.self_state.get() != ActorState::ShuttingDown {
            return;
        }
        if self.manager.children.len() > 1 {
            return;
        }
        let self_id = self.address.id();
        let request = self
            .manager
            .children
            .get_mut(&self_id)
            .and_then(|child| child.entry.as_mut())
            .and_then(|entry| entry.shutdown_request.take());
        self.link.self_state.set(ActorState::ShutDown);
        if let Some(request) = request {
            respond::<ShutdownRequest>(
                &request,
                Ok(crate::message::ShutdownConfirmation),
            );
        }
        debug!("Supervisor {} shut down.", self.id);
        self.running = false;
    }

    /// A child confirmed (or timed out) its shutdown request.
    pub(crate) async fn on_shutdown_confirm(&mut self, message: MessagePtr) {
        let Some(response) = message.payload::<Response<ShutdownRequest>>()
        else {
            return;
        };
        let address = response.request.payload.address.clone();
        let error = response.result.as_ref().err().cloned();
        {
            let Some(child) = self.manager.children.get_mut(&address.id())
            else {
                return;
            };
            child.shutdown = RequestState::Confirmed;
        }
        if let Some(e) = &error {
            error!(
                "Supervisor {}: {} reported a shutdown error: {}",
                self.id, address, e
            );
            self.system.on_error(e);
        }
        let points: Vec<SubscriptionPoint> = self
            .address_mapping
            .get(&address.id())
            .cloned()
            .unwrap_or_default();
        if points.is_empty() {
            self.remove_child(address.id());
        } else {
            // the revocations are asynchronous; removal happens once the
            // last unsubscription confirmation clears
            debug!(
                "Supervisor {} revoking {} subscriptions of {}.",
                self.id,
                points.len(),
                address
            );
            for point in points {
                self.revoke(point);
            }
        }
        // no need of treating self as a child
        if address.id() != self.address.id() {
            self.call_child_shutdown_hook(&address, error.as_ref(), &message)
                .await;
        }
    }

    /// Erases a child, applying the init-failure escalation rules when it
    /// never started, and re-checks both gates its absence may open.
    ///
    /// # Arguments
    ///
    /// * `id` - The address id of the child to erase.
    ///
    pub(crate) fn remove_child(&mut self, id: u64) {
        let self_id = self.address.id();
        let child_started = match self.manager.children.get(&id) {
            Some(child) => child.started,
            None => return,
        };
        let state = self.link.self_state.get();
        let mut escalate: Option<ExtendedError> = None;
        if state == ActorState::Initializing
            && !child_started
            && id != self_id
        {
            if self.manager.policy == SupervisorPolicy::ShutdownFailed {
                escalate = Some(ExtendedError::shutdown(
                    ShutdownCode::ChildInitFailed,
                ));
            } else {
                let pending = self
                    .manager
                    .children
                    .get_mut(&self_id)
                    .and_then(|child| child.entry.as_mut())
                    .and_then(|entry| entry.init_request.take());
                if let Some(request) = pending {
                    respond::<InitializeActor>(
                        &request,
                        Err(ExtendedError::code(
                            ErrorCode::FailureEscalation,
                        )),
                    );
                }
            }
        }
        if let Some(reason) = escalate {
            self.trigger_self_shutdown(reason);
        }
        self.cancel_init(id);
        self.manager.children.remove(&id);
        debug!("Supervisor {} removed actor #{}.", self.id, id);
        if self.link.self_state.get() == ActorState::ShuttingDown
            && self.manager.children.len() <= 1
        {
            self.shutdown_continue();
        }
        // the init barrier may be open now
        self.try_complete_init(self_id);
    }

    /// Forgets the in-flight init request issued for a child, if its timer
    /// is still armed.
    ///
    /// # Arguments
    ///
    /// * `id` - The address id of the child.
    ///
    pub(crate) fn cancel_init(&mut self, id: u64) {
        let request_id = match self.manager.children.get_mut(&id) {
            Some(child) => child.init_request_id.take(),
            None => return,
        };
        if let Some(request_id) = request_id {
            if self.link.requests.take(request_id).is_some() {
                self.timers.cancel(request_id);
            }
        }
    }

    /// Start sweep under `synchronize_start`: once the supervisor itself is
    /// operational, every child is started exactly once.
    pub(crate) fn start_children(&mut self) {
        if !self.manager.synchronize_start {
            return;
        }
        let self_id = self.address.id();
        let targets: Vec<Address> = self
            .manager
            .children
            .values()
            .filter(|child| {
                child.address.id() != self_id && !child.started
            })
            .map(|child| child.address.clone())
            .collect();
        for address in targets {
            if let Some(child) = self.manager.children.get_mut(&address.id())
            {
                child.started = true;
            }
            debug!("Supervisor {} starting {}.", self.id, address);
            address.enqueue(Message::new(
                address.clone(),
                StartActor {
                    address: address.clone(),
                },
            ));
        }
    }

    /// Enqueues a shutdown trigger for this supervisor itself.
    pub(crate) fn trigger_self_shutdown(&mut self, reason: ExtendedError) {
        self.address.enqueue(Message::new(
            self.address.clone(),
            ShutdownTrigger {
                address: self.address.clone(),
                reason,
            },
        ));
    }

    async fn call_child_init_hook(
        &mut self,
        child: &Address,
        error: Option<&ExtendedError>,
        message: &MessagePtr,
    ) {
        let Some((cell, seed)) = self.entry_parts(self.address.id()) else {
            return;
        };
        let mut guard = cell.lock().await;
        guard.do_child_init(child, error, &seed, message).await;
    }

    async fn call_child_shutdown_hook(
        &mut self,
        child: &Address,
        error: Option<&ExtendedError>,
        message: &MessagePtr,
    ) {
        let Some((cell, seed)) = self.entry_parts(self.address.id()) else {
            return;
        };
        let mut guard = cell.lock().await;
        guard.do_child_shutdown(child, error, &seed, message).await;
    }
}

// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Dispatch fabric integration tests: foreign subscriptions, handler-call
//! forwarding, unsubscription hand-shakes, lambda handlers and payload-tag
//! isolation on a shared address.

use arbor::{
    Actor, ActorConfig, ActorContext, ActorState, Address, ExtendedError,
    Handle, Payload, Supervisor, SupervisorOptions, SystemContext,
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use std::time::Duration;

async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

struct Root;

#[async_trait]
impl Actor for Root {}

#[derive(Debug, Clone, PartialEq)]
struct Num(u32);

impl Payload for Num {}

#[derive(Debug, Clone, PartialEq)]
struct Word(&'static str);

impl Payload for Word {}

#[derive(Debug, Clone)]
struct Detach;

impl Payload for Detach {}

/// Subscribes at an address owned by another supervisor; init waits for
/// the foreign confirmation round trip.
struct Remote {
    topic: Address,
    probe: mpsc::UnboundedSender<u32>,
}

#[async_trait]
impl Actor for Remote {
    fn configure(&mut self, config: &mut ActorConfig) {
        config.track::<Num>(&self.topic);
    }

    async fn on_initialize(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ExtendedError> {
        ctx.subscribe_to::<Num>(&self.topic);
        ctx.subscribe::<Detach>();
        Ok(())
    }
}

#[async_trait]
impl Handle<Num> for Remote {
    async fn handle(&mut self, message: &Num, _ctx: &mut ActorContext<Self>) {
        let _ = self.probe.send(message.0);
    }
}

#[async_trait]
impl Handle<Detach> for Remote {
    async fn handle(
        &mut self,
        _message: &Detach,
        ctx: &mut ActorContext<Self>,
    ) {
        ctx.unsubscribe_from::<Num>(&self.topic);
    }
}

// Foreign subscription: the handler runs on its owner's supervisor via
// handler-call forwarding, and per-source FIFO order is preserved.
#[tokio::test]
async fn test_foreign_subscription_delivers_in_order() {
    let system = SystemContext::new();
    let sup1 = Supervisor::create(Root, SupervisorOptions::default(), &system);
    let sup2 = Supervisor::create(Root, SupervisorOptions::default(), &system);
    let topic = sup2.create_address();

    let (probe, mut events) = mpsc::unbounded_channel();
    let remote = sup1.create_actor(Remote {
        topic: topic.clone(),
        probe,
    });
    settle().await;
    // init is gated on the foreign confirmation, so the subscription is
    // live as soon as the actor is operational
    assert_eq!(remote.state(), ActorState::Operational);

    for n in 0..10 {
        sup2.send(&topic, Num(n));
    }
    settle().await;
    for n in 0..10 {
        assert_eq!(events.recv().await, Some(n));
    }
    assert!(events.try_recv().is_err());
}

// Foreign unsubscription completes the external hand-shake; afterwards
// nothing is delivered.
#[tokio::test]
async fn test_foreign_unsubscription_stops_delivery() {
    let system = SystemContext::new();
    let sup1 = Supervisor::create(Root, SupervisorOptions::default(), &system);
    let sup2 = Supervisor::create(Root, SupervisorOptions::default(), &system);
    let topic = sup2.create_address();

    let (probe, mut events) = mpsc::unbounded_channel();
    let remote = sup1.create_actor(Remote {
        topic: topic.clone(),
        probe,
    });
    settle().await;

    sup2.send(&topic, Num(1));
    settle().await;
    assert_eq!(events.recv().await, Some(1));

    sup1.send(remote.address(), Detach);
    settle().await;
    sup2.send(&topic, Num(2));
    settle().await;
    assert!(events.try_recv().is_err(), "unsubscribed, nothing arrives");
}

/// Subscribes a lambda at a plain address of its own supervisor.
struct LambdaHost {
    topic: Address,
    probe: mpsc::UnboundedSender<u32>,
}

#[async_trait]
impl Actor for LambdaHost {
    async fn on_initialize(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ExtendedError> {
        let probe = self.probe.clone();
        ctx.subscribe_fn::<Num, _>(&self.topic, move |message| {
            let _ = probe.send(message.0);
        });
        Ok(())
    }
}

#[tokio::test]
async fn test_lambda_handler_receives_matching_payloads() {
    let system = SystemContext::new();
    let sup = Supervisor::create(Root, SupervisorOptions::default(), &system);
    let topic = sup.create_address();

    let (probe, mut events) = mpsc::unbounded_channel();
    let _host = sup.create_actor(LambdaHost {
        topic: topic.clone(),
        probe,
    });
    settle().await;

    sup.send(&topic, Num(42));
    sup.send(&topic, Word("ignored"));
    settle().await;
    assert_eq!(events.recv().await, Some(42));
    assert!(events.try_recv().is_err(), "tag mismatch is silently ignored");
}

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Number(u32),
    Text(&'static str),
}

/// Subscribes two payload types at its own address.
struct Duo {
    probe: mpsc::UnboundedSender<Seen>,
}

#[async_trait]
impl Actor for Duo {
    async fn on_initialize(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ExtendedError> {
        ctx.subscribe::<Num>();
        ctx.subscribe::<Word>();
        Ok(())
    }
}

#[async_trait]
impl Handle<Num> for Duo {
    async fn handle(&mut self, message: &Num, _ctx: &mut ActorContext<Self>) {
        let _ = self.probe.send(Seen::Number(message.0));
    }
}

#[async_trait]
impl Handle<Word> for Duo {
    async fn handle(&mut self, message: &Word, _ctx: &mut ActorContext<Self>) {
        let _ = self.probe.send(Seen::Text(message.0));
    }
}

// Invariant: one address shared across payload types; every handler sees
// only the envelopes matching its tag.
#[tokio::test]
async fn test_shared_address_routes_by_payload_tag() {
    let system = SystemContext::new();
    let sup = Supervisor::create(Root, SupervisorOptions::default(), &system);
    let (probe, mut events) = mpsc::unbounded_channel();
    let duo = sup.create_actor(Duo { probe });
    settle().await;

    sup.send(duo.address(), Num(5));
    sup.send(duo.address(), Word("five"));
    settle().await;

    assert_eq!(events.recv().await, Some(Seen::Number(5)));
    assert_eq!(events.recv().await, Some(Seen::Text("five")));
    assert!(events.try_recv().is_err());
}

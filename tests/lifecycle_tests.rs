// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle integration tests: init/start ordering, synchronized starts,
//! observer mirroring and delivery after shutdown.

use arbor::{
    Actor, ActorContext, ActorState, Address, ExtendedError, Handle, Payload,
    ShutdownCode, ShutdownTrigger, StartActor, Supervisor, SupervisorOptions,
    SystemContext,
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use std::time::Duration;

async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[derive(Debug, Clone, PartialEq)]
struct Greeting(&'static str);

impl Payload for Greeting {}

struct Root;

#[async_trait]
impl Actor for Root {}

struct Receiver {
    probe: mpsc::UnboundedSender<Greeting>,
}

#[async_trait]
impl Actor for Receiver {
    async fn on_initialize(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ExtendedError> {
        ctx.subscribe::<Greeting>();
        Ok(())
    }
}

#[async_trait]
impl Handle<Greeting> for Receiver {
    async fn handle(
        &mut self,
        message: &Greeting,
        _ctx: &mut ActorContext<Self>,
    ) {
        let _ = self.probe.send(message.clone());
    }
}

struct Sender {
    target: Address,
}

#[async_trait]
impl Actor for Sender {
    async fn on_start(&mut self, ctx: &mut ActorContext<Self>) {
        ctx.send(&self.target, Greeting("hello"));
    }
}

// A subscription made during init is live before any peer starts.
#[tokio::test]
async fn test_subscribe_in_init_receives_message_sent_at_start() {
    let system = SystemContext::new();
    let sup = Supervisor::create(Root, SupervisorOptions::default(), &system);
    let (probe, mut events) = mpsc::unbounded_channel();

    let receiver = sup.create_actor(Receiver { probe });
    settle().await;
    assert_eq!(receiver.state(), ActorState::Operational);

    let _sender = sup.create_actor(Sender {
        target: receiver.address().clone(),
    });
    settle().await;

    assert_eq!(events.recv().await, Some(Greeting("hello")));
    assert!(events.try_recv().is_err(), "exactly one delivery expected");
}

struct Tracker {
    probe: mpsc::UnboundedSender<(&'static str, ActorState)>,
}

#[async_trait]
impl Actor for Tracker {
    async fn on_initialize(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ExtendedError> {
        let _ = self.probe.send(("init", ctx.state()));
        Ok(())
    }

    async fn on_start(&mut self, ctx: &mut ActorContext<Self>) {
        let _ = self.probe.send(("start", ctx.state()));
    }

    async fn on_shutdown(&mut self, ctx: &mut ActorContext<Self>) {
        let _ = self.probe.send(("shutdown", ctx.state()));
    }
}

// The state machine is monotone and start never precedes init.
#[tokio::test]
async fn test_lifecycle_hook_order_and_states() {
    let system = SystemContext::new();
    let sup = Supervisor::create(Root, SupervisorOptions::default(), &system);
    let (probe, mut events) = mpsc::unbounded_channel();

    let tracker = sup.create_actor(Tracker { probe });
    settle().await;
    sup.send(
        sup.address(),
        ShutdownTrigger {
            address: tracker.address().clone(),
            reason: ShutdownCode::Normal.into(),
        },
    );
    settle().await;

    assert_eq!(
        events.recv().await,
        Some(("init", ActorState::Initializing))
    );
    assert_eq!(events.recv().await, Some(("start", ActorState::Operational)));
    assert_eq!(
        events.recv().await,
        Some(("shutdown", ActorState::ShuttingDown))
    );
    assert_eq!(tracker.state(), ActorState::ShutDown);
}

struct NamedChild {
    name: &'static str,
    probe: mpsc::UnboundedSender<&'static str>,
}

#[async_trait]
impl Actor for NamedChild {
    async fn on_start(&mut self, _ctx: &mut ActorContext<Self>) {
        let _ = self.probe.send(self.name);
    }
}

struct SyncRoot {
    probe: mpsc::UnboundedSender<&'static str>,
}

#[async_trait]
impl Actor for SyncRoot {
    async fn on_initialize(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ExtendedError> {
        let sup = ctx.supervisor();
        sup.create_actor(NamedChild {
            name: "c1",
            probe: self.probe.clone(),
        });
        sup.create_actor(NamedChild {
            name: "c2",
            probe: self.probe.clone(),
        });
        Ok(())
    }

    async fn on_start(&mut self, _ctx: &mut ActorContext<Self>) {
        let _ = self.probe.send("root");
    }
}

// Under synchronize_start both children start exactly once, after the
// supervisor's own operational transition.
#[tokio::test]
async fn test_synchronized_start_defers_children() {
    let system = SystemContext::new();
    let (probe, mut events) = mpsc::unbounded_channel();
    let options = SupervisorOptions {
        synchronize_start: true,
        ..SupervisorOptions::default()
    };
    let sup = Supervisor::create(SyncRoot { probe }, options, &system);
    settle().await;
    assert_eq!(sup.state(), ActorState::Operational);

    let first = events.recv().await;
    assert_eq!(first, Some("root"), "children must not start before root");
    let mut children = vec![
        events.recv().await.unwrap(),
        events.recv().await.unwrap(),
    ];
    children.sort();
    assert_eq!(children, ["c1", "c2"]);
    assert!(events.try_recv().is_err(), "each start happens exactly once");
}

struct Observer {
    target: Address,
    probe: mpsc::UnboundedSender<u64>,
}

#[async_trait]
impl Actor for Observer {
    async fn on_initialize(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ExtendedError> {
        ctx.subscribe_to::<StartActor>(&self.target);
        Ok(())
    }
}

#[async_trait]
impl Handle<StartActor> for Observer {
    async fn handle(
        &mut self,
        message: &StartActor,
        _ctx: &mut ActorContext<Self>,
    ) {
        let _ = self.probe.send(message.address.id());
    }
}

// No replay of historical messages; later traffic to the watched
// address is mirrored to the observer.
#[tokio::test]
async fn test_observer_sees_no_history_but_mirrors_later_traffic() {
    let system = SystemContext::new();
    let sup = Supervisor::create(Root, SupervisorOptions::default(), &system);
    let (greeting_probe, _greetings) = mpsc::unbounded_channel();
    let target = sup.create_actor(Receiver {
        probe: greeting_probe,
    });
    settle().await;
    assert_eq!(target.state(), ActorState::Operational);

    let (probe, mut events) = mpsc::unbounded_channel();
    let observer = sup.create_actor(Observer {
        target: target.address().clone(),
        probe,
    });
    settle().await;
    assert_eq!(observer.state(), ActorState::Operational);
    assert!(events.try_recv().is_err(), "no historical replay");

    sup.send(
        target.address(),
        StartActor {
            address: target.address().clone(),
        },
    );
    settle().await;
    assert_eq!(events.recv().await, Some(target.address().id()));
    assert!(events.try_recv().is_err());
}

// Invariant: after ShutDown no further handler of the actor is invoked.
#[tokio::test]
async fn test_no_delivery_after_shutdown() {
    let system = SystemContext::new();
    let sup = Supervisor::create(Root, SupervisorOptions::default(), &system);
    let (probe, mut events) = mpsc::unbounded_channel();
    let receiver = sup.create_actor(Receiver { probe });
    settle().await;

    sup.send(receiver.address(), Greeting("before"));
    settle().await;
    assert_eq!(events.recv().await, Some(Greeting("before")));

    sup.send(
        sup.address(),
        ShutdownTrigger {
            address: receiver.address().clone(),
            reason: ShutdownCode::Normal.into(),
        },
    );
    settle().await;
    assert_eq!(receiver.state(), ActorState::ShutDown);

    sup.send(receiver.address(), Greeting("after"));
    settle().await;
    assert!(events.try_recv().is_err(), "shut down actors receive nothing");
}

// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Request/response integration tests: round trips, synthetic timeouts,
//! explicit discards and state polling.

use arbor::{
    Actor, ActorContext, ActorState, Address, ErrorCode, ExtendedError,
    Handle, Payload, Request, Requestable, Response, StateRequest,
    Supervisor, SupervisorOptions, SystemContext,
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use std::time::Duration;

async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[derive(Debug)]
struct Echo(u32);

impl Payload for Echo {}

#[derive(Debug)]
struct EchoReply(u32);

impl Payload for EchoReply {}

impl Requestable for Echo {
    type Response = EchoReply;
}

struct Responder;

#[async_trait]
impl Actor for Responder {
    async fn on_initialize(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ExtendedError> {
        ctx.subscribe::<Request<Echo>>();
        Ok(())
    }
}

#[async_trait]
impl Handle<Request<Echo>> for Responder {
    async fn handle(
        &mut self,
        message: &Request<Echo>,
        ctx: &mut ActorContext<Self>,
    ) {
        ctx.reply::<Echo>(Ok(EchoReply(message.payload.0)));
    }
}

/// Subscribes for requests and drops them on the floor.
struct Mute;

#[async_trait]
impl Actor for Mute {
    async fn on_initialize(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ExtendedError> {
        ctx.subscribe::<Request<Echo>>();
        Ok(())
    }
}

#[async_trait]
impl Handle<Request<Echo>> for Mute {
    async fn handle(
        &mut self,
        _message: &Request<Echo>,
        _ctx: &mut ActorContext<Self>,
    ) {
    }
}

struct Requester {
    target: Address,
    timeout: Duration,
    discard: bool,
    probe: mpsc::UnboundedSender<Result<u32, ExtendedError>>,
}

#[async_trait]
impl Actor for Requester {
    async fn on_initialize(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ExtendedError> {
        ctx.subscribe::<Response<Echo>>();
        Ok(())
    }

    async fn on_start(&mut self, ctx: &mut ActorContext<Self>) {
        let id = ctx.request(&self.target, Echo(7)).send(self.timeout);
        if self.discard {
            ctx.discard_request(id);
        }
    }
}

#[async_trait]
impl Handle<Response<Echo>> for Requester {
    async fn handle(
        &mut self,
        message: &Response<Echo>,
        _ctx: &mut ActorContext<Self>,
    ) {
        let outcome = message
            .result
            .as_ref()
            .map(|reply| reply.0)
            .map_err(|error| error.clone());
        let _ = self.probe.send(outcome);
    }
}

struct Root;

#[async_trait]
impl Actor for Root {}

// Invariant 8: an echoing responder yields the original payload.
#[tokio::test]
async fn test_request_round_trip() {
    let system = SystemContext::new();
    let sup = Supervisor::create(Root, SupervisorOptions::default(), &system);
    let responder = sup.create_actor(Responder);
    settle().await;

    let (probe, mut events) = mpsc::unbounded_channel();
    let _requester = sup.create_actor(Requester {
        target: responder.address().clone(),
        timeout: Duration::from_secs(2),
        discard: false,
        probe,
    });
    settle().await;

    assert_eq!(events.recv().await.map(|r| r.unwrap()), Some(7));
    assert!(events.try_recv().is_err(), "exactly one completion expected");
}

// Invariant 1: a silent responder produces exactly one synthetic timeout.
#[tokio::test]
async fn test_request_timeout_is_synthesised_once() {
    let system = SystemContext::new();
    let sup = Supervisor::create(Root, SupervisorOptions::default(), &system);
    let mute = sup.create_actor(Mute);
    settle().await;

    let (probe, mut events) = mpsc::unbounded_channel();
    let _requester = sup.create_actor(Requester {
        target: mute.address().clone(),
        timeout: Duration::from_millis(100),
        discard: false,
        probe,
    });
    tokio::time::sleep(Duration::from_millis(600)).await;

    let outcome = events.recv().await.expect("timeout response expected");
    assert!(outcome
        .as_ref()
        .is_err_and(|e| e.is_code(ErrorCode::RequestTimeout)));
    assert!(events.try_recv().is_err(), "exactly one completion expected");
}

// Invariant 7: discarding while the timer is armed suppresses both the
// response and the timeout.
#[tokio::test]
async fn test_discard_suppresses_response_and_timeout() {
    let system = SystemContext::new();
    let sup = Supervisor::create(Root, SupervisorOptions::default(), &system);
    let responder = sup.create_actor(Responder);
    settle().await;

    let (probe, mut events) = mpsc::unbounded_channel();
    let _requester = sup.create_actor(Requester {
        target: responder.address().clone(),
        timeout: Duration::from_millis(100),
        discard: true,
        probe,
    });
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert!(
        events.try_recv().is_err(),
        "discarded requests complete silently"
    );
}

struct StatePoller {
    subject: Address,
    probe: mpsc::UnboundedSender<Result<ActorState, ExtendedError>>,
}

#[async_trait]
impl Actor for StatePoller {
    async fn on_initialize(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ExtendedError> {
        ctx.subscribe::<Response<StateRequest>>();
        Ok(())
    }

    async fn on_start(&mut self, ctx: &mut ActorContext<Self>) {
        let sup = ctx.supervisor();
        ctx.request(
            sup.address(),
            StateRequest {
                subject: self.subject.clone(),
            },
        )
        .send(Duration::from_secs(2));
    }
}

#[async_trait]
impl Handle<Response<StateRequest>> for StatePoller {
    async fn handle(
        &mut self,
        message: &Response<StateRequest>,
        _ctx: &mut ActorContext<Self>,
    ) {
        let outcome = message
            .result
            .as_ref()
            .map(|response| response.state)
            .map_err(|error| error.clone());
        let _ = self.probe.send(outcome);
    }
}

#[tokio::test]
async fn test_state_request_reports_operational_subject() {
    let system = SystemContext::new();
    let sup = Supervisor::create(Root, SupervisorOptions::default(), &system);
    let responder = sup.create_actor(Responder);
    settle().await;
    assert_eq!(responder.state(), ActorState::Operational);

    let (probe, mut events) = mpsc::unbounded_channel();
    let _poller = sup.create_actor(StatePoller {
        subject: responder.address().clone(),
        probe,
    });
    settle().await;

    assert_eq!(
        events.recv().await.map(|r| r.unwrap()),
        Some(ActorState::Operational)
    );
}

#[tokio::test]
async fn test_state_request_for_unknown_subject_fails() {
    let system = SystemContext::new();
    let sup = Supervisor::create(Root, SupervisorOptions::default(), &system);
    let unknown = sup.create_address();

    let (probe, mut events) = mpsc::unbounded_channel();
    let _poller = sup.create_actor(StatePoller {
        subject: unknown,
        probe,
    });
    settle().await;

    let outcome = events.recv().await.expect("response expected");
    assert!(outcome
        .as_ref()
        .is_err_and(|e| e.is_code(ErrorCode::UnknownService)));
}

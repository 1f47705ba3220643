// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Hierarchical supervising actor runtime
//!
//! This crate provides a hierarchical actor runtime: concurrent computations
//! are expressed as actors that communicate only by asynchronous messages
//! delivered to addresses, and their lifecycles are managed by supervisors
//! arranged in a tree.
//!
//! Three subsystems carry the weight:
//!
//! - the **dispatch fabric**: reference-counted message envelopes, per
//!   supervisor subscription tables, and local-vs-foreign forwarding so a
//!   handler always runs on the supervisor owning its actor;
//! - the **actor lifecycle**: a monotone state machine from `New` to
//!   `ShutDown`, driven by messages, with request/response correlation and
//!   timeouts, and a prestart gate so an actor cannot miss messages sent
//!   right after its start;
//! - the **child manager**: creation, an init barrier gating the
//!   supervisor's own readiness on its children, synchronized starts,
//!   policy-driven failure escalation and orderly shutdown cascades.
//!
//! Each supervisor is a single-threaded cooperative scheduler: its pump
//! processes one message at a time and handlers run to completion. Delivery
//! is datagram-like. FIFO holds per (source actor, destination address) on
//! one supervisor, and nothing more is promised across supervisors.
//!

mod actor;
mod address;
mod error;
mod handler;
mod message;
mod plugin;
mod prestarter;
mod request;
mod supervision;
mod supervisor;
mod system;

pub use actor::{Actor, ActorConfig, ActorContext, ActorRef, ActorState};
pub use address::Address;
pub use error::{ErrorCode, ErrorKind, ExtendedError, ShutdownCode};
pub use handler::{Handle, Handler, OwnerTag, SubscriptionPoint};
pub use message::{
    InitializeActor, InitializeConfirmation, Message, MessagePtr, Payload,
    Request, Requestable, Response, ShutdownConfirmation, ShutdownRequest,
    ShutdownTrigger, StartActor, StateRequest, StateResponse,
    SubscriptionConfirmation, UnsubscriptionConfirmation,
};
pub use plugin::{Plugin, ProcessingResult, Reactions};
pub use request::{RequestBuilder, RequestId};
pub use supervision::SupervisorPolicy;
pub use supervisor::{Supervisor, SupervisorOptions, SupervisorRef};
pub use system::{ErrorSink, SystemContext};

// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Messages
//!
//! The `message` module provides the message envelope and the payload model of
//! the runtime. A message is an immutable, reference-counted envelope carrying
//! a destination address, a payload type tag and the payload itself. Messages
//! are never mutated after construction and are identified by reference; the
//! runtime defines no payload equality.
//!
//! Payloads opt in through the [`Payload`] marker, the way actor messages do in
//! any typed mailbox. Request payloads additionally implement [`Requestable`]
//! to name their response payload; the runtime wraps them in [`Request`] and
//! [`Response`] envelopes that carry the correlation id and, on the response
//! side, a reference back to the original request.
//!
//! The module also defines the system payloads that drive actor lifecycles and
//! the subscription fabric. They travel through the same queues as user
//! payloads, which is what makes lifecycle traffic observable: any actor may
//! subscribe to another actor's address for `StartActor` or
//! `Request<InitializeActor>` and mirror it.

use crate::{
    actor::ActorState,
    address::Address,
    error::{ErrorCode, ExtendedError},
    handler::Handler,
    request::RequestId,
    supervision::ChildState,
};

use std::any::{Any, TypeId};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Marker trait for message payloads.
///
/// Implement it for every type that travels inside a message envelope:
///
/// ```ignore
/// #[derive(Debug, Clone)]
/// struct Tick(u64);
///
/// impl Payload for Tick {}
/// ```
pub trait Payload: Any + Send + Sync + 'static {}

/// A request payload and the response payload it is answered with.
pub trait Requestable: Payload {
    /// The payload type carried by the matching response.
    type Response: Payload;
}

/// Shared, immutable message envelope.
pub type MessagePtr = Arc<Message>;

/// An immutable envelope: destination address, payload type tag and payload.
///
/// Responses additionally carry the correlation id of the request they answer;
/// the requester's supervisor uses it to cancel the timeout timer and to drop
/// responses that arrive after a timeout or an explicit discard.
pub struct Message {
    destination: Address,
    tag: TypeId,
    correlation: Option<RequestId>,
    payload: Arc<dyn Any + Send + Sync>,
}

impl Message {
    /// Creates a message carrying the given payload.
    ///
    /// # Arguments
    ///
    /// * `destination` - The address the message is delivered to.
    /// * `payload` - The payload to carry.
    ///
    /// # Returns
    ///
    /// Returns the shared envelope.
    ///
    pub fn new<P: Payload>(destination: Address, payload: P) -> MessagePtr {
        Self::from_arc(destination, Arc::new(payload), None)
    }

    /// Creates a message from an already shared payload.
    pub(crate) fn from_arc<P: Payload>(
        destination: Address,
        payload: Arc<P>,
        correlation: Option<RequestId>,
    ) -> MessagePtr {
        Arc::new(Self {
            destination,
            tag: TypeId::of::<P>(),
            correlation,
            payload,
        })
    }

    /// Returns the destination address.
    ///
    /// # Returns
    ///
    /// Returns the address the message was sent to.
    ///
    pub fn destination(&self) -> &Address {
        &self.destination
    }

    /// Returns the payload type tag.
    ///
    /// # Returns
    ///
    /// Returns the type tag of the carried payload.
    ///
    pub fn tag(&self) -> TypeId {
        self.tag
    }

    /// Checks the payload type.
    ///
    /// # Returns
    ///
    /// Returns true if the payload is of type `P`.
    ///
    pub fn is<P: Payload>(&self) -> bool {
        self.tag == TypeId::of::<P>()
    }

    /// Accesses the payload.
    ///
    /// # Returns
    ///
    /// Returns the payload if it is of type `P`, `None` otherwise.
    ///
    pub fn payload<P: Payload>(&self) -> Option<&P> {
        self.payload.downcast_ref::<P>()
    }

    /// Returns a shared handle to the payload if it is of type `P`.
    pub(crate) fn payload_arc<P: Payload>(&self) -> Option<Arc<P>> {
        self.payload.clone().downcast::<P>().ok()
    }

    pub(crate) fn correlation(&self) -> Option<RequestId> {
        self.correlation
    }
}

/// A request envelope: payload plus correlation id and reply address.
pub struct Request<T: Requestable> {
    /// Correlation id, echoed by the matching response.
    pub id: RequestId,
    /// Where the response is delivered.
    pub reply_to: Address,
    /// The request payload.
    pub payload: T,
}

impl<T: Requestable> Payload for Request<T> {}

/// A response envelope: the outcome plus a reference to the original request.
pub struct Response<T: Requestable> {
    /// Correlation id of the request being answered.
    pub id: RequestId,
    /// The original request.
    pub request: Arc<Request<T>>,
    /// The outcome: the response payload, or the error that ended the
    /// request (synthetic `RequestTimeout` included).
    pub result: Result<T::Response, ExtendedError>,
}

impl<T: Requestable> Payload for Response<T> {}

/// Builds and delivers the response for a request envelope.
///
/// No-op when the message is not a `Request<T>`; exactly one response per
/// request is the correlator's job, not this function's.
pub(crate) fn respond<T: Requestable>(
    request: &MessagePtr,
    result: Result<T::Response, ExtendedError>,
) {
    let Some(req) = request.payload_arc::<Request<T>>() else {
        return;
    };
    let id = req.id;
    let reply_to = req.reply_to.clone();
    let response = Response::<T> {
        id,
        request: req,
        result,
    };
    reply_to.enqueue(Message::from_arc(
        reply_to.clone(),
        Arc::new(response),
        Some(id),
    ));
}

/// Synthesises the timeout response for a request envelope.
pub(crate) fn timeout_response<T: Requestable>(
    request: Arc<Request<T>>,
) -> MessagePtr {
    let id = request.id;
    let reply_to = request.reply_to.clone();
    let response = Response::<T> {
        id,
        request,
        result: Err(ExtendedError::code(ErrorCode::RequestTimeout)),
    };
    Message::from_arc(reply_to, Arc::new(response), Some(id))
}

// --- Lifecycle payloads ----------------------------------------------------

/// Asks an actor to initialise. Answered with [`InitializeConfirmation`]
/// once every init gate has cleared.
pub struct InitializeActor {
    /// The actor being initialised; useful for observing initialisation from
    /// another actor.
    pub address: Address,
}

impl Payload for InitializeActor {}

/// Confirms a successful initialisation.
pub struct InitializeConfirmation;

impl Payload for InitializeConfirmation {}

impl Requestable for InitializeActor {
    type Response = InitializeConfirmation;
}

/// Tells an initialised actor to become operational.
pub struct StartActor {
    /// The actor being started.
    pub address: Address,
}

impl Payload for StartActor {}

/// Asks a supervisor to shut one of its actors down.
pub struct ShutdownTrigger {
    /// The actor to shut down; may be the supervisor itself.
    pub address: Address,
    /// Why the shutdown was requested.
    pub reason: ExtendedError,
}

impl Payload for ShutdownTrigger {}

/// Asks an actor to shut down. Answered with [`ShutdownConfirmation`] once
/// the actor (and, for a supervisor, its whole subtree) has wound down.
pub struct ShutdownRequest {
    /// The actor being shut down.
    pub address: Address,
    /// The reason assigned to the shutdown; first assignment wins.
    pub reason: ExtendedError,
}

impl Payload for ShutdownRequest {}

/// Confirms a completed shutdown.
pub struct ShutdownConfirmation;

impl Payload for ShutdownConfirmation {}

impl Requestable for ShutdownRequest {
    type Response = ShutdownConfirmation;
}

/// Asks a supervisor for the lifecycle state of one of its actors.
pub struct StateRequest {
    /// The actor whose state is queried.
    pub subject: Address,
}

impl Payload for StateRequest {}

/// Answers a [`StateRequest`].
pub struct StateResponse {
    /// The subject's lifecycle state at the time the supervisor answered.
    pub state: ActorState,
}

impl Payload for StateResponse {}

impl Requestable for StateRequest {
    type Response = StateResponse;
}

/// Registers a freshly constructed actor with its supervisor. Internal
/// housekeeping; the child record rides along in the slot.
pub(crate) struct CreateActor {
    pub slot: Mutex<Option<ChildState>>,
    pub init_timeout: Duration,
}

impl Payload for CreateActor {}

/// Re-drives a held init gate.
pub(crate) struct InitCheck {
    pub address: Address,
}

impl Payload for InitCheck {}

/// Re-drives a held shutdown gate.
pub(crate) struct ShutdownCheck {
    pub address: Address,
}

impl Payload for ShutdownCheck {}

// --- Fabric payloads -------------------------------------------------------

/// Forwards the delivery of a message to the supervisor owning the handler.
///
/// Addresses are always dispatched by their owning supervisor; when a
/// subscribed handler lives on another supervisor, the dispatching side wraps
/// the original message and the handler into a `HandlerCall` and forwards it,
/// so the handler still runs on its owner's serial pump.
pub(crate) struct HandlerCall {
    pub message: MessagePtr,
    pub handler: Handler,
}

impl Payload for HandlerCall {}

/// A subscription submitted by a local actor to its own supervisor.
pub(crate) struct SubscriptionRequest {
    pub point: crate::handler::SubscriptionPoint,
    pub handler: Handler,
}

impl Payload for SubscriptionRequest {}

/// A subscription forwarded to the supervisor owning the target address.
pub(crate) struct ExternalSubscription {
    pub point: crate::handler::SubscriptionPoint,
    pub handler: Handler,
}

impl Payload for ExternalSubscription {}

/// Confirms that a handler is reachable from the subscription table.
pub struct SubscriptionConfirmation {
    /// The confirmed subscription point.
    pub point: crate::handler::SubscriptionPoint,
}

impl Payload for SubscriptionConfirmation {}

/// An unsubscription submitted by a local actor to its own supervisor.
pub(crate) struct UnsubscriptionRequest {
    pub point: crate::handler::SubscriptionPoint,
}

impl Payload for UnsubscriptionRequest {}

/// An unsubscription forwarded to the supervisor owning the target address.
pub(crate) struct ExternalUnsubscription {
    pub point: crate::handler::SubscriptionPoint,
}

impl Payload for ExternalUnsubscription {}

/// The foreign supervisor's acknowledgement of an external unsubscription.
pub(crate) struct CommitUnsubscription {
    pub point: crate::handler::SubscriptionPoint,
}

impl Payload for CommitUnsubscription {}

/// Confirms that a handler is no longer reachable from any table.
pub struct UnsubscriptionConfirmation {
    /// The revoked subscription point.
    pub point: crate::handler::SubscriptionPoint,
}

impl Payload for UnsubscriptionConfirmation {}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::address::MessageRoute;

    use tokio::sync::mpsc;

    #[derive(Debug, PartialEq)]
    struct Ping(u32);

    impl Payload for Ping {}

    #[derive(Debug, PartialEq)]
    struct Pong(u32);

    impl Payload for Pong {}

    impl Requestable for Ping {
        type Response = Pong;
    }

    fn address() -> (Address, mpsc::UnboundedReceiver<MessagePtr>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let address = Address::new(MessageRoute {
            supervisor_id: 1,
            sender,
        });
        (address, receiver)
    }

    #[test]
    fn test_payload_tag_mismatch_is_none() {
        let (addr, _rx) = address();
        let message = Message::new(addr, Ping(3));
        assert!(message.is::<Ping>());
        assert!(!message.is::<Pong>());
        assert_eq!(message.payload::<Ping>().map(|p| p.0), Some(3));
        assert!(message.payload::<Pong>().is_none());
    }

    #[tokio::test]
    async fn test_respond_routes_to_reply_address() {
        let (reply_to, mut rx) = address();
        let (target, _target_rx) = address();
        let request = Arc::new(Request::<Ping> {
            id: 42,
            reply_to,
            payload: Ping(7),
        });
        let envelope = Message::from_arc(target, request, None);
        respond::<Ping>(&envelope, Ok(Pong(7)));

        let delivered = rx.recv().await.expect("response expected");
        assert_eq!(delivered.correlation(), Some(42));
        let response = delivered.payload::<Response<Ping>>().unwrap();
        assert_eq!(response.id, 42);
        assert_eq!(response.request.payload, Ping(7));
        assert_eq!(response.result.as_ref().unwrap(), &Pong(7));
    }

    #[test]
    fn test_timeout_response_carries_request() {
        let (reply_to, _rx) = address();
        let request = Arc::new(Request::<Ping> {
            id: 9,
            reply_to,
            payload: Ping(1),
        });
        let message = timeout_response(request);
        let response = message.payload::<Response<Ping>>().unwrap();
        assert_eq!(response.id, 9);
        assert!(response
            .result
            .as_ref()
            .is_err_and(|e| e.is_code(ErrorCode::RequestTimeout)));
    }
}

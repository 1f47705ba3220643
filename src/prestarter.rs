// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Prestart gate
//!
//! The prestarter holds an actor's init open until a declared set of
//! subscription points has been confirmed. Without it, an actor that
//! subscribes during `on_initialize` could be started before the
//! subscriptions land in the tables, and messages sent to it right away
//! would be lost. Tracking the points closes the window: init is only
//! confirmed once every tracked subscription is live, so nothing sent after
//! the actor's start can miss it.

use crate::{
    actor::TrackedPoint,
    handler::SubscriptionPoint,
    plugin::{Plugin, ProcessingResult, Reactions},
};

/// Plugin suspending init until every tracked subscription is confirmed.
pub(crate) struct Prestarter {
    tracked: Vec<TrackedPoint>,
    continue_init: bool,
}

impl Prestarter {
    pub(crate) fn new(tracked: Vec<TrackedPoint>) -> Self {
        Self {
            tracked,
            continue_init: false,
        }
    }
}

impl Plugin for Prestarter {
    fn activate(&mut self, reactions: &mut Reactions) {
        reactions.init = true;
        reactions.subscription = true;
        if self.tracked.is_empty() {
            reactions.init = false;
            reactions.subscription = false;
        }
    }

    fn handle_init(&mut self) -> bool {
        if self.tracked.is_empty() {
            return true;
        }
        self.continue_init = true;
        false
    }

    fn handle_subscription(
        &mut self,
        point: &SubscriptionPoint,
    ) -> ProcessingResult {
        let before = self.tracked.len();
        self.tracked.retain(|tracked| {
            tracked.address != point.address || tracked.tag != point.tag
        });
        if self.tracked.is_empty() {
            self.continue_init = false;
            return ProcessingResult::Finished;
        }
        if self.tracked.len() != before {
            ProcessingResult::Consumed
        } else {
            ProcessingResult::Ignored
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::address::{Address, MessageRoute};
    use crate::handler::OwnerTag;

    use tokio::sync::mpsc;

    use std::any::TypeId;

    struct Ready;

    impl crate::message::Payload for Ready {}

    fn address() -> Address {
        let (sender, receiver) = mpsc::unbounded_channel();
        std::mem::forget(receiver);
        Address::new(MessageRoute {
            supervisor_id: 1,
            sender,
        })
    }

    fn point(address: &Address, owner: &Address) -> SubscriptionPoint {
        SubscriptionPoint {
            address: address.clone(),
            owner: owner.clone(),
            tag: TypeId::of::<Ready>(),
            owner_tag: OwnerTag::Supervisor,
        }
    }

    #[test]
    fn test_empty_tracked_set_disarms() {
        let mut reactions = Reactions::default();
        let mut prestarter = Prestarter::new(Vec::new());
        prestarter.activate(&mut reactions);
        assert!(!reactions.init);
        assert!(!reactions.subscription);
        assert!(prestarter.handle_init());
    }

    #[test]
    fn test_init_held_until_tracked_point_confirmed() {
        let target = address();
        let owner = address();
        let mut reactions = Reactions::default();
        let mut prestarter = Prestarter::new(vec![TrackedPoint {
            address: target.clone(),
            tag: TypeId::of::<Ready>(),
        }]);
        prestarter.activate(&mut reactions);
        assert!(reactions.init);
        assert!(!prestarter.handle_init());

        let result = prestarter.handle_subscription(&point(&target, &owner));
        assert_eq!(result, ProcessingResult::Finished);
        assert!(prestarter.handle_init());
    }

    #[test]
    fn test_unrelated_point_is_ignored() {
        let target = address();
        let other = address();
        let owner = address();
        let mut reactions = Reactions::default();
        let mut prestarter = Prestarter::new(vec![TrackedPoint {
            address: target,
            tag: TypeId::of::<Ready>(),
        }]);
        prestarter.activate(&mut reactions);
        let result = prestarter.handle_subscription(&point(&other, &owner));
        assert_eq!(result, ProcessingResult::Ignored);
        assert!(!prestarter.handle_init());
    }
}

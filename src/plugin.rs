// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Lifecycle plugins
//!
//! Plugins are ordered lifecycle participants attached to an actor during
//! activation. Each plugin arms a set of *reactions*, the lifecycle phases it
//! wants to observe, and may gate the init and shutdown transitions by
//! returning `false` from the corresponding hook. A held gate is re-driven by
//! the event the plugin was waiting for (a subscription confirmation, a child
//! reaching a state) or explicitly via `init_continue`/`shutdown_continue` on
//! the actor context.

use crate::handler::SubscriptionPoint;

/// The lifecycle phases a plugin can observe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Reactions {
    /// Gate the init transition.
    pub init: bool,
    /// Observe subscription confirmations.
    pub subscription: bool,
    /// Observe the start transition.
    pub start: bool,
    /// Gate the shutdown transition.
    pub shutdown: bool,
}

/// Outcome of offering an event to a plugin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessingResult {
    /// Not of interest to this plugin.
    Ignored,
    /// Consumed; the plugin stays armed.
    Consumed,
    /// Consumed and the plugin's contract is complete; its reactions are
    /// disarmed.
    Finished,
}

/// An ordered lifecycle hook chained onto an actor.
pub trait Plugin: Send + Sync {
    /// Called once during activation. Arm the reactions the plugin needs.
    fn activate(&mut self, reactions: &mut Reactions);

    /// Init gate: return `true` to let init complete, `false` to hold it.
    /// A holding plugin re-drives the gate later through `init_continue`.
    fn handle_init(&mut self) -> bool {
        true
    }

    /// Offered every confirmed subscription point of the owning actor while
    /// the `subscription` reaction is armed.
    fn handle_subscription(
        &mut self,
        _point: &SubscriptionPoint,
    ) -> ProcessingResult {
        ProcessingResult::Ignored
    }

    /// Observes the start transition.
    fn handle_start(&mut self) {}

    /// Shutdown gate: return `true` to let shutdown complete, `false` to
    /// hold it. A holding plugin re-drives the gate through
    /// `shutdown_continue`.
    fn handle_shutdown(&mut self) -> bool {
        true
    }
}

/// A plugin with its armed reactions, as stored in an actor's chain.
pub(crate) struct PluginSlot {
    pub plugin: Box<dyn Plugin>,
    pub reactions: Reactions,
}

impl PluginSlot {
    pub(crate) fn activate(plugin: Box<dyn Plugin>) -> Self {
        let mut slot = Self {
            plugin,
            reactions: Reactions::default(),
        };
        slot.plugin.activate(&mut slot.reactions);
        slot
    }
}

use std::fmt;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use tokio::sync::watch;

use crate::error::AppError;

/// The lifecycle states of a streaming engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// The engine has been built but not started.
    Created,
    /// The engine is restoring its state and assigning its source topics.
    Rebalancing,
    /// The engine is processing records.
    Running,
    /// The engine is running, but does not fetch records.
    Paused,
    /// The engine hit a fatal error and stopped processing.
    Error,
    /// The engine has shut down. This state is terminal.
    NotRunning,
}

impl EngineState {
    /// Check if a transition from this state to the given state is permitted.
    pub fn can_transition_to(self, next: EngineState) -> bool {
        use EngineState::*;
        matches!(
            (self, next),
            (Created, Rebalancing | Error | NotRunning)
                | (Rebalancing, Running | Paused | Error | NotRunning)
                | (Running, Rebalancing | Paused | Error | NotRunning)
                | (Paused, Running | Rebalancing | Error | NotRunning)
                | (Error, NotRunning)
        )
    }

    /// Check if the engine is live in this state, owning its local state directory.
    pub fn is_active(self) -> bool {
        matches!(self, EngineState::Rebalancing | EngineState::Running | EngineState::Paused)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Created => "CREATED",
            EngineState::Rebalancing => "REBALANCING",
            EngineState::Running => "RUNNING",
            EngineState::Paused => "PAUSED",
            EngineState::Error => "ERROR",
            EngineState::NotRunning => "NOT_RUNNING",
        };
        f.write_str(name)
    }
}

/// An observer of engine state transitions.
///
/// Listeners are invoked synchronously on the task applying the transition, and must not block.
pub trait StateListener: Send + Sync + 'static {
    fn on_change(&self, new_state: EngineState, old_state: EngineState);
}

/// The shared state of an engine, along with its registered listener.
pub(super) struct StateCell {
    state: Mutex<EngineState>,
    listener: Mutex<Option<Arc<dyn StateListener>>>,
    /// A channel used for communicating the engine's current state.
    signal: watch::Sender<EngineState>,
    signal_rx: watch::Receiver<EngineState>,
}

impl StateCell {
    pub fn new() -> Self {
        let (signal, signal_rx) = watch::channel(EngineState::Created);
        Self {
            state: Mutex::new(EngineState::Created),
            listener: Mutex::new(None),
            signal,
            signal_rx,
        }
    }

    pub fn get(&self) -> EngineState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.signal_rx.clone()
    }

    /// Register the listener of this cell, which is only permitted before the engine starts.
    pub fn set_listener(&self, listener: Arc<dyn StateListener>) -> Result<()> {
        let state = self.get();
        if state != EngineState::Created {
            bail!(AppError::IllegalState(format!("state listener may only be set while CREATED, engine is {}", state)));
        }
        let mut slot = match self.listener.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(listener);
        Ok(())
    }

    /// Transition to the given state, notifying the listener.
    ///
    /// Returns `false` when the transition was not applied, either because the cell is already in
    /// the given state or because the transition is not permitted.
    pub fn transition(&self, next: EngineState) -> bool {
        let old = {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            let old = *state;
            if old == next {
                return false;
            }
            if !old.can_transition_to(next) {
                tracing::warn!(%old, %next, "rejecting invalid engine state transition");
                return false;
            }
            *state = next;
            old
        };

        tracing::debug!(new_state = %next, old_state = %old, "engine state transition");
        let _ = self.signal.send(next);
        let listener = match self.listener.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Some(listener) = listener {
            listener.on_change(next, old);
        }
        true
    }
}

//! Component lifecycle state machine.
//!
//! Every schedulable component (algorithm, tool, service, the pool and the
//! scheduler themselves) moves through the same four states:
//!
//! ```text
//! OFFLINE --configure--> CONFIGURED --initialize--> INITIALIZED --start--> RUNNING
//!         <--terminate--            <--finalize--               <--stop--
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Settled lifecycle state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    Offline,
    Configured,
    Initialized,
    Running,
}

impl State {
    pub const ALL: [State; 4] = [
        State::Offline,
        State::Configured,
        State::Initialized,
        State::Running,
    ];

    fn rank(self) -> u8 {
        match self {
            State::Offline => 0,
            State::Configured => 1,
            State::Initialized => 2,
            State::Running => 3,
        }
    }

    /// The single legal transition that moves one step from `self` towards
    /// `target`, or `None` once there.
    pub fn step_towards(self, target: State) -> Option<Transition> {
        use std::cmp::Ordering::*;
        match (self, target.rank().cmp(&self.rank())) {
            (_, Equal) => None,
            (State::Offline, Greater) => Some(Transition::Configure),
            (State::Configured, Greater) => Some(Transition::Initialize),
            (State::Initialized, Greater) => Some(Transition::Start),
            (State::Running, _) => Some(Transition::Stop),
            (State::Initialized, Less) => Some(Transition::Finalize),
            (State::Configured, Less) => Some(Transition::Terminate),
            (State::Offline, Less) => None,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Offline => "OFFLINE",
            State::Configured => "CONFIGURED",
            State::Initialized => "INITIALIZED",
            State::Running => "RUNNING",
        };
        f.write_str(s)
    }
}

/// A requested move between two adjacent states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    Configure,
    Initialize,
    Start,
    Stop,
    Finalize,
    Terminate,
}

impl Transition {
    pub const ALL: [Transition; 6] = [
        Transition::Configure,
        Transition::Initialize,
        Transition::Start,
        Transition::Stop,
        Transition::Finalize,
        Transition::Terminate,
    ];
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Transition::Configure => "CONFIGURE",
            Transition::Initialize => "INITIALIZE",
            Transition::Start => "START",
            Transition::Stop => "STOP",
            Transition::Finalize => "FINALIZE",
            Transition::Terminate => "TERMINATE",
        };
        f.write_str(s)
    }
}

/// Compute the state reached by applying `transition` to `state`.
///
/// Fails with [`CoreError::InvalidTransition`] for every pair outside the
/// six legal edges; there is no silent no-op.
pub fn change_state(transition: Transition, state: State) -> Result<State, CoreError> {
    use State::*;
    use Transition::*;

    match (transition, state) {
        (Configure, Offline) => Ok(Configured),
        (Initialize, Configured) => Ok(Initialized),
        (Start, Initialized) => Ok(Running),
        (Stop, Running) => Ok(Initialized),
        (Finalize, Initialized) => Ok(Configured),
        (Terminate, Configured) => Ok(Offline),
        _ => Err(CoreError::InvalidTransition { transition, state }),
    }
}

/// Current and target state of one component.
///
/// While a transition is being applied `target_state()` differs from
/// `state()`; once it settles (or is aborted) both agree again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifecycle {
    state: State,
    target: State,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: State::Offline,
            target: State::Offline,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn target_state(&self) -> State {
        self.target
    }

    /// True when no transition is in flight.
    pub fn is_settled(&self) -> bool {
        self.state == self.target
    }

    /// Start a transition, recording its target. Call [`commit`](Self::commit)
    /// or [`abort`](Self::abort) afterwards.
    pub fn begin(&mut self, transition: Transition) -> Result<State, CoreError> {
        if !self.is_settled() {
            return Err(CoreError::TransitionInProgress {
                state: self.state,
                target: self.target,
            });
        }
        let target = change_state(transition, self.state)?;
        self.target = target;
        Ok(target)
    }

    pub fn commit(&mut self) {
        self.state = self.target;
    }

    pub fn abort(&mut self) {
        self.target = self.state;
    }

    /// Run `hook` as the body of `transition`. The new state is committed only
    /// if the hook succeeds.
    pub fn apply<E, F>(&mut self, transition: Transition, hook: F) -> Result<State, E>
    where
        E: From<CoreError>,
        F: FnOnce(State) -> Result<(), E>,
    {
        let target = self.begin(transition)?;
        match hook(target) {
            Ok(()) => {
                self.commit();
                Ok(target)
            }
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }
}

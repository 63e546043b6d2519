use thiserror::Error;

use crate::state::{State, Transition};

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid transition {transition} from state {state}")]
    InvalidTransition { transition: Transition, state: State },

    #[error("transition to {target} already in progress (current state {state})")]
    TransitionInProgress { state: State, target: State },

    #[error("concurrency flags already initialized")]
    FlagsAlreadySet,

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}

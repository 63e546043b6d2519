pub mod config;
pub mod context;
pub mod error;
pub mod flags;
pub mod state;

pub use config::{AlgorithmOverride, DataSection, FrameworkConfig, SchedulerSection, load_dotenv};
pub use context::{
    ContextGuard, EventContext, EventId, INVALID_EVENT, INVALID_SLOT, current_context,
    set_current_context,
};
pub use error::CoreError;
pub use flags::ConcurrencyFlags;
pub use state::{Lifecycle, State, Transition, change_state};

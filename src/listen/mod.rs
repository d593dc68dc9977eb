//! Listening and dispatch
//!
//! Wake phrase matching, the trigger state machine, and the bounded
//! command buffer. The audio side lives in [`crate::audio`].

mod commands;
mod dispatcher;
mod matcher;
mod state;

pub use commands::CommandBuffer;
pub use dispatcher::TriggerDispatcher;
pub use matcher::{PhraseMatch, WakeWordMatcher};
pub use state::{ListenState, SharedListenState, TriggerKind};

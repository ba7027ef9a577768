//! Visibility Module
//!
//! Observes foreground/background and focus changes and decides which of
//! them may trigger a refresh.

mod controller;
mod signal;

pub use controller::{
    Observation, VisibilityController, VisibilityEvent, VisibilityHandler, VisibilityOptions,
    VisibilityState,
};
pub use signal::{ChannelSignalSource, EnvSignal, SignalSender, SignalSource};

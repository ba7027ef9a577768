//! Signal Source Module
//!
//! Environment signals (foreground, background, focus, blur, shutdown) behind
//! an injectable source.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::visibility::VisibilityState;

// == Environment Signal ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvSignal {
    Foreground,
    Background,
    Focus,
    Blur,
    Shutdown,
}

// == Signal Source ==
/// Where visibility and focus changes come from.
#[async_trait]
pub trait SignalSource: Send {
    /// State of the host at registration time.
    fn initial_state(&self) -> VisibilityState;

    /// Next signal, or None once the host stops reporting.
    async fn next_signal(&mut self) -> Option<EnvSignal>;
}

/// Sending half paired with a [`ChannelSignalSource`].
pub type SignalSender = mpsc::UnboundedSender<EnvSignal>;

// == Channel Signal Source ==
/// Signal source fed through a channel by the host (or a test).
#[derive(Debug)]
pub struct ChannelSignalSource {
    initial: VisibilityState,
    signals: mpsc::UnboundedReceiver<EnvSignal>,
}

impl ChannelSignalSource {
    pub fn new(initial: VisibilityState) -> (SignalSender, Self) {
        let (sender, signals) = mpsc::unbounded_channel();
        (sender, Self { initial, signals })
    }
}

#[async_trait]
impl SignalSource for ChannelSignalSource {
    fn initial_state(&self) -> VisibilityState {
        self.initial
    }

    async fn next_signal(&mut self) -> Option<EnvSignal> {
        self.signals.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_source_delivers_in_order() {
        let (sender, mut source) = ChannelSignalSource::new(VisibilityState::FOREGROUND);

        sender.send(EnvSignal::Blur).unwrap();
        sender.send(EnvSignal::Focus).unwrap();
        drop(sender);

        assert_eq!(source.initial_state(), VisibilityState::FOREGROUND);
        assert_eq!(source.next_signal().await, Some(EnvSignal::Blur));
        assert_eq!(source.next_signal().await, Some(EnvSignal::Focus));
        assert_eq!(source.next_signal().await, None);
    }
}

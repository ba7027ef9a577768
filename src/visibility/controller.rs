//! Visibility Controller Module
//!
//! Two-axis state machine (visible/hidden, focused/blurred) with throttled
//! transitions and opt-in foreground callbacks. A transition held back by the
//! throttle is applied once its window closes, unless a later signal
//! cancels it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::config::Config;
use crate::visibility::{EnvSignal, SignalSource};

// == Visibility State ==
/// Current foreground/focus state of the host process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VisibilityState {
    pub visible: bool,
    pub focused: bool,
}

impl VisibilityState {
    pub const FOREGROUND: VisibilityState = VisibilityState {
        visible: true,
        focused: true,
    };

    pub const BACKGROUND: VisibilityState = VisibilityState {
        visible: false,
        focused: false,
    };
}

// == Visibility Event ==
/// Callback kinds delivered to handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VisibilityEvent {
    Visible,
    Hidden,
    Focus,
    Blur,
    BeforeUnload,
}

/// What the controller did with one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Genuine transition, handlers called
    Fired(VisibilityEvent),
    /// Genuine transition, handlers skipped because foreground refresh is off
    Suppressed(VisibilityEvent),
    /// Too close to the previous transition on the same axis; held until
    /// the window closes
    Throttled,
    /// Signal did not change the state
    Unchanged,
}

// == Visibility Handler ==
/// Receives visibility callbacks. Implemented for plain closures.
pub trait VisibilityHandler: Send + Sync {
    fn handle(&self, event: VisibilityEvent);
}

impl<F> VisibilityHandler for F
where
    F: Fn(VisibilityEvent) + Send + Sync,
{
    fn handle(&self, event: VisibilityEvent) {
        self(event)
    }
}

// == Options ==
#[derive(Debug, Clone, Copy)]
pub struct VisibilityOptions {
    /// Minimum spacing between accepted transitions on one axis
    pub throttle: Duration,
    /// When true, returning to the foreground or regaining focus does not
    /// call handlers
    pub prevent_auto_refresh: bool,
}

impl VisibilityOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            throttle: config.visibility_throttle(),
            ..Self::default()
        }
    }

    pub fn allow_auto_refresh(mut self) -> Self {
        self.prevent_auto_refresh = false;
        self
    }
}

impl Default for VisibilityOptions {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(1000),
            prevent_auto_refresh: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Axis {
    Visibility,
    Focus,
}

// == Visibility Controller ==
pub struct VisibilityController {
    state: VisibilityState,
    options: VisibilityOptions,
    clock: SharedClock,
    last_visibility_change: Option<u64>,
    last_focus_change: Option<u64>,
    pending_visibility: Option<EnvSignal>,
    pending_focus: Option<EnvSignal>,
    handlers: Vec<Arc<dyn VisibilityHandler>>,
    publisher: watch::Sender<VisibilityState>,
}

impl fmt::Debug for VisibilityController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisibilityController")
            .field("state", &self.state)
            .field("options", &self.options)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl VisibilityController {
    /// Creates a controller whose initial state is read from `source`.
    pub fn register(source: &dyn SignalSource, options: VisibilityOptions, clock: SharedClock) -> Self {
        Self::with_state(source.initial_state(), options, clock)
    }

    pub fn with_state(initial: VisibilityState, options: VisibilityOptions, clock: SharedClock) -> Self {
        let (publisher, _) = watch::channel(initial);
        Self {
            state: initial,
            options,
            clock,
            last_visibility_change: None,
            last_focus_change: None,
            pending_visibility: None,
            pending_focus: None,
            handlers: Vec::new(),
            publisher,
        }
    }

    pub fn add_handler(&mut self, handler: Arc<dyn VisibilityHandler>) {
        self.handlers.push(handler);
    }

    pub fn state(&self) -> VisibilityState {
        self.state
    }

    /// Receiver that tracks every accepted transition.
    pub fn subscribe(&self) -> watch::Receiver<VisibilityState> {
        self.publisher.subscribe()
    }

    // == Observe ==
    /// Applies one environment signal.
    pub fn observe(&mut self, signal: EnvSignal) -> Observation {
        self.apply(signal, true)
    }

    /// Applies the transitions held back by the throttle, without waiting
    /// for their windows to close.
    pub fn apply_pending(&mut self) -> Vec<Observation> {
        [self.pending_visibility.take(), self.pending_focus.take()]
            .into_iter()
            .flatten()
            .map(|signal| self.apply(signal, false))
            .collect()
    }

    /// Time left until the earliest held-back transition may be applied.
    pub fn pending_delay(&self) -> Option<Duration> {
        let now = self.clock.now_ms();
        let throttle_ms = self.options.throttle.as_millis() as u64;
        [
            (self.pending_visibility, self.last_visibility_change),
            (self.pending_focus, self.last_focus_change),
        ]
        .into_iter()
        .filter(|(pending, _)| pending.is_some())
        .map(|(_, last)| last.map_or(0, |last| (last + throttle_ms).saturating_sub(now)))
        .min()
        .map(Duration::from_millis)
    }

    fn apply(&mut self, signal: EnvSignal, throttled: bool) -> Observation {
        let (axis, target, event) = match signal {
            EnvSignal::Shutdown => {
                self.dispatch(VisibilityEvent::BeforeUnload);
                return Observation::Fired(VisibilityEvent::BeforeUnload);
            }
            EnvSignal::Foreground => (Axis::Visibility, true, VisibilityEvent::Visible),
            EnvSignal::Background => (Axis::Visibility, false, VisibilityEvent::Hidden),
            EnvSignal::Focus => (Axis::Focus, true, VisibilityEvent::Focus),
            EnvSignal::Blur => (Axis::Focus, false, VisibilityEvent::Blur),
        };

        let (current, last, pending) = match axis {
            Axis::Visibility => (
                self.state.visible,
                &mut self.last_visibility_change,
                &mut self.pending_visibility,
            ),
            Axis::Focus => (self.state.focused, &mut self.last_focus_change, &mut self.pending_focus),
        };
        // The latest signal on an axis replaces anything held back before it
        *pending = None;
        if current == target {
            return Observation::Unchanged;
        }

        let now = self.clock.now_ms();
        let throttle_ms = self.options.throttle.as_millis() as u64;
        if throttled {
            if let Some(previous) = *last {
                if now.saturating_sub(previous) < throttle_ms {
                    debug!(?signal, "Visibility transition throttled");
                    *pending = Some(signal);
                    return Observation::Throttled;
                }
            }
        }
        *last = Some(now);

        match axis {
            Axis::Visibility => self.state.visible = target,
            Axis::Focus => self.state.focused = target,
        }
        self.publisher.send_replace(self.state);

        // Coming back never triggers callbacks unless explicitly allowed
        if target && self.options.prevent_auto_refresh {
            debug!(?event, "Foreground callback suppressed");
            return Observation::Suppressed(event);
        }

        self.dispatch(event);
        Observation::Fired(event)
    }

    // == Run ==
    /// Consumes signals until the source ends or asks for shutdown. Held
    /// back transitions are applied when their throttle window closes.
    pub async fn run<S: SignalSource>(mut self, mut source: S) {
        info!(state = ?self.state, "Visibility controller started");
        loop {
            let next = match self.pending_delay() {
                Some(delay) => {
                    tokio::select! {
                        signal = source.next_signal() => signal,
                        _ = tokio::time::sleep(delay) => {
                            self.apply_pending();
                            continue;
                        }
                    }
                }
                None => source.next_signal().await,
            };

            match next {
                Some(EnvSignal::Shutdown) => {
                    self.observe(EnvSignal::Shutdown);
                    break;
                }
                Some(signal) => {
                    self.observe(signal);
                }
                None => break,
            }
        }
        info!("Visibility controller stopped");
    }

    /// Runs the controller on its own task.
    pub fn spawn<S: SignalSource + 'static>(self, source: S) -> JoinHandle<()> {
        tokio::spawn(self.run(source))
    }

    fn dispatch(&self, event: VisibilityEvent) {
        for handler in &self.handlers {
            handler.handle(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::visibility::ChannelSignalSource;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<VisibilityEvent>>>, Arc<dyn VisibilityHandler>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: Arc<dyn VisibilityHandler> =
            Arc::new(move |event: VisibilityEvent| sink.lock().unwrap().push(event));
        (seen, handler)
    }

    fn controller(initial: VisibilityState, options: VisibilityOptions) -> (VisibilityController, ManualClock, Arc<Mutex<Vec<VisibilityEvent>>>) {
        let clock = ManualClock::new(0);
        let mut controller = VisibilityController::with_state(initial, options, Arc::new(clock.clone()));
        let (seen, handler) = recorder();
        controller.add_handler(handler);
        (controller, clock, seen)
    }

    #[test]
    fn test_foreground_suppressed_by_default() {
        let (mut controller, clock, seen) = controller(VisibilityState::FOREGROUND, VisibilityOptions::default());

        assert_eq!(controller.observe(EnvSignal::Background), Observation::Fired(VisibilityEvent::Hidden));
        clock.advance(5_000);
        assert_eq!(
            controller.observe(EnvSignal::Foreground),
            Observation::Suppressed(VisibilityEvent::Visible)
        );

        assert_eq!(*seen.lock().unwrap(), vec![VisibilityEvent::Hidden]);
        assert!(controller.state().visible);
    }

    #[test]
    fn test_foreground_fires_when_allowed() {
        let options = VisibilityOptions::default().allow_auto_refresh();
        let (mut controller, clock, seen) = controller(VisibilityState::BACKGROUND, options);

        controller.observe(EnvSignal::Foreground);
        clock.advance(100);
        // Same state again is not a transition
        controller.observe(EnvSignal::Foreground);

        assert_eq!(*seen.lock().unwrap(), vec![VisibilityEvent::Visible]);
    }

    #[test]
    fn test_rapid_toggles_are_throttled() {
        let options = VisibilityOptions {
            throttle: Duration::from_millis(1_000),
            prevent_auto_refresh: false,
        };
        let (mut controller, clock, seen) = controller(VisibilityState::FOREGROUND, options);

        controller.observe(EnvSignal::Background);
        for _ in 0..10 {
            clock.advance(50);
            controller.observe(EnvSignal::Foreground);
            clock.advance(50);
            controller.observe(EnvSignal::Background);
        }
        assert!(!controller.state().visible);
        clock.advance(1_000);
        controller.observe(EnvSignal::Foreground);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![VisibilityEvent::Hidden, VisibilityEvent::Visible]
        );
    }

    #[test]
    fn test_throttled_transition_applies_after_window() {
        let (mut controller, clock, seen) = controller(VisibilityState::FOREGROUND, VisibilityOptions::default());
        let watcher = controller.subscribe();

        controller.observe(EnvSignal::Background);
        clock.advance(50);
        assert_eq!(controller.observe(EnvSignal::Foreground), Observation::Throttled);
        assert!(!controller.state().visible);
        assert_eq!(controller.pending_delay(), Some(Duration::from_millis(950)));

        clock.advance(950);
        assert_eq!(controller.pending_delay(), Some(Duration::ZERO));
        assert_eq!(
            controller.apply_pending(),
            vec![Observation::Suppressed(VisibilityEvent::Visible)]
        );
        assert!(controller.state().visible);
        assert!(watcher.borrow().visible);
        assert_eq!(controller.pending_delay(), None);
        assert_eq!(*seen.lock().unwrap(), vec![VisibilityEvent::Hidden]);
    }

    #[test]
    fn test_later_signal_cancels_held_transition() {
        let (mut controller, clock, _) = controller(VisibilityState::FOREGROUND, VisibilityOptions::default());

        controller.observe(EnvSignal::Background);
        clock.advance(50);
        controller.observe(EnvSignal::Foreground);
        clock.advance(50);
        assert_eq!(controller.observe(EnvSignal::Background), Observation::Unchanged);

        assert_eq!(controller.pending_delay(), None);
        assert!(controller.apply_pending().is_empty());
        assert!(!controller.state().visible);
    }

    #[test]
    fn test_axes_throttle_independently() {
        let (mut controller, _, seen) = controller(VisibilityState::FOREGROUND, VisibilityOptions::default());

        controller.observe(EnvSignal::Background);
        controller.observe(EnvSignal::Blur);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![VisibilityEvent::Hidden, VisibilityEvent::Blur]
        );
        assert_eq!(controller.state(), VisibilityState::BACKGROUND);
    }

    #[test]
    fn test_shutdown_passes_through() {
        let (mut controller, _, seen) = controller(VisibilityState::FOREGROUND, VisibilityOptions::default());

        controller.observe(EnvSignal::Shutdown);
        controller.observe(EnvSignal::Shutdown);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![VisibilityEvent::BeforeUnload, VisibilityEvent::BeforeUnload]
        );
    }

    #[tokio::test]
    async fn test_initial_state_from_source_and_watch() {
        let (signals, source) = ChannelSignalSource::new(VisibilityState {
            visible: false,
            focused: false,
        });
        let clock = ManualClock::new(0);
        let controller = VisibilityController::register(&source, VisibilityOptions::default(), Arc::new(clock));
        assert!(!controller.state().visible);

        let mut watcher = controller.subscribe();
        let task = controller.spawn(source);

        signals.send(EnvSignal::Foreground).unwrap();
        watcher.changed().await.unwrap();
        assert!(watcher.borrow().visible);

        signals.send(EnvSignal::Shutdown).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_applies_trailing_transition() {
        let (signals, source) = ChannelSignalSource::new(VisibilityState::FOREGROUND);
        let clock = ManualClock::new(0);
        let options = VisibilityOptions::default().allow_auto_refresh();
        let mut controller = VisibilityController::register(&source, options, Arc::new(clock));
        let (seen, handler) = recorder();
        controller.add_handler(handler);
        let watcher = controller.subscribe();
        let task = controller.spawn(source);

        signals.send(EnvSignal::Background).unwrap();
        signals.send(EnvSignal::Foreground).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(watcher.borrow().visible);

        signals.send(EnvSignal::Shutdown).unwrap();
        task.await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![VisibilityEvent::Hidden, VisibilityEvent::Visible, VisibilityEvent::BeforeUnload]
        );
    }
}

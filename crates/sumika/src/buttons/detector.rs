use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;
use tracing::warn;

use super::scheduler::ScheduledTask;
use super::scheduler::Scheduler;
use super::signal::PressEvent;
use super::signal::PressKind;
use super::signal::PressSignal;
use crate::config::ButtonsConfig;

type PressKey = (String, String);

/// In-flight interaction of one (device, property) button
#[derive(Debug)]
struct PressState {
    count: u32,
    last_press: Instant,
    held: bool,
    /// Debounce elapsed while the button was still down
    debounce_elapsed: bool,
    /// Identifies the press that armed the current timers
    generation: u64,
    debounce: Option<ScheduledTask>,
    long_press: Option<ScheduledTask>,
}

impl PressState {
    fn new(generation: u64) -> Self {
        Self {
            count: 0,
            last_press: Instant::now(),
            held: false,
            debounce_elapsed: false,
            generation,
            debounce: None,
            long_press: None,
        }
    }

    fn cancel_long_press(&mut self) {
        if let Some(task) = self.long_press.take() {
            task.cancel();
        }
    }

    fn cancel_timers(&mut self) {
        if let Some(task) = self.debounce.take() {
            task.cancel();
        }
        self.cancel_long_press();
    }
}

struct Inner {
    states: DashMap<PressKey, PressState>,
    next_generation: AtomicU64,
    debounce: Duration,
    long_press: Duration,
    scheduler: Scheduler,
    events: mpsc::UnboundedSender<PressEvent>,
}

/// Turns raw button activity into one classified event per interaction
///
/// State lives per (device, property) in a sharded map, and every timer
/// re-checks the generation of the press that armed it under the key's
/// lock before acting.
#[derive(Clone)]
pub struct PressDetector {
    inner: Arc<Inner>,
}

impl PressDetector {
    pub fn new(config: &ButtonsConfig) -> (Self, mpsc::UnboundedReceiver<PressEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let detector = Self {
            inner: Arc::new(Inner {
                states: DashMap::new(),
                next_generation: AtomicU64::new(1),
                debounce: config.debounce(),
                long_press: config.long_press(),
                scheduler: Scheduler,
                events,
            }),
        };
        (detector, events_rx)
    }

    /// Feed one signal for a (device, property) button
    pub fn signal(&self, device: &str, property: &str, signal: PressSignal) {
        let key = (device.to_string(), property.to_string());
        debug!("Button {}.{}: {:?}", device, property, signal);

        match signal {
            PressSignal::Down | PressSignal::Click => self.inner.press(key, signal),
            PressSignal::Up => self.inner.release(key),
            PressSignal::Hold => {
                if let Some((_, mut state)) = self.inner.states.remove(&key) {
                    state.cancel_timers();
                }
                self.inner.emit(key, PressKind::LongPressed);
            }
        }
    }

    /// Drop every in-flight interaction of a removed device
    pub fn forget_device(&self, device: &str) {
        self.inner.states.retain(|(d, _), state| {
            if d == device {
                state.cancel_timers();
                false
            } else {
                true
            }
        });
    }

    /// Number of buttons with an interaction in progress
    pub fn pending(&self) -> usize {
        self.inner.states.len()
    }

    /// Presses counted so far for a button, if an interaction is in progress
    pub fn press_count(&self, device: &str, property: &str) -> Option<u32> {
        self.inner
            .states
            .get(&(device.to_string(), property.to_string()))
            .map(|state| state.count)
    }
}

impl Inner {
    fn press(self: &Arc<Self>, key: PressKey, signal: PressSignal) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut state = self
            .states
            .entry(key.clone())
            .or_insert_with(|| PressState::new(generation));

        state.count += 1;
        state.generation = generation;
        state.last_press = Instant::now();
        state.debounce_elapsed = false;

        if let Some(task) = state.debounce.take() {
            task.cancel();
        }
        let inner = self.clone();
        let timer_key = key.clone();
        state.debounce = Some(self.scheduler.schedule(self.debounce, move || {
            inner.debounce_fired(timer_key, generation)
        }));

        state.cancel_long_press();
        match signal {
            PressSignal::Down => {
                state.held = true;
                let inner = self.clone();
                state.long_press = Some(self.scheduler.schedule(self.long_press, move || {
                    inner.long_press_fired(key, generation)
                }));
            }
            _ => state.held = false,
        }
    }

    fn release(&self, key: PressKey) {
        let finalize = match self.states.get_mut(&key) {
            Some(mut state) => {
                state.held = false;
                state.cancel_long_press();
                state.debounce_elapsed
            }
            None => false,
        };

        if finalize {
            if let Some((_, state)) = self.states.remove_if(&key, |_, s| s.debounce_elapsed) {
                debug!(
                    "Released after {:?}",
                    Instant::now().duration_since(state.last_press)
                );
                self.emit(key, PressKind::from_count(state.count));
            }
        }
    }

    fn debounce_fired(&self, key: PressKey, generation: u64) {
        let finalize = match self.states.get_mut(&key) {
            Some(mut state) if state.generation == generation => {
                state.debounce = None;
                if state.held {
                    // Still down: either the release or the long press decides
                    state.debounce_elapsed = true;
                    false
                } else {
                    true
                }
            }
            _ => false,
        };

        if finalize {
            let removed = self
                .states
                .remove_if(&key, |_, s| s.generation == generation && !s.held);
            if let Some((_, mut state)) = removed {
                state.cancel_timers();
                self.emit(key, PressKind::from_count(state.count));
            }
        }
    }

    fn long_press_fired(&self, key: PressKey, generation: u64) {
        let removed = self
            .states
            .remove_if(&key, |_, s| s.generation == generation && s.held);
        if let Some((_, mut state)) = removed {
            state.long_press = None;
            state.cancel_timers();
            self.emit(key, PressKind::LongPressed);
        }
    }

    fn emit(&self, (device, property): PressKey, kind: PressKind) {
        debug!("Button {}.{} classified as {}", device, property, kind);
        let event = PressEvent {
            device,
            property,
            kind,
        };
        if self.events.send(event).is_err() {
            warn!("Press event receiver dropped");
        }
    }
}

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use cadenza_shared::{EngineError, ListenerId};
use parking_lot::Mutex;

pub type BeatCallback = Box<dyn FnMut(f64) -> anyhow::Result<()> + Send>;

struct Subscription {
    /// Taken out while the callback runs
    callback: Option<BeatCallback>,
    period: u32,
    remaining: i64,
    repeat: bool,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<ListenerId, Subscription>,
    /// Registration order, which is also dispatch order
    order: Vec<ListenerId>,
}

impl Registry {
    fn remove(&mut self, id: ListenerId) -> Option<Subscription> {
        let removed = self.entries.remove(&id)?;
        self.order.retain(|i| *i != id);
        Some(removed)
    }
}

/// Countdown subscriptions of one orchestrator.
///
/// The handle is cheap to clone and can be moved into a callback, which may then add
/// or remove subscriptions (itself included) while a dispatch is running.
#[derive(Clone, Default)]
pub struct Listeners {
    inner: Arc<Mutex<Registry>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` to fire after `countdown` ticks, then every `period` ticks
    /// if `repeat` is set.
    pub fn add(&self, callback: BeatCallback, period: u32, countdown: i64, repeat: bool) -> ListenerId {
        let id = ListenerId::new();
        let mut registry = self.inner.lock();
        registry.entries.insert(
            id,
            Subscription {
                callback: Some(callback),
                period: period.max(1),
                remaining: countdown,
                repeat,
            },
        );
        registry.order.push(id);
        id
    }

    /// Returns false if `id` is unknown, already removed, or a one-shot that fired.
    pub fn remove(&self, id: ListenerId) -> bool {
        self.inner.lock().remove(id).is_some()
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.inner.lock().entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut registry = self.inner.lock();
        registry.entries.clear();
        registry.order.clear();
    }

    /// Count one tick down on every subscription and fire the ones that are due with
    /// `time`. A failing callback does not stop the others; its failure is returned.
    pub fn dispatch(&self, time: f64) -> Vec<EngineError> {
        let snapshot = self.inner.lock().order.clone();
        let mut failures = Vec::new();

        for id in snapshot {
            let (callback, repeat) = {
                let mut registry = self.inner.lock();
                let Some(subscription) = registry.entries.get_mut(&id) else {
                    continue;
                };
                subscription.remaining -= 1;
                if subscription.remaining > 0 {
                    continue;
                }
                if subscription.repeat {
                    subscription.remaining = subscription.period as i64;
                    (subscription.callback.take(), true)
                } else {
                    (registry.remove(id).and_then(|s| s.callback), false)
                }
            };
            let Some(mut callback) = callback else {
                continue;
            };

            // The lock is released here so the callback may use the registry
            match catch_unwind(AssertUnwindSafe(|| callback(time))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(EngineError::Listener {
                    id,
                    message: format!("{e:#}"),
                }),
                Err(panic) => failures.push(EngineError::Listener {
                    id,
                    message: panic_message(panic.as_ref()),
                }),
            }

            if repeat {
                if let Some(subscription) = self.inner.lock().entries.get_mut(&id) {
                    subscription.callback = Some(callback);
                }
            }
        }
        failures
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

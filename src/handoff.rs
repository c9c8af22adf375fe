//! Single-slot, exactly-once value exchange between two machines
//!
//! The producer never blocks: `put` either hands the value straight to a
//! waiting consumer or parks it in the slot. A consumer registered later picks
//! up the parked value immediately. Whichever side arrives second performs the
//! delivery, synchronously, on its own thread.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Callback that receives a handed-off value
pub type Consumer<T> = Box<dyn FnOnce(T) + Send>;

struct Slot<T> {
    value: Option<T>,
    consumer: Option<Consumer<T>>,
}

pub struct Handoff<T> {
    name: &'static str,
    slot: Mutex<Slot<T>>,
}

impl<T: Send> Handoff<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::new(Slot {
                value: None,
                consumer: None,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Publish a value.
    ///
    /// Delivers to the pending consumer if there is one, otherwise replaces any
    /// undelivered value.
    pub fn put(&self, value: T) {
        let consumer = {
            let mut slot = self.lock();
            match slot.consumer.take() {
                Some(consumer) => consumer,
                None => {
                    if slot.value.replace(value).is_some() {
                        log::debug!("{}: replaced undelivered value", self.name);
                    }
                    return;
                }
            }
        };

        log::debug!("{}: delivering to waiting consumer", self.name);
        consumer(value);
    }

    /// Register the consumer for the next value.
    ///
    /// If a value is already parked it is delivered before this call returns and
    /// the slot is left empty. A consumer that is still waiting is replaced.
    pub fn consume<F>(&self, consumer: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        let value = {
            let mut slot = self.lock();
            match slot.value.take() {
                Some(value) => value,
                None => {
                    if slot.consumer.replace(Box::new(consumer)).is_some() {
                        log::debug!("{}: replaced waiting consumer", self.name);
                    }
                    return;
                }
            }
        };

        log::debug!("{}: delivering parked value", self.name);
        consumer(value);
    }

    /// Drop any undelivered value, leaving a waiting consumer in place
    pub fn clear(&self) -> Option<T> {
        self.lock().value.take()
    }

    /// Unregister a waiting consumer. Returns whether one was waiting.
    pub fn withdraw(&self) -> bool {
        self.lock().consumer.take().is_some()
    }

    pub fn has_pending_value(&self) -> bool {
        self.lock().value.is_some()
    }

    pub fn has_waiting_consumer(&self) -> bool {
        self.lock().consumer.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        // Consumers run outside the lock, so a poisoned slot still holds valid data.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> fmt::Debug for Handoff<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handoff").field("name", &self.name).finish()
    }
}

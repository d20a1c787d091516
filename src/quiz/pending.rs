//! Question generation running in the background.
//!
//! Each key (a chat) has at most one generation in flight. Starting another one
//! aborts the previous, and a generation that finishes after it was cancelled
//! or replaced never reaches its completion callback. The completion callback
//! runs inside the abortable task and the slot stays pending until it returns,
//! so a cancel that lands while the result is being delivered still wins.
//!
//! A finished slot is kept until its status is read once or until the next
//! generation starts, whichever comes first.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::AbortHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    Pending,
    Cancelled,
    Completed,
}

enum SlotState {
    Running(AbortHandle),
    Done(GenerationStatus),
}

struct Slot {
    ticket: Ticket,
    state: SlotState,
}

pub struct InFlight<K> {
    slots: Mutex<HashMap<K, Slot>>,
    next_ticket: AtomicU64,
}

impl<K> Default for InFlight<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
        }
    }
}

impl<K> InFlight<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<K, Slot>> {
        // a panicking holder cannot leave a slot half-written
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `generation` on the runtime and hands its output to `on_done`,
    /// unless the generation is cancelled or replaced before it finishes.
    pub fn spawn<T, G, D, DF>(self: &Arc<Self>, key: K, generation: G, on_done: D) -> Ticket
    where
        T: Send + 'static,
        G: Future<Output = T> + Send + 'static,
        D: FnOnce(T) -> DF + Send + 'static,
        DF: Future<Output = ()> + Send + 'static,
    {
        let ticket = Ticket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        let tracker = Arc::clone(self);
        let task_key = key.clone();

        // registered under the lock, so the task cannot finish before its slot exists
        let mut slots = self.slots();
        slots.retain(|_, slot| matches!(slot.state, SlotState::Running(_)));
        let handle = tokio::spawn(async move {
            let output = generation.await;
            if !tracker.is_running(&task_key, ticket) {
                return;
            }
            on_done(output).await;
            tracker.finish(&task_key, ticket);
        });
        let slot = Slot {
            ticket,
            state: SlotState::Running(handle.abort_handle()),
        };
        if let Some(Slot {
            state: SlotState::Running(previous),
            ..
        }) = slots.insert(key, slot)
        {
            log::debug!("Replacing a pending generation");
            previous.abort();
        }
        ticket
    }

    /// Aborts the pending generation for `key`. Returns whether there was one.
    pub fn cancel(&self, key: &K) -> bool {
        let mut slots = self.slots();
        let Some(slot) = slots.get_mut(key) else {
            return false;
        };
        let SlotState::Running(handle) = &slot.state else {
            return false;
        };
        handle.abort();
        slot.state = SlotState::Done(GenerationStatus::Cancelled);
        true
    }

    /// State of the latest generation started for `key`.
    ///
    /// A cancelled or completed status is reported once and then forgotten.
    pub fn current(&self, key: &K) -> Option<GenerationStatus> {
        let mut slots = self.slots();
        let status = match &slots.get(key)?.state {
            SlotState::Running(_) => GenerationStatus::Pending,
            SlotState::Done(status) => *status,
        };
        if status != GenerationStatus::Pending {
            slots.remove(key);
        }
        Some(status)
    }

    fn is_running(&self, key: &K, ticket: Ticket) -> bool {
        matches!(
            self.slots().get(key),
            Some(slot) if slot.ticket == ticket && matches!(slot.state, SlotState::Running(_))
        )
    }

    /// Marks `ticket` completed if it is still the current generation for `key`.
    fn finish(&self, key: &K, ticket: Ticket) -> bool {
        let mut slots = self.slots();
        match slots.get_mut(key) {
            Some(slot) if slot.ticket == ticket && matches!(slot.state, SlotState::Running(_)) => {
                slot.state = SlotState::Done(GenerationStatus::Completed);
                true
            }
            _ => false,
        }
    }
}

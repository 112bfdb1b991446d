// Gremlin Event Queue
// Single ordered queue between producer threads and the engine thread

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use super::{DeviceId, InputEvent};

/// Item consumed by the engine thread
#[derive(Debug, Clone, PartialEq)]
pub enum QueuedEvent {
    /// A normalized device sample
    Input(InputEvent),
    /// A physical device went away or came back
    DeviceStatus { device: DeviceId, available: bool },
    /// Stop the consumer loop
    Shutdown,
}

#[derive(Default)]
struct Inner {
    items: Mutex<VecDeque<QueuedEvent>>,
    ready: Condvar,
}

/// Multi-producer, single-consumer FIFO.
///
/// Cloning yields another handle onto the same queue.
#[derive(Clone, Default)]
pub struct EventQueue {
    inner: Arc<Inner>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: QueuedEvent) {
        self.inner.items.lock().push_back(event);
        self.inner.ready.notify_one();
    }

    pub fn push_input(&self, event: InputEvent) {
        self.push(QueuedEvent::Input(event));
    }

    /// Non-blocking pop
    pub fn try_pop(&self) -> Option<QueuedEvent> {
        self.inner.items.lock().pop_front()
    }

    /// Block until an event arrives or `deadline` passes.
    ///
    /// With no deadline this waits indefinitely. Returns `None` on timeout.
    pub fn pop_until(&self, deadline: Option<Instant>) -> Option<QueuedEvent> {
        let mut items = self.inner.items.lock();
        loop {
            if let Some(event) = items.pop_front() {
                return Some(event);
            }
            match deadline {
                Some(deadline) => {
                    if self.inner.ready.wait_until(&mut items, deadline).timed_out() {
                        return items.pop_front();
                    }
                }
                None => self.inner.ready.wait(&mut items),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Commit-ordered event delivery.
//!
//! Writers push events while still holding whatever lock orders their
//! commits, release it, then call [`Outbox::flush`]. Whichever flusher gets
//! there first delivers everything queued, in push order, with no lock held
//! during delivery. A flush that finds another flush running returns at
//! once; the running one picks up its events.
//!
//! Delivery is therefore serialized and in commit order, and a callback may
//! write again (its events queue behind the current one).

use std::collections::VecDeque;

use parking_lot::Mutex;

pub struct Outbox<E> {
    state: Mutex<State<E>>,
}

struct State<E> {
    queue: VecDeque<E>,
    draining: bool,
}

/// Clears `draining` if a delivery callback unwinds.
struct DrainReset<'a, E> {
    outbox: &'a Outbox<E>,
    armed: bool,
}

impl<E> Drop for DrainReset<'_, E> {
    fn drop(&mut self) {
        if self.armed {
            self.outbox.state.lock().draining = false;
        }
    }
}

impl<E> Outbox<E> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                draining: false,
            }),
        }
    }

    pub fn push(&self, event: E) {
        self.state.lock().queue.push_back(event);
    }

    pub fn extend(&self, events: impl IntoIterator<Item = E>) {
        self.state.lock().queue.extend(events);
    }

    /// Deliver queued events in order, unless another flush already is.
    pub fn flush(&self, mut deliver: impl FnMut(E)) {
        {
            let mut state = self.state.lock();
            if state.draining || state.queue.is_empty() {
                return;
            }
            state.draining = true;
        }
        let mut reset = DrainReset {
            outbox: self,
            armed: true,
        };
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.queue.pop_front() {
                    Some(event) => event,
                    None => {
                        state.draining = false;
                        reset.armed = false;
                        return;
                    }
                }
            };
            deliver(next);
        }
    }

    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl<E> Default for Outbox<E> {
    fn default() -> Self {
        Self::new()
    }
}

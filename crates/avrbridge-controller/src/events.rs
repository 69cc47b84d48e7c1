//! Event bus
//!
//! The controller publishes what happened to the target; any number of
//! subscribers (the GDB server, tests) receive every event published after
//! they subscribed. Subscribers that went away are dropped on the next
//! publish.

use std::sync::{Arc, Mutex, MutexGuard};

use avrbridge_core::memory::MemoryType;
use avrbridge_core::register::Register;
use avrbridge_core::target::BreakCause;
use crossbeam_channel::{Receiver, Sender};

use crate::worker::TargetControllerState;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TargetExecutionStopped {
        program_counter: u32,
        cause: BreakCause,
    },
    TargetExecutionResumed,
    RegistersWrittenToTarget {
        registers: Vec<Register>,
    },
    MemoryWrittenToTarget {
        memory_type: MemoryType,
        start: u32,
        size: u32,
    },
    TargetReset,
    ProgrammingModeEnabled,
    ProgrammingModeDisabled,
    TargetControllerStateChanged {
        state: TargetControllerState,
    },
    DebugSessionStarted,
    DebugSessionFinished,
}

/// Fan-out of [`Event`]s to subscribers
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<Event>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Sender<Event>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self) -> Receiver<Event> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.lock().push(sender);
        receiver
    }

    pub fn publish(&self, event: Event) {
        log::trace!("Publishing {:?}", event);
        self.lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    /// Number of live subscribers, as of the last publish
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }
}

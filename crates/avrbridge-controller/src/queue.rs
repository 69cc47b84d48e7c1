//! Command queue shared by the service handles and the worker

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::commands::{Command, Response};
use crate::error::{ControllerError, Result};

/// A command waiting for the worker, with the channel its result goes to
#[derive(Debug)]
pub struct QueuedCommand {
    pub id: u64,
    pub command: Command,
    pub completion: Sender<Result<Response>>,
    /// Instant the caller stops waiting, if any
    pub deadline: Option<Instant>,
}

impl QueuedCommand {
    /// Whether the caller has already given up on this command
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Hand the result back to the caller
    ///
    /// The caller may have given up waiting, in which case the result is
    /// dropped.
    pub fn complete(self, result: Result<Response>) {
        if self.completion.send(result).is_err() {
            log::debug!("Command {} ({}) completed after its caller left", self.id, self.command.name());
        }
    }
}

/// FIFO of commands for the worker thread
///
/// Ids are handed out under the same lock that orders the sends, so ids
/// increase in queue order. A closed queue refuses new commands.
#[derive(Debug)]
pub struct CommandQueue {
    next_id: Mutex<Option<u64>>,
    sender: Sender<QueuedCommand>,
    receiver: Receiver<QueuedCommand>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            next_id: Mutex::new(Some(0)),
            sender,
            receiver,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<u64>> {
        self.next_id.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue a command, returning its id
    ///
    /// A command still queued at `deadline` is dropped without running.
    pub fn push(
        &self,
        command: Command,
        completion: Sender<Result<Response>>,
        deadline: Option<Instant>,
    ) -> Result<u64> {
        let mut next_id = self.lock();
        let id = next_id.ok_or(ControllerError::ShutDown)?;
        *next_id = Some(id.wrapping_add(1));

        log::trace!("Queueing command {} ({})", id, command.name());
        self.sender
            .send(QueuedCommand {
                id,
                command,
                completion,
                deadline,
            })
            .map_err(|_| ControllerError::ShutDown)?;
        Ok(id)
    }

    /// Take the next command, waiting at most `timeout`
    pub fn pop_timeout(&self, timeout: Duration) -> Option<QueuedCommand> {
        match self.receiver.recv_timeout(timeout) {
            Ok(command) => Some(command),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Refuse further commands and fail every pending one
    pub fn close(&self) {
        let mut next_id = self.lock();
        *next_id = None;
        for pending in self.receiver.try_iter() {
            pending.complete(Err(ControllerError::ShutDown));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    /// Number of commands waiting
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_increase_in_queue_order() {
        let queue = CommandQueue::new();
        let (tx, _rx) = crossbeam_channel::unbounded();
        let first = queue.push(Command::GetTargetState, tx.clone(), None).unwrap();
        let second = queue.push(Command::GetProgramCounter, tx, None).unwrap();
        assert!(second > first);

        let popped = queue.pop_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!((popped.id, popped.command), (first, Command::GetTargetState));
        let popped = queue.pop_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(popped.id, second);
        assert!(queue.pop_timeout(Duration::from_millis(1)).is_none());
    }

    #[test]
    fn test_close_fails_pending_and_refuses_new() {
        let queue = CommandQueue::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        queue.push(Command::ResetTarget, tx.clone(), None).unwrap();
        assert_eq!(queue.len(), 1);

        queue.close();
        assert!(queue.is_closed());
        assert!(queue.is_empty());
        assert!(matches!(rx.try_recv(), Ok(Err(ControllerError::ShutDown))));
        assert!(matches!(
            queue.push(Command::ResetTarget, tx, None),
            Err(ControllerError::ShutDown)
        ));
    }

    #[test]
    fn test_expiry_follows_deadline() {
        let queue = CommandQueue::new();
        let (tx, _rx) = crossbeam_channel::unbounded();
        let past = Instant::now();
        let future = past + Duration::from_secs(60);
        queue.push(Command::ResetTarget, tx.clone(), Some(past)).unwrap();
        queue.push(Command::ResetTarget, tx.clone(), Some(future)).unwrap();
        queue.push(Command::ResetTarget, tx, None).unwrap();

        let expired: Vec<bool> = (0..3)
            .map(|_| queue.pop_timeout(Duration::from_millis(10)).unwrap().is_expired())
            .collect();
        assert_eq!(expired, vec![true, false, false]);
    }
}

//! Client side of the target controller
//!
//! Each call enqueues a command and blocks until the worker answers or the
//! timeout elapses. Services are cheap to clone and may be used from any
//! thread.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use avrbridge_core::memory::{MemoryAddressRange, MemoryType};
use avrbridge_core::register::{Register, RegisterDescriptors};
use avrbridge_core::target::{PinDescriptor, PinState, TargetDescriptor, TargetState};
use crossbeam_channel::RecvTimeoutError;

use crate::commands::{Command, Response};
use crate::error::{ControllerError, Result};
use crate::queue::CommandQueue;
use crate::worker::TargetControllerState;

/// Default time to wait for a command to complete
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct TargetControllerService {
    queue: Arc<CommandQueue>,
    timeout: Duration,
}

macro_rules! expect_response {
    ($response:expr, $variant:ident) => {
        match $response {
            Response::$variant(value) => Ok(value),
            _ => Err(ControllerError::UnexpectedResponse),
        }
    };
}

impl TargetControllerService {
    pub(crate) fn new(queue: Arc<CommandQueue>) -> Self {
        Self {
            queue,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send a command and wait for its result
    ///
    /// A command the worker has not started by the time this gives up is
    /// discarded rather than run late. One already running completes.
    pub fn send(&self, command: Command) -> Result<Response> {
        let (completion, result) = crossbeam_channel::bounded(1);
        let name = command.name();
        let deadline = Instant::now().checked_add(self.timeout);
        let id = self.queue.push(command, completion, deadline)?;

        let received = match deadline {
            Some(deadline) => result.recv_deadline(deadline),
            None => result.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(response) => response,
            Err(RecvTimeoutError::Timeout) => {
                log::error!("Command {} ({}) timed out after {:?}", id, name, self.timeout);
                Err(ControllerError::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(ControllerError::ShutDown),
        }
    }

    fn send_ok(&self, command: Command) -> Result<()> {
        match self.send(command)? {
            Response::Ok => Ok(()),
            _ => Err(ControllerError::UnexpectedResponse),
        }
    }

    pub fn controller_state(&self) -> Result<TargetControllerState> {
        expect_response!(self.send(Command::GetControllerState)?, ControllerState)
    }

    /// Release the tool without shutting the controller down
    pub fn suspend(&self) -> Result<()> {
        self.send_ok(Command::Suspend)
    }

    /// Reacquire the tool after [`suspend`](Self::suspend)
    pub fn resume(&self) -> Result<()> {
        self.send_ok(Command::Resume)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send_ok(Command::Shutdown)
    }

    pub fn target_descriptor(&self) -> Result<Arc<TargetDescriptor>> {
        expect_response!(self.send(Command::GetTargetDescriptor)?, TargetDescriptor)
    }

    pub fn target_state(&self) -> Result<TargetState> {
        expect_response!(self.send(Command::GetTargetState)?, TargetState)
    }

    pub fn stop_target_execution(&self) -> Result<()> {
        self.send_ok(Command::StopTargetExecution)
    }

    pub fn resume_target_execution(&self, from: Option<u32>, to: Option<u32>) -> Result<()> {
        self.send_ok(Command::ResumeTargetExecution { from, to })
    }

    pub fn step_target_execution(&self, from: Option<u32>) -> Result<()> {
        self.send_ok(Command::StepTargetExecution { from })
    }

    pub fn reset_target(&self) -> Result<()> {
        self.send_ok(Command::ResetTarget)
    }

    pub fn read_registers(&self, descriptors: RegisterDescriptors) -> Result<Vec<Register>> {
        expect_response!(self.send(Command::ReadRegisters(descriptors))?, Registers)
    }

    pub fn write_registers(&self, registers: Vec<Register>) -> Result<()> {
        self.send_ok(Command::WriteRegisters(registers))
    }

    pub fn read_memory(
        &self,
        memory_type: MemoryType,
        start: u32,
        bytes: u32,
        excluded: Vec<MemoryAddressRange>,
    ) -> Result<Vec<u8>> {
        expect_response!(
            self.send(Command::ReadMemory {
                memory_type,
                start,
                bytes,
                excluded,
            })?,
            Memory
        )
    }

    pub fn write_memory(&self, memory_type: MemoryType, start: u32, data: Vec<u8>) -> Result<()> {
        self.send_ok(Command::WriteMemory {
            memory_type,
            start,
            data,
        })
    }

    pub fn erase_memory(&self, memory_type: MemoryType) -> Result<()> {
        self.send_ok(Command::EraseMemory(memory_type))
    }

    pub fn set_breakpoint(&self, address: u32) -> Result<()> {
        self.send_ok(Command::SetBreakpoint(address))
    }

    pub fn remove_breakpoint(&self, address: u32) -> Result<()> {
        self.send_ok(Command::RemoveBreakpoint(address))
    }

    /// Program counter as a byte address
    pub fn program_counter(&self) -> Result<u32> {
        expect_response!(self.send(Command::GetProgramCounter)?, ProgramCounter)
    }

    pub fn set_program_counter(&self, address: u32) -> Result<()> {
        self.send_ok(Command::SetProgramCounter(address))
    }

    pub fn stack_pointer(&self) -> Result<u32> {
        expect_response!(self.send(Command::GetStackPointer)?, StackPointer)
    }

    pub fn pin_states(&self, variant_id: usize) -> Result<BTreeMap<u16, PinState>> {
        expect_response!(self.send(Command::GetPinStates { variant_id })?, PinStates)
    }

    pub fn set_pin_state(&self, variant_id: usize, pin: PinDescriptor, state: PinState) -> Result<()> {
        self.send_ok(Command::SetPinState {
            variant_id,
            pin,
            state,
        })
    }

    pub fn enable_programming_mode(&self) -> Result<()> {
        self.send_ok(Command::EnableProgrammingMode)
    }

    pub fn disable_programming_mode(&self) -> Result<()> {
        self.send_ok(Command::DisableProgrammingMode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_times_out_without_worker() {
        let queue = Arc::new(CommandQueue::new());
        let service =
            TargetControllerService::new(queue.clone()).with_timeout(Duration::from_millis(20));
        assert!(matches!(
            service.target_state(),
            Err(ControllerError::Timeout(_))
        ));
        // Still queued, but past its deadline so a worker would drop it
        assert_eq!(queue.len(), 1);
        let stale = queue.pop_timeout(Duration::from_millis(10)).unwrap();
        assert!(stale.is_expired());
    }

    #[test]
    fn test_mismatched_response_is_an_error() {
        let queue = Arc::new(CommandQueue::new());
        let service = TargetControllerService::new(queue.clone());

        let worker = thread::spawn(move || {
            let command = queue.pop_timeout(Duration::from_secs(5)).unwrap();
            command.complete(Ok(Response::Ok));
        });

        assert!(matches!(
            service.program_counter(),
            Err(ControllerError::UnexpectedResponse)
        ));
        worker.join().unwrap();
    }

    #[test]
    fn test_closed_queue_refuses_commands() {
        let queue = Arc::new(CommandQueue::new());
        queue.close();
        let service = TargetControllerService::new(queue);
        assert!(matches!(service.reset_target(), Err(ControllerError::ShutDown)));
    }
}

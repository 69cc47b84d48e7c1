//! Target controller thread
//!
//! Every access to the debug tool happens on one thread. Commands arrive
//! through the [`CommandQueue`] and run one at a time, in order. Between
//! commands the worker polls a running target so that stops are published
//! on the [`EventBus`] as they happen.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use avrbridge_core::target::{TargetDescriptor, TargetState};

use crate::commands::{Command, Preconditions, Response};
use crate::error::{ControllerError, Rejection, Result};
use crate::events::{Event, EventBus};
use crate::queue::CommandQueue;
use crate::service::TargetControllerService;
use crate::target::Avr8Target;

/// How long the worker waits for a command before polling the target
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Lifecycle state of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetControllerState {
    /// The tool is held and commands reach the target
    Active,
    /// The tool is released; only lifecycle commands are accepted
    Suspended,
    ShutDown,
}

impl fmt::Display for TargetControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Suspended => write!(f, "suspended"),
            Self::ShutDown => write!(f, "shut down"),
        }
    }
}

struct Worker {
    target: Avr8Target,
    descriptor: Arc<TargetDescriptor>,
    queue: Arc<CommandQueue>,
    events: EventBus,
    state: TargetControllerState,
    target_state: TargetState,
}

impl Worker {
    fn run(&mut self) {
        while self.state != TargetControllerState::ShutDown {
            match self.queue.pop_timeout(POLL_INTERVAL) {
                // Shutdown always runs so the thread can be joined
                Some(queued) if queued.is_expired() && queued.command != Command::Shutdown => {
                    log::warn!(
                        "Dropping command {} ({}), its caller timed out",
                        queued.id,
                        queued.command.name()
                    );
                    queued.complete(Err(ControllerError::Expired));
                }
                Some(queued) => {
                    log::debug!("Processing command {} ({})", queued.id, queued.command.name());
                    let result = self.process(&queued.command);
                    if let Err(e) = &result {
                        log::debug!("Command {} failed: {}", queued.id, e);
                    }
                    queued.complete(result);
                }
                None => self.poll_target(),
            }
        }
        self.queue.close();
        log::debug!("Target controller stopped");
    }

    fn poll_target(&mut self) {
        if self.state != TargetControllerState::Active
            || self.target_state != TargetState::Running
            || self.target.programming_mode_enabled()
        {
            return;
        }

        match self.target.target_state() {
            Ok(TargetState::Stopped) => {
                if let Err(e) = self.on_stopped() {
                    log::error!("Failed to read program counter after stop: {}", e);
                }
            }
            Ok(state) => self.target_state = state,
            Err(e) => log::error!("Failed to poll target state: {}", e),
        }
    }

    fn on_stopped(&mut self) -> Result<()> {
        self.target_state = TargetState::Stopped;
        let program_counter = self.target.program_counter()?;
        let cause = self.target.break_cause();
        log::debug!("Target stopped at 0x{:04X} ({:?})", program_counter, cause);
        self.events.publish(Event::TargetExecutionStopped {
            program_counter,
            cause,
        });
        Ok(())
    }

    fn set_state(&mut self, state: TargetControllerState) {
        self.state = state;
        log::info!("Target controller {}", state);
        self.events
            .publish(Event::TargetControllerStateChanged { state });
    }

    fn process(&mut self, command: &Command) -> Result<Response> {
        check_preconditions(
            command.preconditions(),
            self.state,
            self.target_state,
            self.target.programming_mode_enabled(),
        )?;

        match command {
            Command::GetControllerState => Ok(Response::ControllerState(self.state)),
            Command::Suspend => {
                if self.state == TargetControllerState::Active {
                    if let Err(e) = self.target.deactivate() {
                        log::error!("Failed to deactivate target: {}", e);
                    }
                    self.target_state = TargetState::Unknown;
                    self.set_state(TargetControllerState::Suspended);
                }
                Ok(Response::Ok)
            }
            Command::Resume => {
                if self.state == TargetControllerState::Suspended {
                    self.target.activate()?;
                    self.target_state = self.target.target_state()?;
                    self.set_state(TargetControllerState::Active);
                }
                Ok(Response::Ok)
            }
            Command::Shutdown => {
                if self.state == TargetControllerState::Active {
                    if let Err(e) = self.target.deactivate() {
                        log::error!("Failed to deactivate target: {}", e);
                    }
                }
                self.set_state(TargetControllerState::ShutDown);
                Ok(Response::Ok)
            }
            Command::GetTargetDescriptor => Ok(Response::TargetDescriptor(self.descriptor.clone())),
            Command::GetTargetState => Ok(Response::TargetState(self.target_state)),
            Command::StopTargetExecution => {
                if self.target_state != TargetState::Stopped {
                    self.target.stop()?;
                    self.on_stopped()?;
                }
                Ok(Response::Ok)
            }
            Command::ResumeTargetExecution { from, to } => {
                self.target.run(*from, *to)?;
                self.target_state = TargetState::Running;
                self.events.publish(Event::TargetExecutionResumed);
                Ok(Response::Ok)
            }
            Command::StepTargetExecution { from } => {
                self.target.step(*from)?;
                self.target_state = TargetState::Running;
                self.events.publish(Event::TargetExecutionResumed);
                Ok(Response::Ok)
            }
            Command::ResetTarget => {
                self.target.reset()?;
                self.target_state = TargetState::Stopped;
                self.events.publish(Event::TargetReset);
                Ok(Response::Ok)
            }
            Command::ReadRegisters(descriptors) => {
                Ok(Response::Registers(self.target.read_registers(descriptors)?))
            }
            Command::WriteRegisters(registers) => {
                self.target.write_registers(registers)?;
                self.events.publish(Event::RegistersWrittenToTarget {
                    registers: registers.clone(),
                });
                Ok(Response::Ok)
            }
            Command::ReadMemory {
                memory_type,
                start,
                bytes,
                excluded,
            } => Ok(Response::Memory(self.target.read_memory(
                *memory_type,
                *start,
                *bytes,
                excluded,
            )?)),
            Command::WriteMemory {
                memory_type,
                start,
                data,
            } => {
                self.target.write_memory(*memory_type, *start, data)?;
                self.events.publish(Event::MemoryWrittenToTarget {
                    memory_type: *memory_type,
                    start: *start,
                    size: data.len() as u32,
                });
                Ok(Response::Ok)
            }
            Command::EraseMemory(memory_type) => {
                self.target.erase_memory(*memory_type)?;
                Ok(Response::Ok)
            }
            Command::SetBreakpoint(address) => {
                self.target.set_breakpoint(*address)?;
                Ok(Response::Ok)
            }
            Command::RemoveBreakpoint(address) => {
                self.target.remove_breakpoint(*address)?;
                Ok(Response::Ok)
            }
            Command::GetProgramCounter => Ok(Response::ProgramCounter(self.target.program_counter()?)),
            Command::SetProgramCounter(address) => {
                self.target.set_program_counter(*address)?;
                Ok(Response::Ok)
            }
            Command::GetStackPointer => Ok(Response::StackPointer(self.target.stack_pointer()?)),
            Command::GetPinStates { variant_id } => {
                Ok(Response::PinStates(self.target.pin_states(*variant_id)?))
            }
            Command::SetPinState {
                variant_id,
                pin,
                state,
            } => {
                self.target.set_pin_state(*variant_id, pin, *state)?;
                Ok(Response::Ok)
            }
            Command::EnableProgrammingMode => {
                if !self.target.programming_mode_enabled() {
                    self.target.enable_programming_mode()?;
                    self.events.publish(Event::ProgrammingModeEnabled);
                }
                Ok(Response::Ok)
            }
            Command::DisableProgrammingMode => {
                if self.target.programming_mode_enabled() {
                    self.target.disable_programming_mode()?;
                    self.events.publish(Event::ProgrammingModeDisabled);
                    self.target_state = self.target.target_state()?;
                }
                Ok(Response::Ok)
            }
        }
    }
}

/// Refuse a command whose preconditions do not hold
///
/// Works from cached state, so a refusal never reaches the tool. Commands
/// that need a stopped target are refused unless the target is known to be
/// stopped.
fn check_preconditions(
    preconditions: Preconditions,
    state: TargetControllerState,
    target_state: TargetState,
    programming_mode: bool,
) -> Result<()> {
    if preconditions.contains(Preconditions::ACTIVE_SESSION)
        && state != TargetControllerState::Active
    {
        return Err(ControllerError::Rejected(Rejection::Suspended));
    }
    if preconditions.contains(Preconditions::STOPPED_TARGET) {
        match target_state {
            TargetState::Stopped => {}
            TargetState::Running => return Err(ControllerError::Rejected(Rejection::TargetRunning)),
            TargetState::Unknown => {
                return Err(ControllerError::Rejected(Rejection::TargetStateUnknown))
            }
        }
    }
    if preconditions.contains(Preconditions::DEBUG_MODE) && programming_mode {
        return Err(ControllerError::Rejected(Rejection::ProgrammingMode));
    }
    Ok(())
}

/// Owner of the controller thread
///
/// Dropping the handle shuts the controller down and waits for the thread.
pub struct TargetControllerHandle {
    service: TargetControllerService,
    events: EventBus,
    thread: Option<JoinHandle<()>>,
}

impl TargetControllerHandle {
    /// Start the controller thread and activate the target on it
    ///
    /// Returns once activation has finished. If it failed, the thread has
    /// already exited and the activation error is returned.
    pub fn start(mut target: Avr8Target, events: EventBus) -> Result<Self> {
        let queue = Arc::new(CommandQueue::new());
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let worker_queue = queue.clone();
        let worker_events = events.clone();
        let thread = thread::Builder::new()
            .name("target-controller".into())
            .spawn(move || {
                if let Err(e) = target.activate() {
                    worker_queue.close();
                    let _ = ready_tx.send(Err(e));
                    return;
                }

                let mut worker = Worker {
                    descriptor: Arc::new(target.descriptor().clone()),
                    target,
                    queue: worker_queue,
                    events: worker_events,
                    state: TargetControllerState::Active,
                    target_state: TargetState::Stopped,
                };
                let _ = ready_tx.send(Ok(()));
                worker.run();
            })
            .map_err(ControllerError::Spawn)?;

        let ready = ready_rx.recv().unwrap_or(Err(ControllerError::ShutDown));
        if let Err(e) = ready {
            if thread.join().is_err() {
                log::error!("Target controller thread panicked");
            }
            return Err(e);
        }

        log::debug!("Target controller started");
        Ok(Self {
            service: TargetControllerService::new(queue),
            events,
            thread: Some(thread),
        })
    }

    /// A new client of this controller
    pub fn service(&self) -> TargetControllerService {
        self.service.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Deactivate the target and wait for the thread to exit
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        let result = match self.service.shutdown() {
            Err(ControllerError::ShutDown) => Ok(()),
            other => other,
        };
        if thread.join().is_err() {
            log::error!("Target controller thread panicked");
        }
        result
    }
}

impl Drop for TargetControllerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Failed to shut down target controller: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEBUG: Preconditions = Preconditions::ACTIVE_SESSION
        .union(Preconditions::STOPPED_TARGET)
        .union(Preconditions::DEBUG_MODE);

    #[test]
    fn test_stopped_target_required_for_debug_commands() {
        let active = TargetControllerState::Active;
        assert!(check_preconditions(DEBUG, active, TargetState::Stopped, false).is_ok());
        assert!(matches!(
            check_preconditions(DEBUG, active, TargetState::Running, false),
            Err(ControllerError::Rejected(Rejection::TargetRunning))
        ));
        assert!(matches!(
            check_preconditions(DEBUG, active, TargetState::Unknown, false),
            Err(ControllerError::Rejected(Rejection::TargetStateUnknown))
        ));
    }

    #[test]
    fn test_session_checked_before_target_state() {
        assert!(matches!(
            check_preconditions(
                DEBUG,
                TargetControllerState::Suspended,
                TargetState::Unknown,
                false
            ),
            Err(ControllerError::Rejected(Rejection::Suspended))
        ));
        // Stop only needs a session, whatever the target state
        assert!(check_preconditions(
            Preconditions::ACTIVE_SESSION,
            TargetControllerState::Active,
            TargetState::Unknown,
            true
        )
        .is_ok());
        assert!(matches!(
            check_preconditions(
                DEBUG,
                TargetControllerState::Active,
                TargetState::Stopped,
                true
            ),
            Err(ControllerError::Rejected(Rejection::ProgrammingMode))
        ));
    }
}

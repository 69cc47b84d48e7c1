//! Commands accepted by the target controller and their responses

use std::collections::BTreeMap;
use std::sync::Arc;

use avrbridge_core::memory::{MemoryAddressRange, MemoryType};
use avrbridge_core::register::{Register, RegisterDescriptors};
use avrbridge_core::target::{PinDescriptor, PinState, TargetDescriptor, TargetState};
use bitflags::bitflags;

use crate::worker::TargetControllerState;

bitflags! {
    /// What must hold before a command may reach the debug tool
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Preconditions: u8 {
        /// The controller is active (not suspended)
        const ACTIVE_SESSION = 1 << 0;
        /// The target is stopped
        const STOPPED_TARGET = 1 << 1;
        /// Programming mode is disabled
        const DEBUG_MODE = 1 << 2;
    }
}

/// A request to the target controller
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetControllerState,
    Suspend,
    Resume,
    Shutdown,
    GetTargetDescriptor,
    GetTargetState,
    StopTargetExecution,
    ResumeTargetExecution {
        from: Option<u32>,
        to: Option<u32>,
    },
    StepTargetExecution {
        from: Option<u32>,
    },
    ResetTarget,
    ReadRegisters(RegisterDescriptors),
    WriteRegisters(Vec<Register>),
    ReadMemory {
        memory_type: MemoryType,
        start: u32,
        bytes: u32,
        excluded: Vec<MemoryAddressRange>,
    },
    WriteMemory {
        memory_type: MemoryType,
        start: u32,
        data: Vec<u8>,
    },
    EraseMemory(MemoryType),
    SetBreakpoint(u32),
    RemoveBreakpoint(u32),
    GetProgramCounter,
    SetProgramCounter(u32),
    GetStackPointer,
    GetPinStates {
        variant_id: usize,
    },
    SetPinState {
        variant_id: usize,
        pin: PinDescriptor,
        state: PinState,
    },
    EnableProgrammingMode,
    DisableProgrammingMode,
}

impl Command {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetControllerState => "GetControllerState",
            Self::Suspend => "Suspend",
            Self::Resume => "Resume",
            Self::Shutdown => "Shutdown",
            Self::GetTargetDescriptor => "GetTargetDescriptor",
            Self::GetTargetState => "GetTargetState",
            Self::StopTargetExecution => "StopTargetExecution",
            Self::ResumeTargetExecution { .. } => "ResumeTargetExecution",
            Self::StepTargetExecution { .. } => "StepTargetExecution",
            Self::ResetTarget => "ResetTarget",
            Self::ReadRegisters(_) => "ReadRegisters",
            Self::WriteRegisters(_) => "WriteRegisters",
            Self::ReadMemory { .. } => "ReadMemory",
            Self::WriteMemory { .. } => "WriteMemory",
            Self::EraseMemory(_) => "EraseMemory",
            Self::SetBreakpoint(_) => "SetBreakpoint",
            Self::RemoveBreakpoint(_) => "RemoveBreakpoint",
            Self::GetProgramCounter => "GetProgramCounter",
            Self::SetProgramCounter(_) => "SetProgramCounter",
            Self::GetStackPointer => "GetStackPointer",
            Self::GetPinStates { .. } => "GetPinStates",
            Self::SetPinState { .. } => "SetPinState",
            Self::EnableProgrammingMode => "EnableProgrammingMode",
            Self::DisableProgrammingMode => "DisableProgrammingMode",
        }
    }

    /// Conditions checked before the command is executed
    ///
    /// RAM is only reachable through the debug interface, so RAM accesses
    /// also require programming mode to be off.
    pub fn preconditions(&self) -> Preconditions {
        use Preconditions as P;

        let debug = P::ACTIVE_SESSION | P::STOPPED_TARGET | P::DEBUG_MODE;
        let memory = |memory_type: &MemoryType| {
            if *memory_type == MemoryType::Ram {
                debug
            } else {
                P::ACTIVE_SESSION | P::STOPPED_TARGET
            }
        };

        match self {
            Self::GetControllerState
            | Self::Suspend
            | Self::Resume
            | Self::Shutdown
            | Self::GetTargetDescriptor => P::empty(),
            Self::GetTargetState | Self::StopTargetExecution => P::ACTIVE_SESSION,
            Self::ResetTarget => P::ACTIVE_SESSION | P::DEBUG_MODE,
            Self::ReadMemory { memory_type, .. }
            | Self::WriteMemory { memory_type, .. }
            | Self::EraseMemory(memory_type) => memory(memory_type),
            Self::EnableProgrammingMode | Self::DisableProgrammingMode => {
                P::ACTIVE_SESSION | P::STOPPED_TARGET
            }
            Self::ResumeTargetExecution { .. }
            | Self::StepTargetExecution { .. }
            | Self::ReadRegisters(_)
            | Self::WriteRegisters(_)
            | Self::SetBreakpoint(_)
            | Self::RemoveBreakpoint(_)
            | Self::GetProgramCounter
            | Self::SetProgramCounter(_)
            | Self::GetStackPointer
            | Self::GetPinStates { .. }
            | Self::SetPinState { .. } => debug,
        }
    }
}

/// The result of a successful command
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ok,
    ControllerState(TargetControllerState),
    TargetDescriptor(Arc<TargetDescriptor>),
    TargetState(TargetState),
    Registers(Vec<Register>),
    Memory(Vec<u8>),
    ProgramCounter(u32),
    StackPointer(u32),
    PinStates(BTreeMap<u16, PinState>),
}

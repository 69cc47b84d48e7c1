//! Target register model

use std::collections::BTreeSet;

use crate::memory::MemoryType;

/// Register classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegisterType {
    /// General purpose CPU register (r0 to r31)
    GeneralPurpose,
    /// Program counter
    ProgramCounter,
    /// Stack pointer
    StackPointer,
    /// Status register (SREG)
    Status,
    /// IO port register (DDRx, PORTx, PINx)
    Port,
    /// Any other peripheral register
    Other,
}

/// Description of a single target register
///
/// Field order matters: the derived ordering sorts descriptors by register
/// type first and start address second, which is the order in which batch
/// reads group and cover registers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegisterDescriptor {
    /// Register classification
    pub register_type: RegisterType,
    /// Address of the register's first byte, if it is memory mapped
    pub start_address: Option<u32>,
    /// Size in bytes
    pub size: u32,
    /// Memory the register lives in
    pub memory_type: MemoryType,
    /// Register name
    pub name: Option<String>,
    /// Group name (peripheral or register group)
    pub group_name: Option<String>,
    /// Human readable description
    pub description: Option<String>,
    /// Register can be read
    pub readable: bool,
    /// Register can be written
    pub writable: bool,
}

impl RegisterDescriptor {
    /// A readable and writable register of the given type
    pub fn new(register_type: RegisterType, start_address: Option<u32>, size: u32) -> Self {
        Self {
            register_type,
            start_address,
            size,
            memory_type: MemoryType::Ram,
            name: None,
            group_name: None,
            description: None,
            readable: true,
            writable: true,
        }
    }

    /// Set the name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the group name
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group_name = Some(group.into());
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A set of register descriptors, kept in descriptor order
pub type RegisterDescriptors = BTreeSet<RegisterDescriptor>;

/// A register value read from, or to be written to, the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    /// Descriptor of the register
    pub descriptor: RegisterDescriptor,
    /// Register value, most significant byte first
    pub value: Vec<u8>,
}

impl Register {
    /// Create a register value
    pub fn new(descriptor: RegisterDescriptor, value: Vec<u8>) -> Self {
        Self { descriptor, value }
    }

    /// Interpret the value as a big-endian unsigned integer
    pub fn value_u32(&self) -> u32 {
        self.value
            .iter()
            .fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte))
    }

    /// The value with the least significant byte first
    pub fn value_lsb_first(&self) -> Vec<u8> {
        self.value.iter().rev().copied().collect()
    }
}

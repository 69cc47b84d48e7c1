//! Target description summary

use std::collections::BTreeMap;
use std::path::Path;

use avrbridge_controller::target_descriptor;
use avrbridge_core::description::TargetDescriptionFile;
use avrbridge_core::memory::MemoryAccess;
use avrbridge_core::register::RegisterType;

pub fn target_info(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let description = TargetDescriptionFile::load(path)?;
    let descriptor = target_descriptor(&description)?;
    let parameters = description.target_parameters();

    println!("Target Information");
    println!("==================");
    println!();
    println!("Name:            {}", descriptor.name);
    println!("Signature:       {}", descriptor.signature);
    match descriptor.family {
        Some(family) => println!("Family:          {}", family),
        None => println!("Family:          unknown"),
    }
    let interfaces: Vec<String> = description
        .physical_interfaces()
        .iter()
        .map(ToString::to_string)
        .collect();
    println!("Interfaces:      {}", interfaces.join(", "));
    if let Some(revision) = parameters.ocd_revision {
        println!("OCD revision:    {}", revision);
    }

    println!();
    println!("Memories:");
    for memory in descriptor.memory_descriptors.values() {
        let mut line = format!(
            "  {:<8} {}  {:>6} bytes  {}",
            memory.memory_type.name(),
            memory.address_range,
            memory.size(),
            access_flags(memory.access)
        );
        if let Some(page_size) = memory.page_size {
            line.push_str(&format!("  page {}", page_size));
        }
        println!("{}", line);
    }

    let mut register_counts: BTreeMap<String, usize> = BTreeMap::new();
    for register in &descriptor.register_descriptors {
        let group = match register.register_type {
            RegisterType::GeneralPurpose => "general purpose".to_string(),
            RegisterType::ProgramCounter
            | RegisterType::StackPointer
            | RegisterType::Status => "cpu".to_string(),
            _ => register
                .group_name
                .clone()
                .unwrap_or_else(|| "other".to_string()),
        };
        *register_counts.entry(group).or_default() += 1;
    }

    println!();
    println!("Registers:");
    for (group, count) in &register_counts {
        println!("  {:<20} {}", group, count);
    }

    if !descriptor.variants.is_empty() {
        println!();
        println!("Variants:");
        for variant in &descriptor.variants {
            println!(
                "  {:<20} {:<12} {} pins",
                variant.name,
                variant.package_name,
                variant.pin_descriptors.len()
            );
        }
    }

    Ok(())
}

fn access_flags(access: MemoryAccess) -> String {
    let mut flags = String::new();
    flags.push(if access.contains(MemoryAccess::READABLE) { 'r' } else { '-' });
    flags.push(if access.contains(MemoryAccess::WRITABLE) { 'w' } else { '-' });
    flags.push(if access.contains(MemoryAccess::WRITABLE_DURING_SESSION) { 's' } else { '-' });
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_flags() {
        assert_eq!(access_flags(MemoryAccess::all()), "rws");
        assert_eq!(access_flags(MemoryAccess::READABLE), "r--");
        assert_eq!(access_flags(MemoryAccess::empty()), "---");
    }
}

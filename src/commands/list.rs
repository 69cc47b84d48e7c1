//! List command implementation

use avrbridge_edbg::{list_devices, EdbgToolModel};

/// List supported tools, then the ones found on the USB bus
pub fn list_tools() -> Result<(), Box<dyn std::error::Error>> {
    println!("Supported tools:");
    println!();
    println!("{:<16} {:<16} {:>9}", "Name", "Tool", "USB ID");
    println!("{}", "-".repeat(43));
    for model in EdbgToolModel::ALL {
        println!(
            "{:<16} {:<16} {:04X}:{:04X}",
            model.config_name(),
            model.display_name(),
            model.vendor_id(),
            model.product_id()
        );
    }

    println!();
    let devices = list_devices()?;
    if devices.is_empty() {
        println!("No tools connected");
        return Ok(());
    }

    println!("Connected tools:");
    println!();
    for device in devices {
        let name = EdbgToolModel::ALL
            .into_iter()
            .find(|m| m.product_id() == device.product_id)
            .map_or("unknown", EdbgToolModel::config_name);
        println!("  {:<16} {}", name, device);
    }
    Ok(())
}

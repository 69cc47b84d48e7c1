//! AVR8 specific extraction from target description files

use std::collections::BTreeMap;

use super::types::{RegisterGroup, Register};
use super::{DescriptionError, TargetDescriptionFile};
use crate::memory::MemoryType;
use crate::register::{RegisterDescriptor, RegisterDescriptors, RegisterType};
use crate::target::{
    Family, FuseBitsDescriptor, FuseType, IspParameters, PadDescriptor, PhysicalInterface,
    PinDescriptor, TargetParameters, TargetSignature, TargetVariant,
};

const ISP_GROUP: &str = "isp_interface";

impl TargetDescriptionFile {
    /// Device family, from the `family` attribute
    pub fn family(&self) -> Option<Family> {
        self.family_name
            .as_deref()
            .and_then(Family::from_description_name)
    }

    /// Device signature, from the `signatures` property group
    pub fn signature(&self) -> Result<TargetSignature, DescriptionError> {
        const NAMES: [&str; 3] = ["signature0", "signature1", "signature2"];

        let mut bytes = [0u8; 3];
        for (byte, name) in bytes.iter_mut().zip(NAMES) {
            let value = self
                .property_hex("signatures", name)
                .ok_or(DescriptionError::MissingProperty {
                    group: "signatures",
                    property: name,
                })?;
            *byte = u8::try_from(value).map_err(|_| DescriptionError::InvalidValue {
                name: name.to_string(),
                value: value.to_string(),
            })?;
        }

        Ok(TargetSignature(bytes))
    }

    /// Physical debug interfaces listed in the `interfaces` element
    pub fn physical_interfaces(&self) -> Vec<PhysicalInterface> {
        let mut interfaces: Vec<_> = self
            .interfaces
            .iter()
            .filter_map(|i| {
                i.interface_type
                    .as_deref()
                    .and_then(PhysicalInterface::from_description_name)
            })
            .collect();
        interfaces.dedup();
        interfaces
    }

    /// Whether the target can be programmed over ISP
    pub fn supports_isp(&self) -> bool {
        self.interfaces
            .iter()
            .any(|i| i.interface_type.as_deref() == Some("isp"))
    }

    fn cpu_register_group(&self) -> Option<&RegisterGroup> {
        self.module_register_group("cpu", "cpu")
    }

    fn cpu_register(&self, names: &[&str]) -> Option<&Register> {
        let group = self.cpu_register_group()?;
        names.iter().find_map(|name| group.registers.get(*name))
    }

    fn eeprom_register(&self, name: &str) -> Option<&Register> {
        self.module_register_group("eeprom", "eeprom")
            .and_then(|g| g.registers.get(name))
    }

    /// Extract the per-target parameters
    ///
    /// Every field the file provides is filled in. Which of them are required
    /// is decided by the debug interface once the config variant is known.
    pub fn target_parameters(&self) -> TargetParameters {
        let mut params = TargetParameters {
            family: self.family(),
            ..Default::default()
        };

        if let Some(prog) = self.address_space("prog") {
            params.flash_size = Some(prog.size);
            params.flash_start_address = Some(prog.start);

            let app = ["app_section", "progmem", "flash"]
                .iter()
                .find_map(|name| prog.segment("flash", name));
            if let Some(app) = app {
                params.app_section_start_address = Some(app.start);
                params.app_section_size = Some(app.size);
                params.flash_page_size = app.page_size;
            }

            let boot = ["boot_section_1", "boot_section"]
                .iter()
                .find_map(|name| prog.segment("flash", name));
            if let Some(boot) = boot {
                // Word address
                params.boot_section_start_address = Some(boot.start / 2);
                params.boot_section_size = Some(boot.size);
            }
        }

        if let Some(data) = self.address_space("data") {
            if let Some(ram) = data.first_segment_of_type("ram") {
                params.ram_start_address = Some(ram.start);
                params.ram_size = Some(ram.size);
            }
            if let Some(io) = data.first_segment_of_type("io") {
                params.mapped_io_segment_start_address = Some(io.start);
                params.mapped_io_segment_size = Some(io.size);
            }
            if let Some(regs) = data.first_segment_of_type("regs") {
                params.gp_register_start_address = Some(regs.start);
                params.gp_register_size = Some(regs.size);
            }
        }

        let eeprom = match self.address_space("eeprom") {
            Some(space) => space.first_segment_of_type("eeprom"),
            None => self
                .address_space("data")
                .and_then(|data| data.first_segment_of_type("eeprom")),
        };
        if let Some(eeprom) = eeprom {
            params.eeprom_start_address = Some(eeprom.start);
            params.eeprom_size = Some(eeprom.size);
            params.eeprom_page_size = eeprom.page_size;
        }

        let cpu_offset = self
            .peripheral_register_group_offset("cpu", "cpu", "cpu")
            .unwrap_or(0);

        if let Some(sreg) = self.cpu_register(&["sreg"]) {
            params.status_register_start_address = Some(cpu_offset + sreg.offset);
            params.status_register_size = Some(sreg.size);
        }

        if let Some(sp) = self.cpu_register(&["sp"]) {
            params.stack_pointer_register_low_address = Some(cpu_offset + sp.offset);
            params.stack_pointer_register_size = Some(sp.size);
        } else {
            if let Some(spl) = self.cpu_register(&["spl"]) {
                params.stack_pointer_register_low_address = Some(cpu_offset + spl.offset);
                params.stack_pointer_register_size = Some(spl.size);
            }
            if let Some(sph) = self.cpu_register(&["sph"]) {
                params.stack_pointer_register_size =
                    Some(params.stack_pointer_register_size.unwrap_or(0) + sph.size);
            }
        }

        let interfaces = self.physical_interfaces();
        if interfaces.contains(&PhysicalInterface::DebugWire)
            || interfaces.contains(&PhysicalInterface::Jtag)
        {
            self.load_debug_wire_and_jtag_parameters(&mut params);
        }
        if interfaces.contains(&PhysicalInterface::Pdi) {
            self.load_pdi_parameters(&mut params);
        }
        if interfaces.contains(&PhysicalInterface::Updi) {
            self.load_updi_parameters(&mut params);
        }

        params
    }

    fn load_debug_wire_and_jtag_parameters(&self, params: &mut TargetParameters) {
        params.ocd_revision = self
            .property("ocd", "ocd_revision")
            .and_then(|v| v.trim().parse().ok());
        params.ocd_data_register = self.property_hex("ocd", "ocd_datareg");

        let boot_load = self.module_register_group("boot_load", "boot_load");
        let spm_register = ["spmcsr", "spmcr"].iter().find_map(|name| {
            self.cpu_register(&[*name])
                .or_else(|| boot_load.and_then(|g| g.registers.get(*name)))
        });
        params.spmc_register_start_address = spm_register.map(|r| r.offset);

        params.osccal_address = self
            .cpu_register(&["osccal", "osccal0", "osccal1", "fosccal", "sosccala"])
            .map(|r| r.offset);

        if let Some(eear) = self.eeprom_register("eear") {
            params.eeprom_address_register_low = Some(eear.offset);
            params.eeprom_address_register_high = Some(if eear.size == 2 {
                eear.offset + 1
            } else {
                eear.offset
            });
        } else if let Some(eearl) = self.eeprom_register("eearl") {
            params.eeprom_address_register_low = Some(eearl.offset);
            params.eeprom_address_register_high = Some(
                self.eeprom_register("eearh")
                    .map_or(eearl.offset, |eearh| eearh.offset),
            );
        }

        params.eeprom_data_register_address = self.eeprom_register("eedr").map(|r| r.offset);
        params.eeprom_control_register_address = self.eeprom_register("eecr").map(|r| r.offset);
    }

    fn load_pdi_parameters(&self, params: &mut TargetParameters) {
        const GROUP: &str = "pdi_interface";

        if !self.property_groups.contains_key(GROUP) {
            return;
        }

        params.app_section_pdi_offset = self.property_hex(GROUP, "app_section_offset");
        params.boot_section_pdi_offset = self.property_hex(GROUP, "boot_section_offset");
        params.ram_pdi_offset = self.property_hex(GROUP, "datamem_offset");
        params.eeprom_pdi_offset = self.property_hex(GROUP, "eeprom_offset");
        params.user_signatures_pdi_offset = self.property_hex(GROUP, "user_signatures_offset");
        params.product_signatures_pdi_offset = self.property_hex(GROUP, "prod_signatures_offset");
        params.fuse_registers_pdi_offset = self.property_hex(GROUP, "fuse_registers_offset");
        params.lock_registers_pdi_offset = self.property_hex(GROUP, "lock_registers_offset");

        params.nvm_module_base_address = self.peripheral_register_group_offset("nvm", "nvm", "nvm");
        params.mcu_module_base_address = self.peripheral_register_group_offset("mcu", "mcu", "mcu");
    }

    fn load_updi_parameters(&self, params: &mut TargetParameters) {
        const GROUP: &str = "updi_interface";

        params.nvm_module_base_address =
            self.peripheral_register_group_offset("nvmctrl", "nvmctrl", "nvmctrl");
        params.ocd_module_address = self.property_hex(GROUP, "ocd_base_addr");
        params.program_memory_updi_start_address = self.property_hex(GROUP, "progmem_offset");

        let segment_of_type = |segment_type: &str| {
            self.address_space("data")
                .and_then(|data| data.first_segment_of_type(segment_type))
        };

        let signatures = match self.address_space("signatures") {
            Some(space) => space.first_segment_of_type("signatures"),
            None => self
                .address_space("data")
                .and_then(|data| data.segment("signatures", "signatures")),
        };
        if let Some(signatures) = signatures {
            params.signature_segment_start_address = Some(signatures.start);
            params.signature_segment_size = Some(signatures.size);
        }

        if let Some(fuses) = segment_of_type("fuses") {
            params.fuse_segment_start_address = Some(fuses.start);
            params.fuse_segment_size = Some(fuses.size);
        }

        if let Some(lockbits) = segment_of_type("lockbits") {
            params.lockbits_segment_start_address = Some(lockbits.start);
        }
    }

    /// Locate a fuse bit field by name
    pub fn fuse_bits_descriptor(&self, bit_field_name: &str) -> Option<FuseBitsDescriptor> {
        let fuse_offset = self
            .peripheral_register_group_offset("fuse", "fuse", "fuse")
            .unwrap_or(0);
        let group = self.module_register_group("fuse", "fuse")?;

        group.registers.values().find_map(|register| {
            let fuse_type = FuseType::from_register_name(&register.name)?;
            let field = register.bit_fields.get(bit_field_name)?;
            Some(FuseBitsDescriptor {
                byte_address: fuse_offset + register.offset,
                fuse_type,
                bit_mask: field.mask as u8,
            })
        })
    }

    /// The debugWire enable fuse bit
    pub fn dwen_fuse_bits_descriptor(&self) -> Option<FuseBitsDescriptor> {
        self.fuse_bits_descriptor("dwen")
    }

    /// The serial programming enable fuse bit
    pub fn spien_fuse_bits_descriptor(&self) -> Option<FuseBitsDescriptor> {
        self.fuse_bits_descriptor("spien")
    }

    /// The on-chip debug enable fuse bit
    pub fn ocden_fuse_bits_descriptor(&self) -> Option<FuseBitsDescriptor> {
        self.fuse_bits_descriptor("ocden")
    }

    /// The JTAG enable fuse bit
    pub fn jtagen_fuse_bits_descriptor(&self) -> Option<FuseBitsDescriptor> {
        self.fuse_bits_descriptor("jtagen")
    }

    /// ISP programming mode parameters
    ///
    /// Every parameter is required. The poll value is hex, the rest decimal.
    pub fn isp_parameters(&self) -> Result<IspParameters, DescriptionError> {
        let decimal = |property: &'static str| -> Result<u8, DescriptionError> {
            let value = self
                .property(ISP_GROUP, property)
                .ok_or(DescriptionError::MissingProperty {
                    group: ISP_GROUP,
                    property,
                })?;
            value
                .trim()
                .parse::<u8>()
                .map_err(|_| DescriptionError::InvalidValue {
                    name: property.to_string(),
                    value: value.to_string(),
                })
        };

        let poll_value = self
            .property_hex(ISP_GROUP, "ispenterprogmode_pollvalue")
            .ok_or(DescriptionError::MissingProperty {
                group: ISP_GROUP,
                property: "ispenterprogmode_pollvalue",
            })?;

        Ok(IspParameters {
            program_mode_timeout: decimal("ispenterprogmode_timeout")?,
            program_mode_stabilization_delay: decimal("ispenterprogmode_stabdelay")?,
            program_mode_command_execution_delay: decimal("ispenterprogmode_cmdexedelay")?,
            program_mode_sync_loops: decimal("ispenterprogmode_synchloops")?,
            program_mode_byte_delay: decimal("ispenterprogmode_bytedelay")?,
            program_mode_poll_value: poll_value as u8,
            program_mode_poll_index: decimal("ispenterprogmode_pollindex")?,
            program_mode_pre_delay: decimal("ispleaveprogmode_predelay")?,
            program_mode_post_delay: decimal("ispleaveprogmode_postdelay")?,
            read_signature_poll_index: decimal("ispreadsign_pollindex")?,
            read_fuse_poll_index: decimal("ispreadfuse_pollindex")?,
            read_lock_poll_index: decimal("ispreadlock_pollindex")?,
        })
    }

    /// GPIO pads, keyed by lowercase pad name
    ///
    /// Older parts have one register group per port with `PORTx`, `PINx` and
    /// `DDRx` registers at absolute offsets. Newer parts share a single `PORT`
    /// group with `OUT`, `IN` and `DIR` registers relative to each instance.
    pub fn pad_descriptors(&self) -> BTreeMap<String, PadDescriptor> {
        let mut pads = BTreeMap::new();

        let Some(port_peripheral) = self.peripheral_modules.get("port") else {
            return pads;
        };
        let port_module = self.modules.get("port");

        for (instance_name, instance) in &port_peripheral.instances {
            if !instance_name.starts_with("port") {
                continue;
            }

            let instance_offset = instance
                .register_groups
                .get(instance_name)
                .and_then(|g| g.offset)
                .unwrap_or(0);

            for signal in &instance.signals {
                let Some(index) = signal.index else {
                    continue;
                };

                let pad = pads
                    .entry(signal.pad_name.clone())
                    .or_insert_with(|| PadDescriptor {
                        name: signal.pad_name.clone(),
                        ..Default::default()
                    });
                pad.gpio_pin_number = Some(index as u8);

                let Some(module) = port_module else {
                    continue;
                };

                if let Some(group) = module.register_groups.get(instance_name) {
                    for (name, register) in &group.registers {
                        if name.starts_with("port") {
                            pad.port_address = Some(register.offset);
                        } else if name.starts_with("pin") {
                            pad.pin_address = Some(register.offset);
                        } else if name.starts_with("ddr") {
                            pad.ddr_address = Some(register.offset);
                        }
                    }
                } else if let Some(group) = module.register_groups.get("port") {
                    for (name, register) in &group.registers {
                        let address = Some(instance_offset + register.offset);
                        match name.as_str() {
                            "out" => pad.port_address = address,
                            "in" => pad.pin_address = address,
                            "dir" => pad.ddr_address = address,
                            _ => {}
                        }
                    }
                }
            }
        }

        pads
    }

    /// Package variants with their pin mappings
    pub fn target_variants(&self) -> Vec<TargetVariant> {
        self.variants
            .iter()
            .filter(|v| !v.disabled)
            .enumerate()
            .map(|(id, variant)| {
                let pin_descriptors = variant
                    .pinout
                    .as_ref()
                    .and_then(|name| self.pinouts.get(name))
                    .map(|pinout| {
                        pinout
                            .pins
                            .iter()
                            .map(|pin| {
                                (
                                    pin.position,
                                    PinDescriptor {
                                        number: pin.position,
                                        pad_name: pin.pad.clone(),
                                    },
                                )
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                TargetVariant {
                    id,
                    name: variant.ordercode.clone(),
                    package_name: variant.package.clone(),
                    pin_descriptors,
                }
            })
            .collect()
    }

    /// Descriptors for every peripheral register in the data address space
    pub fn peripheral_register_descriptors(&self) -> RegisterDescriptors {
        let mut descriptors = RegisterDescriptors::new();

        for peripheral in self.peripheral_modules.values() {
            for instance in peripheral.instances.values() {
                for instance_group in instance.register_groups.values() {
                    if instance_group.address_space_id.as_deref() != Some("data") {
                        continue;
                    }

                    let module_group_name = instance_group
                        .name_in_module
                        .as_deref()
                        .unwrap_or(&instance_group.name);
                    let Some(module_group) =
                        self.module_register_group(&peripheral.name, module_group_name)
                    else {
                        continue;
                    };

                    let register_type = if peripheral.name == "port" {
                        RegisterType::Port
                    } else {
                        RegisterType::Other
                    };

                    for register in module_group.registers.values() {
                        if register.size < 1 {
                            continue;
                        }

                        descriptors.insert(RegisterDescriptor {
                            register_type,
                            start_address: Some(
                                register.offset + instance_group.offset.unwrap_or(0),
                            ),
                            size: register.size,
                            memory_type: MemoryType::Ram,
                            name: Some(register.name.clone()),
                            group_name: Some(instance_group.name.clone()),
                            description: register.caption.clone().filter(|c| !c.is_empty()),
                            readable: register.readable(),
                            writable: register.writable(),
                        });
                    }
                }
            }
        }

        descriptors
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::atmega328p;
    use super::*;

    #[test]
    fn test_target_parameters_atmega328p() {
        let params = atmega328p().target_parameters();

        assert_eq!(params.family, Some(Family::Mega));
        assert_eq!(params.flash_size, Some(0x8000));
        assert_eq!(params.flash_page_size, Some(0x80));
        assert_eq!(params.boot_section_start_address, Some(0x3F00));
        assert_eq!(params.ram_start_address, Some(0x100));
        assert_eq!(params.ram_size, Some(0x800));
        assert_eq!(params.mapped_io_segment_start_address, Some(0x20));
        assert_eq!(params.gp_register_start_address, Some(0));
        assert_eq!(params.eeprom_size, Some(0x400));
        assert_eq!(params.eeprom_page_size, Some(4));
        assert_eq!(params.status_register_start_address, Some(0x5F));
        assert_eq!(params.stack_pointer_register_low_address, Some(0x5D));
        assert_eq!(params.stack_pointer_register_size, Some(2));
        assert_eq!(params.ocd_revision, Some(1));
        assert_eq!(params.ocd_data_register, Some(0x51));
        assert_eq!(params.spmc_register_start_address, Some(0x57));
        assert_eq!(params.osccal_address, Some(0x66));
        assert_eq!(params.eeprom_address_register_low, Some(0x41));
        assert_eq!(params.eeprom_address_register_high, Some(0x42));
        assert_eq!(params.eeprom_data_register_address, Some(0x40));
        assert_eq!(params.eeprom_control_register_address, Some(0x3F));
        assert_eq!(params.app_section_pdi_offset, None);
    }

    #[test]
    fn test_signature_and_interfaces() {
        let tdf = atmega328p();
        assert_eq!(tdf.signature().unwrap(), TargetSignature::new(0x1E, 0x95, 0x0F));
        assert_eq!(tdf.physical_interfaces(), vec![PhysicalInterface::DebugWire]);
        assert!(tdf.supports_isp());
    }

    #[test]
    fn test_fuse_bits_descriptors() {
        let tdf = atmega328p();

        let dwen = tdf.dwen_fuse_bits_descriptor().unwrap();
        assert_eq!(dwen.fuse_type, FuseType::High);
        assert_eq!(dwen.byte_address, 1);
        assert_eq!(dwen.bit_mask, 0x40);

        let spien = tdf.spien_fuse_bits_descriptor().unwrap();
        assert_eq!(spien.bit_mask, 0x20);

        assert!(tdf.ocden_fuse_bits_descriptor().is_none());
    }

    #[test]
    fn test_isp_parameters() {
        let isp = atmega328p().isp_parameters().unwrap();
        assert_eq!(isp.program_mode_timeout, 200);
        assert_eq!(isp.program_mode_poll_value, 0x53);
        assert_eq!(isp.read_fuse_poll_index, 4);
    }

    #[test]
    fn test_isp_parameters_missing_property() {
        let mut tdf = atmega328p();
        tdf.property_groups
            .get_mut("isp_interface")
            .unwrap()
            .properties
            .remove("ispreadlock_pollindex");

        assert!(matches!(
            tdf.isp_parameters(),
            Err(DescriptionError::MissingProperty {
                property: "ispreadlock_pollindex",
                ..
            })
        ));
    }

    #[test]
    fn test_pad_descriptors() {
        let pads = atmega328p().pad_descriptors();
        let pb5 = &pads["pb5"];
        assert_eq!(pb5.gpio_pin_number, Some(5));
        assert_eq!(pb5.port_address, Some(0x25));
        assert_eq!(pb5.ddr_address, Some(0x24));
        assert_eq!(pb5.pin_address, Some(0x23));
        assert!(pb5.is_gpio());
    }

    #[test]
    fn test_target_variants() {
        let variants = atmega328p().target_variants();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].name, "ATmega328P-PU");
        assert_eq!(variants[0].pin_descriptors[&19].pad_name, "pb5");
    }

    #[test]
    fn test_peripheral_register_descriptors() {
        let descriptors = atmega328p().peripheral_register_descriptors();

        let portb = descriptors
            .iter()
            .find(|d| d.name.as_deref() == Some("portb"))
            .unwrap();
        assert_eq!(portb.register_type, RegisterType::Port);
        assert_eq!(portb.start_address, Some(0x25));

        // Fuse registers live in the fuses address space
        assert!(descriptors.iter().all(|d| d.name.as_deref() != Some("high")));
    }
}

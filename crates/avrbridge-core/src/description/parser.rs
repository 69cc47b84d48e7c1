//! ATDF XML parsing
//!
//! Converts the XML element tree into the structures in [`super::types`].
//! Unknown elements are ignored. Names are lowercased on the way in.

use std::collections::BTreeMap;

use roxmltree::{Document, Node};

use super::types::*;
use super::{DescriptionError, TargetDescriptionFile};

/// Parse a number that can be hex (0x...) or decimal
pub(crate) fn parse_number(s: &str) -> Option<u32> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

/// Parse a hex number, with or without the 0x prefix
pub(crate) fn parse_hex(s: &str) -> Option<u32> {
    let s = s.trim();
    let hex = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(hex, 16).ok()
}

fn lower(s: &str) -> String {
    s.to_ascii_lowercase()
}

fn elements<'a, 'input>(
    node: Node<'a, 'input>,
    tag: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(move |n| n.is_element() && n.has_tag_name(tag))
}

fn child<'a, 'input>(node: Node<'a, 'input>, tag: &'static str) -> Option<Node<'a, 'input>> {
    elements(node, tag).next()
}

fn required_attribute<'a>(
    node: Node<'a, '_>,
    name: &'static str,
) -> Result<&'a str, DescriptionError> {
    node.attribute(name).ok_or(DescriptionError::Missing {
        element: node.tag_name().name().to_string(),
        attribute: name,
    })
}

fn number_attribute(node: Node<'_, '_>, name: &'static str) -> Result<u32, DescriptionError> {
    let value = required_attribute(node, name)?;
    parse_number(value).ok_or_else(|| DescriptionError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn optional_number_attribute(
    node: Node<'_, '_>,
    name: &'static str,
) -> Result<Option<u32>, DescriptionError> {
    match node.attribute(name) {
        Some(_) => number_attribute(node, name).map(Some),
        None => Ok(None),
    }
}

/// Parse an ATDF document
pub fn parse(text: &str) -> Result<TargetDescriptionFile, DescriptionError> {
    let document = Document::parse(text)?;
    let root = document.root_element();

    let device = child(root, "devices")
        .and_then(|devices| child(devices, "device"))
        .ok_or(DescriptionError::Missing {
            element: "devices".to_string(),
            attribute: "device",
        })?;

    let mut tdf = TargetDescriptionFile {
        name: required_attribute(device, "name")?.to_string(),
        architecture: device.attribute("architecture").map(str::to_string),
        family_name: device.attribute("family").map(str::to_string),
        ..Default::default()
    };

    if let Some(spaces) = child(device, "address-spaces") {
        for node in elements(spaces, "address-space") {
            let space = parse_address_space(node)?;
            tdf.address_spaces.insert(space.id.clone(), space);
        }
    }

    if let Some(peripherals) = child(device, "peripherals") {
        for node in elements(peripherals, "module") {
            let module = parse_peripheral_module(node)?;
            tdf.peripheral_modules.insert(module.name.clone(), module);
        }
    }

    if let Some(interfaces) = child(device, "interfaces") {
        for node in elements(interfaces, "interface") {
            tdf.interfaces.push(Interface {
                name: required_attribute(node, "name")?.to_string(),
                interface_type: node.attribute("type").map(lower),
            });
        }
    }

    if let Some(groups) = child(device, "property-groups") {
        for node in elements(groups, "property-group") {
            let group = parse_property_group(node)?;
            tdf.property_groups.insert(group.name.clone(), group);
        }
    }

    if let Some(modules) = child(root, "modules") {
        for node in elements(modules, "module") {
            let module = parse_module(node)?;
            tdf.modules.insert(module.name.clone(), module);
        }
    }

    if let Some(variants) = child(root, "variants") {
        for node in elements(variants, "variant") {
            tdf.variants.push(Variant {
                ordercode: node.attribute("ordercode").unwrap_or_default().to_string(),
                package: node.attribute("package").unwrap_or_default().to_string(),
                pinout: node.attribute("pinout").map(lower),
                disabled: node.attribute("disabled").map_or(false, |d| d == "1" || d == "true"),
            });
        }
    }

    if let Some(pinouts) = child(root, "pinouts") {
        for node in elements(pinouts, "pinout") {
            let mut pinout = Pinout {
                name: lower(required_attribute(node, "name")?),
                pins: Vec::new(),
            };
            for pin in elements(node, "pin") {
                let position = required_attribute(pin, "position")?;
                let Ok(position) = position.trim().parse::<u16>() else {
                    // Some packages use ball grid names (e.g. "A1"), which have no pin number
                    continue;
                };
                pinout.pins.push(Pin {
                    position,
                    pad: lower(required_attribute(pin, "pad")?),
                });
            }
            tdf.pinouts.insert(pinout.name.clone(), pinout);
        }
    }

    log::debug!(
        "Parsed target description for {} ({} address spaces, {} modules)",
        tdf.name,
        tdf.address_spaces.len(),
        tdf.modules.len()
    );

    Ok(tdf)
}

fn parse_address_space(node: Node<'_, '_>) -> Result<AddressSpace, DescriptionError> {
    let mut space = AddressSpace {
        id: lower(required_attribute(node, "id")?),
        start: number_attribute(node, "start")?,
        size: number_attribute(node, "size")?,
        segments: Vec::new(),
    };

    for segment in elements(node, "memory-segment") {
        space.segments.push(MemorySegment {
            name: lower(required_attribute(segment, "name")?),
            segment_type: lower(required_attribute(segment, "type")?),
            start: number_attribute(segment, "start")?,
            size: number_attribute(segment, "size")?,
            page_size: optional_number_attribute(segment, "pagesize")?,
        });
    }

    Ok(space)
}

fn parse_property_group(node: Node<'_, '_>) -> Result<PropertyGroup, DescriptionError> {
    let mut group = PropertyGroup {
        name: lower(required_attribute(node, "name")?),
        properties: BTreeMap::new(),
    };

    for property in elements(node, "property") {
        group.properties.insert(
            lower(required_attribute(property, "name")?),
            required_attribute(property, "value")?.to_string(),
        );
    }

    Ok(group)
}

fn parse_register(node: Node<'_, '_>) -> Result<Register, DescriptionError> {
    let mut register = Register {
        name: lower(required_attribute(node, "name")?),
        caption: node.attribute("caption").map(str::to_string),
        offset: number_attribute(node, "offset")?,
        size: optional_number_attribute(node, "size")?.unwrap_or(1),
        access: node.attribute("ocd-rw").map(str::to_string),
        bit_fields: BTreeMap::new(),
    };

    for field in elements(node, "bitfield") {
        let bit_field = BitField {
            name: lower(required_attribute(field, "name")?),
            caption: field.attribute("caption").map(str::to_string),
            mask: number_attribute(field, "mask")?,
        };
        register.bit_fields.insert(bit_field.name.clone(), bit_field);
    }

    Ok(register)
}

fn parse_register_group(node: Node<'_, '_>) -> Result<RegisterGroup, DescriptionError> {
    let mut group = RegisterGroup {
        name: lower(required_attribute(node, "name")?),
        name_in_module: node.attribute("name-in-module").map(lower),
        caption: node.attribute("caption").map(str::to_string),
        offset: optional_number_attribute(node, "offset")?,
        address_space_id: node.attribute("address-space").map(lower),
        registers: BTreeMap::new(),
    };

    for register in elements(node, "register") {
        let register = parse_register(register)?;
        group.registers.insert(register.name.clone(), register);
    }

    Ok(group)
}

fn parse_module(node: Node<'_, '_>) -> Result<Module, DescriptionError> {
    let mut module = Module {
        name: lower(required_attribute(node, "name")?),
        caption: node.attribute("caption").map(str::to_string),
        register_groups: BTreeMap::new(),
    };

    for group in elements(node, "register-group") {
        let group = parse_register_group(group)?;
        module.register_groups.insert(group.name.clone(), group);
    }

    Ok(module)
}

fn parse_peripheral_module(node: Node<'_, '_>) -> Result<PeripheralModule, DescriptionError> {
    let mut module = PeripheralModule {
        name: lower(required_attribute(node, "name")?),
        instances: BTreeMap::new(),
    };

    for instance_node in elements(node, "instance") {
        let mut instance = ModuleInstance {
            name: lower(required_attribute(instance_node, "name")?),
            caption: instance_node.attribute("caption").map(str::to_string),
            ..Default::default()
        };

        for group in elements(instance_node, "register-group") {
            let group = parse_register_group(group)?;
            instance.register_groups.insert(group.name.clone(), group);
        }

        if let Some(signals) = child(instance_node, "signals") {
            for signal in elements(signals, "signal") {
                instance.signals.push(Signal {
                    pad_name: lower(required_attribute(signal, "pad")?),
                    index: optional_number_attribute(signal, "index")?,
                    function: signal.attribute("function").map(str::to_string),
                    group: signal.attribute("group").map(str::to_string),
                });
            }
        }

        module.instances.insert(instance.name.clone(), instance);
    }

    Ok(module)
}

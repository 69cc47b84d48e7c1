//! CMSIS-SVD generation
//!
//! Produces a System View Description of the target's peripherals from its
//! description file, so IDEs can present a register view. Every register
//! group instance in data space becomes one peripheral.

use avrbridge_core::description::{BitField, Register, TargetDescriptionFile};

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

struct Writer {
    out: String,
    depth: usize,
}

impl Writer {
    fn line(&mut self, text: &str) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn element(&mut self, name: &str, value: &str) {
        self.line(&format!("<{0}>{1}</{0}>", name, escape(value)));
    }

    fn open(&mut self, name: &str) {
        self.line(&format!("<{}>", name));
        self.depth += 1;
    }

    fn close(&mut self, name: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.line(&format!("</{}>", name));
    }
}

fn access(register: &Register) -> &'static str {
    match (register.readable(), register.writable()) {
        (true, false) => "read-only",
        (false, true) => "write-only",
        _ => "read-write",
    }
}

fn write_field(w: &mut Writer, field: &BitField) {
    if field.mask == 0 {
        return;
    }
    let offset = field.mask.trailing_zeros();
    let width = 32 - field.mask.leading_zeros() - offset;

    w.open("field");
    w.element("name", &field.name.to_ascii_uppercase());
    if let Some(caption) = field.caption.as_deref().filter(|c| !c.is_empty()) {
        w.element("description", caption);
    }
    w.element("bitOffset", &offset.to_string());
    w.element("bitWidth", &width.to_string());
    w.close("field");
}

fn write_register(w: &mut Writer, register: &Register, base: u32) {
    w.open("register");
    w.element("name", &register.name.to_ascii_uppercase());
    if let Some(caption) = register.caption.as_deref().filter(|c| !c.is_empty()) {
        w.element("description", caption);
    }
    w.element("addressOffset", &format!("0x{:X}", register.offset.saturating_sub(base)));
    w.element("size", &(register.size * 8).to_string());
    w.element("access", access(register));

    if !register.bit_fields.is_empty() {
        w.open("fields");
        for field in register.bit_fields.values() {
            write_field(w, field);
        }
        w.close("fields");
    }
    w.close("register");
}

/// Generate the SVD document for a target
pub fn generate(description: &TargetDescriptionFile) -> String {
    let mut w = Writer {
        out: String::new(),
        depth: 0,
    };

    w.line("<?xml version=\"1.0\" encoding=\"utf-8\"?>");
    w.line(
        "<device schemaVersion=\"1.3\" xmlns:xs=\"http://www.w3.org/2001/XMLSchema-instance\" \
         xs:noNamespaceSchemaLocation=\"CMSIS-SVD.xsd\">",
    );
    w.depth += 1;
    w.element("vendor", "Microchip Technology");
    w.element("name", &description.name.to_ascii_uppercase());
    w.element("addressUnitBits", "8");
    w.element("width", "8");
    w.element("size", "8");
    w.element("access", "read-write");
    w.open("peripherals");

    for peripheral in description.peripheral_modules.values() {
        for instance in peripheral.instances.values() {
            for group in instance.register_groups.values() {
                if group.address_space_id.as_deref() != Some("data") {
                    continue;
                }
                let module_group_name = group.name_in_module.as_deref().unwrap_or(&group.name);
                let Some(module_group) =
                    description.module_register_group(&peripheral.name, module_group_name)
                else {
                    continue;
                };
                if module_group.registers.is_empty() {
                    continue;
                }

                let group_offset = group.offset.unwrap_or(0);
                // Register offsets are often absolute; the lowest one becomes the base
                let base = module_group
                    .registers
                    .values()
                    .map(|r| r.offset)
                    .min()
                    .unwrap_or(0);

                w.open("peripheral");
                w.element("name", &group.name.to_ascii_uppercase());
                if let Some(caption) = instance.caption.as_deref().filter(|c| !c.is_empty()) {
                    w.element("description", caption);
                }
                w.element("groupName", &peripheral.name.to_ascii_uppercase());
                w.element("baseAddress", &format!("0x{:X}", group_offset + base));
                w.open("registers");
                for register in module_group.registers.values().filter(|r| r.size > 0) {
                    write_register(&mut w, register, base);
                }
                w.close("registers");
                w.close("peripheral");
            }
        }
    }

    w.close("peripherals");
    w.depth = 0;
    w.line("</device>");
    w.out
}

#[cfg(test)]
mod tests {
    use super::*;
    use avrbridge_core::description::parse;

    const DESCRIPTION: &str = r#"<?xml version="1.0"?>
<avr-tools-device-file>
  <devices>
    <device name="ATtest" architecture="AVR8" family="megaAVR">
      <peripherals>
        <module name="PORT">
          <instance name="PORTB" caption="I/O Port B">
            <register-group name="PORTB" name-in-module="PORTB" offset="0x00" address-space="data"/>
          </instance>
        </module>
      </peripherals>
    </device>
  </devices>
  <modules>
    <module name="PORT">
      <register-group name="PORTB">
        <register name="PORTB" caption="Port B Data &amp; Output" offset="0x25" size="1" mask="0xFF"/>
        <register name="DDRB" caption="Port B Data Direction" offset="0x24" size="1">
          <bitfield name="DDB5" caption="Pin 5" mask="0x20"/>
          <bitfield name="DDB1_0" mask="0x03"/>
        </register>
        <register name="PINB" offset="0x23" size="1" ocd-rw="R"/>
      </register-group>
    </module>
  </modules>
</avr-tools-device-file>
"#;

    #[test]
    fn test_generates_peripherals_and_fields() {
        let description = parse(DESCRIPTION).unwrap();
        let svd = generate(&description);

        assert!(svd.starts_with("<?xml"));
        assert!(svd.contains("<name>ATTEST</name>"));
        assert!(svd.contains("<name>PORTB</name>"));
        assert!(svd.contains("<baseAddress>0x23</baseAddress>"));
        assert!(svd.contains("<description>Port B Data &amp; Output</description>"));
        assert!(svd.contains("<addressOffset>0x2</addressOffset>"));
        assert!(svd.contains("<name>DDB5</name>"));
        assert!(svd.contains("<bitOffset>5</bitOffset>"));
        assert!(svd.contains("<bitWidth>2</bitWidth>"));
        assert!(svd.trim_end().ends_with("</device>"));
    }
}

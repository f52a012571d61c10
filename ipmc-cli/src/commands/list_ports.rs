//! `list-ports` command.

use anyhow::Result;
use console::style;
use ipmc::PortInfo;

/// Print the host's serial ports.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = ipmc::discover_ports();

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    println!("{}", style("Serial ports:").bold().underlined());
    for line in listing(&ports) {
        println!("{line}");
    }
    Ok(())
}

fn listing(ports: &[PortInfo]) -> Vec<String> {
    ipmc::format_port_list(ports)
        .into_iter()
        .map(|line| format!("  {} {line}", style("•").green()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipmc::BridgeKind;

    #[test]
    fn test_listing_plain() {
        console::set_colors_enabled(false);
        let port = PortInfo {
            name: "/dev/ttyUSB0".into(),
            bridge: BridgeKind::Ch340,
            vid: Some(0x1A86),
            pid: Some(0x7523),
            manufacturer: None,
            product: Some("USB Serial".into()),
            serial_number: None,
        };
        assert_eq!(
            listing(&[port, PortInfo::named("COM1")]),
            vec!["  • /dev/ttyUSB0 [CH340/CH341] - USB Serial", "  • COM1"]
        );
    }
}

//! macOS device state probes
//!
//! Uses `networksetup` for Wi-Fi and hardware port names, and `ioreg` for
//! the display power state.

use super::{PlatformProbe, utils};

/// macOS-specific probe
pub struct MacOSProbe;

impl PlatformProbe for MacOSProbe {
    fn current_ssid() -> Option<String> {
        let ports = utils::command_stdout("networksetup", &["-listallhardwareports"])?;
        let wifi_device = hardware_ports(&ports)
            .into_iter()
            .find(|(port, _)| port == "Wi-Fi" || port == "AirPort")
            .map(|(_, device)| device)?;

        let output = utils::command_stdout("networksetup", &["-getairportnetwork", &wifi_device])?;
        parse_airport_network(&output)
    }

    fn is_interactive() -> bool {
        match utils::command_stdout("ioreg", &["-n", "IODisplayWrangler", "-r", "-d", "1"]) {
            Some(output) => parse_display_power_state(&output).map_or(true, |state| state >= 4),
            None => true,
        }
    }

    fn is_ethernet_interface(name: &str) -> bool {
        let Some(ports) = utils::command_stdout("networksetup", &["-listallhardwareports"]) else {
            return false;
        };
        hardware_ports(&ports).into_iter().any(|(port, device)| {
            device == name
                && (port.contains("Ethernet") || port.contains("LAN") || port.contains("Thunderbolt Bridge"))
        })
    }
}

/// (Hardware Port, Device) pairs from `networksetup -listallhardwareports`
pub fn hardware_ports(output: &str) -> Vec<(String, String)> {
    let mut ports = Vec::new();
    let mut current_port: Option<String> = None;

    for line in output.lines() {
        if let Some(port) = line.strip_prefix("Hardware Port:") {
            current_port = Some(port.trim().to_string());
        } else if let Some(device) = line.strip_prefix("Device:") {
            if let Some(port) = current_port.take() {
                ports.push((port, device.trim().to_string()));
            }
        }
    }

    ports
}

/// SSID from `Current Wi-Fi Network: <name>`
pub fn parse_airport_network(output: &str) -> Option<String> {
    output
        .strip_prefix("Current Wi-Fi Network:")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// `"CurrentPowerState"=4` -> 4
pub fn parse_display_power_state(output: &str) -> Option<u32> {
    output.lines().find_map(|line| {
        let (_, value) = line.split_once("\"CurrentPowerState\"=")?;
        value.trim().parse().ok()
    })
}

//! Windows device state probes

use super::{PlatformProbe, utils};

/// Windows-specific probe
pub struct WindowsProbe;

impl PlatformProbe for WindowsProbe {
    fn current_ssid() -> Option<String> {
        let output = utils::command_stdout("netsh", &["wlan", "show", "interfaces"])?;
        parse_netsh_ssid(&output)
    }

    fn is_interactive() -> bool {
        // No cheap display power query without the Win32 API
        true
    }

    fn is_ethernet_interface(name: &str) -> bool {
        let lower = name.to_lowercase();
        lower.contains("ethernet") || lower.contains("local area connection")
    }
}

/// SSID of the connected interface; `BSSID` lines are not matched
pub fn parse_netsh_ssid(output: &str) -> Option<String> {
    let connected = utils::field_value(output, "State")
        .map(|s| s.eq_ignore_ascii_case("connected"))
        .unwrap_or(true);
    if !connected {
        return None;
    }
    utils::field_value(output, "SSID")
}

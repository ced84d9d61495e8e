//! Linux device state probes
//!
//! Wi-Fi is read through `iwgetid` with an `nmcli` fallback, and display
//! power through the DRM connectors in sysfs.

use std::fs;
use std::path::Path;

use super::{PlatformProbe, utils};

/// Linux-specific probe
pub struct LinuxProbe;

impl PlatformProbe for LinuxProbe {
    fn current_ssid() -> Option<String> {
        if let Some(ssid) = utils::command_stdout("iwgetid", &["-r"]) {
            return Some(ssid);
        }

        utils::command_stdout("nmcli", &["-t", "-f", "active,ssid", "dev", "wifi"])
            .and_then(|out| parse_nmcli_active_ssid(&out))
    }

    fn is_interactive() -> bool {
        let connectors = read_drm_connectors(Path::new("/sys/class/drm"));
        display_on_from_connectors(&connectors)
    }

    fn is_ethernet_interface(name: &str) -> bool {
        // eth0 or predictable names: enp3s0, eno1, ens33, enx00e04c...
        name.starts_with("eth") || name.starts_with("en")
    }
}

/// Pick the SSID of the `yes:` line in `nmcli -t -f active,ssid dev wifi`
pub fn parse_nmcli_active_ssid(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let ssid = line.strip_prefix("yes:")?;
        // nmcli escapes ':' inside fields as '\:'
        let ssid = ssid.replace("\\:", ":");
        if ssid.is_empty() { None } else { Some(ssid) }
    })
}

/// (status, dpms) for every DRM connector
fn read_drm_connectors(root: &Path) -> Vec<(String, String)> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };

    entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let status = fs::read_to_string(path.join("status")).ok()?;
            let dpms = fs::read_to_string(path.join("dpms")).unwrap_or_default();
            Some((status.trim().to_string(), dpms.trim().to_string()))
        })
        .collect()
}

/// On if any connected output is in DPMS "On", or if nothing is connected
pub fn display_on_from_connectors(connectors: &[(String, String)]) -> bool {
    let connected: Vec<&(String, String)> = connectors
        .iter()
        .filter(|(status, _)| status == "connected")
        .collect();

    if connected.is_empty() {
        return true;
    }

    connected.iter().any(|(_, dpms)| dpms == "On")
}

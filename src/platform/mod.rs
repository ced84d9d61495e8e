//! Platform-specific device state probes
//!
//! The liveness worker needs to know whether the machine is online, whether
//! the display is on, and whether it sits on a server's home network. This
//! module answers those questions per operating system.

use async_trait::async_trait;
use std::net::IpAddr;

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "macos")]
pub mod macos;
#[cfg(target_os = "windows")]
pub mod windows;

/// Device conditions consulted by the liveness worker
#[async_trait]
pub trait DeviceState: Send + Sync {
    /// Some network connection is up (internet access not required)
    async fn has_active_connection(&self) -> bool;

    /// The display is on
    async fn is_interactive(&self) -> bool;

    async fn is_using_ethernet(&self) -> bool;

    async fn is_using_vpn(&self) -> bool;

    /// SSID of the connected Wi-Fi network, if any
    async fn current_ssid(&self) -> Option<String>;
}

/// Common trait for per-OS probes
pub trait PlatformProbe {
    /// Name of the Wi-Fi network currently joined
    fn current_ssid() -> Option<String>;

    /// Whether the primary display is powered on. Headless machines report on.
    fn is_interactive() -> bool;

    /// Whether a network interface name denotes a wired adapter
    fn is_ethernet_interface(name: &str) -> bool;
}

/// [`DeviceState`] backed by the running operating system
#[derive(Debug, Clone, Default)]
pub struct SystemDeviceState;

impl SystemDeviceState {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeviceState for SystemDeviceState {
    async fn has_active_connection(&self) -> bool {
        !routable_interfaces().is_empty()
    }

    async fn is_interactive(&self) -> bool {
        tokio::task::spawn_blocking(probe_is_interactive)
            .await
            .unwrap_or(true)
    }

    async fn is_using_ethernet(&self) -> bool {
        tokio::task::spawn_blocking(|| {
            routable_interfaces()
                .iter()
                .any(|name| probe_is_ethernet(name))
        })
        .await
        .unwrap_or(false)
    }

    async fn is_using_vpn(&self) -> bool {
        routable_interfaces()
            .iter()
            .any(|name| is_vpn_interface(name))
    }

    async fn current_ssid(&self) -> Option<String> {
        tokio::task::spawn_blocking(probe_current_ssid)
            .await
            .ok()
            .flatten()
    }
}

/// Names of non-loopback interfaces holding a usable address
fn routable_interfaces() -> Vec<String> {
    match if_addrs::get_if_addrs() {
        Ok(interfaces) => {
            let mut names: Vec<String> = interfaces
                .into_iter()
                .filter(|iface| !iface.is_loopback() && is_routable(&iface.ip()))
                .map(|iface| iface.name)
                .collect();
            names.sort();
            names.dedup();
            names
        }
        Err(e) => {
            log::warn!("Failed to enumerate network interfaces: {}", e);
            Vec::new()
        }
    }
}

fn is_routable(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => !v4.is_loopback() && !v4.is_link_local() && !v4.is_unspecified(),
        // fe80::/10
        IpAddr::V6(v6) => {
            !v6.is_loopback() && !v6.is_unspecified() && (v6.segments()[0] & 0xffc0) != 0xfe80
        }
    }
}

/// Tunnel interfaces created by common VPN clients
pub fn is_vpn_interface(name: &str) -> bool {
    const PREFIXES: [&str; 7] = ["tun", "tap", "wg", "utun", "ppp", "ipsec", "tailscale"];
    let lower = name.to_lowercase();
    PREFIXES.iter().any(|p| lower.starts_with(p))
}

fn probe_current_ssid() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        <linux::LinuxProbe as PlatformProbe>::current_ssid()
    }

    #[cfg(target_os = "macos")]
    {
        <macos::MacOSProbe as PlatformProbe>::current_ssid()
    }

    #[cfg(target_os = "windows")]
    {
        <windows::WindowsProbe as PlatformProbe>::current_ssid()
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        None
    }
}

fn probe_is_interactive() -> bool {
    #[cfg(target_os = "linux")]
    {
        <linux::LinuxProbe as PlatformProbe>::is_interactive()
    }

    #[cfg(target_os = "macos")]
    {
        <macos::MacOSProbe as PlatformProbe>::is_interactive()
    }

    #[cfg(target_os = "windows")]
    {
        <windows::WindowsProbe as PlatformProbe>::is_interactive()
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        true
    }
}

fn probe_is_ethernet(name: &str) -> bool {
    #[cfg(target_os = "linux")]
    {
        <linux::LinuxProbe as PlatformProbe>::is_ethernet_interface(name)
    }

    #[cfg(target_os = "macos")]
    {
        <macos::MacOSProbe as PlatformProbe>::is_ethernet_interface(name)
    }

    #[cfg(target_os = "windows")]
    {
        <windows::WindowsProbe as PlatformProbe>::is_ethernet_interface(name)
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        let _ = name;
        false
    }
}

/// Helpers shared by the per-OS probes
pub mod utils {
    use std::process::Command;

    /// Run a command and return trimmed stdout on success
    pub fn command_stdout(program: &str, args: &[&str]) -> Option<String> {
        let output = Command::new(program).args(args).output().ok()?;
        if !output.status.success() {
            log::trace!("{} {:?} exited with {}", program, args, output.status);
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() { None } else { Some(text) }
    }

    /// Whether a process with this pid is still running
    pub fn process_alive(pid: u32) -> bool {
        #[cfg(unix)]
        {
            Command::new("kill")
                .args(["-0", &pid.to_string()])
                .output()
                .map(|output| output.status.success())
                .unwrap_or(false)
        }

        #[cfg(windows)]
        {
            let filter = format!("PID eq {}", pid);
            command_stdout("tasklist", &["/FI", &filter, "/NH"])
                .map(|out| out.contains(&pid.to_string()))
                .unwrap_or(false)
        }

        #[cfg(not(any(unix, windows)))]
        {
            let _ = pid;
            false
        }
    }

    /// Value after the first `key :` / `key:` match in `key: value` style output
    pub fn field_value(output: &str, key: &str) -> Option<String> {
        output.lines().find_map(|line| {
            let (k, v) = line.split_once(':')?;
            if k.trim() == key {
                let value = v.trim();
                if value.is_empty() { None } else { Some(value.to_string()) }
            } else {
                None
            }
        })
    }
}

//! `wpa_supplicant`-backed station radio.
//!
//! Interface state comes from `getifaddrs` flags; association is driven
//! through `wpa_cli` and considered complete once the supplicant reports
//! `wpa_state=COMPLETED` with an address assigned.

use super::{LinkError, Radio};
use async_trait::async_trait;
use log::debug;
use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use tokio::process::Command;

pub struct WpaSupplicantRadio {
    interface: String,
    /// Supplicant network block created on the first association
    network_id: Option<String>,
}

impl WpaSupplicantRadio {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            network_id: None,
        }
    }

    fn interface_flags(&self) -> Option<InterfaceFlags> {
        let addrs = getifaddrs().ok()?;
        addrs
            .filter(|ifaddr| ifaddr.interface_name == self.interface)
            .map(|ifaddr| ifaddr.flags)
            .reduce(|a, b| a | b)
    }

    async fn wpa_cli(&self, args: &[&str]) -> Result<String, LinkError> {
        let output = Command::new("wpa_cli")
            .arg("-i")
            .arg(&self.interface)
            .args(args)
            .output()
            .await
            .map_err(|e| LinkError::RadioUnavailable(format!("failed to run wpa_cli: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LinkError::RadioUnavailable(format!(
                "wpa_cli {}: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run a configuration command that answers `OK` or `FAIL`.
    async fn wpa_cli_ok(&self, ssid: &str, args: &[&str]) -> Result<(), LinkError> {
        let reply = self.wpa_cli(args).await?;
        if reply == "OK" {
            Ok(())
        } else {
            Err(LinkError::Association {
                ssid: ssid.to_string(),
                reason: format!("{} -> {}", args.join(" "), reply),
            })
        }
    }

    async fn configure_network(
        &mut self,
        ssid: &str,
        password: Option<&str>,
    ) -> Result<String, LinkError> {
        if let Some(id) = &self.network_id {
            return Ok(id.clone());
        }

        let id = self.wpa_cli(&["add_network"]).await?;
        if id.parse::<u32>().is_err() {
            return Err(LinkError::Association {
                ssid: ssid.to_string(),
                reason: format!("add_network returned '{id}'"),
            });
        }

        let quoted_ssid = quote(ssid);
        self.wpa_cli_ok(ssid, &["set_network", id.as_str(), "ssid", quoted_ssid.as_str()])
            .await?;
        match password {
            Some(pass) => {
                let quoted_psk = quote(pass);
                self.wpa_cli_ok(ssid, &["set_network", id.as_str(), "psk", quoted_psk.as_str()])
                    .await?
            }
            None => {
                self.wpa_cli_ok(ssid, &["set_network", id.as_str(), "key_mgmt", "NONE"])
                    .await?
            }
        }

        debug!("[WiFi] Created supplicant network {} for '{}'", id, ssid);
        self.network_id = Some(id.clone());
        Ok(id)
    }
}

#[async_trait]
impl Radio for WpaSupplicantRadio {
    async fn is_active(&mut self) -> bool {
        self.interface_flags()
            .is_some_and(|flags| flags.contains(InterfaceFlags::IFF_UP))
    }

    async fn activate(&mut self) -> Result<(), LinkError> {
        let output = Command::new("ip")
            .args(["link", "set", self.interface.as_str(), "up"])
            .output()
            .await
            .map_err(|e| LinkError::RadioUnavailable(format!("failed to run ip: {e}")))?;
        if !output.status.success() {
            return Err(LinkError::RadioUnavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    async fn associate(&mut self, ssid: &str, password: Option<&str>) -> Result<(), LinkError> {
        let id = self.configure_network(ssid, password).await?;
        self.wpa_cli_ok(ssid, &["select_network", id.as_str()]).await
    }

    async fn is_associated(&mut self) -> bool {
        let running = self
            .interface_flags()
            .is_some_and(|flags| flags.contains(InterfaceFlags::IFF_RUNNING));
        if !running {
            return false;
        }
        match self.wpa_cli(&["status"]).await {
            Ok(status) => status_is_connected(&status),
            Err(e) => {
                debug!("[WiFi] status query failed: {}", e);
                false
            }
        }
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// `wpa_cli status` output means usable connectivity: associated and addressed.
fn status_is_connected(status: &str) -> bool {
    let mut completed = false;
    let mut addressed = false;
    for line in status.lines() {
        match line.split_once('=') {
            Some(("wpa_state", state)) => completed = state.trim() == "COMPLETED",
            Some(("ip_address", ip)) => addressed = !ip.trim().is_empty(),
            _ => {}
        }
    }
    completed && addressed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_requires_completed_and_address() {
        let connected = "bssid=aa:bb:cc:dd:ee:ff\nssid=lab\nwpa_state=COMPLETED\nip_address=192.168.1.20\n";
        assert!(status_is_connected(connected));

        let no_ip = "ssid=lab\nwpa_state=COMPLETED\n";
        assert!(!status_is_connected(no_ip));

        let scanning = "wpa_state=SCANNING\nip_address=192.168.1.20\n";
        assert!(!status_is_connected(scanning));
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("lab"), "\"lab\"");
        assert_eq!(quote("a\"b"), "\"a\\\"b\"");
    }
}

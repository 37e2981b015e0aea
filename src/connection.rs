//! Connection details handed to the provisioning step.

use crate::config::ProviderConfig;
use crate::error::Result;
use crate::resource::{ConnectionTarget, GuestSpec};
use crate::session::Observer;
use pveapi::VmRef;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::LazyLock;

/// Port guests listen on for SSH
pub const SSH_PORT: u16 = 22;

static IPCONFIG_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|,)ip6?=([^,/]+)").expect("valid ipconfig pattern"));

/// Extract the first static address from a cloud-init `ipconfig` string
/// (`ip=10.0.0.5/24,gw=10.0.0.1`).
///
/// `dhcp`, `auto` and anything else that is not an IP address yields `None`.
pub fn parse_ipconfig_address(ipconfig: &str) -> Option<String> {
    IPCONFIG_ADDRESS
        .captures_iter(ipconfig)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .find(|candidate| candidate.parse::<IpAddr>().is_ok())
        .map(str::to_string)
}

/// How to reach a guest once it is up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Always `ssh`
    #[serde(rename = "type")]
    pub kind: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub private_key: String,
    pub pm_api_url: String,
    pub pm_user: String,
    pub pm_password: String,
    pub pm_tls_insecure: bool,
}

impl ConnectionInfo {
    /// Flat string map in the shape provisioners expect.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("type".to_string(), self.kind.clone()),
            ("host".to_string(), self.host.clone()),
            ("port".to_string(), self.port.to_string()),
            ("user".to_string(), self.user.clone()),
            ("private_key".to_string(), self.private_key.clone()),
            ("pm_api_url".to_string(), self.pm_api_url.clone()),
            ("pm_user".to_string(), self.pm_user.clone()),
            ("pm_password".to_string(), self.pm_password.clone()),
            ("pm_tls_insecure".to_string(), self.pm_tls_insecure.to_string()),
        ])
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!(self.to_map())
    }
}

/// Resolve the connection for a configured guest.
///
/// Only non-mutating lookups are made, so this runs outside the mutation
/// lock.
pub fn resolve<S: GuestSpec>(
    observer: Observer<'_>,
    vm: &VmRef,
    spec: &S,
    provider: &ProviderConfig,
) -> Result<ConnectionInfo> {
    let (host, port) = match spec.connection_target()? {
        ConnectionTarget::Direct { host, port } => (host, port),
        ConnectionTarget::Forwarded { host } => {
            log::debug!("looking up forwarded SSH port of {vm}");
            (host, observer.forwarded_port(vm)?)
        }
    };

    log::debug!("{vm} reachable at {host}:{port}");
    Ok(ConnectionInfo {
        kind: "ssh".to_string(),
        host,
        port,
        user: spec.ssh_user().to_string(),
        private_key: spec.ssh_private_key().to_string(),
        pm_api_url: provider.api_url.clone(),
        pm_user: provider.user.clone(),
        pm_password: provider.password.clone(),
        pm_tls_insecure: provider.tls_insecure,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{LxcSpec, QemuSpec};
    use crate::session::Session;
    use pveapi::{MemoryPlane, Op, VmConfig, VmKind, VmStatus};
    use std::sync::Arc;

    #[test]
    fn test_parse_ipconfig_address() {
        assert_eq!(
            parse_ipconfig_address("ip=10.0.0.5/24,gw=10.0.0.1").as_deref(),
            Some("10.0.0.5")
        );
        assert_eq!(
            parse_ipconfig_address("ip6=2001:db8::5/64,gw6=2001:db8::1").as_deref(),
            Some("2001:db8::5")
        );
        assert_eq!(parse_ipconfig_address("ip=dhcp"), None);
        assert_eq!(parse_ipconfig_address(""), None);
    }

    #[test]
    fn test_parse_ipconfig_address_ignores_non_addresses() {
        assert_eq!(parse_ipconfig_address("ip=dhcp,ip6=auto"), None);
        assert_eq!(parse_ipconfig_address("ip6=dhcp"), None);
        assert_eq!(parse_ipconfig_address("ip=deadbeef"), None);
        assert_eq!(
            parse_ipconfig_address("ip=dhcp,ip6=2001:db8::7/64").as_deref(),
            Some("2001:db8::7")
        );
        assert_eq!(
            parse_ipconfig_address("gw=10.0.0.1,ip=10.0.0.9").as_deref(),
            Some("10.0.0.9")
        );
    }

    #[test]
    fn test_resolve_forwarded_port() {
        let vm = VmRef::new(150, "pve", VmKind::Qemu);
        let plane = Arc::new(MemoryPlane::new().with_guest(
            vm.clone(),
            VmStatus::Running,
            VmConfig::new("web"),
        ));
        plane.set_forwarded_port(150, 40022);
        let session = Session::new(plane.clone());

        let spec = QemuSpec {
            ssh_forward_ip: "198.51.100.7".to_string(),
            ssh_user: "root".to_string(),
            ..QemuSpec::new("web", "pve")
        };
        let provider = ProviderConfig {
            api_url: "https://pve:8006/api2/json".to_string(),
            user: "root@pam".to_string(),
            ..ProviderConfig::default()
        };

        let info = resolve(session.observe(), &vm, &spec, &provider).unwrap();
        assert_eq!(info.host, "198.51.100.7");
        assert_eq!(info.port, 40022);
        assert_eq!(plane.count(Op::ForwardedPort), 1);

        let map = info.to_map();
        assert_eq!(map["type"], "ssh");
        assert_eq!(map["port"], "40022");
        assert_eq!(map["user"], "root");
        assert_eq!(map["pm_user"], "root@pam");
        assert_eq!(map["pm_tls_insecure"], "true");
        assert_eq!(info.to_json()["pm_api_url"], "https://pve:8006/api2/json");
    }

    #[test]
    fn test_resolve_direct_makes_no_calls() {
        let plane = Arc::new(MemoryPlane::new());
        let session = Session::new(plane.clone());
        let vm = VmRef::new(200, "pve", VmKind::Lxc);

        let spec = LxcSpec {
            ssh_forward_ip: "192.0.2.10".to_string(),
            ..LxcSpec::new("ct", "pve")
        };
        let info = resolve(session.observe(), &vm, &spec, &ProviderConfig::default()).unwrap();
        assert_eq!(info.host, "192.0.2.10");
        assert_eq!(info.port, SSH_PORT);
        assert!(plane.calls().is_empty());
    }
}

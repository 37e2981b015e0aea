//! QEMU virtual machines.

use super::{
    ConnectionTarget, CreateStrategy, GuestSpec, PowerState, declared_devices, live_or,
    refresh_devices,
};
use crate::connection::{SSH_PORT, parse_ipconfig_address};
use crate::error::{Error, Result};
use devices::{Attributes, DeviceSchema, Field, Value};
use pveapi::{DiskSize, VmConfig, VmKind, VmStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// OS type assumed when none is declared (Linux 2.6+ kernel)
pub const DEFAULT_OSTYPE: &str = "l26";

/// Disks of a virtual machine. The slot id plus `type` names the disk
/// (`virtio0`, `scsi1`).
pub fn disk_schema() -> DeviceSchema {
    DeviceSchema::new("disk")
        .field(Field::string("type"))
        .field(Field::string("storage"))
        .field(Field::string("storage_type").default("dir"))
        .field(Field::string("size"))
        .field(Field::string("format").default("raw"))
        .field(Field::string("cache").default("none"))
        .field(Field::bool("backup").default(false))
        .field(Field::bool("iothread").default(false))
        .field(Field::bool("replicate").default(false))
}

/// Network interfaces of a virtual machine.
pub fn net_schema() -> DeviceSchema {
    DeviceSchema::new("net")
        .field(Field::string("model"))
        .field(Field::string("macaddr"))
        .field(Field::string("bridge").default("nat"))
        .field(Field::int("tag").default(-1i64))
        .field(Field::bool("firewall").default(false))
        .field(Field::int("rate").default(-1i64))
        .field(Field::int("queues").default(-1i64))
        .field(Field::bool("link_down").default(false))
}

/// A declared QEMU virtual machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QemuSpec {
    pub name: String,
    pub target_node: String,
    pub desc: String,
    pub onboot: bool,
    /// QEMU guest agent, `"1"` to enable
    pub agent: String,
    /// Installation image; create-only
    pub iso: String,
    /// Name of the guest to clone; create-only
    pub clone: String,
    pub ostype: String,
    /// Memory in MiB
    pub memory: i64,
    pub cores: i64,
    pub sockets: i64,

    // Cloud-init
    pub ciuser: String,
    pub cipassword: String,
    pub searchdomain: String,
    pub nameserver: String,
    pub sshkeys: String,
    pub ipconfig0: String,
    pub ipconfig1: String,

    /// Disks, each element carrying its slot `id`
    pub disk: Vec<Attributes>,
    /// Network interfaces, each element carrying its slot `id`
    pub net: Vec<Attributes>,

    pub ssh_forward_ip: String,
    pub ssh_user: String,
    pub ssh_private_key: String,
    pub force_create: bool,
    pub preprovision: bool,
    pub status: PowerState,
}

impl Default for QemuSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            target_node: String::new(),
            desc: String::new(),
            onboot: true,
            agent: "1".to_string(),
            iso: String::new(),
            clone: String::new(),
            ostype: DEFAULT_OSTYPE.to_string(),
            memory: 512,
            cores: 1,
            sockets: 1,
            ciuser: String::new(),
            cipassword: String::new(),
            searchdomain: String::new(),
            nameserver: String::new(),
            sshkeys: String::new(),
            ipconfig0: String::new(),
            ipconfig1: String::new(),
            disk: Vec::new(),
            net: Vec::new(),
            ssh_forward_ip: String::new(),
            ssh_user: String::new(),
            ssh_private_key: String::new(),
            force_create: false,
            preprovision: true,
            status: PowerState::Running,
        }
    }
}

impl QemuSpec {
    pub fn new(name: impl Into<String>, target_node: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_node: target_node.into(),
            ..Default::default()
        }
    }

    /// Whether cloud-init settings are declared.
    pub fn has_cloud_init(&self) -> bool {
        !self.ciuser.is_empty() || !self.ipconfig0.is_empty()
    }
}

impl GuestSpec for QemuSpec {
    const KIND: VmKind = VmKind::Qemu;

    fn name(&self) -> &str {
        &self.name
    }

    fn target_node(&self) -> &str {
        &self.target_node
    }

    fn strategy(&self) -> Result<CreateStrategy> {
        CreateStrategy::select("iso", &self.iso, &self.clone)
    }

    fn power(&self) -> PowerState {
        self.status
    }

    fn force_create(&self) -> bool {
        self.force_create
    }

    fn preprovision(&self) -> bool {
        self.preprovision
    }

    fn ssh_user(&self) -> &str {
        &self.ssh_user
    }

    fn ssh_private_key(&self) -> &str {
        &self.ssh_private_key
    }

    fn to_config(&self) -> Result<VmConfig> {
        let mut config = VmConfig::new(self.name.as_str());
        config.set_str("description", &self.desc);
        config.set("onboot", self.onboot);
        config.set_str("agent", &self.agent);
        config.set_str("iso", &self.iso);
        // A clone keeps the source's OS type unless another one is declared
        if self.clone.is_empty() || self.ostype != DEFAULT_OSTYPE {
            config.set_str("ostype", &self.ostype);
        }
        config.set("memory", self.memory);
        config.set("cores", self.cores);
        config.set("sockets", self.sockets);

        for (key, value) in [
            ("ciuser", &self.ciuser),
            ("cipassword", &self.cipassword),
            ("searchdomain", &self.searchdomain),
            ("nameserver", &self.nameserver),
            ("sshkeys", &self.sshkeys),
            ("ipconfig0", &self.ipconfig0),
            ("ipconfig1", &self.ipconfig1),
        ] {
            config.set_str(key, value);
        }

        let disks = declared_devices(&disk_schema(), &self.disk)?;
        for (id, attrs) in disks.iter() {
            if attrs.get("type").and_then(Value::as_str).is_none_or(str::is_empty) {
                return Err(Error::InvalidConfig(format!("disk {id} has no type")));
            }
            let size = attrs.get("size").and_then(Value::as_str).unwrap_or_default();
            size.parse::<DiskSize>()
                .map_err(|e| Error::InvalidConfig(format!("disk {id}: {e}")))?;
        }
        config.set_devices("disk", disks);
        config.set_devices("net", declared_devices(&net_schema(), &self.net)?);

        Ok(config)
    }

    fn disk_sizes(config: &VmConfig) -> BTreeMap<String, String> {
        config
            .devices("disk")
            .iter()
            .filter_map(|(id, attrs)| {
                let bus = attrs.get("type")?.as_str()?;
                let size = attrs.get("size")?.as_str()?;
                Some((format!("{bus}{id}"), size.to_string()))
            })
            .collect()
    }

    fn connection_target(&self) -> Result<ConnectionTarget> {
        if !self.has_cloud_init() {
            return Ok(ConnectionTarget::Forwarded {
                host: self.ssh_forward_ip.clone(),
            });
        }

        let host = if self.ssh_forward_ip.is_empty() {
            parse_ipconfig_address(&self.ipconfig0).ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "no address in ipconfig0 '{}' and no ssh_forward_ip",
                    self.ipconfig0
                ))
            })?
        } else {
            self.ssh_forward_ip.clone()
        };

        Ok(ConnectionTarget::Direct {
            host,
            port: SSH_PORT,
        })
    }

    fn refresh(&self, node: &str, live: &VmConfig, status: VmStatus) -> Result<Self> {
        let mut spec = self.clone();

        spec.name = live.name.clone();
        spec.target_node = node.to_string();
        spec.desc = live.str_attr("description");
        spec.onboot = live.bool_attr("onboot", false);
        spec.agent = live.str_attr("agent");
        spec.ostype = live_or(live, "ostype", &self.ostype);
        spec.memory = live.int_attr("memory", spec.memory);
        spec.cores = live.int_attr("cores", spec.cores);
        spec.sockets = live.int_attr("sockets", spec.sockets);

        spec.ciuser = live.str_attr("ciuser");
        spec.cipassword = live.str_attr("cipassword");
        spec.searchdomain = live.str_attr("searchdomain");
        spec.nameserver = live.str_attr("nameserver");
        spec.sshkeys = live.str_attr("sshkeys");
        spec.ipconfig0 = live.str_attr("ipconfig0");
        spec.ipconfig1 = live.str_attr("ipconfig1");

        spec.disk = refresh_devices(&disk_schema(), &self.disk, live)?;
        spec.net = refresh_devices(&net_schema(), &self.net, live)?;

        if let Some(power) = PowerState::from_status(status) {
            spec.status = power;
        }
        Ok(spec)
    }
}

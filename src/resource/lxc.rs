//! LXC containers.

use super::{
    ConnectionTarget, CreateStrategy, GuestSpec, PowerState, declared_devices, live_or,
    refresh_devices,
};
use crate::connection::SSH_PORT;
use crate::error::{Error, Result};
use devices::{Attributes, DeviceCollection, DeviceSchema, Field, Value};
use pveapi::{DiskSize, VmConfig, VmKind, VmStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Slot the root filesystem occupies in its single-slot collection
const ROOTFS_SLOT: u32 = 0;

pub fn net_schema() -> DeviceSchema {
    DeviceSchema::new("net")
        .field(Field::string("name"))
        .field(Field::string("bridge"))
        .field(Field::bool("firewall").default(false))
        .field(Field::string("gw"))
        .field(Field::string("gw6"))
        .field(Field::string("hwaddr").default(""))
        .field(Field::string("ip"))
        .field(Field::string("ip6"))
        .field(Field::int("mtu"))
        .field(Field::int("rate").default(0i64))
        .field(Field::int("tag").default(0i64))
        .field(Field::string("trunks").default(""))
        .field(Field::string("type").default("veth"))
}

/// Mount points, resized as `mp<slot>`.
pub fn mp_schema() -> DeviceSchema {
    DeviceSchema::new("mp")
        .field(Field::string("volume"))
        .field(Field::string("mp"))
        .field(Field::bool("acl"))
        .field(Field::bool("backup"))
        .field(Field::bool("quota"))
        .field(Field::bool("replicate"))
        .field(Field::bool("ro").default(false))
        .field(Field::bool("shared"))
        .field(Field::string("size"))
}

pub fn rootfs_schema() -> DeviceSchema {
    DeviceSchema::new("rootfs")
        .field(Field::string("storage"))
        .field(Field::string("size"))
        .field(Field::bool("acl").default(false))
        .field(Field::bool("quota").default(false))
        .field(Field::bool("replicate").default(false))
        .field(Field::bool("ro").default(false))
        .field(Field::bool("shared").default(false))
}

/// A declared LXC container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LxcSpec {
    pub hostname: String,
    pub target_node: String,
    /// Container template; create-only
    pub ostemplate: String,
    /// Name of the container to clone; create-only
    pub clone: String,
    pub arch: String,
    pub cmode: String,
    pub console: bool,
    pub cores: i64,
    pub cpuunits: i64,
    pub description: String,
    pub memory: i64,
    pub swap: i64,
    pub nameserver: String,
    pub searchdomain: String,
    pub onboot: bool,
    pub ostype: String,
    /// Root password; create-only, never read back
    pub password: String,
    /// Resource pool; create-only
    pub pool: String,
    pub protection: bool,
    pub startup: String,
    pub sshkeys: String,
    pub tty: i64,
    /// Create-only
    pub unprivileged: bool,

    pub net: Vec<Attributes>,
    pub mp: Vec<Attributes>,
    /// Root filesystem; a single slot, so no `id`
    pub rootfs: Attributes,

    pub ssh_forward_ip: String,
    pub ssh_user: String,
    pub ssh_private_key: String,
    pub force_create: bool,
    pub preprovision: bool,
    pub status: PowerState,
}

impl Default for LxcSpec {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            target_node: String::new(),
            ostemplate: String::new(),
            clone: String::new(),
            arch: "amd64".to_string(),
            cmode: "tty".to_string(),
            console: true,
            cores: 1,
            cpuunits: 1024,
            description: String::new(),
            memory: 512,
            swap: 512,
            nameserver: String::new(),
            searchdomain: String::new(),
            onboot: false,
            ostype: String::new(),
            password: String::new(),
            pool: String::new(),
            protection: false,
            startup: String::new(),
            sshkeys: String::new(),
            tty: 2,
            unprivileged: false,
            net: Vec::new(),
            mp: Vec::new(),
            rootfs: Attributes::new(),
            ssh_forward_ip: String::new(),
            ssh_user: String::new(),
            ssh_private_key: String::new(),
            force_create: false,
            preprovision: true,
            status: PowerState::Running,
        }
    }
}

impl LxcSpec {
    pub fn new(hostname: impl Into<String>, target_node: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            target_node: target_node.into(),
            ..Default::default()
        }
    }

    /// Static IPv4 address of the first interface, without its prefix length.
    pub fn static_address(&self) -> Option<String> {
        let first = self.net.iter().find(|element| {
            element.get(devices::SLOT_ID_KEY) == Some(&Value::Int(0))
        })?;
        let ip = first.get("ip")?.as_str()?;
        let address = ip.split('/').next().unwrap_or_default();
        match address {
            "" | "dhcp" | "manual" => None,
            address => Some(address.to_string()),
        }
    }

    fn rootfs_collection(&self) -> Result<DeviceCollection> {
        let mut collection = DeviceCollection::new();
        if !self.rootfs.is_empty() {
            collection.insert(ROOTFS_SLOT, self.rootfs.clone());
        }
        Ok(rootfs_schema().normalize(&collection)?)
    }
}

fn check_size(what: &str, attrs: &Attributes) -> Result<()> {
    let size = attrs.get("size").and_then(Value::as_str).unwrap_or_default();
    size.parse::<DiskSize>()
        .map(|_| ())
        .map_err(|e| Error::InvalidConfig(format!("{what}: {e}")))
}

impl GuestSpec for LxcSpec {
    const KIND: VmKind = VmKind::Lxc;

    fn name(&self) -> &str {
        &self.hostname
    }

    fn target_node(&self) -> &str {
        &self.target_node
    }

    fn strategy(&self) -> Result<CreateStrategy> {
        CreateStrategy::select("ostemplate", &self.ostemplate, &self.clone)
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
        let mut config = VmConfig::new(self.hostname.as_str());
        for (key, value) in [
            ("ostemplate", &self.ostemplate),
            ("arch", &self.arch),
            ("cmode", &self.cmode),
            ("description", &self.description),
            ("nameserver", &self.nameserver),
            ("searchdomain", &self.searchdomain),
            ("ostype", &self.ostype),
            ("password", &self.password),
            ("pool", &self.pool),
            ("startup", &self.startup),
            ("sshkeys", &self.sshkeys),
        ] {
            config.set_str(key, value);
        }
        for (key, value) in [
            ("console", self.console),
            ("onboot", self.onboot),
            ("protection", self.protection),
            ("unprivileged", self.unprivileged),
        ] {
            config.set(key, value);
        }
        for (key, value) in [
            ("cores", self.cores),
            ("cpuunits", self.cpuunits),
            ("memory", self.memory),
            ("swap", self.swap),
            ("tty", self.tty),
        ] {
            config.set(key, value);
        }

        let rootfs = self.rootfs_collection()?;
        if let Some(attrs) = rootfs.get(ROOTFS_SLOT) {
            check_size("rootfs", attrs)?;
        }
        let mp = declared_devices(&mp_schema(), &self.mp)?;
        for (id, attrs) in mp.iter() {
            check_size(&format!("mp{id}"), attrs)?;
        }

        config.set_devices("net", declared_devices(&net_schema(), &self.net)?);
        config.set_devices("mp", mp);
        config.set_devices("rootfs", rootfs);
        Ok(config)
    }

    fn disk_sizes(config: &VmConfig) -> BTreeMap<String, String> {
        let mut sizes = BTreeMap::new();
        if let Some(size) = config
            .devices("rootfs")
            .get(ROOTFS_SLOT)
            .and_then(|attrs| attrs.get("size"))
            .and_then(Value::as_str)
        {
            sizes.insert("rootfs".to_string(), size.to_string());
        }
        for (id, attrs) in config.devices("mp").iter() {
            if let Some(size) = attrs.get("size").and_then(Value::as_str) {
                sizes.insert(format!("mp{id}"), size.to_string());
            }
        }
        sizes
    }

    fn connection_target(&self) -> Result<ConnectionTarget> {
        let host = self
            .static_address()
            .unwrap_or_else(|| self.ssh_forward_ip.clone());
        Ok(ConnectionTarget::Direct {
            host,
            port: SSH_PORT,
        })
    }

    fn refresh(&self, node: &str, live: &VmConfig, status: VmStatus) -> Result<Self> {
        let mut spec = self.clone();

        spec.hostname = live.name.clone();
        spec.target_node = node.to_string();
        spec.arch = live_or(live, "arch", &self.arch);
        spec.cmode = live_or(live, "cmode", &self.cmode);
        spec.console = live.bool_attr("console", false);
        spec.cores = live.int_attr("cores", spec.cores);
        spec.cpuunits = live.int_attr("cpuunits", spec.cpuunits);
        spec.description = live.str_attr("description");
        spec.memory = live.int_attr("memory", spec.memory);
        spec.swap = live.int_attr("swap", spec.swap);
        spec.nameserver = live.str_attr("nameserver");
        spec.searchdomain = live.str_attr("searchdomain");
        spec.onboot = live.bool_attr("onboot", false);
        spec.ostype = live_or(live, "ostype", &self.ostype);
        spec.protection = live.bool_attr("protection", false);
        spec.startup = live.str_attr("startup");
        spec.sshkeys = live.str_attr("sshkeys");
        spec.tty = live.int_attr("tty", spec.tty);

        spec.net = refresh_devices(&net_schema(), &self.net, live)?;
        spec.mp = refresh_devices(&mp_schema(), &self.mp, live)?;

        let declared_rootfs = self.rootfs_collection()?;
        let live_rootfs = live.devices("rootfs");
        let rootfs = if declared_rootfs.is_empty() {
            rootfs_schema().merge(&declared_rootfs, &live_rootfs)?
        } else {
            devices::merge(&declared_rootfs, &live_rootfs)
        };
        spec.rootfs = rootfs.get(ROOTFS_SLOT).cloned().unwrap_or_default();

        if let Some(power) = PowerState::from_status(status) {
            spec.status = power;
        }
        Ok(spec)
    }
}

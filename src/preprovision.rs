//! Pre-provisioning hook.
//!
//! Runs once a guest is configured and reachable, outside the mutation
//! lock. What it does (wait for cloud-init, push network configuration,
//! run a bootstrap script) is up to the implementation.

use crate::connection::ConnectionInfo;
use crate::identity::ResourceId;

/// Prepares a freshly configured guest.
pub trait Preprovisioner: Send + Sync {
    fn preprovision(&self, id: &ResourceId, connection: &ConnectionInfo) -> anyhow::Result<()>;
}

/// Preprovisioner that does nothing.
pub struct NoPreprovision;

impl Preprovisioner for NoPreprovision {
    fn preprovision(&self, _id: &ResourceId, _connection: &ConnectionInfo) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Preprovisioner that only logs the target.
pub struct LogPreprovision;

impl Preprovisioner for LogPreprovision {
    fn preprovision(&self, id: &ResourceId, connection: &ConnectionInfo) -> anyhow::Result<()> {
        log::info!(
            "pre-provisioning {id} via {}@{}:{}",
            connection.user,
            connection.host,
            connection.port
        );
        Ok(())
    }
}

impl<F> Preprovisioner for F
where
    F: Fn(&ResourceId, &ConnectionInfo) -> anyhow::Result<()> + Send + Sync,
{
    fn preprovision(&self, id: &ResourceId, connection: &ConnectionInfo) -> anyhow::Result<()> {
        self(id, connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> ConnectionInfo {
        ConnectionInfo {
            kind: "ssh".to_string(),
            host: "192.0.2.4".to_string(),
            port: 22,
            user: "root".to_string(),
            private_key: String::new(),
            pm_api_url: String::new(),
            pm_user: String::new(),
            pm_password: String::new(),
            pm_tls_insecure: true,
        }
    }

    #[test]
    fn test_closures_are_preprovisioners() {
        let id: ResourceId = "pve/lxc/104".parse().unwrap();
        let hooks: Vec<Box<dyn Preprovisioner>> = vec![
            Box::new(NoPreprovision),
            Box::new(LogPreprovision),
            Box::new(|id: &ResourceId, conn: &ConnectionInfo| -> anyhow::Result<()> {
                anyhow::ensure!(conn.port == 22, "{id}: unexpected port {}", conn.port);
                Ok(())
            }),
        ];

        for hook in &hooks {
            hook.preprovision(&id, &connection()).unwrap();
        }

        let refuse = |id: &ResourceId, _: &ConnectionInfo| -> anyhow::Result<()> {
            anyhow::bail!("{id} unreachable")
        };
        let err = refuse.preprovision(&id, &connection()).unwrap_err();
        assert_eq!(err.to_string(), "pve/lxc/104 unreachable");
    }
}

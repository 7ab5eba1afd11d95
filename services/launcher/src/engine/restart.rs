use std::path::Path;

use drover_payloads::RestartFailureReason;
use tracing::{debug, error, info};

use super::{CommandError, Engine};
use crate::instance::VmConfig;
use crate::runtime::Virtualizer;

impl Engine {
    /// Boot a stopped instance again.
    ///
    /// Steps, stopping at the first failure:
    /// 1. Build the VNIC configuration (networking only), else `InstanceCorrupt`
    /// 2. Create the VNIC (networking only), else `NetworkFailure`
    /// 3. Start the VM, else `LaunchFailure`
    pub async fn restart(
        &self,
        instance_dir: &Path,
        vm: &dyn Virtualizer,
        config: &VmConfig,
    ) -> Result<(), CommandError<RestartFailureReason>> {
        let instance_uuid = config.instance_uuid;
        debug!(
            %instance_uuid,
            dir = %instance_dir.display(),
            networking = self.networking.is_enabled(),
            "Restarting instance"
        );

        let mut vnic_name = String::new();

        if self.networking.is_enabled() {
            let vnic = self.vnics.build_config(config).map_err(|e| {
                error!(%instance_uuid, error = %e, "Could not rebuild VNIC configuration");
                CommandError::new(RestartFailureReason::InstanceCorrupt, e)
            })?;

            let (name, info) = self.vnics.create_vnic(&vnic).await.map_err(|e| {
                error!(%instance_uuid, error = %e, "Could not create VNIC");
                CommandError::new(RestartFailureReason::NetworkFailure, e)
            })?;

            debug!(%instance_uuid, vnic = %name, bridge = %info.bridge, "VNIC ready");
            vnic_name = name;
        }

        vm.start_vm(&vnic_name, self.node_addr).await.map_err(|e| {
            error!(%instance_uuid, error = %e, "Could not start VM");
            CommandError::new(RestartFailureReason::LaunchFailure, e)
        })?;

        info!(%instance_uuid, "Instance restarted");
        Ok(())
    }
}

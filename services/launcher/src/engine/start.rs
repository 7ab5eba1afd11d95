use std::path::Path;

use drover_networking::VnicConfig;
use drover_payloads::StartFailureReason;
use tracing::{debug, error, info, warn};

use super::{CommandError, Engine};
use crate::instance::VmConfig;
use crate::runtime::Virtualizer;

impl Engine {
    /// Bring up a new instance.
    ///
    /// Steps, stopping at the first failure:
    /// 1. Persist the VM configuration, else `LaunchFailure`
    /// 2. Create the root disk, else `ImageFailure`
    /// 3. Build the VNIC configuration (networking only), else `InvalidData`
    /// 4. Create the VNIC (networking only), else `NetworkFailure`
    /// 5. Start the VM, else `LaunchFailure`
    ///
    /// A failed start leaves nothing behind: whatever earlier steps created
    /// is torn down again on a best-effort basis.
    pub async fn start(
        &self,
        instance_dir: &Path,
        vm: &dyn Virtualizer,
        config: &VmConfig,
    ) -> Result<(), CommandError<StartFailureReason>> {
        let instance_uuid = config.instance_uuid;
        debug!(
            %instance_uuid,
            image_uuid = %config.image_uuid,
            dir = %instance_dir.display(),
            "Starting instance"
        );

        if let Err(e) = config.save(instance_dir).await {
            error!(%instance_uuid, error = %e, "Could not persist instance configuration");
            self.abandon(instance_dir, vm, false, None).await;
            return Err(CommandError::new(StartFailureReason::LaunchFailure, e));
        }

        if let Err(e) = vm.create_image(config).await {
            error!(%instance_uuid, error = %e, "Could not create instance image");
            self.abandon(instance_dir, vm, false, None).await;
            return Err(CommandError::new(StartFailureReason::ImageFailure, e));
        }

        let mut vnic_name = String::new();
        let mut vnic = None;

        if self.networking.is_enabled() {
            let built = match self.vnics.build_config(config) {
                Ok(built) => built,
                Err(e) => {
                    error!(%instance_uuid, error = %e, "Invalid network configuration");
                    self.abandon(instance_dir, vm, true, None).await;
                    return Err(CommandError::new(StartFailureReason::InvalidData, e));
                }
            };

            match self.vnics.create_vnic(&built).await {
                Ok((name, info)) => {
                    debug!(%instance_uuid, vnic = %name, bridge = %info.bridge, "VNIC ready");
                    vnic_name = name;
                    vnic = Some(built);
                }
                Err(e) => {
                    error!(%instance_uuid, error = %e, "Could not create VNIC");
                    self.abandon(instance_dir, vm, true, None).await;
                    return Err(CommandError::new(StartFailureReason::NetworkFailure, e));
                }
            }
        }

        if let Err(e) = vm.start_vm(&vnic_name, self.node_addr).await {
            error!(%instance_uuid, error = %e, "Could not start VM");
            self.abandon(instance_dir, vm, true, vnic.as_ref()).await;
            return Err(CommandError::new(StartFailureReason::LaunchFailure, e));
        }

        info!(%instance_uuid, vnic = %vnic_name, "Instance started");
        Ok(())
    }

    /// Undo a partial start.
    async fn abandon(
        &self,
        instance_dir: &Path,
        vm: &dyn Virtualizer,
        image_created: bool,
        vnic: Option<&VnicConfig>,
    ) {
        if let Some(vnic) = vnic {
            if let Err(e) = self.vnics.destroy_vnic(vnic).await {
                warn!(instance_uuid = %vnic.instance_uuid, error = %e, "Failed to remove VNIC of failed start");
            }
        }

        if image_created {
            if let Err(e) = vm.delete_image().await {
                warn!(dir = %instance_dir.display(), error = %e, "Failed to remove image of failed start");
            }
        }

        match tokio::fs::remove_dir_all(instance_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(dir = %instance_dir.display(), error = %e, "Failed to remove directory of failed start");
            }
        }
    }
}

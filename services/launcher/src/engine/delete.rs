use std::path::Path;

use drover_payloads::DeleteFailureReason;
use tracing::{debug, error, info};

use super::{CommandError, Engine};
use crate::instance::VmConfig;
use crate::runtime::Virtualizer;

impl Engine {
    /// Remove an instance and everything it owns.
    ///
    /// Steps, stopping at the first failure:
    /// 1. Stop the VM if it is running, else `ShutdownFailure`
    /// 2. Remove the root disk, else `StorageFailure`
    /// 3. Destroy the VNIC (networking only), else `NetworkFailure`
    /// 4. Remove the instance directory, else `StorageFailure`
    pub async fn delete(
        &self,
        instance_dir: &Path,
        vm: &dyn Virtualizer,
        config: &VmConfig,
        running: bool,
    ) -> Result<(), CommandError<DeleteFailureReason>> {
        let instance_uuid = config.instance_uuid;
        debug!(%instance_uuid, running, dir = %instance_dir.display(), "Deleting instance");

        if running {
            vm.stop_vm().await.map_err(|e| {
                error!(%instance_uuid, error = %e, "Could not stop VM");
                CommandError::new(DeleteFailureReason::ShutdownFailure, e)
            })?;
        }

        vm.delete_image().await.map_err(|e| {
            error!(%instance_uuid, error = %e, "Could not remove instance image");
            CommandError::new(DeleteFailureReason::StorageFailure, e)
        })?;

        if self.networking.is_enabled() {
            let vnic = self.vnics.build_config(config).map_err(|e| {
                error!(%instance_uuid, error = %e, "Could not rebuild VNIC configuration");
                CommandError::new(DeleteFailureReason::NetworkFailure, e)
            })?;

            self.vnics.destroy_vnic(&vnic).await.map_err(|e| {
                error!(%instance_uuid, error = %e, "Could not destroy VNIC");
                CommandError::new(DeleteFailureReason::NetworkFailure, e)
            })?;
        }

        match tokio::fs::remove_dir_all(instance_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                error!(%instance_uuid, error = %e, "Could not remove instance directory");
                return Err(CommandError::new(DeleteFailureReason::StorageFailure, e));
            }
        }

        info!(%instance_uuid, "Instance deleted");
        Ok(())
    }
}

use std::path::Path;

use drover_payloads::StopFailureReason;
use tracing::{debug, error, info};

use super::{CommandError, Engine};
use crate::instance::VmConfig;
use crate::runtime::Virtualizer;

impl Engine {
    /// Shut a running instance down. Its VNIC and disk are kept for a
    /// later restart.
    pub async fn stop(
        &self,
        instance_dir: &Path,
        vm: &dyn Virtualizer,
        config: &VmConfig,
    ) -> Result<(), CommandError<StopFailureReason>> {
        let instance_uuid = config.instance_uuid;
        debug!(%instance_uuid, dir = %instance_dir.display(), "Stopping instance");

        vm.stop_vm().await.map_err(|e| {
            error!(%instance_uuid, error = %e, "Could not stop VM");
            CommandError::new(StopFailureReason::ShutdownFailure, e)
        })?;

        info!(%instance_uuid, "Instance stopped");
        Ok(())
    }
}

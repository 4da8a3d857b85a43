//! Tenant namespace maintenance: `stager namespace ensure|remove`.

use anyhow::{Context, Result};

use stager::config::StagerConfig;
use stager::server::build_orchestrator;
use stager::staging::NamespaceManager;

use super::super::NamespaceCommands;

pub async fn cmd_namespace(config: &StagerConfig, command: NamespaceCommands) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let manager = NamespaceManager::new(
        orchestrator,
        config.staging.namespace_prefix.clone(),
        config.server.stager_id.clone(),
    );

    match command {
        NamespaceCommands::Ensure { tenant } => {
            let name = manager
                .ensure(&tenant)
                .await
                .with_context(|| format!("Failed to ensure namespace for tenant {}", tenant))?;
            println!("Namespace {} is ready", name);
        }
        NamespaceCommands::Remove { tenant } => {
            manager
                .remove(&tenant)
                .await
                .with_context(|| format!("Failed to remove namespace for tenant {}", tenant))?;
            println!("Namespace {} removed", manager.namespace_for(&tenant));
        }
    }

    Ok(())
}

//! Serve the staging API: `stager run`.

use anyhow::Result;

use stager::config::StagerConfig;

pub async fn cmd_run(config: &StagerConfig) -> Result<()> {
    stager::server::start_server(config).await
}

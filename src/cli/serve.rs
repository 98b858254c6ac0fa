use crate::web::{self, AppState};
use crate::{Config, Database};
use anyhow::Result;
use std::path::Path;

pub async fn run(config_path: &Path, host: Option<String>, port: Option<u16>) -> Result<()> {
    let config = Config::load(config_path)?;
    let db = Database::open(&config.database.path, config.database.pool_size)?;

    db.migrate()?;
    std::fs::create_dir_all(&config.media.upload_dir)?;

    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    let addr = format!("{}:{}", host, port);

    tracing::info!(
        site = %config.site.name,
        mail = ?config.mail.transport,
        "Starting server at http://{}",
        addr
    );

    let state = AppState::from_config(config, db)?;
    web::serve(state, &addr).await?;

    Ok(())
}

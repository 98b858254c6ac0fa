use anyhow::{bail, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "inkpost.toml";

pub fn generate_secret_key() -> String {
    let mut bytes = [0u8; 48];
    rand::thread_rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn starter_config(site_name: &str, secret_key: &str) -> String {
    format!(
        r#"[site]
name = {}
url = "http://localhost:8000"

[server]
host = "127.0.0.1"
port = 8000

[database]
path = "./data/inkpost.db"

[content]
posts_per_page = 3
author_posts_limit = 6

[media]
upload_dir = "./data/media"
max_upload_size = "10MB"

[auth]
secret_key = "{}"
session_lifetime = "7d"
verification_max_age = "3d"
registration_limit = 5
registration_window = "1h"

[mail]
transport = "file"
from = "noreply@localhost"
outbox_dir = "./data/outbox"
"#,
        toml::Value::String(site_name.to_string()),
        secret_key
    )
}

pub fn write_site(path: &Path, site_name: &str) -> Result<PathBuf> {
    let config_path = path.join(CONFIG_FILE);
    if config_path.exists() {
        bail!("{} already exists", config_path.display());
    }

    std::fs::create_dir_all(path.join("data/media"))?;
    std::fs::create_dir_all(path.join("data/outbox"))?;
    std::fs::write(&config_path, starter_config(site_name, &generate_secret_key()))?;
    Ok(config_path)
}

pub async fn run(path: PathBuf, name: Option<String>) -> Result<()> {
    let site_name = name.unwrap_or_else(|| "Inkpost".to_string());
    let config_path = write_site(&path, &site_name)?;

    tracing::info!("Created {:?}", config_path);
    tracing::info!("Run 'inkpost migrate' to set up the database");
    tracing::info!("Run 'inkpost serve' to start the server");

    Ok(())
}

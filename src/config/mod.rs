use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const SECRET_KEY_ENV: &str = "INKPOST_SECRET_KEY";
const MIN_SECRET_KEY_LENGTH: usize = 32;
/// Upper bound for every configured auth duration (ten years).
pub const MAX_AUTH_DURATION: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub site: SiteConfig,
    #[serde(default)]
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub content: ContentConfig,
    pub media: MediaConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub mail: MailConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SiteConfig {
    pub name: String,
    pub url: String,
}

impl SiteConfig {
    /// Joins `path` onto the site URL without doubling the slash.
    pub fn absolute_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub path: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContentConfig {
    #[serde(default = "default_posts_per_page")]
    pub posts_per_page: usize,
    /// How many recent posts a public profile embeds.
    #[serde(default = "default_author_posts_limit")]
    pub author_posts_limit: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            posts_per_page: default_posts_per_page(),
            author_posts_limit: default_author_posts_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MediaConfig {
    pub upload_dir: String,
    #[serde(default = "default_max_upload")]
    pub max_upload_size: String,
}

impl MediaConfig {
    pub fn max_upload_bytes(&self) -> Result<usize> {
        parse_size(&self.max_upload_size)
            .with_context(|| format!("media.max_upload_size = {:?}", self.max_upload_size))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_session_lifetime")]
    pub session_lifetime: String,
    #[serde(default = "default_verification_max_age")]
    pub verification_max_age: String,
    #[serde(default = "default_registration_limit")]
    pub registration_limit: usize,
    #[serde(default = "default_registration_window")]
    pub registration_window: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            session_lifetime: default_session_lifetime(),
            verification_max_age: default_verification_max_age(),
            registration_limit: default_registration_limit(),
            registration_window: default_registration_window(),
        }
    }
}

impl AuthConfig {
    pub fn session_duration(&self) -> Result<Duration> {
        parse_duration(&self.session_lifetime)
            .with_context(|| format!("auth.session_lifetime = {:?}", self.session_lifetime))
    }

    pub fn verification_duration(&self) -> Result<Duration> {
        parse_duration(&self.verification_max_age).with_context(|| {
            format!(
                "auth.verification_max_age = {:?}",
                self.verification_max_age
            )
        })
    }

    pub fn registration_window_duration(&self) -> Result<Duration> {
        parse_duration(&self.registration_window).with_context(|| {
            format!("auth.registration_window = {:?}", self.registration_window)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MailTransport {
    #[default]
    Log,
    File,
    Http,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MailConfig {
    #[serde(default)]
    pub transport: MailTransport,
    #[serde(default = "default_mail_from")]
    pub from: String,
    #[serde(default)]
    pub outbox_dir: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            transport: MailTransport::default(),
            from: default_mail_from(),
            outbox_dir: None,
            endpoint: None,
            api_key: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_pool_size() -> u32 {
    10
}

fn default_posts_per_page() -> usize {
    3
}

fn default_author_posts_limit() -> usize {
    6
}

fn default_max_upload() -> String {
    "10MB".to_string()
}

fn default_session_lifetime() -> String {
    "7d".to_string()
}

fn default_verification_max_age() -> String {
    "3d".to_string()
}

fn default_registration_limit() -> usize {
    5
}

fn default_registration_window() -> String {
    "1h".to_string()
}

fn default_mail_from() -> String {
    "noreply@localhost".to_string()
}

/// Parses `30s`, `15m`, `1h`, `7d`. A bare number is seconds.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    if number.is_empty() {
        bail!("duration must start with a number");
    }
    let value: u64 = number.parse()?;
    let multiplier: u64 = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 60 * 60 * 24,
        other => bail!("unknown duration unit '{}' (use s, m, h or d)", other),
    };
    let seconds = value
        .checked_mul(multiplier)
        .context("duration out of range")?;
    Ok(Duration::from_secs(seconds))
}

/// Parses `512KB`, `10MB`, `1GB` or a plain byte count.
pub fn parse_size(input: &str) -> Result<usize> {
    let upper = input.trim().to_ascii_uppercase();
    let (number, multiplier): (&str, usize) = if let Some(n) = upper.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = upper.strip_suffix('B') {
        (n, 1)
    } else {
        (upper.as_str(), 1)
    };
    let value: usize = number.trim().parse()?;
    value.checked_mul(multiplier).context("size out of range")
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!(
                "Could not read config file '{}': {}. Run `inkpost init` to create one.",
                path.display(),
                e
            )
        })?;
        Self::parse(&content)
    }

    /// Parses a TOML document, applies the environment override for the
    /// secret key, and validates the result.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        if let Ok(secret) = std::env::var(SECRET_KEY_ENV) {
            if !secret.is_empty() {
                config.auth.secret_key = secret;
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.site.name.trim().is_empty() {
            bail!("site.name must not be empty");
        }
        url::Url::parse(&self.site.url)
            .with_context(|| format!("site.url is not an absolute URL: {}", self.site.url))?;
        if self.content.posts_per_page == 0 {
            bail!("content.posts_per_page must be greater than 0");
        }
        if self.content.posts_per_page > 100 {
            bail!("content.posts_per_page must be 100 or less");
        }
        if self.auth.secret_key.len() < MIN_SECRET_KEY_LENGTH {
            bail!(
                "auth.secret_key must be at least {} bytes (or set {})",
                MIN_SECRET_KEY_LENGTH,
                SECRET_KEY_ENV
            );
        }
        if self.auth.registration_limit == 0 {
            bail!("auth.registration_limit must be greater than 0");
        }
        for (name, duration) in [
            ("auth.session_lifetime", self.auth.session_duration()?),
            ("auth.verification_max_age", self.auth.verification_duration()?),
            ("auth.registration_window", self.auth.registration_window_duration()?),
        ] {
            if duration > MAX_AUTH_DURATION {
                bail!("{} must be at most 3650d", name);
            }
        }
        self.media.max_upload_bytes()?;

        match self.mail.transport {
            MailTransport::Log => {}
            MailTransport::File => {
                if self.mail.outbox_dir.is_none() {
                    bail!("mail.outbox_dir is required for the file transport");
                }
            }
            MailTransport::Http => {
                if self.mail.endpoint.is_none() {
                    bail!("mail.endpoint is required for the http transport");
                }
            }
        }
        Ok(())
    }
}

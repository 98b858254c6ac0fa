use crate::services::mailer::Mailer;
use crate::services::verification::EmailVerifier;
use crate::web::security::RateLimiter;
use crate::{Config, Database};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub verifier: EmailVerifier,
    pub media_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub session_lifetime: Duration,
    pub registration_limiter: Arc<RateLimiter>,
    pub resend_limiter: Arc<RateLimiter>,
    pub login_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config, db: Database, mailer: Mailer) -> Result<Self> {
        let verifier = EmailVerifier::new(
            config.auth.secret_key.as_bytes(),
            config.auth.verification_duration()?,
            config.site.clone(),
            mailer,
        )?;

        let window = config.auth.registration_window_duration()?;
        let limit = config.auth.registration_limit;

        Ok(Self {
            media_dir: PathBuf::from(&config.media.upload_dir),
            max_upload_bytes: config.media.max_upload_bytes()?,
            session_lifetime: config.auth.session_duration()?,
            registration_limiter: Arc::new(RateLimiter::new(limit, window)),
            resend_limiter: Arc::new(RateLimiter::new(limit, window)),
            login_limiter: Arc::new(RateLimiter::for_login()),
            verifier,
            config,
            db,
        })
    }

    /// Builds the state with the mail transport named in the config.
    pub fn from_config(config: Config, db: Database) -> Result<Self> {
        let mailer = Mailer::from_config(&config.mail)?;
        Self::new(config, db, mailer)
    }

    pub fn cleanup_limiters(&self) {
        self.registration_limiter.cleanup();
        self.resend_limiter.cleanup();
        self.login_limiter.cleanup();
    }
}

//! Email verification: the link sent at registration and what happens
//! when it is followed.

use crate::config::SiteConfig;
use crate::models::{AccountState, User};
use crate::services::mailer::{Mailer, OutgoingEmail};
use crate::services::tokens::{TokenError, VerificationClaims, VerificationSigner};
use crate::services::users;
use crate::Database;
use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tera::{Context, Tera};

const HTML_TEMPLATE: &str = "email/verify_email.html";
const TEXT_TEMPLATE: &str = "email/verify_email.txt";

#[derive(Debug)]
pub enum VerifyOutcome {
    Activated(User),
    AlreadyActive(User),
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("verification token missing")]
    MissingToken,
    #[error("verification token expired")]
    Expired,
    #[error("verification token signature invalid")]
    BadSignature,
    #[error("no account matches the verification token")]
    UserNotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<TokenError> for VerifyError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::BadSignature => Self::BadSignature,
            TokenError::Expired { .. } => Self::Expired,
        }
    }
}

#[derive(Clone)]
pub struct EmailVerifier {
    signer: VerificationSigner,
    max_age: Duration,
    site: SiteConfig,
    templates: Tera,
    mailer: Mailer,
}

impl EmailVerifier {
    pub fn new(secret: &[u8], max_age: Duration, site: SiteConfig, mailer: Mailer) -> Result<Self> {
        let mut templates = Tera::default();
        templates.add_raw_templates(vec![
            (
                HTML_TEMPLATE,
                include_str!("../../templates/email/verify_email.html"),
            ),
            (
                TEXT_TEMPLATE,
                include_str!("../../templates/email/verify_email.txt"),
            ),
        ])?;

        Ok(Self {
            signer: VerificationSigner::for_email_verification(secret),
            max_age,
            site,
            templates,
            mailer,
        })
    }

    pub fn issue_token(&self, user: &User, now: DateTime<Utc>) -> Result<String> {
        let claims = VerificationClaims {
            user_id: user.id,
            email: user.email.clone(),
        };
        Ok(self.signer.sign(&claims, now)?)
    }

    pub fn verify_url(&self, token: &str) -> Result<String> {
        let url = url::Url::parse_with_params(
            &self.site.absolute_url("/verify-email/"),
            &[("token", token)],
        )?;
        Ok(url.into())
    }

    pub fn render_email(&self, user: &User, verify_url: &str) -> Result<OutgoingEmail> {
        let mut ctx = Context::new();
        ctx.insert("user", user);
        ctx.insert("verify_url", verify_url);
        ctx.insert("site_name", &self.site.name);

        Ok(OutgoingEmail {
            to: user.email.clone(),
            subject: format!("Verify your email for {}", self.site.name),
            text_body: self.templates.render(TEXT_TEMPLATE, &ctx)?,
            html_body: self.templates.render(HTML_TEMPLATE, &ctx)?,
        })
    }

    /// Issues a fresh token and mails the link to `user`.
    #[tracing::instrument(skip(self, user), fields(user_id = user.id))]
    pub async fn send_verification(&self, user: &User) -> Result<()> {
        let token = self.issue_token(user, Utc::now())?;
        let verify_url = self.verify_url(&token)?;
        let email = self
            .render_email(user, &verify_url)
            .context("rendering verification email")?;
        self.mailer
            .send(&email)
            .await
            .context("sending verification email")?;
        tracing::info!("verification email sent");
        Ok(())
    }

    /// Consumes a verification link. Activating an already active account
    /// is a no-op that still succeeds.
    #[tracing::instrument(skip(self, db, token))]
    pub fn verify(
        &self,
        db: &Database,
        token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<VerifyOutcome, VerifyError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(VerifyError::MissingToken)?;

        let claims = self.signer.verify(token, self.max_age, now).map_err(|err| {
            tracing::warn!(error = %err, "verification token rejected");
            VerifyError::from(err)
        })?;

        let user = users::get_user_by_id_and_email(db, claims.user_id, &claims.email)?
            .ok_or(VerifyError::UserNotFound)?;

        if user.state() == AccountState::Active {
            return Ok(VerifyOutcome::AlreadyActive(user));
        }

        users::set_active(db, user.id, true)?;
        tracing::info!(user_id = user.id, "account activated");
        Ok(VerifyOutcome::Activated(User {
            is_active: true,
            ..user
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> EmailVerifier {
        let site = SiteConfig {
            name: "Inkpost".into(),
            url: "https://blog.example.com".into(),
        };
        let (mailer, _) = Mailer::memory();
        EmailVerifier::new(
            b"0123456789abcdef0123456789abcdef",
            Duration::from_secs(3600),
            site,
            mailer,
        )
        .unwrap()
    }

    fn user() -> User {
        User {
            id: 9,
            username: "jane".into(),
            email: "jane@example.com".into(),
            password_hash: String::new(),
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            bio: None,
            profile_picture: None,
            profile_picture_url: None,
            job_title: None,
            facebook: None,
            youtube: None,
            instagram: None,
            twitter: None,
            linkedin: None,
            is_active: false,
            date_joined: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn link_points_at_verify_endpoint() {
        let v = verifier();
        let token = v.issue_token(&user(), Utc::now()).unwrap();
        let url = v.verify_url(&token).unwrap();
        assert!(url.starts_with("https://blog.example.com/verify-email/?token="));
        assert!(url.ends_with(&token));
    }

    #[test]
    fn email_mentions_user_site_and_link() {
        let v = verifier();
        let email = v
            .render_email(&user(), "https://blog.example.com/verify-email/?token=abc")
            .unwrap();
        assert_eq!(email.to, "jane@example.com");
        assert!(email.subject.contains("Inkpost"));
        assert!(email.text_body.contains("Hi Jane"));
        assert!(email
            .text_body
            .contains("https://blog.example.com/verify-email/?token=abc"));
        assert!(email.html_body.contains("Verify my email"));
    }
}

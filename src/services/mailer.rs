use crate::config::{MailConfig, MailTransport};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

/// Outbound mail transport, chosen by `[mail] transport`.
#[derive(Clone)]
pub enum Mailer {
    /// Logs the message instead of delivering it.
    Log { from: String },
    /// Writes one `.eml` file per message into a directory.
    File { from: String, dir: PathBuf },
    /// POSTs the message as JSON to a mail API.
    #[cfg(feature = "http-mail")]
    Http {
        from: String,
        endpoint: String,
        api_key: Option<String>,
        client: reqwest::Client,
    },
    /// Keeps messages in memory; handy for tests and local tooling.
    Memory(Arc<Mutex<Vec<OutgoingEmail>>>),
}

impl Mailer {
    pub fn from_config(config: &MailConfig) -> Result<Self> {
        match config.transport {
            MailTransport::Log => Ok(Self::Log {
                from: config.from.clone(),
            }),
            MailTransport::File => {
                let dir = config
                    .outbox_dir
                    .as_ref()
                    .context("mail.outbox_dir is required for the file transport")?;
                Ok(Self::File {
                    from: config.from.clone(),
                    dir: PathBuf::from(dir),
                })
            }
            #[cfg(feature = "http-mail")]
            MailTransport::Http => {
                let endpoint = config
                    .endpoint
                    .clone()
                    .context("mail.endpoint is required for the http transport")?;
                Ok(Self::Http {
                    from: config.from.clone(),
                    endpoint,
                    api_key: config.api_key.clone(),
                    client: reqwest::Client::new(),
                })
            }
            #[cfg(not(feature = "http-mail"))]
            MailTransport::Http => {
                anyhow::bail!("mail.transport = \"http\" needs the `http-mail` feature")
            }
        }
    }

    pub fn memory() -> (Self, Arc<Mutex<Vec<OutgoingEmail>>>) {
        let outbox = Arc::new(Mutex::new(Vec::new()));
        (Self::Memory(outbox.clone()), outbox)
    }

    pub async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        match self {
            Self::Log { from } => {
                tracing::info!(
                    from = %from,
                    to = %email.to,
                    subject = %email.subject,
                    "email (log transport):\n{}",
                    email.text_body
                );
                Ok(())
            }
            Self::File { from, dir } => {
                tokio::fs::create_dir_all(dir).await?;
                let path = dir.join(format!("{}.eml", uuid::Uuid::new_v4()));
                tokio::fs::write(&path, render_eml(from, email)).await?;
                tracing::debug!(path = %path.display(), "email written to outbox");
                Ok(())
            }
            #[cfg(feature = "http-mail")]
            Self::Http {
                from,
                endpoint,
                api_key,
                client,
            } => {
                let body = serde_json::json!({
                    "from": from,
                    "to": email.to,
                    "subject": email.subject,
                    "text": email.text_body,
                    "html": email.html_body,
                });
                let mut request = client
                    .post(endpoint)
                    .header("User-Agent", "Inkpost-Mailer/1.0")
                    .json(&body);
                if let Some(key) = api_key {
                    request = request.bearer_auth(key);
                }
                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    let detail = response.text().await.unwrap_or_default();
                    anyhow::bail!("mail API answered {}: {}", status, detail);
                }
                Ok(())
            }
            Self::Memory(outbox) => {
                outbox
                    .lock()
                    .map_err(|_| anyhow::anyhow!("mail outbox lock poisoned"))?
                    .push(email.clone());
                Ok(())
            }
        }
    }
}

const MIME_BOUNDARY: &str = "inkpost-alternative";

fn render_eml(from: &str, email: &OutgoingEmail) -> String {
    format!(
        "From: {from}\r\nTo: {to}\r\nSubject: {subject}\r\nMIME-Version: 1.0\r\n\
         Content-Type: multipart/alternative; boundary=\"{b}\"\r\n\r\n\
         --{b}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{text}\r\n\
         --{b}\r\nContent-Type: text/html; charset=utf-8\r\n\r\n{html}\r\n\
         --{b}--\r\n",
        from = from,
        to = email.to,
        subject = email.subject,
        b = MIME_BOUNDARY,
        text = email.text_body,
        html = email.html_body,
    )
}

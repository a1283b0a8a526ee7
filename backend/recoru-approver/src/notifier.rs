// src/notifier.rs

use async_trait::async_trait;
use lettre::message::{header, Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::config::MailSettings;
use crate::report::RunReport;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Invalid mail address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Could not read the report attachment {path:?}")]
    Attachment {
        #[source]
        source: std::io::Error,
        path: String,
    },

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("Failed to send email: {0}")]
    Send(String),
}

/// Delivers a finished run report. `attachment` is the persisted log file.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, report: &RunReport, attachment: &Path)
        -> Result<(), NotificationError>;
}

// --- SMTP ---

pub struct SmtpNotifier {
    from: Mailbox,
    to: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

fn mailbox(address: &str) -> Result<Mailbox, NotificationError> {
    address
        .parse()
        .map_err(|e: lettre::address::AddressError| NotificationError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

impl SmtpNotifier {
    /// Builds the STARTTLS relay; no connection is made until the first send.
    pub fn new(settings: &MailSettings) -> Result<Self, NotificationError> {
        let from = mailbox(&settings.sender.account)?;
        let to = mailbox(&settings.recipient)?;

        let creds = Credentials::new(
            settings.sender.account.clone(),
            settings.sender.secret.clone(),
        );
        let tls_parameters = TlsParameters::new(settings.smtp_host.clone())
            .map_err(|e| NotificationError::Build(format!("TLS error: {}", e)))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.smtp_host)
            .map_err(|e| NotificationError::Build(format!("SMTP relay error: {}", e)))?
            .port(settings.smtp_port)
            .credentials(creds)
            .tls(Tls::Required(tls_parameters))
            .build();

        Ok(Self {
            from,
            to,
            transport,
        })
    }

    async fn compose(
        &self,
        report: &RunReport,
        attachment: &Path,
    ) -> Result<Message, NotificationError> {
        let content = tokio::fs::read(attachment)
            .await
            .map_err(|e| NotificationError::Attachment {
                source: e,
                path: attachment.display().to_string(),
            })?;
        let file_name = attachment
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| report.file_name());

        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(report.mail_subject())
            .multipart(
                MultiPart::mixed()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(report.summary()),
                    )
                    .singlepart(
                        Attachment::new(file_name).body(content, header::ContentType::TEXT_PLAIN),
                    ),
            )
            .map_err(|e| NotificationError::Build(e.to_string()))
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn deliver(
        &self,
        report: &RunReport,
        attachment: &Path,
    ) -> Result<(), NotificationError> {
        let email = self.compose(report, attachment).await?;
        self.transport
            .send(email)
            .await
            .map_err(|e| NotificationError::Send(e.to_string()))?;
        info!("Report mailed to {}", self.to);
        Ok(())
    }
}

// --- Test double ---

/// Keeps every delivery in memory instead of sending it.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingNotifier {
    pub deliveries: std::sync::Mutex<Vec<(String, std::path::PathBuf)>>,
    pub fail: bool,
}

#[cfg(test)]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(
        &self,
        report: &RunReport,
        attachment: &Path,
    ) -> Result<(), NotificationError> {
        if self.fail {
            return Err(NotificationError::Send("connection refused".to_string()));
        }
        self.deliveries
            .lock()
            .unwrap()
            .push((report.mail_subject(), attachment.to_path_buf()));
        Ok(())
    }
}

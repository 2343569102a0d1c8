use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::config::SmtpConfig;
use common::{JobStatus, ResolvedReference};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid mail address {0:?}")]
    Address(String),

    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("mail transport failed: {0}")]
    Transport(String),
}

/// Delivers one message to one recipient.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), DeliveryError>;
}

enum MailTransport {
    Smtp {
        server: String,
        credentials: Option<(String, String)>,
    },
    Sendmail,
}

/// Email through an SMTP relay when one is configured, the local
/// sendmail otherwise.
pub struct MailMessenger {
    from: String,
    transport: MailTransport,
}

impl MailMessenger {
    pub fn from_config(smtp: &SmtpConfig) -> Self {
        let transport = match &smtp.server {
            Some(server) => MailTransport::Smtp {
                server: server.clone(),
                credentials: smtp.username.clone().zip(smtp.password.clone()),
            },
            None => MailTransport::Sendmail,
        };
        Self {
            from: smtp.from.clone(),
            transport,
        }
    }
}

#[async_trait]
impl Messenger for MailMessenger {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), DeliveryError> {
        use lettre::message::header::ContentType;
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{Message, SendmailTransport, SmtpTransport, Transport};

        let email = Message::builder()
            .from(self.from.parse().map_err(|_| DeliveryError::Address(self.from.clone()))?)
            .to(recipient.parse().map_err(|_| DeliveryError::Address(recipient.to_string()))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?;

        let sent = match &self.transport {
            MailTransport::Smtp { server, credentials } => {
                let mut builder = SmtpTransport::relay(server)
                    .map_err(|e| DeliveryError::Transport(e.to_string()))?;
                if let Some((user, password)) = credentials {
                    builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
                }
                let mailer = builder.build();
                tokio::task::spawn_blocking(move || mailer.send(&email).map(|_| ()).map_err(|e| e.to_string())).await
            }
            MailTransport::Sendmail => {
                let mailer = SendmailTransport::new();
                tokio::task::spawn_blocking(move || mailer.send(&email).map_err(|e| e.to_string())).await
            }
        };

        match sent {
            Ok(Ok(())) => {
                log::info!("Email notification sent to {}", recipient);
                Ok(())
            }
            Ok(Err(e)) => Err(DeliveryError::Transport(e)),
            Err(e) => Err(DeliveryError::Transport(e.to_string())),
        }
    }
}

/// The message sent when a watched job finishes.
#[derive(Debug, Clone)]
pub struct Report {
    pub job: ResolvedReference,
    pub status: JobStatus,
    pub finished_at: DateTime<Utc>,
    pub origin: String,
    pub notifier: String,
    pub metadata: Result<serde_json::Value, String>,
}

impl Report {
    pub fn subject(&self) -> String {
        format!("lunaflow: job {} {}", self.job.job_id, self.status)
    }

    pub fn body(&self) -> String {
        let metadata = match &self.metadata {
            Ok(value) => serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
            Err(e) => format!("(metadata unavailable: {})", e),
        };
        format!(
            "Job:          {}\nServer:       {}\nState:        {}\nFinished at:  {}\nRequested by: {}\nWatched from: {}\n\nMetadata:\n{}\n",
            self.job.job_id,
            self.job.server_url,
            self.status,
            self.finished_at.to_rfc3339(),
            self.origin,
            self.notifier,
            metadata
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::JobId;

    fn report(metadata: Result<serde_json::Value, String>) -> Report {
        Report {
            job: ResolvedReference {
                job_id: JobId::from("abc-1"),
                server_url: "http://cromwell:8000".to_string(),
            },
            status: JobStatus::Failed,
            finished_at: Utc::now(),
            origin: "ana@laptop".to_string(),
            notifier: "ana@hpc1".to_string(),
            metadata,
        }
    }

    #[test]
    fn test_report_contents() {
        let r = report(Ok(serde_json::json!({"workflowName": "hello"})));
        assert_eq!(r.subject(), "lunaflow: job abc-1 Failed");
        let body = r.body();
        assert!(body.contains("Server:       http://cromwell:8000"));
        assert!(body.contains("Requested by: ana@laptop"));
        assert!(body.contains("\"workflowName\": \"hello\""));
    }

    #[test]
    fn test_report_without_metadata() {
        let body = report(Err("server returned 500".to_string())).body();
        assert!(body.contains("metadata unavailable: server returned 500"));
    }

    #[tokio::test]
    async fn test_bad_recipient_is_rejected_before_sending() {
        let messenger = MailMessenger::from_config(&SmtpConfig::default());
        let err = messenger.send("not an address", "s", "b").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Address(_)));
    }
}

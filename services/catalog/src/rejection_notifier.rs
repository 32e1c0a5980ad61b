//! Rejection mail for uploads that never made it into the catalog.
//!
//! One mail is sent per rejection notice or dead-lettered upload. Send
//! failures are logged and not retried: this is the end of the line for a
//! rejected upload and there is nowhere further to route it.

use crate::config::NotifierConfig;
use crate::error::CatalogError;
use crate::ingestion_filter::RejectionReason;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message};
use aws_sdk_sesv2::Client as SesClient;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};

pub const REJECTION_SUBJECT: &str = "Image upload rejection";
pub const GENERIC_REJECTION_MESSAGE: &str =
    "Your upload was rejected because it is not a supported file type. Only .jpeg or .png files are allowed.";
const SENDER_NAME: &str = "The Photo Album";

/// Why a particular object was turned away
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionNotice {
    pub subject_key: String,
    pub reason: String,
    #[serde(default = "Utc::now")]
    pub rejected_at: DateTime<Utc>,
}

impl RejectionNotice {
    pub fn new(subject_key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            subject_key: subject_key.into(),
            reason: reason.into(),
            rejected_at: Utc::now(),
        }
    }

    /// Fold the rejections of one envelope into a single notice, or `None`
    /// when nothing was rejected
    pub fn combine<'a>(notices: impl IntoIterator<Item = &'a RejectionNotice>) -> Option<Self> {
        let notices: Vec<&RejectionNotice> = notices.into_iter().collect();
        match notices.as_slice() {
            [] => None,
            [single] => Some((*single).clone()),
            many => Some(Self::new(
                many.iter()
                    .map(|n| n.subject_key.as_str())
                    .filter(|key| !key.is_empty())
                    .collect::<Vec<_>>()
                    .join(", "),
                many.iter()
                    .map(|n| n.reason.as_str())
                    .collect::<Vec<_>>()
                    .join(" "),
            )),
        }
    }
}

impl From<RejectionReason> for RejectionNotice {
    fn from(reason: RejectionReason) -> Self {
        Self::new(reason.object_key, reason.message)
    }
}

/// An email-shaped notification with a single recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// Outbound notification sink
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, email: &EmailMessage) -> Result<()>;
}

/// Amazon SES (v2) notification sink
pub struct SesNotifier {
    client: SesClient,
}

impl SesNotifier {
    pub async fn new(config: &NotifierConfig) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        info!(region = %config.region, "SES notifier initialized");

        Ok(Self {
            client: SesClient::new(&aws_config),
        })
    }
}

#[async_trait]
impl Notifier for SesNotifier {
    async fn send(&self, email: &EmailMessage) -> Result<()> {
        let subject = Content::builder()
            .charset("UTF-8")
            .data(&email.subject)
            .build()
            .context("Invalid mail subject")?;
        let html = Content::builder()
            .charset("UTF-8")
            .data(&email.html_body)
            .build()
            .context("Invalid mail body")?;

        let content = EmailContent::builder()
            .simple(
                Message::builder()
                    .subject(subject)
                    .body(Body::builder().html(html).build())
                    .build(),
            )
            .build();

        self.client
            .send_email()
            .from_email_address(&email.from)
            .destination(Destination::builder().to_addresses(&email.to).build())
            .content(content)
            .send()
            .await
            .context("Failed to send email through SES")?;

        Ok(())
    }
}

/// Renders and sends rejection mail
pub struct RejectionNotifier {
    notifier: Arc<dyn Notifier>,
    sender: String,
    recipient: String,
}

impl RejectionNotifier {
    pub fn new(notifier: Arc<dyn Notifier>, config: &NotifierConfig) -> Self {
        Self {
            notifier,
            sender: config.sender.clone(),
            recipient: config.recipient.clone(),
        }
    }

    /// Build the mail for a notice, or the generic mail when the failed
    /// message could not be attributed to an object.
    pub fn render(&self, notice: Option<&RejectionNotice>) -> EmailMessage {
        let message = match notice {
            Some(notice) if !notice.subject_key.is_empty() => format!(
                "Your upload {} was rejected. {}",
                notice.subject_key, notice.reason
            ),
            Some(notice) if !notice.reason.is_empty() => notice.reason.clone(),
            _ => GENERIC_REJECTION_MESSAGE.to_string(),
        };

        EmailMessage {
            from: self.sender.clone(),
            to: self.recipient.clone(),
            subject: REJECTION_SUBJECT.to_string(),
            html_body: html_content(SENDER_NAME, &self.sender, &message),
        }
    }

    /// Send exactly one mail for the notice
    #[instrument(skip(self, notice), fields(subject_key = notice.map(|n| n.subject_key.as_str()).unwrap_or("")))]
    pub async fn notify(&self, notice: Option<&RejectionNotice>) -> Result<(), CatalogError> {
        let email = self.render(notice);

        match self.notifier.send(&email).await {
            Ok(()) => {
                info!("Rejection email sent");
                metrics::counter!("catalog.notifications.sent").increment(1);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Error sending rejection email");
                metrics::counter!("catalog.notifications.failed").increment(1);
                Err(CatalogError::Notify(format!("{:#}", e)))
            }
        }
    }
}

fn html_content(name: &str, email: &str, message: &str) -> String {
    format!(
        r#"<html>
  <body>
    <h2>Sent from: </h2>
    <ul>
      <li style="font-size:18px">👤 <b>{}</b></li>
      <li style="font-size:18px">✉️ <b>{}</b></li>
    </ul>
    <p style="font-size:18px">{}</p>
  </body>
</html>"#,
        escape_html(name),
        escape_html(email),
        escape_html(message)
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

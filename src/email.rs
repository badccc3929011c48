//! Email delivery for renewal and expiration reminders.
//!
//! Supports three modes:
//! 1. POST to a webhook URL (for DIY email delivery)
//! 2. Send via Resend API
//! 3. Disabled (no email sent, log only)

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::util::{format_amount, format_date};

/// Retry delays in seconds (exponential backoff: 1s, 4s, 16s)
const RETRY_DELAYS: &[u64] = &[1, 4, 16];

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Result of attempting to deliver a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailSendResult {
    /// Email was sent via Resend
    Sent,
    /// Payload was POSTed to the configured webhook URL
    WebhookCalled,
    /// Email delivery is disabled, reminder only logged
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// Upcoming automatic renewal charge
    Renewal,
    /// Upcoming loss of access (no renewal coming)
    Expiration,
}

/// One reminder to deliver.
pub struct ReminderEmail<'a> {
    pub to_email: &'a str,
    pub customer_name: Option<&'a str>,
    pub product_name: &'a str,
    pub kind: NoticeKind,
    /// When the renewal or expiration happens (unix timestamp)
    pub due_at: i64,
    /// Charge amount for renewal notices
    pub amount_cents: Option<i64>,
    pub currency: &'a str,
    pub object_type: &'a str,
    pub object_id: &'a str,
    pub notice_key: &'a str,
}

impl ReminderEmail<'_> {
    fn subject(&self, store_name: &str) -> String {
        match self.kind {
            NoticeKind::Renewal => format!(
                "Your {} subscription renews on {}",
                self.product_name,
                format_date(self.due_at)
            ),
            NoticeKind::Expiration => format!(
                "Your {} license expires on {} - {}",
                self.product_name,
                format_date(self.due_at),
                store_name
            ),
        }
    }

    fn body(&self, store_name: &str) -> String {
        let name = self.customer_name.unwrap_or("there");
        let date = format_date(self.due_at);
        match self.kind {
            NoticeKind::Renewal => {
                let amount = self
                    .amount_cents
                    .map(|cents| format_amount(cents, self.currency))
                    .unwrap_or_else(|| "the subscription price".to_string());
                format!(
                    "Hi {name},\n\n\
                     Your {product} subscription renews automatically on {date}. \
                     Your payment method on file will be charged {amount}.\n\n\
                     No action is needed to keep your subscription running. If you \
                     want to make changes, get in touch before the renewal date.\n\n\
                     - {store}",
                    product = self.product_name,
                    store = store_name,
                )
            }
            NoticeKind::Expiration => format!(
                "Hi {name},\n\n\
                 Your {product} license expires on {date}. Once it lapses you \
                 will no longer receive updates or support.\n\n\
                 Renew before {date} to keep everything working.\n\n\
                 - {store}",
                product = self.product_name,
                store = store_name,
            ),
        }
    }
}

/// Payload POSTed to the webhook URL in webhook mode. Carries the rendered
/// message so a relay can forward it verbatim, plus the raw fields for
/// systems that template their own.
#[derive(Debug, Serialize)]
struct ReminderWebhookPayload<'a> {
    event: &'static str,
    notice: NoticeKind,
    notice_key: &'a str,
    object_type: &'a str,
    object_id: &'a str,
    email: &'a str,
    due_at: i64,
    subject: &'a str,
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct ResendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResendEmailResponse {
    #[allow(dead_code)]
    id: String,
}

enum DeliveryMode {
    Resend { api_key: String },
    Webhook { url: String },
    Disabled,
}

/// Reminder delivery service. Mode is fixed at startup from config.
#[derive(Clone)]
pub struct EmailService {
    mode: std::sync::Arc<DeliveryMode>,
    from_email: String,
    store_name: String,
    http_client: Client,
}

impl EmailService {
    pub fn new(
        resend_api_key: Option<String>,
        webhook_url: Option<String>,
        from_email: String,
        store_name: String,
    ) -> Self {
        let mode = match (webhook_url, resend_api_key) {
            (Some(url), _) => DeliveryMode::Webhook { url },
            (None, Some(api_key)) => DeliveryMode::Resend { api_key },
            (None, None) => DeliveryMode::Disabled,
        };
        Self {
            mode: std::sync::Arc::new(mode),
            from_email,
            store_name,
            http_client: Client::new(),
        }
    }

    /// Deliver one reminder according to the configured mode.
    pub async fn send_reminder(&self, reminder: &ReminderEmail<'_>) -> Result<EmailSendResult> {
        let subject = reminder.subject(&self.store_name);
        let body = reminder.body(&self.store_name);

        match &*self.mode {
            DeliveryMode::Disabled => {
                tracing::info!(
                    to = %reminder.to_email,
                    notice_key = %reminder.notice_key,
                    object_id = %reminder.object_id,
                    "Email disabled, reminder logged only"
                );
                Ok(EmailSendResult::Disabled)
            }
            DeliveryMode::Webhook { url } => {
                let payload = ReminderWebhookPayload {
                    event: "reminder_due",
                    notice: reminder.kind,
                    notice_key: reminder.notice_key,
                    object_type: reminder.object_type,
                    object_id: reminder.object_id,
                    email: reminder.to_email,
                    due_at: reminder.due_at,
                    subject: &subject,
                    body: &body,
                };
                self.call_webhook_with_retry(url, &payload, reminder.object_id)
                    .await
            }
            DeliveryMode::Resend { api_key } => {
                let request = ResendEmailRequest {
                    from: &self.from_email,
                    to: vec![reminder.to_email],
                    subject: &subject,
                    text: &body,
                };
                self.send_resend_with_retry(api_key, &request, reminder.to_email)
                    .await
            }
        }
    }

    /// Send via Resend with exponential backoff. Retries transient errors
    /// (network, 5xx, 429); fails immediately on other 4xx.
    async fn send_resend_with_retry(
        &self,
        api_key: &str,
        request: &ResendEmailRequest<'_>,
        to_email: &str,
    ) -> Result<EmailSendResult> {
        let mut last_error: Option<AppError> = None;

        for (attempt, delay_secs) in std::iter::once(&0u64).chain(RETRY_DELAYS).enumerate() {
            if *delay_secs > 0 {
                tracing::warn!(attempt, delay_secs, "Retrying email send after transient failure");
                tokio::time::sleep(Duration::from_secs(*delay_secs)).await;
            }

            match self.send_resend_request(api_key, request).await {
                Ok(()) => {
                    tracing::info!(to = %to_email, attempt, "Reminder email sent via Resend");
                    return Ok(EmailSendResult::Sent);
                }
                Err((error, is_transient)) => {
                    if !is_transient {
                        return Err(error);
                    }
                    last_error = Some(error);
                }
            }
        }

        tracing::error!(
            to = %to_email,
            attempts = RETRY_DELAYS.len() + 1,
            "Email send failed after all retries"
        );
        Err(last_error
            .unwrap_or_else(|| AppError::Internal("Email service error: retries exhausted".into())))
    }

    async fn send_resend_request(
        &self,
        api_key: &str,
        request: &ResendEmailRequest<'_>,
    ) -> std::result::Result<(), (AppError, bool)> {
        let response = self
            .http_client
            .post(RESEND_API_URL)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to reach Resend API");
                // Network errors are transient
                (AppError::Internal(format!("Email service error: {}", e)), true)
            })?;

        let status = response.status();
        if status.is_success() {
            let _result: ResendEmailResponse = response.json().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to parse Resend API response");
                (AppError::Internal("Email service response error".into()), false)
            })?;
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let is_transient = status.as_u16() == 429 || status.is_server_error();
        if is_transient {
            tracing::warn!(status = %status, body = %body, "Resend API returned transient error");
        } else {
            tracing::error!(status = %status, body = %body, "Resend API returned non-transient error");
        }
        Err((
            AppError::Internal(format!("Email service error: {} - {}", status, body)),
            is_transient,
        ))
    }

    /// POST to the webhook URL with retry. After retries are exhausted the
    /// call still reports success: the reminder exists either way and the
    /// operator's relay can be checked from their own logs.
    async fn call_webhook_with_retry<T: Serialize>(
        &self,
        webhook_url: &str,
        payload: &T,
        object_id: &str,
    ) -> Result<EmailSendResult> {
        for (attempt, delay_secs) in std::iter::once(&0u64).chain(RETRY_DELAYS).enumerate() {
            if *delay_secs > 0 {
                tracing::warn!(
                    attempt,
                    delay_secs,
                    webhook_url = %webhook_url,
                    "Retrying reminder webhook after transient failure"
                );
                tokio::time::sleep(Duration::from_secs(*delay_secs)).await;
            }

            match self.send_webhook_request(webhook_url, payload).await {
                Ok(()) => {
                    tracing::info!(
                        webhook_url = %webhook_url,
                        object_id = %object_id,
                        attempt,
                        "Reminder webhook delivered"
                    );
                    return Ok(EmailSendResult::WebhookCalled);
                }
                Err(is_transient) => {
                    if !is_transient {
                        tracing::warn!(
                            webhook_url = %webhook_url,
                            object_id = %object_id,
                            "Reminder webhook rejected, not retrying"
                        );
                        return Ok(EmailSendResult::WebhookCalled);
                    }
                }
            }
        }

        tracing::error!(
            webhook_url = %webhook_url,
            object_id = %object_id,
            attempts = RETRY_DELAYS.len() + 1,
            "Reminder webhook failed after all retries"
        );
        Ok(EmailSendResult::WebhookCalled)
    }

    async fn send_webhook_request<T: Serialize>(
        &self,
        webhook_url: &str,
        payload: &T,
    ) -> std::result::Result<(), bool> {
        let response = self
            .http_client
            .post(webhook_url)
            .header("Content-Type", "application/json")
            .header("X-Billhook-Event", "reminder_due")
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, webhook_url = %webhook_url, "Failed to send reminder webhook");
                true
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        let is_transient = status.as_u16() == 429 || status.is_server_error();
        if is_transient {
            tracing::warn!(status = %status, body = %body, "Reminder webhook returned transient error");
        } else {
            tracing::error!(status = %status, body = %body, "Reminder webhook returned non-transient error");
        }
        Err(is_transient)
    }
}

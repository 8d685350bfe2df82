use serde::Serialize;

use crate::error::EmailError;
use crate::validators::is_valid_email;

#[derive(Clone)]
pub struct EmailClient {
    http_client: reqwest::Client,
    base_url: String,
    sender: SenderEmail,
}

/// Validated From address
#[derive(Clone, Debug)]
pub struct SenderEmail(String);

impl SenderEmail {
    pub fn parse(s: &str) -> Result<Self, EmailError> {
        let email = is_valid_email(s).map_err(|e| EmailError::InvalidRecipient(e.to_string()))?;
        Ok(Self(email))
    }

    pub fn inner(&self) -> &str {
        &self.0
    }
}

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    #[serde(rename = "From")]
    from: &'a str,
    #[serde(rename = "To")]
    to: &'a str,
    #[serde(rename = "Subject")]
    subject: &'a str,
    #[serde(rename = "HtmlBody")]
    html: &'a str,
    #[serde(rename = "TextBody")]
    text: &'a str,
}

impl EmailClient {
    pub fn new(base_url: String, sender: SenderEmail, timeout: std::time::Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self {
            http_client,
            base_url,
            sender,
        }
    }

    pub async fn send_email(
        &self,
        recipient: &str,
        subject: &str,
        html_content: &str,
        text_content: &str,
    ) -> Result<(), EmailError> {
        let url = format!("{}/email", self.base_url.trim_end_matches('/'));
        let request = SendEmailRequest {
            from: self.sender.inner(),
            to: recipient,
            subject,
            html: html_content,
            text: text_content,
        };

        self.http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to reach email service");
                if e.is_connect() || e.is_timeout() {
                    EmailError::ServiceUnavailable(e.to_string())
                } else {
                    EmailError::SendFailed(e.to_string())
                }
            })?
            .error_for_status()
            .map_err(|e| {
                tracing::error!(error = %e, "Email service returned error");
                EmailError::SendFailed(e.to_string())
            })?;

        Ok(())
    }

    /// Mail a one-time link
    pub async fn send_link(
        &self,
        recipient: &str,
        subject: &str,
        intro: &str,
        link: &str,
    ) -> Result<(), EmailError> {
        let html = format!(
            "<p>{}</p><p><a href=\"{}\">{}</a></p><p>If you did not ask for this, ignore this email.</p>",
            intro, link, link
        );
        let text = format!(
            "{}\n\n{}\n\nIf you did not ask for this, ignore this email.",
            intro, link
        );
        self.send_email(recipient, subject, &html, &text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_parse_valid_email() {
        let sender = SenderEmail::parse("noreply@example.com").unwrap();
        assert_eq!(sender.inner(), "noreply@example.com");
    }

    #[test]
    fn test_sender_parse_invalid_email() {
        assert!(matches!(
            SenderEmail::parse("invalid-email"),
            Err(EmailError::InvalidRecipient(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let client = EmailClient::new(
            "http://127.0.0.1:9".to_string(),
            SenderEmail::parse("noreply@example.com").unwrap(),
            std::time::Duration::from_millis(500),
        );

        let result = client
            .send_link("user@example.com", "Reset", "Reset your password", "http://x/y")
            .await;
        assert!(matches!(result, Err(EmailError::ServiceUnavailable(_))));
    }
}

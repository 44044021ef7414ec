//! Vendor mail API adapter (Microsoft Graph style REST mailbox).
//!
//! Lists messages with attachments from one folder, optionally from a single
//! sender, and downloads their PDF file attachments (base64 `contentBytes`).

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::channels::{
    Attachment, ChannelKind, DedupScope, InboundMessage, MessageContent, MessageFilter,
    MessageRef, SourceAdapter,
};
use crate::error::ChannelError;

const NAME: &str = "vendor-api";

/// Listing size when neither the filter nor the config sets one.
pub const DEFAULT_LIMIT: usize = 25;

const FILE_ATTACHMENT_TYPE: &str = "#microsoft.graph.fileAttachment";
const PDF_CONTENT_TYPES: &[&str] = &["application/pdf", "application/x-pdf", "pdf"];

/// Connection settings for the vendor mail API.
#[derive(Debug, Clone)]
pub struct VendorApiConfig {
    /// e.g. `https://graph.microsoft.com/v1.0/me`
    pub base_url: String,
    pub token: SecretString,
    pub folder: String,
    pub limit: usize,
    pub timeout: Duration,
}

impl VendorApiConfig {
    pub fn new(base_url: &str, token: SecretString) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            folder: "inbox".to_string(),
            limit: DEFAULT_LIMIT,
            timeout: Duration::from_secs(30),
        }
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ValueList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMessage {
    pub id: String,
    #[serde(default)]
    pub internet_message_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub received_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub from: Option<ApiRecipient>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRecipient {
    pub email_address: ApiEmailAddress,
}

#[derive(Debug, Deserialize)]
pub struct ApiEmailAddress {
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessageBody {
    #[serde(default)]
    body: Option<ApiItemBody>,
}

#[derive(Debug, Deserialize)]
struct ApiItemBody {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiAttachment {
    #[serde(rename = "@odata.type", default)]
    pub odata_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content_bytes: Option<String>,
}

// ── Adapter ─────────────────────────────────────────────────────────

/// Vendor mail API source.
pub struct VendorApiAdapter {
    config: VendorApiConfig,
    client: reqwest::Client,
}

impl VendorApiAdapter {
    pub fn new(config: VendorApiConfig) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChannelError::ConnectionFailed {
                name: NAME.into(),
                reason: format!("HTTP client: {e}"),
            })?;
        Ok(Self { config, client })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        reference: Option<&str>,
    ) -> Result<T, ChannelError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(self.config.token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionFailed {
                name: NAME.into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_status(status, &body, reference));
        }

        resp.json::<T>().await.map_err(|e| ChannelError::QueryFailed {
            name: NAME.into(),
            reason: format!("invalid response from {url}: {e}"),
        })
    }
}

#[async_trait]
impl SourceAdapter for VendorApiAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::VendorApi
    }

    async fn list_messages(
        &self,
        filter: &MessageFilter,
    ) -> Result<Vec<InboundMessage>, ChannelError> {
        let url = format!(
            "{}/mailFolders/{}/messages",
            self.config.base_url, self.config.folder
        );
        let top = filter.limit.unwrap_or(self.config.limit);
        let query = vec![
            ("$top", top.to_string()),
            (
                "$select",
                "id,internetMessageId,subject,receivedDateTime,from".to_string(),
            ),
            ("$orderby", "receivedDateTime desc".to_string()),
            ("$filter", build_filter(filter)),
        ];

        let list: ValueList<ApiMessage> = self.get_json(&url, &query, None).await?;
        debug!(folder = %self.config.folder, count = list.value.len(), "Vendor API listing");
        Ok(list.value.into_iter().map(into_inbound).collect())
    }

    async fn fetch_body(&self, reference: &MessageRef) -> Result<MessageContent, ChannelError> {
        let message_url = format!("{}/messages/{}", self.config.base_url, reference);
        let body: ApiMessageBody = self
            .get_json(
                &message_url,
                &[("$select", "body".to_string())],
                Some(reference.as_str()),
            )
            .await?;

        let attachments: ValueList<ApiAttachment> = self
            .get_json(
                &format!("{message_url}/attachments"),
                &[],
                Some(reference.as_str()),
            )
            .await?;

        Ok(MessageContent {
            body: body.body.map(|b| b.content).unwrap_or_default(),
            attachments: attachments
                .value
                .into_iter()
                .filter_map(into_attachment)
                .collect(),
        })
    }
}

// ── Helpers (public for testing) ────────────────────────────────────

/// OData `$filter`: attachments required, plus the sender when given.
pub fn build_filter(filter: &MessageFilter) -> String {
    let mut clauses = vec!["hasAttachments eq true".to_string()];
    if let Some(sender) = filter.sender.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        clauses.push(format!(
            "from/emailAddress/address eq '{}'",
            sender.replace('\'', "''")
        ));
    }
    clauses.join(" and ")
}

/// Internet Message-ID is the dedup key; the API id is the fetch handle and
/// the channel-scoped fallback key.
pub fn into_inbound(message: ApiMessage) -> InboundMessage {
    let (dedup_key, dedup_scope) = match message
        .internet_message_id
        .as_deref()
        .map(|id| id.trim().trim_matches(['<', '>']))
        .filter(|id| !id.is_empty())
    {
        Some(id) => (id.to_string(), DedupScope::Global),
        None => (message.id.clone(), DedupScope::Channel),
    };
    InboundMessage {
        channel: ChannelKind::VendorApi,
        dedup_key,
        dedup_scope,
        reference: MessageRef::new(message.id),
        subject: message.subject.unwrap_or_default(),
        sender: message.from.and_then(|f| f.email_address.address),
        received_at: message.received_date_time,
        content: None,
    }
}

/// PDF file attachments only; undecodable content is dropped with a warning.
pub fn into_attachment(attachment: ApiAttachment) -> Option<Attachment> {
    if attachment
        .odata_type
        .as_deref()
        .is_some_and(|t| t != FILE_ATTACHMENT_TYPE)
    {
        return None;
    }
    let content_type = attachment.content_type.unwrap_or_default().to_lowercase();
    if !PDF_CONTENT_TYPES.contains(&content_type.as_str()) {
        return None;
    }
    let filename = attachment.name.unwrap_or_else(|| "attachment.pdf".to_string());
    let bytes = match BASE64.decode(attachment.content_bytes.unwrap_or_default().trim()) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(%filename, error = %e, "Dropping attachment with invalid base64");
            return None;
        }
    };
    Some(Attachment {
        filename,
        content_type,
        bytes,
    })
}

fn map_status(status: StatusCode, body: &str, reference: Option<&str>) -> ChannelError {
    let reason = format!("HTTP {status}: {}", body.chars().take(200).collect::<String>());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ChannelError::AuthFailed {
            name: NAME.into(),
            reason,
        },
        StatusCode::NOT_FOUND if reference.is_some() => ChannelError::NotFound {
            name: NAME.into(),
            reference: reference.unwrap_or_default().to_string(),
        },
        _ => ChannelError::QueryFailed {
            name: NAME.into(),
            reason,
        },
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_requires_attachments() {
        assert_eq!(build_filter(&MessageFilter::default()), "hasAttachments eq true");
    }

    #[test]
    fn filter_escapes_sender() {
        let filter = MessageFilter {
            sender: Some("o'brien@vendor.example".into()),
            ..Default::default()
        };
        assert_eq!(
            build_filter(&filter),
            "hasAttachments eq true and from/emailAddress/address eq 'o''brien@vendor.example'"
        );
    }

    #[test]
    fn listing_maps_to_inbound_messages() {
        let json = serde_json::json!({
            "value": [
                {
                    "id": "AAMk1",
                    "internetMessageId": "<abc@vendor.example>",
                    "subject": "New Reservation",
                    "receivedDateTime": "2025-08-18T10:30:00Z",
                    "from": { "emailAddress": { "address": "res@vendor.example" } }
                },
                { "id": "AAMk2" }
            ]
        });
        let list: ValueList<ApiMessage> = serde_json::from_value(json).unwrap();
        let messages: Vec<InboundMessage> = list.value.into_iter().map(into_inbound).collect();

        assert_eq!(messages[0].dedup_key, "abc@vendor.example");
        assert_eq!(messages[0].reference.as_str(), "AAMk1");
        assert_eq!(messages[0].sender.as_deref(), Some("res@vendor.example"));
        assert!(messages[0].received_at.is_some());
        assert_eq!(messages[0].dedup_scope, DedupScope::Global);
        assert_eq!(messages[1].dedup_key, "AAMk2");
        assert_eq!(messages[1].dedup_scope, DedupScope::Channel);
        assert_eq!(messages[1].subject, "");
    }

    #[test]
    fn only_pdf_file_attachments_are_kept() {
        let json = serde_json::json!({
            "value": [
                {
                    "@odata.type": "#microsoft.graph.fileAttachment",
                    "name": "voucher.pdf",
                    "contentType": "application/pdf",
                    "contentBytes": "JVBERi0xLjQK"
                },
                {
                    "@odata.type": "#microsoft.graph.fileAttachment",
                    "name": "logo.png",
                    "contentType": "image/png",
                    "contentBytes": "iVBORw0K"
                },
                {
                    "@odata.type": "#microsoft.graph.itemAttachment",
                    "name": "forwarded",
                    "contentType": "application/pdf"
                },
                {
                    "@odata.type": "#microsoft.graph.fileAttachment",
                    "name": "broken.pdf",
                    "contentType": "application/pdf",
                    "contentBytes": "not base64!!"
                }
            ]
        });
        let list: ValueList<ApiAttachment> = serde_json::from_value(json).unwrap();
        let kept: Vec<Attachment> = list.value.into_iter().filter_map(into_attachment).collect();

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].filename, "voucher.pdf");
        assert_eq!(kept[0].bytes, b"%PDF-1.4\n");
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            map_status(StatusCode::UNAUTHORIZED, "", None),
            ChannelError::AuthFailed { .. }
        ));
        assert!(matches!(
            map_status(StatusCode::NOT_FOUND, "", Some("AAMk1")),
            ChannelError::NotFound { .. }
        ));
        assert!(matches!(
            map_status(StatusCode::NOT_FOUND, "", None),
            ChannelError::QueryFailed { .. }
        ));
        assert!(matches!(
            map_status(StatusCode::INTERNAL_SERVER_ERROR, "boom", None),
            ChannelError::QueryFailed { .. }
        ));
    }
}

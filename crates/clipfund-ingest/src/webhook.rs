//! Provider webhook payloads and delivery verification
//!
//! A delivery is accepted only when its source address passes the allowlist
//! and one of the comma-separated HMAC-SHA256 signatures in the header matches
//! the raw body. Both checks happen before the body is parsed.

use std::net::IpAddr;

use hmac::{Hmac, Mac};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::WebhookError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature list
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

pub const EVENT_METRICS_UPDATED: &str = "metrics.updated";
pub const EVENT_REFRESH_COMPLETED: &str = "refresh.completed";
pub const EVENT_SESSION_EXPIRED: &str = "account.session_expired";

// ============================================================================
// Payload
// ============================================================================

/// Raw delivery body: `{event, id, data: {accountId?, items?, jobId?}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    /// Provider event id; the dedup key for audit rows
    pub id: String,
    #[serde(default)]
    pub data: WebhookData,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default)]
    pub items: Vec<WebhookItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// Either a bare content id or an object carrying one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WebhookItem {
    Id(String),
    Object {
        #[serde(rename = "contentId", alias = "content_id", alias = "id")]
        content_id: String,
    },
}

impl WebhookItem {
    pub fn content_id(&self) -> &str {
        match self {
            Self::Id(id) => id,
            Self::Object { content_id } => content_id,
        }
    }
}

/// Typed view of an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    MetricsUpdated {
        content_ids: Vec<String>,
    },
    RefreshCompleted {
        account_id: Option<String>,
        job_id: Option<String>,
        content_ids: Vec<String>,
    },
    SessionExpired {
        account_id: String,
    },
    /// Acknowledged and logged, never applied
    Unknown {
        event: String,
    },
}

impl WebhookEnvelope {
    pub fn from_slice(body: &[u8]) -> Result<Self, WebhookError> {
        let envelope: Self =
            serde_json::from_slice(body).map_err(|e| WebhookError::Malformed(e.to_string()))?;
        if envelope.id.trim().is_empty() {
            return Err(WebhookError::Malformed("empty event id".into()));
        }
        Ok(envelope)
    }

    /// Distinct, non-empty content ids in delivery order
    pub fn content_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::with_capacity(self.data.items.len());
        for item in &self.data.items {
            let id = item.content_id().trim();
            if !id.is_empty() && !ids.iter().any(|seen| seen == id) {
                ids.push(id.to_string());
            }
        }
        ids
    }

    pub fn kind(&self) -> WebhookEvent {
        match self.event.as_str() {
            EVENT_METRICS_UPDATED => WebhookEvent::MetricsUpdated {
                content_ids: self.content_ids(),
            },
            EVENT_REFRESH_COMPLETED => WebhookEvent::RefreshCompleted {
                account_id: self.data.account_id.clone(),
                job_id: self.data.job_id.clone(),
                content_ids: self.content_ids(),
            },
            EVENT_SESSION_EXPIRED => match &self.data.account_id {
                Some(account_id) => WebhookEvent::SessionExpired {
                    account_id: account_id.clone(),
                },
                None => WebhookEvent::Unknown {
                    event: format!("{} without accountId", self.event),
                },
            },
            other => WebhookEvent::Unknown {
                event: other.to_string(),
            },
        }
    }
}

// ============================================================================
// Signature
// ============================================================================

/// Hex HMAC-SHA256 of `body`
pub fn sign(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check `header` (comma-separated hex digests, optionally `sha256=` prefixed)
/// against the raw body in constant time per candidate
pub fn verify_signature(secret: &str, body: &[u8], header: Option<&str>) -> Result<(), WebhookError> {
    let header = header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(WebhookError::MissingSignature)?;
    let expected = sign(secret, body)?;

    let mut matched = false;
    for candidate in header.split(',') {
        let candidate = candidate.trim();
        let candidate = candidate.strip_prefix("sha256=").unwrap_or(candidate);
        let candidate = candidate.to_ascii_lowercase();
        let eq: bool = expected.as_bytes().ct_eq(candidate.as_bytes()).into();
        matched |= eq;
    }

    if matched {
        Ok(())
    } else {
        Err(WebhookError::InvalidSignature)
    }
}

// ============================================================================
// Source allowlist
// ============================================================================

/// Exact addresses or CIDR ranges; empty allows everyone
#[derive(Debug, Clone, Default)]
pub struct IpAllowlist {
    networks: Vec<IpNetwork>,
}

impl IpAllowlist {
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, WebhookError> {
        let networks = entries
            .iter()
            .map(|e| e.as_ref().trim())
            .filter(|e| !e.is_empty())
            .map(|e| {
                e.parse::<IpNetwork>()
                    .map_err(|_| WebhookError::InvalidAllowlist(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { networks })
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    pub fn allows(&self, ip: IpAddr) -> bool {
        self.networks.is_empty() || self.networks.iter().any(|net| net.contains(ip))
    }
}

/// Resolve the caller address, taking the first `X-Forwarded-For` hop when
/// the deployment sits behind a trusted proxy
pub fn client_ip(peer: IpAddr, forwarded_for: Option<&str>, trust_forwarded_for: bool) -> IpAddr {
    if !trust_forwarded_for {
        return peer;
    }
    forwarded_for
        .and_then(|v| v.split(',').next())
        .and_then(|hop| hop.trim().parse::<IpAddr>().ok())
        .unwrap_or(peer)
}

/// Both delivery checks bundled with their configuration
#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    secret: String,
    allowlist: IpAllowlist,
    trust_forwarded_for: bool,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, allowlist: IpAllowlist, trust_forwarded_for: bool) -> Self {
        Self {
            secret: secret.into(),
            allowlist,
            trust_forwarded_for,
        }
    }

    /// Source check first, then signature; nothing is parsed on failure
    pub fn verify(
        &self,
        peer: IpAddr,
        forwarded_for: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<(), WebhookError> {
        let ip = client_ip(peer, forwarded_for, self.trust_forwarded_for);
        if !self.allowlist.allows(ip) {
            return Err(WebhookError::ForbiddenSource(ip.to_string()));
        }
        verify_signature(&self.secret, body, signature)
    }
}

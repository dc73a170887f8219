//! Broker Message Types
//!
//! Wire payloads carried inside `42[...]` application frames, and their
//! mapping onto the domain's [`MarketEvent`].
//!
//! ## Inbound
//! - `login`: `{success, message?}`
//! - `assets_status`: array of asset descriptors
//! - `candles`: array of candles tagged with `asset`
//! - `tick`: `{asset, value}`
//! - `balance`, `balance_get`, `balance_update`: opaque balance payload
//!
//! ## Outbound
//! - `login`: `{ssid}` or `{email, password}`
//! - `assets_status`, `balance_get`: no payload
//! - `candles`: `{asset, tf, cnt}`
//! - `subscribe`, `tick-subscribe`: `{asset}`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::ports::UpstreamRequest;
use crate::domain::market::{AssetDescriptor, Candle, MarketEvent, Tick};
use crate::infrastructure::upstream::codec::FrameCodec;

/// Errors decoding a known event's payload.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// Payload did not match the event's schema.
    #[error("invalid `{event}` payload: {source}")]
    InvalidPayload {
        /// Event name.
        event: &'static str,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
}

// =============================================================================
// Inbound
// =============================================================================

/// Result of a `login` request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoginResult {
    /// Whether the broker accepted the credentials.
    #[serde(default)]
    pub success: bool,
    /// Rejection reason, if any.
    #[serde(default)]
    pub message: Option<String>,
}

/// A decoded inbound application event.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Login result, consumed by the session itself.
    Login(LoginResult),
    /// Market data for the router.
    Market(MarketEvent),
}

impl InboundEvent {
    /// Map an event name and payload onto a typed event.
    ///
    /// Unknown names map to [`MarketEvent::Unknown`].
    ///
    /// # Errors
    ///
    /// Returns an error when a known event carries a payload of the wrong shape.
    pub fn parse(name: &str, payload: Value) -> Result<Self, MessageError> {
        let event = match name {
            "login" => Self::Login(decode("login", payload)?),
            "assets_status" => Self::Market(MarketEvent::AssetsStatus(decode_assets(payload)?)),
            "candles" => Self::Market(MarketEvent::Candles(decode::<Vec<Candle>>(
                "candles", payload,
            )?)),
            "tick" => Self::Market(MarketEvent::Tick(decode::<Tick>("tick", payload)?)),
            "balance" | "balance_get" | "balance_update" => {
                Self::Market(MarketEvent::Balance(payload))
            }
            other => Self::Market(MarketEvent::Unknown {
                name: other.to_string(),
            }),
        };
        Ok(event)
    }
}

fn decode<T: for<'de> Deserialize<'de>>(
    event: &'static str,
    payload: Value,
) -> Result<T, MessageError> {
    serde_json::from_value(payload).map_err(|source| MessageError::InvalidPayload { event, source })
}

/// Asset lists are decoded entry by entry; malformed entries are skipped.
fn decode_assets(payload: Value) -> Result<Vec<AssetDescriptor>, MessageError> {
    let entries: Vec<Value> = decode("assets_status", payload)?;
    let total = entries.len();
    let assets: Vec<AssetDescriptor> = entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect();
    if assets.len() < total {
        tracing::debug!(
            skipped = total - assets.len(),
            "Skipped malformed asset descriptors"
        );
    }
    Ok(assets)
}

// =============================================================================
// Outbound
// =============================================================================

/// `login` request payload.
#[derive(Clone, Serialize)]
#[serde(untagged)]
pub enum LoginRequest {
    /// Session-token login.
    SessionToken {
        /// Session token.
        ssid: String,
    },
    /// Email and password login.
    EmailPassword {
        /// Account email.
        email: String,
        /// Account password.
        password: String,
    },
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionToken { .. } => f
                .debug_struct("SessionToken")
                .field("ssid", &"[REDACTED]")
                .finish(),
            Self::EmailPassword { email, .. } => f
                .debug_struct("EmailPassword")
                .field("email", email)
                .field("password", &"[REDACTED]")
                .finish(),
        }
    }
}

impl LoginRequest {
    /// Encode as a `login` frame.
    #[must_use]
    pub fn to_frame(&self, codec: &FrameCodec) -> String {
        // Serializing two string fields cannot fail.
        let payload = serde_json::to_value(self).unwrap_or(Value::Null);
        codec.encode("login", Some(&payload))
    }
}

#[derive(Serialize)]
struct CandlesPayload<'a> {
    asset: &'a str,
    tf: u32,
    cnt: u32,
}

#[derive(Serialize)]
struct AssetPayload<'a> {
    asset: &'a str,
}

/// Encode a request as an application frame.
#[must_use]
pub fn request_frame(codec: &FrameCodec, request: &UpstreamRequest) -> String {
    let payload = match request {
        UpstreamRequest::AssetsStatus | UpstreamRequest::BalanceGet => None,
        UpstreamRequest::Candles {
            asset,
            timeframe,
            count,
        } => serde_json::to_value(CandlesPayload {
            asset,
            tf: *timeframe,
            cnt: *count,
        })
        .ok(),
        UpstreamRequest::Subscribe { asset } | UpstreamRequest::TickSubscribe { asset } => {
            serde_json::to_value(AssetPayload { asset }).ok()
        }
    };
    codec.encode(request.event_name(), payload.as_ref())
}

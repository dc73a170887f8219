//! Broker WebSocket Adapter
//!
//! Maintains the single upstream session to the broker's Socket.IO-framed
//! WebSocket feed:
//!
//! - **codec**: `42[...]` event framing and control-frame classification
//! - **messages**: inbound payload decoding and outbound request encoding
//! - **auth**: credentials and the login handshake
//! - **session**: connection state machine, heartbeat and reconnection
//! - **dispatch**: hands session events to the market event router

pub mod auth;
pub mod codec;
pub mod dispatch;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod session;

pub use auth::{AuthError, AuthHandler, AuthState, Credentials, SsidAuthStrategy};
pub use codec::{Frame, FrameCodec};
pub use dispatch::dispatch_session_events;
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager};
pub use messages::{InboundEvent, LoginRequest, LoginResult, MessageError};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use session::{
    ConnectionState, SessionCommand, SessionError, SessionEvent, SessionHandle, SessionState,
    UpstreamSession, UpstreamSessionConfig,
};

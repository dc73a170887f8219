//! Upstream session tests against an in-process broker.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::Duration;

use market_gateway::application::ports::{UpstreamPort, UpstreamRequest};
use market_gateway::infrastructure::upstream::{
    ConnectionState, Credentials, HeartbeatConfig, ReconnectConfig, SessionError, SessionEvent,
    SsidAuthStrategy, UpstreamSession, UpstreamSessionConfig,
};
use market_gateway::{MarketEvent, SessionHandle};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use common::{FakeBroker, STEP};

struct Running {
    handle: SessionHandle,
    events: mpsc::Receiver<SessionEvent>,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), SessionError>>,
}

impl Running {
    async fn next_event(&mut self) -> SessionEvent {
        tokio::time::timeout(STEP, self.events.recv())
            .await
            .expect("session should emit an event")
            .expect("event channel should stay open")
    }

    async fn stop(self) {
        self.cancel.cancel();
        let result = tokio::time::timeout(STEP, self.task).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}

fn config(broker: &FakeBroker, credentials: Credentials) -> UpstreamSessionConfig {
    let mut config = UpstreamSessionConfig::new(broker.url(), credentials);
    config.reconnect = ReconnectConfig::fixed(Duration::from_millis(50));
    config.settle_delay = Duration::from_millis(20);
    config.connect_timeout = Duration::from_secs(2);
    config
}

fn start(config: UpstreamSessionConfig) -> Running {
    let (event_tx, events) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let (session, handle) = UpstreamSession::new(config, event_tx, cancel.clone());
    let task = tokio::spawn(session.run());
    Running {
        handle,
        events,
        cancel,
        task,
    }
}

#[tokio::test]
async fn email_login_goes_live_and_requests_assets_and_balance() {
    let broker = FakeBroker::bind().await;
    let credentials = Credentials::email_password("me@example.com", "pw").unwrap();
    let mut running = start(config(&broker, credentials));

    let mut conn = broker.accept().await;
    assert!(conn.cookie.is_none());

    let (name, payload) = conn.recv_event().await;
    assert_eq!(name, "login");
    assert_eq!(payload, json!({"email": "me@example.com", "password": "pw"}));
    assert!(!running.handle.is_live());

    conn.send_event("login", &json!({"success": true})).await;

    assert_eq!(
        running.next_event().await,
        SessionEvent::Live {
            authenticated: true
        }
    );
    let names: Vec<String> = conn
        .recv_events(2)
        .await
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, vec!["assets_status", "balance_get"]);
    assert_eq!(
        running.handle.state().connection_state(),
        ConnectionState::Live
    );
    assert!(running.handle.state().is_authenticated());

    running.stop().await;
}

#[tokio::test]
async fn header_strategy_sends_cookie_and_skips_login() {
    let broker = FakeBroker::bind().await;
    let credentials = Credentials::session_token("abc123").unwrap();
    let mut running = start(config(&broker, credentials));

    let mut conn = broker.accept().await;
    assert_eq!(conn.cookie.as_deref(), Some("ssid=abc123"));

    let (name, _) = conn.recv_event().await;
    assert_eq!(name, "assets_status");
    assert_eq!(
        running.next_event().await,
        SessionEvent::Live {
            authenticated: true
        }
    );

    running.stop().await;
}

#[tokio::test]
async fn login_event_strategy_sends_ssid() {
    let broker = FakeBroker::bind().await;
    let mut config = config(&broker, Credentials::session_token("abc123").unwrap());
    config.ssid_auth = SsidAuthStrategy::LoginEvent;
    let running = start(config);

    let mut conn = broker.accept().await;
    assert!(conn.cookie.is_none());
    assert_eq!(
        conn.recv_event().await,
        ("login".to_string(), json!({"ssid": "abc123"}))
    );

    running.stop().await;
}

#[tokio::test]
async fn anonymous_session_is_live_without_balance_request() {
    let broker = FakeBroker::bind().await;
    let mut running = start(config(&broker, Credentials::None));

    let mut conn = broker.accept().await;
    assert_eq!(
        running.next_event().await,
        SessionEvent::Live {
            authenticated: false
        }
    );
    assert_eq!(conn.recv_event().await.0, "assets_status");

    // The next application frame is the tick subscription, not balance_get.
    assert!(running.handle.send(UpstreamRequest::Subscribe {
        asset: "EURUSD_otc".into()
    }));
    assert_eq!(
        conn.recv_event().await,
        ("subscribe".to_string(), json!({"asset": "EURUSD_otc"}))
    );

    running.stop().await;
}

#[tokio::test]
async fn rejected_login_schedules_reconnect() {
    let broker = FakeBroker::bind().await;
    let credentials = Credentials::email_password("me@example.com", "wrong").unwrap();
    let mut running = start(config(&broker, credentials));

    let mut conn = broker.accept().await;
    assert_eq!(conn.recv_event().await.0, "login");
    conn.send_event("login", &json!({"success": false, "message": "invalid"}))
        .await;

    assert_eq!(running.next_event().await, SessionEvent::Disconnected);
    assert_eq!(
        running.next_event().await,
        SessionEvent::Reconnecting { attempt: 1 }
    );
    assert!(!running.handle.is_live());

    // The retry logs in again.
    let mut retry = broker.accept().await;
    assert_eq!(retry.recv_event().await.0, "login");

    running.stop().await;
}

#[tokio::test]
async fn market_events_are_forwarded_while_live() {
    let broker = FakeBroker::bind().await;
    let mut running = start(config(&broker, Credentials::None));

    let mut conn = broker.accept().await;
    running.next_event().await;

    conn.send_event("tick", &json!({"asset": "EURUSD_otc", "value": 1.0856}))
        .await;
    conn.send_event("balance_update", &json!({"balance": 10})).await;
    conn.send_event("some_other_event", &Value::Null).await;

    let tick_connection = match running.next_event().await {
        SessionEvent::Market {
            event: MarketEvent::Tick(tick),
            connection,
        } => {
            assert_eq!(tick.asset, "EURUSD_otc");
            assert!((tick.value - 1.0856).abs() < f64::EPSILON);
            connection
        }
        other => panic!("expected tick, got {other:?}"),
    };
    assert!(!tick_connection.is_cancelled());
    assert_eq!(
        running.next_event().await,
        SessionEvent::market(
            MarketEvent::Balance(json!({"balance": 10})),
            &tick_connection
        )
    );
    assert_eq!(
        running.next_event().await,
        SessionEvent::market(
            MarketEvent::Unknown {
                name: "some_other_event".into()
            },
            &tick_connection
        )
    );
    assert!(running.handle.state().frames_received() >= 3);

    // Events keep the token of the connection they arrived on.
    conn.close().await;
    assert_eq!(running.next_event().await, SessionEvent::Disconnected);
    assert!(tick_connection.is_cancelled());

    running.stop().await;
}

#[tokio::test]
async fn broker_ping_is_answered_with_pong() {
    let broker = FakeBroker::bind().await;
    let running = start(config(&broker, Credentials::None));

    let mut conn = broker.accept().await;
    assert_eq!(conn.recv_event().await.0, "assets_status");

    conn.send_text("2").await;
    assert_eq!(conn.recv_text().await, "3");

    running.stop().await;
}

#[tokio::test]
async fn heartbeat_is_sent_while_live() {
    let broker = FakeBroker::bind().await;
    let mut config = config(&broker, Credentials::None);
    config.heartbeat = HeartbeatConfig::new(Duration::from_millis(50));
    let running = start(config);

    let mut conn = broker.accept().await;
    assert_eq!(conn.recv_event().await.0, "assets_status");
    assert_eq!(conn.recv_text().await, "2");

    running.stop().await;
}

#[tokio::test]
async fn broker_close_reconnects_after_fixed_delay() {
    let broker = FakeBroker::bind().await;
    let mut running = start(config(&broker, Credentials::None));

    let conn = broker.accept().await;
    assert!(matches!(running.next_event().await, SessionEvent::Live { .. }));
    let first_token = running.handle.connection_token();
    conn.close().await;

    assert_eq!(running.next_event().await, SessionEvent::Disconnected);
    assert_eq!(
        running.next_event().await,
        SessionEvent::Reconnecting { attempt: 1 }
    );
    assert!(first_token.is_cancelled());

    let mut conn = broker.accept().await;
    assert_eq!(conn.recv_event().await.0, "assets_status");
    assert!(matches!(running.next_event().await, SessionEvent::Live { .. }));
    assert_eq!(running.handle.state().reconnect_attempts(), 0);
    assert!(!running.handle.connection_token().is_cancelled());

    running.stop().await;
}

#[tokio::test]
async fn reconfigure_restarts_with_new_cookie() {
    let broker = FakeBroker::bind().await;
    let credentials = Credentials::session_token("old-token").unwrap();
    let mut running = start(config(&broker, credentials));

    let mut conn = broker.accept().await;
    assert_eq!(conn.cookie.as_deref(), Some("ssid=old-token"));
    assert!(matches!(running.next_event().await, SessionEvent::Live { .. }));

    running
        .handle
        .reconfigure(Credentials::session_token("new-token").unwrap())
        .unwrap();

    conn.expect_closed().await;
    assert_eq!(running.next_event().await, SessionEvent::Disconnected);

    let conn = broker.accept().await;
    assert_eq!(conn.cookie.as_deref(), Some("ssid=new-token"));
    assert!(matches!(running.next_event().await, SessionEvent::Live { .. }));

    running.stop().await;
}

#[tokio::test]
async fn reconfigure_during_reconnect_wait_connects_once() {
    let broker = FakeBroker::bind().await;
    let mut config = config(&broker, Credentials::session_token("old-token").unwrap());
    config.reconnect = ReconnectConfig::fixed(Duration::from_secs(60));
    let mut running = start(config);

    let conn = broker.accept().await;
    assert!(matches!(running.next_event().await, SessionEvent::Live { .. }));
    conn.close().await;
    assert_eq!(running.next_event().await, SessionEvent::Disconnected);
    assert_eq!(
        running.next_event().await,
        SessionEvent::Reconnecting { attempt: 1 }
    );

    running
        .handle
        .reconfigure(Credentials::session_token("new-token").unwrap())
        .unwrap();

    // The 60 s timer is replaced by the settle delay.
    let conn = broker.accept().await;
    assert_eq!(conn.cookie.as_deref(), Some("ssid=new-token"));
    assert!(matches!(running.next_event().await, SessionEvent::Live { .. }));
    broker.expect_no_connection(Duration::from_millis(300)).await;
    assert!(running.handle.is_live());

    running.stop().await;
}

#[tokio::test]
async fn reconnect_command_restarts_with_same_credentials() {
    let broker = FakeBroker::bind().await;
    let mut running = start(config(&broker, Credentials::session_token("abc123").unwrap()));

    let mut conn = broker.accept().await;
    assert!(matches!(running.next_event().await, SessionEvent::Live { .. }));
    let first_token = running.handle.connection_token();

    running.handle.reconnect().unwrap();

    conn.expect_closed().await;
    assert_eq!(running.next_event().await, SessionEvent::Disconnected);
    assert!(first_token.is_cancelled());

    let mut conn = broker.accept().await;
    assert_eq!(conn.cookie.as_deref(), Some("ssid=abc123"));
    assert_eq!(conn.recv_event().await.0, "assets_status");
    assert!(matches!(running.next_event().await, SessionEvent::Live { .. }));
    broker.expect_no_connection(Duration::from_millis(300)).await;

    running.stop().await;
}

#[tokio::test]
async fn exhausted_attempts_stop_the_session() {
    let broker = FakeBroker::bind().await;
    let mut config = config(&broker, Credentials::None);
    config.reconnect = ReconnectConfig::fixed(Duration::from_millis(20)).with_max_attempts(1);
    let mut running = start(config);

    let conn = broker.accept().await;
    assert!(matches!(running.next_event().await, SessionEvent::Live { .. }));
    drop(broker);
    conn.close().await;

    let result = tokio::time::timeout(STEP, running.task)
        .await
        .expect("session should give up")
        .unwrap();
    assert!(matches!(
        result,
        Err(SessionError::MaxReconnectAttemptsExceeded)
    ));
}

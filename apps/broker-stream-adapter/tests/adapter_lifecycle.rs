//! Adapter Lifecycle Integration Tests
//!
//! Drives a zerodha adapter through a scripted wire: reference counting,
//! mode upgrades and downgrades, reconnect replay and giving up.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::Duration;

use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use broker_stream_adapter::application::ports::WireLink;
use broker_stream_adapter::{AdapterError, AdapterState, Mode};
use common::{INFY_TOKEN, RELIANCE_TOKEN, TCS_TOKEN, feed_settings, wait_for_state, zerodha};

#[tokio::test]
async fn connect_opens_authenticated_socket() {
    let h = zerodha(feed_settings(), true).await;

    h.adapter.connect().await.unwrap();

    assert_eq!(h.adapter.state(), AdapterState::Connected);
    assert!(h.adapter.is_connected());
    assert_eq!(
        h.connector.endpoints()[0].url,
        "wss://ws.kite.trade?api_key=kite-key&access_token=kite-token"
    );

    assert_ok!(h.adapter.disconnect().await);
}

#[tokio::test]
async fn two_callers_share_one_upstream_subscription() {
    let h = zerodha(feed_settings(), true).await;
    h.adapter.connect().await.unwrap();
    let link = h.connector.link();

    h.adapter.subscribe("RELIANCE", "NSE", Mode::Ltp, None).await.unwrap();
    h.adapter.subscribe("RELIANCE", "nse", Mode::Ltp, None).await.unwrap();

    assert_eq!(
        link.sent_json(),
        vec![
            json!({"a": "subscribe", "v": [RELIANCE_TOKEN]}),
            json!({"a": "mode", "v": ["ltp", [RELIANCE_TOKEN]]}),
        ]
    );
    let stats = h.adapter.stats().subscriptions;
    assert_eq!(stats.subscriptions, 1);
    assert_eq!(stats.references, 2);

    link.clear_sent();
    h.adapter.unsubscribe("RELIANCE", "NSE", Mode::Ltp).await.unwrap();
    assert!(link.sent_json().is_empty());

    h.adapter.unsubscribe("RELIANCE", "NSE", Mode::Ltp).await.unwrap();
    assert_eq!(
        link.sent_json(),
        vec![json!({"a": "unsubscribe", "v": [RELIANCE_TOKEN]})]
    );
    assert_eq!(h.adapter.stats().subscriptions.subscriptions, 0);

    let err = h
        .adapter
        .unsubscribe("RELIANCE", "NSE", Mode::Ltp)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_SUBSCRIBED");
}

#[tokio::test]
async fn higher_mode_upgrades_and_lower_release_is_silent() {
    let h = zerodha(feed_settings(), true).await;
    h.adapter.connect().await.unwrap();
    let link = h.connector.link();

    h.adapter.subscribe("RELIANCE", "NSE", Mode::Ltp, None).await.unwrap();
    link.clear_sent();

    h.adapter.subscribe("RELIANCE", "NSE", Mode::Quote, None).await.unwrap();
    assert_eq!(
        link.sent_json(),
        vec![
            json!({"a": "subscribe", "v": [RELIANCE_TOKEN]}),
            json!({"a": "mode", "v": ["quote", [RELIANCE_TOKEN]]}),
        ]
    );

    link.clear_sent();
    h.adapter.unsubscribe("RELIANCE", "NSE", Mode::Ltp).await.unwrap();
    assert!(link.sent_json().is_empty(), "quote still covers ltp");

    h.adapter.subscribe("RELIANCE", "NSE", Mode::Ltp, None).await.unwrap();
    assert!(link.sent_json().is_empty(), "lower mode rides the quote feed");

    h.adapter.unsubscribe("RELIANCE", "NSE", Mode::Quote).await.unwrap();
    assert_eq!(
        link.sent_json(),
        vec![json!({"a": "mode", "v": ["ltp", [RELIANCE_TOKEN]]})]
    );
}

#[tokio::test]
async fn unsupported_depth_falls_back() {
    let h = zerodha(feed_settings(), true).await;
    h.adapter.connect().await.unwrap();

    let reply = h
        .adapter
        .subscribe("RELIANCE", "NSE", Mode::Depth, Some(20))
        .await
        .unwrap();

    assert_eq!(reply.requested_depth, Some(20));
    assert_eq!(reply.actual_depth, Some(5));
    assert_eq!(reply.is_fallback, Some(true));
    assert_eq!(
        h.connector.link().sent_json()[1],
        json!({"a": "mode", "v": ["full", [RELIANCE_TOKEN]]})
    );

    let plain = h
        .adapter
        .subscribe("INFY", "NSE", Mode::Quote, Some(20))
        .await
        .unwrap();
    assert_eq!(plain.actual_depth, None);
    assert_eq!(plain.is_fallback, None);
}

#[tokio::test]
async fn repeat_subscribe_reports_fallback_for_its_own_request() {
    let h = zerodha(feed_settings(), true).await;
    h.adapter.connect().await.unwrap();

    let first = h
        .adapter
        .subscribe("RELIANCE", "NSE", Mode::Depth, Some(5))
        .await
        .unwrap();
    assert_eq!(first.is_fallback, Some(false));

    let second = h
        .adapter
        .subscribe("RELIANCE", "NSE", Mode::Depth, Some(20))
        .await
        .unwrap();

    assert_eq!(second.requested_depth, Some(20));
    assert_eq!(second.actual_depth, Some(5));
    assert_eq!(second.is_fallback, Some(true));
    assert_eq!(h.adapter.stats().subscriptions.references, 2);
}

#[tokio::test]
async fn subscribe_frames_are_queued_as_one_unit() {
    let h = zerodha(feed_settings(), true).await;
    h.adapter.connect().await.unwrap();
    let link = h.connector.link();
    link.limit_outbound(Some(1));

    let err = assert_err!(h.adapter.subscribe("RELIANCE", "NSE", Mode::Ltp, None).await);

    assert_eq!(err.code(), "SUBSCRIPTION_ERROR");
    assert!(link.sent_json().is_empty(), "no half-sent subscribe");
    assert_eq!(h.adapter.stats().subscriptions.subscriptions, 0);

    link.limit_outbound(None);
    assert_ok!(h.adapter.subscribe("RELIANCE", "NSE", Mode::Ltp, None).await);
    assert_eq!(link.sent_json().len(), 2);
}

#[tokio::test]
async fn unknown_symbol_is_rejected() {
    let h = zerodha(feed_settings(), true).await;

    let err = h
        .adapter
        .subscribe("NOPE", "NSE", Mode::Ltp, None)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        AdapterError::SymbolNotFound {
            symbol: "NOPE".to_string(),
            exchange: "NSE".to_string(),
        }
    );
}

#[tokio::test]
async fn subscriptions_before_connect_are_replayed() {
    let h = zerodha(feed_settings(), true).await;

    h.adapter.subscribe("RELIANCE", "NSE", Mode::Ltp, None).await.unwrap();
    h.adapter.subscribe("INFY", "NSE", Mode::Ltp, None).await.unwrap();
    h.adapter.connect().await.unwrap();

    let sent = h.connector.link().sent_json();
    assert_eq!(sent.len(), 2, "one batch per mode level");
    let tokens = sent[0]["v"].as_array().unwrap();
    assert!(tokens.contains(&json!(RELIANCE_TOKEN)));
    assert!(tokens.contains(&json!(INFY_TOKEN)));
}

#[tokio::test]
async fn refused_connect_returns_to_initialized() {
    let h = zerodha(feed_settings(), true).await;
    h.connector.refuse(true);

    let err = assert_err!(h.adapter.connect().await);

    assert_eq!(err.code(), "CONNECT_ERROR");
    assert_eq!(h.adapter.state(), AdapterState::Initialized);
    assert!(!h.adapter.is_connected());

    h.connector.refuse(false);
    h.adapter.connect().await.unwrap();
    assert_eq!(h.adapter.state(), AdapterState::Connected);
}

#[tokio::test(start_paused = true)]
async fn unsolicited_close_reconnects_and_replays() {
    let h = zerodha(feed_settings(), true).await;
    h.adapter.connect().await.unwrap();
    h.adapter.subscribe("RELIANCE", "NSE", Mode::Quote, None).await.unwrap();

    h.connector.link().drop_connection("broker went away").await;
    h.connector.wait_for_connects(2).await;
    wait_for_state(h.adapter.as_ref(), AdapterState::Connected).await;

    assert_eq!(
        h.connector.link().sent_json(),
        vec![
            json!({"a": "subscribe", "v": [RELIANCE_TOKEN]}),
            json!({"a": "mode", "v": ["quote", [RELIANCE_TOKEN]]}),
        ]
    );
    assert_eq!(h.adapter.stats().subscriptions.references, 1);
}

#[tokio::test(start_paused = true)]
async fn reconnect_replays_every_subscription_once_per_level() {
    let h = zerodha(feed_settings(), true).await;
    h.adapter.connect().await.unwrap();
    h.adapter.subscribe("RELIANCE", "NSE", Mode::Ltp, None).await.unwrap();
    h.adapter.subscribe("INFY", "NSE", Mode::Ltp, None).await.unwrap();
    h.adapter.subscribe("INFY", "NSE", Mode::Ltp, None).await.unwrap();
    h.adapter.subscribe("TCS", "NSE", Mode::Depth, Some(5)).await.unwrap();
    h.adapter.subscribe("TCS", "NSE", Mode::Ltp, None).await.unwrap();

    h.connector.link().drop_connection("broker went away").await;
    h.connector.wait_for_connects(2).await;
    wait_for_state(h.adapter.as_ref(), AdapterState::Connected).await;

    let link = h.connector.link();
    let sent = link.sent_json();
    assert_eq!(sent.len(), 4, "subscribe and mode per level");

    let mut ltp_tokens = sent[0]["v"].as_array().unwrap().clone();
    ltp_tokens.sort_by_key(|t| t.as_u64());
    assert_eq!(sent[0]["a"], "subscribe");
    assert_eq!(ltp_tokens, vec![json!(INFY_TOKEN), json!(RELIANCE_TOKEN)]);
    assert_eq!(sent[1]["v"][0], "ltp");
    assert_eq!(sent[2], json!({"a": "subscribe", "v": [TCS_TOKEN]}));
    assert_eq!(sent[3], json!({"a": "mode", "v": ["full", [TCS_TOKEN]]}));

    let stats = h.adapter.stats().subscriptions;
    assert_eq!(stats.subscriptions, 4);
    assert_eq!(stats.references, 5);

    link.clear_sent();
    h.adapter.unsubscribe("INFY", "NSE", Mode::Ltp).await.unwrap();
    assert!(link.sent_json().is_empty(), "second INFY caller still holds it");
    h.adapter.unsubscribe("INFY", "NSE", Mode::Ltp).await.unwrap();
    h.adapter.unsubscribe("TCS", "NSE", Mode::Depth).await.unwrap();
    assert_eq!(
        link.sent_json(),
        vec![
            json!({"a": "unsubscribe", "v": [INFY_TOKEN]}),
            json!({"a": "mode", "v": ["ltp", [TCS_TOKEN]]}),
        ]
    );

    let stats = h.adapter.stats().subscriptions;
    assert_eq!(stats.subscriptions, 2);
    assert_eq!(stats.references, 2);
}

#[tokio::test]
async fn disconnect_during_reconnect_attempt_stays_disconnected() {
    let h = zerodha(feed_settings(), true).await;
    h.adapter.connect().await.unwrap();
    h.adapter.subscribe("RELIANCE", "NSE", Mode::Ltp, None).await.unwrap();

    h.connector.refuse(true);
    h.connector.hold(true);
    h.connector.link().drop_connection("network down").await;
    h.connector.wait_for_attempts(2).await;
    assert_eq!(h.adapter.state(), AdapterState::Connecting);

    assert_ok!(h.adapter.disconnect().await);
    h.connector.hold(false);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.adapter.state(), AdapterState::Disconnected);
    assert!(h.adapter.watch_status().borrow().fatal.is_none());
    assert_eq!(h.connector.endpoints().len(), 2, "no attempt after disconnect");

    h.connector.refuse(false);
    assert_ok!(h.adapter.connect().await);
    assert_eq!(h.adapter.state(), AdapterState::Connected);
}

#[tokio::test(start_paused = true)]
async fn exhausted_reconnects_are_fatal_but_keep_subscriptions() {
    let h = zerodha(feed_settings(), true).await;
    h.adapter.connect().await.unwrap();
    h.adapter.subscribe("RELIANCE", "NSE", Mode::Ltp, None).await.unwrap();

    h.connector.refuse(true);
    h.connector.link().drop_connection("network down").await;

    let status = wait_for_state(h.adapter.as_ref(), AdapterState::Disconnected).await;
    assert_eq!(status.fatal, Some(AdapterError::MaxReconnectAttemptsExceeded(3)));
    assert_eq!(h.connector.endpoints().len(), 4, "initial connect plus three attempts");
    assert_eq!(h.adapter.stats().subscriptions.subscriptions, 1);

    h.connector.refuse(false);
    h.adapter.connect().await.unwrap();
    assert_eq!(
        h.connector.link().sent_json()[0],
        json!({"a": "subscribe", "v": [RELIANCE_TOKEN]})
    );
}

#[tokio::test]
async fn disconnect_clears_everything_and_is_idempotent() {
    let h = zerodha(feed_settings(), true).await;
    h.adapter.connect().await.unwrap();
    h.adapter.subscribe("RELIANCE", "NSE", Mode::Ltp, None).await.unwrap();
    let link = h.connector.link();

    assert_ok!(h.adapter.disconnect().await);
    assert_ok!(h.adapter.disconnect().await);

    assert_eq!(h.adapter.state(), AdapterState::Disconnected);
    assert!(!link.is_connected());
    assert_eq!(h.adapter.stats().subscriptions, Default::default());
}

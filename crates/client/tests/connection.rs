mod common;

use common::*;
use gatelink_client::auth::DeviceAuthPayload;
use gatelink_client::identity::verify_signature;
use gatelink_client::{
    ClientError, ConnectionState, DeviceIdentity, DeviceTokenStore, RequestOptions, TransportPeer,
};
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;

fn scopes_of(params: &serde_json::Value) -> Vec<String> {
    params["scopes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s.as_str().unwrap().to_string())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn clean_handshake_with_challenge_stores_device_token() {
    let mut h = Harness::new();
    h.client.start();

    let mut peer = h.next_peer().await;
    send_challenge(&peer, "abc");

    let connect = expect_request(&mut peer, "connect").await;
    let params = &connect["params"];
    let device = &params["device"];
    assert_eq!(device["nonce"], "abc");
    assert_eq!(device["id"], h.client.device_id());
    assert_eq!(params["minProtocol"], 3);
    assert_eq!(params["role"], "operator");
    assert!(params.get("auth").is_none());

    let scopes = scopes_of(params);
    let payload = DeviceAuthPayload {
        device_id: device["id"].as_str().unwrap(),
        client_id: params["client"]["id"].as_str().unwrap(),
        client_mode: params["client"]["mode"].as_str().unwrap(),
        role: "operator",
        scopes: &scopes,
        signed_at_ms: device["signedAt"].as_i64().unwrap(),
        token: None,
        nonce: Some("abc"),
    };
    assert!(payload.build().starts_with("v2|"));
    assert!(verify_signature(
        device["publicKey"].as_str().unwrap(),
        &payload.build(),
        device["signature"].as_str().unwrap()
    ));

    reply_ok(&peer, &connect, hello_ok(Some("T1"), 30_000));
    h.client
        .wait_connected(Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(h.client.state(), ConnectionState::Connected);

    match h.next_seen().await {
        Seen::HelloOk(hello) => assert_eq!(hello.server.version, "test"),
        other => panic!("expected hello-ok, got {:?}", other),
    }

    let stored = DeviceTokenStore::new(h.options.token_store_path())
        .load(h.client.device_id(), "operator")
        .unwrap();
    assert_eq!(stored.token, "T1");
    assert_eq!(stored.role, "operator");

    let presence = h.client.presence().entries().await;
    assert_eq!(presence.len(), 1);
    assert_eq!(presence[0].host, "gateway-host");
}

#[tokio::test(start_paused = true)]
async fn connect_sent_without_nonce_after_challenge_timeout() {
    let mut h = Harness::new();
    let started = Instant::now();
    h.client.start();

    let mut peer = h.next_peer().await;
    let connect = expect_request(&mut peer, "connect").await;
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(750), "waited {:?}", waited);
    assert!(waited < Duration::from_millis(800), "waited {:?}", waited);

    let device = &connect["params"]["device"];
    assert!(device.get("nonce").is_none());

    let params = &connect["params"];
    let scopes = scopes_of(params);
    let payload = DeviceAuthPayload {
        device_id: device["id"].as_str().unwrap(),
        client_id: params["client"]["id"].as_str().unwrap(),
        client_mode: params["client"]["mode"].as_str().unwrap(),
        role: "operator",
        scopes: &scopes,
        signed_at_ms: device["signedAt"].as_i64().unwrap(),
        token: None,
        nonce: None,
    };
    assert!(verify_signature(
        device["publicKey"].as_str().unwrap(),
        &payload.build(),
        device["signature"].as_str().unwrap()
    ));

    // a late challenge must not produce a second connect
    send_challenge(&peer, "late");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(peer.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn auth_failure_clears_stored_token_and_falls_back_to_shared() {
    let mut h = Harness::with_options(|o| o.with_token("SHARED"));

    let identity = DeviceIdentity::load_or_create(&h.options.identity_path()).unwrap();
    let store = DeviceTokenStore::new(h.options.token_store_path());
    store
        .store(identity.device_id(), "operator", "STALE", &[])
        .unwrap();

    h.client.start();
    let mut first = h.next_peer().await;
    send_challenge(&first, "n1");
    let connect = expect_request(&mut first, "connect").await;
    assert_eq!(connect["params"]["auth"]["token"], "STALE");

    reply_error(&first, &connect, "UNAUTHORIZED", "device token rejected");
    assert_eq!(
        expect_close(&mut first).await,
        (1008, "connect failed".to_string())
    );

    match h.next_seen().await {
        Seen::ConnectError(ClientError::Authentication(shape)) => {
            assert_eq!(shape.code, "UNAUTHORIZED")
        }
        other => panic!("expected authentication error, got {:?}", other),
    }
    assert!(store.load(identity.device_id(), "operator").is_none());
    assert_eq!(
        h.client.state(),
        ConnectionState::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(1)
        }
    );

    let mut second = h.next_peer().await;
    send_challenge(&second, "n2");
    let connect = expect_request(&mut second, "connect").await;
    assert_eq!(connect["params"]["auth"]["token"], "SHARED");
}

#[tokio::test(start_paused = true)]
async fn auth_failure_without_fallback_keeps_stored_token() {
    let mut h = Harness::new();

    let identity = DeviceIdentity::load_or_create(&h.options.identity_path()).unwrap();
    let store = DeviceTokenStore::new(h.options.token_store_path());
    store
        .store(identity.device_id(), "operator", "ONLY", &[])
        .unwrap();

    h.client.start();
    let mut peer = h.next_peer().await;
    send_challenge(&peer, "n1");
    let connect = expect_request(&mut peer, "connect").await;
    assert_eq!(connect["params"]["auth"]["token"], "ONLY");
    reply_error(&peer, &connect, "UNAUTHORIZED", "nope");
    expect_close(&mut peer).await;

    assert_eq!(
        store.load(identity.device_id(), "operator").unwrap().token,
        "ONLY"
    );
}

#[tokio::test(start_paused = true)]
async fn stop_while_authenticating_rejects_handshake_and_stays_idle() {
    let mut h = Harness::new();
    h.client.start();

    let mut peer = h.next_peer().await;
    send_challenge(&peer, "abc");
    expect_request(&mut peer, "connect").await;
    assert_eq!(h.client.state(), ConnectionState::Authenticating);

    h.client.stop().await;
    assert_eq!(h.client.state(), ConnectionState::Idle);

    match h.next_seen().await {
        Seen::ConnectError(ClientError::Stopped) => {}
        other => panic!("expected stopped, got {:?}", other),
    }
    assert_eq!(
        expect_close(&mut peer).await,
        (1000, "client stopped".to_string())
    );

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(h.peers.try_recv().is_err());
    assert_eq!(h.connector.attempts().len(), 1);
    assert_eq!(h.client.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn responses_resolve_by_id_not_order() {
    let mut h = Harness::new();
    let mut peer = h.connect(30_000).await;

    let mut handles = Vec::new();
    for n in 0..3 {
        let client = h.client.clone();
        handles.push(tokio::spawn(async move {
            client.request("echo", json!({ "n": n })).await
        }));
    }

    let mut requests = Vec::new();
    for _ in 0..3 {
        requests.push(expect_request(&mut peer, "echo").await);
    }
    for request in requests.iter().rev() {
        reply_ok(&peer, request, json!({ "n": request["params"]["n"] }));
    }

    for (n, handle) in handles.into_iter().enumerate() {
        let payload = handle.await.unwrap().unwrap();
        assert_eq!(payload["n"], n as u64);
    }
}

#[tokio::test(start_paused = true)]
async fn failed_response_only_rejects_its_own_request() {
    let mut h = Harness::new();
    let mut peer = h.connect(30_000).await;

    let client = h.client.clone();
    let failing = tokio::spawn(async move { client.request("boom", json!({})).await });
    let client = h.client.clone();
    let fine = tokio::spawn(async move { client.request("ok", json!({})).await });

    let mut boom = None;
    let mut ok = None;
    for _ in 0..2 {
        let frame = peer.recv_json().await.unwrap();
        match frame["method"].as_str() {
            Some("boom") => boom = Some(frame),
            Some("ok") => ok = Some(frame),
            other => panic!("unexpected method {:?}", other),
        }
    }
    let (boom, ok) = (boom.unwrap(), ok.unwrap());
    reply_error(&peer, &boom, "INVALID_REQUEST", "bad params");
    reply_ok(&peer, &ok, json!({ "done": true }));

    let err = failing.await.unwrap().unwrap_err();
    assert_eq!(err.code(), Some("INVALID_REQUEST"));
    assert_eq!(fine.await.unwrap().unwrap()["done"], true);
    assert_eq!(h.client.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn expect_final_skips_accepted_ack() {
    let mut h = Harness::new();
    let mut peer = h.connect(30_000).await;

    let client = h.client.clone();
    let handle = tokio::spawn(async move {
        client
            .request_with("agent.run", json!({}), RequestOptions { expect_final: true })
            .await
    });

    let request = expect_request(&mut peer, "agent.run").await;
    reply_ok(&peer, &request, json!({ "status": "accepted", "runId": "r1" }));
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(!handle.is_finished());

    reply_ok(&peer, &request, json!({ "status": "ok", "result": 42 }));
    let payload = handle.await.unwrap().unwrap();
    assert_eq!(payload["result"], 42);
}

#[tokio::test(start_paused = true)]
async fn accepted_ack_resolves_plain_request() {
    let mut h = Harness::new();
    let mut peer = h.connect(30_000).await;

    let client = h.client.clone();
    let handle = tokio::spawn(async move { client.request("agent.run", json!({})).await });
    let request = expect_request(&mut peer, "agent.run").await;
    reply_ok(&peer, &request, json!({ "status": "accepted" }));

    assert_eq!(handle.await.unwrap().unwrap()["status"], "accepted");
}

#[tokio::test(start_paused = true)]
async fn sequence_gap_is_reported_once_and_events_still_delivered() {
    let mut h = Harness::new();
    let peer = h.connect(30_000).await;

    for seq in [1u64, 2, 5] {
        peer.send_json(&event("agent", Some(seq), json!({ "seq": seq })));
    }

    let mut delivered = Vec::new();
    let mut gaps = Vec::new();
    while delivered.len() < 3 {
        match h.next_seen().await {
            Seen::Event(event) => delivered.push(event.seq.unwrap()),
            Seen::Gap(expected, received) => gaps.push((expected, received)),
            other => panic!("unexpected callback {:?}", other),
        }
    }
    assert_eq!(delivered, vec![1, 2, 5]);
    assert_eq!(gaps, vec![(3, 5)]);
    assert!(h.seen.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn reconnect_backoff_doubles_caps_and_gives_up() {
    let mut h = Harness::new();
    h.connector.set_refuse(true);
    h.client.start();

    loop {
        match h.next_seen().await {
            Seen::Error(ClientError::ReconnectExhausted { attempts }) => {
                assert_eq!(attempts, 10);
                break;
            }
            Seen::Error(ClientError::Transport(_)) => {}
            other => panic!("unexpected callback {:?}", other),
        }
    }

    let attempts = h.connector.attempts();
    assert_eq!(attempts.len(), 11);
    let gaps: Vec<u64> = attempts
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_secs_f64().round() as u64)
        .collect();
    assert_eq!(gaps, vec![1, 2, 4, 8, 16, 30, 30, 30, 30, 30]);
    assert_eq!(h.client.state(), ConnectionState::Idle);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.connector.attempts().len(), 11);

    // start() again resumes with a fresh budget
    h.connector.set_refuse(false);
    h.client.start();
    let _peer = h.next_peer().await;
    assert_eq!(h.connector.attempts().len(), 12);
}

#[tokio::test(start_paused = true)]
async fn successful_reconnect_resets_backoff() {
    let mut h = Harness::new();
    let peer = h.connect(30_000).await;

    peer.close(1012, "service restart");
    let mut second = h.next_peer().await;
    send_challenge(&second, "again");
    let connect = expect_request(&mut second, "connect").await;
    reply_ok(&second, &connect, hello_ok(None, 30_000));
    h.client
        .wait_connected(Duration::from_secs(1))
        .await
        .unwrap();

    second.close(1006, "gone");
    let mut state = h.client.watch_state();
    let reconnecting = state
        .wait_for(|s| matches!(s, ConnectionState::Reconnecting { .. }))
        .await
        .unwrap()
        .clone();
    assert_eq!(
        reconnecting,
        ConnectionState::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(1)
        }
    );
}

#[tokio::test(start_paused = true)]
async fn transport_close_rejects_pending_requests() {
    let mut h = Harness::new();
    let mut peer = h.connect(30_000).await;

    let client = h.client.clone();
    let handle = tokio::spawn(async move { client.request("slow", json!({})).await });
    expect_request(&mut peer, "slow").await;
    peer.close(1012, "service restart");

    match handle.await.unwrap() {
        Err(ClientError::Closed { code, reason }) => {
            assert_eq!(code, 1012);
            assert_eq!(reason, "service restart");
        }
        other => panic!("expected closed error, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn stop_rejects_pending_requests_with_stopped() {
    let mut h = Harness::new();
    let mut peer = h.connect(30_000).await;

    let client = h.client.clone();
    let handle = tokio::spawn(async move { client.request("slow", json!({})).await });
    expect_request(&mut peer, "slow").await;

    h.client.stop().await;
    assert!(matches!(handle.await.unwrap(), Err(ClientError::Stopped)));
    assert_eq!(h.client.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn tick_watchdog_closes_silent_connection() {
    let mut h = Harness::new();
    let mut peer = h.connect(1_000).await;
    let connected_at = Instant::now();

    assert_eq!(
        expect_close(&mut peer).await,
        (4000, "tick timeout".to_string())
    );
    let silent = connected_at.elapsed();
    assert!(silent > Duration::from_secs(2), "closed after {:?}", silent);
    assert!(silent <= Duration::from_millis(3100), "closed after {:?}", silent);

    match h.next_seen().await {
        Seen::Error(ClientError::Liveness) => {}
        other => panic!("expected liveness error, got {:?}", other),
    }
    assert!(matches!(
        h.client.state(),
        ConnectionState::Reconnecting { attempt: 1, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn ticks_keep_connection_alive() {
    let mut h = Harness::new();
    let mut peer = h.connect(1_000).await;

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(900)).await;
        peer.send_json(&event("tick", None, json!({ "ts": 1 })));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(peer.try_recv().is_none());
    assert_eq!(h.client.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_dropped_without_closing() {
    let mut h = Harness::new();
    let mut peer = h.connect(30_000).await;

    peer.send_text("not json at all");
    peer.send_text(r#"{"type":"bogus","id":"x"}"#);
    peer.send_text(r#"{"type":"req","id":"srv-1","method":"node.invoke"}"#);
    peer.send_json(&event("agent", None, json!({ "still": "alive" })));

    match h.next_seen().await {
        Seen::Event(event) => assert_eq!(event.event, "agent"),
        other => panic!("unexpected callback {:?}", other),
    }
    assert!(peer.try_recv().is_none());
    assert_eq!(h.client.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn request_without_transport_fails_immediately() {
    let h = Harness::new();
    let err = h.client.request("health", json!({})).await.unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
    assert!(err.is_retryable());
}

#[tokio::test(start_paused = true)]
async fn presence_events_update_cache() {
    let mut h = Harness::new();
    let peer = h.connect(30_000).await;

    let mut frame = event(
        "presence",
        Some(1),
        json!({ "presence": [{ "host": "a", "ts": 2 }, { "host": "b", "ts": 3 }] }),
    );
    frame["stateVersion"] = json!({ "presence": 2 });
    peer.send_json(&frame);

    match h.next_seen().await {
        Seen::Event(event) => assert_eq!(event.event, "presence"),
        other => panic!("unexpected callback {:?}", other),
    }
    let hosts: Vec<String> = h
        .client
        .presence()
        .entries()
        .await
        .into_iter()
        .map(|e| e.host)
        .collect();
    assert_eq!(hosts, vec!["a", "b"]);
    assert_eq!(h.client.presence().state_version().await, Some(2));
}

#[tokio::test(start_paused = true)]
async fn challenge_is_not_delivered_as_event() {
    let mut h = Harness::new();
    h.client.start();
    let mut peer = h.next_peer().await;
    send_challenge(&peer, "abc");
    let connect = expect_request(&mut peer, "connect").await;
    reply_ok(&peer, &connect, hello_ok(None, 30_000));

    match h.next_seen().await {
        Seen::HelloOk(_) => {}
        other => panic!("expected hello-ok first, got {:?}", other),
    }
    assert!(h.seen.try_recv().is_err());
}

async fn connect_with_hello(h: &mut Harness, hello: serde_json::Value) -> TransportPeer {
    h.client.start();
    let mut peer = h.next_peer().await;
    send_challenge(&peer, "abc");
    let connect = expect_request(&mut peer, "connect").await;
    reply_ok(&peer, &connect, hello);
    h.client
        .wait_connected(Duration::from_secs(1))
        .await
        .unwrap();
    peer
}

#[tokio::test(start_paused = true)]
async fn partial_policy_is_accepted_with_default_tick_interval() {
    let mut h = Harness::new();
    let mut hello = hello_ok(Some("T1"), 0);
    hello["policy"] = json!({ "maxPayload": 524288, "maxBufferedBytes": 1572864 });
    let mut peer = connect_with_hello(&mut h, hello).await;

    match h.next_seen().await {
        Seen::HelloOk(hello) => {
            let policy = hello.policy.unwrap();
            assert_eq!(policy.max_payload, 524288);
            assert_eq!(policy.tick_interval_ms, 0);
        }
        other => panic!("expected hello-ok, got {:?}", other),
    }

    // default interval is 30s, so the watchdog stays quiet for two intervals
    tokio::time::sleep(Duration::from_secs(59)).await;
    assert!(peer.try_recv().is_none());
    assert_eq!(h.client.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn missing_policy_uses_configured_default_tick_interval() {
    let mut h = Harness::with_options(|mut options| {
        options.default_tick_interval = Duration::from_secs(2);
        options
    });
    let mut hello = hello_ok(Some("T1"), 0);
    hello.as_object_mut().unwrap().remove("policy");
    let mut peer = connect_with_hello(&mut h, hello).await;
    let connected_at = Instant::now();

    assert_eq!(
        expect_close(&mut peer).await,
        (4000, "tick timeout".to_string())
    );
    let silent = connected_at.elapsed();
    assert!(silent > Duration::from_secs(4), "closed after {:?}", silent);
    assert!(silent <= Duration::from_millis(6100), "closed after {:?}", silent);
}

#[tokio::test(start_paused = true)]
async fn seq_at_u64_max_does_not_break_the_driver() {
    let mut h = Harness::new();
    let mut peer = h.connect(30_000).await;

    peer.send_json(&event("agent", Some(u64::MAX), json!({})));
    peer.send_json(&event("agent", Some(1), json!({})));

    let mut delivered = Vec::new();
    while delivered.len() < 2 {
        match h.next_seen().await {
            Seen::Event(event) => delivered.push(event.seq.unwrap()),
            other => panic!("unexpected callback {:?}", other),
        }
    }
    assert_eq!(delivered, vec![u64::MAX, 1]);

    let client = h.client.clone();
    let handle = tokio::spawn(async move { client.request("health", json!({})).await });
    let request = expect_request(&mut peer, "health").await;
    reply_ok(&peer, &request, json!({ "ok": true }));
    assert_eq!(handle.await.unwrap().unwrap()["ok"], true);
    assert_eq!(h.client.state(), ConnectionState::Connected);
}

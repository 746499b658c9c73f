mod common;

use chrono::Utc;
use common::*;
use futures_util::StreamExt;
use parley_agent::engine::FALLBACK_REPLY;
use parley_server::conversation::GreetingDelivery;
use parley_types::{Completion, ToolInvocation};
use parley_voice::VoiceError;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

const SILENCE: [u8; 160] = [0xff; 160];

async fn answer_inbound(server: &TestServer, call_id: &str) {
    let res = reqwest::Client::new()
        .post(server.http("/voice/inbound"))
        .form(&[
            ("CallSid", call_id),
            ("From", "+15559998888"),
            ("To", TENANT_NUMBER),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
}

#[tokio::test]
async fn turn_is_streamed_back_and_persisted() {
    let server = spawn_server().await;
    answer_inbound(&server, "CA100").await;

    let mut socket = open_stream(&server, "CA100", "SS100").await;
    send_event(&mut socket, media_event("SS100", &SILENCE)).await;

    let frame = next_frame(&mut socket).await;
    assert_eq!(frame["event"], "media");
    assert_eq!(frame["streamSid"], "SS100");
    assert_eq!(decode_media(&frame).len(), 160);
    assert_eq!(server.tts.texts(), vec![REPLY.to_string()]);

    send_event(&mut socket, json!({"event": "stop", "streamSid": "SS100"})).await;
    expect_closed(&mut socket).await;
    server.wait_for_connections(0).await;
    server.wait_for_conversation_end("CA100").await;

    assert_eq!(
        server.transcript("CA100"),
        vec![
            ("user".to_string(), HEARD.to_string()),
            ("assistant".to_string(), REPLY.to_string()),
        ]
    );
    let record = server.call_record("CA100").unwrap();
    assert_eq!(record.status, "completed");
    assert_eq!(record.summary.as_deref(), Some(SUMMARY));
    assert_eq!(record.tenant_id.as_deref(), Some(TENANT_ID));
    assert!(!record.transfer_requested);
}

#[tokio::test]
async fn greeting_is_not_sent_before_stream_starts() {
    let server = spawn_server().await;
    answer_inbound(&server, "CA101").await;

    let mut socket = server.connect_media("CA101", None).await;
    server.wait_for_connections(1).await;
    assert_silent(&mut socket, Duration::from_millis(300)).await;
    assert!(server.tts.texts().is_empty());
}

#[tokio::test]
async fn empty_synthesis_falls_back_to_mark() {
    let server = spawn_server().await;
    server.tts.set_mode(TtsMode::Empty);

    let mut socket = open_stream(&server, "CA102", "SS102").await;
    send_event(&mut socket, media_event("SS102", &SILENCE)).await;

    let frame = next_frame(&mut socket).await;
    assert_eq!(frame["event"], "mark");
    assert_eq!(frame["streamSid"], "SS102");
    assert!(frame["mark"]["name"]
        .as_str()
        .unwrap()
        .starts_with("fallback_response_"));
}

#[tokio::test]
async fn failed_synthesis_falls_back_to_mark() {
    let server = spawn_server().await;
    server.tts.set_mode(TtsMode::Fail);

    let mut socket = open_stream(&server, "CA103", "SS103").await;
    send_event(&mut socket, media_event("SS103", &SILENCE)).await;

    assert_eq!(next_frame(&mut socket).await["event"], "mark");
}

#[tokio::test]
async fn slow_synthesis_times_out_to_mark() {
    let mut config = test_config();
    config.relay.tts_timeout_secs = 1;
    let server = spawn_server_with(config).await;
    server.tts.set_mode(TtsMode::Hang);

    let mut socket = open_stream(&server, "CA104", "SS104").await;
    send_event(&mut socket, media_event("SS104", &SILENCE)).await;

    assert_eq!(next_frame(&mut socket).await["event"], "mark");
}

#[tokio::test]
async fn empty_transcript_skips_turn() {
    let server = spawn_server().await;
    server.stt.push(Ok("   ".to_string()));

    let mut socket = open_stream(&server, "CA105", "SS105").await;
    send_event(&mut socket, media_event("SS105", &SILENCE)).await;
    assert_silent(&mut socket, Duration::from_millis(300)).await;
    assert_eq!(server.stt.calls(), 1);
    assert_eq!(server.llm.reply_calls(), 0);
    assert!(server.transcript("CA105").is_empty());

    send_event(&mut socket, media_event("SS105", &SILENCE)).await;
    assert_eq!(next_frame(&mut socket).await["event"], "media");
    assert_eq!(server.llm.reply_calls(), 1);
}

#[tokio::test]
async fn model_failure_speaks_apology() {
    let server = spawn_server().await;
    server.llm.push(Err(VoiceError::Timeout { provider: "openai" }));

    let mut socket = open_stream(&server, "CA106", "SS106").await;
    send_event(&mut socket, media_event("SS106", &SILENCE)).await;

    assert_eq!(next_frame(&mut socket).await["event"], "media");
    assert_eq!(server.tts.texts(), vec![FALLBACK_REPLY.to_string()]);
    server.wait_for_transcript("CA106", 2).await;
    assert_eq!(
        server.transcript("CA106").last().unwrap(),
        &("assistant".to_string(), FALLBACK_REPLY.to_string())
    );
}

#[tokio::test]
async fn transfer_request_is_confirmed_and_recorded() {
    let server = spawn_server().await;
    answer_inbound(&server, "CA107").await;
    server.llm.push(Ok(Completion::Tool(ToolInvocation::TransferToHuman {
        reason: "billing dispute".to_string(),
    })));

    let mut socket = open_stream(&server, "CA107", "SS107").await;
    send_event(&mut socket, media_event("SS107", &SILENCE)).await;
    assert_eq!(next_frame(&mut socket).await["event"], "media");
    assert_eq!(
        server.tts.texts(),
        vec!["I'll transfer you to a human agent now. Reason: billing dispute".to_string()]
    );

    send_event(&mut socket, json!({"event": "stop"})).await;
    expect_closed(&mut socket).await;
    server.wait_for_conversation_end("CA107").await;

    let record = server.call_record("CA107").unwrap();
    assert!(record.transfer_requested);
    assert_eq!(record.transfer_reason.as_deref(), Some("billing dispute"));
}

#[tokio::test]
async fn consecutive_errors_close_the_stream() {
    let server = spawn_server().await;
    let mut socket = server.connect_media("CA108", None).await;
    server.wait_for_connections(1).await;

    for _ in 0..4 {
        send_raw(&mut socket, "not json").await;
    }
    send_event(&mut socket, json!({"event": "media", "media": {"payload": "%%%"}})).await;

    expect_closed(&mut socket).await;
    server.wait_for_connections(0).await;
    server.wait_for_conversation_end("CA108").await;
}

#[tokio::test]
async fn a_good_frame_resets_the_error_count() {
    let server = spawn_server().await;
    let mut socket = server.connect_media("CA109", None).await;

    for _ in 0..4 {
        send_raw(&mut socket, "{").await;
    }
    send_event(&mut socket, json!({"event": "connected"})).await;
    for _ in 0..4 {
        send_raw(&mut socket, "{").await;
    }
    send_event(&mut socket, start_event("SS109")).await;
    send_event(&mut socket, media_event("SS109", &SILENCE)).await;

    assert_eq!(next_frame(&mut socket).await["event"], "media");
    let info = server.state.relay.connection_info("CA109").unwrap();
    assert_eq!(info.error_count, 0);
}

#[tokio::test]
async fn recognition_failure_counts_as_error() {
    let server = spawn_server().await;
    server
        .stt
        .push(Err(VoiceError::Timeout { provider: "whisper" }));

    let mut socket = open_stream(&server, "CA110", "SS110").await;
    send_event(&mut socket, media_event("SS110", &SILENCE)).await;
    assert_silent(&mut socket, Duration::from_millis(300)).await;

    assert_eq!(server.stt.calls(), 1);
    assert_eq!(server.llm.reply_calls(), 0);
    let info = server.state.relay.connection_info("CA110").unwrap();
    assert_eq!(info.error_count, 1);
    assert_eq!(info.buffered_bytes, 0);

    send_event(&mut socket, media_event("SS110", &SILENCE)).await;
    assert_eq!(next_frame(&mut socket).await["event"], "media");
}

#[tokio::test]
async fn protocol_violations_are_ignored() {
    let server = spawn_server().await;
    let mut socket = server.connect_media("CA111", None).await;

    send_event(&mut socket, json!({"event": "dtmf", "dtmf": {"digit": "1"}})).await;
    send_event(&mut socket, json!({"event": "start", "start": {"streamSid": ""}})).await;
    send_event(&mut socket, json!({"event": "mark", "mark": {"name": "m1"}})).await;
    send_event(&mut socket, json!({"event": "clear"})).await;
    // Without a stream id the reply has nowhere to go.
    send_event(&mut socket, media_event("", &SILENCE)).await;
    server.wait_for_transcript("CA111", 2).await;
    assert_silent(&mut socket, Duration::from_millis(200)).await;

    let info = server.state.relay.connection_info("CA111").unwrap();
    assert_eq!(info.error_count, 0);
    assert_eq!(info.stream_sid, None);
    assert_eq!(server.transcript("CA111").len(), 2);
    assert!(server.tts.texts().is_empty());
}

#[tokio::test]
async fn idle_stream_is_probed_with_ping() {
    let mut config = test_config();
    config.relay.receive_timeout_secs = 1;
    let server = spawn_server_with(config).await;
    let mut socket = server.connect_media("CA112", None).await;

    let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("server should probe an idle stream");
    assert!(matches!(message, Some(Ok(WsMessage::Ping(_)))));
    assert_eq!(server.state.relay.connection_count(), 1);
}

#[tokio::test]
async fn stale_streams_are_swept() {
    let server = spawn_server().await;
    let mut socket = open_stream(&server, "CA113", "SS113").await;
    server.wait_for_connections(1).await;

    assert!(server.state.relay.sweep_stale_at(Utc::now()).await.is_empty());

    let swept = server
        .state
        .relay
        .sweep_stale_at(Utc::now() + chrono::Duration::minutes(31))
        .await;
    assert_eq!(swept, vec!["CA113".to_string()]);
    expect_closed(&mut socket).await;
    assert_eq!(server.state.relay.connection_count(), 0);
    assert!(server.state.conversations.context("CA113").is_none());

    assert!(server.state.relay.sweep_stale().await.is_empty());
    assert!(!server.state.relay.cleanup_connection("CA113").await);
}

#[tokio::test]
async fn reconnect_replaces_previous_socket() {
    let server = spawn_server().await;
    let mut first = server.connect_media("CA114", None).await;
    server.wait_for_connections(1).await;

    let mut second = open_stream(&server, "CA114", "SS114b").await;
    expect_closed(&mut first).await;

    // The replaced socket's teardown must leave the call running.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.state.relay.connection_count(), 1);
    assert!(server.state.conversations.context("CA114").is_some());

    send_event(&mut second, media_event("SS114b", &SILENCE)).await;
    let frame = next_frame(&mut second).await;
    assert_eq!(frame["streamSid"], "SS114b");
}

#[tokio::test]
async fn tenant_hint_seeds_a_missing_conversation() {
    let server = spawn_server().await;
    let _hinted = server.connect_media("CA115", Some(TENANT_ID)).await;
    let _bare = server.connect_media("CA116", None).await;
    server.wait_for_connections(2).await;

    let hinted = server.state.conversations.context("CA115").unwrap();
    let hinted = hinted.lock().await;
    assert_eq!(hinted.tenant_id(), TENANT_ID);
    assert_eq!(
        hinted.messages()[0].content,
        "Hello! This is Ava from Acme Dental. How can I help you today?"
    );

    let bare = server.state.conversations.context("CA116").unwrap();
    assert_eq!(bare.lock().await.tenant_id(), "unknown");
}

#[tokio::test]
async fn shutdown_closes_every_stream() {
    let server = spawn_server().await;
    server.state.relay.start();
    let mut first = open_stream(&server, "CA117", "SS117").await;
    let mut second = open_stream(&server, "CA118", "SS118").await;
    server.wait_for_connections(2).await;

    server.state.relay.shutdown().await;

    expect_closed(&mut first).await;
    expect_closed(&mut second).await;
    assert_eq!(server.state.relay.connection_count(), 0);
    assert!(server.state.conversations.context("CA117").is_none());
    assert!(server.state.conversations.context("CA118").is_none());
}

#[tokio::test]
async fn status_endpoints_report_live_streams() {
    let server = spawn_server().await;
    let _socket = open_stream(&server, "CA119", "SS119").await;
    for _ in 0..100 {
        let started = server
            .state
            .relay
            .connection_info("CA119")
            .is_some_and(|info| info.stream_sid.is_some());
        if started {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let client = reqwest::Client::new();
    let status: Value = client
        .get(server.http("/api/relay/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["activeConnections"], 1);
    assert_eq!(status["activeCalls"], json!(["CA119"]));

    let info: Value = client
        .get(server.http("/api/relay/calls/CA119"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["callId"], "CA119");
    assert_eq!(info["streamSid"], "SS119");
    assert_eq!(info["errorCount"], 0);
    assert_eq!(info["phase"], "streaming");
    assert_eq!(info["bufferedBytes"], 0);

    let missing = client
        .get(server.http("/api/relay/calls/CA-none"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
    let body: Value = missing.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("CA-none"));
}

#[tokio::test]
async fn repeated_recognition_failures_close_the_stream() {
    let server = spawn_server().await;
    for _ in 0..5 {
        server
            .stt
            .push(Err(VoiceError::Timeout { provider: "whisper" }));
    }

    let mut socket = open_stream(&server, "CA120", "SS120").await;
    for _ in 0..5 {
        send_event(&mut socket, media_event("SS120", &SILENCE)).await;
    }

    expect_closed(&mut socket).await;
    server.wait_for_connections(0).await;
    server.wait_for_conversation_end("CA120").await;
    assert_eq!(server.stt.calls(), 5);
    assert_eq!(server.llm.reply_calls(), 0);
}

#[tokio::test]
async fn conversations_without_a_stream_are_swept() {
    let server = spawn_server().await;
    server
        .state
        .conversations
        .start_conversation("CA121", TENANT_ID, None, GreetingDelivery::Signaling)
        .unwrap();

    assert!(server.state.relay.sweep_stale_at(Utc::now()).await.is_empty());
    assert!(server.state.conversations.context("CA121").is_some());

    let swept = server
        .state
        .relay
        .sweep_stale_at(Utc::now() + chrono::Duration::minutes(31))
        .await;
    assert_eq!(swept, vec!["CA121".to_string()]);
    assert!(server.state.conversations.context("CA121").is_none());

    let record = server.call_record("CA121").unwrap();
    assert_eq!(record.status, "completed");
    assert_eq!(record.summary.as_deref(), Some(SUMMARY));
}

#[tokio::test]
async fn orphan_sweep_leaves_streamed_conversations_alone() {
    let server = spawn_server().await;
    answer_inbound(&server, "CA122").await;
    let _socket = open_stream(&server, "CA122", "SS122").await;
    server.wait_for_connections(1).await;

    let ended = server
        .state
        .conversations
        .end_orphaned_before(Utc::now() + chrono::Duration::minutes(31))
        .await;
    assert!(ended.is_empty());
    assert!(server.state.conversations.context("CA122").is_some());
    assert_eq!(server.state.relay.connection_count(), 1);
}

#[tokio::test]
async fn shutdown_ends_conversations_without_a_stream() {
    let server = spawn_server().await;
    server.state.relay.start();
    server
        .state
        .conversations
        .start_conversation("CA123", TENANT_ID, None, GreetingDelivery::MediaStream)
        .unwrap();
    let mut socket = open_stream(&server, "CA124", "SS124").await;
    server.wait_for_connections(1).await;

    server.state.relay.shutdown().await;

    expect_closed(&mut socket).await;
    assert_eq!(server.state.relay.connection_count(), 0);
    assert!(server.state.conversations.context("CA123").is_none());
    assert!(server.state.conversations.context("CA124").is_none());
    assert_eq!(
        server.call_record("CA123").unwrap().summary.as_deref(),
        Some(SUMMARY)
    );
}

#[tokio::test]
async fn outbound_greeting_is_spoken_once_stream_starts() {
    let server = spawn_server().await;
    let res = reqwest::Client::new()
        .post(server.http("/api/conversations"))
        .json(&json!({"callId": "CA125", "tenantId": TENANT_ID}))
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    let greeting = body["greeting"].as_str().unwrap().to_string();

    let mut socket = server.connect_media("CA125", None).await;
    server.wait_for_connections(1).await;
    assert_silent(&mut socket, Duration::from_millis(300)).await;
    assert!(server.tts.texts().is_empty());

    send_event(&mut socket, start_event("SS125")).await;
    let frame = next_frame(&mut socket).await;
    assert_eq!(frame["event"], "media");
    assert_eq!(frame["streamSid"], "SS125");
    assert_eq!(server.tts.texts(), vec![greeting.clone()]);

    // A repeated start does not greet again.
    send_event(&mut socket, start_event("SS125")).await;
    assert_silent(&mut socket, Duration::from_millis(300)).await;
    assert_eq!(server.tts.texts(), vec![greeting]);
}

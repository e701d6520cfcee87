//! Stream listing and deletion integration tests.

use serde_json::{json, Value};
use stream_test_utils::{patterned_bytes, TestStreamServer, WsClient, TEST_IDENTITY_HEADER};

async fn seed(server: &TestStreamServer, user: &str, name: &str) -> Result<(), anyhow::Error> {
    let response = reqwest::Client::new()
        .post(format!("{}/api/video/chunk?name={}", server.url(), name))
        .header(TEST_IDENTITY_HEADER, user)
        .body(patterned_bytes(24, 9))
        .send()
        .await?;
    anyhow::ensure!(response.status() == 204, "upload failed: {}", response.status());
    Ok(())
}

async fn join(
    server: &TestStreamServer,
    user: &str,
    stream_name: &str,
) -> Result<WsClient, anyhow::Error> {
    let mut client = WsClient::connect(&server.ws_url(), user).await?;
    client
        .send_event(
            "WEBRTC_JOIN",
            json!({"streams_info": [{"media_stream_id": "m1", "name": stream_name}]}),
        )
        .await?;
    client.next_event_named("WEBRTC_ALL_USERS").await?;
    Ok(client)
}

#[tokio::test]
async fn test_active_streams_lists_declared_streams() -> Result<(), anyhow::Error> {
    let server = TestStreamServer::spawn().await?;
    let _alice = join(&server, "alice", "porch").await?;

    let active: Value = reqwest::get(format!("{}/api/streams/active", server.url()))
        .await?
        .json()
        .await?;
    assert_eq!(
        active,
        json!([{"media_stream_id": "m1", "name": "porch", "motion": false}])
    );

    Ok(())
}

#[tokio::test]
async fn test_old_streams_exclude_live_names() -> Result<(), anyhow::Error> {
    let server = TestStreamServer::spawn().await?;
    seed(&server, "alice", "porch").await?;
    seed(&server, "alice", "garage").await?;
    let _alice = join(&server, "alice", "PORCH").await?;

    let old: Value = reqwest::Client::new()
        .get(format!("{}/api/streams/old", server.url()))
        .header(TEST_IDENTITY_HEADER, "bob")
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(old, json!([{"name": "garage", "streamer_id": "alice"}]));

    Ok(())
}

#[tokio::test]
async fn test_delete_removes_recording_and_broadcasts() -> Result<(), anyhow::Error> {
    let server = TestStreamServer::spawn().await?;
    seed(&server, "alice", "porch").await?;
    let mut alice = join(&server, "alice", "porch").await?;
    let mut bob = WsClient::connect(&server.ws_url(), "bob").await?;
    // A reply proves bob's socket is registered before the broadcast.
    bob.send_raw("ping").await?;
    bob.next_event_named("ERROR").await?;

    let response = reqwest::Client::new()
        .delete(format!("{}/api/streams/porch", server.url()))
        .header(TEST_IDENTITY_HEADER, "alice")
        .send()
        .await?;
    assert_eq!(response.status(), 204);

    let expected = json!({
        "event": "CHANGE",
        "data": {"entity": "STREAM", "method": "DELETE", "data": {"name": "porch"}}
    });
    assert_eq!(bob.next_event().await?, expected);
    assert_eq!(alice.next_event_named("CHANGE").await?, expected);

    let meta = reqwest::get(format!("{}/api/video/meta/porch", server.url())).await?;
    assert_eq!(meta.status(), 404);

    let active: Vec<Value> = reqwest::get(format!("{}/api/streams/active", server.url()))
        .await?
        .json()
        .await?;
    assert!(active.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_delete_of_another_streamers_recording_is_not_found() -> Result<(), anyhow::Error> {
    let server = TestStreamServer::spawn().await?;
    seed(&server, "alice", "porch").await?;

    let response = reqwest::Client::new()
        .delete(format!("{}/api/streams/porch", server.url()))
        .header(TEST_IDENTITY_HEADER, "bob")
        .send()
        .await?;
    assert_eq!(response.status(), 404);
    assert!(server.store().chunks_of("porch").is_ok());

    Ok(())
}

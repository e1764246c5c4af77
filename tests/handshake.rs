//! Handshake rejection. Kept in its own binary so the child scan below only
//! sees panels spawned here.

mod common;

use capy_rpc::Handshake;
use capyhost::error::SpawnStep;
use capyhost::shutdown::Quit;
use capyhost::{ConfigStore, Host, HostError};
use common::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn wrong_cookie_fails_the_spawn_without_an_orphan() {
    let dir = tempfile::tempdir().unwrap();
    let config = headless_config(vec![panel("top", &dir.path().join("top.jsonl"))]);
    let handshake = Handshake {
        cookie_value: "not-the-cookie".to_string(),
        ..Handshake::default()
    };
    let mut host = Host::with_handshake(
        Arc::new(ConfigStore::new(config, Vec::new())),
        Quit::new(),
        handshake,
    );

    let err = tokio::time::timeout(Duration::from_secs(10), host.run())
        .await
        .unwrap()
        .unwrap_err();
    assert!(
        matches!(
            err,
            HostError::SpawnFailed {
                step: SpawnStep::Handshake,
                ..
            }
        ),
        "unexpected error: {}",
        err
    );
    assert!(host.live_panels().borrow().is_empty());
    assert!(children_named("capy-panel").is_empty());
}

//! End-to-end runs against the headless panel worker.

mod common;

use common::*;
use capyhost::event_bus::EventSender;
use capyhost::shutdown::Quit;
use capyhost::{ConfigStore, Host, HostError, LivePanel, ReloadSignal, ReloadState};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

async fn running(state: &mut watch::Receiver<ReloadState>) {
    tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| *s == ReloadState::Running),
    )
    .await
    .unwrap()
    .unwrap();
}

async fn sender(events: &mut watch::Receiver<Option<EventSender>>) -> EventSender {
    tokio::time::timeout(Duration::from_secs(10), events.wait_for(|tx| tx.is_some()))
        .await
        .unwrap()
        .unwrap()
        .clone()
        .unwrap()
}

async fn live_count(live: &mut watch::Receiver<Vec<LivePanel>>, count: usize) -> Vec<LivePanel> {
    tokio::time::timeout(Duration::from_secs(10), live.wait_for(|l| l.len() == count))
        .await
        .unwrap()
        .unwrap()
        .clone()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn every_panel_sees_events_in_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let top = dir.path().join("top.jsonl");
    let bottom = dir.path().join("bottom.jsonl");
    let config = headless_config(vec![panel("top", &top), panel("bottom", &bottom)]);

    let quit = Quit::new();
    let mut host = Host::new(Arc::new(ConfigStore::new(config, Vec::new())), quit.clone());
    let mut state = host.state();
    let mut events = host.events();

    let drive = async {
        running(&mut state).await;
        let tx = sender(&mut events).await;
        for name in ["1", "2", "3"] {
            tx.submit(workspace(name)).await.unwrap();
        }

        wait_for_events(&top, 3).await;
        wait_for_events(&bottom, 3).await;
        quit.trigger();
    };
    let (result, ()) = tokio::time::timeout(
        Duration::from_secs(30),
        async { tokio::join!(host.run_forever(), drive) },
    )
    .await
    .unwrap();
    result.unwrap();

    assert_eq!(workspace_names(&top), vec!["1", "2", "3"]);
    assert_eq!(workspace_names(&bottom), vec!["1", "2", "3"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reload_replaces_the_panel_set() {
    let dir = tempfile::tempdir().unwrap();
    let top = dir.path().join("top.jsonl");
    let bottom = dir.path().join("bottom.jsonl");
    let config = headless_config(vec![panel("top", &top), panel("bottom", &bottom)]);

    let quit = Quit::new();
    let mut host = Host::new(Arc::new(ConfigStore::new(config, Vec::new())), quit.clone());
    let mut state = host.state();
    let mut live = host.live_panels();
    let reload = host.reload_sender();
    // Same id, different log: the new process must not see anything from
    // the old cycle.
    let fresh = dir.path().join("top-after.jsonl");

    let drive = async {
        running(&mut state).await;
        let before = live_count(&mut live, 2).await;
        let old_pids: Vec<u32> = before.iter().map(|p| p.pid).collect();

        let newer = headless_config(vec![panel("top", &fresh)]);
        reload
            .send(ReloadSignal::Config(Arc::new(newer)))
            .await
            .unwrap();

        let after = live_count(&mut live, 1).await;
        running(&mut state).await;
        assert_eq!(after[0].id, "top");
        assert!(!old_pids.contains(&after[0].pid));
        for pid in old_pids {
            assert!(!process_exists(pid), "pid {} outlived its cycle", pid);
        }
        assert!(process_exists(after[0].pid));
        assert!(logged(&fresh).is_empty());

        quit.trigger();
        after[0].pid
    };
    let (result, pid) = tokio::time::timeout(
        Duration::from_secs(30),
        async { tokio::join!(host.run_forever(), drive) },
    )
    .await
    .unwrap();
    result.unwrap();
    assert!(!process_exists(pid));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_panel_that_dies_ends_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("top.jsonl");
    let mut top = panel("top", &log);
    top.settings["exit_after_events"] = serde_json::json!(1);
    let config = headless_config(vec![top]);

    let mut host = Host::new(Arc::new(ConfigStore::new(config, Vec::new())), Quit::new());
    let mut state = host.state();
    let mut events = host.events();

    let drive = async {
        running(&mut state).await;
        sender(&mut events)
            .await
            .submit(workspace("4"))
            .await
            .unwrap();
    };
    let (result, ()) = tokio::time::timeout(
        Duration::from_secs(30),
        async { tokio::join!(host.run_forever(), drive) },
    )
    .await
    .unwrap();
    let err = result.unwrap_err();
    match err {
        HostError::PanelExited { panel, .. } => assert_eq!(panel, "top"),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(workspace_names(&log), vec!["4"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_queued_reload_covers_a_panel_exit() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("top.jsonl");
    let mut top = panel("top", &log);
    top.settings["exit_after_events"] = serde_json::json!(1);
    let config = headless_config(vec![top]);

    let mut host = Host::new(Arc::new(ConfigStore::new(config, Vec::new())), Quit::new());
    let mut state = host.state();
    let mut events = host.events();
    let mut live = host.live_panels();
    let reload = host.reload_sender();
    let newer = headless_config(vec![panel("top", &dir.path().join("next.jsonl"))]);

    let drive = async {
        running(&mut state).await;
        let pid = live_count(&mut live, 1).await[0].pid;
        sender(&mut events)
            .await
            .submit(workspace("6"))
            .await
            .unwrap();

        // Keep the run loop from being polled until both the exit and the
        // reload are waiting for it.
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while process_exists(pid) {
            assert!(std::time::Instant::now() < deadline, "pid {} never exited", pid);
            std::thread::sleep(Duration::from_millis(20));
        }
        std::thread::sleep(Duration::from_millis(200));
        reload
            .try_send(ReloadSignal::Config(Arc::new(newer)))
            .unwrap();
    };
    let (result, ()) = tokio::time::timeout(
        Duration::from_secs(30),
        async { tokio::join!(host.run(), drive) },
    )
    .await
    .unwrap();

    let err = result.unwrap_err();
    assert!(err.is_reload(), "unexpected error: {}", err);
    assert_eq!(workspace_names(&log), vec!["6"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stylesheet_reload_reaches_the_next_init() {
    let dir = tempfile::tempdir().unwrap();
    let copy = dir.path().join("top.css");
    let mut top = panel("top", &dir.path().join("top.jsonl"));
    top.settings["stylesheet_copy"] = serde_json::json!(copy);
    let config = headless_config(vec![top]);

    let quit = Quit::new();
    let store = Arc::new(ConfigStore::new(config, b"a{}".to_vec()));
    let mut host = Host::new(Arc::clone(&store), quit.clone());
    let mut state = host.state();
    let mut live = host.live_panels();
    let reload = host.reload_sender();

    let drive = async {
        running(&mut state).await;
        let before = live_count(&mut live, 1).await;
        wait_for_contents(&copy, b"a{}").await;

        reload
            .send(ReloadSignal::Stylesheet(Arc::new(b"b{}".to_vec())))
            .await
            .unwrap();

        let after = tokio::time::timeout(
            Duration::from_secs(10),
            live.wait_for(|l| l.len() == 1 && l[0].pid != before[0].pid),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        running(&mut state).await;

        assert_eq!(after[0].id, before[0].id);
        assert!(!process_exists(before[0].pid));
        wait_for_contents(&copy, b"b{}").await;
        quit.trigger();
    };
    let (result, ()) = tokio::time::timeout(
        Duration::from_secs(30),
        async { tokio::join!(host.run_forever(), drive) },
    )
    .await
    .unwrap();
    result.unwrap();

    assert_eq!(store.stylesheet().as_slice(), b"b{}");
    assert_eq!(store.config().panels.len(), 1);
}

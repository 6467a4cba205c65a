//! Story controller integration tests: lifecycle, module launch, surface
//! composition and teardown.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{TestSession, segments, settle};
use sessionmgr_story::StoryError;
use sessionmgr_story::testing::{
    MockSessionShell, MockStoryShellFactory, RecordingActivityWatcher, RecordingStoryWatcher,
    ShellEvent,
};
use sessionmgr_types::{
    AddMod, Intent, IntentParameterData, LinkPath, ModuleSource, OngoingActivityType, SetLinkValue,
    StoryCommand, StoryConfigProvider, StoryState,
};

#[tokio::test]
async fn test_start_launches_modules_and_attaches_view() {
    let session = TestSession::new();
    let controller = session.start_story("s1", &["root"]).await;

    assert_eq!(controller.state(), StoryState::Running);
    assert_eq!(session.launcher.launched_paths(), vec![segments(&["root"])]);
    assert_eq!(session.session_shell.attached(), vec!["s1".to_string()]);

    let shell = session.shells.last().unwrap();
    assert_eq!(
        shell.events(),
        vec![
            ShellEvent::Initialize("s1".into()),
            ShellEvent::AddSurface {
                surface_id: "root".into(),
                parent_id: String::new()
            },
            ShellEvent::Focus("root".into()),
        ]
    );

    let active = controller.get_active_modules().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].module_url, "test:root");
}

#[tokio::test]
async fn test_start_twice_is_a_no_op() {
    let session = TestSession::new();
    let controller = session.start_story("s1", &["root"]).await;

    controller.request_start().await.unwrap();
    settle(&controller).await;

    assert_eq!(session.shells.launched().len(), 1);
    assert_eq!(session.launcher.launched().len(), 1);
}

#[tokio::test]
async fn test_stop_reports_every_state_and_tears_down() {
    let session = TestSession::new();
    let controller = session.start_story("s1", &["root"]).await;
    let watcher = Arc::new(RecordingStoryWatcher::default());
    controller.watch(watcher.clone());

    controller.stop().await.unwrap();

    assert_eq!(
        watcher.states(),
        vec![StoryState::Running, StoryState::Stopping, StoryState::Stopped]
    );
    let launch = session.launcher.find(&["root"]).unwrap();
    assert_eq!(launch.teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(session.session_shell.detached(), vec!["s1".to_string()]);
    assert!(
        session
            .shells
            .last()
            .unwrap()
            .events()
            .contains(&ShellEvent::Teardown)
    );
    assert!(controller.get_active_modules().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stop_then_start_relaunches_modules() {
    let session = TestSession::new();
    let controller = session.start_story("s1", &["root"]).await;
    controller.stop().await.unwrap();
    controller.request_start().await.unwrap();
    settle(&controller).await;

    assert_eq!(controller.state(), StoryState::Running);
    assert_eq!(session.launcher.launched().len(), 2);
    assert_eq!(session.shells.launched().len(), 2);
}

#[tokio::test]
async fn test_story_stays_stopped_when_shell_fails() {
    let shells = MockStoryShellFactory::new();
    shells.fail_launches();
    let session = TestSession::builder().shells(shells).build();
    let result = session.add_mod("s1", &["root"], "test:root").await;
    assert!(result.is_ok());

    let controller = session.controller("s1").await;
    controller.request_start().await.unwrap();

    assert_eq!(controller.state(), StoryState::Stopped);
    assert!(session.launcher.launched().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_bounded_by_basic_timeout() {
    let config = StoryConfigProvider {
        basic_timeout: Duration::from_millis(100),
        ..StoryConfigProvider::for_tests()
    };
    let session = TestSession::builder()
        .config(config)
        .shells(MockStoryShellFactory::with_teardown_delay(Duration::from_secs(60)))
        .session_shell(MockSessionShell::with_detach_delay(Duration::from_secs(60)))
        .build();
    let controller = session.start_story("s1", &["root"]).await;

    let started = tokio::time::Instant::now();
    controller.stop().await.unwrap();

    assert_eq!(controller.state(), StoryState::Stopped);
    assert!(started.elapsed() < Duration::from_secs(60));
}

#[tokio::test]
async fn test_views_reach_shell_parents_first() {
    let session = TestSession::new();
    let controller = session.start_story("s1", &["a"]).await;
    session.remove_mod("s1", &["a"]).await;
    settle(&controller).await;

    // Children arrive before their ancestors.
    for path in [&["a", "b", "c"][..], &["a", "b"][..], &["a"][..]] {
        let url = format!("test:{}", path.join("."));
        let result = session.add_mod("s1", path, &url).await;
        assert!(result.is_ok(), "{result:?}");
        settle(&controller).await;
    }

    let shell = session.shells.last().unwrap();
    let surfaces: Vec<_> = shell.surfaces().into_iter().skip(1).collect();
    assert_eq!(
        surfaces,
        vec![
            ("a".to_string(), String::new()),
            ("a:b".to_string(), "a".to_string()),
            ("a:b:c".to_string(), "a:b".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_surface_parent_places_module_under_parent() {
    let session = TestSession::new();
    let controller = session.start_story("s1", &["root"]).await;

    let result = session
        .execute(
            "s1",
            vec![StoryCommand::AddMod(AddMod {
                mod_name: segments(&["child"]),
                intent: Intent::with_handler("test:child"),
                surface_relation: None,
                surface_parent_mod_name: segments(&["root"]),
            })],
        )
        .await;
    assert!(result.is_ok());
    settle(&controller).await;

    let shell = session.shells.last().unwrap();
    assert_eq!(
        shell.surfaces().last().cloned(),
        Some(("root:child".to_string(), "root".to_string()))
    );
}

#[tokio::test]
async fn test_remove_mod_defocuses_and_tears_down() {
    let session = TestSession::new();
    let controller = session.start_story("s1", &["root", "other"]).await;

    let result = session.remove_mod("s1", &["root"]).await;
    assert!(result.is_ok());
    settle(&controller).await;

    let shell = session.shells.last().unwrap();
    assert!(shell.events().contains(&ShellEvent::Defocus("root".into())));
    let launch = session.launcher.find(&["root"]).unwrap();
    assert_eq!(launch.teardowns.load(Ordering::SeqCst), 1);

    let active: Vec<_> = controller
        .get_active_modules()
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.module_path)
        .collect();
    assert_eq!(active, vec![segments(&["other"])]);

    // The record stays, flagged deleted.
    let all = controller.get_modules().await.unwrap();
    assert!(all.iter().any(|m| m.module_path == segments(&["root"]) && m.module_deleted));
}

#[tokio::test]
async fn test_same_handler_reuses_instance() {
    let session = TestSession::new();
    let controller = session.start_story("s1", &["root"]).await;

    let intent = Intent::with_handler("test:root")
        .parameter("n", IntentParameterData::Json(serde_json::json!(2)));
    session
        .execute(
            "s1",
            vec![StoryCommand::AddMod(AddMod {
                mod_name: segments(&["root"]),
                intent,
                surface_relation: None,
                surface_parent_mod_name: Vec::new(),
            })],
        )
        .await;
    settle(&controller).await;

    assert_eq!(session.launcher.launched().len(), 1);
    let launch = session.launcher.find(&["root"]).unwrap();
    assert_eq!(launch.intents.lock().len(), 2);
    assert_eq!(launch.teardowns.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_module_can_call_story_while_handling_intent() {
    let session = TestSession::new();
    session.launcher.focus_on_intent();

    let controller = tokio::time::timeout(
        Duration::from_secs(5),
        session.start_story("s1", &["root"]),
    )
    .await
    .expect("story start did not finish");
    let active = tokio::time::timeout(Duration::from_secs(5), controller.get_active_modules())
        .await
        .expect("story queue stalled")
        .unwrap();
    assert_eq!(active.len(), 1);
    settle(&controller).await;

    // One focus from the launch, one requested by the module itself.
    let shell = session.shells.last().unwrap();
    let focuses = shell
        .events()
        .into_iter()
        .filter(|event| *event == ShellEvent::Focus("root".into()))
        .count();
    assert_eq!(focuses, 2);
    assert!(session.focus.requests().contains(&Some("s1".to_string())));
}

#[tokio::test]
async fn test_reused_instance_reports_new_module_data() {
    let session = TestSession::new();
    session.launcher.focus_on_intent();
    let controller = session.start_story("s1", &["root"]).await;

    let intent = Intent::with_handler("test:root")
        .parameter("n", IntentParameterData::Json(serde_json::json!(2)));
    let result = session
        .execute(
            "s1",
            vec![StoryCommand::AddMod(AddMod {
                mod_name: segments(&["root"]),
                intent,
                surface_relation: None,
                surface_parent_mod_name: Vec::new(),
            })],
        )
        .await;
    assert!(result.is_ok());
    settle(&controller).await;

    let active = tokio::time::timeout(Duration::from_secs(5), controller.get_active_modules())
        .await
        .expect("story queue stalled")
        .unwrap();
    assert_eq!(active.len(), 1);
    let names: Vec<_> = active[0]
        .parameter_map
        .iter()
        .map(|entry| entry.name.as_str())
        .collect();
    assert_eq!(names, vec!["n"]);
    assert_eq!(
        active[0].intent.as_ref().map(|intent| intent.parameters.len()),
        Some(1)
    );

    assert_eq!(session.launcher.launched().len(), 1);
    let launch = session.launcher.find(&["root"]).unwrap();
    assert_eq!(launch.intents.lock().len(), 2);
}

#[tokio::test]
async fn test_new_handler_restarts_instance() {
    let session = TestSession::new();
    let controller = session.start_story("s1", &["root"]).await;
    let first = session.launcher.find(&["root"]).unwrap();

    session.add_mod("s1", &["root"], "test:replacement").await;
    settle(&controller).await;

    assert_eq!(first.teardowns.load(Ordering::SeqCst), 1);
    let second = session.launcher.find(&["root"]).unwrap();
    assert_eq!(second.config.module_url, "test:replacement");

    let controller_for_root = controller
        .get_module_controller(&segments(&["root"]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(controller_for_root.module_url(), "test:replacement");
}

#[tokio::test]
async fn test_links_close_when_story_stops() {
    let session = TestSession::new();
    let controller = session.start_story("s1", &["root"]).await;

    let link = controller.get_link(LinkPath::new(segments(&["root"]), "selection"));
    link.set(serde_json::json!("first")).await.unwrap();
    assert_eq!(link.get().await.unwrap(), Some(serde_json::json!("first")));

    controller.stop().await.unwrap();

    assert!(link.is_closed());
    assert!(matches!(
        link.set(serde_json::json!("second")).await,
        Err(StoryError::LinkClosed(_))
    ));
}

#[tokio::test]
async fn test_link_watch_sees_other_writers() {
    let session = TestSession::new();
    let controller = session.start_story("s1", &["root"]).await;
    let path = LinkPath::new(Vec::new(), "shared");
    let mut watcher = controller.get_link(path.clone()).watch();

    let result = session
        .execute(
            "s1",
            vec![StoryCommand::SetLinkValue(SetLinkValue {
                path,
                value: Some(serde_json::json!({ "k": 1 })),
            })],
        )
        .await;
    assert!(result.is_ok());

    let value = tokio::time::timeout(Duration::from_secs(5), watcher.changed())
        .await
        .unwrap();
    assert_eq!(value, Some(Some(serde_json::json!({ "k": 1 }))));
}

// ─────────────────────────────────────────────────────────────────────────────
// Module context
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_module_adds_child_to_story() {
    let session = TestSession::new();
    let controller = session.start_story("s1", &["root"]).await;
    let root = session.launcher.find(&["root"]).unwrap();

    let child = root
        .context
        .add_module_to_story("child", Intent::with_handler("test:child"), None)
        .await
        .unwrap();
    settle(&controller).await;

    assert_eq!(child.module_path(), &segments(&["root", "child"])[..]);
    let record = controller
        .story_storage()
        .read_module_data(&segments(&["root", "child"]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.module_source, ModuleSource::Internal);

    let shell = session.shells.last().unwrap();
    assert_eq!(
        shell.surfaces().last().cloned(),
        Some(("root:child".to_string(), "root".to_string()))
    );
    // Internal modules are not focused automatically.
    assert_ne!(shell.events().last(), Some(&ShellEvent::Focus("root:child".into())));
}

#[tokio::test]
async fn test_embedded_module_is_not_shown_by_shell() {
    let session = TestSession::new();
    let controller = session.start_story("s1", &["root"]).await;
    let root = session.launcher.find(&["root"]).unwrap();

    let embedded = root
        .context
        .embed_module("inline", Intent::with_handler("test:inline"))
        .await
        .unwrap();
    settle(&controller).await;

    assert!(embedded.view.is_some());
    let shell = session.shells.last().unwrap();
    assert!(!shell.surfaces().iter().any(|(id, _)| id == "root:inline"));
    assert_eq!(controller.get_active_modules().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_child_link_parameters_resolve_against_parent() {
    let session = TestSession::new();
    let controller = session.start_story("s1", &["root"]).await;
    let root = session.launcher.find(&["root"]).unwrap();
    root.context
        .get_link("selection")
        .unwrap()
        .set(serde_json::json!("doc-1"))
        .await
        .unwrap();

    root.context
        .add_module_to_story(
            "viewer",
            Intent::with_handler("test:viewer")
                .parameter("target", IntentParameterData::LinkName("selection".into())),
            None,
        )
        .await
        .unwrap();
    settle(&controller).await;

    let viewer = session.launcher.find(&["root", "viewer"]).unwrap();
    let value = viewer.context.get_link("target").unwrap().get().await.unwrap();
    assert_eq!(value, Some(serde_json::json!("doc-1")));
}

#[tokio::test]
async fn test_last_module_removing_itself_stops_story() {
    let session = TestSession::new();
    let controller = session.start_story("s1", &["root"]).await;
    let root = session.launcher.find(&["root"]).unwrap();

    root.context.remove_self_from_story().await.unwrap();
    settle(&controller).await;

    assert_eq!(controller.state(), StoryState::Stopped);
}

#[tokio::test]
async fn test_ongoing_activity_is_reported_until_dropped() {
    let session = TestSession::new();
    let _controller = session.start_story("s1", &["root"]).await;
    let watcher = Arc::new(RecordingActivityWatcher::default());
    session.provider.watch_activity(watcher.clone());

    let root = session.launcher.find(&["root"]).unwrap();
    let activity = root
        .context
        .start_ongoing_activity(OngoingActivityType::Video)
        .unwrap();
    drop(activity);

    assert_eq!(
        watcher.changes(),
        vec![
            ("s1".to_string(), vec![OngoingActivityType::Video]),
            ("s1".to_string(), vec![]),
        ]
    );
}

#[tokio::test]
async fn test_activities_end_with_their_module() {
    let session = TestSession::new();
    let controller = session.start_story("s1", &["root"]).await;
    let watcher = Arc::new(RecordingActivityWatcher::default());
    session.provider.watch_activity(watcher.clone());

    let root = session.launcher.find(&["root"]).unwrap();
    let _activity = root
        .context
        .start_ongoing_activity(OngoingActivityType::Video)
        .unwrap();

    controller.stop().await.unwrap();

    assert_eq!(controller.state(), StoryState::Stopped);
    assert_eq!(watcher.changes().last().map(|(_, a)| a.len()), Some(0));
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshots
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_snapshot_is_loaded_then_refreshed() {
    let session = TestSession::new();
    let controller = session.start_story("s1", &["root"]).await;
    session
        .session_storage
        .write_snapshot("s1", b"old".to_vec())
        .await
        .unwrap();
    session.shells.last().unwrap().set_snapshot(b"new".to_vec());

    controller.take_and_load_snapshot().await.unwrap();

    assert_eq!(session.snapshot_loader.loaded(), vec![b"old".to_vec()]);
    assert_eq!(
        session.session_storage.read_snapshot("s1").await.unwrap(),
        Some(b"new".to_vec())
    );
}

#[tokio::test]
async fn test_focus_events_reach_story_watchers() {
    let session = TestSession::new();
    let controller = session.start_story("s1", &["root"]).await;
    let watcher = Arc::new(RecordingStoryWatcher::default());
    controller.watch(watcher.clone());

    controller.on_surface_focused("root");
    controller.on_surface_focused("unknown");

    assert_eq!(watcher.focused(), vec![segments(&["root"])]);
}

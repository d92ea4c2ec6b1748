use std::time::Duration;

use keyfocus_engine::{
    Command, DEFAULT_SUPPRESSION_MS, EngineCfg, Notice, SwitchState, SystemEvent,
    test_support::Harness,
};
use keyfocus_ids::{ActivationPolicy, FocusTargetId, ProcessInfo, TrackingMode, resolve};
use tokio::sync::mpsc;

fn app(pid: i32, bundle: &str) -> ProcessInfo {
    ProcessInfo::new(pid, bundle)
}

/// Launch and activate `p` in the mock directory and the engine.
fn activate(h: &Harness, p: &ProcessInfo) {
    h.processes.launch(p.clone());
    h.processes.set_frontmost(Some(p.pid));
    h.engine.handle_event(SystemEvent::Activated(p.clone()));
}

fn target_id(h: &Harness, p: &ProcessInfo) -> FocusTargetId {
    resolve(p, h.engine.mode())
}

fn started() -> Harness {
    let h = Harness::quiet();
    h.engine.start();
    h
}

#[test]
fn unmapped_target_gets_default_and_is_stored() {
    let mut h = started();
    h.sources.select("fr");
    let a = app(10, "com.example.a");
    activate(&h, &a);

    // Default was seeded from the live source at start ("en").
    assert_eq!(h.sources.applied(), vec!["en"]);
    let id = h.engine.current_target().expect("current target");
    assert_eq!(id.as_str(), "com.example.a");
    assert_eq!(h.engine.store().get(&id).map(|p| p.id().to_string()), Some("en".into()));
    let notices = h.drain_notices();
    assert!(matches!(notices.first(), Some(Notice::FocusChanged(n)) if n == &id));
    assert!(notices.iter().any(|n| matches!(n, Notice::Switched { .. })));
}

#[test]
fn mapped_target_is_restored_without_restoring_mapping() {
    let h = started();
    let a = app(10, "com.example.a");
    let b = app(11, "com.example.b");
    activate(&h, &a);
    let id_a = h.engine.current_target().expect("a");
    h.engine.store().set(id_a.clone(), h.sources.pref("fr"));

    activate(&h, &b);
    h.sources.clear_applied();
    let before = h.engine.store().len();
    activate(&h, &a);
    assert_eq!(h.sources.applied(), vec!["fr"]);
    assert_eq!(h.engine.store().len(), before);
    assert_eq!(h.engine.store().get(&id_a), Some(h.sources.pref("fr")));
}

#[test]
fn already_selected_source_is_not_reapplied() {
    let h = started();
    activate(&h, &app(10, "com.example.a"));
    assert!(h.sources.applied().is_empty(), "default 'en' is already live");
}

#[test]
fn manual_change_is_recorded_for_current_target() {
    let mut h = started();
    let a = app(10, "com.example.a");
    activate(&h, &a);
    h.drain_notices();

    h.sources.select("de");
    h.engine.handle_event(SystemEvent::PreferenceChanged);
    let id = h.engine.current_target().expect("a");
    assert_eq!(h.engine.store().get(&id), Some(h.sources.pref("de")));
    assert!(
        h.drain_notices()
            .iter()
            .any(|n| matches!(n, Notice::Recorded { target, .. } if target == &id))
    );
}

#[test]
fn echo_of_own_switch_is_not_recorded() {
    let h = started();
    let a = app(10, "com.example.a");
    let b = app(11, "com.example.b");
    activate(&h, &a);
    let id_b = {
        activate(&h, &b);
        h.engine.current_target().expect("b")
    };
    h.engine.store().set(id_b.clone(), h.sources.pref("fr"));
    activate(&h, &a);
    // Focus b: engine switches to fr, then the echo arrives.
    h.sources.select("de");
    activate(&h, &b);
    assert_eq!(h.sources.current_id().as_deref(), Some("fr"));
    h.clock.advance(Duration::from_millis(50));
    h.engine.handle_event(SystemEvent::PreferenceChanged);
    assert_eq!(h.engine.store().get(&id_b), Some(h.sources.pref("fr")));
    assert!(!h.engine.switcher().is_armed());
}

#[test]
fn late_echo_is_a_user_change() {
    let h = started();
    let a = app(10, "com.example.a");
    let b = app(11, "com.example.b");
    activate(&h, &a);
    let id_a = h.engine.current_target().expect("a");
    h.engine.store().set(id_a.clone(), h.sources.pref("fr"));
    activate(&h, &b);
    activate(&h, &a);
    h.clock.advance(Duration::from_millis(500));
    // A notification for the same id after the window is treated as the user's.
    h.engine.handle_event(SystemEvent::PreferenceChanged);
    assert!(!h.engine.switcher().is_armed());
    assert_eq!(h.engine.store().get(&id_a), Some(h.sources.pref("fr")));
}

#[test]
fn user_change_racing_our_switch_is_recorded() {
    let h = started();
    let a = app(10, "com.example.a");
    let b = app(11, "com.example.b");
    activate(&h, &a);
    activate(&h, &b);
    let id_b = h.engine.current_target().expect("b");
    h.engine.store().set(id_b.clone(), h.sources.pref("fr"));
    activate(&h, &a);
    activate(&h, &b);
    assert!(h.engine.switcher().is_armed());
    // Within the window the user picks a different source.
    h.sources.select("de");
    h.engine.handle_event(SystemEvent::PreferenceChanged);
    assert_eq!(h.engine.store().get(&id_b), Some(h.sources.pref("de")));
}

#[test]
fn termination_closes_target_and_prunes_store() {
    let mut h = started();
    let a = app(10, "com.example.a");
    let b = app(11, "com.example.b");
    activate(&h, &b);
    activate(&h, &a);
    let id_b = target_id(&h, &b);
    assert!(h.engine.store().get(&id_b).is_some());
    assert!(h.engine.registry().contains(11));
    h.drain_notices();

    h.processes.terminate(11);
    h.engine.handle_event(SystemEvent::Terminated(b.clone()));
    assert!(h.engine.store().get(&id_b).is_none());
    assert!(!h.engine.registry().contains(11));
    assert_eq!(h.drain_notices(), vec![Notice::FocusClosed(id_b)]);
    // Current target (a) is untouched.
    assert_eq!(h.engine.current_target().map(|i| i.to_string()), Some("com.example.a".into()));
}

#[test]
fn burst_collapses_to_distinct_changes() {
    let mut h = started();
    let a = app(10, "com.example.a");
    let b = app(11, "com.example.b");
    h.processes.launch(a.clone());
    h.processes.launch(b.clone());
    h.engine.handle_event(SystemEvent::Launched(a.clone()));
    h.engine.handle_event(SystemEvent::Launched(b.clone()));
    h.drain_notices();
    for ev in [
        SystemEvent::Activated(a.clone()),
        SystemEvent::Focused { pid: 10 },
        SystemEvent::Focused { pid: 11 },
        SystemEvent::Activated(b.clone()),
        SystemEvent::Focused { pid: 10 },
        SystemEvent::Focused { pid: 10 },
    ] {
        h.engine.handle_event(ev);
    }
    let changes: Vec<String> = h
        .drain_notices()
        .into_iter()
        .filter_map(|n| match n {
            Notice::FocusChanged(id) => Some(id.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(changes, vec!["com.example.a", "com.example.b", "com.example.a"]);
}

#[test]
fn mode_toggle_leaves_store_empty_until_next_focus() {
    let mut h = started();
    let a = app(10, "com.example.a");
    activate(&h, &a);
    assert!(!h.engine.store().is_empty());
    h.drain_notices();

    h.engine.handle_command(Command::ToggleMode);
    assert_eq!(h.engine.mode(), TrackingMode::PerWindow);
    assert!(h.engine.store().is_empty());
    assert!(h.engine.current_target().is_none());
    assert_eq!(h.drain_notices(), vec![Notice::ModeChanged(TrackingMode::PerWindow)]);

    // The next focus event binds under the new mode.
    h.engine.handle_event(SystemEvent::Focused { pid: 10 });
    let ids: Vec<String> = h
        .engine
        .store()
        .snapshot()
        .into_iter()
        .map(|(id, _)| id.to_string())
        .collect();
    assert_eq!(ids, vec!["com.example.a#10"]);

    h.engine.handle_command(Command::SetMode(TrackingMode::PerApplication));
    assert_eq!(h.engine.mode(), TrackingMode::PerApplication);
    assert!(h.engine.store().is_empty());
}

#[test]
fn setting_the_active_mode_keeps_mappings() {
    let mut h = started();
    activate(&h, &app(10, "com.example.a"));
    h.drain_notices();
    h.engine.set_mode(TrackingMode::PerApplication);
    assert_eq!(h.engine.store().len(), 1);
    assert!(h.engine.current_target().is_some());
    assert!(h.drain_notices().is_empty());
}

#[test]
fn clear_and_set_default_commands() {
    let mut h = started();
    activate(&h, &app(10, "com.example.a"));
    h.engine.handle_command(Command::SetDefault("de".into()));
    h.engine.handle_command(Command::ClearMappings);
    assert!(h.engine.store().is_empty());
    assert_eq!(h.engine.store().get_default(), Some(h.sources.pref("de")));
    let notices = h.drain_notices();
    assert!(notices.contains(&Notice::DefaultChanged(h.sources.pref("de"))));
    assert!(notices.contains(&Notice::Cleared));
    assert!(h.engine.set_default("xx").is_err());

    activate(&h, &app(11, "com.example.b"));
    assert_eq!(h.sources.current_id().as_deref(), Some("de"));
}

#[test]
fn configured_default_wins_over_live_source() {
    let h = Harness::new(EngineCfg {
        prime_first_switch: false,
        default_source: Some("fr".into()),
        ..EngineCfg::default()
    });
    h.engine.start();
    assert_eq!(h.engine.store().get_default(), Some(h.sources.pref("fr")));

    let missing = Harness::new(EngineCfg {
        prime_first_switch: false,
        default_source: Some("missing".into()),
        ..EngineCfg::default()
    });
    missing.engine.start();
    assert_eq!(missing.engine.store().get_default(), Some(missing.sources.pref("en")));
}

#[test]
fn start_bootstraps_interactive_processes_and_binds_frontmost() {
    let h = Harness::quiet();
    h.processes.launch(app(1, "com.example.a"));
    h.processes.launch(app(2, "com.example.b"));
    h.processes
        .launch(app(3, "com.example.agent").with_policy(ActivationPolicy::Prohibited));
    h.observer.fail_create(2);
    h.processes.set_frontmost(Some(1));
    assert_eq!(h.engine.start(), 1);
    assert!(h.engine.registry().contains(1));
    assert!(!h.engine.registry().contains(2));
    assert!(!h.engine.registry().contains(3));
    assert_eq!(h.engine.current_target().map(|i| i.to_string()), Some("com.example.a".into()));

    // Failed attach is retried on the next activation.
    h.observer.clear_failures();
    h.engine.handle_event(SystemEvent::Activated(app(2, "com.example.b")));
    assert!(h.engine.registry().contains(2));
}

#[test]
fn first_focus_change_primes_once() {
    let mut h = Harness::new(EngineCfg::default());
    h.engine.start();
    activate(&h, &app(10, "com.example.a"));
    // Live and default are both "en": hop through another source and back.
    assert_eq!(h.sources.applied(), vec!["fr", "en"]);
    let id = h.engine.current_target().expect("a");
    h.drain_notices();

    // Both hops notify; each reads the live source, which is already "en".
    h.clock.advance(Duration::from_millis(20));
    h.engine.handle_event(SystemEvent::PreferenceChanged);
    h.engine.handle_event(SystemEvent::PreferenceChanged);
    assert!(
        !h.drain_notices()
            .iter()
            .any(|n| matches!(n, Notice::Recorded { .. })),
        "priming echoes are not manual changes"
    );
    assert_eq!(h.engine.switcher().state(), SwitchState::Idle);
    assert_eq!(h.engine.store().get(&id), Some(h.sources.pref("en")));

    // A user pick of the hop source right afterwards is still recorded.
    h.sources.select("fr");
    h.engine.handle_event(SystemEvent::PreferenceChanged);
    assert_eq!(h.engine.store().get(&id), Some(h.sources.pref("fr")));

    h.sources.clear_applied();
    activate(&h, &app(11, "com.example.b"));
    assert_eq!(h.sources.applied(), vec!["en"], "priming runs once");
}

#[test]
fn failed_apply_is_not_reported_as_switched() {
    let mut h = Harness::new(EngineCfg {
        prime_first_switch: false,
        default_source: Some("fr".into()),
        ..EngineCfg::default()
    });
    h.engine.start();
    h.sources.fail_apply("fr");
    activate(&h, &app(10, "com.example.a"));

    assert_eq!(h.sources.applied(), vec!["fr"]);
    assert_eq!(h.sources.current_id().as_deref(), Some("en"));
    assert!(h.engine.switcher().is_armed(), "failed apply still arms");
    let notices = h.drain_notices();
    assert!(matches!(notices.first(), Some(Notice::FocusChanged(_))));
    assert!(!notices.iter().any(|n| matches!(n, Notice::Switched { .. })));
}

#[tokio::test(start_paused = true)]
async fn run_loop_serializes_events_and_shuts_down() {
    let h = Harness::quiet();
    let a = app(10, "com.example.a");
    h.processes.launch(a.clone());
    h.engine.start();
    let (ev_tx, ev_rx) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let engine = h.engine.clone();
    let task = tokio::spawn(async move { engine.run(ev_rx, cmd_rx).await });

    ev_tx.send(SystemEvent::Launched(a.clone())).expect("send");
    ev_tx.send(SystemEvent::Activated(a.clone())).expect("send");
    cmd_tx.send(Command::Shutdown).expect("send");
    task.await.expect("join").expect("run ok");

    assert!(h.engine.is_shut_down());
    assert!(h.engine.registry().is_empty());
    assert_eq!(h.observer.live(), 0);
    assert!(!h.engine.switcher().is_armed());
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_pending_suppression() {
    let h = Harness::new(EngineCfg {
        prime_first_switch: false,
        default_source: Some("fr".into()),
        ..EngineCfg::default()
    });
    let a = app(10, "com.example.a");
    h.processes.launch(a.clone());
    h.engine.start();
    let (ev_tx, ev_rx) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let engine = h.engine.clone();
    let task = tokio::spawn(async move { engine.run(ev_rx, cmd_rx).await });

    ev_tx.send(SystemEvent::Activated(a)).expect("send");
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(h.sources.current_id().as_deref(), Some("fr"));
    assert!(h.engine.switcher().is_armed(), "switch to fr awaits its echo");

    cmd_tx.send(Command::Shutdown).expect("send");
    task.await.expect("join").expect("run ok");
    assert!(h.engine.is_shut_down());
    assert_eq!(h.engine.switcher().state(), SwitchState::Idle);
    tokio::time::sleep(Duration::from_millis(DEFAULT_SUPPRESSION_MS * 2)).await;
    assert_eq!(h.engine.switcher().state(), SwitchState::Idle);
}

#[tokio::test(start_paused = true)]
async fn run_loop_stops_when_events_close() {
    let h = Harness::quiet();
    h.engine.start();
    let (ev_tx, ev_rx) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
    drop(cmd_tx);
    let engine = h.engine.clone();
    let task = tokio::spawn(async move { engine.run(ev_rx, cmd_rx).await });
    ev_tx
        .send(SystemEvent::Activated(app(10, "com.example.a")))
        .expect("send");
    drop(ev_tx);
    task.await.expect("join").expect("run ok");
    assert!(h.engine.is_shut_down());
    assert_eq!(h.engine.current_target().map(|i| i.to_string()), Some("com.example.a".into()));
}

#[test]
fn independent_engines_do_not_share_state() {
    let one = started();
    let two = started();
    activate(&one, &app(10, "com.example.a"));
    assert!(one.engine.current_target().is_some());
    assert!(two.engine.current_target().is_none());
    assert!(two.engine.store().is_empty());
}

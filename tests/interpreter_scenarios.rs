mod common;

use common::{
    FakeEngine, NavigateFault, ScreenBuilder, dashboard_without_add, full_dashboard, hide,
    test_config,
};
use uipilot::diagnostics::{Phase, read_log};
use uipilot::error::StepError;
use uipilot::interpreter::StepOutcome;
use uipilot::resolve::Strategy;
use uipilot::session::StorageState;
use uipilot::types::ActionKind;
use uipilot::{Plan, execute};

const CREATE_PROJECT: &str = r#"[
  {"type": "goto", "url": "https://app.test/"},
  {"type": "click", "target": "Projects"},
  {"type": "click", "target": "Add project"},
  {"type": "type", "target": "name", "text": "Foo"},
  {"type": "click", "target": "Create project"}
]"#;

#[test]
fn create_project_succeeds_when_everything_is_visible() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let engine = FakeEngine::new(vec![full_dashboard()]);
    let plan = Plan::from_json_str(CREATE_PROJECT).unwrap();

    let outcome = execute(&engine, &plan, &config).unwrap();

    assert!(outcome.success(), "{}", outcome.report.summary());
    assert_eq!(outcome.report.steps.len(), 5);
    assert!(outcome.report.diagnostics >= 5);
    assert_eq!(
        outcome.report.steps[1].strategy,
        Some(Strategy::Landmark),
        "sidebar entry, not the header breadcrumb"
    );
    assert_eq!(outcome.report.steps[2].strategy, Some(Strategy::KeywordClass));
    assert_eq!(outcome.report.steps[3].strategy, Some(Strategy::EditableField));

    let page = engine.page();
    assert_eq!(page.navigations, ["https://app.test/"]);
    assert_eq!(page.typed, "Foo");
    let named: Vec<&str> = page
        .clicks
        .iter()
        .map(String::as_str)
        .filter(|c| !c.is_empty())
        .collect();
    assert_eq!(named, ["Projects", "Add project", "Create project"]);
    assert_eq!(page.saves, 1);
    drop(page);

    assert!(outcome.state_saved);
    let saved = StorageState::load(&config.state_file).unwrap().unwrap();
    assert_eq!(saved.cookies.len(), 1);
}

#[test]
fn every_step_leaves_at_least_one_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let engine = FakeEngine::new(vec![full_dashboard()]);
    let plan = Plan::from_json_str(CREATE_PROJECT).unwrap();

    let outcome = execute(&engine, &plan, &config).unwrap();
    let log = read_log(&outcome.log_path).unwrap();

    assert_eq!(log.len(), outcome.report.diagnostics);
    for index in 0..plan.len() {
        assert!(
            log.iter().any(|d| d.step_index == index),
            "no diagnostic for step {index}"
        );
    }
    for entry in &log {
        let png = entry.visual_path.as_ref().unwrap();
        let html = entry.markup_path.as_ref().unwrap();
        assert!(png.exists() && html.exists());
    }
    // Everything after the first pre-navigation snapshot knows the page URL.
    assert!(
        log.iter()
            .skip(1)
            .all(|d| d.url.as_deref() == Some("https://app.test/"))
    );
}

#[test]
fn missing_add_button_fails_gating_but_run_completes() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let engine = FakeEngine::new(vec![dashboard_without_add()]);
    let plan = Plan::from_json_str(CREATE_PROJECT).unwrap();

    let outcome = execute(&engine, &plan, &config).unwrap();
    let report = &outcome.report;

    assert!(!outcome.success());
    assert_eq!(report.steps.len(), 5, "later steps still attempted");
    assert!(report.steps[0].outcome.is_success());
    assert!(report.steps[1].outcome.is_success());
    assert_eq!(
        report.steps[2].outcome,
        StepOutcome::Skipped(StepError::ResolutionMiss {
            target: "Add project".into()
        })
    );
    assert!(matches!(
        report.steps[3].outcome,
        StepOutcome::Skipped(StepError::ResolutionMiss { .. })
    ));
    assert!(matches!(
        report.steps[4].outcome,
        StepOutcome::Skipped(StepError::ResolutionMiss { .. })
    ));
    assert_eq!(report.failed_gating().count(), 3);

    let log = read_log(&outcome.log_path).unwrap();
    let miss = log
        .iter()
        .find(|d| d.step_index == 2 && d.phase == Phase::NotFound)
        .expect("not-found snapshot for step 3");
    assert!(miss.name.contains("not_found"));
    assert!(miss.note.as_deref().unwrap().contains("Add project"));

    assert!(outcome.state_saved);
    assert!(config.state_file.exists());
    assert_eq!(engine.page().clicks, ["Projects"]);
}

#[test]
fn type_into_absent_field_sends_no_keystrokes() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let engine = FakeEngine::new(vec![dashboard_without_add()]);
    let plan = Plan::from_json_str(
        r#"[
          {"type": "goto", "url": "https://app.test/"},
          {"type": "type", "target": "name", "text": "Foo"}
        ]"#,
    )
    .unwrap();

    let outcome = execute(&engine, &plan, &config).unwrap();

    assert_eq!(engine.page().keystrokes, 0);
    assert!(engine.page().typed.is_empty());
    assert!(matches!(
        outcome.report.steps[1].outcome,
        StepOutcome::Skipped(StepError::ResolutionMiss { .. })
    ));
    let log = read_log(&outcome.log_path).unwrap();
    assert!(
        log.iter()
            .any(|d| d.step_index == 1 && d.phase == Phase::NotFound)
    );
}

#[test]
fn dialog_opened_by_click_is_found_on_next_snapshot() {
    // Screen 0: dashboard with the add button. Screen 1: the creation dialog.
    let mut dashboard = ScreenBuilder::new();
    let main = dashboard.add(0, "main", "Add project");
    let add = dashboard.add(main, "button", "Add project");
    dashboard.leads_to(add, 1);

    let mut dialog = ScreenBuilder::new();
    let modal = dialog.add(0, "div", "Create project");
    dialog.with(modal, |n| n.role = Some("dialog".into()));
    let name = dialog.add(modal, "input", "");
    dialog.with(name, |n| {
        n.id = Some("project-name".into());
        n.placeholder = Some("Project name".into());
    });
    let stale = dialog.add(modal, "button", "Add project");
    dialog.with(stale, hide);
    dialog.add(modal, "button", "Create project");

    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.site.ready_markers.clear();
    let engine = FakeEngine::new(vec![dashboard.build(), dialog.build()]);
    let plan = Plan::from_json_str(
        r#"[
          {"type": "goto", "url": "https://app.test/"},
          {"type": "click", "target": "Add project"},
          {"type": "type", "target": "project name", "text": "Apollo"},
          {"type": "click", "target": "Create project"}
        ]"#,
    )
    .unwrap();

    let outcome = execute(&engine, &plan, &config).unwrap();

    assert!(outcome.success(), "{}", outcome.report.summary());
    let page = engine.page();
    assert_eq!(page.screen, 1);
    assert_eq!(page.typed, "Apollo");
    assert_eq!(page.clicks.last().map(String::as_str), Some("Create project"));
}

#[test]
fn invalid_record_fails_in_place_and_later_steps_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let engine = FakeEngine::new(vec![full_dashboard()]);
    let plan = Plan::from_json_str(
        r#"[
          {"type": "goto", "url": "https://app.test/"},
          {"type": "click"},
          {"type": "wait", "seconds": 0},
          {"type": "click", "target": "Projects"}
        ]"#,
    )
    .unwrap();

    let outcome = execute(&engine, &plan, &config).unwrap();
    let steps = &outcome.report.steps;

    assert!(!outcome.success());
    assert_eq!(steps[1].kind, ActionKind::Invalid);
    assert!(matches!(
        steps[1].outcome,
        StepOutcome::Failed(StepError::InvalidAction { .. })
    ));
    assert!(steps[2].outcome.is_success());
    assert!(!steps[2].gating);
    assert!(steps[3].outcome.is_success());
}

#[test]
fn non_gating_failure_does_not_fail_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let engine = FakeEngine::new(vec![dashboard_without_add()]);
    let plan = Plan::from_json_str(
        r#"[
          {"type": "goto", "url": "https://app.test/"},
          {"type": "click", "target": "Add project", "gating": false},
          {"type": "click", "target": "Projects"}
        ]"#,
    )
    .unwrap();

    let outcome = execute(&engine, &plan, &config).unwrap();

    assert!(outcome.success(), "{}", outcome.report.summary());
    assert!(!outcome.report.steps[1].outcome.is_success());
    assert!(outcome.report.summary().contains("[warn]"));
}

#[test]
fn rerun_produces_same_log_structure() {
    let plan = Plan::from_json_str(CREATE_PROJECT).unwrap();
    let structure = || {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let engine = FakeEngine::new(vec![dashboard_without_add()]);
        let outcome = execute(&engine, &plan, &config).unwrap();
        read_log(&outcome.log_path)
            .unwrap()
            .into_iter()
            .map(|d| (d.step_index, d.phase, d.action))
            .collect::<Vec<_>>()
    };

    let first = structure();
    let second = structure();
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn saved_session_is_restored_on_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let plan = Plan::from_json_str(r#"[{"type": "goto", "url": "https://app.test/"}]"#).unwrap();

    let first = FakeEngine::new(vec![full_dashboard()]);
    execute(&first, &plan, &config).unwrap();
    assert!(!first.page().restored);

    let second = FakeEngine::new(vec![full_dashboard()]);
    execute(&second, &plan, &config).unwrap();
    assert!(second.page().restored);
}

#[test]
fn rejected_click_fails_step_and_later_steps_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let engine = FakeEngine::new(vec![full_dashboard()]).rejecting_clicks_on("Add project");
    let plan = Plan::from_json_str(CREATE_PROJECT).unwrap();

    let outcome = execute(&engine, &plan, &config).unwrap();
    let steps = &outcome.report.steps;

    assert!(!outcome.success());
    assert_eq!(steps.len(), 5);
    match &steps[2].outcome {
        StepOutcome::Failed(StepError::InteractionFailure { target, message }) => {
            assert_eq!(target, "Add project");
            assert!(message.contains("covered"), "{message}");
        }
        other => panic!("expected interaction failure, got {other:?}"),
    }
    assert_eq!(steps[2].strategy, Some(Strategy::KeywordClass));
    assert!(steps[3].outcome.is_success());
    assert!(steps[4].outcome.is_success());

    let log = read_log(&outcome.log_path).unwrap();
    let failed = log
        .iter()
        .find(|d| d.step_index == 2 && d.phase == Phase::Failed)
        .expect("failed snapshot for step 3");
    assert!(failed.note.as_deref().unwrap().contains("covered"));
    assert!(!log.iter().any(|d| d.step_index == 2 && d.phase == Phase::Post));
    assert_eq!(
        engine.page().clicks.last().map(String::as_str),
        Some("Create project")
    );
}

#[test]
fn navigation_timeout_is_recovered() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let engine = FakeEngine::new(vec![full_dashboard()]).failing_navigation(NavigateFault::Timeout);
    let plan = Plan::from_json_str(CREATE_PROJECT).unwrap();

    let outcome = execute(&engine, &plan, &config).unwrap();

    assert!(outcome.success(), "{}", outcome.report.summary());
    assert_eq!(outcome.report.steps[0].outcome, StepOutcome::Succeeded);
    assert_eq!(engine.page().typed, "Foo");
}

#[test]
fn refused_navigation_fails_step_and_later_steps_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let engine = FakeEngine::new(vec![full_dashboard()]).failing_navigation(NavigateFault::Refused);
    let plan = Plan::from_json_str(CREATE_PROJECT).unwrap();

    let outcome = execute(&engine, &plan, &config).unwrap();
    let steps = &outcome.report.steps;

    assert!(!outcome.success());
    assert_eq!(steps.len(), 5, "later steps still attempted");
    match &steps[0].outcome {
        StepOutcome::Failed(StepError::NavigationTimeout { url, message }) => {
            assert_eq!(url, "https://app.test/");
            assert!(message.contains("ERR_CONNECTION_REFUSED"), "{message}");
        }
        other => panic!("expected navigation failure, got {other:?}"),
    }
    assert!(engine.page().navigations.is_empty());

    let log = read_log(&outcome.log_path).unwrap();
    assert!(
        log.iter()
            .any(|d| d.step_index == 0 && d.phase == Phase::Failed)
    );
    assert!(!log.iter().any(|d| d.step_index == 0 && d.phase == Phase::Post));
}

#[test]
fn stale_handle_is_rejected_not_retargeted() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let engine = FakeEngine::new(vec![full_dashboard()]).rerendering_on_scroll();
    let plan = Plan::from_json_str(
        r#"[
          {"type": "goto", "url": "https://app.test/"},
          {"type": "click", "target": "Projects"}
        ]"#,
    )
    .unwrap();

    let outcome = execute(&engine, &plan, &config).unwrap();

    // The sidebar link has no stable attribute, so it is addressed by its
    // snapshot stamp, which the re-render invalidated.
    assert!(matches!(
        outcome.report.steps[1].outcome,
        StepOutcome::Failed(StepError::InteractionFailure { .. })
    ));
    assert!(engine.page().clicks.is_empty());
}

#[test]
fn unbounded_wait_budgets_do_not_overflow() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.timings.resolve_wait = u64::MAX;
    config.timings.stabilize_timeout = u64::MAX;
    let engine = FakeEngine::new(vec![full_dashboard()]);
    let plan = Plan::from_json_str(
        r#"[
          {"type": "goto", "url": "https://app.test/"},
          {"type": "click", "target": "Projects"}
        ]"#,
    )
    .unwrap();

    let outcome = execute(&engine, &plan, &config).unwrap();

    assert!(outcome.success(), "{}", outcome.report.summary());
}

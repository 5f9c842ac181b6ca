//! Upload → parse → analyze scenarios against a scripted backend.

mod common;

use std::path::Path;

use serde_json::json;
use tokio::sync::broadcast::error::TryRecvError;

use common::{Reply, ScriptedBackend, SettingsBuilder, TestHarness, HEIST};
use scriptdesk::analysis::AnalysisTask;
use scriptdesk::db::resource_repo::ResourceFilter;
use scriptdesk::notify::{topics, AnalysisState, Notification, NotificationKind, ResourceAction};
use scriptdesk::resources::{ResourcePriority, ResourceStatus};
use scriptdesk::storage::ArtifactKind;
use scriptdesk::{ScriptDeskError, ScriptStatus, ValidationError};

fn drain(rx: &mut tokio::sync::broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(n) => out.push(n),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return out,
            Err(TryRecvError::Lagged(_)) => continue,
        }
    }
}

#[test]
fn test_upload_validates_extension_and_size() {
    let h = TestHarness::new();

    let err = h
        .orchestrator
        .upload("heist.pdf", HEIST.as_bytes(), None)
        .unwrap_err();
    assert!(matches!(
        err,
        ScriptDeskError::Validation(ValidationError::ExtensionNotAllowed { .. })
    ));

    let upper = h
        .orchestrator
        .upload("HEIST.TXT", HEIST.as_bytes(), None)
        .unwrap();
    assert_eq!(upper.status, ScriptStatus::Uploading);

    let dir = tempfile::TempDir::new().unwrap();
    let settings = SettingsBuilder::new(dir.path()).max_upload_bytes(8).build();
    let small = TestHarness::with_settings(dir, settings, ScriptedBackend::heist());
    assert!(matches!(
        small.orchestrator.upload("heist.txt", HEIST.as_bytes(), None).unwrap_err(),
        ScriptDeskError::Validation(ValidationError::TooLarge { .. })
    ));
}

#[test]
fn test_upload_into_missing_project_is_not_found() {
    let h = TestHarness::new();
    let err = h
        .orchestrator
        .upload("heist.txt", HEIST.as_bytes(), Some(42))
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_parse_records_structure() {
    let h = TestHarness::new();
    let script = h.parsed_heist();

    assert_eq!(script.status, ScriptStatus::Parsed);
    assert_eq!(script.title, "Heist");
    assert_eq!(script.content.as_deref(), Some(HEIST));

    let summary = script.metadata.summary().expect("parse summary");
    assert_eq!(summary.author.as_deref(), Some("Sam Vale"));
    assert_eq!(summary.total_scenes, 2);
    assert_eq!(summary.total_characters, 2);
    assert_eq!(summary.total_resources, 3);

    let scenes = h.orchestrator.scenes(script.id).unwrap();
    let names: Vec<&str> = scenes.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["INT. BANK - DAY", "EXT. STREET - NIGHT"]);

    let parsed = h.orchestrator.parsed_script(script.id).unwrap();
    let ids: Vec<&str> = parsed.resources.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["prop_1", "sound_1", "prop_2"]);
    assert!(h.orchestrator.artifacts().exists(ArtifactKind::Parse, script.id));
}

#[tokio::test]
async fn test_trigger_parse_of_binary_file_sets_error() {
    let h = TestHarness::new();
    let script = h
        .orchestrator
        .upload("broken.txt", &[0xff, 0xfe, 0x00, 0x9f], None)
        .unwrap();
    let mut errors = h.hub.subscribe(topics::ERRORS);

    let accepted = h.orchestrator.trigger_parse(script.id).unwrap();
    assert_eq!(accepted.analysis_id, None);
    accepted.task.await.unwrap();

    let script = h.orchestrator.script(script.id).unwrap();
    assert_eq!(script.status, ScriptStatus::Error);
    assert!(script.metadata.error().unwrap().contains("UTF-8"));
    assert_eq!(errors.recv().await.unwrap().type_name(), "error");
    assert!(h.orchestrator.parsed_script(script.id).unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_heist_end_to_end() {
    let h = TestHarness::new();
    let script = h.parsed_heist();
    let mut rx = h.hub.subscribe(&topics::script(script.id));

    let accepted = h.orchestrator.trigger_analyze(script.id).unwrap();
    let analysis_id = accepted.analysis_id.unwrap();
    accepted.task.await.unwrap();

    let script = h.orchestrator.script(script.id).unwrap();
    assert_eq!(script.status, ScriptStatus::Completed);

    let latest = h.orchestrator.latest_analysis(script.id).unwrap();
    assert_eq!(latest.id, analysis_id);
    assert_eq!(latest.error, None);
    assert_eq!(
        latest.character_analysis.as_ref().unwrap()["characters"]["JOHN"]["lines"],
        json!(2)
    );
    assert!(latest.resource_analysis.is_some());
    assert!(latest.scene_analysis.is_some());
    assert!(h.orchestrator.artifacts().exists(ArtifactKind::Analysis, script.id));

    let page = h
        .resources
        .list(&ResourceFilter {
            script_id: Some(script.id),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(page.total, 3);
    for resource in &page.items {
        assert_eq!(resource.status, ResourceStatus::Pending);
        assert_eq!(resource.priority, ResourcePriority::Medium);
    }
    let car = page.items.iter().find(|r| r.name == "getaway car").unwrap();
    assert_eq!(car.kind, "prop");
    assert_eq!(car.scene_number, Some(2));

    let seen = drain(&mut rx);
    let states: Vec<AnalysisState> = seen
        .iter()
        .filter_map(|n| match n.kind {
            NotificationKind::ScriptAnalysis { status, .. } => Some(status),
            _ => None,
        })
        .collect();
    assert_eq!(states, vec![AnalysisState::Started, AnalysisState::Completed]);
    assert!(seen.iter().any(|n| matches!(
        n.kind,
        NotificationKind::ResourceUpdate {
            action: ResourceAction::Synthesized,
            count: 3,
            ..
        }
    )));
}

#[tokio::test]
async fn test_analyze_parses_first_when_needed() {
    let h = TestHarness::new();
    let script = h.upload_heist();

    let accepted = h.orchestrator.trigger_analyze(script.id).unwrap();
    accepted.task.await.unwrap();

    assert_eq!(
        h.orchestrator.script(script.id).unwrap().status,
        ScriptStatus::Completed
    );
    assert_eq!(h.orchestrator.scenes(script.id).unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_analyses_each_get_a_row() {
    for _ in 0..5 {
        let h = TestHarness::new();
        let script = h.parsed_heist();

        let runs: Vec<_> = (0..3)
            .map(|_| h.orchestrator.trigger_analyze(script.id).unwrap())
            .collect();
        let mut ids: Vec<i64> = runs.iter().filter_map(|a| a.analysis_id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 3);
        for run in runs {
            run.task.await.unwrap();
        }

        let analyses = h.orchestrator.analyses(script.id).unwrap();
        assert_eq!(analyses.len(), 3);
        for analysis in &analyses {
            assert!(analysis.error.is_none(), "run failed: {:?}", analysis.error);
            assert!(!analysis.is_pending());
        }
        assert_eq!(
            h.orchestrator.script(script.id).unwrap().status,
            ScriptStatus::Completed
        );

        // Synthesis is additive, so later runs add nothing
        let page = h
            .resources
            .list(&ResourceFilter {
                script_id: Some(script.id),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 3);
        assert!(h.orchestrator.artifacts().exists(ArtifactKind::Analysis, script.id));
    }
}

#[tokio::test]
async fn test_unwritable_result_file_fails_whole_analysis() {
    let h = TestHarness::new();
    let script = h.parsed_heist();
    std::fs::write(h.root().join("analysis_results"), b"not a directory").unwrap();

    let analysis_id = h.orchestrator.analyze(script.id).unwrap();
    let err = h
        .orchestrator
        .run_analysis(script.id, analysis_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ScriptDeskError::Storage(_)));

    let row = h.orchestrator.latest_analysis(script.id).unwrap();
    assert!(row.error.is_some());
    assert!(row.character_analysis.is_none());
    assert!(row.resource_analysis.is_none());
    assert!(row.scene_analysis.is_none());
    assert!(h
        .resources
        .list(&ResourceFilter::default())
        .unwrap()
        .items
        .is_empty());
    assert_eq!(
        h.orchestrator.script(script.id).unwrap().status,
        ScriptStatus::Parsed
    );
}

#[tokio::test]
async fn test_failed_completion_rolls_back_resources() {
    let h = TestHarness::new();
    let script = h.parsed_heist();
    h.block_status(ScriptStatus::Completed);

    let analysis_id = h.orchestrator.analyze(script.id).unwrap();
    assert!(h
        .orchestrator
        .run_analysis(script.id, analysis_id)
        .await
        .is_err());

    let row = h.orchestrator.latest_analysis(script.id).unwrap();
    assert!(row.error.as_deref().unwrap().contains("status completed blocked"));
    assert!(row.resource_analysis.is_none());
    assert!(h
        .resources
        .list(&ResourceFilter::default())
        .unwrap()
        .items
        .is_empty());
    assert!(!h.orchestrator.artifacts().exists(ArtifactKind::Analysis, script.id));
    assert_eq!(
        h.orchestrator.script(script.id).unwrap().status,
        ScriptStatus::Parsed
    );
}

#[tokio::test]
async fn test_status_write_failure_settles_the_row() {
    let h = TestHarness::new();
    let script = h.parsed_heist();
    h.block_status(ScriptStatus::Generating);

    let analysis_id = h.orchestrator.analyze(script.id).unwrap();
    assert!(h
        .orchestrator
        .run_analysis(script.id, analysis_id)
        .await
        .is_err());

    let row = h.orchestrator.latest_analysis(script.id).unwrap();
    assert!(!row.is_pending());
    assert!(row.error.as_deref().unwrap().contains("status generating blocked"));
    assert_eq!(h.backend.calls(AnalysisTask::Characters), 0);
    assert_eq!(
        h.orchestrator.script(script.id).unwrap().status,
        ScriptStatus::Parsed
    );
}

#[tokio::test]
async fn test_failure_keeps_status_settled_by_another_run() {
    let backend = ScriptedBackend::heist();
    backend.set(AnalysisTask::Scenes, Reply::Auth);
    let h = TestHarness::with_backend(backend);
    let script = h.parsed_heist();

    // Another run completes while this one waits on the backend
    let db = h.database().clone();
    let script_id = script.id;
    h.backend.on_call(move |task| {
        if task == AnalysisTask::Scenes {
            scriptdesk::db::script_repo::update_status(&db, script_id, ScriptStatus::Completed)
                .unwrap();
        }
    });

    let analysis_id = h.orchestrator.analyze(script.id).unwrap();
    assert!(h
        .orchestrator
        .run_analysis(script.id, analysis_id)
        .await
        .is_err());

    assert!(h.orchestrator.latest_analysis(script.id).unwrap().error.is_some());
    assert_eq!(
        h.orchestrator.script(script.id).unwrap().status,
        ScriptStatus::Completed
    );
}

#[test]
fn test_failed_parse_keeps_previous_parse() {
    let h = TestHarness::new();
    let script = h.parsed_heist();
    std::fs::write(
        &script.file_path,
        "Title: Heist II\nINT. VAULT - NIGHT\nJOHN: Again.\n",
    )
    .unwrap();
    h.block_status(ScriptStatus::Parsed);

    assert!(h.orchestrator.parse(script.id).is_err());

    let stored = h.orchestrator.script(script.id).unwrap();
    assert_eq!(stored.status, ScriptStatus::Error);
    assert_eq!(stored.title, "Heist");
    let scenes = h.orchestrator.scenes(script.id).unwrap();
    assert_eq!(scenes.len(), 2);
    assert_eq!(scenes[0].name, "INT. BANK - DAY");
    let parsed = h.orchestrator.parsed_script(script.id).unwrap();
    assert_eq!(parsed.metadata.title, "Heist");
}

#[test]
fn test_unwritable_parse_result_fails_parse() {
    let h = TestHarness::new();
    let script = h.upload_heist();
    std::fs::write(h.root().join("parse_results"), b"not a directory").unwrap();

    assert!(h.orchestrator.parse(script.id).is_err());

    let stored = h.orchestrator.script(script.id).unwrap();
    assert_eq!(stored.status, ScriptStatus::Error);
    assert!(stored.metadata.error().is_some());
    assert!(h.orchestrator.scenes(script.id).unwrap().is_empty());
}

#[tokio::test]
async fn test_backend_failure_keeps_script_usable() {
    let backend = ScriptedBackend::heist();
    backend.set(AnalysisTask::Resources, Reply::Auth);
    let h = TestHarness::with_backend(backend);
    let script = h.parsed_heist();

    let analysis_id = h.orchestrator.analyze(script.id).unwrap();
    let err = h
        .orchestrator
        .run_analysis(script.id, analysis_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ScriptDeskError::Analysis(_)));

    // Permanent errors are not retried and scenes are never requested
    assert_eq!(h.backend.calls(AnalysisTask::Resources), 1);
    assert_eq!(h.backend.calls(AnalysisTask::Scenes), 0);

    let row = h.orchestrator.latest_analysis(script.id).unwrap();
    assert_eq!(row.id, analysis_id);
    assert!(row.error.as_deref().unwrap().contains("Authentication failed"));
    assert!(row.character_analysis.is_none());

    assert_eq!(
        h.orchestrator.script(script.id).unwrap().status,
        ScriptStatus::Parsed
    );
    assert!(h
        .resources
        .list(&ResourceFilter::default())
        .unwrap()
        .items
        .is_empty());
}

#[tokio::test]
async fn test_malformed_reply_carries_raw_text() {
    let backend = ScriptedBackend::heist();
    backend.set(
        AnalysisTask::Scenes,
        Reply::Text("Sorry, I cannot help with that.".to_string()),
    );
    let h = TestHarness::with_backend(backend);
    let script = h.parsed_heist();

    let analysis_id = h.orchestrator.analyze(script.id).unwrap();
    let err = h
        .orchestrator
        .run_analysis(script.id, analysis_id)
        .await
        .unwrap_err();

    match err {
        ScriptDeskError::Analysis(e) => {
            assert_eq!(e.task(), Some(AnalysisTask::Scenes));
            assert_eq!(e.raw_response(), Some("Sorry, I cannot help with that."));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(h.orchestrator.latest_analysis(script.id).unwrap().error.is_some());
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let backend = ScriptedBackend::heist();
    backend.set(
        AnalysisTask::Characters,
        Reply::FlakyThen(2, common::heist_characters()),
    );
    let h = TestHarness::with_backend(backend);
    let script = h.parsed_heist();

    let analysis_id = h.orchestrator.analyze(script.id).unwrap();
    h.orchestrator
        .run_analysis(script.id, analysis_id)
        .await
        .unwrap();

    assert_eq!(h.backend.calls(AnalysisTask::Characters), 3);
    assert_eq!(
        h.orchestrator.script(script.id).unwrap().status,
        ScriptStatus::Completed
    );
}

#[tokio::test]
async fn test_retries_give_up_after_max_attempts() {
    let backend = ScriptedBackend::heist();
    backend.set(
        AnalysisTask::Characters,
        Reply::FlakyThen(5, common::heist_characters()),
    );
    let h = TestHarness::with_backend(backend);
    let script = h.parsed_heist();

    let analysis_id = h.orchestrator.analyze(script.id).unwrap();
    assert!(h
        .orchestrator
        .run_analysis(script.id, analysis_id)
        .await
        .is_err());
    assert_eq!(h.backend.calls(AnalysisTask::Characters), 3);
}

#[tokio::test]
async fn test_refresh_scene_numbers_is_explicit() {
    let h = TestHarness::new();
    let script = h.parsed_heist();
    h.orchestrator
        .trigger_analyze(script.id)
        .unwrap()
        .task
        .await
        .unwrap();

    let moved = common::ResourceAnalysisBuilder::new()
        .resource("prop", "mask")
        .first_appearance("mask", 2)
        .build();
    h.backend.set(AnalysisTask::Resources, Reply::Json(moved));
    h.orchestrator
        .trigger_analyze(script.id)
        .unwrap()
        .task
        .await
        .unwrap();

    let mask = |h: &TestHarness| {
        h.resources
            .list(&ResourceFilter::default())
            .unwrap()
            .items
            .into_iter()
            .find(|r| r.name == "mask")
            .unwrap()
    };
    assert_eq!(mask(&h).scene_number, Some(1));

    assert_eq!(h.orchestrator.refresh_scene_numbers(script.id).unwrap(), 1);
    assert_eq!(mask(&h).scene_number, Some(2));
}

#[test]
fn test_analyses_of_unanalyzed_script_are_not_found() {
    let h = TestHarness::new();
    let script = h.parsed_heist();

    assert!(h.orchestrator.analyses(script.id).unwrap_err().is_not_found());
    assert!(h.orchestrator.latest_analysis(script.id).unwrap_err().is_not_found());
    assert!(h.orchestrator.analyze(9999).unwrap_err().is_not_found());
    assert!(h
        .orchestrator
        .refresh_scene_numbers(script.id)
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_delete_script_removes_files_and_rows() {
    let h = TestHarness::new();
    let script = h.parsed_heist();
    let accepted = h.orchestrator.trigger_analyze(script.id).unwrap();
    accepted.task.await.unwrap();

    h.orchestrator.delete_script(script.id).unwrap();

    assert!(h.orchestrator.script(script.id).unwrap_err().is_not_found());
    assert!(!Path::new(&script.file_path).exists());
    assert!(!h.orchestrator.artifacts().exists(ArtifactKind::Parse, script.id));
    assert!(!h.orchestrator.artifacts().exists(ArtifactKind::Analysis, script.id));
    assert_eq!(
        h.resources
            .list(&ResourceFilter::default())
            .unwrap()
            .total,
        0
    );
}

#[test]
fn test_notifications_while_hub_stopped_are_dropped() {
    let h = TestHarness::new();
    let mut rx = h.hub.subscribe(topics::SCRIPTS);
    h.hub.stop();

    h.upload_heist();
    assert!(drain(&mut rx).is_empty());
}

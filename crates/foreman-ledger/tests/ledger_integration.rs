#![allow(clippy::unwrap_used, clippy::expect_used)]

use foreman_core::ForemanError;
use foreman_ledger::*;

async fn ledger() -> (tempfile::TempDir, Ledger) {
    let tmp = tempfile::tempdir().unwrap();
    let ledger = Ledger::open(tmp.path()).await.unwrap();
    (tmp, ledger)
}

// ---------------------------------------------------------------------------
// 1. Single active Epic invariant
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_active_epic_is_rejected() {
    let (_tmp, ledger) = ledger().await;

    let first = ledger.create_epic("auth rework", "rework the auth flow").await.unwrap();
    assert_eq!(first.id, "1");

    let err = ledger.create_epic("other", "something else").await.unwrap_err();
    match err {
        ForemanError::EpicAlreadyActive { active } => assert_eq!(active, "1"),
        other => panic!("unexpected error: {other}"),
    }

    // The first epic's state is unchanged by the failed attempt.
    let active = ledger.active_epic().await.unwrap().unwrap();
    assert_eq!(active.id, "1");
    assert_eq!(active.title, "auth rework");
    assert_eq!(active.status, EpicStatus::Draft);
}

#[tokio::test]
async fn epic_ids_keep_increasing_across_archives() {
    let (_tmp, ledger) = ledger().await;

    ledger.create_epic("first", "r1").await.unwrap();
    ledger.archive_epic(EpicOutcome::Succeeded).await.unwrap();
    let second = ledger.create_epic("second", "r2").await.unwrap();
    assert_eq!(second.id, "2");
}

// ---------------------------------------------------------------------------
// 2. Dependency ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn task_with_unmet_dependency_cannot_run() {
    let (_tmp, ledger) = ledger().await;
    ledger.create_epic("demo", "demo request").await.unwrap();

    let t1 = ledger.add_task("survey the module", "planner", vec![]).await.unwrap();
    let t2 = ledger
        .add_task("apply the change", "coder", vec![t1.id.clone()])
        .await
        .unwrap();
    assert_eq!(t1.id, "1.1");
    assert_eq!(t2.id, "1.2");

    let err = ledger
        .update_task_status(&t2.id, TaskStatus::Running)
        .await
        .unwrap_err();
    match err {
        ForemanError::DependencyUnmet { task, dependency } => {
            assert_eq!(task, "1.2");
            assert_eq!(dependency, "1.1");
        }
        other => panic!("unexpected error: {other}"),
    }

    // Complete the dependency, then the transition succeeds.
    ledger.update_task_status(&t1.id, TaskStatus::Running).await.unwrap();
    ledger.complete_task(&t1.id, "survey done").await.unwrap();
    let t2 = ledger
        .update_task_status(&t2.id, TaskStatus::Running)
        .await
        .unwrap();
    assert_eq!(t2.status, TaskStatus::Running);
}

#[tokio::test]
async fn dependency_must_exist_when_adding() {
    let (_tmp, ledger) = ledger().await;
    ledger.create_epic("demo", "demo").await.unwrap();

    let result = ledger.add_task("orphan", "coder", vec!["1.9".to_string()]).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn task_limit_is_enforced() {
    let (_tmp, ledger) = ledger().await;
    let ledger = ledger.with_task_limit(2);
    ledger.create_epic("demo", "demo").await.unwrap();

    ledger.add_task("a", "coder", vec![]).await.unwrap();
    ledger.add_task("b", "coder", vec![]).await.unwrap();
    let err = ledger.add_task("c", "coder", vec![]).await.unwrap_err();
    match err {
        ForemanError::TaskLimitExceeded { limit } => assert_eq!(limit, 2),
        other => panic!("unexpected error: {other}"),
    }
}

// ---------------------------------------------------------------------------
// 3. Archive round-trip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn archive_preserves_artifacts_and_clears_slot() {
    let (_tmp, ledger) = ledger().await;
    let epic = ledger.create_epic("demo", "demo request").await.unwrap();

    ledger.write_spec("## Spec\n\nbuild the thing").await.unwrap();
    ledger.write_plan("## Plan\n\n1. build\n2. test").await.unwrap();
    ledger.append_log("started").await.unwrap();
    ledger.append_log("finished").await.unwrap();

    let archived = ledger.archive_epic(EpicOutcome::Succeeded).await.unwrap();
    assert_eq!(archived.id, epic.id);

    // Active slot is empty afterwards.
    assert!(ledger.active_epic().await.unwrap().is_none());

    // Identical artifact content in the archive.
    let spec = ledger.archived_artifact(&epic.id, "spec.md").await.unwrap().unwrap();
    assert_eq!(spec, "## Spec\n\nbuild the thing");
    let plan = ledger.archived_artifact(&epic.id, "plan.md").await.unwrap().unwrap();
    assert_eq!(plan, "## Plan\n\n1. build\n2. test");
    let log = ledger.archived_artifact(&epic.id, "log.md").await.unwrap().unwrap();
    assert_eq!(log, "started\nfinished\n");

    let outcome = ledger
        .archived_artifact(&epic.id, "outcome.json")
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.contains("SUCCEEDED"));

    let record = ledger.archived_epic(&epic.id).await.unwrap().unwrap();
    assert_eq!(record.title, "demo");
}

#[tokio::test]
async fn archive_without_active_epic_fails() {
    let (_tmp, ledger) = ledger().await;
    let err = ledger.archive_epic(EpicOutcome::Failed).await.unwrap_err();
    assert!(matches!(err, ForemanError::NoActiveEpic));
}

// ---------------------------------------------------------------------------
// 4. Restart behavior
// ---------------------------------------------------------------------------

#[tokio::test]
async fn state_survives_reopen() {
    let tmp = tempfile::tempdir().unwrap();

    {
        let ledger = Ledger::open(tmp.path()).await.unwrap();
        ledger.create_epic("durable", "request").await.unwrap();
        ledger.add_task("only task", "coder", vec![]).await.unwrap();
        ledger.set_phase(EpicStatus::InProgress).await.unwrap();
    }

    // A fresh process resumes exactly where the last one left off.
    let reopened = Ledger::open(tmp.path()).await.unwrap();
    let active = reopened.active_epic().await.unwrap().unwrap();
    assert_eq!(active.title, "durable");
    assert_eq!(active.status, EpicStatus::InProgress);
    assert_eq!(active.tasks.len(), 1);
    assert_eq!(active.tasks[0].id, "1.1");
}

#[tokio::test]
async fn malformed_index_reads_as_uninitialized() {
    let tmp = tempfile::tempdir().unwrap();
    let ledger = Ledger::open(tmp.path()).await.unwrap();
    ledger.create_epic("demo", "r").await.unwrap();

    // Corrupt the index; the ledger recovers instead of aborting.
    tokio::fs::write(tmp.path().join("index.json"), "{{{").await.unwrap();
    assert!(ledger.active_epic().await.unwrap().is_none());

    // The next create reinitializes the slot.
    let epic = ledger.create_epic("fresh", "r2").await.unwrap();
    assert_eq!(epic.id, "1");
}

// ---------------------------------------------------------------------------
// 5. Learnings
// ---------------------------------------------------------------------------

#[tokio::test]
async fn learnings_append_into_kind_partitions() {
    let (_tmp, ledger) = ledger().await;

    ledger
        .add_learning(LearningKind::Pattern, "small batches land faster", None, None)
        .await
        .unwrap();
    ledger
        .add_learning(
            LearningKind::AntiPattern,
            "don't dispatch before validating",
            Some("1".to_string()),
            Some("planner".to_string()),
        )
        .await
        .unwrap();
    ledger
        .add_learning(LearningKind::Pattern, "pin agent versions", None, None)
        .await
        .unwrap();

    let patterns = ledger.learnings(LearningKind::Pattern).await.unwrap();
    assert_eq!(patterns.len(), 2);
    assert_eq!(patterns[0].text, "small batches land faster");

    let anti = ledger.learnings(LearningKind::AntiPattern).await.unwrap();
    assert_eq!(anti.len(), 1);
    assert_eq!(anti[0].source_agent.as_deref(), Some("planner"));

    assert!(ledger.learnings(LearningKind::Decision).await.unwrap().is_empty());

    let recent = ledger.recent_learnings().await.unwrap();
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[2], "pin agent versions");
}

#[tokio::test]
async fn truncated_learning_line_is_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    let ledger = Ledger::open(tmp.path()).await.unwrap();
    ledger
        .add_learning(LearningKind::Decision, "use tokio", None, None)
        .await
        .unwrap();

    // Simulate a crash mid-append: a truncated trailing line.
    let path = tmp.path().join("learnings").join("decision.jsonl");
    let mut content = tokio::fs::read_to_string(&path).await.unwrap();
    content.push_str("{\"id\":\"trunc");
    tokio::fs::write(&path, content).await.unwrap();

    let learnings = ledger.learnings(LearningKind::Decision).await.unwrap();
    assert_eq!(learnings.len(), 1);
    assert_eq!(learnings[0].text, "use tokio");
}

// ---------------------------------------------------------------------------
// 6. Handoff
// ---------------------------------------------------------------------------

#[tokio::test]
async fn handoff_is_consumed_exactly_once() {
    let (_tmp, ledger) = ledger().await;

    ledger
        .create_handoff("context limit", "resume task 1.2", "1.1 done, 1.2 pending")
        .await
        .unwrap();

    let taken = ledger.take_handoff().await.unwrap().unwrap();
    assert_eq!(taken.resume, "resume task 1.2");

    // Second take finds the slot empty.
    assert!(ledger.take_handoff().await.unwrap().is_none());
}

#[tokio::test]
async fn handoff_overwrites_are_last_writer_wins() {
    let (_tmp, ledger) = ledger().await;

    ledger.create_handoff("a", "resume a", "s").await.unwrap();
    ledger.create_handoff("b", "resume b", "s").await.unwrap();

    let taken = ledger.take_handoff().await.unwrap().unwrap();
    assert_eq!(taken.reason, "b");
}

#[tokio::test]
async fn clear_handoff_is_idempotent() {
    let (_tmp, ledger) = ledger().await;
    ledger.clear_handoff().await.unwrap();
    ledger.create_handoff("x", "y", "z").await.unwrap();
    ledger.clear_handoff().await.unwrap();
    ledger.clear_handoff().await.unwrap();
    assert!(ledger.take_handoff().await.unwrap().is_none());
}

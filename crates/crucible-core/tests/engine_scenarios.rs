//! End-to-end engine scenarios: suspension and resumption, option-gated
//! coverage, aggregation precedence, and concurrent wait resolution.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use serde_json::json;

use crucible_core::{
    AggregateStatus, CrucibleError, Engine, ExternalEvent, FnProcedure, InputDefinition, Outcome,
    OutputDefinition, ResultStatus, RunStatus, RunnableIndex, RunnableNode, SelectedOptions,
    SuiteOption, WaitRequest,
};

fn pass_test(id: &str) -> RunnableNode {
    RunnableNode::test(id, id, Arc::new(FnProcedure::new(|_| Outcome::Pass)))
}

fn engine_with(suite: RunnableNode) -> Engine {
    let index = Arc::new(RunnableIndex::new());
    index.register_suite(suite).unwrap();
    Engine::new(index)
}

fn no_options() -> SelectedOptions {
    SelectedOptions::new()
}

/// The first test produces a `uid` output and suspends on it; the second
/// asserts the externally delivered value matches. After `resolve_wait`
/// the run completes `[pass, pass]` with results still in declaration
/// order.
#[tokio::test]
async fn launch_callback_roundtrip_completes_in_order() {
    let launcher = RunnableNode::test(
        "launch",
        "Launch the app",
        Arc::new(
            FnProcedure::new(|ctx| {
                ctx.output("uid", json!("uid-1234"));
                Outcome::Wait(WaitRequest::new("uid-1234", "waiting for launch callback"))
            })
            .with_resume(|ctx, event| {
                if event.payload.get("received") == Some(&json!("uid-1234")) {
                    ctx.output("received", event.payload["received"].clone());
                    Outcome::Pass
                } else {
                    Outcome::Fail("callback carried the wrong uid".to_string())
                }
            }),
        ),
    )
    .with_output(OutputDefinition::new("uid"))
    .with_output(OutputDefinition::new("received"));

    let checker = RunnableNode::test(
        "check",
        "Check the delivered uid",
        Arc::new(FnProcedure::new(|ctx| {
            if ctx.input("received") == ctx.input("uid") {
                Outcome::Pass
            } else {
                Outcome::Fail("delivered value does not match uid".to_string())
            }
        })),
    )
    .with_input(InputDefinition::new("uid"))
    .with_input(InputDefinition::new("received"));

    let suite = RunnableNode::suite("s", "Suite")
        .with_child(launcher)
        .with_child(checker);
    let engine = engine_with(suite);
    let session = engine.create_session("s", &no_options()).unwrap();

    let run = engine.run(session.id, "s", IndexMap::new()).await.unwrap();
    assert_eq!(run.status, RunStatus::Waiting);
    assert_eq!(run.results.len(), 1);
    assert_eq!(run.results[0].status, ResultStatus::Wait);

    let resumed = engine
        .resolve_wait("uid-1234", ExternalEvent::new(json!({"received": "uid-1234"})))
        .await
        .unwrap();

    assert_eq!(resumed.id, run.id);
    assert_eq!(resumed.status, RunStatus::Completed);
    let outcome: Vec<_> = resumed
        .results
        .iter()
        .map(|r| (r.test_id.as_str(), r.status))
        .collect();
    assert_eq!(
        outcome,
        vec![("launch", ResultStatus::Pass), ("check", ResultStatus::Pass)]
    );
}

/// Concurrent resolution attempts for one identifier: exactly one wins,
/// all others observe `UnknownWaitIdentifier`.
#[tokio::test]
async fn concurrent_wait_resolution_is_exactly_once() {
    let waiting = RunnableNode::test(
        "w",
        "Waits",
        Arc::new(
            FnProcedure::new(|_| Outcome::Wait(WaitRequest::new("race-uid", "waiting")))
                .with_resume(|_, _| Outcome::Pass),
        ),
    );
    let suite = RunnableNode::suite("s", "Suite").with_child(waiting);
    let engine = Arc::new(engine_with(suite));
    let session = engine.create_session("s", &no_options()).unwrap();
    engine.run(session.id, "s", IndexMap::new()).await.unwrap();

    let attempts: Vec<_> = (0..16)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .resolve_wait("race-uid", ExternalEvent::new(json!({})))
                    .await
            })
        })
        .collect();

    let mut wins = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(run) => {
                wins += 1;
                assert_eq!(run.status, RunStatus::Completed);
            }
            Err(err) => assert!(matches!(err, CrucibleError::UnknownWaitIdentifier { .. })),
        }
    }
    assert_eq!(wins, 1);
}

/// A mid-group fault yields `[pass, error, pass]`: the faulty test never
/// blocks its siblings, and the group aggregates to `error`.
#[tokio::test]
async fn fault_in_middle_test_still_runs_the_rest() {
    let faulty = RunnableNode::test(
        "t2",
        "Faulty",
        Arc::new(FnProcedure::new(|_| panic!("unexpected: no response body"))),
    );
    let group = RunnableNode::group("g", "Group")
        .with_child(pass_test("t1"))
        .with_child(faulty)
        .with_child(pass_test("t3"));
    let suite = RunnableNode::suite("s", "Suite").with_child(group);
    let engine = engine_with(suite);
    let session = engine.create_session("s", &no_options()).unwrap();

    let run = engine.run(session.id, "g", IndexMap::new()).await.unwrap();

    let statuses: Vec<_> = run.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![ResultStatus::Pass, ResultStatus::Error, ResultStatus::Pass]
    );
    assert_eq!(
        engine.aggregate_status(run.id, "g").await.unwrap(),
        AggregateStatus::Error
    );
}

/// A required failure aggregates the group to `fail`; making the failing
/// test optional flips the aggregate to `pass`.
#[tokio::test]
async fn optional_test_failure_flips_aggregate() {
    let failing = || {
        RunnableNode::test(
            "bad",
            "Fails",
            Arc::new(FnProcedure::new(|_| Outcome::Fail("nope".to_string()))),
        )
    };

    // Required failure
    let suite = RunnableNode::suite("s", "Suite")
        .with_child(RunnableNode::group("g", "G").with_child(failing()).with_child(pass_test("ok")));
    let engine = engine_with(suite);
    let session = engine.create_session("s", &no_options()).unwrap();
    let run = engine.run(session.id, "g", IndexMap::new()).await.unwrap();
    assert_eq!(
        engine.aggregate_status(run.id, "g").await.unwrap(),
        AggregateStatus::Fail
    );

    // Same shape with the failing test optional
    let suite = RunnableNode::suite("s", "Suite").with_child(
        RunnableNode::group("g", "G")
            .with_child(failing().optional())
            .with_child(pass_test("ok")),
    );
    let engine = engine_with(suite);
    let session = engine.create_session("s", &no_options()).unwrap();
    let run = engine.run(session.id, "g", IndexMap::new()).await.unwrap();
    assert_eq!(
        engine.aggregate_status(run.id, "g").await.unwrap(),
        AggregateStatus::Pass
    );
}

/// Selecting `ig_version=2` includes only Group B; coverage excludes
/// requirements declared solely inside Group A.
#[tokio::test]
async fn option_selection_gates_execution_and_coverage() {
    let suite = RunnableNode::suite("s", "Suite")
        .with_option(SuiteOption::new(
            "ig_version",
            vec!["1".to_string(), "2".to_string()],
        ))
        .with_child(
            RunnableNode::group("ga", "Group A")
                .when("ig_version", "1")
                .with_requirement("req-v1-only")
                .with_child(pass_test("a1")),
        )
        .with_child(
            RunnableNode::group("gb", "Group B")
                .when("ig_version", "2")
                .with_requirement("req-v2")
                .with_child(pass_test("b1")),
        );
    let engine = engine_with(suite);

    let selection: SelectedOptions = [("ig_version".to_string(), "2".to_string())]
        .into_iter()
        .collect();
    let session = engine.create_session("s", &selection).unwrap();

    let run = engine.run(session.id, "s", IndexMap::new()).await.unwrap();
    let ids: Vec<_> = run.results.iter().map(|r| r.test_id.clone()).collect();
    assert_eq!(ids, vec!["b1"]);

    let coverage = engine.coverage("s", &selection).unwrap();
    assert!(coverage.contains("req-v2"));
    assert!(!coverage.contains("req-v1-only"));
}

/// The same identifier cannot be outstanding for two runs: the second
/// run's request fails `DuplicateWaitIdentifier` and the first remains
/// waiting and resolvable.
#[tokio::test]
async fn duplicate_wait_identifier_across_runs() {
    let suite_for = |suite_id: &str| {
        RunnableNode::suite(suite_id, "Suite").with_child(RunnableNode::test(
            "w",
            "Waits",
            Arc::new(
                FnProcedure::new(|_| Outcome::Wait(WaitRequest::new("shared-uid", "waiting")))
                    .with_resume(|_, _| Outcome::Pass),
            ),
        ))
    };

    let index = Arc::new(RunnableIndex::new());
    index.register_suite(suite_for("s1")).unwrap();
    index.register_suite(suite_for("s2")).unwrap();
    let engine = Engine::new(index);

    let first = engine.create_session("s1", &no_options()).unwrap();
    let second = engine.create_session("s2", &no_options()).unwrap();

    let first_run = engine.run(first.id, "s1", IndexMap::new()).await.unwrap();
    assert_eq!(first_run.status, RunStatus::Waiting);

    let err = engine.run(second.id, "s2", IndexMap::new()).await.unwrap_err();
    assert!(matches!(err, CrucibleError::DuplicateWaitIdentifier { .. }));

    // The first run is untouched and still resolvable
    let snapshot = engine.run_snapshot(first_run.id).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Waiting);
    let resolved = engine
        .resolve_wait("shared-uid", ExternalEvent::new(json!({})))
        .await
        .unwrap();
    assert_eq!(resolved.id, first_run.id);
    assert_eq!(resolved.status, RunStatus::Completed);
}

/// An overdue wait degrades to a failed result; downstream tests still
/// run and the run completes.
#[tokio::test]
async fn timed_out_wait_fails_test_but_completes_run() {
    let waiting = RunnableNode::test(
        "w",
        "Waits briefly",
        Arc::new(FnProcedure::new(|_| {
            Outcome::Wait(
                WaitRequest::new("overdue-uid", "waiting").with_timeout(Duration::from_millis(1)),
            )
        })),
    );
    let suite = RunnableNode::suite("s", "Suite")
        .with_child(waiting)
        .with_child(pass_test("after"));
    let engine = engine_with(suite);
    let session = engine.create_session("s", &no_options()).unwrap();

    let run = engine.run(session.id, "s", IndexMap::new()).await.unwrap();
    assert_eq!(run.status, RunStatus::Waiting);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let resumed = engine.expire_overdue().await;
    assert_eq!(resumed.len(), 1);

    let snapshot = engine.run_snapshot(run.id).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Completed);
    let statuses: Vec<_> = snapshot.results.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![ResultStatus::Fail, ResultStatus::Pass]);
    assert!(snapshot.results[0]
        .message
        .as_deref()
        .is_some_and(|m| m.contains("timed out")));

    // The expired token is gone: late resolution is rejected
    let err = engine
        .resolve_wait("overdue-uid", ExternalEvent::new(json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, CrucibleError::UnknownWaitIdentifier { .. }));
}

/// The background sweep picks up overdue waits without an explicit call.
#[tokio::test]
async fn expiry_sweep_task_resumes_timed_out_runs() {
    let waiting = RunnableNode::test(
        "w",
        "Waits briefly",
        Arc::new(FnProcedure::new(|_| {
            Outcome::Wait(
                WaitRequest::new("sweep-uid", "waiting").with_timeout(Duration::from_millis(1)),
            )
        })),
    );
    let suite = RunnableNode::suite("s", "Suite").with_child(waiting);
    let engine = Arc::new(engine_with(suite));
    let session = engine.create_session("s", &no_options()).unwrap();
    let run = engine.run(session.id, "s", IndexMap::new()).await.unwrap();
    assert_eq!(run.status, RunStatus::Waiting);

    let sweep = crucible_core::spawn_expiry_sweep(Arc::clone(&engine), Duration::from_millis(5));
    tokio::time::sleep(Duration::from_millis(50)).await;
    sweep.abort();

    let snapshot = engine.run_snapshot(run.id).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Completed);
    assert_eq!(snapshot.results[0].status, ResultStatus::Fail);
}

/// Scratch written by one test is visible to a later test in the same
/// session, including across separate runs.
#[tokio::test]
async fn scratch_is_shared_across_tests_and_runs() {
    let writer = RunnableNode::test(
        "writer",
        "Writes scratch",
        Arc::new(FnProcedure::new(|ctx| {
            ctx.scratch().set("handshake.state", json!("opened"));
            Outcome::Pass
        })),
    );
    let reader = RunnableNode::test(
        "reader",
        "Reads scratch",
        Arc::new(FnProcedure::new(|ctx| {
            match ctx.scratch().get("handshake.state") {
                Some(state) if state == json!("opened") => Outcome::Pass,
                _ => Outcome::Fail("scratch state missing".to_string()),
            }
        })),
    );
    let suite = RunnableNode::suite("s", "Suite")
        .with_child(writer)
        .with_child(reader);
    let engine = engine_with(suite);
    let session = engine.create_session("s", &no_options()).unwrap();

    let run = engine.run(session.id, "s", IndexMap::new()).await.unwrap();
    assert!(run.results.iter().all(|r| r.status == ResultStatus::Pass));

    // A second run targeting only the reader still sees the state
    let rerun = engine.run(session.id, "reader", IndexMap::new()).await.unwrap();
    assert_eq!(rerun.results[0].status, ResultStatus::Pass);
}

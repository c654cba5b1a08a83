//! End-to-end scenarios exercising a fully wired `City`, as opposed to the
//! per-crate unit tests that exercise each component in isolation.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use gas::{
    AgentCommand, AgentConfig, BeadStatus, City, CityConfig, Event, EventFilter, Formula, FormulaStep, NewBead,
};

#[tokio::test]
async fn create_close_round_trip() {
    let city = City::in_memory(CityConfig::default());

    let bead = city.beads().create(NewBead::new("Build Tower of Hanoi")).await.unwrap();
    assert_eq!(bead.id, "gc-1");
    assert_eq!(bead.status, BeadStatus::Open);
    assert_eq!(bead.kind, "task");

    city.beads().close("gc-1").await.unwrap();
    assert_eq!(city.beads().get("gc-1").await.unwrap().status, BeadStatus::Closed);
    assert!(city.beads().ready().await.unwrap().is_empty());
}

#[tokio::test]
async fn claim_races_exactly_one_winner() {
    let city = Arc::new(City::in_memory(CityConfig::default()));
    city.beads().create(NewBead::new("task")).await.unwrap();

    let a = {
        let city = Arc::clone(&city);
        tokio::spawn(async move { city.beads().claim("gc-1", "A").await })
    };
    let b = {
        let city = Arc::clone(&city);
        tokio::spawn(async move { city.beads().claim("gc-1", "B").await })
    };
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    let winner = if a.is_ok() { "A" } else { "B" };
    assert!(a.is_ok() != b.is_ok());
    assert!(b.as_ref().err().or(a.as_ref().err()).unwrap().is_already_claimed());

    // A third claim matching the winner is a no-op.
    city.beads().claim("gc-1", winner).await.unwrap();
    let bead = city.beads().get("gc-1").await.unwrap();
    assert_eq!(bead.assignee.as_deref(), Some(winner));
}

#[tokio::test]
async fn molecule_composition_orders_steps_and_substitutes_vars() {
    let city = City::in_memory(CityConfig::default());
    let formula = Formula::new(
        "deploy",
        vec![
            FormulaStep {
                id: "build".to_string(),
                description: "build for {{env}}".to_string(),
                needs: vec![],
            },
            FormulaStep {
                id: "test".to_string(),
                description: "test in {{env}}".to_string(),
                needs: vec!["build".to_string()],
            },
            FormulaStep {
                id: "ship".to_string(),
                description: "ship to {{env}}".to_string(),
                needs: vec!["test".to_string()],
            },
        ],
    );

    let root_id = city
        .beads()
        .mol_cook(&formula, Some("Deploy v2"), &[("env".to_string(), "prod".to_string())])
        .await
        .unwrap();

    let root = city.beads().get(&root_id).await.unwrap();
    assert_eq!(root.kind, "molecule");
    assert_eq!(root.step_ref.as_deref(), Some("deploy"));
    assert_eq!(root.title, "Deploy v2");

    let children = city.beads().children(&root_id).await.unwrap();
    let refs: Vec<&str> = children.iter().map(|c| c.step_ref.as_deref().unwrap()).collect();
    assert_eq!(refs, vec!["build", "test", "ship"]);
    let needs: Vec<Vec<String>> = children.iter().map(|c| c.needs.clone()).collect();
    assert_eq!(
        needs,
        vec![Vec::<String>::new(), vec!["build".to_string()], vec!["test".to_string()]]
    );
    assert_eq!(children[0].description.as_deref(), Some("build for prod"));
}

#[tokio::test]
async fn event_seq_monotonic_under_concurrent_writers() {
    let city = Arc::new(City::in_memory(CityConfig::default()));
    let mut handles = Vec::new();
    for writer in 0..10 {
        let city = Arc::clone(&city);
        handles.push(tokio::spawn(async move {
            for i in 0..10 {
                city.events()
                    .try_record(Event::new("bead.created", format!("writer-{writer}"), format!("gc-{i}"), "noted"))
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let events = city.events().list(&EventFilter::default()).await.unwrap();
    assert_eq!(events.len(), 100);
    let mut seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    seqs.sort_unstable();
    let expected: Vec<u64> = (1..=100).collect();
    assert_eq!(seqs, expected);
}

#[tokio::test]
async fn reconcile_to_target_starts_mayor_and_worker_pool() {
    let echo_then_sleep = AgentCommand::new("sh").with_args(vec![
        "-c".to_string(),
        "echo $GC_AGENT; sleep 5".to_string(),
    ]);
    let config = CityConfig {
        agents: vec![
            AgentConfig::fixed("mayor", echo_then_sleep.clone()),
            AgentConfig::pool(
                "worker",
                echo_then_sleep,
                2,
                2,
                AgentCommand::new("echo").with_args(vec!["2".to_string()]),
            ),
        ],
        ..CityConfig::default()
    };
    let city = City::in_memory(config);

    let result = city.reconcile().await.unwrap();
    let mut started = result.started.clone();
    started.sort();
    assert_eq!(
        started,
        vec!["mayor".to_string(), "worker-1".to_string(), "worker-2".to_string()]
    );

    let mut names = city.sessions().active_names().await.unwrap();
    names.sort();
    assert_eq!(names, vec!["mayor".to_string(), "worker-1".to_string(), "worker-2".to_string()]);

    // Each instance's GC_AGENT env var was its own instance name, confirmed
    // via the session's captured stdout (spec.md §6, "Agent environment").
    tokio::time::sleep(Duration::from_millis(200)).await;
    for name in &names {
        let output = city.sessions().peek(name, 5).await.unwrap();
        assert!(output.iter().any(|line| line == name), "expected {name} in {output:?}");
    }

    // Clean up the spawned sleeps so the test doesn't leak processes.
    for name in &names {
        let _ = city.sessions().stop(name).await;
    }
}

#[tokio::test]
async fn crash_backoff_blocks_restart_until_quarantine() {
    use gas::{BackoffConfig, QuarantineConfig};

    let config = CityConfig {
        agents: vec![AgentConfig::fixed("flaky", AgentCommand::new("false"))],
        backoff: BackoffConfig {
            base: Duration::from_millis(1),
            factor: 1.0,
            ceiling: Duration::from_millis(1),
            jitter_fraction: 0.0,
        },
        quarantine: QuarantineConfig {
            threshold: 2,
            window: Duration::from_secs(60),
        },
        ..CityConfig::default()
    };
    let city = City::in_memory(config);

    // `false` exits immediately, so every subsequent tick observes the
    // started session as no longer running and counts it as a crash.
    let first = city.reconcile().await.unwrap();
    assert_eq!(first.started, vec!["flaky".to_string()]);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut quarantined = false;
    for _ in 0..4 {
        let result = city.reconcile().await.unwrap();
        if result.quarantined.contains(&"flaky".to_string()) {
            quarantined = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(quarantined, "flaky should have been quarantined after repeated crashes");

    // Once quarantined, no further start attempts happen.
    let after = city.reconcile().await.unwrap();
    assert_eq!(after.skipped, vec!["flaky".to_string()]);
}

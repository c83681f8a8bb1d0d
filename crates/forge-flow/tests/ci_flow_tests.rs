//! End-to-end convergence tests: supervisor-driven CI flow against the
//! in-memory cluster.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use forge_core::catalog::{
    CI, FLOW_GRAPH, PIPELINE, PIPELINE_RESOURCE, PIPELINE_RUN, SERVICE_ACCOUNT, TASK,
};
use forge_core::object::Envelope;
use forge_core::{MemoryCluster, ResourceCatalog};

use forge_flow::config::DEFAULT_SERVICE_ACCOUNT;
use forge_flow::datasource::DataSource;
use forge_flow::intent::{AckState, CiSpec, Intent, RequestMeta};
use forge_flow::reconcile::ci_reconciler;
use forge_flow::supervisor::Supervisor;
use forge_flow::{FlowConfig, CI_PROFILE};

async fn seeded_datasource() -> DataSource {
    let ds = DataSource::new(
        Arc::new(MemoryCluster::new()),
        Arc::new(ResourceCatalog::builtin(&[])),
    );

    let account = Envelope::new("v1", "ServiceAccount", DEFAULT_SERVICE_ACCOUNT, "forge-ops")
        .with_section("secrets", json!([{"name": "default-token"}]));
    ds.apply("forge-ops", SERVICE_ACCOUNT, DEFAULT_SERVICE_ACCOUNT, &account, true)
        .await
        .expect("seed service account");

    ds
}

fn ci_intent() -> Intent<CiSpec> {
    Intent::new(
        "CI",
        "app-main",
        "forge",
        CiSpec {
            git_url: Some("http://git.example/org/app.git".into()),
            branch: Some("main".into()),
            commit_id: Some("abc123".into()),
            meta: RequestMeta {
                flow_id: Some("flow-1".into()),
                step_name: Some("build".into()),
                uuid: Some("u-1".into()),
                ..RequestMeta::default()
            },
            ..CiSpec::default()
        },
    )
}

async fn eventually<F, Fut>(what: &str, check: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..150 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

// The §-scenario: a CI intent for app.git/main derives run name app-main,
// the full child graph is created, and a later Succeeded condition marks
// the intent Done with a single SUCCESS token.
#[tokio::test]
async fn ci_intent_converges_and_completes_under_the_supervisor() {
    let ds = seeded_datasource().await;
    let config = FlowConfig::default();

    let mut supervisor = Supervisor::new();
    let reconciler = ci_reconciler(ds.clone(), config.clone());
    supervisor
        .add(move |cancel, errors| reconciler.run(cancel, errors))
        .expect("register reconciler");
    let _errors = supervisor.start().expect("start supervisor");

    ds.apply("forge", CI, "app-main", &ci_intent().to_envelope().unwrap(), true)
        .await
        .expect("create intent");

    let probe = ds.clone();
    eventually("pipeline run creation", || {
        let ds = probe.clone();
        async move { ds.get("forge-ops", PIPELINE_RUN, "app-main", &[]).await.is_ok() }
    })
    .await;

    // The whole dependent chain exists.
    for (kind, name) in [
        (TASK, CI_PROFILE.task_name),
        (PIPELINE, CI_PROFILE.pipeline_name),
        (FLOW_GRAPH, CI_PROFILE.graph_name),
        (PIPELINE_RESOURCE, "app-main"),
        (FLOW_GRAPH, "forge-build-graph-app-main"),
    ] {
        assert!(
            ds.get("forge-ops", kind, name, &[]).await.is_ok(),
            "missing {kind}/{name}"
        );
    }

    // The run graph is owned by the live run.
    let run = ds.get("forge-ops", PIPELINE_RUN, "app-main", &[]).await.unwrap();
    let graph = ds
        .get("forge-ops", FLOW_GRAPH, "forge-build-graph-app-main", &[])
        .await
        .unwrap();
    assert_eq!(
        graph.metadata.owner_references[0].uid,
        run.metadata.uid.clone().unwrap()
    );

    // Terminal success condition completes the intent.
    let mut done_run = run;
    done_run.sections.insert(
        "status".into(),
        json!({
            "conditions": [{
                "reason": "Succeeded",
                "status": "True",
                "type": "Succeeded",
            }]
        }),
    );
    ds.apply("forge-ops", PIPELINE_RUN, "app-main", &done_run, false)
        .await
        .expect("set condition");

    let probe = ds.clone();
    eventually("intent completion", || {
        let ds = probe.clone();
        async move {
            let envelope = ds.get("forge", CI, "app-main", &[]).await.unwrap();
            let intent: Intent<CiSpec> = Intent::from_envelope(&envelope).unwrap();
            intent.spec.meta.done
        }
    })
    .await;

    let envelope = ds.get("forge", CI, "app-main", &[]).await.unwrap();
    let intent: Intent<CiSpec> = Intent::from_envelope(&envelope).unwrap();
    assert_eq!(intent.spec.meta.ack_states, vec![AckState::Success]);

    supervisor.stop();
}

// Resubmitting the same intent recreates the run under the same name with a
// fresh UID, and the run graph follows the new run.
#[tokio::test]
async fn resubmission_recreates_the_run_with_a_fresh_uid() {
    let ds = seeded_datasource().await;
    let config = FlowConfig::default();

    let mut supervisor = Supervisor::new();
    let reconciler = ci_reconciler(ds.clone(), config.clone());
    supervisor
        .add(move |cancel, errors| reconciler.run(cancel, errors))
        .expect("register reconciler");
    let _errors = supervisor.start().expect("start supervisor");

    ds.apply("forge", CI, "app-main", &ci_intent().to_envelope().unwrap(), true)
        .await
        .expect("create intent");

    let probe = ds.clone();
    eventually("first pipeline run", || {
        let ds = probe.clone();
        async move { ds.get("forge-ops", PIPELINE_RUN, "app-main", &[]).await.is_ok() }
    })
    .await;
    let first_uid = ds
        .get("forge-ops", PIPELINE_RUN, "app-main", &[])
        .await
        .unwrap()
        .metadata
        .uid
        .unwrap();

    // Resubmit with a new commit: the intent event drives another
    // convergence, which deletes and recreates the run.
    let mut resubmitted = ci_intent();
    resubmitted.spec.commit_id = Some("def456".into());
    ds.apply("forge", CI, "app-main", &resubmitted.to_envelope().unwrap(), true)
        .await
        .expect("resubmit intent");

    let probe = ds.clone();
    let stale = first_uid.clone();
    eventually("run recreation", || {
        let ds = probe.clone();
        let stale = stale.clone();
        async move {
            ds.get("forge-ops", PIPELINE_RUN, "app-main", &[])
                .await
                .is_ok_and(|run| run.metadata.uid.as_deref() != Some(stale.as_str()))
        }
    })
    .await;

    let run = ds.get("forge-ops", PIPELINE_RUN, "app-main", &[]).await.unwrap();
    let graph = ds
        .get("forge-ops", FLOW_GRAPH, "forge-build-graph-app-main", &[])
        .await
        .unwrap();
    assert_eq!(
        graph.metadata.owner_references[0].uid,
        run.metadata.uid.unwrap(),
        "run graph owner must follow the recreated run"
    );

    supervisor.stop();
}

mod common;

use converge_core::{FileInfo, FileMap, ResourceKey};
use converge_provisioner::payload::Payload;
use converge_provisioner::plan::{self, ActionKind, OperationKind, PlanAction, PlanHints};
use converge_provisioner::resource::{self, Resource};
use converge_provisioner::resources::backend_service::{self, BackendService};
use converge_provisioner::resources::bucket::Bucket;
use converge_provisioner::resources::serverless_neg::ServerlessNeg;
use converge_provisioner::resources::service;
use converge_provisioner::resources::sql_instance::SqlInstance;
use serde_json::json;

use common::Fakes;

fn files(n: usize) -> FileMap {
    (0..n)
        .map(|i| (format!("f{i}.js"), FileInfo::of(format!("body {i}").as_bytes())))
        .collect()
}

fn observed(values: serde_json::Value) -> Payload {
    serde_json::from_value(values).unwrap()
}

#[test]
fn bucket_location_change_recreates_with_file_steps() {
    let fakes = Fakes::new();
    let mut bucket = Bucket::new("assets", fakes.buckets.clone());
    resource::observe(
        &mut bucket,
        Some(observed(json!({"name": "assets", "location": "us", "files": {}}))),
    )
    .unwrap();
    bucket.configure(&json!({"location": "eu"})).unwrap();
    bucket.want_files(files(3)).unwrap();

    let action = plan::plan_resource(&bucket, &PlanHints::default()).unwrap();

    assert_eq!(action.action, ActionKind::Recreate);
    let kinds: Vec<OperationKind> = action.operations.iter().map(|op| op.kind).collect();
    assert_eq!(kinds, [OperationKind::Delete, OperationKind::Create]);
    assert_eq!(action.operations[0].steps, 1);
    assert_eq!(action.operations[1].steps, 1 + 3);
    assert_eq!(action.total_steps(), 5);
    assert!(action.description.contains("location"));
}

#[test]
fn unwanted_existing_resource_deletes_by_identity_only() {
    let fakes = Fakes::new();
    let mut bucket = Bucket::new("assets", fakes.buckets.clone());
    resource::observe(
        &mut bucket,
        Some(observed(json!({"name": "assets", "location": "us", "versioning": true}))),
    )
    .unwrap();

    let action = plan::plan_resource(&bucket, &PlanHints::default()).unwrap();

    assert_eq!(action.action, ActionKind::Delete);
    assert_eq!(action.operations.len(), 1);
    let payload = &action.operations[0].payload;
    assert_eq!(payload.keys().collect::<Vec<_>>(), ["name"]);
    assert_eq!(payload.str("name"), Some("assets"));
}

#[test]
fn absent_and_unwanted_is_a_noop() {
    let fakes = Fakes::new();
    let bucket = Bucket::new("assets", fakes.buckets.clone());
    let action = plan::plan_resource(&bucket, &PlanHints::default()).unwrap();
    assert!(action.is_noop());
    assert!(action.operations.is_empty());
}

#[test]
fn fresh_resource_creates_with_every_wanted_field() {
    let fakes = Fakes::new();
    let mut instance = SqlInstance::new("main", fakes.sql_instances.clone());
    instance
        .configure(&json!({
            "region": "europe-west1",
            "database_version": "POSTGRES_16",
            "tier": "db-f1-micro",
        }))
        .unwrap();

    let action = plan::plan_resource(&instance, &PlanHints::default()).unwrap();

    assert_eq!(action.action, ActionKind::Create);
    let payload = &action.operations[0].payload;
    assert_eq!(payload.str("region"), Some("europe-west1"));
    assert_eq!(payload.get("backups_enabled"), Some(&json!(true)));
    // Provider-assigned outputs are never part of a create.
    assert!(!payload.contains("connection_name"));
    assert_eq!(action.total_steps(), 1);
}

#[test]
fn update_carries_only_changed_fields_and_identity() {
    let fakes = Fakes::new();
    let mut instance = SqlInstance::new("main", fakes.sql_instances.clone());
    resource::observe(
        &mut instance,
        Some(observed(json!({
            "name": "main",
            "region": "europe-west1",
            "database_version": "POSTGRES_16",
            "tier": "db-f1-micro",
            "database_flags": {},
            "backups_enabled": true,
            "connection_name": "demo:europe-west1:main",
        }))),
    )
    .unwrap();
    instance
        .configure(&json!({
            "region": "europe-west1",
            "database_version": "POSTGRES_16",
            "tier": "db-custom-2-7680",
        }))
        .unwrap();

    let action = plan::plan_resource(&instance, &PlanHints::default()).unwrap();

    assert_eq!(action.action, ActionKind::Update);
    let mut keys: Vec<&str> = action.operations[0].payload.keys().collect();
    keys.sort();
    assert_eq!(keys, ["name", "tier"]);
}

#[test]
fn planning_twice_without_apply_is_stable() {
    let fakes = Fakes::new();
    let mut instance = SqlInstance::new("main", fakes.sql_instances.clone());
    instance
        .configure(&json!({
            "region": "europe-west1",
            "database_version": "POSTGRES_16",
            "tier": "db-f1-micro",
        }))
        .unwrap();

    let first = plan::plan_resource(&instance, &PlanHints::default()).unwrap();
    let second = plan::plan_resource(&instance, &PlanHints::default()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn cdn_defaults_do_not_cause_an_update() {
    let fakes = Fakes::new();
    let mut backend = BackendService::new("static", fakes.backend_services.clone());
    resource::observe(
        &mut backend,
        Some(observed(json!({
            "name": "static",
            "neg": null,
            "bucket": "assets",
            "cdn": {
                "cache_mode": "CACHE_ALL_STATIC",
                "default_ttl": 3600,
                "max_ttl": 86400,
                "client_ttl": 3600,
                "negative_caching": false,
                "serve_while_stale": 0,
            },
        }))),
    )
    .unwrap();
    backend
        .configure(&json!({"bucket": "assets", "cdn": {}}))
        .unwrap();

    let action = plan::plan_resource(&backend, &PlanHints::default()).unwrap();
    assert!(action.is_noop(), "{}", action.description);
}

fn replaced(kind: &str, name: &str) -> PlanHints {
    let mut hints = PlanHints::default();
    hints.record(&PlanAction {
        key: ResourceKey::new(kind, name),
        action: ActionKind::Recreate,
        description: String::new(),
        operations: Vec::new(),
    });
    hints
}

#[test]
fn replaced_upstream_updates_plain_references() {
    let fakes = Fakes::new();
    let mut backend = BackendService::new("api", fakes.backend_services.clone());
    resource::observe(
        &mut backend,
        Some(observed(json!({"name": "api", "neg": "api-neg", "bucket": null, "cdn": null}))),
    )
    .unwrap();
    backend.configure(&json!({"neg": "api-neg"})).unwrap();

    let unchanged = plan::plan_resource(&backend, &PlanHints::default()).unwrap();
    assert!(unchanged.is_noop());

    let action = plan::plan_resource(&backend, &replaced("serverless_neg", "api-neg")).unwrap();
    assert_eq!(action.action, ActionKind::Update);
    assert_eq!(action.operations[0].payload.str("neg"), Some("api-neg"));
    assert!(action.description.contains("dependency replaced"));
}

#[test]
fn replaced_upstream_recreates_force_new_references() {
    let fakes = Fakes::new();
    let mut neg = ServerlessNeg::new("api-neg", fakes.serverless_negs.clone());
    resource::observe(
        &mut neg,
        Some(observed(json!({
            "name": "api-neg",
            "region": "europe-west1",
            "service": "api",
        }))),
    )
    .unwrap();
    neg.configure(&json!({"region": "europe-west1", "service": "api"}))
        .unwrap();

    let action = plan::plan_resource(&neg, &replaced(service::KIND, "api")).unwrap();
    assert_eq!(action.action, ActionKind::Recreate);
    assert_eq!(action.operations.len(), 2);
}

#[test]
fn references_become_dependencies() {
    let fakes = Fakes::new();
    let mut backend = BackendService::new("api", fakes.backend_services.clone());
    backend.configure(&json!({"neg": "api-neg"})).unwrap();
    let deps = resource::dependencies(&backend);
    assert_eq!(
        deps.into_iter().collect::<Vec<_>>(),
        [ResourceKey::new("serverless_neg", "api-neg")]
    );
    assert_eq!(backend.kind(), backend_service::KIND);
}

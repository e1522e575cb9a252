//! Bucket reconciliation against in-memory cluster and S3 fakes

mod common;

use common::{
    mark_deleted, secret_data, secret_value, FakeEventSink, FakeObjectStorage, FakeRecordStore,
    FakeSecretStore, FakeStorageConnector,
};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use objectstore_provisioner::constants::{
    ACCESS_KEY_ID_NAME, BUCKET_FINALIZER, BUCKET_NAME, ENDPOINT_NAME, REGION_NAME,
    SECRET_ACCESS_KEY_NAME,
};
use objectstore_provisioner::controller::bucket::BucketConnector;
use objectstore_provisioner::controller::conditions::{
    find_condition, has_condition, Reason, TYPE_FAILED, TYPE_READY, TYPE_SYNCED,
};
use objectstore_provisioner::controller::managed::{
    Connector, ExternalClient, ManagedReconciler, ManagedResource, ReconcileSettings,
};
use objectstore_provisioner::crd::{Bucket, BucketDeletionPolicy, BucketSpec, SecretReference};
use std::sync::Arc;
use std::time::Duration;

const POLL: Duration = Duration::from_secs(3600);
const CREATE_REQUEUE: Duration = Duration::from_secs(2);

struct Harness {
    records: Arc<FakeRecordStore<Bucket>>,
    secrets: Arc<FakeSecretStore>,
    events: Arc<FakeEventSink>,
    storage: Arc<FakeObjectStorage>,
    connector: BucketConnector,
    reconciler: ManagedReconciler<Bucket, BucketConnector>,
}

impl Harness {
    fn new() -> Self {
        let records = FakeRecordStore::<Bucket>::new();
        let secrets = FakeSecretStore::new();
        let events = FakeEventSink::new();
        let storage = FakeObjectStorage::new();

        secrets.insert(
            "app",
            "user-creds",
            secret_data(&[(ACCESS_KEY_ID_NAME, "AK"), (SECRET_ACCESS_KEY_NAME, "SK")]),
        );

        let connector = BucketConnector::new(
            secrets.clone(),
            Arc::new(FakeStorageConnector {
                storage: storage.clone(),
            }),
            records.clone(),
            events.clone(),
        );
        let reconciler = ManagedReconciler::new(
            connector.clone(),
            records.clone(),
            events.clone(),
            ReconcileSettings {
                poll_interval: POLL,
                create_requeue: CREATE_REQUEUE,
                timeout: Duration::from_secs(30),
            },
        );

        Self {
            records,
            secrets,
            events,
            storage,
            connector,
            reconciler,
        }
    }

    /// Reconcile the last written state of `name`
    async fn reconcile_stored(&self, name: &str) -> Action {
        let record = self.records.get(name);
        self.reconciler
            .reconcile(&record)
            .await
            .expect("reconcile should succeed")
    }
}

fn bucket(policy: BucketDeletionPolicy) -> Bucket {
    let mut record = Bucket::new(
        "assets",
        BucketSpec {
            credentials_secret_ref: SecretReference::new("app", "user-creds"),
            endpoint_url: "https://objects.example.com".to_string(),
            bucket_name: Some("app-assets".to_string()),
            region: "lpg".to_string(),
            bucket_deletion_policy: policy,
            write_connection_secret_to_ref: Some(SecretReference::new("app", "assets-bucket")),
        },
    );
    record.metadata.uid = Some("7f0c2a4e-0000-4000-8000-000000000001".to_string());
    record
}

#[tokio::test]
async fn test_new_bucket_is_created_and_connection_secret_written() {
    let h = Harness::new();

    let action = h
        .reconciler
        .reconcile(&bucket(BucketDeletionPolicy::DeleteIfEmpty))
        .await
        .expect("create should succeed");
    assert_eq!(action, Action::requeue(CREATE_REQUEUE));

    assert_eq!(h.storage.region_of("app-assets").as_deref(), Some("lpg"));
    let connects = h.storage.connects.lock().unwrap().clone();
    assert_eq!(
        connects,
        vec![(
            "https://objects.example.com".to_string(),
            "lpg".to_string(),
            "AK".to_string()
        )]
    );

    let stored = h.records.get("assets");
    assert_eq!(stored.finalizers(), &[BUCKET_FINALIZER.to_string()]);
    let status = stored.status.clone().expect("status should be written");
    assert_eq!(status.bucket_name.as_deref(), Some("app-assets"));
    assert_eq!(status.region.as_deref(), Some("lpg"));
    assert_eq!(status.endpoint.as_deref(), Some("objects.example.com"));

    let secret = h
        .secrets
        .find("app", "assets-bucket")
        .expect("connection secret should exist");
    assert_eq!(secret.data.as_ref().map(|d| d.len()), Some(5));
    assert_eq!(secret_value(&secret, BUCKET_NAME).as_deref(), Some("app-assets"));
    assert_eq!(
        secret_value(&secret, ENDPOINT_NAME).as_deref(),
        Some("https://objects.example.com")
    );
    assert_eq!(secret_value(&secret, REGION_NAME).as_deref(), Some("lpg"));
    assert_eq!(secret_value(&secret, ACCESS_KEY_ID_NAME).as_deref(), Some("AK"));
    let owners = secret.metadata.owner_references.unwrap_or_default();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].kind, "Bucket");
    assert_eq!(owners[0].name, "assets");

    assert_eq!(h.events.reasons(), vec!["Created".to_string()]);
}

#[tokio::test]
async fn test_existing_bucket_becomes_ready() {
    let h = Harness::new();
    h.reconciler
        .reconcile(&bucket(BucketDeletionPolicy::DeleteIfEmpty))
        .await
        .expect("create should succeed");

    let action = h.reconcile_stored("assets").await;
    assert_eq!(action, Action::requeue(POLL));

    let stored = h.records.get("assets");
    assert!(has_condition(stored.conditions(), TYPE_READY, true, Reason::Available));
    assert!(has_condition(
        stored.conditions(),
        TYPE_SYNCED,
        true,
        Reason::ReconcileSuccess
    ));
    assert!(find_condition(stored.conditions(), TYPE_FAILED).is_none());
}

#[tokio::test]
async fn test_removed_connection_secret_is_restored() {
    let h = Harness::new();
    h.reconciler
        .reconcile(&bucket(BucketDeletionPolicy::DeleteIfEmpty))
        .await
        .expect("create should succeed");
    h.secrets.insert("app", "assets-bucket", secret_data(&[]));

    let action = h.reconcile_stored("assets").await;
    assert_eq!(action, Action::requeue(POLL));

    let secret = h.secrets.find("app", "assets-bucket").unwrap();
    assert_eq!(secret.data.as_ref().map(|d| d.len()), Some(5));
}

#[tokio::test]
async fn test_delete_all_empties_and_removes_the_bucket() {
    let h = Harness::new();
    h.reconciler
        .reconcile(&bucket(BucketDeletionPolicy::DeleteAll))
        .await
        .expect("create should succeed");
    h.storage.put_objects("app-assets", 2500);

    let mut record = h.records.get("assets");
    mark_deleted(&mut record);
    let action = h
        .reconciler
        .reconcile(&record)
        .await
        .expect("deletion should succeed");
    assert_eq!(action, Action::await_change());

    assert_eq!(h.storage.region_of("app-assets"), None);
    let stored = h.records.get("assets");
    assert!(stored.finalizers().is_empty());
    assert!(has_condition(stored.conditions(), TYPE_READY, false, Reason::Deleting));
    assert_eq!(
        h.events.reasons(),
        vec!["Created".to_string(), "Deleted".to_string()]
    );
}

#[tokio::test]
async fn test_non_empty_bucket_is_kept_with_delete_if_empty() {
    let h = Harness::new();
    h.reconciler
        .reconcile(&bucket(BucketDeletionPolicy::DeleteIfEmpty))
        .await
        .expect("create should succeed");
    h.storage.put_objects("app-assets", 3);

    let mut record = h.records.get("assets");
    mark_deleted(&mut record);
    let err = h
        .reconciler
        .reconcile(&record)
        .await
        .expect_err("deleting a non-empty bucket should fail");
    assert!(err.to_string().contains("not empty"), "{err}");

    assert_eq!(h.storage.objects("app-assets").len(), 3);
    let stored = h.records.get("assets");
    assert_eq!(stored.finalizers(), &[BUCKET_FINALIZER.to_string()]);
    let failed = find_condition(stored.conditions(), TYPE_FAILED).expect("Failed condition");
    assert_eq!(failed.reason.as_deref(), Some("DeletionFailed"));
    assert!(failed
        .message
        .as_deref()
        .is_some_and(|m| m.starts_with("cannot deprovision bucket")));
    assert!(has_condition(
        stored.conditions(),
        TYPE_SYNCED,
        false,
        Reason::ReconcileError
    ));
    assert_eq!(h.events.last().map(|e| e.reason).as_deref(), Some("Failed"));
}

#[tokio::test]
async fn test_locked_object_stops_delete_all() {
    let h = Harness::new();
    h.reconciler
        .reconcile(&bucket(BucketDeletionPolicy::DeleteAll))
        .await
        .expect("create should succeed");
    h.storage.put_objects("app-assets", 5);
    h.storage.lock_object("object-00002");

    let mut record = h.records.get("assets");
    mark_deleted(&mut record);
    let err = h
        .reconciler
        .reconcile(&record)
        .await
        .expect_err("a locked object should block deletion");
    assert!(err.to_string().contains("object-00002"), "{err}");

    assert_eq!(h.storage.objects("app-assets"), vec!["object-00002".to_string()]);
    assert!(h.records.get("assets").has_finalizer());
}

#[tokio::test]
async fn test_missing_credentials_secret_fails_connect() {
    let h = Harness::new();
    let mut record = bucket(BucketDeletionPolicy::DeleteIfEmpty);
    record.spec.credentials_secret_ref = SecretReference::new("app", "missing");

    let err = h
        .reconciler
        .reconcile(&record)
        .await
        .expect_err("connect should fail");
    assert!(err.to_string().contains("cannot connect to external API"), "{err}");

    let stored = h.records.get("assets");
    assert!(has_condition(stored.conditions(), TYPE_READY, false, Reason::Available));
    let failed = find_condition(stored.conditions(), TYPE_FAILED).expect("Failed condition");
    assert_eq!(failed.reason.as_deref(), Some("ProvisioningFailed"));
    assert!(h.storage.region_of("app-assets").is_none());
}

#[tokio::test]
async fn test_bucket_owned_by_another_account_is_reported() {
    let h = Harness::new();
    h.storage.add_foreign_bucket("app-assets");

    let err = h
        .reconciler
        .reconcile(&bucket(BucketDeletionPolicy::DeleteIfEmpty))
        .await
        .expect_err("observe should fail");
    assert!(err.to_string().contains("cannot observe external resource"), "{err}");
    assert_eq!(h.events.reasons(), vec!["Failed".to_string()]);
}

#[tokio::test]
async fn test_renamed_bucket_is_rejected() {
    let h = Harness::new();
    h.reconciler
        .reconcile(&bucket(BucketDeletionPolicy::DeleteIfEmpty))
        .await
        .expect("create should succeed");

    let mut record = h.records.get("assets");
    record.spec.bucket_name = Some("renamed".to_string());
    let err = h
        .reconciler
        .reconcile(&record)
        .await
        .expect_err("rename should fail");
    assert!(err.to_string().contains("you cannot rename it"), "{err}");
    assert!(h.storage.region_of("renamed").is_none());
}

#[tokio::test]
async fn test_never_provisioned_bucket_is_released() {
    let h = Harness::new();
    let mut record = bucket(BucketDeletionPolicy::DeleteIfEmpty);
    record.finalizers_mut().push(BUCKET_FINALIZER.to_string());
    mark_deleted(&mut record);

    let action = h
        .reconciler
        .reconcile(&record)
        .await
        .expect("deletion should succeed");
    assert_eq!(action, Action::await_change());
    assert!(h.records.get("assets").finalizers().is_empty());
    assert!(h.events.reasons().is_empty());
}

#[tokio::test]
async fn test_bucket_removed_out_of_band_is_finalized() {
    let h = Harness::new();
    h.reconciler
        .reconcile(&bucket(BucketDeletionPolicy::DeleteAll))
        .await
        .expect("create should succeed");
    h.storage.remove_bucket("app-assets");

    let mut record = h.records.get("assets");
    mark_deleted(&mut record);
    let action = h
        .reconciler
        .reconcile(&record)
        .await
        .expect("a missing bucket counts as deleted");
    assert_eq!(action, Action::await_change());

    let stored = h.records.get("assets");
    assert!(stored.finalizers().is_empty());
    assert!(find_condition(stored.conditions(), TYPE_FAILED).is_none());
    assert_eq!(h.events.reasons(), vec!["Created".to_string()]);
}

#[tokio::test]
async fn test_create_on_owned_bucket_is_idempotent() {
    let h = Harness::new();
    let mut record = bucket(BucketDeletionPolicy::DeleteIfEmpty);
    let client = h.connector.connect(&record).await.expect("connect should succeed");

    client.create(&mut record).await.expect("first create should succeed");
    let first = record.status.clone().and_then(|s| s.bucket_name);
    client.create(&mut record).await.expect("second create should succeed");

    assert_eq!(first.as_deref(), Some("app-assets"));
    assert_eq!(record.status.and_then(|s| s.bucket_name), first);
    assert_eq!(h.storage.bucket_names(), vec!["app-assets".to_string()]);
}

#[tokio::test]
async fn test_successful_create_clears_earlier_failure() {
    let h = Harness::new();
    let mut record = bucket(BucketDeletionPolicy::DeleteIfEmpty);
    record.spec.credentials_secret_ref = SecretReference::new("app", "late-creds");
    h.reconciler
        .reconcile(&record)
        .await
        .expect_err("connect should fail without credentials");
    assert!(find_condition(h.records.get("assets").conditions(), TYPE_FAILED).is_some());

    h.secrets.insert(
        "app",
        "late-creds",
        secret_data(&[(ACCESS_KEY_ID_NAME, "AK"), (SECRET_ACCESS_KEY_NAME, "SK")]),
    );
    let action = h.reconcile_stored("assets").await;
    assert_eq!(action, Action::requeue(CREATE_REQUEUE));

    let stored = h.records.get("assets");
    assert!(find_condition(stored.conditions(), TYPE_FAILED).is_none());
    assert!(has_condition(
        stored.conditions(),
        TYPE_SYNCED,
        true,
        Reason::ReconcileSuccess
    ));
}

#[tokio::test]
async fn test_region_change_of_provisioned_bucket_is_rejected() {
    let h = Harness::new();
    h.reconciler
        .reconcile(&bucket(BucketDeletionPolicy::DeleteIfEmpty))
        .await
        .expect("create should succeed");

    let mut record = h.records.get("assets");
    record.spec.region = "rma".to_string();
    let err = h
        .reconciler
        .reconcile(&record)
        .await
        .expect_err("region change should fail");
    let message = err.to_string();
    assert!(message.contains("previously created in region \"lpg\""), "{message}");
    assert!(message.contains("change the region to \"rma\""), "{message}");

    let stored = h.records.get("assets");
    assert_eq!(stored.status.as_ref().and_then(|s| s.region.as_deref()), Some("lpg"));
    assert_eq!(h.storage.region_of("app-assets").as_deref(), Some("lpg"));
    assert_eq!(h.storage.bucket_names(), vec!["app-assets".to_string()]);
}

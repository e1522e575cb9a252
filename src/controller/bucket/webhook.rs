//! # Bucket Admission Webhook
//!
//! Validates `Bucket` create and update requests.
//!
//! Once a bucket has been provisioned its name, region and connection secret
//! reference are fixed. Deletes are always allowed.

use crate::crd::Bucket;
use axum::{routing::post, Json, Router};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::DynamicObject;
use kube::ResourceExt;
use thiserror::Error;
use tracing::{debug, warn};

/// Path the API server posts `Bucket` admission reviews to
pub const VALIDATE_BUCKET_PATH: &str = "/validate-storage-microscaler-io-v1-bucket";

/// Reason a request was denied
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(String);

/// Create: every given secret reference needs a name and namespace
pub fn validate_bucket_create(bucket: &Bucket) -> Result<(), ValidationError> {
    if !bucket.spec.credentials_secret_ref.is_complete() {
        return Err(ValidationError(
            ".spec.credentialsSecretRef name and namespace are required".to_string(),
        ));
    }
    if let Some(secret_ref) = &bucket.spec.write_connection_secret_to_ref {
        if !secret_ref.is_complete() {
            return Err(ValidationError(
                ".spec.writeConnectionSecretToRef name and namespace are required".to_string(),
            ));
        }
    }
    Ok(())
}

/// Update: name, region and connection secret reference are immutable once provisioned
pub fn validate_bucket_update(old: &Bucket, new: &Bucket) -> Result<(), ValidationError> {
    validate_bucket_create(new)?;

    let Some(provisioned) = old.observed_bucket_name() else {
        return Ok(());
    };
    if new.bucket_name() != provisioned {
        return Err(ValidationError(format!(
            "a bucket named {provisioned:?} has been created already, you cannot rename it"
        )));
    }
    if new.spec.region != old.spec.region {
        return Err(ValidationError(format!(
            "a bucket named {provisioned:?} has been created already, you cannot change the region"
        )));
    }
    if new.spec.write_connection_secret_to_ref != old.spec.write_connection_secret_to_ref {
        return Err(ValidationError(format!(
            "a bucket named {provisioned:?} has been created already, you cannot change the connection secret reference"
        )));
    }
    Ok(())
}

/// Decide an admission request
pub fn review(request: &AdmissionRequest<Bucket>) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);
    let verdict = match (&request.operation, &request.object, &request.old_object) {
        (Operation::Create, Some(bucket), _) => validate_bucket_create(bucket),
        (Operation::Update, Some(new), Some(old)) => validate_bucket_update(old, new),
        (Operation::Update | Operation::Create, _, _) => {
            return AdmissionResponse::invalid("admission request is missing the Bucket object");
        }
        _ => Ok(()),
    };

    match verdict {
        Ok(()) => {
            debug!(name = %request.name, operation = ?request.operation, "bucket admitted");
            response
        }
        Err(err) => {
            let name = request
                .object
                .as_ref()
                .map(|bucket| bucket.name_any())
                .unwrap_or_else(|| request.name.clone());
            warn!(name = %name, reason = %err, "bucket rejected");
            response.deny(err.to_string())
        }
    }
}

async fn validate_handler(
    Json(body): Json<AdmissionReview<Bucket>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<Bucket> = match body.try_into() {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, "invalid admission review");
            return Json(AdmissionResponse::invalid(err.to_string()).into_review());
        }
    };
    Json(review(&request).into_review())
}

/// Router serving the `Bucket` validation endpoint
pub fn router() -> Router {
    Router::new().route(VALIDATE_BUCKET_PATH, post(validate_handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{BucketDeletionPolicy, BucketSpec, BucketStatus, SecretReference};

    fn bucket(name: Option<&str>, region: &str, secret: Option<SecretReference>) -> Bucket {
        Bucket::new(
            "assets",
            BucketSpec {
                credentials_secret_ref: SecretReference::new("app", "creds"),
                endpoint_url: "objects.example.com".to_string(),
                bucket_name: name.map(str::to_string),
                region: region.to_string(),
                bucket_deletion_policy: BucketDeletionPolicy::DeleteIfEmpty,
                write_connection_secret_to_ref: secret,
            },
        )
    }

    fn provisioned(mut b: Bucket) -> Bucket {
        b.status = Some(BucketStatus {
            bucket_name: Some(b.bucket_name()),
            region: Some(b.spec.region.clone()),
            ..BucketStatus::default()
        });
        b
    }

    #[test]
    fn test_create_requires_complete_secret_refs() {
        assert!(validate_bucket_create(&bucket(None, "rma", None)).is_ok());

        let mut missing_creds = bucket(None, "rma", None);
        missing_creds.spec.credentials_secret_ref.namespace.clear();
        assert!(validate_bucket_create(&missing_creds).is_err());

        let partial = bucket(None, "rma", Some(SecretReference::new("", "conn")));
        assert!(validate_bucket_create(&partial).is_err());
    }

    #[test]
    fn test_update_before_provisioning_allows_changes() {
        let old = bucket(None, "rma", None);
        let new = bucket(Some("renamed"), "lpg", None);
        assert!(validate_bucket_update(&old, &new).is_ok());
    }

    #[test]
    fn test_update_rejects_rename() {
        let old = provisioned(bucket(None, "rma", None));
        let err = validate_bucket_update(&old, &bucket(Some("renamed"), "rma", None)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "a bucket named \"assets\" has been created already, you cannot rename it"
        );
    }

    #[test]
    fn test_update_rejects_region_change() {
        let old = provisioned(bucket(None, "rma", None));
        let err = validate_bucket_update(&old, &bucket(None, "lpg", None)).unwrap_err();
        assert!(err.to_string().ends_with("you cannot change the region"));
    }

    #[test]
    fn test_update_rejects_connection_secret_change() {
        let old = provisioned(bucket(None, "rma", Some(SecretReference::new("app", "conn"))));
        let new = bucket(None, "rma", Some(SecretReference::new("app", "other")));
        let err = validate_bucket_update(&old, &new).unwrap_err();
        assert!(err
            .to_string()
            .ends_with("you cannot change the connection secret reference"));
    }

    #[test]
    fn test_update_allows_unrelated_changes() {
        let old = provisioned(bucket(None, "rma", None));
        let mut new = bucket(None, "rma", None);
        new.spec.bucket_deletion_policy = BucketDeletionPolicy::DeleteAll;
        assert!(validate_bucket_update(&old, &new).is_ok());
    }
}

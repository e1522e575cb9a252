use super::{UserClient, UserConnector};
use crate::constants::{API_TOKEN_KEY, PROVIDER_CONFIG_LABEL};
use crate::controller::managed::Connector;
use crate::crd::{
    ProviderConfigUsage, ProviderConfigUsageSpec, SecretReference, StorageUser, TypedReference,
};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Resource, ResourceExt};
use tracing::debug;

#[async_trait]
impl Connector<StorageUser> for UserConnector {
    type Client = UserClient;

    async fn connect(&self, record: &StorageUser) -> Result<UserClient> {
        let config_name = &record.spec.provider_config_ref.name;

        // Keeps the ProviderConfig alive while this user may still need its token.
        self.configs
            .apply_usage(&usage_for(record))
            .await
            .context("cannot track ProviderConfig usage")?;

        let config = self
            .configs
            .get_config(config_name)
            .await
            .context("cannot get ProviderConfig")?;

        let token_ref = &config.spec.credentials.api_token_secret_ref;
        let secret = self
            .secrets
            .get(&token_ref.namespace, &token_ref.name)
            .await
            .context("cannot get secret with API token")?;
        let token = read_api_token(&secret, token_ref)?;
        debug!(provider_config = %config_name, "read API token");

        Ok(UserClient {
            api: self.accounts.connect(&token)?,
            secrets: self.secrets.clone(),
            records: self.records.clone(),
            events: self.events.clone(),
        })
    }
}

/// Usage record tying `record` to its `ProviderConfig`
pub(crate) fn usage_for(record: &StorageUser) -> ProviderConfigUsage {
    let config_name = record.spec.provider_config_ref.name.clone();
    let uid = record.uid();
    let mut usage = ProviderConfigUsage::new(
        &uid.clone().unwrap_or_else(|| record.name_any()),
        ProviderConfigUsageSpec {
            provider_config_ref: record.spec.provider_config_ref.clone(),
            resource_ref: TypedReference {
                api_version: StorageUser::api_version(&()).to_string(),
                kind: StorageUser::kind(&()).to_string(),
                name: record.name_any(),
                uid,
            },
        },
    );
    usage
        .labels_mut()
        .insert(PROVIDER_CONFIG_LABEL.to_string(), config_name);
    if let Some(owner) = record.controller_owner_ref(&()) {
        usage.metadata.owner_references = Some(vec![owner]);
    }
    usage
}

fn read_api_token(secret: &Secret, secret_ref: &SecretReference) -> Result<String> {
    let token = secret
        .data
        .as_ref()
        .and_then(|data| data.get(API_TOKEN_KEY))
        .map(|value| String::from_utf8_lossy(&value.0).into_owned())
        .filter(|value| !value.is_empty());
    match token {
        Some(token) => Ok(token),
        None => bail!("{API_TOKEN_KEY} doesn't exist in secret {secret_ref}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::StorageUserSpec;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    #[test]
    fn test_usage_is_named_after_uid_and_labelled() {
        let mut user = StorageUser::new("alice", StorageUserSpec::default());
        user.metadata.uid = Some("uid-1".to_string());

        let usage = usage_for(&user);
        assert_eq!(usage.name_any(), "uid-1");
        assert_eq!(usage.labels()[PROVIDER_CONFIG_LABEL], "default");
        assert_eq!(usage.spec.resource_ref.kind, "StorageUser");
        assert_eq!(usage.spec.resource_ref.name, "alice");
        assert_eq!(usage.owner_references()[0].name, "alice");
    }

    #[test]
    fn test_missing_api_token_is_reported() {
        let secret_ref = SecretReference::new("system", "api-token");
        let err = read_api_token(&Secret::default(), &secret_ref).unwrap_err();
        assert_eq!(
            err.to_string(),
            "CLOUDSCALE_API_TOKEN doesn't exist in secret system/api-token"
        );

        let secret = Secret {
            data: Some(BTreeMap::from([(
                API_TOKEN_KEY.to_string(),
                ByteString(b"t0ken".to_vec()),
            )])),
            ..Secret::default()
        };
        assert_eq!(read_api_token(&secret, &secret_ref).unwrap(), "t0ken");
    }
}

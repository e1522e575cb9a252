use super::tags::tags_need_update;
use super::{credentials_secret_matches, display_name, user_id, UserClient};
use crate::controller::conditions;
use crate::controller::managed::{ManagedResource, Observation};
use crate::controller::store::is_not_found;
use crate::crd::StorageUser;
use crate::provider::CloudObjectsUser;
use anyhow::Result;
use tracing::debug;

pub(super) async fn observe(
    client: &UserClient,
    record: &mut StorageUser,
) -> Result<Observation<CloudObjectsUser>> {
    let Some(id) = user_id(record) else {
        return Ok(Observation::Absent);
    };

    let cloud_user = match client.api.get_objects_user(&id).await {
        Ok(user) => user,
        Err(err) if is_not_found(&err) => {
            debug!(user.id = %id, "objects user not found");
            return Ok(Observation::Absent);
        }
        Err(err) => return Err(err),
    };

    let status = record.status_mut();
    status.user_id = Some(cloud_user.id.clone());
    status.display_name = Some(cloud_user.display_name.clone());
    status.tags = cloud_user.tags.clone();
    conditions::set_condition(record.conditions_mut(), conditions::ready());

    let up_to_date = !tags_need_update(&record.spec.tags, &cloud_user.tags)
        && cloud_user.display_name == display_name(record)
        && credentials_secret_in_sync(client, record, &cloud_user).await?;

    Ok(Observation::Exists {
        up_to_date,
        observed: cloud_user,
    })
}

/// The requested secret holds the current keys, or no secret is requested and none is left over
async fn credentials_secret_in_sync(
    client: &UserClient,
    record: &StorageUser,
    cloud_user: &CloudObjectsUser,
) -> Result<bool> {
    let Some(secret_ref) = record.spec.write_connection_secret_to_ref.as_ref() else {
        return Ok(record.written_secret_ref().is_none());
    };
    if record.written_secret_ref() != Some(secret_ref) {
        return Ok(false);
    }
    match client.secrets.get(&secret_ref.namespace, &secret_ref.name).await {
        Ok(secret) => Ok(credentials_secret_matches(&secret, cloud_user)),
        Err(err) if is_not_found(&err) => Ok(false),
        Err(err) => Err(err),
    }
}

//! Resource reconciliation.
//!
//! Converges a named resource to `present` or `absent`. The compare
//! step decrypts the current secret and checks the metadata before
//! touching anything, so a clean match is a read-only run. Group
//! membership cannot be edited in place on a share, so a group delta
//! recreates the resource in its current folder.

use crate::reconcile::{parse_entity_id, DesiredState};
use crate::session::{NewResource, ResourceChanges, Session};
use crate::types::{DecryptedSecret, PassboltError, PassboltErrorKind, Resource};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declared resource state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceParams {
    pub name: String,
    /// The secret value. Required when state is `present`; never logged.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Name of an existing top-level folder to place the resource in.
    #[serde(default)]
    pub folder_name: Option<String>,
    /// Group names the resource is shared with.
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub state: DesiredState,
}

impl ResourceParams {
    pub fn validate(&self) -> Result<(), PassboltError> {
        if self.name.is_empty() {
            return Err(PassboltError::validation("Resource name must not be empty"));
        }
        if self.state == DesiredState::Present
            && self.content.as_deref().unwrap_or_default().is_empty()
        {
            return Err(PassboltError::validation(
                "Resource content is required when state is present",
            ));
        }
        Ok(())
    }
}

/// Result of a resource reconciliation. The ids reflect the state
/// after the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceOutcome {
    pub changed: bool,
    pub resource_id: Option<Uuid>,
    pub folder_id: Option<Uuid>,
}

/// Converge a resource to the declared state.
///
/// `present` creates a missing resource, recreates one whose share
/// groups differ, updates one whose metadata or secret differ, and
/// reports `changed: false` on a clean match. `absent` deletes the
/// resource when found.
pub async fn ensure_resource(
    session: &mut Session,
    params: &ResourceParams,
) -> Result<ResourceOutcome, PassboltError> {
    params.validate()?;

    let folder_id = match &params.folder_name {
        Some(folder_name) => {
            let folder = session.find_folder(folder_name, None).await.map_err(|e| {
                if e.kind == PassboltErrorKind::NotFound {
                    PassboltError::validation(format!(
                        "Folder {} not found at the top level",
                        folder_name
                    ))
                } else {
                    e
                }
            })?;
            Some(folder.id)
        }
        None => None,
    };

    let found = match session.find_resource(&params.name, folder_id.as_deref()).await {
        Ok(resource) => Some(resource),
        Err(e) if e.kind == PassboltErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };

    match (params.state, found) {
        (DesiredState::Present, Some(resource)) => {
            converge_present(session, params, resource).await
        }
        (DesiredState::Present, None) => {
            let resource = session
                .create_resource(&new_resource(params, folder_id)?)
                .await?;
            info!("Created resource {}", params.name);
            present_outcome(&resource, true)
        }
        (DesiredState::Absent, Some(resource)) => {
            session.delete_resource(&resource.id).await?;
            info!("Deleted resource {}", params.name);
            Ok(ResourceOutcome {
                changed: true,
                resource_id: None,
                folder_id: None,
            })
        }
        (DesiredState::Absent, None) => {
            debug!("Resource {} already absent", params.name);
            Ok(ResourceOutcome {
                changed: false,
                resource_id: None,
                folder_id: None,
            })
        }
    }
}

/// Bring an existing resource in line with the declared state.
///
/// A group delta forces delete-and-recreate in the current folder;
/// otherwise the secret and metadata are compared and only a real diff
/// triggers an update.
async fn converge_present(
    session: &mut Session,
    params: &ResourceParams,
    resource: Resource,
) -> Result<ResourceOutcome, PassboltError> {
    let content = params.content.as_deref().ok_or_else(|| {
        PassboltError::validation("Resource content is required when state is present")
    })?;

    let configured = session.configured_group_names(&resource.id).await?;
    if groups_differ(&params.groups, &configured) {
        info!(
            "Share groups for resource {} changed, recreating",
            params.name
        );
        session.delete_resource(&resource.id).await?;
        let recreated = session
            .create_resource(&new_resource(params, resource.folder_parent_id.clone())?)
            .await?;
        return present_outcome(&recreated, true);
    }

    let current = session.get_password_and_description(&resource.id).await?;
    if desired_state_matches(&resource, &current, params, content) {
        debug!("Resource {} already up to date", params.name);
        return present_outcome(&resource, false);
    }

    let changes = ResourceChanges {
        name: Some(params.name.clone()),
        username: params.username.clone(),
        uri: params.uri.clone(),
        description: params.description.clone(),
        resource_type_id: None,
        password: Some(content.to_string()),
    };
    let updated = session.update_resource(&resource.id, &changes).await?;
    info!("Updated resource {}", params.name);
    present_outcome(&updated, true)
}

fn new_resource(
    params: &ResourceParams,
    folder_id: Option<String>,
) -> Result<NewResource, PassboltError> {
    let content = params.content.clone().ok_or_else(|| {
        PassboltError::validation("Resource content is required when state is present")
    })?;
    Ok(NewResource {
        name: params.name.clone(),
        password: content,
        username: params.username.clone(),
        uri: params.uri.clone(),
        description: params.description.clone(),
        resource_type_id: None,
        folder_id,
        groups: params.groups.clone(),
    })
}

/// Compare group name sets ignoring order and duplicates.
fn groups_differ(desired: &[String], configured: &[String]) -> bool {
    normalized_names(desired) != normalized_names(configured)
}

fn normalized_names(names: &[String]) -> Vec<String> {
    let mut names = names.to_vec();
    names.sort();
    names.dedup();
    names
}

/// Whether the live resource already matches the declared state.
///
/// The password always participates; the optional fields only count
/// when declared. The description is compared against the effective
/// value, wherever the resource type stores it.
fn desired_state_matches(
    resource: &Resource,
    current: &DecryptedSecret,
    params: &ResourceParams,
    content: &str,
) -> bool {
    if current.password != content {
        return false;
    }
    if let Some(username) = &params.username {
        if resource.username.as_deref() != Some(username.as_str()) {
            return false;
        }
    }
    if let Some(uri) = &params.uri {
        if resource.uri.as_deref() != Some(uri.as_str()) {
            return false;
        }
    }
    if let Some(description) = &params.description {
        if current.description.as_deref() != Some(description.as_str()) {
            return false;
        }
    }
    true
}

fn present_outcome(resource: &Resource, changed: bool) -> Result<ResourceOutcome, PassboltError> {
    let folder_id = match &resource.folder_parent_id {
        Some(id) => Some(parse_entity_id(id)?),
        None => None,
    };
    Ok(ResourceOutcome {
        changed,
        resource_id: Some(parse_entity_id(&resource.id)?),
        folder_id,
    })
}

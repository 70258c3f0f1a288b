//! Sharing and permission propagation.
//!
//! Endpoints:
//! - `PUT  /share/folder/{id}.json`            — replace folder permissions
//! - `PUT  /share/resource/{id}.json`          — share a resource
//! - `POST /share/simulate/resource/{id}.json` — dry-run a resource share
//!
//! New permissions inherit from the parent folder: each inherited entry is
//! a copy of a parent permission with `is_new: true`, no id, and the
//! session user filtered out (the creator already owns the new entity).

use crate::client::ApiClient;
use crate::types::*;
use log::{debug, info};

/// Sharing API operations.
pub struct PassboltSharing;

impl PassboltSharing {
    /// Replace the permissions on a folder.
    pub async fn share_folder(
        client: &ApiClient,
        folder_id: &str,
        request: &ShareRequest,
    ) -> Result<(), PassboltError> {
        info!(
            "Sharing folder {} with {} permission changes",
            folder_id,
            request.permissions.as_ref().map_or(0, |p| p.len())
        );
        let _: ApiResponse<serde_json::Value> = client
            .put(&format!("/share/folder/{}.json", folder_id), request)
            .await?;
        Ok(())
    }

    /// Share a resource, delivering re-encrypted secrets to new readers.
    pub async fn share_resource(
        client: &ApiClient,
        resource_id: &str,
        request: &ShareRequest,
    ) -> Result<(), PassboltError> {
        info!(
            "Sharing resource {} with {} permission changes and {} secrets",
            resource_id,
            request.permissions.as_ref().map_or(0, |p| p.len()),
            request.secrets.as_ref().map_or(0, |s| s.len())
        );
        let _: ApiResponse<serde_json::Value> = client
            .put(&format!("/share/resource/{}.json", resource_id), request)
            .await?;
        info!("Resource {} shared", resource_id);
        Ok(())
    }

    /// Dry-run a resource share so the server validates the permission set
    /// before the real call.
    pub async fn simulate_share_resource(
        client: &ApiClient,
        resource_id: &str,
        request: &ShareRequest,
    ) -> Result<ShareSimulateResult, PassboltError> {
        debug!("Simulating share for resource {}", resource_id);
        let resp: ApiResponse<ShareSimulateResult> = client
            .post(
                &format!("/share/simulate/resource/{}.json", resource_id),
                request,
            )
            .await?;
        Ok(resp.body)
    }

    /// Copy every parent permission except the session user's own entry.
    ///
    /// Used when creating a folder inside a shared parent so the new folder
    /// is visible to the same people.
    pub fn inherit_permissions(
        source: &[Permission],
        exclude_aro_foreign_key: &str,
    ) -> Vec<PermissionChange> {
        source
            .iter()
            .filter(|perm| perm.aro_foreign_key != exclude_aro_foreign_key)
            .map(to_new_permission)
            .collect()
    }

    /// Copy the parent's Group permissions restricted to the requested
    /// groups, excluding the session user's own entry.
    ///
    /// Used when sharing a resource with the groups named in its config.
    pub fn inherit_group_permissions(
        source: &[Permission],
        group_ids: &[String],
        exclude_aro_foreign_key: &str,
    ) -> Vec<PermissionChange> {
        source
            .iter()
            .filter(|perm| perm.aro == "Group")
            .filter(|perm| group_ids.contains(&perm.aro_foreign_key))
            .filter(|perm| perm.aro_foreign_key != exclude_aro_foreign_key)
            .map(to_new_permission)
            .collect()
    }
}

/// A parent permission re-issued for a new entity: same ARO and level,
/// `is_new: true`, no id.
fn to_new_permission(perm: &Permission) -> PermissionChange {
    PermissionChange {
        id: None,
        is_new: Some(true),
        aco: Some(perm.aco.clone()),
        aco_foreign_key: Some(perm.aco_foreign_key.clone()),
        aro: perm.aro.clone(),
        aro_foreign_key: perm.aro_foreign_key.clone(),
        permission_type: perm.permission_type,
        delete: None,
    }
}

// ── Tests ───────────────────────────────────────────────────────────

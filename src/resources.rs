//! Resource operations.
//!
//! Endpoints:
//! - `GET  /resources.json`          — list resources
//! - `GET  /resources/{id}.json`     — get a single resource
//! - `POST /resources.json`          — create a resource
//! - `PUT  /resources/{id}.json`     — update a resource
//! - `DELETE /resources/{id}.json`   — delete a resource
//! - `POST /move/resource/{id}.json` — move a resource into a folder
//! - `GET  /permissions/resource/{id}.json` — read the resource ACL
//! - `GET  /resource-types/{id}.json` — get a resource type schema
//!
//! The API has no exact-name search for resources, so name lookups list
//! everything and filter locally.

use crate::client::ApiClient;
use crate::types::*;
use log::{debug, info};

/// Resource API operations.
pub struct PassboltResources;

impl PassboltResources {
    /// List all resources visible to the session user.
    pub async fn list(client: &ApiClient) -> Result<Vec<Resource>, PassboltError> {
        let resp: ApiResponse<Vec<Resource>> = client.get("/resources.json").await?;
        debug!("Listed {} resources", resp.body.len());
        Ok(resp.body)
    }

    /// Get a single resource by ID.
    pub async fn get(client: &ApiClient, resource_id: &str) -> Result<Resource, PassboltError> {
        let resp: ApiResponse<Resource> = client
            .get(&format!("/resources/{}.json", resource_id))
            .await?;
        Ok(resp.body)
    }

    /// Find exactly one resource by name.
    ///
    /// With a parent folder the match is restricted to it; without one the
    /// name must be unique across everything the session user can see.
    /// Zero matches is a `NotFound` error and more than one a `Validation`
    /// error.
    pub async fn find_by_name(
        client: &ApiClient,
        name: &str,
        folder_parent_id: Option<&str>,
    ) -> Result<Resource, PassboltError> {
        let resources = Self::list(client).await?;
        select_by_name(resources, name, folder_parent_id)
    }

    /// Create a new resource.
    pub async fn create(
        client: &ApiClient,
        request: &CreateResourceRequest,
    ) -> Result<Resource, PassboltError> {
        info!("Creating resource: {}", request.name);
        let resp: ApiResponse<Resource> = client.post("/resources.json", request).await?;
        info!("Created resource {}", resp.body.id);
        Ok(resp.body)
    }

    /// Update an existing resource.
    pub async fn update(
        client: &ApiClient,
        resource_id: &str,
        request: &UpdateResourceRequest,
    ) -> Result<Resource, PassboltError> {
        info!("Updating resource {}", resource_id);
        let resp: ApiResponse<Resource> = client
            .put(&format!("/resources/{}.json", resource_id), request)
            .await?;
        Ok(resp.body)
    }

    /// Delete a resource.
    pub async fn delete(client: &ApiClient, resource_id: &str) -> Result<(), PassboltError> {
        info!("Deleting resource {}", resource_id);
        client
            .delete(&format!("/resources/{}.json", resource_id))
            .await?;
        Ok(())
    }

    /// Move a resource into a folder.
    pub async fn move_to_folder(
        client: &ApiClient,
        resource_id: &str,
        folder_id: &str,
    ) -> Result<(), PassboltError> {
        let request = MoveRequest {
            folder_parent_id: Some(folder_id.to_string()),
        };
        info!("Moving resource {} to folder {}", resource_id, folder_id);
        let _: ApiResponse<serde_json::Value> = client
            .post(&format!("/move/resource/{}.json", resource_id), &request)
            .await?;
        Ok(())
    }

    /// Read the permission entries on a resource.
    pub async fn get_permissions(
        client: &ApiClient,
        resource_id: &str,
    ) -> Result<Vec<Permission>, PassboltError> {
        let resp: ApiResponse<Vec<Permission>> = client
            .get(&format!("/permissions/resource/{}.json", resource_id))
            .await?;
        Ok(resp.body)
    }

    /// Get a resource type, including its secret schema definition.
    pub async fn get_type(
        client: &ApiClient,
        type_id: &str,
    ) -> Result<ResourceType, PassboltError> {
        let resp: ApiResponse<ResourceType> = client
            .get(&format!("/resource-types/{}.json", type_id))
            .await?;
        Ok(resp.body)
    }
}

/// Pick the single resource matching `name`, restricted to `parent_id`
/// when one is given.
fn select_by_name(
    resources: Vec<Resource>,
    name: &str,
    parent_id: Option<&str>,
) -> Result<Resource, PassboltError> {
    let mut matches: Vec<Resource> = resources
        .into_iter()
        .filter(|r| r.name == name)
        .filter(|r| match parent_id {
            Some(parent) => r.folder_parent_id.as_deref() == Some(parent),
            None => true,
        })
        .collect();

    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => Err(PassboltError::not_found(match parent_id {
            Some(parent) => format!("No resource named {} in folder {}", name, parent),
            None => format!("No resource named {}", name),
        })),
        n => Err(PassboltError::validation(match parent_id {
            Some(parent) => format!(
                "{} resources named {} in folder {}; names must be unique to reconcile",
                n, name, parent
            ),
            None => format!(
                "{} resources named {}; names must be unique to reconcile",
                n, name
            ),
        })),
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(id: &str, name: &str, parent: Option<&str>) -> Resource {
        Resource {
            id: id.into(),
            name: name.into(),
            folder_parent_id: parent.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_select_by_name_anywhere() {
        // Without a parent filter any location counts, unlike folders.
        let resources = vec![resource("r1", "db-password", Some("folder-1"))];
        let found = select_by_name(resources, "db-password", None).unwrap();
        assert_eq!(found.id, "r1");
    }

    #[test]
    fn test_select_by_name_in_folder() {
        let resources = vec![
            resource("r1", "db-password", Some("folder-1")),
            resource("r2", "db-password", Some("folder-2")),
        ];
        let found = select_by_name(resources, "db-password", Some("folder-2")).unwrap();
        assert_eq!(found.id, "r2");
    }

    #[test]
    fn test_select_by_name_not_found() {
        let resources = vec![resource("r1", "db-password", None)];
        let err = select_by_name(resources, "other", None).unwrap_err();
        assert_eq!(err.kind, PassboltErrorKind::NotFound);
    }

    #[test]
    fn test_select_by_name_wrong_folder() {
        let resources = vec![resource("r1", "db-password", Some("folder-1"))];
        let err = select_by_name(resources, "db-password", Some("folder-2")).unwrap_err();
        assert_eq!(err.kind, PassboltErrorKind::NotFound);
    }

    #[test]
    fn test_select_by_name_ambiguous() {
        let resources = vec![
            resource("r1", "db-password", Some("folder-1")),
            resource("r2", "db-password", Some("folder-2")),
        ];
        let err = select_by_name(resources, "db-password", None).unwrap_err();
        assert_eq!(err.kind, PassboltErrorKind::Validation);
    }

    #[test]
    fn test_create_resource_request_serialize() {
        let req = CreateResourceRequest {
            name: "Test".into(),
            username: Some("admin".into()),
            uri: Some("https://example.com".into()),
            description: Some("desc".into()),
            resource_type_id: None,
            secrets: vec![NewSecret {
                data: "-----BEGIN PGP MESSAGE-----".into(),
            }],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["name"], "Test");
        assert_eq!(json["username"], "admin");
        assert!(json.get("resource_type_id").is_none());
        assert!(json["secrets"][0]["data"].as_str().unwrap().contains("PGP"));
    }

    #[test]
    fn test_update_resource_request_serialize() {
        let req = UpdateResourceRequest {
            name: Some("Updated".into()),
            resource_type_id: Some("rt-uuid".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["name"], "Updated");
        assert!(json.get("username").is_none());
        assert!(json.get("secrets").is_none());
    }

    #[test]
    fn test_move_request_serialize() {
        let req = MoveRequest {
            folder_parent_id: Some("folder-uuid".into()),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["folder_parent_id"], "folder-uuid");
    }

    #[test]
    fn test_resource_deserialize() {
        let json = r#"{
            "id": "res-uuid",
            "name": "My Resource",
            "username": "admin",
            "uri": "https://example.com",
            "resource_type_id": "rt-uuid",
            "folder_parent_id": "folder-uuid",
            "created": "2024-01-01T00:00:00+00:00",
            "modified": "2024-01-02T00:00:00+00:00"
        }"#;
        let res: Resource = serde_json::from_str(json).unwrap();
        assert_eq!(res.id, "res-uuid");
        assert_eq!(res.name, "My Resource");
        assert_eq!(res.folder_parent_id.as_deref(), Some("folder-uuid"));
    }

    #[test]
    fn test_permission_list_deserialize() {
        let json = r#"[
            {"id": "p1", "aco": "Resource", "aco_foreign_key": "res-uuid",
             "aro": "User", "aro_foreign_key": "user-uuid", "type": 15},
            {"id": "p2", "aco": "Resource", "aco_foreign_key": "res-uuid",
             "aro": "Group", "aro_foreign_key": "group-uuid", "type": 7}
        ]"#;
        let perms: Vec<Permission> = serde_json::from_str(json).unwrap();
        assert_eq!(perms.len(), 2);
        assert_eq!(perms[0].permission_type, permission_types::OWNER);
        assert_eq!(perms[1].aro, "Group");
    }

    #[test]
    fn test_resource_type_deserialize() {
        let json = r#"{
            "id": "rt-uuid",
            "slug": "password-and-description",
            "name": "Password with description",
            "definition": {"secret": {"type": "object"}}
        }"#;
        let rt: ResourceType = serde_json::from_str(json).unwrap();
        assert_eq!(rt.slug, "password-and-description");
        assert!(rt.definition.is_some());
    }
}

//! User and group operations.
//!
//! User endpoints:
//! - `GET  /users.json`        — list users (search / has-access filters)
//! - `GET  /users/{id}.json`   — get a single user
//! - `GET  /users/me.json`     — get the authenticated user
//! - `POST /users.json`        — create a user (sends the invite mail)
//! - `PUT  /users/{id}.json`   — update a user's profile
//! - `DELETE /users/{id}.json` — delete a user
//!
//! Group endpoints:
//! - `GET  /groups.json`       — list groups with their members
//! - `GET  /groups/{id}.json`  — get a single group with members
//! - `POST /groups.json`       — create a group
//! - `PUT  /groups/{id}.json`  — update group membership
//!
//! Usernames are unique server-side; lookups resolve by exact match on
//! the search result. Group names are resolved the same way.

use crate::client::ApiClient;
use crate::folders::PassboltFolders;
use crate::types::*;
use log::{debug, info};
use std::collections::{HashMap, HashSet};

// ── Users ───────────────────────────────────────────────────────────

/// User API operations.
pub struct PassboltUsers;

impl PassboltUsers {
    /// List users. With `has_access`, restrict to users who can see the
    /// given resource or folder.
    pub async fn list(
        client: &ApiClient,
        has_access: Option<&str>,
    ) -> Result<Vec<User>, PassboltError> {
        let mut query: HashMap<String, String> = HashMap::new();
        if let Some(aco_id) = has_access {
            query.insert("filter[has-access]".into(), aco_id.to_string());
            query.insert("contain[user]".into(), "1".into());
        }
        query.insert("contain[permission]".into(), "1".into());

        let resp: ApiResponse<Vec<User>> = client.get_with_params("/users.json", &query).await?;
        debug!("Listed {} users", resp.body.len());
        Ok(resp.body)
    }

    /// Get a single user by ID.
    pub async fn get(client: &ApiClient, user_id: &str) -> Result<User, PassboltError> {
        let resp: ApiResponse<User> = client.get(&format!("/users/{}.json", user_id)).await?;
        Ok(resp.body)
    }

    /// Get the authenticated user.
    pub async fn get_me(client: &ApiClient) -> Result<User, PassboltError> {
        let resp: ApiResponse<User> = client.get("/users/me.json").await?;
        Ok(resp.body)
    }

    /// Find a user by exact username.
    pub async fn find_by_username(
        client: &ApiClient,
        username: &str,
    ) -> Result<User, PassboltError> {
        let mut query: HashMap<String, String> = HashMap::new();
        query.insert("filter[search]".into(), username.to_string());
        let resp: ApiResponse<Vec<User>> = client.get_with_params("/users.json", &query).await?;
        select_user_by_username(resp.body, username)
    }

    /// Create a new user. The server sends the invite mail; the account
    /// stays inactive until the invitee completes key setup.
    pub async fn create(
        client: &ApiClient,
        request: &CreateUserRequest,
    ) -> Result<User, PassboltError> {
        info!("Creating user: {}", request.username);
        let resp: ApiResponse<User> = client.post("/users.json", request).await?;
        info!("Created user {}", resp.body.id);
        Ok(resp.body)
    }

    /// Update a user's profile names.
    pub async fn update(
        client: &ApiClient,
        user_id: &str,
        request: &UpdateUserRequest,
    ) -> Result<User, PassboltError> {
        info!("Updating user {}", user_id);
        let resp: ApiResponse<User> = client
            .put(&format!("/users/{}.json", user_id), request)
            .await?;
        Ok(resp.body)
    }

    /// Delete a user.
    pub async fn delete(client: &ApiClient, user_id: &str) -> Result<(), PassboltError> {
        info!("Deleting user {}", user_id);
        client
            .delete(&format!("/users/{}.json", user_id))
            .await?;
        Ok(())
    }

    /// List the users who can see a folder, expanding group permissions
    /// into their member users.
    pub async fn list_with_folder_access(
        client: &ApiClient,
        folder_id: &str,
    ) -> Result<Vec<User>, PassboltError> {
        let folder = PassboltFolders::get(client, folder_id).await?;

        let mut user_ids: HashSet<String> = HashSet::new();
        for perm in folder.permissions.unwrap_or_default() {
            if perm.aro == "Group" {
                let group = PassboltGroups::get(client, &perm.aro_foreign_key).await?;
                for group_user in group.groups_users.unwrap_or_default() {
                    user_ids.insert(group_user.user_id);
                }
            } else if perm.aro == "User" {
                user_ids.insert(perm.aro_foreign_key);
            }
        }

        let users = Self::list(client, None).await?;
        Ok(users
            .into_iter()
            .filter(|u| user_ids.contains(&u.id))
            .collect())
    }

    /// Find the user whose GPG key matches the given fingerprint. Used to
    /// locate the session user inside an access list.
    pub fn select_by_fingerprint<'a>(
        users: &'a [User],
        fingerprint: &str,
    ) -> Result<&'a User, PassboltError> {
        users
            .iter()
            .find(|u| {
                u.gpgkey
                    .as_ref()
                    .and_then(|k| k.fingerprint.as_deref())
                    .map(|fp| fp == fingerprint)
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                PassboltError::not_found(format!(
                    "No user with key fingerprint {} in the access list",
                    fingerprint
                ))
            })
    }

    /// Add a user to a group. The user must be active.
    pub async fn add_to_group(
        client: &ApiClient,
        user_id: &str,
        group_id: &str,
    ) -> Result<Group, PassboltError> {
        let group = PassboltGroups::get(client, group_id).await?;
        let user = Self::get(client, user_id).await?;

        if !user.active {
            return Err(PassboltError::validation(format!(
                "User {} is inactive and cannot join group {}",
                user.username.as_deref().unwrap_or(&user.id),
                group.name
            )));
        }

        let request = UpdateGroupRequest {
            name: group.name.clone(),
            groups_users: vec![GroupUserChange {
                id: None,
                user_id: user.id.clone(),
                is_admin: Some(false),
                delete: None,
            }],
        };

        info!("Adding user {} to group {}", user.id, group.id);
        let resp: ApiResponse<Group> = client
            .put(&format!("/groups/{}.json", group.id), &request)
            .await?;
        Ok(resp.body)
    }

    /// Remove a user from a group.
    pub async fn remove_from_group(
        client: &ApiClient,
        user_id: &str,
        group_id: &str,
    ) -> Result<Group, PassboltError> {
        let group = PassboltGroups::get(client, group_id).await?;
        let user = Self::get(client, user_id).await?;

        let request = UpdateGroupRequest {
            name: group.name.clone(),
            groups_users: vec![GroupUserChange {
                id: None,
                user_id: user.id.clone(),
                is_admin: None,
                delete: Some(true),
            }],
        };

        info!("Removing user {} from group {}", user.id, group.id);
        let resp: ApiResponse<Group> = client
            .put(&format!("/groups/{}.json", group.id), &request)
            .await?;
        Ok(resp.body)
    }
}

// ── Groups ──────────────────────────────────────────────────────────

/// Group API operations.
pub struct PassboltGroups;

impl PassboltGroups {
    /// List groups with their members.
    pub async fn list(
        client: &ApiClient,
        search: Option<&str>,
    ) -> Result<Vec<Group>, PassboltError> {
        let mut query: HashMap<String, String> = HashMap::new();
        query.insert("contain[groups_users]".into(), "1".into());
        if let Some(keyword) = search {
            query.insert("filter[search]".into(), keyword.to_string());
        }

        let resp: ApiResponse<Vec<Group>> = client.get_with_params("/groups.json", &query).await?;
        debug!("Listed {} groups", resp.body.len());
        Ok(resp.body)
    }

    /// Get a single group by ID with its members.
    pub async fn get(client: &ApiClient, group_id: &str) -> Result<Group, PassboltError> {
        let mut query: HashMap<String, String> = HashMap::new();
        query.insert("contain[groups_users]".into(), "1".into());

        let resp: ApiResponse<Group> = client
            .get_with_params(&format!("/groups/{}.json", group_id), &query)
            .await?;
        Ok(resp.body)
    }

    /// Find a group by exact name.
    pub async fn find_by_name(client: &ApiClient, name: &str) -> Result<Group, PassboltError> {
        let groups = Self::list(client, Some(name)).await?;
        select_group_by_name(groups, name)
    }

    /// Create a new group. Passbolt requires at least one group manager.
    pub async fn create(
        client: &ApiClient,
        request: &CreateGroupRequest,
    ) -> Result<Group, PassboltError> {
        info!("Creating group: {}", request.name);
        let resp: ApiResponse<Group> = client.post("/groups.json", request).await?;
        info!("Created group {}", resp.body.id);
        Ok(resp.body)
    }
}

// ── Selection helpers ───────────────────────────────────────────────

/// Pick the single user whose username matches exactly.
fn select_user_by_username(users: Vec<User>, username: &str) -> Result<User, PassboltError> {
    let mut matches: Vec<User> = users
        .into_iter()
        .filter(|u| u.username.as_deref() == Some(username))
        .collect();

    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => Err(PassboltError::not_found(format!(
            "User {} not found",
            username
        ))),
        n => Err(PassboltError::validation(format!(
            "{} users matched username {}",
            n, username
        ))),
    }
}

/// Pick the single group whose name matches exactly.
fn select_group_by_name(groups: Vec<Group>, name: &str) -> Result<Group, PassboltError> {
    let mut matches: Vec<Group> = groups.into_iter().filter(|g| g.name == name).collect();

    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => Err(PassboltError::not_found(format!(
            "Group {} not found",
            name
        ))),
        n => Err(PassboltError::validation(format!(
            "{} groups matched name {}",
            n, name
        ))),
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, username: &str) -> User {
        User {
            id: id.into(),
            username: Some(username.into()),
            active: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_select_user_exact_match() {
        let users = vec![
            user("u1", "ada@example.com"),
            user("u2", "ada+backup@example.com"),
        ];
        let found = select_user_by_username(users, "ada@example.com").unwrap();
        assert_eq!(found.id, "u1");
    }

    #[test]
    fn test_select_user_not_found() {
        let users = vec![user("u1", "ada@example.com")];
        let err = select_user_by_username(users, "grace@example.com").unwrap_err();
        assert_eq!(err.kind, PassboltErrorKind::NotFound);
    }

    #[test]
    fn test_select_user_search_superset() {
        // filter[search] matches substrings; only the exact username counts.
        let users = vec![user("u2", "ada+backup@example.com")];
        let err = select_user_by_username(users, "ada@example.com").unwrap_err();
        assert_eq!(err.kind, PassboltErrorKind::NotFound);
    }

    #[test]
    fn test_select_by_fingerprint() {
        let mut ada = user("u1", "ada@example.com");
        ada.gpgkey = Some(GpgKey {
            fingerprint: Some("A1B2C3D4E5F60718293A4B5C6D7E8F9001122334".into()),
            ..Default::default()
        });
        let users = vec![ada, user("u2", "grace@example.com")];
        let found = PassboltUsers::select_by_fingerprint(
            &users,
            "A1B2C3D4E5F60718293A4B5C6D7E8F9001122334",
        )
        .unwrap();
        assert_eq!(found.id, "u1");
    }

    #[test]
    fn test_select_by_fingerprint_missing() {
        let users = vec![user("u1", "ada@example.com")];
        let err = PassboltUsers::select_by_fingerprint(&users, "FFFF").unwrap_err();
        assert_eq!(err.kind, PassboltErrorKind::NotFound);
    }

    #[test]
    fn test_select_group_exact_match() {
        let groups = vec![
            Group {
                id: "g1".into(),
                name: "ops".into(),
                ..Default::default()
            },
            Group {
                id: "g2".into(),
                name: "ops-oncall".into(),
                ..Default::default()
            },
        ];
        let found = select_group_by_name(groups, "ops").unwrap();
        assert_eq!(found.id, "g1");
    }

    #[test]
    fn test_select_group_ambiguous() {
        let groups = vec![
            Group {
                id: "g1".into(),
                name: "ops".into(),
                ..Default::default()
            },
            Group {
                id: "g2".into(),
                name: "ops".into(),
                ..Default::default()
            },
        ];
        let err = select_group_by_name(groups, "ops").unwrap_err();
        assert_eq!(err.kind, PassboltErrorKind::Validation);
    }

    #[test]
    fn test_create_user_request_serialize() {
        let req = CreateUserRequest {
            username: "user@example.com".into(),
            profile: CreateUserProfile {
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
            },
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["username"], "user@example.com");
        assert_eq!(json["profile"]["first_name"], "Ada");
        assert_eq!(json["profile"]["last_name"], "Lovelace");
    }

    #[test]
    fn test_create_group_request_serialize() {
        let req = CreateGroupRequest {
            name: "Dev Team".into(),
            groups_users: vec![GroupUserEntry {
                user_id: "manager-uuid".into(),
                is_admin: true,
            }],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["name"], "Dev Team");
        assert_eq!(json["groups_users"][0]["user_id"], "manager-uuid");
        assert_eq!(json["groups_users"][0]["is_admin"], true);
    }

    #[test]
    fn test_group_membership_add_payload() {
        let req = UpdateGroupRequest {
            name: "ops".into(),
            groups_users: vec![GroupUserChange {
                id: None,
                user_id: "user-uuid".into(),
                is_admin: Some(false),
                delete: None,
            }],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["groups_users"][0]["user_id"], "user-uuid");
        assert_eq!(json["groups_users"][0]["is_admin"], false);
        assert!(json["groups_users"][0].get("delete").is_none());
    }

    #[test]
    fn test_group_membership_delete_payload() {
        let req = UpdateGroupRequest {
            name: "ops".into(),
            groups_users: vec![GroupUserChange {
                id: None,
                user_id: "user-uuid".into(),
                is_admin: None,
                delete: Some(true),
            }],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["groups_users"][0]["delete"], true);
        assert!(json["groups_users"][0].get("is_admin").is_none());
    }

    #[test]
    fn test_user_deserialize() {
        let json = r#"{
            "id": "user-uuid",
            "username": "user@example.com",
            "active": true,
            "deleted": false,
            "created": "2024-01-01T00:00:00+00:00",
            "modified": "2024-01-02T00:00:00+00:00",
            "profile": {
                "first_name": "Ada",
                "last_name": "Lovelace"
            },
            "gpgkey": {
                "fingerprint": "A1B2C3D4E5F60718293A4B5C6D7E8F9001122334"
            }
        }"#;
        let u: User = serde_json::from_str(json).unwrap();
        assert_eq!(u.id, "user-uuid");
        assert!(u.active);
        assert_eq!(u.profile.unwrap().first_name, "Ada");
        assert_eq!(
            u.gpgkey.unwrap().fingerprint.as_deref(),
            Some("A1B2C3D4E5F60718293A4B5C6D7E8F9001122334")
        );
    }

    #[test]
    fn test_group_deserialize_with_members() {
        let json = r#"{
            "id": "group-uuid",
            "name": "Admins",
            "created": "2024-01-01T00:00:00+00:00",
            "modified": "2024-01-02T00:00:00+00:00",
            "groups_users": [
                {"id": "gu-1", "group_id": "group-uuid", "user_id": "u1", "is_admin": true},
                {"id": "gu-2", "group_id": "group-uuid", "user_id": "u2", "is_admin": false}
            ]
        }"#;
        let g: Group = serde_json::from_str(json).unwrap();
        assert_eq!(g.id, "group-uuid");
        let members = g.groups_users.unwrap();
        assert_eq!(members.len(), 2);
        assert!(members[0].is_admin);
        assert_eq!(members[1].user_id, "u2");
    }
}

//! Folder operations.
//!
//! Endpoints:
//! - `GET  /folders.json`         — list folders (optional name search)
//! - `GET  /folders/{id}.json`    — get a single folder with permissions
//!   (`describe` additionally expands permission holders)
//! - `POST /folders.json`         — create a folder
//! - `DELETE /folders/{id}.json`  — delete a folder
//!
//! Folder names are not unique in Passbolt; lookups here resolve a name to
//! exactly one folder under a given parent (or at the top level) and treat
//! anything else as an error.

use crate::client::ApiClient;
use crate::types::*;
use log::{debug, info};
use std::collections::HashMap;

/// Folder API operations.
pub struct PassboltFolders;

impl PassboltFolders {
    /// List folders, optionally narrowed by a server-side name search.
    ///
    /// `filter[search]` matches substrings, so callers that need an exact
    /// name must filter the result again.
    pub async fn list(
        client: &ApiClient,
        search: Option<&str>,
    ) -> Result<Vec<Folder>, PassboltError> {
        let resp: ApiResponse<Vec<Folder>> = match search {
            Some(keyword) => {
                let mut query: HashMap<String, String> = HashMap::new();
                query.insert("filter[search]".into(), keyword.to_string());
                client.get_with_params("/folders.json", &query).await?
            }
            None => client.get("/folders.json").await?,
        };
        debug!("Listed {} folders", resp.body.len());
        Ok(resp.body)
    }

    /// Get a single folder by ID, including its permissions.
    pub async fn get(client: &ApiClient, folder_id: &str) -> Result<Folder, PassboltError> {
        let mut query: HashMap<String, String> = HashMap::new();
        query.insert("contain[permissions]".into(), "1".into());

        let resp: ApiResponse<Folder> = client
            .get_with_params(&format!("/folders/{}.json", folder_id), &query)
            .await?;
        Ok(resp.body)
    }

    /// Get a folder with each permission's holder expanded: user records
    /// carry their profile and group permissions carry the group.
    pub async fn describe(client: &ApiClient, folder_id: &str) -> Result<Folder, PassboltError> {
        let mut query: HashMap<String, String> = HashMap::new();
        query.insert("contain[permissions]".into(), "1".into());
        query.insert("contain[permissions.user.profile]".into(), "1".into());
        query.insert("contain[permissions.group]".into(), "1".into());

        let resp: ApiResponse<Folder> = client
            .get_with_params(&format!("/folders/{}.json", folder_id), &query)
            .await?;
        debug!(
            "Described folder {} ({} permissions)",
            resp.body.id,
            resp.body.permissions.as_ref().map_or(0, Vec::len)
        );
        Ok(resp.body)
    }

    /// Find exactly one folder by name under the given parent.
    ///
    /// With no parent, only top-level folders qualify. Zero matches is a
    /// `NotFound` error and more than one is a `Validation` error.
    pub async fn find_by_name(
        client: &ApiClient,
        name: &str,
        parent_folder_id: Option<&str>,
    ) -> Result<Folder, PassboltError> {
        let folders = Self::list(client, Some(name)).await?;
        select_by_name(folders, name, parent_folder_id)
    }

    /// Create a new folder.
    pub async fn create(
        client: &ApiClient,
        request: &CreateFolderRequest,
    ) -> Result<Folder, PassboltError> {
        info!("Creating folder: {}", request.name);
        let resp: ApiResponse<Folder> = client.post("/folders.json", request).await?;
        info!("Created folder {}", resp.body.id);
        Ok(resp.body)
    }

    /// Delete a folder.
    pub async fn delete(client: &ApiClient, folder_id: &str) -> Result<(), PassboltError> {
        info!("Deleting folder {}", folder_id);
        client
            .delete(&format!("/folders/{}.json", folder_id))
            .await?;
        Ok(())
    }
}

/// Pick the single folder matching `name` under `parent_id` (or at the
/// top level when no parent is given).
fn select_by_name(
    folders: Vec<Folder>,
    name: &str,
    parent_id: Option<&str>,
) -> Result<Folder, PassboltError> {
    let mut matches: Vec<Folder> = folders
        .into_iter()
        .filter(|f| f.name == name)
        .filter(|f| match parent_id {
            Some(parent) => f.folder_parent_id.as_deref() == Some(parent),
            None => f.folder_parent_id.is_none(),
        })
        .collect();

    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => Err(PassboltError::not_found(match parent_id {
            Some(parent) => format!("No folder named {} under parent {}", name, parent),
            None => format!("No top-level folder named {}", name),
        })),
        n => Err(PassboltError::validation(match parent_id {
            Some(parent) => format!(
                "{} folders named {} under parent {}; names must be unique to reconcile",
                n, name, parent
            ),
            None => format!(
                "{} top-level folders named {}; names must be unique to reconcile",
                n, name
            ),
        })),
    }
}

// ── Tests ───────────────────────────────────────────────────────────

//! Folder reconciliation.
//!
//! Converges a named folder to `present` or `absent`. Folders are
//! matched by exact name within their parent (top level when no parent
//! is given); the parent itself must already exist at the top level.

use crate::reconcile::{parse_entity_id, DesiredState};
use crate::session::Session;
use crate::types::{Folder, PassboltError, PassboltErrorKind};
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declared folder state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FolderParams {
    pub name: String,
    /// Name of an existing top-level folder to create under.
    #[serde(default)]
    pub parent_folder_name: Option<String>,
    #[serde(default)]
    pub state: DesiredState,
}

impl FolderParams {
    pub fn validate(&self) -> Result<(), PassboltError> {
        if self.name.is_empty() {
            return Err(PassboltError::validation("Folder name must not be empty"));
        }
        Ok(())
    }
}

/// Result of a folder reconciliation. The ids reflect the state after
/// the run, so a deleted folder reports none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderOutcome {
    pub changed: bool,
    pub folder_id: Option<Uuid>,
    pub folder_parent_id: Option<Uuid>,
}

/// Converge a folder to the declared state.
///
/// `present` creates the folder when missing (inheriting the parent's
/// permissions) and leaves an existing one untouched; `absent` deletes
/// it when found. The parent name must resolve to exactly one top-level
/// folder before anything is mutated.
pub async fn ensure_folder(
    session: &Session,
    params: &FolderParams,
) -> Result<FolderOutcome, PassboltError> {
    params.validate()?;

    let parent = match &params.parent_folder_name {
        Some(parent_name) => Some(resolve_parent_folder(session, parent_name).await?),
        None => None,
    };
    let parent_id = parent.as_ref().map(|f| f.id.as_str());

    let found = match session.find_folder(&params.name, parent_id).await {
        Ok(folder) => Some(folder),
        Err(e) if e.kind == PassboltErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };

    match (params.state, found) {
        (DesiredState::Present, Some(folder)) => {
            debug!("Folder {} already present", params.name);
            present_outcome(&folder, false)
        }
        (DesiredState::Present, None) => {
            let folder = session.create_folder(&params.name, parent_id).await?;
            present_outcome(&folder, true)
        }
        (DesiredState::Absent, Some(folder)) => {
            session.delete_folder(&folder.id).await?;
            Ok(FolderOutcome {
                changed: true,
                folder_id: None,
                folder_parent_id: None,
            })
        }
        (DesiredState::Absent, None) => {
            debug!("Folder {} already absent", params.name);
            Ok(FolderOutcome {
                changed: false,
                folder_id: None,
                folder_parent_id: None,
            })
        }
    }
}

/// Resolve the parent by name at the top level. A missing parent is a
/// parameter problem, not a lookup miss.
async fn resolve_parent_folder(
    session: &Session,
    parent_name: &str,
) -> Result<Folder, PassboltError> {
    session.find_folder(parent_name, None).await.map_err(|e| {
        if e.kind == PassboltErrorKind::NotFound {
            PassboltError::validation(format!(
                "Parent folder {} not found at the top level",
                parent_name
            ))
        } else {
            e
        }
    })
}

fn present_outcome(folder: &Folder, changed: bool) -> Result<FolderOutcome, PassboltError> {
    let folder_parent_id = match &folder.folder_parent_id {
        Some(id) => Some(parse_entity_id(id)?),
        None => None,
    };
    Ok(FolderOutcome {
        changed,
        folder_id: Some(parse_entity_id(&folder.id)?),
        folder_parent_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_defaults() {
        let params: FolderParams = serde_json::from_str(r#"{"name": "infra"}"#).unwrap();
        assert_eq!(params.name, "infra");
        assert!(params.parent_folder_name.is_none());
        assert_eq!(params.state, DesiredState::Present);
    }

    #[test]
    fn test_params_absent_state() {
        let params: FolderParams =
            serde_json::from_str(r#"{"name": "infra", "state": "absent"}"#).unwrap();
        assert_eq!(params.state, DesiredState::Absent);
    }

    #[test]
    fn test_params_reject_unknown_field() {
        let result = serde_json::from_str::<FolderParams>(r#"{"name": "infra", "colour": "red"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let params = FolderParams {
            name: String::new(),
            parent_folder_name: None,
            state: DesiredState::Present,
        };
        let err = params.validate().unwrap_err();
        assert_eq!(err.kind, PassboltErrorKind::Validation);
    }

    #[test]
    fn test_present_outcome_parses_ids() {
        let folder = Folder {
            id: "2c8e7f86-9f23-4a4f-95c4-5a6a94e6b4cf".into(),
            name: "infra".into(),
            folder_parent_id: Some("5f5fb0f6-e247-4cfd-9c79-f87e7e42b2a3".into()),
            ..Default::default()
        };
        let outcome = present_outcome(&folder, true).unwrap();
        assert!(outcome.changed);
        assert_eq!(
            outcome.folder_id.unwrap().to_string(),
            "2c8e7f86-9f23-4a4f-95c4-5a6a94e6b4cf"
        );
        assert_eq!(
            outcome.folder_parent_id.unwrap().to_string(),
            "5f5fb0f6-e247-4cfd-9c79-f87e7e42b2a3"
        );
    }

    #[test]
    fn test_present_outcome_rejects_bad_id() {
        let folder = Folder {
            id: "not-a-uuid".into(),
            name: "infra".into(),
            ..Default::default()
        };
        let err = present_outcome(&folder, false).unwrap_err();
        assert_eq!(err.kind, PassboltErrorKind::ParseError);
    }

    #[test]
    fn test_outcome_serializes_changed_flag() {
        let outcome = FolderOutcome {
            changed: false,
            folder_id: None,
            folder_parent_id: None,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["changed"], false);
        assert!(json["folder_id"].is_null());
    }
}

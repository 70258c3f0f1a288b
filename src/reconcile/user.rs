//! User reconciliation and read-only user facts.
//!
//! Converges a user account to `present` or `absent` and applies group
//! memberships additively. Memberships that need the invitee's key
//! (the account is still inactive) are reported back as pending rather
//! than failing the run.

use crate::reconcile::{parse_entity_id, DesiredState};
use crate::session::Session;
use crate::types::{Group, PassboltError, PassboltErrorKind, User};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declared user state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserParams {
    pub username: String,
    /// Required when state is `present`.
    #[serde(default)]
    pub first_name: Option<String>,
    /// Required when state is `present`.
    #[serde(default)]
    pub last_name: Option<String>,
    /// Group names the user should be a member of. Existing memberships
    /// outside this list are left alone.
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub state: DesiredState,
}

impl UserParams {
    pub fn validate(&self) -> Result<(), PassboltError> {
        if self.username.is_empty() {
            return Err(PassboltError::validation("Username must not be empty"));
        }
        if self.state == DesiredState::Present {
            if self.first_name.as_deref().unwrap_or_default().is_empty() {
                return Err(PassboltError::validation(
                    "first_name is required when state is present",
                ));
            }
            if self.last_name.as_deref().unwrap_or_default().is_empty() {
                return Err(PassboltError::validation(
                    "last_name is required when state is present",
                ));
            }
        }
        Ok(())
    }
}

/// Result of a user reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserOutcome {
    pub changed: bool,
    pub user_id: Option<Uuid>,
    pub username: String,
    /// Memberships deferred because the account has not completed key
    /// setup yet. Rerun once the user is active to apply them.
    pub pending_groups: Vec<String>,
}

/// Converge a user to the declared state.
///
/// `present` invites a missing user, updates a drifted profile and adds
/// missing group memberships; `absent` deletes the account. Group
/// removal is never performed here.
pub async fn ensure_user(
    session: &Session,
    params: &UserParams,
) -> Result<UserOutcome, PassboltError> {
    params.validate()?;

    let found = match session.find_user(&params.username).await {
        Ok(user) => Some(user),
        Err(e) if e.kind == PassboltErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };

    match (params.state, found) {
        (DesiredState::Present, Some(user)) => {
            let (first_name, last_name) = required_names(params)?;
            let mut changed = false;
            let user = if profile_differs(&user, first_name, last_name) {
                info!("Updating profile for user {}", params.username);
                changed = true;
                session.update_user(&user.id, first_name, last_name).await?
            } else {
                user
            };
            let (groups_changed, pending_groups) =
                apply_group_memberships(session, &user, &params.groups).await?;
            Ok(UserOutcome {
                changed: changed || groups_changed,
                user_id: Some(parse_entity_id(&user.id)?),
                username: params.username.clone(),
                pending_groups,
            })
        }
        (DesiredState::Present, None) => {
            let (first_name, last_name) = required_names(params)?;
            let user = session
                .create_user(&params.username, first_name, last_name)
                .await?;
            info!("Invited user {}", params.username);
            // A fresh invitee is inactive, so memberships all defer.
            let (_, pending_groups) =
                apply_group_memberships(session, &user, &params.groups).await?;
            Ok(UserOutcome {
                changed: true,
                user_id: Some(parse_entity_id(&user.id)?),
                username: params.username.clone(),
                pending_groups,
            })
        }
        (DesiredState::Absent, Some(user)) => {
            session.delete_user(&user.id).await?;
            info!("Deleted user {}", params.username);
            Ok(UserOutcome {
                changed: true,
                user_id: None,
                username: params.username.clone(),
                pending_groups: Vec::new(),
            })
        }
        (DesiredState::Absent, None) => {
            debug!("User {} already absent", params.username);
            Ok(UserOutcome {
                changed: false,
                user_id: None,
                username: params.username.clone(),
                pending_groups: Vec::new(),
            })
        }
    }
}

/// Add the user to each named group they are missing from.
///
/// Unknown group names are skipped with a warning. An inactive user
/// cannot join yet (the secret cannot be encrypted to them), so those
/// memberships are returned as pending.
async fn apply_group_memberships(
    session: &Session,
    user: &User,
    groups: &[String],
) -> Result<(bool, Vec<String>), PassboltError> {
    let username = user.username.as_deref().unwrap_or(&user.id);
    let mut changed = false;
    let mut pending = Vec::new();
    for name in groups {
        let group = match session.find_group(name).await {
            Ok(group) => group,
            Err(e) if e.kind == PassboltErrorKind::NotFound => {
                warn!("Skipping unknown group {}", name);
                continue;
            }
            Err(e) => return Err(e),
        };
        if is_member(&group, &user.id) {
            debug!("User {} already in group {}", username, name);
            continue;
        }
        if user.active {
            session.add_user_to_group(&user.id, &group.id).await?;
            info!("Added user {} to group {}", username, name);
            changed = true;
        } else {
            warn!(
                "User {} is inactive, deferring membership in {}",
                username, name
            );
            pending.push(name.clone());
        }
    }
    Ok((changed, pending))
}

fn required_names(params: &UserParams) -> Result<(&str, &str), PassboltError> {
    let first_name = params.first_name.as_deref().ok_or_else(|| {
        PassboltError::validation("first_name is required when state is present")
    })?;
    let last_name = params.last_name.as_deref().ok_or_else(|| {
        PassboltError::validation("last_name is required when state is present")
    })?;
    Ok((first_name, last_name))
}

/// Whether the stored profile names diverge from the declared ones. A
/// user record without a profile always counts as drifted.
fn profile_differs(user: &User, first_name: &str, last_name: &str) -> bool {
    match &user.profile {
        Some(profile) => profile.first_name != first_name || profile.last_name != last_name,
        None => true,
    }
}

fn is_member(group: &Group, user_id: &str) -> bool {
    group
        .groups_users
        .iter()
        .flatten()
        .any(|member| member.user_id == user_id)
}

// ── User facts ──────────────────────────────────────────────────────

/// Flat read-only view of a user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFact {
    pub id: Uuid,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub active: bool,
}

/// List every user as a flat fact record. Performs no writes.
pub async fn user_facts(session: &Session) -> Result<Vec<UserFact>, PassboltError> {
    let users = session.list_users(None).await?;
    let mut facts = Vec::with_capacity(users.len());
    for user in users {
        facts.push(user_fact(&user)?);
    }
    Ok(facts)
}

fn user_fact(user: &User) -> Result<UserFact, PassboltError> {
    let (first_name, last_name) = match &user.profile {
        Some(profile) => (profile.first_name.clone(), profile.last_name.clone()),
        None => (String::new(), String::new()),
    };
    Ok(UserFact {
        id: parse_entity_id(&user.id)?,
        username: user.username.clone().unwrap_or_default(),
        first_name,
        last_name,
        active: user.active,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GroupUser, UserProfile};

    fn present_params(username: &str) -> UserParams {
        UserParams {
            username: username.into(),
            first_name: Some("Ada".into()),
            last_name: Some("Lovelace".into()),
            groups: Vec::new(),
            state: DesiredState::Present,
        }
    }

    fn user_with_profile(first_name: &str, last_name: &str) -> User {
        User {
            id: "f848277c-5398-58f8-a82a-72397af2d450".into(),
            username: Some("ada@passbolt.test".into()),
            active: true,
            profile: Some(UserProfile {
                first_name: first_name.into(),
                last_name: last_name.into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_params_defaults() {
        let params: UserParams = serde_json::from_str(
            r#"{"username": "ada@passbolt.test", "first_name": "Ada", "last_name": "Lovelace"}"#,
        )
        .unwrap();
        assert!(params.groups.is_empty());
        assert_eq!(params.state, DesiredState::Present);
    }

    #[test]
    fn test_params_reject_unknown_field() {
        let result = serde_json::from_str::<UserParams>(
            r#"{"username": "ada@passbolt.test", "email": "ada@passbolt.test"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_requires_names_when_present() {
        let mut params = present_params("ada@passbolt.test");
        params.first_name = None;
        assert!(params.validate().is_err());

        let mut params = present_params("ada@passbolt.test");
        params.last_name = Some(String::new());
        assert!(params.validate().is_err());

        assert!(present_params("ada@passbolt.test").validate().is_ok());
    }

    #[test]
    fn test_validate_skips_names_when_absent() {
        let params = UserParams {
            username: "ada@passbolt.test".into(),
            first_name: None,
            last_name: None,
            groups: Vec::new(),
            state: DesiredState::Absent,
        };
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_profile_differs() {
        let user = user_with_profile("Ada", "Lovelace");
        assert!(!profile_differs(&user, "Ada", "Lovelace"));
        assert!(profile_differs(&user, "Ada", "Byron"));

        let mut bare = user_with_profile("Ada", "Lovelace");
        bare.profile = None;
        assert!(profile_differs(&bare, "Ada", "Lovelace"));
    }

    #[test]
    fn test_is_member() {
        let group = Group {
            id: "428ed4cd-81b1-56af-aa7f-a7cbdbe227e4".into(),
            name: "ops".into(),
            groups_users: Some(vec![GroupUser {
                user_id: "f848277c-5398-58f8-a82a-72397af2d450".into(),
                ..Default::default()
            }]),
            ..Default::default()
        };
        assert!(is_member(&group, "f848277c-5398-58f8-a82a-72397af2d450"));
        assert!(!is_member(&group, "e97b14ba-8957-57c9-a357-f78a6e1e1a46"));
    }

    #[test]
    fn test_user_fact_flattens_profile() {
        let fact = user_fact(&user_with_profile("Ada", "Lovelace")).unwrap();
        assert_eq!(fact.username, "ada@passbolt.test");
        assert_eq!(fact.first_name, "Ada");
        assert_eq!(fact.last_name, "Lovelace");
        assert!(fact.active);

        let json = serde_json::to_value(&fact).unwrap();
        assert_eq!(json["id"], "f848277c-5398-58f8-a82a-72397af2d450");
    }

    #[test]
    fn test_user_fact_tolerates_missing_profile() {
        let mut user = user_with_profile("Ada", "Lovelace");
        user.profile = None;
        let fact = user_fact(&user).unwrap();
        assert!(fact.first_name.is_empty());
        assert!(fact.last_name.is_empty());
    }
}

//! Central session coordinator.
//!
//! `Session::login` runs the full GPGAuth handshake and yields an
//! authenticated session owning the API client, the resolved config and
//! the PGP context. Flows that span several endpoints live here: folder
//! creation with parent-permission inheritance, resource creation with
//! group sharing, and secret re-encryption on update.

use crate::auth::PassboltAuth;
use crate::client::ApiClient;
use crate::crypto::{parse_armored_key, PgpContext};
use crate::folders::PassboltFolders;
use crate::resources::PassboltResources;
use crate::secrets::PassboltSecrets;
use crate::sharing::PassboltSharing;
use crate::types::*;
use crate::users::{PassboltGroups, PassboltUsers};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::fmt;

// ── Operation inputs ────────────────────────────────────────────────

/// Everything needed to create and share a resource in one call.
#[derive(Clone)]
pub struct NewResource {
    pub name: String,
    /// The secret value. Only ever sent inside PGP armor.
    pub password: String,
    pub username: Option<String>,
    pub uri: Option<String>,
    pub description: Option<String>,
    pub resource_type_id: Option<String>,
    /// Target folder; the resource is moved there after creation.
    pub folder_id: Option<String>,
    /// Group names to share with. Names that do not resolve are skipped.
    pub groups: Vec<String>,
}

/// The password never appears in debug output.
impl fmt::Debug for NewResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewResource")
            .field("name", &self.name)
            .field("password", &"[REDACTED]")
            .field("username", &self.username)
            .field("uri", &self.uri)
            .field("description", &self.description)
            .field("resource_type_id", &self.resource_type_id)
            .field("folder_id", &self.folder_id)
            .field("groups", &self.groups)
            .finish()
    }
}

/// Field changes for a resource update. `None` leaves a field alone.
#[derive(Clone, Default)]
pub struct ResourceChanges {
    pub name: Option<String>,
    pub username: Option<String>,
    pub uri: Option<String>,
    pub description: Option<String>,
    pub resource_type_id: Option<String>,
    /// New secret value, re-encrypted for every user with access.
    pub password: Option<String>,
}

/// The password never appears in debug output.
impl fmt::Debug for ResourceChanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceChanges")
            .field("name", &self.name)
            .field("username", &self.username)
            .field("uri", &self.uri)
            .field("description", &self.description)
            .field("resource_type_id", &self.resource_type_id)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// An authenticated Passbolt session.
///
/// Owns the cookie-carrying HTTP client and the PGP context; passed by
/// reference to every operation. One session can serve any number of
/// sequential calls.
#[derive(Debug)]
pub struct Session {
    /// Connection and identity configuration.
    config: Config,
    /// API client with the handshake's cookie jar and CSRF token.
    client: ApiClient,
    /// OpenPGP context for encryption/decryption.
    pgp: PgpContext,
}

impl Session {
    // ── Login & lifecycle ───────────────────────────────────────────

    /// Perform the GPGAuth handshake and return an authenticated session.
    ///
    /// Validates the config, loads the key material, verifies the server
    /// identity via the encrypted challenge, completes both login stages,
    /// acquires the CSRF token and imports the recipient keys of all
    /// active users.
    pub async fn login(config: Config) -> Result<Session, PassboltError> {
        config.validate()?;
        let private_armored = config
            .private_key
            .resolve()
            .map_err(|e| PassboltError::invalid_config(format!("private_key: {}", e.message)))?;
        let public_armored = config
            .public_key
            .resolve()
            .map_err(|e| PassboltError::invalid_config(format!("public_key: {}", e.message)))?;
        parse_armored_key(&public_armored, false)
            .map_err(|e| PassboltError::invalid_config(format!("public_key: {}", e.message)))?;

        let mut client = ApiClient::from_config(&config)?;
        let mut pgp = PgpContext::new();
        pgp.set_user_key(
            &private_armored,
            &config.passphrase,
            &config.normalized_fingerprint(),
        )
        .map_err(|e| PassboltError::invalid_config(format!("private_key: {}", e.message)))?;

        let server_key = PassboltAuth::get_server_key(&client).await?;
        pgp.set_server_key(&server_key.keydata, &server_key.fingerprint)?;
        info!("Server key loaded: fingerprint={}", server_key.fingerprint);

        PassboltAuth::verify_server(&client, &pgp).await?;
        PassboltAuth::login(&mut client, &pgp).await?;
        client.session_mut().server_public_key = Some(server_key.keydata);
        PassboltAuth::fetch_csrf_token(&mut client).await?;

        let mut session = Session {
            config,
            client,
            pgp,
        };
        let imported = session.import_recipient_keys().await?;
        info!(
            "Logged in as {} ({} recipient keys)",
            session.config.fingerprint, imported
        );
        Ok(session)
    }

    /// Re-acquire the CSRF token after the server rotates it.
    pub async fn refresh_csrf(&mut self) -> Result<(), PassboltError> {
        PassboltAuth::fetch_csrf_token(&mut self.client).await?;
        Ok(())
    }

    /// Log out and clear the session state.
    pub async fn logout(&mut self) -> Result<(), PassboltError> {
        PassboltAuth::logout(&mut self.client).await
    }

    /// Ask the server whether the session is still valid.
    pub async fn check_session(&self) -> Result<bool, PassboltError> {
        PassboltAuth::is_authenticated(&self.client).await
    }

    /// Whether the handshake completed.
    pub fn is_authenticated(&self) -> bool {
        self.client.is_authenticated()
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// The session configuration. `Debug` output is redacted.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The underlying API client, for direct endpoint access.
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// The PGP context.
    pub fn pgp(&self) -> &PgpContext {
        &self.pgp
    }

    /// The authenticated user's id, once the CSRF step has run.
    pub fn user_id(&self) -> Option<&str> {
        self.client.session().user_id.as_deref()
    }

    /// The server key fingerprint seen during the handshake.
    pub fn server_fingerprint(&self) -> Option<&str> {
        self.pgp.server_fingerprint()
    }

    // ── Recipient keys ──────────────────────────────────────────────

    /// Import the public keys of all active users so secrets can be
    /// encrypted per recipient. Returns the number of keys imported.
    pub async fn import_recipient_keys(&mut self) -> Result<usize, PassboltError> {
        let users = PassboltUsers::list(&self.client, None).await?;
        let imported = self.register_recipient_keys(&users);
        debug!("Imported {} recipient keys", imported);
        Ok(imported)
    }

    /// Cache the public keys of the given users. Inactive users have no
    /// usable key and are skipped, as are keys that fail to parse.
    pub fn register_recipient_keys(&mut self, users: &[User]) -> usize {
        let mut imported = 0;
        for user in users {
            if !user.active {
                continue;
            }
            let Some(gpgkey) = &user.gpgkey else {
                continue;
            };
            let (Some(armored), Some(fingerprint)) = (&gpgkey.armored_key, &gpgkey.fingerprint)
            else {
                continue;
            };
            match self.pgp.add_recipient_key(&user.id, armored, fingerprint) {
                Ok(()) => imported += 1,
                Err(e) => warn!("Skipping unusable key for user {}: {}", user.id, e.message),
            }
        }
        imported
    }

    // ── Folders ─────────────────────────────────────────────────────

    /// Find a folder by exact name, under the given parent or at the
    /// top level.
    pub async fn find_folder(
        &self,
        name: &str,
        parent_folder_id: Option<&str>,
    ) -> Result<Folder, PassboltError> {
        PassboltFolders::find_by_name(&self.client, name, parent_folder_id).await
    }

    /// Create a folder. When a parent is given, the parent's permissions
    /// are propagated to the new folder so the same people can see it.
    pub async fn create_folder(
        &self,
        name: &str,
        parent_folder_id: Option<&str>,
    ) -> Result<Folder, PassboltError> {
        let request = CreateFolderRequest {
            name: name.to_string(),
            folder_parent_id: parent_folder_id.map(String::from),
        };
        let folder = PassboltFolders::create(&self.client, &request).await?;
        if let Some(parent_id) = parent_folder_id {
            self.inherit_parent_permissions(&folder.id, parent_id).await?;
        }
        Ok(folder)
    }

    /// Apply the parent folder's permissions (minus the session user's
    /// own entry) to a newly created child folder.
    pub async fn inherit_parent_permissions(
        &self,
        folder_id: &str,
        parent_folder_id: &str,
    ) -> Result<(), PassboltError> {
        let parent = PassboltFolders::get(&self.client, parent_folder_id).await?;
        let users = PassboltUsers::list_with_folder_access(&self.client, parent_folder_id).await?;
        let me = PassboltUsers::select_by_fingerprint(&users, &self.config.normalized_fingerprint())?;

        let source = parent.permissions.unwrap_or_default();
        let permissions = PassboltSharing::inherit_permissions(&source, &me.id);
        if permissions.is_empty() {
            debug!(
                "Folder {} has no permissions to inherit beyond the session user",
                parent_folder_id
            );
            return Ok(());
        }

        let request = ShareRequest {
            permissions: Some(permissions),
            secrets: None,
        };
        PassboltSharing::share_folder(&self.client, folder_id, &request).await
    }

    /// Delete a folder.
    pub async fn delete_folder(&self, folder_id: &str) -> Result<(), PassboltError> {
        PassboltFolders::delete(&self.client, folder_id).await
    }

    // ── Resources ───────────────────────────────────────────────────

    /// Find a resource by exact name, optionally scoped to a folder.
    pub async fn find_resource(
        &self,
        name: &str,
        folder_parent_id: Option<&str>,
    ) -> Result<Resource, PassboltError> {
        PassboltResources::find_by_name(&self.client, name, folder_parent_id).await
    }

    /// Create a resource, move it into its folder and share it with the
    /// requested groups.
    ///
    /// The secret is first encrypted to the session user only; sharing
    /// re-encrypts it for every member of the resolved groups.
    pub async fn create_resource(&mut self, new: &NewResource) -> Result<Resource, PassboltError> {
        validate_new_resource(new)?;

        let encrypted = self.pgp.encrypt_for_self(&new.password)?;
        let request = CreateResourceRequest {
            name: new.name.clone(),
            username: new.username.clone(),
            uri: new.uri.clone(),
            description: new.description.clone(),
            resource_type_id: new.resource_type_id.clone(),
            secrets: vec![NewSecret { data: encrypted }],
        };
        let resource = PassboltResources::create(&self.client, &request).await?;

        if let Some(folder_id) = &new.folder_id {
            PassboltFolders::get(&self.client, folder_id).await?;
            PassboltResources::move_to_folder(&self.client, &resource.id, folder_id).await?;
        }

        let (groups, members) = self.resolve_share_groups(&new.groups).await?;

        // Re-read so folder_parent_id reflects the move.
        let resource = PassboltResources::get(&self.client, &resource.id).await?;
        self.share_resource_with_groups(&resource, &new.password, &members, &groups)
            .await?;
        Ok(resource)
    }

    /// Update a resource's metadata and re-encrypt its secret for every
    /// user with access.
    ///
    /// The secret payload shape follows the resource type: a bare
    /// password string, or `{password, description}` JSON merged with
    /// the current values for the password-with-description type.
    pub async fn update_resource(
        &mut self,
        resource_id: &str,
        changes: &ResourceChanges,
    ) -> Result<Resource, PassboltError> {
        let resource = PassboltResources::get(&self.client, resource_id).await?;
        let kind = self.resource_secret_kind(&resource.resource_type_id).await?;
        let type_id = changes
            .resource_type_id
            .clone()
            .unwrap_or_else(|| resource.resource_type_id.clone());

        let recipients = PassboltUsers::list(&self.client, Some(resource_id)).await?;
        let secrets = match kind {
            SecretKind::Password => match &changes.password {
                Some(password) => {
                    self.register_recipient_keys(&recipients);
                    Some(PassboltSecrets::encrypt_for_users(
                        &self.pgp,
                        password,
                        &recipients,
                    )?)
                }
                None => None,
            },
            SecretKind::PasswordWithDescription => {
                if changes.password.is_some() || changes.description.is_some() {
                    let secret = PassboltSecrets::get(&self.client, resource_id).await?;
                    let current = PassboltSecrets::decode(&self.pgp, &secret)?;
                    let merged = DecryptedSecret {
                        password: changes.password.clone().unwrap_or(current.password),
                        description: changes.description.clone().or(current.description),
                    };
                    let text =
                        PassboltSecrets::render(&merged, SecretKind::PasswordWithDescription)?;
                    self.register_recipient_keys(&recipients);
                    Some(PassboltSecrets::encrypt_for_users(
                        &self.pgp,
                        &text,
                        &recipients,
                    )?)
                } else {
                    None
                }
            }
        };

        let request = UpdateResourceRequest {
            name: changes.name.clone(),
            username: changes.username.clone(),
            uri: changes.uri.clone(),
            description: changes.description.clone(),
            resource_type_id: Some(type_id),
            secrets,
        };
        PassboltResources::update(&self.client, resource_id, &request).await?;
        PassboltResources::get(&self.client, resource_id).await
    }

    /// Delete a resource.
    pub async fn delete_resource(&self, resource_id: &str) -> Result<(), PassboltError> {
        PassboltResources::delete(&self.client, resource_id).await
    }

    /// The group names currently holding a permission on a resource.
    pub async fn configured_group_names(
        &self,
        resource_id: &str,
    ) -> Result<Vec<String>, PassboltError> {
        let permissions = PassboltResources::get_permissions(&self.client, resource_id).await?;
        let mut names = Vec::new();
        for permission in &permissions {
            if permission.aro == "Group" {
                let group = PassboltGroups::get(&self.client, &permission.aro_foreign_key).await?;
                names.push(group.name);
            }
        }
        Ok(names)
    }

    // ── Sharing ─────────────────────────────────────────────────────

    /// Share a resource with the given group members.
    ///
    /// Permissions are copied from the parent folder's `Group` entries
    /// restricted to the requested groups; the secret is encrypted per
    /// recipient. Simulates the share before applying it. A resource
    /// outside any folder, or an empty recipient list, is a no-op.
    pub async fn share_resource_with_groups(
        &mut self,
        resource: &Resource,
        password: &str,
        users: &[User],
        groups: &[Group],
    ) -> Result<(), PassboltError> {
        if users.is_empty() {
            debug!("Resource {} has no recipients to share with", resource.id);
            return Ok(());
        }
        let me = PassboltUsers::select_by_fingerprint(users, &self.config.normalized_fingerprint())?;
        let me_id = me.id.clone();

        let Some(folder_id) = resource.folder_parent_id.as_deref() else {
            debug!("Resource {} has no parent folder, skipping share", resource.id);
            return Ok(());
        };
        let folder = PassboltFolders::get(&self.client, folder_id).await?;

        let group_ids: Vec<String> = groups.iter().map(|g| g.id.clone()).collect();
        let source = folder.permissions.unwrap_or_default();
        let permissions = PassboltSharing::inherit_group_permissions(&source, &group_ids, &me_id);
        if permissions.is_empty() {
            debug!(
                "Folder {} grants none of the requested groups, skipping share",
                folder_id
            );
            return Ok(());
        }

        self.register_recipient_keys(users);
        let secrets = PassboltSecrets::encrypt_for_users(&self.pgp, password, users)?;
        let request = ShareRequest {
            permissions: Some(permissions),
            secrets: Some(secrets),
        };
        PassboltSharing::simulate_share_resource(&self.client, &resource.id, &request).await?;
        PassboltSharing::share_resource(&self.client, &resource.id, &request).await?;
        info!(
            "Shared resource {} with {} groups ({} recipients)",
            resource.id,
            groups.len(),
            users.len()
        );
        Ok(())
    }

    /// Resolve group names to groups and collect their members as full
    /// user records. Unknown names are skipped with a warning.
    async fn resolve_share_groups(
        &self,
        names: &[String],
    ) -> Result<(Vec<Group>, Vec<User>), PassboltError> {
        let mut groups = Vec::new();
        for name in names {
            match PassboltGroups::find_by_name(&self.client, name).await {
                Ok(group) => groups.push(group),
                Err(e) if e.kind == PassboltErrorKind::NotFound => {
                    warn!("Skipping unknown group {}", name);
                }
                Err(e) => return Err(e),
            }
        }

        let mut members = Vec::new();
        for user_id in collect_member_ids(&groups) {
            members.push(PassboltUsers::get(&self.client, &user_id).await?);
        }
        Ok((groups, members))
    }

    // ── Secrets ─────────────────────────────────────────────────────

    /// The effective password and description of a resource.
    ///
    /// For the legacy password type the description lives in the
    /// resource metadata; for password-with-description it lives in the
    /// secret payload.
    pub async fn get_password_and_description(
        &self,
        resource_id: &str,
    ) -> Result<DecryptedSecret, PassboltError> {
        let resource = PassboltResources::get(&self.client, resource_id).await?;
        let secret = PassboltSecrets::get(&self.client, resource_id).await?;
        let kind = self.resource_secret_kind(&resource.resource_type_id).await?;
        match kind {
            SecretKind::Password => Ok(DecryptedSecret {
                password: self.pgp.decrypt(&secret.data)?,
                description: resource.description,
            }),
            SecretKind::PasswordWithDescription => PassboltSecrets::decode(&self.pgp, &secret),
        }
    }

    /// Which secret schema the given resource type uses.
    pub async fn resource_secret_kind(
        &self,
        resource_type_id: &str,
    ) -> Result<SecretKind, PassboltError> {
        let resource_type = PassboltResources::get_type(&self.client, resource_type_id).await?;
        PassboltSecrets::detect_kind(&resource_type)
    }

    // ── Users & groups ──────────────────────────────────────────────

    /// List users, optionally restricted to those with access to a
    /// resource or folder.
    pub async fn list_users(&self, has_access: Option<&str>) -> Result<Vec<User>, PassboltError> {
        PassboltUsers::list(&self.client, has_access).await
    }

    /// Find a user by exact username.
    pub async fn find_user(&self, username: &str) -> Result<User, PassboltError> {
        PassboltUsers::find_by_username(&self.client, username).await
    }

    /// Invite a new user. The account stays inactive until the invitee
    /// completes key setup.
    pub async fn create_user(
        &self,
        username: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<User, PassboltError> {
        let request = CreateUserRequest {
            username: username.to_string(),
            profile: CreateUserProfile {
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
            },
        };
        PassboltUsers::create(&self.client, &request).await
    }

    /// Update a user's profile names.
    pub async fn update_user(
        &self,
        user_id: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<User, PassboltError> {
        let request = UpdateUserRequest {
            profile: CreateUserProfile {
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
            },
        };
        PassboltUsers::update(&self.client, user_id, &request).await
    }

    /// Delete a user.
    pub async fn delete_user(&self, user_id: &str) -> Result<(), PassboltError> {
        PassboltUsers::delete(&self.client, user_id).await
    }

    /// List groups, members included. `search` narrows by keyword.
    pub async fn list_groups(&self, search: Option<&str>) -> Result<Vec<Group>, PassboltError> {
        PassboltGroups::list(&self.client, search).await
    }

    /// Get one group by id, members included.
    pub async fn get_group(&self, group_id: &str) -> Result<Group, PassboltError> {
        PassboltGroups::get(&self.client, group_id).await
    }

    /// Find a group by exact name, members included.
    pub async fn find_group(&self, name: &str) -> Result<Group, PassboltError> {
        PassboltGroups::find_by_name(&self.client, name).await
    }

    /// Create a group with the given user as its manager.
    pub async fn create_group(
        &self,
        name: &str,
        manager_user_id: &str,
    ) -> Result<Group, PassboltError> {
        let request = CreateGroupRequest {
            name: name.to_string(),
            groups_users: vec![GroupUserEntry {
                user_id: manager_user_id.to_string(),
                is_admin: true,
            }],
        };
        PassboltGroups::create(&self.client, &request).await
    }

    /// Add an active user to a group as a regular member.
    pub async fn add_user_to_group(
        &self,
        user_id: &str,
        group_id: &str,
    ) -> Result<Group, PassboltError> {
        PassboltUsers::add_to_group(&self.client, user_id, group_id).await
    }

    /// Remove a user from a group.
    pub async fn remove_user_from_group(
        &self,
        user_id: &str,
        group_id: &str,
    ) -> Result<Group, PassboltError> {
        PassboltUsers::remove_from_group(&self.client, user_id, group_id).await
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Reject resources without a name or a secret value.
fn validate_new_resource(new: &NewResource) -> Result<(), PassboltError> {
    if new.name.is_empty() {
        return Err(PassboltError::validation("Resource name must not be empty"));
    }
    if new.password.is_empty() {
        return Err(PassboltError::validation(
            "Resource password must not be empty",
        ));
    }
    Ok(())
}

/// The distinct member user ids across the given groups, in first-seen
/// order. A user in several groups gets one secret entry, not two.
fn collect_member_ids(groups: &[Group]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for group in groups {
        for member in group.groups_users.iter().flatten() {
            if seen.insert(member.user_id.clone()) {
                ids.push(member.user_id.clone());
            }
        }
    }
    ids
}

// ── Tests ───────────────────────────────────────────────────────────

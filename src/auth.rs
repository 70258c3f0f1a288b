//! GPGAuth login flow.
//!
//! Passbolt's cookie-based authentication is a PGP challenge/response
//! exchange:
//! 1. `GET /auth/verify.json` — retrieve the server's PGP public key
//! 2. `POST /auth/verify.json` — verify server identity (encrypt a challenge
//!    to the server key, expect it echoed back decrypted in a header)
//! 3. `POST /auth/login.json` — stage 1 requests a token encrypted to the
//!    admin key; stage 2 returns it decrypted to prove key ownership
//! 4. `GET /users/me.json` — pick up the `csrfToken` cookie for write requests

use crate::client::ApiClient;
use crate::crypto::PgpContext;
use crate::types::*;
use chrono::Utc;
use log::{debug, info, warn};

/// Server verify response body.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ServerVerifyBody {
    pub fingerprint: String,
    pub keydata: String,
}

/// GPGAuth request envelope.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GpgAuthPayload {
    pub gpg_auth: GpgAuthFields,
}

/// GPGAuth field variants.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GpgAuthFields {
    /// Fingerprint of the admin's key (always required).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyid: Option<String>,
    /// Encrypted challenge token (for the server-verify step).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_verify_token: Option<String>,
    /// Decrypted server token (for login stage 2).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_token_result: Option<String>,
}

/// Passbolt authenticator.
pub struct PassboltAuth;

impl PassboltAuth {
    /// Step 1: Get the server's public PGP key.
    pub async fn get_server_key(client: &ApiClient) -> Result<ServerVerifyBody, PassboltError> {
        info!("Fetching server public key from /auth/verify.json");
        let resp: ApiResponse<ServerVerifyBody> =
            client.get_unauthenticated("/auth/verify.json").await?;
        debug!("Server key fingerprint: {}", resp.body.fingerprint);
        Ok(resp.body)
    }

    /// Step 2: Verify the server's identity before sending it anything.
    ///
    /// Encrypt a random challenge token with the server's public key. Only a
    /// server holding the matching private key can decrypt it, and it must
    /// echo it back verbatim in the `X-GPGAuth-Verify-Response` header.
    pub async fn verify_server(
        client: &ApiClient,
        pgp: &PgpContext,
    ) -> Result<(), PassboltError> {
        let challenge = pgp.generate_challenge();
        let encrypted = pgp.encrypt_for_server(&challenge)?;

        let payload = GpgAuthPayload {
            gpg_auth: GpgAuthFields {
                keyid: pgp.user_fingerprint().map(String::from),
                server_verify_token: Some(encrypted),
                user_token_result: None,
            },
        };

        let response = client
            .post_unauthenticated_raw("/auth/verify.json", &payload)
            .await?;

        let returned = response
            .headers()
            .get("X-GPGAuth-Verify-Response")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if returned.is_empty() {
            return Err(PassboltError::auth_failed(
                "No X-GPGAuth-Verify-Response header in server response",
            ));
        }
        if returned != challenge {
            return Err(PassboltError::auth_failed(
                "Server returned a mismatched challenge token",
            ));
        }
        info!("Server identity verified via GPGAuth");
        Ok(())
    }

    /// Step 3: Two-stage login.
    ///
    /// Stage 1 requests a token encrypted to the admin's public key; stage 2
    /// sends the decrypted token back to prove possession of the private key.
    pub async fn login(
        client: &mut ApiClient,
        pgp: &PgpContext,
    ) -> Result<SessionState, PassboltError> {
        let keyid = pgp
            .user_fingerprint()
            .map(String::from)
            .ok_or_else(|| PassboltError::auth_failed("User private key not loaded"))?;

        let payload = GpgAuthPayload {
            gpg_auth: GpgAuthFields {
                keyid: Some(keyid.clone()),
                server_verify_token: None,
                user_token_result: None,
            },
        };

        let response = client
            .post_unauthenticated_raw("/auth/login.json", &payload)
            .await?;

        let encrypted_token = response
            .headers()
            .get("X-GPGAuth-User-Auth-Token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if encrypted_token.is_empty() {
            return Err(PassboltError::auth_failed(
                "No X-GPGAuth-User-Auth-Token in server response",
            ));
        }

        // The header value is URL-encoded, with `+` escaped as `\+`.
        let armored_token = decode_auth_token(&encrypted_token)?;
        let token = pgp.decrypt(&armored_token)?;
        if !PgpContext::verify_challenge_format(&token) {
            warn!("Server auth token has an unexpected format");
        }

        let login_payload = GpgAuthPayload {
            gpg_auth: GpgAuthFields {
                keyid: Some(keyid),
                server_verify_token: None,
                user_token_result: Some(token),
            },
        };

        let login_response = client
            .post_unauthenticated_raw("/auth/login.json", &login_payload)
            .await?;

        if !login_response.status().is_success() {
            return Err(PassboltError::auth_failed(format!(
                "GPGAuth login failed with status {}",
                login_response.status().as_u16()
            )));
        }

        // Session cookies are stored by the cookie-jar client.
        let session = SessionState {
            authenticated: true,
            server_fingerprint: pgp.server_fingerprint().map(String::from),
            logged_in_at: Some(Utc::now()),
            ..Default::default()
        };

        client.set_session(session.clone());
        info!("GPGAuth login successful");
        Ok(session)
    }

    /// Step 4: Fetch the CSRF token and the caller's own user record.
    ///
    /// Passbolt sets a `csrfToken` cookie on `/users/me.json`; every write
    /// request must echo it in the `X-CSRF-Token` header.
    pub async fn fetch_csrf_token(client: &mut ApiClient) -> Result<User, PassboltError> {
        let response = client.get_raw("/users/me.json").await?;

        if !response.status().is_success() {
            return Err(PassboltError::auth_failed(format!(
                "GET /users/me.json failed with status {}",
                response.status().as_u16()
            )));
        }

        let csrf_token = response
            .cookies()
            .find(|c| c.name() == "csrfToken")
            .map(|c| c.value().to_string());
        if csrf_token.is_none() {
            warn!("No csrfToken cookie on /users/me.json response");
        }

        let text = response
            .text()
            .await
            .map_err(|e| PassboltError::parse(format!("Failed to read response body: {}", e)))?;
        let envelope: ApiResponse<User> = serde_json::from_str(&text)
            .map_err(|e| PassboltError::parse(format!("Failed to parse response JSON: {}", e)))?;

        let session = client.session_mut();
        session.csrf_token = csrf_token;
        session.user_id = Some(envelope.body.id.clone());
        debug!("CSRF token stored; logged in as user {}", envelope.body.id);
        Ok(envelope.body)
    }

    /// End the server-side session and clear local state.
    pub async fn logout(client: &mut ApiClient) -> Result<(), PassboltError> {
        let _ = client.get_raw("/auth/logout.json").await;
        client.set_session(SessionState::default());
        info!("GPGAuth logout complete");
        Ok(())
    }

    /// Check whether the session cookie is still valid on the server.
    pub async fn is_authenticated(client: &ApiClient) -> Result<bool, PassboltError> {
        let result: Result<ApiResponse<serde_json::Value>, _> =
            client.get("/auth/is-authenticated.json").await;
        match result {
            Ok(resp) => Ok(resp.header.status == "success"),
            Err(_) => Ok(false),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Decode the `X-GPGAuth-User-Auth-Token` header value.
///
/// The server percent-encodes the armored message and escapes `+` as the
/// literal two-character sequence `\+`.
fn decode_auth_token(raw: &str) -> Result<String, PassboltError> {
    let decoded = percent_decode(raw)?;
    Ok(decoded.replace("\\+", " "))
}

/// Minimal percent-decoder. Unlike form decoding, `+` passes through.
fn percent_decode(input: &str) -> Result<String, PassboltError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len() {
                return Err(PassboltError::auth_failed(
                    "Truncated percent escape in auth token header",
                ));
            }
            let hi = hex_val(bytes[i + 1]);
            let lo = hex_val(bytes[i + 2]);
            match (hi, lo) {
                (Some(h), Some(l)) => {
                    out.push((h << 4) | l);
                    i += 3;
                }
                _ => {
                    return Err(PassboltError::auth_failed(
                        "Invalid percent escape in auth token header",
                    ));
                }
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out)
        .map_err(|e| PassboltError::auth_failed(format!("Auth token is not UTF-8: {}", e)))
}

/// Value of a single hex digit.
fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

// ── Tests ───────────────────────────────────────────────────────────

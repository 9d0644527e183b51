//! Push gate: nothing reaches the registry without a credential.

use crate::backend::ImageBackend;
use crate::error::{GateError, Result};
use std::fmt;
use tokio::sync::OnceCell;

/// Environment variable holding the registry token, unless configured otherwise.
pub const DEFAULT_TOKEN_VAR: &str = "FINDER_REGISTRY_TOKEN";

/// Environment variable holding the registry username, unless configured otherwise.
pub const DEFAULT_USER_VAR: &str = "FINDER_REGISTRY_USER";

/// Registry credential. The token never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Registry username
    pub username: String,
    token: String,
}

impl Credential {
    /// Creates a credential.
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: token.into(),
        }
    }

    /// Bearer token, only for handing to the registry client.
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Authorization check for publishing runs.
///
/// The credential is read once by the CLI layer and handed in; the gate itself
/// never consults the environment.
#[derive(Debug)]
pub struct PushGate {
    credential: Option<Credential>,
    token_var: String,
    logged_in: OnceCell<()>,
}

impl PushGate {
    /// Creates a gate over an optional credential. `token_var` names the
    /// variable the operator should set, for the error message.
    pub fn new(credential: Option<Credential>, token_var: impl Into<String>) -> Self {
        Self {
            credential,
            token_var: token_var.into(),
            logged_in: OnceCell::new(),
        }
    }

    /// Returns the credential or fails with `MissingCredential`.
    pub fn authorize(&self) -> Result<&Credential> {
        match &self.credential {
            Some(credential) if !credential.token.is_empty() => Ok(credential),
            _ => Err(GateError::MissingCredential {
                variable: self.token_var.clone(),
            }
            .into()),
        }
    }

    /// Logs in to `registry` once per run; later calls are no-ops.
    pub async fn login<B: ImageBackend>(&self, backend: &B, registry: &str) -> Result<()> {
        let credential = self.authorize()?;
        self.logged_in
            .get_or_try_init(|| async {
                log::info!("Logging in to {} as {}", registry, credential.username);
                backend.login(registry, credential).await
            })
            .await?;
        Ok(())
    }

    /// Whether a login already happened in this run
    pub fn is_logged_in(&self) -> bool {
        self.logged_in.initialized()
    }
}

/// Reads a credential from the given environment variables. Empty values count as unset.
pub fn credential_from_env(token_var: &str, user_var: &str) -> Option<Credential> {
    let token = std::env::var(token_var).ok().filter(|t| !t.trim().is_empty())?;
    let username = std::env::var(user_var)
        .ok()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| "oauth2".to_string());
    Some(Credential::new(username, token))
}

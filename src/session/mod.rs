use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::client::ApiError;
use crate::config::ResourceSpec;

/// The signed-in identity. Replaces the original deployment's plaintext
/// localStorage flags with an explicit object holding a server-issued token.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Session {
    pub authenticated: bool,
    pub user_id: Option<String>,
    pub role: Option<String>,
    pub token: Option<String>,
}

impl Session {
    /// Route gating: a resource with an empty role list is open to any
    /// signed-in role.
    pub fn can_access(&self, resource: &ResourceSpec) -> bool {
        if !self.authenticated {
            return false;
        }
        if resource.roles.is_empty() {
            return true;
        }
        match self.role.as_deref() {
            Some(role) => resource
                .roles
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(role)),
            None => false,
        }
    }
}

/// File-backed persistence with an explicit lifecycle: `init` on app start,
/// `save` after login, `clear` on logout.
#[derive(Clone, Debug)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// A missing or unreadable session file simply means logged out.
    pub fn init(&self) -> Session {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str::<Session>(&contents) {
                Ok(session) => session,
                Err(e) => {
                    log::warn!(
                        "ignoring malformed session file '{}': {e}",
                        self.path.display()
                    );
                    Session::default()
                }
            },
            Err(_) => Session::default(),
        }
    }

    pub fn save(&self, session: &Session) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                format!(
                    "failed to create session directory '{}': {e}",
                    parent.display()
                )
            })?;
        }
        let contents = serde_json::to_string_pretty(session)
            .map_err(|e| format!("failed to encode session: {e}"))?;
        std::fs::write(&self.path, contents)
            .map_err(|e| format!("failed to write session file '{}': {e}", self.path.display()))
    }

    pub fn clear(&self) -> Result<(), String> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(format!(
                "failed to remove session file '{}': {e}",
                self.path.display()
            )),
        }
    }
}

/// Exchanges credentials for a server-issued token and role via
/// `POST {base}/auth/login`. The password goes to the server; nothing is
/// compared client-side.
pub async fn login(
    http: &reqwest::Client,
    base_url: &reqwest::Url,
    user_id: &str,
    password: &str,
) -> Result<Session, ApiError> {
    let url = base_url
        .join("auth/login")
        .map_err(|_| ApiError::InvalidBaseUrl {
            url: base_url.to_string(),
        })?;
    let body = serde_json::json!({ "userId": user_id, "password": password });
    let response = http
        .post(url)
        .json(&body)
        .send()
        .await
        .map_err(|e| ApiError::Transport { source: e })?;
    let status = response.status();
    if !status.is_success() {
        let url = response.url().to_string();
        let detail = if status.as_u16() == 401 {
            ": invalid credentials".to_string()
        } else {
            String::new()
        };
        return Err(ApiError::Status {
            status: status.as_u16(),
            url,
            detail,
        });
    }
    let payload = response
        .json::<Value>()
        .await
        .map_err(|e| ApiError::shape(format!("login response is not valid JSON: {e}")))?;
    let body = payload.get("data").unwrap_or(&payload);
    let token = body
        .get("token")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::shape("login response carries no 'token'"))?;
    let role = body.get("role").and_then(Value::as_str);
    Ok(Session {
        authenticated: true,
        user_id: Some(user_id.to_string()),
        role: role.map(str::to_string),
        token: Some(token.to_string()),
    })
}

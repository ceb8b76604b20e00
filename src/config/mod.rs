use std::env;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::record::DEFAULT_ID_FIELD;
use crate::upload::UploadStrategy;

/// One REST collection the console can manage, parameterized by path and id
/// field so one client abstraction covers every backend.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ResourceSpec {
    pub name: String,
    /// Path segment under the base URL; defaults to the resource name.
    pub path: Option<String>,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Fields checked client-side before a create/update leaves the machine.
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub upload: UploadStrategy,
    /// Roles allowed to touch this resource; empty means any signed-in role.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Record field used for date-range filtering.
    pub date_field: Option<String>,
}

fn default_id_field() -> String {
    DEFAULT_ID_FIELD.to_string()
}

impl ResourceSpec {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: None,
            id_field: default_id_field(),
            required: Vec::new(),
            upload: UploadStrategy::default(),
            roles: Vec::new(),
            date_field: None,
        }
    }

    pub fn collection_path(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Default, Deserialize, Serialize, Clone)]
pub struct ConfigFile {
    pub base_url: Option<String>,
    pub timeout: Option<usize>,
    pub proxy: Option<String>,
    pub page_size: Option<usize>,
    pub session_file: Option<String>,
    pub no_color: Option<bool>,
    pub resources: Option<Vec<ResourceSpec>>,
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("USERPROFILE").map(PathBuf::from))
        .or_else(|| {
            let drive = env::var_os("HOMEDRIVE")?;
            let path = env::var_os("HOMEPATH")?;
            Some(PathBuf::from(drive).join(path))
        })
}

pub fn default_config_path() -> Option<PathBuf> {
    Some(home_dir()?.join(".opsdesk").join("config.yml"))
}

pub fn default_session_path() -> Option<PathBuf> {
    Some(home_dir()?.join(".opsdesk").join("session.json"))
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn load_config(path: &PathBuf, allow_missing: bool) -> Result<ConfigFile, String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_yaml::from_str::<ConfigFile>(&contents)
            .map_err(|e| format!("failed to parse config '{}': {e}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && allow_missing => {
            Ok(ConfigFile::default())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(format!("config file not found '{}'", path.display()))
        }
        Err(e) => Err(format!("failed to read config '{}': {e}", path.display())),
    }
}

fn default_config_yaml() -> String {
    r#"# Opsdesk config
#
# Location (default):
#   ~/.opsdesk/config.yml

# Backend (required)
# base_url: https://api.example.com/api

# HTTP
timeout: 10
# proxy: http://127.0.0.1:8080

# Display
page_size: 10
no_color: false

# Session file (defaults to ~/.opsdesk/session.json)
# session_file: ~/.opsdesk/session.json

# Managed resources. Each entry maps one admin page onto the uniform REST
# convention: GET/POST {base}/{path}, PUT/DELETE {base}/{path}/{id}.
# resources:
#   - name: enquiries
#     required: [firstName, email]
#     date_field: createdAt
#   - name: jobs
#     roles: [admin]
#     required: [title, location]
#   - name: gallery
#     required: [title, category]
#     upload: two_step      # or: multipart
"#
    .to_string()
}

pub fn ensure_default_config_file(path: &PathBuf) -> Result<(), String> {
    if path.exists() {
        return Ok(());
    }
    let parent = path
        .parent()
        .ok_or_else(|| format!("invalid config path '{}'", path.display()))?;
    std::fs::create_dir_all(parent).map_err(|e| {
        format!(
            "failed to create config directory '{}': {e}",
            parent.display()
        )
    })?;
    let contents = default_config_yaml();
    std::fs::write(path, contents)
        .map_err(|e| format!("failed to write config file '{}': {e}", path.display()))?;
    Ok(())
}

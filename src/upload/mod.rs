use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::client::ApiError;
use crate::record::{Draft, ImageRef, REVISION_KEY};

/// How a resource's backend expects binaries. Two-step uploads the file to
/// `{path}/upload` and embeds the returned URL in a JSON mutation; multipart
/// attaches the file to the mutation itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStrategy {
    #[default]
    TwoStep,
    Multipart,
}

async fn file_part(image: &ImageRef) -> Result<reqwest::multipart::Part, ApiError> {
    let path = image
        .pending_path()
        .ok_or_else(|| ApiError::shape("expected a pending file".to_string()))?;
    let bytes = tokio::fs::read(path).await.map_err(|e| ApiError::FileRead {
        path: path.display().to_string(),
        source: e,
    })?;
    let file_name = image
        .file_name()
        .unwrap_or_else(|| "upload.bin".to_string());
    Ok(reqwest::multipart::Part::bytes(bytes).file_name(file_name))
}

/// Uploads one binary and returns the URL the backend persisted it under.
/// The session token rides the upload like any other request against an
/// authenticated backend. The response is envelope-tolerant:
/// `{ "url": ... }` or `{ "data": { "url": ... } }`.
pub async fn upload_binary(
    http: &reqwest::Client,
    auth_token: Option<&str>,
    upload_url: reqwest::Url,
    image: &ImageRef,
) -> Result<String, ApiError> {
    let part = file_part(image).await?;
    let form = reqwest::multipart::Form::new().part("image", part);
    let mut request = http.post(upload_url).multipart(form);
    if let Some(token) = auth_token {
        request = request.bearer_auth(token);
    }
    let response = request
        .send()
        .await
        .map_err(|e| ApiError::Transport { source: e })?;
    let status = response.status();
    if !status.is_success() {
        let url = response.url().to_string();
        return Err(ApiError::Status {
            status: status.as_u16(),
            url,
            detail: String::new(),
        });
    }
    let body = response
        .json::<Value>()
        .await
        .map_err(|e| ApiError::shape(format!("upload response is not valid JSON: {e}")))?;
    let url = body
        .get("url")
        .or_else(|| body.get("data").and_then(|d| d.get("url")))
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::shape("upload response carries no 'url'"))?;
    Ok(url.to_string())
}

/// Replaces every pending file in the draft with the persisted URL returned
/// by the upload endpoint. Uploads run concurrently; one failure fails the
/// whole submit before any mutation is sent. After this, the draft
/// serializes cleanly to JSON.
pub async fn resolve_pending_images(
    http: &reqwest::Client,
    auth_token: Option<&str>,
    upload_url: reqwest::Url,
    draft: &mut Draft,
) -> Result<(), ApiError> {
    let pending: Vec<(String, ImageRef)> = draft
        .images()
        .iter()
        .filter(|(_, image)| image.is_pending())
        .map(|(key, image)| (key.clone(), image.clone()))
        .collect();
    let uploads = pending.iter().map(|(key, image)| {
        let upload_url = upload_url.clone();
        async move {
            let url = upload_binary(http, auth_token, upload_url, image).await?;
            Ok::<(String, String), ApiError>((key.clone(), url))
        }
    });
    for (key, url) in futures::future::try_join_all(uploads).await? {
        log::debug!("uploaded '{key}' -> {url}");
        draft.mark_uploaded(&key, url);
    }
    Ok(())
}

/// Builds the multipart body for a single-round-trip mutation: every scalar
/// field as a text part, every image as either its URL or the file bytes.
/// Nothing here passes through JSON serialization, so file handles cannot be
/// silently stringified.
pub async fn build_record_form(
    draft: &Draft,
    id_field: &str,
) -> Result<reqwest::multipart::Form, ApiError> {
    let mut form = reqwest::multipart::Form::new();
    for (key, value) in draft.fields() {
        if key == id_field || key == REVISION_KEY {
            continue;
        }
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        form = form.text(key.clone(), text);
    }
    for (key, image) in draft.images() {
        match image {
            ImageRef::Persisted(url) => {
                form = form.text(key.clone(), url.clone());
            }
            ImageRef::Pending(_) => {
                let part = file_part(image).await?;
                form = form.part(key.clone(), part);
            }
        }
    }
    Ok(form)
}

use std::time::Duration;

use chrono::NaiveDate;
use serde_json::Value;
use thiserror::Error;

use crate::config::ResourceSpec;
use crate::record::{Draft, ListPage, Record};
use crate::upload::{self, UploadStrategy};

/// Failure taxonomy for everything the client does. Validation never reaches
/// the network; shape errors are contract violations and are kept distinct
/// from transport and status failures.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {source}")]
    Transport {
        #[source]
        source: reqwest::Error,
    },

    #[error("server returned {status} for {url}{detail}")]
    Status {
        status: u16,
        url: String,
        detail: String,
    },

    #[error("unexpected server response: {message}")]
    UnexpectedShape { message: String },

    #[error("missing required fields: {fields}")]
    Validation { fields: String },

    #[error("invalid base URL: {url}")]
    InvalidBaseUrl { url: String },

    #[error("failed to build HTTP client: {source}")]
    HttpClientBuild {
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to setup proxy: {proxy}: {source}")]
    ProxySetup {
        proxy: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to read file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ApiError {
    pub fn validation(missing: &[String]) -> Self {
        ApiError::Validation {
            fields: missing.join(", "),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ApiError::Validation { .. })
    }

    pub fn shape(message: impl Into<String>) -> Self {
        ApiError::UnexpectedShape {
            message: message.into(),
        }
    }
}

/// Query parameters the backends accept for list endpoints. Names follow the
/// wire convention (`fromDate`/`toDate` rather than snake case).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub search: Option<String>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub category: Option<String>,
}

impl ListQuery {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(page) = self.page {
            pairs.push(("page", page.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if let Some(search) = self.search.as_deref() {
            if !search.trim().is_empty() {
                pairs.push(("search", search.trim().to_string()));
            }
        }
        if let Some(from) = self.from_date {
            pairs.push(("fromDate", from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = self.to_date {
            pairs.push(("toDate", to.format("%Y-%m-%d").to_string()));
        }
        if let Some(category) = self.category.as_deref() {
            if !category.trim().is_empty() {
                pairs.push(("category", category.trim().to_string()));
            }
        }
        pairs
    }
}

pub fn build_http_client(
    timeout_seconds: usize,
    proxy: Option<&str>,
) -> Result<reqwest::Client, ApiError> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::USER_AGENT,
        reqwest::header::HeaderValue::from_static(concat!(
            "opsdesk/",
            env!("CARGO_PKG_VERSION")
        )),
    );

    let timeout = Duration::from_secs(timeout_seconds.try_into().unwrap_or(10));
    let mut builder = reqwest::Client::builder()
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(timeout);

    if let Some(proxy) = proxy.filter(|p| !p.trim().is_empty()) {
        let proxy = reqwest::Proxy::all(proxy).map_err(|e| ApiError::ProxySetup {
            proxy: proxy.to_string(),
            source: e,
        })?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| ApiError::HttpClientBuild { source: e })
}

/// Uniform repository over one backend: `GET/POST {base}/{path}` and
/// `PUT/DELETE {base}/{path}/{id}` for every resource, regardless of what the
/// original deployment called its endpoints.
#[derive(Clone, Debug)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: reqwest::Url,
    auth_token: Option<String>,
}

impl RestClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        auth_token: Option<String>,
    ) -> Result<Self, ApiError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        let base_url =
            reqwest::Url::parse(&format!("{trimmed}/")).map_err(|_| ApiError::InvalidBaseUrl {
                url: base_url.to_string(),
            })?;
        Ok(Self {
            http,
            base_url,
            auth_token,
        })
    }

    pub fn base_url(&self) -> &reqwest::Url {
        &self.base_url
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn join(&self, segments: &str) -> Result<reqwest::Url, ApiError> {
        self.base_url
            .join(segments)
            .map_err(|_| ApiError::InvalidBaseUrl {
                url: format!("{}{}", self.base_url, segments),
            })
    }

    pub fn collection_url(&self, resource: &ResourceSpec) -> Result<reqwest::Url, ApiError> {
        self.join(resource.collection_path())
    }

    pub fn item_url(&self, resource: &ResourceSpec, id: &str) -> Result<reqwest::Url, ApiError> {
        self.join(&format!("{}/{}", resource.collection_path(), id))
    }

    pub fn upload_url(&self, resource: &ResourceSpec) -> Result<reqwest::Url, ApiError> {
        self.join(&format!("{}/upload", resource.collection_path()))
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_token.as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, ApiError> {
        let status = response.status();
        let url = response.url().to_string();
        if !status.is_success() {
            let detail = match response.text().await {
                Ok(body) if !body.trim().is_empty() => {
                    let mut snippet: String = body.trim().chars().take(200).collect();
                    snippet.insert_str(0, ": ");
                    snippet
                }
                _ => String::new(),
            };
            return Err(ApiError::Status {
                status: status.as_u16(),
                url,
                detail,
            });
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| ApiError::shape(format!("body is not valid JSON: {e}")))
    }

    pub async fn list(
        &self,
        resource: &ResourceSpec,
        query: &ListQuery,
    ) -> Result<ListPage, ApiError> {
        let url = self.collection_url(resource)?;
        let mut request = self.http.get(url);
        let pairs = query.query_pairs();
        if !pairs.is_empty() {
            request = request.query(&pairs);
        }
        let response = self
            .apply_auth(request)
            .send()
            .await
            .map_err(|e| ApiError::Transport { source: e })?;
        let body = Self::read_json(response).await?;
        let page = crate::record::parse_list_envelope(body).map_err(ApiError::shape)?;
        log::debug!(
            "listed {} '{}' record(s)",
            page.records.len(),
            resource.name
        );
        Ok(page)
    }

    /// Runs the resource's upload convention against a draft, then sends the
    /// mutation. Two-step resources upload pending binaries first and submit
    /// JSON; multipart resources carry the files in the mutation itself.
    async fn send_draft(
        &self,
        resource: &ResourceSpec,
        method: reqwest::Method,
        url: reqwest::Url,
        draft: &Draft,
    ) -> Result<Record, ApiError> {
        let mut draft = draft.clone();
        let request = if draft.has_pending_files() {
            match resource.upload {
                UploadStrategy::TwoStep => {
                    let upload_url = self.upload_url(resource)?;
                    upload::resolve_pending_images(
                        &self.http,
                        self.auth_token.as_deref(),
                        upload_url,
                        &mut draft,
                    )
                    .await?;
                    let payload = draft
                        .to_json_payload(&resource.id_field)
                        .map_err(ApiError::shape)?;
                    self.http.request(method, url).json(&payload)
                }
                UploadStrategy::Multipart => {
                    let form = upload::build_record_form(&draft, &resource.id_field).await?;
                    self.http.request(method, url).multipart(form)
                }
            }
        } else {
            let payload = draft
                .to_json_payload(&resource.id_field)
                .map_err(ApiError::shape)?;
            self.http.request(method, url).json(&payload)
        };
        let response = self
            .apply_auth(request)
            .send()
            .await
            .map_err(|e| ApiError::Transport { source: e })?;
        let body = Self::read_json(response).await?;
        if body.is_null() {
            // 204 on a mutation; the caller refetches anyway.
            return Ok(Record::from_map(serde_json::Map::new()));
        }
        crate::record::parse_record_envelope(body).map_err(ApiError::shape)
    }

    pub async fn create(
        &self,
        resource: &ResourceSpec,
        draft: &Draft,
    ) -> Result<Record, ApiError> {
        let url = self.collection_url(resource)?;
        self.send_draft(resource, reqwest::Method::POST, url, draft)
            .await
    }

    pub async fn update(
        &self,
        resource: &ResourceSpec,
        id: &str,
        draft: &Draft,
    ) -> Result<Record, ApiError> {
        let url = self.item_url(resource, id)?;
        self.send_draft(resource, reqwest::Method::PUT, url, draft)
            .await
    }

    pub async fn remove(&self, resource: &ResourceSpec, id: &str) -> Result<(), ApiError> {
        let url = self.item_url(resource, id)?;
        let response = self
            .apply_auth(self.http.delete(url))
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
        Ok(())
    }
}

//! Policy sources and ordered candidate resolution.

use super::{PolicyFile, PolicyFormat};
use crate::config::PolicySourceConfig;
use crate::{Error, Result};

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a policy document comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicySource {
    /// Local YAML or JSON file
    File(PathBuf),
    /// HTTP endpoint answering `GET` with a policy document
    Remote {
        /// Endpoint URL
        url: String,
        /// Optional bearer token
        api_key: Option<String>,
    },
    /// The policy set bundled with the crate
    Builtin,
}

impl PolicySource {
    /// Build the source named by a configuration, if any. A remote endpoint
    /// takes precedence over a local path.
    pub fn from_config(config: &PolicySourceConfig) -> Option<Self> {
        if let Some(url) = &config.api_endpoint {
            return Some(PolicySource::Remote {
                url: url.clone(),
                api_key: config.api_key.clone(),
            });
        }
        config.path.as_ref().map(|p| PolicySource::File(p.clone()))
    }

    /// Label used in statistics and error messages.
    pub fn label(&self) -> String {
        match self {
            PolicySource::File(path) => path.display().to_string(),
            PolicySource::Remote { url, .. } => url.clone(),
            PolicySource::Builtin => "builtin".to_string(),
        }
    }

    /// Read, parse and validate the document.
    pub async fn load(&self) -> Result<PolicyFile> {
        let document = match self {
            PolicySource::File(path) => PolicyFile::from_file(path)?,
            PolicySource::Remote { url, api_key } => fetch_remote(url, api_key.as_deref()).await?,
            PolicySource::Builtin => PolicyFile::builtin()?,
        };

        info!(
            source = %self,
            version = %document.version,
            policies = document.policies.len(),
            "Loaded policy document"
        );
        Ok(document)
    }
}

impl fmt::Display for PolicySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

async fn fetch_remote(url: &str, api_key: Option<&str>) -> Result<PolicyFile> {
    let client = reqwest::Client::builder()
        .timeout(REMOTE_TIMEOUT)
        .user_agent(concat!("llm-guardrails/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::policy_source(url, format!("cannot build HTTP client: {}", e)))?;

    let mut request = client.get(url);
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }

    let response = request
        .send()
        .await
        .map_err(|e| Error::policy_source(url, format!("request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::policy_source(url, format!("HTTP error: {}", status)));
    }

    let format = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(PolicyFormat::from_content_type)
        .unwrap_or(PolicyFormat::Auto);

    let body = response
        .text()
        .await
        .map_err(|e| Error::policy_source(url, format!("cannot read body: {}", e)))?;

    PolicyFile::parse(&body, format, url)
}

/// Resolves a policy document from an ordered list of candidate sources.
#[derive(Debug, Clone, Default)]
pub struct PolicyLoader {
    candidates: Vec<PolicySource>,
}

impl PolicyLoader {
    /// Create a loader with no candidates.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader over the configured source followed by the conventional
    /// local file locations.
    pub fn from_config(config: &PolicySourceConfig) -> Self {
        let mut loader = Self::new();
        if let Some(source) = PolicySource::from_config(config) {
            loader = loader.candidate(source);
        }
        for path in default_candidate_paths() {
            loader = loader.candidate(PolicySource::File(path));
        }
        loader
    }

    /// Append a candidate.
    pub fn candidate(mut self, source: PolicySource) -> Self {
        if !self.candidates.contains(&source) {
            self.candidates.push(source);
        }
        self
    }

    /// Candidates in resolution order.
    pub fn candidates(&self) -> &[PolicySource] {
        &self.candidates
    }

    /// Load the first candidate that parses successfully.
    ///
    /// Fails with [`Error::PolicySource`] listing every candidate when none
    /// resolves; there is no empty-policy fallback.
    pub async fn resolve(&self) -> Result<(PolicySource, PolicyFile)> {
        let mut failures = Vec::new();

        for source in &self.candidates {
            if let PolicySource::File(path) = source {
                if !Path::new(path).exists() {
                    debug!(candidate = %source, "Policy candidate does not exist");
                    failures.push(format!("{}: not found", source));
                    continue;
                }
            }

            match source.load().await {
                Ok(document) => return Ok((source.clone(), document)),
                Err(e) => {
                    warn!(candidate = %source, error = %e, "Policy candidate failed to load");
                    failures.push(format!("{}: {}", source, e));
                }
            }
        }

        let message = if failures.is_empty() {
            "no policy source candidates configured".to_string()
        } else {
            format!("no policy source could be loaded ({})", failures.join("; "))
        };
        Err(Error::policy_source("default", message))
    }
}

/// Conventional policy file locations, relative to the working directory.
pub fn default_candidate_paths() -> Vec<PathBuf> {
    [
        "policies.yaml",
        "policies.yml",
        "policies.json",
        "config/policies.yaml",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

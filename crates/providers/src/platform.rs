use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use crate::{
    check_status, parse_json, PlatformProvider, ProviderError, RegistrationRef, SiteRef,
    VerificationState,
};

/// Client for a Vercel style project domains API.
#[derive(Clone)]
pub struct PlatformDomainClient {
    http: Client,
    base_url: Url,
    api_token: String,
    team_id: Option<String>,
}

impl PlatformDomainClient {
    pub fn new(
        api_token: impl Into<String>,
        team_id: Option<String>,
        base_url: Url,
        http: Client,
    ) -> Self {
        Self {
            http,
            base_url,
            api_token: api_token.into(),
            team_id,
        }
    }

    /// Fetches the project's view of a hostname, `None` when it is not attached.
    async fn fetch_project_domain(
        &self,
        project_id: &str,
        hostname: &str,
    ) -> Result<Option<ProjectDomain>, ProviderError> {
        let url = self.url(&format!("v9/projects/{project_id}/domains/{hostname}"))?;
        let response = self.authorized_request(Method::GET, url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        parse_json(response).await.map(Some)
    }

    async fn fetch_config(&self, hostname: &str) -> Result<DomainConfig, ProviderError> {
        let url = self.url(&format!("v6/domains/{hostname}/config"))?;
        let response = self.authorized_request(Method::GET, url).send().await?;
        parse_json(response).await
    }

    fn url(&self, path: &str) -> Result<Url, ProviderError> {
        let mut url = self.base_url.join(path)?;
        if let Some(team_id) = &self.team_id {
            url.query_pairs_mut().append_pair("teamId", team_id);
        }
        Ok(url)
    }

    fn authorized_request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.api_token))
    }
}

#[async_trait]
impl PlatformProvider for PlatformDomainClient {
    async fn register_domain(
        &self,
        hostname: &str,
        site: &SiteRef,
    ) -> Result<RegistrationRef, ProviderError> {
        let registration = RegistrationRef {
            project_id: site.project_id.clone(),
            hostname: hostname.to_string(),
        };

        let url = self.url(&format!("v10/projects/{}/domains", site.project_id))?;
        let response = self
            .authorized_request(Method::POST, url)
            .json(&serde_json::json!({ "name": hostname }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::CONFLICT || status == StatusCode::BAD_REQUEST {
            // Already attached to our project is success, anything else holds
            // the hostname elsewhere.
            let body = response.text().await.unwrap_or_default();
            if self
                .fetch_project_domain(&site.project_id, hostname)
                .await?
                .is_some()
            {
                info!(
                    stage = "platform",
                    hostname,
                    project_id = %site.project_id,
                    "hostname already registered with project"
                );
                return Ok(registration);
            }
            let reason = serde_json::from_str::<ErrorBody>(&body)
                .map(|err| format!("{}: {}", err.error.code, err.error.message))
                .unwrap_or(body);
            if status == StatusCode::CONFLICT {
                return Err(ProviderError::Conflict(reason));
            }
            return Err(ProviderError::Status { status, body: reason });
        }

        let domain: ProjectDomain = parse_json(response).await?;
        info!(
            stage = "platform",
            hostname = %domain.name,
            project_id = %site.project_id,
            site_id = %site.site_id,
            verified = domain.verified,
            "registered hostname with platform"
        );
        Ok(registration)
    }

    async fn check_verification(
        &self,
        registration: &RegistrationRef,
    ) -> Result<VerificationState, ProviderError> {
        let Some(domain) = self
            .fetch_project_domain(&registration.project_id, &registration.hostname)
            .await?
        else {
            return Err(ProviderError::Status {
                status: StatusCode::NOT_FOUND,
                body: format!("{registration} is not registered"),
            });
        };

        if !domain.verified {
            // An ownership challenge means another account holds the hostname.
            if domain
                .verification
                .iter()
                .any(|challenge| challenge.reason.as_deref() == Some(OWNERSHIP_CHALLENGE))
            {
                return Ok(VerificationState::Conflict);
            }
            return Ok(VerificationState::Pending);
        }

        let config = self.fetch_config(&registration.hostname).await?;
        if config.misconfigured {
            warn!(
                stage = "platform",
                hostname = %registration.hostname,
                "platform reports dns misconfigured"
            );
            return Ok(VerificationState::Misconfigured);
        }
        Ok(VerificationState::Verified)
    }

    async fn remove_domain(&self, registration: &RegistrationRef) -> Result<(), ProviderError> {
        let url = self.url(&format!(
            "v9/projects/{}/domains/{}",
            registration.project_id, registration.hostname
        ))?;
        let response = self.authorized_request(Method::DELETE, url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response).await?;
        Ok(())
    }
}

const OWNERSHIP_CHALLENGE: &str = "pending_domain_verification";

#[derive(Debug, Deserialize)]
struct ProjectDomain {
    name: String,
    verified: bool,
    #[serde(default)]
    verification: Vec<Challenge>,
}

#[derive(Debug, Deserialize)]
struct Challenge {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DomainConfig {
    #[serde(default)]
    misconfigured: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: String,
    #[serde(default)]
    message: String,
}

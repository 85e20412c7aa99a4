use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::error;

use domain_push_core::{Domain, PushOutcome, PushStatusReport, Site};
use domain_push_storage::PushLogEntry;

use crate::hostname_cache::SiteResolution;
use crate::problem::ProblemResponse;
use crate::router::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSiteRequest {
    name: String,
    #[serde(default)]
    platform_project_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDomainRequest {
    hostname: String,
    #[serde(default = "default_redirect")]
    redirect_to_primary: bool,
}

fn default_redirect() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDomainRequest {
    redirect_to_primary: bool,
}

#[derive(Debug, Deserialize)]
pub struct ResolveQuery {
    hostname: String,
}

pub async fn save_site(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
    Json(request): Json<SaveSiteRequest>,
) -> Result<Json<Site>, ProblemResponse> {
    let site = state
        .domains()
        .upsert_site(
            &site_id,
            &request.name,
            request.platform_project_id.as_deref(),
        )
        .await?;
    Ok(Json(site))
}

pub async fn list_domains(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
) -> Result<Json<Vec<Domain>>, ProblemResponse> {
    Ok(Json(state.domains().list(&site_id).await?))
}

pub async fn create_domain(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
    Json(request): Json<CreateDomainRequest>,
) -> Result<(StatusCode, Json<Domain>), ProblemResponse> {
    let domain = state
        .domains()
        .create(&site_id, &request.hostname, request.redirect_to_primary)
        .await?;
    Ok((StatusCode::CREATED, Json(domain)))
}

pub async fn update_domain(
    State(state): State<AppState>,
    Path(domain_id): Path<String>,
    Json(request): Json<UpdateDomainRequest>,
) -> Result<Json<Domain>, ProblemResponse> {
    let domain = state
        .domains()
        .set_redirect(&domain_id, request.redirect_to_primary)
        .await?;
    Ok(Json(domain))
}

pub async fn make_primary(
    State(state): State<AppState>,
    Path(domain_id): Path<String>,
) -> Result<Json<Domain>, ProblemResponse> {
    Ok(Json(state.domains().set_primary(&domain_id).await?))
}

pub async fn delete_domain(
    State(state): State<AppState>,
    Path(domain_id): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    state.domains().delete(&domain_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Runs the push on its own task so a disconnecting client cannot cancel it
/// between steps.
pub async fn push_domain(
    State(state): State<AppState>,
    Path(domain_id): Path<String>,
) -> Result<Json<PushOutcome>, ProblemResponse> {
    let orchestrator = state.orchestrator().clone();
    let task = tokio::spawn(async move { orchestrator.push_domain(&domain_id).await });

    match task.await {
        Ok(result) => Ok(Json(result?)),
        Err(err) => {
            error!(stage = "api", error = %err, "push task aborted");
            Err(ProblemResponse::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "push_aborted",
                "push task aborted",
            ))
        }
    }
}

pub async fn push_status(
    State(state): State<AppState>,
    Path(domain_id): Path<String>,
) -> Result<Json<PushStatusReport>, ProblemResponse> {
    Ok(Json(
        state
            .orchestrator()
            .get_domain_push_status(&domain_id)
            .await?,
    ))
}

pub async fn push_history(
    State(state): State<AppState>,
    Path(domain_id): Path<String>,
) -> Result<Json<Vec<PushLogEntry>>, ProblemResponse> {
    Ok(Json(
        state
            .orchestrator()
            .get_domain_push_history(&domain_id)
            .await?,
    ))
}

pub async fn resolve(
    State(state): State<AppState>,
    Query(query): Query<ResolveQuery>,
) -> Result<Json<SiteResolution>, ProblemResponse> {
    state
        .domains()
        .resolve(&query.hostname)
        .await?
        .map(Json)
        .ok_or_else(|| {
            ProblemResponse::new(
                StatusCode::NOT_FOUND,
                "hostname_not_found",
                format!("no site serves {}", query.hostname),
            )
        })
}

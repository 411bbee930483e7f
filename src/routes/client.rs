use axum::{
    extract::{Path, State},
    Json,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::{
    client_links,
    error::AppResult,
    state::AppState,
    tenancy::TenantScope,
    workflow::{self, Performer, TransitionData, WorkflowAction},
};

use super::rfis::{rfi_response, RfiResponse};

#[derive(Serialize)]
pub struct ClientRfiView {
    pub rfi: RfiResponse,
    pub project_name: String,
    pub client_company_name: String,
    pub company_name: String,
    pub read_only: bool,
    pub link_expires_at: NaiveDateTime,
}

/// Anonymous view of the single RFI a client link is bound to. The token is
/// the whole capability; no account or membership is involved.
pub async fn view_rfi(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<Json<ClientRfiView>> {
    let mut conn = state.db()?;
    let capability = client_links::validate(&mut conn, &token)?;

    Ok(Json(ClientRfiView {
        rfi: rfi_response(capability.rfi),
        project_name: capability.project.name,
        client_company_name: capability.project.client_company_name,
        company_name: capability.company.name,
        read_only: capability.read_only,
        link_expires_at: capability.token.expires_at,
    }))
}

#[derive(Deserialize)]
pub struct ClientResponseRequest {
    pub response: String,
}

/// One-shot response submission. Runs through the same workflow guard as
/// tenant users, so a second submission after `response_received` comes back
/// as a conflict with the original response untouched.
pub async fn submit_response(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<ClientResponseRequest>,
) -> AppResult<Json<ClientRfiView>> {
    let mut conn = state.db()?;
    let capability = client_links::validate(&mut conn, &token)?;

    let scope = TenantScope::company(capability.project.company_id);
    let performer = Performer::Client {
        token_id: capability.token.id,
    };
    let rfi = workflow::apply_transition(
        &mut conn,
        &scope,
        &performer,
        capability.rfi.id,
        WorkflowAction::Respond,
        TransitionData {
            response: Some(payload.response),
            ..TransitionData::default()
        },
    )?;

    Ok(Json(ClientRfiView {
        rfi: rfi_response(rfi),
        project_name: capability.project.name,
        client_company_name: capability.project.client_company_name,
        company_name: capability.company.name,
        read_only: true,
        link_expires_at: capability.token.expires_at,
    }))
}

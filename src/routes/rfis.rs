use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use diesel::dsl::max;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    client_links,
    error::{AppError, AppResult},
    models::{NewRfi, Rfi},
    notifications::{self, EventMetadata, EVENT_LINK_GENERATED, PERFORMED_BY_USER},
    overdue,
    permissions::Permission,
    schema::{company_users, rfis},
    state::AppState,
    tenancy::{self, ActorContext},
    utils::json::{classify_nullable, NullableValue},
    workflow::{self, Stage, Status, TransitionData, WorkflowAction},
};

#[derive(Serialize)]
pub struct RfiResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub number: i32,
    pub subject: String,
    pub question: String,
    pub status: String,
    pub stage: String,
    pub due_date: Option<NaiveDate>,
    pub assigned_to: Option<Uuid>,
    pub response: Option<String>,
    pub response_date: Option<NaiveDateTime>,
    pub overdue: bool,
    pub created_by: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// The overdue flag is derived at read time, per response, and never stored.
pub(crate) fn rfi_response(rfi: Rfi) -> RfiResponse {
    let now = Utc::now().naive_utc();
    let overdue = Stage::from_str(&rfi.stage)
        .map(|stage| overdue::is_overdue(stage, rfi.created_at, now))
        .unwrap_or(false);

    RfiResponse {
        id: rfi.id,
        project_id: rfi.project_id,
        number: rfi.number,
        subject: rfi.subject,
        question: rfi.question,
        status: rfi.status,
        stage: rfi.stage,
        due_date: rfi.due_date,
        assigned_to: rfi.assigned_to,
        response: rfi.response,
        response_date: rfi.response_date,
        overdue,
        created_by: rfi.created_by,
        created_at: rfi.created_at,
        updated_at: rfi.updated_at,
    }
}

#[derive(Deserialize)]
pub struct CreateRfiRequest {
    pub subject: String,
    pub question: String,
    pub due_date: Option<NaiveDate>,
    pub assigned_to: Option<Uuid>,
}

pub async fn create_rfi(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<CreateRfiRequest>,
) -> AppResult<(StatusCode, Json<RfiResponse>)> {
    actor.require(Permission::CreateRfi)?;

    if payload.subject.trim().is_empty() {
        return Err(AppError::bad_request("subject must not be empty"));
    }
    if payload.question.trim().is_empty() {
        return Err(AppError::bad_request("question must not be empty"));
    }

    let mut conn = state.db()?;
    let project = tenancy::find_project(&mut conn, &actor.scope(), project_id)?;

    if let Some(assignee) = payload.assigned_to {
        ensure_member(&mut conn, assignee, project.company_id)?;
    }

    let next_number: i32 = rfis::table
        .filter(rfis::project_id.eq(project.id))
        .select(max(rfis::number))
        .first::<Option<i32>>(&mut conn)?
        .unwrap_or(0)
        + 1;

    let new_rfi = NewRfi {
        id: Uuid::new_v4(),
        project_id: project.id,
        number: next_number,
        subject: payload.subject.trim().to_string(),
        question: payload.question.trim().to_string(),
        status: Status::Draft.as_str().to_string(),
        stage: Stage::Submitted.as_str().to_string(),
        due_date: payload.due_date,
        assigned_to: payload.assigned_to,
        created_by: actor.user_id,
    };

    diesel::insert_into(rfis::table)
        .values(&new_rfi)
        .execute(&mut conn)?;

    let rfi: Rfi = rfis::table.find(new_rfi.id).first(&mut conn)?;
    Ok((StatusCode::CREATED, Json(rfi_response(rfi))))
}

pub async fn list_project_rfis(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<Vec<RfiResponse>>> {
    actor.require(Permission::ViewRfis)?;

    let mut conn = state.db()?;
    let rfis = tenancy::list_rfis_for_project(&mut conn, &actor.scope(), project_id)?;
    Ok(Json(rfis.into_iter().map(rfi_response).collect()))
}

pub async fn get_rfi(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(rfi_id): Path<Uuid>,
) -> AppResult<Json<RfiResponse>> {
    actor.require(Permission::ViewRfis)?;

    let mut conn = state.db()?;
    let (rfi, _project) = tenancy::find_rfi(&mut conn, &actor.scope(), rfi_id)?;
    Ok(Json(rfi_response(rfi)))
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = rfis)]
struct UpdateRfiChangeset<'a> {
    subject: Option<&'a str>,
    question: Option<&'a str>,
    due_date: Option<Option<NaiveDate>>,
    assigned_to: Option<Option<Uuid>>,
    updated_at: Option<NaiveDateTime>,
}

pub async fn update_rfi(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(rfi_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<RfiResponse>> {
    actor.require(Permission::EditRfi)?;

    let mut conn = state.db()?;
    let (rfi, project) = tenancy::find_rfi(&mut conn, &actor.scope(), rfi_id)?;

    if rfi.status == Status::Closed.as_str() {
        return Err(AppError::conflict("cannot edit a closed rfi"));
    }

    let subject = match classify_nullable(body.get("subject")).map_err(AppError::bad_request)? {
        NullableValue::Omitted => None,
        NullableValue::Null => {
            return Err(AppError::bad_request("subject cannot be null"));
        }
        NullableValue::String(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                return Err(AppError::bad_request("subject must not be empty"));
            }
            Some(trimmed)
        }
    };
    let question = match classify_nullable(body.get("question")).map_err(AppError::bad_request)? {
        NullableValue::Omitted => None,
        NullableValue::Null => {
            return Err(AppError::bad_request("question cannot be null"));
        }
        NullableValue::String(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                return Err(AppError::bad_request("question must not be empty"));
            }
            Some(trimmed)
        }
    };

    let due_date = classify_nullable(body.get("due_date"))
        .map_err(AppError::bad_request)?
        .into_date_change("due_date")
        .map_err(AppError::bad_request)?;
    let assigned_to = classify_nullable(body.get("assigned_to"))
        .map_err(AppError::bad_request)?
        .into_uuid_change("assigned_to")
        .map_err(AppError::bad_request)?;

    if let Some(Some(assignee)) = assigned_to {
        ensure_member(&mut conn, assignee, project.company_id)?;
    }

    if subject.is_none() && question.is_none() && due_date.is_none() && assigned_to.is_none() {
        return Ok(Json(rfi_response(rfi)));
    }

    let changeset = UpdateRfiChangeset {
        subject: subject.as_deref(),
        question: question.as_deref(),
        due_date,
        assigned_to,
        updated_at: Some(Utc::now().naive_utc()),
    };

    diesel::update(rfis::table.find(rfi.id))
        .set(&changeset)
        .execute(&mut conn)?;

    let updated: Rfi = rfis::table.find(rfi.id).first(&mut conn)?;
    Ok(Json(rfi_response(updated)))
}

pub async fn delete_rfi(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(rfi_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let (rfi, _project) = tenancy::find_rfi(&mut conn, &actor.scope(), rfi_id)?;
    actor.require(Permission::DeleteRfi)?;

    diesel::delete(rfis::table.find(rfi.id)).execute(&mut conn)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn activate_rfi(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(rfi_id): Path<Uuid>,
) -> AppResult<Json<RfiResponse>> {
    apply(&state, &actor, rfi_id, WorkflowAction::Activate, TransitionData::default()).await
}

pub async fn begin_field_work(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(rfi_id): Path<Uuid>,
) -> AppResult<Json<RfiResponse>> {
    apply(
        &state,
        &actor,
        rfi_id,
        WorkflowAction::BeginFieldWork,
        TransitionData::default(),
    )
    .await
}

#[derive(Deserialize, Default)]
pub struct ClarifyRequest {
    pub reason: Option<String>,
}

pub async fn request_clarification(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(rfi_id): Path<Uuid>,
    payload: Option<Json<ClarifyRequest>>,
) -> AppResult<Json<RfiResponse>> {
    let payload = payload.map(|Json(body)| body).unwrap_or_default();
    apply(
        &state,
        &actor,
        rfi_id,
        WorkflowAction::RequestClarification,
        TransitionData {
            reason: payload.reason,
            ..TransitionData::default()
        },
    )
    .await
}

#[derive(Deserialize, Default)]
pub struct SubmitRfiRequest {
    pub due_date: Option<NaiveDate>,
    pub assigned_to: Option<Uuid>,
    #[serde(default)]
    pub generate_link: bool,
    pub link_ttl_days: Option<i64>,
}

#[derive(Serialize)]
pub struct SubmitRfiResponse {
    #[serde(flatten)]
    pub rfi: RfiResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_link_token: Option<String>,
}

/// Send the RFI to the client. Optionally mints a client link in the same
/// call, which turns the emitted event into `link_generated`.
pub async fn submit_rfi(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(rfi_id): Path<Uuid>,
    payload: Option<Json<SubmitRfiRequest>>,
) -> AppResult<Json<SubmitRfiResponse>> {
    let payload = payload.map(|Json(body)| body).unwrap_or_default();

    // Check the link permission before mutating anything so a denied caller
    // leaves no half-applied send behind.
    if payload.generate_link {
        actor.require(Permission::GenerateClientLink)?;
    }

    let mut conn = state.db()?;
    let rfi = workflow::apply_transition(
        &mut conn,
        &actor.scope(),
        &actor.performer(),
        rfi_id,
        WorkflowAction::Submit,
        TransitionData {
            due_date: payload.due_date,
            assigned_to: payload.assigned_to,
            link_generated: payload.generate_link,
            ..TransitionData::default()
        },
    )?;

    let client_link_token = if payload.generate_link {
        let ttl = payload
            .link_ttl_days
            .unwrap_or(state.config.client_link_expiry_days);
        let (token_value, _token) =
            client_links::mint(&mut conn, &actor.scope(), &actor, rfi.id, ttl)?;
        Some(token_value)
    } else {
        None
    };

    Ok(Json(SubmitRfiResponse {
        rfi: rfi_response(rfi),
        client_link_token,
    }))
}

#[derive(Deserialize)]
pub struct RespondRequest {
    pub response: String,
}

pub async fn respond_to_rfi(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(rfi_id): Path<Uuid>,
    Json(payload): Json<RespondRequest>,
) -> AppResult<Json<RfiResponse>> {
    apply(
        &state,
        &actor,
        rfi_id,
        WorkflowAction::Respond,
        TransitionData {
            response: Some(payload.response),
            ..TransitionData::default()
        },
    )
    .await
}

pub async fn close_rfi(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(rfi_id): Path<Uuid>,
) -> AppResult<Json<RfiResponse>> {
    apply(&state, &actor, rfi_id, WorkflowAction::Close, TransitionData::default()).await
}

async fn apply(
    state: &AppState,
    actor: &ActorContext,
    rfi_id: Uuid,
    action: WorkflowAction,
    data: TransitionData,
) -> AppResult<Json<RfiResponse>> {
    let mut conn = state.db()?;
    let rfi = workflow::apply_transition(
        &mut conn,
        &actor.scope(),
        &actor.performer(),
        rfi_id,
        action,
        data,
    )?;
    Ok(Json(rfi_response(rfi)))
}

#[derive(Deserialize, Default)]
pub struct MintLinkRequest {
    pub ttl_days: Option<i64>,
}

#[derive(Serialize)]
pub struct ClientLinkResponse {
    pub token: String,
    pub rfi_id: Uuid,
    pub expires_at: NaiveDateTime,
}

pub async fn mint_client_link(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(rfi_id): Path<Uuid>,
    payload: Option<Json<MintLinkRequest>>,
) -> AppResult<(StatusCode, Json<ClientLinkResponse>)> {
    let payload = payload.map(|Json(body)| body).unwrap_or_default();
    let ttl = payload
        .ttl_days
        .unwrap_or(state.config.client_link_expiry_days);

    let mut conn = state.db()?;
    let (rfi, _project) = tenancy::find_rfi(&mut conn, &actor.scope(), rfi_id)?;
    let (token_value, token) =
        client_links::mint(&mut conn, &actor.scope(), &actor, rfi.id, ttl)?;

    notifications::emit(
        &mut conn,
        rfi.id,
        EVENT_LINK_GENERATED,
        &EventMetadata {
            performed_by: actor.user_id,
            performed_by_type: PERFORMED_BY_USER.to_string(),
            from_status: rfi.status.clone(),
            from_stage: rfi.stage.clone(),
            to_status: rfi.status.clone(),
            to_stage: rfi.stage.clone(),
            reason: Some("client link minted".to_string()),
        },
    );

    Ok((
        StatusCode::CREATED,
        Json(ClientLinkResponse {
            token: token_value,
            rfi_id: rfi.id,
            expires_at: token.expires_at,
        }),
    ))
}

pub async fn revoke_client_link(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(rfi_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    client_links::revoke(&mut conn, &actor.scope(), &actor, rfi_id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub event_type: String,
    pub metadata: Value,
    pub status: String,
    pub created_at: NaiveDateTime,
}

pub async fn rfi_history(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(rfi_id): Path<Uuid>,
) -> AppResult<Json<Vec<HistoryEntry>>> {
    actor.require(Permission::ViewRfis)?;

    let mut conn = state.db()?;
    let (rfi, _project) = tenancy::find_rfi(&mut conn, &actor.scope(), rfi_id)?;
    let events = notifications::history_for_rfi(&mut conn, rfi.id)
        .map_err(|err| AppError::internal(err))?;

    Ok(Json(
        events
            .into_iter()
            .map(|event| HistoryEntry {
                id: event.id,
                event_type: event.event_type,
                metadata: event.metadata,
                status: event.status,
                created_at: event.created_at,
            })
            .collect(),
    ))
}

fn ensure_member(
    conn: &mut diesel::pg::PgConnection,
    user_id: Uuid,
    company_id: Uuid,
) -> AppResult<()> {
    let member_count: i64 = company_users::table
        .filter(company_users::user_id.eq(user_id))
        .filter(company_users::company_id.eq(company_id))
        .count()
        .get_result(conn)?;
    if member_count == 0 {
        return Err(AppError::unprocessable(
            "assignee is not a member of this company",
        ));
    }
    Ok(())
}

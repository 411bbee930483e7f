use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::{dsl::count_star, prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    domain::DomainError,
    error::{AppError, AppResult},
    models::{NewProject, Project},
    permissions::{has_permission, Permission},
    schema::{projects, rfis},
    state::AppState,
    tenancy::{self, ActorContext},
};

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub client_company_name: String,
}

#[derive(Serialize)]
pub struct ProjectResponse {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub client_company_name: String,
    pub created_by: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<Project> for ProjectResponse {
    fn from(project: Project) -> Self {
        ProjectResponse {
            id: project.id,
            company_id: project.company_id,
            name: project.name,
            client_company_name: project.client_company_name,
            created_by: project.created_by,
            created_at: project.created_at,
            updated_at: project.updated_at,
        }
    }
}

pub async fn create_project(
    State(state): State<AppState>,
    actor: ActorContext,
    Json(payload): Json<CreateProjectRequest>,
) -> AppResult<(StatusCode, Json<ProjectResponse>)> {
    actor.require(Permission::CreateProject)?;

    if payload.name.trim().is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    if payload.client_company_name.trim().is_empty() {
        return Err(AppError::bad_request("client_company_name must not be empty"));
    }

    let mut conn = state.db()?;
    let new_project = NewProject {
        id: Uuid::new_v4(),
        company_id: actor.company_id,
        name: payload.name.trim().to_string(),
        client_company_name: payload.client_company_name.trim().to_string(),
        created_by: actor.user_id,
    };

    diesel::insert_into(projects::table)
        .values(&new_project)
        .execute(&mut conn)?;

    let project: Project = projects::table.find(new_project.id).first(&mut conn)?;
    Ok((StatusCode::CREATED, Json(project.into())))
}

pub async fn list_projects(
    State(state): State<AppState>,
    actor: ActorContext,
) -> AppResult<Json<Vec<ProjectResponse>>> {
    actor.require(Permission::ViewProjects)?;

    let mut conn = state.db()?;
    let projects = tenancy::list_projects(&mut conn, &actor.scope())?;
    Ok(Json(projects.into_iter().map(Into::into).collect()))
}

pub async fn get_project(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<ProjectResponse>> {
    actor.require(Permission::ViewProjects)?;

    let mut conn = state.db()?;
    let project = tenancy::find_project(&mut conn, &actor.scope(), project_id)?;
    Ok(Json(project.into()))
}

#[derive(Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub client_company_name: Option<String>,
}

#[derive(AsChangeset)]
#[diesel(table_name = projects)]
struct UpdateProjectChangeset<'a> {
    name: Option<&'a str>,
    client_company_name: Option<&'a str>,
    updated_at: NaiveDateTime,
}

pub async fn update_project(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<UpdateProjectRequest>,
) -> AppResult<Json<ProjectResponse>> {
    actor.require(Permission::EditProject)?;

    let mut conn = state.db()?;
    let project = tenancy::find_project(&mut conn, &actor.scope(), project_id)?;

    let name = match payload.name.as_deref().map(str::trim) {
        Some("") => return Err(AppError::bad_request("name must not be empty")),
        other => other,
    };
    let client_company_name = match payload.client_company_name.as_deref().map(str::trim) {
        Some("") => {
            return Err(AppError::bad_request("client_company_name must not be empty"));
        }
        other => other,
    };

    if name.is_none() && client_company_name.is_none() {
        return Ok(Json(project.into()));
    }

    let changeset = UpdateProjectChangeset {
        name,
        client_company_name,
        updated_at: Utc::now().naive_utc(),
    };

    diesel::update(projects::table.find(project.id))
        .set(&changeset)
        .execute(&mut conn)?;

    let updated: Project = projects::table.find(project.id).first(&mut conn)?;
    Ok(Json(updated.into()))
}

pub async fn delete_project(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(project_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    // Resolve through the scope first so a cross-tenant id reads as missing
    // rather than confirming its existence with a 403.
    let project = tenancy::find_project(&mut conn, &actor.scope(), project_id)?;

    let owns_it = project.created_by == actor.user_id;
    let allowed = has_permission(actor.role, Permission::DeleteProject)
        || (owns_it && has_permission(actor.role, Permission::DeleteOwnProject));
    if !allowed {
        return Err(DomainError::Forbidden(Permission::DeleteProject).into());
    }

    let rfi_count: i64 = rfis::table
        .filter(rfis::project_id.eq(project.id))
        .select(count_star())
        .first(&mut conn)?;
    if rfi_count > 0 {
        return Err(AppError::bad_request(
            "cannot delete a project that still has rfis",
        ));
    }

    diesel::delete(projects::table.find(project.id)).execute(&mut conn)?;
    Ok(StatusCode::NO_CONTENT)
}

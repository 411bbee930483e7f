use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Company, NewCompany},
    permissions::{Permission, Role},
    schema::companies,
    state::AppState,
    tenancy::{self, ActorContext},
};

#[derive(Deserialize)]
pub struct CreateCompanyRequest {
    pub name: String,
}

#[derive(Serialize)]
pub struct CompanyResponse {
    pub id: Uuid,
    pub name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<Company> for CompanyResponse {
    fn from(company: Company) -> Self {
        CompanyResponse {
            id: company.id,
            name: company.name,
            created_at: company.created_at,
            updated_at: company.updated_at,
        }
    }
}

/// Tenants are platform-level records; only the application owner mints them.
pub async fn create_company(
    State(state): State<AppState>,
    actor: ActorContext,
    Json(payload): Json<CreateCompanyRequest>,
) -> AppResult<(StatusCode, Json<CompanyResponse>)> {
    if actor.role != Role::AppOwner {
        return Err(AppError::forbidden(
            "only the application owner can create companies",
        ));
    }
    if payload.name.trim().is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }

    let mut conn = state.db()?;
    let new_company = NewCompany {
        id: Uuid::new_v4(),
        name: payload.name.trim().to_string(),
    };

    diesel::insert_into(companies::table)
        .values(&new_company)
        .execute(&mut conn)?;

    let company: Company = companies::table.find(new_company.id).first(&mut conn)?;
    Ok((StatusCode::CREATED, Json(company.into())))
}

pub async fn list_companies(
    State(state): State<AppState>,
    actor: ActorContext,
) -> AppResult<Json<Vec<CompanyResponse>>> {
    let mut conn = state.db()?;

    if actor.role == Role::AppOwner {
        let all: Vec<Company> = companies::table
            .order(companies::name.asc())
            .load(&mut conn)?;
        return Ok(Json(all.into_iter().map(Into::into).collect()));
    }

    let own = tenancy::find_company(&mut conn, &actor.scope(), actor.company_id)?;
    Ok(Json(vec![own.into()]))
}

#[derive(Deserialize)]
pub struct UpdateCompanyRequest {
    pub name: String,
}

pub async fn update_company(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(company_id): Path<Uuid>,
    Json(payload): Json<UpdateCompanyRequest>,
) -> AppResult<Json<CompanyResponse>> {
    let mut conn = state.db()?;
    let company = tenancy::find_company(&mut conn, &actor.scope(), company_id)?;
    actor.require(Permission::EditCompanySettings)?;

    if payload.name.trim().is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }

    diesel::update(companies::table.find(company.id))
        .set((
            companies::name.eq(payload.name.trim()),
            companies::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    let updated: Company = companies::table.find(company.id).first(&mut conn)?;
    Ok(Json(updated.into()))
}

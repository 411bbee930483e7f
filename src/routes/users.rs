use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::password,
    error::{AppError, AppResult},
    models::{NewCompanyUser, NewUser, User},
    permissions::{Permission, Role},
    schema::{company_users, users},
    state::AppState,
    tenancy::{self, ActorContext},
};

#[derive(Serialize)]
pub struct MemberResponse {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub role: String,
}

pub async fn list_users(
    State(state): State<AppState>,
    actor: ActorContext,
) -> AppResult<Json<Vec<MemberResponse>>> {
    actor.require(Permission::ViewUsers)?;

    let mut conn = state.db()?;
    let members = tenancy::list_members(&mut conn, &actor.scope(), actor.company_id)?;
    Ok(Json(
        members
            .into_iter()
            .map(|(membership, user)| MemberResponse {
                user_id: user.id,
                email: user.email,
                display_name: user.display_name,
                role: membership.role,
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub role: String,
}

pub async fn create_user(
    State(state): State<AppState>,
    actor: ActorContext,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<MemberResponse>)> {
    let role = parse_grantable_role(&payload.role)?;
    if role == Role::ViewOnly {
        actor.require(Permission::CreateReadonlyUser)?;
    } else {
        actor.require(Permission::CreateUser)?;
    }

    let email = payload.email.trim().to_lowercase();
    if email.is_empty() {
        return Err(AppError::bad_request("email must not be empty"));
    }
    if payload.password.len() < 8 {
        return Err(AppError::bad_request("password must be at least 8 characters"));
    }

    let mut conn = state.db()?;
    let password_hash = password::hash_password(&payload.password)?;
    let new_user = NewUser {
        id: Uuid::new_v4(),
        email: email.clone(),
        password_hash,
        display_name: payload.display_name.trim().to_string(),
    };

    match diesel::insert_into(users::table)
        .values(&new_user)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            return Err(AppError::bad_request("email is already registered"));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    let membership = NewCompanyUser {
        user_id: new_user.id,
        company_id: actor.company_id,
        role: role.as_str().to_string(),
    };
    diesel::insert_into(company_users::table)
        .values(&membership)
        .execute(&mut conn)?;

    let user: User = users::table.find(new_user.id).first(&mut conn)?;
    Ok((
        StatusCode::CREATED,
        Json(MemberResponse {
            user_id: user.id,
            email: user.email,
            display_name: user.display_name,
            role: role.as_str().to_string(),
        }),
    ))
}

#[derive(Deserialize)]
pub struct InviteUserRequest {
    pub email: String,
    pub role: String,
}

/// Attach an existing account to the actor's company. Credential-less invite
/// mails are composed by an external system; this records the membership.
pub async fn invite_user(
    State(state): State<AppState>,
    actor: ActorContext,
    Json(payload): Json<InviteUserRequest>,
) -> AppResult<(StatusCode, Json<MemberResponse>)> {
    actor.require(Permission::InviteUser)?;
    let role = parse_grantable_role(&payload.role)?;

    let mut conn = state.db()?;
    let email = payload.email.trim().to_lowercase();
    let user: User = users::table
        .filter(users::email.eq(&email))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::bad_request("no account exists for this email"))?;

    let membership = NewCompanyUser {
        user_id: user.id,
        company_id: actor.company_id,
        role: role.as_str().to_string(),
    };
    match diesel::insert_into(company_users::table)
        .values(&membership)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            return Err(AppError::bad_request("user is already a member"));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    Ok((
        StatusCode::CREATED,
        Json(MemberResponse {
            user_id: user.id,
            email: user.email,
            display_name: user.display_name,
            role: role.as_str().to_string(),
        }),
    ))
}

#[derive(Deserialize)]
pub struct UpdateRoleRequest {
    pub role: String,
}

pub async fn update_user_role(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<UpdateRoleRequest>,
) -> AppResult<Json<MemberResponse>> {
    actor.require(Permission::EditUserRoles)?;
    let role = parse_grantable_role(&payload.role)?;

    let mut conn = state.db()?;
    let updated = diesel::update(
        company_users::table
            .filter(company_users::user_id.eq(user_id))
            .filter(company_users::company_id.eq(actor.company_id)),
    )
    .set((
        company_users::role.eq(role.as_str()),
        company_users::updated_at.eq(Utc::now().naive_utc()),
    ))
    .execute(&mut conn)?;

    if updated == 0 {
        return Err(AppError::not_found());
    }

    let user: User = users::table.find(user_id).first(&mut conn)?;
    Ok(Json(MemberResponse {
        user_id: user.id,
        email: user.email,
        display_name: user.display_name,
        role: role.as_str().to_string(),
    }))
}

pub async fn delete_user(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(user_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    actor.require(Permission::DeleteUser)?;

    if user_id == actor.user_id {
        return Err(AppError::bad_request("cannot remove your own membership"));
    }

    let mut conn = state.db()?;
    let deleted = diesel::delete(
        company_users::table
            .filter(company_users::user_id.eq(user_id))
            .filter(company_users::company_id.eq(actor.company_id)),
    )
    .execute(&mut conn)?;

    if deleted == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

fn parse_grantable_role(value: &str) -> Result<Role, AppError> {
    let role =
        Role::from_str(value).ok_or_else(|| AppError::bad_request("unknown role"))?;
    if role == Role::AppOwner {
        return Err(AppError::bad_request("app_owner cannot be granted"));
    }
    Ok(role)
}

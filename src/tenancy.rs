use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    domain::{DomainError, DomainResult},
    error::AppError,
    models::{Company, CompanyUser, Project, Rfi, User},
    permissions::{has_permission, Permission, Role},
    schema::{companies, company_users, projects, rfis, users},
    state::AppState,
    workflow::Performer,
};

pub const COMPANY_ID_HEADER: &str = "x-company-id";
pub const PREVIEW_ROLE_HEADER: &str = "x-preview-role";

/// The capability every loader in this module demands. Holding one means the
/// tenant filter has already been decided; there is no loader that accepts a
/// bare id, so an unscoped query cannot be written by accident. The
/// unrestricted scope is only reachable through an `app_owner` actor.
#[derive(Debug, Clone, Copy)]
pub struct TenantScope {
    company: Option<Uuid>,
}

impl TenantScope {
    pub fn company(company_id: Uuid) -> TenantScope {
        TenantScope {
            company: Some(company_id),
        }
    }

    fn unrestricted() -> TenantScope {
        TenantScope { company: None }
    }
}

/// Resolved identity of the caller for one request: verified user id plus
/// company and role re-derived from the membership table. Client-asserted
/// role claims are never trusted.
#[derive(Debug, Clone)]
pub struct ActorContext {
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub role: Role,
    /// Request-scoped role override for UI preview. Read only by the
    /// advisory permission listing; enforcement always uses `role`.
    pub preview_role: Option<Role>,
}

impl ActorContext {
    pub fn scope(&self) -> TenantScope {
        if self.role == Role::AppOwner {
            TenantScope::unrestricted()
        } else {
            TenantScope::company(self.company_id)
        }
    }

    pub fn require(&self, permission: Permission) -> DomainResult<()> {
        if has_permission(self.role, permission) {
            Ok(())
        } else {
            Err(DomainError::Forbidden(permission))
        }
    }

    /// Role used for advisory permission listings only.
    pub fn effective_role(&self) -> Role {
        self.preview_role.unwrap_or(self.role)
    }

    pub fn performer(&self) -> Performer {
        Performer::User {
            user_id: self.user_id,
            role: self.role,
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for ActorContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;
        let requested_company = parse_uuid_header(parts, COMPANY_ID_HEADER)?;
        let preview_role = parse_role_header(parts, PREVIEW_ROLE_HEADER)?;

        let mut conn = state.db()?;
        let memberships: Vec<CompanyUser> = company_users::table
            .filter(company_users::user_id.eq(user.user_id))
            .load(&mut conn)?;

        if let Some(owner) = memberships
            .iter()
            .find(|membership| membership.role == Role::AppOwner.as_str())
        {
            return Ok(ActorContext {
                user_id: user.user_id,
                company_id: requested_company.unwrap_or(owner.company_id),
                role: Role::AppOwner,
                preview_role,
            });
        }

        let membership = match requested_company {
            Some(company_id) => memberships
                .into_iter()
                .find(|membership| membership.company_id == company_id),
            None if memberships.len() == 1 => memberships.into_iter().next(),
            None => {
                return Err(AppError::bad_request("X-Company-Id header is required"));
            }
        };

        // Missing membership reads as a missing resource so that company ids
        // cannot be probed, matching the cross-tenant failure policy.
        let membership = membership.ok_or_else(AppError::not_found)?;
        let role = Role::from_str(&membership.role).ok_or_else(AppError::not_found)?;

        Ok(ActorContext {
            user_id: user.user_id,
            company_id: membership.company_id,
            role,
            preview_role,
        })
    }
}

fn parse_uuid_header(parts: &Parts, name: &str) -> Result<Option<Uuid>, AppError> {
    let Some(value) = parts.headers.get(name) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| AppError::bad_request(format!("{name} header contains invalid characters")))?;
    let id = Uuid::parse_str(value)
        .map_err(|_| AppError::bad_request(format!("{name} header is not a valid uuid")))?;
    Ok(Some(id))
}

fn parse_role_header(parts: &Parts, name: &str) -> Result<Option<Role>, AppError> {
    let Some(value) = parts.headers.get(name) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| AppError::bad_request(format!("{name} header contains invalid characters")))?;
    let role = Role::from_str(value)
        .ok_or_else(|| AppError::bad_request(format!("{name} header is not a known role")))?;
    Ok(Some(role))
}

pub fn find_company(
    conn: &mut PgConnection,
    scope: &TenantScope,
    company_id: Uuid,
) -> DomainResult<Company> {
    let mut query = companies::table
        .filter(companies::id.eq(company_id))
        .into_boxed();
    if let Some(scoped) = scope.company {
        query = query.filter(companies::id.eq(scoped));
    }
    query
        .first(conn)
        .optional()
        .map_err(DomainError::from)?
        .ok_or(DomainError::NotFound)
}

pub fn find_project(
    conn: &mut PgConnection,
    scope: &TenantScope,
    project_id: Uuid,
) -> DomainResult<Project> {
    let mut query = projects::table
        .filter(projects::id.eq(project_id))
        .into_boxed();
    if let Some(company_id) = scope.company {
        query = query.filter(projects::company_id.eq(company_id));
    }
    query
        .first(conn)
        .optional()
        .map_err(DomainError::from)?
        .ok_or(DomainError::NotFound)
}

pub fn list_projects(conn: &mut PgConnection, scope: &TenantScope) -> DomainResult<Vec<Project>> {
    let mut query = projects::table.order(projects::created_at.desc()).into_boxed();
    if let Some(company_id) = scope.company {
        query = query.filter(projects::company_id.eq(company_id));
    }
    query.load(conn).map_err(DomainError::from)
}

/// Resolves an RFI together with its owning project by following the
/// rfi → project → company chain, applying the tenant filter on the company.
pub fn find_rfi(
    conn: &mut PgConnection,
    scope: &TenantScope,
    rfi_id: Uuid,
) -> DomainResult<(Rfi, Project)> {
    let mut query = rfis::table
        .inner_join(projects::table)
        .filter(rfis::id.eq(rfi_id))
        .select((rfis::all_columns, projects::all_columns))
        .into_boxed();
    if let Some(company_id) = scope.company {
        query = query.filter(projects::company_id.eq(company_id));
    }
    query
        .first(conn)
        .optional()
        .map_err(DomainError::from)?
        .ok_or(DomainError::NotFound)
}

pub fn list_rfis_for_project(
    conn: &mut PgConnection,
    scope: &TenantScope,
    project_id: Uuid,
) -> DomainResult<Vec<Rfi>> {
    let project = find_project(conn, scope, project_id)?;
    rfis::table
        .filter(rfis::project_id.eq(project.id))
        .order(rfis::number.asc())
        .load(conn)
        .map_err(DomainError::from)
}

pub fn list_members(
    conn: &mut PgConnection,
    scope: &TenantScope,
    company_id: Uuid,
) -> DomainResult<Vec<(CompanyUser, User)>> {
    let company = find_company(conn, scope, company_id)?;
    company_users::table
        .inner_join(users::table)
        .filter(company_users::company_id.eq(company.id))
        .order(users::email.asc())
        .select((company_users::all_columns, users::all_columns))
        .load(conn)
        .map_err(DomainError::from)
}

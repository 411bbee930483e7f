use chrono::{Duration as ChronoDuration, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    domain::{DomainError, DomainResult},
    models::{ClientAccessToken, Company, NewClientAccessToken, Project, Rfi},
    permissions::Permission,
    schema::{client_access_tokens, companies, projects, rfis},
    tenancy::{self, ActorContext, TenantScope},
    workflow::Stage,
};

/// Everything a valid token grants: the bound RFI with its ownership chain,
/// plus whether the one allowed response has already been used up.
pub struct ClientCapability {
    pub token: ClientAccessToken,
    pub rfi: Rfi,
    pub project: Project,
    pub company: Company,
    pub read_only: bool,
}

/// Mint a client link for one RFI. Any previous live link for the same RFI
/// is revoked so exactly one can be outstanding. Returns the plaintext token
/// exactly once; only its hash is stored.
pub fn mint(
    conn: &mut PgConnection,
    scope: &TenantScope,
    actor: &ActorContext,
    rfi_id: Uuid,
    ttl_days: i64,
) -> DomainResult<(String, ClientAccessToken)> {
    actor.require(Permission::GenerateClientLink)?;
    let (rfi, _project) = tenancy::find_rfi(conn, scope, rfi_id)?;

    let now = Utc::now().naive_utc();
    diesel::update(
        client_access_tokens::table
            .filter(client_access_tokens::rfi_id.eq(rfi.id))
            .filter(client_access_tokens::revoked_at.is_null()),
    )
    .set((
        client_access_tokens::revoked_at.eq(now),
        client_access_tokens::updated_at.eq(now),
    ))
    .execute(conn)
    .map_err(DomainError::from)?;

    let token_value = generate_token_value();
    let new_token = NewClientAccessToken {
        id: Uuid::new_v4(),
        rfi_id: rfi.id,
        token_hash: hash_token(&token_value),
        expires_at: (Utc::now() + ChronoDuration::days(ttl_days)).naive_utc(),
        created_by: actor.user_id,
    };

    diesel::insert_into(client_access_tokens::table)
        .values(&new_token)
        .execute(conn)
        .map_err(DomainError::from)?;

    let token = client_access_tokens::table
        .find(new_token.id)
        .first(conn)
        .map_err(DomainError::from)?;
    Ok((token_value, token))
}

/// Resolve a bearer token into its capability. Pure read, no side effects,
/// freely retryable. Unknown tokens are NotFound; revocation is checked
/// before expiry so a link that is both reports as revoked.
pub fn validate(conn: &mut PgConnection, token_value: &str) -> DomainResult<ClientCapability> {
    let hashed = hash_token(token_value);

    let token: ClientAccessToken = client_access_tokens::table
        .filter(client_access_tokens::token_hash.eq(&hashed))
        .first(conn)
        .optional()
        .map_err(DomainError::from)?
        .ok_or(DomainError::NotFound)?;

    if token.revoked_at.is_some() {
        return Err(DomainError::TokenRevoked);
    }
    if token.expires_at <= Utc::now().naive_utc() {
        return Err(DomainError::TokenExpired);
    }

    let (rfi, project): (Rfi, Project) = rfis::table
        .inner_join(projects::table)
        .filter(rfis::id.eq(token.rfi_id))
        .select((rfis::all_columns, projects::all_columns))
        .first(conn)
        .map_err(DomainError::from)?;
    let company: Company = companies::table
        .find(project.company_id)
        .first(conn)
        .map_err(DomainError::from)?;

    // Once the response is in, the link degrades to read-only. An
    // unrecognized stored stage fails closed.
    let read_only = Stage::from_str(&rfi.stage)
        .map(|stage| stage == Stage::ResponseReceived)
        .unwrap_or(true);

    Ok(ClientCapability {
        token,
        rfi,
        project,
        company,
        read_only,
    })
}

/// Revoke every live link for an RFI. Returns how many were revoked.
pub fn revoke(
    conn: &mut PgConnection,
    scope: &TenantScope,
    actor: &ActorContext,
    rfi_id: Uuid,
) -> DomainResult<usize> {
    actor.require(Permission::GenerateClientLink)?;
    let (rfi, _project) = tenancy::find_rfi(conn, scope, rfi_id)?;

    let now = Utc::now().naive_utc();
    let revoked = diesel::update(
        client_access_tokens::table
            .filter(client_access_tokens::rfi_id.eq(rfi.id))
            .filter(client_access_tokens::revoked_at.is_null()),
    )
    .set((
        client_access_tokens::revoked_at.eq(now),
        client_access_tokens::updated_at.eq(now),
    ))
    .execute(conn)
    .map_err(DomainError::from)?;
    Ok(revoked)
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_token_value() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

use axum::Json;
use serde::Serialize;

use crate::{
    permissions::granted_permissions,
    tenancy::ActorContext,
};

#[derive(Serialize)]
pub struct PermissionListing {
    pub role: &'static str,
    pub preview: bool,
    pub permissions: Vec<&'static str>,
}

/// Advisory listing for UIs deciding what to render. Honors the request's
/// preview role; nothing here is an authorization decision — mutations are
/// re-checked against the actor's real role at the mutation boundary.
pub async fn list_permissions(actor: ActorContext) -> Json<PermissionListing> {
    let role = actor.effective_role();
    Json(PermissionListing {
        role: role.as_str(),
        preview: actor.preview_role.is_some(),
        permissions: granted_permissions(role)
            .into_iter()
            .map(|permission| permission.slug())
            .collect(),
    })
}

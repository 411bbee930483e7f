use chrono::{NaiveDate, NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    domain::{DomainError, DomainResult},
    models::{Project, Rfi},
    notifications::{
        self, EventMetadata, EVENT_LINK_GENERATED, EVENT_RESPONSE_RECEIVED, EVENT_STATUS_CHANGED,
    },
    permissions::{has_permission, Permission, Role},
    schema::{company_users, rfis},
    tenancy::{self, TenantScope},
};

/// Coarse lifecycle bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Draft,
    Active,
    Closed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Draft => "draft",
            Status::Active => "active",
            Status::Closed => "closed",
        }
    }

    pub fn from_str(value: &str) -> Option<Status> {
        match value {
            "draft" => Some(Status::Draft),
            "active" => Some(Status::Active),
            "closed" => Some(Status::Closed),
            _ => None,
        }
    }
}

/// Fine-grained pipeline position within the coarse status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Submitted,
    InReview,
    PendingResponse,
    FieldWorkInProgress,
    SentToClient,
    ResponseReceived,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Submitted => "submitted",
            Stage::InReview => "in_review",
            Stage::PendingResponse => "pending_response",
            Stage::FieldWorkInProgress => "field_work_in_progress",
            Stage::SentToClient => "sent_to_client",
            Stage::ResponseReceived => "response_received",
        }
    }

    pub fn from_str(value: &str) -> Option<Stage> {
        match value {
            "submitted" => Some(Stage::Submitted),
            "in_review" => Some(Stage::InReview),
            "pending_response" => Some(Stage::PendingResponse),
            "field_work_in_progress" => Some(Stage::FieldWorkInProgress),
            "sent_to_client" => Some(Stage::SentToClient),
            "response_received" => Some(Stage::ResponseReceived),
            _ => None,
        }
    }

    /// Stages in which the ball is still in the contractor's court; only
    /// these participate in the overdue calculation.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            Stage::Submitted
                | Stage::InReview
                | Stage::PendingResponse
                | Stage::FieldWorkInProgress
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowAction {
    Activate,
    BeginFieldWork,
    Submit,
    RequestClarification,
    Respond,
    Close,
}

impl WorkflowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowAction::Activate => "activate",
            WorkflowAction::BeginFieldWork => "begin field work on",
            WorkflowAction::Submit => "submit",
            WorkflowAction::RequestClarification => "request clarification on",
            WorkflowAction::Respond => "respond to",
            WorkflowAction::Close => "close",
        }
    }
}

/// Who is driving the transition. Client token bearers are evaluated against
/// the `client_collaborator` matrix row, so both paths share one guard.
#[derive(Debug, Clone, Copy)]
pub enum Performer {
    User { user_id: Uuid, role: Role },
    Client { token_id: Uuid },
}

impl Performer {
    pub fn role(&self) -> Role {
        match self {
            Performer::User { role, .. } => *role,
            Performer::Client { .. } => Role::ClientCollaborator,
        }
    }

    pub fn performed_by(&self) -> Uuid {
        match self {
            Performer::User { user_id, .. } => *user_id,
            Performer::Client { token_id } => *token_id,
        }
    }

    pub fn performed_by_type(&self) -> &'static str {
        match self {
            Performer::User { .. } => notifications::PERFORMED_BY_USER,
            Performer::Client { .. } => notifications::PERFORMED_BY_CLIENT,
        }
    }
}

/// Auxiliary payload accompanying a transition. Fields irrelevant to the
/// requested action are left `None` by the callers.
#[derive(Debug, Default)]
pub struct TransitionData {
    pub due_date: Option<NaiveDate>,
    pub assigned_to: Option<Uuid>,
    pub response: Option<String>,
    pub reason: Option<String>,
    /// Set when a client link is minted together with the send, which turns
    /// the emitted event into `link_generated`.
    pub link_generated: bool,
}

pub struct Transition {
    pub action: WorkflowAction,
    pub from: &'static [(Status, Stage)],
    pub to_status: Status,
    /// `None` keeps the stage the RFI was in, so closing freezes history.
    pub to_stage: Option<Stage>,
    pub permission: Permission,
    pub notification: &'static str,
}

const ALL_ACTIVE: &[(Status, Stage)] = &[
    (Status::Active, Stage::InReview),
    (Status::Active, Stage::PendingResponse),
    (Status::Active, Stage::FieldWorkInProgress),
    (Status::Active, Stage::SentToClient),
    (Status::Active, Stage::ResponseReceived),
];

pub const TRANSITIONS: [Transition; 6] = [
    Transition {
        action: WorkflowAction::Activate,
        from: &[(Status::Draft, Stage::Submitted)],
        to_status: Status::Active,
        to_stage: Some(Stage::InReview),
        permission: Permission::EditRfi,
        notification: EVENT_STATUS_CHANGED,
    },
    Transition {
        action: WorkflowAction::BeginFieldWork,
        from: &[
            (Status::Active, Stage::InReview),
            (Status::Active, Stage::PendingResponse),
        ],
        to_status: Status::Active,
        to_stage: Some(Stage::FieldWorkInProgress),
        permission: Permission::EditRfi,
        notification: EVENT_STATUS_CHANGED,
    },
    Transition {
        action: WorkflowAction::Submit,
        from: &[
            (Status::Active, Stage::InReview),
            (Status::Active, Stage::PendingResponse),
            (Status::Active, Stage::FieldWorkInProgress),
        ],
        to_status: Status::Active,
        to_stage: Some(Stage::SentToClient),
        permission: Permission::SubmitRfi,
        notification: EVENT_STATUS_CHANGED,
    },
    Transition {
        action: WorkflowAction::RequestClarification,
        from: &[
            (Status::Active, Stage::SentToClient),
            (Status::Active, Stage::ResponseReceived),
        ],
        to_status: Status::Active,
        to_stage: Some(Stage::PendingResponse),
        permission: Permission::EditRfi,
        notification: EVENT_STATUS_CHANGED,
    },
    Transition {
        action: WorkflowAction::Respond,
        from: &[(Status::Active, Stage::SentToClient)],
        to_status: Status::Active,
        to_stage: Some(Stage::ResponseReceived),
        permission: Permission::RespondToRfi,
        notification: EVENT_RESPONSE_RECEIVED,
    },
    Transition {
        action: WorkflowAction::Close,
        from: ALL_ACTIVE,
        to_status: Status::Closed,
        to_stage: None,
        permission: Permission::CloseRfi,
        notification: EVENT_STATUS_CHANGED,
    },
];

pub fn transition_for(action: WorkflowAction) -> &'static Transition {
    TRANSITIONS
        .iter()
        .find(|transition| transition.action == action)
        .expect("every action has a transition definition")
}

#[derive(AsChangeset)]
#[diesel(table_name = rfis)]
struct TransitionChangeset<'a> {
    status: &'a str,
    stage: &'a str,
    due_date: Option<NaiveDate>,
    assigned_to: Option<Uuid>,
    response: Option<&'a str>,
    response_date: Option<NaiveDateTime>,
    updated_at: NaiveDateTime,
}

/// Apply one workflow transition.
///
/// Order of checks matches the externally observable contract: permission
/// (Forbidden), current state through the tenant scope (NotFound/Conflict),
/// auxiliary data (Validation), then a compare-and-set write conditioned on
/// the previously read `(status, stage)`. A concurrent writer winning the
/// race surfaces as Conflict with the stored state untouched by this call.
/// The notification is enqueued fire-and-forget after the write succeeds.
pub fn apply_transition(
    conn: &mut PgConnection,
    scope: &TenantScope,
    performer: &Performer,
    rfi_id: Uuid,
    action: WorkflowAction,
    data: TransitionData,
) -> DomainResult<Rfi> {
    let transition = transition_for(action);

    if !has_permission(performer.role(), transition.permission) {
        return Err(DomainError::Forbidden(transition.permission));
    }

    let (rfi, project) = tenancy::find_rfi(conn, scope, rfi_id)?;
    let current = stored_state(&rfi)?;
    if !transition.from.contains(&current) {
        return Err(DomainError::conflict(format!(
            "cannot {} an rfi that is {} ({})",
            action.as_str(),
            rfi.status,
            rfi.stage
        )));
    }

    let response_text = validate_data(conn, &project, action, &data)?;

    let now = Utc::now().naive_utc();
    let to_status = transition.to_status;
    let to_stage = transition.to_stage.unwrap_or(current.1);
    let changeset = TransitionChangeset {
        status: to_status.as_str(),
        stage: to_stage.as_str(),
        due_date: data.due_date,
        assigned_to: data.assigned_to,
        response: response_text.as_deref(),
        response_date: response_text.as_ref().map(|_| now),
        updated_at: now,
    };

    let updated = diesel::update(
        rfis::table
            .filter(rfis::id.eq(rfi.id))
            .filter(rfis::status.eq(&rfi.status))
            .filter(rfis::stage.eq(&rfi.stage)),
    )
    .set(&changeset)
    .execute(conn)?;

    if updated == 0 {
        let still_there = rfis::table
            .find(rfi.id)
            .first::<Rfi>(conn)
            .optional()
            .map_err(DomainError::from)?;
        return Err(match still_there {
            Some(_) => DomainError::conflict("rfi state changed concurrently; re-read and retry"),
            None => DomainError::NotFound,
        });
    }

    let event_type = match action {
        WorkflowAction::Submit if data.link_generated => EVENT_LINK_GENERATED,
        _ => transition.notification,
    };
    notifications::emit(
        conn,
        rfi.id,
        event_type,
        &EventMetadata {
            performed_by: performer.performed_by(),
            performed_by_type: performer.performed_by_type().to_string(),
            from_status: rfi.status.clone(),
            from_stage: rfi.stage.clone(),
            to_status: to_status.as_str().to_string(),
            to_stage: to_stage.as_str().to_string(),
            reason: data.reason.clone(),
        },
    );

    let refreshed = rfis::table.find(rfi.id).first(conn).map_err(DomainError::from)?;
    Ok(refreshed)
}

fn stored_state(rfi: &Rfi) -> DomainResult<(Status, Stage)> {
    let status = Status::from_str(&rfi.status);
    let stage = Stage::from_str(&rfi.stage);
    match (status, stage) {
        (Some(status), Some(stage)) => Ok((status, stage)),
        _ => Err(DomainError::conflict("rfi is in an unrecognized state")),
    }
}

fn validate_data(
    conn: &mut PgConnection,
    project: &Project,
    action: WorkflowAction,
    data: &TransitionData,
) -> DomainResult<Option<String>> {
    match action {
        WorkflowAction::Respond => {
            let text = data
                .response
                .as_deref()
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .ok_or_else(|| DomainError::validation("response text must not be empty"))?;
            Ok(Some(text.to_string()))
        }
        WorkflowAction::Submit => {
            if let Some(assignee) = data.assigned_to {
                let member_count: i64 = company_users::table
                    .filter(company_users::user_id.eq(assignee))
                    .filter(company_users::company_id.eq(project.company_id))
                    .count()
                    .get_result(conn)
                    .map_err(DomainError::from)?;
                if member_count == 0 {
                    return Err(DomainError::validation(
                        "assignee is not a member of this company",
                    ));
                }
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

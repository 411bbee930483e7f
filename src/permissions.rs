use serde::{Deserialize, Serialize};

/// Membership roles, ordered from broadest to narrowest capability class.
/// `AppOwner` is the only role exempt from tenant scoping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    AppOwner,
    SuperAdmin,
    Admin,
    RfiUser,
    ViewOnly,
    ClientCollaborator,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::AppOwner,
        Role::SuperAdmin,
        Role::Admin,
        Role::RfiUser,
        Role::ViewOnly,
        Role::ClientCollaborator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::AppOwner => "app_owner",
            Role::SuperAdmin => "super_admin",
            Role::Admin => "admin",
            Role::RfiUser => "rfi_user",
            Role::ViewOnly => "view_only",
            Role::ClientCollaborator => "client_collaborator",
        }
    }

    /// Fail-closed parse: unknown role strings carry no capabilities.
    pub fn from_str(value: &str) -> Option<Role> {
        Role::ALL.iter().copied().find(|role| role.as_str() == value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    CreateRfi,
    EditRfi,
    CreateProject,
    EditProject,
    AccessAdmin,
    ViewRfis,
    ViewProjects,
    ViewReports,
    GenerateClientLink,
    PrintRfi,
    SubmitRfi,
    RespondToRfi,
    CloseRfi,
    DeleteRfi,
    ExportData,
    CreateUser,
    InviteUser,
    ViewUsers,
    EditUserRoles,
    DeleteUser,
    CreateReadonlyUser,
    DeleteProject,
    DeleteOwnProject,
    EditCompanySettings,
}

impl Permission {
    pub const ALL: [Permission; 24] = [
        Permission::CreateRfi,
        Permission::EditRfi,
        Permission::CreateProject,
        Permission::EditProject,
        Permission::AccessAdmin,
        Permission::ViewRfis,
        Permission::ViewProjects,
        Permission::ViewReports,
        Permission::GenerateClientLink,
        Permission::PrintRfi,
        Permission::SubmitRfi,
        Permission::RespondToRfi,
        Permission::CloseRfi,
        Permission::DeleteRfi,
        Permission::ExportData,
        Permission::CreateUser,
        Permission::InviteUser,
        Permission::ViewUsers,
        Permission::EditUserRoles,
        Permission::DeleteUser,
        Permission::CreateReadonlyUser,
        Permission::DeleteProject,
        Permission::DeleteOwnProject,
        Permission::EditCompanySettings,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            Permission::CreateRfi => "create_rfi",
            Permission::EditRfi => "edit_rfi",
            Permission::CreateProject => "create_project",
            Permission::EditProject => "edit_project",
            Permission::AccessAdmin => "access_admin",
            Permission::ViewRfis => "view_rfis",
            Permission::ViewProjects => "view_projects",
            Permission::ViewReports => "view_reports",
            Permission::GenerateClientLink => "generate_client_link",
            Permission::PrintRfi => "print_rfi",
            Permission::SubmitRfi => "submit_rfi",
            Permission::RespondToRfi => "respond_to_rfi",
            Permission::CloseRfi => "close_rfi",
            Permission::DeleteRfi => "delete_rfi",
            Permission::ExportData => "export_data",
            Permission::CreateUser => "create_user",
            Permission::InviteUser => "invite_user",
            Permission::ViewUsers => "view_users",
            Permission::EditUserRoles => "edit_user_roles",
            Permission::DeleteUser => "delete_user",
            Permission::CreateReadonlyUser => "create_readonly_user",
            Permission::DeleteProject => "delete_project",
            Permission::DeleteOwnProject => "delete_own_project",
            Permission::EditCompanySettings => "edit_company_settings",
        }
    }

    pub fn from_slug(value: &str) -> Option<Permission> {
        Permission::ALL
            .iter()
            .copied()
            .find(|permission| permission.slug() == value)
    }
}

/// The authoritative role/permission matrix. Pure and total: no I/O, an
/// answer for every (role, permission) pair. This is the single source of
/// truth; the advisory listing served to UIs reads the same table.
pub fn has_permission(role: Role, permission: Permission) -> bool {
    use Permission::*;

    match role {
        Role::AppOwner | Role::SuperAdmin => true,
        Role::Admin => !matches!(
            permission,
            EditUserRoles | DeleteUser | DeleteProject | EditCompanySettings
        ),
        Role::RfiUser => matches!(
            permission,
            CreateRfi | EditRfi | ViewRfis | ViewProjects | ViewReports | PrintRfi
        ),
        Role::ViewOnly => matches!(permission, ViewRfis | ViewProjects | ViewReports | PrintRfi),
        Role::ClientCollaborator => matches!(permission, ViewRfis | RespondToRfi | PrintRfi),
    }
}

/// Slug-based lookup for callers holding untyped permission names.
/// Unrecognized names are denied.
pub fn has_permission_slug(role: Role, permission: &str) -> bool {
    Permission::from_slug(permission)
        .map(|permission| has_permission(role, permission))
        .unwrap_or(false)
}

/// Every permission granted to `role`, in declaration order. Used by the
/// advisory listing endpoint.
pub fn granted_permissions(role: Role) -> Vec<Permission> {
    Permission::ALL
        .iter()
        .copied()
        .filter(|permission| has_permission(role, *permission))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::Permission::*;
    use super::*;

    /// The published reference matrix, row per role. Any change to
    /// `has_permission` must be reflected here deliberately.
    const REFERENCE: [(Role, &[Permission]); 6] = [
        (Role::AppOwner, &Permission::ALL),
        (Role::SuperAdmin, &Permission::ALL),
        (
            Role::Admin,
            &[
                CreateRfi,
                EditRfi,
                CreateProject,
                EditProject,
                AccessAdmin,
                ViewRfis,
                ViewProjects,
                ViewReports,
                GenerateClientLink,
                PrintRfi,
                SubmitRfi,
                RespondToRfi,
                CloseRfi,
                DeleteRfi,
                ExportData,
                CreateUser,
                InviteUser,
                ViewUsers,
                CreateReadonlyUser,
                DeleteOwnProject,
            ],
        ),
        (
            Role::RfiUser,
            &[CreateRfi, EditRfi, ViewRfis, ViewProjects, ViewReports, PrintRfi],
        ),
        (
            Role::ViewOnly,
            &[ViewRfis, ViewProjects, ViewReports, PrintRfi],
        ),
        (
            Role::ClientCollaborator,
            &[ViewRfis, RespondToRfi, PrintRfi],
        ),
    ];

    #[test]
    fn matrix_matches_reference_exactly() {
        for (role, granted) in REFERENCE {
            for permission in Permission::ALL {
                let expected = granted.contains(&permission);
                assert_eq!(
                    has_permission(role, permission),
                    expected,
                    "{} / {}",
                    role.as_str(),
                    permission.slug()
                );
            }
        }
    }

    #[test]
    fn unknown_permission_slug_is_denied() {
        for role in Role::ALL {
            assert!(!has_permission_slug(role, "launch_missiles"));
            assert!(!has_permission_slug(role, ""));
        }
    }

    #[test]
    fn known_slug_round_trips() {
        for permission in Permission::ALL {
            assert_eq!(Permission::from_slug(permission.slug()), Some(permission));
        }
        assert!(has_permission_slug(Role::Admin, "create_rfi"));
        assert!(!has_permission_slug(Role::ViewOnly, "create_rfi"));
    }

    #[test]
    fn unknown_role_string_does_not_parse() {
        assert_eq!(Role::from_str("owner"), None);
        assert_eq!(Role::from_str(""), None);
        for role in Role::ALL {
            assert_eq!(Role::from_str(role.as_str()), Some(role));
        }
    }

    #[test]
    fn granted_permissions_is_consistent_with_matrix() {
        for role in Role::ALL {
            let granted = granted_permissions(role);
            for permission in Permission::ALL {
                assert_eq!(
                    granted.contains(&permission),
                    has_permission(role, permission)
                );
            }
        }
    }
}

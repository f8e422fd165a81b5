use shared::domain::{Actor, Role};
use tracing::debug;

use crate::error::ServiceError;

/// Everything a request can ask to do, as far as role gating is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateUnit,
    EditUnit,
    DeleteUnit,
    CreateCourse,
    EditCourse,
    DeleteCourse,
    ManageProfessors,
    ManageStudents,
    ManageEnrollments,
    ViewRecords,
}

const STAFF: &[Role] = &[Role::Administrator, Role::Professor];
const ADMIN_ONLY: &[Role] = &[Role::Administrator];
const EVERYONE: &[Role] = &[Role::Administrator, Role::Professor, Role::Anonymous];

impl Action {
    pub fn allowed_roles(self) -> &'static [Role] {
        match self {
            Action::CreateUnit | Action::EditUnit | Action::DeleteUnit => STAFF,
            Action::CreateCourse
            | Action::EditCourse
            | Action::DeleteCourse
            | Action::ManageProfessors
            | Action::ManageStudents
            | Action::ManageEnrollments => ADMIN_ONLY,
            Action::ViewRecords => EVERYONE,
        }
    }
}

/// Gates `action` on the actor's effective role and hands that role back so
/// callers branch on the same value the decision was made with.
pub fn authorize(actor: &Actor, action: Action) -> Result<Role, ServiceError> {
    let role = actor.effective_role();
    if action.allowed_roles().contains(&role) {
        Ok(role)
    } else {
        debug!(?role, ?action, identity = ?actor.identity, "request forbidden");
        Err(ServiceError::Forbidden)
    }
}

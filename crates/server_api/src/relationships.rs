//! Resolution of association sets submitted by callers.

use shared::domain::{Actor, ProfessorId, Role, UnitId};
use storage::{RecordKey, Storage};
use tracing::debug;

use crate::error::ServiceError;

/// Decides which professors a new unit is linked to.
///
/// Administrators get the submitted ids that exist; unknown ids are dropped.
/// Professors always get exactly themselves, whatever they submitted, so a
/// professor can never attach a colleague.
pub async fn resolve_professors(
    storage: &Storage,
    chosen_professor_ids: &[ProfessorId],
    actor: &Actor,
) -> Result<Vec<ProfessorId>, ServiceError> {
    let resolved = match actor.effective_role() {
        Role::Administrator => {
            let known = storage.existing_professors(chosen_professor_ids).await?;
            if known.len() != chosen_professor_ids.len() {
                let dropped: Vec<i64> = chosen_professor_ids
                    .iter()
                    .filter(|id| !known.contains(id))
                    .map(|id| id.0)
                    .collect();
                debug!(?dropped, "dropping unknown or repeated professor ids");
            }
            known
        }
        Role::Professor => {
            let identity = actor
                .identity
                .as_deref()
                .ok_or(ServiceError::ActorNotRegisteredAsProfessor)?;
            let professor = storage
                .professor_by_identity(identity)
                .await?
                .ok_or(ServiceError::ActorNotRegisteredAsProfessor)?;
            if !chosen_professor_ids.is_empty() {
                debug!(
                    professor_id = professor.id.0,
                    submitted = chosen_professor_ids.len(),
                    "ignoring professor selection submitted by a professor"
                );
            }
            vec![professor.id]
        }
        Role::Anonymous => return Err(ServiceError::Forbidden),
    };

    if resolved.is_empty() {
        return Err(ServiceError::MissingProfessorAssociation);
    }
    Ok(resolved)
}

/// Keeps the units that exist, in submission order, without duplicates.
pub async fn resolve_units(
    storage: &Storage,
    chosen_unit_ids: &[UnitId],
) -> Result<Vec<UnitId>, ServiceError> {
    let mut resolved = Vec::with_capacity(chosen_unit_ids.len());
    for unit_id in chosen_unit_ids {
        if resolved.contains(unit_id) {
            continue;
        }
        if storage.exists(RecordKey::Unit(*unit_id)).await? {
            resolved.push(*unit_id);
        } else {
            debug!(unit_id = unit_id.0, "dropping unknown unit id");
        }
    }
    Ok(resolved)
}

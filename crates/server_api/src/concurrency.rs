//! Optimistic concurrency handling for updates and deletes.
//!
//! A guarded write moves through:
//!
//! ```text
//! Attempt --applied--> Committed
//!    |
//!    +--stale--> Recheck --row gone--> NotFoundConflict
//!                   |
//!                   +--row present--> RealConflict
//! ```
//!
//! Writes refused by the store before touching the row end in `Blocked`
//! (dependents still reference it) or `MissingReference` (a record it points
//! at was removed in the meantime).
//!
//! Nothing is merged or retried. A `RealConflict` goes back to the caller,
//! who resubmits against fresh data.

use std::future::Future;

use shared::error::FieldError;
use storage::{RecordKey, Storage, WriteAttempt};
use tracing::{debug, warn};

use crate::error::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Attempt,
    Recheck,
    Committed,
    NotFoundConflict,
    RealConflict,
    Blocked,
    MissingReference,
}

/// Terminal result of a guarded write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    Committed,
    NotFoundConflict,
    RealConflict,
    /// The row exists but dependents forbid the write.
    Blocked,
    /// The named field points at a record that no longer exists.
    MissingReference(&'static str),
}

impl GuardOutcome {
    /// Maps non-committed outcomes onto the service error taxonomy.
    pub fn into_result(self, what: &'static str) -> Result<(), ServiceError> {
        match self {
            GuardOutcome::Committed => Ok(()),
            GuardOutcome::NotFoundConflict => Err(ServiceError::NotFound(what)),
            GuardOutcome::RealConflict => Err(ServiceError::Conflict(format!(
                "{what} was modified by another request; reload and resubmit"
            ))),
            GuardOutcome::Blocked => Err(ServiceError::Conflict(format!(
                "{what} still has dependent records"
            ))),
            GuardOutcome::MissingReference(field) => Err(ServiceError::Validation(vec![
                FieldError::new(field, "referenced record no longer exists"),
            ])),
        }
    }
}

pub struct ConcurrencyGuard<'a> {
    storage: &'a Storage,
    target: RecordKey,
    state: GuardState,
}

impl<'a> ConcurrencyGuard<'a> {
    pub fn new(storage: &'a Storage, target: RecordKey) -> Self {
        Self {
            storage,
            target,
            state: GuardState::Attempt,
        }
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    /// Runs `attempt` and classifies what happened to the target row.
    pub async fn run<F>(&mut self, attempt: F) -> Result<GuardOutcome, ServiceError>
    where
        F: Future<Output = anyhow::Result<WriteAttempt>>,
    {
        debug_assert_eq!(self.state, GuardState::Attempt);
        match attempt.await? {
            WriteAttempt::Applied => {
                self.transition(GuardState::Committed);
                Ok(GuardOutcome::Committed)
            }
            WriteAttempt::Blocked => {
                self.transition(GuardState::Blocked);
                Ok(GuardOutcome::Blocked)
            }
            WriteAttempt::MissingReference(field) => {
                self.transition(GuardState::MissingReference);
                Ok(GuardOutcome::MissingReference(field))
            }
            WriteAttempt::Stale => {
                self.transition(GuardState::Recheck);
                if self.storage.exists(self.target).await? {
                    self.transition(GuardState::RealConflict);
                    warn!(target_row = ?self.target, "concurrent modification detected");
                    Ok(GuardOutcome::RealConflict)
                } else {
                    self.transition(GuardState::NotFoundConflict);
                    Ok(GuardOutcome::NotFoundConflict)
                }
            }
        }
    }

    fn transition(&mut self, next: GuardState) {
        debug!(target_row = ?self.target, from = ?self.state, to = ?next, "guard transition");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::domain::{CourseId, UnitId, Version};
    use storage::{NewUnit, UnitInsert};

    async fn unit_fixture() -> (Storage, UnitId) {
        let (storage, unit, _) = unit_fixture_with_course().await;
        (storage, unit)
    }

    async fn unit_fixture_with_course() -> (Storage, UnitId, CourseId) {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let course = storage.create_course("LEI", None).await.expect("course");
        let professor = storage.register_professor("Ana", "U1").await.expect("prof");
        let UnitInsert::Created(unit) = storage
            .insert_unit(
                &NewUnit {
                    name: "Compiladores".into(),
                    academic_year: 3,
                    semester: 1,
                    course_id: course,
                },
                &[professor],
            )
            .await
            .expect("insert")
        else {
            panic!("unit not created");
        };
        (storage, unit, course)
    }

    #[tokio::test]
    async fn applied_write_commits() {
        let (storage, unit) = unit_fixture().await;
        let mut guard = ConcurrencyGuard::new(&storage, RecordKey::Unit(unit));
        let outcome = guard
            .run(storage.delete_unit(unit, Some(Version::INITIAL)))
            .await
            .expect("guard");
        assert_eq!(outcome, GuardOutcome::Committed);
        assert_eq!(guard.state(), GuardState::Committed);
    }

    #[tokio::test]
    async fn stale_write_on_present_row_is_real_conflict() {
        let (storage, unit) = unit_fixture().await;
        let mut guard = ConcurrencyGuard::new(&storage, RecordKey::Unit(unit));
        let outcome = guard
            .run(storage.delete_unit(unit, Some(Version(9))))
            .await
            .expect("guard");
        assert_eq!(outcome, GuardOutcome::RealConflict);
        assert!(guard.state() == GuardState::RealConflict);
    }

    #[tokio::test]
    async fn stale_write_on_missing_row_is_not_found() {
        let (storage, _) = unit_fixture().await;
        let ghost = UnitId(404);
        let mut guard = ConcurrencyGuard::new(&storage, RecordKey::Unit(ghost));
        let outcome = guard
            .run(storage.delete_unit(ghost, None))
            .await
            .expect("guard");
        assert_eq!(outcome, GuardOutcome::NotFoundConflict);
        assert!(matches!(
            outcome.into_result("curricular unit"),
            Err(ServiceError::NotFound("curricular unit"))
        ));
    }

    #[tokio::test]
    async fn edit_pointing_at_removed_course_is_a_course_field_error() {
        let (storage, unit, course) = unit_fixture_with_course().await;
        let mut moved = storage.get_unit(unit).await.expect("get").expect("unit");
        moved.course_id = CourseId(course.0 + 100);

        let mut guard = ConcurrencyGuard::new(&storage, RecordKey::Unit(unit));
        let outcome = guard.run(storage.update_unit(&moved)).await.expect("guard");
        assert_eq!(outcome, GuardOutcome::MissingReference("course_id"));
        assert_eq!(guard.state(), GuardState::MissingReference);

        match outcome.into_result("curricular unit") {
            Err(ServiceError::Validation(errors)) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].field, "course_id");
            }
            other => panic!("expected a validation error, got {other:?}"),
        }
    }
}

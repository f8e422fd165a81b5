//! Field and cross-field checks run before any mutation reaches the store.
//!
//! Every check appends to a list instead of returning early, so a caller
//! gets all violations of a submission in one response.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use shared::{
    domain::{CourseId, ProfessorId, Role, UNSELECTED_COURSE},
    error::FieldError,
};
use storage::{NewStudent, NewUnit, RecordKey, Storage};

use crate::error::ServiceError;

pub const MAX_STUDENT_NAME_CHARS: usize = 60;

lazy_static! {
    // Portuguese mobile numbers: 91, 92, 93 or 96 followed by seven digits.
    static ref PHONE_REGEX: Regex = Regex::new(r"^9[1236][0-9]{7}$").unwrap();
}

/// Checks a unit submitted for creation.
///
/// The professor selection only counts for administrators. A professor's
/// selection is replaced wholesale during relationship resolution, so it is
/// never reported here.
pub async fn validate_unit(
    storage: &Storage,
    draft: &NewUnit,
    chosen_professor_ids: &[ProfessorId],
    role: Role,
) -> Result<(), ServiceError> {
    let mut errors = unit_field_errors(storage, draft).await?;
    if role == Role::Administrator && chosen_professor_ids.is_empty() {
        errors.push(FieldError::new(
            "professor_ids",
            "choose at least one professor",
        ));
    }
    finish(errors)
}

/// Checks a unit submitted for edit. The professor set is not part of an edit.
pub async fn validate_unit_edit(storage: &Storage, draft: &NewUnit) -> Result<(), ServiceError> {
    finish(unit_field_errors(storage, draft).await?)
}

pub fn validate_course(name: &str) -> Result<(), ServiceError> {
    let mut errors = Vec::new();
    if name.trim().is_empty() {
        errors.push(FieldError::new("name", "course name is required"));
    }
    finish(errors)
}

pub async fn validate_student(
    storage: &Storage,
    draft: &NewStudent,
    today: NaiveDate,
) -> Result<(), ServiceError> {
    let mut errors = Vec::new();

    let name = draft.name.trim();
    if name.is_empty() {
        errors.push(FieldError::new("name", "student name is required"));
    } else if name.chars().count() > MAX_STUDENT_NAME_CHARS {
        errors.push(FieldError::new(
            "name",
            format!("student name is limited to {MAX_STUDENT_NAME_CHARS} characters"),
        ));
    }

    if draft.birth_date > today {
        errors.push(FieldError::new("birth_date", "birth date is in the future"));
    }

    if let Some(phone) = draft.phone.as_deref() {
        if !PHONE_REGEX.is_match(phone) {
            errors.push(FieldError::new("phone", "phone only accepts 9 digits"));
        }
    }

    if let Some(course_id) = draft.course_id {
        if !course_resolves(storage, course_id).await? {
            errors.push(FieldError::new("course_id", "unknown course"));
        }
    }

    finish(errors)
}

async fn unit_field_errors(
    storage: &Storage,
    draft: &NewUnit,
) -> Result<Vec<FieldError>, ServiceError> {
    let mut errors = Vec::new();
    if draft.name.trim().is_empty() {
        errors.push(FieldError::new("name", "unit name is required"));
    }
    if !course_resolves(storage, draft.course_id).await? {
        errors.push(FieldError::new("course_id", "choose a course"));
    }
    Ok(errors)
}

async fn course_resolves(storage: &Storage, course_id: CourseId) -> Result<bool, ServiceError> {
    if course_id == UNSELECTED_COURSE {
        return Ok(false);
    }
    Ok(storage.exists(RecordKey::Course(course_id)).await?)
}

fn finish(errors: Vec<FieldError>) -> Result<(), ServiceError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ServiceError::Validation(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(name: &str, course_id: CourseId) -> NewUnit {
        NewUnit {
            name: name.into(),
            academic_year: 1,
            semester: 2,
            course_id,
        }
    }

    fn fields(err: ServiceError) -> Vec<String> {
        match err {
            ServiceError::Validation(errors) => errors.into_iter().map(|e| e.field).collect(),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn accumulates_every_unit_violation() {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let err = validate_unit(&storage, &draft(" ", UNSELECTED_COURSE), &[], Role::Administrator)
            .await
            .expect_err("invalid");
        assert_eq!(fields(err), vec!["name", "course_id", "professor_ids"]);
    }

    #[tokio::test]
    async fn professor_selection_is_not_checked_for_professors() {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let course = storage.create_course("LEI", None).await.expect("course");
        validate_unit(&storage, &draft("BD", course), &[], Role::Professor)
            .await
            .expect("valid");
    }

    #[tokio::test]
    async fn unknown_course_is_rejected() {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let err = validate_unit_edit(&storage, &draft("BD", CourseId(3)))
            .await
            .expect_err("invalid");
        assert_eq!(fields(err), vec!["course_id"]);
    }

    #[tokio::test]
    async fn student_profile_rules() {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).expect("date");
        let mut student = NewStudent {
            name: "x".repeat(61),
            birth_date: NaiveDate::from_ymd_opt(2030, 1, 1).expect("date"),
            phone: Some("+351913456789".into()),
            course_id: Some(CourseId(8)),
            external_identity_ref: None,
        };
        let err = validate_student(&storage, &student, today)
            .await
            .expect_err("invalid");
        assert_eq!(fields(err), vec!["name", "birth_date", "phone", "course_id"]);

        student.name = "Joana".into();
        student.birth_date = NaiveDate::from_ymd_opt(2001, 5, 5).expect("date");
        student.phone = Some("913456789".into());
        student.course_id = None;
        validate_student(&storage, &student, today)
            .await
            .expect("valid");
    }

    #[test]
    fn blank_course_name_is_rejected() {
        assert!(matches!(
            validate_course("  "),
            Err(ServiceError::Validation(_))
        ));
        validate_course("Informatica").expect("valid");
    }
}

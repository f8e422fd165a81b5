use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{
    Course, CourseId, CurricularUnit, Professor, ProfessorId, StudentId, UnitId, Version,
};

/// Fields bindable on unit creation. The professor selection travels
/// separately from the unit itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUnitRequest {
    pub name: String,
    #[serde(default)]
    pub academic_year: i32,
    #[serde(default)]
    pub semester: i32,
    pub course_id: CourseId,
    #[serde(default)]
    pub professor_ids: Vec<ProfessorId>,
}

/// Fields bindable on unit edit. `version` is the snapshot the caller read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditUnitRequest {
    pub id: UnitId,
    pub name: String,
    #[serde(default)]
    pub academic_year: i32,
    #[serde(default)]
    pub semester: i32,
    pub course_id: CourseId,
    pub version: Version,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCourseRequest {
    pub name: String,
    #[serde(default)]
    pub logo_reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditCourseRequest {
    pub id: CourseId,
    pub name: String,
    #[serde(default)]
    pub logo_reference: Option<String>,
    pub version: Version,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterProfessorRequest {
    pub name: String,
    pub external_identity_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStudentRequest {
    pub name: String,
    pub birth_date: NaiveDate,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub course_id: Option<CourseId>,
    #[serde(default)]
    pub external_identity_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollRequest {
    pub unit_ids: Vec<UnitId>,
    #[serde(default)]
    pub enrolled_at: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentSummary {
    pub student_id: StudentId,
    pub enrolled_unit_ids: Vec<UnitId>,
    pub enrolled_at: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseWithUnits {
    pub course: Course,
    pub units: Vec<CurricularUnit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitWithProfessors {
    pub unit: CurricularUnit,
    pub course: Course,
    pub professors: Vec<Professor>,
}

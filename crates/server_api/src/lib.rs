use chrono::{NaiveDate, Utc};
use shared::{
    domain::{
        Actor, Course, CourseId, CurricularUnit, Professor, ProfessorId, Student, StudentId,
        UnitId, Version,
    },
    error::FieldError,
    protocol::{
        CourseWithUnits, CreateCourseRequest, CreateStudentRequest, CreateUnitRequest,
        EditCourseRequest, EditUnitRequest, EnrollRequest, EnrollmentSummary,
        RegisterProfessorRequest, UnitWithProfessors,
    },
};
use storage::{NewStudent, NewUnit, RecordKey, Storage, UnitInsert};
use tracing::info;

pub mod authorization;
pub mod concurrency;
pub mod error;
pub mod relationships;
pub mod validation;

use authorization::{authorize, Action};
use concurrency::ConcurrencyGuard;
pub use error::ServiceError;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

pub type ServiceResult<T> = Result<T, ServiceError>;

pub async fn list_courses(ctx: &ApiContext, actor: &Actor) -> ServiceResult<Vec<Course>> {
    authorize(actor, Action::ViewRecords)?;
    Ok(ctx.storage.list_courses().await?)
}

pub async fn load_course_with_units(
    ctx: &ApiContext,
    actor: &Actor,
    course_id: CourseId,
) -> ServiceResult<CourseWithUnits> {
    authorize(actor, Action::ViewRecords)?;
    let course = ctx
        .storage
        .get_course(course_id)
        .await?
        .ok_or(ServiceError::NotFound("course"))?;
    let units = ctx.storage.list_units_for_course(course_id).await?;
    Ok(CourseWithUnits { course, units })
}

pub async fn create_course(
    ctx: &ApiContext,
    actor: &Actor,
    req: CreateCourseRequest,
) -> ServiceResult<Course> {
    authorize(actor, Action::CreateCourse)?;
    validation::validate_course(&req.name)?;
    let course_id = ctx
        .storage
        .create_course(req.name.trim(), non_blank(req.logo_reference.as_deref()))
        .await?;
    info!(course_id = course_id.0, "course created");
    ctx.storage
        .get_course(course_id)
        .await?
        .ok_or(ServiceError::NotFound("course"))
}

pub async fn edit_course(
    ctx: &ApiContext,
    actor: &Actor,
    course_id: CourseId,
    req: EditCourseRequest,
) -> ServiceResult<Course> {
    authorize(actor, Action::EditCourse)?;
    if req.id != course_id {
        return Err(ServiceError::NotFound("course"));
    }
    validation::validate_course(&req.name)?;

    let course = Course {
        id: course_id,
        name: req.name.trim().to_string(),
        logo_reference: non_blank(req.logo_reference.as_deref()).map(str::to_string),
        version: req.version,
    };
    ConcurrencyGuard::new(&ctx.storage, RecordKey::Course(course_id))
        .run(ctx.storage.update_course(&course))
        .await?
        .into_result("course")?;
    info!(course_id = course_id.0, "course updated");

    ctx.storage
        .get_course(course_id)
        .await?
        .ok_or(ServiceError::NotFound("course"))
}

/// Removes a course. Refused with a conflict while units or students still
/// reference it.
pub async fn delete_course(
    ctx: &ApiContext,
    actor: &Actor,
    course_id: CourseId,
    expected: Option<Version>,
) -> ServiceResult<()> {
    authorize(actor, Action::DeleteCourse)?;
    ConcurrencyGuard::new(&ctx.storage, RecordKey::Course(course_id))
        .run(ctx.storage.delete_course(course_id, expected))
        .await?
        .into_result("course")?;
    info!(course_id = course_id.0, "course deleted");
    Ok(())
}

pub async fn list_units(ctx: &ApiContext, actor: &Actor) -> ServiceResult<Vec<CurricularUnit>> {
    authorize(actor, Action::ViewRecords)?;
    Ok(ctx.storage.list_units().await?)
}

pub async fn load_unit_with_professors(
    ctx: &ApiContext,
    actor: &Actor,
    unit_id: UnitId,
) -> ServiceResult<UnitWithProfessors> {
    authorize(actor, Action::ViewRecords)?;
    fetch_unit_graph(&ctx.storage, unit_id).await
}

/// Creates a curricular unit: authorize, validate, resolve the professor set,
/// then commit unit and links in one transaction.
pub async fn create_unit(
    ctx: &ApiContext,
    actor: &Actor,
    req: CreateUnitRequest,
) -> ServiceResult<UnitWithProfessors> {
    let role = authorize(actor, Action::CreateUnit)?;
    let draft = NewUnit {
        name: req.name.trim().to_string(),
        academic_year: req.academic_year,
        semester: req.semester,
        course_id: req.course_id,
    };
    validation::validate_unit(&ctx.storage, &draft, &req.professor_ids, role).await?;
    let professors =
        relationships::resolve_professors(&ctx.storage, &req.professor_ids, actor).await?;

    let unit_id = match ctx.storage.insert_unit(&draft, &professors).await? {
        UnitInsert::Created(unit_id) => unit_id,
        UnitInsert::MissingCourse => {
            return Err(ServiceError::Validation(vec![FieldError::new(
                "course_id",
                "choose a course",
            )]))
        }
        UnitInsert::NoProfessors => return Err(ServiceError::MissingProfessorAssociation),
    };
    info!(
        unit_id = unit_id.0,
        ?role,
        professors = professors.len(),
        "curricular unit created"
    );

    fetch_unit_graph(&ctx.storage, unit_id).await
}

/// Edits the scalar fields of a unit against the version the caller read.
/// The professor set is left as it is.
pub async fn edit_unit(
    ctx: &ApiContext,
    actor: &Actor,
    unit_id: UnitId,
    req: EditUnitRequest,
) -> ServiceResult<UnitWithProfessors> {
    authorize(actor, Action::EditUnit)?;
    if req.id != unit_id {
        return Err(ServiceError::NotFound("curricular unit"));
    }
    let draft = NewUnit {
        name: req.name.trim().to_string(),
        academic_year: req.academic_year,
        semester: req.semester,
        course_id: req.course_id,
    };
    validation::validate_unit_edit(&ctx.storage, &draft).await?;

    let unit = CurricularUnit {
        id: unit_id,
        name: draft.name,
        academic_year: draft.academic_year,
        semester: draft.semester,
        course_id: draft.course_id,
        version: req.version,
    };
    ConcurrencyGuard::new(&ctx.storage, RecordKey::Unit(unit_id))
        .run(ctx.storage.update_unit(&unit))
        .await?
        .into_result("curricular unit")?;
    info!(unit_id = unit_id.0, "curricular unit updated");

    fetch_unit_graph(&ctx.storage, unit_id).await
}

/// Deletes a unit together with its professor links and enrollments.
/// Deleting an id that is already gone reports `NotFound` and changes nothing.
pub async fn delete_unit(
    ctx: &ApiContext,
    actor: &Actor,
    unit_id: UnitId,
    expected: Option<Version>,
) -> ServiceResult<()> {
    authorize(actor, Action::DeleteUnit)?;
    ConcurrencyGuard::new(&ctx.storage, RecordKey::Unit(unit_id))
        .run(ctx.storage.delete_unit(unit_id, expected))
        .await?
        .into_result("curricular unit")?;
    info!(unit_id = unit_id.0, "curricular unit deleted");
    Ok(())
}

pub async fn list_professors(ctx: &ApiContext, actor: &Actor) -> ServiceResult<Vec<Professor>> {
    authorize(actor, Action::ViewRecords)?;
    Ok(ctx.storage.list_professors().await?)
}

pub async fn register_professor(
    ctx: &ApiContext,
    actor: &Actor,
    req: RegisterProfessorRequest,
) -> ServiceResult<ProfessorId> {
    authorize(actor, Action::ManageProfessors)?;
    let mut errors = Vec::new();
    if req.name.trim().is_empty() {
        errors.push(FieldError::new("name", "professor name is required"));
    }
    if req.external_identity_ref.trim().is_empty() {
        errors.push(FieldError::new(
            "external_identity_ref",
            "identity reference is required",
        ));
    }
    if !errors.is_empty() {
        return Err(ServiceError::Validation(errors));
    }
    let professor_id = ctx
        .storage
        .register_professor(req.name.trim(), req.external_identity_ref.trim())
        .await?;
    info!(professor_id = professor_id.0, "professor registered");
    Ok(professor_id)
}

/// Removes a professor unless that would leave some unit without one.
pub async fn delete_professor(
    ctx: &ApiContext,
    actor: &Actor,
    professor_id: ProfessorId,
) -> ServiceResult<()> {
    authorize(actor, Action::ManageProfessors)?;
    ConcurrencyGuard::new(&ctx.storage, RecordKey::Professor(professor_id))
        .run(ctx.storage.delete_professor(professor_id))
        .await?
        .into_result("professor")?;
    info!(professor_id = professor_id.0, "professor deleted");
    Ok(())
}

pub async fn create_student(
    ctx: &ApiContext,
    actor: &Actor,
    req: CreateStudentRequest,
) -> ServiceResult<Student> {
    authorize(actor, Action::ManageStudents)?;
    let draft = NewStudent {
        name: req.name.trim().to_string(),
        birth_date: req.birth_date,
        phone: non_blank(req.phone.as_deref()).map(str::to_string),
        course_id: req.course_id,
        external_identity_ref: non_blank(req.external_identity_ref.as_deref())
            .map(str::to_string),
    };
    validation::validate_student(&ctx.storage, &draft, today()).await?;
    let student_id = ctx.storage.create_student(&draft).await?;
    info!(student_id = student_id.0, "student created");
    ctx.storage
        .get_student(student_id)
        .await?
        .ok_or(ServiceError::NotFound("student"))
}

pub async fn delete_student(
    ctx: &ApiContext,
    actor: &Actor,
    student_id: StudentId,
) -> ServiceResult<()> {
    authorize(actor, Action::ManageStudents)?;
    ConcurrencyGuard::new(&ctx.storage, RecordKey::Student(student_id))
        .run(ctx.storage.delete_student(student_id))
        .await?
        .into_result("student")?;
    info!(student_id = student_id.0, "student deleted");
    Ok(())
}

/// Enrolls a student into the listed units. Unknown unit ids are dropped.
pub async fn enroll_student(
    ctx: &ApiContext,
    actor: &Actor,
    student_id: StudentId,
    req: EnrollRequest,
) -> ServiceResult<EnrollmentSummary> {
    authorize(actor, Action::ManageEnrollments)?;
    if !ctx.storage.exists(RecordKey::Student(student_id)).await? {
        return Err(ServiceError::NotFound("student"));
    }
    let unit_ids = relationships::resolve_units(&ctx.storage, &req.unit_ids).await?;
    let enrolled_at = req.enrolled_at.unwrap_or_else(today);
    let enrolled_unit_ids = ctx
        .storage
        .enroll_student(student_id, &unit_ids, enrolled_at)
        .await?;
    info!(
        student_id = student_id.0,
        units = enrolled_unit_ids.len(),
        "student enrolled"
    );
    Ok(EnrollmentSummary {
        student_id,
        enrolled_unit_ids,
        enrolled_at,
    })
}

async fn fetch_unit_graph(storage: &Storage, unit_id: UnitId) -> ServiceResult<UnitWithProfessors> {
    let unit = storage
        .get_unit(unit_id)
        .await?
        .ok_or(ServiceError::NotFound("curricular unit"))?;
    let course = storage
        .get_course(unit.course_id)
        .await?
        .ok_or(ServiceError::NotFound("course"))?;
    let professors = storage.professors_for_unit(unit_id).await?;
    Ok(UnitWithProfessors {
        unit,
        course,
        professors,
    })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

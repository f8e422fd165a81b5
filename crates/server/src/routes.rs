use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use server_api::ServiceError;
use shared::{
    domain::{
        Actor, Course, CourseId, CurricularUnit, Professor, ProfessorId, Student, StudentId,
        UnitId, Version,
    },
    error::{ApiError, ErrorCode},
    protocol::{
        CourseWithUnits, CreateCourseRequest, CreateStudentRequest, CreateUnitRequest,
        EditCourseRequest, EditUnitRequest, EnrollRequest, EnrollmentSummary,
        RegisterProfessorRequest, UnitWithProfessors,
    },
};
use tracing::error;

use crate::app_state::AppState;

pub(crate) const ACTOR_ID_HEADER: &str = "x-actor-id";
pub(crate) const ACTOR_ROLES_HEADER: &str = "x-actor-roles";

type HttpResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Deserialize)]
pub(crate) struct DeleteQuery {
    version: Option<i64>,
}

pub(crate) fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/courses", get(http_list_courses).post(http_create_course))
        .route(
            "/courses/:course_id",
            get(http_load_course)
                .put(http_edit_course)
                .delete(http_delete_course),
        )
        .route("/units", get(http_list_units).post(http_create_unit))
        .route(
            "/units/:unit_id",
            get(http_load_unit)
                .put(http_edit_unit)
                .delete(http_delete_unit),
        )
        .route(
            "/professors",
            get(http_list_professors).post(http_register_professor),
        )
        .route("/professors/:professor_id", delete(http_delete_professor))
        .route("/students", post(http_create_student))
        .route("/students/:student_id", delete(http_delete_student))
        .route("/students/:student_id/enrollments", post(http_enroll_student))
        .with_state(state)
}

/// Reads the actor handed over by the identity provider. Missing headers
/// yield an anonymous actor.
pub(crate) fn actor_from_headers(headers: &HeaderMap) -> Actor {
    let identity = headers
        .get(ACTOR_ID_HEADER)
        .and_then(|v| v.to_str().ok());
    let claims = headers
        .get(ACTOR_ROLES_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    Actor::from_claims(identity, claims)
}

fn reject(err: ServiceError) -> (StatusCode, Json<ApiError>) {
    if let ServiceError::Internal(inner) = &err {
        error!(error = %inner, "request failed");
    }
    let body: ApiError = err.into();
    let status = match body.code {
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(body))
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    state.api.storage.health_check().await.map_err(|e| {
        error!(error = %e, "health check failed");
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    Ok("ok")
}

async fn http_list_courses(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> HttpResult<Json<Vec<Course>>> {
    server_api::list_courses(&state.api, &actor_from_headers(&headers))
        .await
        .map(Json)
        .map_err(reject)
}

async fn http_create_course(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateCourseRequest>,
) -> HttpResult<(StatusCode, Json<Course>)> {
    server_api::create_course(&state.api, &actor_from_headers(&headers), req)
        .await
        .map(|course| (StatusCode::CREATED, Json(course)))
        .map_err(reject)
}

async fn http_load_course(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(course_id): Path<i64>,
) -> HttpResult<Json<CourseWithUnits>> {
    server_api::load_course_with_units(
        &state.api,
        &actor_from_headers(&headers),
        CourseId(course_id),
    )
    .await
    .map(Json)
    .map_err(reject)
}

async fn http_edit_course(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(course_id): Path<i64>,
    Json(req): Json<EditCourseRequest>,
) -> HttpResult<Json<Course>> {
    server_api::edit_course(
        &state.api,
        &actor_from_headers(&headers),
        CourseId(course_id),
        req,
    )
    .await
    .map(Json)
    .map_err(reject)
}

async fn http_delete_course(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(course_id): Path<i64>,
    Query(q): Query<DeleteQuery>,
) -> HttpResult<StatusCode> {
    server_api::delete_course(
        &state.api,
        &actor_from_headers(&headers),
        CourseId(course_id),
        q.version.map(Version),
    )
    .await
    .map(|()| StatusCode::NO_CONTENT)
    .map_err(reject)
}

async fn http_list_units(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> HttpResult<Json<Vec<CurricularUnit>>> {
    server_api::list_units(&state.api, &actor_from_headers(&headers))
        .await
        .map(Json)
        .map_err(reject)
}

async fn http_create_unit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateUnitRequest>,
) -> HttpResult<(StatusCode, Json<UnitWithProfessors>)> {
    server_api::create_unit(&state.api, &actor_from_headers(&headers), req)
        .await
        .map(|graph| (StatusCode::CREATED, Json(graph)))
        .map_err(reject)
}

async fn http_load_unit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(unit_id): Path<i64>,
) -> HttpResult<Json<UnitWithProfessors>> {
    server_api::load_unit_with_professors(&state.api, &actor_from_headers(&headers), UnitId(unit_id))
        .await
        .map(Json)
        .map_err(reject)
}

async fn http_edit_unit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(unit_id): Path<i64>,
    Json(req): Json<EditUnitRequest>,
) -> HttpResult<Json<UnitWithProfessors>> {
    server_api::edit_unit(
        &state.api,
        &actor_from_headers(&headers),
        UnitId(unit_id),
        req,
    )
    .await
    .map(Json)
    .map_err(reject)
}

async fn http_delete_unit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(unit_id): Path<i64>,
    Query(q): Query<DeleteQuery>,
) -> HttpResult<StatusCode> {
    server_api::delete_unit(
        &state.api,
        &actor_from_headers(&headers),
        UnitId(unit_id),
        q.version.map(Version),
    )
    .await
    .map(|()| StatusCode::NO_CONTENT)
    .map_err(reject)
}

async fn http_list_professors(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> HttpResult<Json<Vec<Professor>>> {
    server_api::list_professors(&state.api, &actor_from_headers(&headers))
        .await
        .map(Json)
        .map_err(reject)
}

async fn http_register_professor(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RegisterProfessorRequest>,
) -> HttpResult<(StatusCode, Json<ProfessorId>)> {
    server_api::register_professor(&state.api, &actor_from_headers(&headers), req)
        .await
        .map(|id| (StatusCode::CREATED, Json(id)))
        .map_err(reject)
}

async fn http_delete_professor(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(professor_id): Path<i64>,
) -> HttpResult<StatusCode> {
    server_api::delete_professor(
        &state.api,
        &actor_from_headers(&headers),
        ProfessorId(professor_id),
    )
    .await
    .map(|()| StatusCode::NO_CONTENT)
    .map_err(reject)
}

async fn http_create_student(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateStudentRequest>,
) -> HttpResult<(StatusCode, Json<Student>)> {
    server_api::create_student(&state.api, &actor_from_headers(&headers), req)
        .await
        .map(|student| (StatusCode::CREATED, Json(student)))
        .map_err(reject)
}

async fn http_delete_student(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(student_id): Path<i64>,
) -> HttpResult<StatusCode> {
    server_api::delete_student(
        &state.api,
        &actor_from_headers(&headers),
        StudentId(student_id),
    )
    .await
    .map(|()| StatusCode::NO_CONTENT)
    .map_err(reject)
}

async fn http_enroll_student(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(student_id): Path<i64>,
    Json(req): Json<EnrollRequest>,
) -> HttpResult<Json<EnrollmentSummary>> {
    server_api::enroll_student(
        &state.api,
        &actor_from_headers(&headers),
        StudentId(student_id),
        req,
    )
    .await
    .map(Json)
    .map_err(reject)
}

#[cfg(test)]
#[path = "tests/routes_tests.rs"]
mod tests;

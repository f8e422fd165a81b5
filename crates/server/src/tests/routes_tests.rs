use super::*;
use axum::{
    body::{self, Body},
    http::Request,
};
use server_api::ApiContext;
use shared::domain::ProfessorId;
use storage::Storage;
use tower::ServiceExt;

async fn test_app() -> (Router, Storage, CourseId, ProfessorId) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let course = storage
        .create_course("Engenharia Informatica", None)
        .await
        .expect("course");
    let professor = storage
        .register_professor("Ana", "U42")
        .await
        .expect("professor");
    let app = build_router(Arc::new(AppState {
        api: ApiContext {
            storage: storage.clone(),
        },
    }));
    (app, storage, course, professor)
}

fn json_request(
    method: &str,
    uri: &str,
    actor: Option<(&str, &str)>,
    body: serde_json::Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some((identity, roles)) = actor {
        builder = builder
            .header(ACTOR_ID_HEADER, identity)
            .header(ACTOR_ROLES_HEADER, roles);
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

async fn read_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, _, _, _) = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[test]
fn actor_headers_map_to_roles() {
    let mut headers = HeaderMap::new();
    headers.insert(ACTOR_ID_HEADER, "U42".parse().expect("header"));
    headers.insert(ACTOR_ROLES_HEADER, "Professor".parse().expect("header"));
    let actor = actor_from_headers(&headers);
    assert_eq!(actor, Actor::professor("U42"));

    assert_eq!(actor_from_headers(&HeaderMap::new()), Actor::anonymous());
}

#[tokio::test]
async fn professor_create_route_ignores_submitted_professors() {
    let (app, _, course, professor) = test_app().await;
    let request = json_request(
        "POST",
        "/units",
        Some(("U42", "professor")),
        serde_json::json!({ "name": "DB", "course_id": course.0, "professor_ids": [] }),
    );
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);

    let graph: UnitWithProfessors = read_json(response).await;
    assert_eq!(
        graph.professors.iter().map(|p| p.id).collect::<Vec<_>>(),
        vec![professor]
    );
}

#[tokio::test]
async fn anonymous_create_is_forbidden() {
    let (app, storage, course, professor) = test_app().await;
    let request = json_request(
        "POST",
        "/units",
        None,
        serde_json::json!({ "name": "DB", "course_id": course.0, "professor_ids": [professor.0] }),
    );
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(storage.list_units().await.expect("units").is_empty());
}

#[tokio::test]
async fn administrator_validation_errors_are_unprocessable() {
    let (app, _, _, _) = test_app().await;
    let request = json_request(
        "POST",
        "/units",
        Some(("admin", "administrator")),
        serde_json::json!({ "name": "Algorithms", "course_id": -1, "professor_ids": [] }),
    );
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let err: ApiError = read_json(response).await;
    assert_eq!(err.code, ErrorCode::Validation);
    let fields: Vec<_> = err.field_errors.iter().map(|f| f.field.as_str()).collect();
    assert_eq!(fields, vec!["course_id", "professor_ids"]);
}

#[tokio::test]
async fn stale_edit_returns_conflict_and_missing_delete_returns_not_found() {
    let (app, _, course, professor) = test_app().await;
    let admin = Some(("admin", "administrator"));

    let created = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/units",
            admin,
            serde_json::json!({
                "name": "Algorithms",
                "academic_year": 1,
                "semester": 1,
                "course_id": course.0,
                "professor_ids": [professor.0, 99]
            }),
        ))
        .await
        .expect("response");
    assert_eq!(created.status(), StatusCode::CREATED);
    let graph: UnitWithProfessors = read_json(created).await;
    let uri = format!("/units/{}", graph.unit.id.0);
    let edit = |name: &str| {
        serde_json::json!({
            "id": graph.unit.id.0,
            "name": name,
            "academic_year": 1,
            "semester": 1,
            "course_id": course.0,
            "version": graph.unit.version.0
        })
    };

    let first = app
        .clone()
        .oneshot(json_request("PUT", &uri, admin, edit("Algorithms I")))
        .await
        .expect("response");
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .clone()
        .oneshot(json_request("PUT", &uri, admin, edit("Algorithms II")))
        .await
        .expect("response");
    assert_eq!(second.status(), StatusCode::CONFLICT);

    let missing = app
        .oneshot(json_request(
            "DELETE",
            "/units/9999",
            admin,
            serde_json::Value::Null,
        ))
        .await
        .expect("response");
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn course_delete_with_units_is_conflict() {
    let (app, storage, course, professor) = test_app().await;
    storage
        .insert_unit(
            &storage::NewUnit {
                name: "SO".into(),
                academic_year: 2,
                semester: 1,
                course_id: course,
            },
            &[professor],
        )
        .await
        .expect("unit");

    let response = app
        .clone()
        .oneshot(json_request(
            "DELETE",
            &format!("/courses/{}", course.0),
            Some(("admin", "administrator")),
            serde_json::Value::Null,
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let loaded = app
        .oneshot(
            Request::get(format!("/courses/{}", course.0))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(loaded.status(), StatusCode::OK);
    let graph: CourseWithUnits = read_json(loaded).await;
    assert_eq!(graph.units.len(), 1);
}

#[tokio::test]
async fn student_with_bad_phone_is_rejected_then_created() {
    let (app, _, course, _) = test_app().await;
    let admin = Some(("admin", "administrator"));

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/students",
            admin,
            serde_json::json!({
                "name": "Rui",
                "birth_date": "2003-04-01",
                "phone": "812345678",
                "course_id": course.0,
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: ApiError = read_json(response).await;
    assert_eq!(body.field_errors[0].field, "phone");

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/students",
            admin,
            serde_json::json!({
                "name": "Rui",
                "birth_date": "2003-04-01",
                "phone": "912345678",
                "course_id": course.0,
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
    let student: Student = read_json(response).await;

    let response = app
        .oneshot(json_request(
            "DELETE",
            &format!("/students/{}", student.id.0),
            admin,
            serde_json::Value::Null,
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn professor_registration_is_admin_only_and_sole_professor_delete_conflicts() {
    let (app, storage, course, professor) = test_app().await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/professors",
            Some(("U42", "professor")),
            serde_json::json!({ "name": "Bruno", "external_identity_ref": "U77" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    storage
        .insert_unit(
            &storage::NewUnit {
                name: "Redes".into(),
                academic_year: 3,
                semester: 2,
                course_id: course,
            },
            &[professor],
        )
        .await
        .expect("unit");

    let response = app
        .oneshot(json_request(
            "DELETE",
            &format!("/professors/{}", professor.0),
            Some(("admin", "administrator")),
            serde_json::Value::Null,
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[test]
fn service_errors_map_onto_http_statuses() {
    let cases = [
        (ServiceError::Forbidden, StatusCode::FORBIDDEN),
        (
            ServiceError::ActorNotRegisteredAsProfessor,
            StatusCode::FORBIDDEN,
        ),
        (ServiceError::NotFound("course"), StatusCode::NOT_FOUND),
        (
            ServiceError::MissingProfessorAssociation,
            StatusCode::UNPROCESSABLE_ENTITY,
        ),
        (ServiceError::Conflict("stale".into()), StatusCode::CONFLICT),
        (
            ServiceError::Internal(anyhow::anyhow!("disk gone")),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    ];
    for (err, expected) in cases {
        let (status, Json(body)) = reject(err);
        assert_eq!(status, expected, "{body:?}");
    }
}

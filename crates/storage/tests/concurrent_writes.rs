use std::path::PathBuf;

use storage::{NewUnit, Storage, UnitInsert, WriteAttempt};

fn scratch_database(label: &str) -> (PathBuf, String) {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let root = std::env::temp_dir().join(format!("records_{label}_{suffix}"));
    let url = format!(
        "sqlite://{}",
        root.join("records.db").to_string_lossy().replace('\\', "/")
    );
    (root, url)
}

fn unit_named(name: String, course_id: shared::domain::CourseId) -> NewUnit {
    NewUnit {
        name,
        academic_year: 1,
        semester: 2,
        course_id,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_unit_inserts_on_a_file_database_all_commit() {
    let (root, url) = scratch_database("parallel_inserts");
    let storage = Storage::new(&url).await.expect("db");
    let course = storage.create_course("LEI", None).await.expect("course");
    let professor = storage
        .register_professor("Ana", "idp-ana")
        .await
        .expect("professor");

    let mut tasks = Vec::new();
    for n in 0..40 {
        let storage = storage.clone();
        tasks.push(tokio::spawn(async move {
            storage
                .insert_unit(&unit_named(format!("Unit {n}"), course), &[professor])
                .await
        }));
    }
    for task in tasks {
        let outcome = task.await.expect("join").expect("insert");
        assert!(matches!(outcome, UnitInsert::Created(_)), "{outcome:?}");
    }
    assert_eq!(storage.list_units().await.expect("units").len(), 40);

    drop(storage);
    std::fs::remove_dir_all(root).expect("cleanup");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unit_insert_racing_course_delete_resolves_cleanly() {
    let (root, url) = scratch_database("insert_delete_race");
    let storage = Storage::new(&url).await.expect("db");
    let professor = storage
        .register_professor("Ana", "idp-ana")
        .await
        .expect("professor");

    for round in 0..20 {
        let course = storage
            .create_course(&format!("Course {round}"), None)
            .await
            .expect("course");

        let inserting = {
            let storage = storage.clone();
            tokio::spawn(async move {
                storage
                    .insert_unit(&unit_named(format!("Unit {round}"), course), &[professor])
                    .await
            })
        };
        let deleting = {
            let storage = storage.clone();
            tokio::spawn(async move { storage.delete_course(course, None).await })
        };

        let inserted = inserting.await.expect("join").expect("insert");
        let deleted = deleting.await.expect("join").expect("delete");
        match (inserted, deleted) {
            (UnitInsert::Created(_), WriteAttempt::Blocked) => {}
            (UnitInsert::MissingCourse, WriteAttempt::Applied) => {}
            other => panic!("inconsistent race outcome {other:?}"),
        }
    }

    drop(storage);
    std::fs::remove_dir_all(root).expect("cleanup");
}

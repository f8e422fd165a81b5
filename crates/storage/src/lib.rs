use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite, Transaction,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use shared::domain::{
    Course, CourseId, CurricularUnit, Enrollment, Professor, ProfessorId, Student, StudentId,
    UnitId, Version,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

/// Result of a versioned write as seen by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAttempt {
    /// The row matched the expected version and the write went through.
    Applied,
    /// No row matched: it either changed or vanished since it was read.
    Stale,
    /// The row exists but dependents forbid the write.
    Blocked,
    /// A record the write points at is gone. Carries the offending field.
    MissingReference(&'static str),
}

/// Result of inserting a curricular unit together with its professor links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitInsert {
    Created(UnitId),
    MissingCourse,
    NoProfessors,
}

/// Row addressed by an existence probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKey {
    Course(CourseId),
    Unit(UnitId),
    Professor(ProfessorId),
    Student(StudentId),
}

#[derive(Debug, Clone)]
pub struct NewUnit {
    pub name: String,
    pub academic_year: i32,
    pub semester: i32,
    pub course_id: CourseId,
}

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub name: String,
    pub birth_date: NaiveDate,
    pub phone: Option<String>,
    pub course_id: Option<CourseId>,
    pub external_identity_ref: Option<String>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Starts a transaction that holds the write lock from its first statement.
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .context("could not start write transaction")
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn exists(&self, key: RecordKey) -> Result<bool> {
        let (sql, id) = match key {
            RecordKey::Course(id) => ("SELECT EXISTS(SELECT 1 FROM courses WHERE id = ?)", id.0),
            RecordKey::Unit(id) => (
                "SELECT EXISTS(SELECT 1 FROM curricular_units WHERE id = ?)",
                id.0,
            ),
            RecordKey::Professor(id) => {
                ("SELECT EXISTS(SELECT 1 FROM professors WHERE id = ?)", id.0)
            }
            RecordKey::Student(id) => ("SELECT EXISTS(SELECT 1 FROM students WHERE id = ?)", id.0),
        };
        let found: i64 = sqlx::query_scalar(sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("existence probe failed for {key:?}"))?;
        Ok(found != 0)
    }

    pub async fn create_course(&self, name: &str, logo_reference: Option<&str>) -> Result<CourseId> {
        let rec =
            sqlx::query("INSERT INTO courses (name, logo_reference) VALUES (?, ?) RETURNING id")
                .bind(name)
                .bind(logo_reference)
                .fetch_one(&self.pool)
                .await?;
        Ok(CourseId(rec.get::<i64, _>(0)))
    }

    pub async fn get_course(&self, course_id: CourseId) -> Result<Option<Course>> {
        let row = sqlx::query("SELECT id, name, logo_reference, version FROM courses WHERE id = ?")
            .bind(course_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(course_from_row))
    }

    pub async fn list_courses(&self) -> Result<Vec<Course>> {
        let rows = sqlx::query(
            "SELECT id, name, logo_reference, version FROM courses ORDER BY lower(name) ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(course_from_row).collect())
    }

    /// Writes `course` if the stored row still carries `course.version`.
    pub async fn update_course(&self, course: &Course) -> Result<WriteAttempt> {
        let updated = sqlx::query(
            "UPDATE courses
             SET name = ?1, logo_reference = ?2, version = version + 1
             WHERE id = ?3 AND version = ?4",
        )
        .bind(&course.name)
        .bind(course.logo_reference.as_deref())
        .bind(course.id.0)
        .bind(course.version.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(applied_or_stale(updated))
    }

    /// Deletes a course that no unit or student references.
    pub async fn delete_course(
        &self,
        course_id: CourseId,
        expected: Option<Version>,
    ) -> Result<WriteAttempt> {
        let mut tx = self.begin_write().await?;

        let dependents: i64 = sqlx::query_scalar(
            "SELECT (SELECT COUNT(*) FROM curricular_units WHERE course_id = ?1)
                  + (SELECT COUNT(*) FROM students WHERE course_id = ?1)",
        )
        .bind(course_id.0)
        .fetch_one(&mut *tx)
        .await?;

        if dependents > 0 {
            let present: i64 =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM courses WHERE id = ?)")
                    .bind(course_id.0)
                    .fetch_one(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Ok(if present != 0 {
                WriteAttempt::Blocked
            } else {
                WriteAttempt::Stale
            });
        }

        let deleted = sqlx::query("DELETE FROM courses WHERE id = ?1 AND (?2 IS NULL OR version = ?2)")
            .bind(course_id.0)
            .bind(expected.map(|v| v.0))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(applied_or_stale(deleted))
    }

    /// Inserts a unit and links the given professors in one transaction.
    ///
    /// Professor ids without a matching row are skipped. If the course is gone
    /// or no professor could be linked, nothing is written.
    pub async fn insert_unit(&self, unit: &NewUnit, professors: &[ProfessorId]) -> Result<UnitInsert> {
        let mut tx = self.begin_write().await?;

        let course_present: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM courses WHERE id = ?)")
                .bind(unit.course_id.0)
                .fetch_one(&mut *tx)
                .await?;
        if course_present == 0 {
            tx.rollback().await?;
            return Ok(UnitInsert::MissingCourse);
        }

        let rec = sqlx::query(
            "INSERT INTO curricular_units (name, academic_year, semester, course_id)
             VALUES (?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&unit.name)
        .bind(unit.academic_year)
        .bind(unit.semester)
        .bind(unit.course_id.0)
        .fetch_one(&mut *tx)
        .await?;
        let unit_id = UnitId(rec.get::<i64, _>(0));

        let mut linked = 0u64;
        for professor_id in professors {
            linked += sqlx::query(
                "INSERT OR IGNORE INTO unit_professors (unit_id, professor_id)
                 SELECT ?, id FROM professors WHERE id = ?",
            )
            .bind(unit_id.0)
            .bind(professor_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        if linked == 0 {
            tx.rollback().await?;
            return Ok(UnitInsert::NoProfessors);
        }

        tx.commit().await?;
        Ok(UnitInsert::Created(unit_id))
    }

    pub async fn get_unit(&self, unit_id: UnitId) -> Result<Option<CurricularUnit>> {
        let row = sqlx::query(
            "SELECT id, name, academic_year, semester, course_id, version
             FROM curricular_units
             WHERE id = ?",
        )
        .bind(unit_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(unit_from_row))
    }

    pub async fn list_units(&self) -> Result<Vec<CurricularUnit>> {
        let rows = sqlx::query(
            "SELECT id, name, academic_year, semester, course_id, version
             FROM curricular_units
             ORDER BY lower(name) ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(unit_from_row).collect())
    }

    pub async fn list_units_for_course(&self, course_id: CourseId) -> Result<Vec<CurricularUnit>> {
        let rows = sqlx::query(
            "SELECT id, name, academic_year, semester, course_id, version
             FROM curricular_units
             WHERE course_id = ?
             ORDER BY academic_year ASC, semester ASC, lower(name) ASC",
        )
        .bind(course_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(unit_from_row).collect())
    }

    /// Writes the scalar fields of `unit` if the stored row still carries
    /// `unit.version`. A target course that no longer exists is reported as
    /// `MissingReference("course_id")` and nothing is written.
    pub async fn update_unit(&self, unit: &CurricularUnit) -> Result<WriteAttempt> {
        let mut tx = self.begin_write().await?;

        let course_present: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM courses WHERE id = ?)")
                .bind(unit.course_id.0)
                .fetch_one(&mut *tx)
                .await?;
        if course_present == 0 {
            tx.rollback().await?;
            return Ok(WriteAttempt::MissingReference("course_id"));
        }

        let updated = sqlx::query(
            "UPDATE curricular_units
             SET name = ?1, academic_year = ?2, semester = ?3, course_id = ?4, version = version + 1
             WHERE id = ?5 AND version = ?6",
        )
        .bind(&unit.name)
        .bind(unit.academic_year)
        .bind(unit.semester)
        .bind(unit.course_id.0)
        .bind(unit.id.0)
        .bind(unit.version.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;
        Ok(applied_or_stale(updated))
    }

    /// Deletes a unit; its professor links and enrollments go with it.
    /// Without an `expected` version the delete is unconditional.
    pub async fn delete_unit(&self, unit_id: UnitId, expected: Option<Version>) -> Result<WriteAttempt> {
        let deleted = sqlx::query(
            "DELETE FROM curricular_units WHERE id = ?1 AND (?2 IS NULL OR version = ?2)",
        )
        .bind(unit_id.0)
        .bind(expected.map(|v| v.0))
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(applied_or_stale(deleted))
    }

    pub async fn register_professor(&self, name: &str, external_identity_ref: &str) -> Result<ProfessorId> {
        let rec = sqlx::query(
            "INSERT INTO professors (name, external_identity_ref) VALUES (?, ?)
             ON CONFLICT(external_identity_ref) DO UPDATE SET name = excluded.name
             RETURNING id",
        )
        .bind(name)
        .bind(external_identity_ref)
        .fetch_one(&self.pool)
        .await?;
        Ok(ProfessorId(rec.get::<i64, _>(0)))
    }

    pub async fn professor_by_identity(&self, external_identity_ref: &str) -> Result<Option<Professor>> {
        let row = sqlx::query(
            "SELECT id, name, external_identity_ref FROM professors WHERE external_identity_ref = ?",
        )
        .bind(external_identity_ref)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(professor_from_row))
    }

    /// Returns the subset of `ids` that name existing professors, in input
    /// order and without duplicates.
    pub async fn existing_professors(&self, ids: &[ProfessorId]) -> Result<Vec<ProfessorId>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if found.contains(id) {
                continue;
            }
            if self.exists(RecordKey::Professor(*id)).await? {
                found.push(*id);
            }
        }
        Ok(found)
    }

    pub async fn list_professors(&self) -> Result<Vec<Professor>> {
        let rows = sqlx::query(
            "SELECT id, name, external_identity_ref FROM professors ORDER BY lower(name) ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(professor_from_row).collect())
    }

    pub async fn professors_for_unit(&self, unit_id: UnitId) -> Result<Vec<Professor>> {
        let rows = sqlx::query(
            "SELECT p.id, p.name, p.external_identity_ref
             FROM professors p
             INNER JOIN unit_professors up ON up.professor_id = p.id
             WHERE up.unit_id = ?
             ORDER BY p.id ASC",
        )
        .bind(unit_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(professor_from_row).collect())
    }

    /// Removes a professor unless some unit would be left without anyone
    /// teaching it.
    pub async fn delete_professor(&self, professor_id: ProfessorId) -> Result<WriteAttempt> {
        let mut tx = self.begin_write().await?;

        let sole_professor_of: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)
             FROM unit_professors up
             WHERE up.professor_id = ?1
               AND NOT EXISTS (
                   SELECT 1 FROM unit_professors other
                   WHERE other.unit_id = up.unit_id AND other.professor_id <> ?1
               )",
        )
        .bind(professor_id.0)
        .fetch_one(&mut *tx)
        .await?;
        if sole_professor_of > 0 {
            tx.rollback().await?;
            return Ok(WriteAttempt::Blocked);
        }

        let deleted = sqlx::query("DELETE FROM professors WHERE id = ?")
            .bind(professor_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(applied_or_stale(deleted))
    }

    pub async fn create_student(&self, student: &NewStudent) -> Result<StudentId> {
        let rec = sqlx::query(
            "INSERT INTO students (name, birth_date, phone, course_id, external_identity_ref)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&student.name)
        .bind(student.birth_date)
        .bind(student.phone.as_deref())
        .bind(student.course_id.map(|id| id.0))
        .bind(student.external_identity_ref.as_deref())
        .fetch_one(&self.pool)
        .await?;
        Ok(StudentId(rec.get::<i64, _>(0)))
    }

    pub async fn get_student(&self, student_id: StudentId) -> Result<Option<Student>> {
        let row = sqlx::query(
            "SELECT id, name, birth_date, phone, course_id, external_identity_ref, version
             FROM students
             WHERE id = ?",
        )
        .bind(student_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Student {
            id: StudentId(r.get::<i64, _>(0)),
            name: r.get::<String, _>(1),
            birth_date: r.get::<NaiveDate, _>(2),
            phone: r.get::<Option<String>, _>(3),
            course_id: r.get::<Option<i64>, _>(4).map(CourseId),
            external_identity_ref: r.get::<Option<String>, _>(5),
            version: Version(r.get::<i64, _>(6)),
        }))
    }

    pub async fn delete_student(&self, student_id: StudentId) -> Result<WriteAttempt> {
        let deleted = sqlx::query("DELETE FROM students WHERE id = ?")
            .bind(student_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(applied_or_stale(deleted))
    }

    /// Enrolls a student into each listed unit that exists. Re-enrolling
    /// refreshes the date. Returns the units actually linked.
    pub async fn enroll_student(
        &self,
        student_id: StudentId,
        unit_ids: &[UnitId],
        enrolled_at: NaiveDate,
    ) -> Result<Vec<UnitId>> {
        let mut tx = self.begin_write().await?;
        let mut linked = Vec::with_capacity(unit_ids.len());
        for unit_id in unit_ids {
            if linked.contains(unit_id) {
                continue;
            }
            let affected = sqlx::query(
                "INSERT INTO enrollments (student_id, unit_id, enrolled_at)
                 SELECT s.id, u.id, ?3
                 FROM students s, curricular_units u
                 WHERE s.id = ?1 AND u.id = ?2
                 ON CONFLICT(student_id, unit_id) DO UPDATE SET enrolled_at = excluded.enrolled_at",
            )
            .bind(student_id.0)
            .bind(unit_id.0)
            .bind(enrolled_at)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if affected > 0 {
                linked.push(*unit_id);
            }
        }
        tx.commit().await?;
        Ok(linked)
    }

    pub async fn enrollments_for_student(&self, student_id: StudentId) -> Result<Vec<Enrollment>> {
        let rows = sqlx::query(
            "SELECT student_id, unit_id, enrolled_at
             FROM enrollments
             WHERE student_id = ?
             ORDER BY unit_id ASC",
        )
        .bind(student_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Enrollment {
                student_id: StudentId(r.get::<i64, _>(0)),
                unit_id: UnitId(r.get::<i64, _>(1)),
                enrolled_at: r.get::<NaiveDate, _>(2),
            })
            .collect())
    }
}

fn applied_or_stale(rows_affected: u64) -> WriteAttempt {
    if rows_affected > 0 {
        WriteAttempt::Applied
    } else {
        WriteAttempt::Stale
    }
}

fn course_from_row(r: &SqliteRow) -> Course {
    Course {
        id: CourseId(r.get::<i64, _>(0)),
        name: r.get::<String, _>(1),
        logo_reference: r.get::<Option<String>, _>(2),
        version: Version(r.get::<i64, _>(3)),
    }
}

fn unit_from_row(r: &SqliteRow) -> CurricularUnit {
    CurricularUnit {
        id: UnitId(r.get::<i64, _>(0)),
        name: r.get::<String, _>(1),
        academic_year: r.get::<i32, _>(2),
        semester: r.get::<i32, _>(3),
        course_id: CourseId(r.get::<i64, _>(4)),
        version: Version(r.get::<i64, _>(5)),
    }
}

fn professor_from_row(r: &SqliteRow) -> Professor {
    Professor {
        id: ProfessorId(r.get::<i64, _>(0)),
        name: r.get::<String, _>(1),
        external_identity_ref: r.get::<String, _>(2),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

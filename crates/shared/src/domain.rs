use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);
    };
}

id_newtype!(CourseId);
id_newtype!(UnitId);
id_newtype!(ProfessorId);
id_newtype!(StudentId);

/// Course id the create form submits when nothing was picked from the dropdown.
pub const UNSELECTED_COURSE: CourseId = CourseId(-1);

/// Optimistic concurrency token carried by every mutable row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(pub i64);

impl Version {
    pub const INITIAL: Version = Version(1);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Anonymous,
    Professor,
    Administrator,
}

impl Role {
    /// Maps a claim from the identity provider. Unknown claims yield `None`.
    pub fn from_claim(claim: &str) -> Option<Role> {
        match claim.trim().to_ascii_lowercase().as_str() {
            "administrator" | "admin" => Some(Role::Administrator),
            "professor" => Some(Role::Professor),
            _ => None,
        }
    }
}

/// The caller of a request, as handed over by the external identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub identity: Option<String>,
    pub roles: Vec<Role>,
}

impl Actor {
    pub fn anonymous() -> Self {
        Self {
            identity: None,
            roles: Vec::new(),
        }
    }

    pub fn administrator(identity: impl Into<String>) -> Self {
        Self {
            identity: Some(identity.into()),
            roles: vec![Role::Administrator],
        }
    }

    pub fn professor(identity: impl Into<String>) -> Self {
        Self {
            identity: Some(identity.into()),
            roles: vec![Role::Professor],
        }
    }

    /// Builds an actor from a raw identity and a comma separated claim list.
    pub fn from_claims(identity: Option<&str>, claims: &str) -> Self {
        let identity = identity
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let roles = claims.split(',').filter_map(Role::from_claim).collect();
        Self { identity, roles }
    }

    /// Highest role the actor can act with. A role claim without an identity
    /// cannot be tied to any record and collapses to `Anonymous`.
    pub fn effective_role(&self) -> Role {
        if self.identity.is_none() {
            return Role::Anonymous;
        }
        self.roles.iter().copied().max().unwrap_or(Role::Anonymous)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub name: String,
    pub logo_reference: Option<String>,
    pub version: Version,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurricularUnit {
    pub id: UnitId,
    pub name: String,
    pub academic_year: i32,
    pub semester: i32,
    pub course_id: CourseId,
    pub version: Version,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Professor {
    pub id: ProfessorId,
    pub name: String,
    pub external_identity_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub birth_date: chrono::NaiveDate,
    pub phone: Option<String>,
    pub course_id: Option<CourseId>,
    pub external_identity_ref: Option<String>,
    pub version: Version,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub student_id: StudentId,
    pub unit_id: UnitId,
    pub enrolled_at: chrono::NaiveDate,
}

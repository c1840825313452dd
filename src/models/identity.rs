use serde::{Deserialize, Serialize};

/// Lecture identifier, the unit of scoping for presence, documents and chat
pub type LectureId = u64;

/// Participant role within a lecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            _ => None,
        }
    }

    pub fn is_teacher(&self) -> bool {
        matches!(self, Role::Teacher)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity resolved by the authentication layer; never taken from frame bodies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub role: Role,
}

impl UserIdentity {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn teacher(id: impl Into<String>) -> Self {
        Self::new(id, Role::Teacher)
    }

    pub fn student(id: impl Into<String>) -> Self {
        Self::new(id, Role::Student)
    }
}

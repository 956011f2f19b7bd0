use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Configuration(String),

    #[error(
        "environment variable GCTL_SESSION_ID is required. Export GCTL_SESSION_ID or TERM_SESSION_ID, for example: export GCTL_SESSION_ID=$(uuidgen)"
    )]
    MissingSession,

    #[error("{0}")]
    Validation(String),

    #[error("{kind} {name:?} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{what} is ambiguous, matching candidates: {}", .candidates.join(", "))]
    Ambiguous {
        what: String,
        candidates: Vec<String>,
    },

    #[error("no bastions found for user {user:?} and shoot {shoot:?}")]
    NoBastionFound { user: String, shoot: String },

    #[error(
        "multiple bastions were found for the current user, specify one of: {}",
        .candidates.join(", ")
    )]
    AmbiguousBastion { candidates: Vec<String> },

    #[error(
        "cannot determine the current user: the kubeconfig provides neither a bearer token nor a client certificate"
    )]
    UnresolvableIdentity,

    #[error("failed to {operation}: {source}")]
    Upstream {
        operation: String,
        #[source]
        source: kube::Error,
    },

    #[error("failed to access {}: {source}", .path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to {operation}: {message}")]
    Serialization { operation: String, message: String },
}

impl Error {
    pub fn no_garden_targeted() -> Self {
        Self::Validation("no garden cluster targeted".to_string())
    }

    pub fn no_shoot_targeted() -> Self {
        Self::Validation("no shoot cluster targeted".to_string())
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn upstream(operation: impl Into<String>, source: kube::Error) -> Self {
        Self::Upstream {
            operation: operation.into(),
            source,
        }
    }

    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    pub fn serialization(operation: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::Serialization {
            operation: operation.into(),
            message: error.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Maps a kube error to `NotFound` when the API server answered 404.
pub fn classify(kind: &'static str, name: &str, operation: String, error: kube::Error) -> Error {
    match error {
        kube::Error::Api(ref response) if response.code == 404 => Error::not_found(kind, name),
        other => Error::upstream(operation, other),
    }
}

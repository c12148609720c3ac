//! Type aliases for domain concepts.
//!
//! Provides semantic type aliases to make function signatures more descriptive.

/// A project identifier.
pub type ProjectId = String;

/// An environment name within a project (e.g., dev, staging, prod).
pub type EnvironmentName = String;

/// A hex-encoded verification hash.
pub type VerificationHash = String;

/// Build the composite cache key for a project and optional environment.
///
/// Project-scope keys are the bare project id, environment-scope keys are
/// `project:env`.
pub fn scope_key(project: &str, environment: Option<&str>) -> String {
    match environment {
        Some(env) => format!("{}:{}", project, env),
        None => project.to_string(),
    }
}

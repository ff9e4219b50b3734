use thiserror::Error;

/// Errors produced by the documentation pipeline.
///
/// Every step wraps its collaborator's failure into the variant naming that
/// step, so callers can tell an init failure from a migration failure without
/// parsing messages. `Config`, `Db` and `Internal` are the ambient variants
/// used below the step level before the pipeline adds step context.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("documentation tool unavailable: {reason}")]
    ToolUnavailable { reason: String },

    #[error("database backend unavailable: {reason}")]
    BackendUnavailable { reason: String },

    #[error("create database \"{name}\" failed: {reason}")]
    DatabaseCreationFailed { name: String, reason: String },

    #[error("create schema \"{schema}\" failed: {reason}")]
    SchemaCreationFailed { schema: String, reason: String },

    #[error("configuration mismatch: {detail}")]
    ConfigMismatch { detail: String },

    #[error("migration failed for schema \"{schema}\": {reason}")]
    MigrationFailed { schema: String, reason: String },

    #[error("documentation failed for schema \"{schema}\": {reason}")]
    DocumentationFailed { schema: String, reason: String },

    #[error("cleanup failed: {reason}")]
    CleanupFailed { reason: String },

    #[error("configuration error: {detail}")]
    Config { detail: String },

    #[error("database error: {detail}")]
    Db { detail: String },

    #[error("internal error: {detail}")]
    Internal { detail: String },
}

impl PipelineError {
    pub fn tool_unavailable(reason: String) -> Self {
        Self::ToolUnavailable { reason }
    }

    pub fn backend_unavailable(reason: String) -> Self {
        Self::BackendUnavailable { reason }
    }

    pub fn config_mismatch(detail: String) -> Self {
        Self::ConfigMismatch { detail }
    }

    pub fn cleanup_failed(reason: String) -> Self {
        Self::CleanupFailed { reason }
    }

    pub fn config(detail: String) -> Self {
        Self::Config { detail }
    }

    pub fn db(detail: String) -> Self {
        Self::Db { detail }
    }

    pub fn internal(detail: String) -> Self {
        Self::Internal { detail }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_variants_name_the_step_and_subject() {
        let err = PipelineError::MigrationFailed {
            schema: "accounts".to_string(),
            reason: "relation already exists".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "migration failed for schema \"accounts\": relation already exists"
        );

        let err = PipelineError::DatabaseCreationFailed {
            name: "app".to_string(),
            reason: "permission denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "create database \"app\" failed: permission denied"
        );
    }

    #[test]
    fn helper_constructors_build_matching_variants() {
        assert!(matches!(
            PipelineError::backend_unavailable("timeout".to_string()),
            PipelineError::BackendUnavailable { .. }
        ));
        assert!(matches!(
            PipelineError::config_mismatch("lists differ".to_string()),
            PipelineError::ConfigMismatch { .. }
        ));
        assert!(matches!(
            PipelineError::db("connect refused".to_string()),
            PipelineError::Db { .. }
        ));
    }

    #[test]
    fn cleanup_failed_display_is_distinct() {
        let err = PipelineError::cleanup_failed("container already gone".to_string());
        assert_eq!(err.to_string(), "cleanup failed: container already gone");
    }
}

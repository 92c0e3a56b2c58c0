//! Errors

use thiserror::Error;

/// Result type used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while building statements or materializing rows.
///
/// Everything except [`Error::Execution`] is raised before any I/O is
/// attempted. Variants are `Clone` so that cached fragment failures can be
/// handed out to every caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The entity mapping cannot support the requested operation.
    #[error("configuration error for {entity}: {description}")]
    Configuration { entity: String, description: String },

    /// A required argument is missing or malformed.
    #[error("invalid argument `{argument}`: {description}")]
    InvalidArgument { argument: String, description: String },

    /// Pagination was requested without a deterministic order.
    #[error("pagination error: {description}")]
    Pagination { description: String },

    /// A value could not be converted to or from a property type.
    #[error("conversion error: {description}")]
    Conversion { description: String },

    /// The external executor failed.
    #[error("execution error: {description}")]
    Execution { description: String },
}

impl Error {
    pub(crate) fn configuration(entity: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Configuration {
            entity: entity.into(),
            description: description.into(),
        }
    }

    pub(crate) fn invalid_argument(
        argument: impl Into<String>, description: impl Into<String>,
    ) -> Self {
        Self::InvalidArgument {
            argument: argument.into(),
            description: description.into(),
        }
    }

    pub(crate) fn pagination(description: impl Into<String>) -> Self {
        Self::Pagination {
            description: description.into(),
        }
    }

    pub(crate) fn conversion(description: impl Into<String>) -> Self {
        Self::Conversion {
            description: description.into(),
        }
    }

    pub(crate) fn execution(description: impl Into<String>) -> Self {
        Self::Execution {
            description: description.into(),
        }
    }

    /// Returns `true` for errors caused by the entity mapping itself.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        // keep our own variants intact when they travel through an executor
        if let Some(inner) = err.downcast_ref::<Self>() {
            return inner.clone();
        }

        let chain = err.chain().map(ToString::to_string).collect::<Vec<_>>().join(": ");
        Self::Execution { description: chain }
    }
}

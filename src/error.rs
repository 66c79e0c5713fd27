use thiserror::Error;

/// Failures of the refresh pipeline and of invalidation.
///
/// Producer and persistence failures are delivered the same way: they terminate the entry's channel. They are kept
/// apart here so subscribers can tell which collaborator failed.
#[derive(Debug, Error)]
pub enum CacheError<E>
where
    E: std::error::Error + 'static,
{
    #[error("producer failed for key '{key}': {source}")]
    Produce {
        key:    String,
        #[source]
        source: E,
    },

    #[error("failed to persist value for key '{key}': {source}")]
    Persist {
        key:    String,
        #[source]
        source: E,
    },

    #[error("failed to remove stored records: {source}")]
    Remove {
        #[source]
        source: E,
    },
}

impl<E> CacheError<E>
where
    E: std::error::Error + 'static,
{
    /// The collaborator error behind this failure.
    pub fn inner(&self) -> &E {
        match self {
            Self::Produce { source, .. } | Self::Persist { source, .. } | Self::Remove { source } => source,
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Produce { key, .. } | Self::Persist { key, .. } => Some(key),
            Self::Remove { .. } => None,
        }
    }
}

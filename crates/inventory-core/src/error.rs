use thiserror::Error;

/// Errors that can occur in a storage backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`InventoryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    NoMatch,
    BackendUnavailable,
    Validation,
}

/// Errors returned by the inventory engine.
///
/// Domain errors keep the message template (with `{}` placeholders) apart
/// from the offending names so a presentation layer can highlight them.
#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("{}", render(.template, .targets))]
    NotFound {
        template: String,
        targets: Vec<String>,
    },

    #[error("{}", render(.template, .targets))]
    AlreadyExists {
        template: String,
        targets: Vec<String>,
    },

    #[error("{}", render(.template, .targets))]
    NoMatch {
        template: String,
        targets: Vec<String>,
    },

    #[error("Backend temporarily unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Invalid request: {0}")]
    Validation(String),
}

impl InventoryError {
    pub fn not_found(template: &str, targets: impl IntoTargets) -> Self {
        Self::NotFound {
            template: template.to_string(),
            targets: targets.into_targets(),
        }
    }

    pub fn already_exists(template: &str, targets: impl IntoTargets) -> Self {
        Self::AlreadyExists {
            template: template.to_string(),
            targets: targets.into_targets(),
        }
    }

    pub fn no_match(template: &str) -> Self {
        Self::NoMatch {
            template: template.to_string(),
            targets: Vec::new(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::NoMatch { .. } => ErrorKind::NoMatch,
            Self::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            Self::Validation(_) => ErrorKind::Validation,
        }
    }

    /// The unrendered message, `{}` marking where each target goes.
    pub fn template(&self) -> &str {
        match self {
            Self::NotFound { template, .. }
            | Self::AlreadyExists { template, .. }
            | Self::NoMatch { template, .. } => template,
            Self::BackendUnavailable(msg) | Self::Validation(msg) => msg,
        }
    }

    /// Offending names, in the order they appear in the template.
    pub fn targets(&self) -> &[String] {
        match self {
            Self::NotFound { targets, .. }
            | Self::AlreadyExists { targets, .. }
            | Self::NoMatch { targets, .. } => targets,
            Self::BackendUnavailable(_) | Self::Validation(_) => &[],
        }
    }
}

impl From<StorageError> for InventoryError {
    fn from(err: StorageError) -> Self {
        Self::BackendUnavailable(err.to_string())
    }
}

/// Anything that can be turned into the ordered target list of an error.
pub trait IntoTargets {
    fn into_targets(self) -> Vec<String>;
}

impl IntoTargets for &str {
    fn into_targets(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoTargets for Vec<String> {
    fn into_targets(self) -> Vec<String> {
        self
    }
}

/// Fill each `{}` in `template` with the next target. Extra targets are
/// appended, space separated.
fn render(template: &str, targets: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = targets.iter();
    let mut pieces = template.split("{}").peekable();
    while let Some(piece) = pieces.next() {
        out.push_str(piece);
        if pieces.peek().is_some() {
            if let Some(target) = rest.next() {
                out.push_str(target);
            }
        }
    }
    for target in rest {
        out.push(' ');
        out.push_str(target);
    }
    out
}

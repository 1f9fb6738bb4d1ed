use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("path template must start with '/': {0}")]
    PathTemplateNotAbsolute(String),

    #[error("path template {template} has a malformed segment: {segment}")]
    MalformedPathSegment { template: String, segment: String },

    #[error("path template {template} declares parameter {name} twice")]
    DuplicatePathParam { template: String, name: String },
}

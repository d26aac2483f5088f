use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid ETL name: '{0}' contains no usable characters")]
    InvalidEtlName(String),
}

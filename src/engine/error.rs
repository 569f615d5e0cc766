use crate::model::BuildingId;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("building not configured: {0}")]
    UnknownBuilding(BuildingId),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
    #[error("internal error: {0}")]
    Internal(String),
}

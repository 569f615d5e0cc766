use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::engine::{Engine, EngineError};
use crate::model::{BuildingId, CustomerId};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Never says which part of the credentials was wrong.
    #[error("authentication failed")]
    Failed,
    #[error(transparent)]
    Store(#[from] EngineError),
}

/// Credential check run at the start of authenticated workflows.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(
        &self,
        customer: &CustomerId,
        secret: &str,
        building: &BuildingId,
    ) -> Result<(), AuthError>;
}

/// Hash a customer secret for storage.
pub fn hash_secret(secret: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(secret, cost)
}

/// Verifies against the bcrypt hashes registered in the engine.
pub struct StoreAuthenticator {
    engine: Arc<Engine>,
}

impl StoreAuthenticator {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Authenticator for StoreAuthenticator {
    async fn authenticate(
        &self,
        customer: &CustomerId,
        secret: &str,
        building: &BuildingId,
    ) -> Result<(), AuthError> {
        let hash = match self.engine.read(building).await {
            Ok(bs) => bs.customers.get(customer).map(|a| a.secret_hash.clone()),
            Err(EngineError::UnknownBuilding(_)) => None,
            Err(e) => return Err(e.into()),
        };
        let Some(hash) = hash else {
            debug!(%building, %customer, "no credentials on file");
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            return Err(AuthError::Failed);
        };

        let secret = secret.to_string();
        let verified = tokio::task::spawn_blocking(move || bcrypt::verify(secret, &hash)).await;
        match verified {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => {
                metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
                Err(AuthError::Failed)
            }
            Ok(Err(e)) => {
                // A malformed stored hash is treated like a mismatch.
                error!(%building, %customer, "stored secret hash unusable: {e}");
                metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
                Err(AuthError::Failed)
            }
            Err(e) => Err(AuthError::Store(EngineError::Internal(format!(
                "verification task failed: {e}"
            )))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hours::BusinessHours;
    use crate::model::{BuildingSettings, CustomerAccount};
    use crate::pattern::PatternRegistry;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotdesk_test_auth");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn engine_with_customer(name: &str) -> Arc<Engine> {
        let engine =
            Arc::new(Engine::new(test_wal_path(name), Arc::new(PatternRegistry::new())).unwrap());
        let building = BuildingId::from("3760");
        engine
            .configure_building(building.clone(), BuildingSettings::new(0, BusinessHours::default()))
            .await
            .unwrap();
        engine
            .register_customer(
                &building,
                CustomerAccount {
                    id: CustomerId::from("101"),
                    secret_hash: hash_secret("s3cret", 4).unwrap(),
                },
            )
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn accepts_matching_secret() {
        let auth = StoreAuthenticator::new(engine_with_customer("accept.wal").await);
        auth.authenticate(&CustomerId::from("101"), "s3cret", &BuildingId::from("3760"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn every_failure_looks_the_same() {
        let auth = StoreAuthenticator::new(engine_with_customer("reject.wal").await);
        let cases = [
            ("101", "wrong", "3760"),
            ("999", "s3cret", "3760"),
            ("101", "s3cret", "0000"),
        ];
        for (customer, secret, building) in cases {
            let err = auth
                .authenticate(&CustomerId::from(customer), secret, &BuildingId::from(building))
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::Failed));
            assert_eq!(err.to_string(), "authentication failed");
        }
    }
}

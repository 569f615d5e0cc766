use async_trait::async_trait;

use crate::engine::{Engine, EngineError};
use crate::model::{BuildingId, CustomerId, TaioId};

/// Category tag for first-choice changes.
pub const CATEGORY_FIRST_CHOICE: &str = "|1|";
/// Category tag for second-choice changes.
pub const CATEGORY_SECOND_CHOICE: &str = "|2|";

/// Append-only operational log of workflow mutations. Callers treat it as
/// best effort.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(
        &self,
        customer: &CustomerId,
        building: &BuildingId,
        note: String,
        category: &str,
    ) -> Result<TaioId, EngineError>;
}

#[async_trait]
impl AuditSink for Engine {
    async fn append(
        &self,
        customer: &CustomerId,
        building: &BuildingId,
        note: String,
        category: &str,
    ) -> Result<TaioId, EngineError> {
        let created = chrono::Local::now().naive_local();
        self.append_audit(building, customer, note, category, created)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hours::BusinessHours;
    use crate::model::BuildingSettings;
    use crate::pattern::PatternRegistry;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotdesk_test_audit");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn ids_are_max_plus_one_across_buildings_and_restarts() {
        let path = test_wal_path("ids.wal");
        let customer = CustomerId::from("101");
        let (a, b) = (BuildingId::from("A"), BuildingId::from("B"));
        {
            let engine = Engine::new(path.clone(), Arc::new(PatternRegistry::new())).unwrap();
            for building in [&a, &b] {
                engine
                    .configure_building(building.clone(), BuildingSettings::new(0, BusinessHours::default()))
                    .await
                    .unwrap();
            }
            let sink: &dyn AuditSink = &engine;
            assert_eq!(sink.append(&customer, &a, "one".into(), CATEGORY_FIRST_CHOICE).await.unwrap(), TaioId(1));
            assert_eq!(sink.append(&customer, &b, "two".into(), CATEGORY_SECOND_CHOICE).await.unwrap(), TaioId(2));
        }

        let engine = Engine::new(path, Arc::new(PatternRegistry::new())).unwrap();
        let id = AuditSink::append(&engine, &customer, &a, "three".into(), CATEGORY_FIRST_CHOICE)
            .await
            .unwrap();
        assert_eq!(id, TaioId(3));
        let bs = engine.read(&a).await.unwrap();
        let notes: Vec<_> = bs.audit.iter().map(|r| r.note.as_str()).collect();
        assert_eq!(notes, vec!["one", "three"]);
    }

    #[tokio::test]
    async fn unknown_building_is_an_error() {
        let engine = Engine::new(test_wal_path("unknown.wal"), Arc::new(PatternRegistry::new())).unwrap();
        let err = AuditSink::append(
            &engine,
            &CustomerId::from("101"),
            &BuildingId::from("nowhere"),
            "x".into(),
            CATEGORY_FIRST_CHOICE,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::UnknownBuilding(_)));
    }
}

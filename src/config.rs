//! Process configuration from `SLOTDESK_*` environment variables, and the
//! optional JSON seed file applied at startup.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use tracing::{info, warn};

use crate::auth::hash_secret;
use crate::engine::{Engine, EngineError, StartPolicy};
use crate::hours::BusinessHours;
use crate::model::*;

pub const WAL_FILE_NAME: &str = "slotdesk.wal";

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|s| s.trim().parse().ok())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub patterns: Option<PathBuf>,
    pub patterns_legacy: Option<PathBuf>,
    pub seed: Option<PathBuf>,
    pub start_policy: StartPolicy,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let path = |key: &str| get(key).filter(|s| !s.trim().is_empty()).map(PathBuf::from);

        let start_policy = match get("SLOTDESK_START_POLICY") {
            None => StartPolicy::default(),
            Some(raw) => StartPolicy::parse(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "unknown SLOTDESK_START_POLICY, using exact");
                StartPolicy::default()
            }),
        };

        Self {
            bind: get("SLOTDESK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&get, "SLOTDESK_PORT").unwrap_or(7433),
            data_dir: path("SLOTDESK_DATA_DIR").unwrap_or_else(|| PathBuf::from("./data")),
            max_connections: parsed(&get, "SLOTDESK_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parsed(&get, "SLOTDESK_COMPACT_THRESHOLD").unwrap_or(1000),
            metrics_port: parsed(&get, "SLOTDESK_METRICS_PORT"),
            patterns: path("SLOTDESK_PATTERNS"),
            patterns_legacy: path("SLOTDESK_PATTERNS_LEGACY"),
            seed: path("SLOTDESK_SEED"),
            start_policy,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }
}

// ── Seed file ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("seed file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("seed secret hashing: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("seed reservation for {customer}: bad instant {value:?}")]
    BadInstant { customer: String, value: String },
    #[error(transparent)]
    Store(#[from] EngineError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub buildings: Vec<SeedBuilding>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedBuilding {
    pub id: BuildingId,
    #[serde(default)]
    pub pattern_id: u32,
    #[serde(default)]
    pub minute_unit: Option<u32>,
    /// Dash-joined whole-slot ceilings, e.g. "3-3-2".
    #[serde(default)]
    pub slot_ceilings: String,
    #[serde(default)]
    pub hours: Option<BusinessHours>,
    #[serde(default)]
    pub staff: Vec<SeedStaff>,
    #[serde(default)]
    pub menus: Vec<SeedMenu>,
    #[serde(default)]
    pub customers: Vec<SeedCustomer>,
    #[serde(default)]
    pub reservations: Vec<SeedReservation>,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedStaff {
    pub id: u32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "one")]
    pub concurrency_ceiling: u32,
    #[serde(default)]
    pub walk_in_only: bool,
    #[serde(default)]
    pub void: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedMenu {
    pub id: u32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "one")]
    pub duration_units: u32,
    #[serde(default)]
    pub void: bool,
}

/// Plain secrets are hashed at load and never stored.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedCustomer {
    pub id: CustomerId,
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedReservation {
    pub customer: CustomerId,
    pub time_from: String,
    #[serde(default)]
    pub time_to: Option<String>,
    #[serde(default)]
    pub staff_id: Option<u32>,
    #[serde(default)]
    pub menu_id: Option<u32>,
    #[serde(default)]
    pub second_choice: Option<String>,
}

impl SeedBuilding {
    fn settings(&self) -> BuildingSettings {
        let mut settings =
            BuildingSettings::new(self.pattern_id, self.hours.clone().unwrap_or_default());
        settings.minute_unit = self.minute_unit;
        settings.slot_ceilings = BuildingSettings::parse_slot_ceilings(&self.slot_ceilings);
        settings
    }
}

impl SeedReservation {
    fn to_reservation(&self) -> Result<Reservation, SeedError> {
        let instant = |value: &str| {
            parse_instant(value).ok_or_else(|| SeedError::BadInstant {
                customer: self.customer.to_string(),
                value: value.to_string(),
            })
        };
        let mut r = Reservation::new(self.customer.clone(), instant(&self.time_from)?);
        r.time_to = self.time_to.as_deref().map(instant).transpose()?;
        r.staff_id = self.staff_id.map(StaffId);
        r.menu_id = self.menu_id.map(MenuId);
        r.second_choice = self.second_choice.clone();
        Ok(r)
    }
}

pub fn load_seed(path: &Path) -> Result<SeedFile, SeedError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Apply a seed to the engine. Buildings already present (for instance
/// restored from the WAL) are left untouched. Returns the number seeded.
pub async fn apply_seed(engine: &Engine, seed: &SeedFile, cost: u32) -> Result<usize, SeedError> {
    let mut seeded = 0;
    for building in &seed.buildings {
        if engine.is_configured(&building.id) {
            info!(building = %building.id, "already configured, seed skipped");
            continue;
        }
        engine
            .configure_building(building.id.clone(), building.settings())
            .await?;
        for s in &building.staff {
            let staff = Staff {
                id: StaffId(s.id),
                name: s.name.clone(),
                concurrency_ceiling: s.concurrency_ceiling,
                walk_in_only: s.walk_in_only,
                void: s.void,
            };
            engine.upsert_staff(&building.id, staff).await?;
        }
        for m in &building.menus {
            let menu = Menu {
                id: MenuId(m.id),
                name: m.name.clone(),
                duration_units: m.duration_units,
                void: m.void,
            };
            engine.upsert_menu(&building.id, menu).await?;
        }
        for c in &building.customers {
            let account = CustomerAccount {
                id: c.id.clone(),
                secret_hash: hash_secret(&c.secret, cost)?,
            };
            engine.register_customer(&building.id, account).await?;
        }
        for r in &building.reservations {
            engine
                .create_reservation(&building.id, r.to_reservation()?)
                .await?;
        }
        info!(
            building = %building.id,
            staff = building.staff.len(),
            reservations = building.reservations.len(),
            "building seeded"
        );
        seeded += 1;
    }
    Ok(seeded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PatternRegistry;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotdesk_test_config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config.addr(), "0.0.0.0:7433");
        assert_eq!(config.wal_path(), PathBuf::from("./data").join(WAL_FILE_NAME));
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.seed, None);
        assert_eq!(config.start_policy, StartPolicy::Exact);
    }

    #[test]
    fn overrides_and_bad_values() {
        let config = Config::from_lookup(lookup(&[
            ("SLOTDESK_BIND", "127.0.0.1"),
            ("SLOTDESK_PORT", "9000"),
            ("SLOTDESK_MAX_CONNECTIONS", "lots"),
            ("SLOTDESK_METRICS_PORT", "9100"),
            ("SLOTDESK_PATTERNS", "/etc/slotdesk/patterns.json"),
            ("SLOTDESK_PATTERNS_LEGACY", ""),
            ("SLOTDESK_START_POLICY", "Relocate"),
        ]));
        assert_eq!(config.addr(), "127.0.0.1:9000");
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.patterns, Some(PathBuf::from("/etc/slotdesk/patterns.json")));
        assert_eq!(config.patterns_legacy, None);
        assert_eq!(config.start_policy, StartPolicy::Relocate);

        let config = Config::from_lookup(lookup(&[("SLOTDESK_START_POLICY", "nearest")]));
        assert_eq!(config.start_policy, StartPolicy::Exact);
    }

    const SEED: &str = r#"{
        "buildings": [{
            "id": "3760",
            "pattern_id": 0,
            "slot_ceilings": "3-x",
            "staff": [{"id": 1, "concurrency_ceiling": 2}, {"id": 2, "walk_in_only": true}],
            "menus": [{"id": 5, "duration_units": 2}],
            "customers": [{"id": "101", "secret": "s3cret"}],
            "reservations": [
                {"customer": "101", "time_from": "2099-01-05 09:00", "staff_id": 1, "menu_id": 5}
            ]
        }]
    }"#;

    #[tokio::test]
    async fn seed_applies_once() {
        let path = test_wal_path("seed.wal");
        let seed: SeedFile = serde_json::from_str(SEED).unwrap();
        let building = BuildingId::from("3760");
        {
            let engine = Engine::new(path.clone(), Arc::new(PatternRegistry::new())).unwrap();
            assert_eq!(apply_seed(&engine, &seed, 4).await.unwrap(), 1);

            let bs = engine.read(&building).await.unwrap();
            assert_eq!(bs.settings.slot_ceilings, vec![Some(3), None]);
            assert_eq!(bs.settings.hours, BusinessHours::default());
            assert_eq!(bs.staff.len(), 2);
            assert!(bs.staff[&StaffId(2)].walk_in_only);
            assert_eq!(bs.staff[&StaffId(2)].concurrency_ceiling, 1);
            let account = &bs.customers[&CustomerId::from("101")];
            assert!(bcrypt::verify("s3cret", &account.secret_hash).unwrap());
            assert_eq!(bs.reservations[0].menu_id, Some(MenuId(5)));
        }

        // Restored from the WAL, so a second application is a no-op.
        let engine = Engine::new(path, Arc::new(PatternRegistry::new())).unwrap();
        assert_eq!(apply_seed(&engine, &seed, 4).await.unwrap(), 0);
        assert_eq!(engine.read(&building).await.unwrap().reservations.len(), 1);
    }

    #[tokio::test]
    async fn bad_seed_instant_is_reported() {
        let seed: SeedFile = serde_json::from_str(
            r#"{"buildings":[{"id":"1","reservations":[{"customer":"101","time_from":"tomorrow"}]}]}"#,
        )
        .unwrap();
        let engine =
            Engine::new(test_wal_path("bad_seed.wal"), Arc::new(PatternRegistry::new())).unwrap();
        let err = apply_seed(&engine, &seed, 4).await.unwrap_err();
        assert!(matches!(err, SeedError::BadInstant { .. }));
    }
}

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::calendar::WorkingCalendar;
use crate::engine::Engine;
use crate::limits::*;
use crate::maintenance;
use crate::notify::NotifyHub;

/// Lazily created per-tenant engines. Tenant = database name from the
/// wire-protocol startup message; each tenant gets its own engine, WAL
/// file, and compactor task, all sharing one working calendar.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    calendar: WorkingCalendar,
}

fn bad_tenant(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, msg.to_string())
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, calendar: WorkingCalendar) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            calendar,
        }
    }

    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(bad_tenant("tenant name too long"));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // The tenant name becomes a filename; strip anything unsafe.
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-'))
            .collect();
        if safe_name.is_empty() {
            return Err(bad_tenant("empty tenant name"));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, self.calendar.clone(), notify)?);

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            maintenance::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(tenant.to_string(), engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

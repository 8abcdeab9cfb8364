//! Reconfiguration port.
//!
//! Holds the single active [`StatusConfigurationTable`] behind a
//! read-mostly lock. Readers clone the `Arc` and work on that snapshot; a
//! reconfiguration parses the new document first and only then replaces the
//! pointer, so a rejected document leaves the active table untouched.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{error, info};

use crate::dispatch::parser;
use crate::dispatch::table::StatusConfigurationTable;
use crate::utils::error::RuleError;

/// Topic prefix for administrative rule updates.
pub const ADMIN_TOPIC_PREFIX: &str = "admin-config/";

pub fn admin_topic(config_key: &str) -> String {
    format!("{ADMIN_TOPIC_PREFIX}{config_key}")
}

#[derive(Debug, Default)]
pub struct ActiveTable {
    current: RwLock<Arc<StatusConfigurationTable>>,
}

impl ActiveTable {
    pub fn new(table: StatusConfigurationTable) -> Self {
        Self {
            current: RwLock::new(Arc::new(table)),
        }
    }

    /// Snapshot of the active table.
    pub fn load(&self) -> Arc<StatusConfigurationTable> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn swap(&self, table: StatusConfigurationTable) -> Arc<StatusConfigurationTable> {
        let table = Arc::new(table);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, table)
    }

    /// Parses `document` and installs it. On error the active table stays.
    pub fn reconfigure(&self, document: &str) -> Result<Arc<StatusConfigurationTable>, RuleError> {
        let table = match parser::parse(document) {
            Ok(table) => table,
            Err(e) => {
                error!("The new dispatch configuration is ignored: {e}");
                return Err(e);
            }
        };
        self.swap(table);
        let active = self.load();
        info!(
            "Reconfigured dispatch rules: {} status blocks, default action {}",
            active.blocks().count(),
            active.default_action()
        );
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::action::ActionSet;

    #[test]
    fn test_rejected_document_keeps_active_table() {
        let active = ActiveTable::default();
        active
            .reconfigure("<msgDispatch defaultAction='queue'/>")
            .unwrap();
        let before = active.load();

        for bad in [
            "<msgDispatch defaultAction='send|queue'/>",
            "<msgDispatch><onStatus oid='s' content='X'><action do='queue' ifPriority='7-99'/></onStatus></msgDispatch>",
            "<msgDispatch><onStatus oid='s' content='X'><action do='bounce' ifPriority='1'/></onStatus></msgDispatch>",
        ] {
            assert!(active.reconfigure(bad).is_err());
            assert!(Arc::ptr_eq(&before, &active.load()));
        }
        assert_eq!(active.load().default_action(), ActionSet::QUEUE);
    }

    #[test]
    fn test_readers_keep_their_snapshot_across_swap() {
        let active = ActiveTable::default();
        let old = active.load();
        active.reconfigure("<msgDispatch defaultAction='destroy'/>").unwrap();
        assert_eq!(old.default_action(), ActionSet::SEND);
        assert_eq!(active.load().default_action(), ActionSet::DESTROY);
    }

    #[test]
    fn test_admin_topic_uses_prefix() {
        assert_eq!(admin_topic("dispatch"), "admin-config/dispatch");
    }
}

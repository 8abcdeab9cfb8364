//! Per-target link state.
//!
//! A `LinkState` records what the engine knows about the link to one
//! delivery target: the last status-topic value and the transport
//! connection state. Both are written only through the `apply_*` methods,
//! which also report whether the backlog deserves another look.

use std::sync::Arc;

use serde::Serialize;

use crate::dispatch::table::{ConnectionState, RuleBlock, StatusConfigurationTable};

/// A status value together with the topic it was observed on. The oid is
/// absent for the configured `defaultStatus`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusValue {
    pub oid: Option<String>,
    pub value: String,
}

impl StatusValue {
    pub fn observed(oid: &str, value: &str) -> Self {
        Self {
            oid: Some(oid.to_string()),
            value: value.to_string(),
        }
    }

    pub fn initial(value: &str) -> Self {
        Self {
            oid: None,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinkState {
    status: Option<StatusValue>,
    connection: ConnectionState,
    last_block: Option<Arc<RuleBlock>>,
}

/// Read-only view of a target's link, for operators and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkSnapshot {
    pub status: Option<String>,
    pub connection: ConnectionState,
    pub block: Option<String>,
}

impl LinkState {
    pub fn new(status: Option<StatusValue>, connection: ConnectionState) -> Self {
        Self {
            status,
            connection,
            last_block: None,
        }
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn status_value(&self) -> Option<&str> {
        self.status.as_ref().map(|s| s.value.as_str())
    }

    /// Block that governs dispatch for this link under `table`.
    pub fn effective_block<'t>(&self, table: &'t StatusConfigurationTable) -> &'t Arc<RuleBlock> {
        let (oid, value) = match &self.status {
            Some(s) => (s.oid.as_deref(), Some(s.value.as_str())),
            None => (None, None),
        };
        table.resolve(oid, value, self.connection)
    }

    /// Stores a new status value. Returns true when the effective block
    /// changed and releases at least one of the priorities in `queued`.
    pub fn apply_status(
        &mut self,
        table: &StatusConfigurationTable,
        status: StatusValue,
        queued: u16,
    ) -> bool {
        self.status = Some(status);
        let block = self.effective_block(table).clone();
        let changed = self
            .last_block
            .as_ref()
            .is_none_or(|old| !Arc::ptr_eq(old, &block));
        self.last_block = Some(block.clone());
        changed && block.releases_any(queued)
    }

    /// Stores a new connection state. Returns true when the link came back
    /// to `Connected`.
    pub fn apply_connection(
        &mut self,
        table: &StatusConfigurationTable,
        state: ConnectionState,
    ) -> bool {
        let old = std::mem::replace(&mut self.connection, state);
        self.last_block = Some(self.effective_block(table).clone());
        old != ConnectionState::Connected && state == ConnectionState::Connected
    }

    pub fn snapshot(&self, table: &StatusConfigurationTable) -> LinkSnapshot {
        LinkSnapshot {
            status: self.status_value().map(str::to_string),
            connection: self.connection,
            block: self.effective_block(table).content().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::parser::parse;
    use crate::dispatch::priority::Priority;

    const RULES: &str = "<msgDispatch defaultStatus='UP' defaultAction='send'>\
        <onStatus oid='link' content='UP' defaultAction='send'/>\
        <onStatus oid='link' content='DOWN' defaultAction='queue'/>\
        <onStatus oid='link' content='LOST' defaultAction='queue' connectionState='polling'/>\
      </msgDispatch>";

    fn queued(p: u8) -> u16 {
        Priority::new(p).unwrap().bit()
    }

    #[test]
    fn test_status_change_signals_when_queued_priority_released() {
        let table = parse(RULES).unwrap();
        let mut link = LinkState::new(Some(StatusValue::initial("DOWN")), ConnectionState::Connected);

        assert!(!link.apply_status(&table, StatusValue::observed("link", "DOWN"), queued(4)));
        assert!(link.apply_status(&table, StatusValue::observed("link", "UP"), queued(4)));
        // same block again
        assert!(!link.apply_status(&table, StatusValue::observed("link", "UP"), queued(4)));
        // nothing queued, nothing to release
        assert!(!link.apply_status(&table, StatusValue::observed("link", "DOWN"), 0));
    }

    #[test]
    fn test_polling_overrides_status_block() {
        let table = parse(RULES).unwrap();
        let mut link = LinkState::new(Some(StatusValue::observed("link", "UP")), ConnectionState::Connected);
        assert_eq!(link.effective_block(&table).content(), Some("UP"));

        assert!(!link.apply_connection(&table, ConnectionState::Polling));
        assert_eq!(link.effective_block(&table).content(), Some("LOST"));

        // status changes while polling do not change the governing block
        assert!(!link.apply_status(&table, StatusValue::observed("link", "DOWN"), queued(1)));

        assert!(link.apply_connection(&table, ConnectionState::Connected));
        let snap = link.snapshot(&table);
        assert_eq!(snap.status.as_deref(), Some("DOWN"));
        assert_eq!(snap.block.as_deref(), Some("DOWN"));
    }

    #[test]
    fn test_unknown_status_uses_table_default() {
        let table = parse(RULES).unwrap();
        let link = LinkState::new(Some(StatusValue::observed("link", "??YYXX")), ConnectionState::Connected);
        assert!(Arc::ptr_eq(link.effective_block(&table), table.default_block()));
    }
}

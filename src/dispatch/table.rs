//! Status configuration table.
//!
//! The validated, fully resolved rule set. Each `RuleBlock` maps all ten
//! priorities to a concrete `ActionSet`, so lookups never fall back at
//! dispatch time. A table is immutable; reconfiguration replaces it as a
//! whole.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dispatch::action::{ActionSet, PrimaryAction};
use crate::dispatch::priority::Priority;
use crate::utils::error::RuleError;

/// Transport-level state of the link to a delivery target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Connected,
    Polling,
    Dead,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Polling => "polling",
            ConnectionState::Dead => "dead",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionState {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "connected" | "alive" => Ok(ConnectionState::Connected),
            "polling" => Ok(ConnectionState::Polling),
            "dead" => Ok(ConnectionState::Dead),
            _ => Err(RuleError::UnknownConnectionState(s.to_string())),
        }
    }
}

/// One `onStatus` entry with every priority resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleBlock {
    oid: Option<String>,
    content: Option<String>,
    connection_state: Option<ConnectionState>,
    default_action: ActionSet,
    actions: [ActionSet; Priority::COUNT],
}

impl RuleBlock {
    /// Builds a block, filling unlisted priorities with `default_action`.
    pub fn new(
        oid: Option<String>,
        content: Option<String>,
        connection_state: Option<ConnectionState>,
        default_action: ActionSet,
        overrides: [Option<ActionSet>; Priority::COUNT],
    ) -> Self {
        let actions = overrides.map(|o| o.unwrap_or(default_action));
        Self {
            oid,
            content,
            connection_state,
            default_action,
            actions,
        }
    }

    /// The block applied when nothing more specific matches.
    pub fn fallback(default_action: ActionSet) -> Self {
        Self::new(None, None, None, default_action, [None; Priority::COUNT])
    }

    pub fn action(&self, priority: Priority) -> ActionSet {
        self.actions[priority.index()]
    }

    pub fn oid(&self) -> Option<&str> {
        self.oid.as_deref()
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.connection_state
    }

    pub fn default_action(&self) -> ActionSet {
        self.default_action
    }

    /// True when every priority is plainly sent.
    pub fn sends_everything(&self) -> bool {
        self.actions.iter().all(|a| *a == ActionSet::SEND)
    }

    /// True when at least one priority in `mask` resolves to something other
    /// than holding the message back.
    pub fn releases_any(&self, mask: u16) -> bool {
        Priority::all()
            .filter(|p| mask & p.bit() != 0)
            .any(|p| self.action(p).primary() != PrimaryAction::Queue)
    }
}

#[derive(Debug, Clone)]
pub struct StatusConfigurationTable {
    default_status: Option<String>,
    default_action: ActionSet,
    default_block: Arc<RuleBlock>,
    by_content: HashMap<String, Arc<RuleBlock>>,
    by_connection: HashMap<ConnectionState, Arc<RuleBlock>>,
}

impl Default for StatusConfigurationTable {
    /// Sends everything, no status blocks.
    fn default() -> Self {
        Self {
            default_status: None,
            default_action: ActionSet::SEND,
            default_block: Arc::new(RuleBlock::fallback(ActionSet::SEND)),
            by_content: HashMap::new(),
            by_connection: HashMap::new(),
        }
    }
}

impl StatusConfigurationTable {
    pub fn new(
        default_status: Option<String>,
        default_action: ActionSet,
        blocks: Vec<RuleBlock>,
    ) -> Result<Self, RuleError> {
        let mut by_content = HashMap::with_capacity(blocks.len());
        let mut by_connection = HashMap::new();

        for block in blocks {
            let block = Arc::new(block);
            if let Some(state) = block.connection_state {
                if by_connection.insert(state, block.clone()).is_some() {
                    return Err(RuleError::DuplicateConnectionState(state.to_string()));
                }
            }
            if let Some(content) = block.content.clone() {
                if by_content.insert(content.clone(), block).is_some() {
                    return Err(RuleError::DuplicateStatus(content));
                }
            }
        }

        Ok(Self {
            default_status,
            default_action,
            default_block: Arc::new(RuleBlock::fallback(default_action)),
            by_content,
            by_connection,
        })
    }

    pub fn default_status(&self) -> Option<&str> {
        self.default_status.as_deref()
    }

    pub fn default_action(&self) -> ActionSet {
        self.default_action
    }

    pub fn default_block(&self) -> &Arc<RuleBlock> {
        &self.default_block
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Arc<RuleBlock>> {
        self.by_content.values()
    }

    /// Block for a status value observed on `oid`. Unknown values and values
    /// arriving on an oid that no block listens to resolve to the default
    /// block. An absent `oid` matches by content alone.
    pub fn lookup(&self, oid: Option<&str>, value: Option<&str>) -> &Arc<RuleBlock> {
        let Some(value) = value else {
            return &self.default_block;
        };
        match self.by_content.get(value) {
            Some(block) if oid.is_none() || block.oid() == oid => block,
            _ => &self.default_block,
        }
    }

    /// Block overriding the status lookup while the link is not connected.
    pub fn lookup_connection(&self, state: ConnectionState) -> Option<&Arc<RuleBlock>> {
        if state == ConnectionState::Connected {
            return None;
        }
        self.by_connection.get(&state)
    }

    /// Effective block: connection-state override first, then status value.
    pub fn resolve(
        &self,
        oid: Option<&str>,
        value: Option<&str>,
        state: ConnectionState,
    ) -> &Arc<RuleBlock> {
        self.lookup_connection(state)
            .unwrap_or_else(|| self.lookup(oid, value))
    }

    pub fn is_status_oid(&self, topic: &str) -> bool {
        self.by_content.values().any(|b| b.oid() == Some(topic))
    }

    /// Distinct status topics the table listens to.
    pub fn status_oids(&self) -> Vec<&str> {
        let mut oids: Vec<&str> = self.by_content.values().filter_map(|b| b.oid()).collect();
        oids.sort_unstable();
        oids.dedup();
        oids
    }
}

/// Resolves the action for `priority` under `block`.
pub fn lookup_action(block: &RuleBlock, priority: Priority) -> ActionSet {
    block.action(priority)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(content: &str, state: Option<ConnectionState>, default: ActionSet) -> RuleBlock {
        RuleBlock::new(
            Some("status".into()),
            Some(content.into()),
            state,
            default,
            [None; Priority::COUNT],
        )
    }

    #[test]
    fn test_default_table_sends_everything() {
        let table = StatusConfigurationTable::default();
        let block = table.lookup(Some("status"), Some("anything"));
        assert!(block.sends_everything());
        for p in Priority::all() {
            assert_eq!(lookup_action(block, p), ActionSet::SEND);
        }
    }

    #[test]
    fn test_unknown_value_and_oid_fall_back() {
        let table = StatusConfigurationTable::new(
            Some("DOWN".into()),
            ActionSet::DESTROY,
            vec![block("DOWN", None, ActionSet::QUEUE)],
        )
        .unwrap();

        assert_eq!(table.lookup(Some("status"), Some("DOWN")).content(), Some("DOWN"));
        assert!(Arc::ptr_eq(table.lookup(Some("status"), Some("UP")), table.default_block()));
        assert!(Arc::ptr_eq(table.lookup(Some("other"), Some("DOWN")), table.default_block()));
        assert!(Arc::ptr_eq(table.lookup(Some("status"), None), table.default_block()));
        assert_eq!(table.lookup(None, Some("DOWN")).content(), Some("DOWN"));
        assert_eq!(table.default_block().action(Priority::MAX), ActionSet::DESTROY);
    }

    #[test]
    fn test_duplicate_content_is_rejected() {
        let err = StatusConfigurationTable::new(
            None,
            ActionSet::SEND,
            vec![block("X", None, ActionSet::SEND), block("X", None, ActionSet::QUEUE)],
        )
        .unwrap_err();
        assert_eq!(err, RuleError::DuplicateStatus("X".into()));
    }

    #[test]
    fn test_connection_block_overrides_only_when_not_connected() {
        let table = StatusConfigurationTable::new(
            None,
            ActionSet::SEND,
            vec![
                block("UP", None, ActionSet::SEND),
                block("LOST", Some(ConnectionState::Polling), ActionSet::QUEUE),
            ],
        )
        .unwrap();

        let connected = table.resolve(Some("status"), Some("UP"), ConnectionState::Connected);
        assert_eq!(connected.content(), Some("UP"));
        let polling = table.resolve(Some("status"), Some("UP"), ConnectionState::Polling);
        assert_eq!(polling.content(), Some("LOST"));
        let dead = table.resolve(Some("status"), Some("UP"), ConnectionState::Dead);
        assert_eq!(dead.content(), Some("UP"));
    }

    #[test]
    fn test_releases_any_checks_masked_priorities() {
        let mut overrides = [None; Priority::COUNT];
        overrides[9] = Some(ActionSet::SEND);
        let b = RuleBlock::new(None, None, None, ActionSet::QUEUE, overrides);
        let p2 = Priority::new(2).unwrap().bit();
        assert!(!b.releases_any(p2));
        assert!(b.releases_any(p2 | Priority::MAX.bit()));
        assert!(!b.releases_any(0));
    }

    #[test]
    fn test_connection_state_aliases() {
        assert_eq!("Polling".parse::<ConnectionState>().unwrap(), ConnectionState::Polling);
        assert_eq!("ALIVE".parse::<ConnectionState>().unwrap(), ConnectionState::Connected);
        assert!("flaky".parse::<ConnectionState>().is_err());
    }
}

//! Dispatch engine
//!
//! Decides for every outgoing message whether it is delivered now, held in
//! the target's backlog, destroyed, and whether its sender is told about it.
//!
//! Concurrency and usage notes:
//! - Every target has its own pipeline. The backlog sits behind an async
//!   mutex that is held across transport sends, which serializes sends,
//!   enqueues and flushes for one target while other targets proceed in
//!   parallel.
//! - Link state sits behind a short-lived sync mutex of its own so status
//!   and connection updates never wait for an in-flight flush.
//! - The queued-priority mask is published under the link lock, and status
//!   updates read it under the same lock. A dispatch that queued under a
//!   block the link has since left flushes on its own.
//! - A flush request bumps the target's flush generation before it waits
//!   for the backlog. A running flush that sees a newer generation stops at
//!   the next entry and leaves the rest to the newer request.
//! - The rule table is read as an `Arc` snapshot once per dispatch/flush, so
//!   a concurrent reconfiguration never mixes two rule sets for one message.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::message::Message;
use crate::dispatch::action::{ActionSet, PrimaryAction};
use crate::dispatch::backlog::Backlog;
use crate::dispatch::link::{LinkSnapshot, LinkState, StatusValue};
use crate::dispatch::notify::notification_for;
use crate::dispatch::reconfig::ActiveTable;
use crate::dispatch::table::{ConnectionState, RuleBlock, StatusConfigurationTable};
use crate::persistence::{BacklogStorage, MemoryBacklogStore};
use crate::utils::error::{DeliveryError, DispatchError, RuleError, StoreError};

/// Delivery primitive the engine hands messages to.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver_now(&self, target: &str, message: &Message) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    Queued,
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub outcome: DispatchOutcome,
    pub action: ActionSet,
    pub notified: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub dropped: usize,
    pub kept: usize,
    pub notified: usize,
    /// A newer flush request took over before this one finished.
    pub superseded: bool,
    /// The transport failed; the failing entry and the rest stay queued.
    pub halted: bool,
}

impl FlushReport {
    pub fn is_noop(&self) -> bool {
        *self == FlushReport::default()
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub config_key: String,
    pub admin_identity: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            config_key: "dispatch".to_string(),
            admin_identity: "__dispatch".to_string(),
        }
    }
}

#[derive(Debug)]
struct TargetPipeline {
    name: String,
    link: Mutex<LinkState>,
    backlog: tokio::sync::Mutex<Backlog>,
    flush_generation: AtomicU64,
    queued_mask: AtomicU16,
    /// Set under the backlog lock once the target is removed.
    closed: AtomicBool,
}

impl TargetPipeline {
    fn link(&self) -> MutexGuard<'_, LinkState> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Effective block, connection state and status value, read together.
    fn snapshot(&self, table: &StatusConfigurationTable) -> (Arc<RuleBlock>, ConnectionState, Option<String>) {
        let link = self.link();
        (
            link.effective_block(table).clone(),
            link.connection(),
            link.status_value().map(str::to_string),
        )
    }

    fn superseded(&self, generation: u64) -> bool {
        self.flush_generation.load(Ordering::SeqCst) != generation
    }

    fn store_mask(&self, mask: u16) {
        let _link = self.link();
        self.queued_mask.store(mask, Ordering::SeqCst);
    }

    /// Publishes `mask` after an enqueue decided under `seen`. Returns true
    /// when the link has moved to a block that releases a queued priority,
    /// since the status update that moved it may have read the old mask.
    fn store_mask_after_queue(&self, mask: u16, table: &StatusConfigurationTable, seen: &Arc<RuleBlock>) -> bool {
        let link = self.link();
        self.queued_mask.store(mask, Ordering::SeqCst);
        let block = link.effective_block(table);
        !Arc::ptr_eq(block, seen) && block.releases_any(mask)
    }

    /// Applies a status value, reading the mask under the link lock.
    fn apply_status(&self, table: &StatusConfigurationTable, status: StatusValue) -> bool {
        let mut link = self.link();
        let queued = self.queued_mask.load(Ordering::SeqCst);
        link.apply_status(table, status, queued)
    }
}

pub struct DispatchEngine {
    table: ActiveTable,
    targets: RwLock<HashMap<String, Arc<TargetPipeline>>>,
    last_status: Mutex<Option<StatusValue>>,
    transport: Arc<dyn Transport>,
    storage: BacklogStorage,
    settings: EngineSettings,
}

impl DispatchEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        table: StatusConfigurationTable,
        storage: BacklogStorage,
        settings: EngineSettings,
    ) -> Self {
        Self {
            table: ActiveTable::new(table),
            targets: RwLock::new(HashMap::new()),
            last_status: Mutex::new(None),
            transport,
            storage,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn table(&self) -> Arc<StatusConfigurationTable> {
        self.table.load()
    }

    /// Installs a new rule document. A rejected document leaves the active
    /// rules in place. Backlogs are not flushed by a swap.
    pub fn reconfigure(&self, document: &str) -> Result<(), RuleError> {
        self.table.reconfigure(document).map(|_| ())
    }

    fn existing(&self, target: &str) -> Option<Arc<TargetPipeline>> {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
            .cloned()
    }

    fn all_pipelines(&self) -> Vec<Arc<TargetPipeline>> {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn pipeline(&self, target: &str) -> Result<Arc<TargetPipeline>, StoreError> {
        if let Some(p) = self.existing(target) {
            return Ok(p);
        }
        let mut targets = self.targets.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(p) = targets.get(target) {
            return Ok(p.clone());
        }

        let backlog = Backlog::open(self.storage.open(target)?)?;
        let status = self
            .last_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .or_else(|| self.table().default_status().map(StatusValue::initial));
        let pipeline = Arc::new(TargetPipeline {
            name: target.to_string(),
            link: Mutex::new(LinkState::new(status, ConnectionState::Connected)),
            queued_mask: AtomicU16::new(backlog.priority_mask()),
            backlog: tokio::sync::Mutex::new(backlog),
            flush_generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        debug!("Created dispatch pipeline for {target}");
        targets.insert(target.to_string(), pipeline.clone());
        Ok(pipeline)
    }

    /// Makes sure a pipeline exists for `target` in the given state, e.g.
    /// when a session (re)connects. A connected target with a backlog, such
    /// as one reopened from sled after a restart, is flushed right away.
    pub async fn register_target(
        &self,
        target: &str,
        state: ConnectionState,
    ) -> Result<FlushReport, DispatchError> {
        let pipeline = self.pipeline(target)?;
        let recovered = self.apply_connection(&pipeline, state);
        let held = pipeline.queued_mask.load(Ordering::SeqCst) != 0;
        if recovered || (state == ConnectionState::Connected && held) {
            self.flush_pipeline(&pipeline).await
        } else {
            Ok(FlushReport::default())
        }
    }

    /// Dispatches one message to `target` under the current rules.
    pub async fn dispatch(&self, target: &str, message: Message) -> Result<DispatchReport, DispatchError> {
        let pipeline = self.pipeline(target)?;
        self.dispatch_to(&pipeline, message).await
    }

    async fn dispatch_to(&self, pipeline: &TargetPipeline, message: Message) -> Result<DispatchReport, DispatchError> {
        let target = pipeline.name.as_str();
        let mut backlog = pipeline.backlog.lock().await;
        if pipeline.closed.load(Ordering::SeqCst) {
            debug!("Target {target} was removed, dropping '{}'", message.message_id);
            return Ok(DispatchReport {
                outcome: DispatchOutcome::Dropped,
                action: ActionSet::DESTROY,
                notified: false,
            });
        }

        let table = self.table();
        let (block, state, status) = pipeline.snapshot(&table);

        if state == ConnectionState::Connected
            && (message.internal || message.sender == self.settings.admin_identity)
        {
            debug!("Sending out of band message '{}' to {target}", message.message_id);
            self.transport.deliver_now(target, &message).await?;
            return Ok(DispatchReport {
                outcome: DispatchOutcome::Delivered,
                action: ActionSet::SEND,
                notified: false,
            });
        }

        let mut action = block.action(message.priority);
        if state != ConnectionState::Connected && action.do_send() {
            error!(
                "We are in state {state} and the configuration tells us to send nevertheless, we queue instead: '{}'",
                message.message_id
            );
            action = downgrade(action);
        }
        debug!(
            "Dispatching '{}' prio={} to {target}: {action}",
            message.message_id, message.priority
        );

        let mut overtaken = false;
        let outcome = match action.primary() {
            PrimaryAction::Send => {
                self.transport.deliver_now(target, &message).await?;
                DispatchOutcome::Delivered
            }
            PrimaryAction::Queue => {
                backlog.push(message.clone())?;
                overtaken = pipeline.store_mask_after_queue(backlog.priority_mask(), &table, &block);
                DispatchOutcome::Queued
            }
            PrimaryAction::Destroy => DispatchOutcome::Dropped,
        };
        drop(backlog);

        let notified = action.notify_sender()
            && self.notify_sender(&message, action, status.as_deref()).await;

        if overtaken {
            debug!("Link of {target} changed while '{}' was queued, flushing", message.message_id);
            if let Err(e) = self.flush_pipeline(pipeline).await {
                warn!("Flushing backlog of {target} failed: {e}");
            }
        }

        Ok(DispatchReport {
            outcome,
            action,
            notified,
        })
    }

    /// Best effort; a failed notification never undoes the primary action.
    async fn notify_sender(&self, message: &Message, action: ActionSet, status: Option<&str>) -> bool {
        if message.sender.is_empty() {
            debug!("No sender to notify about '{}'", message.message_id);
            return false;
        }
        let notification = notification_for(
            message,
            action,
            &self.settings.admin_identity,
            &self.settings.config_key,
            status,
        );
        match self.transport.deliver_now(&message.sender, &notification).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Notification to {} about '{}' failed: {e}", message.sender, message.message_id);
                false
            }
        }
    }

    /// Re-examines the backlog of `target` under the current rules.
    pub async fn flush(&self, target: &str) -> Result<FlushReport, DispatchError> {
        match self.existing(target) {
            Some(pipeline) => self.flush_pipeline(&pipeline).await,
            None => Ok(FlushReport::default()),
        }
    }

    async fn flush_pipeline(&self, pipeline: &TargetPipeline) -> Result<FlushReport, DispatchError> {
        let generation = pipeline.flush_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut backlog = pipeline.backlog.lock().await;
        let mut report = FlushReport::default();

        if pipeline.superseded(generation) {
            report.superseded = true;
            return Ok(report);
        }
        if backlog.is_empty() || pipeline.closed.load(Ordering::SeqCst) {
            return Ok(report);
        }

        let target = pipeline.name.as_str();
        let table = self.table();
        let (block, state, status) = pipeline.snapshot(&table);
        let entries = backlog.entries()?;
        info!(
            "Flushing {} entries from backlog of {target}, status={}, connection={state}",
            entries.len(),
            status.as_deref().unwrap_or("none")
        );

        let total = entries.len();
        for (done, entry) in entries.into_iter().enumerate() {
            if pipeline.superseded(generation) {
                report.superseded = true;
                report.kept += total - done;
                break;
            }

            let mut action = block.action(entry.priority);
            if state != ConnectionState::Connected && action.do_send() {
                action = downgrade(action);
            }

            match action.primary() {
                PrimaryAction::Send => match self.transport.deliver_now(target, &entry.message).await {
                    Ok(()) => {
                        backlog.remove(entry.key())?;
                        report.delivered += 1;
                    }
                    Err(e) => {
                        warn!(
                            "Flushing '{}' to {target} failed, keeping {} entries: {e}",
                            entry.message.message_id,
                            total - done
                        );
                        report.halted = true;
                        report.kept += total - done;
                        break;
                    }
                },
                PrimaryAction::Destroy => {
                    backlog.remove(entry.key())?;
                    report.dropped += 1;
                }
                PrimaryAction::Queue => report.kept += 1,
            }

            if action.notify_sender() && self.notify_sender(&entry.message, action, status.as_deref()).await {
                report.notified += 1;
            }
        }

        pipeline.store_mask(backlog.priority_mask());
        info!(
            "Flushed backlog of {target}: delivered={} dropped={} kept={}",
            report.delivered, report.dropped, report.kept
        );
        Ok(report)
    }

    /// A status message arrived on `oid`; every known target's link is
    /// updated and targets whose backlog may move are flushed.
    pub async fn on_status_update(&self, oid: &str, value: &str) -> Vec<(String, FlushReport)> {
        let status = StatusValue::observed(oid, value);
        {
            let mut last = self.last_status.lock().unwrap_or_else(PoisonError::into_inner);
            info!(
                "Changed dispatch status from {} to {value} (oid={oid})",
                last.as_ref().map_or("none", |s| s.value.as_str())
            );
            *last = Some(status.clone());
        }

        let table = self.table();
        let due: Vec<Arc<TargetPipeline>> = self
            .all_pipelines()
            .into_iter()
            .filter(|p| p.apply_status(&table, status.clone()))
            .collect();

        let reports = join_all(due.iter().map(|p| self.flush_pipeline(p))).await;
        due.iter()
            .zip(reports)
            .filter_map(|(p, r)| match r {
                Ok(report) => Some((p.name.clone(), report)),
                Err(e) => {
                    error!("Flushing backlog of {} failed: {e}", p.name);
                    None
                }
            })
            .collect()
    }

    /// Status update for one target only.
    pub async fn on_status_update_for(
        &self,
        target: &str,
        oid: &str,
        value: &str,
    ) -> Result<FlushReport, DispatchError> {
        let pipeline = self.pipeline(target)?;
        let due = pipeline.apply_status(&self.table(), StatusValue::observed(oid, value));
        if due {
            self.flush_pipeline(&pipeline).await
        } else {
            Ok(FlushReport::default())
        }
    }

    pub async fn on_connection_state_change(
        &self,
        target: &str,
        state: ConnectionState,
    ) -> Result<FlushReport, DispatchError> {
        let pipeline = self.pipeline(target)?;
        if self.apply_connection(&pipeline, state) {
            self.flush_pipeline(&pipeline).await
        } else {
            Ok(FlushReport::default())
        }
    }

    fn apply_connection(&self, pipeline: &TargetPipeline, state: ConnectionState) -> bool {
        let recovered = pipeline.link().apply_connection(&self.table(), state);
        info!("Connection state of {} is now {state}", pipeline.name);
        recovered
    }

    /// Feeds a stream of connection events for `target` into the engine.
    pub fn attach_connection_events(
        self: &Arc<Self>,
        target: String,
        mut events: UnboundedReceiver<ConnectionState>,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(state) = events.recv().await {
                if let Err(e) = engine.on_connection_state_change(&target, state).await {
                    error!("Connection event {state} for {target} failed: {e}");
                }
            }
            debug!("Connection event stream for {target} closed");
        })
    }

    /// Discards the whole backlog of `target`.
    pub async fn purge(&self, target: &str) -> Result<usize, DispatchError> {
        let Some(pipeline) = self.existing(target) else {
            return Ok(0);
        };
        pipeline.flush_generation.fetch_add(1, Ordering::SeqCst);
        let mut backlog = pipeline.backlog.lock().await;
        let dropped = backlog.clear()?;
        pipeline.store_mask(0);
        info!("Purged {dropped} entries from backlog of {target}");
        Ok(dropped)
    }

    /// Session teardown: forgets link state and backlog of `target`.
    pub async fn remove_target(&self, target: &str) -> Result<usize, DispatchError> {
        let removed = self
            .targets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(target);
        let Some(pipeline) = removed else {
            return Ok(0);
        };
        pipeline.flush_generation.fetch_add(1, Ordering::SeqCst);
        let mut backlog = pipeline.backlog.lock().await;
        pipeline.closed.store(true, Ordering::SeqCst);
        let dropped = backlog.clear()?;
        pipeline.store_mask(0);
        let detached = Backlog::open(Box::new(MemoryBacklogStore::default()))?;
        std::mem::replace(&mut *backlog, detached).destroy()?;
        info!("Removed dispatch target {target}, {dropped} backlog entries discarded");
        Ok(dropped)
    }

    pub async fn backlog_len(&self, target: &str) -> usize {
        match self.existing(target) {
            Some(pipeline) => pipeline.backlog.lock().await.len(),
            None => 0,
        }
    }

    pub fn link_snapshot(&self, target: &str) -> Option<LinkSnapshot> {
        let pipeline = self.existing(target)?;
        let table = self.table();
        let snapshot = pipeline.link().snapshot(&table);
        Some(snapshot)
    }

    pub fn targets(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// `send` is turned into `queue` while the link is down; the notification
/// modifier survives.
fn downgrade(action: ActionSet) -> ActionSet {
    if action.notify_sender() {
        ActionSet::QUEUE.with_notify()
    } else {
        ActionSet::QUEUE
    }
}

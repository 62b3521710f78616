//! PrinterRegistry - Single source of truth for printer state
//!
//! - Holds the static configuration of every printer, in gateway order
//! - Replaces (never merges) a printer's status when a poll reports it
//! - Leaves printers absent from a poll untouched
//! - Remembers the last printed file per printer for the reprint action

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::model::{PrinterConfig, PrinterState, PrinterStatus, StatusSnapshot};

/// One printer as known to the dashboard
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    pub config: Arc<PrinterConfig>,
    pub status: Option<PrinterStatus>,
    pub last_update: Option<DateTime<Utc>>,
}

impl RegistryEntry {
    fn new(config: PrinterConfig) -> Self {
        Self {
            config: Arc::new(config),
            status: None,
            last_update: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}

#[derive(Default)]
struct RegistryState {
    order: Vec<String>,
    entries: HashMap<String, RegistryEntry>,
    last_print: HashMap<String, String>,
}

/// Decide whether a status change should update the last-print memo.
///
/// Only transitions into `printing` (including the first observation) and
/// from `printing` into `complete` count, and only with a non-empty file.
pub fn observed_print_file(prev: Option<&PrinterStatus>, next: &PrinterStatus) -> Option<String> {
    if !next.online {
        return None;
    }
    let file = next.active_file()?;
    let was_printing = prev
        .map(|p| p.online && p.state.is_printing())
        .unwrap_or(false);

    let entered_printing = next.state.is_printing() && !was_printing;
    let finished_printing = was_printing && next.state == PrinterState::Complete;

    if entered_printing || finished_printing {
        Some(file.to_string())
    } else {
        None
    }
}

#[derive(Default)]
pub struct PrinterRegistry {
    state: RwLock<RegistryState>,
}

impl PrinterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole registry with a freshly loaded configuration list.
    /// Duplicate names keep the first occurrence.
    pub async fn replace_configs(&self, configs: Vec<PrinterConfig>) -> usize {
        let mut fresh = RegistryState::default();
        for config in configs {
            if fresh.entries.contains_key(&config.name) {
                warn!(printer = %config.name, "Duplicate printer name in gateway config, ignoring");
                continue;
            }
            fresh.order.push(config.name.clone());
            fresh
                .entries
                .insert(config.name.clone(), RegistryEntry::new(config));
        }
        let count = fresh.order.len();
        *self.state.write().await = fresh;
        info!(count, "Printer registry loaded");
        count
    }

    /// Merge a status snapshot. Returns the names that were updated, in
    /// registry order.
    pub async fn apply_snapshot(
        &self,
        mut snapshot: StatusSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let mut state = self.state.write().await;
        let RegistryState {
            order,
            entries,
            last_print,
        } = &mut *state;

        let mut updated = Vec::new();
        for name in order.iter() {
            let Some(status) = snapshot.remove(name) else {
                continue;
            };
            let Some(entry) = entries.get_mut(name) else {
                continue;
            };
            if let Some(file) = observed_print_file(entry.status.as_ref(), &status) {
                debug!(printer = %name, %file, "Tracking last print file");
                last_print.insert(name.clone(), file);
            }
            entry.status = Some(status);
            entry.last_update = Some(now);
            updated.push(name.clone());
        }

        for unknown in snapshot.keys() {
            debug!(printer = %unknown, "Ignoring status for unknown printer");
        }
        updated
    }

    /// All entries in configuration order
    pub async fn entries(&self) -> Vec<RegistryEntry> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter_map(|name| state.entries.get(name).cloned())
            .collect()
    }

    pub async fn get(&self, name: &str) -> Option<RegistryEntry> {
        self.state.read().await.entries.get(name).cloned()
    }

    pub async fn config(&self, name: &str) -> Option<Arc<PrinterConfig>> {
        self.state
            .read()
            .await
            .entries
            .get(name)
            .map(|e| e.config.clone())
    }

    pub async fn last_print_file(&self, name: &str) -> Option<String> {
        self.state.read().await.last_print.get(name).cloned()
    }

    pub async fn last_print_files(&self) -> HashMap<String, String> {
        self.state.read().await.last_print.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PrinterType;

    fn config(name: &str) -> PrinterConfig {
        PrinterConfig {
            name: name.to_string(),
            printer_type: PrinterType::Klipper,
            url: format!("http://{name}.local"),
            camera_entity: None,
            api_key: None,
        }
    }

    fn status(state: &str, file: &str) -> PrinterStatus {
        PrinterStatus {
            online: true,
            state: PrinterState::parse(state),
            file: Some(file.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn snapshot_replaces_known_printers_only() {
        let registry = PrinterRegistry::new();
        registry
            .replace_configs(vec![config("voron"), config("ender")])
            .await;

        let t1 = Utc::now();
        let mut snapshot = StatusSnapshot::new();
        snapshot.insert("voron".into(), status("printing", "benchy.gcode"));
        snapshot.insert("ender".into(), status("idle", ""));
        snapshot.insert("ghost".into(), status("idle", ""));
        let updated = registry.apply_snapshot(snapshot, t1).await;
        assert_eq!(updated, vec!["voron".to_string(), "ender".to_string()]);

        // ender missing from the next poll keeps its previous status
        let t2 = t1 + chrono::Duration::seconds(10);
        let mut snapshot = StatusSnapshot::new();
        snapshot.insert("voron".into(), status("paused", "benchy.gcode"));
        registry.apply_snapshot(snapshot, t2).await;

        let ender = registry.get("ender").await.unwrap();
        assert_eq!(ender.status.unwrap().state, PrinterState::Idle);
        assert_eq!(ender.last_update, Some(t1));

        let voron = registry.get("voron").await.unwrap();
        assert_eq!(voron.status.unwrap().state, PrinterState::Paused);
        assert_eq!(voron.last_update, Some(t2));
        assert!(registry.get("ghost").await.is_none());
    }

    #[tokio::test]
    async fn duplicate_names_keep_first() {
        let registry = PrinterRegistry::new();
        let mut dup = config("voron");
        dup.url = "http://other".into();
        let count = registry.replace_configs(vec![config("voron"), dup]).await;
        assert_eq!(count, 1);
        assert_eq!(
            registry.config("voron").await.unwrap().url,
            "http://voron.local"
        );
    }

    #[test]
    fn print_file_tracked_on_entering_printing() {
        assert_eq!(
            observed_print_file(None, &status("printing", "a.gcode")),
            Some("a.gcode".to_string())
        );
        assert_eq!(
            observed_print_file(Some(&status("idle", "")), &status("printing", "a.gcode")),
            Some("a.gcode".to_string())
        );
        // still printing: not a transition
        assert_eq!(
            observed_print_file(
                Some(&status("printing", "a.gcode")),
                &status("printing", "a.gcode")
            ),
            None
        );
    }

    #[test]
    fn print_file_tracked_on_completion() {
        assert_eq!(
            observed_print_file(
                Some(&status("printing", "a.gcode")),
                &status("complete", "a.gcode")
            ),
            Some("a.gcode".to_string())
        );
        // complete without having seen the print does not count
        assert_eq!(
            observed_print_file(Some(&status("idle", "")), &status("complete", "a.gcode")),
            None
        );
        // empty file never recorded
        assert_eq!(observed_print_file(None, &status("printing", "  ")), None);
    }

    #[tokio::test]
    async fn memo_survives_later_states() {
        let registry = PrinterRegistry::new();
        registry.replace_configs(vec![config("voron")]).await;
        let now = Utc::now();

        for (state, file) in [
            ("printing", "cube.gcode"),
            ("complete", "cube.gcode"),
            ("standby", ""),
        ] {
            let mut snapshot = StatusSnapshot::new();
            snapshot.insert("voron".into(), status(state, file));
            registry.apply_snapshot(snapshot, now).await;
        }

        assert_eq!(
            registry.last_print_file("voron").await.as_deref(),
            Some("cube.gcode")
        );
    }
}

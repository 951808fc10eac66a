//! Device-command dispatch.
//!
//! Hardware integration is out of scope for the sync core; it only needs
//! something that can take commands. [`attach`] turns adopted state changes
//! into [`DeviceCommand`]s and hands them to a [`CommandDispatcher`] without
//! waiting on the result.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::state::{ControlMode, PoleId, SignalColor, StateDocument};
use crate::sync::{Subscription, SyncEngine};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum DeviceCommand {
    SetSignal { pole: PoleId, color: SignalColor },
    SetMode { mode: ControlMode },
    LoadTimingPlan { zone_id: u32 },
}

#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn send_command(&self, command: DeviceCommand) -> Result<()>;

    async fn send_batch(&self, commands: Vec<DeviceCommand>) -> Result<()> {
        for command in commands {
            self.send_command(command).await?;
        }
        Ok(())
    }
}

/// Writes every command to the log and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDispatcher;

#[async_trait]
impl CommandDispatcher for LoggingDispatcher {
    async fn send_command(&self, command: DeviceCommand) -> Result<()> {
        tracing::info!(?command, "device command");
        Ok(())
    }
}

/// Commands that bring devices from `prev` to `next`.
///
/// Mode first, then signals, then timing plans for zones that are new or
/// changed. Removed poles and zones produce nothing.
pub fn commands_for_change(prev: &StateDocument, next: &StateDocument) -> Vec<DeviceCommand> {
    let mut commands = Vec::new();

    if prev.control_mode != next.control_mode {
        commands.push(DeviceCommand::SetMode {
            mode: next.control_mode,
        });
    }

    for (pole, color) in &next.signal_status {
        if prev.signal_status.get(pole) != Some(color) {
            commands.push(DeviceCommand::SetSignal {
                pole: pole.clone(),
                color: *color,
            });
        }
    }

    for zone in &next.time_zones {
        let unchanged = prev.time_zones.iter().any(|old| old == zone);
        if !unchanged {
            commands.push(DeviceCommand::LoadTimingPlan { zone_id: zone.id });
        }
    }

    commands
}

/// Forward every adopted change on `engine` to `dispatcher`.
///
/// The document current at attach time is the baseline and produces no
/// commands. Must be called inside a Tokio runtime.
pub fn attach(engine: &SyncEngine, dispatcher: Arc<dyn CommandDispatcher>) -> Subscription {
    let (tx, mut rx) = mpsc::unbounded_channel::<StateDocument>();

    tokio::spawn(async move {
        let mut prev: Option<StateDocument> = None;

        while let Some(next) = rx.recv().await {
            let Some(base) = prev.replace(next.clone()) else {
                continue;
            };

            let mut commands = commands_for_change(&base, &next);
            let sent = match commands.len() {
                0 => continue,
                1 => match commands.pop() {
                    Some(command) => dispatcher.send_command(command).await,
                    None => continue,
                },
                _ => dispatcher.send_batch(commands).await,
            };
            if let Err(err) = sent {
                tracing::warn!(last_updated = next.last_updated, "device dispatch failed: {err}");
            }
        }
    });

    engine.subscribe(move |doc| {
        let _ = tx.send(doc.clone());
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::state::{StatePatch, TimeOfDay};
    use crate::storage::MemoryStore;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        commands: Mutex<Vec<DeviceCommand>>,
        batches: Mutex<usize>,
    }

    #[async_trait]
    impl CommandDispatcher for Recorder {
        async fn send_command(&self, command: DeviceCommand) -> Result<()> {
            self.commands.lock().push(command);
            Ok(())
        }

        async fn send_batch(&self, commands: Vec<DeviceCommand>) -> Result<()> {
            *self.batches.lock() += 1;
            self.commands.lock().extend(commands);
            Ok(())
        }
    }

    #[test]
    fn identical_documents_need_no_commands() {
        let doc = StateDocument::default();
        assert!(commands_for_change(&doc, &doc).is_empty());
    }

    #[test]
    fn changes_map_to_commands_in_order() {
        let prev = StateDocument::default();
        let mut next = prev.clone();
        next.control_mode = ControlMode::Manual;
        next.signal_status.insert("pole2".into(), SignalColor::Green);
        next.time_zones[0].end_time = TimeOfDay::new(18, 0).unwrap();

        assert_eq!(
            commands_for_change(&prev, &next),
            vec![
                DeviceCommand::SetMode {
                    mode: ControlMode::Manual
                },
                DeviceCommand::SetSignal {
                    pole: "pole2".into(),
                    color: SignalColor::Green
                },
                DeviceCommand::LoadTimingPlan { zone_id: 1 },
            ]
        );
    }

    #[test]
    fn command_wire_format() {
        let json = serde_json::to_value(DeviceCommand::SetSignal {
            pole: "pole1".into(),
            color: SignalColor::Yellow,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"command": "set_signal", "pole": "pole1", "color": "yellow"})
        );
    }

    #[tokio::test]
    async fn attached_dispatcher_sees_changes_but_not_baseline() {
        let engine = SyncEngine::new(SyncConfig::default(), Arc::new(MemoryStore::new()));
        let recorder = Arc::new(Recorder::default());
        let _sub = attach(&engine, recorder.clone());

        engine
            .publish(StatePatch::control_mode(ControlMode::Semi))
            .await
            .unwrap();

        let mut status = BTreeMap::new();
        status.insert("pole1".to_string(), SignalColor::Green);
        status.insert("pole3".to_string(), SignalColor::Yellow);
        engine.publish(StatePatch::signal_status(status)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let commands = recorder.commands.lock().clone();
        assert_eq!(commands.len(), 3);
        assert_eq!(
            commands[0],
            DeviceCommand::SetMode {
                mode: ControlMode::Semi
            }
        );
        // pole2 and pole4 were dropped by the patch: nothing is sent for them
        assert_eq!(*recorder.batches.lock(), 1);
    }
}

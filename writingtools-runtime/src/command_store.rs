//! Durable, observable list of commands.
//!
//! Every mutation is written to disk before it returns and then announced on
//! a broadcast channel, tagged with where the change came from so cloud sync
//! can ignore the changes it applied itself.

use crate::fs_util::write_bytes_atomic;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::broadcast;
use writingtools_core::builtins::builtin_commands;
use writingtools_core::command::Command;
use writingtools_core::types::CommandId;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("write commands: {0:#}")]
    Write(anyhow::Error),
    #[error("encode commands: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("decode commands: {0}")]
    Decode(#[source] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Local,
    /// Applied from another device by cloud sync.
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub origin: ChangeOrigin,
    pub commands: Vec<Command>,
}

#[derive(Debug)]
pub struct CommandStore {
    path: PathBuf,
    commands: Mutex<Vec<Command>>,
    events: broadcast::Sender<StoreEvent>,
}

impl CommandStore {
    /// Opens the store; a missing file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let commands = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(StoreError::Decode)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => vec![],
            Err(source) => return Err(StoreError::Read { path, source }),
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            path,
            commands: Mutex::new(commands),
            events,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.lock().clone()
    }

    pub fn get(&self, id: CommandId) -> Option<Command> {
        self.lock().iter().find(|c| c.id == id).cloned()
    }

    pub fn contains(&self, id: CommandId) -> bool {
        self.lock().iter().any(|c| c.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Appends `command` unless its id is already present. Returns whether it was added.
    pub fn add(&self, command: Command) -> Result<bool, StoreError> {
        self.mutate(ChangeOrigin::Local, |list| {
            if list.iter().any(|c| c.id == command.id) {
                return false;
            }
            list.push(command);
            true
        })
    }

    /// Replaces the command with the same id. Returns whether one was found.
    pub fn update(&self, command: Command) -> Result<bool, StoreError> {
        self.mutate(ChangeOrigin::Local, |list| {
            match list.iter_mut().find(|c| c.id == command.id) {
                Some(slot) => {
                    *slot = command;
                    true
                }
                None => false,
            }
        })
    }

    /// Removes a built-in or custom command. Returns whether one was found.
    pub fn delete(&self, id: CommandId) -> Result<bool, StoreError> {
        self.mutate(ChangeOrigin::Local, |list| {
            let before = list.len();
            list.retain(|c| c.id != id);
            list.len() != before
        })
    }

    /// Drops every built-in and puts the canonical set back in front; custom commands stay.
    pub fn reset_to_defaults(&self) -> Result<(), StoreError> {
        self.mutate(ChangeOrigin::Local, |list| {
            let customs: Vec<Command> = list.drain(..).filter(|c| !c.is_built_in).collect();
            list.extend(builtin_commands());
            list.extend(customs);
            true
        })
        .map(|_| ())
    }

    pub fn replace_all(&self, commands: Vec<Command>) -> Result<(), StoreError> {
        self.replace_all_from(ChangeOrigin::Local, commands)
    }

    /// Wholesale replace used by cloud sync; observers see a `Remote` event.
    pub fn apply_remote(&self, commands: Vec<Command>) -> Result<(), StoreError> {
        self.replace_all_from(ChangeOrigin::Remote, commands)
    }

    fn replace_all_from(
        &self,
        origin: ChangeOrigin,
        commands: Vec<Command>,
    ) -> Result<(), StoreError> {
        let commands = dedup_by_id(commands);
        self.mutate(origin, |list| {
            *list = commands;
            true
        })
        .map(|_| ())
    }

    /// Drag-reorder. Out of range indices leave the list untouched.
    pub fn move_command(&self, from: usize, to: usize) -> Result<bool, StoreError> {
        let mut list = self.commands();
        if from >= list.len() || to >= list.len() {
            return Ok(false);
        }
        if from == to {
            return Ok(true);
        }
        let cmd = list.remove(from);
        list.insert(to, cmd);
        self.replace_all(list)?;
        Ok(true)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Command>> {
        // A panic while holding the lock cannot leave the list half-edited:
        // edits are made on a copy and swapped in after they are persisted.
        self.commands
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies `edit` to a copy, persists it, then swaps it in and notifies.
    /// Nothing is written or announced when `edit` reports no change.
    fn mutate<F>(&self, origin: ChangeOrigin, edit: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut Vec<Command>) -> bool,
    {
        let mut guard = self.lock();
        let mut next = guard.clone();
        if !edit(&mut next) {
            return Ok(false);
        }

        let json = serde_json::to_vec_pretty(&next).map_err(StoreError::Encode)?;
        write_bytes_atomic(&self.path, &json).map_err(StoreError::Write)?;

        *guard = next.clone();
        drop(guard);

        log::debug!("command store now holds {} commands ({origin:?})", next.len());
        // No subscribers is fine.
        let _ = self.events.send(StoreEvent {
            origin,
            commands: next,
        });
        Ok(true)
    }
}

fn dedup_by_id(commands: Vec<Command>) -> Vec<Command> {
    let mut seen = HashSet::new();
    commands.into_iter().filter(|c| seen.insert(c.id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use writingtools_core::builtins::BuiltIn;

    fn store() -> (tempfile::TempDir, CommandStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CommandStore::load(dir.path().join("commands.json")).unwrap();
        (dir, store)
    }

    #[test]
    fn add_is_idempotent_by_id() {
        let (_dir, store) = store();
        let cmd = Command::custom("Pirate", "Talk like a pirate");
        assert!(store.add(cmd.clone()).unwrap());
        assert!(!store.add(cmd.clone()).unwrap());
        let matching = store.commands().iter().filter(|c| c.id == cmd.id).count();
        assert_eq!(matching, 1);
    }

    #[test]
    fn mutations_are_persisted_before_returning() {
        let (dir, store) = store();
        let cmd = Command::custom("Pirate", "Talk like a pirate");
        store.add(cmd.clone()).unwrap();

        let reopened = CommandStore::load(dir.path().join("commands.json")).unwrap();
        assert_eq!(reopened.commands(), vec![cmd]);
    }

    #[test]
    fn update_replaces_and_ignores_unknown_ids() {
        let (_dir, store) = store();
        let cmd = Command::custom("Pirate", "Talk like a pirate");
        store.add(cmd.clone()).unwrap();

        let mut edited = cmd.clone();
        edited.prompt = "Talk like a parrot".into();
        assert!(store.update(edited.clone()).unwrap());
        assert_eq!(store.get(cmd.id).unwrap().prompt, "Talk like a parrot");

        assert!(!store.update(Command::custom("Ghost", "boo")).unwrap());
        assert_eq!(store.commands().len(), 1);
    }

    #[test]
    fn delete_applies_to_builtins_too() {
        let (_dir, store) = store();
        store.reset_to_defaults().unwrap();
        let proofread = store.commands()[0].clone();
        assert!(proofread.is_built_in);
        assert!(store.delete(proofread.id).unwrap());
        assert!(!store.contains(proofread.id));
        assert!(!store.delete(proofread.id).unwrap());
    }

    #[test]
    fn reset_restores_builtins_and_keeps_customs() {
        let (_dir, store) = store();
        store.reset_to_defaults().unwrap();
        let custom = Command::custom("Pirate", "Talk like a pirate");
        store.add(custom.clone()).unwrap();

        let mut commands = store.commands();
        commands[0].prompt = "edited".into();
        store.update(commands[0].clone()).unwrap();
        store.delete(commands[1].id).unwrap();

        store.reset_to_defaults().unwrap();
        let after = store.commands();
        let names: Vec<&str> = after
            .iter()
            .filter(|c| c.is_built_in)
            .map(|c| c.name.as_str())
            .collect();
        let canonical: Vec<&str> = BuiltIn::ALL.iter().map(|b| b.name()).collect();
        assert_eq!(names, canonical);
        assert!(after.iter().all(|c| c.prompt != "edited"));
        assert_eq!(after.iter().filter(|c| !c.is_built_in).count(), 1);
        assert!(after.contains(&custom));
    }

    #[test]
    fn move_reorders_through_replace_all() {
        let (_dir, store) = store();
        let a = Command::custom("A", "a");
        let b = Command::custom("B", "b");
        let c = Command::custom("C", "c");
        store.replace_all(vec![a.clone(), b.clone(), c.clone()]).unwrap();

        assert!(store.move_command(2, 0).unwrap());
        assert_eq!(store.commands(), vec![c, a, b]);
        assert!(!store.move_command(5, 0).unwrap());
    }

    #[test]
    fn replace_all_drops_duplicate_ids() {
        let (_dir, store) = store();
        let a = Command::custom("A", "a");
        store.replace_all(vec![a.clone(), a.clone()]).unwrap();
        assert_eq!(store.commands(), vec![a]);
    }

    #[tokio::test]
    async fn events_carry_origin_and_final_state() {
        let (_dir, store) = store();
        let mut rx = store.subscribe();

        let a = Command::custom("A", "a");
        store.add(a.clone()).unwrap();
        store.apply_remote(vec![]).unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.origin, ChangeOrigin::Local);
        assert_eq!(first.commands, vec![a]);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.origin, ChangeOrigin::Remote);
        assert!(second.commands.is_empty());
    }

    #[test]
    fn no_op_mutations_do_not_notify() {
        let (_dir, store) = store();
        let mut rx = store.subscribe();
        store.update(Command::custom("Ghost", "boo")).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn corrupt_file_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(matches!(
            CommandStore::load(path),
            Err(StoreError::Decode(_))
        ));
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value/command registry: a tiny key-value and RPC-handler registry with
//! per-owner lifetime and auth tokens (spec §2, §4.4 `VAL`/`CMD`).

use std::collections::HashMap;

use abi::hxe::{AuthLevel, CommandFlags};
use abi::Pid;

#[derive(Clone, Debug)]
pub struct ValueEntry {
    pub group: u8,
    pub id: u8,
    pub owner_pid: Pid,
    pub name: String,
    pub value: i32,
    pub unit: String,
    pub epsilon: f32,
    pub min: f32,
    pub max: f32,
    pub auth_level: AuthLevel,
    pub persist_key: String,
    pub subscribers: Vec<Pid>,
}

#[derive(Clone, Debug)]
pub struct CommandEntry {
    pub group: u8,
    pub id: u8,
    pub owner_pid: Pid,
    pub name: String,
    pub help: String,
    pub flags: CommandFlags,
    pub auth_level: AuthLevel,
    pub handler_offset: u32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegistryError {
    NotFound,
    Exists,
    AuthDenied,
}

#[derive(Default)]
pub struct Registry {
    values: Vec<ValueEntry>,
    commands: Vec<CommandEntry>,
    by_name: HashMap<String, usize>,
    cmd_by_name: HashMap<String, usize>,
    next_call_id: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_value(&mut self, entry: ValueEntry) -> Result<(), RegistryError> {
        if self.by_name.contains_key(&entry.name) {
            return Err(RegistryError::Exists);
        }
        self.by_name.insert(entry.name.clone(), self.values.len());
        self.values.push(entry);
        Ok(())
    }

    pub fn lookup_value(&self, name: &str) -> Option<&ValueEntry> {
        self.by_name.get(name).map(|&i| &self.values[i])
    }

    pub fn get_value(&self, name: &str) -> Result<i32, RegistryError> {
        self.lookup_value(name).map(|v| v.value).ok_or(RegistryError::NotFound)
    }

    pub fn set_value(&mut self, name: &str, value: i32, caller_level: AuthLevel) -> Result<(), RegistryError> {
        let idx = *self.by_name.get(name).ok_or(RegistryError::NotFound)?;
        if caller_level < self.values[idx].auth_level {
            return Err(RegistryError::AuthDenied);
        }
        self.values[idx].value = value;
        Ok(())
    }

    pub fn list_values(&self) -> &[ValueEntry] {
        &self.values
    }

    pub fn subscribe_value(&mut self, name: &str, subscriber: Pid) -> Result<(), RegistryError> {
        let idx = *self.by_name.get(name).ok_or(RegistryError::NotFound)?;
        let entry = &mut self.values[idx];
        if !entry.subscribers.contains(&subscriber) {
            entry.subscribers.push(subscriber);
        }
        Ok(())
    }

    pub fn register_command(&mut self, entry: CommandEntry) -> Result<(), RegistryError> {
        if self.cmd_by_name.contains_key(&entry.name) {
            return Err(RegistryError::Exists);
        }
        self.cmd_by_name.insert(entry.name.clone(), self.commands.len());
        self.commands.push(entry);
        Ok(())
    }

    pub fn lookup_command(&self, name: &str) -> Option<&CommandEntry> {
        self.cmd_by_name.get(name).map(|&i| &self.commands[i])
    }

    pub fn help(&self, name: &str) -> Result<&str, RegistryError> {
        self.lookup_command(name).map(|c| c.help.as_str()).ok_or(RegistryError::NotFound)
    }

    pub fn list_commands(&self) -> &[CommandEntry] {
        &self.commands
    }

    pub fn next_call_id(&mut self) -> u64 {
        self.next_call_id += 1;
        self.next_call_id
    }

    /// Removes every value/command this `pid` owns, used by `kill(pid)`
    /// (spec §5).
    pub fn reap_pid(&mut self, pid: Pid) {
        self.values.retain(|v| v.owner_pid != pid);
        self.commands.retain(|c| c.owner_pid != pid);
        self.rebuild_indexes();
    }

    fn rebuild_indexes(&mut self) {
        self.by_name = self.values.iter().enumerate().map(|(i, v)| (v.name.clone(), i)).collect();
        self.cmd_by_name = self.commands.iter().enumerate().map(|(i, c)| (c.name.clone(), i)).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(name: &str, owner: Pid, auth: AuthLevel) -> ValueEntry {
        ValueEntry {
            group: 0,
            id: 0,
            owner_pid: owner,
            name: name.to_string(),
            value: 0,
            unit: String::new(),
            epsilon: 0.0,
            min: 0.0,
            max: 0.0,
            auth_level: auth,
            persist_key: String::new(),
            subscribers: Vec::new(),
        }
    }

    #[test]
    fn set_value_denies_insufficient_auth() {
        let mut reg = Registry::new();
        reg.register_value(value("rpm", 1, AuthLevel::Admin)).unwrap();
        let err = reg.set_value("rpm", 5, AuthLevel::Public).unwrap_err();
        assert_eq!(err, RegistryError::AuthDenied);
    }

    #[test]
    fn set_value_succeeds_with_sufficient_auth() {
        let mut reg = Registry::new();
        reg.register_value(value("rpm", 1, AuthLevel::Operator)).unwrap();
        reg.set_value("rpm", 5, AuthLevel::Admin).unwrap();
        assert_eq!(reg.get_value("rpm").unwrap(), 5);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = Registry::new();
        reg.register_value(value("rpm", 1, AuthLevel::Public)).unwrap();
        let err = reg.register_value(value("rpm", 2, AuthLevel::Public)).unwrap_err();
        assert_eq!(err, RegistryError::Exists);
    }

    #[test]
    fn reap_pid_removes_owned_entries_only() {
        let mut reg = Registry::new();
        reg.register_value(value("a", 1, AuthLevel::Public)).unwrap();
        reg.register_value(value("b", 2, AuthLevel::Public)).unwrap();
        reg.reap_pid(1);
        assert!(reg.lookup_value("a").is_none());
        assert!(reg.lookup_value("b").is_some());
    }
}

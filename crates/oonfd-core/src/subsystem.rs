// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dependency-ordered subsystem registry.
//!
//! Subsystems are loaded in dependency order (topological, parents before
//! children) and torn down in the reverse order they were actually
//! started, mirroring the two-pass `early_cfg_init` / `init` split the
//! daemon uses to let every subsystem parse its configuration section
//! before any subsystem starts touching sockets or timers.

use std::collections::{BTreeMap, HashSet};

use crate::error::ResourceError;

/// Subsystem lifecycle hooks. A subsystem that has none of its own state
/// to allocate can still be registered as a pure dependency node (e.g. a
/// feature flag other subsystems gate on).
pub trait Subsystem {
    /// Unique name; also the config-section name if the subsystem has one.
    fn name(&self) -> &'static str;

    /// Names of subsystems that must be initialized before this one.
    fn dependencies(&self) -> &[&'static str] {
        &[]
    }

    /// If `true`, no logging source is allocated for this subsystem.
    fn no_logging(&self) -> bool {
        false
    }

    /// Parse/validate this subsystem's config section. Runs for every
    /// registered subsystem before any subsystem's `init`.
    fn early_cfg_init(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    /// Acquire resources, register classes/timers/sockets. Runs in
    /// dependency order.
    fn init(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    /// Signal that teardown is beginning (e.g. stop accepting new work)
    /// without yet releasing resources other subsystems may still depend
    /// on. Runs in dependency order, before any `cleanup`.
    fn initiate_shutdown(&mut self) {}

    /// Release resources. Runs in reverse start order.
    fn cleanup(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsystemState {
    Registered,
    ConfigInitialized,
    Running,
    ShuttingDown,
    Stopped,
}

struct Entry {
    subsystem: Box<dyn Subsystem>,
    dependencies: Vec<&'static str>,
    state: SubsystemState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    DuplicateName(&'static str),
    UnknownDependency { subsystem: &'static str, depends_on: &'static str },
    DependencyCycle(Vec<&'static str>),
    NotRegistered(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateName(n) => write!(f, "subsystem '{n}' already registered"),
            Self::UnknownDependency { subsystem, depends_on } => {
                write!(f, "subsystem '{subsystem}' depends on unregistered '{depends_on}'")
            }
            Self::DependencyCycle(cycle) => {
                write!(f, "subsystem dependency cycle: {}", cycle.join(" -> "))
            }
            Self::NotRegistered(n) => write!(f, "subsystem '{n}' is not registered"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Registry of loaded subsystems, held in name-keyed order for stable
/// iteration and diagnostics.
pub struct SubsystemRegistry {
    entries: BTreeMap<&'static str, Entry>,
    start_order: Vec<&'static str>,
}

impl Default for SubsystemRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubsystemRegistry {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            start_order: Vec::new(),
        }
    }

    /// Register a subsystem. Does not run any lifecycle hook yet.
    pub fn register(&mut self, subsystem: Box<dyn Subsystem>) -> Result<(), RegistryError> {
        let name = subsystem.name();
        if self.entries.contains_key(name) {
            return Err(RegistryError::DuplicateName(name));
        }
        let dependencies = subsystem.dependencies().to_vec();
        self.entries.insert(
            name,
            Entry {
                subsystem,
                dependencies,
                state: SubsystemState::Registered,
            },
        );
        Ok(())
    }

    pub fn state(&self, name: &str) -> Option<SubsystemState> {
        self.entries.get(name).map(|e| e.state)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Topologically order registered subsystems so every dependency
    /// precedes its dependents. Ties among subsystems with no ordering
    /// constraint between them break by name, for deterministic output.
    fn topological_order(&self) -> Result<Vec<&'static str>, RegistryError> {
        for (name, entry) in &self.entries {
            for dep in &entry.dependencies {
                if !self.entries.contains_key(dep) {
                    return Err(RegistryError::UnknownDependency {
                        subsystem: name,
                        depends_on: dep,
                    });
                }
            }
        }

        let mut resolved: Vec<&'static str> = Vec::with_capacity(self.entries.len());
        let mut resolved_set: HashSet<&'static str> = HashSet::new();
        let mut visiting: HashSet<&'static str> = HashSet::new();

        fn visit(
            name: &'static str,
            entries: &BTreeMap<&'static str, Entry>,
            resolved: &mut Vec<&'static str>,
            resolved_set: &mut HashSet<&'static str>,
            visiting: &mut HashSet<&'static str>,
            path: &mut Vec<&'static str>,
        ) -> Result<(), RegistryError> {
            if resolved_set.contains(name) {
                return Ok(());
            }
            if visiting.contains(name) {
                path.push(name);
                return Err(RegistryError::DependencyCycle(path.clone()));
            }
            visiting.insert(name);
            path.push(name);
            let entry = &entries[name];
            for dep in &entry.dependencies {
                visit(dep, entries, resolved, resolved_set, visiting, path)?;
            }
            path.pop();
            visiting.remove(name);
            resolved_set.insert(name);
            resolved.push(name);
            Ok(())
        }

        for name in self.entries.keys() {
            let mut path = Vec::new();
            visit(name, &self.entries, &mut resolved, &mut resolved_set, &mut visiting, &mut path)?;
        }
        Ok(resolved)
    }

    /// Run `early_cfg_init` for every registered subsystem, then `init` in
    /// dependency order. On the first `init` failure, already-started
    /// subsystems are torn down in reverse order and the error returned.
    pub fn start_all(&mut self) -> Result<(), (RegistryError, Option<ResourceError>)> {
        let order = self.topological_order().map_err(|e| (e, None))?;

        for name in &order {
            let entry = self.entries.get_mut(name).expect("ordered name is registered");
            entry
                .subsystem
                .early_cfg_init()
                .map_err(|e| (RegistryError::NotRegistered(String::new()), Some(e)))?;
            entry.state = SubsystemState::ConfigInitialized;
        }

        for name in &order {
            let entry = self.entries.get_mut(name).expect("ordered name is registered");
            match entry.subsystem.init() {
                Ok(()) => {
                    entry.state = SubsystemState::Running;
                    self.start_order.push(name);
                }
                Err(e) => {
                    self.shutdown_all();
                    return Err((RegistryError::NotRegistered(name.to_string()), Some(e)));
                }
            }
        }
        Ok(())
    }

    /// Tear down every started subsystem in reverse start order:
    /// `initiate_shutdown` for all of them first, then `cleanup` in
    /// reverse order.
    pub fn shutdown_all(&mut self) {
        for name in self.start_order.iter().rev() {
            if let Some(entry) = self.entries.get_mut(name) {
                entry.subsystem.initiate_shutdown();
                entry.state = SubsystemState::ShuttingDown;
            }
        }
        for name in self.start_order.drain(..).rev().collect::<Vec<_>>() {
            if let Some(entry) = self.entries.get_mut(name) {
                entry.subsystem.cleanup();
                entry.state = SubsystemState::Stopped;
            }
        }
    }

    /// Unload a single running subsystem: `initiate_shutdown` + `cleanup`,
    /// provided nothing still running depends on it.
    pub fn unload(&mut self, name: &str) -> Result<(), RegistryError> {
        if !self.entries.contains_key(name) {
            return Err(RegistryError::NotRegistered(name.to_string()));
        }
        for (other_name, entry) in &self.entries {
            if entry.state == SubsystemState::Running
                && entry.dependencies.iter().any(|d| *d == name)
            {
                return Err(RegistryError::UnknownDependency {
                    subsystem: other_name,
                    depends_on: name,
                });
            }
        }
        if let Some(entry) = self.entries.get_mut(name) {
            entry.subsystem.initiate_shutdown();
            entry.subsystem.cleanup();
            entry.state = SubsystemState::Stopped;
        }
        self.start_order.retain(|n| *n != name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Tracked {
        name: &'static str,
        deps: &'static [&'static str],
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Subsystem for Tracked {
        fn name(&self) -> &'static str {
            self.name
        }
        fn dependencies(&self) -> &[&'static str] {
            self.deps
        }
        fn init(&mut self) -> Result<(), ResourceError> {
            self.log.borrow_mut().push(format!("init:{}", self.name));
            Ok(())
        }
        fn cleanup(&mut self) {
            self.log.borrow_mut().push(format!("cleanup:{}", self.name));
        }
    }

    #[test]
    fn dependencies_start_before_dependents_and_stop_after() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut reg = SubsystemRegistry::new();
        reg.register(Box::new(Tracked { name: "nhdp", deps: &["rfc5444"], log: log.clone() }))
            .unwrap();
        reg.register(Box::new(Tracked { name: "rfc5444", deps: &[], log: log.clone() }))
            .unwrap();
        reg.register(Box::new(Tracked { name: "olsrv2", deps: &["nhdp"], log: log.clone() }))
            .unwrap();

        reg.start_all().unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["init:rfc5444", "init:nhdp", "init:olsrv2"]
        );

        log.borrow_mut().clear();
        reg.shutdown_all();
        assert_eq!(
            *log.borrow(),
            vec!["cleanup:olsrv2", "cleanup:nhdp", "cleanup:rfc5444"]
        );
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut reg = SubsystemRegistry::new();
        reg.register(Box::new(Tracked { name: "x", deps: &[], log: log.clone() }))
            .unwrap();
        let err = reg
            .register(Box::new(Tracked { name: "x", deps: &[], log: log.clone() }))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateName("x"));
    }

    #[test]
    fn unknown_dependency_is_rejected_at_start() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut reg = SubsystemRegistry::new();
        reg.register(Box::new(Tracked { name: "x", deps: &["missing"], log: log.clone() }))
            .unwrap();
        assert!(reg.start_all().is_err());
    }

    #[test]
    fn dependency_cycle_is_rejected() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut reg = SubsystemRegistry::new();
        reg.register(Box::new(Tracked { name: "a", deps: &["b"], log: log.clone() }))
            .unwrap();
        reg.register(Box::new(Tracked { name: "b", deps: &["a"], log: log.clone() }))
            .unwrap();
        assert!(reg.start_all().is_err());
    }

    #[test]
    fn unload_rejects_when_a_running_dependent_remains() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut reg = SubsystemRegistry::new();
        reg.register(Box::new(Tracked { name: "base", deps: &[], log: log.clone() }))
            .unwrap();
        reg.register(Box::new(Tracked { name: "dependent", deps: &["base"], log: log.clone() }))
            .unwrap();
        reg.start_all().unwrap();
        assert!(reg.unload("base").is_err());
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! [`oonfd_core::subsystem::Subsystem`] wrappers that give the daemon's
//! fixed set of built-in subsystems a place in the dependency-ordered
//! registry, separate from the runtime state the daemon's event loop
//! actually drives.
//!
//! A subsystem struct that bundles lifecycle callbacks together with a
//! plugin's own live state is awkward in Rust: the event loop needs
//! `&mut` access to every [`crate::dlep_runtime::InterfaceRuntime`] on
//! every readiness-loop iteration, which the registry (boxed behind `dyn
//! Subsystem`, with no downcast) cannot hand back out. So the real
//! runtime objects (DLEP interfaces, signature policy) are built and
//! owned directly by [`crate::daemon::Daemon`]; these wrappers exist
//! purely to exercise init/shutdown ordering and per-subsystem logging
//! source (`oonfd_core::logging::target_for`) the same way every other
//! subsystem does, with the wrapper's own lifecycle hooks limited to what
//! they can do without owning the data: logging the transition.

use oonfd_core::error::ResourceError;
use oonfd_core::logging::target_for;
use oonfd_core::subsystem::Subsystem;

pub struct Rfc5444Subsystem;

impl Subsystem for Rfc5444Subsystem {
    fn name(&self) -> &'static str {
        "rfc5444"
    }

    fn init(&mut self) -> Result<(), ResourceError> {
        log::debug!(target: &target_for(self.name()), "packet/message codec ready");
        Ok(())
    }
}

pub struct SignatureSubsystem {
    section_count: usize,
}

impl SignatureSubsystem {
    pub fn new(section_count: usize) -> Self {
        Self { section_count }
    }
}

impl Subsystem for SignatureSubsystem {
    fn name(&self) -> &'static str {
        "signature"
    }

    fn dependencies(&self) -> &[&'static str] {
        &["rfc5444"]
    }

    fn init(&mut self) -> Result<(), ResourceError> {
        log::info!(
            target: &target_for(self.name()),
            "{} signature section(s) loaded",
            self.section_count
        );
        Ok(())
    }
}

pub struct DlepSubsystem {
    interface_names: Vec<String>,
}

impl DlepSubsystem {
    pub fn new(interface_names: Vec<String>) -> Self {
        Self { interface_names }
    }
}

impl Subsystem for DlepSubsystem {
    fn name(&self) -> &'static str {
        "dlep"
    }

    fn dependencies(&self) -> &[&'static str] {
        &["rfc5444", "signature"]
    }

    fn init(&mut self) -> Result<(), ResourceError> {
        log::info!(
            target: &target_for(self.name()),
            "interfaces: {}",
            self.interface_names.join(", ")
        );
        Ok(())
    }

    fn initiate_shutdown(&mut self) {
        log::info!(target: &target_for(self.name()), "shutting down DLEP interfaces");
    }
}

pub struct MeshSubsystem {
    interface_names: Vec<String>,
}

impl MeshSubsystem {
    pub fn new(interface_names: Vec<String>) -> Self {
        Self { interface_names }
    }
}

impl Subsystem for MeshSubsystem {
    fn name(&self) -> &'static str {
        "mesh"
    }

    fn dependencies(&self) -> &[&'static str] {
        &["rfc5444", "signature"]
    }

    fn init(&mut self) -> Result<(), ResourceError> {
        log::info!(
            target: &target_for(self.name()),
            "interfaces: {}",
            self.interface_names.join(", ")
        );
        Ok(())
    }

    fn initiate_shutdown(&mut self) {
        log::info!(target: &target_for(self.name()), "shutting down mesh interfaces");
    }
}

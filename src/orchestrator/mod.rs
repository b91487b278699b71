//! Application-level orchestration.
//!
//! This module owns the job session lifecycle (mount, start, cancel, reset) and
//! its reconciliation with the session store. UI/CLI layers send commands and
//! render the snapshots it emits.

mod controller;

pub(crate) use controller::{run_controller, ControllerOptions, JobController, UiCommand};

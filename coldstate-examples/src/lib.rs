//! Example feature modules built on the `ColdState` engine.
//!
//! Each module wires a feature's state enum, its initialize/deinitialize
//! transitions, and a monitor event funnel onto a
//! [`ColdStateRepository`](coldstate::ColdStateRepository):
//!
//! - [`network`]: reachability over a scripted connectivity monitor
//! - [`permissions`]: permission status over an interval poller
//! - [`bluetooth`]: a device link showing the initialized-value loop

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bluetooth;
pub mod network;
pub mod permissions;

//! ObjectStack kernel — plugin microkernel and package lifecycle manager.
//!
//! A minimal core that loads extension plugins, orders them by their
//! declared dependencies, hands each one a permission-checked runtime
//! context, and manages install/upgrade/rollback/uninstall of versioned,
//! namespace-owning packages.
//!
//! See `DESIGN.md` for architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod resolver;
pub mod types;

pub mod kernel;
pub mod package;

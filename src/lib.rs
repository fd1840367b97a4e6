#![forbid(unsafe_code)]

//! Tree-style directory browser core. The embedding editor implements
//! [`host::Host`] and forwards its events to [`controller::Controller`].

pub mod bookmark;
pub mod buffer;
pub mod config;
pub mod controller;
pub mod error;
pub mod fs_ops;
pub mod host;
pub mod keymap;
pub mod model;
pub mod remote;
pub mod rifle;
pub mod sort;
pub mod ui;

pub use config::Config;
pub use controller::Controller;
pub use error::{Error, Result};
pub use host::{BufferId, Host, JobId, JobOutput, OpenTarget, PanelKind};
pub use keymap::Action;

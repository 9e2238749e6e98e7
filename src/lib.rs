#![doc = include_str!("../README.md")]
#![warn(rustdoc::all)]
#![deny(unused_must_use, rust_2018_idioms)]

#[macro_use]
extern crate tracing;

pub mod error;
pub use error::{BlockageReport, BuildError, Result};

pub mod task;
pub use task::{Source, SourceKind, Target, Task, TaskState};

pub mod scan;
pub use scan::{scan_file, Component, ComponentKind, ScanResult};

pub mod config;
pub use config::Manifest;

pub mod resolver;

pub mod cache;

pub mod p1689;

pub mod backend;
pub use backend::{Backend, ClangClBackend, MsvcBackend};

pub mod compile;
pub use compile::{BuildDriver, BuildOptions, BuildSummary};

pub mod utils;

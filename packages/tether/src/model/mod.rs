//! Typed shapes for everything the runtime caches or sends.
//!
//! These types are the *normalized* form. Untrusted input arrives as
//! `serde_json::Value` and goes through [`crate::validate`] to become one of
//! these; nothing builds them from raw JSON without validation except the
//! deserializers used for host-pushed snapshots.

mod action;
mod app_data;
mod setting;
mod task;

pub use action::{Action, Key, KeyMode};
pub use app_data::{AppData, AppDataPatch, DataMap};
pub use setting::{FileType, Setting, SettingKind, SettingOption, SettingType, DEFAULT_DESCRIPTION};
pub use task::{ActionRef, SettingRef, Step, StepKind, StepType, Task, TaskPatch};

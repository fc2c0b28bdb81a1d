//! Fixed parameter contract shared by every engine binding.
//!
//! The records here are pure schema: [`EngineInfo`] and [`FlagItem`] describe
//! an engine, [`EngineInput`] carries one synthesis call and [`EngineOutput`]
//! holds its raw audio. Their serde form uses the ABI field names listed in
//! [`schema`], which is what managed engines are matched against structurally.

pub mod info;
pub mod input;
pub mod output;
pub mod schema;

pub use info::{EngineInfo, FlagItem};
pub use input::EngineInput;
pub use output::EngineOutput;

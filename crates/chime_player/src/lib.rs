//! chime_player - 播放控制
//!
//! 在外部解码/输出引擎之上提供播放器的状态机与生命周期管理。

mod config;
mod decoder;
mod engine;
mod event;
#[cfg(test)]
mod mock;
mod output;
mod player;

pub use config::*;
pub use decoder::*;
pub use engine::*;
pub use event::*;
pub use output::*;
pub use player::*;

//! 配置模块
//!
//! 环境变量解析与用户偏好记录

pub mod env;
pub mod prefs;

pub use env::EnvConfig;
pub use prefs::{PrefKind, PrefRecord, PrefStore};

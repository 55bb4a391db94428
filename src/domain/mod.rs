//! 领域模型
//!
//! 纯数据类型与解码逻辑，不做任何 I/O

pub mod auth;
pub mod meter;
pub mod tunnel;

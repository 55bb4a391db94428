//! 校园宿舍电费自动充值代理
//!
//! 通过容器化 EasyConnect 隧道访问校园计费门户，
//! 完成认证、电表充值并保证资源清理。

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;

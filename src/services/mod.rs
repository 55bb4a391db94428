//! 服务层

pub mod auth;
pub mod meter;
pub mod portal;
pub mod proxy;
pub mod tunnel;
pub mod workflow;

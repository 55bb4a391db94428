//! 基础设施层

pub mod docker;

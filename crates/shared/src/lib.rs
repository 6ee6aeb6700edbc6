//! 共享库
//!
//! 规则引擎库与演示程序共用的配置加载、日志初始化和指标记录。

pub mod config;
pub mod observability;

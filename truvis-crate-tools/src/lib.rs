//! Truvis 工具集
//!
//! 提供日志初始化、工作区路径管理等通用工具。
//!
//! # TruvisPath
//! 基于工作区根目录的统一路径管理，避免硬编码相对路径。
//! 音频注册表的配置文件与回放脚本都通过它定位。

pub mod init_log;
pub mod resource;

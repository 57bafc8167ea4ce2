// modules - 进程级基础设施 (日志 / 服务端配置 / 一次性工具命令)

pub mod config;
pub mod gen;
pub mod logger;

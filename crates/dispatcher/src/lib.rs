//! # Fleet Dispatcher
//!
//! 分布式命令的入口：按服务器名串行化的任务执行器、命令分发器、
//! 启动时的崩溃恢复，以及调用方使用的命令客户端。

pub mod client;
pub mod command_dispatcher;
pub mod recovery_service;
pub mod task_serializer;

pub use client::CommandClient;
pub use command_dispatcher::CommandDispatcher;
pub use recovery_service::{CrashRecoveryService, RecoveryReport, RecoveryService};
pub use task_serializer::TaskSerializer;

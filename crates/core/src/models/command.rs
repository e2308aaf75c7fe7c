//! 分布式命令协议
//!
//! 请求格式为空格分隔的 ASCII 文本：`<VERB> <correlation-id> <operands...>`。
//! 消息在总线边界处解码一次为 [`Command`]，业务逻辑中不再传递原始字符串。
//! 响应格式为 `<correlation-id> <CODE>`，发布在固定的响应频道上。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 命令动词
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verb {
    Start,
    Stop,
    Delete,
    DeleteData,
    Restart,
    SetMetadata,
    Command,
    Create,
    Rename,
    NewGlobalFile,
    Register,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Start => "START",
            Verb::Stop => "STOP",
            Verb::Delete => "DELETE",
            Verb::DeleteData => "DELETE_DATA",
            Verb::Restart => "RESTART",
            Verb::SetMetadata => "SET_METADATA",
            Verb::Command => "COMMAND",
            Verb::Create => "CREATE",
            Verb::Rename => "RENAME",
            Verb::NewGlobalFile => "NEW_GLOBAL_FILE",
            Verb::Register => "REGISTER",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "START" => Ok(Verb::Start),
            "STOP" => Ok(Verb::Stop),
            "DELETE" => Ok(Verb::Delete),
            "DELETE_DATA" => Ok(Verb::DeleteData),
            "RESTART" => Ok(Verb::Restart),
            "SET_METADATA" => Ok(Verb::SetMetadata),
            "COMMAND" => Ok(Verb::Command),
            "CREATE" => Ok(Verb::Create),
            "RENAME" => Ok(Verb::Rename),
            "NEW_GLOBAL_FILE" => Ok(Verb::NewGlobalFile),
            "REGISTER" => Ok(Verb::Register),
            other => Err(DecodeError::UnknownVerb(other.to_string())),
        }
    }
}

/// 解码失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("空消息")]
    Empty,
    #[error("未知的命令动词: {0}")]
    UnknownVerb(String),
    #[error("命令 {verb} 缺少参数 {operand}")]
    MissingOperand {
        verb: Verb,
        request_id: Option<String>,
        operand: &'static str,
    },
}

impl DecodeError {
    /// 若能识别出关联ID，调用方仍应得到一个响应
    pub fn request_id(&self) -> Option<&str> {
        match self {
            DecodeError::MissingOperand { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }
}

/// 解码后的命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start {
        request_id: String,
        name: String,
    },
    Stop {
        request_id: String,
        name: String,
        force: bool,
    },
    Delete {
        request_id: String,
        name: String,
    },
    DeleteData {
        request_id: String,
        name: String,
    },
    Restart {
        request_id: String,
        name: String,
    },
    SetMetadata {
        request_id: String,
        name: String,
        key: String,
        value: String,
    },
    Console {
        request_id: String,
        name: String,
        command: String,
    },
    Create {
        request_id: String,
        name: String,
        server_type: String,
    },
    Rename {
        request_id: String,
        name: String,
        target: String,
    },
    NewGlobalFile,
    Register {
        address: String,
    },
}

impl Command {
    /// 从总线文本解码
    pub fn parse(message: &str) -> Result<Self, DecodeError> {
        let tokens: Vec<&str> = message.split_whitespace().collect();
        let verb: Verb = tokens.first().ok_or(DecodeError::Empty)?.parse()?;
        let request_id = tokens.get(1).map(|s| s.to_string());

        let operand = |index: usize, operand: &'static str| -> Result<String, DecodeError> {
            tokens
                .get(index)
                .map(|s| s.to_string())
                .ok_or_else(|| DecodeError::MissingOperand {
                    verb,
                    request_id: request_id.clone(),
                    operand,
                })
        };
        let trailing = |from: usize| tokens.get(from..).map(|t| t.join(" ")).unwrap_or_default();

        let command = match verb {
            Verb::Start => Command::Start {
                request_id: operand(1, "request_id")?,
                name: operand(2, "name")?,
            },
            Verb::Stop => Command::Stop {
                request_id: operand(1, "request_id")?,
                name: operand(2, "name")?,
                force: tokens
                    .get(3)
                    .map(|s| s.eq_ignore_ascii_case("true"))
                    .unwrap_or(false),
            },
            Verb::Delete => Command::Delete {
                request_id: operand(1, "request_id")?,
                name: operand(2, "name")?,
            },
            Verb::DeleteData => Command::DeleteData {
                request_id: operand(1, "request_id")?,
                name: operand(2, "name")?,
            },
            Verb::Restart => Command::Restart {
                request_id: operand(1, "request_id")?,
                name: operand(2, "name")?,
            },
            Verb::SetMetadata => Command::SetMetadata {
                request_id: operand(1, "request_id")?,
                name: operand(2, "name")?,
                key: operand(3, "key")?,
                value: trailing(4),
            },
            Verb::Command => Command::Console {
                request_id: operand(1, "request_id")?,
                name: operand(2, "name")?,
                command: trailing(3),
            },
            Verb::Create => Command::Create {
                request_id: operand(1, "request_id")?,
                name: operand(2, "name")?,
                server_type: operand(3, "type")?,
            },
            Verb::Rename => Command::Rename {
                request_id: operand(1, "request_id")?,
                name: operand(2, "name")?,
                target: operand(3, "target")?,
            },
            Verb::NewGlobalFile => Command::NewGlobalFile,
            Verb::Register => Command::Register {
                address: operand(1, "address")?,
            },
        };

        Ok(command)
    }

    pub fn verb(&self) -> Verb {
        match self {
            Command::Start { .. } => Verb::Start,
            Command::Stop { .. } => Verb::Stop,
            Command::Delete { .. } => Verb::Delete,
            Command::DeleteData { .. } => Verb::DeleteData,
            Command::Restart { .. } => Verb::Restart,
            Command::SetMetadata { .. } => Verb::SetMetadata,
            Command::Console { .. } => Verb::Command,
            Command::Create { .. } => Verb::Create,
            Command::Rename { .. } => Verb::Rename,
            Command::NewGlobalFile => Verb::NewGlobalFile,
            Command::Register { .. } => Verb::Register,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            Command::Start { request_id, .. }
            | Command::Stop { request_id, .. }
            | Command::Delete { request_id, .. }
            | Command::DeleteData { request_id, .. }
            | Command::Restart { request_id, .. }
            | Command::SetMetadata { request_id, .. }
            | Command::Console { request_id, .. }
            | Command::Create { request_id, .. }
            | Command::Rename { request_id, .. } => Some(request_id),
            Command::NewGlobalFile | Command::Register { .. } => None,
        }
    }

    /// 编码为总线文本
    pub fn encode(&self) -> String {
        match self {
            Command::Start { request_id, name }
            | Command::Delete { request_id, name }
            | Command::DeleteData { request_id, name }
            | Command::Restart { request_id, name } => {
                format!("{} {request_id} {name}", self.verb())
            }
            Command::Stop {
                request_id,
                name,
                force,
            } => format!("{} {request_id} {name} {force}", self.verb()),
            Command::SetMetadata {
                request_id,
                name,
                key,
                value,
            } => format!("{} {request_id} {name} {key} {value}", self.verb())
                .trim_end()
                .to_string(),
            Command::Console {
                request_id,
                name,
                command,
            } => format!("{} {request_id} {name} {command}", self.verb()),
            Command::Create {
                request_id,
                name,
                server_type,
            } => format!("{} {request_id} {name} {server_type}", self.verb()),
            Command::Rename {
                request_id,
                name,
                target,
            } => format!("{} {request_id} {name} {target}", self.verb()),
            Command::NewGlobalFile => format!("{} 0", self.verb()),
            Command::Register { address } => format!("{} {address}", self.verb()),
        }
    }
}

/// 固定的响应码集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseCode {
    ServerStarting,
    ServerStopped,
    ServerForceStopped,
    ServerRemoved,
    ServerRestarting,
    ServerCreated,
    ServerRenamed,
    MetadataSet,
    UnknownServer,
    ServerAlreadyRunning,
    ServerNotRunning,
    ServerNameTaken,
    ServerNameInvalid,
    MemoryLimitReached,
    UnknownError,
}

impl ResponseCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseCode::ServerStarting => "SERVER_STARTING",
            ResponseCode::ServerStopped => "SERVER_STOPPED",
            ResponseCode::ServerForceStopped => "SERVER_FORCE_STOPPED",
            ResponseCode::ServerRemoved => "SERVER_REMOVED",
            ResponseCode::ServerRestarting => "SERVER_RESTARTING",
            ResponseCode::ServerCreated => "SERVER_CREATED",
            ResponseCode::ServerRenamed => "SERVER_RENAMED",
            ResponseCode::MetadataSet => "METADATA_SET",
            ResponseCode::UnknownServer => "UNKNOWN_SERVER",
            ResponseCode::ServerAlreadyRunning => "SERVER_ALREADY_RUNNING",
            ResponseCode::ServerNotRunning => "SERVER_NOT_RUNNING",
            ResponseCode::ServerNameTaken => "SERVER_NAME_TAKEN",
            ResponseCode::ServerNameInvalid => "SERVER_NAME_INVALID",
            ResponseCode::MemoryLimitReached => "MEMORY_LIMIT_REACHED",
            ResponseCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// 错误分类到响应码的默认映射；个别命令会覆盖其中几项
    pub fn from_error(error: &crate::FleetError) -> Self {
        use crate::FleetError;
        match error {
            FleetError::AlreadyOnline { .. } => ResponseCode::ServerAlreadyRunning,
            FleetError::NotOnline { .. } => ResponseCode::ServerNotRunning,
            FleetError::UnknownServer { .. } => ResponseCode::UnknownServer,
            FleetError::NameTaken { .. } => ResponseCode::ServerNameTaken,
            FleetError::NameInvalid { .. } => ResponseCode::ServerNameInvalid,
            _ => ResponseCode::UnknownError,
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = match s {
            "SERVER_STARTING" => ResponseCode::ServerStarting,
            "SERVER_STOPPED" => ResponseCode::ServerStopped,
            "SERVER_FORCE_STOPPED" => ResponseCode::ServerForceStopped,
            "SERVER_REMOVED" => ResponseCode::ServerRemoved,
            "SERVER_RESTARTING" => ResponseCode::ServerRestarting,
            "SERVER_CREATED" => ResponseCode::ServerCreated,
            "SERVER_RENAMED" => ResponseCode::ServerRenamed,
            "METADATA_SET" => ResponseCode::MetadataSet,
            "UNKNOWN_SERVER" => ResponseCode::UnknownServer,
            "SERVER_ALREADY_RUNNING" => ResponseCode::ServerAlreadyRunning,
            "SERVER_NOT_RUNNING" => ResponseCode::ServerNotRunning,
            "SERVER_NAME_TAKEN" => ResponseCode::ServerNameTaken,
            "SERVER_NAME_INVALID" => ResponseCode::ServerNameInvalid,
            "MEMORY_LIMIT_REACHED" => ResponseCode::MemoryLimitReached,
            "UNKNOWN_ERROR" => ResponseCode::UnknownError,
            other => return Err(format!("Invalid response code: {other}")),
        };
        Ok(code)
    }
}

/// 响应消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub request_id: String,
    pub code: ResponseCode,
}

impl CommandResponse {
    pub fn new(request_id: impl Into<String>, code: ResponseCode) -> Self {
        Self {
            request_id: request_id.into(),
            code,
        }
    }

    pub fn encode(&self) -> String {
        format!("{} {}", self.request_id, self.code)
    }

    pub fn parse(message: &str) -> Option<Self> {
        let mut parts = message.split_whitespace();
        let request_id = parts.next()?;
        let code = parts.next()?.parse().ok()?;
        Some(Self::new(request_id, code))
    }
}

/// 服务器变更广播：消费方应把重命名视为删除+创建
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    Updated(String),
    Deleted(String),
}

impl UpdateEvent {
    pub fn encode(&self) -> String {
        match self {
            UpdateEvent::Updated(name) => format!("{name} UPDATE"),
            UpdateEvent::Deleted(name) => format!("{name} DELETE"),
        }
    }

    pub fn parse(message: &str) -> Option<Self> {
        let (name, kind) = message.trim().rsplit_once(' ')?;
        match kind {
            "UPDATE" => Some(UpdateEvent::Updated(name.to_string())),
            "DELETE" => Some(UpdateEvent::Deleted(name.to_string())),
            _ => None,
        }
    }
}

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// `wt` 元数据指定的世界生成方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorldType {
    Flat,
    Normal,
    Void,
    Upload,
}

impl WorldType {
    /// 大小写不敏感；无法识别时返回 None，按默认世界处理
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "FLAT" => Some(WorldType::Flat),
            "NORMAL" => Some(WorldType::Normal),
            "VOID" => Some(WorldType::Void),
            "UPLOAD" => Some(WorldType::Upload),
            _ => None,
        }
    }

    /// 传给后端的生成器名，VOID 与 UPLOAD 通过设置文件或世界目录生效
    pub fn generator(&self) -> &'static str {
        match self {
            WorldType::Flat => "FLAT",
            WorldType::Normal => "DEFAULT",
            WorldType::Void | WorldType::Upload => "",
        }
    }
}

impl fmt::Display for WorldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorldType::Flat => "FLAT",
            WorldType::Normal => "NORMAL",
            WorldType::Void => "VOID",
            WorldType::Upload => "UPLOAD",
        };
        f.write_str(s)
    }
}

/// 启动工作负载所需的全部参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    pub name: String,
    pub working_dir: std::path::PathBuf,
    pub port: u16,
    pub memory_mb: u64,
    pub online_mode: bool,
    pub allow_flight: bool,
    pub command_blocks: bool,
    pub generator: String,
    pub jvm_args: Vec<String>,
    pub max_players: u32,
    pub env: BTreeMap<String, String>,
}

impl ServerSettings {
    pub fn new(name: &str, working_dir: std::path::PathBuf, port: u16, memory_mb: u64) -> Self {
        let mut env = BTreeMap::new();
        env.insert("servername".to_string(), name.to_string());
        env.insert("MAX_MEMORY".to_string(), memory_mb.to_string());

        Self {
            name: name.to_string(),
            working_dir,
            port,
            memory_mb,
            online_mode: true,
            allow_flight: true,
            command_blocks: true,
            generator: String::new(),
            jvm_args: vec![format!("-Dserver.name={name}")],
            max_players: crate::models::resources::DEFAULT_MAX_PLAYERS,
            env,
        }
    }

    /// `server.properties` 中由节点决定的键
    pub fn properties(&self) -> Vec<(&'static str, String)> {
        vec![
            ("server-port", self.port.to_string()),
            ("online-mode", self.online_mode.to_string()),
            ("allow-flight", self.allow_flight.to_string()),
            ("enable-command-block", self.command_blocks.to_string()),
            ("level-type", self.generator.clone()),
            ("max-players", self.max_players.to_string()),
        ]
    }
}

//! 资源档位计算
//!
//! 档位由元数据中的到期时间（毫秒时间戳）决定，显式覆盖值总是优先。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::server::metadata_keys;

pub const BASE_MEMORY_MB: u64 = 1024;
pub const PREMIUM_MEMORY_MB: u64 = 1536;
pub const ULTRA_MEMORY_MB: u64 = 2048;
/// 稳定性余量，总是最后追加
pub const STABILIZATION_MARGIN_MB: u64 = 200;

pub const DEFAULT_MAX_PLAYERS: u32 = 15;
pub const PREMIUM_MAX_PLAYERS: u32 = 25;
pub const ULTRA_MAX_PLAYERS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceTier {
    Base,
    Premium,
    Ultra,
}

/// 一台服务器的资源上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceProfile {
    pub tier: ResourceTier,
    pub memory_mb: u64,
    pub max_players: u32,
}

impl ResourceProfile {
    pub fn from_metadata(metadata: &BTreeMap<String, String>, now: DateTime<Utc>) -> Self {
        let tier = resource_tier(metadata, now);
        Self {
            tier,
            memory_mb: memory_ceiling(metadata, tier),
            max_players: max_players(metadata, tier),
        }
    }
}

fn not_elapsed(metadata: &BTreeMap<String, String>, key: &str, now: DateTime<Utc>) -> bool {
    metadata
        .get(key)
        .and_then(|value| value.trim().parse::<i64>().ok())
        .map(|expiry_ms| expiry_ms > now.timestamp_millis())
        .unwrap_or(false)
}

/// ultra 以 premium 为前提：独立的 ultra 到期时间未过，或显式 ultra 标记
pub fn resource_tier(metadata: &BTreeMap<String, String>, now: DateTime<Utc>) -> ResourceTier {
    if !not_elapsed(metadata, metadata_keys::PREMIUM_UNTIL, now) {
        return ResourceTier::Base;
    }

    let ultra_flag = metadata
        .get(metadata_keys::ULTRA_FLAG)
        .map(|v| v == "y")
        .unwrap_or(false);

    if not_elapsed(metadata, metadata_keys::ULTRA_UNTIL, now) || ultra_flag {
        ResourceTier::Ultra
    } else {
        ResourceTier::Premium
    }
}

/// 内存上限（MB），已包含稳定性余量
pub fn memory_ceiling(metadata: &BTreeMap<String, String>, tier: ResourceTier) -> u64 {
    let computed = match tier {
        ResourceTier::Base => BASE_MEMORY_MB,
        ResourceTier::Premium => PREMIUM_MEMORY_MB,
        ResourceTier::Ultra => ULTRA_MEMORY_MB,
    };

    let ceiling = metadata
        .get(metadata_keys::MEMORY_OVERRIDE)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(computed);

    ceiling.saturating_add(STABILIZATION_MARGIN_MB)
}

pub fn max_players(metadata: &BTreeMap<String, String>, tier: ResourceTier) -> u32 {
    let computed = match tier {
        ResourceTier::Base => DEFAULT_MAX_PLAYERS,
        ResourceTier::Premium => PREMIUM_MAX_PLAYERS,
        ResourceTier::Ultra => ULTRA_MAX_PLAYERS,
    };

    metadata
        .get(metadata_keys::MAX_PLAYERS_OVERRIDE)
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(computed)
}

use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::core::Result;

// 用于序列化 Duration
fn serialize_duration<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_secs())
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub queue: QueueConfig,
    pub sharepoint: Option<SharePointConfig>,
    pub supabase: Option<SupabaseConfig>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let config_str = std::fs::read_to_string(path)?;
        Self::from_toml_str(&config_str)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Config> {
        Ok(toml::from_str(config_str)?)
    }
}

/// 上传队列配置
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct QueueConfig {
    /// 完成的任务保留多久
    #[serde(serialize_with = "serialize_duration", deserialize_with = "deserialize_duration")]
    pub success_linger: Duration,
    /// 失败的任务保留多久
    #[serde(serialize_with = "serialize_duration", deserialize_with = "deserialize_duration")]
    pub failure_linger: Duration,
    /// 按模块分目录、文件名带版本号的专业名称
    pub module_packages_discipline: String,
    /// 事件广播缓存
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            success_linger: Duration::from_secs(3),
            failure_linger: Duration::from_secs(10),
            module_packages_discipline: "Module Packages".to_string(),
            event_capacity: 256,
        }
    }
}

/// SharePoint 文档库（Microsoft Graph）
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct SharePointConfig {
    pub graph_url: String,
    pub drive_id: String,
    pub access_token: String,
    /// 所有项目目录的上级目录
    pub root_folder: Option<String>,
    /// 分块大小，必须是 320 KiB 的整数倍
    pub chunk_size: usize,
    pub timeout_secs: u64,
}

impl Default for SharePointConfig {
    fn default() -> Self {
        Self {
            graph_url: "https://graph.microsoft.com/v1.0".to_string(),
            drive_id: String::new(),
            access_token: String::new(),
            root_folder: None,
            chunk_size: 10 * 320 * 1024,
            timeout_secs: 300,
        }
    }
}

/// Supabase / PostgREST
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct SupabaseConfig {
    /// e.g. `https://xyz.supabase.co/rest/v1`
    pub rest_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl Default for SupabaseConfig {
    fn default() -> Self {
        Self {
            rest_url: String::new(),
            api_key: String::new(),
            timeout_secs: 30,
        }
    }
}

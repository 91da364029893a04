//! 应用配置模块

use crate::core::comparator::{CompareConfig, CompareMode};
use crate::core::sync_log::SyncLogOptions;
use crate::error::SyncError;
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// 内容比较配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareSettings {
    /// 大小相同时总是比较哈希
    #[serde(default)]
    pub checksum: bool,
    /// 修改时间容差（毫秒）
    #[serde(default)]
    pub time_tolerance_ms: u64,
}

impl CompareSettings {
    pub fn to_compare_config(&self) -> CompareConfig {
        CompareConfig {
            mode: if self.checksum {
                CompareMode::Checksum
            } else {
                CompareMode::Quick
            },
            time_tolerance_ms: self.time_tolerance_ms,
        }
    }
}

/// 同步日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLogSettings {
    /// 日志行加时间戳前缀
    #[serde(default)]
    pub timestamps: bool,
    /// 同时输出到标准输出
    #[serde(default = "default_echo")]
    pub echo: bool,
}

fn default_echo() -> bool {
    true
}

impl Default for SyncLogSettings {
    fn default() -> Self {
        Self {
            timestamps: false,
            echo: default_echo(),
        }
    }
}

impl SyncLogSettings {
    pub fn to_options(&self) -> SyncLogOptions {
        SyncLogOptions {
            echo: self.echo,
            timestamps: self.timestamps,
        }
    }
}

/// 配置文件内容，所有字段都有默认值
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub compare: CompareSettings,
    #[serde(default)]
    pub sync_log: SyncLogSettings,
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    /// 从 JSON 配置文件加载
    ///
    /// 与默认配置不同，显式指定的配置文件读取或解析失败会返回错误。
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let content = fs::read_to_string(path).map_err(|e| {
            SyncError::ConfigInvalid(format!("无法读取配置文件 {}: {}", path.display(), e))
        })?;
        let config: AppConfig = serde_json::from_str(&content).map_err(|e| {
            SyncError::ConfigInvalid(format!("配置文件格式错误 {}: {}", path.display(), e))
        })?;
        config.log.validate()?;
        Ok(config)
    }
}

/// 校验同步间隔（秒），必须为正数
pub fn validate_interval(seconds: i64) -> Result<Duration, SyncError> {
    if seconds <= 0 {
        return Err(SyncError::ConfigInvalid(format!(
            "同步间隔必须是正整数，当前为 {}",
            seconds
        )));
    }
    Ok(Duration::from_secs(seconds as u64))
}

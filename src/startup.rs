use std::fs;
use std::path::Path;

use crate::config::AppConfig;
use crate::error::AppError;

/// 执行启动检查
///
/// 1. 检查并创建数据目录（SQLite 文件所在目录）
/// 2. 校验日界时区与清零时间配置
/// 3. 检查共享密钥与加密主密钥（仅告警，不阻断启动）
pub async fn run_startup_checks(config: &AppConfig) -> Result<(), AppError> {
    tracing::info!("🔍 开始执行启动检查...");

    ensure_data_folder(config)?;
    check_quota_config(config)?;
    check_secrets(config);

    tracing::info!("✅ 启动检查完成");
    Ok(())
}

/// 确保 SQLite 数据目录存在
fn ensure_data_folder(config: &AppConfig) -> Result<(), AppError> {
    let db_path = Path::new(&config.storage.sqlite_path);
    let Some(dir) = db_path.parent() else {
        return Ok(());
    };
    if dir.as_os_str().is_empty() || dir.exists() {
        return Ok(());
    }
    tracing::warn!("📁 未找到数据目录，正在创建: {:?}", dir);
    fs::create_dir_all(dir).map_err(|e| AppError::Internal(format!("创建数据目录失败: {e}")))?;
    Ok(())
}

/// 校验额度相关配置：时区可解析、清零时间为 HH:MM
fn check_quota_config(config: &AppConfig) -> Result<(), AppError> {
    if config.quota.timezone.parse::<chrono_tz::Tz>().is_err() {
        tracing::warn!(
            "⚠️ quota.timezone 无法解析: {}（将回退 Asia/Shanghai）",
            config.quota.timezone
        );
    }
    if crate::features::account::reset::parse_reset_time(&config.quota.reset_time).is_none() {
        return Err(AppError::Internal(format!(
            "quota.reset_time 无效: {}（应为 HH:MM）",
            config.quota.reset_time
        )));
    }
    if config.quota.daily_limit == 0 {
        tracing::warn!("⚠️ quota.daily_limit=0：共享密钥用户将始终被拒绝");
    }
    Ok(())
}

/// 检查密钥配置；缺失不阻断启动，但相应功能会退化
fn check_secrets(config: &AppConfig) {
    if config.gemini.default_api_key.trim().is_empty() {
        tracing::warn!("⚠️ gemini.default_api_key 未配置：免费额度（共享密钥）不可用");
    }
    if config.credentials.secret.trim().is_empty() {
        tracing::warn!("⚠️ credentials.secret 未配置：用户无法保存自备密钥");
    }
}

#[cfg(test)]
mod tests {
    use super::check_quota_config;
    use crate::config::AppConfig;

    #[test]
    fn default_quota_config_passes() {
        let cfg = AppConfig::default();
        assert!(check_quota_config(&cfg).is_ok());
    }

    #[test]
    fn malformed_reset_time_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.quota.reset_time = "25:61".to_string();
        assert!(check_quota_config(&cfg).is_err());
    }
}

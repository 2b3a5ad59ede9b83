use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 全局配置单例
static CONFIG: OnceCell<AppConfig> = OnceCell::new();

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3900,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: String,
    /// 日志格式
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "full".to_string(),
        }
    }
}

/// API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API 路由前缀
    pub prefix: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            prefix: "/api/v1".to_string(),
        }
    }
}

/// CORS 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// 是否启用 CORS
    #[serde(default = "CorsConfig::default_enabled")]
    pub enabled: bool,
    /// 允许的 Origin 列表（支持 "*" 表示任意）
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// 允许的方法列表（支持 "*" 表示任意）
    #[serde(default)]
    pub allowed_methods: Vec<String>,
    /// 允许的请求头列表（支持 "*" 表示任意）
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    /// 是否允许携带凭证（Cookie/Authorization）
    #[serde(default)]
    pub allow_credentials: bool,
    /// 预检缓存时间（秒）
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

impl CorsConfig {
    fn default_enabled() -> bool {
        false
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            allowed_origins: Vec::new(),
            allowed_methods: Vec::new(),
            allowed_headers: Vec::new(),
            allow_credentials: false,
            max_age_secs: None,
        }
    }
}

/// Gemini 生成服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// API Base URL
    #[serde(default = "GeminiConfig::default_base_url")]
    pub base_url: String,
    /// 图像生成模型
    #[serde(default = "GeminiConfig::default_model")]
    pub model: String,
    /// 共享默认密钥（免费额度用户使用；留空则仅支持自备密钥）
    #[serde(default)]
    pub default_api_key: String,
    /// 单次生成请求超时（秒）
    #[serde(default = "GeminiConfig::default_timeout")]
    pub timeout_secs: u64,
}

impl GeminiConfig {
    fn default_base_url() -> String {
        "https://generativelanguage.googleapis.com".to_string()
    }
    fn default_model() -> String {
        "gemini-2.5-flash-image".to_string()
    }
    fn default_timeout() -> u64 {
        90
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            model: Self::default_model(),
            default_api_key: String::new(),
            timeout_secs: Self::default_timeout(),
        }
    }
}

/// 免费额度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// 共享密钥用户每日可用的生成次数
    #[serde(default = "QuotaConfig::default_daily_limit")]
    pub daily_limit: u32,
    /// 日界时区（IANA 名称，如 Asia/Shanghai）
    #[serde(default = "QuotaConfig::default_timezone")]
    pub timezone: String,
    /// 每日批量清零时间（本地时区，如 "00:00"）
    #[serde(default = "QuotaConfig::default_reset_time")]
    pub reset_time: String,
}

impl QuotaConfig {
    fn default_daily_limit() -> u32 {
        2
    }
    fn default_timezone() -> String {
        "Asia/Shanghai".to_string()
    }
    fn default_reset_time() -> String {
        "00:00".to_string()
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: Self::default_daily_limit(),
            timezone: Self::default_timezone(),
            reset_time: Self::default_reset_time(),
        }
    }
}

/// 持久化配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite 文件路径
    #[serde(default = "StorageConfig::default_sqlite_path")]
    pub sqlite_path: String,
    /// 是否启用 WAL
    #[serde(default = "StorageConfig::default_sqlite_wal")]
    pub sqlite_wal: bool,
}

impl StorageConfig {
    fn default_sqlite_path() -> String {
        "./data/lumen.db".to_string()
    }
    fn default_sqlite_wal() -> bool {
        true
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: Self::default_sqlite_path(),
            sqlite_wal: Self::default_sqlite_wal(),
        }
    }
}

/// 图像后处理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// 近白判定阈值：R/G/B 任一通道低于该值即视为内容像素
    #[serde(default = "MediaConfig::default_border_threshold")]
    pub border_threshold: u8,
    /// 边框占比低于该百分比时跳过裁剪，避免对近满幅图过度裁切
    #[serde(default = "MediaConfig::default_min_border_percentage")]
    pub min_border_percentage: f64,
}

impl MediaConfig {
    fn default_border_threshold() -> u8 {
        240
    }
    fn default_min_border_percentage() -> f64 {
        1.0
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            border_threshold: Self::default_border_threshold(),
            min_border_percentage: Self::default_min_border_percentage(),
        }
    }
}

/// 持久图床配置（可选；未配置 endpoint 时一律内联存储）
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ImageHostConfig {
    /// 上传端点（留空则禁用持久图床，降级为内联存储）
    #[serde(default)]
    pub upload_endpoint: Option<String>,
    /// 上传鉴权密钥（Header: X-Api-Key）
    #[serde(default)]
    pub api_key: Option<String>,
    /// 目录/命名空间提示
    #[serde(default = "ImageHostConfig::default_folder")]
    pub folder: String,
    /// 上传超时（秒）
    #[serde(default = "ImageHostConfig::default_timeout")]
    pub timeout_secs: u64,
}

impl ImageHostConfig {
    fn default_folder() -> String {
        "lumen".to_string()
    }
    fn default_timeout() -> u64 {
        30
    }
}

/// 用户密钥加密配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CredentialsConfig {
    /// 用于派生 AES-256-GCM 密钥的主密钥（可通过 APP_CREDENTIALS_SECRET 设置）
    #[serde(default)]
    pub secret: String,
}

/// 优雅退出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// 优雅退出超时时间（秒）
    #[serde(default = "ShutdownConfig::default_timeout")]
    pub timeout_secs: u64,
}

impl ShutdownConfig {
    fn default_timeout() -> u64 {
        30
    }

    /// 获取优雅退出超时时间
    pub fn timeout_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub api: ApiConfig,
    /// CORS 配置
    #[serde(default)]
    pub cors: CorsConfig,
    /// Gemini 生成服务配置
    #[serde(default)]
    pub gemini: GeminiConfig,
    /// 免费额度配置
    #[serde(default)]
    pub quota: QuotaConfig,
    /// 持久化配置
    #[serde(default)]
    pub storage: StorageConfig,
    /// 图像后处理配置
    #[serde(default)]
    pub media: MediaConfig,
    /// 持久图床配置
    #[serde(default)]
    pub image_host: ImageHostConfig,
    /// 用户密钥加密配置
    #[serde(default)]
    pub credentials: CredentialsConfig,
    /// 优雅退出配置
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl AppConfig {
    /// 从配置文件加载配置，支持环境变量覆盖
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path();

        tracing::info!("正在从 {:?} 加载配置文件", config_path);

        let builder = ConfigBuilder::builder()
            // 加载配置文件
            .add_source(File::with_name(config_path.to_str().unwrap()).required(false))
            // 支持环境变量覆盖，例如：APP_SERVER_PORT
            .add_source(
                Environment::with_prefix("APP")
                    .separator("_")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = builder.try_deserialize()?;
        Ok(config)
    }

    /// 获取全局配置单例
    pub fn global() -> &'static AppConfig {
        CONFIG.get().expect("配置未初始化，请先调用 init_global()")
    }

    /// 初始化全局配置
    pub fn init_global() -> Result<(), ConfigError> {
        let config = Self::load()?;
        CONFIG
            .set(config)
            .map_err(|_| ConfigError::Message("配置已经被初始化".to_string()))?;
        Ok(())
    }

    /// 直接注入配置（集成测试用；已初始化时忽略后续注入）
    pub fn init_global_with(config: AppConfig) {
        let _ = CONFIG.set(config);
    }

    /// 获取配置文件路径
    fn get_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    /// 获取服务器监听地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 解析日界时区，非法配置回退到默认时区
    pub fn quota_timezone(&self) -> chrono_tz::Tz {
        match self.quota.timezone.parse::<chrono_tz::Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                tracing::warn!("quota.timezone 无效: {}，回退 Asia/Shanghai", self.quota.timezone);
                chrono_tz::Asia::Shanghai
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            api: ApiConfig::default(),
            cors: CorsConfig::default(),
            gemini: GeminiConfig::default(),
            quota: QuotaConfig::default(),
            storage: StorageConfig::default(),
            media: MediaConfig::default(),
            image_host: ImageHostConfig::default(),
            credentials: CredentialsConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AppConfig;

    #[test]
    fn default_config_is_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.quota.daily_limit, 2);
        assert_eq!(cfg.media.border_threshold, 240);
        assert!(cfg.image_host.upload_endpoint.is_none());
    }

    #[test]
    fn invalid_timezone_falls_back() {
        let mut cfg = AppConfig::default();
        cfg.quota.timezone = "Not/AZone".to_string();
        assert_eq!(cfg.quota_timezone(), chrono_tz::Asia::Shanghai);
    }
}

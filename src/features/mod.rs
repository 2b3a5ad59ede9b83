/// 账户、额度与自备密钥
pub mod account;

/// 生成编排：提示词、上游调用、记录
pub mod generation;

/// 健康检查
pub mod health;

/// 图像后处理与图床
pub mod media;

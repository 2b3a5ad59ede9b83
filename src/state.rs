use std::sync::Arc;

use crate::features::account::storage::UserStore;
use crate::features::generation::service::GenerationService;
use crate::features::generation::storage::GenerationStore;

/// 聚合的应用共享状态
///
/// 持久化句柄与上游客户端都在启动时显式构建后注入，
/// 不依赖进程级可变全局。
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserStore>,
    pub generations: Arc<GenerationStore>,
    pub service: Arc<GenerationService>,
}

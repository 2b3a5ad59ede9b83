use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use lumen_backend::features::account::handler::create_account_router;
use lumen_backend::features::account::reset::run_daily_quota_reset;
use lumen_backend::features::account::storage::UserStore;
use lumen_backend::features::generation::handler::create_generation_router;
use lumen_backend::features::generation::provider::GeminiClient;
use lumen_backend::features::generation::service::GenerationService;
use lumen_backend::features::generation::storage::GenerationStore;
use lumen_backend::features::health::handler::health_check;
use lumen_backend::features::media::upload::ImageHostClient;
use lumen_backend::startup::run_startup_checks;
use lumen_backend::state::AppState;
use lumen_backend::{AppConfig, AppError, ShutdownManager, cors, request_id};

#[derive(OpenApi)]
#[openapi(
    paths(
        lumen_backend::features::account::handler::sync_account,
        lumen_backend::features::account::handler::get_account,
        lumen_backend::features::account::handler::put_credential,
        lumen_backend::features::account::handler::delete_credential,
        lumen_backend::features::account::handler::delete_account,
        lumen_backend::features::generation::handler::generate_image,
        lumen_backend::features::generation::handler::edit_image,
        lumen_backend::features::generation::handler::segment_image,
        lumen_backend::features::generation::handler::list_generations,
        lumen_backend::features::generation::handler::get_generation,
        lumen_backend::features::generation::handler::delete_generation,
        lumen_backend::features::health::handler::health_check,
    ),
    components(
        schemas(
            AppError,
            lumen_backend::error::ProblemDetails,
            lumen_backend::features::account::models::SyncRequest,
            lumen_backend::features::account::models::AccountResponse,
            lumen_backend::features::account::models::QuotaStatus,
            lumen_backend::features::account::models::CredentialRequest,
            lumen_backend::features::account::models::OkResponse,
            lumen_backend::features::generation::models::GenerateRequest,
            lumen_backend::features::generation::models::EditRequest,
            lumen_backend::features::generation::models::SegmentRequest,
            lumen_backend::features::generation::models::InlineImageInput,
            lumen_backend::features::generation::models::GeneratedImage,
            lumen_backend::features::generation::models::GenerationResponse,
            lumen_backend::features::generation::models::SegmentMask,
            lumen_backend::features::generation::models::SegmentResponse,
            lumen_backend::features::generation::models::GenerationRecordView,
            lumen_backend::features::generation::models::GenerationListResponse,
            lumen_backend::features::health::handler::HealthResponse,
        )
    ),
    tags(
        (name = "Account", description = "Account & quota APIs"),
        (name = "Generation", description = "Image generation APIs"),
        (name = "Health", description = "Health APIs"),
    ),
    info(
        title = "Lumen Backend API",
        version = "0.1.0",
        description = "Quota-aware generative image broker (Axum)"
    )
)]
pub struct ApiDoc;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lumen_backend=info,tower_http=info".into()),
        )
        .init();

    // 创建优雅退出管理器
    let shutdown_manager = ShutdownManager::new();

    // Load config
    if let Err(e) = AppConfig::init_global() {
        tracing::error!("Config init failed: {}", e);
        std::process::exit(1);
    }
    let config = AppConfig::global();

    // 启动信号处理器
    if let Err(e) = shutdown_manager.start_signal_handler() {
        tracing::error!("信号处理器启动失败: {}", e);
        std::process::exit(1);
    }

    // Run startup checks
    if let Err(e) = run_startup_checks(config).await {
        tracing::error!("Startup checks failed: {}", e);
        std::process::exit(1);
    }

    // 持久化：显式构建、注入，进程退出时随连接池一并关闭
    let users = match UserStore::connect_sqlite(&config.storage.sqlite_path, config.storage.sqlite_wal)
        .await
    {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!("SQLite 初始化失败: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = users.init_schema().await {
        tracing::error!("Schema 初始化失败: {}", e);
        std::process::exit(1);
    }
    let generations = Arc::new(GenerationStore::new(users.pool.clone()));

    // 上游客户端
    let gemini = match GeminiClient::new(&config.gemini) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            tracing::error!("Gemini client init failed: {}", e);
            std::process::exit(1);
        }
    };
    let image_host = ImageHostClient::from_config(&config.image_host).map(Arc::new);
    if image_host.is_none() {
        tracing::info!("未配置图床，生成结果将内联存储");
    }

    let service = Arc::new(GenerationService::new(
        users.clone(),
        generations.clone(),
        gemini,
        image_host,
    ));

    let app_state = AppState {
        users: users.clone(),
        generations,
        service,
    };

    // 每日额度清零任务
    tokio::spawn(run_daily_quota_reset(users.clone(), config.quota.clone()));

    // Routes
    let api_router = Router::<AppState>::new()
        .merge(create_account_router())
        .merge(create_generation_router());

    let mut app = Router::<AppState>::new()
        .route("/health", get(health_check))
        .nest(&config.api.prefix, api_router)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(app_state);

    // 请求追踪 ID（最外层，保证错误响应能带上）
    app = app.layer(axum::middleware::from_fn(request_id::request_id_middleware));

    // CORS（按配置启用）
    if let Some(cors_layer) = cors::build_cors_layer(&config.cors) {
        app = app.layer(cors_layer);
    }

    // 响应压缩：内联 base64 图片与 JSON 均受益
    app = app.layer(CompressionLayer::new());

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Bind address failed {}: {}", addr, e);
            std::process::exit(1);
        });

    tracing::info!("Server: http://{}", addr);
    tracing::info!("Docs: http://{}/docs", addr);
    tracing::info!("Health: http://{}/health", addr);
    tracing::info!("Generate API: http://{}{}/images/generate", addr, config.api.prefix);

    // 启动服务器并等待优雅退出信号
    let shutdown_timeout = config.shutdown.timeout_duration();
    let graceful = axum::serve(listener, app).with_graceful_shutdown(async move {
        let reason = shutdown_manager.wait_for_shutdown().await;
        tracing::info!("接收到退出信号: {:?}，开始优雅关闭HTTP服务器...", reason);
    });

    if let Err(e) = graceful.await {
        tracing::error!("服务器运行错误: {}", e);
        std::process::exit(1);
    }

    // 在途请求已全部完成，此时再关闭连接池
    match tokio::time::timeout(shutdown_timeout, users.pool.close()).await {
        Ok(_) => tracing::info!("SQLite 连接池已关闭"),
        Err(_) => tracing::warn!("连接池关闭超时，强制退出"),
    }

    tracing::info!("服务器已优雅关闭");
}

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as base64_engine;
use image::GenericImageView;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use lumen_backend::features::account::credential::encrypt_credential;
use lumen_backend::features::account::storage::UserStore;
use lumen_backend::features::generation::models::GenerateRequest;
use lumen_backend::features::generation::provider::GeminiClient;
use lumen_backend::features::generation::service::GenerationService;
use lumen_backend::features::generation::storage::GenerationStore;
use lumen_backend::{AppConfig, AppError};

/// 上游桩：记录收到的 (api_key, 请求体)，按密钥决定应答。
struct StubState {
    requests: Mutex<Vec<(String, Value)>>,
    ok_body: String,
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn handle_conn(mut socket: tokio::net::TcpStream, state: Arc<StubState>) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];

    // 读完请求头
    let header_end = loop {
        let n = match socket.read(&mut tmp).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers_txt = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let content_length: usize = headers_txt
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);
    let api_key = headers_txt
        .lines()
        .find_map(|l| l.strip_prefix("x-goog-api-key:"))
        .map(|v| v.trim().to_string())
        .unwrap_or_default();

    // 读完请求体
    while buf.len() < header_end + content_length {
        let n = match socket.read(&mut tmp).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&tmp[..n]);
    }
    let body: Value =
        serde_json::from_slice(&buf[header_end..header_end + content_length]).unwrap_or(Value::Null);
    state.requests.lock().unwrap().push((api_key.clone(), body));

    let (status_line, resp_body) = if api_key == "bad-own-key" {
        (
            "HTTP/1.1 400 Bad Request",
            r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT"}}"#
                .to_string(),
        )
    } else {
        ("HTTP/1.1 200 OK", state.ok_body.clone())
    };
    let resp = format!(
        "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{resp_body}",
        resp_body.len()
    );
    let _ = socket.write_all(resp.as_bytes()).await;
}

async fn spawn_stub_provider(state: Arc<StubState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(v) => v,
                Err(_) => break,
            };
            let state = state.clone();
            tokio::spawn(handle_conn(socket, state));
        }
    });
    addr
}

fn tiny_png_b64() -> String {
    let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([30, 30, 30, 255]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .expect("encode png");
    base64_engine.encode(out)
}

fn gen_req(prompt: &str) -> GenerateRequest {
    GenerateRequest {
        prompt: prompt.to_string(),
        temperature: Some(1.0),
        seed: None,
        width: Some(1024),
        height: Some(1024),
        reference_image: None,
    }
}

#[tokio::test]
async fn end_to_end_generation_flow() {
    let ok_body = format!(
        r#"{{"candidates":[{{"content":{{"parts":[{{"inlineData":{{"mimeType":"image/png","data":"{}"}}}}]}}}}]}}"#,
        tiny_png_b64()
    );
    let stub = Arc::new(StubState {
        requests: Mutex::new(Vec::new()),
        ok_body,
    });
    let addr = spawn_stub_provider(stub.clone()).await;

    let mut cfg = AppConfig::default();
    cfg.gemini.base_url = format!("http://{addr}");
    cfg.gemini.default_api_key = "shared-test-key".to_string();
    cfg.gemini.timeout_secs = 5;
    cfg.credentials.secret = "master-secret".to_string();
    cfg.quota.daily_limit = 2;
    AppConfig::init_global_with(cfg);

    let mut db = std::env::temp_dir();
    db.push(format!("lumen_test_flow_{}.db", uuid::Uuid::new_v4().simple()));
    let users = Arc::new(
        UserStore::connect_sqlite(&db.to_string_lossy(), false)
            .await
            .unwrap(),
    );
    users.init_schema().await.unwrap();
    let generations = Arc::new(GenerationStore::new(users.pool.clone()));
    let gemini = Arc::new(GeminiClient::new(&AppConfig::global().gemini).unwrap());
    let service = GenerationService::new(users.clone(), generations.clone(), gemini, None);

    // 未同步的用户直接 404，不触发上游调用
    let err = service.generate("ghost", gen_req("sunset")).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(stub.requests.lock().unwrap().len(), 0);

    let now = chrono::Utc::now().to_rfc3339();
    let user = users
        .upsert_on_sync("sub_1", "a@example.com", &now)
        .await
        .unwrap();

    // 第一次生成：共享密钥、1:1 提示词、记录落盘、计数 +1
    let resp = service.generate("sub_1", gen_req("sunset")).await.unwrap();
    assert_eq!(resp.images.len(), 1);
    let bytes = base64_engine.decode(&resp.images[0].data).unwrap();
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!(decoded.dimensions(), (1024, 1024));

    let record = generations
        .find_for_user(&resp.record_id, user.id)
        .await
        .unwrap()
        .expect("record persisted");
    assert_eq!(record.status, "completed");
    assert!(record.image_data.is_some(), "无图床时内联存储");
    assert!(record.image_url.is_none());

    let u = users.find_by_subject("sub_1").await.unwrap().unwrap();
    assert_eq!(u.daily_generation_count, 1);
    assert_eq!(u.lifetime_generation_count, 1);
    assert!(u.last_generation_date.is_some());

    // 发给上游的提示词包含比例标签与两处精确尺寸
    {
        let reqs = stub.requests.lock().unwrap();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].0, "shared-test-key");
        let prompt = reqs[0].1["contents"][0]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(prompt.contains("sunset"));
        assert!(prompt.contains("1:1"));
        assert_eq!(prompt.matches("1024×1024").count(), 2);
        assert_eq!(reqs[0].1["generationConfig"]["temperature"], 1.0);
    }

    // 第二次成功；第三次在调用上游之前就被额度拦下
    service.generate("sub_1", gen_req("moonrise")).await.unwrap();
    let err = service.generate("sub_1", gen_req("noon")).await.unwrap_err();
    assert!(matches!(err, AppError::QuotaExceeded(_)));
    assert_eq!(stub.requests.lock().unwrap().len(), 2);

    // 自备密钥被上游拒绝：清除 + InvalidCredential，不静默换共享密钥重试
    let enc = encrypt_credential("master-secret", "bad-own-key").unwrap();
    users.set_credential("sub_1", &enc, &now).await.unwrap();
    let err = service.generate("sub_1", gen_req("dawn")).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidCredential(_)));
    let u = users.find_by_subject("sub_1").await.unwrap().unwrap();
    assert!(!u.has_own_credential, "失效密钥应被自动清除");
    assert_eq!(stub.requests.lock().unwrap().len(), 3);

    // 密钥清除后回到共享额度：当日已用完，仍被拒
    let err = service.generate("sub_1", gen_req("dusk")).await.unwrap_err();
    assert!(matches!(err, AppError::QuotaExceeded(_)));
}

use lumen_backend::features::account::storage::UserStore;
use lumen_backend::features::generation::models::GenerationRecord;
use lumen_backend::features::generation::storage::GenerationStore;

fn scratch_db(name: &str) -> String {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "lumen_test_{}_{}.db",
        name,
        uuid::Uuid::new_v4().simple()
    ));
    path.to_string_lossy().to_string()
}

async fn setup(name: &str) -> (UserStore, GenerationStore, i64) {
    let users = UserStore::connect_sqlite(&scratch_db(name), false)
        .await
        .unwrap();
    users.init_schema().await.unwrap();
    let now = chrono::Utc::now().to_rfc3339();
    let user = users
        .upsert_on_sync("sub_1", "a@example.com", &now)
        .await
        .unwrap();
    let generations = GenerationStore::new(users.pool.clone());
    (users, generations, user.id)
}

fn record(id: &str, user_id: i64, created_at: &str) -> GenerationRecord {
    GenerationRecord {
        id: id.to_string(),
        user_id,
        instruction: "sunset over water".to_string(),
        is_edit: false,
        temperature: Some(1.0),
        seed: Some(42),
        width: Some(1024),
        height: Some(1024),
        image_url: None,
        image_data: Some("QUJD".to_string()),
        image_mime: Some("image/png".to_string()),
        status: "completed".to_string(),
        created_at: created_at.to_string(),
    }
}

#[tokio::test]
async fn insert_then_read_back() {
    let (_users, generations, user_id) = setup("roundtrip").await;
    let now = chrono::Utc::now().to_rfc3339();
    generations.insert(&record("g1", user_id, &now)).await.unwrap();

    let got = generations.find_for_user("g1", user_id).await.unwrap().unwrap();
    assert_eq!(got.instruction, "sunset over water");
    assert_eq!(got.width, Some(1024));
    assert_eq!(got.image_data.as_deref(), Some("QUJD"));
    assert!(got.image_url.is_none());
    assert_eq!(got.status, "completed");
}

#[tokio::test]
async fn list_is_newest_first_with_paging() {
    let (_users, generations, user_id) = setup("paging").await;
    for i in 0..5 {
        let ts = format!("2025-06-01T00:0{i}:00Z");
        generations
            .insert(&record(&format!("g{i}"), user_id, &ts))
            .await
            .unwrap();
    }

    let page = generations.list_for_user(user_id, 2, 0).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].id, "g4");
    assert_eq!(page[1].id, "g3");

    let page = generations.list_for_user(user_id, 2, 4).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, "g0");
}

#[tokio::test]
async fn ownership_guards_read_and_delete() {
    let (users, generations, user_id) = setup("ownership").await;
    let now = chrono::Utc::now().to_rfc3339();
    let other = users
        .upsert_on_sync("sub_2", "b@example.com", &now)
        .await
        .unwrap();
    generations.insert(&record("g1", user_id, &now)).await.unwrap();

    // 他人的记录读不到、删不掉
    assert!(generations.find_for_user("g1", other.id).await.unwrap().is_none());
    assert!(!generations.delete_for_user("g1", other.id).await.unwrap());

    // 本人可以删除；账户不受影响
    assert!(generations.delete_for_user("g1", user_id).await.unwrap());
    assert!(users.find_by_subject("sub_1").await.unwrap().is_some());
}

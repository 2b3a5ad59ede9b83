use std::path::Path;

use sqlx::{ConnectOptions, SqlitePool, sqlite::SqliteConnectOptions};

use crate::error::AppError;

use super::models::UserAccount;

/// 用户账户存储。
///
/// 同一个 SQLite 连接池由用户表与生成记录表共享；
/// schema 统一在这里初始化。
#[derive(Clone)]
pub struct UserStore {
    pub pool: SqlitePool,
}

impl UserStore {
    pub async fn connect_sqlite(path: &str, wal: bool) -> Result<Self, AppError> {
        // foreign_keys 走连接选项：池里每条连接都要生效（级联删除依赖它）。
        let opt = SqliteConnectOptions::new()
            .filename(Path::new(path))
            .create_if_missing(true)
            .foreign_keys(true)
            .log_statements(tracing::log::LevelFilter::Off);
        let pool = SqlitePool::connect_with(opt)
            .await
            .map_err(|e| AppError::Internal(format!("sqlite connect: {e}")))?;
        if wal {
            sqlx::query("PRAGMA journal_mode=WAL;")
                .execute(&pool)
                .await
                .ok();
        }
        sqlx::query("PRAGMA synchronous=NORMAL;")
            .execute(&pool)
            .await
            .ok();
        Ok(Self { pool })
    }

    pub async fn init_schema(&self) -> Result<(), AppError> {
        let ddl = r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            own_credential TEXT,
            has_own_credential INTEGER NOT NULL DEFAULT 0,
            lifetime_generation_count INTEGER NOT NULL DEFAULT 0,
            daily_generation_count INTEGER NOT NULL DEFAULT 0,
            last_generation_date TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_users_has_own_credential ON users(has_own_credential);

        CREATE TABLE IF NOT EXISTS generations (
            id TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            instruction TEXT NOT NULL,
            is_edit INTEGER NOT NULL DEFAULT 0,
            temperature REAL,
            seed INTEGER,
            width INTEGER,
            height INTEGER,
            image_url TEXT,
            image_data TEXT,
            image_mime TEXT,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_generations_user_created ON generations(user_id, created_at DESC);
        "#;
        sqlx::query(ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("init schema: {e}")))?;
        Ok(())
    }

    pub async fn find_by_subject(&self, subject: &str) -> Result<Option<UserAccount>, AppError> {
        let row = sqlx::query_as::<_, UserAccount>("SELECT * FROM users WHERE subject = ?1")
            .bind(subject)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// 首次同步时建行；已存在则仅刷新邮箱。
    pub async fn upsert_on_sync(
        &self,
        subject: &str,
        email: &str,
        now_rfc3339: &str,
    ) -> Result<UserAccount, AppError> {
        sqlx::query(
            r#"
            INSERT INTO users(subject, email, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT(subject) DO UPDATE SET
                email = excluded.email,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(subject)
        .bind(email)
        .bind(now_rfc3339)
        .execute(&self.pool)
        .await?;

        self.find_by_subject(subject)
            .await?
            .ok_or_else(|| AppError::Internal("账户同步后读取失败".into()))
    }

    /// 写入加密后的自备密钥；派生标志与密钥字段在同一条 UPDATE 内保持一致。
    pub async fn set_credential(
        &self,
        subject: &str,
        encrypted: &str,
        now_rfc3339: &str,
    ) -> Result<bool, AppError> {
        let res = sqlx::query(
            "UPDATE users SET own_credential = ?2, has_own_credential = 1, updated_at = ?3 WHERE subject = ?1",
        )
        .bind(subject)
        .bind(encrypted)
        .bind(now_rfc3339)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// 清除自备密钥（用户主动删除，或上游判定密钥无效后的自动降级）。
    pub async fn clear_credential(
        &self,
        subject: &str,
        now_rfc3339: &str,
    ) -> Result<bool, AppError> {
        let res = sqlx::query(
            "UPDATE users SET own_credential = NULL, has_own_credential = 0, updated_at = ?2 WHERE subject = ?1",
        )
        .bind(subject)
        .bind(now_rfc3339)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// 共享密钥生成成功：写入新的当日计数与时间戳，累计次数 +1。
    ///
    /// 新的当日计数由 quota 模块按 FreshToday/StaleOrNone 规则算好传入，
    /// 这里只做单条 UPDATE 落盘。
    pub async fn record_shared_success(
        &self,
        subject: &str,
        new_daily_count: i64,
        now_rfc3339: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE users SET
                daily_generation_count = ?2,
                last_generation_date = ?3,
                lifetime_generation_count = lifetime_generation_count + 1,
                updated_at = ?3
            WHERE subject = ?1
            "#,
        )
        .bind(subject)
        .bind(new_daily_count)
        .bind(now_rfc3339)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// 自备密钥生成成功：只累计 lifetime，不触碰当日计数与时间戳。
    pub async fn record_own_success(
        &self,
        subject: &str,
        now_rfc3339: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE users SET
                lifetime_generation_count = lifetime_generation_count + 1,
                updated_at = ?2
            WHERE subject = ?1
            "#,
        )
        .bind(subject)
        .bind(now_rfc3339)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// 每日批量清零：仅作用于没有自备密钥的用户。
    ///
    /// 幂等：同一天跑两次只是把已为零的计数再清一次。
    pub async fn reset_daily_counters(&self, now_rfc3339: &str) -> Result<u64, AppError> {
        let res = sqlx::query(
            r#"
            UPDATE users SET
                daily_generation_count = 0,
                last_generation_date = NULL,
                updated_at = ?1
            WHERE has_own_credential = 0
            "#,
        )
        .bind(now_rfc3339)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    /// 删除账户；生成记录经外键级联一并删除。
    pub async fn delete_by_subject(&self, subject: &str) -> Result<bool, AppError> {
        let res = sqlx::query("DELETE FROM users WHERE subject = ?1")
            .bind(subject)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

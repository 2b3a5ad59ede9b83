use sqlx::SqlitePool;

use crate::error::AppError;

use super::models::GenerationRecord;

/// 生成记录存储；与用户表共用同一个连接池。
#[derive(Clone)]
pub struct GenerationStore {
    pub pool: SqlitePool,
}

impl GenerationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, record: &GenerationRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO generations(
                id, user_id, instruction, is_edit, temperature, seed,
                width, height, image_url, image_data, image_mime, status, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&record.id)
        .bind(record.user_id)
        .bind(&record.instruction)
        .bind(record.is_edit)
        .bind(record.temperature)
        .bind(record.seed)
        .bind(record.width)
        .bind(record.height)
        .bind(&record.image_url)
        .bind(&record.image_data)
        .bind(&record.image_mime)
        .bind(&record.status)
        .bind(&record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// 按创建时间倒序分页列出某用户的记录。
    pub async fn list_for_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<GenerationRecord>, AppError> {
        let rows = sqlx::query_as::<_, GenerationRecord>(
            r#"
            SELECT * FROM generations
            WHERE user_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// 带属主校验的单条读取：只返回属于该用户的记录。
    pub async fn find_for_user(
        &self,
        id: &str,
        user_id: i64,
    ) -> Result<Option<GenerationRecord>, AppError> {
        let row = sqlx::query_as::<_, GenerationRecord>(
            "SELECT * FROM generations WHERE id = ?1 AND user_id = ?2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// 带属主校验的删除；删除记录不影响账户。
    pub async fn delete_for_user(&self, id: &str, user_id: i64) -> Result<bool, AppError> {
        let res = sqlx::query("DELETE FROM generations WHERE id = ?1 AND user_id = ?2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

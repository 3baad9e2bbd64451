//! Schema 初始化子模块
//!
//! ## 职责
//! - 创建/迁移 `history` 表结构与索引
//! - 设置 SQLite 运行参数（WAL、busy_timeout）
//! - v2 迁移：新增 `content_hash` 列并为旧数据回填哈希
//!
//! ## 输入/输出
//! - 输入：`&Connection`
//! - 输出：`Result<(), AppError>`
//!
//! ## 错误语义
//! - DDL 或回填失败统一映射为 `AppError::Persistence`

use rusqlite::{params, Connection};

use crate::error::AppError;

const SCHEMA_VERSION: i64 = 2;
const BACKFILL_BATCH_SIZE: i64 = 500;

fn get_user_version(conn: &Connection) -> Result<i64, AppError> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| AppError::Persistence(format!("读取数据库版本失败: {}", e)))
}

fn set_user_version(conn: &Connection, version: i64) -> Result<(), AppError> {
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))
        .map_err(|e| AppError::Persistence(format!("写入数据库版本失败: {}", e)))
}

fn create_base_tables(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            content_type TEXT NOT NULL,
            primary_data TEXT,
            binary_data BLOB,
            preview TEXT NOT NULL,
            size_bytes INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            is_pinned INTEGER NOT NULL DEFAULT 0 CHECK (is_pinned IN (0, 1)),
            format TEXT NOT NULL DEFAULT '',
            CHECK ((primary_data IS NULL) <> (binary_data IS NULL))
        );
        CREATE INDEX IF NOT EXISTS idx_history_created_at ON history(created_at);
        CREATE INDEX IF NOT EXISTS idx_history_pinned_created ON history(is_pinned, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_history_type_created ON history(content_type, created_at DESC);"
    ).map_err(|e| AppError::Persistence(format!("创建基础表失败: {}", e)))
}

fn add_content_hash_column(conn: &Connection) -> Result<(), AppError> {
    // 列已存在时 ALTER 会报错，忽略即可
    let _ = conn.execute("ALTER TABLE history ADD COLUMN content_hash TEXT", []);

    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_history_type_hash ON history(content_type, content_hash);"
    ).map_err(|e| AppError::Persistence(format!("创建哈希索引失败: {}", e)))
}

/// 为缺少 `content_hash` 的文本记录分批回填哈希
pub(super) fn backfill_content_hashes(conn: &Connection, batch_size: i64) -> Result<usize, AppError> {
    let batch_size = batch_size.max(1);
    let mut updated = 0usize;

    loop {
        let batch: Vec<(i64, String)> = {
            let mut stmt = conn
                .prepare(
                    "SELECT id, primary_data FROM history
                     WHERE content_hash IS NULL AND primary_data IS NOT NULL
                     ORDER BY id ASC LIMIT ?1",
                )
                .map_err(|e| AppError::Persistence(format!("准备哈希回填查询失败: {}", e)))?;
            stmt.query_map(params![batch_size], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(|e| AppError::Persistence(format!("查询哈希回填数据失败: {}", e)))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AppError::Persistence(format!("读取哈希回填数据失败: {}", e)))?
        };

        if batch.is_empty() {
            break;
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| AppError::Persistence(format!("开始哈希回填事务失败: {}", e)))?;
        for (id, text) in &batch {
            tx.execute(
                "UPDATE history SET content_hash = ?1 WHERE id = ?2",
                params![super::history::content_hash(text), id],
            ).map_err(|e| AppError::Persistence(format!("回填哈希失败: {}", e)))?;
        }
        tx.commit()
            .map_err(|e| AppError::Persistence(format!("提交哈希回填事务失败: {}", e)))?;

        updated += batch.len();
    }

    if updated > 0 {
        log::info!("已为 {} 条历史记录回填内容哈希", updated);
    }
    Ok(updated)
}

pub(super) fn initialize_schema(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
        .ok();

    create_base_tables(conn)?;

    let mut version = get_user_version(conn)?;
    if version < 1 {
        set_user_version(conn, 1)?;
        version = 1;
    }

    if version < 2 {
        add_content_hash_column(conn)?;
        backfill_content_hashes(conn, BACKFILL_BATCH_SIZE)?;
        set_user_version(conn, 2)?;
        version = 2;
    }

    if version != SCHEMA_VERSION {
        return Err(AppError::Persistence(format!(
            "数据库版本不匹配: current={}, expected={}",
            version, SCHEMA_VERSION
        )));
    }

    Ok(())
}

//! Work catalog operations
//!
//! Upsert-by-id persistence for voice works. List-valued fields (cast,
//! illustrators, genres) and the track tree are stored as JSON text columns.

use crate::resolver::TrackNode;
use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

/// Persisted catalog row for one voice work
#[derive(Debug, Clone, Serialize)]
pub struct WorkRecord {
    /// Storefront ID (RJ code)
    pub id: String,
    pub title: String,
    pub circle: String,
    pub cast: Vec<String>,
    pub illustrators: Vec<String>,
    pub genres: Vec<String>,
    pub intro: Option<String>,
    pub release_date: Option<String>,
    pub price: Option<i64>,
    pub dl_count: Option<i64>,
    /// Local track tree, absent when the work has no library folder
    pub tracks: Option<Vec<TrackNode>>,
}

/// Insert or update a work. Re-upserting unchanged data leaves a single row
/// with identical content (idempotent refresh).
pub async fn upsert_work(pool: &SqlitePool, work: &WorkRecord) -> Result<()> {
    let tracks_json = work
        .tracks
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("serialize track tree")?;

    sqlx::query(
        r#"
        INSERT INTO works (
            id, title, circle, "cast", illustrators, genres, intro,
            release_date, price, dl_count, tracks, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            circle = excluded.circle,
            "cast" = excluded."cast",
            illustrators = excluded.illustrators,
            genres = excluded.genres,
            intro = excluded.intro,
            release_date = excluded.release_date,
            price = excluded.price,
            dl_count = excluded.dl_count,
            tracks = excluded.tracks,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(&work.id)
    .bind(&work.title)
    .bind(&work.circle)
    .bind(serde_json::to_string(&work.cast)?)
    .bind(serde_json::to_string(&work.illustrators)?)
    .bind(serde_json::to_string(&work.genres)?)
    .bind(&work.intro)
    .bind(&work.release_date)
    .bind(work.price)
    .bind(work.dl_count)
    .bind(tracks_json)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load one work by ID
pub async fn get_work(pool: &SqlitePool, id: &str) -> Result<Option<WorkRecord>> {
    let row = sqlx::query(
        r#"
        SELECT id, title, circle, "cast", illustrators, genres, intro,
               release_date, price, dl_count, tracks
        FROM works
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(row_to_record).transpose()
}

/// Delete one work. Returns whether a row existed.
pub async fn delete_work(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM works WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// All IDs currently persisted, used for the orphan/stored delta
pub async fn list_work_ids(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows = sqlx::query("SELECT id FROM works ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(|row| row.get("id")).collect())
}

/// Paged listing, newest first
pub async fn list_works(pool: &SqlitePool, limit: i64, offset: i64) -> Result<Vec<WorkRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, title, circle, "cast", illustrators, genres, intro,
               release_date, price, dl_count, tracks
        FROM works
        ORDER BY updated_at DESC, id
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(row_to_record).collect()
}

pub async fn count_works(pool: &SqlitePool) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM works")
        .fetch_one(pool)
        .await?;
    Ok(row.get("n"))
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<WorkRecord> {
    let cast: String = row.get("cast");
    let illustrators: String = row.get("illustrators");
    let genres: String = row.get("genres");
    let tracks: Option<String> = row.get("tracks");

    Ok(WorkRecord {
        id: row.get("id"),
        title: row.get("title"),
        circle: row.get("circle"),
        cast: serde_json::from_str(&cast).context("parse cast column")?,
        illustrators: serde_json::from_str(&illustrators).context("parse illustrators column")?,
        genres: serde_json::from_str(&genres).context("parse genres column")?,
        intro: row.get("intro"),
        release_date: row.get("release_date"),
        price: row.get("price"),
        dl_count: row.get("dl_count"),
        tracks: tracks
            .map(|t| serde_json::from_str(&t))
            .transpose()
            .context("parse tracks column")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::TrackKind;

    async fn test_pool() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::init_database_pool(&dir.path().join("koe.db"))
            .await
            .unwrap();
        (dir, pool)
    }

    fn sample_work(id: &str) -> WorkRecord {
        WorkRecord {
            id: id.to_string(),
            title: "テスト作品".to_string(),
            circle: "テスト工房".to_string(),
            cast: vec!["水瀬いのり".to_string()],
            illustrators: vec![],
            genres: vec!["癒し".to_string(), "バイノーラル".to_string()],
            intro: Some("intro".to_string()),
            release_date: Some("2023年08月15日".to_string()),
            price: Some(1100),
            dl_count: Some(42),
            tracks: Some(vec![TrackNode::File {
                name: "01.mp3".to_string(),
                kind: TrackKind::Audio,
                url: "http://localhost/api/media/stream/RJ000001/01.mp3".to_string(),
                download_url: "http://localhost/api/media/download/RJ000001/01.mp3".to_string(),
            }]),
        }
    }

    #[tokio::test]
    async fn test_upsert_round_trip() {
        let (_dir, pool) = test_pool().await;
        upsert_work(&pool, &sample_work("RJ000001")).await.unwrap();

        let loaded = get_work(&pool, "RJ000001").await.unwrap().unwrap();
        assert_eq!(loaded.title, "テスト作品");
        assert_eq!(loaded.cast, vec!["水瀬いのり"]);
        assert_eq!(loaded.genres.len(), 2);
        assert_eq!(loaded.tracks.as_ref().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_twice_keeps_single_row() {
        let (_dir, pool) = test_pool().await;
        upsert_work(&pool, &sample_work("RJ000001")).await.unwrap();

        let mut updated = sample_work("RJ000001");
        updated.title = "改題".to_string();
        upsert_work(&pool, &updated).await.unwrap();

        assert_eq!(count_works(&pool).await.unwrap(), 1);
        let loaded = get_work(&pool, "RJ000001").await.unwrap().unwrap();
        assert_eq!(loaded.title, "改題");
    }

    #[tokio::test]
    async fn test_delete_and_list_ids() {
        let (_dir, pool) = test_pool().await;
        upsert_work(&pool, &sample_work("RJ000002")).await.unwrap();
        upsert_work(&pool, &sample_work("RJ000001")).await.unwrap();

        assert_eq!(
            list_work_ids(&pool).await.unwrap(),
            vec!["RJ000001", "RJ000002"]
        );

        assert!(delete_work(&pool, "RJ000001").await.unwrap());
        assert!(!delete_work(&pool, "RJ000001").await.unwrap());
        assert_eq!(list_work_ids(&pool).await.unwrap(), vec!["RJ000002"]);
    }

    #[tokio::test]
    async fn test_missing_work_is_none() {
        let (_dir, pool) = test_pool().await;
        assert!(get_work(&pool, "RJ999999").await.unwrap().is_none());
    }
}

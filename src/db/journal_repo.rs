use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use daybook_core::models::JournalEntry;

use super::{format_date, parse_date, parse_timestamp, parse_uuid};

pub struct JournalRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct JournalRow {
    id: String,
    date: String,
    title: String,
    body: String,
    mood: Option<i64>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<JournalRow> for JournalEntry {
    type Error = sqlx::Error;

    fn try_from(row: JournalRow) -> Result<Self, Self::Error> {
        Ok(JournalEntry {
            id: parse_uuid(&row.id)?,
            date: parse_date(&row.date)?,
            title: row.title,
            body: row.body,
            mood: row.mood.and_then(|m| u8::try_from(m).ok()),
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

impl JournalRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<JournalEntry>, sqlx::Error> {
        let row: Option<JournalRow> = sqlx::query_as("SELECT * FROM journal_entries WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(JournalEntry::try_from).transpose()
    }

    pub async fn list(&self) -> Result<Vec<JournalEntry>, sqlx::Error> {
        let rows: Vec<JournalRow> =
            sqlx::query_as("SELECT * FROM journal_entries ORDER BY date DESC, created_at DESC")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(JournalEntry::try_from).collect()
    }

    pub async fn upsert(
        conn: &mut SqliteConnection,
        entry: &JournalEntry,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO journal_entries (id, date, title, body, mood, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                date = excluded.date,
                title = excluded.title,
                body = excluded.body,
                mood = excluded.mood,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(entry.id.to_string())
        .bind(format_date(entry.date))
        .bind(&entry.title)
        .bind(&entry.body)
        .bind(entry.mood.map(i64::from))
        .bind(entry.created_at.to_rfc3339())
        .bind(entry.updated_at.to_rfc3339())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn delete(conn: &mut SqliteConnection, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM journal_entries WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_db;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_upsert_and_get_entry() {
        let db = setup_db().await;
        let repo = JournalRepository::new(db.pool.clone());

        let entry = JournalEntry::new(
            NaiveDate::from_ymd_opt(2024, 1, 14).unwrap(),
            "Long walk",
            "Went around the lake twice.",
        )
        .with_mood(4);

        let mut conn = db.pool.acquire().await.unwrap();
        JournalRepository::upsert(&mut conn, &entry).await.unwrap();
        drop(conn);

        let fetched = repo.get_by_id(entry.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Long walk");
        assert_eq!(fetched.body, "Went around the lake twice.");
        assert_eq!(fetched.mood, Some(4));
    }

    #[tokio::test]
    async fn test_list_newest_first_and_delete() {
        let db = setup_db().await;
        let repo = JournalRepository::new(db.pool.clone());
        let mut conn = db.pool.acquire().await.unwrap();

        let older = JournalEntry::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), "Old", "");
        let newer = JournalEntry::new(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(), "New", "");
        JournalRepository::upsert(&mut conn, &older).await.unwrap();
        JournalRepository::upsert(&mut conn, &newer).await.unwrap();

        let titles: Vec<String> = repo.list().await.unwrap().into_iter().map(|e| e.title).collect();
        assert_eq!(titles, vec!["New", "Old"]);

        assert!(JournalRepository::delete(&mut conn, older.id).await.unwrap());
        drop(conn);
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }
}

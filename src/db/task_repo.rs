use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use daybook_core::models::Task;

use super::{format_date, parse_date, parse_field, parse_timestamp, parse_uuid};

pub struct TaskRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    title: String,
    notes: Option<String>,
    due_date: Option<String>,
    priority: String,
    completed: bool,
    completed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<TaskRow> for Task {
    type Error = sqlx::Error;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            id: parse_uuid(&row.id)?,
            title: row.title,
            notes: row.notes,
            due_date: row.due_date.as_deref().map(parse_date).transpose()?,
            priority: parse_field("priority", &row.priority)?,
            completed: row.completed,
            completed_at: row.completed_at.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

impl TaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Task>, sqlx::Error> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Task::try_from).transpose()
    }

    /// Open tasks first, then by due date (undated last).
    pub async fn list(&self) -> Result<Vec<Task>, sqlx::Error> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM tasks ORDER BY completed, due_date IS NULL, due_date, created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Task::try_from).collect()
    }

    pub async fn upsert(conn: &mut SqliteConnection, task: &Task) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, title, notes, due_date, priority, completed, completed_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                notes = excluded.notes,
                due_date = excluded.due_date,
                priority = excluded.priority,
                completed = excluded.completed,
                completed_at = excluded.completed_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(task.id.to_string())
        .bind(&task.title)
        .bind(&task.notes)
        .bind(task.due_date.map(format_date))
        .bind(task.priority.to_string())
        .bind(task.completed)
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Returns false when there was nothing to delete.
    pub async fn delete(conn: &mut SqliteConnection, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

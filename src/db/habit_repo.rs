use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use daybook_core::models::Habit;

use super::{format_date, parse_date, parse_field, parse_timestamp, parse_uuid};

pub struct HabitRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct HabitRow {
    id: String,
    name: String,
    description: Option<String>,
    frequency: String,
    target_per_period: i64,
    archived: bool,
    created_at: String,
    updated_at: String,
}

impl HabitRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Habit>, sqlx::Error> {
        let row: Option<HabitRow> = sqlx::query_as("SELECT * FROM habits WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => self.hydrate_habit(row).await.map(Some),
            None => Ok(None),
        }
    }

    /// Active habits first, then by name.
    pub async fn list(&self) -> Result<Vec<Habit>, sqlx::Error> {
        let rows: Vec<HabitRow> =
            sqlx::query_as("SELECT * FROM habits ORDER BY archived, name COLLATE NOCASE")
                .fetch_all(&self.pool)
                .await?;

        let mut habits = Vec::with_capacity(rows.len());
        for row in rows {
            habits.push(self.hydrate_habit(row).await?);
        }
        Ok(habits)
    }

    /// Writes the habit row and replaces its check-ins.
    pub async fn upsert(conn: &mut SqliteConnection, habit: &Habit) -> Result<(), sqlx::Error> {
        let id = habit.id.to_string();

        sqlx::query(
            r#"
            INSERT INTO habits (id, name, description, frequency, target_per_period, archived, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                frequency = excluded.frequency,
                target_per_period = excluded.target_per_period,
                archived = excluded.archived,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&id)
        .bind(&habit.name)
        .bind(&habit.description)
        .bind(habit.frequency.to_string())
        .bind(i64::from(habit.target_per_period))
        .bind(habit.archived)
        .bind(habit.created_at.to_rfc3339())
        .bind(habit.updated_at.to_rfc3339())
        .execute(&mut *conn)
        .await?;

        sqlx::query("DELETE FROM habit_checkins WHERE habit_id = ?")
            .bind(&id)
            .execute(&mut *conn)
            .await?;

        for date in &habit.check_ins {
            sqlx::query("INSERT OR IGNORE INTO habit_checkins (habit_id, date) VALUES (?, ?)")
                .bind(&id)
                .bind(format_date(*date))
                .execute(&mut *conn)
                .await?;
        }

        Ok(())
    }

    /// Check-ins go with the habit through the cascade.
    pub async fn delete(conn: &mut SqliteConnection, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM habits WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn hydrate_habit(&self, row: HabitRow) -> Result<Habit, sqlx::Error> {
        let dates: Vec<(String,)> =
            sqlx::query_as("SELECT date FROM habit_checkins WHERE habit_id = ? ORDER BY date")
                .bind(&row.id)
                .fetch_all(&self.pool)
                .await?;

        let check_ins = dates
            .iter()
            .map(|(date,)| parse_date(date))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Habit {
            id: parse_uuid(&row.id)?,
            name: row.name,
            description: row.description,
            frequency: parse_field("frequency", &row.frequency)?,
            target_per_period: u32::try_from(row.target_per_period).unwrap_or(1),
            archived: row.archived,
            check_ins,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

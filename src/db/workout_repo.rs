use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use daybook_core::models::{Exercise, WorkoutDay};

use super::{format_date, parse_date, parse_timestamp, parse_uuid};

pub struct WorkoutRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct WorkoutRow {
    id: String,
    date: String,
    title: String,
    notes: Option<String>,
    created_at: String,
    updated_at: String,
}

#[derive(sqlx::FromRow)]
struct ExerciseRow {
    name: String,
    sets: i64,
    reps: i64,
    weight_kg: Option<f64>,
}

impl From<ExerciseRow> for Exercise {
    fn from(row: ExerciseRow) -> Self {
        Exercise {
            name: row.name,
            sets: u32::try_from(row.sets).unwrap_or(0),
            reps: u32::try_from(row.reps).unwrap_or(0),
            weight_kg: row.weight_kg,
        }
    }
}

impl WorkoutRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<WorkoutDay>, sqlx::Error> {
        let row: Option<WorkoutRow> = sqlx::query_as("SELECT * FROM workout_days WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => self.hydrate_workout(row).await.map(Some),
            None => Ok(None),
        }
    }

    /// Most recent first.
    pub async fn list(&self) -> Result<Vec<WorkoutDay>, sqlx::Error> {
        let rows: Vec<WorkoutRow> =
            sqlx::query_as("SELECT * FROM workout_days ORDER BY date DESC, created_at DESC")
                .fetch_all(&self.pool)
                .await?;

        let mut workouts = Vec::with_capacity(rows.len());
        for row in rows {
            workouts.push(self.hydrate_workout(row).await?);
        }
        Ok(workouts)
    }

    /// Writes the workout row and replaces its exercises, keeping their order.
    pub async fn upsert(
        conn: &mut SqliteConnection,
        workout: &WorkoutDay,
    ) -> Result<(), sqlx::Error> {
        let id = workout.id.to_string();

        sqlx::query(
            r#"
            INSERT INTO workout_days (id, date, title, notes, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                date = excluded.date,
                title = excluded.title,
                notes = excluded.notes,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&id)
        .bind(format_date(workout.date))
        .bind(&workout.title)
        .bind(&workout.notes)
        .bind(workout.created_at.to_rfc3339())
        .bind(workout.updated_at.to_rfc3339())
        .execute(&mut *conn)
        .await?;

        sqlx::query("DELETE FROM workout_exercises WHERE workout_id = ?")
            .bind(&id)
            .execute(&mut *conn)
            .await?;

        for (position, exercise) in workout.exercises.iter().enumerate() {
            sqlx::query(
                "INSERT INTO workout_exercises (workout_id, position, name, sets, reps, weight_kg) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(position as i64)
            .bind(&exercise.name)
            .bind(i64::from(exercise.sets))
            .bind(i64::from(exercise.reps))
            .bind(exercise.weight_kg)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }

    pub async fn delete(conn: &mut SqliteConnection, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM workout_days WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn hydrate_workout(&self, row: WorkoutRow) -> Result<WorkoutDay, sqlx::Error> {
        let exercises: Vec<ExerciseRow> = sqlx::query_as(
            "SELECT name, sets, reps, weight_kg FROM workout_exercises WHERE workout_id = ? ORDER BY position",
        )
        .bind(&row.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(WorkoutDay {
            id: parse_uuid(&row.id)?,
            date: parse_date(&row.date)?,
            title: row.title,
            exercises: exercises.into_iter().map(Exercise::from).collect(),
            notes: row.notes,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

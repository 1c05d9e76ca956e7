//! C10: dead-letter queue. Persists undeliverable CloudEvents to
//! `<schema>.dead_letter_queue` via raw `diesel::sql_query`, grounded on the
//! teacher's own `sql_query` + `QueryableByName` pattern for queries diesel's
//! `table!` macro can't express statically.

#![cfg(feature = "database")]

use async_trait::async_trait;
use cdc_core::{CdcError, CloudEvent, DlqWriter};
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sql_types::{BigInt, Integer, Text};
use diesel::{PgConnection, QueryableByName, RunQueryDsl};

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

#[derive(QueryableByName)]
struct PendingCount {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

pub struct DlqStore {
    pool: PgPool,
    schema: String,
}

impl DlqStore {
    /// `schema` names the schema the table lives under
    /// (`digitaltwins_eventing` by default); it is never user input, so
    /// string interpolation into the DDL/DML below is safe. Event data,
    /// sink names, and error messages are always bound as parameters.
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self { pool, schema: schema.into() }
    }

    pub fn ensure_table(&self) -> Result<(), CdcError> {
        let mut conn = self.pool.get()?;
        let ddl = format!(
            r#"
            CREATE SCHEMA IF NOT EXISTS {schema};
            CREATE TABLE IF NOT EXISTS {schema}.dead_letter_queue (
                id BIGSERIAL PRIMARY KEY,
                event_id UUID NOT NULL,
                sink_name TEXT NOT NULL,
                event_type TEXT NOT NULL,
                error_message TEXT NOT NULL,
                attempt_count INT NOT NULL,
                failed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                status TEXT NOT NULL DEFAULT 'pending',
                event_data JSONB NOT NULL
            );
            "#,
            schema = self.schema
        );
        diesel::sql_query(ddl).execute(&mut conn)?;
        Ok(())
    }

    /// Count of rows still in `pending` status, for the `dlq_size` gauge.
    pub fn pending_count(&self) -> Result<i64, CdcError> {
        let mut conn = self.pool.get()?;
        let sql = format!(
            "SELECT COUNT(*) AS count FROM {schema}.dead_letter_queue WHERE status = 'pending'",
            schema = self.schema
        );
        let result: PendingCount = diesel::sql_query(sql).get_result(&mut conn)?;
        Ok(result.count)
    }
}

#[async_trait]
impl DlqWriter for DlqStore {
    async fn persist(
        &self,
        event: &CloudEvent,
        sink_name: &str,
        error_message: &str,
        attempt_count: u32,
    ) -> Result<(), CdcError> {
        let mut conn = self.pool.get()?;
        let event_data = serde_json::to_value(event)?;
        let sql = format!(
            r#"
            INSERT INTO {schema}.dead_letter_queue
                (event_id, sink_name, event_type, error_message, attempt_count, status, event_data)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6)
            "#,
            schema = self.schema
        );
        diesel::sql_query(sql)
            .bind::<diesel::sql_types::Uuid, _>(event.id)
            .bind::<Text, _>(sink_name)
            .bind::<Text, _>(&event.event_type)
            .bind::<Text, _>(error_message)
            .bind::<Integer, _>(attempt_count as i32)
            .bind::<diesel::sql_types::Jsonb, _>(event_data)
            .execute(&mut conn)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    /// Values (event id, sink name, error message, event data) are always
    /// bound as parameters above; only the operator-configured schema name
    /// is ever interpolated directly into SQL text. This checks that
    /// interpolation in isolation, without needing a live pool.
    #[test]
    fn pending_count_query_interpolates_only_the_schema() {
        let schema = "digitaltwins_eventing";
        let sql = format!(
            "SELECT COUNT(*) AS count FROM {schema}.dead_letter_queue WHERE status = 'pending'",
            schema = schema
        );
        assert_eq!(
            sql,
            "SELECT COUNT(*) AS count FROM digitaltwins_eventing.dead_letter_queue WHERE status = 'pending'"
        );
    }
}

//! Change-notification plumbing for `floodwatch`.
//!
//! The `water_readings` table itself is owned by the sensor uploader; this
//! service only installs the insert trigger that feeds `LISTEN/NOTIFY`.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

/// Channel the insert trigger notifies on.
pub const NOTIFY_CHANNEL: &str = "water_readings_insert";

// ---

/// Install or refresh the insert-notification trigger (idempotent).
///
/// Each insert into `water_readings` sends `{"op","table","id"}` as JSON on
/// [`NOTIFY_CHANNEL`]. Safe to call on every startup.
///
/// Errors are propagated if any SQL execution fails, including when the
/// table does not exist yet.
pub async fn install_notify_trigger(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE OR REPLACE FUNCTION floodwatch_notify_water_reading() RETURNS trigger AS $$
        BEGIN
            PERFORM pg_notify(
                'water_readings_insert',
                json_build_object('op', TG_OP, 'table', TG_TABLE_NAME, 'id', NEW.id)::text
            );
            RETURN NEW;
        END;
        $$ LANGUAGE plpgsql;
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        DROP TRIGGER IF EXISTS floodwatch_water_readings_notify ON water_readings;
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER floodwatch_water_readings_notify
            AFTER INSERT ON water_readings
            FOR EACH ROW EXECUTE FUNCTION floodwatch_notify_water_reading();
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

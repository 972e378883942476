use sqlx::{sqlite::SqliteRow, Row};
use switchboard_core::{Appointment, RecordStore, StoreError};

use super::{encode_timestamp, parse_timestamp, RepositoryError};
use crate::DbPool;

pub struct SqlAppointmentStore {
    pool: DbPool,
}

impl SqlAppointmentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RecordStore<Appointment> for SqlAppointmentStore {
    async fn append(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        sqlx::query(
            "INSERT INTO appointments
                (nom, date, heure, numero_mobile, objet_demande, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&appointment.name)
        .bind(&appointment.date)
        .bind(&appointment.time)
        .bind(&appointment.mobile)
        .bind(&appointment.purpose)
        .bind(encode_timestamp(&appointment.timestamp))
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;
        Ok(appointment)
    }

    async fn list_all(&self) -> Result<Vec<Appointment>, StoreError> {
        let rows = sqlx::query(
            "SELECT nom, date, heure, numero_mobile, objet_demande, created_at
             FROM appointments
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let appointments = rows
            .into_iter()
            .map(appointment_from_row)
            .collect::<Result<Vec<_>, RepositoryError>>()?;
        Ok(appointments)
    }
}

fn appointment_from_row(row: SqliteRow) -> Result<Appointment, RepositoryError> {
    Ok(Appointment {
        name: row.try_get("nom")?,
        date: row.try_get("date")?,
        time: row.try_get("heure")?,
        mobile: row.try_get("numero_mobile")?,
        purpose: row.try_get("objet_demande")?,
        timestamp: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

use anyhow::Result;
use rusqlite::Connection;

use crate::models::SensorReading;

/// Accepted readings, kept in an in-memory SQLite database for the lifetime
/// of the sink process. Insertion order is the row id order.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                humidity REAL,
                temperature REAL,
                pressure REAL,
                pm2_5 REAL,
                timestamp TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    pub fn insert(&self, reading: &SensorReading, timestamp: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO readings (humidity, temperature, pressure, pm2_5, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            (
                reading.humidity.map(f64::from),
                reading.temperature.map(f64::from),
                reading.pressure.map(f64::from),
                reading.pm2_5.map(f64::from),
                timestamp,
            ),
        )?;
        Ok(())
    }

    pub fn all(&self) -> Result<Vec<SensorReading>> {
        let mut stmt = self.conn.prepare(
            "SELECT humidity, temperature, pressure, pm2_5, timestamp
             FROM readings ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SensorReading {
                humidity: row.get::<_, Option<f64>>(0)?.map(|v| v as f32),
                temperature: row.get::<_, Option<f64>>(1)?.map(|v| v as f32),
                pressure: row.get::<_, Option<f64>>(2)?.map(|v| v as f32),
                pm2_5: row.get::<_, Option<f64>>(3)?.map(|v| v as f32),
                timestamp: Some(row.get(4)?),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

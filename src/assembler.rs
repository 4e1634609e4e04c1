use crate::models::{Field, SensorReading};

/// Accumulates field updates into the live reading.
///
/// Fields are never cleared: a slot keeps its last value until a newer one
/// arrives, so a snapshot can mix fresh and stale values when one
/// characteristic notifies less often than the others.
#[derive(Debug, Default)]
pub struct ReadingAssembler {
    current: SensorReading,
}

impl ReadingAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_update(&mut self, field: Field, value: f32) {
        self.current.set(field, value);
    }

    pub fn snapshot(&self) -> SensorReading {
        self.current.clone()
    }
}

use uuid::Uuid;

use crate::models::Field;

pub const SENSOR_SERVICE: Uuid = Uuid::from_u128(0x4d89d46f_20c2_4014_9b2f_4c57713f0a1e);
pub const HUMIDITY_CHARACTERISTIC: Uuid = Uuid::from_u128(0x4d89d46f_20c2_4014_9b2f_4c57713f0a1f);
pub const TEMPERATURE_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x4d89d46f_20c2_4014_9b2f_4c57713f0a20);
pub const PRESSURE_CHARACTERISTIC: Uuid = Uuid::from_u128(0x4d89d46f_20c2_4014_9b2f_4c57713f0a21);
pub const PM2_5_CHARACTERISTIC: Uuid = Uuid::from_u128(0x4d89d46f_20c2_4014_9b2f_4c57713f0a22);

/// Map a characteristic to the reading field it carries.
///
/// `None` means the characteristic is unknown to us (e.g. newer firmware);
/// callers drop its notifications.
pub fn route(characteristic: Uuid) -> Option<Field> {
    match characteristic {
        HUMIDITY_CHARACTERISTIC => Some(Field::Humidity),
        TEMPERATURE_CHARACTERISTIC => Some(Field::Temperature),
        PRESSURE_CHARACTERISTIC => Some(Field::Pressure),
        PM2_5_CHARACTERISTIC => Some(Field::Pm2_5),
        _ => None,
    }
}

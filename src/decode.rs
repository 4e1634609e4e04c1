//! Characteristic value decoding.
//!
//! Each characteristic carries a single IEEE-754 `f32`. The peripheral writes
//! the raw bytes of its own float, so by default we read them in host byte
//! order and assume both ends agree.

use serde::Deserialize;

use crate::error::LinkError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Native,
    Little,
    Big,
}

pub const VALUE_LEN: usize = 4;

/// Decode the first four bytes of `data` as an `f32`. Trailing bytes are ignored.
pub fn decode_value(data: &[u8], order: ByteOrder) -> Result<f32, LinkError> {
    let Some(raw) = data.first_chunk::<VALUE_LEN>() else {
        return Err(LinkError::MalformedValue { len: data.len() });
    };
    Ok(match order {
        ByteOrder::Native => f32::from_ne_bytes(*raw),
        ByteOrder::Little => f32::from_le_bytes(*raw),
        ByteOrder::Big => f32::from_be_bytes(*raw),
    })
}

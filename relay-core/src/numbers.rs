//! Lenient number decoding for Gerrit JSON.
//!
//! Gerrit emits patchset numbers, change numbers and vote values as JSON
//! numbers in some versions and as decimal strings in others. Use these with
//! `#[serde(deserialize_with = "…")]`.

use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberRepr {
    Int(i64),
    Text(String),
}

impl NumberRepr {
    fn into_i64<E: serde::de::Error>(self) -> Result<i64, E> {
        match self {
            NumberRepr::Int(n) => Ok(n),
            NumberRepr::Text(s) => {
                let trimmed = s.trim();
                // Vote values may carry an explicit plus sign ("+2").
                let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
                digits
                    .parse()
                    .map_err(|_| E::custom(format!("expected a decimal number, got {s:?}")))
            }
        }
    }
}

pub fn u64_lenient<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let n = NumberRepr::deserialize(deserializer)?.into_i64::<D::Error>()?;
    u64::try_from(n).map_err(|_| serde::de::Error::custom(format!("expected unsigned, got {n}")))
}

pub fn opt_u64_lenient<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(repr) => {
            let n = repr.into_i64::<D::Error>()?;
            u64::try_from(n)
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("expected unsigned, got {n}")))
        }
    }
}

pub fn i32_lenient<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    let n = NumberRepr::deserialize(deserializer)?.into_i64::<D::Error>()?;
    i32::try_from(n).map_err(|_| serde::de::Error::custom(format!("{n} is out of range")))
}

//! JSON helpers used at every file boundary.
//!
//! Big integers (token amounts, fees) are carried as decimal strings on the
//! wire so that consumers with 53-bit number types read them losslessly.
//! Types opt in through [`u128_string`] instead of relying on a global hook.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{QuarryError, Result};

/// Serializes `value` as pretty JSON with a trailing newline.
pub fn to_pretty_string<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut out = serde_json::to_string_pretty(value)?;
    out.push('\n');
    Ok(out)
}

/// Writes `value` to `path`, creating parent directories as needed.
///
/// The whole document is serialized before the file is touched, so a
/// serialization failure never leaves a truncated file behind.
pub fn write_file<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let content = to_pretty_string(value)?;
    if let Some(parent) = path.parent() {
        crate::paths::ensure_dir(parent)?;
    }
    std::fs::write(path, content).map_err(|e| QuarryError::io(path, e))
}

/// Parses a document, reporting any mismatch as `InvalidFormat` of `source`.
pub fn parse_document<T: DeserializeOwned>(content: &str, source: &str) -> Result<T> {
    serde_json::from_str(content).map_err(|e| QuarryError::malformed(source, e.to_string()))
}

/// Reads and parses `path`. Returns `Ok(None)` when the file does not exist.
pub fn read_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_document(&content, &path.display().to_string()).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(QuarryError::io(path, e)),
    }
}

/// Serde adapter writing `u128` as a decimal string and accepting either a
/// string or a JSON number on input.
pub mod u128_string {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        struct U128Visitor;

        impl Visitor<'_> for U128Visitor {
            type Value = u128;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an unsigned integer or a decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
                Ok(u128::from(v))
            }

            fn visit_u128<E: de::Error>(self, v: u128) -> Result<u128, E> {
                Ok(v)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
                u128::try_from(v).map_err(|_| E::custom(format!("negative amount: {v}")))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
                v.trim()
                    .parse::<u128>()
                    .map_err(|_| E::custom(format!("invalid integer string: {v:?}")))
            }
        }

        deserializer.deserialize_any(U128Visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Fee {
        #[serde(with = "u128_string")]
        amount: u128,
        denom: String,
    }

    #[test]
    fn big_integers_are_written_as_strings() {
        let fee = Fee {
            amount: 340_282_366_920_938_463_463_374_607_431_768_211_455,
            denom: "aarch".into(),
        };
        let json = serde_json::to_string(&fee).unwrap();
        assert_eq!(
            json,
            r#"{"amount":"340282366920938463463374607431768211455","denom":"aarch"}"#
        );
        let back: Fee = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fee);
    }

    #[test]
    fn big_integers_accept_numbers() {
        let fee: Fee = serde_json::from_str(r#"{"amount":1000,"denom":"aconst"}"#).unwrap();
        assert_eq!(fee.amount, 1000);
    }

    #[test]
    fn big_integers_reject_garbage() {
        assert!(serde_json::from_str::<Fee>(r#"{"amount":"12ab","denom":"x"}"#).is_err());
        assert!(serde_json::from_str::<Fee>(r#"{"amount":-5,"denom":"x"}"#).is_err());
    }

    #[test]
    fn pretty_string_ends_with_newline() {
        let out = to_pretty_string(&serde_json::json!({"a": 1})).unwrap();
        assert!(out.ends_with("}\n"));
    }

    #[test]
    fn read_missing_file_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let value: Option<serde_json::Value> = read_file(&tmp.path().join("nope.json")).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn unparsable_file_is_invalid_format() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.json");
        std::fs::write(&path, "{ nope").unwrap();
        let err = read_file::<serde_json::Value>(&path).unwrap_err();
        assert!(matches!(err, QuarryError::InvalidFormat { .. }));
    }

    #[test]
    fn write_then_read_creates_parents() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a").join("b").join("doc.json");
        write_file(&path, &serde_json::json!({"k": "v"})).unwrap();
        let value: serde_json::Value = read_file(&path).unwrap().unwrap();
        assert_eq!(value["k"], "v");
    }
}

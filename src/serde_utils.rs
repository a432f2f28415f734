//! Serde helpers for the hex encodings used on the Engine API wire.

/// Quantities encoded as `0x`-prefixed, big-endian hex without leading zeros (e.g. `0x1a`).
pub mod u64_hex_be {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(num: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{:x}", num))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let stripped = s
            .strip_prefix("0x")
            .ok_or_else(|| D::Error::custom(format!("quantity {} is missing 0x prefix", s)))?;
        if stripped.is_empty() {
            return Err(D::Error::custom("quantity must have at least one digit"));
        }
        u64::from_str_radix(stripped, 16)
            .map_err(|e| D::Error::custom(format!("invalid quantity {}: {:?}", s, e)))
    }
}

/// Same as [`u64_hex_be`] for an optional field that may be `null`.
pub mod u64_hex_be_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(transparent)]
    struct Wrapper(#[serde(with = "super::u64_hex_be")] u64);

    pub fn serialize<S>(num: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        num.map(Wrapper).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
    }
}

/// Fixed 8-byte data, used for payload identifiers.
pub mod bytes_8_hex {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    const BYTES_LEN: usize = 8;

    pub fn serialize<S>(bytes: &[u8; BYTES_LEN], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; BYTES_LEN], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let stripped = s.strip_prefix("0x").unwrap_or(&s);
        let decoded = hex::decode(stripped).map_err(|e| D::Error::custom(format!("{:?}", e)))?;
        if decoded.len() != BYTES_LEN {
            return Err(D::Error::custom(format!(
                "expected {} bytes, got {}",
                BYTES_LEN,
                decoded.len()
            )));
        }
        let mut array = [0; BYTES_LEN];
        array.copy_from_slice(&decoded);
        Ok(array)
    }
}

/// Arbitrary-length byte data encoded as `0x`-prefixed hex.
pub mod hex_vec {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let stripped = s
            .strip_prefix("0x")
            .ok_or_else(|| D::Error::custom("hex data is missing 0x prefix"))?;
        hex::decode(stripped).map_err(|e| D::Error::custom(format!("invalid hex: {:?}", e)))
    }
}

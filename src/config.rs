use std::{error::Error, fs, path::PathBuf};

use indexmap::IndexMap;
use serde::{de, Deserialize, Deserializer};
use serde_derive::{Deserialize, Serialize};

use crate::state::Options;

/// Project settings read from `gbasm.toml`; every field may be omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Disables extension keywords, functions and predefines unless a file asks for them.
    pub compatibility: bool,

    pub include: Vec<PathBuf>,

    #[serde(deserialize_with = "deserialize_bases_u8")]
    pub pad: u8,

    pub halt_nop: bool,

    pub optimize_ldh: bool,

    pub max_depth: usize,

    pub max_substitutions: usize,

    #[serde(deserialize_with = "deserialize_bases_u32")]
    pub seed: u32,

    #[serde(deserialize_with = "deserialize_defines")]
    pub define: IndexMap<String, i32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            compatibility: false,
            include: Vec::new(),
            pad: 0x00,
            halt_nop: true,
            optimize_ldh: false,
            max_depth: 64,
            max_substitutions: 1024,
            seed: 0,
            define: IndexMap::new(),
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn Error>> {
        let text = fs::read_to_string(path)
            .map_err(|e| format!("cant read config {}: {e}", path.display()))?;
        Ok(Self::from_toml(&text)?)
    }

    /// Initial entry of the option stack.
    pub fn options(&self) -> Options {
        Options {
            pad: self.pad,
            halt_nop: self.halt_nop,
            optimize_ldh: self.optimize_ldh,
            ..Options::default()
        }
    }
}

/// Integers written as `$hex`, `%binary` or decimal, or as a plain TOML integer.
#[derive(Deserialize)]
#[serde(untagged)]
enum Based {
    Int(i64),
    Text(String),
}

fn parse_based(buf: &str) -> Result<i64, String> {
    let (digits, radix, name) = if let Some(hex) = buf.strip_prefix('$') {
        (hex, 16, "base 16")
    } else if let Some(bin) = buf.strip_prefix('%') {
        (bin, 2, "base 2")
    } else {
        (buf, 10, "base 10")
    };
    i64::from_str_radix(digits, radix).map_err(|e| format!("{buf} is not a valid {name} value: {e}"))
}

fn based<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Based::deserialize(deserializer)? {
        Based::Int(value) => Ok(value),
        Based::Text(buf) => parse_based(&buf).map_err(de::Error::custom),
    }
}

fn deserialize_bases_u8<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = based(deserializer)?;
    u8::try_from(value).map_err(|_| de::Error::custom(format!("{value} does not fit in a byte")))
}

fn deserialize_bases_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = based(deserializer)?;
    u32::try_from(value).map_err(|_| de::Error::custom(format!("{value} does not fit in 32 bits")))
}

fn deserialize_defines<'de, D>(deserializer: D) -> Result<IndexMap<String, i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = IndexMap::<String, Based>::deserialize(deserializer)?;
    let mut map = IndexMap::new();
    for (name, value) in raw {
        let value = match value {
            Based::Int(value) => value,
            Based::Text(buf) => parse_based(&buf).map_err(de::Error::custom)?,
        };
        // $FFFFFFFF style constants wrap into the signed range
        let value = i32::try_from(value)
            .or_else(|_| u32::try_from(value).map(|value| value as i32))
            .map_err(|_| de::Error::custom(format!("{name} = {value} does not fit in 32 bits")))?;
        map.insert(name, value);
    }
    Ok(map)
}

//! Engine identity and accepted flags.

use serde::{Deserialize, Serialize};

/// One command-line-style flag an engine accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagItem {
    /// Flag token as written in the flag string, e.g. `g`
    #[serde(rename = "flagStr")]
    pub flag: String,
    /// Three-letter canonical name, e.g. `GEN`
    #[serde(rename = "ThreeLetterName")]
    pub three_letter_name: String,
    #[serde(rename = "Max")]
    pub max: f64,
    #[serde(rename = "Min")]
    pub min: f64,
    #[serde(rename = "Default")]
    pub default: f64,
}

impl FlagItem {
    pub fn new(
        flag: impl Into<String>,
        three_letter_name: impl Into<String>,
        max: f64,
        min: f64,
        default: f64,
    ) -> Self {
        Self {
            flag: flag.into(),
            three_letter_name: three_letter_name.into(),
            max,
            min,
            default,
        }
    }

    /// Check `Min <= Default <= Max`; NaN bounds never validate.
    pub fn validate(&self) -> Result<(), String> {
        if self.min <= self.default && self.default <= self.max {
            Ok(())
        } else {
            Err(format!(
                "flag `{}` bounds violate min <= default <= max ({} / {} / {})",
                self.flag, self.min, self.default, self.max
            ))
        }
    }
}

/// Identity of an engine plus the flags it understands.
///
/// Always fully populated: bindings that cannot produce every field report
/// a describe failure instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireEngineInfo", try_from = "WireEngineInfo")]
pub struct EngineInfo {
    pub name: String,
    pub version: String,
    pub author: String,
    pub usage: String,
    pub flags: Vec<FlagItem>,
}

impl EngineInfo {
    /// Info carrying only a name; used for engines without a capability query.
    pub fn unnamed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: String::new(),
            author: String::new(),
            usage: String::new(),
            flags: Vec::new(),
        }
    }

    pub fn flag_item_count(&self) -> i32 {
        i32::try_from(self.flags.len()).unwrap_or(i32::MAX)
    }

    pub fn find_flag(&self, flag: &str) -> Option<&FlagItem> {
        self.flags.iter().find(|item| item.flag == flag)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.flags.iter().try_for_each(FlagItem::validate)
    }
}

impl std::fmt::Display for EngineInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

#[derive(Serialize, Deserialize)]
struct WireEngineInfo {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Version")]
    version: String,
    #[serde(rename = "Author")]
    author: String,
    #[serde(rename = "Usage")]
    usage: String,
    #[serde(rename = "FlagItemCount")]
    flag_item_count: i32,
    #[serde(rename = "FlagItem")]
    flag_item: Vec<FlagItem>,
}

impl From<EngineInfo> for WireEngineInfo {
    fn from(info: EngineInfo) -> Self {
        Self {
            flag_item_count: info.flag_item_count(),
            name: info.name,
            version: info.version,
            author: info.author,
            usage: info.usage,
            flag_item: info.flags,
        }
    }
}

impl TryFrom<WireEngineInfo> for EngineInfo {
    type Error = String;

    fn try_from(wire: WireEngineInfo) -> Result<Self, Self::Error> {
        if usize::try_from(wire.flag_item_count).ok() != Some(wire.flag_item.len()) {
            return Err(format!(
                "FlagItemCount is {} but {} flag items were supplied",
                wire.flag_item_count,
                wire.flag_item.len()
            ));
        }
        let info = EngineInfo {
            name: wire.name,
            version: wire.version,
            author: wire.author,
            usage: wire.usage,
            flags: wire.flag_item,
        };
        info.validate()?;
        Ok(info)
    }
}

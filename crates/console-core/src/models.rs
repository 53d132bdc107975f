use std::{fmt, str::FromStr};

use serde::{de::Error as _, Deserialize, Deserializer, Serialize};

use crate::{ConsoleError, ConsoleResult};

/// Placeholder shown for keys that carry no label.
pub const NO_LABEL: &str = "No Label";

/// One HSM slot as reported by the slot listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub slot_index: u32,
    pub slot_hex: String,
    /// Canonical identifier for key queries. The service sends it as a
    /// decimal string; plain numbers are accepted too.
    #[serde(deserialize_with = "number_or_numeric_string")]
    pub slot_decimal: u64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub flags: String,
    #[serde(default)]
    pub hw_version: String,
    #[serde(default)]
    pub fw_version: String,
    #[serde(default)]
    pub serial: String,
    #[serde(default)]
    pub pin_min_max: String,
    #[serde(default = "default_initialized")]
    pub initialized: bool,
}

fn default_initialized() -> bool {
    true
}

impl Slot {
    /// `slot_hex` interpreted as a hexadecimal integer, with or without a `0x` prefix.
    pub fn hex_value(&self) -> Option<u64> {
        parse_hex(&self.slot_hex)
    }

    /// Checks that the hex and decimal identifiers denote the same slot.
    pub fn check_identity(&self) -> ConsoleResult<()> {
        match self.hex_value() {
            Some(value) if value == self.slot_decimal => Ok(()),
            Some(value) => Err(ConsoleError::Transport(format!(
                "slot {} identifier mismatch: hex {} is {value}, decimal is {}",
                self.slot_index, self.slot_hex, self.slot_decimal
            ))),
            None => Err(ConsoleError::Transport(format!(
                "slot {} has malformed hex identifier {:?}",
                self.slot_index, self.slot_hex
            ))),
        }
    }
}

pub(crate) fn parse_hex(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// One key object inside a slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    /// PKCS#11 object identifier. Kept in the textual form the service uses,
    /// numeric identifiers are rendered in decimal.
    #[serde(default, deserialize_with = "identifier_text")]
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default)]
    pub key_type: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub usage: String,
    #[serde(default)]
    pub access: String,
    /// Display index of the owning slot, set by the aggregator only.
    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub slot_index: Option<u32>,
    /// Hex identifier of the owning slot, set by the aggregator only.
    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub slot_hex: Option<String>,
}

impl Key {
    /// Case-insensitive substring match of `verb` against the usage attribute.
    pub fn permits(&self, verb: &str) -> bool {
        self.usage
            .to_ascii_lowercase()
            .contains(&verb.to_ascii_lowercase())
    }

    pub fn has_label(&self) -> bool {
        !self.label.trim().is_empty()
    }

    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            NO_LABEL
        } else {
            &self.label
        }
    }

    /// Copy of this key carrying the owning slot's display metadata.
    pub fn in_slot(mut self, slot: &Slot) -> Self {
        self.slot_index = Some(slot.slot_index);
        self.slot_hex = Some(slot.slot_hex.clone());
        self
    }
}

/// Signature mechanisms the console may request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum SignatureAlgorithm {
    #[serde(rename = "SHA256withRSA")]
    Sha256WithRsa,
    #[default]
    #[serde(rename = "SHA256withECDSA")]
    Sha256WithEcdsa,
}

impl SignatureAlgorithm {
    pub const ALL: [SignatureAlgorithm; 2] = [
        SignatureAlgorithm::Sha256WithRsa,
        SignatureAlgorithm::Sha256WithEcdsa,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha256WithRsa => "SHA256withRSA",
            SignatureAlgorithm::Sha256WithEcdsa => "SHA256withECDSA",
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = ConsoleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        SignatureAlgorithm::ALL
            .into_iter()
            .find(|algo| algo.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| {
                ConsoleError::Validation(format!(
                    "unsupported signature algorithm {value:?} (expected SHA256withRSA or SHA256withECDSA)"
                ))
            })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    pub message: String,
    pub sign_algo: SignatureAlgorithm,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub message: String,
    pub base64_signature: String,
    pub verify_algo: SignatureAlgorithm,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(u64),
    Text(String),
}

fn number_or_numeric_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(value) => Ok(value),
        NumberOrText::Text(text) => text
            .trim()
            .parse::<u64>()
            .map_err(|err| D::Error::custom(format!("invalid numeric identifier {text:?}: {err}"))),
    }
}

fn identifier_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<NumberOrText>::deserialize(deserializer)? {
        Some(NumberOrText::Number(value)) => value.to_string(),
        Some(NumberOrText::Text(text)) => text.trim().to_string(),
        None => String::new(),
    })
}

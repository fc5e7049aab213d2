use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Indicator colors supported by the display firmware.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DisplayColor {
    Off,
    Green,
    Red,
    Amber,
    Blue,
    Purple,
}

impl DisplayColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayColor::Off => "off",
            DisplayColor::Green => "green",
            DisplayColor::Red => "red",
            DisplayColor::Amber => "amber",
            DisplayColor::Blue => "blue",
            DisplayColor::Purple => "purple",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" => Some(DisplayColor::Off),
            "green" => Some(DisplayColor::Green),
            "red" => Some(DisplayColor::Red),
            "amber" => Some(DisplayColor::Amber),
            "blue" => Some(DisplayColor::Blue),
            "purple" => Some(DisplayColor::Purple),
            _ => None,
        }
    }
}

/// The semantic display state sent to a device and echoed back by it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisplayPayload {
    /// Indicator color.
    pub color: DisplayColor,
    /// Whether the indicator blinks.
    pub blink: bool,
}

impl DisplayPayload {
    pub fn new(color: DisplayColor, blink: bool) -> Self {
        Self { color, blink }
    }

    /// Deterministic digest over the semantic payload, used to suppress
    /// redundant transmissions and to correlate device echoes.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.color.as_str().as_bytes());
        hasher.update(if self.blink { b"|1" } else { b"|0" });
        let digest = hasher.finalize();

        digest.iter().take(16).map(|b| format!("{b:02x}")).collect()
    }
}

//! Decoder configuration types
//!
//! Options that shape how frames are turned into decoded events. Everything here
//! is serde-friendly so applications can embed it in their own config files.

use serde::{Deserialize, Serialize};

/// Configuration for the decoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Optional: only decode these specific CAN message IDs
    #[serde(default)]
    pub message_filter: Option<Vec<u32>>,

    /// Whether unknown or filtered frames are emitted as raw frames instead of dropped
    #[serde(default)]
    pub emit_raw_frames: bool,

    /// Whether the formatted value uses the value-description label when one exists
    #[serde(default = "default_true")]
    pub resolve_value_descriptions: bool,

    /// Fixed number of decimals for formatted values (derived from the factor if unset)
    #[serde(default)]
    pub float_precision: Option<usize>,
}

fn default_true() -> bool {
    true
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            message_filter: None,
            emit_raw_frames: false,
            resolve_value_descriptions: true,
            float_precision: None,
        }
    }
}

impl DecoderConfig {
    /// Create a new decoder configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set message filter
    pub fn with_message_filter(mut self, messages: Vec<u32>) -> Self {
        self.message_filter = Some(messages);
        self
    }

    /// Builder method: enable raw frame emission
    pub fn with_raw_frames(mut self, enabled: bool) -> Self {
        self.emit_raw_frames = enabled;
        self
    }

    /// Builder method: enable or disable value-description labels
    pub fn with_value_descriptions(mut self, enabled: bool) -> Self {
        self.resolve_value_descriptions = enabled;
        self
    }

    /// Builder method: fix the number of decimals in formatted values
    pub fn with_float_precision(mut self, decimals: usize) -> Self {
        self.float_precision = Some(decimals);
        self
    }

    /// Check if a message ID should be processed
    pub fn should_process_message(&self, can_id: u32) -> bool {
        match &self.message_filter {
            Some(messages) => messages.contains(&can_id),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_config_builder() {
        let config = DecoderConfig::new()
            .with_message_filter(vec![0x123, 0x456])
            .with_raw_frames(true)
            .with_value_descriptions(false)
            .with_float_precision(2);

        assert_eq!(config.message_filter, Some(vec![0x123, 0x456]));
        assert!(config.emit_raw_frames);
        assert!(!config.resolve_value_descriptions);
        assert_eq!(config.float_precision, Some(2));
    }

    #[test]
    fn test_filter_logic() {
        let config = DecoderConfig::new().with_message_filter(vec![0x123, 0x456]);

        assert!(config.should_process_message(0x123));
        assert!(config.should_process_message(0x456));
        assert!(!config.should_process_message(0x789));
    }

    #[test]
    fn test_no_filters() {
        let config = DecoderConfig::new();
        assert!(config.should_process_message(0x123));
        assert!(config.should_process_message(0xFFFF_FFFF));
    }

    #[test]
    fn test_serde_defaults() {
        let config: DecoderConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, DecoderConfig::default());
        assert!(config.resolve_value_descriptions);
    }
}

//! Voice profiles
//!
//! A profile bundles a user's voice and language preferences for synthesis
//! and recognition. Profiles are validated before they are applied and are
//! replaced wholesale on update (last-write-wins, no history).

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A user's voice and language preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceProfile {
    /// Stable identifier (also the cache key component for synthesis)
    pub id: String,

    /// Human-readable name
    pub display_name: String,

    /// BCP-47 language code (e.g. "en-US")
    pub language: String,

    /// Optional accent hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accent: Option<String>,

    /// Optional gender hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,

    /// Synthesis stability, in [0, 1]
    pub stability: f32,

    /// Synthesis similarity boost, in [0, 1]
    pub similarity: f32,

    /// Synthesis style exaggeration, in [0, 1]
    pub style: f32,

    /// Whether the synthesis engine should boost speaker clarity
    pub speaker_boost: bool,

    /// Speaking rate multiplier, in [0.5, 2.0]
    pub speaking_rate: f32,

    /// Pitch offset, in [-1, 1]
    pub pitch: f32,

    /// Optional wake phrase bound to this profile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wake_phrase: Option<String>,

    /// Wake word activation threshold, in [0, 1]
    pub activation_threshold: f32,
}

impl Default for VoiceProfile {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            display_name: "Default".to_string(),
            language: "en-US".to_string(),
            accent: None,
            gender: None,
            stability: 0.5,
            similarity: 0.75,
            style: 0.0,
            speaker_boost: true,
            speaking_rate: 1.0,
            pitch: 0.0,
            wake_phrase: None,
            activation_threshold: 0.5,
        }
    }
}

impl VoiceProfile {
    /// Validate all field ranges
    ///
    /// Out-of-range values are rejected, never clamped; a profile that fails
    /// validation must never be applied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("profile id must not be empty".to_string()));
        }
        check_range("stability", self.stability, 0.0, 1.0)?;
        check_range("similarity", self.similarity, 0.0, 1.0)?;
        check_range("style", self.style, 0.0, 1.0)?;
        check_range("speaking_rate", self.speaking_rate, 0.5, 2.0)?;
        check_range("pitch", self.pitch, -1.0, 1.0)?;
        check_range("activation_threshold", self.activation_threshold, 0.0, 1.0)?;
        Ok(())
    }
}

/// Check a single field against its documented range
fn check_range(field: &str, value: f32, min: f32, max: f32) -> Result<()> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "{field} must be within [{min}, {max}], got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_is_valid() {
        assert!(VoiceProfile::default().validate().is_ok());
    }

    #[test]
    fn boundary_values_are_valid() {
        let profile = VoiceProfile {
            stability: 0.0,
            similarity: 1.0,
            style: 1.0,
            speaking_rate: 0.5,
            pitch: -1.0,
            activation_threshold: 1.0,
            ..VoiceProfile::default()
        };
        assert!(profile.validate().is_ok());

        let profile = VoiceProfile {
            speaking_rate: 2.0,
            pitch: 1.0,
            ..VoiceProfile::default()
        };
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn rejects_each_out_of_range_field() {
        let cases: Vec<Box<dyn Fn(&mut VoiceProfile)>> = vec![
            Box::new(|p| p.stability = 1.1),
            Box::new(|p| p.stability = -0.1),
            Box::new(|p| p.similarity = 2.0),
            Box::new(|p| p.style = -1.0),
            Box::new(|p| p.speaking_rate = 0.4),
            Box::new(|p| p.speaking_rate = 2.5),
            Box::new(|p| p.pitch = 1.5),
            Box::new(|p| p.pitch = -2.0),
            Box::new(|p| p.activation_threshold = 1.01),
        ];

        for mutate in cases {
            let mut profile = VoiceProfile::default();
            mutate(&mut profile);
            assert!(
                matches!(profile.validate(), Err(Error::Validation(_))),
                "expected validation failure for {profile:?}"
            );
        }
    }

    #[test]
    fn rejects_non_finite_values() {
        let profile = VoiceProfile {
            stability: f32::NAN,
            ..VoiceProfile::default()
        };
        assert!(profile.validate().is_err());
    }

    #[test]
    fn rejects_empty_id() {
        let profile = VoiceProfile {
            id: "  ".to_string(),
            ..VoiceProfile::default()
        };
        assert!(profile.validate().is_err());
    }
}

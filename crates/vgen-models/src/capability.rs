//! Per-model capability table.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::request::{GenerationMode, Resolution};

/// What a single provider model accepts per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ModelCapability {
    /// Provider model id
    pub name: String,
    /// Mode this model serves
    pub mode: GenerationMode,
    /// Supported output resolutions
    pub resolutions: Vec<Resolution>,
    /// Per-call durations in seconds, ascending
    pub durations: Vec<u32>,
    /// Whether the model can generate a soundtrack
    pub supports_audio: bool,
    /// Output frame rate
    pub fps: u32,
}

impl ModelCapability {
    pub fn new(
        name: impl Into<String>,
        mode: GenerationMode,
        resolutions: &[Resolution],
        durations: &[u32],
        supports_audio: bool,
        fps: u32,
    ) -> Self {
        let mut durations = durations.to_vec();
        durations.sort_unstable();
        durations.dedup();

        Self {
            name: name.into(),
            mode,
            resolutions: resolutions.to_vec(),
            durations,
            supports_audio,
            fps,
        }
    }

    pub fn supports_resolution(&self, resolution: Resolution) -> bool {
        self.resolutions.contains(&resolution)
    }

    /// Longest duration a single call may request.
    pub fn max_duration(&self) -> u32 {
        self.durations.last().copied().unwrap_or(0)
    }
}

/// Lookup table of known models plus the default model for each mode.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CapabilityTable {
    models: Vec<ModelCapability>,
    default_t2v: String,
    default_i2v: String,
}

impl CapabilityTable {
    /// Create a table from explicit entries.
    pub fn new(
        models: Vec<ModelCapability>,
        default_t2v: impl Into<String>,
        default_i2v: impl Into<String>,
    ) -> Self {
        Self {
            models,
            default_t2v: default_t2v.into(),
            default_i2v: default_i2v.into(),
        }
    }

    /// The Wanxiang models offered by DashScope.
    pub fn builtin() -> Self {
        use GenerationMode::{I2v, T2v};
        use Resolution::{P1080, P480, P720};

        Self::new(
            vec![
                ModelCapability::new("wan2.5-t2v-preview", T2v, &[P480, P720, P1080], &[5, 10], true, 24),
                ModelCapability::new("wan2.2-t2v-plus", T2v, &[P480, P1080], &[5], false, 30),
                ModelCapability::new("wan2.5-i2v-preview", I2v, &[P480, P720, P1080], &[5, 10], true, 24),
                ModelCapability::new("wan2.2-i2v-flash", I2v, &[P480, P720, P1080], &[5], false, 30),
                ModelCapability::new("wan2.2-i2v-plus", I2v, &[P480, P1080], &[5], false, 30),
                ModelCapability::new("wanx2.1-i2v-turbo", I2v, &[P480, P720], &[3, 4, 5], false, 24),
            ],
            "wan2.5-t2v-preview",
            "wan2.5-i2v-preview",
        )
    }

    /// Override the default model for a mode.
    pub fn with_default(mut self, mode: GenerationMode, model: impl Into<String>) -> Self {
        match mode {
            GenerationMode::T2v => self.default_t2v = model.into(),
            GenerationMode::I2v => self.default_i2v = model.into(),
        }
        self
    }

    pub fn default_model(&self, mode: GenerationMode) -> &str {
        match mode {
            GenerationMode::T2v => &self.default_t2v,
            GenerationMode::I2v => &self.default_i2v,
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelCapability> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Names of all models serving `mode`.
    pub fn models_for(&self, mode: GenerationMode) -> Vec<&str> {
        self.models
            .iter()
            .filter(|m| m.mode == mode)
            .map(|m| m.name.as_str())
            .collect()
    }
}

impl Default for CapabilityTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_defaults_exist() {
        let table = CapabilityTable::builtin();
        for mode in [GenerationMode::T2v, GenerationMode::I2v] {
            let model = table.get(table.default_model(mode)).unwrap();
            assert_eq!(model.mode, mode);
        }
    }

    #[test]
    fn test_durations_sorted() {
        let cap = ModelCapability::new("m", GenerationMode::T2v, &[Resolution::P720], &[10, 5, 10], false, 24);
        assert_eq!(cap.durations, vec![5, 10]);
        assert_eq!(cap.max_duration(), 10);
    }

    #[test]
    fn test_models_for_mode() {
        let table = CapabilityTable::builtin();
        let i2v = table.models_for(GenerationMode::I2v);
        assert_eq!(i2v.len(), 4);
        assert!(i2v.contains(&"wanx2.1-i2v-turbo"));
    }
}

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tilemesh::any_model::ModelKind;
use tilemesh::model::RansacParams;
use tilemesh::spring_mesh::SpringMeshParams;
use tilemesh::tile_configuration::OptimizeParams;

/// Everything the registration run can be tuned with, loadable from JSON.
///
/// Missing sections and fields fall back to their defaults, so
/// `{"ransac": {"max_epsilon": 5.0}}` is a complete configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub model: ModelKind,
    /// Blend the model towards this simpler family.
    pub regularizer: Option<ModelKind>,
    /// Weight of the regularizer, in `[0, 1]`.
    pub lambda: f64,
    pub ransac: RansacParams,
    pub optimize: OptimizeParams,
    pub spring: SpringMeshParams,
    /// Distance decay of the moving least squares weights.
    pub alpha: f64,
    /// Weight tying neighbouring vertex models of the elastic mesh.
    pub coupling: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            model: ModelKind::default(),
            regularizer: None,
            lambda: 0.1,
            ransac: RansacParams::default(),
            optimize: OptimizeParams::default(),
            spring: SpringMeshParams::default(),
            alpha: 1.0,
            coupling: 0.1,
        }
    }
}

pub fn load_config(path: &Path) -> Result<RuntimeConfig, String> {
    let data = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config {}: {e}", path.display()))?;
    serde_json::from_str(&data)
        .map_err(|e| format!("Failed to parse config {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"model": "rigid", "ransac": {"max_epsilon": 5.0}}"#).unwrap();
        assert_eq!(config.model, ModelKind::Rigid);
        assert_eq!(config.ransac.max_epsilon, 5.0);
        assert_eq!(config.ransac.iterations, RansacParams::default().iterations);
        assert_eq!(config.spring, SpringMeshParams::default());
        assert_eq!(config.regularizer, None);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = load_config(Path::new("/nonexistent/tilemesh.json")).unwrap_err();
        assert!(err.starts_with("Failed to read config"));
    }
}

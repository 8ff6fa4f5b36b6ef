use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{PromoGenError, Result};
use crate::prompts::{self, Gender, ProductFormat};

/// Run configuration, read from a JSON file shaped
/// `{ "sizeX": int, "sizeY": int, "user": {"gender": ...}, "format": ... }`.
///
/// The canvas dimensions only affect the compositing stage; generation always
/// renders at the model's native resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(rename = "sizeX")]
    pub size_x: u32,
    #[serde(rename = "sizeY")]
    pub size_y: u32,
    pub user: UserProfile,
    pub format: ProductFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub gender: Gender,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| PromoGenError::FileSystem {
            path: path.to_path_buf(),
            operation: "read run configuration".to_string(),
            source: e,
        })?;
        let config: Self =
            serde_json::from_str(&raw).map_err(|e| PromoGenError::Configuration {
                message: format!("{}: {e}", path.display()),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.size_x == 0 {
            return Err(PromoGenError::validation("sizeX", "must be non-zero"));
        }
        if self.size_y == 0 {
            return Err(PromoGenError::validation("sizeY", "must be non-zero"));
        }
        Ok(())
    }

    /// The prompt the configured (format, gender) pair maps to.
    pub fn prompt(&self) -> &'static str {
        prompts::prompt_for(self.format, self.user.gender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_documented_shape() {
        let config: RunConfig = serde_json::from_str(
            r#"{ "sizeX": 1024, "sizeY": 768, "user": {"gender": "female"}, "format": "pkzn" }"#,
        )
        .unwrap();
        assert_eq!(config.size_x, 1024);
        assert_eq!(config.size_y, 768);
        assert_eq!(config.user.gender, Gender::Female);
        assert_eq!(config.format, ProductFormat::Pkzn);
        assert_eq!(
            config.prompt(),
            "gazprom style, a house with flowers, blue background, (((concept art)))"
        );
    }

    #[test]
    fn rejects_unknown_gender_string() {
        let result = serde_json::from_str::<RunConfig>(
            r#"{ "sizeX": 10, "sizeY": 10, "user": {"gender": "robot"}, "format": "pk" }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_unknown_format_string() {
        let result = serde_json::from_str::<RunConfig>(
            r#"{ "sizeX": 10, "sizeY": 10, "user": {"gender": "male"}, "format": "zz" }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn zero_canvas_dimension_fails_validation() {
        let config: RunConfig = serde_json::from_str(
            r#"{ "sizeX": 0, "sizeY": 10, "user": {"gender": "male"}, "format": "tc" }"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, PromoGenError::Validation { field, .. } if field == "sizeX"));
    }

    #[test]
    fn load_reports_missing_file_with_path() {
        let err = RunConfig::load(Path::new("definitely/not/here.json")).unwrap_err();
        match err {
            PromoGenError::FileSystem { path, .. } => {
                assert_eq!(path, Path::new("definitely/not/here.json"));
            }
            other => panic!("expected filesystem error, got {other:?}"),
        }
    }

    #[test]
    fn load_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "sizeX": 640, "sizeY": 480, "user": {"gender": "male"}, "format": "ac" }"#,
        )
        .unwrap();

        let config = RunConfig::load(&path).unwrap();
        assert_eq!((config.size_x, config.size_y), (640, 480));
        assert_eq!(
            config.prompt(),
            "gazprom style, a car with coins, white background, concept art"
        );
    }
}

use crate::model::artifacts::ModelFormat;
use crate::risk::{RiskBands, SensitivityRange};
use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub artifacts: Artifacts,
    #[serde(default)]
    pub risk: RiskBands,
    #[serde(default)]
    pub sensitivity: SensitivityRange,
    #[serde(default)]
    pub chart: ChartSettings,
    #[serde(default)]
    pub api: ApiSettings,
}

/// Пути к артефактам обучения.
///
/// Относительные пути разрешаются от каталога, в котором лежит файл конфигурации.
#[derive(Debug, Deserialize, Clone)]
pub struct Artifacts {
    pub feature_columns_path: PathBuf,
    pub default_values_path: PathBuf,
    pub model_path: PathBuf,
    #[serde(default = "default_model_format")]
    pub model_format: ModelFormat,
}

fn default_model_format() -> ModelFormat {
    ModelFormat::Json
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChartSettings {
    /// Сколько столбцов показывать (включая агрегированный).
    #[serde(default = "default_max_display")]
    pub max_display: usize,
}

fn default_max_display() -> usize {
    10
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            max_display: default_max_display(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiSettings {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Разрешить CORS для отдельного фронтенда.
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8501".to_string()
}

fn default_enable_cors() -> bool {
    true
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            enable_cors: default_enable_cors(),
        }
    }
}

impl ApiSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .with_context(|| format!("api.listen_addr `{}` is not a socket address", self.listen_addr))
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let mut cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("failed to parse YAML config at {}", path.display()))?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        cfg.artifacts.resolve_relative_to(base_dir);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Загрузить конфиг, если файл существует, иначе вернуть значения по умолчанию.
    ///
    /// Нужен командам, которым артефакты не требуются (например, описанию формы).
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        debug!("Config {} not found, using defaults", path.display());
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(Self::with_artifacts_dir(base_dir.join("../artifacts")))
    }

    /// Конфигурация по умолчанию для артефактов в указанном каталоге.
    pub fn with_artifacts_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            artifacts: Artifacts {
                feature_columns_path: dir.join("feature_columns.json"),
                default_values_path: dir.join("default_values.json"),
                model_path: dir.join("attrition_model.json"),
                model_format: ModelFormat::Json,
            },
            risk: RiskBands::default(),
            sensitivity: SensitivityRange::default(),
            chart: ChartSettings::default(),
            api: ApiSettings::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.risk.validate()?;
        self.sensitivity.validate()?;
        self.chart.validate()?;
        self.api.socket_addr()?;
        Ok(())
    }
}

impl Artifacts {
    fn resolve_relative_to(&mut self, base_dir: &Path) {
        for path in [
            &mut self.feature_columns_path,
            &mut self.default_values_path,
            &mut self.model_path,
        ] {
            if path.is_relative() {
                *path = base_dir.join(&*path);
            }
        }
    }
}

impl ChartSettings {
    fn validate(&self) -> Result<()> {
        ensure!(
            self.max_display >= 2,
            "chart.max_display must be >= 2 to leave room for the aggregated bar (got {})",
            self.max_display
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp_config(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("attrition.yml");
        let mut file = fs::File::create(&path).expect("create config");
        file.write_all(contents.as_bytes()).expect("write temp config");
        path
    }

    #[test]
    fn loads_valid_config() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let path = write_temp_config(
            temp_dir.path(),
            r#"
artifacts:
  feature_columns_path: artifacts/feature_columns.json
  default_values_path: /srv/attrition/default_values.json
  model_path: artifacts/model.onnx
  model_format: onnx
risk:
  low_below: 0.15
  medium_below: 0.4
sensitivity:
  min: 0.1
  max: 0.5
  step: 0.05
  default: 0.3
chart:
  max_display: 12
api:
  listen_addr: "0.0.0.0:9000"
  enable_cors: false
"#,
        );

        let cfg = Config::load(&path).expect("config loads");

        assert_eq!(
            cfg.artifacts.feature_columns_path,
            temp_dir.path().join("artifacts/feature_columns.json")
        );
        assert_eq!(
            cfg.artifacts.default_values_path,
            PathBuf::from("/srv/attrition/default_values.json")
        );
        assert_eq!(cfg.artifacts.model_format, ModelFormat::Onnx);
        assert!((cfg.risk.low_below - 0.15).abs() < f64::EPSILON);
        assert!((cfg.sensitivity.default - 0.3).abs() < f64::EPSILON);
        assert_eq!(cfg.chart.max_display, 12);
        assert!(!cfg.api.enable_cors);
        assert_eq!(cfg.api.socket_addr().unwrap().port(), 9000);
    }

    #[test]
    fn applies_defaults_for_optional_sections() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let path = write_temp_config(
            temp_dir.path(),
            r#"
artifacts:
  feature_columns_path: feature_columns.json
  default_values_path: default_values.json
  model_path: attrition_model.json
"#,
        );

        let cfg = Config::load(&path).expect("config loads");
        assert_eq!(cfg.artifacts.model_format, ModelFormat::Json);
        assert_eq!(cfg.risk, RiskBands::default());
        assert_eq!(cfg.sensitivity, SensitivityRange::default());
        assert_eq!(cfg.chart.max_display, 10);
        assert_eq!(cfg.api.listen_addr, "127.0.0.1:8501");
        assert!(cfg.api.enable_cors);
    }

    #[test]
    fn load_or_default_prefers_existing_file() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let path = write_temp_config(
            temp_dir.path(),
            r#"
artifacts:
  feature_columns_path: feature_columns.json
  default_values_path: default_values.json
  model_path: attrition_model.json
sensitivity:
  min: 0.2
  max: 0.4
  step: 0.1
  default: 0.3
"#,
        );

        let cfg = Config::load_or_default(&path).expect("config loads");
        assert!((cfg.sensitivity.min - 0.2).abs() < f64::EPSILON);
        assert!((cfg.sensitivity.max - 0.4).abs() < f64::EPSILON);

        let missing = Config::load_or_default(temp_dir.path().join("absent.yml"))
            .expect("defaults for a missing file");
        assert_eq!(missing.sensitivity, SensitivityRange::default());
    }

    #[test]
    fn load_or_default_still_rejects_broken_file() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let path = write_temp_config(temp_dir.path(), "artifacts: [not, a, map]\n");
        assert!(Config::load_or_default(&path).is_err());
    }

    #[test]
    fn rejects_invalid_values() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let artifacts = r#"
artifacts:
  feature_columns_path: a.json
  default_values_path: b.json
  model_path: c.json
"#;

        for (section, needle) in [
            ("risk:\n  low_below: 0.5\n  medium_below: 0.3\n", "medium_below"),
            ("chart:\n  max_display: 1\n", "max_display"),
            ("api:\n  listen_addr: \"not an address\"\n", "listen_addr"),
            ("sensitivity:\n  min: 0.4\n  max: 0.2\n", "sensitivity"),
        ] {
            let path = write_temp_config(temp_dir.path(), &format!("{artifacts}{section}"));
            let err = Config::load(&path).expect_err("config must be rejected");
            assert!(
                format!("{err:#}").contains(needle),
                "expected `{needle}` in error: {err:#}"
            );
        }
    }

    #[test]
    fn fails_on_missing_file_or_bad_yaml() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        assert!(Config::load(temp_dir.path().join("missing.yml")).is_err());

        let path = write_temp_config(temp_dir.path(), "artifacts: [1, 2");
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse YAML"));
    }

    #[test]
    fn with_artifacts_dir_is_valid() {
        let cfg = Config::with_artifacts_dir("/opt/attrition");
        assert!(cfg.validate().is_ok());
        assert_eq!(
            cfg.artifacts.model_path,
            PathBuf::from("/opt/attrition/attrition_model.json")
        );
    }
}

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default = "Config::default")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8765
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CaptureConfig {
    #[serde(default = "default_source")]
    pub pose_source: PathBuf,
    #[serde(default = "default_source")]
    pub hand_source: PathBuf,
    #[serde(default = "default_hands_enabled")]
    pub hands_enabled: bool,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            pose_source: default_source(),
            hand_source: default_source(),
            hands_enabled: default_hands_enabled(),
            fps: default_fps(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_source() -> PathBuf {
    PathBuf::from("recordings/session.jsonl")
}
fn default_hands_enabled() -> bool {
    true
}
fn default_fps() -> u32 {
    30
}
fn default_retry_delay_ms() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RulesConfig {
    #[serde(default = "default_velocity_threshold")]
    pub velocity_threshold: f64,
    #[serde(default = "default_max_intensity")]
    pub max_intensity: f64,
    #[serde(default = "default_hand_distance_threshold")]
    pub hand_distance_threshold: f64,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: f64,
    #[serde(default = "default_rune_prompt")]
    pub rune_prompt: String,
    #[serde(default = "default_rune_kind")]
    pub rune_kind: String,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            velocity_threshold: default_velocity_threshold(),
            max_intensity: default_max_intensity(),
            hand_distance_threshold: default_hand_distance_threshold(),
            cooldown_seconds: default_cooldown_seconds(),
            rune_prompt: default_rune_prompt(),
            rune_kind: default_rune_kind(),
        }
    }
}

fn default_velocity_threshold() -> f64 {
    1.5
}
fn default_max_intensity() -> f64 {
    5.0
}
fn default_hand_distance_threshold() -> f64 {
    0.1
}
fn default_cooldown_seconds() -> f64 {
    2.0
}
fn default_rune_prompt() -> String {
    "glowing magical rune symbol, cyan and purple, black background, 8k".to_string()
}
fn default_rune_kind() -> String {
    "rune".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct OrchestratorConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
        }
    }
}

fn default_tick_ms() -> u64 {
    16
}

/// Which cloud backend leads the provider chain.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Pick from the credentials present in the environment.
    Auto,
    Gemini,
    Openai,
    Local,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_public_url_prefix")]
    pub public_url_prefix: String,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_submits_per_minute")]
    pub submits_per_minute: u32,
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    #[serde(default = "default_image_models")]
    pub image_models: Vec<String>,
    #[serde(default = "default_gemini_base_url")]
    pub gemini_base_url: String,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    #[serde(default = "default_openai_size")]
    pub openai_size: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            output_dir: default_output_dir(),
            public_url_prefix: default_public_url_prefix(),
            queue_capacity: default_queue_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            submits_per_minute: default_submits_per_minute(),
            vision_model: default_vision_model(),
            image_models: default_image_models(),
            gemini_base_url: default_gemini_base_url(),
            openai_model: default_openai_model(),
            openai_size: default_openai_size(),
            openai_base_url: default_openai_base_url(),
        }
    }
}

fn default_provider() -> ProviderKind {
    ProviderKind::Auto
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("web/visuals/textures")
}
fn default_public_url_prefix() -> String {
    "visuals/textures".to_string()
}
fn default_queue_capacity() -> usize {
    8
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_submits_per_minute() -> u32 {
    30
}
fn default_vision_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_image_models() -> Vec<String> {
    vec![
        "imagen-4.0-generate-001".to_string(),
        "imagen-4.0-fast-generate-001".to_string(),
        "imagen-3.0-generate-002".to_string(),
    ]
}
fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_openai_model() -> String {
    "dall-e-3".to_string()
}
fn default_openai_size() -> String {
    "1024x1024".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TimeoutsConfig {
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_seconds: u64,
    #[serde(default = "default_http_connect_timeout")]
    pub http_connect_timeout_seconds: u64,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            provider_timeout_seconds: default_provider_timeout(),
            http_connect_timeout_seconds: default_http_connect_timeout(),
            send_timeout_ms: default_send_timeout(),
            shutdown_timeout_ms: default_shutdown_timeout(),
        }
    }
}

impl TimeoutsConfig {
    /// Deadline for one remote provider call. Zero is raised to one second.
    pub fn provider_call_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds.max(1))
    }
}

fn default_provider_timeout() -> u64 {
    60
}
fn default_http_connect_timeout() -> u64 {
    10
}
fn default_send_timeout() -> u64 {
    250
}
fn default_shutdown_timeout() -> u64 {
    3000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            capture: CaptureConfig::default(),
            rules: RulesConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            generation: GenerationConfig::default(),
            timeouts: TimeoutsConfig::default(),
        }
    }
}

/// Load the config from `path`, or from the per-user config directory when
/// no path is given. A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => match get_config_path() {
            Some(p) => p,
            None => {
                tracing::warn!("No config directory available, using defaults");
                return Ok(Config::default());
            }
        },
    };

    if !config_path.exists() {
        tracing::info!("Config file not found at {:?}, using defaults", config_path);
        return Ok(Config::default());
    }

    tracing::info!("Loading config from {:?}", config_path);
    let config_str = std::fs::read_to_string(&config_path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

    let config: Config = toml::from_str(&config_str)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;

    tracing::info!("Config loaded successfully");
    Ok(config)
}

fn get_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("auraflow").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8765);

        assert!(config.capture.hands_enabled);
        assert_eq!(config.capture.fps, 30);
        assert_eq!(config.capture.retry_delay_ms, 10);

        assert_eq!(config.rules.velocity_threshold, 1.5);
        assert_eq!(config.rules.max_intensity, 5.0);
        assert_eq!(config.rules.hand_distance_threshold, 0.1);
        assert_eq!(config.rules.cooldown_seconds, 2.0);
        assert_eq!(
            config.rules.rune_prompt,
            "glowing magical rune symbol, cyan and purple, black background, 8k"
        );
        assert_eq!(config.rules.rune_kind, "rune");

        assert_eq!(config.orchestrator.tick_ms, 16);

        assert_eq!(config.generation.provider, ProviderKind::Auto);
        assert_eq!(config.generation.queue_capacity, 8);
        assert_eq!(config.generation.poll_interval_ms, 1000);
        assert_eq!(config.generation.image_models.len(), 3);
        assert_eq!(config.generation.openai_model, "dall-e-3");

        assert_eq!(config.timeouts.provider_timeout_seconds, 60);
        assert_eq!(config.timeouts.send_timeout_ms, 250);
        assert_eq!(config.timeouts.shutdown_timeout_ms, 3000);
    }

    #[test]
    fn test_config_toml_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();

        assert!(toml_str.contains("[server]"));
        assert!(toml_str.contains("[capture]"));
        assert!(toml_str.contains("[rules]"));
        assert!(toml_str.contains("[orchestrator]"));
        assert!(toml_str.contains("[generation]"));
        assert!(toml_str.contains("[timeouts]"));
    }

    #[test]
    fn test_config_toml_round_trip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_config_with_custom_sections() {
        let toml_str = r#"
            [server]
            port = 9000

            [capture]
            pose_source = "/tmp/pose.jsonl"
            hands_enabled = false

            [rules]
            cooldown_seconds = 5.0

            [generation]
            provider = "openai"
            output_dir = "/tmp/textures"
            queue_capacity = 2
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.capture.pose_source, PathBuf::from("/tmp/pose.jsonl"));
        assert!(!config.capture.hands_enabled);
        assert_eq!(config.rules.cooldown_seconds, 5.0);
        assert_eq!(config.rules.velocity_threshold, 1.5);
        assert_eq!(config.generation.provider, ProviderKind::Openai);
        assert_eq!(config.generation.output_dir, PathBuf::from("/tmp/textures"));
        assert_eq!(config.generation.queue_capacity, 2);
    }

    #[test]
    fn test_config_with_missing_sections_uses_defaults() {
        let toml_str = r#"
            [server]
            host = "0.0.0.0"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.timeouts, TimeoutsConfig::default());
        assert_eq!(config.generation, GenerationConfig::default());
    }

    #[test]
    fn test_config_with_invalid_provider() {
        let toml_str = r#"
            [generation]
            provider = "midjourney"
        "#;
        let result: Result<Config, _> = toml::from_str(toml_str);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_with_invalid_types() {
        let toml_str = r#"
            [server]
            port = "not_a_number"
        "#;
        let result: Result<Config, _> = toml::from_str(toml_str);
        assert!(result.is_err());
    }

    #[test]
    fn test_provider_call_timeout_never_zero() {
        let mut timeouts = TimeoutsConfig::default();
        assert_eq!(timeouts.provider_call_timeout(), Duration::from_secs(60));

        timeouts.provider_timeout_seconds = 0;
        assert_eq!(timeouts.provider_call_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[orchestrator]\ntick_ms = 33").unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.orchestrator.tick_ms, 33);
    }

    #[test]
    fn test_load_config_rejects_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "invalid toml content [unclosed").unwrap();
        assert!(load_config(Some(file.path())).is_err());
    }
}

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// How much of an audit entry survives at rest, see the audit logger.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyMode {
    Full,
    Redacted,
    Minimal,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_surrealdb_address")]
    pub surrealdb_address: String,
    #[serde(default = "default_surrealdb_credential")]
    pub surrealdb_username: String,
    #[serde(default = "default_surrealdb_credential")]
    pub surrealdb_password: String,
    #[serde(default = "default_surrealdb_namespace")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_surrealdb_database")]
    pub surrealdb_database: String,

    /// OpenAI-compatible endpoint of the locally hosted embedding model.
    #[serde(default = "default_embedder_base_url")]
    pub embedder_base_url: String,
    #[serde(default = "default_local_api_key")]
    pub embedder_api_key: String,
    #[serde(default = "default_embedder_model")]
    pub embedder_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,

    /// OpenAI-compatible endpoint of the locally hosted generation model.
    #[serde(default = "default_generator_base_url")]
    pub generator_base_url: String,
    #[serde(default = "default_local_api_key")]
    pub generator_api_key: String,
    #[serde(default = "default_generator_model")]
    pub generator_model: String,

    /// EMR record source. Both keys are required by the upstream token
    /// endpoint.
    #[serde(default)]
    pub record_source_base_url: String,
    #[serde(default)]
    pub record_source_client_id: String,
    #[serde(default)]
    pub record_source_client_secret: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_audit_log_dir")]
    pub audit_log_dir: String,
    #[serde(default = "default_privacy_mode")]
    pub privacy_mode: PrivacyMode,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[serde(default = "default_vector_index_path")]
    pub vector_index_path: String,
}

fn default_surrealdb_address() -> String {
    "ws://127.0.0.1:8000".to_string()
}

fn default_surrealdb_credential() -> String {
    "root".to_string()
}

fn default_surrealdb_namespace() -> String {
    "anamnesis".to_string()
}

fn default_surrealdb_database() -> String {
    "anamnesis".to_string()
}

fn default_embedder_base_url() -> String {
    "http://127.0.0.1:8089/v1".to_string()
}

fn default_local_api_key() -> String {
    // Local OpenAI-compatible servers accept any non-empty key.
    "local".to_string()
}

fn default_embedder_model() -> String {
    "nomic-embed-text-v1.5".to_string()
}

fn default_embedding_dimensions() -> u32 {
    768
}

fn default_generator_base_url() -> String {
    "http://127.0.0.1:8088/v1".to_string()
}

fn default_generator_model() -> String {
    "medgemma-4b-it".to_string()
}

fn default_http_port() -> u16 {
    3000
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_audit_log_dir() -> String {
    "./data/audit".to_string()
}

fn default_privacy_mode() -> PrivacyMode {
    PrivacyMode::Full
}

fn default_query_timeout_ms() -> u64 {
    6000
}

fn default_vector_index_path() -> String {
    "./data/vector_index".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            surrealdb_address: default_surrealdb_address(),
            surrealdb_username: default_surrealdb_credential(),
            surrealdb_password: default_surrealdb_credential(),
            surrealdb_namespace: default_surrealdb_namespace(),
            surrealdb_database: default_surrealdb_database(),
            embedder_base_url: default_embedder_base_url(),
            embedder_api_key: default_local_api_key(),
            embedder_model: default_embedder_model(),
            embedding_dimensions: default_embedding_dimensions(),
            generator_base_url: default_generator_base_url(),
            generator_api_key: default_local_api_key(),
            generator_model: default_generator_model(),
            record_source_base_url: String::new(),
            record_source_client_id: String::new(),
            record_source_client_secret: String::new(),
            http_port: default_http_port(),
            data_dir: default_data_dir(),
            audit_log_dir: default_audit_log_dir(),
            privacy_mode: default_privacy_mode(),
            query_timeout_ms: default_query_timeout_ms(),
            vector_index_path: default_vector_index_path(),
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

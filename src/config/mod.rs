use anyhow::{Context, Result};
use config::{builder::DefaultState, ConfigBuilder, Environment};
use serde::Deserialize;
use std::env;

use crate::ml::gemini_embedder::{DEFAULT_BASE_URL, DEFAULT_MODEL_NAME};
use crate::services::deezer::{DEFAULT_DEEZER_BASE_URL, SONGS_PER_GENRE};

/// Unprefixed variables honoured on top of the `APP_` ones.
const PLAIN_OVERRIDES: [(&str, &str); 3] = [
    ("google_api_key", "GOOGLE_API_KEY"),
    ("embedding_model", "EMBEDDING_MODEL"),
    ("database_url", "DATABASE_URL"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    Local,
    Pinecone,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,

    pub google_api_key: Option<String>,
    pub embedding_model: String,
    pub embedding_base_url: String,
    pub embedding_timeout_secs: u64,

    pub database_url: Option<String>,
    pub database_max_connections: u32,

    pub index_backend: IndexBackend,
    /// Blank keeps the local index in memory only.
    pub index_path: String,
    pub pinecone_api_key: Option<String>,
    pub pinecone_host: Option<String>,
    pub pinecone_namespace: Option<String>,

    pub history_size: usize,
    pub recommend_k: usize,
    pub trending_size: usize,
    pub songs_per_genre: usize,
    pub deezer_base_url: String,
}

impl Config {
    /// Reads `.env`, the `APP_*` environment and the plain overrides.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let overrides = PLAIN_OVERRIDES
            .iter()
            .map(|(key, var)| (*key, env::var(var).ok().filter(|v| !v.trim().is_empty())))
            .collect::<Vec<_>>();

        Self::from_sources(Environment::with_prefix("APP"), &overrides)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        Ok(config::Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", 8000)?
            .set_default("embedding_model", DEFAULT_MODEL_NAME)?
            .set_default("embedding_base_url", DEFAULT_BASE_URL)?
            .set_default("embedding_timeout_secs", 30)?
            .set_default("database_max_connections", 5)?
            .set_default("index_backend", "local")?
            .set_default("index_path", "./music_index.json")?
            .set_default("history_size", 10)?
            .set_default("recommend_k", 20)?
            .set_default("trending_size", 20)?
            .set_default("songs_per_genre", SONGS_PER_GENRE as i64)?
            .set_default("deezer_base_url", DEFAULT_DEEZER_BASE_URL)?)
    }

    fn from_sources(environment: Environment, overrides: &[(&str, Option<String>)]) -> Result<Self> {
        let mut builder = Self::defaults()?.add_source(environment.try_parsing(true));
        for (key, value) in overrides {
            builder = builder.set_override_option(*key, value.clone())?;
        }

        let config: Config = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.index_backend == IndexBackend::Pinecone {
            let has = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
            if !has(&self.pinecone_api_key) || !has(&self.pinecone_host) {
                anyhow::bail!("index_backend = pinecone requires pinecone_api_key and pinecone_host");
            }
        }
        if self.recommend_k == 0 {
            anyhow::bail!("recommend_k must be at least 1");
        }
        Ok(())
    }

    pub fn embeddings_enabled(&self) -> bool {
        self.google_api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_with(pairs: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix("APP").source(Some(map))
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(env_with(&[]), &[]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8000);
        assert_eq!(config.embedding_model, "text-embedding-004");
        assert_eq!(config.index_backend, IndexBackend::Local);
        assert_eq!(config.history_size, 10);
        assert_eq!(config.recommend_k, 20);
        assert_eq!(config.trending_size, 20);
        assert_eq!(config.songs_per_genre, 100);
        assert!(config.database_url.is_none());
        assert!(!config.embeddings_enabled());
    }

    #[test]
    fn test_prefixed_environment_and_overrides() {
        let config = Config::from_sources(
            env_with(&[
                ("APP_PORT", "9090"),
                ("APP_HISTORY_SIZE", "5"),
                ("APP_EMBEDDING_MODEL", "text-embedding-004"),
            ]),
            &[
                ("embedding_model", Some("gemini-embedding-001".to_string())),
                ("google_api_key", Some("secret".to_string())),
                ("database_url", None),
            ],
        )
        .unwrap();

        assert_eq!(config.port, 9090);
        assert_eq!(config.history_size, 5);
        assert_eq!(config.embedding_model, "gemini-embedding-001");
        assert!(config.embeddings_enabled());
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_pinecone_backend_requires_credentials() {
        let result = Config::from_sources(env_with(&[("APP_INDEX_BACKEND", "pinecone")]), &[]);
        assert!(result.is_err());

        let config = Config::from_sources(
            env_with(&[
                ("APP_INDEX_BACKEND", "pinecone"),
                ("APP_PINECONE_API_KEY", "key"),
                ("APP_PINECONE_HOST", "songs-abc.svc.pinecone.io"),
            ]),
            &[],
        )
        .unwrap();
        assert_eq!(config.index_backend, IndexBackend::Pinecone);
    }
}

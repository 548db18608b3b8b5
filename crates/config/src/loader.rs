use std::{collections::HashSet, path::Path};

use anyhow::{Context, bail};

use crate::Config;

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration from {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("failed to parse configuration from {}", path.display()))?;

    validate(&config)?;

    Ok(config)
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    let mut upstream_ids = HashSet::new();

    for upstream in &config.upstreams {
        if !upstream_ids.insert(upstream.id) {
            bail!("duplicate upstream id {} in configuration", upstream.id);
        }
    }

    let mut model_names = HashSet::new();

    for model in &config.models {
        if !model_names.insert(model.name.as_str()) {
            bail!("duplicate model name '{}' in configuration", model.name);
        }

        if let Some(upstream) = model.upstream
            && !upstream_ids.contains(&upstream)
        {
            bail!(
                "model '{}' references upstream {} which is not configured",
                model.name,
                upstream
            );
        }
    }

    let mut key_ids = HashSet::new();

    for key in &config.llm_keys {
        if !key_ids.insert(key.id) {
            bail!("duplicate llm key id {} in configuration", key.id);
        }

        match (&key.key, &key.key_hash) {
            (Some(_), Some(_)) => bail!("llm key '{}' sets both key and key_hash", key.name),
            (None, None) => bail!("llm key '{}' sets neither key nor key_hash", key.name),
            _ => {}
        }
    }

    if config.request_log.batch_size == 0 || config.request_log.channel_capacity == 0 {
        bail!("request_log batch_size and channel_capacity must be positive");
    }

    if config.request_log.workers == 0 {
        bail!("request_log workers must be positive");
    }

    if config.gateway.retry.attempts == 0 {
        bail!("gateway retry attempts must be at least 1");
    }

    Ok(())
}

//! `config` command group: store veneer

use anyhow::Result;
use clawker_core::store::{Scope, WriteOptions};

pub fn run_get(key: &str) -> Result<()> {
    let store = super::load_store()?;
    match store.get(key) {
        Some(value) => {
            let rendered = serde_yaml::to_string(&value)?;
            print!("{rendered}");
            Ok(())
        }
        None => anyhow::bail!("no value for key '{key}'"),
    }
}

pub fn run_set(key: &str, value: &str, scope: Option<&str>) -> Result<()> {
    let scope = scope
        .map(str::parse::<Scope>)
        .transpose()
        .map_err(clawker_core::errors::ClawkerError::from)?;
    // Values parse as YAML scalars so booleans and numbers keep their
    // types; anything unparseable stays a string.
    let value: serde_yaml::Value =
        serde_yaml::from_str(value).unwrap_or_else(|_| serde_yaml::Value::String(value.to_string()));

    let mut store = super::load_store()?;
    store.set(key, value, scope)?;
    store.write(WriteOptions {
        key: Some(key.to_string()),
        ..Default::default()
    })?;
    Ok(())
}

pub fn run_write(path: Option<&str>) -> Result<()> {
    let mut store = super::load_store()?;
    store.write(WriteOptions {
        path: path.map(std::path::PathBuf::from),
        ..Default::default()
    })?;
    Ok(())
}

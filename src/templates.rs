use std::fs;

use anyhow::{Context, Result, anyhow};
use camino::Utf8Path;
use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "templates"]
struct Templates;

pub const EXAMPLE_CONFIG: &str = "config/example.config.toml";

pub fn get_bytes(path: &str) -> Result<Vec<u8>> {
    let file = Templates::get(path).ok_or_else(|| anyhow!("embedded template `{}` missing", path))?;
    Ok(file.data.as_ref().to_vec())
}

pub fn write_template(destination: &Utf8Path, template: &str) -> Result<()> {
    let bytes = get_bytes(template)?;
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating directory {}", parent))?;
    }
    fs::write(destination, bytes).with_context(|| format!("writing {}", destination))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_config_is_embedded() {
        let raw = String::from_utf8(get_bytes(EXAMPLE_CONFIG).unwrap()).unwrap();
        assert!(raw.contains("suffix = \"-master\""));
    }

    #[test]
    fn unknown_template_is_an_error() {
        assert!(get_bytes("config/missing.toml").is_err());
    }
}

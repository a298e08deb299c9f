use crate::config::generate::generate_starter_config;
use crate::config::{user_config_path, SYSTEM_CONFIG_PATH};
use std::fs;
use std::path::{Path, PathBuf};

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();

    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    let config_path = default_write_path();
    let written = write_config(&config_content, &config_path)?;
    println!("Config file written to {}", written.display());
    Ok(())
}

/// Prefer the per-user location; fall back to the system one when the user
/// config directory cannot be created.
fn default_write_path() -> PathBuf {
    if let Some(user_config) = user_config_path() {
        match user_config.parent().map(fs::create_dir_all) {
            Some(Ok(())) => return user_config,
            Some(Err(e)) => {
                eprintln!("Warning: Could not create config directory: {}", e);
                eprintln!("Falling back to {}", SYSTEM_CONFIG_PATH);
            }
            None => {}
        }
    }
    PathBuf::from(SYSTEM_CONFIG_PATH)
}

/// Write `content` to `path`, refusing to overwrite an existing file.
pub fn write_config(content: &str, path: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if path.exists() {
        return Err(format!(
            "config file already exists at {}; remove it first or use --stdout to print the config",
            path.display()
        )
        .into());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;

    Ok(path.to_path_buf())
}

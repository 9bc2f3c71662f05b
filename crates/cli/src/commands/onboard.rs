//! `reflexa onboard` — First-time setup.

use std::path::{Path, PathBuf};

use reflexa_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();

    println!("Reflexa — First-Time Setup");
    println!("==========================\n");

    let (config_path, created) = write_default_config(&config_dir)?;

    if created {
        println!("✅ Created config.toml at: {}", config_path.display());
        println!("\n📝 Next steps:");
        println!("   1. Add an API key to {} or export OPENROUTER_API_KEY", config_path.display());
        println!("   2. Adjust [model_sets.default] to the models you want per purpose");
        println!("   3. Run: reflexa models   (check how purposes resolve)");
        println!("   4. Run: reflexa chat\n");
    } else {
        println!("⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.\n");
    }

    Ok(())
}

/// Create `dir` and write the default `config.toml` into it.
///
/// An existing config is left untouched; the flag reports whether a file was
/// written.
pub fn write_default_config(dir: &Path) -> std::io::Result<(PathBuf, bool)> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        println!("✅ Created config directory: {}", dir.display());
    }

    let config_path = dir.join("config.toml");
    if config_path.exists() {
        return Ok((config_path, false));
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    Ok((config_path, true))
}

// YAML fragment loading and audit copy of the merged configuration
use qcmms_core::error::ConfigError;
use qcmms_core::Configuration;
use serde_json::Value;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the audit copy written into the working directory
pub const MERGED_CONFIG_FILE: &str = "config.yaml";

/// One fragment as read from disk
#[derive(Debug, Clone)]
pub struct Fragment {
    pub path: PathBuf,
    pub text: String,
    pub value: Value,
}

/// Parse YAML text into a configuration value
pub fn parse_fragment(text: &str, origin: &str) -> Result<Value, ConfigError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_yaml::from_str::<Value>(text).map_err(|err| ConfigError::malformed(origin, err))
}

/// Read one fragment from disk
pub fn read_fragment(path: &Path) -> Result<Fragment, ConfigError> {
    let origin = path.display().to_string();
    let text = fs::read_to_string(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => ConfigError::missing(origin.clone()),
        _ => ConfigError::malformed(origin.clone(), err),
    })?;
    let value = parse_fragment(&text, &origin)?;
    Ok(Fragment {
        path: path.to_path_buf(),
        text,
        value,
    })
}

/// Read every fragment in order without merging
pub fn read_fragments<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<Fragment>, ConfigError> {
    paths.iter().map(|p| read_fragment(p.as_ref())).collect()
}

/// Load and merge the fragments left to right
pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Configuration, ConfigError> {
    let fragments = read_fragments(paths)?;
    merge_fragments(&fragments)
}

/// Merge fragments already read from disk
pub fn merge_fragments(fragments: &[Fragment]) -> Result<Configuration, ConfigError> {
    let mut config = Configuration::new();
    for fragment in fragments {
        config.merge(fragment.path.display().to_string(), fragment.value.clone())?;
        debug!(fragment = %fragment.path.display(), "configuration fragment merged");
    }
    info!(
        fragments = fragments.len(),
        fingerprint = %config.fingerprint(),
        "configuration loaded"
    );
    Ok(config)
}

/// Write the fragments into `<working_dir>/config.yaml`, each preceded by
/// a `### <absolute path>` header line.
pub fn store_merged(fragments: &[Fragment], working_dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(working_dir)?;
    let target = working_dir.join(MERGED_CONFIG_FILE);
    let mut file = fs::File::create(&target)?;
    for fragment in fragments {
        let absolute = fs::canonicalize(&fragment.path).unwrap_or_else(|_| fragment.path.clone());
        writeln!(file, "### {}", absolute.display())?;
        file.write_all(fragment.text.as_bytes())?;
        if !fragment.text.ends_with('\n') {
            writeln!(file)?;
        }
    }
    file.flush()?;
    debug!(path = %target.display(), "merged configuration stored");
    Ok(target)
}

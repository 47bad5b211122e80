//! Sample handler sources and the default handler document, written on first
//! start so there is something to reload.

use std::path::Path;

/// `(file name, content)` of every sample source
pub const SAMPLE_SOURCES: &[(&str, &str)] = &[
    ("PingCommand.rs", include_str!("../samples/PingCommand.rs")),
    ("WelcomeListener.rs", include_str!("../samples/WelcomeListener.rs")),
];

/// Handler document registering the samples
pub const DEFAULT_DOCUMENT: &str = include_str!("../samples/handlers.yml");

/// Create `source_dir` with the sample sources unless it already exists.
/// Returns whether anything was written.
pub fn materialize(source_dir: &Path) -> std::io::Result<bool> {
    if source_dir.exists() {
        return Ok(false);
    }
    std::fs::create_dir_all(source_dir)?;
    for (name, content) in SAMPLE_SOURCES {
        std::fs::write(source_dir.join(name), content)?;
    }
    Ok(true)
}

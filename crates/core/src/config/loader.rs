//! Config path resolution
//!
//! Every path hangs off the ncz base directory. The host passes it in; a
//! loaded plugin can't find it from `current_exe`, which names the server
//! binary.

use std::path::{Path, PathBuf};

/// Path: `{base}/configs/`
pub fn configs_dir(base: &Path) -> PathBuf {
    base.join("configs")
}

/// Path: `{base}/configs/core.toml`
pub fn core_config_path(base: &Path) -> PathBuf {
    configs_dir(base).join("core.toml")
}

/// Path: `{base}/gamedata/gamedata.json`
pub fn gamedata_path(base: &Path) -> PathBuf {
    base.join("gamedata").join("gamedata.json")
}

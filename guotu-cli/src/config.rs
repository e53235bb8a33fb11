//! Named PostGIS connection profiles.
//!
//! A profiles file is a JSON object mapping short names to partial
//! connection descriptors, so commands can say `--profile survey` instead
//! of spelling out a full `PG:` string. Fields a profile leaves out keep
//! the values from the `PG*` environment and the library defaults.
//!
//! ```json
//! {
//!   "survey": { "host": "db.survey.cn", "dbname": "guotu", "schema": "plots" },
//!   "local": { "sslmode": "disable" }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use guotu::backend::postgis::PgConnInfo;
use serde::Deserialize;

/// Profiles file consulted when `--profiles-file` is not given
pub const DEFAULT_PROFILES_FILE: &str = "guotu-profiles.json";

/// One named connection in the profiles file, every field optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionProfile {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dbname: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub schema: Option<String>,
    pub sslmode: Option<String>,
}

/// Loads the profiles file: a JSON object of name to profile
pub fn load_profiles(path: &Path) -> Result<BTreeMap<String, ConnectionProfile>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read profiles file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("invalid profiles file {}", path.display()))
}

/// Connection parameters for a named profile: `PG*` environment first,
/// then the profile's own fields on top.
pub fn resolve_profile(path: &Path, name: &str) -> Result<PgConnInfo> {
    let profiles = load_profiles(path)?;
    let Some(profile) = profiles.get(name) else {
        bail!(
            "no profile '{}' in {} (available: {})",
            name,
            path.display(),
            profiles.keys().cloned().collect::<Vec<_>>().join(", ")
        );
    };
    let mut info = PgConnInfo::from_env();
    apply_profile(&mut info, name, profile)?;
    Ok(info)
}

fn apply_profile(info: &mut PgConnInfo, name: &str, profile: &ConnectionProfile) -> Result<()> {
    if let Some(host) = &profile.host {
        info.host = host.clone();
    }
    if let Some(port) = profile.port {
        info.port = port;
    }
    if let Some(dbname) = &profile.dbname {
        info.dbname = dbname.clone();
    }
    if let Some(user) = &profile.user {
        info.user = user.clone();
    }
    if let Some(password) = &profile.password {
        info.password = Some(password.clone());
    }
    if let Some(schema) = &profile.schema {
        info.schema = schema.clone();
    }
    if let Some(mode) = &profile.sslmode {
        info.ssl_mode = mode
            .parse()
            .with_context(|| format!("bad sslmode in profile '{name}'"))?;
    }
    Ok(())
}

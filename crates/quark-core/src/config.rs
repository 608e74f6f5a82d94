//! Cluster blueprint parser and profile resolver.
//!
//! A blueprint document holds exactly one `cluster.<stack>` table. Its
//! scalar keys become the blueprint fields; its optional `quark` table
//! holds typed default values and named `profile.<name>` overlays.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result, ResultExt};

/// Typed key/value mapping. Values keep their parsed TOML type.
pub type Values = BTreeMap<String, toml::Value>;

pub const DEFAULT_INSTANCE_COUNT: i64 = 3;

/// Keys injected by [`Blueprint::resolve_profile`], overwriting user values.
pub const KEY_DOMAIN: &str = "domain";
pub const KEY_NAME: &str = "name";
pub const KEY_INSTANCE_COUNT: &str = "instance-count";

/// A named overlay merged onto the default values at resolution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub values: Values,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuarkOptions {
    pub default_values: Values,
    pub profiles: Vec<Profile>,
}

impl QuarkOptions {
    pub fn profile(&self, name: &str) -> Result<&Profile> {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::not_found(format!("profile '{name}' not found")))
    }
}

/// A validated cluster blueprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub stack: String,
    pub domain: String,
    /// Externally reachable hostname; `<stack>.<domain>` unless given.
    pub tunnel: String,
    pub instance_count: i64,
    /// VPN network in CIDR notation, if the cluster uses the mesh.
    pub network: Option<String>,
    pub quark_options: QuarkOptions,
}

#[derive(Debug, Deserialize)]
struct Document {
    #[serde(default)]
    cluster: BTreeMap<String, ClusterBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterBlock {
    #[serde(default)]
    domain: String,
    #[serde(default)]
    tunnel: String,
    #[serde(default)]
    instance_count: i64,
    #[serde(default)]
    network: Option<String>,
    #[serde(default)]
    quark: Option<toml::Table>,
}

impl Blueprint {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading blueprint {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("loading blueprint {}", path.display()))
    }

    /// Parse and validate a blueprint document.
    pub fn parse(content: &str) -> Result<Self> {
        let doc: Document = toml::from_str(content)?;

        let mut clusters = doc.cluster.into_iter();
        let (stack, block) = clusters
            .next()
            .ok_or_else(|| Error::validation("document has no cluster block"))?;
        if clusters.next().is_some() {
            return Err(Error::validation("document must hold exactly one cluster block"));
        }

        let quark_options = match block.quark {
            Some(table) => parse_quark_table(table)?,
            None => QuarkOptions::default(),
        };

        let mut blueprint = Blueprint {
            stack,
            domain: block.domain,
            tunnel: block.tunnel,
            instance_count: block.instance_count,
            network: block.network.filter(|n| !n.is_empty()),
            quark_options,
        };
        blueprint.apply_defaults();
        blueprint.validate()?;

        debug!(
            stack = %blueprint.stack,
            domain = %blueprint.domain,
            instances = blueprint.instance_count,
            profiles = blueprint.quark_options.profiles.len(),
            "blueprint parsed"
        );
        Ok(blueprint)
    }

    /// Fill in the tunnel and instance count. Runs once, at parse time.
    fn apply_defaults(&mut self) {
        if self.tunnel.is_empty() && !self.stack.is_empty() && !self.domain.is_empty() {
            self.tunnel = format!("{}.{}", self.stack, self.domain);
        }
        if self.instance_count == 0 {
            self.instance_count = DEFAULT_INSTANCE_COUNT;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.stack.is_empty() {
            return Err(Error::validation("stack must be set"));
        }
        if self.domain.is_empty() {
            return Err(Error::validation("domain must be set"));
        }
        if self.tunnel.is_empty() {
            return Err(Error::validation("tunnel must be set"));
        }
        if self.instance_count <= 0 {
            return Err(Error::validation(format!(
                "instance-count must be a positive integer, got {}",
                self.instance_count
            )));
        }
        Ok(())
    }

    /// Defaults overlaid with the named profile, plus the reserved keys
    /// `domain`, `name` and `instance-count`. An empty `name` selects no
    /// profile.
    pub fn resolve_profile(&self, name: &str) -> Result<Values> {
        let mut values = self.quark_options.default_values.clone();

        if !name.is_empty() {
            let profile = self.quark_options.profile(name)?;
            for (key, value) in &profile.values {
                values.insert(key.clone(), value.clone());
            }
        }

        values.insert(KEY_DOMAIN.to_string(), toml::Value::String(self.domain.clone()));
        values.insert(KEY_NAME.to_string(), toml::Value::String(self.stack.clone()));
        values.insert(
            KEY_INSTANCE_COUNT.to_string(),
            toml::Value::Integer(self.instance_count),
        );
        Ok(values)
    }
}

fn parse_quark_table(table: toml::Table) -> Result<QuarkOptions> {
    let mut options = QuarkOptions::default();

    for (key, value) in table {
        if key != "profile" {
            options.default_values.insert(key, value);
            continue;
        }
        let toml::Value::Table(profiles) = value else {
            return Err(Error::validation("quark.profile must be a table of profiles"));
        };
        for (name, body) in profiles {
            let toml::Value::Table(body) = body else {
                return Err(Error::validation(format!("profile '{name}' must be a table")));
            };
            options.profiles.push(Profile {
                name,
                values: body.into_iter().collect(),
            });
        }
    }

    Ok(options)
}

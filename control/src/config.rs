//! Configuration for the rudder router controller.
//!
//! Loaded from `RUDDER_*` environment variables; every option has a default
//! suitable for a single-router deployment.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Router controller configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterConfig {
    /// Name identifying this router instance in multi-router status entries.
    #[serde(default = "default_router_name")]
    pub router_name: String,

    /// Externally reachable hostname of this router, recorded in admitted
    /// route status.
    pub router_canonical_hostname: Option<String>,

    /// Domain under which hosts are synthesized for routes with an empty
    /// `spec.host` (`<name>-<namespace>.<base_domain>`).
    #[serde(default = "default_base_domain")]
    pub base_domain: String,

    /// Enforce single-namespace host ownership: once a namespace owns a
    /// host, routes from other namespaces are rejected regardless of age.
    #[serde(default = "default_true")]
    pub namespace_ownership_check: bool,

    /// Allow routes with `wildcardPolicy: Subdomain`.
    #[serde(default = "default_false")]
    pub allow_wildcard_routes: bool,

    /// Run the extended structural/TLS validation stage.
    #[serde(default = "default_true")]
    pub extended_validation: bool,

    /// Debounce window: commits within this many seconds of each other are
    /// coalesced into one backend reload.
    #[serde(default = "default_reload_interval")]
    pub reload_interval_secs: u64,

    /// Upper bound on a single commit (config write + reload) before it is
    /// treated as failed.
    #[serde(default = "default_commit_timeout")]
    pub commit_timeout_secs: u64,

    /// Cap on the exponential backoff between failed commit retries.
    #[serde(default = "default_max_commit_backoff")]
    pub max_commit_backoff_secs: u64,

    /// Interval between full resyncs of the route set.
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,

    /// Directory the default backend persists rendered state into.
    #[serde(default = "default_working_dir")]
    pub working_dir: String,

    /// Command invoked after each committed state write to reload the
    /// external proxy. None skips the reload step.
    pub reload_command: Option<String>,
}

fn default_router_name() -> String {
    "default".to_string()
}

fn default_base_domain() -> String {
    "apps.local".to_string()
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_reload_interval() -> u64 {
    3
}

fn default_commit_timeout() -> u64 {
    30
}

fn default_max_commit_backoff() -> u64 {
    60
}

fn default_resync_interval() -> u64 {
    600
}

fn default_working_dir() -> String {
    "/var/lib/rudder/router".to_string()
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            router_name: default_router_name(),
            router_canonical_hostname: None,
            base_domain: default_base_domain(),
            namespace_ownership_check: default_true(),
            allow_wildcard_routes: default_false(),
            extended_validation: default_true(),
            reload_interval_secs: default_reload_interval(),
            commit_timeout_secs: default_commit_timeout(),
            max_commit_backoff_secs: default_max_commit_backoff(),
            resync_interval_secs: default_resync_interval(),
            working_dir: default_working_dir(),
            reload_command: None,
        }
    }
}

impl RouterConfig {
    /// Load configuration from `RUDDER_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("RUDDER_ROUTER_NAME") {
            config.router_name = val;
        }
        if let Ok(val) = env::var("RUDDER_CANONICAL_HOSTNAME") {
            config.router_canonical_hostname = Some(val);
        }
        if let Ok(val) = env::var("RUDDER_BASE_DOMAIN") {
            config.base_domain = val;
        }
        if let Ok(val) = env::var("RUDDER_NAMESPACE_OWNERSHIP_CHECK") {
            config.namespace_ownership_check = val.parse().unwrap_or(true);
        }
        if let Ok(val) = env::var("RUDDER_ALLOW_WILDCARD_ROUTES") {
            config.allow_wildcard_routes = val.parse().unwrap_or(false);
        }
        if let Ok(val) = env::var("RUDDER_EXTENDED_VALIDATION") {
            config.extended_validation = val.parse().unwrap_or(true);
        }
        if let Ok(val) = env::var("RUDDER_RELOAD_INTERVAL") {
            if let Ok(secs) = val.parse() {
                config.reload_interval_secs = secs;
            }
        }
        if let Ok(val) = env::var("RUDDER_COMMIT_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                config.commit_timeout_secs = secs;
            }
        }
        if let Ok(val) = env::var("RUDDER_MAX_COMMIT_BACKOFF") {
            if let Ok(secs) = val.parse() {
                config.max_commit_backoff_secs = secs;
            }
        }
        if let Ok(val) = env::var("RUDDER_RESYNC_INTERVAL") {
            if let Ok(secs) = val.parse() {
                config.resync_interval_secs = secs;
            }
        }
        if let Ok(val) = env::var("RUDDER_WORKING_DIR") {
            config.working_dir = val;
        }
        if let Ok(val) = env::var("RUDDER_RELOAD_COMMAND") {
            config.reload_command = Some(val);
        }

        config
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_secs(self.commit_timeout_secs)
    }

    pub fn max_commit_backoff(&self) -> Duration {
        Duration::from_secs(self.max_commit_backoff_secs)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RouterConfig::default();
        assert_eq!(config.router_name, "default");
        assert_eq!(config.base_domain, "apps.local");
        assert!(config.router_canonical_hostname.is_none());
        assert!(config.reload_command.is_none());
    }

    #[test]
    fn test_admission_defaults() {
        let config = RouterConfig::default();

        assert!(
            config.namespace_ownership_check,
            "Namespace ownership check should be enabled by default"
        );
        assert!(
            !config.allow_wildcard_routes,
            "Wildcard routes should be denied by default"
        );
        assert!(
            config.extended_validation,
            "Extended validation should be enabled by default"
        );
    }

    #[test]
    fn test_commit_timing_defaults() {
        let config = RouterConfig::default();

        assert_eq!(
            config.reload_interval(),
            Duration::from_secs(3),
            "Reloads should coalesce within a 3s window"
        );
        assert_eq!(config.commit_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_commit_backoff(), Duration::from_secs(60));
        assert_eq!(config.resync_interval(), Duration::from_secs(600));
    }

    #[test]
    fn test_commit_timing_env_overrides() {
        env::set_var("RUDDER_MAX_COMMIT_BACKOFF", "120");
        env::set_var("RUDDER_RESYNC_INTERVAL", "30");

        let config = RouterConfig::from_env();

        env::remove_var("RUDDER_MAX_COMMIT_BACKOFF");
        env::remove_var("RUDDER_RESYNC_INTERVAL");

        assert_eq!(config.max_commit_backoff(), Duration::from_secs(120));
        assert_eq!(config.resync_interval(), Duration::from_secs(30));
    }
}

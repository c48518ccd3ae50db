use serde::{Deserialize, Serialize};

/// How a session may obtain the ADMIN role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// `HELLO <name> ADMIN` is trusted as-is.
    #[default]
    Declared,
    /// ADMIN requires `ADMIN <password>` matching the shared secret.
    Password,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub admin_password: Option<String>,
    /// Failed elevations after which the connection is closed
    pub max_admin_attempts: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Declared,
            admin_password: None,
            max_admin_attempts: 3,
        }
    }
}

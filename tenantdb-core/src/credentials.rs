//! Tenant credentials resolved from the catalog

use serde::{Deserialize, Serialize};
use std::fmt;

const REDACTED: &str = "****";

/// Connection credentials for one tenant, as stored in the catalog.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantCredentials {
    pub driver: String,
    pub user_name: String,
    pub password: String,
    pub server: String,
    pub database_name: String,
    pub schema_name: String,
}

impl TenantCredentials {
    /// Render the DSN used to open the tenant's pool.
    pub fn connection_string(&self) -> ConnectionString {
        ConnectionString {
            dsn: render_dsn(self, &self.password),
            redacted: render_dsn(self, REDACTED),
        }
    }
}

fn render_dsn(creds: &TenantCredentials, password: &str) -> String {
    format!(
        "{}://{}:{}@{}/{}?sslmode=disable",
        creds.driver, creds.user_name, password, creds.server, creds.database_name
    )
}

impl fmt::Debug for TenantCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantCredentials")
            .field("driver", &self.driver)
            .field("user_name", &self.user_name)
            .field("password", &REDACTED)
            .field("server", &self.server)
            .field("database_name", &self.database_name)
            .field("schema_name", &self.schema_name)
            .finish()
    }
}

/// A DSN whose `Debug` and `Display` never reveal the password.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    dsn: String,
    redacted: String,
}

impl ConnectionString {
    /// The full DSN including the password. Hand this only to the driver.
    pub fn expose(&self) -> &str {
        &self.dsn
    }

    pub fn redacted(&self) -> &str {
        &self.redacted
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted)
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionString").field(&self.redacted).finish()
    }
}

/// Quote a SQL identifier, doubling embedded quotes.
pub fn quote_identifier(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `SET search_path TO <schema>` for the given schema.
pub fn search_path_statement(schema: &str) -> String {
    format!("SET search_path TO {}", quote_identifier(schema))
}

/// Session statement forcing UTC.
pub const SET_TIMEZONE_UTC: &str = "SET TIMEZONE='UTC'";

use std::env;
use std::str::FromStr;

use dotenvy::dotenv;

use crate::payroll::tax::TaxBracketTable;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_addr: String,
    pub db_max_connections: u32,

    // Rate limiting
    pub rate_protected_per_min: u32,

    pub api_prefix: String,

    // Payroll engine
    pub payroll_tolerance: f64,
    pub backfill_default_months: u32,
    pub bulk_chunk_size: usize,
    pub tax_brackets: TaxBracketTable,
    pub roster_cache_ttl_secs: u64,
}

/// Reads an optional variable, falling back to `default` when it is unset or unparsable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "Ignoring unparsable config value");
                default
            }
        },
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let tax_brackets = match env::var("PAYROLL_TAX_BRACKETS") {
            Ok(spec) => TaxBracketTable::parse(&spec).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Invalid PAYROLL_TAX_BRACKETS, derived tax disabled");
                TaxBracketTable::default()
            }),
            Err(_) => TaxBracketTable::default(),
        };

        Self {
            server_addr: env::var("SERVER_ADDR").expect("SERVER_ADDR must be set"),
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            jwt_secret: env::var("JWT_SECRET").expect("JWT_SECRET must be set"),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 10),

            rate_protected_per_min: env_or("RATE_PROTECTED_PER_MIN", 1000),

            api_prefix: env::var("API_PREFIX").unwrap_or_else(|_| "/api".to_string()),

            payroll_tolerance: env_or("PAYROLL_TOLERANCE", 1.0),
            backfill_default_months: env_or("PAYROLL_BACKFILL_MONTHS", 12),
            bulk_chunk_size: env_or("PAYROLL_BULK_CHUNK_SIZE", 500).max(1),
            tax_brackets,
            roster_cache_ttl_secs: env_or("ROSTER_CACHE_TTL_SECS", 300),
        }
    }
}

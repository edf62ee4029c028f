//! lead-sync
//!
//! Synchronizes lead records from an Airtable table into a PostgreSQL lead
//! database. The engine lives in `lead_sync_airtable_source`; this crate holds
//! the command-line option structs and their conversion into engine settings.
//!
//! # CLI Usage
//!
//! ```bash
//! # Create tables
//! lead-sync init-schema --database-url postgresql://...
//!
//! # One bounded chunk, resuming the run in progress
//! lead-sync chunk --airtable-base-id app... --airtable-table Leads --database-url postgresql://...
//!
//! # Whole table in one invocation, only records not yet flagged as synced
//! lead-sync full --smart-sync ...
//!
//! # Dry run: map a sample without writing anything
//! lead-sync test ...
//! ```

use anyhow::Context;
use clap::Parser;
use lead_sync_airtable::{AirtableConfig, DEFAULT_API_URL};
use lead_sync_airtable_source::Config;
use std::path::{Path, PathBuf};
use sync_core::FieldMappings;
use tracing::warn;

pub mod config;

pub use config::parse_duration;

#[derive(Parser, Clone, Debug)]
pub struct AirtableOpts {
    /// Airtable base id
    #[arg(long, env = "AIRTABLE_BASE_ID", default_value = "")]
    pub airtable_base_id: String,

    /// Airtable table name or id
    #[arg(long, env = "AIRTABLE_TABLE", default_value = "")]
    pub airtable_table: String,

    /// Airtable personal access token
    #[arg(long, env = "AIRTABLE_TOKEN", default_value = "", hide_env_values = true)]
    pub airtable_token: String,

    /// Airtable API base URL
    #[arg(long, env = "AIRTABLE_API_URL", default_value = DEFAULT_API_URL)]
    pub airtable_api_url: String,

    /// Timeout for each HTTP request (e.g. "20s")
    #[arg(long, default_value = "20s")]
    pub airtable_request_timeout: String,
}

impl AirtableOpts {
    pub fn to_config(&self) -> anyhow::Result<AirtableConfig> {
        Ok(AirtableConfig {
            api_url: self.airtable_api_url.clone(),
            base_id: self.airtable_base_id.clone(),
            table: self.airtable_table.clone(),
            token: self.airtable_token.clone(),
            request_timeout: parse_duration(&self.airtable_request_timeout)
                .context("Invalid --airtable-request-timeout")?,
        })
    }
}

#[derive(Parser, Clone, Debug)]
pub struct StoreOpts {
    /// PostgreSQL connection string of the lead database
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Keep run state in JSON files under this directory instead of the database
    #[arg(long, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
pub struct RunOpts {
    /// Only fetch records whose synced field is unset, and set it after import
    #[arg(long)]
    pub smart_sync: bool,

    /// Boolean field in the Airtable table that marks imported records
    #[arg(long, default_value = "Synced")]
    pub synced_field: String,

    /// Records per page (1-100)
    #[arg(long, default_value = "100")]
    pub page_size: usize,

    /// Field mapping file (JSON or YAML); the stored mapping is used when omitted
    #[arg(long, value_name = "PATH")]
    pub mapping_file: Option<PathBuf>,

    /// Time budget of one chunk (e.g. "25s", "1500ms")
    #[arg(long, default_value = "25s")]
    pub time_budget: String,

    /// Time budget of a full run; an unfinished run can be resumed with `chunk`
    #[arg(long, default_value = "10m")]
    pub full_time_budget: String,

    /// How long a run lease is held before other invocations may take over
    #[arg(long, default_value = "15m")]
    pub lease_ttl: String,
}

impl RunOpts {
    /// Engine configuration, loading the mapping file if one was given.
    pub fn to_config(&self) -> anyhow::Result<Config> {
        let mappings = match &self.mapping_file {
            Some(path) => Some(load_mapping_file(path)?),
            None => None,
        };
        Ok(Config {
            mappings,
            page_size: self.page_size,
            smart_sync: self.smart_sync,
            synced_field: self.synced_field.clone(),
            chunk_time_budget: parse_duration(&self.time_budget)
                .context("Invalid --time-budget")?,
            full_sync_time_budget: parse_duration(&self.full_time_budget)
                .context("Invalid --full-time-budget")?,
            lease_ttl: parse_duration(&self.lease_ttl).context("Invalid --lease-ttl")?,
            ..Config::default()
        })
    }
}

fn load_mapping_file(path: &Path) -> anyhow::Result<FieldMappings> {
    let parsed = FieldMappings::from_file(path)
        .with_context(|| format!("Failed to read mapping file {}", path.display()))?;
    for diagnostic in &parsed.diagnostics {
        warn!("{}: {diagnostic}", path.display());
    }
    Ok(parsed.mappings)
}

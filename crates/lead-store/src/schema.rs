//! Table definitions for the lead, dimension and options tables.
//!
//! Every statement is idempotent so `init-schema` can be re-run safely.

use sync_core::{ColumnDefault, DimensionKind, ValueKind, LEAD_COLUMNS};

fn dimension_ddl(kind: DimensionKind) -> String {
    let table = kind.table_name();
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id BIGSERIAL PRIMARY KEY,
            name TEXT NOT NULL,
            name_secondary TEXT,
            code VARCHAR(16) UNIQUE,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            notes TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"
    )
}

fn leads_ddl() -> String {
    let mut columns = vec!["id BIGSERIAL PRIMARY KEY".to_string()];
    for col in LEAD_COLUMNS {
        let sql_type = match col.kind {
            ValueKind::Text => "TEXT",
            ValueKind::Integer => "BIGINT",
            ValueKind::Json => "JSONB",
        };
        let constraint = match col.default {
            ColumnDefault::Null => String::new(),
            ColumnDefault::Text(s) => format!(" NOT NULL DEFAULT '{}'", s.replace('\'', "''")),
            ColumnDefault::Integer(i) => format!(" NOT NULL DEFAULT {i}"),
        };
        columns.push(format!("{} {sql_type}{constraint}", col.name));
    }
    for kind in DimensionKind::ALL {
        columns.push(format!(
            "{} BIGINT REFERENCES {}(id)",
            kind.foreign_key(),
            kind.table_name()
        ));
    }
    columns.push("external_id TEXT UNIQUE".to_string());
    columns.push("created_at TIMESTAMPTZ NOT NULL DEFAULT now()".to_string());
    columns.push("updated_at TIMESTAMPTZ NOT NULL DEFAULT now()".to_string());

    format!("CREATE TABLE IF NOT EXISTS leads (\n    {}\n)", columns.join(",\n    "))
}

/// All statements needed to create the schema, in dependency order.
pub fn ddl_statements() -> Vec<String> {
    let mut statements: Vec<String> = DimensionKind::ALL.into_iter().map(dimension_ddl).collect();
    statements.push(leads_ddl());
    statements.push("CREATE INDEX IF NOT EXISTS leads_email_lower_idx ON leads (lower(email))".into());
    statements.push(
        "CREATE TABLE IF NOT EXISTS sync_options (
            name TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"
        .into(),
    );
    statements.push(
        "CREATE TABLE IF NOT EXISTS sync_lease (
            name TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            acquired_at TIMESTAMPTZ NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL
        )"
        .into(),
    );
    statements
}

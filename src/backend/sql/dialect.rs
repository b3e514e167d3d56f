//! Per-dialect SQL generation for the cache table.
//!
//! Every statement the relational backend runs is rendered once, at
//! construction, into a [`Statements`] bundle. The backend and the sweeper
//! only ever bind parameters against that bundle, so the read/write/sweep
//! algorithms never branch on the dialect.
//!
//! # Table layout
//!
//! | column        | type                 | notes                    |
//! |---------------|----------------------|--------------------------|
//! | `key`         | text / varchar(64)   | primary key              |
//! | `value`       | blob / bytea         | encoded result           |
//! | `expires`     | bigint, nullable     | epoch milliseconds       |
//! | `last_access` | bigint               | epoch milliseconds       |
//! | `compressed`  | bigint               | `1` when `value` is compressed |

use crate::error::{Error, Result};
use crate::key::CacheKey;

/// Relational dialects the cache table can live in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dialect {
    Sqlite,
    Postgres,
    MySql,
}

impl Dialect {
    /// Infer the dialect from a connection URL.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for an unknown scheme
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            other => Err(Error::ConfigError(format!(
                "unsupported database scheme '{}'",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
        }
    }

    /// Quote an identifier. `key` is reserved in MySQL, so every identifier
    /// is quoted in every dialect.
    pub fn quote(&self, ident: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", ident.replace('`', "``")),
            _ => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Positional placeholder for the `n`th (1-based) bound parameter.
    fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", n),
            _ => "?".to_string(),
        }
    }

    fn key_type(&self) -> String {
        match self {
            Dialect::MySql => format!("VARCHAR({})", CacheKey::LEN),
            _ => "TEXT".to_string(),
        }
    }

    fn blob_type(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "BLOB",
            Dialect::Postgres => "BYTEA",
            Dialect::MySql => "LONGBLOB",
        }
    }

    /// "No upper bound" clause preceding `OFFSET`.
    fn unbounded_limit(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "LIMIT -1",
            Dialect::Postgres => "LIMIT ALL",
            Dialect::MySql => "LIMIT 18446744073709551615",
        }
    }

    /// Whether `UPDATE ... RETURNING` is available.
    fn supports_returning(&self) -> bool {
        !matches!(self, Dialect::MySql)
    }

    /// Whether `CREATE INDEX IF NOT EXISTS` is available.
    fn supports_index_if_not_exists(&self) -> bool {
        !matches!(self, Dialect::MySql)
    }

    /// Render every statement for `table`.
    pub fn statements(&self, table: &str) -> Statements {
        let t = self.quote(table);
        let key = self.quote("key");
        let value = self.quote("value");
        let expires = self.quote("expires");
        let last_access = self.quote("last_access");
        let compressed = self.quote("compressed");
        let p = |n| self.placeholder(n);

        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {t} (\
             {key} {key_type} NOT NULL PRIMARY KEY, \
             {value} {blob} NOT NULL, \
             {expires} BIGINT NULL, \
             {last_access} BIGINT NOT NULL, \
             {compressed} BIGINT NOT NULL DEFAULT 0)",
            key_type = self.key_type(),
            blob = self.blob_type(),
        );

        let if_not_exists = if self.supports_index_if_not_exists() {
            "IF NOT EXISTS "
        } else {
            ""
        };
        let index = |suffix: &str, columns: &str| {
            let name = format!("{}_{}", table, suffix);
            let create = format!(
                "CREATE INDEX {if_not_exists}{} ON {t} ({})",
                self.quote(&name),
                columns
            );
            IndexDef { name, create }
        };
        let mut indexes = vec![
            index("expires_index", &expires),
            index("last_access_index", &last_access),
        ];
        // MySQL's primary key already covers point lookups with a range on `expires`.
        if self.supports_index_if_not_exists() {
            indexes.push(index("key_expires_index", &format!("{key}, {expires}")));
        }

        let index_exists = (!self.supports_index_if_not_exists()).then(|| {
            "SELECT COUNT(*) FROM information_schema.statistics \
             WHERE table_schema = DATABASE() AND table_name = ? AND index_name = ?"
                .to_string()
        });

        let insert = format!(
            "INSERT INTO {t} ({key}, {value}, {expires}, {last_access}, {compressed}) \
             VALUES ({}, {}, {}, {}, {})",
            p(1),
            p(2),
            p(3),
            p(4),
            p(5)
        );
        let upsert = match self {
            Dialect::MySql => format!(
                "{insert} ON DUPLICATE KEY UPDATE \
                 {value} = VALUES({value}), {expires} = VALUES({expires}), \
                 {last_access} = VALUES({last_access}), {compressed} = VALUES({compressed})"
            ),
            _ => format!(
                "{insert} ON CONFLICT ({key}) DO UPDATE SET \
                 {value} = excluded.{value}, {expires} = excluded.{expires}, \
                 {last_access} = excluded.{last_access}, {compressed} = excluded.{compressed}"
            ),
        };

        let live = |key_n: usize, now_n: usize| {
            format!(
                "{key} = {} AND ({expires} IS NULL OR {expires} > {})",
                p(key_n),
                p(now_n)
            )
        };
        let touch = format!(
            "UPDATE {t} SET {last_access} = {} WHERE {}",
            p(1),
            live(2, 3)
        );
        let touch_returning = self
            .supports_returning()
            .then(|| format!("{touch} RETURNING {value}, {compressed}"));
        let select_live = format!(
            "SELECT {value}, {compressed} FROM {t} WHERE {}",
            live(1, 2)
        );

        let delete_expired = format!("DELETE FROM {t} WHERE {expires} < {}", p(1));
        let evict_lru = format!(
            "DELETE FROM {t} WHERE {key} IN (\
             SELECT {key} FROM (\
             SELECT {key} FROM {t} ORDER BY {last_access} DESC {} OFFSET {}\
             ) AS lru)",
            self.unbounded_limit(),
            p(1)
        );

        Statements {
            create_table,
            indexes,
            index_exists,
            upsert,
            touch_returning,
            touch,
            select_live,
            delete_expired,
            evict_lru,
            clear: format!("DELETE FROM {t}"),
            count: format!("SELECT COUNT(*) FROM {t}"),
        }
    }
}

/// A secondary index on the cache table.
#[derive(Clone, Debug)]
pub struct IndexDef {
    pub name: String,
    pub create: String,
}

/// Rendered SQL for one dialect and table.
///
/// Bind order is documented per statement.
#[derive(Clone, Debug)]
pub struct Statements {
    pub create_table: String,
    pub indexes: Vec<IndexDef>,
    /// `table_name, index_name` -> count. Only for dialects without
    /// `CREATE INDEX IF NOT EXISTS`.
    pub index_exists: Option<String>,
    /// `key, value, expires, last_access, compressed`
    pub upsert: String,
    /// `now, key, now` -> `value, compressed`
    pub touch_returning: Option<String>,
    /// `now, key, now`
    pub touch: String,
    /// `key, now` -> `value, compressed`
    pub select_live: String,
    /// `now`
    pub delete_expired: String,
    /// `max`
    pub evict_lru: String,
    pub clear: String,
    pub count: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_from_url() {
        assert_eq!(Dialect::from_url("sqlite::memory:").unwrap(), Dialect::Sqlite);
        assert_eq!(
            Dialect::from_url("postgres://u:p@localhost/db").unwrap(),
            Dialect::Postgres
        );
        assert_eq!(
            Dialect::from_url("postgresql://localhost/db").unwrap(),
            Dialect::Postgres
        );
        assert_eq!(
            Dialect::from_url("mysql://localhost/db").unwrap(),
            Dialect::MySql
        );
        assert!(matches!(
            Dialect::from_url("mssql://localhost"),
            Err(Error::ConfigError(_))
        ));
    }

    #[test]
    fn test_quoting() {
        assert_eq!(Dialect::Sqlite.quote("key"), "\"key\"");
        assert_eq!(Dialect::MySql.quote("key"), "`key`");
        assert_eq!(Dialect::Postgres.quote("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_postgres_uses_numbered_placeholders() {
        let s = Dialect::Postgres.statements("cache");
        assert!(s.upsert.contains("VALUES ($1, $2, $3, $4, $5)"));
        assert!(s.upsert.contains("ON CONFLICT (\"key\")"));
        assert!(s
            .touch_returning
            .as_deref()
            .unwrap()
            .ends_with("RETURNING \"value\", \"compressed\""));
        assert!(s.evict_lru.contains("LIMIT ALL OFFSET $1"));
        assert!(s.index_exists.is_none());
    }

    #[test]
    fn test_sqlite_statements() {
        let s = Dialect::Sqlite.statements("cache");
        assert!(s.create_table.contains("\"value\" BLOB"));
        assert!(s.evict_lru.contains("LIMIT -1 OFFSET ?"));
        assert_eq!(s.indexes.len(), 3);
        assert!(s.indexes[0]
            .create
            .starts_with("CREATE INDEX IF NOT EXISTS \"cache_expires_index\""));
    }

    #[test]
    fn test_mysql_statements() {
        let s = Dialect::MySql.statements("cache");
        assert!(s.create_table.contains("`key` VARCHAR(64)"));
        assert!(s.upsert.contains("ON DUPLICATE KEY UPDATE"));
        assert!(s.touch_returning.is_none());
        assert!(s.index_exists.is_some());
        assert!(s.evict_lru.contains("LIMIT 18446744073709551615 OFFSET ?"));
        assert_eq!(s.indexes.len(), 2);
        assert!(!s.indexes[0].create.contains("IF NOT EXISTS"));
    }
}

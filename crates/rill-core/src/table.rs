//! Table addressing.

use std::fmt;

use crate::error::{Error, Result};

/// Location of a table within a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableAddress {
    /// Database name, if the source has several.
    pub database: Option<String>,
    /// Namespace (schema) name.
    pub namespace: Option<String>,
    /// Table name.
    pub table: String,
}

impl TableAddress {
    /// Creates an address for a table in the default namespace.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            database: None,
            namespace: None,
            table: table.into(),
        }
    }

    /// Sets the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Sets the database.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Parses `table`, `namespace.table` or `database.namespace.table`.
    pub fn parse(name: &str) -> Result<Self> {
        let parts: Vec<&str> = name.split('.').collect();
        if parts.iter().any(|part| part.trim().is_empty()) {
            return Err(Error::invalid_definition().with_message(format!("Invalid table name '{name}'")));
        }
        match parts.as_slice() {
            [table] => Ok(Self::new(*table)),
            [namespace, table] => Ok(Self::new(*table).with_namespace(*namespace)),
            [database, namespace, table] => Ok(Self::new(*table)
                .with_namespace(*namespace)
                .with_database(*database)),
            _ => Err(Error::invalid_definition().with_message(format!("Invalid table name '{name}'"))),
        }
    }

    /// Returns the table name qualified by its namespace.
    pub fn qualified_name(&self) -> String {
        match &self.namespace {
            Some(namespace) => format!("{namespace}.{}", self.table),
            None => self.table.clone(),
        }
    }
}

impl fmt::Display for TableAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(database) = &self.database {
            write!(f, "{database}.")?;
        }
        f.write_str(&self.qualified_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_name() {
        assert_eq!(TableAddress::new("users").qualified_name(), "users");
        let addr = TableAddress::new("users")
            .with_namespace("crm")
            .with_database("main");
        assert_eq!(addr.qualified_name(), "crm.users");
        assert_eq!(addr.to_string(), "main.crm.users");
    }

    #[test]
    fn test_parse() {
        assert_eq!(TableAddress::parse("users").unwrap(), TableAddress::new("users"));
        assert_eq!(
            TableAddress::parse("main.crm.users").unwrap(),
            TableAddress::new("users").with_namespace("crm").with_database("main")
        );
        assert!(TableAddress::parse("a..b").is_err());
        assert!(TableAddress::parse("a.b.c.d").is_err());
    }
}

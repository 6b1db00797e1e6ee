//! Schema lookups used by enrichment expansion.

use std::collections::HashMap;
use std::future::Future;

use crate::error::PipeResult;

/// Table metadata source.
///
/// `PipeDB` answers from the live store; [`StaticCatalog`] from memory.
pub trait Catalog {
    /// Column names of `table` in positional order, or `None` if the table
    /// does not exist.
    fn table_columns(
        &self,
        table: &str,
    ) -> impl Future<Output = PipeResult<Option<Vec<String>>>> + Send;
}

/// In-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    tables: HashMap<String, Vec<String>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_table<I, S>(mut self, table: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(table, columns);
        self
    }

    pub fn insert<I, S>(&mut self, table: &str, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables
            .insert(table.to_string(), columns.into_iter().map(Into::into).collect());
    }
}

impl Catalog for StaticCatalog {
    async fn table_columns(&self, table: &str) -> PipeResult<Option<Vec<String>>> {
        Ok(self.tables.get(table).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_catalog() {
        let catalog = StaticCatalog::new().with_table("ip_data", ["ip", "city"]);
        assert_eq!(
            catalog.table_columns("ip_data").await.unwrap(),
            Some(vec!["ip".to_string(), "city".to_string()])
        );
        assert_eq!(catalog.table_columns("missing").await.unwrap(), None);
    }
}

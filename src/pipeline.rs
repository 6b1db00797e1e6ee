//! The fixed sequence of passes from text to SQL.

use tracing::{debug, info};

use crate::catalog::{Catalog, StaticCatalog};
use crate::config::{Limits, PipeConfig};
use crate::error::PipeResult;
use crate::parser::{self, Dialect, Lexer, Tree};
use crate::transpiler::{
    codegen, cte, enrich, macros, parens, stages, Enrichment, EnrichmentRegistry, MacroRegistry,
    Strategy,
};

/// Dialect, allow-lists and limits shared by every request.
///
/// Holds no per-request state; one instance can serve concurrent callers.
#[derive(Debug, Clone)]
pub struct Pipeline {
    dialect: Dialect,
    macros: MacroRegistry,
    enrichments: EnrichmentRegistry,
    limits: Limits,
}

impl Pipeline {
    /// Built-in macros and enrichments with default limits.
    pub fn new(dialect: Dialect) -> PipeResult<Self> {
        Ok(Self {
            dialect,
            macros: MacroRegistry::builtin(dialect)?,
            enrichments: EnrichmentRegistry::builtin(),
            limits: Limits::default(),
        })
    }

    /// Built-ins extended with the configured macros and enrichments.
    pub fn from_config(config: &PipeConfig) -> PipeResult<Self> {
        let mut pipeline = Self::new(config.dialect()?)?;
        pipeline.limits = config.limits;
        for (name, m) in &config.macros {
            pipeline
                .macros
                .register(name, m.params.clone(), &m.body, &m.description)?;
        }
        for (name, e) in &config.enrichments {
            pipeline.enrichments.register(Enrichment {
                name: name.clone(),
                table: e.table.clone(),
                key: e.key.clone(),
                columns: e.columns.clone(),
            });
        }
        Ok(pipeline)
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn macros(&self) -> &MacroRegistry {
        &self.macros
    }

    pub fn macros_mut(&mut self) -> &mut MacroRegistry {
        &mut self.macros
    }

    pub fn enrichments(&self) -> &EnrichmentRegistry {
        &self.enrichments
    }

    pub fn enrichments_mut(&mut self) -> &mut EnrichmentRegistry {
        &mut self.enrichments
    }

    /// Token stream for `sql` in this pipeline's dialect.
    pub fn lexer<'a>(&self, sql: &'a str) -> Lexer<'a> {
        Lexer::new(sql, self.dialect)
    }

    /// Lex and build the flat tree.
    pub fn parse(&self, sql: &str) -> PipeResult<Tree> {
        parser::parse_with_depth(sql, self.dialect, self.limits.nesting_depth)
    }

    /// Passes 1 to 3, which need no store.
    pub fn prepare(&self, tree: &mut Tree) -> PipeResult<()> {
        parens::group_parentheses(tree)?;
        stages::group_pipe_stages(tree);
        macros::expand_macros(tree, &self.macros, self.limits.macro_depth)?;
        Ok(())
    }

    /// All five passes, in order.
    pub async fn rewrite<C>(
        &self,
        tree: &mut Tree,
        catalog: Option<&C>,
        strategy: Strategy,
    ) -> PipeResult<()>
    where
        C: Catalog + Sync,
    {
        self.prepare(tree)?;
        enrich::expand_enrichments(tree, &self.enrichments, catalog, self.limits.enrichment_targets)
            .await?;
        cte::transpile(tree, strategy)?;
        debug!(nodes = tree.len(), "rewrite complete");
        Ok(())
    }

    /// Transpile `sql` to the target dialect.
    pub async fn transpile<C>(
        &self,
        sql: &str,
        catalog: Option<&C>,
        strategy: Strategy,
    ) -> PipeResult<String>
    where
        C: Catalog + Sync,
    {
        let mut tree = self.parse(sql)?;
        self.rewrite(&mut tree, catalog, strategy).await?;
        let out = codegen::render(&tree);
        info!(sql = %out, "transpiled");
        Ok(out)
    }

    /// Transpile without a catalog; `ENRICH` stages fail.
    pub async fn transpile_offline(&self, sql: &str, strategy: Strategy) -> PipeResult<String> {
        self.transpile::<StaticCatalog>(sql, None, strategy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transpiler::stages::stages;
    use pretty_assertions::assert_eq;

    fn pipeline() -> Pipeline {
        Pipeline::new(Dialect::ClickHouse).unwrap()
    }

    #[tokio::test]
    async fn test_transpile_with_macro() {
        let sql = pipeline()
            .transpile_offline("FROM logs |> WHERE $last(ts, 1, HOUR) |> LIMIT 5", Strategy::Flat)
            .await
            .unwrap();
        assert_eq!(sql, "SELECT * FROM logs WHERE ts >= now() - INTERVAL 1 HOUR LIMIT 5");
    }

    #[test]
    fn test_prepare_keeps_stages() {
        let p = pipeline();
        let mut tree = p.parse("FROM t |> WHERE $not_empty(x) |> LIMIT 1").unwrap();
        p.prepare(&mut tree).unwrap();
        assert_eq!(stages(&tree).len(), 2);
        assert_eq!(
            codegen::render(&tree),
            "FROM t |> WHERE (x IS NOT NULL AND x != '') |> LIMIT 1"
        );
    }

    #[test]
    fn test_from_config() {
        let config = PipeConfig::from_toml_str(
            r#"
            [limits]
            macro_depth = 2

            [macros.recent]
            params = ["column"]
            body = "$last($column, 15, MINUTE)"
            "#,
        )
        .unwrap();
        let p = Pipeline::from_config(&config).unwrap();
        assert_eq!(p.limits().macro_depth, 2);
        assert!(p.macros().get("recent").is_some());
        assert!(p.macros().get("time_bucket").is_some());
    }

    #[tokio::test]
    async fn test_depth_limit_from_config() {
        let mut p = pipeline().with_limits(Limits {
            macro_depth: 1,
            ..Limits::default()
        });
        p.macros_mut().register("two", vec![], "$is_error(x)", "").unwrap();
        let err = p.transpile_offline("FROM t |> WHERE $two", Strategy::Cte).await.unwrap_err();
        assert_eq!(err.kind(), "MacroRecursionLimitError");
    }

    #[test]
    fn test_nesting_limit_from_config() {
        let p = pipeline().with_limits(Limits {
            nesting_depth: 2,
            ..Limits::default()
        });
        assert!(p.parse("FROM t |> WHERE f((x))").is_ok());
        let err = p.parse("FROM t |> WHERE f(((x)))").unwrap_err();
        assert_eq!(err.kind(), "UnbalancedGroupingError");
    }

    #[tokio::test]
    async fn test_enrich_without_catalog() {
        let err = pipeline()
            .transpile_offline("FROM logs |> ENRICH ip(client_ip)", Strategy::Cte)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "EnrichmentUnavailableError");
    }
}

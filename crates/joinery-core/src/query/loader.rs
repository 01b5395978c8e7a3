//! Loader facade.
//!
//! [`Loader`] ties a registry, a backend and a [`LoaderConfig`] together and
//! runs [`LoadQuery`]s: one joined statement for the `select_related` tree
//! (required relations included), then one statement per level of the
//! `prefetch_related` tree. [`QuerySet`] is the builder that produces the
//! query.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::backend::QueryBackend;
use crate::catalog::Registry;
use crate::config::LoaderConfig;
use crate::error::Error;
use joinery_proto::{
    split_path, FilterExpr, LoadQuery, OrderSpec, Pagination, Projection, HOP_DELIMITER,
};

use super::instance::InstanceRef;
use super::pagination::{apply_pagination, check_query};
use super::path::{PathResolver, RelationTree};
use super::planner::{JoinPlanner, Statement};
use super::prefetch::PrefetchExecutor;
use super::reassemble::reassemble;

/// Loads entity graphs from a backend.
pub struct Loader<B: QueryBackend + ?Sized> {
    registry: Arc<Registry>,
    backend: Arc<B>,
    config: LoaderConfig,
}

impl<B: QueryBackend + ?Sized> Clone for Loader<B> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            backend: self.backend.clone(),
            config: self.config.clone(),
        }
    }
}

impl<B: QueryBackend + ?Sized> Loader<B> {
    /// Create a loader with the default configuration.
    pub fn new(registry: Arc<Registry>, backend: Arc<B>) -> Self {
        Self::with_config(registry, backend, LoaderConfig::default())
    }

    /// Create a loader with a custom configuration.
    pub fn with_config(registry: Arc<Registry>, backend: Arc<B>, config: LoaderConfig) -> Self {
        Self {
            registry,
            backend,
            config,
        }
    }

    /// The entity registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The query backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The configuration.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Start building a query on `entity`.
    pub fn query(&self, entity: impl Into<String>) -> QuerySet<'_, B> {
        QuerySet::new(self, entity)
    }

    /// Execute a load query.
    pub async fn load(&self, query: &LoadQuery) -> Result<Vec<InstanceRef>, Error> {
        self.load_with_cancellation(query, None).await
    }

    /// Execute a load query, aborting before the next statement once
    /// `cancellation` is cancelled.
    #[instrument(
        skip(self, query, cancellation),
        fields(
            entity = %query.root_entity,
            select_related = query.select_related.len(),
            prefetch_related = query.prefetch_related.len(),
        )
    )]
    pub async fn load_with_cancellation(
        &self,
        query: &LoadQuery,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Vec<InstanceRef>, Error> {
        let resolver = PathResolver::new(&self.registry).with_max_depth(self.config.max_depth);

        let mut joined = resolver.resolve(&query.root_entity, &query.select_related)?;
        resolver.expand_required(&mut joined)?;
        let prefetched = if query.prefetch_related.is_empty() {
            RelationTree::new(&query.root_entity)
        } else {
            let mut tree = resolver.resolve(&query.root_entity, &query.prefetch_related)?;
            resolver.expand_required(&mut tree)?;
            tree
        };

        let pagination = query.pagination.clone().map(|mut p| {
            p.raw |= self.config.raw_pagination;
            p
        });
        check_query(query, pagination.as_ref())?;
        check_paths(query, &joined, &prefetched)?;

        let mut plan = JoinPlanner::new(&self.registry).plan(&joined, query)?;
        apply_pagination(&mut plan, pagination.as_ref());
        debug!(
            nodes = plan.nodes.len(),
            limit = ?plan.limit,
            "planned joined statement"
        );

        check_cancelled(cancellation)?;
        let rows = self.backend.execute(Statement::Join(&plan)).await?;
        if rows.len() > self.config.max_rows {
            return Err(Error::QueryDefinition(format!(
                "joined statement returned {} rows, more than the limit of {}",
                rows.len(),
                self.config.max_rows
            )));
        }
        let roots = reassemble(&rows, &plan, self.config.materialization)?;

        let mut statements = 1;
        if !prefetched.is_empty() && !roots.is_empty() {
            let mut executor = PrefetchExecutor::new(&self.registry, &*self.backend, query)
                .with_materialization(self.config.prefetch_materialization)
                .with_max_rows(self.config.max_rows);
            if let Some(token) = cancellation {
                executor = executor.with_cancellation(token);
            }
            statements += executor.run(&roots, &prefetched).await?;
        }

        debug!(rows = rows.len(), roots = roots.len(), statements, "load complete");
        Ok(roots)
    }

    /// Prefetch relation paths onto instances already loaded.
    ///
    /// `entity` is the entity of every instance in `roots`.
    #[instrument(skip(self, roots, paths), fields(roots = roots.len()))]
    pub async fn prefetch_onto<S: AsRef<str>>(
        &self,
        entity: &str,
        roots: &[InstanceRef],
        paths: &[S],
    ) -> Result<(), Error> {
        let resolver = PathResolver::new(&self.registry).with_max_depth(self.config.max_depth);
        let mut tree = resolver.resolve(entity, paths)?;
        resolver.expand_required(&mut tree)?;

        let query = LoadQuery::new(entity);
        let statements = PrefetchExecutor::new(&self.registry, &*self.backend, &query)
            .with_materialization(self.config.prefetch_materialization)
            .with_max_rows(self.config.max_rows)
            .run(roots, &tree)
            .await?;
        debug!(statements, "prefetch complete");
        Ok(())
    }
}

fn check_cancelled(cancellation: Option<&CancellationToken>) -> Result<(), Error> {
    if cancellation.is_some_and(|t| t.is_cancelled()) {
        return Err(Error::Cancelled);
    }
    Ok(())
}

/// Ordering and projections may only name the root or a loaded path.
fn check_paths(query: &LoadQuery, joined: &RelationTree, prefetched: &RelationTree) -> Result<(), Error> {
    let loaded = |path: &str| path.is_empty() || joined.contains(path) || prefetched.contains(path);

    for order in &query.order_by {
        let (path, _) = order.split();
        if !loaded(&path) {
            return Err(Error::QueryDefinition(format!(
                "order_by '{}' names path '{}', which is not loaded",
                order.field, path
            )));
        }
    }
    for projection in &query.projections {
        let path = joinery_proto::canonical_path(&projection.path);
        if !loaded(&path) {
            return Err(Error::QueryDefinition(format!(
                "projection on path '{}', which is not loaded",
                projection.path
            )));
        }
    }
    Ok(())
}

/// Builder for a load query bound to a [`Loader`].
///
/// Builder errors (a malformed order or field path) are kept and returned
/// by [`QuerySet::all`] and [`QuerySet::first`].
pub struct QuerySet<'l, B: QueryBackend + ?Sized> {
    loader: &'l Loader<B>,
    query: LoadQuery,
    limit: Option<u32>,
    offset: u32,
    raw: bool,
    cancellation: Option<CancellationToken>,
    error: Option<Error>,
}

impl<'l, B: QueryBackend + ?Sized> QuerySet<'l, B> {
    fn new(loader: &'l Loader<B>, entity: impl Into<String>) -> Self {
        Self {
            loader,
            query: LoadQuery::new(entity),
            limit: None,
            offset: 0,
            raw: false,
            cancellation: None,
            error: None,
        }
    }

    /// Load a relation path with the joined statement.
    pub fn select_related(mut self, path: &str) -> Self {
        self.query = self.query.select_related(path);
        self
    }

    /// Load a relation path with one statement per level.
    pub fn prefetch_related(mut self, path: &str) -> Self {
        self.query = self.query.prefetch_related(path);
        self
    }

    /// Keep only these fields. Names may be path-qualified
    /// (`"category__name"`).
    pub fn fields(mut self, names: &[&str]) -> Self {
        for (path, fields) in self.group_fields(names) {
            self.query = self.query.with_projection(Projection::include(path, fields));
        }
        self
    }

    /// Leave out these fields. Names may be path-qualified.
    pub fn exclude_fields(mut self, names: &[&str]) -> Self {
        for (path, fields) in self.group_fields(names) {
            self.query = self.query.with_projection(Projection::exclude(path, fields));
        }
        self
    }

    /// Order by `"field"`, `"-field"` or `"path__field"`.
    pub fn order_by(mut self, spec: &str) -> Self {
        match OrderSpec::parse(spec) {
            Ok(order) => self.query = self.query.with_order(order),
            Err(e) => self.fail(e.into()),
        }
        self
    }

    /// Filter root rows.
    pub fn filter(mut self, filter: FilterExpr) -> Self {
        self.query = self.query.with_filter(filter);
        self
    }

    /// Bound the number of results.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip results.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Count limit and offset in raw joined rows instead of root entities.
    pub fn limit_raw_sql(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    /// Abort the load once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Lower to a load query.
    pub fn into_query(self) -> Result<LoadQuery, Error> {
        let (query, _) = self.finish()?;
        Ok(query)
    }

    /// Load every matching root.
    pub async fn all(self) -> Result<Vec<InstanceRef>, Error> {
        let loader = self.loader;
        let (query, cancellation) = self.finish()?;
        loader
            .load_with_cancellation(&query, cancellation.as_ref())
            .await
    }

    /// Load the first matching root.
    pub async fn first(mut self) -> Result<Option<InstanceRef>, Error> {
        self.limit = Some(1);
        self.raw = false;
        Ok(self.all().await?.into_iter().next())
    }

    fn finish(self) -> Result<(LoadQuery, Option<CancellationToken>), Error> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let mut query = self.query;
        if self.limit.is_some() || self.offset > 0 {
            query.pagination = Some(Pagination {
                limit: self.limit,
                offset: self.offset,
                raw: self.raw,
            });
        }
        Ok((query, self.cancellation))
    }

    fn fail(&mut self, error: Error) {
        self.error.get_or_insert(error);
    }

    /// Split path-qualified field names into `(path, fields)` groups.
    fn group_fields(&mut self, names: &[&str]) -> Vec<(String, Vec<String>)> {
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for name in names {
            let hops = split_path(name);
            let Some((field, path)) = hops.split_last() else {
                self.fail(Error::QueryDefinition("empty field name".into()));
                continue;
            };
            if field.is_empty() || path.iter().any(|hop| hop.is_empty()) {
                self.fail(Error::QueryDefinition(format!("invalid field name '{}'", name)));
                continue;
            }
            let path = path.join(HOP_DELIMITER);
            match groups.iter_mut().find(|(p, _)| *p == path) {
                Some((_, fields)) => fields.push(field.to_string()),
                None => groups.push((path, vec![field.to_string()])),
            }
        }
        groups
    }
}

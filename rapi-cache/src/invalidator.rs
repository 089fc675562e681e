//! Domain events to cache invalidations.
//!
//! [`CacheInvalidator`] holds nothing but a handle to the shared cache. Each
//! resource maps to the endpoint fragments its responses are cached under, so
//! after a write the affected GET responses are gone before the call returns.
use crate::ResponseCache;
use std::{fmt, str::FromStr, sync::Arc};
use tracing::debug;

/// Backend resources whose cached reads can go stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Users,
    Databases,
    Reports,
    Tables,
    Queries,
    UserAccess,
}

impl Resource {
    /// Key fragments (and tags) identifying this resource's cached responses.
    pub fn patterns(&self) -> &'static [&'static str] {
        match self {
            Resource::Users => &["users"],
            Resource::Databases => &["mssql-config", "databases"],
            Resource::Reports => &["reports"],
            Resource::Tables => &["tables"],
            Resource::Queries => &["queries", "query"],
            Resource::UserAccess => &["user-access", "access-control"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Users => "users",
            Resource::Databases => "databases",
            Resource::Reports => "reports",
            Resource::Tables => "tables",
            Resource::Queries => "queries",
            Resource::UserAccess => "user-access",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown resource: {0}")]
pub struct UnknownResource(pub String);

impl FromStr for Resource {
    type Err = UnknownResource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "user" | "users" => Ok(Resource::Users),
            "database" | "databases" | "mssql-config" => Ok(Resource::Databases),
            "report" | "reports" => Ok(Resource::Reports),
            "table" | "tables" => Ok(Resource::Tables),
            "query" | "queries" => Ok(Resource::Queries),
            "user-access" | "access" => Ok(Resource::UserAccess),
            _ => Err(UnknownResource(s.to_string())),
        }
    }
}

/// What happened to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    Create,
    Update,
    Delete,
    /// Server-side re-synchronisation such as a database learn-sync.
    Sync,
}

#[derive(Debug)]
pub struct CacheInvalidator<V> {
    cache: Arc<ResponseCache<V>>,
}

impl<V> Clone for CacheInvalidator<V> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<V> CacheInvalidator<V>
where
    V: Clone,
{
    pub fn new(cache: Arc<ResponseCache<V>>) -> Self {
        Self { cache }
    }

    pub fn invalidate(&self, resource: Resource) -> usize {
        let removed: usize = resource
            .patterns()
            .iter()
            .map(|pattern| self.cache.invalidate_by_pattern(pattern))
            .sum();
        debug!("invalidated {} cached responses for {}", removed, resource);
        removed
    }

    pub fn invalidate_users(&self) -> usize {
        self.invalidate(Resource::Users)
    }

    pub fn invalidate_databases(&self) -> usize {
        self.invalidate(Resource::Databases)
    }

    pub fn invalidate_reports(&self) -> usize {
        self.invalidate(Resource::Reports)
    }

    pub fn invalidate_tables(&self) -> usize {
        self.invalidate(Resource::Tables)
    }

    pub fn invalidate_queries(&self) -> usize {
        self.invalidate(Resource::Queries)
    }

    pub fn invalidate_user_access(&self) -> usize {
        self.invalidate(Resource::UserAccess)
    }

    pub fn invalidate_all(&self) -> usize {
        let removed = self.cache.len();
        self.cache.clear();
        removed
    }

    /// Invalidates whatever `action` on `resource` can make stale. Known
    /// resources cascade to the ones derived from them (a synced or deleted
    /// database takes its tables and access grants along); anything else is
    /// used as a literal pattern.
    pub fn invalidate_after_action(&self, action: CacheAction, resource: &str) -> usize {
        let Ok(resource) = resource.parse::<Resource>() else {
            debug!("{:?} on unknown resource {:?}, invalidating by pattern", action, resource);
            return self.cache.invalidate_by_pattern(resource);
        };

        let mut affected = vec![resource];
        match (resource, action) {
            (Resource::Databases, CacheAction::Create | CacheAction::Delete | CacheAction::Sync) => {
                affected.extend([Resource::Tables, Resource::UserAccess]);
            }
            (Resource::Users, CacheAction::Delete) => affected.push(Resource::UserAccess),
            (Resource::Tables, CacheAction::Sync) => affected.push(Resource::Queries),
            _ => {}
        }

        affected.into_iter().map(|r| self.invalidate(r)).sum()
    }
}

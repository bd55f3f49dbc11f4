// crates/scriptpad-server/src/resources.rs
// External resource cache - memoizes data-connection scaffolding per
// (connection, target framework) with a single in-flight build per key

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, ScriptpadError};
use crate::process::{self, ProcessSpec};
use scriptpad_types::{DataConnection, DotNetFrameworkVersion, Reference};

/// Cache key: connection identity plus target framework. Results for one
/// framework are never served for another.
pub type ResourceKey = (Uuid, DotNetFrameworkVersion);

/// Everything a data connection contributes to a build
#[derive(Debug, Clone)]
pub struct DataConnectionResources {
    /// Generated source fragments (entity types, context)
    pub source_code: Vec<String>,
    /// Compiled reference assembly, when the generator produced one
    pub assembly_image: Option<Vec<u8>>,
    /// Library references the generated code needs
    pub required_references: Vec<Reference>,
    pub generated_at: DateTime<Utc>,
}

/// Produces resources for a data connection. Injected so the cache can be
/// exercised without a database or toolchain.
#[async_trait]
pub trait ResourceGenerator: Send + Sync {
    async fn generate(
        &self,
        connection: &DataConnection,
        framework: DotNetFrameworkVersion,
    ) -> Result<DataConnectionResources>;
}

/// Process-wide cache of data-connection resources.
///
/// Single-flight per key: concurrent callers share one generation and all
/// receive its outcome. Failures are broadcast but never cached, so the next
/// caller retries. Successes live until explicit invalidation.
pub struct ResourcesCache {
    cache: Cache<ResourceKey, Arc<DataConnectionResources>>,
    generator: Arc<dyn ResourceGenerator>,
}

impl ResourcesCache {
    pub fn new(generator: Arc<dyn ResourceGenerator>) -> Self {
        Self {
            // Eviction is explicit-only in practice; the capacity is a fuse
            cache: Cache::builder().max_capacity(1024).build(),
            generator,
        }
    }

    /// Get (or build) the full resource set for a connection
    pub async fn get(
        &self,
        connection: &DataConnection,
        framework: DotNetFrameworkVersion,
    ) -> Result<Arc<DataConnectionResources>> {
        let key = (connection.id, framework);
        let generator = self.generator.clone();
        let conn = connection.clone();

        self.cache
            .try_get_with(key, async move {
                info!(
                    connection = %conn.name,
                    connection_id = %conn.id,
                    framework = %framework,
                    "Generating data connection resources"
                );
                generator.generate(&conn, framework).await.map(Arc::new)
            })
            .await
            .map_err(|e: Arc<ScriptpadError>| ScriptpadError::ResourceGenerationFailed {
                connection_id: connection.id,
                cause: e.to_string(),
            })
    }

    pub async fn get_source_generated_code(
        &self,
        connection: &DataConnection,
        framework: DotNetFrameworkVersion,
    ) -> Result<Vec<String>> {
        Ok(self.get(connection, framework).await?.source_code.clone())
    }

    pub async fn get_assembly(
        &self,
        connection: &DataConnection,
        framework: DotNetFrameworkVersion,
    ) -> Result<Option<Vec<u8>>> {
        Ok(self.get(connection, framework).await?.assembly_image.clone())
    }

    pub async fn get_required_references(
        &self,
        connection: &DataConnection,
        framework: DotNetFrameworkVersion,
    ) -> Result<Vec<Reference>> {
        Ok(self
            .get(connection, framework)
            .await?
            .required_references
            .clone())
    }

    /// Drop every cached entry for a connection (its configuration changed)
    pub async fn invalidate(&self, connection_id: Uuid) {
        for framework in DotNetFrameworkVersion::ALL {
            self.cache.invalidate(&(connection_id, *framework)).await;
        }
        debug!(%connection_id, "Invalidated data connection resources");
    }

    /// Process-wide flush
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

// ============================================================================
// Toolchain-backed generator
// ============================================================================

/// Scaffolds entity code for a connection by running the `dotnet ef` tooling
/// in a scratch directory and collecting the generated sources.
pub struct ToolchainResourceGenerator {
    dotnet: PathBuf,
    scratch_dir: PathBuf,
}

impl ToolchainResourceGenerator {
    pub fn new(dotnet: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            dotnet: dotnet.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    /// EF provider package for a connection's provider id
    fn provider_package(provider: &str) -> Result<(&'static str, &'static str)> {
        match provider {
            "postgresql" => Ok(("Npgsql.EntityFrameworkCore.PostgreSQL", "8.0.4")),
            "mssql" => Ok(("Microsoft.EntityFrameworkCore.SqlServer", "8.0.6")),
            "sqlite" => Ok(("Microsoft.EntityFrameworkCore.Sqlite", "8.0.6")),
            other => Err(ScriptpadError::Config(format!(
                "unsupported data connection provider: {other}"
            ))),
        }
    }
}

#[async_trait]
impl ResourceGenerator for ToolchainResourceGenerator {
    async fn generate(
        &self,
        connection: &DataConnection,
        framework: DotNetFrameworkVersion,
    ) -> Result<DataConnectionResources> {
        let (provider_package, provider_version) = Self::provider_package(&connection.provider)?;

        let work_dir = self
            .scratch_dir
            .join(format!("scaffold_{}_{}", connection.id, framework.tfm()));
        process::ensure_dir(&work_dir).await?;

        let spec = ProcessSpec::new(&self.dotnet)
            .arg("ef")
            .arg("dbcontext")
            .arg("scaffold")
            .arg(&connection.connection_string)
            .arg(provider_package)
            .args(["--output-dir", "Models", "--no-build", "--force"])
            .current_dir(&work_dir)
            .with_redirect_io();

        let result = process::run(&spec, &CancellationToken::new()).await?;
        if result.has_error() {
            warn!(
                connection = %connection.name,
                code = result.exit_code,
                "Scaffolding failed"
            );
            result.ensure_successful()?;
        }

        let mut source_code = Vec::new();
        let models_dir = work_dir.join("Models");
        let mut entries = tokio::fs::read_dir(&models_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("cs") {
                source_code.push(tokio::fs::read_to_string(&path).await?);
            }
        }
        source_code.sort();

        Ok(DataConnectionResources {
            source_code,
            assembly_image: None,
            required_references: vec![
                Reference::package(provider_package, provider_version),
                Reference::package("Microsoft.EntityFrameworkCore", "8.0.6"),
            ],
            generated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingGenerator {
        calls: AtomicUsize,
        fail_first: bool,
        delay: Duration,
    }

    impl CountingGenerator {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first: false,
                delay: Duration::from_millis(50),
            }
        }

        fn failing_first() -> Self {
            Self {
                fail_first: true,
                ..Self::new()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResourceGenerator for CountingGenerator {
        async fn generate(
            &self,
            connection: &DataConnection,
            framework: DotNetFrameworkVersion,
        ) -> Result<DataConnectionResources> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail_first && call == 0 {
                return Err(ScriptpadError::Other("scaffolding blew up".into()));
            }
            Ok(DataConnectionResources {
                source_code: vec![format!("// {} {} call {}", connection.name, framework, call)],
                assembly_image: None,
                required_references: vec![Reference::package("Microsoft.EntityFrameworkCore", "8.0.6")],
                generated_at: Utc::now(),
            })
        }
    }

    fn connection(name: &str) -> DataConnection {
        DataConnection {
            id: Uuid::new_v4(),
            name: name.to_string(),
            provider: "postgresql".to_string(),
            connection_string: "Host=localhost;Database=test".to_string(),
        }
    }

    // ============================================================================
    // Single-flight tests
    // ============================================================================

    #[tokio::test]
    async fn test_concurrent_gets_share_one_generation() {
        let generator = Arc::new(CountingGenerator::new());
        let cache = Arc::new(ResourcesCache::new(generator.clone()));
        let conn = connection("db1");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let conn = conn.clone();
            handles.push(tokio::spawn(async move {
                cache.get(&conn, DotNetFrameworkVersion::Net8).await
            }));
        }

        let mut first: Option<Arc<DataConnectionResources>> = None;
        for handle in handles {
            let res = handle.await.unwrap().unwrap();
            if let Some(prev) = &first {
                assert_eq!(prev.source_code, res.source_code);
            }
            first = Some(res);
        }
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_key_isolation() {
        let generator = Arc::new(CountingGenerator::new());
        let cache = ResourcesCache::new(generator.clone());
        let conn_a = connection("a");
        let conn_b = connection("b");

        let a6 = cache.get(&conn_a, DotNetFrameworkVersion::Net6).await.unwrap();
        let a8 = cache.get(&conn_a, DotNetFrameworkVersion::Net8).await.unwrap();
        let b6 = cache.get(&conn_b, DotNetFrameworkVersion::Net6).await.unwrap();

        assert_ne!(a6.source_code, a8.source_code);
        assert_ne!(a6.source_code, b6.source_code);
        assert_eq!(generator.calls(), 3);

        // Cached: no further generation
        cache.get(&conn_a, DotNetFrameworkVersion::Net6).await.unwrap();
        assert_eq!(generator.calls(), 3);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let generator = Arc::new(CountingGenerator::failing_first());
        let cache = ResourcesCache::new(generator.clone());
        let conn = connection("flaky");

        let err = cache.get(&conn, DotNetFrameworkVersion::Net8).await.unwrap_err();
        match err {
            ScriptpadError::ResourceGenerationFailed { connection_id, cause } => {
                assert_eq!(connection_id, conn.id);
                assert!(cause.contains("blew up"));
            }
            other => panic!("unexpected error: {other}"),
        }

        // Retry succeeds and generation ran again
        cache.get(&conn, DotNetFrameworkVersion::Net8).await.unwrap();
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_regeneration() {
        let generator = Arc::new(CountingGenerator::new());
        let cache = ResourcesCache::new(generator.clone());
        let conn = connection("db");

        cache.get(&conn, DotNetFrameworkVersion::Net8).await.unwrap();
        cache.invalidate(conn.id).await;
        cache.get(&conn, DotNetFrameworkVersion::Net8).await.unwrap();
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_accessor_views_share_one_entry() {
        let generator = Arc::new(CountingGenerator::new());
        let cache = ResourcesCache::new(generator.clone());
        let conn = connection("db");

        let code = cache
            .get_source_generated_code(&conn, DotNetFrameworkVersion::Net8)
            .await
            .unwrap();
        let refs = cache
            .get_required_references(&conn, DotNetFrameworkVersion::Net8)
            .await
            .unwrap();
        let asm = cache
            .get_assembly(&conn, DotNetFrameworkVersion::Net8)
            .await
            .unwrap();

        assert!(!code.is_empty());
        assert!(!refs.is_empty());
        assert!(asm.is_none());
        assert_eq!(generator.calls(), 1);
    }
}

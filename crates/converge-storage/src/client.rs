use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crate::store::BoxFuture;

type Builder<C> = Arc<dyn Fn(String) -> BoxFuture<'static, C> + Send + Sync>;

/// Build an S3 client for `region` from the default credential chain.
pub async fn build_client(region: &str) -> aws_sdk_s3::Client {
    let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()))
        .load()
        .await;
    aws_sdk_s3::Client::new(&config)
}

/// Lazily constructed, per-region API clients.
///
/// Built once at process start and passed by reference to whatever needs a
/// client. Each region's client is constructed at most once, even under
/// concurrent first use, through a per-key [`OnceCell`].
pub struct ClientPool<C> {
    builder: Builder<C>,
    cells: Mutex<HashMap<String, Arc<OnceCell<C>>>>,
}

impl<C: Clone + Send + Sync + 'static> ClientPool<C> {
    pub fn new<F, Fut>(builder: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = C> + Send + 'static,
    {
        Self {
            builder: Arc::new(move |region| Box::pin(builder(region))),
            cells: Mutex::new(HashMap::new()),
        }
    }

    fn cell(&self, region: &str) -> Arc<OnceCell<C>> {
        let mut cells = match self.cells.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cells
            .entry(region.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// The client for `region`, building it on first use.
    pub async fn get(&self, region: &str) -> C {
        let cell = self.cell(region);
        let builder = self.builder.clone();
        let region = region.to_string();
        cell.get_or_init(|| async move {
            tracing::debug!(region = %region, "building regional client");
            builder(region).await
        })
        .await
        .clone()
    }

    /// Regions with a client built or being built.
    pub fn regions(&self) -> Vec<String> {
        let cells = match self.cells.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut regions: Vec<_> = cells.keys().cloned().collect();
        regions.sort();
        regions
    }
}

impl ClientPool<aws_sdk_s3::Client> {
    /// Pool of S3 clients using the default credential chain.
    pub fn s3() -> Self {
        Self::new(|region: String| async move { build_client(&region).await })
    }
}

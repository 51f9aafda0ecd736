pub mod api;
pub mod cache;
pub mod ingest;
pub mod query;
pub mod schema;
pub mod services;
pub mod storage;
pub mod sync;
pub mod utils;

use std::net::SocketAddr;
use std::sync::Arc;

use common::Result;
use common::config::Settings;
use services::DialSpeedService;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Loads settings, wires the service context, and serves the API until
/// shutdown.
pub async fn run_dialspeed_server(config_path: &str) -> Result<()> {
    let settings = Settings::new(config_path)?;
    let service = Arc::new(DialSpeedService::new(&settings).await?);

    let router = api::routes(Arc::clone(&service)).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([127, 0, 0, 1], settings.api_port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Dial speed API listening");
    axum::serve(listener, router).await?;

    Ok(())
}

/// One-shot ingestion of CSV export files, pushing the touched
/// partitions upstream before returning.
pub async fn run_import(config_path: &str, files: &[String]) -> Result<()> {
    let settings = Settings::new(config_path)?;
    let service = DialSpeedService::new(&settings).await?;
    import_files(&service, files).await;
    Ok(())
}

/// Imports each file independently. A file that cannot be read or fails
/// schema validation is logged and skipped; the rest of the batch still
/// lands. Returns the number of files imported.
pub async fn import_files(service: &DialSpeedService, files: &[String]) -> usize {
    let mut imported = 0;
    for path in files {
        let outcome = async {
            let data = tokio::fs::read(path).await?;
            service.import_csv(&data).await
        }
        .await;

        match outcome {
            Ok(report) => {
                info!(
                    file = %path,
                    rows = report.rows_ingested,
                    partitions = report.partitions.len(),
                    uploaded = report.files_uploaded,
                    "Import finished"
                );
                imported += 1;
            }
            Err(e) => {
                warn!(file = %path, error = %e, "Skipping import file");
            }
        }
    }
    imported
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryRemoteStore;
    use common::config::{CacheConfig, QueryConfig, RemoteConfig, SyncConfig};

    #[tokio::test]
    async fn test_import_batch_survives_one_bad_file() {
        let dir = tempfile::tempdir().unwrap();

        let bad = dir.path().join("bad.csv");
        std::fs::write(&bad, "CAMPAIGNNAME,Level1\nCamp_A,agent1\n").unwrap();
        let good = dir.path().join("good.csv");
        std::fs::write(
            &good,
            "CAMPAIGNNAME,Level1,CallStartdate,Insert_Dt,attempt,CallStatus\n\
             Camp_A,agent1,01-03-2024 09:00:10,01-03-2024 09:00:00,1,Connected\n",
        )
        .unwrap();

        let settings = Settings {
            cache: CacheConfig {
                root: dir.path().join("cache").to_string_lossy().into_owned(),
            },
            remote: RemoteConfig {
                root_path: dir.path().join("remote").to_string_lossy().into_owned(),
                root_id: MemoryRemoteStore::ROOT.to_string(),
            },
            sync: SyncConfig::default(),
            query: QueryConfig::default(),
            api_port: 0,
        };
        let service =
            DialSpeedService::with_store(&settings, Arc::new(MemoryRemoteStore::new()))
                .await
                .unwrap();

        let files = vec![
            bad.to_string_lossy().into_owned(),
            dir.path().join("missing.csv").to_string_lossy().into_owned(),
            good.to_string_lossy().into_owned(),
        ];
        let imported = import_files(&service, &files).await;

        assert_eq!(imported, 1, "only the well-formed file lands");
        let campaigns = service.list_campaigns().await;
        assert_eq!(campaigns, vec!["Camp_A".to_string()]);
    }
}

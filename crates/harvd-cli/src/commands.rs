use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use harvd_api::{build_app, AppState};
use harvd_domain::EtlName;
use harvd_etl::{Etl, EtlPipeline, LoaderRegistry};
use harvd_runtime::{ContextHandle, ServiceSpec};
use tracing::info;

use crate::demo::{DirectoryExtractor, DiskLoader, FileTransformer};

// ── Serve ─────────────────────────────────────────────────────────────────────

pub async fn serve(
    bind: String,
    port: u16,
    module: String,
    source_dir: PathBuf,
    output_dir: PathBuf,
    cache_root: Option<PathBuf>,
) -> Result<()> {
    let etl_name = EtlName::new("Directory").map_err(|e| anyhow::anyhow!(e))?;
    let mut spec = ServiceSpec::new(
        module,
        {
            let source_dir = source_dir.clone();
            move || {
                let source_dir = source_dir.clone();
                let etl: Arc<dyn Etl> = Arc::new(EtlPipeline::new(
                    etl_name.clone(),
                    move || DirectoryExtractor::new(source_dir.clone()),
                    FileTransformer::default,
                ));
                vec![etl]
            }
        },
        {
            let output_dir = output_dir.clone();
            move || {
                let mut registry = LoaderRegistry::new();
                let out = output_dir.clone();
                registry.register("disk", move || Box::new(DiskLoader::new(out.clone())));
                registry
            }
        },
    );
    if let Some(root) = cache_root {
        spec = spec.with_cache_root(root);
    }

    let handle = ContextHandle::start(spec);
    let app = build_app(AppState::new(Arc::clone(&handle)));

    let addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {}", addr))?;
    info!(addr = %addr, "harvester service listening");
    println!("harvd listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    handle.shutdown();
    Ok(())
}

// ── Remote control ────────────────────────────────────────────────────────────

fn join(remote: &str, path: &str) -> String {
    format!("{}{}", remote.trim_end_matches('/'), path)
}

async fn print_response(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if body.is_empty() {
        println!("{}", status);
    } else {
        println!("{}", body.trim_end());
    }
    if status.is_client_error() || status.is_server_error() {
        anyhow::bail!("service answered {}", status);
    }
    Ok(())
}

pub async fn post(remote: &str, path: &str) -> Result<()> {
    let response = reqwest::Client::new()
        .post(join(remote, path))
        .send()
        .await
        .with_context(|| format!("cannot reach {}", remote))?;
    print_response(response).await
}

pub async fn get(remote: &str, path: &str) -> Result<()> {
    let response = reqwest::get(join(remote, path))
        .await
        .with_context(|| format!("cannot reach {}", remote))?;
    print_response(response).await
}

pub async fn set_config(remote: &str, key: &str, value: &str) -> Result<()> {
    let response = reqwest::Client::new()
        .put(join(remote, "/config"))
        .json(&serde_json::json!({ key: value }))
        .send()
        .await
        .with_context(|| format!("cannot reach {}", remote))?;
    print_response(response).await
}

pub async fn add_schedule(remote: &str, cron: &str) -> Result<()> {
    let response = reqwest::Client::new()
        .post(join(remote, "/schedule"))
        .json(&serde_json::json!({ "cron": cron }))
        .send()
        .await
        .with_context(|| format!("cannot reach {}", remote))?;
    print_response(response).await
}

pub async fn remove_schedule(remote: &str, cron: &str) -> Result<()> {
    let response = reqwest::Client::new()
        .delete(join(remote, "/schedule"))
        .json(&serde_json::json!({ "cron": cron }))
        .send()
        .await
        .with_context(|| format!("cannot reach {}", remote))?;
    print_response(response).await
}

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{Span, info, info_span};

use coupler::config::Config;
use coupler::dispatch::{Dispatcher, Exchange, Outcome, Pipeline, Stage};
use coupler::http::HttpProcessor;
use coupler::protocol::{WireProcessor, WireService};
use coupler::server::{ProcessorPool, listener};

/// Answers every request with a short description of what arrived.
struct Describe;

#[async_trait]
impl Stage for Describe {
    async fn invoke(&self, exchange: &mut Exchange<'_>) -> anyhow::Result<Outcome> {
        let mut body = String::new();
        exchange.input.read_to_string(&mut body).await?;

        let req = &exchange.request;
        let text = format!(
            "{} {}\nsession: {:?} ({:?})\nbody: {} chars\n",
            req.method,
            req.uri,
            req.session_id,
            req.session_source,
            body.chars().count()
        );
        let out = &mut exchange.output;
        out.head_mut().add_header("Content-Type", "text/plain");
        out.head_mut().character_encoding = Some("UTF-8".to_string());
        out.write_str(&text).await?;
        Ok(Outcome::Handled)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(Pipeline::new().stage(Describe));

    let http = Arc::new(HttpProcessor::new(
        Arc::clone(&dispatcher),
        &cfg.connector,
        info_span!("http_connector"),
    ));
    let http_pool = Arc::new(ProcessorPool::new(http, &cfg.pool, Span::current()));

    let wire_pool = cfg.server.wire_addr.as_ref().map(|_| {
        let service = Arc::new(WireService::new(Arc::clone(&dispatcher), &cfg.connector));
        let wire = Arc::new(WireProcessor::new(service, info_span!("wire_connector")));
        Arc::new(ProcessorPool::new(wire, &cfg.pool, Span::current()))
    });

    let wire = async {
        match (&cfg.server.wire_addr, &wire_pool) {
            (Some(addr), Some(pool)) => listener::run(addr, Arc::clone(pool)).await,
            _ => std::future::pending().await,
        }
    };

    tokio::select! {
        res = listener::run(&cfg.server.listen_addr, Arc::clone(&http_pool)) => {
            res?;
        }

        res = wire => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    http_pool.shutdown().await;
    if let Some(pool) = wire_pool {
        pool.shutdown().await;
    }

    Ok(())
}

//! Demo: a three-member committee multiplexed over one transport, then a
//! fan-out matrix fill with one deliberately failing cell.
//!
//! Run with: cargo run -p committee-demo

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use canvas_streams_core::{
    ByteStream, ContentSink, Frame, Producer, ProducerError, TransportError,
};
use canvas_streams_router::{CommitteeRouter, Demultiplexer, FanoutCoordinator, FanoutUnit};
use canvas_streams_session::{RegistryHooks, SessionRegistry};
use futures::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Producer replaying a canned SSE body in small chunks, the way a real
/// streaming backend delivers it.
struct CannedProducer {
    body: &'static str,
}

#[async_trait]
impl Producer for CannedProducer {
    async fn open(&self) -> Result<ByteStream, ProducerError> {
        let chunks: Vec<Result<Bytes, TransportError>> = self
            .body
            .as_bytes()
            .chunks(17)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }
}

struct FailingProducer;

#[async_trait]
impl Producer for FailingProducer {
    async fn open(&self) -> Result<ByteStream, ProducerError> {
        Err(ProducerError::Handshake {
            status: 429,
            message: "rate limit exceeded".into(),
        })
    }
}

/// Sink that prints deliveries instead of rendering them.
struct PrintSink;

impl ContentSink for PrintSink {
    fn on_content(&self, id: &str, delta: &str, _accumulated: &str) {
        println!("  [{id}] += {delta:?}");
    }
    fn on_event(&self, id: &str, frame: &Frame) {
        println!("  [{id}] event {} {:?}", frame.event, frame.data);
    }
    fn on_done(&self, id: &str, content: &str) {
        println!("  [{id}] done: {content:?}");
    }
    fn on_error(&self, id: &str, message: &str) {
        println!("  [{id}] ERROR: {message}");
    }
}

/// Stand-in for a UI stop control shared by a whole group.
struct StopButton;

impl RegistryHooks for StopButton {
    fn group_activated(&self, group: &str) {
        println!("  (stop button shown for {group})");
    }
    fn group_deactivated(&self, group: &str) {
        println!("  (stop button hidden for {group})");
    }
}

const COMMITTEE_BODY: &str = "\
event: opinion_start\ndata: {\"index\":0,\"model\":\"gpt-4o\"}\n\n\
event: opinion_start\ndata: {\"index\":1,\"model\":\"claude\"}\n\n\
event: opinion_chunk\ndata: {\"index\":0,\"content\":\"Yes, \"}\n\n\
event: opinion_chunk\ndata: {\"index\":1,\"content\":\"No -- \"}\n\n\
event: opinion_chunk\ndata: {\"index\":0,\"content\":\"with caveats.\"}\n\n\
event: opinion_chunk\ndata: {\"index\":1,\"content\":\"too risky.\"}\n\n\
event: opinion_done\ndata: {\"index\":0,\"full_content\":\"Yes, with caveats.\"}\n\n\
event: opinion_done\ndata: {\"index\":1,\"full_content\":\"No -- too risky.\"}\n\n\
event: synthesis_start\ndata: {}\n\n\
event: synthesis_chunk\ndata: {\"content\":\"The committee is split.\"}\n\n\
event: synthesis_done\ndata: {}\n\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let registry = Arc::new(SessionRegistry::with_hooks(Arc::new(StopButton)));
    let sink: Arc<dyn ContentSink> = Arc::new(PrintSink);

    println!("-- committee (one shared transport, demultiplexed) --");
    let demux = Demultiplexer::new(
        Arc::clone(&registry),
        Arc::clone(&sink),
        Arc::new(CommitteeRouter),
        "committee-1",
        "committee",
    );
    demux
        .run(&CannedProducer {
            body: COMMITTEE_BODY,
        })
        .await?;

    println!("-- matrix fill (fan-out, one transport per cell) --");
    let coordinator = FanoutCoordinator::new(Arc::clone(&registry), sink);
    let report = coordinator
        .run(
            "matrix-fill",
            vec![
                FanoutUnit::new(
                    "cell-a1",
                    "matrix",
                    Arc::new(CannedProducer {
                        body: "data: 42\n\nevent: done\ndata: \n\n",
                    }),
                ),
                FanoutUnit::new("cell-a2", "matrix", Arc::new(FailingProducer)),
                FanoutUnit::new(
                    "cell-a3",
                    "matrix",
                    Arc::new(CannedProducer {
                        body: "data: 7\n\nevent: done\ndata: \n\n",
                    }),
                ),
            ],
        )
        .await;

    println!(
        "batch settled: {} ok, {} failed",
        report.outcomes.len() - report.failures(),
        report.failures()
    );
    Ok(())
}

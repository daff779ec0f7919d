//! Demo driver: runs one task through its whole life.
//!
//! Posts a task, places and accepts a bid, completes and verifies the
//! delivery, then polls the escrow status until the dispute window elapses
//! and the payment flips. Events are echoed to the log through an extra
//! sink so the fan-out is visible without a webhook receiver.

use std::sync::Arc;

use tokio::time::{Duration, sleep};
use tracing::info;

use gigmesh_core::app::{Engine, EngineConfig};
use gigmesh_core::domain::{BidDraft, LifecycleEvent, TaskDraft, TaskStatus};
use gigmesh_core::escrow::EscrowConfig;
use gigmesh_core::ports::EventSink;

/// Echo every lifecycle event into the log.
struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: LifecycleEvent) {
        info!(event = event.name(), payload = %event.payload(), "event");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // 1.5s dispute window so the delayed release is observable
    let engine = Engine::builder()
        .config(EngineConfig {
            escrow: EscrowConfig {
                enabled: true,
                delay_ms: 1_500,
                min_amount: 0.1,
                max_amount: 10_000.0,
            },
            ..EngineConfig::default()
        })
        .add_sink(Arc::new(LogSink))
        .start()
        .expect("engine start");

    let task = engine
        .create_task(TaskDraft {
            title: "Summarize 20 research papers".into(),
            description: "One paragraph each, grouped by topic".into(),
            budget: 100.0,
            currency: None,
            deadline: Some(chrono::Utc::now() + chrono::Duration::hours(24)),
            required_capabilities: vec!["research".into(), "writing".into()],
            requester: "agent-requester".into(),
        })
        .await
        .expect("create task");
    info!(task_id = %task.id, "task posted");

    let bid = engine
        .place_bid(
            task.id,
            BidDraft {
                bidder: "agent-worker".into(),
                amount: 90.0,
                estimated_duration: Some("3h".into()),
                message: Some("done this corpus before".into()),
            },
        )
        .await
        .expect("place bid");

    engine.accept_bid(task.id, bid.id).await.expect("accept bid");
    engine
        .complete_task(task.id, "agent-worker", Some("ipfs://QmSummaries".into()))
        .await
        .expect("complete task");
    engine.verify_task(task.id).await.expect("verify task");
    info!(task_id = %task.id, "verified, dispute window open");

    // poll until the timer fires and the payment flips
    loop {
        let status = engine.escrow_status(task.id).await.expect("escrow status");
        info!(
            status = %status.status,
            held = status.held,
            scheduled = status.release_scheduled,
            "escrow"
        );
        if status.status == TaskStatus::Paid {
            info!(
                payment_ref = status.payment_ref.as_deref().unwrap_or(""),
                amount = status.amount.unwrap_or(0.0),
                "payment released"
            );
            break;
        }
        sleep(Duration::from_millis(300)).await;
    }

    let counts = engine.counts().await;
    info!(?counts, "final store counts");

    engine.shutdown_and_join().await;
}

//! Blocking aggregation equals the concatenation of streamed deltas

use async_trait::async_trait;
use futures::StreamExt;
use genpipe::channel::LocalBackend;
use genpipe::event::{EventKind, MessageEndPayload};
use genpipe::orchestrator::{GenerateArgs, GenerationOrchestrator, OrchestratorSettings};
use genpipe::pipeline::{Frame, PipelineOutput};
use genpipe::principal::SourcePrincipalResolver;
use genpipe::request::{GenerationInputs, InvokeFrom, ModelConfig, OrchestrationConfig};
use genpipe::runner::{AppRunner, RunContext, RunError, RunnerSet};
use genpipe::store::MemoryGenerationStore;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

struct DeltaRunner {
    deltas: Vec<String>,
}

#[async_trait]
impl AppRunner for DeltaRunner {
    async fn run(&self, ctx: &RunContext) -> Result<MessageEndPayload, RunError> {
        for delta in &self.deltas {
            ctx.checkpoint()?;
            ctx.publish_message(delta).await?;
        }
        Ok(MessageEndPayload::default())
    }
}

fn orchestrator(deltas: Vec<String>) -> GenerationOrchestrator {
    GenerationOrchestrator::new(
        OrchestratorSettings::default(),
        Arc::new(LocalBackend::new(4)),
        Arc::new(MemoryGenerationStore::new()),
        Arc::new(SourcePrincipalResolver),
        RunnerSet::new(Arc::new(DeltaRunner { deltas })),
    )
}

fn args(stream: bool) -> GenerateArgs {
    GenerateArgs {
        tenant_id: "tenant".to_string(),
        app_id: "app".to_string(),
        principal_id: "user".to_string(),
        invoke_from: InvokeFrom::ServiceApi,
        inputs: GenerationInputs::with_query("q"),
        orchestration: OrchestrationConfig::new(ModelConfig {
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            mode: None,
            parameters: BTreeMap::new(),
            stop: Vec::new(),
        }),
        stream,
        conversation_id: None,
    }
}

#[test]
fn test_blocking_answer_matches_streamed_deltas() {
    let mut runner = proptest::test_runner::TestRunner::default();
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    runner
        .run(&prop::collection::vec("[a-z ]{0,6}", 0..12), |deltas| {
            rt.block_on(async {
                let expected: String = deltas.concat();

                let blocking = orchestrator(deltas.clone());
                let message = match blocking.generate(args(false)).await.unwrap() {
                    PipelineOutput::Blocking(response) => response.message,
                    other => panic!("expected blocking output, got {:?}", other),
                };
                assert_eq!(message, expected);

                let streaming = orchestrator(deltas.clone());
                let frames: Vec<Frame> = match streaming.generate(args(true)).await.unwrap() {
                    PipelineOutput::Streaming(stream) => stream.collect().await,
                    other => panic!("expected streaming output, got {:?}", other),
                };
                let streamed: String = frames
                    .iter()
                    .filter(|frame| frame.kind() == EventKind::Message)
                    .filter_map(|frame| frame.body())
                    .filter_map(|body| body["data"]["text"].as_str().map(str::to_string))
                    .collect();
                assert_eq!(streamed, expected);
                assert_eq!(frames.len(), deltas.len() + 1);
                assert_eq!(frames.last().map(Frame::kind), Some(EventKind::MessageEnd));
            });
            Ok(())
        })
        .unwrap();
}

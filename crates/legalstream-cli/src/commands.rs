//! Subcommand execution.

use crate::Command;
use anyhow::{Context, Result};
use legalstream_core::{
    ChannelSink, DocumentResponse, InferenceResponse, JobHandle, SearchResponse, SimilarityResponse,
    SinkEvent, StreamingClient,
};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info};

/// Run one subcommand. Returns `false` if the stream ended with a failure.
pub async fn run(client: &StreamingClient, command: Command) -> Result<bool> {
    match command {
        Command::Embed { session, chunks } => {
            let (sink, events) = ChannelSink::<InferenceResponse>::new();
            let id = match session {
                Some(id) => client.start_session(id, sink).await?,
                None => client.start_session_auto(sink).await?,
            };
            info!("Session {} started", id);

            let last = chunks.len().saturating_sub(1);
            for (i, chunk) in chunks.iter().enumerate() {
                client
                    .send_embedding_chunk(&id, chunk, i == last)
                    .await
                    .with_context(|| format!("sending chunk {} on {}", i, id))?;
            }
            report(events).await
        }

        Command::SearchVector { session, vector } => {
            let (sink, events) = ChannelSink::<InferenceResponse>::new();
            let id = match session {
                Some(id) => client.start_session(id, sink).await?,
                None => client.start_session_auto(sink).await?,
            };
            client.send_search_vector(&id, vector, true).await?;
            report(events).await
        }

        Command::Document { id, doc_type, file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let (sink, events) = ChannelSink::<DocumentResponse>::new();
            let job = client
                .run_document_job(&id, &content, &doc_type, sink)
                .await?;
            finish_job(job, events).await
        }

        Command::Search {
            query,
            collection,
            top_k,
        } => {
            let (sink, events) = ChannelSink::<SearchResponse>::new();
            let job = client
                .run_semantic_search(&query, &collection, top_k, sink)
                .await?;
            finish_job(job, events).await
        }

        Command::Similarity { base, compare } => {
            let (sink, events) = ChannelSink::<SimilarityResponse>::new();
            let job = client
                .run_similarity_analysis(&base, compare, sink)
                .await?;
            finish_job(job, events).await
        }
    }
}

async fn finish_job<M: Serialize>(
    job: JobHandle,
    events: UnboundedReceiver<SinkEvent<M>>,
) -> Result<bool> {
    let succeeded = report(events).await?;
    let status = job.wait().await;
    info!("Job {} finished: {}", job.id(), status);
    Ok(succeeded && status.is_ok())
}

/// Print every event as a JSON line until the stream completes.
async fn report<M: Serialize>(mut events: UnboundedReceiver<SinkEvent<M>>) -> Result<bool> {
    let mut succeeded = true;
    while let Some(event) = events.recv().await {
        match event {
            SinkEvent::Message(message) => println!("{}", serde_json::to_string(&message)?),
            SinkEvent::Error(message) => {
                error!("Stream failed: {}", message);
                println!("{}", json!({ "error": message }));
                succeeded = false;
            }
            SinkEvent::Completed => {
                println!("{}", json!({ "completed": true }));
                break;
            }
        }
    }
    Ok(succeeded)
}

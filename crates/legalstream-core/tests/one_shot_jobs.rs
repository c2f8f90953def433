//! Integration tests for document, search and similarity jobs.

use legalstream_core::{
    codec, ChannelSink, DocumentRequest, DocumentResponse, FnSink, MemoryChannel, SearchHit,
    SearchRequest, SearchResponse, ServiceConfig, SimilarityRequest, SimilarityResponse,
    SinkEvent, Status, StatusCode, StreamingClient,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_document_job_requests_contract_stages() {
    let (channel, mut acceptor) = MemoryChannel::new();
    let client = StreamingClient::new(channel);
    let (sink, mut rx) = ChannelSink::<DocumentResponse>::new();

    let job = client
        .run_document_job("doc-1", "This Agreement is made...", "contract", sink)
        .await
        .unwrap();

    let peer = acceptor.accept().await.unwrap();
    assert_eq!(peer.method(), ServiceConfig::PROCESS_DOCUMENT);
    let request: DocumentRequest = codec::decode(peer.request().unwrap()).unwrap();
    assert_eq!(request.document_id, "doc-1");
    assert!(request.flags.extract_entities);
    assert!(request.flags.generate_summary);
    assert!(request.flags.compute_embeddings);
    assert!(request.flags.analyze_sentiment);
    assert!(request.flags.detect_clauses);

    for stage in ["entities", "summary"] {
        let update = DocumentResponse {
            document_id: "doc-1".to_string(),
            stage: Some(stage.to_string()),
            ..Default::default()
        };
        assert!(peer.send(codec::encode(&update).unwrap()));
    }
    peer.finish(Status::ok());

    assert!(job.wait().await.is_ok());
    let mut stages = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            SinkEvent::Message(m) => stages.push(m.stage.unwrap_or_default()),
            SinkEvent::Completed => break,
            SinkEvent::Error(e) => panic!("unexpected error {}", e),
        }
    }
    assert_eq!(stages, vec!["entities", "summary"]);
    assert_eq!(client.outstanding_jobs(), 0);
}

#[tokio::test]
async fn test_non_contract_skips_clause_detection() {
    let (channel, mut acceptor) = MemoryChannel::new();
    let client = StreamingClient::new(channel);
    let (sink, _rx) = ChannelSink::<DocumentResponse>::new();

    let job = client
        .run_document_job("brief-7", "The appellant argues...", "brief", sink)
        .await
        .unwrap();
    let peer = acceptor.accept().await.unwrap();
    let request: DocumentRequest = codec::decode(peer.request().unwrap()).unwrap();
    assert!(!request.flags.detect_clauses);
    assert!(request.flags.extract_entities);

    peer.finish(Status::ok());
    job.wait().await;
}

#[tokio::test]
async fn test_semantic_search_streams_hits() {
    let (channel, mut acceptor) = MemoryChannel::new();
    let client = StreamingClient::new(channel);
    let (sink, mut rx) = ChannelSink::<SearchResponse>::new();

    let job = client
        .run_semantic_search("breach of warranty", "case_law", 3, sink)
        .await
        .unwrap();

    let peer = acceptor.accept().await.unwrap();
    assert_eq!(peer.method(), ServiceConfig::SEMANTIC_SEARCH);
    let request: SearchRequest = codec::decode(peer.request().unwrap()).unwrap();
    assert_eq!(request.collection_name, "case_law");
    assert!(request.enable_reranking);
    assert!(request.filters.document_types.is_empty());
    assert!(request.filters.jurisdictions.is_empty());

    let batch = SearchResponse {
        query_id: "q-1".to_string(),
        results: vec![SearchHit {
            document_id: "case-42".to_string(),
            score: 0.91,
            snippet: None,
        }],
    };
    assert!(peer.send(codec::encode(&batch).unwrap()));
    peer.finish(Status::ok());

    match rx.recv().await.unwrap() {
        SinkEvent::Message(m) => assert_eq!(m, batch),
        other => panic!("expected message, got {:?}", other),
    }
    assert_eq!(rx.recv().await.unwrap(), SinkEvent::Completed);
    assert!(job.wait().await.is_ok());
}

#[tokio::test]
async fn test_similarity_failure_reported_once() {
    let (channel, mut acceptor) = MemoryChannel::new();
    let client = StreamingClient::new(channel);

    let errors = Arc::new(AtomicUsize::new(0));
    let completions = Arc::new(AtomicUsize::new(0));
    let sink = {
        let errors = errors.clone();
        let completions = completions.clone();
        Arc::new(
            FnSink::<SimilarityResponse>::new()
                .on_error(move |_| {
                    errors.fetch_add(1, Ordering::SeqCst);
                })
                .on_completion(move || {
                    completions.fetch_add(1, Ordering::SeqCst);
                }),
        )
    };

    let job = client
        .run_similarity_analysis("case-1", vec!["case-2".into(), "case-3".into()], sink)
        .await
        .unwrap();

    let peer = acceptor.accept().await.unwrap();
    assert_eq!(peer.method(), ServiceConfig::CASE_SIMILARITY);
    let request: SimilarityRequest = codec::decode(peer.request().unwrap()).unwrap();
    assert_eq!(request.compare_case_ids.len(), 2);
    assert!(request.requested_metrics.factual_similarity);
    assert!(request.requested_metrics.procedural_similarity);
    peer.finish(Status::new(StatusCode::Unavailable, "index offline"));

    let status = job.wait().await;
    assert_eq!(status.code, StatusCode::Unavailable);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancelled_job_completes_without_further_messages() {
    let (channel, mut acceptor) = MemoryChannel::new();
    let client = StreamingClient::new(channel);
    let (sink, mut rx) = ChannelSink::<SearchResponse>::new();

    let job = client
        .run_semantic_search("estoppel", "case_law", 10, sink)
        .await
        .unwrap();
    let peer = acceptor.accept().await.unwrap();

    job.cancel();
    let late = SearchResponse {
        query_id: "late".to_string(),
        results: vec![],
    };
    peer.send(codec::encode(&late).unwrap());
    peer.finish(Status::ok());

    assert_eq!(job.wait().await.code, StatusCode::Cancelled);
    assert_eq!(rx.recv().await.unwrap(), SinkEvent::Completed);
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_cancel_completes_while_remote_stays_silent() {
    let (channel, mut acceptor) = MemoryChannel::new();
    let client = StreamingClient::new(channel);
    let (sink, mut rx) = ChannelSink::<SearchResponse>::new();

    let job = client
        .run_semantic_search("res judicata", "case_law", 10, sink)
        .await
        .unwrap();
    // Kept alive and never finished.
    let _peer = acceptor.accept().await.unwrap();

    job.cancel();

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("completion after cancel");
    assert_eq!(event, Some(SinkEvent::Completed));
    let status = tokio::time::timeout(Duration::from_secs(2), job.wait())
        .await
        .expect("job status after cancel");
    assert_eq!(status.code, StatusCode::Cancelled);
    assert!(job.is_finished());
    assert_eq!(client.outstanding_jobs(), 0);
}

#[tokio::test]
async fn test_job_open_failure_returned_to_caller() {
    let (channel, _acceptor) = MemoryChannel::new();
    channel.disconnect();
    let client = StreamingClient::new(channel);
    let (sink, mut rx) = ChannelSink::<SearchResponse>::new();

    let err = client
        .run_semantic_search("q", "case_law", 1, sink)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::Unavailable);
    assert_eq!(client.outstanding_jobs(), 0);
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_shutdown_cancels_outstanding_jobs() {
    let (channel, mut acceptor) = MemoryChannel::new();
    let client = StreamingClient::new(channel);
    let (sink, mut rx) = ChannelSink::<SearchResponse>::new();

    let job = client
        .run_semantic_search("laches", "case_law", 5, sink)
        .await
        .unwrap();
    let peer = acceptor.accept().await.unwrap();

    let finisher = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        peer.finish(Status::cancelled("client went away"));
    });

    client.shutdown().await;
    finisher.await.unwrap();

    assert!(job.is_finished());
    assert_eq!(client.outstanding_jobs(), 0);
    let mut completed = 0;
    while let Some(event) = rx.recv().await {
        if event == SinkEvent::Completed {
            completed += 1;
        }
    }
    assert_eq!(completed, 1);
}

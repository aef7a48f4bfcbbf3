/// End-to-end integration tests for the repochat pipeline.
///
/// Tests the complete flow:
///   Source → Chunker → Index → Save/Load → Session (rewrite, retrieve, compose, generate)
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use repochat::config::Config;
use repochat::conversation::TurnOutcome;
use repochat::embedder::Embedder;
use repochat::embedder::mock::MockEmbedder;
use repochat::index::{DistanceMetric, IndexCatalog, VectorIndex};
use repochat::indexer::core::Indexer;
use repochat::indexer::source::{FsSource, VecSource};
use repochat::llm::mock::MockGenerator;
use repochat::models::Document;
use repochat::retriever::Retriever;
use repochat::session::{Session, SessionPhase};
use repochat::{CapabilityError, IndexError, SessionError};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

const DIMS: usize = 512;

fn config() -> Config {
    let mut config = Config::default();
    config.embedding.dimensions = DIMS;
    config
}

fn demo_docs() -> Vec<Document> {
    vec![
        Document::new(
            "src/config.rs",
            "pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {\n    \
             let raw = std::fs::read_to_string(path)?;\n    \
             toml::from_str(&raw).map_err(ConfigError::Parse)\n}\n",
        ),
        Document::new(
            "src/errors.rs",
            "pub enum ConfigError {\n    Io(std::io::Error),\n    Parse(toml::de::Error),\n}\n\
             // error handling: every failure in parse_config maps into ConfigError\n",
        ),
        Document::new(
            "src/server.rs",
            "pub async fn serve(addr: SocketAddr) {\n    let listener = TcpListener::bind(addr).await;\n}\n",
        ),
        Document::new(
            "src/render.rs",
            "fn render_page(template: &Template) -> Html {\n    template.render()\n}\n",
        ),
        Document::new("README.md", "# Demo\n\nA small demo service.\n"),
    ]
}

async fn demo_index(embedder: &MockEmbedder) -> VectorIndex {
    let config = config();
    let indexer = Indexer::new(&config, embedder).unwrap();
    let (index, _) = indexer
        .build("demo", &mut VecSource::new(demo_docs()))
        .await
        .unwrap();
    index
}

async fn demo_session(generator: MockGenerator, config: &Config) -> (Session, Arc<VectorIndex>) {
    let embedder = MockEmbedder::new(DIMS);
    let index = Arc::new(demo_index(&embedder).await);
    let session = Session::new(index.clone(), Arc::new(embedder), Arc::new(generator), config).unwrap();
    (session, index)
}

/// Full pipeline: files on disk → index → catalog → session answer
#[tokio::test]
async fn test_full_pipeline() {
    let temp_dir = tempdir().unwrap();
    let repo_dir = temp_dir.path().join("demo");
    fs::create_dir_all(repo_dir.join("src")).unwrap();
    fs::create_dir_all(repo_dir.join("node_modules/dep")).unwrap();
    for doc in demo_docs() {
        fs::write(repo_dir.join(&doc.path), doc.text).unwrap();
    }
    fs::write(repo_dir.join("node_modules/dep/index.js"), "module.exports = {}").unwrap();

    let mut config = config();
    config.index.store_dir = temp_dir.path().join("stores");
    let embedder = MockEmbedder::new(DIMS);
    let catalog = IndexCatalog::new(&config.index.store_dir);

    let (built, stats) = Indexer::new(&config, &embedder)
        .unwrap()
        .index_into("demo", &mut FsSource::new(&repo_dir), &catalog)
        .await
        .unwrap();
    assert_eq!(stats.documents, 5, "node_modules is skipped");
    assert_eq!(stats.units, 5);
    assert_eq!(catalog.list().unwrap(), vec!["demo"]);

    let loaded = catalog.open("demo").unwrap();
    assert_eq!(loaded, built);
    assert_eq!(loaded.document_count(), 5);

    let session = Session::new(
        Arc::new(loaded),
        Arc::new(embedder),
        Arc::new(MockGenerator::with_responses(vec![
            "The server listens in src/server.rs.".into(),
        ])),
        &config,
    )
    .unwrap();
    let answer = session.ask("How does the server accept a TcpListener?").await.unwrap();
    assert_eq!(answer.context_units[0].source_path, "src/server.rs");
    assert!(answer.source_files().contains(&"src/server.rs"));
}

#[tokio::test]
async fn test_2500_char_file_yields_four_units() {
    let mut text = String::new();
    for _ in 0..41 {
        text.push_str(&"a".repeat(59));
        text.push('\n');
    }
    text.push_str(&"b".repeat(40));
    assert_eq!(text.chars().count(), 2500);

    let embedder = MockEmbedder::new(DIMS);
    let indexer = Indexer::new(&config(), &embedder).unwrap();
    let (index, _) = indexer
        .build("big", &mut VecSource::new(vec![Document::new("src/big.rs", text.clone())]))
        .await
        .unwrap();
    assert_eq!(index.len(), 4);

    let units: Vec<_> = index.units().collect();
    assert_eq!(units[0].start_offset, 0);
    assert_eq!(units[3].end_offset, text.len());
    for pair in units.windows(2) {
        assert!(pair[0].end_offset - pair[1].start_offset >= 200);
    }
}

#[tokio::test]
async fn test_search_returns_min_of_k_and_len() {
    let embedder = MockEmbedder::new(DIMS);
    let indexer = Indexer::new(&config(), &embedder).unwrap();
    let (index, _) = indexer
        .build("three", &mut VecSource::new(demo_docs().into_iter().take(3)))
        .await
        .unwrap();
    assert_eq!(index.len(), 3);

    let query = embedder.embed("anything at all").await.unwrap();
    assert_eq!(index.search(&query, 6).unwrap().len(), 3);
    assert_eq!(index.search(&query, 2).unwrap().len(), 2);

    let empty = VectorIndex::new("none", DIMS, DistanceMetric::Cosine);
    assert!(empty.search(&query, 6).unwrap().is_empty());
}

#[tokio::test]
async fn test_index_round_trip_preserves_search() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("demo.db");
    let embedder = MockEmbedder::new(DIMS);
    let index = demo_index(&embedder).await;
    index.save(&path).unwrap();
    let loaded = VectorIndex::load(&path).unwrap();

    for query in ["parse_config", "error handling", "render html", "", "serve TcpListener"] {
        let vector = embedder.embed(query).await.unwrap();
        for k in [0, 1, 3, 5, 10] {
            assert_eq!(
                loaded.search(&vector, k).unwrap(),
                index.search(&vector, k).unwrap(),
                "query {query:?}, k {k}"
            );
        }
    }
}

#[tokio::test]
async fn test_retrieval_is_deterministic() {
    let embedder = Arc::new(MockEmbedder::new(DIMS));
    let index = Arc::new(demo_index(&embedder).await);
    let retriever = Retriever::new(index, embedder).unwrap();
    let first = retriever.retrieve("config error handling", 4).await.unwrap();
    for _ in 0..10 {
        assert_eq!(retriever.retrieve("config error handling", 4).await.unwrap(), first);
    }
}

/// "What does function X do?" then "What about its error handling?"
#[tokio::test]
async fn test_follow_up_is_rewritten_into_standalone_query() {
    let generator = MockGenerator::with_responses(vec![
        "parse_config in src/config.rs reads the file at path and parses it into Config.".into(),
        "Failures map into ConfigError in src/errors.rs.".into(),
    ]);
    let (session, index) = demo_session(generator.clone(), &config()).await;

    session.ask("What does function parse_config do?").await.unwrap();
    let second = session.ask("What about its error handling?").await.unwrap();

    assert!(second.standalone_query.contains("parse_config"));
    assert!(second.standalone_query.ends_with("What about its error handling?"));

    let retriever = Retriever::new(index, Arc::new(MockEmbedder::new(DIMS))).unwrap();
    let units = retriever.retrieve(&second.standalone_query, 3).await.unwrap();
    assert!(
        units.iter().any(|u| u.text.contains("fn parse_config")),
        "rewritten query finds parse_config: {units:?}"
    );

    let history = session.history().unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|t| t.outcome == TurnOutcome::Answered));

    let requests = generator.requests();
    assert_eq!(requests[1].question, second.standalone_query);
    assert_eq!(requests[1].history.len(), 1);
}

#[tokio::test]
async fn test_second_question_while_awaiting_is_rejected() {
    let generator = MockGenerator::default().with_delay(Duration::from_millis(300));
    let (session, _) = demo_session(generator, &config()).await;
    let session = Arc::new(session);

    let in_flight = tokio::spawn({
        let session = session.clone();
        async move { session.ask("first question").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(session.phase(), SessionPhase::AwaitingAnswer);
    assert!(matches!(session.ask("second question").await, Err(SessionError::Busy)));
    assert!(matches!(session.clear(), Err(SessionError::Busy)));

    in_flight.await.unwrap().unwrap();
    assert_eq!(session.phase(), SessionPhase::Idle);
    assert_eq!(session.history().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancelled_question_appends_nothing() {
    let generator = MockGenerator::default().with_delay(Duration::from_secs(5));
    let (session, _) = demo_session(generator, &config()).await;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        }
    });

    let result = session.ask_with_cancel("slow question", cancel).await;
    assert!(matches!(result, Err(SessionError::Cancelled)));
    assert!(session.history().unwrap().is_empty());
    assert_eq!(session.phase(), SessionPhase::Idle);
}

#[tokio::test]
async fn test_generation_timeout_is_retryable_failed_turn() {
    let mut config = config();
    config.session.capability_timeout_secs = 1;
    let generator = MockGenerator::default().with_delay(Duration::from_secs(5));
    let (session, _) = demo_session(generator, &config).await;

    let err = session.ask("will time out").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Capability(CapabilityError::Timeout {
            capability: "generation",
            ..
        })
    ));
    assert!(err.is_retryable());

    let history = session.history().unwrap();
    assert_eq!(history.len(), 1);
    assert!(matches!(history[0].outcome, TurnOutcome::Failed { .. }));
    assert!(history[0].cited_units.is_empty());
}

#[tokio::test]
async fn test_query_embedding_failure_is_recorded() {
    let embedder = MockEmbedder::new(DIMS);
    let index = Arc::new(demo_index(&embedder).await);
    let session = Session::new(
        index,
        Arc::new(MockEmbedder::new(DIMS).failing_on("POISON")),
        Arc::new(MockGenerator::default()),
        &config(),
    )
    .unwrap();

    let err = session.ask("what about POISON?").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Capability(CapabilityError::Embedding(_))
    ));
    assert_eq!(session.history().unwrap().len(), 1);

    // The session stays usable.
    session.ask("what about config?").await.unwrap();
    assert_eq!(session.history().unwrap().len(), 2);
}

#[tokio::test]
async fn test_empty_retrieval_still_answers() {
    let generator = MockGenerator::default();
    let session = Session::new(
        Arc::new(VectorIndex::new("empty", DIMS, DistanceMetric::Cosine)),
        Arc::new(MockEmbedder::new(DIMS)),
        Arc::new(generator.clone()),
        &config(),
    )
    .unwrap();

    let answer = session.ask("Where is main?").await.unwrap();
    assert!(answer.context_units.is_empty());
    assert!(answer.sources.is_empty());
    assert!(generator.requests()[0].render().contains("No matching code found"));
}

#[tokio::test]
async fn test_concurrent_sessions_share_one_index() {
    let embedder = Arc::new(MockEmbedder::new(DIMS));
    let index = Arc::new(demo_index(&embedder).await);
    let generator = Arc::new(MockGenerator::default().with_delay(Duration::from_millis(50)));

    let a = Session::new(index.clone(), embedder.clone(), generator.clone(), &config()).unwrap();
    let b = Session::new(index.clone(), embedder.clone(), generator.clone(), &config()).unwrap();

    let (ra, rb) = tokio::join!(a.ask("parse_config"), b.ask("render_page"));
    ra.unwrap();
    rb.unwrap();
    assert_eq!(a.history().unwrap().len(), 1);
    assert_eq!(b.history().unwrap().len(), 1);
    assert_eq!(index.len(), 5);
}

#[tokio::test]
async fn test_conversation_length_tracks_questions() {
    let mut config = config();
    config.conversation.max_turns = 3;
    let (session, _) = demo_session(MockGenerator::default(), &config).await;

    for i in 0..5 {
        session.ask(&format!("question {i}")).await.unwrap();
        assert_eq!(session.history().unwrap().len(), (i + 1).min(3));
    }
    let history = session.history().unwrap();
    assert_eq!(history[0].question, "question 2");

    session.submit("clear").await.unwrap();
    assert!(session.history().unwrap().is_empty());
}

#[tokio::test]
async fn test_budget_compliance_through_session() {
    let mut config = config();
    config.composer.token_budget = 700;
    config.chunking.max_size = 400;
    config.chunking.overlap = 50;

    let embedder = MockEmbedder::new(DIMS);
    let docs: Vec<Document> = (0..20)
        .map(|i| Document::new(format!("src/m{i}.rs"), format!("fn handler_{i}() {{}}\n").repeat(40)))
        .collect();
    let (index, _) = Indexer::new(&config, &embedder)
        .unwrap()
        .build("big", &mut VecSource::new(docs))
        .await
        .unwrap();

    let generator = MockGenerator::with_responses(vec!["long answer ".repeat(300)]);
    let session = Session::new(Arc::new(index), Arc::new(embedder), Arc::new(generator.clone()), &config)
        .unwrap();
    for q in ["fn handler", "what about handler_3?", "and the others?"] {
        let answer = session.ask(q).await.unwrap();
        assert!(answer.estimated_tokens <= 700);
    }
    for request in generator.requests() {
        assert!(request.estimated_tokens() <= 700);
    }
}

#[tokio::test]
async fn test_corrupt_index_is_rejected() {
    let dir = tempdir().unwrap();
    let catalog = IndexCatalog::new(dir.path());
    fs::write(catalog.path_for("broken"), b"not an index at all").unwrap();
    assert!(matches!(catalog.open("broken"), Err(IndexError::Corruption(_))));
}

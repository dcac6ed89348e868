//! Two-phase tool-augmented conversation
//!
//! Stream 1 runs with the search tool declared. The first honored
//! `search_and_parse` call pauses forwarding, runs the pipeline with
//! progress narration, appends the exchange to the conversation and opens
//! stream 2 without tools. Once stream 2 ends, whatever stream 1 still has
//! is drained. At most one tool call is ever honored per request.

use crate::conversation::ConversationState;
use crate::error::Error;
use crate::model::ModelClient;
use crate::pipeline::SearchAndExtractPipeline;
use crate::tool::{SearchArgs, ToolDeclaration, SEARCH_TOOL_NAME};
use crate::types::{
    truncate_chars, ModelEvent, OutputFragment, PageOutcome, PageResult, PREVIEW_CHAR_LIMIT,
};
use crate::SYSTEM_PROMPT;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Ordered output of one conversation
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<OutputFragment, Error>> + Send>>;

/// Where a conversation currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Streaming1,
    ToolInvoked,
    ToolRunning,
    ReinjectedStreaming2,
    PlainCompleted,
    Done,
}

fn transition(phase: &mut Phase, next: Phase) {
    debug!(from = ?*phase, to = ?next, "Conversation phase change");
    *phase = next;
}

/// Drives one conversation per [`Orchestrator::run`] call
#[derive(Clone)]
pub struct Orchestrator {
    model: Arc<dyn ModelClient>,
    pipeline: SearchAndExtractPipeline,
    system_prompt: String,
}

impl Orchestrator {
    pub fn new(model: Arc<dyn ModelClient>, pipeline: SearchAndExtractPipeline) -> Self {
        Self {
            model,
            pipeline,
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }

    /// Replace the system instruction
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Answer `query`, yielding fragments as they become available
    ///
    /// The stream ends after the first `Err` item.
    pub fn run(&self, query: impl Into<String>) -> FragmentStream {
        let model = Arc::clone(&self.model);
        let pipeline = self.pipeline.clone();
        let mut conversation = ConversationState::new(self.system_prompt.clone(), query);

        Box::pin(async_stream::stream! {
            let tool = ToolDeclaration::search_and_parse();
            let mut phase = Phase::Idle;
            let mut tool_used = false;
            // Stream 1 text seen before the tool call, replayed with it
            let mut preamble = String::new();

            transition(&mut phase, Phase::Streaming1);
            let mut first = match model.open_stream(conversation.messages(), Some(&tool)).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!(error = %e, "Failed to open model stream");
                    yield Err(Error::from(e));
                    return;
                }
            };

            while let Some(event) = first.next().await {
                let call = match event {
                    Ok(ModelEvent::Text(text)) => {
                        if !tool_used {
                            preamble.push_str(&text);
                        }
                        yield Ok(OutputFragment::Model(text));
                        continue;
                    }
                    Ok(ModelEvent::ToolCall(call)) => call,
                    Err(e) => {
                        error!(error = %e, "Model stream failed");
                        yield Err(Error::from(e));
                        return;
                    }
                };

                if call.name != SEARCH_TOOL_NAME {
                    warn!(tool = %call.name, "Ignoring call to unknown tool");
                    continue;
                }
                if tool_used {
                    warn!(tool = %call.name, "Ignoring repeated tool call");
                    continue;
                }
                tool_used = true;
                transition(&mut phase, Phase::ToolInvoked);

                let args = match SearchArgs::from_invocation(&call) {
                    Ok(args) => args,
                    Err(e) => {
                        error!(error = %e, "Rejecting tool call");
                        yield Err(e);
                        return;
                    }
                };

                transition(&mut phase, Phase::ToolRunning);
                yield Ok(OutputFragment::Progress(format!(
                    "\nSearching the web for: {}\n",
                    args.query
                )));

                let result = pipeline.run(&args.query).await;
                for page in result.iter() {
                    for fragment in narrate(page) {
                        yield Ok(fragment);
                    }
                }

                let assistant_text = std::mem::take(&mut preamble);
                if let Err(e) = conversation.push_tool_exchange(assistant_text, call, result) {
                    yield Err(Error::from(e));
                    return;
                }

                transition(&mut phase, Phase::ReinjectedStreaming2);
                let mut second = match model.open_stream(conversation.messages(), None).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        error!(error = %e, "Failed to open follow-up model stream");
                        yield Err(Error::from(e));
                        return;
                    }
                };
                yield Ok(OutputFragment::Progress(
                    "\nFinal response incorporating search results:\n".to_string(),
                ));

                while let Some(event) = second.next().await {
                    match event {
                        Ok(ModelEvent::Text(text)) => yield Ok(OutputFragment::Model(text)),
                        Ok(ModelEvent::ToolCall(call)) => {
                            warn!(tool = %call.name, "Ignoring tool call in follow-up stream");
                        }
                        Err(e) => {
                            error!(error = %e, "Follow-up model stream failed");
                            yield Err(Error::from(e));
                            return;
                        }
                    }
                }

                debug!("Follow-up stream finished, draining first stream");
            }

            if !tool_used {
                transition(&mut phase, Phase::PlainCompleted);
            }
            transition(&mut phase, Phase::Done);
        })
    }
}

/// Progress lines for one page outcome
fn narrate(page: &PageResult) -> Vec<OutputFragment> {
    let url = page.url.as_deref().unwrap_or("unknown URL");
    match &page.outcome {
        PageOutcome::Error(err) => vec![OutputFragment::Error(format!(
            "Error for {}: {}\n",
            url, err
        ))],
        PageOutcome::Content(text) => vec![
            OutputFragment::Progress(format!("Found relevant information from: {}\n", url)),
            OutputFragment::Progress(format!(
                "Summary: {}...\n\n",
                truncate_chars(text, PREVIEW_CHAR_LIMIT)
            )),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ModelError, PageFetchError, SearchError};
    use crate::fetcher::PageFetcher;
    use crate::model::ModelStream;
    use crate::search::SearchClient;
    use crate::types::{Message, PageError, Role, ToolInvocation};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    type Script = Result<Vec<Result<ModelEvent, ModelError>>, ModelError>;

    /// Plays back one script per opened stream and records each request
    #[derive(Default)]
    struct ScriptedModel {
        scripts: Mutex<VecDeque<Script>>,
        requests: Mutex<Vec<(Vec<Message>, bool)>>,
    }

    impl ScriptedModel {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                requests: Mutex::default(),
            })
        }

        fn requests(&self) -> Vec<(Vec<Message>, bool)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn open_stream(
            &self,
            messages: &[Message],
            tool: Option<&ToolDeclaration>,
        ) -> Result<ModelStream, ModelError> {
            self.requests
                .lock()
                .unwrap()
                .push((messages.to_vec(), tool.is_some()));
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ModelError::Transport("no script left".into())));
            Ok(Box::pin(futures::stream::iter(script?)))
        }
    }

    struct CountingSearch {
        result: Result<Vec<String>, SearchError>,
        calls: AtomicUsize,
    }

    impl CountingSearch {
        fn new(result: Result<Vec<String>, SearchError>) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SearchClient for CountingSearch {
        async fn search(&self, _query: &str) -> Result<Vec<String>, SearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    struct Pages(HashMap<&'static str, Result<&'static str, PageFetchError>>);

    #[async_trait]
    impl PageFetcher for Pages {
        async fn fetch(&self, url: &str) -> Result<String, PageFetchError> {
            match self.0.get(url) {
                Some(Ok(body)) => Ok(body.to_string()),
                Some(Err(e)) => Err(e.clone()),
                None => Err(PageFetchError::HttpStatus(404)),
            }
        }
    }

    fn text(s: &str) -> Result<ModelEvent, ModelError> {
        Ok(ModelEvent::Text(s.to_string()))
    }

    fn search_call(query: &str) -> Result<ModelEvent, ModelError> {
        Ok(ModelEvent::ToolCall(
            ToolInvocation::new(SEARCH_TOOL_NAME, json!({ "query": query })).with_id("call_1"),
        ))
    }

    fn orchestrator(model: Arc<ScriptedModel>, search: Arc<CountingSearch>) -> Orchestrator {
        let pages = Pages(HashMap::from([
            ("https://a.example", Ok("<html><body><p>Sunny, 21°C</p></body></html>")),
            ("https://b.example", Err(PageFetchError::HttpStatus(404))),
        ]));
        let pipeline = SearchAndExtractPipeline::new(search, Arc::new(pages));
        Orchestrator::new(model, pipeline)
    }

    /// Concatenated text plus the terminal error, if any
    async fn collect(mut stream: FragmentStream) -> (String, Option<Error>) {
        let mut out = String::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => out.push_str(fragment.text()),
                Err(e) => {
                    assert!(stream.next().await.is_none(), "stream continued after error");
                    return (out, Some(e));
                }
            }
        }
        (out, None)
    }

    #[tokio::test]
    async fn test_plain_answer_passes_through() {
        let model = ScriptedModel::new(vec![Ok(vec![text("Paris is "), text("the capital.")])]);
        let search = CountingSearch::new(Ok(vec![]));
        let orch = orchestrator(model.clone(), search.clone());

        let (out, err) = collect(orch.run("What is the capital of France?")).await;
        assert!(err.is_none());
        assert_eq!(out, "Paris is the capital.");
        assert_eq!(model.requests().len(), 1);
        assert_eq!(search.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_custom_system_prompt_opens_conversation() {
        let model = ScriptedModel::new(vec![Ok(vec![text("ok")])]);
        let orch = orchestrator(model.clone(), CountingSearch::new(Ok(vec![])))
            .system_prompt("Answer in French.");

        collect(orch.run("hello")).await;
        let requests = model.requests();
        assert_eq!(requests[0].0[0], Message::system("Answer in French."));
        assert_eq!(requests[0].0[1], Message::user("hello"));
    }

    #[tokio::test]
    async fn test_tool_call_flow_output() {
        let model = ScriptedModel::new(vec![
            Ok(vec![search_call("Paris weather today")]),
            Ok(vec![text("It is "), text("sunny.")]),
        ]);
        let search = CountingSearch::new(Ok(vec![
            "https://a.example".into(),
            "https://b.example".into(),
        ]));
        let orch = orchestrator(model.clone(), search.clone());

        let (out, err) = collect(orch.run("today's weather in Paris")).await;
        assert!(err.is_none());
        assert_eq!(
            out,
            "\nSearching the web for: Paris weather today\n\
             Found relevant information from: https://a.example\n\
             Summary: Sunny, 21°C...\n\n\
             Error for https://b.example: Failed to retrieve content: HTTP 404\n\
             \nFinal response incorporating search results:\n\
             It is sunny."
        );

        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].1, "stream 1 declares the tool");
        assert!(!requests[1].1, "stream 2 declares no tool");

        let roles: Vec<_> = requests[1].0.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::ToolResult]
        );
        let payload: serde_json::Value =
            serde_json::from_str(&requests[1].0[3].content_text()).unwrap();
        assert_eq!(
            payload,
            json!([
                {"url": "https://a.example", "content": "Sunny, 21°C"},
                {"url": "https://b.example", "error": "Failed to retrieve content: HTTP 404"}
            ])
        );
    }

    #[tokio::test]
    async fn test_second_tool_call_ignored() {
        let model = ScriptedModel::new(vec![
            Ok(vec![search_call("first"), search_call("second"), text(" tail")]),
            Ok(vec![text("answer")]),
        ]);
        let search = CountingSearch::new(Ok(vec![]));
        let orch = orchestrator(model.clone(), search.clone());

        let (out, err) = collect(orch.run("q")).await;
        assert!(err.is_none());
        assert_eq!(search.calls.load(Ordering::SeqCst), 1);
        assert_eq!(model.requests().len(), 2);
        assert!(!out.contains("second"));
        assert!(out.ends_with("answer tail"), "got {:?}", out);
    }

    #[tokio::test]
    async fn test_unknown_tool_does_not_consume_single_use() {
        let model = ScriptedModel::new(vec![
            Ok(vec![
                Ok(ModelEvent::ToolCall(ToolInvocation::new("calculator", json!({})))),
                search_call("real"),
            ]),
            Ok(vec![text("done")]),
        ]);
        let search = CountingSearch::new(Ok(vec![]));
        let orch = orchestrator(model, search.clone());

        let (out, _) = collect(orch.run("q")).await;
        assert_eq!(search.calls.load(Ordering::SeqCst), 1);
        assert!(out.starts_with("\nSearching the web for: real\n"));
    }

    #[tokio::test]
    async fn test_search_failure_still_reaches_follow_up() {
        let model = ScriptedModel::new(vec![
            Ok(vec![search_call("anything")]),
            Ok(vec![text("Sorry, search is down.")]),
        ]);
        let search = CountingSearch::new(Err(SearchError::HttpStatus(500)));
        let orch = orchestrator(model.clone(), search);

        let (out, err) = collect(orch.run("q")).await;
        assert!(err.is_none());
        assert_eq!(
            out,
            "\nSearching the web for: anything\n\
             Error for unknown URL: Serper API request failed with status code 500\n\
             \nFinal response incorporating search results:\n\
             Sorry, search is down."
        );
        assert_eq!(model.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_preamble_text_replayed_with_tool_call() {
        let model = ScriptedModel::new(vec![
            Ok(vec![text("Let me look. "), search_call("x")]),
            Ok(vec![]),
        ]);
        let orch = orchestrator(model.clone(), CountingSearch::new(Ok(vec![])));

        let (out, _) = collect(orch.run("q")).await;
        assert!(out.starts_with("Let me look. \nSearching the web for: x\n"));
        assert_eq!(
            model.requests()[1].0[2].content_text(),
            "Let me look. "
        );
    }

    #[tokio::test]
    async fn test_model_error_mid_stream_is_terminal() {
        let model = ScriptedModel::new(vec![Ok(vec![
            text("partial"),
            Err(ModelError::Stream("connection reset".into())),
            text("never"),
        ])]);
        let orch = orchestrator(model, CountingSearch::new(Ok(vec![])));

        let (out, err) = collect(orch.run("q")).await;
        assert_eq!(out, "partial");
        assert!(matches!(err, Some(Error::Model(ModelError::Stream(_)))));
    }

    #[tokio::test]
    async fn test_model_open_failure() {
        let model = ScriptedModel::new(vec![Err(ModelError::HttpStatus {
            status: 401,
            body: "invalid key".into(),
        })]);
        let orch = orchestrator(model, CountingSearch::new(Ok(vec![])));

        let (out, err) = collect(orch.run("q")).await;
        assert!(out.is_empty());
        assert!(matches!(
            err,
            Some(Error::Model(ModelError::HttpStatus { status: 401, .. }))
        ));
    }

    #[tokio::test]
    async fn test_invalid_tool_arguments_are_terminal() {
        let model = ScriptedModel::new(vec![Ok(vec![Ok(ModelEvent::ToolCall(
            ToolInvocation::new(SEARCH_TOOL_NAME, json!({"q": "wrong key"})),
        ))])]);
        let search = CountingSearch::new(Ok(vec![]));
        let orch = orchestrator(model, search.clone());

        let (_, err) = collect(orch.run("q")).await;
        assert!(matches!(err, Some(Error::InvalidToolArguments(_))));
        assert_eq!(search.calls.load(Ordering::SeqCst), 0);
    }

    /// Sets its flag when dropped
    struct DropFlag(Arc<std::sync::atomic::AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Stream 1 calls the tool; stream 2 sends one chunk and then hangs
    struct HangingModel {
        opens: AtomicUsize,
        released: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl ModelClient for HangingModel {
        async fn open_stream(
            &self,
            _messages: &[Message],
            _tool: Option<&ToolDeclaration>,
        ) -> Result<ModelStream, ModelError> {
            if self.opens.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(Box::pin(futures::stream::iter(vec![search_call("q")])));
            }
            let guard = DropFlag(Arc::clone(&self.released));
            Ok(Box::pin(
                futures::stream::iter(vec![text("partial")])
                    .chain(futures::stream::pending())
                    .map(move |event| {
                        let _held = &guard;
                        event
                    }),
            ))
        }
    }

    /// Never completes; records whether its future was dropped
    struct HangingFetcher {
        started: AtomicUsize,
        released: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl PageFetcher for HangingFetcher {
        async fn fetch(&self, _url: &str) -> Result<String, PageFetchError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let _guard = DropFlag(Arc::clone(&self.released));
            futures::future::pending::<()>().await;
            Err(PageFetchError::TimedOut)
        }
    }

    #[tokio::test]
    async fn test_dropping_output_releases_model_stream() {
        let model = Arc::new(HangingModel {
            opens: AtomicUsize::new(0),
            released: Arc::default(),
        });
        let pipeline = SearchAndExtractPipeline::new(
            CountingSearch::new(Ok(vec![])),
            Arc::new(Pages(HashMap::new())),
        );
        let orch = Orchestrator::new(model.clone(), pipeline);

        let mut stream = orch.run("q");
        while let Some(item) = stream.next().await {
            if item.unwrap() == OutputFragment::Model("partial".into()) {
                break;
            }
        }
        assert!(!model.released.load(Ordering::SeqCst));

        drop(stream);
        assert!(model.released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dropping_output_cancels_in_flight_fetches() {
        let fetcher = Arc::new(HangingFetcher {
            started: AtomicUsize::new(0),
            released: Arc::default(),
        });
        let pipeline = SearchAndExtractPipeline::new(
            CountingSearch::new(Ok(vec!["https://a.example".into(), "https://b.example".into()])),
            fetcher.clone(),
        );
        let model = ScriptedModel::new(vec![Ok(vec![search_call("q")])]);
        let orch = Orchestrator::new(model, pipeline);

        let mut stream = orch.run("q");
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.text(), "\nSearching the web for: q\n");

        let pending = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(pending.is_err(), "pipeline should still be fetching");
        assert_eq!(fetcher.started.load(Ordering::SeqCst), 2);

        drop(stream);
        assert!(fetcher.released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_narrate_preview_is_capped() {
        let page = PageResult::content("https://long.example", &"z".repeat(900));
        let lines = narrate(&page);
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[1].text(),
            format!("Summary: {}...\n\n", "z".repeat(PREVIEW_CHAR_LIMIT))
        );
    }

    #[test]
    fn test_narrate_error_kinds() {
        let page = PageResult::error("https://x.example", PageError::NoMainContent);
        assert_eq!(
            narrate(&page),
            vec![OutputFragment::Error(
                "Error for https://x.example: No main content extracted\n".into()
            )]
        );
    }
}

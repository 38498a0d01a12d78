//! The selection-analysis handler: binds qualifying sections and runs the
//! analyze-and-render flow for each trigger activation.

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::page::{PageContext, ProjectId, SecurityToken};
use crate::protocol::{
    AnalysisRequest, AnalysisResponse, CONTENT_TYPE_HEADER, CSRF_HEADER, ErrorPayload,
    JSON_CONTENT_TYPE, analyze_path, resolve_education_level,
};
use crate::render::{ANALYZING_PLACEHOLDER, EMPTY_SELECTION_NOTICE, FAILURE_MESSAGE, render_result};
use crate::section::{MissingParts, Notifier, SectionDescriptor, TriggerControl};
use crate::transport::{OutgoingRequest, Transport, TransportError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("page path has no `project/<id>` segment; refusing to build analysis requests")]
    MissingProjectId,
}

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("failed to encode analysis request: {0}")]
    Encode(serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("analysis endpoint returned HTTP {status}")]
    Status { status: u16, detail: Option<String> },

    #[error("malformed analysis response: {0}")]
    Decode(serde_json::Error),

    #[error("failed to render analysis result: {0}")]
    Render(#[from] askama::Error),
}

impl AnalyzeError {
    /// The server's own `error` message, when it sent one.
    pub fn server_detail(&self) -> Option<&str> {
        match self {
            AnalyzeError::Status { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// Trimmed selection was empty; the user was notified and nothing was sent.
    EmptySelection,
    Rendered(AnalysisResponse),
    /// The generic failure message is now displayed.
    Failed,
    /// A newer activation of the same section was issued while this one was in flight.
    Superseded,
}

#[derive(Clone)]
pub struct AnalysisHandler {
    project_id: ProjectId,
    security_token: Option<SecurityToken>,
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn Notifier>,
}

impl AnalysisHandler {
    pub fn new(
        context: PageContext,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ConfigError> {
        let project_id = context.project_id.ok_or(ConfigError::MissingProjectId)?;
        Ok(Self {
            project_id,
            security_token: context.security_token,
            transport,
            notifier,
        })
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// Binds one activation entry point per qualifying section. Incomplete
    /// sections are skipped with a diagnostic.
    pub fn bind<I>(&self, candidates: I) -> Vec<SectionBinding>
    where
        I: IntoIterator<Item = Result<SectionDescriptor, MissingParts>>,
    {
        let mut bindings = Vec::new();
        for (position, candidate) in candidates.into_iter().enumerate() {
            match candidate {
                Ok(section) => bindings.push(SectionBinding {
                    position,
                    handler: self.clone(),
                    section,
                    latest: Mutex::new(0),
                }),
                Err(missing) => debug!(position, %missing, "analysis section not bound"),
            }
        }
        info!(
            project = %self.project_id,
            bound = bindings.len(),
            "analysis sections bound"
        );
        bindings
    }

    fn build_request(
        &self,
        trigger: &TriggerControl,
        selection: &str,
    ) -> Result<OutgoingRequest, AnalyzeError> {
        let payload = AnalysisRequest {
            analysis_id: trigger.analysis_id.clone(),
            selected_text: selection.to_string(),
            education_level: resolve_education_level(trigger.education_level.as_deref()),
        };
        let body = serde_json::to_vec(&payload).map_err(AnalyzeError::Encode)?;
        let mut headers = vec![(CONTENT_TYPE_HEADER.to_string(), JSON_CONTENT_TYPE.to_string())];
        if let Some(token) = &self.security_token {
            headers.push((CSRF_HEADER.to_string(), token.as_str().to_string()));
        }
        Ok(OutgoingRequest {
            path: analyze_path(&self.project_id),
            headers,
            body,
        })
    }

    async fn analyze(
        &self,
        trigger: &TriggerControl,
        selection: &str,
    ) -> Result<AnalysisResponse, AnalyzeError> {
        let request = self.build_request(trigger, selection)?;
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(AnalyzeError::Status {
                status: response.status,
                detail: ErrorPayload::from_body(&response.body).map(|payload| payload.error),
            });
        }
        serde_json::from_slice(&response.body).map_err(AnalyzeError::Decode)
    }
}

/// A qualifying section wired to its handler.
pub struct SectionBinding {
    position: usize,
    handler: AnalysisHandler,
    section: SectionDescriptor,
    /// Sequence of the newest activation. Held while the result container is written.
    latest: Mutex<u64>,
}

impl SectionBinding {
    /// Index of the section among the candidates passed to `bind`.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn section(&self) -> &SectionDescriptor {
        &self.section
    }

    /// Runs one trigger activation against the current selection.
    pub async fn activate(&self, selection: &str) -> ActivationOutcome {
        let selection = selection.trim();
        if selection.is_empty() {
            debug!(position = self.position, "empty selection, nothing sent");
            self.handler.notifier.notify(EMPTY_SELECTION_NOTICE);
            return ActivationOutcome::EmptySelection;
        }

        let result = &self.section.result;
        let sequence = {
            let mut latest = self.latest.lock();
            *latest += 1;
            result.replace_content(ANALYZING_PLACEHOLDER.to_string());
            *latest
        };

        let rendered = self
            .handler
            .analyze(&self.section.trigger, selection)
            .await
            .and_then(|response| {
                let html = render_result(&response)?;
                Ok((response, html))
            });

        let latest = self.latest.lock();
        if *latest != sequence {
            debug!(
                position = self.position,
                sequence, "discarding response for superseded activation"
            );
            return ActivationOutcome::Superseded;
        }

        match rendered {
            Ok((response, html)) => {
                debug!(
                    position = self.position,
                    topics = response.research_topics.len(),
                    "analysis rendered"
                );
                result.replace_content(html);
                ActivationOutcome::Rendered(response)
            }
            Err(err) => {
                warn!(
                    position = self.position,
                    analysis_id = %self.section.trigger.analysis_id,
                    error = %err,
                    detail = err.server_detail().unwrap_or(""),
                    "error analyzing selection"
                );
                result.replace_content(FAILURE_MESSAGE.to_string());
                ActivationOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::{ResultSlot, ResultTarget};
    use crate::transport::TransportResponse;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::sync::oneshot;

    enum Reply {
        Ready(Result<TransportResponse, TransportError>),
        Gated(oneshot::Receiver<TransportResponse>),
    }

    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Reply>>,
        sent: Mutex<Vec<OutgoingRequest>>,
    }

    impl ScriptedTransport {
        fn with(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                sent: Mutex::default(),
            })
        }

        fn sent(&self) -> Vec<OutgoingRequest> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: OutgoingRequest) -> Result<TransportResponse, TransportError> {
            self.sent.lock().push(request);
            let reply = self.replies.lock().pop_front().expect("scripted reply");
            match reply {
                Reply::Ready(result) => result,
                Reply::Gated(gate) => gate
                    .await
                    .map_err(|_| TransportError::Network("gate dropped".to_string())),
            }
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notices: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, message: &str) {
            self.notices.lock().push(message.to_string());
        }
    }

    fn json_reply(status: u16, body: &str) -> TransportResponse {
        TransportResponse {
            status,
            body: body.as_bytes().to_vec(),
        }
    }

    fn context(token: Option<&str>) -> PageContext {
        PageContext::new(
            Some(ProjectId::new("42")),
            token.and_then(SecurityToken::new),
        )
    }

    struct Fixture {
        transport: Arc<ScriptedTransport>,
        notifier: Arc<RecordingNotifier>,
        slot: ResultSlot,
        bindings: Vec<SectionBinding>,
    }

    fn fixture(token: Option<&str>, trigger: TriggerControl, replies: Vec<Reply>) -> Fixture {
        let transport = ScriptedTransport::with(replies);
        let notifier = Arc::new(RecordingNotifier::default());
        let handler =
            AnalysisHandler::new(context(token), transport.clone(), notifier.clone()).unwrap();
        let slot = ResultSlot::new("");
        let section = SectionDescriptor::new(trigger, "Finding aid text", Arc::new(slot.clone()));
        let bindings = handler.bind(vec![Ok(section)]);
        Fixture {
            transport,
            notifier,
            slot,
            bindings,
        }
    }

    #[test]
    fn missing_project_id_fails_fast() {
        let transport = ScriptedTransport::with(Vec::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let result = AnalysisHandler::new(PageContext::default(), transport, notifier);
        assert!(matches!(result, Err(ConfigError::MissingProjectId)));
    }

    #[test]
    fn incomplete_sections_are_not_bound() {
        let transport = ScriptedTransport::with(Vec::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let handler = AnalysisHandler::new(context(None), transport.clone(), notifier).unwrap();
        let slot: Arc<dyn ResultTarget> = Arc::new(ResultSlot::default());
        let candidates = vec![
            SectionDescriptor::assemble(None, Some("text".into()), Some(slot.clone())),
            SectionDescriptor::assemble(Some(TriggerControl::new("a2")), None, Some(slot.clone())),
            SectionDescriptor::assemble(Some(TriggerControl::new("a3")), Some("t".into()), None),
            SectionDescriptor::assemble(Some(TriggerControl::new("a4")), Some("t".into()), Some(slot)),
        ];
        let bindings = handler.bind(candidates);
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].position(), 3);
        assert_eq!(bindings[0].section().trigger.analysis_id, "a4");
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn blank_selection_notifies_without_request() {
        let fx = fixture(None, TriggerControl::new("a1"), Vec::new());
        let outcome = fx.bindings[0].activate("  \n\t ").await;
        assert_eq!(outcome, ActivationOutcome::EmptySelection);
        assert!(fx.transport.sent().is_empty());
        assert_eq!(
            *fx.notifier.notices.lock(),
            vec!["Please select some text to analyze.".to_string()]
        );
        assert_eq!(fx.slot.content(), "");
    }

    #[tokio::test]
    async fn success_renders_summary_and_topics_in_order() {
        let fx = fixture(
            Some("abc123"),
            TriggerControl::new("a1").with_education_level("graduate"),
            vec![Reply::Ready(Ok(json_reply(
                200,
                r#"{"summary":"S","research_topics":["A","B"]}"#,
            )))],
        );
        let outcome = fx.bindings[0].activate("  Box 4: correspondence  ").await;
        let ActivationOutcome::Rendered(response) = &outcome else {
            panic!("expected rendered outcome, got {outcome:?}");
        };
        assert_eq!(response.research_topics, vec!["A", "B"]);

        let html = fx.slot.content();
        assert!(html.contains("<p>S</p>"));
        assert_eq!(html.matches("<li>").count(), 2);
        assert!(html.find("<li>A</li>").unwrap() < html.find("<li>B</li>").unwrap());

        let sent = fx.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].path, "/research-assistant/project/42/analyze");
        assert_eq!(sent[0].header("Content-Type"), Some("application/json"));
        let body: AnalysisRequest = serde_json::from_slice(&sent[0].body).unwrap();
        assert_eq!(
            body,
            AnalysisRequest {
                analysis_id: "a1".to_string(),
                selected_text: "Box 4: correspondence".to_string(),
                education_level: "graduate".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn empty_topic_list_renders_empty_list() {
        let fx = fixture(
            None,
            TriggerControl::new("a1"),
            vec![Reply::Ready(Ok(json_reply(
                200,
                r#"{"summary":"Only a summary","research_topics":[]}"#,
            )))],
        );
        let outcome = fx.bindings[0].activate("text").await;
        assert!(matches!(outcome, ActivationOutcome::Rendered(_)));
        let html = fx.slot.content();
        assert!(html.contains("<ol>"));
        assert_eq!(html.matches("<li>").count(), 0);
    }

    #[tokio::test]
    async fn education_level_defaults_to_undergraduate() {
        let fx = fixture(
            None,
            TriggerControl::new("a1").with_education_level(""),
            vec![Reply::Ready(Ok(json_reply(
                200,
                r#"{"summary":"S","research_topics":[]}"#,
            )))],
        );
        fx.bindings[0].activate("text").await;
        let body: AnalysisRequest = serde_json::from_slice(&fx.transport.sent()[0].body).unwrap();
        assert_eq!(body.education_level, "undergraduate");
    }

    #[tokio::test]
    async fn token_header_present_only_with_token() {
        let ok = || {
            vec![Reply::Ready(Ok(json_reply(
                200,
                r#"{"summary":"S","research_topics":[]}"#,
            )))]
        };

        let without = fixture(None, TriggerControl::new("a1"), ok());
        without.bindings[0].activate("text").await;
        assert_eq!(without.transport.sent()[0].header("X-CSRFToken"), None);

        let with = fixture(Some("abc123"), TriggerControl::new("a1"), ok());
        with.bindings[0].activate("text").await;
        assert_eq!(with.transport.sent()[0].header("X-CSRFToken"), Some("abc123"));
    }

    #[tokio::test]
    async fn non_success_status_shows_generic_failure() {
        let fx = fixture(
            None,
            TriggerControl::new("a1"),
            vec![Reply::Ready(Ok(json_reply(
                500,
                r#"{"summary":"S","research_topics":["A"]}"#,
            )))],
        );
        let outcome = fx.bindings[0].activate("text").await;
        assert_eq!(outcome, ActivationOutcome::Failed);
        assert_eq!(fx.slot.content(), "An error occurred while analyzing the text.");
    }

    #[tokio::test]
    async fn server_error_detail_stays_out_of_the_page() {
        let fx = fixture(
            None,
            TriggerControl::new(""),
            vec![Reply::Ready(Ok(json_reply(
                400,
                r#"{"error":"Missing required data"}"#,
            )))],
        );
        fx.bindings[0].activate("text").await;
        let html = fx.slot.content();
        assert_eq!(html, FAILURE_MESSAGE);
        assert!(!html.contains("Missing required data"));
    }

    #[tokio::test]
    async fn transport_failure_shows_generic_failure() {
        let fx = fixture(
            None,
            TriggerControl::new("a1"),
            vec![Reply::Ready(Err(TransportError::Network(
                "connection refused".to_string(),
            )))],
        );
        let outcome = fx.bindings[0].activate("text").await;
        assert_eq!(outcome, ActivationOutcome::Failed);
        assert_eq!(fx.slot.content(), FAILURE_MESSAGE);
    }

    #[tokio::test]
    async fn malformed_json_shows_generic_failure() {
        let fx = fixture(
            None,
            TriggerControl::new("a1"),
            vec![Reply::Ready(Ok(json_reply(200, "<html>oops</html>")))],
        );
        let outcome = fx.bindings[0].activate("text").await;
        assert_eq!(outcome, ActivationOutcome::Failed);
        assert_eq!(fx.slot.content(), FAILURE_MESSAGE);
    }

    #[tokio::test]
    async fn placeholder_shown_while_request_in_flight() {
        let (tx, rx) = oneshot::channel();
        let fx = fixture(None, TriggerControl::new("a1"), vec![Reply::Gated(rx)]);
        let slot = fx.slot.clone();
        let (outcome, ()) = tokio::join!(fx.bindings[0].activate("text"), async move {
            tokio::task::yield_now().await;
            assert_eq!(slot.content(), "Analyzing...");
            tx.send(json_reply(200, r#"{"summary":"S","research_topics":[]}"#))
                .unwrap();
        });
        assert!(matches!(outcome, ActivationOutcome::Rendered(_)));
    }

    #[tokio::test]
    async fn later_activation_wins_over_later_arrival() {
        let (first_tx, first_rx) = oneshot::channel();
        let (second_tx, second_rx) = oneshot::channel();
        let fx = fixture(
            None,
            TriggerControl::new("a1"),
            vec![Reply::Gated(first_rx), Reply::Gated(second_rx)],
        );
        let binding = &fx.bindings[0];
        let (first, second, ()) = tokio::join!(
            binding.activate("first selection"),
            binding.activate("second selection"),
            async move {
                second_tx
                    .send(json_reply(200, r#"{"summary":"newer","research_topics":[]}"#))
                    .unwrap();
                tokio::task::yield_now().await;
                first_tx
                    .send(json_reply(200, r#"{"summary":"older","research_topics":[]}"#))
                    .unwrap();
            }
        );
        assert_eq!(first, ActivationOutcome::Superseded);
        assert!(matches!(second, ActivationOutcome::Rendered(_)));
        let html = fx.slot.content();
        assert!(html.contains("newer"));
        assert!(!html.contains("older"));
        assert_eq!(fx.transport.sent().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn spawned_activations_keep_newest_result() {
        let (first_tx, first_rx) = oneshot::channel();
        let (second_tx, second_rx) = oneshot::channel();
        let mut fx = fixture(
            None,
            TriggerControl::new("a1"),
            vec![Reply::Gated(first_rx), Reply::Gated(second_rx)],
        );
        let binding = Arc::new(fx.bindings.remove(0));

        let first = tokio::spawn({
            let binding = binding.clone();
            async move { binding.activate("first selection").await }
        });
        while fx.transport.sent().len() < 1 {
            tokio::task::yield_now().await;
        }
        let second = tokio::spawn({
            let binding = binding.clone();
            async move { binding.activate("second selection").await }
        });
        while fx.transport.sent().len() < 2 {
            tokio::task::yield_now().await;
        }

        second_tx
            .send(json_reply(200, r#"{"summary":"newer","research_topics":[]}"#))
            .unwrap();
        let second = second.await.unwrap();
        first_tx
            .send(json_reply(200, r#"{"summary":"older","research_topics":[]}"#))
            .unwrap();
        let first = first.await.unwrap();

        assert!(matches!(second, ActivationOutcome::Rendered(_)));
        assert_eq!(first, ActivationOutcome::Superseded);
        let html = fx.slot.content();
        assert!(html.contains("newer"));
        assert!(!html.contains("older"));
    }
}

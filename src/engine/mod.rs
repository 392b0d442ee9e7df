use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::arbiter::{ArbiterError, CorrelationId, DecisionArbiter, DecisionRequest};
use crate::domain::{
    ApplicationIdentity, DecisionKind, Outcome, SigningStatus, TrustLevelPolicy,
};
use crate::grants::{CapabilityGrantSet, CustomAuthority, GrantBuilder};
use crate::observability::metrics::{record_decision, TimingGuard};
use crate::rules::{RuleAction, RuleSetCell};
use crate::storage::DecisionStore;

/// Which step of the decision produced the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    /// Trust level alone decided
    Policy,
    /// A deployment rule matched
    Rule,
    /// A remembered answer matched
    Remembered,
    /// The renderer answered
    Renderer,
    /// The renderer could not be asked or did not answer
    Failure,
}

impl VerdictSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictSource::Policy => "policy",
            VerdictSource::Rule => "rule",
            VerdictSource::Remembered => "remembered",
            VerdictSource::Renderer => "renderer",
            VerdictSource::Failure => "failure",
        }
    }
}

impl fmt::Display for VerdictSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one launch decision.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub outcome: Outcome,
    pub source: VerdictSource,
    /// Human readable explanation, always present for denials
    pub reason: String,
    /// Empty for denied launches
    pub grants: CapabilityGrantSet,
    /// Non-fatal problems met along the way
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl Verdict {
    fn new(outcome: Outcome, source: VerdictSource, reason: impl Into<String>) -> Self {
        Verdict {
            outcome,
            source,
            reason: reason.into(),
            grants: CapabilityGrantSet::none(),
            warnings: Vec::new(),
        }
    }

    pub fn is_denied(&self) -> bool {
        self.outcome.is_denied()
    }
}

/// Combines trust level, deployment rules, remembered answers and the
/// renderer into one verdict per launch attempt.
///
/// Every path that cannot reach an answer resolves to `Deny`.
pub struct TrustEngine {
    rules: Arc<RuleSetCell>,
    store: Arc<dyn DecisionStore>,
    arbiter: DecisionArbiter,
    grants: GrantBuilder,
    authority: Option<Arc<dyn CustomAuthority>>,
}

impl TrustEngine {
    pub fn new(
        rules: Arc<RuleSetCell>,
        store: Arc<dyn DecisionStore>,
        arbiter: DecisionArbiter,
    ) -> Self {
        TrustEngine {
            rules,
            store,
            arbiter,
            grants: GrantBuilder::new(),
            authority: None,
        }
    }

    pub fn with_grant_builder(mut self, grants: GrantBuilder) -> Self {
        self.grants = grants;
        self
    }

    /// Delegate `Allow` grant sets to a site policy.
    pub fn with_authority(mut self, authority: Arc<dyn CustomAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn rules(&self) -> &Arc<RuleSetCell> {
        &self.rules
    }

    pub fn store(&self) -> &Arc<dyn DecisionStore> {
        &self.store
    }

    pub fn arbiter(&self) -> &DecisionArbiter {
        &self.arbiter
    }

    /// Decide whether the application may run, and with which grants.
    pub async fn decide(
        &self,
        identity: &ApplicationIdentity,
        kind: DecisionKind,
        policy: TrustLevelPolicy,
    ) -> Verdict {
        self.decide_as(CorrelationId::new(), identity, kind, policy).await
    }

    /// Like [`decide`](Self::decide), with a caller-chosen correlation id so
    /// the prompt can be cancelled through the arbiter.
    pub async fn decide_as(
        &self,
        correlation_id: CorrelationId,
        identity: &ApplicationIdentity,
        kind: DecisionKind,
        policy: TrustLevelPolicy,
    ) -> Verdict {
        let _timer = TimingGuard::new();

        let mut verdict = self.resolve(correlation_id, identity, kind, policy).await;

        let authority = self.authority.as_deref();
        let (grants, authority_error) = self.grants.build(verdict.outcome, identity, authority);
        verdict.grants = grants;
        if let Some(e) = authority_error {
            warn!(
                origin = %identity.origin_str(),
                error = %e,
                "Custom trust authority unresolvable, using sandbox grants"
            );
            verdict.warnings.push(e.to_string());
        }

        if let Some(error) = self.rules.load_error() {
            verdict.warnings.push(format!("Deployment rules unusable: {error}"));
        }
        verdict
            .warnings
            .extend(self.store.take_warnings().into_iter().map(|w| w.to_string()));

        record_decision(verdict.outcome, verdict.source.as_str());
        info!(
            origin = %identity.origin_str(),
            kind = %kind,
            policy = %policy,
            outcome = %verdict.outcome,
            source = %verdict.source,
            "Trust decision"
        );
        verdict
    }

    async fn resolve(
        &self,
        correlation_id: CorrelationId,
        identity: &ApplicationIdentity,
        kind: DecisionKind,
        policy: TrustLevelPolicy,
    ) -> Verdict {
        if policy == TrustLevelPolicy::DenyAll {
            return Verdict::new(
                Outcome::Deny,
                VerdictSource::Policy,
                "The trust level forbids running any application",
            );
        }

        let is_unsigned = identity.signing == SigningStatus::Unsigned;
        if policy == TrustLevelPolicy::AllowUnsigned && is_unsigned {
            return Verdict::new(
                Outcome::Allow,
                VerdictSource::Policy,
                "The trust level allows unsigned applications",
            );
        }

        let ruleset = self.rules.snapshot();
        if let Some(rule) = ruleset.evaluate(identity) {
            match rule.action {
                RuleAction::Run => {
                    return Verdict::new(
                        Outcome::Allow,
                        VerdictSource::Rule,
                        format!("Allowed by deployment rule #{}", rule.index),
                    );
                }
                RuleAction::Block => {
                    return Verdict::new(Outcome::Deny, VerdictSource::Rule, rule.block_reason());
                }
                RuleAction::Default => {
                    debug!(
                        rule = rule.index,
                        origin = %identity.origin_str(),
                        "Deployment rule defers to policy"
                    );
                }
            }
        }

        if let Some(outcome) = self.store.lookup(kind, identity) {
            return Verdict::new(
                outcome,
                VerdictSource::Remembered,
                format!("Remembered answer: {outcome}"),
            );
        }

        if policy == TrustLevelPolicy::DenyUnsigned {
            return Verdict::new(
                Outcome::Deny,
                VerdictSource::Policy,
                "The trust level does not allow unsigned applications",
            );
        }

        self.ask(correlation_id, identity, kind).await
    }

    async fn ask(
        &self,
        correlation_id: CorrelationId,
        identity: &ApplicationIdentity,
        kind: DecisionKind,
    ) -> Verdict {
        let request = DecisionRequest::with_id(correlation_id, kind, identity.clone());

        let response = match self.arbiter.submit(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    origin = %identity.origin_str(),
                    kind = %kind,
                    error = %e,
                    "No answer from decision renderer, denying"
                );
                return Verdict::new(Outcome::Deny, VerdictSource::Failure, failure_reason(&e));
            }
        };

        let mut verdict = Verdict::new(
            response.outcome,
            VerdictSource::Renderer,
            format!("Answered {}", response.outcome),
        );

        if let Some(durability) = response.remember {
            if let Err(e) = self.store.remember_scoped(
                kind,
                identity,
                response.outcome,
                durability,
                response.scope,
            ) {
                warn!(origin = %identity.origin_str(), error = %e, "Could not remember answer");
                verdict.warnings.push(e.to_string());
            }
        }
        verdict
    }
}

fn failure_reason(error: &ArbiterError) -> String {
    match error {
        ArbiterError::RendererUnavailable => {
            "No response available: nobody can be asked about this application".to_string()
        }
        ArbiterError::Timeout(_) => "No response available: the question timed out".to_string(),
        ArbiterError::Cancelled => "The launch was cancelled before an answer arrived".to_string(),
        ArbiterError::DuplicateCorrelation(id) => {
            format!("No response available: correlation id {id} belongs to another launch")
        }
        other => format!("No response available: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::{spawn_renderer, AutomatedRenderer, DecisionResponse};
    use crate::domain::{Certificate, Durability, RequestedPermissions};
    use crate::observability::tracing::init_test_tracing;
    use crate::rules::{parse_document, RuleSet, RuleSetLoader};
    use crate::storage::{FileDecisionStore, MemoryDecisionStore, OriginPattern, StoreWarning};
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    const KIND: DecisionKind = DecisionKind::RunUnsignedApplication;

    fn unsigned(origin: &str) -> ApplicationIdentity {
        ApplicationIdentity::parse(origin, "Clock", SigningStatus::Unsigned).unwrap()
    }

    fn engine_with(
        rules: RuleSet,
        store: Arc<dyn DecisionStore>,
        arbiter: DecisionArbiter,
    ) -> TrustEngine {
        TrustEngine::new(Arc::new(RuleSetCell::fixed(rules)), store, arbiter)
    }

    fn rules(xml: &str) -> RuleSet {
        parse_document(xml).unwrap()
    }

    #[tokio::test]
    async fn test_sandbox_answer_remembered_for_codebase() {
        init_test_tracing();
        let dir = TempDir::new().unwrap();
        let store_path: PathBuf = dir.path().join("trust.store");

        let arbiter = DecisionArbiter::default();
        let engine = engine_with(
            RuleSet::empty(),
            Arc::new(FileDecisionStore::open(&store_path)),
            arbiter.clone(),
        );

        let mut handle = arbiter.register_renderer().unwrap();
        let renderer = tokio::spawn(async move {
            let request = handle.next_request().await.unwrap();
            handle
                .respond(
                    DecisionResponse::new(request.correlation_id, Outcome::Sandbox)
                        .remembered(Durability::Always),
                )
                .unwrap();
            handle
        });

        let verdict = engine
            .decide(&unsigned("http://example.com/"), KIND, TrustLevelPolicy::AskUnsigned)
            .await;
        assert_eq!(verdict.outcome, Outcome::Sandbox);
        assert_eq!(verdict.source, VerdictSource::Renderer);
        assert!(!verdict.grants.is_unrestricted());
        assert!(!verdict.grants.is_empty());

        drop(renderer.await.unwrap());
        assert!(!arbiter.is_renderer_registered());

        // Fresh process: same file, no renderer
        let engine = engine_with(
            RuleSet::empty(),
            Arc::new(FileDecisionStore::open(&store_path)),
            DecisionArbiter::default(),
        );
        let verdict = engine
            .decide(&unsigned("http://example.com/app2"), KIND, TrustLevelPolicy::AskUnsigned)
            .await;
        assert_eq!(verdict.outcome, Outcome::Sandbox);
        assert_eq!(verdict.source, VerdictSource::Remembered);
    }

    #[tokio::test]
    async fn test_deny_all_vetoes_everything() {
        let store = Arc::new(MemoryDecisionStore::new());
        store.insert(KIND, OriginPattern::new(".*").unwrap(), Outcome::Allow);
        let arbiter = DecisionArbiter::default();
        let _renderer = spawn_renderer(
            arbiter.register_renderer().unwrap(),
            AutomatedRenderer::trust_all(),
        );

        let engine = engine_with(
            rules(
                r#"<ruleset><rule><id location="*"/><action permission="run"/></rule></ruleset>"#,
            ),
            store,
            arbiter,
        );
        let verdict = engine
            .decide(&unsigned("http://example.com/"), KIND, TrustLevelPolicy::DenyAll)
            .await;

        assert_eq!(verdict.outcome, Outcome::Deny);
        assert_eq!(verdict.source, VerdictSource::Policy);
        assert!(verdict.grants.is_empty());
        assert!(!verdict.reason.is_empty());
    }

    #[tokio::test]
    async fn test_allow_unsigned_only_short_circuits_unsigned() {
        let engine = engine_with(
            RuleSet::empty(),
            Arc::new(MemoryDecisionStore::new()),
            DecisionArbiter::default(),
        );

        let verdict = engine
            .decide(&unsigned("http://example.com/"), KIND, TrustLevelPolicy::AllowUnsigned)
            .await;
        assert_eq!(verdict.outcome, Outcome::Allow);
        assert_eq!(verdict.source, VerdictSource::Policy);
        // Unsigned code asking for everything still gets the sandbox set
        assert!(!verdict.grants.is_unrestricted());

        let partial = ApplicationIdentity::parse(
            "http://example.com/",
            "Clock",
            SigningStatus::PartiallySigned,
        )
        .unwrap();
        let verdict = engine.decide(&partial, KIND, TrustLevelPolicy::AllowUnsigned).await;
        assert_eq!(verdict.outcome, Outcome::Deny);
        assert_eq!(verdict.source, VerdictSource::Failure);
    }

    #[tokio::test]
    async fn test_rules_decide_before_store() {
        let store = Arc::new(MemoryDecisionStore::new());
        store.insert(KIND, OriginPattern::new(".*").unwrap(), Outcome::Allow);

        let engine = engine_with(
            rules(
                r#"<ruleset>
                     <rule>
                       <id location="*.example.com"/>
                       <action permission="block"><message>Not on this network</message></action>
                     </rule>
                     <rule><id location="host.example.com"/><action permission="run"/></rule>
                     <rule><id location="*.defer.org"/><action permission="default"/></rule>
                   </ruleset>"#,
            ),
            store,
            DecisionArbiter::default(),
        );

        for _ in 0..100 {
            let verdict = engine
                .decide(
                    &unsigned("http://host.example.com/app.jnlp"),
                    KIND,
                    TrustLevelPolicy::AskUnsigned,
                )
                .await;
            assert_eq!(verdict.outcome, Outcome::Deny);
            assert_eq!(verdict.source, VerdictSource::Rule);
            assert_eq!(verdict.reason, "Not on this network");
        }

        let verdict = engine
            .decide(&unsigned("http://www.defer.org/"), KIND, TrustLevelPolicy::AskUnsigned)
            .await;
        assert_eq!(verdict.outcome, Outcome::Allow);
        assert_eq!(verdict.source, VerdictSource::Remembered);
    }

    #[tokio::test]
    async fn test_certificate_rule_runs_signed_code_unrestricted() {
        let cert = Certificate::from_der(b"publisher".to_vec());
        let rule = format!(
            r#"<rule><id><certificate hash="{}"/></id><action permission="run"/></rule>"#,
            cert.sha256_fingerprint()
        );
        let engine = engine_with(
            rules(&rule),
            Arc::new(MemoryDecisionStore::new()),
            DecisionArbiter::default(),
        );

        let identity = ApplicationIdentity::parse(
            "https://apps.example.net/",
            "Signed",
            SigningStatus::FullySigned,
        )
        .unwrap()
            .with_certificates([cert])
            .with_requested(RequestedPermissions::All);
        let verdict = engine.decide(&identity, KIND, TrustLevelPolicy::AskUnsigned).await;

        assert_eq!(verdict.outcome, Outcome::Allow);
        assert_eq!(verdict.source, VerdictSource::Rule);
        assert!(verdict.grants.is_unrestricted());
    }

    #[tokio::test]
    async fn test_deny_unsigned_after_fast_paths() {
        let store = Arc::new(MemoryDecisionStore::new());
        store.insert(
            KIND,
            OriginPattern::quote_and_star("http://known.example.com/").unwrap(),
            Outcome::Sandbox,
        );
        let engine = engine_with(RuleSet::empty(), store, DecisionArbiter::default());

        let known = engine
            .decide(
                &unsigned("http://known.example.com/a.jnlp"),
                KIND,
                TrustLevelPolicy::DenyUnsigned,
            )
            .await;
        assert_eq!(known.outcome, Outcome::Sandbox);

        let unknown = engine
            .decide(&unsigned("http://other.example.com/"), KIND, TrustLevelPolicy::DenyUnsigned)
            .await;
        assert_eq!(unknown.outcome, Outcome::Deny);
        assert_eq!(unknown.source, VerdictSource::Policy);
    }

    #[tokio::test]
    async fn test_no_renderer_fails_closed() {
        let engine = engine_with(
            RuleSet::empty(),
            Arc::new(MemoryDecisionStore::new()),
            DecisionArbiter::default(),
        );
        let verdict = engine
            .decide(&unsigned("http://example.com/"), KIND, TrustLevelPolicy::AskUnsigned)
            .await;

        assert_eq!(verdict.outcome, Outcome::Deny);
        assert_eq!(verdict.source, VerdictSource::Failure);
        assert!(verdict.reason.starts_with("No response available"));
        assert!(verdict.grants.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_fails_closed() {
        let arbiter = DecisionArbiter::new(Some(Duration::from_millis(30)), 4);
        let _handle = arbiter.register_renderer().unwrap();
        let engine = engine_with(RuleSet::empty(), Arc::new(MemoryDecisionStore::new()), arbiter);

        let verdict = engine
            .decide(&unsigned("http://example.com/"), KIND, TrustLevelPolicy::AskUnsigned)
            .await;
        assert_eq!(verdict.outcome, Outcome::Deny);
        assert!(verdict.reason.contains("timed out"));
    }

    #[tokio::test]
    async fn test_broken_rules_and_store_degrade_to_warnings() {
        let dir = TempDir::new().unwrap();
        let package = dir.path().join("ruleset.xml");
        std::fs::write(&package, "<ruleset></ruleset>").unwrap();

        let store = Arc::new(MemoryDecisionStore::new());
        store.push_warning(StoreWarning::SkippedLines {
            path: PathBuf::from("trust.store"),
            count: 1,
        });
        let arbiter = DecisionArbiter::default();
        let _renderer = spawn_renderer(
            arbiter.register_renderer().unwrap(),
            AutomatedRenderer::trust_none(),
        );

        let rules = Arc::new(RuleSetCell::lazy(RuleSetLoader::new(&package)));
        let engine = TrustEngine::new(rules, store, arbiter);
        let verdict = engine
            .decide(&unsigned("http://example.com/"), KIND, TrustLevelPolicy::AskUnsigned)
            .await;

        assert_eq!(verdict.outcome, Outcome::Deny);
        assert_eq!(verdict.source, VerdictSource::Renderer);
        assert_eq!(verdict.warnings.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_store_version_is_not_trusted() {
        init_test_tracing();
        let dir = TempDir::new().unwrap();
        let store_path = dir.path().join("trust.store");
        std::fs::write(&store_path, "#VERSION 2\nrun-unsigned-application:A{ALLOW}; 1 .*\n")
            .unwrap();

        let arbiter = DecisionArbiter::default();
        let _renderer = spawn_renderer(
            arbiter.register_renderer().unwrap(),
            AutomatedRenderer::trust_none(),
        );
        let engine = engine_with(
            RuleSet::empty(),
            Arc::new(FileDecisionStore::open(&store_path)),
            arbiter,
        );

        let verdict = engine
            .decide(&unsigned("http://example.com/"), KIND, TrustLevelPolicy::AskUnsigned)
            .await;
        assert_eq!(verdict.outcome, Outcome::Deny);
        assert_eq!(verdict.source, VerdictSource::Renderer);
        assert!(verdict.grants.is_empty());
        assert_eq!(verdict.warnings.len(), 1);
        assert!(verdict.warnings[0].contains("has version Some(\"2\")"));
        assert!(verdict.warnings[0].contains("treated as empty"));
    }

    #[tokio::test]
    async fn test_headerless_store_without_renderer_fails_closed() {
        let dir = TempDir::new().unwrap();
        let store_path = dir.path().join("trust.store");
        std::fs::write(&store_path, "run-unsigned-application:A{ALLOW}; 1 .*\n").unwrap();

        let engine = engine_with(
            RuleSet::empty(),
            Arc::new(FileDecisionStore::open(&store_path)),
            DecisionArbiter::default(),
        );
        let verdict = engine
            .decide(&unsigned("http://example.com/"), KIND, TrustLevelPolicy::AskUnsigned)
            .await;

        assert_eq!(verdict.outcome, Outcome::Deny);
        assert_eq!(verdict.source, VerdictSource::Failure);
        assert!(!verdict.grants.is_unrestricted());
        assert!(verdict.grants.is_empty());
        assert!(verdict.warnings.iter().any(|w| w.contains("has version None")));

        // The stale entry stays gone on the next decision
        let again = engine
            .decide(&unsigned("http://example.com/"), KIND, TrustLevelPolicy::AskUnsigned)
            .await;
        assert_eq!(again.outcome, Outcome::Deny);
        assert!(again.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_through_still_honors_answer() {
        let store = Arc::new(MemoryDecisionStore::new());
        store.set_fail_writes(true);
        let arbiter = DecisionArbiter::default();
        let mut handle = arbiter.register_renderer().unwrap();
        let engine = engine_with(RuleSet::empty(), store.clone(), arbiter);

        let renderer = tokio::spawn(async move {
            let request = handle.next_request().await.unwrap();
            handle
                .respond(
                    DecisionResponse::new(request.correlation_id, Outcome::Allow)
                        .remembered(Durability::Always),
                )
                .unwrap();
            handle
        });

        let identity = unsigned("http://example.com/app.jnlp");
        let verdict = engine.decide(&identity, KIND, TrustLevelPolicy::AskUnsigned).await;
        assert_eq!(verdict.outcome, Outcome::Allow);
        assert!(!verdict.warnings.is_empty());

        // Kept for the session
        assert_eq!(store.lookup(KIND, &identity), Some(Outcome::Allow));
        drop(renderer.await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_launches_share_one_prompt() {
        let arbiter = DecisionArbiter::default();
        let mut handle = arbiter.register_renderer().unwrap();
        let engine = Arc::new(engine_with(
            RuleSet::empty(),
            Arc::new(MemoryDecisionStore::new()),
            arbiter.clone(),
        ));

        let mut launches = Vec::new();
        for _ in 0..4 {
            let engine = engine.clone();
            launches.push(tokio::spawn(async move {
                engine
                    .decide(
                        &unsigned("http://example.com/app.jnlp"),
                        KIND,
                        TrustLevelPolicy::AskUnsigned,
                    )
                    .await
            }));
        }

        let request = handle.next_request().await.unwrap();
        for _ in 0..200 {
            if arbiter.pending().first().map(|p| p.waiters) == Some(4) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle
            .respond(DecisionResponse::new(request.correlation_id, Outcome::Sandbox))
            .unwrap();

        for launch in launches {
            assert_eq!(launch.await.unwrap().outcome, Outcome::Sandbox);
        }
        assert!(tokio::time::timeout(Duration::from_millis(50), handle.next_request())
            .await
            .is_err());
    }
}

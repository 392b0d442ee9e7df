use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

use trustgate::arbiter::DecisionArbiter;
use trustgate::domain::{
    ApplicationIdentity, DecisionKind, Outcome, SigningStatus, TrustLevelPolicy,
};
use trustgate::engine::TrustEngine;
use trustgate::rules::{parse_document, RuleSetCell};
use trustgate::storage::{DecisionStore, MemoryDecisionStore, OriginPattern};

const KIND: DecisionKind = DecisionKind::RunUnsignedApplication;

fn create_identity(origin: &str) -> ApplicationIdentity {
    ApplicationIdentity::parse(origin, "Bench", SigningStatus::Unsigned).unwrap()
}

/// 100 location rules followed by a catch-all.
fn create_ruleset_xml() -> String {
    let mut xml = String::from("<ruleset version=\"bench\">");
    for i in 0..100 {
        xml.push_str(&format!(
            r#"<rule><id location="https://*.host{i}.example.com/apps/"/>"#
        ));
        xml.push_str(r#"<action permission="run"/></rule>"#);
    }
    xml.push_str(r#"<rule><action permission="default"/></rule></ruleset>"#);
    xml
}

fn create_store() -> MemoryDecisionStore {
    let store = MemoryDecisionStore::new();
    for i in 0..100 {
        let pattern =
            OriginPattern::quote_and_star(&format!("http://site{i}.example.org/")).unwrap();
        store.insert(KIND, pattern, Outcome::Sandbox);
    }
    store
}

fn bench_rule_evaluation(c: &mut Criterion) {
    let ruleset = parse_document(&create_ruleset_xml()).unwrap();
    let hit = create_identity("https://www.host99.example.com/apps/clock.jnlp");
    let miss = create_identity("http://unlisted.example.net/");

    c.bench_function("ruleset_evaluate_last_rule", |b| {
        b.iter(|| ruleset.evaluate(black_box(&hit)))
    });

    c.bench_function("ruleset_evaluate_catch_all", |b| {
        b.iter(|| ruleset.evaluate(black_box(&miss)))
    });
}

fn bench_store_lookup(c: &mut Criterion) {
    let store = create_store();
    let hit = create_identity("http://site99.example.org/app.jnlp");
    let miss = create_identity("http://unknown.example.org/");

    c.bench_function("store_lookup_hit", |b| {
        b.iter(|| store.lookup(KIND, black_box(&hit)))
    });

    c.bench_function("store_lookup_miss", |b| {
        b.iter(|| store.lookup(KIND, black_box(&miss)))
    });
}

fn bench_decide_fast_path(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let ruleset = parse_document(&create_ruleset_xml()).unwrap();
    let engine = TrustEngine::new(
        Arc::new(RuleSetCell::fixed(ruleset)),
        Arc::new(create_store()),
        DecisionArbiter::default(),
    );
    let remembered = create_identity("http://site50.example.org/app.jnlp");

    c.bench_function("decide_remembered", |b| {
        b.to_async(&runtime).iter(|| {
            engine.decide(black_box(&remembered), KIND, TrustLevelPolicy::AskUnsigned)
        })
    });
}

criterion_group!(
    benches,
    bench_rule_evaluation,
    bench_store_lookup,
    bench_decide_fast_path,
);

criterion_main!(benches);

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use apploader_lib::fetcher::FetchError;
use apploader_lib::{
  ChainError, ConcurrencyGate, EmbeddedFetcher, FetchChain, Fetcher, GateError, ManifestRequest, Sha256Digest,
};
use tokio::task::JoinSet;

use super::common::{Event, EventLog, Reply, ScriptedFetcher, manifest_bytes, module_for};

fn chain_of(fetchers: Vec<Arc<dyn Fetcher>>, capacity: usize) -> FetchChain {
  FetchChain::new(fetchers, ConcurrencyGate::new(capacity).unwrap())
}

#[tokio::test]
async fn absent_falls_through_to_next_source() {
  let log = EventLog::default();
  let alpha = ScriptedFetcher::new("Alpha", &log)
    .module("alpha", Reply::Absent)
    .module("bravo", Reply::Bytes(b"bravo".to_vec()))
    .arc();
  let bravo = ScriptedFetcher::new("Bravo", &log)
    .module("alpha", Reply::Bytes(b"test".to_vec()))
    .arc();
  let chain = chain_of(vec![alpha, bravo], 4);

  let fetched = chain.fetch_module("demo", &module_for("alpha", b"test")).await.unwrap();

  assert_eq!(fetched.bytes, b"test".to_vec());
  assert_eq!(fetched.source, "Bravo");
  assert_eq!(
    fetched.sha256.to_hex(),
    "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
  );

  chain.fetch_module("demo", &module_for("bravo", b"bravo")).await.unwrap();

  let attempted: Vec<(String, String)> = [("Alpha", "alpha"), ("Bravo", "alpha"), ("Alpha", "bravo")]
    .iter()
    .map(|(f, id)| (f.to_string(), id.to_string()))
    .collect();
  assert_eq!(log.fetches(), attempted);
}

#[tokio::test]
async fn verified_bytes_are_offered_to_earlier_sources() {
  let log = EventLog::default();
  let alpha = ScriptedFetcher::new("Alpha", &log).arc();
  let bravo = ScriptedFetcher::new("Bravo", &log)
    .module("alpha", Reply::Bytes(b"test".to_vec()))
    .arc();
  let chain = chain_of(vec![alpha, bravo], 4);

  chain.fetch_module("demo", &module_for("alpha", b"test")).await.unwrap();

  let populated: Vec<Event> = log
    .events()
    .into_iter()
    .filter(|e| matches!(e, Event::Populate { .. }))
    .collect();
  assert_eq!(
    populated,
    vec![Event::Populate {
      fetcher: "Alpha".into(),
      id: "alpha".into()
    }]
  );
}

#[tokio::test]
async fn hit_short_circuits_later_sources() {
  let log = EventLog::default();
  let alpha = ScriptedFetcher::new("Alpha", &log)
    .module("alpha", Reply::Bytes(b"test".to_vec()))
    .arc();
  let bravo = ScriptedFetcher::new("Bravo", &log)
    .module("alpha", Reply::Bytes(b"test".to_vec()))
    .arc();
  let chain = chain_of(vec![alpha, bravo], 4);

  let fetched = chain.fetch_module("demo", &module_for("alpha", b"test")).await.unwrap();

  assert_eq!(fetched.source, "Alpha");
  assert_eq!(log.fetchers_asked_for("alpha"), vec!["Alpha"]);
}

#[tokio::test]
async fn error_aborts_without_fallback() {
  let log = EventLog::default();
  let alpha = ScriptedFetcher::new("Alpha", &log).module("alpha", Reply::Fail).arc();
  let bravo = ScriptedFetcher::new("Bravo", &log)
    .module("alpha", Reply::Bytes(b"test".to_vec()))
    .arc();
  let chain = chain_of(vec![alpha, bravo], 4);

  let err = chain.fetch_module("demo", &module_for("alpha", b"test")).await.unwrap_err();

  assert!(err.is_transport());
  assert!(!err.is_not_found());
  assert!(matches!(
    err,
    ChainError::Fetch { ref fetcher, source: FetchError::Transport { .. } } if fetcher == "Alpha"
  ));
  assert_eq!(log.fetchers_asked_for("alpha"), vec!["Alpha"]);
}

#[tokio::test]
async fn digest_mismatch_aborts_without_fallback() {
  let log = EventLog::default();
  let alpha = ScriptedFetcher::new("Alpha", &log)
    .module("alpha", Reply::Bytes(b"tampered".to_vec()))
    .arc();
  let bravo = ScriptedFetcher::new("Bravo", &log)
    .module("alpha", Reply::Bytes(b"test".to_vec()))
    .arc();
  let chain = chain_of(vec![alpha, bravo], 4);

  let err = chain.fetch_module("demo", &module_for("alpha", b"test")).await.unwrap_err();

  assert!(err.is_integrity());
  match err {
    ChainError::Integrity {
      fetcher,
      expected,
      actual,
      ..
    } => {
      assert_eq!(fetcher, "Alpha");
      assert_eq!(expected, Sha256Digest::compute(b"test").to_string());
      assert_eq!(actual, Sha256Digest::compute(b"tampered").to_string());
    }
    other => panic!("expected integrity failure, got {other:?}"),
  }
  assert_eq!(log.fetchers_asked_for("alpha"), vec!["Alpha"]);
}

#[tokio::test]
async fn all_absent_is_exhausted() {
  let log = EventLog::default();
  let alpha = ScriptedFetcher::new("Alpha", &log).arc();
  let bravo = ScriptedFetcher::new("Bravo", &log).arc();
  let chain = chain_of(vec![alpha, bravo], 4);

  let err = chain.fetch_module("demo", &module_for("alpha", b"test")).await.unwrap_err();

  assert!(matches!(err, ChainError::Exhausted { .. }));
  assert!(err.is_not_found());
  assert!(!err.is_transport());
  assert!(!err.is_integrity());
  assert_eq!(log.fetchers_asked_for("alpha"), vec!["Alpha", "Bravo"]);
}

#[tokio::test]
async fn gate_bounds_in_flight_fetches() {
  let log = EventLog::default();
  let in_flight = Arc::new(AtomicUsize::new(0));
  let peak = Arc::new(AtomicUsize::new(0));

  let mut source = ScriptedFetcher::new("Slow", &log)
    .delay(Duration::from_millis(20))
    .counters(&in_flight, &peak);
  for i in 0..8 {
    source = source.module(&format!("m{i}"), Reply::Bytes(format!("m{i}").into_bytes()));
  }
  let chain = chain_of(vec![source.arc()], 2);

  let mut set = JoinSet::new();
  for i in 0..8 {
    let chain = chain.clone();
    set.spawn(async move {
      let id = format!("m{i}");
      chain.fetch_module("demo", &module_for(&id, id.as_bytes())).await
    });
  }
  while let Some(joined) = set.join_next().await {
    joined.unwrap().unwrap();
  }

  assert!(peak.load(Ordering::SeqCst) <= 2);
  assert_eq!(peak.load(Ordering::SeqCst), 2);
  assert_eq!(in_flight.load(Ordering::SeqCst), 0);
  assert_eq!(chain.gate().available(), 2);
}

#[tokio::test]
async fn ungated_source_ignores_full_gate() {
  let embedded: Arc<dyn Fetcher> = Arc::new(EmbeddedFetcher::new("embedded").with_module("alpha", b"test".to_vec()));
  let chain = chain_of(vec![embedded], 1);

  let _held = chain.gate().acquire().await.unwrap();
  let fetched = tokio::time::timeout(
    Duration::from_secs(1),
    chain.fetch_module("demo", &module_for("alpha", b"test")),
  )
  .await
  .expect("ungated fetch should not wait for the gate")
  .unwrap();

  assert_eq!(fetched.source, "embedded");
}

#[tokio::test]
async fn slow_request_does_not_block_unrelated_one() {
  let log = EventLog::default();
  let alpha = ScriptedFetcher::new("Alpha", &log)
    .module("fast", Reply::Bytes(b"fast".to_vec()))
    .arc();
  let bravo = ScriptedFetcher::new("Bravo", &log)
    .module("slow", Reply::Bytes(b"slow".to_vec()))
    .delay(Duration::from_millis(300))
    .arc();
  let chain = chain_of(vec![alpha, bravo], 2);

  let slow = {
    let chain = chain.clone();
    tokio::spawn(async move { chain.fetch_module("demo", &module_for("slow", b"slow")).await })
  };
  tokio::time::sleep(Duration::from_millis(20)).await;

  let fast = tokio::time::timeout(
    Duration::from_millis(200),
    chain.fetch_module("demo", &module_for("fast", b"fast")),
  )
  .await
  .expect("fast request should not wait on the slow one")
  .unwrap();

  assert_eq!(fast.source, "Alpha");
  assert!(!slow.is_finished());
  assert_eq!(slow.await.unwrap().unwrap().source, "Bravo");
}

#[tokio::test]
async fn closed_gate_fails_gated_fetches() {
  let log = EventLog::default();
  let alpha = ScriptedFetcher::new("Alpha", &log)
    .module("alpha", Reply::Bytes(b"test".to_vec()))
    .arc();
  let chain = chain_of(vec![alpha], 2);
  chain.gate().close();

  let err = chain.fetch_module("demo", &module_for("alpha", b"test")).await.unwrap_err();

  assert!(matches!(err, ChainError::Gate(GateError::Closed)));
  assert!(log.fetches().is_empty());
}

#[tokio::test]
async fn manifest_falls_through_and_records_source() {
  let log = EventLog::default();
  let bytes = manifest_bytes("demo", vec![module_for("core", b"core")]);
  let alpha = ScriptedFetcher::new("Alpha", &log).arc();
  let bravo = ScriptedFetcher::new("Bravo", &log)
    .manifest("v1", Reply::Bytes(bytes.clone()))
    .arc();
  let chain = chain_of(vec![alpha, bravo], 2);

  let request = ManifestRequest::new("v1").with_sha256(Sha256Digest::compute(&bytes));
  let loaded = chain.fetch_manifest("demo", &request).await.unwrap();

  assert_eq!(loaded.source(), "Bravo");
  assert_eq!(loaded.application(), "demo");
  assert_eq!(loaded.manifest().modules().len(), 1);
}

#[tokio::test]
async fn manifest_digest_mismatch_is_integrity_failure() {
  let log = EventLog::default();
  let bytes = manifest_bytes("demo", vec![module_for("core", b"core")]);
  let alpha = ScriptedFetcher::new("Alpha", &log).manifest("v1", Reply::Bytes(bytes)).arc();
  let chain = chain_of(vec![alpha], 2);

  let request = ManifestRequest::new("v1").with_sha256(Sha256Digest::compute(b"something else"));
  let err = chain.fetch_manifest("demo", &request).await.unwrap_err();

  assert!(err.is_integrity());
}

#[tokio::test]
async fn manifest_for_other_application_is_rejected() {
  let log = EventLog::default();
  let bytes = manifest_bytes("other", vec![module_for("core", b"core")]);
  let alpha = ScriptedFetcher::new("Alpha", &log).manifest("v1", Reply::Bytes(bytes)).arc();
  let chain = chain_of(vec![alpha], 2);

  let err = chain.fetch_manifest("demo", &ManifestRequest::new("v1")).await.unwrap_err();

  assert!(err.is_integrity());
  assert!(matches!(
    err,
    ChainError::ApplicationMismatch { ref expected, ref actual, .. } if expected == "demo" && actual == "other"
  ));
}

#[tokio::test]
async fn required_manifest_digest_is_enforced_before_fetching() {
  let log = EventLog::default();
  let bytes = manifest_bytes("demo", vec![module_for("core", b"core")]);
  let alpha = ScriptedFetcher::new("Alpha", &log).manifest("v1", Reply::Bytes(bytes)).arc();
  let chain = chain_of(vec![alpha], 2).with_manifest_digest_required(true);

  let err = chain.fetch_manifest("demo", &ManifestRequest::new("v1")).await.unwrap_err();

  assert!(matches!(err, ChainError::MissingManifestDigest { ref id } if id == "v1"));
  assert!(err.is_rejected_request());
  assert!(!err.is_integrity());
  assert!(log.events().is_empty());
}

#[tokio::test]
async fn unparsable_manifest_aborts_the_chain() {
  let log = EventLog::default();
  let alpha = ScriptedFetcher::new("Alpha", &log)
    .manifest("v1", Reply::Bytes(b"{ not json".to_vec()))
    .arc();
  let bravo = ScriptedFetcher::new("Bravo", &log)
    .manifest("v1", Reply::Bytes(manifest_bytes("demo", vec![module_for("core", b"core")])))
    .arc();
  let chain = chain_of(vec![alpha, bravo], 2);

  let err = chain.fetch_manifest("demo", &ManifestRequest::new("v1")).await.unwrap_err();

  assert!(matches!(
    err,
    ChainError::Fetch {
      source: FetchError::Manifest(_),
      ..
    }
  ));
  assert!(!log.events().contains(&Event::FetchManifest {
    fetcher: "Bravo".into(),
    id: "v1".into()
  }));
}

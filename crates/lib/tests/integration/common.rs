//! Shared test doubles for integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use apploader_lib::manifest::FetchedManifest;
use apploader_lib::{FetchError, Fetcher, LoadedManifest, Manifest, ModuleRef, Sha256Digest};
use async_trait::async_trait;

/// Something a fetcher did, in the order it happened across all fetchers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  Fetch { fetcher: String, id: String },
  FetchManifest { fetcher: String, id: String },
  Pin { fetcher: String, key: Sha256Digest },
  Unpin { fetcher: String, key: Sha256Digest },
  Populate { fetcher: String, id: String },
}

#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
  pub fn push(&self, event: Event) {
    self.0.lock().unwrap().push(event);
  }

  pub fn events(&self) -> Vec<Event> {
    self.0.lock().unwrap().clone()
  }

  /// `(fetcher, id)` of every module fetch attempt, in order.
  pub fn fetches(&self) -> Vec<(String, String)> {
    self
      .events()
      .into_iter()
      .filter_map(|e| match e {
        Event::Fetch { fetcher, id } => Some((fetcher, id)),
        _ => None,
      })
      .collect()
  }

  /// Names of fetchers asked for `id`, in order.
  pub fn fetchers_asked_for(&self, id: &str) -> Vec<String> {
    self
      .fetches()
      .into_iter()
      .filter(|(_, asked)| asked == id)
      .map(|(fetcher, _)| fetcher)
      .collect()
  }
}

/// How a scripted fetcher answers one request.
#[derive(Debug, Clone)]
pub enum Reply {
  Absent,
  Bytes(Vec<u8>),
  Fail,
}

/// A fetcher whose answers are set up front and whose calls are logged.
pub struct ScriptedFetcher {
  name: String,
  log: EventLog,
  modules: HashMap<String, Reply>,
  manifests: HashMap<String, Reply>,
  delay: Option<Duration>,
  refused_pin: Option<Sha256Digest>,
  pin_switch: Option<Arc<AtomicBool>>,
  in_flight: Arc<AtomicUsize>,
  peak: Arc<AtomicUsize>,
}

impl ScriptedFetcher {
  pub fn new(name: &str, log: &EventLog) -> Self {
    Self {
      name: name.to_string(),
      log: log.clone(),
      modules: HashMap::new(),
      manifests: HashMap::new(),
      delay: None,
      refused_pin: None,
      pin_switch: None,
      in_flight: Arc::new(AtomicUsize::new(0)),
      peak: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn module(mut self, id: &str, reply: Reply) -> Self {
    self.modules.insert(id.to_string(), reply);
    self
  }

  pub fn manifest(mut self, id: &str, reply: Reply) -> Self {
    self.manifests.insert(id.to_string(), reply);
    self
  }

  pub fn delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  /// Fail every attempt to pin `manifest`.
  pub fn refuse_pin(mut self, manifest: &LoadedManifest) -> Self {
    self.refused_pin = Some(manifest.retention_key());
    self
  }

  /// Fail every pin while `switch` is set.
  pub fn refuse_pins_while(mut self, switch: &Arc<AtomicBool>) -> Self {
    self.pin_switch = Some(switch.clone());
    self
  }

  /// Share in-flight accounting with other fetchers.
  pub fn counters(mut self, in_flight: &Arc<AtomicUsize>, peak: &Arc<AtomicUsize>) -> Self {
    self.in_flight = in_flight.clone();
    self.peak = peak.clone();
    self
  }

  pub fn arc(self) -> Arc<dyn Fetcher> {
    Arc::new(self)
  }

  async fn answer(&self, reply: Option<&Reply>, url: &str) -> Result<Option<Vec<u8>>, FetchError> {
    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(now, Ordering::SeqCst);

    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }

    self.in_flight.fetch_sub(1, Ordering::SeqCst);

    match reply.cloned().unwrap_or(Reply::Absent) {
      Reply::Absent => Ok(None),
      Reply::Bytes(bytes) => Ok(Some(bytes)),
      Reply::Fail => Err(FetchError::Transport {
        url: url.to_string(),
        message: "connection reset".to_string(),
      }),
    }
  }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
  fn name(&self) -> &str {
    &self.name
  }

  async fn fetch(&self, _app: &str, id: &str, _sha256: &Sha256Digest, url: &str) -> Result<Option<Vec<u8>>, FetchError> {
    self.log.push(Event::Fetch {
      fetcher: self.name.clone(),
      id: id.to_string(),
    });
    self.answer(self.modules.get(id), url).await
  }

  async fn fetch_manifest(&self, _app: &str, id: &str, url: Option<&str>) -> Result<Option<FetchedManifest>, FetchError> {
    self.log.push(Event::FetchManifest {
      fetcher: self.name.clone(),
      id: id.to_string(),
    });
    let Some(bytes) = self.answer(self.manifests.get(id), url.unwrap_or_default()).await? else {
      return Ok(None);
    };
    Ok(Some(Manifest::parse(&bytes)?.into()))
  }

  async fn pin(&self, _app: &str, manifest: &LoadedManifest) -> Result<(), FetchError> {
    let switched_off = self.pin_switch.as_ref().is_some_and(|s| s.load(Ordering::SeqCst));
    if switched_off || self.refused_pin == Some(manifest.retention_key()) {
      return Err(FetchError::Transport {
        url: String::new(),
        message: "disk full".to_string(),
      });
    }
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    self.log.push(Event::Pin {
      fetcher: self.name.clone(),
      key: manifest.retention_key(),
    });
    Ok(())
  }

  async fn unpin(&self, _app: &str, manifest: &LoadedManifest) -> Result<(), FetchError> {
    self.log.push(Event::Unpin {
      fetcher: self.name.clone(),
      key: manifest.retention_key(),
    });
    Ok(())
  }

  async fn populate(&self, _app: &str, module: &ModuleRef, _bytes: &[u8]) -> Result<(), FetchError> {
    self.log.push(Event::Populate {
      fetcher: self.name.clone(),
      id: module.id.clone(),
    });
    Ok(())
  }
}

/// A module whose expected digest is the digest of `content`.
pub fn module_for(id: &str, content: &[u8]) -> ModuleRef {
  ModuleRef::new(id, Sha256Digest::compute(content), format!("https://cdn.example/{id}.bin"))
}

/// Manifest JSON for `app` over `modules`.
pub fn manifest_bytes(app: &str, modules: Vec<ModuleRef>) -> Vec<u8> {
  Manifest::new(app, modules).unwrap().to_json_vec().unwrap()
}

//! The container proper: registration, lazy loading, cascade reload.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use sc_domain::error::{Error, Result};
use sc_domain::stream::BoxStream;

use crate::graph;

/// Type-erased service value.
pub type ServiceValue = Arc<dyn Any + Send + Sync>;

type Factory = Arc<dyn Fn(ResolvedDeps) -> BoxFuture<'static, Result<ServiceValue>> + Send + Sync>;
type LoadResult = std::result::Result<ServiceValue, String>;
type InFlight = Shared<BoxFuture<'static, LoadResult>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Idle,
    Loading,
    Ready,
    Error,
}

/// Observable state transition of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceEvent {
    Loading { service: String },
    Ready { service: String },
    Error { service: String, message: String },
}

impl ServiceEvent {
    pub fn service(&self) -> &str {
        match self {
            ServiceEvent::Loading { service }
            | ServiceEvent::Ready { service }
            | ServiceEvent::Error { service, .. } => service,
        }
    }
}

/// Point-in-time view of a service (for `doctor`-style listings).
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub state: ServiceState,
    pub dependencies: Vec<String>,
    pub error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Dependency values handed to a factory, keyed by service name.
pub struct ResolvedDeps {
    values: HashMap<String, ServiceValue>,
}

impl ResolvedDeps {
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let value = self.values.get(name).cloned().ok_or_else(|| Error::Service {
            name: name.to_owned(),
            message: "not declared as a dependency".into(),
        })?;
        downcast(name, value)
    }
}

fn downcast<T: Any + Send + Sync>(name: &str, value: ServiceValue) -> Result<Arc<T>> {
    value.downcast::<T>().map_err(|_| Error::Service {
        name: name.to_owned(),
        message: format!("value is not a {}", type_name::<T>()),
    })
}

struct Entry {
    factory: Option<Factory>,
    dependencies: Vec<String>,
    state: ServiceState,
    value: Option<ServiceValue>,
    error: Option<String>,
    last_updated: Option<DateTime<Utc>>,
    /// Bumped on every reset/set so a load that finishes after its entry
    /// was reset cannot overwrite newer state.
    generation: u64,
    in_flight: Option<InFlight>,
}

impl Entry {
    fn new(factory: Option<Factory>, dependencies: Vec<String>) -> Self {
        Self {
            factory,
            dependencies,
            state: ServiceState::Idle,
            value: None,
            error: None,
            last_updated: None,
            generation: 0,
            in_flight: None,
        }
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.state = ServiceState::Idle;
        self.value = None;
        self.error = None;
        self.in_flight = None;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ServiceContainer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Registry of named services and their lifecycle.
///
/// Loading methods take `self: &Arc<Self>` because each load runs as its
/// own tokio task; a caller that stops waiting does not strand the service
/// in `Loading`.
pub struct ServiceContainer {
    entries: Mutex<HashMap<String, Entry>>,
    events: broadcast::Sender<ServiceEvent>,
}

impl Default for ServiceContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceContainer {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            entries: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Register (or replace) a service. The service starts `Idle`.
    ///
    /// A registration that closes a dependency cycle is accepted with a
    /// warning; loading a service on the cycle fails instead of hanging.
    pub fn register<T, F, Fut>(&self, name: impl Into<String>, dependencies: &[&str], factory: F)
    where
        T: Any + Send + Sync,
        F: Fn(ResolvedDeps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let name = name.into();
        let factory: Factory = Arc::new(move |deps| {
            let fut = factory(deps);
            async move { fut.await.map(|v| Arc::new(v) as ServiceValue) }.boxed()
        });
        let dependencies: Vec<String> = dependencies.iter().map(|d| (*d).to_owned()).collect();

        let mut entries = self.entries.lock();
        entries.insert(name.clone(), Entry::new(Some(factory), dependencies));
        let edges = edges_of(&entries);
        drop(entries);

        if let Some(cycle) = graph::cycle_through(&edges, &name) {
            tracing::warn!(
                service = %name,
                cycle = %cycle.join(" -> "),
                "service dependency cycle registered"
            );
        } else {
            tracing::debug!(service = %name, "service registered");
        }
    }

    /// Resolve a service: cached if ready, joins the in-flight load if one
    /// is running, otherwise loads it (and its dependencies).
    pub async fn get(self: &Arc<Self>, name: &str) -> Result<ServiceValue> {
        self.load(name, &[]).await
    }

    pub async fn get_typed<T: Any + Send + Sync>(self: &Arc<Self>, name: &str) -> Result<Arc<T>> {
        let value = self.get(name).await?;
        downcast(name, value)
    }

    /// Inject a value directly. The service becomes `Ready` without running
    /// its factory. Unknown names are registered on the fly (factory-less).
    pub fn set<T: Any + Send + Sync>(&self, name: &str, value: T) {
        self.set_value(name, Arc::new(value));
    }

    pub fn set_value(&self, name: &str, value: ServiceValue) {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(name.to_owned())
            .or_insert_with(|| Entry::new(None, Vec::new()));
        entry.generation += 1;
        entry.in_flight = None;
        entry.state = ServiceState::Ready;
        entry.value = Some(value);
        entry.error = None;
        entry.last_updated = Some(Utc::now());
        drop(entries);

        tracing::debug!(service = %name, "service value set");
        self.emit(ServiceEvent::Ready {
            service: name.to_owned(),
        });
    }

    pub fn is_ready(&self, name: &str) -> bool {
        self.state(name) == Some(ServiceState::Ready)
    }

    pub fn state(&self, name: &str) -> Option<ServiceState> {
        self.entries.lock().get(name).map(|e| e.state)
    }

    /// Last load error, if the service is in `Error`.
    pub fn error(&self, name: &str) -> Option<String> {
        self.entries.lock().get(name).and_then(|e| e.error.clone())
    }

    pub fn statuses(&self) -> Vec<ServiceStatus> {
        let entries = self.entries.lock();
        let mut out: Vec<ServiceStatus> = entries
            .iter()
            .map(|(name, e)| ServiceStatus {
                name: name.clone(),
                state: e.state,
                dependencies: e.dependencies.clone(),
                error: e.error.clone(),
                last_updated: e.last_updated,
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Every service that depends on `name` directly or transitively.
    pub fn find_all_dependents(&self, name: &str) -> Vec<String> {
        let edges = edges_of(&self.entries.lock());
        graph::find_all_dependents(&edges, name)
    }

    /// Rebuild `name` and every transitive dependent, bottom-up.
    ///
    /// All affected services are reset to `Idle` first, then `name` is
    /// loaded, then each dependent in dependency order. A dependent that
    /// fails to reload is left in `Error` and logged; only a failure of
    /// `name` itself is returned.
    pub async fn reload(self: &Arc<Self>, name: &str) -> Result<ServiceValue> {
        let order = {
            let mut entries = self.entries.lock();
            if !entries.contains_key(name) {
                return Err(Error::ServiceNotFound(name.to_owned()));
            }
            let edges = edges_of(&entries);
            let dependents = graph::find_all_dependents(&edges, name);
            for service in std::iter::once(name).chain(dependents.iter().map(String::as_str)) {
                if let Some(entry) = entries.get_mut(service) {
                    entry.reset();
                }
            }
            graph::dependency_order(&edges, &dependents)
        };

        tracing::info!(service = %name, dependents = ?order, "reloading service");

        let value = self.get(name).await?;
        for dependent in order.iter().filter(|d| d.as_str() != name) {
            if let Err(e) = self.get(dependent).await {
                tracing::warn!(service = %dependent, error = %e, "dependent failed to reload");
            }
        }
        Ok(value)
    }

    pub async fn reload_typed<T: Any + Send + Sync>(self: &Arc<Self>, name: &str) -> Result<Arc<T>> {
        let value = self.reload(name).await?;
        downcast(name, value)
    }

    /// All state transitions, for every service.
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    /// State transitions of one service.
    pub fn events_for(&self, name: &str) -> BoxStream<'static, ServiceEvent> {
        let mut rx = self.events.subscribe();
        let name = name.to_owned();
        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) if event.service() == name => yield event,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(service = %name, skipped, "service event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    // ── internals ────────────────────────────────────────────────────

    fn emit(&self, event: ServiceEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// `chain` is the stack of services whose loads led here; meeting a
    /// name already on it means a dependency cycle.
    fn load(self: &Arc<Self>, name: &str, chain: &[String]) -> BoxFuture<'static, Result<ServiceValue>> {
        if chain.iter().any(|c| c == name) {
            let mut path = chain.to_vec();
            path.push(name.to_owned());
            return future::ready(Err(Error::Config(format!(
                "service dependency cycle: {}",
                path.join(" -> ")
            ))))
            .boxed();
        }

        let in_flight = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(name) else {
                return future::ready(Err(Error::ServiceNotFound(name.to_owned()))).boxed();
            };

            match (entry.state, entry.value.clone(), entry.in_flight.clone()) {
                (ServiceState::Ready, Some(value), _) => return future::ready(Ok(value)).boxed(),
                (ServiceState::Loading, _, Some(shared)) => shared,
                _ => {
                    let Some(factory) = entry.factory.clone() else {
                        return future::ready(Err(Error::Service {
                            name: name.to_owned(),
                            message: "no factory registered and no value set".into(),
                        }))
                        .boxed();
                    };

                    entry.state = ServiceState::Loading;
                    entry.error = None;
                    let generation = entry.generation;
                    let dependencies = entry.dependencies.clone();
                    let mut next_chain = chain.to_vec();
                    next_chain.push(name.to_owned());

                    let task = tokio::spawn(Arc::clone(self).run_factory(
                        name.to_owned(),
                        generation,
                        dependencies,
                        factory,
                        next_chain,
                    ));
                    let shared = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(e) => Err(format!("load task failed: {e}")),
                        }
                    }
                    .boxed()
                    .shared();
                    entry.in_flight = Some(shared.clone());

                    tracing::debug!(service = %name, "service loading");
                    self.emit(ServiceEvent::Loading {
                        service: name.to_owned(),
                    });
                    shared
                }
            }
        };

        let name = name.to_owned();
        async move {
            in_flight
                .await
                .map_err(|message| Error::Service { name, message })
        }
        .boxed()
    }

    async fn run_factory(
        self: Arc<Self>,
        name: String,
        generation: u64,
        dependencies: Vec<String>,
        factory: Factory,
        chain: Vec<String>,
    ) -> LoadResult {
        let results = future::join_all(dependencies.iter().map(|d| self.load(d, &chain))).await;

        let mut values = HashMap::with_capacity(dependencies.len());
        let mut failed = None;
        for (dep, result) in dependencies.iter().zip(results) {
            match result {
                Ok(value) => {
                    values.insert(dep.clone(), value);
                }
                Err(e) => {
                    failed = Some(format!("dependency '{dep}' failed: {e}"));
                    break;
                }
            }
        }

        let outcome = match failed {
            Some(message) => Err(message),
            None => factory(ResolvedDeps { values }).await.map_err(|e| e.to_string()),
        };
        self.finish(&name, generation, outcome)
    }

    fn finish(&self, name: &str, generation: u64, outcome: LoadResult) -> LoadResult {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(name) else {
            return outcome;
        };
        if entry.generation != generation {
            tracing::debug!(service = %name, "discarding stale load result");
            return outcome;
        }

        entry.in_flight = None;
        entry.last_updated = Some(Utc::now());
        let event = match &outcome {
            Ok(value) => {
                entry.state = ServiceState::Ready;
                entry.value = Some(Arc::clone(value));
                entry.error = None;
                tracing::debug!(service = %name, "service ready");
                ServiceEvent::Ready {
                    service: name.to_owned(),
                }
            }
            Err(message) => {
                entry.state = ServiceState::Error;
                entry.value = None;
                entry.error = Some(message.clone());
                tracing::warn!(service = %name, error = %message, "service failed to load");
                ServiceEvent::Error {
                    service: name.to_owned(),
                    message: message.clone(),
                }
            }
        };
        drop(entries);
        self.emit(event);
        outcome
    }
}

fn edges_of(entries: &HashMap<String, Entry>) -> HashMap<String, Vec<String>> {
    entries
        .iter()
        .map(|(name, e)| (name.clone(), e.dependencies.clone()))
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

//! The engine facade.
//!
//! The engine owns the event-type registry, the dataset registry and every
//! statement. Events are routed by event type name; each statement runs
//! under its own mutex, so different statements may process events from
//! different threads at the same time. Listener callbacks run after the
//! statement lock is released, except for changes that reach a statement
//! through a dataset, which are delivered while the dataset's committing
//! writer still holds its commit serialization.

use crate::boundary::ErrorReport;
use crate::config::EngineConfig;
use crate::on_demand::{OnDemandSpec, OnDemandStatement};
use crate::statement::{
    ContinuousStatement, ResolvedFilter, StatementId, StatementSpec, StatementTarget,
    StreamSource, Target,
};
use eddy_core::{
    Error, Event, EventId, EventType, EventTypeBuilder, Result, Row, RowSchema, SharedEvent, Value,
};
use eddy_dataset::{
    AggregateColumn, ChangeCallback, ConsumerId, DatasetChange, DatasetRegistry, NamedDataset,
};
use eddy_join::{JoinGraph, JoinProcessor, JoinStream, StreamIndex};
use eddy_output::{DeliveredBatch, OutputProcessor, SubscriptionId};
use eddy_window::WindowPolicy;
use hashbrown::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

#[derive(Clone)]
enum Handle {
    Continuous(Arc<Mutex<ContinuousStatement>>),
    OnDemand(Arc<Mutex<OnDemandStatement>>),
}

/// Where an event type is routed within one statement. `None` is the
/// trigger of an on-demand statement.
#[derive(Clone, Copy, Debug)]
struct Route {
    statement: StatementId,
    stream: Option<StreamIndex>,
}

struct Entry {
    name: String,
    handle: Handle,
    /// Every dataset the statement reads, writes or consumes.
    datasets: Vec<String>,
    consumers: Vec<(Arc<NamedDataset>, ConsumerId)>,
}

#[derive(Default)]
struct Statements {
    entries: HashMap<StatementId, Entry>,
    routes: HashMap<String, Vec<Route>>,
}

impl Statements {
    fn entry(&self, id: StatementId) -> Result<&Entry> {
        self.entries
            .get(&id)
            .ok_or(Error::NotFound { kind: "statement", id })
    }

    fn ensure_unique(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::config("statement name must not be empty"));
        }
        if self.entries.values().any(|e| e.name == name) {
            return Err(Error::DuplicateName {
                kind: "statement",
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

/// A continuous-query engine.
pub struct Engine {
    name: String,
    deliver_empty: bool,
    event_types: RwLock<HashMap<String, Arc<EventType>>>,
    datasets: DatasetRegistry,
    statements: RwLock<Statements>,
    next_statement: AtomicU64,
    now: Arc<AtomicI64>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.name)
            .field("now", &self.current_time())
            .field("datasets", &self.datasets.names())
            .field("statements", &self.statement_names())
            .finish()
    }
}

impl Engine {
    /// Creates an engine and registers the event types and datasets the
    /// configuration declares.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let engine = Self {
            name: config.name.clone(),
            deliver_empty: config.deliver_empty_boundaries,
            event_types: RwLock::new(HashMap::new()),
            datasets: DatasetRegistry::new(),
            statements: RwLock::new(Statements::default()),
            next_statement: AtomicU64::new(1),
            now: Arc::new(AtomicI64::new(config.initial_time)),
        };
        for declared in &config.event_types {
            let mut builder = EventTypeBuilder::new(declared.name.as_str())?;
            for field in &declared.fields {
                builder = builder.field(field.name.as_str(), field.data_type)?;
            }
            engine.register_event_type(builder.build())?;
        }
        for declared in &config.datasets {
            if declared.aggregate.is_empty() {
                engine.create_dataset(&declared.name, &declared.event_type, declared.retention.clone())?;
            } else {
                engine.create_aggregate_table(
                    &declared.name,
                    &declared.event_type,
                    declared.aggregate.clone(),
                )?;
            }
        }
        info!(
            engine = %engine.name,
            event_types = config.event_types.len(),
            datasets = config.datasets.len(),
            "engine started"
        );
        Ok(engine)
    }

    /// Returns the engine name.
    pub fn name(&self) -> &str {
        &self.name
    }

    // ------------------------------------------------------------------
    // Event types
    // ------------------------------------------------------------------

    /// Registers an event type. Registering an identical type again is a
    /// no-op; a different type under a taken name is rejected.
    pub fn register_event_type(&self, event_type: Arc<EventType>) -> Result<()> {
        let mut types = self.event_types.write().expect("event type lock poisoned");
        if let Some(existing) = types.get(event_type.name()) {
            if **existing == *event_type {
                return Ok(());
            }
            return Err(Error::DuplicateName {
                kind: "event type",
                name: event_type.name().to_string(),
            });
        }
        debug!(event_type = event_type.name(), fields = event_type.len(), "event type registered");
        types.insert(event_type.name().to_string(), event_type);
        Ok(())
    }

    /// Returns a registered event type.
    pub fn event_type(&self, name: &str) -> Result<Arc<EventType>> {
        self.event_types
            .read()
            .expect("event type lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownEventType {
                name: name.to_string(),
            })
    }

    // ------------------------------------------------------------------
    // Datasets
    // ------------------------------------------------------------------

    /// Creates a row dataset over a registered event type.
    pub fn create_dataset(
        &self,
        name: &str,
        event_type: &str,
        retention: WindowPolicy,
    ) -> Result<Arc<NamedDataset>> {
        let schema = self.event_type(event_type)?;
        let dataset = self.datasets.create_dataset(name, schema, retention)?;
        dataset.advance_time(self.current_time())?;
        Ok(dataset)
    }

    /// Creates an aggregation table whose contributions are events of a
    /// registered type.
    pub fn create_aggregate_table(
        &self,
        name: &str,
        event_type: &str,
        columns: Vec<AggregateColumn>,
    ) -> Result<Arc<NamedDataset>> {
        let schema = self.event_type(event_type)?;
        self.datasets.create_aggregate_table(name, schema, columns)
    }

    /// Returns a dataset.
    pub fn dataset(&self, name: &str) -> Result<Arc<NamedDataset>> {
        self.datasets.get(name)
    }

    /// Returns the dataset names in sorted order.
    pub fn dataset_names(&self) -> Vec<String> {
        self.datasets.names()
    }

    /// Drops a dataset. Fails while any statement references it.
    pub fn drop_dataset(&self, name: &str) -> Result<()> {
        let statements = self.statements.read().expect("statement registry lock poisoned");
        let users: Vec<&str> = statements
            .entries
            .values()
            .filter(|e| e.datasets.iter().any(|d| d == name))
            .map(|e| e.name.as_str())
            .collect();
        if !users.is_empty() {
            return Err(Error::invalid_operation(format!(
                "dataset '{}' is referenced by statements {:?}",
                name, users
            )));
        }
        self.datasets.drop_dataset(name)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn next_id(&self) -> StatementId {
        self.next_statement.fetch_add(1, Ordering::Relaxed)
    }

    /// Creates a continuous statement.
    ///
    /// Every check runs before the statement is activated. A failed creation
    /// leaves no writer, reader, index or consumer behind.
    pub fn create_statement(&self, spec: StatementSpec) -> Result<StatementId> {
        self.statements
            .read()
            .expect("statement registry lock poisoned")
            .ensure_unique(&spec.name)?;

        let mut streams = Vec::with_capacity(spec.streams.len());
        let mut filters = Vec::with_capacity(spec.streams.len());
        let mut inputs: Vec<(StreamIndex, Arc<NamedDataset>)> = Vec::new();
        let mut routed: Vec<(String, StreamIndex)> = Vec::new();
        for (index, stream) in spec.streams.iter().enumerate() {
            let (event_type, window) = match &stream.source {
                StreamSource::EventType(name) => {
                    routed.push((name.clone(), index));
                    (self.event_type(name)?, stream.window.clone())
                }
                StreamSource::Dataset(name) => {
                    let dataset = self.dataset(name)?;
                    if dataset.is_aggregate() {
                        return Err(Error::config(format!(
                            "statement '{}' cannot stream from aggregation table '{}'",
                            spec.name, name
                        )));
                    }
                    let schema = dataset.schema().clone();
                    inputs.push((index, dataset));
                    (schema, WindowPolicy::KeepAll)
                }
            };
            filters.push(
                stream
                    .filters
                    .iter()
                    .map(|f| ResolvedFilter::resolve(f, &event_type))
                    .collect::<Result<Vec<_>>>()?,
            );
            streams.push(JoinStream::new(stream.alias.as_str(), event_type, window));
        }

        let join = JoinProcessor::new(JoinGraph::new(streams, spec.edges.clone())?)?;
        let deliver_empty = spec.deliver_empty.unwrap_or(self.deliver_empty);
        let output = OutputProcessor::new(join.schema(), &spec.delivery, &spec.order_by, deliver_empty)?;

        let mut datasets: Vec<String> = spec.input_datasets().map(str::to_string).collect();
        let target = match &spec.target {
            StatementTarget::Listener => Target::Listener,
            StatementTarget::Into(name) => {
                if datasets.iter().any(|d| d == name) {
                    return Err(Error::config(format!(
                        "statement '{}' cannot both consume and write dataset '{}'",
                        spec.name, name
                    )));
                }
                let dataset = self.dataset(name)?;
                datasets.push(name.clone());
                Target::into_dataset(&spec.name, &dataset, join.schema())?
            }
        };

        let id = self.next_id();
        let statement = ContinuousStatement::new(id, spec.name.clone(), join, output, filters, target);
        let handle = Arc::new(Mutex::new(statement));
        let consumers = self.attach_inputs(&handle, inputs)?;

        let mut registry = self.statements.write().expect("statement registry lock poisoned");
        if let Err(err) = registry.ensure_unique(&spec.name) {
            detach(&consumers);
            return Err(err);
        }
        for (type_name, stream) in routed {
            registry.routes.entry(type_name).or_default().push(Route {
                statement: id,
                stream: Some(stream),
            });
        }
        registry.entries.insert(
            id,
            Entry {
                name: spec.name.clone(),
                handle: Handle::Continuous(handle),
                datasets,
                consumers,
            },
        );
        info!(statement = %spec.name, id, inputs = spec.streams.len(), "statement created");
        Ok(id)
    }

    /// Subscribes a statement to its dataset inputs and loads their current
    /// rows. The statement lock is held throughout, so a commit racing with
    /// the subscription is applied after the initial rows.
    fn attach_inputs(
        &self,
        handle: &Arc<Mutex<ContinuousStatement>>,
        inputs: Vec<(StreamIndex, Arc<NamedDataset>)>,
    ) -> Result<Vec<(Arc<NamedDataset>, ConsumerId)>> {
        let mut consumers = Vec::with_capacity(inputs.len());
        let mut statement = handle.lock().expect("statement lock poisoned");
        for (stream, dataset) in inputs {
            let weak = Arc::downgrade(handle);
            let now = self.now.clone();
            let callback: ChangeCallback = Arc::new(move |change: &DatasetChange| {
                let Some(statement) = weak.upgrade() else {
                    return Ok(());
                };
                let delivery = statement
                    .lock()
                    .expect("statement lock poisoned")
                    .on_change(stream, change, now.load(Ordering::Acquire))?;
                delivery.run();
                Ok(())
            });
            let attached = dataset
                .subscribe_with_snapshot(callback)
                .and_then(|(consumer, rows)| {
                    consumers.push((dataset.clone(), consumer));
                    statement.seed(stream, rows)
                });
            if let Err(err) = attached {
                detach(&consumers);
                return Err(err);
            }
        }
        Ok(consumers)
    }

    /// Creates an on-demand statement.
    pub fn create_on_demand(&self, spec: OnDemandSpec) -> Result<StatementId> {
        self.statements
            .read()
            .expect("statement registry lock poisoned")
            .ensure_unique(&spec.name)?;
        let trigger_type = spec.trigger_type()?.to_string();
        let trigger = self.event_type(&trigger_type)?;
        let dataset = self.dataset(&spec.dataset)?;

        let id = self.next_id();
        let statement = OnDemandStatement::create(id, &spec, &trigger, &dataset)?;

        let mut registry = self.statements.write().expect("statement registry lock poisoned");
        registry.ensure_unique(&spec.name)?;
        registry.routes.entry(trigger_type).or_default().push(Route {
            statement: id,
            stream: None,
        });
        registry.entries.insert(
            id,
            Entry {
                name: spec.name.clone(),
                handle: Handle::OnDemand(Arc::new(Mutex::new(statement))),
                datasets: vec![spec.dataset.clone()],
                consumers: Vec::new(),
            },
        );
        info!(statement = %spec.name, id, dataset = %spec.dataset, "on-demand statement created");
        Ok(id)
    }

    /// Destroys a statement, releasing its writers, readers and consumers.
    pub fn destroy_statement(&self, id: StatementId) -> Result<()> {
        let entry = {
            let mut registry = self.statements.write().expect("statement registry lock poisoned");
            let entry = registry
                .entries
                .remove(&id)
                .ok_or(Error::NotFound { kind: "statement", id })?;
            for routes in registry.routes.values_mut() {
                routes.retain(|r| r.statement != id);
            }
            registry.routes.retain(|_, routes| !routes.is_empty());
            entry
        };
        detach(&entry.consumers);
        if let Handle::OnDemand(statement) = &entry.handle {
            statement.lock().expect("statement lock poisoned").release()?;
        }
        info!(statement = %entry.name, id, "statement destroyed");
        Ok(())
    }

    /// Returns the id of a statement by name.
    pub fn statement_id(&self, name: &str) -> Option<StatementId> {
        self.statements
            .read()
            .expect("statement registry lock poisoned")
            .entries
            .iter()
            .find(|(_, e)| e.name == name)
            .map(|(id, _)| *id)
    }

    /// Returns the statement names in creation order.
    pub fn statement_names(&self) -> Vec<String> {
        let registry = self.statements.read().expect("statement registry lock poisoned");
        let mut entries: Vec<(&StatementId, &Entry)> = registry.entries.iter().collect();
        entries.sort_by_key(|(id, _)| **id);
        entries.into_iter().map(|(_, e)| e.name.clone()).collect()
    }

    fn handle(&self, id: StatementId) -> Result<Handle> {
        let registry = self.statements.read().expect("statement registry lock poisoned");
        Ok(registry.entry(id)?.handle.clone())
    }

    /// Registers a listener on a statement.
    pub fn subscribe<F>(&self, id: StatementId, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&DeliveredBatch) + Send + Sync + 'static,
    {
        Ok(match self.handle(id)? {
            Handle::Continuous(s) => s
                .lock()
                .expect("statement lock poisoned")
                .subscriptions()
                .subscribe(callback),
            Handle::OnDemand(s) => s
                .lock()
                .expect("statement lock poisoned")
                .subscriptions()
                .subscribe(callback),
        })
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: StatementId, subscription: SubscriptionId) -> Result<bool> {
        Ok(match self.handle(id)? {
            Handle::Continuous(s) => s
                .lock()
                .expect("statement lock poisoned")
                .subscriptions()
                .unsubscribe(subscription),
            Handle::OnDemand(s) => s
                .lock()
                .expect("statement lock poisoned")
                .subscriptions()
                .unsubscribe(subscription),
        })
    }

    /// Returns the runtime errors a statement has isolated so far.
    pub fn errors(&self, id: StatementId) -> Result<Vec<ErrorReport>> {
        Ok(match self.handle(id)? {
            Handle::Continuous(s) => s.lock().expect("statement lock poisoned").errors().to_vec(),
            Handle::OnDemand(s) => s.lock().expect("statement lock poisoned").errors().to_vec(),
        })
    }

    /// Returns the shape of the rows a statement delivers.
    pub fn schema(&self, id: StatementId) -> Result<RowSchema> {
        Ok(match self.handle(id)? {
            Handle::Continuous(s) => s.lock().expect("statement lock poisoned").schema().clone(),
            Handle::OnDemand(s) => s.lock().expect("statement lock poisoned").schema().clone(),
        })
    }

    /// Returns the current result of a continuous statement.
    pub fn rows(&self, id: StatementId) -> Result<Vec<Row>> {
        match self.handle(id)? {
            Handle::Continuous(s) => Ok(s.lock().expect("statement lock poisoned").rows()),
            Handle::OnDemand(s) => {
                let id = s.lock().expect("statement lock poisoned").id();
                Err(Error::invalid_operation(format!(
                    "statement {} is on-demand and holds no result",
                    id
                )))
            }
        }
    }

    // ------------------------------------------------------------------
    // Events and time
    // ------------------------------------------------------------------

    fn check_registered(&self, event_type: &Arc<EventType>) -> Result<()> {
        let registered = self.event_type(event_type.name())?;
        if Arc::ptr_eq(&registered, event_type) || *registered == **event_type {
            Ok(())
        } else {
            Err(Error::invalid_operation(format!(
                "event type '{}' differs from the registered type",
                event_type.name()
            )))
        }
    }

    /// Sends one event to every statement input bound to its type.
    ///
    /// Runtime errors are isolated per statement; a fatal error stops
    /// routing and is returned.
    pub fn send_event(&self, event: SharedEvent) -> Result<()> {
        self.check_registered(event.event_type())?;
        let targets: Vec<(Route, Handle)> = {
            let registry = self.statements.read().expect("statement registry lock poisoned");
            match registry.routes.get(event.event_type().name()) {
                Some(routes) => routes
                    .iter()
                    .filter_map(|r| registry.entries.get(&r.statement).map(|e| (*r, e.handle.clone())))
                    .collect(),
                None => Vec::new(),
            }
        };
        let now = self.current_time();
        for (route, handle) in targets {
            let delivery = match (handle, route.stream) {
                (Handle::Continuous(s), Some(stream)) => s
                    .lock()
                    .expect("statement lock poisoned")
                    .on_event(stream, event.clone(), now)?,
                (Handle::OnDemand(s), None) => s
                    .lock()
                    .expect("statement lock poisoned")
                    .on_trigger(event.clone(), now)?,
                _ => continue,
            };
            delivery.run();
        }
        Ok(())
    }

    /// Builds an event of a registered type and sends it. Returns its id.
    pub fn send(&self, event_type: &str, values: Vec<Value>) -> Result<EventId> {
        let event = Arc::new(Event::new(self.event_type(event_type)?, values)?);
        let id = event.id();
        self.send_event(event)?;
        Ok(id)
    }

    /// Returns the logical time.
    pub fn current_time(&self) -> i64 {
        self.now.load(Ordering::Acquire)
    }

    /// Moves logical time forward. Dataset retention runs first, then every
    /// statement's input windows in creation order.
    pub fn advance_time(&self, now: i64) -> Result<()> {
        let current = self.current_time();
        if now < current {
            return Err(Error::invalid_operation(format!(
                "logical time cannot move backwards from {} to {}",
                current, now
            )));
        }
        self.now.store(now, Ordering::Release);
        debug!(engine = %self.name, now, "advancing time");

        for name in self.datasets.names() {
            if let Ok(dataset) = self.datasets.get(&name) {
                if !dataset.is_aggregate() {
                    dataset.advance_time(now)?;
                }
            }
        }

        let statements: Vec<Arc<Mutex<ContinuousStatement>>> = {
            let registry = self.statements.read().expect("statement registry lock poisoned");
            let mut ids: Vec<&StatementId> = registry.entries.keys().collect();
            ids.sort();
            ids.into_iter()
                .filter_map(|id| match &registry.entries[id].handle {
                    Handle::Continuous(s) => Some(s.clone()),
                    Handle::OnDemand(_) => None,
                })
                .collect()
        };
        for statement in statements {
            let delivery = statement
                .lock()
                .expect("statement lock poisoned")
                .advance_time(now)?;
            delivery.run();
        }
        Ok(())
    }
}

fn detach(consumers: &[(Arc<NamedDataset>, ConsumerId)]) {
    for (dataset, consumer) in consumers {
        dataset.unsubscribe(*consumer);
    }
}

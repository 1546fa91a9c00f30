//! Process-wide metric registry.
//!
//! A flat namespace of named counters, gauges and label maps, published as
//! JSON by the admin listener. Counters and gauges are lock-free atomics;
//! maps take a short mutex only while touching the underlying table.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// Monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Gauge that can move in both directions.
#[derive(Debug, Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    pub fn set(&self, v: i64) {
        self.0.store(v, Ordering::Relaxed);
    }

    pub fn add(&self, n: i64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn value(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counter map keyed by a label, e.g. per-route or per-downstream counts.
#[derive(Debug, Default)]
pub struct LabelMap(Mutex<BTreeMap<String, u64>>);

impl LabelMap {
    pub fn add(&self, label: &str, n: u64) {
        let mut map = self.0.lock().expect("metrics map poisoned");
        *map.entry(label.to_string()).or_insert(0) += n;
    }

    pub fn inc(&self, label: &str) {
        self.add(label, 1);
    }

    pub fn get(&self, label: &str) -> u64 {
        let map = self.0.lock().expect("metrics map poisoned");
        map.get(label).copied().unwrap_or(0)
    }

    fn snapshot(&self) -> BTreeMap<String, u64> {
        self.0.lock().expect("metrics map poisoned").clone()
    }
}

enum Var {
    Counter(Arc<Counter>),
    Gauge(Arc<Gauge>),
    Map(Arc<LabelMap>),
}

/// Flat registry of named variables. One global instance serves the whole
/// process; elements register their variables at construction time.
#[derive(Default)]
pub struct Registry {
    vars: Mutex<BTreeMap<String, Var>>,
}

impl Registry {
    /// The process-wide registry.
    pub fn global() -> &'static Registry {
        static REGISTRY: OnceLock<Registry> = OnceLock::new();
        REGISTRY.get_or_init(Registry::default)
    }

    /// Register (or fetch the existing) counter under `name`. Graph elements
    /// share ids across restarts of a listener, so re-registration returns
    /// the already-registered variable.
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        let mut vars = self.vars.lock().expect("metrics registry poisoned");
        match vars
            .entry(name.to_string())
            .or_insert_with(|| Var::Counter(Arc::new(Counter::default())))
        {
            Var::Counter(c) => Arc::clone(c),
            _ => panic!("metric {} registered with a different type", name),
        }
    }

    pub fn gauge(&self, name: &str) -> Arc<Gauge> {
        let mut vars = self.vars.lock().expect("metrics registry poisoned");
        match vars
            .entry(name.to_string())
            .or_insert_with(|| Var::Gauge(Arc::new(Gauge::default())))
        {
            Var::Gauge(g) => Arc::clone(g),
            _ => panic!("metric {} registered with a different type", name),
        }
    }

    pub fn label_map(&self, name: &str) -> Arc<LabelMap> {
        let mut vars = self.vars.lock().expect("metrics registry poisoned");
        match vars
            .entry(name.to_string())
            .or_insert_with(|| Var::Map(Arc::new(LabelMap::default())))
        {
            Var::Map(m) => Arc::clone(m),
            _ => panic!("metric {} registered with a different type", name),
        }
    }

    /// Serialize every registered variable into one flat JSON object.
    pub fn dump(&self) -> serde_json::Value {
        let vars = self.vars.lock().expect("metrics registry poisoned");
        let mut out = serde_json::Map::new();
        for (name, var) in vars.iter() {
            let value = match var {
                Var::Counter(c) => serde_json::Value::from(c.value()),
                Var::Gauge(g) => serde_json::Value::from(g.value()),
                Var::Map(m) => {
                    let snap = m.snapshot();
                    serde_json::Value::Object(
                        snap.into_iter()
                            .map(|(k, v)| (k, serde_json::Value::from(v)))
                            .collect(),
                    )
                }
            };
            out.insert(name.clone(), value);
        }
        serde_json::Value::Object(out)
    }
}

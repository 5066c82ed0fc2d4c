//! Informer facade: watch-backed caches with readiness gating.
//!
//! Each watched resource type gets a [`ResourceCache`] (a reflector store
//! plus a readiness bit that flips true once the initial list completes) and
//! a [`Watch`] driver that feeds watcher events into the store and fans them
//! out to registered add/update/delete handlers.
//!
//! The kube watcher folds creations and modifications into a single `Apply`
//! event, so the driver keeps a map of known object keys to tell the two
//! apart, and uses the same map to synthesize deletes for objects that
//! disappear across a re-list.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use kube::api::Api;
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::watcher::Event;
use kube::runtime::{watcher, WatchStreamExt};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::warn;

/// Callback invoked with the affected object. Handlers run on the watch
/// task and must not block; send work somewhere else.
pub type Handler<K> = Box<dyn Fn(&K) + Send + Sync>;

/// Add/update/delete callbacks for one watched resource type.
pub struct EventHandlers<K> {
    pub on_add: Option<Handler<K>>,
    pub on_update: Option<Handler<K>>,
    pub on_delete: Option<Handler<K>>,
}

impl<K> Default for EventHandlers<K> {
    fn default() -> Self {
        EventHandlers {
            on_add: None,
            on_update: None,
            on_delete: None,
        }
    }
}

impl<K> EventHandlers<K> {
    /// No callbacks; the watch only maintains the cache.
    pub fn none() -> Self {
        Self::default()
    }
}

/// Read access to the cached state of one resource type.
pub struct ResourceCache<K>
where
    K: reflector::Lookup + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    store: Store<K>,
    ready: Arc<AtomicBool>,
}

impl<K> Clone for ResourceCache<K>
where
    K: reflector::Lookup + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    fn clone(&self) -> Self {
        ResourceCache {
            store: self.store.clone(),
            ready: Arc::clone(&self.ready),
        }
    }
}

impl<K> ResourceCache<K>
where
    K: reflector::Lookup + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    /// Snapshot of every cached object.
    pub fn list(&self) -> Vec<Arc<K>> {
        self.store.state()
    }

    /// Looks up a single object by namespace and name.
    pub fn get(&self, namespace: Option<&str>, name: &str) -> Option<Arc<K>> {
        let mut key = ObjectRef::new(name);
        if let Some(ns) = namespace {
            key = key.within(ns);
        }
        self.store.get(&key)
    }

    /// True once the initial list has completed.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.store.state().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A not-yet-started watch for one resource type.
pub struct Watch<K>
where
    K: reflector::Lookup + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    api: Api<K>,
    config: watcher::Config,
    writer: Writer<K>,
    ready: Arc<AtomicBool>,
}

/// Creates a cache and its watch driver for the given API scope and filter.
/// The cache is usable (but empty and not ready) until [`Watch::spawn`] runs.
pub fn cache<K>(api: Api<K>, config: watcher::Config) -> (ResourceCache<K>, Watch<K>)
where
    K: kube::Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    let (store, writer) = reflector::store();
    let ready = Arc::new(AtomicBool::new(false));
    let cache = ResourceCache {
        store,
        ready: Arc::clone(&ready),
    };
    let watch = Watch {
        api,
        config,
        writer,
        ready,
    };
    (cache, watch)
}

impl<K> Watch<K>
where
    K: kube::Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
{
    /// Runs the watch until the process shuts down, keeping the store fresh
    /// and dispatching events to the handlers.
    pub fn spawn(self, handlers: EventHandlers<K>) -> JoinHandle<()> {
        let Watch {
            api,
            config,
            mut writer,
            ready,
        } = self;

        tokio::spawn(async move {
            let mut state = DispatchState::default();
            let stream = watcher(api, config).default_backoff();
            futures::pin_mut!(stream);
            while let Some(item) = stream.next().await {
                match item {
                    Ok(event) => {
                        writer.apply_watcher_event(&event);
                        dispatch(&event, &mut state, &ready, &handlers);
                    }
                    Err(err) => {
                        warn!(error = %err, "watch stream error, backing off");
                    }
                }
            }
        })
    }
}

struct DispatchState<K>
where
    K: reflector::Lookup + Clone,
    K::DynamicType: Eq + Hash + Clone,
{
    known: HashMap<ObjectRef<K>, Arc<K>>,
    relist: Option<HashSet<ObjectRef<K>>>,
}

impl<K> Default for DispatchState<K>
where
    K: reflector::Lookup + Clone,
    K::DynamicType: Eq + Hash + Clone,
{
    fn default() -> Self {
        DispatchState {
            known: HashMap::new(),
            relist: None,
        }
    }
}

fn dispatch<K>(
    event: &Event<K>,
    state: &mut DispatchState<K>,
    ready: &AtomicBool,
    handlers: &EventHandlers<K>,
) where
    K: reflector::Lookup + Clone,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    match event {
        Event::Init => {
            state.relist = Some(HashSet::new());
        }
        Event::InitApply(obj) => {
            let key = ObjectRef::from_obj(obj);
            if let Some(seen) = state.relist.as_mut() {
                seen.insert(key.clone());
            }
            classify_apply(state, key, obj, handlers);
        }
        Event::InitDone => {
            // objects that were known before the re-list but absent from it
            // were deleted while the watch was down
            if let Some(seen) = state.relist.take() {
                let vanished: Vec<ObjectRef<K>> = state
                    .known
                    .keys()
                    .filter(|key| !seen.contains(*key))
                    .cloned()
                    .collect();
                for key in vanished {
                    if let Some(obj) = state.known.remove(&key) {
                        if let Some(on_delete) = &handlers.on_delete {
                            on_delete(&obj);
                        }
                    }
                }
            }
            ready.store(true, Ordering::SeqCst);
        }
        Event::Apply(obj) => {
            classify_apply(state, ObjectRef::from_obj(obj), obj, handlers);
        }
        Event::Delete(obj) => {
            state.known.remove(&ObjectRef::from_obj(obj));
            if let Some(on_delete) = &handlers.on_delete {
                on_delete(obj);
            }
        }
    }
}

fn classify_apply<K>(
    state: &mut DispatchState<K>,
    key: ObjectRef<K>,
    obj: &K,
    handlers: &EventHandlers<K>,
) where
    K: reflector::Lookup + Clone,
    K::DynamicType: Eq + Hash + Clone,
{
    let previous = state.known.insert(key, Arc::new(obj.clone()));
    let handler = match previous {
        Some(_) => &handlers.on_update,
        None => &handlers.on_add,
    };
    if let Some(handler) = handler {
        handler(obj);
    }
}

/// Builds a ready cache seeded with the given objects, bypassing any API
/// server. Test plumbing for the reconciler and projection logic.
#[cfg(test)]
pub fn seeded_cache<K>(objects: Vec<K>) -> ResourceCache<K>
where
    K: kube::Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    let (store, mut writer) = reflector::store();
    for obj in objects {
        writer.apply_watcher_event(&Event::Apply(obj));
    }
    drop(writer);
    ResourceCache {
        store,
        ready: Arc::new(AtomicBool::new(true)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Pod;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn pod(name: &str) -> Pod {
        serde_json::from_value(json!({
            "metadata": {"name": name, "namespace": "default"},
        }))
        .unwrap()
    }

    fn counting_handlers() -> (EventHandlers<Pod>, Arc<AtomicUsize>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let adds = Arc::new(AtomicUsize::new(0));
        let updates = Arc::new(AtomicUsize::new(0));
        let deletes = Arc::new(AtomicUsize::new(0));
        let handlers = EventHandlers {
            on_add: Some(Box::new({
                let adds = Arc::clone(&adds);
                move |_: &Pod| {
                    adds.fetch_add(1, Ordering::SeqCst);
                }
            })),
            on_update: Some(Box::new({
                let updates = Arc::clone(&updates);
                move |_: &Pod| {
                    updates.fetch_add(1, Ordering::SeqCst);
                }
            })),
            on_delete: Some(Box::new({
                let deletes = Arc::clone(&deletes);
                move |_: &Pod| {
                    deletes.fetch_add(1, Ordering::SeqCst);
                }
            })),
        };
        (handlers, adds, updates, deletes)
    }

    #[test]
    fn test_apply_classified_as_add_then_update() {
        let (handlers, adds, updates, deletes) = counting_handlers();
        let mut state = DispatchState::default();
        let ready = AtomicBool::new(false);

        dispatch(&Event::Apply(pod("a")), &mut state, &ready, &handlers);
        dispatch(&Event::Apply(pod("a")), &mut state, &ready, &handlers);
        dispatch(&Event::Apply(pod("b")), &mut state, &ready, &handlers);

        assert_eq!(adds.load(Ordering::SeqCst), 2);
        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert_eq!(deletes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_delete_removes_known_key() {
        let (handlers, adds, _, deletes) = counting_handlers();
        let mut state = DispatchState::default();
        let ready = AtomicBool::new(false);

        dispatch(&Event::Apply(pod("a")), &mut state, &ready, &handlers);
        dispatch(&Event::Delete(pod("a")), &mut state, &ready, &handlers);
        // re-appearing after a delete is an add again
        dispatch(&Event::Apply(pod("a")), &mut state, &ready, &handlers);

        assert_eq!(adds.load(Ordering::SeqCst), 2);
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ready_after_init_done() {
        let (handlers, _, _, _) = counting_handlers();
        let mut state = DispatchState::default();
        let ready = AtomicBool::new(false);

        dispatch(&Event::Init, &mut state, &ready, &handlers);
        dispatch(&Event::InitApply(pod("a")), &mut state, &ready, &handlers);
        assert!(!ready.load(Ordering::SeqCst));
        dispatch(&Event::InitDone, &mut state, &ready, &handlers);
        assert!(ready.load(Ordering::SeqCst));
    }

    #[test]
    fn test_relist_synthesizes_deletes() {
        let (handlers, adds, _, deletes) = counting_handlers();
        let mut state = DispatchState::default();
        let ready = AtomicBool::new(false);

        dispatch(&Event::Apply(pod("a")), &mut state, &ready, &handlers);
        dispatch(&Event::Apply(pod("b")), &mut state, &ready, &handlers);

        // the watch restarts and only "a" is still there
        dispatch(&Event::Init, &mut state, &ready, &handlers);
        dispatch(&Event::InitApply(pod("a")), &mut state, &ready, &handlers);
        dispatch(&Event::InitDone, &mut state, &ready, &handlers);

        assert_eq!(adds.load(Ordering::SeqCst), 2);
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_seeded_cache_lookup() {
        let cache = seeded_cache(vec![pod("a"), pod("b")]);
        assert!(cache.is_ready());
        assert_eq!(cache.len(), 2);
        assert!(cache.get(Some("default"), "a").is_some());
        assert!(cache.get(Some("default"), "missing").is_none());
    }
}

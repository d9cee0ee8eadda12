//! Event delegation: one shared listener per event type dispatches to
//! callbacks that markup refers to by id.

use std::{collections::{BTreeMap, HashMap, HashSet},
          fmt,
          sync::{Arc, Mutex, atomic::{AtomicU32, Ordering}}};

use kstring::KString;
use lazy_static::lazy_static;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DelegateId(pub u32);

impl fmt::Display for DelegateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct DomEvent {
    pub event_type: KString,
    pub target: Option<KString>,
    pub default_prevented: bool,
}

impl DomEvent {
    pub fn new(event_type: &str) -> Self {
        DomEvent {
            event_type: KString::from_ref(event_type),
            target: None,
            default_prevented: false,
        }
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }
}

/// Returns false to stop the browser's default action.
pub type Callback = Arc<dyn Fn(&mut DomEvent) -> bool + Send + Sync>;

/// Callbacks for one element, by event name.
pub type DelegateMap = BTreeMap<KString, Callback>;

pub fn callback<F>(f: F) -> Callback
where F: Fn(&mut DomEvent) -> bool + Send + Sync + 'static
{
    Arc::new(f)
}

/// The document level dispatch table. Methods take `&self` since ids
/// may be allocated by several render passes that are open at the
/// same time.
pub trait DelegateRegistry {
    /// Whether `event_name` bubbles up to the shared listener; if not,
    /// the handler has to be bound on the element itself.
    fn can_delegate(&self, event_name: &str) -> bool;

    fn register(&self, cb: Callback) -> DelegateId;

    /// One id for all callbacks of a single element.
    fn register_batch(&self, map: DelegateMap) -> DelegateId;

    /// Attribute referencing `id`, for delegated events.
    fn markup_for(&self, id: DelegateId) -> String;

    /// Attribute (with leading space) binding `event_name` directly
    /// on the element.
    fn fallback_markup_for(&self, event_name: &str, id: DelegateId) -> String;

    fn release(&self, id: DelegateId);

    /// Returns the callback's result, or true if there's nothing to
    /// call.
    fn dispatch(&self, id: DelegateId, event: &mut DomEvent) -> bool;
}

pub const DELEGATE_ATTRIBUTE: &str = "atdelegate";

lazy_static!{
    static ref NON_BUBBLING_EVENTS: HashSet<&'static str> = [
        "focus", "blur", "mouseenter", "mouseleave",
        "load", "unload", "error", "scroll",
    ].into_iter().collect();
}

#[derive(Clone)]
enum Handler {
    Direct(Callback),
    Batch(DelegateMap),
}

#[derive(Default)]
pub struct Delegate {
    next_id: AtomicU32,
    handlers: Mutex<HashMap<u32, Handler>>,
}

impl Delegate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ids currently registered.
    pub fn len(&self) -> usize {
        self.handlers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: DelegateId) -> bool {
        self.handlers.lock().unwrap().contains_key(&id.0)
    }

    fn insert(&self, handler: Handler) -> DelegateId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().unwrap().insert(id, handler);
        DelegateId(id)
    }
}

impl DelegateRegistry for Delegate {
    fn can_delegate(&self, event_name: &str) -> bool {
        ! NON_BUBBLING_EVENTS.contains(event_name)
    }

    fn register(&self, cb: Callback) -> DelegateId {
        self.insert(Handler::Direct(cb))
    }

    fn register_batch(&self, map: DelegateMap) -> DelegateId {
        self.insert(Handler::Batch(map))
    }

    fn markup_for(&self, id: DelegateId) -> String {
        format!("{DELEGATE_ATTRIBUTE}=\"{id}\"")
    }

    fn fallback_markup_for(&self, event_name: &str, id: DelegateId) -> String {
        format!(" on{event_name}=\"return delegate.direct(event, {id})\"")
    }

    fn release(&self, id: DelegateId) {
        self.handlers.lock().unwrap().remove(&id.0);
    }

    fn dispatch(&self, id: DelegateId, event: &mut DomEvent) -> bool {
        // Don't hold the lock while calling out, callbacks may register
        // new handlers.
        let handler = self.handlers.lock().unwrap().get(&id.0).cloned();
        match handler {
            Some(Handler::Direct(cb)) => cb(event),
            Some(Handler::Batch(map)) =>
                match map.get(event.event_type.as_str()) {
                    Some(cb) => cb(event),
                    None => true,
                },
            None => true,
        }
    }
}

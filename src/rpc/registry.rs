use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::time::{Duration, Instant};
use tracing::warn;

use crate::rpc::payload::Payload;

/// called once with the response to a request (or a synthetic 'timeout' response)
pub type ResponseCallback = Box<dyn FnOnce(&Payload) + Send>;
pub type CommandCallback = Arc<dyn Fn(&Payload) + Send + Sync>;
/// handles a request sent by the server
pub type RequestCallback = Arc<dyn Fn(&Payload) + Send + Sync>;

pub struct PendingRequest {
    pub id: u32,
    pub name: String,
    pub callback: ResponseCallback,
    pub issued_at: Instant,
}

#[derive(Default)]
pub struct PendingRequests {
    requests: FxHashMap<u32, PendingRequest>,
}
impl PendingRequests {
    /// returns `false` if there is a pending request with the same id
    pub fn insert(&mut self, request: PendingRequest) -> bool {
        if self.requests.contains_key(&request.id) {
            return false;
        }
        self.requests.insert(request.id, request);
        true
    }

    pub fn remove(&mut self, id: u32) -> Option<PendingRequest> {
        self.requests.remove(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.requests.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// id and name of all requests that were issued more than `timeout` before `now`, oldest first
    pub fn expired(&self, now: Instant, timeout: Duration) -> Vec<(u32, String)> {
        let mut result: Vec<(Instant, u32, String)> = self.requests.values()
            .filter(|r| now.saturating_duration_since(r.issued_at) > timeout)
            .map(|r| (r.issued_at, r.id, r.name.clone()))
            .collect();
        result.sort_by_key(|(issued_at, id, _)| (*issued_at, *id));
        result.into_iter()
            .map(|(_, id, name)| (id, name))
            .collect()
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }
}

/// Any number of callbacks per command name, invoked in the order they were added
#[derive(Default)]
pub struct CommandSubscriptions {
    subscriptions: FxHashMap<String, Vec<CommandCallback>>,
}
impl CommandSubscriptions {
    pub fn add(&mut self, name: &str, callback: CommandCallback) {
        self.subscriptions.entry(name.to_string())
            .or_default()
            .push(callback);
    }

    /// Removes the (most recently added registration of the) given callback, or all callbacks for
    ///  the name if there is none. Returns `false` if nothing was removed.
    pub fn remove(&mut self, name: &str, callback: Option<&CommandCallback>) -> bool {
        let Some(callbacks) = self.subscriptions.get_mut(name) else {
            return false;
        };

        match callback {
            None => {
                let had_callbacks = !callbacks.is_empty();
                callbacks.clear();
                had_callbacks
            }
            Some(callback) => {
                match callbacks.iter().rposition(|c| Arc::ptr_eq(c, callback)) {
                    Some(idx) => {
                        callbacks.remove(idx);
                        true
                    }
                    None => false,
                }
            }
        }
    }

    /// a snapshot of the callbacks registered for a name
    pub fn subscribers(&self, name: &str) -> Vec<CommandCallback> {
        self.subscriptions.get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }
}

/// At most one callback per request name - the first registration wins.
#[derive(Default)]
pub struct ServerRequestSubscriptions {
    subscriptions: FxHashMap<String, RequestCallback>,
}
impl ServerRequestSubscriptions {
    pub fn add(&mut self, name: &str, callback: RequestCallback) -> bool {
        if self.subscriptions.contains_key(name) {
            warn!("there is already a handler for server requests '{}', ignoring the new one", name);
            return false;
        }
        self.subscriptions.insert(name.to_string(), callback);
        true
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.subscriptions.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<RequestCallback> {
        self.subscriptions.get(name).cloned()
    }

    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }
}

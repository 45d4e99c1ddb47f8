//! Shared node tree and session bookkeeping for the in-memory store.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use znode_lock_core::error::{StoreError, StoreErrorCode};
use znode_lock_core::store::{CreateMode, SessionEvent, PATH_SEPARATOR};

use crate::store::MemoryConnector;

/// Width of the zero-padded sequence suffix appended to sequential nodes.
pub const SEQUENCE_WIDTH: usize = 10;

const ROOT: &str = "/";

/// Store operations that can be targeted by fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Create,
    Delete,
    Exists,
    GetChildren,
    Close,
}

#[derive(Debug)]
struct Node {
    data: Vec<u8>,
    ephemeral_owner: Option<i64>,
    next_sequence: u64,
    children: BTreeSet<String>,
}

impl Node {
    fn new(data: Vec<u8>, ephemeral_owner: Option<i64>) -> Self {
        Self {
            data,
            ephemeral_owner,
            next_sequence: 0,
            children: BTreeSet::new(),
        }
    }
}

#[derive(Debug)]
struct SessionSlot {
    events: mpsc::UnboundedSender<SessionEvent>,
    exist_watches: HashSet<String>,
}

#[derive(Debug)]
struct ServiceState {
    nodes: BTreeMap<String, Node>,
    sessions: HashMap<i64, SessionSlot>,
    next_session_id: i64,
    unreachable: HashSet<String>,
    faults: HashMap<StoreOp, VecDeque<StoreErrorCode>>,
}

/// An in-process coordination store.
///
/// Behaves like a single-node ZooKeeper ensemble as far as the lock recipe can
/// observe: sequential nodes get a ten-digit suffix scoped to their parent,
/// ephemeral nodes vanish with their session, and existence watches fire once
/// per deletion. Cloning yields another handle to the same tree.
#[derive(Debug, Clone)]
pub struct MemoryCoordinationService {
    state: Arc<Mutex<ServiceState>>,
}

impl Default for MemoryCoordinationService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoordinationService {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(ROOT.to_string(), Node::new(Vec::new(), None));
        Self {
            state: Arc::new(Mutex::new(ServiceState {
                nodes,
                sessions: HashMap::new(),
                next_session_id: 0x1000,
                unreachable: HashSet::new(),
                faults: HashMap::new(),
            })),
        }
    }

    /// Returns a connector that opens sessions against this store.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector::new(self.clone())
    }

    /// Marks an endpoint as reachable or not. Sessions opened against a set of
    /// endpoints that are all unreachable stay in the connecting state.
    pub fn set_reachable(&self, endpoint: &str, reachable: bool) {
        let mut state = self.state.lock();
        if reachable {
            state.unreachable.remove(endpoint);
        } else {
            state.unreachable.insert(endpoint.to_string());
        }
    }

    /// Makes the next `op` call from any session fail with `code`.
    pub fn fail_next(&self, op: StoreOp, code: StoreErrorCode) {
        self.state
            .lock()
            .faults
            .entry(op)
            .or_default()
            .push_back(code);
    }

    /// Ends a session as if the store had expired it: its ephemeral nodes are
    /// removed and the session observes [`SessionEvent::Closed`].
    pub fn expire_session(&self, session_id: i64) -> bool {
        let mut state = self.state.lock();
        state.end_session(session_id)
    }

    pub fn node_exists(&self, path: &str) -> bool {
        self.state.lock().nodes.contains_key(path)
    }

    /// Returns the data stored at `path`, if the node exists.
    pub fn node_data(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().nodes.get(path).map(|n| n.data.clone())
    }

    /// Returns the child names of `path` in sorted order.
    pub fn children(&self, path: &str) -> Vec<String> {
        self.state
            .lock()
            .nodes
            .get(path)
            .map(|n| n.children.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Ids of live sessions in ascending order.
    pub fn session_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.state.lock().sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Registers a session. Returns `None` when every endpoint is unreachable.
    pub(crate) fn register_session(
        &self,
        endpoints: &[String],
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Option<i64> {
        let mut state = self.state.lock();
        if !endpoints.is_empty() && endpoints.iter().all(|e| state.unreachable.contains(e)) {
            return None;
        }
        let session_id = state.next_session_id;
        state.next_session_id += 1;
        state.sessions.insert(
            session_id,
            SessionSlot {
                events,
                exist_watches: HashSet::new(),
            },
        );
        debug!(session.id = session_id, "memory store session established");
        Some(session_id)
    }

    /// Ends a session on request of its owner. An injected close fault leaves
    /// the session live, as if the request never reached the store.
    pub(crate) fn close_session(&self, session_id: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.take_fault(StoreOp::Close)?;
        state.end_session(session_id);
        Ok(())
    }

    pub(crate) fn create(
        &self,
        session_id: i64,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> Result<String, StoreError> {
        let mut state = self.state.lock();
        state.check(session_id, StoreOp::Create)?;
        validate_path(path)?;
        if path == ROOT {
            return Err(StoreError::node_exists(path));
        }

        let (parent_path, name) = split_parent(path);
        let parent = state
            .nodes
            .get_mut(parent_path)
            .ok_or_else(|| StoreError::no_node(parent_path))?;
        if parent.ephemeral_owner.is_some() {
            return Err(StoreError::new(
                StoreErrorCode::NoChildrenForEphemerals,
                format!("ephemeral node '{parent_path}' cannot have children"),
            ));
        }

        let name = if mode.is_sequential() {
            let sequence = parent.next_sequence;
            parent.next_sequence += 1;
            format!("{name}{sequence:0width$}", width = SEQUENCE_WIDTH)
        } else {
            name.to_string()
        };
        if parent.children.contains(&name) {
            return Err(StoreError::node_exists(path));
        }
        parent.children.insert(name.clone());

        let full_path = if parent_path == ROOT {
            format!("/{name}")
        } else {
            format!("{parent_path}/{name}")
        };
        let owner = mode.is_ephemeral().then_some(session_id);
        state
            .nodes
            .insert(full_path.clone(), Node::new(data.to_vec(), owner));
        trace!(path = %full_path, ?mode, "node created");
        Ok(full_path)
    }

    pub(crate) fn delete(
        &self,
        session_id: i64,
        path: &str,
        version: Option<i32>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.check(session_id, StoreOp::Delete)?;
        validate_path(path)?;
        if let Some(version) = version
            && version != 0
        {
            return Err(StoreError::new(
                StoreErrorCode::BadVersion,
                format!("node '{path}' is at version 0, not {version}"),
            ));
        }
        state.remove_node(path)
    }

    pub(crate) fn exists(
        &self,
        session_id: i64,
        path: &str,
        watch: bool,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        state.check(session_id, StoreOp::Exists)?;
        validate_path(path)?;
        let exists = state.nodes.contains_key(path);
        if watch
            && exists
            && let Some(slot) = state.sessions.get_mut(&session_id)
        {
            slot.exist_watches.insert(path.to_string());
        }
        Ok(exists)
    }

    pub(crate) fn get_children(
        &self,
        session_id: i64,
        path: &str,
    ) -> Result<Vec<String>, StoreError> {
        let mut state = self.state.lock();
        state.check(session_id, StoreOp::GetChildren)?;
        validate_path(path)?;
        state
            .nodes
            .get(path)
            .map(|n| n.children.iter().cloned().collect())
            .ok_or_else(|| StoreError::no_node(path))
    }
}

impl ServiceState {
    fn check(&mut self, session_id: i64, op: StoreOp) -> Result<(), StoreError> {
        if !self.sessions.contains_key(&session_id) {
            return Err(StoreError::new(
                StoreErrorCode::SessionExpired,
                format!("session 0x{session_id:x} has expired"),
            ));
        }
        self.take_fault(op)
    }

    fn take_fault(&mut self, op: StoreOp) -> Result<(), StoreError> {
        match self.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(code) => Err(StoreError::new(code, format!("injected {op:?} failure"))),
            None => Ok(()),
        }
    }

    fn remove_node(&mut self, path: &str) -> Result<(), StoreError> {
        let node = self.nodes.get(path).ok_or_else(|| StoreError::no_node(path))?;
        if !node.children.is_empty() {
            return Err(StoreError::new(
                StoreErrorCode::NotEmpty,
                format!("node '{path}' has children"),
            ));
        }
        self.nodes.remove(path);
        let (parent_path, name) = split_parent(path);
        if let Some(parent) = self.nodes.get_mut(parent_path) {
            parent.children.remove(name);
        }
        trace!(path, "node deleted");

        for slot in self.sessions.values_mut() {
            if slot.exist_watches.remove(path) {
                let _ = slot.events.send(SessionEvent::NodeDeleted(path.to_string()));
            }
        }
        Ok(())
    }

    fn end_session(&mut self, session_id: i64) -> bool {
        let Some(slot) = self.sessions.remove(&session_id) else {
            return false;
        };
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(session_id))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            let _ = self.remove_node(&path);
        }
        debug!(session.id = session_id, "memory store session ended");
        let _ = slot.events.send(SessionEvent::Closed);
        true
    }
}

fn validate_path(path: &str) -> Result<(), StoreError> {
    let valid = path == ROOT
        || (path.starts_with(PATH_SEPARATOR)
            && !path.ends_with(PATH_SEPARATOR)
            && !path.contains("//"));
    if valid {
        Ok(())
    } else {
        Err(StoreError::new(
            StoreErrorCode::BadArguments,
            format!("invalid path '{path}'"),
        ))
    }
}

fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind(PATH_SEPARATOR) {
        Some(0) => (ROOT, &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => (ROOT, path),
    }
}

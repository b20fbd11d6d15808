//! Reply trees from flat, tag-addressed event sets.
//!
//! Every event is attached under each candidate it references through a
//! non-mention `"e"` tag. An event that references two candidates shows up
//! under both, as one shared node. Whatever never got attached is a top-level
//! entry, so a batch with several independent roots yields a forest.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::event::{Event, Marker};

/// An event with the replies attached to it in this reconstruction.
///
/// Nodes reached through several parents are the same allocation, so the
/// structure is a DAG and walks over it should not assume a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadNode {
    pub event: Event,
    pub replies: Vec<Arc<ThreadNode>>,
}

impl ThreadNode {
    pub fn id(&self) -> &str {
        &self.event.id
    }

    /// Search this node and everything below it.
    pub fn find(&self, id: &str) -> Option<&ThreadNode> {
        let mut visited = HashSet::new();
        find_in(self, id, &mut visited)
    }

    /// Number of distinct events below this one.
    pub fn descendant_count(&self) -> usize {
        let mut visited = HashSet::new();
        count_below(self, &mut visited);
        visited.len()
    }
}

fn find_in<'a>(
    node: &'a ThreadNode,
    id: &str,
    visited: &mut HashSet<*const ThreadNode>,
) -> Option<&'a ThreadNode> {
    if node.event.id == id {
        return Some(node);
    }
    for reply in &node.replies {
        if visited.insert(Arc::as_ptr(reply)) {
            if let Some(found) = find_in(reply, id, visited) {
                return Some(found);
            }
        }
    }
    None
}

fn count_below(node: &ThreadNode, visited: &mut HashSet<*const ThreadNode>) {
    for reply in &node.replies {
        if visited.insert(Arc::as_ptr(reply)) {
            count_below(reply, visited);
        }
    }
}

/// The forest produced for one requested root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Thread {
    root_id: String,
    forest: Vec<Arc<ThreadNode>>,
    node_count: usize,
}

impl Thread {
    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    /// Top-level entries in arrival order.
    pub fn forest(&self) -> &[Arc<ThreadNode>] {
        &self.forest
    }

    pub fn into_forest(self) -> Vec<Arc<ThreadNode>> {
        self.forest
    }

    pub fn is_empty(&self) -> bool {
        self.forest.is_empty()
    }

    /// Distinct events reachable from the forest.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// The requested root, when it was among the candidates.
    pub fn root(&self) -> Option<&ThreadNode> {
        self.find_top_level(&self.root_id)
    }

    pub fn find_top_level(&self, id: &str) -> Option<&ThreadNode> {
        self.forest
            .iter()
            .find(|node| node.event.id == id)
            .map(Arc::as_ref)
    }

    /// Search the whole forest.
    pub fn find(&self, id: &str) -> Option<&ThreadNode> {
        let mut visited = HashSet::new();
        for node in &self.forest {
            if visited.insert(Arc::as_ptr(node)) {
                if let Some(found) = find_in(node, id, &mut visited) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Replies to the requested root: its children when the root was fetched,
    /// otherwise the top-level entries (which then all reply to it).
    pub fn replies(&self) -> &[Arc<ThreadNode>] {
        match self.root() {
            Some(root) => &root.replies,
            None => &self.forest,
        }
    }
}

/// Build the reply forest for `root_id` from `events`.
///
/// Duplicate ids keep their first occurrence. An event never attaches to
/// itself, and a reference that would close a cycle is dropped. Each event is
/// built once, however many parents it has.
pub fn reconstruct(root_id: &str, events: Vec<Event>) -> Thread {
    let mut seen = HashSet::new();
    let events: Vec<Event> = events
        .into_iter()
        .filter(|ev| seen.insert(ev.id.clone()))
        .collect();

    let index: HashMap<&str, usize> = events
        .iter()
        .enumerate()
        .map(|(i, ev)| (ev.id.as_str(), i))
        .collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); events.len()];
    let mut attached = vec![false; events.len()];

    for (i, event) in events.iter().enumerate() {
        let mut parents = HashSet::new();
        for reference in event.thread_refs() {
            if reference.id == event.id || !parents.insert(reference.id) {
                continue;
            }
            if let Some(&parent) = index.get(reference.id) {
                children[parent].push(i);
                attached[i] = true;
            }
        }
    }

    let mut builder = Builder {
        events: &events,
        children: &children,
        on_path: vec![false; events.len()],
        built: vec![None; events.len()],
    };
    let forest: Vec<Arc<ThreadNode>> = (0..events.len())
        .filter(|&i| !attached[i])
        .map(|i| builder.build(i))
        .collect();
    let node_count = builder.built.iter().filter(|node| node.is_some()).count();

    Thread {
        root_id: root_id.to_string(),
        forest,
        node_count,
    }
}

struct Builder<'a> {
    events: &'a [Event],
    children: &'a [Vec<usize>],
    on_path: Vec<bool>,
    built: Vec<Option<Arc<ThreadNode>>>,
}

impl Builder<'_> {
    fn build(&mut self, at: usize) -> Arc<ThreadNode> {
        if let Some(node) = &self.built[at] {
            return Arc::clone(node);
        }
        self.on_path[at] = true;

        let children = self.children;
        let mut replies = Vec::with_capacity(children[at].len());
        for &child in &children[at] {
            if !self.on_path[child] {
                replies.push(self.build(child));
            }
        }

        self.on_path[at] = false;
        let node = Arc::new(ThreadNode {
            event: self.events[at].clone(),
            replies,
        });
        self.built[at] = Some(Arc::clone(&node));
        node
    }
}

/// Where an event sits in a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyContext {
    pub root: Option<String>,
    pub reply: Option<String>,
}

/// Root and reply ids an event points at.
///
/// Returns `None` for quotes (content embedding a `nostr:note1` or
/// `nostr:nevent1` reference) and for events without threading tags. A single
/// tag is the root. With several, `root`/`reply` markers win and unmarked
/// tags fall back to position.
pub fn reply_context(event: &Event) -> Option<ReplyContext> {
    if event.content.contains("nostr:note1") || event.content.contains("nostr:nevent1") {
        return None;
    }

    let refs: Vec<_> = event.thread_refs().collect();
    match refs.as_slice() {
        [] => None,
        [only] => Some(ReplyContext {
            root: Some(only.id.to_string()),
            reply: None,
        }),
        [first, second, ..] => {
            let root = refs
                .iter()
                .find(|r| r.marker == Some(Marker::Root))
                .map(|r| r.id.to_string());
            let reply = refs
                .iter()
                .find(|r| r.marker == Some(Marker::Reply))
                .map(|r| r.id.to_string());
            if root.is_none() && reply.is_none() {
                return Some(ReplyContext {
                    root: Some(first.id.to_string()),
                    reply: Some(second.id.to_string()),
                });
            }
            Some(ReplyContext { root, reply })
        }
    }
}

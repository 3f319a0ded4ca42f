// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::stream::{Advance, StreamInner};
use core::time::Duration;
use hashbrown::HashMap;
use s2n_http2_core::{
    endpoint,
    error::Error,
    frame::priority::StreamDependency,
    http2_error,
    stream::StreamId,
    time::Timestamp,
};
use std::sync::{Arc, RwLock};

/// The dependency registry stops growing past this many nodes; later
/// PRIORITY declarations for unseen streams are dropped rather than letting a
/// peer pin unbounded memory with frames on idle streams.
const MAX_PRIORITY_NODES: usize = 1024;

/// Owns every live stream plus the declared dependency tree
///
/// Dispatch and settings propagation take the read side; stream creation,
/// removal and re-parenting take the write side.
#[derive(Debug, Default)]
pub(crate) struct StreamManager {
    inner: RwLock<Manager>,
}

#[derive(Debug, Default)]
struct Manager {
    streams: HashMap<StreamId, Arc<StreamInner>>,
    priorities: HashMap<StreamId, PriorityNode>,
    local_active: u32,
    remote_active: u32,
}

#[derive(Clone, Copy, Debug)]
struct PriorityNode {
    parent: StreamId,
    weight: u8,
}

impl Default for PriorityNode {
    fn default() -> Self {
        Self {
            parent: StreamId::CONNECTION,
            weight: StreamDependency::DEFAULT_WEIGHT,
        }
    }
}

impl Manager {
    fn active_count(&self, local: bool) -> u32 {
        if local {
            self.local_active
        } else {
            self.remote_active
        }
    }

    fn adjust_active(&mut self, local: bool, delta: i64) {
        let count = if local {
            &mut self.local_active
        } else {
            &mut self.remote_active
        };
        *count = (*count as i64 + delta).max(0) as u32;
    }

    /// Returns true if `candidate` sits in the subtree rooted at `root`
    fn is_descendant(&self, candidate: StreamId, root: StreamId) -> bool {
        let mut current = candidate;
        while !current.is_zero() {
            if current == root {
                return true;
            }
            current = self
                .priorities
                .get(&current)
                .map(|node| node.parent)
                .unwrap_or(StreamId::CONNECTION);
        }
        false
    }
}

impl StreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Manager> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Manager> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn lookup(&self, id: StreamId) -> Option<Arc<StreamInner>> {
        self.read().streams.get(&id).cloned()
    }

    /// Registers a stream, refusing it once the concurrency allowance of its
    /// initiator is spent
    pub fn insert(
        &self,
        stream: Arc<StreamInner>,
        limit: u32,
        local_endpoint: endpoint::Type,
    ) -> Result<(), Error> {
        let mut manager = self.write();
        let local = stream.id().initiator() == local_endpoint;
        let active = stream.state().is_active();

        //= https://www.rfc-editor.org/rfc/rfc9113#section-5.1.2
        //# An endpoint that receives a HEADERS frame that causes its
        //# advertised concurrent stream limit to be exceeded MUST treat this
        //# as a stream error (Section 5.4.2) of type PROTOCOL_ERROR or
        //# REFUSED_STREAM.
        if active && manager.active_count(local) >= limit {
            return Err(http2_error!(
                REFUSED_STREAM,
                "concurrent stream limit reached"
            ));
        }

        manager.streams.insert(stream.id(), stream);
        if active {
            manager.adjust_active(local, 1);
        }
        Ok(())
    }

    /// Transfers concurrency accounting across a committed transition
    pub fn apply_advance(&self, id: StreamId, advance: Advance, local_endpoint: endpoint::Type) {
        if !advance.activated() && !advance.deactivated() {
            return;
        }
        let mut manager = self.write();
        let local = id.initiator() == local_endpoint;
        if advance.activated() {
            manager.adjust_active(local, 1);
        } else {
            manager.adjust_active(local, -1);
        }
    }

    /// The number of peer-side or local-side streams holding a concurrency
    /// slot
    pub fn active_count(&self, local: bool) -> u32 {
        self.read().active_count(local)
    }

    /// Drops streams whose post-close linger has elapsed
    pub fn reap(&self, now: Timestamp, linger: Duration) {
        let mut manager = self.write();
        manager.streams.retain(|_, stream| {
            stream
                .closed_at()
                .map_or(true, |at| now.saturating_duration_since(at) <= linger)
        });
    }

    /// Removes every stream, returning them for teardown
    pub fn drain(&self) -> Vec<Arc<StreamInner>> {
        let mut manager = self.write();
        manager.local_active = 0;
        manager.remote_active = 0;
        manager.streams.drain().map(|(_, stream)| stream).collect()
    }

    /// Visits every live stream; used to fan out settings deltas
    pub fn for_each(
        &self,
        mut f: impl FnMut(&Arc<StreamInner>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let manager = self.read();
        for stream in manager.streams.values() {
            f(stream)?;
        }
        Ok(())
    }

    /// Returns true while any registered stream has not reached `Closed`
    ///
    /// Closed streams linger for the grace window, so emptiness alone is the
    /// wrong signal for drain completion.
    pub fn has_open_streams(&self) -> bool {
        self.read()
            .streams
            .values()
            .any(|stream| !stream.state().is_closed())
    }

    /// Records a declared dependency, breaking cycles by detaching first
    pub fn reparent(&self, id: StreamId, dependency: StreamDependency) -> Result<(), Error> {
        //= https://www.rfc-editor.org/rfc/rfc7540#section-5.3.1
        //# A stream cannot depend on itself.  An endpoint MUST treat this as a
        //# stream error (Section 5.4.2) of type PROTOCOL_ERROR.
        if dependency.dependency_id == id {
            return Err(http2_error!(PROTOCOL_ERROR, "stream depends on itself"));
        }

        let mut manager = self.write();

        if !manager.priorities.contains_key(&id) && manager.priorities.len() >= MAX_PRIORITY_NODES
        {
            return Ok(());
        }

        //= https://www.rfc-editor.org/rfc/rfc7540#section-5.3.3
        //# If a stream is made dependent on one of its own dependencies, the
        //# formerly dependent stream is first moved to be dependent on the
        //# reprioritized stream's previous parent.
        if manager.is_descendant(dependency.dependency_id, id) {
            let grandparent = manager
                .priorities
                .get(&id)
                .map(|node| node.parent)
                .unwrap_or(StreamId::CONNECTION);
            manager
                .priorities
                .entry(dependency.dependency_id)
                .or_default()
                .parent = grandparent;
        }

        //= https://www.rfc-editor.org/rfc/rfc7540#section-5.3.1
        //# An exclusive flag allows for the insertion of a new level of
        //# dependencies.  The exclusive flag causes the stream to become the
        //# sole dependency of its parent stream, causing other dependencies to
        //# become dependent on the exclusive stream.
        if dependency.is_exclusive {
            for (node_id, node) in manager.priorities.iter_mut() {
                if node.parent == dependency.dependency_id && *node_id != id {
                    node.parent = id;
                }
            }
        }

        let node = manager.priorities.entry(id).or_default();
        node.parent = dependency.dependency_id;
        node.weight = dependency.weight;
        Ok(())
    }

    /// The declared (parent, wire weight) of a stream, if it ever declared one
    pub fn priority(&self, id: StreamId) -> Option<(StreamId, u8)> {
        self.read()
            .priorities
            .get(&id)
            .map(|node| (node.parent, node.weight))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;

    fn stream(id: u32) -> Arc<StreamInner> {
        let id = StreamId::new(id).unwrap();
        let stream = Arc::new(StreamInner::new(id, 65_535, 65_535));
        // enter Open so the stream occupies a concurrency slot
        stream
            .transition_recv(
                s2n_http2_core::frame::Kind::Headers,
                false,
                now(),
                Duration::from_secs(5),
            )
            .unwrap();
        stream
    }

    fn now() -> Timestamp {
        Timestamp::from_duration(Duration::from_secs(1))
    }

    #[test]
    fn enforces_the_concurrency_limit() {
        let manager = StreamManager::new();
        let local = endpoint::Type::Server;

        manager.insert(stream(1), 2, local).unwrap();
        manager.insert(stream(3), 2, local).unwrap();

        let err = manager.insert(stream(5), 2, local).unwrap_err();
        assert_eq!(err.code, s2n_http2_core::error::ErrorCode::REFUSED_STREAM);

        // the limit is per initiator; a local stream still fits
        manager.insert(stream(2), 2, local).unwrap();
        assert_eq!(manager.active_count(true), 1);
        assert_eq!(manager.active_count(false), 2);
    }

    #[test]
    fn reaps_lingered_streams() {
        let manager = StreamManager::new();
        let local = endpoint::Type::Server;
        let linger = Duration::from_secs(5);

        let first = stream(1);
        manager.insert(first.clone(), u32::MAX, local).unwrap();
        manager.insert(stream(3), u32::MAX, local).unwrap();

        first.shutdown(http2_error!(CANCEL), now());

        // still lingering at +2s
        manager.reap(now() + Duration::from_secs(2), linger);
        assert!(manager.lookup(StreamId::new(1).unwrap()).is_some());

        // gone at +6s
        manager.reap(now() + Duration::from_secs(6), linger);
        assert!(manager.lookup(StreamId::new(1).unwrap()).is_none());
        assert!(manager.lookup(StreamId::new(3).unwrap()).is_some());
    }

    #[test]
    fn records_declared_priorities() {
        let manager = StreamManager::new();
        let id = |n| StreamId::new(n).unwrap();

        manager
            .reparent(id(3), StreamDependency::new(id(1), 31, false))
            .unwrap();
        assert_eq!(manager.priority(id(3)), Some((id(1), 31)));

        let err = manager
            .reparent(id(3), StreamDependency::new(id(3), 0, false))
            .unwrap_err();
        assert_eq!(err.code, s2n_http2_core::error::ErrorCode::PROTOCOL_ERROR);
    }

    #[test]
    fn exclusive_adopts_siblings() {
        let manager = StreamManager::new();
        let id = |n| StreamId::new(n).unwrap();

        manager
            .reparent(id(3), StreamDependency::new(id(1), 15, false))
            .unwrap();
        manager
            .reparent(id(5), StreamDependency::new(id(1), 15, false))
            .unwrap();
        manager
            .reparent(id(7), StreamDependency::new(id(1), 15, true))
            .unwrap();

        assert_eq!(manager.priority(id(7)), Some((id(1), 15)));
        assert_eq!(manager.priority(id(3)), Some((id(7), 15)));
        assert_eq!(manager.priority(id(5)), Some((id(7), 15)));
    }

    #[test]
    fn cycles_are_broken_by_detaching_first() {
        let manager = StreamManager::new();
        let id = |n| StreamId::new(n).unwrap();

        // 1 <- 3 <- 5, then 1 is re-declared below 5
        manager
            .reparent(id(3), StreamDependency::new(id(1), 15, false))
            .unwrap();
        manager
            .reparent(id(5), StreamDependency::new(id(3), 15, false))
            .unwrap();
        manager
            .reparent(id(1), StreamDependency::new(id(5), 15, false))
            .unwrap();

        // 5 moved up to 1's former parent (the root), then 1 attached below it
        assert_eq!(manager.priority(id(5)), Some((StreamId::CONNECTION, 15)));
        assert_eq!(manager.priority(id(1)), Some((id(5), 15)));
        assert_eq!(manager.priority(id(3)), Some((id(1), 15)));
    }
}

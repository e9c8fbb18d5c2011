//! Pads: typed connection points, links, and probes
//!
//! A pad belongs to exactly one element, has a direction, and is linked to
//! at most one peer at a time. Linking succeeds only when capability
//! negotiation finds a mutually acceptable descriptor.
//!
//! Probes are the synchronous interception hooks of the engine: they fire
//! on the streaming thread as traffic passes the pad. [`Pad::do_in_idle_probe`]
//! is the sanctioned way for the control thread to mutate live topology:
//! it parks the caller until the streaming thread has executed the work
//! between two buffers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::{debug, trace, warn};

use crate::domain::bin;
use crate::domain::caps::Caps;
use crate::domain::element::{self, Element, ElementObject};
use crate::domain::object::{Handle, WeakHandle};

/// A block of interleaved f32 samples travelling through the graph.
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    pub samples: Vec<f32>,
}

impl Buffer {
    pub fn new(samples: Vec<f32>) -> Self {
        Buffer { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Downstream-travelling events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Eos,
}

/// What actually flows through a link.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Buffer(Buffer),
    Event(Event),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadDirection {
    Src,
    Sink,
}

/// Bitmask selecting which traffic a probe intercepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeType(u32);

impl ProbeType {
    pub const BUFFER: ProbeType = ProbeType(1 << 0);
    pub const EVENT_DOWNSTREAM: ProbeType = ProbeType(1 << 1);
    pub const BLOCK: ProbeType = ProbeType(1 << 2);
    /// Convenience mask matching the traffic a blocking reconfiguration
    /// wants to intercept.
    pub const BLOCK_DOWNSTREAM: ProbeType =
        ProbeType(1 << 0 | 1 << 1 | 1 << 2);

    pub fn contains(self, other: ProbeType) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for ProbeType {
    type Output = ProbeType;
    fn bitor(self, rhs: ProbeType) -> ProbeType {
        ProbeType(self.0 | rhs.0)
    }
}

/// Verdict returned by a probe callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeReturn {
    /// Let the item continue and keep the probe installed.
    Pass,
    /// Discard the item, keep the probe.
    Drop,
    /// Let the item continue and uninstall the probe.
    Remove,
}

/// Context handed to a probe callback.
pub struct ProbeInfo<'a> {
    pub item: &'a StreamItem,
}

type ProbeCallback = Box<dyn for<'a> FnMut(&mut ProbeInfo<'a>) -> ProbeReturn + Send>;

struct ProbeEntry {
    id: u64,
    mask: ProbeType,
    callback: ProbeCallback,
}

/// Native payload of a pad.
pub(crate) struct PadObject {
    pub(crate) name: String,
    pub(crate) direction: PadDirection,
    /// What this pad could carry; fixed template from the element factory.
    template: Caps,
    pub(crate) parent: Mutex<WeakHandle<ElementObject>>,
    peer: Mutex<WeakHandle<PadObject>>,
    current_caps: Mutex<Caps>,
    /// For ghost pads: the proxied internal pad.
    ghost_target: Mutex<WeakHandle<PadObject>>,
    probes: Mutex<Vec<ProbeEntry>>,
    next_probe_id: AtomicU64,
}

/// Wrapper over a pad's native object. Cheap to clone; identity equality.
#[derive(Clone, PartialEq)]
pub struct Pad {
    pub(crate) handle: Handle<PadObject>,
}

impl Pad {
    pub(crate) fn new(name: impl Into<String>, direction: PadDirection, template: Caps) -> Pad {
        Pad {
            handle: Handle::alloc(PadObject {
                name: name.into(),
                direction,
                template,
                parent: Mutex::new(WeakHandle::null()),
                peer: Mutex::new(WeakHandle::null()),
                current_caps: Mutex::new(Caps::none()),
                ghost_target: Mutex::new(WeakHandle::null()),
                probes: Mutex::new(Vec::new()),
                next_probe_id: AtomicU64::new(1),
            }),
        }
    }

    /// A ghost pad proxying `target` as its own connection point.
    pub(crate) fn new_ghost(name: impl Into<String>, target: &Pad) -> Pad {
        let obj = target.object();
        let pad = Pad::new(name, obj.direction, obj.template.clone());
        *pad.object().ghost_target.lock().unwrap() = target.handle.downgrade();
        pad
    }

    fn object(&self) -> &PadObject {
        self.handle.get().expect("pad wrapper holds a live object")
    }

    pub fn name(&self) -> &str {
        &self.object().name
    }

    pub fn direction(&self) -> PadDirection {
        self.object().direction
    }

    pub(crate) fn set_parent(&self, parent: WeakHandle<ElementObject>) {
        *self.object().parent.lock().unwrap() = parent;
    }

    /// The element this pad belongs to, if it is still alive.
    pub fn parent_element(&self) -> Option<Element> {
        let handle = self.object().parent.lock().unwrap().upgrade();
        if handle.is_null() {
            None
        } else {
            Some(Element { handle })
        }
    }

    pub fn is_ghost(&self) -> bool {
        self.ghost_target_raw().is_some()
    }

    fn ghost_target_raw(&self) -> Option<Pad> {
        let handle = self.object().ghost_target.lock().unwrap().upgrade();
        if handle.is_null() {
            None
        } else {
            Some(Pad { handle })
        }
    }

    /// The currently linked peer, if any.
    pub fn peer(&self) -> Option<Pad> {
        let handle = self.object().peer.lock().unwrap().upgrade();
        if handle.is_null() {
            None
        } else {
            Some(Pad { handle })
        }
    }

    pub fn is_linked(&self) -> bool {
        self.peer().is_some()
    }

    /// Negotiated caps of the current link; unset caps when unlinked.
    pub fn current_caps(&self) -> Caps {
        self.object().current_caps.lock().unwrap().clone()
    }

    /// What this pad could accept, independent of any link.
    pub fn query_caps(&self) -> Caps {
        match self.ghost_target_raw() {
            Some(target) => target.query_caps(),
            None => self.object().template.clone(),
        }
    }

    /// Link this src pad to a sink pad.
    ///
    /// Fails (false) when directions are wrong, either pad is already
    /// linked, or capability negotiation finds no common descriptor. The
    /// graph is untouched on failure.
    pub fn link(&self, sink: &Pad) -> bool {
        if self.direction() != PadDirection::Src || sink.direction() != PadDirection::Sink {
            debug!(src = self.name(), sink = sink.name(), "link refused: direction mismatch");
            return false;
        }
        let negotiated = match self.query_caps().intersect_first(&sink.query_caps()) {
            Some(caps) => caps,
            None => {
                debug!(
                    src = self.name(),
                    sink = sink.name(),
                    "link refused: no common capability"
                );
                return false;
            }
        };

        // Lock order: src peer slot, then sink peer slot.
        let mut our_peer = self.object().peer.lock().unwrap();
        if !our_peer.upgrade().is_null() {
            debug!(src = self.name(), "link refused: src already linked");
            return false;
        }
        let mut their_peer = sink.object().peer.lock().unwrap();
        if !their_peer.upgrade().is_null() {
            debug!(sink = sink.name(), "link refused: sink already linked");
            return false;
        }
        *our_peer = sink.handle.downgrade();
        *their_peer = self.handle.downgrade();
        drop(their_peer);
        drop(our_peer);

        *self.object().current_caps.lock().unwrap() = negotiated.clone();
        *sink.object().current_caps.lock().unwrap() = negotiated;
        trace!(src = self.name(), sink = sink.name(), "pads linked");
        true
    }

    /// Unlink from a specific peer. False when the pads were not peered.
    pub fn unlink(&self, peer: &Pad) -> bool {
        match self.peer() {
            Some(current) if current == *peer => {
                *self.object().peer.lock().unwrap() = WeakHandle::null();
                *peer.object().peer.lock().unwrap() = WeakHandle::null();
                *self.object().current_caps.lock().unwrap() = Caps::none();
                *peer.object().current_caps.lock().unwrap() = Caps::none();
                trace!(src = self.name(), sink = peer.name(), "pads unlinked");
                true
            }
            _ => false,
        }
    }

    /// Unlink from whatever peer is present. False when unlinked already.
    pub fn unlink_peer(&self) -> bool {
        match self.peer() {
            Some(peer) => self.unlink(&peer),
            None => false,
        }
    }

    /// Install a probe. The callback runs synchronously on the streaming
    /// thread for every matching item; its verdict controls both the item
    /// and the probe's own lifetime.
    pub fn add_probe<F>(&self, mask: ProbeType, callback: F) -> u64
    where
        F: for<'a> FnMut(&mut ProbeInfo<'a>) -> ProbeReturn + Send + 'static,
    {
        let obj = self.object();
        let id = obj.next_probe_id.fetch_add(1, Ordering::Relaxed);
        obj.probes.lock().unwrap().push(ProbeEntry {
            id,
            mask,
            callback: Box::new(callback),
        });
        id
    }

    pub fn remove_probe(&self, id: u64) {
        self.object().probes.lock().unwrap().retain(|p| p.id != id);
    }

    /// One-shot probe that fires on end-of-stream and removes itself.
    pub fn add_eos_probe<F>(&self, mut callback: F) -> u64
    where
        F: FnMut() + Send + 'static,
    {
        self.add_probe(ProbeType::EVENT_DOWNSTREAM, move |info| {
            match info.item {
                StreamItem::Event(Event::Eos) => {
                    callback();
                    ProbeReturn::Remove
                }
                _ => ProbeReturn::Pass,
            }
        })
    }

    /// Run `work` on the streaming thread at the next idle point and block
    /// until it has executed.
    ///
    /// This is the safe-mutation primitive for live topology changes: the
    /// work runs with no buffer push in flight. When the pad has no
    /// actively streaming pipeline above it the work runs inline on the
    /// calling thread.
    ///
    /// Calling this from the streaming thread itself deadlocks: the
    /// thread would wait for an idle point it is itself occupying.
    pub fn do_in_idle_probe<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut work: Box<dyn FnOnce() + Send> = Box::new(work);
        if let Some(pipeline) = self
            .parent_element()
            .and_then(|e| element::find_pipeline(&e))
        {
            match bin::schedule_idle_work(&pipeline, work) {
                Ok(done) => {
                    // Rendezvous: the streaming thread signals after
                    // running the work. A dropped sender (scheduler
                    // shutdown mid-way) also releases us, since the work
                    // ran during the shutdown drain.
                    let _ = done.recv();
                    return;
                }
                // Scheduler not running: nothing is flowing, run inline.
                Err(returned) => work = returned,
            }
        }
        work();
    }

    /// Run the pad's probes against an item.
    ///
    /// Entries are temporarily detached while their callback runs so a
    /// callback may freely add or remove probes on its own pad.
    fn run_probes(&self, item: &StreamItem) -> ProbeReturn {
        let matching: Vec<u64> = {
            let probes = self.object().probes.lock().unwrap();
            probes
                .iter()
                .filter(|p| match item {
                    StreamItem::Buffer(_) => p.mask.contains(ProbeType::BUFFER),
                    StreamItem::Event(_) => p.mask.contains(ProbeType::EVENT_DOWNSTREAM),
                })
                .map(|p| p.id)
                .collect()
        };

        for id in matching {
            let entry = {
                let mut probes = self.object().probes.lock().unwrap();
                match probes.iter().position(|p| p.id == id) {
                    Some(pos) => probes.remove(pos),
                    None => continue, // removed by an earlier callback
                }
            };
            let mut entry = entry;
            let verdict = (entry.callback)(&mut ProbeInfo { item });
            match verdict {
                ProbeReturn::Remove => (),
                _ => self.object().probes.lock().unwrap().push(entry),
            }
            if verdict == ProbeReturn::Drop {
                return ProbeReturn::Drop;
            }
        }
        ProbeReturn::Pass
    }

    /// Push an item downstream out of this src pad.
    ///
    /// Resolution order: probes, the direct peer, then a ghost pad of the
    /// parent bin proxying this pad. An unresolvable item is dropped.
    pub(crate) fn push(&self, item: StreamItem) {
        if self.run_probes(&item) == ProbeReturn::Drop {
            return;
        }
        if let Some(peer) = self.peer() {
            peer.receive(item);
            return;
        }
        if let Some(ghost) = self.find_ghost_proxy() {
            ghost.push(item);
            return;
        }
        trace!(pad = self.name(), "item dropped: pad has no downstream");
    }

    /// Accept an item arriving at this sink pad.
    pub(crate) fn receive(&self, item: StreamItem) {
        if self.run_probes(&item) == ProbeReturn::Drop {
            return;
        }
        if let Some(target) = self.ghost_target_raw() {
            // Ghost sink pad: forward into the bin.
            target.receive(item);
            return;
        }
        match self.parent_element() {
            Some(element) => element::deliver(&element, self, item),
            None => trace!(pad = self.name(), "item dropped: pad has no element"),
        }
    }

    /// Ghost pad of the parent element's bin that proxies this pad.
    fn find_ghost_proxy(&self) -> Option<Pad> {
        let element = self.parent_element()?;
        let bin = element.parent()?;
        bin.pads()
            .into_iter()
            .find(|candidate| match candidate.ghost_target_raw() {
                Some(target) => target == *self,
                None => false,
            })
    }
}

impl std::fmt::Debug for Pad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pad({}, {:?})", self.name(), self.direction())
    }
}

/// Link a chain of elements in order, warning on any failed segment.
///
/// The failed segment is left unlinked; earlier segments stay linked, so
/// callers treating this as best-effort should check the return value.
pub fn link_many(elements: &[&Element]) -> bool {
    let mut all = true;
    for pair in elements.windows(2) {
        if !pair[0].link(pair[1]) {
            warn!(
                src = pair[0].name(),
                sink = pair[1].name(),
                "could not link elements"
            );
            all = false;
        }
    }
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::element::Element;

    fn pair() -> (Element, Element) {
        (
            Element::from_factory("tone-source", "src").unwrap(),
            Element::from_factory("null-sink", "sink").unwrap(),
        )
    }

    #[test]
    fn link_then_unlink_leaves_both_pads_peerless() {
        let (src, sink) = pair();
        let src_pad = src.static_pad("src").unwrap();
        let sink_pad = sink.static_pad("sink").unwrap();

        assert!(src_pad.link(&sink_pad));
        assert!(src_pad.is_linked());
        assert_eq!(sink_pad.peer().unwrap(), src_pad);
        assert!(!src_pad.current_caps().is_null());

        assert!(src_pad.unlink(&sink_pad));
        assert!(src_pad.peer().is_none());
        assert!(sink_pad.peer().is_none());
        assert!(src_pad.current_caps().is_null());
        assert!(sink_pad.current_caps().is_null());

        // Idempotent teardown: a second unlink is a clean no-op.
        assert!(!src_pad.unlink(&sink_pad));
    }

    #[test]
    fn double_link_is_refused() {
        let (src, sink) = pair();
        let other_sink = Element::from_factory("null-sink", "sink2").unwrap();
        let src_pad = src.static_pad("src").unwrap();

        assert!(src_pad.link(&sink.static_pad("sink").unwrap()));
        assert!(!src_pad.link(&other_sink.static_pad("sink").unwrap()));
        assert_eq!(src_pad.peer().unwrap(), sink.static_pad("sink").unwrap());
    }

    #[test]
    fn direction_mismatch_is_refused() {
        let (src, sink) = pair();
        let src_pad = src.static_pad("src").unwrap();
        let sink_pad = sink.static_pad("sink").unwrap();
        assert!(!sink_pad.link(&src_pad));
    }

    #[test]
    fn probe_sees_pushed_buffers_and_can_drop() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let (src, sink) = pair();
        let src_pad = src.static_pad("src").unwrap();
        assert!(src_pad.link(&sink.static_pad("sink").unwrap()));

        let seen = Arc::new(AtomicU32::new(0));
        let seen_in_probe = seen.clone();
        src_pad.add_probe(ProbeType::BUFFER, move |_info| {
            seen_in_probe.fetch_add(1, Ordering::SeqCst);
            ProbeReturn::Drop
        });

        src_pad.push(StreamItem::Buffer(Buffer::new(vec![0.0; 8])));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(sink.get_uint64("received"), 0);
    }

    #[test]
    fn remove_verdict_uninstalls_probe() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let (src, sink) = pair();
        let src_pad = src.static_pad("src").unwrap();
        assert!(src_pad.link(&sink.static_pad("sink").unwrap()));

        let fired = Arc::new(AtomicU32::new(0));
        let fired_in_probe = fired.clone();
        src_pad.add_probe(ProbeType::BUFFER, move |_info| {
            fired_in_probe.fetch_add(1, Ordering::SeqCst);
            ProbeReturn::Remove
        });

        src_pad.push(StreamItem::Buffer(Buffer::default()));
        src_pad.push(StreamItem::Buffer(Buffer::default()));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn eos_probe_fires_once() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let (src, sink) = pair();
        let sink_pad = sink.static_pad("sink").unwrap();
        assert!(src.static_pad("src").unwrap().link(&sink_pad));

        let fired = Arc::new(AtomicU32::new(0));
        let fired_in_probe = fired.clone();
        sink_pad.add_eos_probe(move || {
            fired_in_probe.fetch_add(1, Ordering::SeqCst);
        });

        src.send_eos();
        src.send_eos();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn idle_probe_runs_inline_without_a_streaming_pipeline() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let (src, _sink) = pair();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_in_work = ran.clone();
        src.static_pad("src")
            .unwrap()
            .do_in_idle_probe(move || ran_in_work.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
    }
}

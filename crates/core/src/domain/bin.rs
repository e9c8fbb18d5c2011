//! Containers: bins, pipelines, the message bus, and the streaming thread
//!
//! A bin owns a set of child elements. State changes cascade to children
//! (sink-most first, skipping state-locked children); ghost pads let a
//! composed sub-graph present a single pad to the outside.
//!
//! A pipeline is a bin with a message bus and the data-flow scheduler: a
//! dedicated streaming thread that pushes buffers from source elements
//! through the graph while the pipeline is Playing, runs scheduled idle
//! work between push cycles, and completes asynchronous state changes.

use std::ops::Deref;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, info, trace};

use crate::domain::element::{
    Element, GraphError, GraphResult, Kind, State, StateChange, DEFAULT_STATE_TIMEOUT,
    STOP_TIMEOUT,
};
use crate::domain::pad::Pad;

/// Messages posted to a pipeline's bus.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    StateChanged {
        element: String,
        old: State,
        new: State,
    },
    Eos {
        origin: String,
    },
    Error {
        origin: String,
        message: String,
    },
}

/// Control-thread view of a pipeline's message stream.
#[derive(Clone)]
pub struct Bus {
    rx: Receiver<Message>,
}

impl Bus {
    pub fn try_pop(&self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Option<Message> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Wait for the first message matching `predicate`, discarding others.
    pub fn wait_for(
        &self,
        timeout: Duration,
        mut predicate: impl FnMut(&Message) -> bool,
    ) -> Option<Message> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let now = std::time::Instant::now();
            if now >= deadline {
                return None;
            }
            match self.rx.recv_timeout(deadline - now) {
                Ok(msg) if predicate(&msg) => return Some(msg),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }
}

pub(crate) struct IdleWork {
    work: Box<dyn FnOnce() + Send>,
    done: Sender<()>,
}

struct SchedState {
    running: bool,
    playing: bool,
    queue: Vec<IdleWork>,
}

/// Shared state between the control thread and the streaming thread.
pub(crate) struct Scheduler {
    state: Mutex<SchedState>,
    cv: Condvar,
}

impl Scheduler {
    fn new() -> Scheduler {
        Scheduler {
            state: Mutex::new(SchedState {
                running: false,
                playing: false,
                queue: Vec::new(),
            }),
            cv: Condvar::new(),
        }
    }
}

/// Child bookkeeping shared by bins and pipelines.
#[derive(Default)]
pub(crate) struct BinData {
    pub(crate) children: Mutex<Vec<Element>>,
}

pub(crate) struct PipelineData {
    pub(crate) bin: BinData,
    bus_tx: Sender<Message>,
    bus_rx: Receiver<Message>,
    sched: Arc<Scheduler>,
    thread: Mutex<Option<JoinHandle<()>>>,
    /// Last state explicitly requested through `set_state`; the value the
    /// pause/swap/resume fallback restores.
    pub(crate) requested: Mutex<State>,
}

fn bin_data(element: &Element) -> Option<&BinData> {
    match &element.object().kind {
        Kind::Bin(data) => Some(data),
        Kind::Pipeline(data) => Some(&data.bin),
        Kind::Leaf(_) => None,
    }
}

fn pipeline_data(element: &Element) -> Option<&PipelineData> {
    match &element.object().kind {
        Kind::Pipeline(data) => Some(data),
        _ => None,
    }
}

/// An element that owns child elements.
#[derive(Clone, PartialEq)]
pub struct Bin {
    element: Element,
}

impl Deref for Bin {
    type Target = Element;

    fn deref(&self) -> &Element {
        &self.element
    }
}

impl Bin {
    pub fn new(name: &str) -> Bin {
        Bin {
            element: Element::new_with_kind(name, "bin", Kind::Bin(BinData::default())),
        }
    }

    pub(crate) fn from_element(element: Element) -> Bin {
        debug_assert!(bin_data(&element).is_some());
        Bin { element }
    }

    pub fn element(&self) -> &Element {
        &self.element
    }

    /// Add a child. The bin takes (shared) ownership; the child keeps its
    /// name, which must be unique among the bin's children.
    pub fn add(&self, child: &Element) -> GraphResult<()> {
        if child.parent().is_some() {
            return Err(GraphError::AlreadyOwned(child.name().to_string()));
        }
        let data = bin_data(&self.element).expect("bin wrapper holds a container");
        let mut children = data.children.lock().unwrap();
        if children.iter().any(|c| c.name() == child.name()) {
            return Err(GraphError::DuplicateName(child.name().to_string()));
        }
        *child.object().parent.lock().unwrap() = self.element.handle.downgrade();
        children.push(child.clone());
        trace!(bin = self.name(), child = child.name(), "added child");
        Ok(())
    }

    pub fn add_many(&self, children: &[&Element]) -> GraphResult<()> {
        for child in children {
            self.add(child)?;
        }
        Ok(())
    }

    /// Remove a child, unlinking all its pads first. Removing an element
    /// that is not a child is a no-op returning false.
    ///
    /// The caller is responsible for quiescing data flow on the affected
    /// pads (idle probe or pause) before removing from a live bin.
    pub fn remove(&self, child: &Element) -> bool {
        let data = bin_data(&self.element).expect("bin wrapper holds a container");
        let mut children = data.children.lock().unwrap();
        let position = match children.iter().position(|c| *c == *child) {
            Some(position) => position,
            None => {
                trace!(bin = self.name(), child = child.name(), "remove: not a child");
                return false;
            }
        };
        children.remove(position);
        drop(children);

        for pad in child.pads() {
            pad.unlink_peer();
        }
        *child.object().parent.lock().unwrap() = Default::default();
        trace!(bin = self.name(), child = child.name(), "removed child");
        true
    }

    /// Force each element to Null synchronously, then remove it.
    ///
    /// Removing a non-stopped element risks the native layer emitting
    /// events against a dangling context, so a failed stop is a hard
    /// programming error here, not a recoverable condition.
    pub fn stop_and_remove(&self, children: &[&Element]) {
        for child in children {
            let stopped = child.set_state_sync(State::Null, STOP_TIMEOUT);
            assert!(
                stopped,
                "element {} failed to reach Null before removal",
                child.name()
            );
        }
        for child in children {
            self.remove(child);
        }
    }

    pub fn children(&self) -> Vec<Element> {
        bin_data(&self.element)
            .expect("bin wrapper holds a container")
            .children
            .lock()
            .unwrap()
            .clone()
    }

    pub fn child_by_name(&self, name: &str) -> Option<Element> {
        self.children().into_iter().find(|c| c.name() == name)
    }

    /// Expose a child's pad as a pass-through pad on this bin, letting the
    /// composed sub-graph be linked like an opaque element.
    pub fn add_ghost_pad(&self, child: &Element, pad_name: &str) -> GraphResult<()> {
        let target = child
            .static_pad(pad_name)
            .ok_or_else(|| GraphError::NoSuchPad(pad_name.to_string()))?;
        self.add_ghost_pad_for(pad_name, &target);
        Ok(())
    }

    pub fn add_ghost_pad_for(&self, name: &str, target: &Pad) {
        let ghost = Pad::new_ghost(name, target);
        self.element.add_pad(ghost);
        trace!(bin = self.name(), pad = name, "added ghost pad");
    }

    /// Bring every child that does not match this bin's target state (and
    /// is not state-locked) to that state. Used after dynamically adding
    /// children to a running container.
    pub fn sync_children_state(&self) -> bool {
        let target = self.target_state();
        let mut ok = true;
        for child in self.children() {
            if child.is_state_locked() {
                continue;
            }
            if child.state() == target && child.pending_state().is_none() {
                continue;
            }
            ok &= child.set_state_sync(target, DEFAULT_STATE_TIMEOUT);
        }
        ok
    }

    /// Human-readable topology dump for diagnostics.
    pub fn dump_topology(&self) -> String {
        let mut out = String::new();
        dump_into(&self.element, 0, &mut out);
        out
    }
}

fn dump_into(element: &Element, depth: usize, out: &mut String) {
    use std::fmt::Write;

    let pad = "  ".repeat(depth);
    let _ = writeln!(
        out,
        "{pad}{} [{}] state={:?}",
        element.name(),
        element.factory_name(),
        element.state()
    );
    if let Some(data) = bin_data(element) {
        let children = data.children.lock().unwrap().clone();
        for child in &children {
            dump_into(child, depth + 1, out);
        }
        for child in &children {
            for src in child.pads() {
                if src.direction() != crate::domain::pad::PadDirection::Src {
                    continue;
                }
                if let Some(peer) = src.peer() {
                    let peer_owner = peer
                        .parent_element()
                        .map(|e| e.name().to_string())
                        .unwrap_or_else(|| "?".into());
                    let _ = writeln!(
                        out,
                        "{pad}  {}.{} -> {}.{}",
                        child.name(),
                        src.name(),
                        peer_owner,
                        peer.name()
                    );
                }
            }
        }
    }
}

/// A toplevel bin owning the message bus and the streaming thread.
#[derive(Clone, PartialEq)]
pub struct Pipeline {
    bin: Bin,
}

impl Deref for Pipeline {
    type Target = Bin;

    fn deref(&self) -> &Bin {
        &self.bin
    }
}

impl Pipeline {
    pub fn new(name: &str) -> Pipeline {
        let (bus_tx, bus_rx) = unbounded();
        let element = Element::new_with_kind(
            name,
            "pipeline",
            Kind::Pipeline(PipelineData {
                bin: BinData::default(),
                bus_tx,
                bus_rx,
                sched: Arc::new(Scheduler::new()),
                thread: Mutex::new(None),
                requested: Mutex::new(State::Null),
            }),
        );
        Pipeline {
            bin: Bin::from_element(element),
        }
    }

    pub fn bus(&self) -> Bus {
        let data = pipeline_data(self.element()).expect("pipeline wrapper holds a pipeline");
        Bus {
            rx: data.bus_rx.clone(),
        }
    }

    /// The last state explicitly requested via `set_state`. Live
    /// reconfiguration restores this, not whatever instantaneous state the
    /// pipeline happened to be in when a probe fired.
    pub fn last_requested_state(&self) -> State {
        let data = pipeline_data(self.element()).expect("pipeline wrapper holds a pipeline");
        *data.requested.lock().unwrap()
    }
}

// ---- state cascading and pipeline transitions ------------------------------

/// Propagate one transition step to a container's children, sink-most
/// (most recently added) first, skipping state-locked children.
pub(crate) fn cascade_children(element: &Element, to: State) -> StateChange {
    let data = match bin_data(element) {
        Some(data) => data,
        None => return StateChange::Success,
    };
    let children = data.children.lock().unwrap().clone();
    let mut result = StateChange::Success;
    for child in children.iter().rev() {
        if child.is_state_locked() {
            continue;
        }
        match child.set_state(to) {
            StateChange::Failure => return StateChange::Failure,
            StateChange::Async => result = StateChange::Async,
            _ => (),
        }
    }
    result
}

/// Apply one transition step on a pipeline: cascade to children and drive
/// the streaming thread lifecycle.
pub(crate) fn pipeline_transition(element: &Element, from: State, to: State) -> StateChange {
    let data = pipeline_data(element).expect("pipeline transition on a pipeline");
    match (from, to) {
        (State::Ready, State::Paused) => {
            if cascade_children(element, to) == StateChange::Failure {
                return StateChange::Failure;
            }
            start_streaming(element, data);
            StateChange::Async
        }
        (State::Paused, State::Playing) => {
            if cascade_children(element, to) == StateChange::Failure {
                return StateChange::Failure;
            }
            let mut st = data.sched.state.lock().unwrap();
            st.playing = true;
            data.sched.cv.notify_all();
            StateChange::Success
        }
        (State::Playing, State::Paused) => {
            {
                let mut st = data.sched.state.lock().unwrap();
                st.playing = false;
                data.sched.cv.notify_all();
            }
            cascade_children(element, to)
        }
        (State::Paused, State::Ready) => {
            stop_streaming(element, data);
            cascade_children(element, to)
        }
        _ => cascade_children(element, to),
    }
}

fn start_streaming(element: &Element, data: &PipelineData) {
    {
        let mut st = data.sched.state.lock().unwrap();
        st.running = true;
        st.playing = false;
    }
    let pipeline = element.clone();
    let sched = data.sched.clone();
    let handle = std::thread::Builder::new()
        .name(format!("{}-stream", element.name()))
        .spawn(move || streaming_thread(pipeline, sched))
        .expect("spawn streaming thread");
    *data.thread.lock().unwrap() = Some(handle);
    info!(pipeline = element.name(), "streaming thread started");
}

fn stop_streaming(element: &Element, data: &PipelineData) {
    {
        let mut st = data.sched.state.lock().unwrap();
        st.running = false;
        data.sched.cv.notify_all();
    }
    let handle = data.thread.lock().unwrap().take();
    if let Some(handle) = handle {
        if handle.thread().id() == std::thread::current().id() {
            // Stopping from the streaming thread itself; the loop exits on
            // its own once the current callback returns.
            debug!(pipeline = element.name(), "skipping self-join on streaming thread");
        } else {
            let _ = handle.join();
        }
    }
    info!(pipeline = element.name(), "streaming thread stopped");
}

/// Enqueue work for the streaming thread's next idle point.
///
/// Fails (handing the closure back) when the pipeline has no running
/// streaming thread; the caller then runs the work inline, since nothing
/// is flowing.
pub(crate) fn schedule_idle_work(
    pipeline: &Element,
    work: Box<dyn FnOnce() + Send>,
) -> Result<Receiver<()>, Box<dyn FnOnce() + Send>> {
    let data = match pipeline_data(pipeline) {
        Some(data) => data,
        None => return Err(work),
    };
    let mut st = data.sched.state.lock().unwrap();
    if !st.running {
        return Err(work);
    }
    let (tx, rx) = bounded(1);
    st.queue.push(IdleWork { work, done: tx });
    data.sched.cv.notify_all();
    Ok(rx)
}

fn drain_idle_queue(sched: &Scheduler) {
    let queue = {
        let mut st = sched.state.lock().unwrap();
        std::mem::take(&mut st.queue)
    };
    for item in queue {
        (item.work)();
        let _ = item.done.send(());
    }
}

/// Body of the streaming thread.
///
/// Each iteration: run idle work (the "between buffers" guarantee), then
/// push one block from every source element. Pausing parks the loop
/// without tearing it down; shutdown drains leftover idle work so no
/// caller stays parked on the rendezvous.
fn streaming_thread(pipeline: Element, sched: Arc<Scheduler>) {
    pipeline.complete_async_transition(State::Paused);

    let mut sources: Vec<Element> = Vec::new();
    loop {
        drain_idle_queue(&sched);

        let playing = {
            let st = sched.state.lock().unwrap();
            if !st.running {
                break;
            }
            if !st.playing {
                let (st, _) = sched
                    .cv
                    .wait_timeout(st, Duration::from_millis(10))
                    .unwrap();
                if !st.running {
                    break;
                }
                st.playing
            } else {
                true
            }
        };
        if !playing {
            continue;
        }

        sources.clear();
        collect_sources(&pipeline, &mut sources);
        for source in &sources {
            source.produce_once();
        }

        // One block per source per cycle; pace the loop.
        std::thread::sleep(Duration::from_micros(500));
    }

    {
        let mut st = sched.state.lock().unwrap();
        st.running = false;
    }
    drain_idle_queue(&sched);
    debug!(pipeline = pipeline.name(), "streaming thread exiting");
}

fn collect_sources(element: &Element, out: &mut Vec<Element>) {
    match bin_data(element) {
        Some(data) => {
            let children = data.children.lock().unwrap().clone();
            for child in &children {
                collect_sources(child, out);
            }
        }
        None => {
            if element.is_source() {
                out.push(element.clone());
            }
        }
    }
}

// ---- bus posting ------------------------------------------------------------

pub(crate) fn post_state_changed(element: &Element, old: State, new: State) {
    if let Some(pipeline) = crate::domain::element::find_pipeline(element) {
        if let Some(data) = pipeline_data(&pipeline) {
            let _ = data.bus_tx.send(Message::StateChanged {
                element: element.name().to_string(),
                old,
                new,
            });
        }
    }
}

pub(crate) fn post_eos(element: &Element) {
    if let Some(pipeline) = crate::domain::element::find_pipeline(element) {
        if let Some(data) = pipeline_data(&pipeline) {
            let _ = data.bus_tx.send(Message::Eos {
                origin: element.name().to_string(),
            });
        }
    }
}

pub(crate) fn post_error(element: &Element, message: String) {
    if let Some(pipeline) = crate::domain::element::find_pipeline(element) {
        if let Some(data) = pipeline_data(&pipeline) {
            let _ = data.bus_tx.send(Message::Error {
                origin: element.name().to_string(),
                message,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(factory: &str, name: &str) -> Element {
        Element::from_factory(factory, name).unwrap()
    }

    #[test]
    fn add_and_remove_track_net_effect() {
        let bin = Bin::new("b");
        let a = make("queue", "a");
        let b = make("queue", "b");

        bin.add(&a).unwrap();
        bin.add(&b).unwrap();
        assert_eq!(bin.children().len(), 2);

        assert!(bin.remove(&a));
        assert_eq!(bin.children(), vec![b.clone()]);

        // Double removal is a no-op, not a crash.
        assert!(!bin.remove(&a));
        assert_eq!(bin.children().len(), 1);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let bin = Bin::new("b");
        bin.add(&make("queue", "q")).unwrap();
        let result = bin.add(&make("volume", "q"));
        assert!(matches!(result, Err(GraphError::DuplicateName(_))));
    }

    #[test]
    fn an_owned_element_cannot_be_added_twice() {
        let bin = Bin::new("b");
        let other = Bin::new("c");
        let q = make("queue", "q");
        bin.add(&q).unwrap();
        assert!(matches!(other.add(&q), Err(GraphError::AlreadyOwned(_))));
    }

    #[test]
    fn remove_unlinks_pads() {
        let bin = Bin::new("b");
        let src = make("tone-source", "src");
        let sink = make("null-sink", "sink");
        bin.add_many(&[&src, &sink]).unwrap();
        assert!(src.link(&sink));

        assert!(bin.remove(&src));
        assert!(src.src_pad().unwrap().peer().is_none());
        assert!(sink.sink_pad().unwrap().peer().is_none());
    }

    #[test]
    fn stop_and_remove_leaves_elements_at_null() {
        let bin = Bin::new("b");
        let src = make("tone-source", "src");
        let sink = make("null-sink", "sink");
        bin.add_many(&[&src, &sink]).unwrap();
        bin.set_state(State::Playing);
        assert_eq!(src.state(), State::Playing);

        bin.stop_and_remove(&[&src, &sink]);
        assert_eq!(src.state(), State::Null);
        assert_eq!(sink.state(), State::Null);
        assert!(bin.children().is_empty());
    }

    #[test]
    fn cascade_skips_locked_children() {
        let bin = Bin::new("b");
        let a = make("queue", "a");
        let b = make("queue", "b");
        bin.add_many(&[&a, &b]).unwrap();

        b.lock_state(true);
        bin.set_state(State::Paused);
        assert_eq!(a.state(), State::Paused);
        assert_eq!(b.state(), State::Null);

        b.lock_state(false);
        assert!(bin.sync_children_state());
        assert_eq!(b.state(), State::Paused);
    }

    #[test]
    fn pipeline_reaches_playing_and_streams() {
        let pipeline = Pipeline::new("p");
        let src = make("tone-source", "src");
        let sink = make("null-sink", "sink");
        pipeline.add_many(&[&src, &sink]).unwrap();
        assert!(src.link(&sink));

        assert!(pipeline.set_state_sync(State::Playing, Duration::from_secs(2)));
        assert_eq!(pipeline.state(), State::Playing);
        assert_eq!(pipeline.last_requested_state(), State::Playing);

        // Wait for data to actually flow.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while sink.get_uint64("received") == 0 {
            assert!(std::time::Instant::now() < deadline, "no buffers flowed");
            std::thread::sleep(Duration::from_millis(1));
        }

        assert!(pipeline.set_state_sync(State::Null, Duration::from_secs(5)));
        assert_eq!(pipeline.state(), State::Null);
    }

    #[test]
    fn finite_source_posts_eos_on_the_bus() {
        let pipeline = Pipeline::new("p");
        let src = make("tone-source", "src");
        src.set_int("num-buffers", 3);
        let sink = make("null-sink", "sink");
        pipeline.add_many(&[&src, &sink]).unwrap();
        assert!(src.link(&sink));

        let bus = pipeline.bus();
        assert!(pipeline.set_state_sync(State::Playing, Duration::from_secs(2)));

        let eos = bus.wait_for(Duration::from_secs(2), |m| {
            matches!(m, Message::Eos { .. })
        });
        assert_eq!(
            eos,
            Some(Message::Eos {
                origin: "sink".to_string()
            })
        );
        assert_eq!(sink.get_uint64("received"), 3);

        assert!(pipeline.set_state_sync(State::Null, Duration::from_secs(5)));
    }

    #[test]
    fn ghost_pads_proxy_a_child_subgraph() {
        let pipeline = Pipeline::new("p");

        let inner = Bin::new("inner");
        let src = make("tone-source", "src");
        let volume = make("volume", "vol");
        inner.add_many(&[&src, &volume]).unwrap();
        assert!(src.link(&volume));
        inner.add_ghost_pad(&volume, "src").unwrap();

        let sink = make("null-sink", "sink");
        pipeline.add(inner.element()).unwrap();
        pipeline.add(&sink).unwrap();
        assert!(inner
            .static_pad("src")
            .unwrap()
            .link(&sink.static_pad("sink").unwrap()));

        assert!(pipeline.set_state_sync(State::Playing, Duration::from_secs(2)));
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while sink.get_uint64("received") == 0 {
            assert!(std::time::Instant::now() < deadline, "ghost pad forwarded nothing");
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(pipeline.set_state_sync(State::Null, Duration::from_secs(5)));
    }

    #[test]
    fn idle_work_runs_on_the_streaming_thread_between_buffers() {
        let pipeline = Pipeline::new("p");
        let src = make("tone-source", "src");
        let sink = make("null-sink", "sink");
        pipeline.add_many(&[&src, &sink]).unwrap();
        assert!(src.link(&sink));
        assert!(pipeline.set_state_sync(State::Playing, Duration::from_secs(2)));

        let src_clone = src.clone();
        let sink_clone = sink.clone();
        src.src_pad().unwrap().do_in_idle_probe(move || {
            // Executed with no concurrent push: unlinking here is safe.
            src_clone.unlink(&sink_clone);
        });
        assert!(src.src_pad().unwrap().peer().is_none());

        let settled = sink.get_uint64("received");
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(sink.get_uint64("received"), settled);

        assert!(pipeline.set_state_sync(State::Null, Duration::from_secs(5)));
    }

    #[test]
    fn dump_topology_names_children_and_links() {
        let bin = Bin::new("b");
        let src = make("tone-source", "src");
        let sink = make("null-sink", "sink");
        bin.add_many(&[&src, &sink]).unwrap();
        assert!(src.link(&sink));

        let dump = bin.dump_topology();
        assert!(dump.contains("src [tone-source]"));
        assert!(dump.contains("src.src -> sink.sink"));
    }
}

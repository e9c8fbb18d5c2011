//! Elements: processing units, factories, properties, and the state machine
//!
//! An element is one processing unit in the graph, identified by the
//! factory that produced it and an instance name unique within its
//! container. Elements carry a generic property bag with typed accessors;
//! access to a property the element does not expose is tolerated silently,
//! because factory-provided elements vary in what they expose across
//! versions.
//!
//! The lifecycle runs `Null → Ready → Paused → Playing` and back, one step
//! at a time. `set_state` requests a transition and may return
//! [`StateChange::Async`]; `set_state_sync` blocks until the transition
//! settles or a timeout elapses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::domain::bin::{self, BinData, PipelineData};
use crate::domain::caps::{audio_structure, Caps, Structure, Value};
use crate::domain::device::Device;
use crate::domain::object::{Handle, WeakHandle};
use crate::domain::pad::{Buffer, Event, Pad, PadDirection, StreamItem};

/// Default timeout for a synchronous state change.
pub const DEFAULT_STATE_TIMEOUT: Duration = Duration::from_secs(1);
/// Default timeout for a full stop (transition to Null).
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors surfaced by graph mutation operations.
///
/// Everything here is a control-flow result the caller must check; nothing
/// in the graph core panics to signal one of these.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("unknown element factory: {0}")]
    UnknownFactory(String),

    #[error("duplicate element name in container: {0}")]
    DuplicateName(String),

    #[error("element {0} already has a parent")]
    AlreadyOwned(String),

    #[error("element {0} is not a child of this container")]
    NotAChild(String),

    #[error("no pad named {0}")]
    NoSuchPad(String),

    #[error("could not link {src} to {sink}")]
    LinkFailed { src: String, sink: String },
}

pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Element lifecycle states, totally ordered from torn-down to running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Null,
    Ready,
    Paused,
    Playing,
}

impl State {
    fn up(self) -> State {
        match self {
            State::Null => State::Ready,
            State::Ready => State::Paused,
            State::Paused | State::Playing => State::Playing,
        }
    }

    fn down(self) -> State {
        match self {
            State::Playing => State::Paused,
            State::Paused => State::Ready,
            State::Ready | State::Null => State::Null,
        }
    }
}

/// Outcome of a state-change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Success,
    /// The transition continues in the background; wait with
    /// [`Element::set_state_sync`] or [`Element::finish_state_change`].
    Async,
    /// Succeeded, but the element produces no preroll data (live source).
    NoPreroll,
    Failure,
}

pub(crate) struct StateInner {
    pub(crate) current: State,
    pub(crate) pending: Option<State>,
    pub(crate) target: State,
}

/// Object-valued properties (the "nested object" accessor family).
#[derive(Clone)]
pub enum ObjectProperty {
    Element(Element),
    Device(Device),
}

/// Generic key-value property table behind the typed accessors.
pub(crate) struct PropertyBag {
    values: HashMap<String, Value>,
    objects: HashMap<String, Option<ObjectProperty>>,
}

/// Behavior installed by an element factory.
///
/// `produce` drives source elements from the streaming thread; `handle`
/// transforms (filters) or consumes (sinks) a buffer; `eos` reacts to
/// end-of-stream reaching the element.
pub(crate) trait ElementImpl: Send {
    fn produce(&mut self, _element: &Element) -> Option<Buffer> {
        None
    }

    fn handle(&mut self, _element: &Element, buffer: Buffer) -> Option<Buffer> {
        Some(buffer)
    }

    fn eos(&mut self, _element: &Element) {}
}

pub(crate) enum Kind {
    Leaf(Mutex<Box<dyn ElementImpl>>),
    Bin(BinData),
    Pipeline(PipelineData),
}

/// Native payload of an element.
pub(crate) struct ElementObject {
    pub(crate) name: String,
    pub(crate) factory: String,
    pub(crate) pads: Mutex<Vec<Pad>>,
    pub(crate) parent: Mutex<WeakHandle<ElementObject>>,
    pub(crate) state: Mutex<StateInner>,
    pub(crate) state_cv: Condvar,
    pub(crate) locked: AtomicBool,
    pub(crate) eos_pushed: AtomicBool,
    pub(crate) props: Mutex<PropertyBag>,
    pub(crate) kind: Kind,
}

/// Wrapper over an element's native object. Cheap to clone; identity
/// equality. A wrapper obtained from a constructor is never empty.
#[derive(Clone, PartialEq)]
pub struct Element {
    pub(crate) handle: Handle<ElementObject>,
}

impl Element {
    /// Create an element from a registered factory.
    ///
    /// Returns `None` when the factory is unknown, a recoverable
    /// condition the caller is expected to check and fall back from.
    pub fn from_factory(factory: &str, name: &str) -> Option<Element> {
        let spec = match FACTORIES.iter().find(|s| s.name == factory) {
            Some(spec) => spec,
            None => {
                warn!(factory, "could not find element factory");
                return None;
            }
        };

        let mut values = HashMap::new();
        for (key, value) in (spec.defaults)() {
            values.insert(key.to_string(), value);
        }
        let mut objects = HashMap::new();
        for slot in spec.object_slots {
            objects.insert(slot.to_string(), None);
        }

        let element = Element {
            handle: Handle::alloc(ElementObject {
                name: name.to_string(),
                factory: factory.to_string(),
                pads: Mutex::new(Vec::new()),
                parent: Mutex::new(WeakHandle::null()),
                state: Mutex::new(StateInner {
                    current: State::Null,
                    pending: None,
                    target: State::Null,
                }),
                state_cv: Condvar::new(),
                locked: AtomicBool::new(false),
                eos_pushed: AtomicBool::new(false),
                props: Mutex::new(PropertyBag { values, objects }),
                kind: Kind::Leaf(Mutex::new((spec.build)())),
            }),
        };

        let mut pads = Vec::new();
        if spec.layout != PadLayout::Source {
            pads.push(Pad::new("sink", PadDirection::Sink, (spec.sink_caps)()));
        }
        if spec.layout != PadLayout::Sink {
            pads.push(Pad::new("src", PadDirection::Src, (spec.src_caps)()));
        }
        for pad in &pads {
            pad.set_parent(element.handle.downgrade());
        }
        *element.object().pads.lock().unwrap() = pads;

        trace!(factory, name, "created element");
        Some(element)
    }

    /// Create a source or sink element backed by a discovered device.
    ///
    /// Falls back to `None` when the device cannot produce an element
    /// (callers then construct a generic auto element instead).
    pub fn from_device(device: &Device, name: &str) -> Option<Element> {
        let factory = match device.class() {
            crate::domain::device::DeviceClass::AudioSource => "device-source",
            crate::domain::device::DeviceClass::AudioSink => "device-sink",
            crate::domain::device::DeviceClass::VideoSource => {
                warn!(device = device.description(), "no element factory for video devices");
                return None;
            }
        };
        let element = Element::from_factory(factory, name)?;
        element.set_device("device", device.clone());
        Some(element)
    }

    /// Constructor used by the container types.
    pub(crate) fn new_with_kind(name: &str, factory: &str, kind: Kind) -> Element {
        Element {
            handle: Handle::alloc(ElementObject {
                name: name.to_string(),
                factory: factory.to_string(),
                pads: Mutex::new(Vec::new()),
                parent: Mutex::new(WeakHandle::null()),
                state: Mutex::new(StateInner {
                    current: State::Null,
                    pending: None,
                    target: State::Null,
                }),
                state_cv: Condvar::new(),
                locked: AtomicBool::new(false),
                eos_pushed: AtomicBool::new(false),
                props: Mutex::new(PropertyBag {
                    values: HashMap::new(),
                    objects: HashMap::new(),
                }),
                kind,
            }),
        }
    }

    pub(crate) fn object(&self) -> &ElementObject {
        self.handle.get().expect("element wrapper holds a live object")
    }

    pub fn name(&self) -> &str {
        &self.object().name
    }

    pub fn factory_name(&self) -> &str {
        &self.object().factory
    }

    pub fn ref_count(&self) -> usize {
        self.handle.ref_count()
    }

    // ---- pads -----------------------------------------------------------

    pub fn pads(&self) -> Vec<Pad> {
        self.object().pads.lock().unwrap().clone()
    }

    pub fn static_pad(&self, name: &str) -> Option<Pad> {
        self.pads().into_iter().find(|p| p.name() == name)
    }

    pub fn src_pad(&self) -> Option<Pad> {
        self.pads()
            .into_iter()
            .find(|p| p.direction() == PadDirection::Src)
    }

    pub fn sink_pad(&self) -> Option<Pad> {
        self.pads()
            .into_iter()
            .find(|p| p.direction() == PadDirection::Sink)
    }

    pub(crate) fn add_pad(&self, pad: Pad) {
        pad.set_parent(self.handle.downgrade());
        self.object().pads.lock().unwrap().push(pad);
    }

    /// Link this element's src pad to `next`'s sink pad.
    pub fn link(&self, next: &Element) -> bool {
        match (self.src_pad(), next.sink_pad()) {
            (Some(src), Some(sink)) => src.link(&sink),
            _ => {
                debug!(
                    src = self.name(),
                    sink = next.name(),
                    "link refused: missing pad"
                );
                false
            }
        }
    }

    /// Unlink this element's src pad from `next`'s sink pad.
    pub fn unlink(&self, next: &Element) -> bool {
        match (self.src_pad(), next.sink_pad()) {
            (Some(src), Some(sink)) => src.unlink(&sink),
            _ => false,
        }
    }

    /// The owning container, if any.
    pub fn parent(&self) -> Option<Element> {
        let handle = self.object().parent.lock().unwrap().upgrade();
        if handle.is_null() {
            None
        } else {
            Some(Element { handle })
        }
    }

    // ---- properties -----------------------------------------------------

    /// Set a property. Setting a property the element does not expose, or
    /// with a mismatched type, is silently ignored (logged at debug).
    pub fn set_value(&self, key: &str, value: Value) {
        let mut props = self.object().props.lock().unwrap();
        match props.values.get_mut(key) {
            Some(slot) if std::mem::discriminant(slot) == std::mem::discriminant(&value) => {
                *slot = value;
            }
            Some(_) => debug!(element = self.name(), key, "property type mismatch ignored"),
            None => debug!(element = self.name(), key, "no such property, set ignored"),
        }
    }

    fn get_value(&self, key: &str) -> Option<Value> {
        self.object().props.lock().unwrap().values.get(key).cloned()
    }

    pub fn set_bool(&self, key: &str, v: bool) {
        self.set_value(key, Value::Bool(v));
    }

    pub fn set_int(&self, key: &str, v: i32) {
        self.set_value(key, Value::Int(v));
    }

    pub fn set_uint(&self, key: &str, v: u32) {
        self.set_value(key, Value::UInt(v));
    }

    pub fn set_int64(&self, key: &str, v: i64) {
        self.set_value(key, Value::Int64(v));
    }

    pub fn set_uint64(&self, key: &str, v: u64) {
        self.set_value(key, Value::UInt64(v));
    }

    pub fn set_double(&self, key: &str, v: f64) {
        self.set_value(key, Value::Double(v));
    }

    pub fn set_str(&self, key: &str, v: &str) {
        self.set_value(key, Value::Str(v.to_string()));
    }

    pub fn get_bool(&self, key: &str) -> bool {
        match self.get_value(key) {
            Some(Value::Bool(v)) => v,
            _ => false,
        }
    }

    pub fn get_int(&self, key: &str) -> i32 {
        match self.get_value(key) {
            Some(Value::Int(v)) => v,
            _ => 0,
        }
    }

    pub fn get_uint(&self, key: &str) -> u32 {
        match self.get_value(key) {
            Some(Value::UInt(v)) => v,
            _ => 0,
        }
    }

    pub fn get_int64(&self, key: &str) -> i64 {
        match self.get_value(key) {
            Some(Value::Int64(v)) => v,
            _ => 0,
        }
    }

    pub fn get_uint64(&self, key: &str) -> u64 {
        match self.get_value(key) {
            Some(Value::UInt64(v)) => v,
            _ => 0,
        }
    }

    pub fn get_double(&self, key: &str) -> f64 {
        match self.get_value(key) {
            Some(Value::Double(v)) => v,
            _ => 0.0,
        }
    }

    pub fn get_float(&self, key: &str) -> f32 {
        self.get_double(key) as f32
    }

    pub fn get_string(&self, key: &str) -> String {
        match self.get_value(key) {
            Some(Value::Str(v)) => v,
            _ => String::new(),
        }
    }

    /// Object-valued property accessors.
    pub fn set_device(&self, key: &str, device: Device) {
        let mut props = self.object().props.lock().unwrap();
        match props.objects.get_mut(key) {
            Some(slot) => *slot = Some(ObjectProperty::Device(device)),
            None => debug!(element = self.name(), key, "no such object property"),
        }
    }

    pub fn get_device(&self, key: &str) -> Option<Device> {
        match self.object().props.lock().unwrap().objects.get(key) {
            Some(Some(ObjectProperty::Device(d))) => Some(d.clone()),
            _ => None,
        }
    }

    pub fn set_element(&self, key: &str, element: Element) {
        let mut props = self.object().props.lock().unwrap();
        match props.objects.get_mut(key) {
            Some(slot) => *slot = Some(ObjectProperty::Element(element)),
            None => debug!(element = self.name(), key, "no such object property"),
        }
    }

    pub fn get_element(&self, key: &str) -> Option<Element> {
        match self.object().props.lock().unwrap().objects.get(key) {
            Some(Some(ObjectProperty::Element(e))) => Some(e.clone()),
            _ => None,
        }
    }

    // ---- state machine --------------------------------------------------

    pub fn state(&self) -> State {
        self.object().state.lock().unwrap().current
    }

    pub fn pending_state(&self) -> Option<State> {
        self.object().state.lock().unwrap().pending
    }

    pub fn target_state(&self) -> State {
        self.object().state.lock().unwrap().target
    }

    /// Exclude this element from parent state cascades.
    pub fn lock_state(&self, locked: bool) {
        self.object().locked.store(locked, Ordering::Release);
    }

    pub fn is_state_locked(&self) -> bool {
        self.object().locked.load(Ordering::Acquire)
    }

    /// Request a transition toward `target`, stepping through every
    /// intermediate state. Returns immediately; [`StateChange::Async`]
    /// means the remainder completes on the streaming thread.
    pub fn set_state(&self, target: State) -> StateChange {
        if let Kind::Pipeline(data) = &self.object().kind {
            *data.requested.lock().unwrap() = target;
        }
        loop {
            // The pending marker is set before the step is applied: an
            // asynchronous step completes on the streaming thread, which
            // must find the marker already in place.
            let (effective, next) = {
                let mut st = self.object().state.lock().unwrap();
                st.target = target;
                let effective = st.pending.unwrap_or(st.current);
                if effective == target {
                    return StateChange::Success;
                }
                let next = if target > effective {
                    effective.up()
                } else {
                    effective.down()
                };
                st.pending = Some(next);
                (effective, next)
            };
            match self.apply_transition(effective, next) {
                StateChange::Success | StateChange::NoPreroll => {
                    self.commit_state(effective, next);
                }
                StateChange::Async => {
                    debug!(element = self.name(), ?next, "state transition pending");
                    return StateChange::Async;
                }
                StateChange::Failure => {
                    self.object().state.lock().unwrap().pending = None;
                    warn!(element = self.name(), from = ?effective, to = ?next,
                          "state transition failed");
                    return StateChange::Failure;
                }
            }
        }
    }

    /// Request a transition and block until it settles or `timeout`
    /// elapses. On timeout the element's state must be treated as
    /// indeterminate; force it back to Null before further use.
    pub fn set_state_sync(&self, target: State, timeout: Duration) -> bool {
        match self.set_state(target) {
            StateChange::Failure => false,
            StateChange::Async => self.wait_for_state(target, timeout),
            _ => true,
        }
    }

    /// Wait out a pending asynchronous transition, including any
    /// continuation steps toward the requested target.
    pub fn finish_state_change(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.object().state.lock().unwrap();
        while st.pending.is_some() || st.current != st.target {
            let now = Instant::now();
            if now >= deadline {
                warn!(element = self.name(), "state change did not finish in time");
                return false;
            }
            let (next, _) = self
                .object()
                .state_cv
                .wait_timeout(st, deadline - now)
                .unwrap();
            st = next;
        }
        true
    }

    fn wait_for_state(&self, target: State, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.object().state.lock().unwrap();
        while st.current != target || st.pending.is_some() {
            let now = Instant::now();
            if now >= deadline {
                warn!(element = self.name(), ?target, "timed out waiting for state");
                return false;
            }
            let (next, _) = self
                .object()
                .state_cv
                .wait_timeout(st, deadline - now)
                .unwrap();
            st = next;
        }
        true
    }

    /// Adopt the owning container's target state. Used after adding an
    /// element to an already-running container.
    pub fn sync_state_with_parent(&self) -> bool {
        match self.parent() {
            Some(parent) => {
                let target = parent.target_state();
                self.set_state(target) != StateChange::Failure
            }
            None => false,
        }
    }

    fn apply_transition(&self, from: State, to: State) -> StateChange {
        trace!(element = self.name(), ?from, ?to, "applying transition");
        match &self.object().kind {
            Kind::Leaf(_) => StateChange::Success,
            Kind::Bin(_) => bin::cascade_children(self, to),
            Kind::Pipeline(_) => bin::pipeline_transition(self, from, to),
        }
    }

    fn commit_state(&self, old: State, new: State) {
        {
            let mut st = self.object().state.lock().unwrap();
            st.current = new;
            st.pending = None;
        }
        self.object().state_cv.notify_all();
        debug!(element = self.name(), ?old, ?new, "state changed");
        bin::post_state_changed(self, old, new);
    }

    /// Completion hook for asynchronous transitions (called from the
    /// streaming thread once the pending step has materialized).
    pub(crate) fn complete_async_transition(&self, reached: State) {
        let old;
        let target;
        {
            let mut st = self.object().state.lock().unwrap();
            old = st.current;
            st.current = reached;
            st.pending = None;
            target = st.target;
        }
        self.object().state_cv.notify_all();
        debug!(element = self.name(), ?reached, "async state change complete");
        bin::post_state_changed(self, old, reached);
        if target != reached {
            // Continue toward the originally requested state.
            let _ = self.set_state(target);
        }
    }

    // ---- streaming ------------------------------------------------------

    /// Post an error message on the enclosing pipeline's bus. A no-op for
    /// elements outside a pipeline.
    pub fn post_error(&self, message: impl Into<String>) {
        bin::post_error(self, message.into());
    }

    /// Inject end-of-stream at this element's source pads. Idempotent.
    pub fn send_eos(&self) {
        if self.object().eos_pushed.swap(true, Ordering::SeqCst) {
            return;
        }
        for pad in self.pads() {
            if pad.direction() == PadDirection::Src {
                pad.push(StreamItem::Event(Event::Eos));
            }
        }
    }

    /// True when this element generates data (no sink pads, has a src pad).
    pub(crate) fn is_source(&self) -> bool {
        matches!(self.object().kind, Kind::Leaf(_))
            && self.sink_pad().is_none()
            && self.src_pad().is_some()
    }

    /// Produce and push one buffer. Returns false once the element has
    /// reached end-of-stream.
    pub(crate) fn produce_once(&self) -> bool {
        if self.object().eos_pushed.load(Ordering::SeqCst) {
            return false;
        }
        if self.state() != State::Playing {
            return true; // not done, just not running
        }
        let produced = match &self.object().kind {
            Kind::Leaf(behavior) => behavior.lock().unwrap().produce(self),
            _ => None,
        };
        match produced {
            Some(buffer) => {
                if let Some(src) = self.src_pad() {
                    src.push(StreamItem::Buffer(buffer));
                }
                true
            }
            None => {
                self.send_eos();
                false
            }
        }
    }
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Element({} [{}] {:?})",
            self.name(),
            self.factory_name(),
            self.state()
        )
    }
}

/// Walk the ownership chain up to the enclosing pipeline.
pub(crate) fn find_pipeline(element: &Element) -> Option<Element> {
    let mut cursor = element.clone();
    loop {
        if matches!(cursor.object().kind, Kind::Pipeline(_)) {
            return Some(cursor);
        }
        cursor = cursor.parent()?;
    }
}

/// Deliver an item that arrived at one of `element`'s sink pads.
pub(crate) fn deliver(element: &Element, _pad: &Pad, item: StreamItem) {
    match &element.object().kind {
        Kind::Leaf(behavior) => match item {
            StreamItem::Buffer(buffer) => {
                let out = behavior.lock().unwrap().handle(element, buffer);
                if let Some(out) = out {
                    if let Some(src) = element.src_pad() {
                        src.push(StreamItem::Buffer(out));
                    }
                }
            }
            StreamItem::Event(Event::Eos) => {
                behavior.lock().unwrap().eos(element);
                if let Some(src) = element.src_pad() {
                    src.push(StreamItem::Event(Event::Eos));
                }
            }
        },
        _ => trace!(element = element.name(), "container pad received unproxied item"),
    }
}

// ---- built-in factories ---------------------------------------------------

#[derive(PartialEq)]
enum PadLayout {
    Source,
    Filter,
    Sink,
}

struct FactorySpec {
    name: &'static str,
    layout: PadLayout,
    build: fn() -> Box<dyn ElementImpl>,
    defaults: fn() -> Vec<(&'static str, Value)>,
    object_slots: &'static [&'static str],
    src_caps: fn() -> Caps,
    sink_caps: fn() -> Caps,
}

fn fixed_audio_caps() -> Caps {
    Caps::from_structure(audio_structure("F32", Value::Int(48000), Value::Int(2)))
}

fn ranged_audio_caps() -> Caps {
    Caps::from_structure(audio_structure(
        "F32",
        Value::IntRange { min: 8000, max: 192000 },
        Value::IntRange { min: 1, max: 8 },
    ))
}

fn convert_caps() -> Caps {
    Caps::from_structure(
        Structure::new(crate::domain::caps::MEDIA_AUDIO_RAW)
            .field(
                "format",
                Value::List(vec![
                    Value::Str("S16".into()),
                    Value::Str("S32".into()),
                    Value::Str("F32".into()),
                    Value::Str("F64".into()),
                ]),
            )
            .field("rate", Value::IntRange { min: 8000, max: 192000 })
            .field("channels", Value::IntRange { min: 1, max: 8 }),
    )
}

fn source_defaults() -> Vec<(&'static str, Value)> {
    vec![
        ("num-buffers", Value::Int(-1)),
        ("samples-per-buffer", Value::Int(64)),
    ]
}

fn tone_defaults() -> Vec<(&'static str, Value)> {
    let mut defaults = source_defaults();
    defaults.push(("freq", Value::Double(440.0)));
    defaults
}

fn sink_defaults() -> Vec<(&'static str, Value)> {
    vec![("received", Value::UInt64(0)), ("sync", Value::Bool(false))]
}

struct ToneSource {
    phase: f32,
    produced: i64,
}

impl ElementImpl for ToneSource {
    fn produce(&mut self, element: &Element) -> Option<Buffer> {
        let limit = element.get_int("num-buffers");
        if limit >= 0 && self.produced >= limit as i64 {
            return None;
        }
        let freq = element.get_double("freq") as f32;
        let frames = element.get_int("samples-per-buffer").max(1) as usize;
        let rate = 48000.0f32;
        let mut samples = Vec::with_capacity(frames * 2);
        for _ in 0..frames {
            let value = (self.phase * std::f32::consts::TAU).sin();
            self.phase = (self.phase + freq / rate).fract();
            samples.push(value);
            samples.push(value);
        }
        self.produced += 1;
        Some(Buffer::new(samples))
    }
}

struct SilenceSource {
    produced: i64,
}

impl ElementImpl for SilenceSource {
    fn produce(&mut self, element: &Element) -> Option<Buffer> {
        let limit = element.get_int("num-buffers");
        if limit >= 0 && self.produced >= limit as i64 {
            return None;
        }
        let frames = element.get_int("samples-per-buffer").max(1) as usize;
        self.produced += 1;
        Some(Buffer::new(vec![0.0; frames * 2]))
    }
}

struct PassThrough;

impl ElementImpl for PassThrough {}

struct VolumeFilter;

impl ElementImpl for VolumeFilter {
    fn handle(&mut self, element: &Element, mut buffer: Buffer) -> Option<Buffer> {
        if element.get_bool("mute") {
            buffer.samples.iter_mut().for_each(|s| *s = 0.0);
        } else {
            let gain = element.get_double("volume") as f32;
            if gain != 1.0 {
                buffer.samples.iter_mut().for_each(|s| *s *= gain);
            }
        }
        Some(buffer)
    }
}

struct CountingSink;

impl ElementImpl for CountingSink {
    fn handle(&mut self, element: &Element, _buffer: Buffer) -> Option<Buffer> {
        let received = element.get_uint64("received");
        element.set_uint64("received", received + 1);
        None
    }

    fn eos(&mut self, element: &Element) {
        bin::post_eos(element);
    }
}

static FACTORIES: &[FactorySpec] = &[
    FactorySpec {
        name: "tone-source",
        layout: PadLayout::Source,
        build: || Box::new(ToneSource { phase: 0.0, produced: 0 }),
        defaults: tone_defaults,
        object_slots: &[],
        src_caps: fixed_audio_caps,
        sink_caps: Caps::none,
    },
    FactorySpec {
        name: "silence-source",
        layout: PadLayout::Source,
        build: || Box::new(SilenceSource { produced: 0 }),
        defaults: source_defaults,
        object_slots: &[],
        src_caps: fixed_audio_caps,
        sink_caps: Caps::none,
    },
    FactorySpec {
        name: "device-source",
        layout: PadLayout::Source,
        build: || Box::new(SilenceSource { produced: 0 }),
        defaults: source_defaults,
        object_slots: &["device"],
        src_caps: fixed_audio_caps,
        sink_caps: Caps::none,
    },
    FactorySpec {
        name: "auto-source",
        layout: PadLayout::Source,
        build: || Box::new(SilenceSource { produced: 0 }),
        defaults: source_defaults,
        object_slots: &[],
        src_caps: fixed_audio_caps,
        sink_caps: Caps::none,
    },
    FactorySpec {
        name: "queue",
        layout: PadLayout::Filter,
        build: || Box::new(PassThrough),
        defaults: || vec![("max-size-buffers", Value::Int(200))],
        object_slots: &[],
        src_caps: Caps::any,
        sink_caps: Caps::any,
    },
    FactorySpec {
        name: "convert",
        layout: PadLayout::Filter,
        build: || Box::new(PassThrough),
        defaults: Vec::new,
        object_slots: &[],
        src_caps: convert_caps,
        sink_caps: convert_caps,
    },
    FactorySpec {
        name: "resample",
        layout: PadLayout::Filter,
        build: || Box::new(PassThrough),
        defaults: || vec![("quality", Value::Int(4))],
        object_slots: &[],
        src_caps: ranged_audio_caps,
        sink_caps: ranged_audio_caps,
    },
    FactorySpec {
        name: "volume",
        layout: PadLayout::Filter,
        build: || Box::new(VolumeFilter),
        defaults: || vec![("volume", Value::Double(1.0)), ("mute", Value::Bool(false))],
        object_slots: &[],
        src_caps: ranged_audio_caps,
        sink_caps: ranged_audio_caps,
    },
    FactorySpec {
        name: "null-sink",
        layout: PadLayout::Sink,
        build: || Box::new(CountingSink),
        defaults: sink_defaults,
        object_slots: &[],
        src_caps: Caps::none,
        sink_caps: Caps::any,
    },
    FactorySpec {
        name: "device-sink",
        layout: PadLayout::Sink,
        build: || Box::new(CountingSink),
        defaults: sink_defaults,
        object_slots: &["device"],
        src_caps: Caps::none,
        sink_caps: Caps::any,
    },
    FactorySpec {
        name: "auto-sink",
        layout: PadLayout::Sink,
        build: || Box::new(CountingSink),
        defaults: sink_defaults,
        object_slots: &[],
        src_caps: Caps::none,
        sink_caps: Caps::any,
    },
];

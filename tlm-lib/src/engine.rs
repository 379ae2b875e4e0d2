//! The decode engine.
//!
//! An [Engine] owns the deframer, the minor-frame and sub-commutation trackers, and the state
//! of every catalog element. Buffers enter through [Engine::process] (or [Engine::run] for a
//! channel of them) and are decoded synchronously. Other threads interact only through a
//! cloneable [EngineHandle], which subscribes consumers to element updates and stops the
//! engine.
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use crossbeam::channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::catalog::Catalog;
use crate::config::{MissionConfig, Mode};
use crate::element::{DecodeContext, Element, ElementState, ElementUpdate};
use crate::framing::{Acceptor, Buffer, Deframer, FrameDeframer, SymbolDeframer, SyncState};
use crate::tracker::{
    Fired, FrameListener, FrameStatus, FrameTracker, SubcomListener, SubcomStatus, SubcomTracker,
};
use crate::trigger::{lock, ConsumerId, Namespace, Target, Trigger, TriggerRegistry};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub buffers: u64,
    pub sync_state: SyncState,
    pub complete_frames: u64,
    pub sync_resets: u64,
    pub frame: FrameStatus,
    pub subcoms: Vec<SubcomStatus>,
    pub consumers: usize,
}

/// A minor frame or a sub-commutated logical frame finished assembling.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameEvent {
    MinorFrame {
        minor_frame_idx: usize,
        frame: Vec<u8>,
        time: DateTime<Utc>,
    },
    Subcom {
        group: String,
        frame: Vec<u8>,
        time: DateTime<Utc>,
    },
}

pub struct Engine {
    mission: MissionConfig,
    catalog: Catalog,
    deframer: Box<dyn Deframer>,
    frame: FrameTracker,
    subcoms: Vec<SubcomTracker>,
    states: Vec<ElementState>,
    hub: Arc<Mutex<ConsumerHub>>,
    routes: Arc<Routes>,
    stopped: Arc<AtomicBool>,
    buffers: u64,
}

impl Engine {
    /// Build the trackers for `mission` and register every element of `catalog` on them.
    ///
    /// # Errors
    /// [Error::Config] if the mission is inconsistent or an element refers to a group the
    /// mission does not have, [Error::UnsortedColumns] for unsorted group columns, or
    /// [Error::UnknownMode] if an element has no positions for the mission's mode.
    pub fn new(
        mission: MissionConfig,
        catalog: Catalog,
        deframer: Box<dyn Deframer>,
    ) -> Result<Self> {
        mission.validate()?;
        let frame = FrameTracker::new(&mission);
        let subcoms = mission
            .groups
            .iter()
            .map(|g| SubcomTracker::new(g, mission.cycle_length))
            .collect::<Result<Vec<_>>>()?;

        for (idx, subcom) in subcoms.iter().enumerate() {
            for trigger in subcom.minor_frame_triggers() {
                frame.register(trigger, Target::Subcom(idx))?;
            }
        }

        let mut registries = HashMap::new();
        registries.insert(Namespace::MinorFrame, frame.registry().clone());
        for subcom in &subcoms {
            registries.insert(
                Namespace::Subcom(subcom.key().to_string()),
                subcom.registry().clone(),
            );
        }

        let mut element_triggers = Vec::with_capacity(catalog.len());
        for (idx, element) in catalog.elements().iter().enumerate() {
            let spec = element.positions.select(mission.mode)?;
            let subcom = match spec.namespace() {
                Namespace::MinorFrame => None,
                Namespace::Subcom(key) => Some(
                    subcoms
                        .iter()
                        .find(|s| s.key() == key)
                        .ok_or_else(|| {
                            Error::Config(format!(
                                "element {} refers to unknown group {key}",
                                element.id
                            ))
                        })?,
                ),
            };
            for trigger in spec.triggers() {
                match subcom {
                    Some(subcom) => subcom.register(trigger.clone(), Target::Element(idx))?,
                    None => frame.register(trigger.clone(), Target::Element(idx))?,
                };
            }
            element_triggers.push(spec.triggers().to_vec());
        }

        let routes = Routes {
            ids: catalog
                .elements()
                .iter()
                .enumerate()
                .map(|(idx, e)| (e.id.clone(), idx))
                .collect(),
            triggers: element_triggers,
            registries,
        };
        info!(
            elements = catalog.len(),
            groups = subcoms.len(),
            mode = mission.mode.map(|m| m.to_string()),
            "engine ready"
        );

        Ok(Engine {
            states: vec![ElementState::default(); catalog.len()],
            mission,
            catalog,
            deframer,
            frame,
            subcoms,
            hub: Arc::default(),
            routes: Arc::new(routes),
            stopped: Arc::default(),
            buffers: 0,
        })
    }

    /// Engine for buffers each holding one whole minor frame.
    ///
    /// # Errors
    /// See [Self::new].
    pub fn discrete(mission: MissionConfig, catalog: Catalog) -> Result<Self> {
        let deframer = FrameDeframer::new(
            mission.frame_length,
            mission.sync_word,
            mission.sync_length,
        );
        Self::new(mission, catalog, Box::new(deframer))
    }

    /// Engine for buffers of tagged symbols.
    ///
    /// # Errors
    /// See [Self::new].
    pub fn symbol(mission: MissionConfig, catalog: Catalog) -> Result<Self> {
        let deframer = SymbolDeframer::new(mission.frame_length, mission.sync_word);
        Self::new(mission, catalog, Box::new(deframer))
    }

    #[must_use]
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            hub: self.hub.clone(),
            routes: self.routes.clone(),
            stopped: self.stopped.clone(),
        }
    }

    /// Decode one buffer.
    ///
    /// # Errors
    /// [Error::Stopped] once the engine has been stopped, or any extraction or dispatch
    /// fault raised while decoding. Synchronization problems are counted in [Self::status]
    /// rather than returned.
    pub fn process(&mut self, buffer: &Buffer) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::Stopped);
        }
        self.buffers += 1;
        trace!(
            len = buffer.data.len(),
            flags = ?buffer.flags,
            "processing buffer"
        );
        let mut pipeline = Pipeline {
            tracker: &mut self.frame,
            dispatch: Dispatch {
                elements: self.catalog.elements(),
                states: &mut self.states,
                subcoms: &mut self.subcoms,
                hub: &self.hub,
                mode: self.mission.mode,
                time: buffer.time,
            },
        };
        self.deframer.process(buffer, &mut pipeline)
    }

    /// Decode buffers from `buffers` until the channel closes or the engine is stopped.
    ///
    /// # Errors
    /// The first error from [Self::process], other than the engine being stopped.
    pub fn run(&mut self, buffers: &Receiver<Buffer>) -> Result<()> {
        for buffer in buffers {
            match self.process(&buffer) {
                Ok(()) => {}
                Err(Error::Stopped) => {
                    debug!("engine stopped, leaving remaining buffers");
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        debug!(buffers = self.buffers, "input exhausted");
        Ok(())
    }

    /// Supply the index of the minor frame being received, as if its counter had been read.
    ///
    /// # Errors
    /// [Error::Dispatch] if `idx` is outside of the cycle, or any fault raised while
    /// replaying bytes already received.
    pub fn set_minor_frame_idx(&mut self, idx: usize) -> Result<()> {
        let mut dispatch = Dispatch {
            elements: self.catalog.elements(),
            states: &mut self.states,
            subcoms: &mut self.subcoms,
            hub: &self.hub,
            mode: self.mission.mode,
            time: Utc::now(),
        };
        self.frame.set_minor_frame_idx(idx, &mut dispatch)
    }

    #[must_use]
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            buffers: self.buffers,
            sync_state: self.deframer.state(),
            complete_frames: self.deframer.complete_frames(),
            sync_resets: self.deframer.sync_resets(),
            frame: self.frame.status(),
            subcoms: self.subcoms.iter().map(SubcomTracker::status).collect(),
            consumers: lock(&self.hub).len(),
        }
    }

    #[must_use]
    pub fn state(&self, id: &str) -> Option<&ElementState> {
        self.catalog.position(id).map(|idx| &self.states[idx])
    }

    /// Current value of element `id`, or `None` if it is unknown or not yet decoded.
    #[must_use]
    pub fn snapshot(&self, id: &str) -> Option<ElementUpdate> {
        let idx = self.catalog.position(id)?;
        self.states[idx].snapshot(&self.catalog.elements()[idx])
    }

    /// Current values of every decoded element, in catalog order.
    pub fn snapshots(&self) -> impl Iterator<Item = ElementUpdate> + '_ {
        self.catalog
            .elements()
            .iter()
            .zip(&self.states)
            .filter_map(|(element, state)| state.snapshot(element))
    }

    #[must_use]
    pub fn mission(&self) -> &MissionConfig {
        &self.mission
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub fn frame_tracker(&self) -> &FrameTracker {
        &self.frame
    }

    #[must_use]
    pub fn subcom(&self, key: &str) -> Option<&SubcomTracker> {
        self.subcoms.iter().find(|s| s.key() == key)
    }
}

/// Trigger lookups shared with [EngineHandle]s.
#[derive(Debug)]
struct Routes {
    ids: HashMap<String, usize>,
    /// Triggers of each element in the active mode.
    triggers: Vec<Vec<Trigger>>,
    registries: HashMap<Namespace, Arc<Mutex<TriggerRegistry<Target>>>>,
}

impl Routes {
    fn registry(&self, trigger: &Trigger) -> Result<&Arc<Mutex<TriggerRegistry<Target>>>> {
        self.registries
            .get(&trigger.namespace)
            .ok_or_else(|| Error::Config(format!("no tracker for {trigger}")))
    }
}

struct Consumer {
    id: ConsumerId,
    tx: Sender<ElementUpdate>,
    /// Elements to deliver for each subscribed trigger.
    interests: HashMap<Trigger, Vec<usize>>,
}

#[derive(Default)]
struct ConsumerHub {
    consumers: Vec<Consumer>,
    next_id: ConsumerId,
    frames: Vec<Sender<FrameEvent>>,
}

impl ConsumerHub {
    fn insert(
        &mut self,
        tx: Sender<ElementUpdate>,
        interests: HashMap<Trigger, Vec<usize>>,
    ) -> ConsumerId {
        let id = self.next_id;
        self.next_id += 1;
        self.consumers.push(Consumer { id, tx, interests });
        id
    }

    fn remove(&mut self, id: ConsumerId) -> bool {
        let len = self.consumers.len();
        self.consumers.retain(|c| c.id != id);
        self.consumers.len() != len
    }

    fn len(&self) -> usize {
        self.consumers.len()
    }

    /// Send a frame event to every frame subscriber still listening. `event` is only built
    /// if there is one.
    fn publish(&mut self, event: impl FnOnce() -> FrameEvent) {
        if self.frames.is_empty() {
            return;
        }
        let event = event();
        self.frames.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Send consumer `id` the elements it wants for `trigger` that have a value.
    fn notify(
        &self,
        id: ConsumerId,
        trigger: &Trigger,
        elements: &[Element],
        states: &[ElementState],
    ) {
        let Some(consumer) = self.consumers.iter().find(|c| c.id == id) else {
            trace!(id, "notify for removed consumer");
            return;
        };
        let wildcard = trigger.wildcard();
        let Some(interested) = consumer
            .interests
            .get(trigger)
            .or_else(|| wildcard.as_ref().and_then(|w| consumer.interests.get(w)))
        else {
            return;
        };
        for idx in interested {
            let Some(update) = states[*idx].snapshot(&elements[*idx]) else {
                continue;
            };
            if consumer.tx.send(update).is_err() {
                debug!(id, "consumer receiver dropped");
                return;
            }
        }
    }
}

/// Cloneable access to a running [Engine] from other threads.
#[derive(Clone)]
pub struct EngineHandle {
    hub: Arc<Mutex<ConsumerHub>>,
    routes: Arc<Routes>,
    stopped: Arc<AtomicBool>,
}

impl EngineHandle {
    /// Receive updates of the elements `ids` whenever one of their triggers fires.
    ///
    /// # Errors
    /// [Error::Config] if an id is not in the catalog.
    pub fn subscribe(&self, ids: &[&str]) -> Result<Subscription> {
        let mut interests: HashMap<Trigger, Vec<usize>> = HashMap::new();
        for id in ids {
            let idx = *self
                .routes
                .ids
                .get(*id)
                .ok_or_else(|| Error::Config(format!("unknown element {id}")))?;
            for trigger in &self.routes.triggers[idx] {
                let wanted = interests.entry(trigger.clone()).or_default();
                if !wanted.contains(&idx) {
                    wanted.push(idx);
                }
            }
        }
        self.add(interests)
    }

    /// Receive updates of every element registered on `triggers` whenever they fire.
    ///
    /// # Errors
    /// [Error::Config] if no element is registered on one of the triggers.
    pub fn subscribe_triggers(&self, triggers: &[Trigger]) -> Result<Subscription> {
        let mut interests = HashMap::new();
        for trigger in triggers {
            let elements: Vec<usize> = self
                .routes
                .triggers
                .iter()
                .enumerate()
                .filter(|(_, t)| t.contains(trigger))
                .map(|(idx, _)| idx)
                .collect();
            if elements.is_empty() {
                return Err(Error::Config(format!("no element fires on {trigger}")));
            }
            interests.insert(trigger.clone(), elements);
        }
        self.add(interests)
    }

    fn add(&self, interests: HashMap<Trigger, Vec<usize>>) -> Result<Subscription> {
        let mut registrations = Vec::with_capacity(interests.len());
        for trigger in interests.keys() {
            registrations.push((trigger.clone(), self.routes.registry(trigger)?.clone()));
        }

        let (tx, rx) = unbounded();
        let id = lock(&self.hub).insert(tx, interests);
        for (trigger, registry) in &registrations {
            lock(registry).register(trigger.clone(), Target::Consumer(id));
        }
        debug!(id, triggers = registrations.len(), "consumer subscribed");

        Ok(Subscription {
            id,
            triggers: registrations.into_iter().map(|(t, _)| t).collect(),
            rx,
        })
    }

    /// Receive an event for every completed minor frame and logical frame. Dropping the
    /// receiver unsubscribes.
    #[must_use]
    pub fn frames(&self) -> Receiver<FrameEvent> {
        let (tx, rx) = unbounded();
        lock(&self.hub).frames.push(tx);
        debug!("frame subscriber added");
        rx
    }

    /// Stop delivering updates to `subscription`. Returns whether it was subscribed.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let target = Target::Consumer(subscription.id);
        for trigger in &subscription.triggers {
            if let Ok(registry) = self.routes.registry(trigger) {
                lock(registry).unregister(trigger, &target);
            }
        }
        let removed = lock(&self.hub).remove(subscription.id);
        debug!(id = subscription.id, removed, "consumer unsubscribed");
        removed
    }

    /// Refuse further buffers. A buffer being decoded is finished first.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            info!("engine stop requested");
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Updates for one consumer. Dereferences to the receiving end of its channel.
#[derive(Debug)]
pub struct Subscription {
    id: ConsumerId,
    triggers: Vec<Trigger>,
    rx: Receiver<ElementUpdate>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> ConsumerId {
        self.id
    }

    #[must_use]
    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }
}

impl Deref for Subscription {
    type Target = Receiver<ElementUpdate>;

    fn deref(&self) -> &Self::Target {
        &self.rx
    }
}

/// Invokes fired targets.
struct Dispatch<'a> {
    elements: &'a [Element],
    states: &'a mut [ElementState],
    subcoms: &'a mut Vec<SubcomTracker>,
    hub: &'a Mutex<ConsumerHub>,
    mode: Option<Mode>,
    time: DateTime<Utc>,
}

impl Dispatch<'_> {
    fn decode(
        &mut self,
        idx: usize,
        trigger: &Trigger,
        data: Data<'_>,
        minor_frame_idx: usize,
    ) -> Result<()> {
        let frame: &[u8] = match data {
            Data::MinorFrame(frame) => frame,
            Data::Subcom(group) => self.subcoms[group].latest(),
        };
        let element = &self.elements[idx];
        let ctx = DecodeContext {
            trigger,
            data: frame,
            minor_frame_idx: Some(minor_frame_idx),
            mode: self.mode,
            groups: &*self.subcoms,
            time: self.time,
        };
        let updated = element.decode(&mut self.states[idx], &ctx)?;
        if updated {
            trace!(element = %element.id, %trigger, "decoded");
        }
        Ok(())
    }

    fn notify(&self, id: ConsumerId, trigger: &Trigger) {
        lock(self.hub).notify(id, trigger, self.elements, &*self.states);
    }
}

/// Where the data of a fired trigger lives.
#[derive(Clone, Copy)]
enum Data<'f> {
    MinorFrame(&'f [u8]),
    Subcom(usize),
}

impl FrameListener for Dispatch<'_> {
    fn frame_complete(&mut self, minor_frame_idx: usize, frame: &[u8]) {
        let time = self.time;
        lock(self.hub).publish(|| FrameEvent::MinorFrame {
            minor_frame_idx,
            frame: frame.to_vec(),
            time,
        });
    }

    fn fire(&mut self, fired: &Fired<'_>, targets: &[Target]) -> Result<()> {
        for target in targets {
            match target {
                Target::Element(idx) => self.decode(
                    *idx,
                    fired.trigger,
                    Data::MinorFrame(fired.frame),
                    fired.minor_frame_idx,
                )?,
                Target::Consumer(id) => self.notify(*id, fired.trigger),
                Target::Subcom(group) => {
                    let mut events = FrameEvents {
                        hub: self.hub,
                        time: self.time,
                    };
                    let update = self.subcoms[*group].update(
                        fired.byte,
                        fired.minor_frame_idx,
                        fired.offset,
                        &mut events,
                    )?;
                    for target in &update.targets {
                        match target {
                            Target::Element(idx) => self.decode(
                                *idx,
                                &update.trigger,
                                Data::Subcom(*group),
                                fired.minor_frame_idx,
                            )?,
                            Target::Consumer(id) => self.notify(*id, &update.trigger),
                            Target::Subcom(_) => {
                                warn!(trigger = %update.trigger, "nested group target ignored");
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Forwards completed logical frames to frame subscribers.
struct FrameEvents<'a> {
    hub: &'a Mutex<ConsumerHub>,
    time: DateTime<Utc>,
}

impl SubcomListener for FrameEvents<'_> {
    fn frame_complete(&mut self, group: &str, frame: &[u8]) {
        let time = self.time;
        lock(self.hub).publish(|| FrameEvent::Subcom {
            group: group.to_string(),
            frame: frame.to_vec(),
            time,
        });
    }
}

/// Feeds deframed bytes to the frame tracker.
struct Pipeline<'a> {
    tracker: &'a mut FrameTracker,
    dispatch: Dispatch<'a>,
}

impl Acceptor for Pipeline<'_> {
    fn accept(&mut self, byte: u8, frame: &[u8], resync: bool, offset: usize) -> Result<()> {
        if resync {
            for subcom in self.dispatch.subcoms.iter_mut() {
                subcom.reset();
            }
        }
        self.tracker.update(byte, frame, resync, offset, &mut self.dispatch)
    }
}

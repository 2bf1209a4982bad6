//! Change notification hub: channel-tagged observation of a shared document.
//!
//! [`ChangeHub`] registers one observer per named container and relays every
//! committed change to a single callback as a [`DocChange`]. The enum is
//! closed over the five channels, so consumers match exhaustively instead of
//! comparing channel strings. Depth is explicit per container through
//! [`ObserveConfig`]: a deep container reports edits nested anywhere below it
//! (e.g. a field flipped inside one object record), a shallow one only edits
//! to the container itself.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use yrs::types::array::ArrayEvent;
use yrs::types::map::MapEvent;
use yrs::types::text::TextEvent;
use yrs::types::{Change, Delta, EntryChange, Event, Events, Path, PathSegment, ToJson};
use yrs::{Any, ArrayRef, DeepObservable, MapRef, Observable, Out, Subscription, TransactionMut};

use crate::shared_doc::CadDoc;
use crate::types::any_to_value;

/// The five observation channels, one per shared container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Document lifecycle state (dirty flag, path).
    State,
    /// Raw source text.
    Source,
    /// The objects sequence.
    Objects,
    /// Document-level settings.
    Options,
    /// Document-level bookkeeping.
    Meta,
}

impl Channel {
    /// Stable channel name, for hosts that route or log by name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::State => "state",
            Channel::Source => "source",
            Channel::Objects => "objects",
            Channel::Options => "options",
            Channel::Meta => "meta",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a path from a container root down to a nested container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    /// Mapping key.
    Key(String),
    /// Sequence index.
    Index(u32),
}

/// What happened to one mapping entry.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOp {
    /// The entry was created with this value.
    Inserted(Value),
    /// The entry's value was replaced.
    Updated {
        /// Value before the transaction.
        old: Value,
        /// Value after the transaction.
        new: Value,
    },
    /// The entry was removed; carries the removed value.
    Removed(Value),
}

/// A change to one mapping entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryDelta {
    /// The entry's key.
    pub key: String,
    /// What happened to it.
    pub op: EntryOp,
}

/// One run of a sequence delta.
#[derive(Debug, Clone, PartialEq)]
pub enum SeqOp {
    /// Skip over untouched elements.
    Retain(u32),
    /// Elements inserted at the current position.
    Added(Vec<Value>),
    /// Number of elements removed at the current position.
    Removed(u32),
}

/// One run of a text delta.
#[derive(Debug, Clone, PartialEq)]
pub enum TextOp {
    /// Skip over untouched text.
    Retain(u32),
    /// Text inserted at the current position.
    Inserted(String),
    /// Length of text deleted at the current position.
    Deleted(u32),
}

/// Container-type specific delta payload.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaKind {
    /// Mapping entry changes.
    Entries(Vec<EntryDelta>),
    /// Sequence changes.
    Sequence(Vec<SeqOp>),
    /// Text changes.
    Text(Vec<TextOp>),
}

/// A delta for one (possibly nested) container touched by a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerDelta {
    /// Path from the channel's root container to the changed container;
    /// empty for the root itself.
    pub path: Vec<PathStep>,
    /// The change.
    pub kind: DeltaKind,
}

/// A change event delivered to the hub's observer.
///
/// One value is delivered per committed transaction per affected channel.
/// The carried deltas only hold plain values; nothing in them refers back to
/// the replicated containers.
#[derive(Debug, Clone, PartialEq)]
pub enum DocChange {
    /// Document lifecycle state changed.
    State(Vec<ContainerDelta>),
    /// Raw source text changed.
    Source(Vec<ContainerDelta>),
    /// The objects sequence, or a record inside it, changed.
    Objects(Vec<ContainerDelta>),
    /// Document options changed.
    Options(Vec<ContainerDelta>),
    /// Document metadata changed.
    Meta(Vec<ContainerDelta>),
}

impl DocChange {
    /// The channel this change was delivered on.
    pub fn channel(&self) -> Channel {
        match self {
            DocChange::State(_) => Channel::State,
            DocChange::Source(_) => Channel::Source,
            DocChange::Objects(_) => Channel::Objects,
            DocChange::Options(_) => Channel::Options,
            DocChange::Meta(_) => Channel::Meta,
        }
    }

    /// The per-container deltas carried by this change.
    pub fn deltas(&self) -> &[ContainerDelta] {
        match self {
            DocChange::State(deltas)
            | DocChange::Source(deltas)
            | DocChange::Objects(deltas)
            | DocChange::Options(deltas)
            | DocChange::Meta(deltas) => deltas,
        }
    }
}

/// Observation depth for one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveDepth {
    /// Only edits to the container itself are reported.
    Shallow,
    /// Edits nested anywhere below the container are reported too.
    Deep,
}

/// Per-container observation depth.
///
/// The defaults follow how the containers are actually shaped: nested edits
/// matter for object records and metadata, while options and state are flat
/// maps. The source text has no nesting and always reports text deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserveConfig {
    /// Depth for the state map.
    pub state: ObserveDepth,
    /// Depth for the objects sequence.
    pub objects: ObserveDepth,
    /// Depth for the options map.
    pub options: ObserveDepth,
    /// Depth for the metadata map.
    pub metadata: ObserveDepth,
}

impl Default for ObserveConfig {
    fn default() -> Self {
        Self {
            state: ObserveDepth::Shallow,
            objects: ObserveDepth::Deep,
            options: ObserveDepth::Shallow,
            metadata: ObserveDepth::Deep,
        }
    }
}

type ObserverCallback = Arc<dyn Fn(&DocChange) + Send + Sync>;

/// Registers per-channel observers on a shared document and relays their
/// events to one callback.
///
/// Subscriptions are tied to the hub: dropping it, or calling
/// [`unobserve`](ChangeHub::unobserve), removes all of them.
pub struct ChangeHub {
    doc: Arc<CadDoc>,
    config: ObserveConfig,
    subscriptions: Vec<Subscription>,
}

impl ChangeHub {
    /// Create a hub with the default observation depths.
    pub fn new(doc: Arc<CadDoc>) -> Self {
        Self::with_config(doc, ObserveConfig::default())
    }

    /// Create a hub with explicit observation depths.
    pub fn with_config(doc: Arc<CadDoc>, config: ObserveConfig) -> Self {
        Self {
            doc,
            config,
            subscriptions: Vec::new(),
        }
    }

    /// Subscribe `callback` to all five channels.
    ///
    /// Observers previously registered through this hub are dropped first,
    /// so repeated calls re-subscribe instead of double-delivering.
    pub fn observe<F>(&mut self, callback: F)
    where
        F: Fn(&DocChange) + Send + Sync + 'static,
    {
        self.unobserve();
        let callback: ObserverCallback = Arc::new(callback);

        self.subscriptions.push(subscribe_map(
            self.doc.state_ref(),
            self.config.state,
            DocChange::State,
            Arc::clone(&callback),
        ));

        let cb = Arc::clone(&callback);
        self.subscriptions
            .push(self.doc.source_ref().observe(move |txn, event| {
                let delta = ContainerDelta {
                    path: Vec::new(),
                    kind: DeltaKind::Text(text_ops(txn, event)),
                };
                cb(&DocChange::Source(vec![delta]));
            }));

        self.subscriptions.push(subscribe_array(
            self.doc.objects_ref(),
            self.config.objects,
            DocChange::Objects,
            Arc::clone(&callback),
        ));

        self.subscriptions.push(subscribe_map(
            self.doc.options_ref(),
            self.config.options,
            DocChange::Options,
            Arc::clone(&callback),
        ));

        self.subscriptions.push(subscribe_map(
            self.doc.metadata_ref(),
            self.config.metadata,
            DocChange::Meta,
            callback,
        ));
    }

    /// Drop every subscription registered through this hub.
    ///
    /// Idempotent: calling it twice, or with nothing subscribed, is fine.
    pub fn unobserve(&mut self) {
        self.subscriptions.clear();
    }

    /// Whether the hub currently has observers registered.
    pub fn is_observing(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    /// Number of active channel subscriptions (five while observing).
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl fmt::Debug for ChangeHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeHub")
            .field("config", &self.config)
            .field("subscription_count", &self.subscriptions.len())
            .finish_non_exhaustive()
    }
}

fn subscribe_map(
    map: &MapRef,
    depth: ObserveDepth,
    make: fn(Vec<ContainerDelta>) -> DocChange,
    cb: ObserverCallback,
) -> Subscription {
    match depth {
        ObserveDepth::Shallow => map.observe(move |txn, event| {
            let delta = ContainerDelta {
                path: Vec::new(),
                kind: DeltaKind::Entries(entry_deltas(txn, event)),
            };
            cb(&make(vec![delta]));
        }),
        ObserveDepth::Deep => map.observe_deep(move |txn, events| {
            let deltas = deep_deltas(txn, events);
            if !deltas.is_empty() {
                cb(&make(deltas));
            }
        }),
    }
}

fn subscribe_array(
    array: &ArrayRef,
    depth: ObserveDepth,
    make: fn(Vec<ContainerDelta>) -> DocChange,
    cb: ObserverCallback,
) -> Subscription {
    match depth {
        ObserveDepth::Shallow => array.observe(move |txn, event| {
            let delta = ContainerDelta {
                path: Vec::new(),
                kind: DeltaKind::Sequence(seq_ops(txn, event)),
            };
            cb(&make(vec![delta]));
        }),
        ObserveDepth::Deep => array.observe_deep(move |txn, events| {
            let deltas = deep_deltas(txn, events);
            if !deltas.is_empty() {
                cb(&make(deltas));
            }
        }),
    }
}

fn out_value(txn: &TransactionMut, out: &Out) -> Value {
    any_to_value(&out.to_json(txn))
}

fn entry_deltas(txn: &TransactionMut, event: &MapEvent) -> Vec<EntryDelta> {
    event
        .keys(txn)
        .iter()
        .map(|(key, change)| {
            let op = match change {
                EntryChange::Inserted(value) => EntryOp::Inserted(out_value(txn, value)),
                EntryChange::Updated(old, new) => EntryOp::Updated {
                    old: out_value(txn, old),
                    new: out_value(txn, new),
                },
                EntryChange::Removed(value) => EntryOp::Removed(out_value(txn, value)),
            };
            EntryDelta {
                key: key.to_string(),
                op,
            }
        })
        .collect()
}

fn seq_ops(txn: &TransactionMut, event: &ArrayEvent) -> Vec<SeqOp> {
    event
        .delta(txn)
        .iter()
        .map(|change| match change {
            Change::Added(values) => {
                SeqOp::Added(values.iter().map(|value| out_value(txn, value)).collect())
            }
            Change::Removed(len) => SeqOp::Removed(*len),
            Change::Retain(len) => SeqOp::Retain(*len),
        })
        .collect()
}

fn text_ops(txn: &TransactionMut, event: &TextEvent) -> Vec<TextOp> {
    event
        .delta(txn)
        .iter()
        .map(|delta| match delta {
            Delta::Inserted(value, _) => TextOp::Inserted(match value.to_json(txn) {
                Any::String(chunk) => chunk.to_string(),
                other => other.to_string(),
            }),
            Delta::Deleted(len) => TextOp::Deleted(*len),
            Delta::Retain(len, _) => TextOp::Retain(*len),
        })
        .collect()
}

fn convert_path(path: Path) -> Vec<PathStep> {
    path.into_iter()
        .map(|segment| match segment {
            PathSegment::Key(key) => PathStep::Key(key.to_string()),
            PathSegment::Index(index) => PathStep::Index(index),
        })
        .collect()
}

fn deep_deltas(txn: &TransactionMut, events: &Events) -> Vec<ContainerDelta> {
    events
        .iter()
        .filter_map(|event| {
            let path = convert_path(event.path());
            let kind = match event {
                Event::Map(event) => DeltaKind::Entries(entry_deltas(txn, event)),
                Event::Array(event) => DeltaKind::Sequence(seq_ops(txn, event)),
                Event::Text(event) => DeltaKind::Text(text_ops(txn, event)),
                _ => return None,
            };
            Some(ContainerDelta { path, kind })
        })
        .collect()
}

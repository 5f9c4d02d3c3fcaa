//! Plot sinks: consumers that keep the latest dataset of every channel
//! feeding them.
//!
//! A sink is split in two.  The [`SinkHandle`] is a cheap, cloneable sender
//! that channels push into; the [`PlotSink`] stays with the renderer and
//! applies queued messages when it calls [`PlotSink::pump`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use log::debug;

use crate::channel::ChannelId;
use crate::data::model::Dataset;

/// Stable identifier of a plot sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SinkId(pub u64);

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plot {}", self.0)
    }
}

#[derive(Debug, Clone)]
pub enum SinkMessage {
    /// Insert or replace the dataset for a channel.
    Push { channel: ChannelId, dataset: Arc<Dataset> },
    /// Forget a channel; no-op when it is unknown.
    Remove { channel: ChannelId },
}

/// Sending side of a sink.
#[derive(Debug, Clone)]
pub struct SinkHandle {
    id: SinkId,
    tx: Sender<SinkMessage>,
}

impl SinkHandle {
    pub fn id(&self) -> SinkId {
        self.id
    }

    /// Queue a dataset.  Returns false once the sink has been dropped.
    pub fn push(&self, channel: ChannelId, dataset: Arc<Dataset>) -> bool {
        self.tx.send(SinkMessage::Push { channel, dataset }).is_ok()
    }

    pub fn remove(&self, channel: ChannelId) -> bool {
        self.tx.send(SinkMessage::Remove { channel }).is_ok()
    }
}

impl PartialEq for SinkHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SinkHandle {}

/// Receiving side of a sink: the per-channel datasets a renderer draws.
pub struct PlotSink {
    id: SinkId,
    name: String,
    rx: Receiver<SinkMessage>,
    data: BTreeMap<ChannelId, Arc<Dataset>>,
}

impl PlotSink {
    /// Create a sink and the handle channels use to feed it.
    pub fn new(id: SinkId, name: impl Into<String>) -> (Self, SinkHandle) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let sink = PlotSink {
            id,
            name: name.into(),
            rx,
            data: BTreeMap::new(),
        };
        (sink, SinkHandle { id, tx })
    }

    pub fn id(&self) -> SinkId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply every queued message.  Returns true when the contents changed
    /// and the plot should be redrawn.
    pub fn pump(&mut self) -> bool {
        let pending: Vec<SinkMessage> = self.rx.try_iter().collect();
        let mut changed = false;
        for msg in pending {
            changed |= self.apply(msg);
        }
        changed
    }

    /// Apply one message.
    pub fn apply(&mut self, msg: SinkMessage) -> bool {
        match msg {
            SinkMessage::Push { channel, dataset } => {
                debug!("{}: dataset from {channel}", self.name);
                self.data.insert(channel, dataset);
                true
            }
            SinkMessage::Remove { channel } => self.data.remove(&channel).is_some(),
        }
    }

    pub fn get(&self, channel: ChannelId) -> Option<&Arc<Dataset>> {
        self.data.get(&channel)
    }

    pub fn contains(&self, channel: ChannelId) -> bool {
        self.data.contains_key(&channel)
    }

    /// Datasets in channel order.
    pub fn datasets(&self) -> impl Iterator<Item = (ChannelId, &Arc<Dataset>)> {
        self.data.iter().map(|(id, ds)| (*id, ds))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{FileKind, Series};

    fn dataset(v: f64) -> Arc<Dataset> {
        Arc::new(Dataset::Series {
            kind: FileKind::Csv,
            x: Series { name: "t".into(), values: vec![0.0] },
            ys: vec![Series { name: "v".into(), values: vec![v] }],
        })
    }

    #[test]
    fn push_inserts_and_replaces() {
        let (mut sink, handle) = PlotSink::new(SinkId(1), "Plot 1");
        assert!(handle.push(ChannelId(3), dataset(1.0)));
        assert!(handle.push(ChannelId(3), dataset(2.0)));
        assert!(handle.push(ChannelId(4), dataset(3.0)));

        assert!(sink.pump());
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.get(ChannelId(3)), Some(&dataset(2.0)));
        assert!(!sink.pump());
    }

    #[test]
    fn remove_unknown_is_noop() {
        let (mut sink, handle) = PlotSink::new(SinkId(1), "Plot 1");
        handle.remove(ChannelId(9));
        assert!(!sink.pump());

        handle.push(ChannelId(9), dataset(1.0));
        handle.remove(ChannelId(9));
        sink.pump();
        assert!(!sink.contains(ChannelId(9)));
    }

    #[test]
    fn pump_applies_backlog_in_order() {
        let (mut sink, handle) = PlotSink::new(SinkId(1), "Plot 1");
        for i in 0..50 {
            handle.push(ChannelId(i % 5), dataset(i as f64));
        }
        handle.remove(ChannelId(0));

        assert!(sink.pump());
        assert_eq!(sink.len(), 4);
        assert!(!sink.contains(ChannelId(0)));
        assert_eq!(sink.get(ChannelId(4)), Some(&dataset(49.0)));
    }

    #[test]
    fn handle_notices_dropped_sink() {
        let (sink, handle) = PlotSink::new(SinkId(2), "gone");
        drop(sink);
        assert!(!handle.push(ChannelId(1), dataset(0.0)));
    }
}

//! Every open channel and plot sink, keyed by id.
//!
//! The registry is the orchestrator: it assigns ids, remembers which sinks
//! each channel feeds and keeps the path history.  Channels do the actual
//! work on their own threads; the registry only sends them commands.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use crossbeam_channel::Receiver;
use log::info;

use crate::channel::{ChannelContext, ChannelId, DataChannel, Notice};
use crate::config::{PathHistory, Settings};
use crate::data::convert::{BuiltinConverter, Converter, ExternalConverter};
use crate::data::model::{Placement, SeriesSelection};
use crate::remote::{self, RemoteHost};
use crate::sink::{PlotSink, SinkHandle, SinkId};

/// Notices kept for a caller that is slow to drain them.  Further notices
/// are dropped until there is room again.
pub const NOTICE_BACKLOG: usize = 256;

pub struct Registry {
    settings: Settings,
    ctx: ChannelContext,
    notices: Receiver<Notice>,
    channels: BTreeMap<ChannelId, DataChannel>,
    sinks: BTreeMap<SinkId, SinkHandle>,
    /// Sinks each channel currently feeds.
    routes: BTreeMap<ChannelId, Vec<SinkId>>,
    next_channel: u64,
    next_sink: u64,
}

impl Registry {
    /// Registry talking to the host named in `settings`.
    pub fn new(settings: Settings) -> Self {
        let host = remote::connect(&settings.host);
        Self::with_host(settings, host)
    }

    pub fn with_host(settings: Settings, host: Arc<dyn RemoteHost>) -> Self {
        let converter: Arc<dyn Converter> = match &settings.converter {
            Some(program) => Arc::new(ExternalConverter::new(program.clone())),
            None => Arc::new(BuiltinConverter),
        };
        let (tx, rx) = crossbeam_channel::bounded(NOTICE_BACKLOG);
        let ctx = ChannelContext {
            host,
            converter,
            staging_root: settings.staging_dir.clone(),
            poll_interval: settings.poll_interval(),
            notices: tx,
        };
        Self {
            settings,
            ctx,
            notices: rx,
            channels: BTreeMap::new(),
            sinks: BTreeMap::new(),
            routes: BTreeMap::new(),
            next_channel: 1,
            next_sink: 1,
        }
    }

    /// Settings including the current path history, ready to be saved.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn history(&self) -> &PathHistory {
        &self.settings.data_path_history
    }

    // -- sinks ---------------------------------------------------------------

    /// Register a new sink.  The caller owns the returned [`PlotSink`] and
    /// pumps it.
    pub fn add_sink(&mut self, name: impl Into<String>) -> PlotSink {
        let id = SinkId(self.next_sink);
        self.next_sink += 1;
        let (sink, handle) = PlotSink::new(id, name);
        info!("Added {id} ({})", sink.name());
        self.sinks.insert(id, handle);
        sink
    }

    /// Forget a sink; channels feeding it withdraw their entries.
    pub fn remove_sink(&mut self, id: SinkId) -> Result<()> {
        if self.sinks.remove(&id).is_none() {
            bail!("no such {id}");
        }
        let affected: Vec<ChannelId> = self
            .routes
            .iter()
            .filter(|(_, sinks)| sinks.contains(&id))
            .map(|(channel, _)| *channel)
            .collect();
        for channel in affected {
            let remaining: Vec<SinkId> = self.routes[&channel]
                .iter()
                .copied()
                .filter(|s| *s != id)
                .collect();
            self.route(channel, remaining)?;
        }
        info!("Removed {id}");
        Ok(())
    }

    pub fn sink_ids(&self) -> impl Iterator<Item = SinkId> + '_ {
        self.sinks.keys().copied()
    }

    // -- channels ------------------------------------------------------------

    pub fn open_channel(&mut self) -> Result<ChannelId> {
        let id = ChannelId(self.next_channel);
        self.next_channel += 1;
        let channel = DataChannel::open(id, self.ctx.clone())?;
        self.channels.insert(id, channel);
        self.routes.insert(id, Vec::new());
        info!("Opened {id}");
        Ok(id)
    }

    pub fn channel(&self, id: ChannelId) -> Option<&DataChannel> {
        self.channels.get(&id)
    }

    pub fn channel_ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.channels.keys().copied()
    }

    /// Sinks `id` currently feeds.
    pub fn targets(&self, id: ChannelId) -> &[SinkId] {
        self.routes.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Point a channel at `path` and record it in the history.  The first
    /// refresh has run when this returns; its failure is reported but the
    /// channel keeps watching.
    pub fn set_path(&mut self, id: ChannelId, path: &str) -> Result<()> {
        let channel = self
            .channels
            .get_mut(&id)
            .with_context(|| format!("no such {id}"))?;
        self.settings.data_path_history.touch(path);
        channel.set_path(path)?;
        Ok(())
    }

    /// Make `id` feed exactly `sinks`.
    pub fn retarget(&mut self, id: ChannelId, sinks: &[SinkId]) -> Result<()> {
        self.route(id, sinks.to_vec())
    }

    pub fn select(&self, id: ChannelId, selection: SeriesSelection) -> Result<()> {
        self.lookup(id)?.select(selection)?;
        Ok(())
    }

    pub fn place_image(&self, id: ChannelId, placement: Placement, opacity: f64) -> Result<()> {
        self.lookup(id)?.place_image(placement, opacity)?;
        Ok(())
    }

    pub fn reload(&self, id: ChannelId) -> Result<()> {
        self.lookup(id)?.reload()?;
        Ok(())
    }

    /// Tear a channel down.  Returns false when it was not open.
    pub fn close_channel(&mut self, id: ChannelId) -> bool {
        self.routes.remove(&id);
        match self.channels.remove(&id) {
            Some(mut channel) => {
                channel.teardown();
                true
            }
            None => false,
        }
    }

    // -- notices -------------------------------------------------------------

    /// Receiver of every channel's notices, for callers that block on it.
    pub fn notices(&self) -> &Receiver<Notice> {
        &self.notices
    }

    /// Notices queued since the last call.
    pub fn drain_notices(&self) -> Vec<Notice> {
        self.notices.try_iter().collect()
    }

    /// Close every channel.  Sinks keep no entries afterwards.
    pub fn shutdown(&mut self) {
        for (_, mut channel) in std::mem::take(&mut self.channels) {
            channel.teardown();
        }
        self.routes.clear();
    }

    fn lookup(&self, id: ChannelId) -> Result<&DataChannel> {
        self.channels.get(&id).with_context(|| format!("no such {id}"))
    }

    /// Send `id` its new sink set.
    fn route(&mut self, id: ChannelId, sinks: Vec<SinkId>) -> Result<()> {
        let channel = self.lookup(id)?;
        let handles = sinks
            .iter()
            .map(|sink| self.sinks.get(sink).cloned().with_context(|| format!("no such {sink}")))
            .collect::<Result<Vec<_>>>()?;
        channel.retarget(handles)?;
        self.routes.insert(id, sinks);
        Ok(())
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

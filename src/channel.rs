//! Data channels: one watched remote file feeding one or more plot sinks.
//!
//! # Threads
//!
//! ```text
//!   FileWatcher ──WatchEvent──┐
//!                             ▼
//!   DataChannel ──Control──► worker ──SinkMessage──► PlotSink(s)
//!                             │
//!                             └──Notice──► control surface
//! ```
//!
//! The worker thread owns all channel state (path, loaded content,
//! selection, targets).  It handles one refresh at a time; change events
//! that pile up during a refresh are coalesced so only the newest is acted
//! on, and events from a replaced watcher are recognised by their
//! generation and dropped.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::{Receiver, Sender, TrySendError, select};
use log::{debug, info, warn};

use crate::data::convert::Converter;
use crate::data::loader;
use crate::data::model::{Content, Dataset, DatasetSummary, Placement, SeriesSelection};
use crate::error::{ChannelError, Result};
use crate::remote::RemoteHost;
use crate::sink::{SinkHandle, SinkId};
use crate::watcher::{FileWatcher, WatchEvent};

/// Stable identifier of a data channel, assigned by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel {}", self.0)
    }
}

/// Transient, user-facing report from a channel.
#[derive(Debug, Clone)]
pub enum Notice {
    /// New data was loaded and published.
    Updated {
        channel: ChannelId,
        path: String,
        summary: DatasetSummary,
    },
    /// A refresh failed; the previous data stays in place.
    Failed {
        channel: ChannelId,
        path: String,
        transient: bool,
        message: String,
    },
}

/// What a channel needs from its surroundings.
#[derive(Clone)]
pub struct ChannelContext {
    pub host: Arc<dyn RemoteHost>,
    pub converter: Arc<dyn Converter>,
    /// Each channel stages downloads in its own subdirectory of this.
    pub staging_root: PathBuf,
    pub poll_interval: Duration,
    /// May be bounded; notices that do not fit are dropped.
    pub notices: Sender<Notice>,
}

enum Control {
    Arm {
        generation: u64,
        path: String,
        reply: Sender<Result<()>>,
    },
    Retarget(Vec<SinkHandle>),
    Select(SeriesSelection),
    Place { placement: Placement, opacity: f64 },
    Flush(Sender<()>),
    Shutdown,
}

// ---------------------------------------------------------------------------
// DataChannel – owner-side handle
// ---------------------------------------------------------------------------

pub struct DataChannel {
    id: ChannelId,
    host: Arc<dyn RemoteHost>,
    poll_interval: Duration,
    path: Option<String>,
    generation: u64,
    watcher: Option<FileWatcher>,
    control: Sender<Control>,
    changes: Sender<WatchEvent>,
    worker: Option<JoinHandle<()>>,
}

impl DataChannel {
    /// Start the channel's worker.  The channel watches nothing until
    /// [`set_path`](Self::set_path) is called.
    pub fn open(id: ChannelId, ctx: ChannelContext) -> anyhow::Result<Self> {
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let (change_tx, change_rx) = crossbeam_channel::unbounded();

        let host = Arc::clone(&ctx.host);
        let poll_interval = ctx.poll_interval;
        let worker = Worker::new(id, ctx);
        let handle = std::thread::Builder::new()
            .name(format!("{id}"))
            .spawn(move || worker.run(control_rx, change_rx))
            .context("spawning channel worker")?;

        Ok(Self {
            id,
            host,
            poll_interval,
            path: None,
            generation: 0,
            watcher: None,
            control: control_tx,
            changes: change_tx,
            worker: Some(handle),
        })
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// The remote path currently watched.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Watch `path` instead of the current file.
    ///
    /// The old watcher is stopped and joined first.  The new file is fetched
    /// right away and the result of that first refresh is returned; the
    /// watcher is started either way so a file that appears later is still
    /// picked up.
    pub fn set_path(&mut self, path: &str) -> Result<()> {
        let path = path.trim().to_string();
        if path.is_empty() {
            return Err(ChannelError::Unsupported { path });
        }

        if let Some(mut old) = self.watcher.take() {
            old.stop();
        }
        self.generation += 1;
        self.path = Some(path.clone());

        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.send(Control::Arm {
            generation: self.generation,
            path: path.clone(),
            reply: reply_tx,
        })?;
        let first = reply_rx.recv().unwrap_or(Err(ChannelError::Disconnected));

        let mut watcher = FileWatcher::new(Arc::clone(&self.host), path.clone(), self.poll_interval)
            .with_generation(self.generation);
        watcher
            .start(self.changes.clone())
            .map_err(|cause| ChannelError::Transfer { path, cause })?;
        self.watcher = Some(watcher);

        first
    }

    /// Fetch the current file again without waiting for a modification.
    /// Does nothing before the first [`set_path`](Self::set_path).
    pub fn reload(&self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        self.changes
            .send(WatchEvent {
                generation: self.generation,
                path,
                mtime: 0,
            })
            .map_err(|_| ChannelError::Disconnected)
    }

    /// Feed `sinks` from now on.  Sinks no longer in the set lose this
    /// channel's entry.
    pub fn retarget(&self, sinks: Vec<SinkHandle>) -> Result<()> {
        self.send(Control::Retarget(sinks))
    }

    /// Change which table columns are published.
    pub fn select(&self, selection: SeriesSelection) -> Result<()> {
        self.send(Control::Select(selection))
    }

    /// Move or fade an image overlay.
    pub fn place_image(&self, placement: Placement, opacity: f64) -> Result<()> {
        self.send(Control::Place { placement, opacity })
    }

    /// Block until every command sent so far has been handled.
    pub fn flush(&self) -> Result<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.send(Control::Flush(tx))?;
        rx.recv().map_err(|_| ChannelError::Disconnected)
    }

    /// Stop watching, withdraw from every sink and delete staged files.
    /// Safe to call more than once.
    pub fn teardown(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
        }
        if let Some(handle) = self.worker.take() {
            let _ = self.control.send(Control::Shutdown);
            if handle.join().is_err() {
                warn!("{} worker panicked", self.id);
            }
            info!("{} closed", self.id);
        }
    }

    fn send(&self, msg: Control) -> Result<()> {
        self.control.send(msg).map_err(|_| ChannelError::Disconnected)
    }
}

impl Drop for DataChannel {
    fn drop(&mut self) {
        self.teardown();
    }
}

// ---------------------------------------------------------------------------
// Worker – runs on the channel thread
// ---------------------------------------------------------------------------

struct Worker {
    id: ChannelId,
    ctx: ChannelContext,
    staging: PathBuf,
    generation: u64,
    content: Option<Content>,
    selection: SeriesSelection,
    placement: Option<Placement>,
    opacity: f64,
    dataset: Option<Arc<Dataset>>,
    targets: Vec<SinkHandle>,
    /// Sinks holding an entry for this channel.
    fed: BTreeMap<SinkId, SinkHandle>,
}

impl Worker {
    fn new(id: ChannelId, ctx: ChannelContext) -> Self {
        let staging = ctx.staging_root.join(format!("channel-{}", id.0));
        Self {
            id,
            ctx,
            staging,
            generation: 0,
            content: None,
            selection: SeriesSelection::default(),
            placement: None,
            opacity: 1.0,
            dataset: None,
            targets: Vec::new(),
            fed: BTreeMap::new(),
        }
    }

    fn run(mut self, control: Receiver<Control>, changes: Receiver<WatchEvent>) {
        loop {
            select! {
                recv(control) -> msg => match msg {
                    Ok(Control::Shutdown) | Err(_) => break,
                    Ok(msg) => self.handle(msg),
                },
                recv(changes) -> event => match event {
                    Ok(event) => {
                        if let Some(latest) = self.latest_change(event, &changes) {
                            let _ = self.refresh(&latest.path);
                        }
                    }
                    Err(_) => break,
                },
            }
        }
        self.release();
    }

    fn handle(&mut self, msg: Control) {
        match msg {
            Control::Arm { generation, path, reply } => {
                self.generation = generation;
                let _ = reply.send(self.refresh(&path));
            }
            Control::Retarget(sinks) => self.retarget(sinks),
            Control::Select(selection) => self.select(selection),
            Control::Place { placement, opacity } => {
                self.placement = Some(placement);
                self.opacity = opacity;
                if matches!(self.content, Some(Content::Image(_))) {
                    self.rebuild();
                    self.publish();
                }
            }
            Control::Flush(done) => {
                let _ = done.send(());
            }
            Control::Shutdown => {}
        }
    }

    /// Newest queued change from the current watcher, if any.
    fn latest_change(&self, first: WatchEvent, queue: &Receiver<WatchEvent>) -> Option<WatchEvent> {
        let generation = self.generation;
        let latest = std::iter::once(first)
            .chain(queue.try_iter())
            .filter(|e| e.generation == generation)
            .last();
        if latest.is_none() {
            debug!("{}: dropped changes from a replaced watcher", self.id);
        }
        latest
    }

    /// Download, decode and publish `path`.  Failures are logged, reported
    /// as a notice and leave the current data alone.
    fn refresh(&mut self, path: &str) -> Result<()> {
        match self.fetch(path) {
            Ok(content) => {
                self.install(content);
                self.publish();
                info!("{}: refreshed {path}", self.id);
                if let Some(content) = &self.content {
                    let summary = DatasetSummary::new(content, self.dataset.as_deref());
                    self.notify(Notice::Updated {
                        channel: self.id,
                        path: path.to_string(),
                        summary,
                    });
                }
                Ok(())
            }
            Err(e) => {
                warn!("{}: {e}", self.id);
                self.notify(Notice::Failed {
                    channel: self.id,
                    path: path.to_string(),
                    transient: e.is_transient(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Report to the control surface.  When nobody drains the notices and
    /// the backlog is full the notice is dropped; refreshes never wait on it.
    fn notify(&self, notice: Notice) {
        if let Err(TrySendError::Full(notice)) = self.ctx.notices.try_send(notice) {
            debug!("{}: notice backlog full, dropped {notice:?}", self.id);
        }
    }

    fn fetch(&self, path: &str) -> Result<Content> {
        let local = self.staging_path(path)?;
        self.ctx
            .host
            .download(path, &local)
            .map_err(|cause| ChannelError::Transfer {
                path: path.to_string(),
                cause,
            })?;
        debug!("{}: staged {path} at {}", self.id, local.display());
        loader::load_file(&local, self.ctx.converter.as_ref())
    }

    /// Local copy of `remote`, inside this channel's own staging directory.
    fn staging_path(&self, remote: &str) -> Result<PathBuf> {
        let name = Path::new(remote)
            .file_name()
            .ok_or_else(|| ChannelError::Unsupported { path: remote.to_string() })?;
        Ok(self.staging.join(name))
    }

    fn install(&mut self, content: Content) {
        match &content {
            Content::Table { table, .. } => {
                self.selection = self.selection.restored_for(table);
            }
            Content::Image(image) => {
                if self.placement.is_none() {
                    self.placement = Some(Placement::for_image(image));
                }
            }
        }
        self.content = Some(content);
        self.rebuild();
    }

    /// Recompute the published dataset from content and view settings.
    fn rebuild(&mut self) {
        self.dataset = match &self.content {
            Some(Content::Table { kind, table }) => {
                Dataset::from_table(*kind, table, &self.selection).map(Arc::new)
            }
            Some(Content::Image(image)) => {
                let placement = self.placement.unwrap_or_else(|| Placement::for_image(image));
                Some(Arc::new(Dataset::image(Arc::clone(image), placement, self.opacity)))
            }
            None => None,
        };
    }

    fn select(&mut self, selection: SeriesSelection) {
        if let Some(Content::Table { kind, table }) = &self.content {
            if Dataset::from_table(*kind, table, &selection).is_none() {
                warn!("{}: ignoring selection {selection:?}, no such x column", self.id);
                return;
            }
        }
        self.selection = selection;
        self.rebuild();
        self.publish();
    }

    fn retarget(&mut self, sinks: Vec<SinkHandle>) {
        let keep: Vec<SinkId> = sinks.iter().map(SinkHandle::id).collect();
        let dropped: Vec<SinkId> = self
            .fed
            .keys()
            .filter(|id| !keep.contains(*id))
            .copied()
            .collect();
        for id in dropped {
            if let Some(handle) = self.fed.remove(&id) {
                handle.remove(self.id);
            }
        }
        self.targets = sinks;
        self.publish();
    }

    /// Push the current dataset to every target.
    fn publish(&mut self) {
        let Some(dataset) = &self.dataset else {
            return;
        };
        let id = self.id;
        let fed = &mut self.fed;
        self.targets.retain(|sink| {
            if sink.push(id, Arc::clone(dataset)) {
                fed.insert(sink.id(), sink.clone());
                true
            } else {
                debug!("{id}: {} is gone", sink.id());
                fed.remove(&sink.id());
                false
            }
        });
    }

    fn release(&mut self) {
        for (_, handle) in std::mem::take(&mut self.fed) {
            handle.remove(self.id);
        }
        self.targets.clear();
        if self.staging.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.staging) {
                warn!("{}: could not remove {}: {e}", self.id, self.staging.display());
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::data::convert::BuiltinConverter;
    use crate::data::model::Image;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use crate::remote::{CommandOutput, LocalHost};
    use crate::sink::PlotSink;

    /// Host whose downloads take a while and which records how many ran at
    /// once.
    #[derive(Default)]
    struct SlowHost {
        downloads: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl RemoteHost for SlowHost {
        fn execute(&self, _command: &str) -> anyhow::Result<CommandOutput> {
            Ok(CommandOutput {
                stdout: "100\n".into(),
                stderr: String::new(),
                status: Some(0),
            })
        }

        fn download(&self, _remote: &str, local: &Path) -> anyhow::Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.downloads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            std::fs::create_dir_all(local.parent().unwrap())?;
            std::fs::write(local, "t,v\n0,1\n1,2\n")?;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        fn upload(&self, _local: &Path, _remote: &str) -> anyhow::Result<()> {
            anyhow::bail!("read-only host")
        }
    }

    fn event(generation: u64, path: &str) -> WatchEvent {
        WatchEvent { generation, path: path.into(), mtime: 0 }
    }

    fn context(root: &Path) -> (ChannelContext, Receiver<Notice>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let ctx = ChannelContext {
            host: Arc::new(LocalHost),
            converter: Arc::new(BuiltinConverter),
            staging_root: root.join("staging"),
            poll_interval: Duration::from_secs(3600),
            notices: tx,
        };
        (ctx, rx)
    }

    fn write(dir: &Path, name: &str, text: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path.display().to_string()
    }

    fn y_names(sink: &PlotSink, id: ChannelId) -> Vec<String> {
        match sink.get(id).map(|d| d.as_ref()) {
            Some(Dataset::Series { ys, .. }) => ys.iter().map(|s| s.name.clone()).collect(),
            other => panic!("expected series, got {other:?}"),
        }
    }

    #[test]
    fn set_path_publishes_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, notices) = context(dir.path());
        let (mut sink, handle) = PlotSink::new(SinkId(1), "Plot 1");
        let remote = write(dir.path(), "sweep.csv", "vg,id\n0,1\n1,4\n");

        let mut channel = DataChannel::open(ChannelId(1), ctx).unwrap();
        channel.retarget(vec![handle]).unwrap();
        channel.set_path(&remote).unwrap();
        assert!(channel.is_watching());
        assert_eq!(channel.path(), Some(remote.as_str()));

        assert!(sink.pump());
        assert_eq!(y_names(&sink, ChannelId(1)), ["id"]);
        match notices.try_recv().unwrap() {
            Notice::Updated { summary, .. } => {
                assert_eq!(summary.rows, 2);
                assert_eq!(summary.value_range, Some((1.0, 4.0)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn failed_refresh_keeps_previous_data() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, notices) = context(dir.path());
        let (mut sink, handle) = PlotSink::new(SinkId(1), "Plot 1");
        let good = write(dir.path(), "a.csv", "t,v\n0,1\n");
        let odd = write(dir.path(), "deck.sp", "* netlist\n");

        let mut channel = DataChannel::open(ChannelId(2), ctx).unwrap();
        channel.retarget(vec![handle]).unwrap();
        channel.set_path(&good).unwrap();
        sink.pump();
        let before = Arc::clone(sink.get(ChannelId(2)).unwrap());

        let err = channel.set_path(&odd).unwrap_err();
        assert!(matches!(err, ChannelError::Unsupported { .. }));
        assert!(channel.is_watching());
        sink.pump();
        assert_eq!(sink.get(ChannelId(2)), Some(&before));

        let failed = notices.try_iter().find(|n| matches!(n, Notice::Failed { .. }));
        assert!(matches!(failed, Some(Notice::Failed { transient: false, .. })));
    }

    #[test]
    fn missing_remote_file_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _notices) = context(dir.path());
        let mut channel = DataChannel::open(ChannelId(3), ctx).unwrap();

        let err = channel.set_path("/no/such/run/out.csv").unwrap_err();
        assert!(err.is_transient());
        assert!(channel.is_watching());
    }

    #[test]
    fn blank_path_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _notices) = context(dir.path());
        let mut channel = DataChannel::open(ChannelId(4), ctx).unwrap();
        assert!(channel.set_path("   ").is_err());
        assert!(!channel.is_watching());
    }

    #[test]
    fn retarget_withdraws_from_old_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _notices) = context(dir.path());
        let (mut a, a_handle) = PlotSink::new(SinkId(1), "A");
        let (mut b, b_handle) = PlotSink::new(SinkId(2), "B");
        let remote = write(dir.path(), "x.csv", "t,v\n0,1\n");

        let mut channel = DataChannel::open(ChannelId(5), ctx).unwrap();
        channel.retarget(vec![a_handle]).unwrap();
        channel.set_path(&remote).unwrap();
        a.pump();
        assert!(a.contains(ChannelId(5)));

        channel.retarget(vec![b_handle]).unwrap();
        channel.flush().unwrap();
        a.pump();
        b.pump();
        assert!(!a.contains(ChannelId(5)));
        assert!(b.contains(ChannelId(5)));
    }

    #[test]
    fn teardown_cleans_sinks_and_staging() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _notices) = context(dir.path());
        let (mut sink, handle) = PlotSink::new(SinkId(1), "Plot 1");
        let remote = write(dir.path(), "x.csv", "t,v\n0,1\n");

        let mut channel = DataChannel::open(ChannelId(6), ctx).unwrap();
        channel.retarget(vec![handle]).unwrap();
        channel.set_path(&remote).unwrap();
        let staging = dir.path().join("staging/channel-6");
        assert!(staging.join("x.csv").is_file());

        channel.teardown();
        channel.teardown();
        assert!(!channel.is_watching());
        sink.pump();
        assert!(sink.is_empty());
        assert!(!staging.exists());
        assert!(matches!(channel.select(SeriesSelection::default()), Err(ChannelError::Disconnected)));
    }

    #[test]
    fn staging_is_separate_per_channel() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _notices) = context(dir.path());
        std::fs::create_dir_all(dir.path().join("run1")).unwrap();
        std::fs::create_dir_all(dir.path().join("run2")).unwrap();
        let one = write(&dir.path().join("run1"), "out.csv", "t,v\n0,1\n");
        let two = write(&dir.path().join("run2"), "out.csv", "t,v\n0,2\n");

        let mut first = DataChannel::open(ChannelId(7), ctx.clone()).unwrap();
        let mut second = DataChannel::open(ChannelId(8), ctx).unwrap();
        first.set_path(&one).unwrap();
        second.set_path(&two).unwrap();

        let staging = dir.path().join("staging");
        assert_eq!(std::fs::read_to_string(staging.join("channel-7/out.csv")).unwrap(), "t,v\n0,1\n");
        assert_eq!(std::fs::read_to_string(staging.join("channel-8/out.csv")).unwrap(), "t,v\n0,2\n");
    }

    #[test]
    fn selection_survives_refresh_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _notices) = context(dir.path());
        let (mut sink, handle) = PlotSink::new(SinkId(1), "Plot 1");
        let remote = write(dir.path(), "s.csv", "t,a,b\n0,1,2\n");

        let mut channel = DataChannel::open(ChannelId(9), ctx).unwrap();
        channel.retarget(vec![handle]).unwrap();
        channel.set_path(&remote).unwrap();
        channel
            .select(SeriesSelection {
                x: Some("t".into()),
                ys: Some(vec!["b".into()]),
                limit: None,
            })
            .unwrap();
        channel.flush().unwrap();
        sink.pump();
        assert_eq!(y_names(&sink, ChannelId(9)), ["b"]);

        std::fs::write(&remote, "t,c,b\n0,5,6\n1,7,8\n").unwrap();
        channel.set_path(&remote).unwrap();
        sink.pump();
        assert_eq!(y_names(&sink, ChannelId(9)), ["b"]);

        // Unknown x is refused; the old selection stays.
        channel
            .select(SeriesSelection { x: Some("nope".into()), ..SeriesSelection::default() })
            .unwrap();
        channel.flush().unwrap();
        sink.pump();
        assert_eq!(y_names(&sink, ChannelId(9)), ["b"]);
    }

    #[test]
    fn image_placement_and_opacity() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _notices) = context(dir.path());
        let (mut sink, handle) = PlotSink::new(SinkId(1), "Plot 1");
        let remote = dir.path().join("map.png");
        image::RgbaImage::from_pixel(4, 2, image::Rgba([0, 0, 0, 255]))
            .save(&remote)
            .unwrap();

        let mut channel = DataChannel::open(ChannelId(10), ctx).unwrap();
        channel.retarget(vec![handle]).unwrap();
        channel.set_path(&remote.display().to_string()).unwrap();
        sink.pump();
        let expected = Placement::for_image(&Image { width: 4, height: 2, rgba: Vec::new() });
        assert!(matches!(
            sink.get(ChannelId(10)).map(|d| d.as_ref()),
            Some(Dataset::Image { placement, opacity, .. }) if *placement == expected && *opacity == 1.0
        ));

        channel
            .place_image(Placement { x0: 10.0, y0: 5.0, x1: 0.0, y1: 0.0 }, 1.7)
            .unwrap();
        channel.flush().unwrap();
        sink.pump();
        match sink.get(ChannelId(10)).map(|d| d.as_ref()) {
            Some(Dataset::Image { placement, opacity, .. }) => {
                assert_eq!(*placement, Placement { x0: 0.0, y0: 0.0, x1: 10.0, y1: 5.0 });
                assert_eq!(*opacity, 1.0);
            }
            other => panic!("expected image, got {other:?}"),
        }
    }

    #[test]
    fn reload_refetches_current_file() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, notices) = context(dir.path());
        let remote = write(dir.path(), "r.csv", "t,v\n0,1\n");

        let mut channel = DataChannel::open(ChannelId(11), ctx).unwrap();
        channel.set_path(&remote).unwrap();

        std::fs::write(&remote, "t,v\n0,1\n1,2\n2,3\n").unwrap();
        channel.reload().unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            match notices.recv_deadline(deadline) {
                Ok(Notice::Updated { summary, .. }) if summary.rows == 3 => break,
                Ok(_) => continue,
                Err(e) => panic!("no refresh with the new rows: {e}"),
            }
        }
    }

    #[test]
    fn reload_burst_is_serial_and_coalesced() {
        let dir = tempfile::tempdir().unwrap();
        let (mut ctx, notices) = context(dir.path());
        let host = Arc::new(SlowHost::default());
        ctx.host = Arc::clone(&host) as Arc<dyn RemoteHost>;

        let mut channel = DataChannel::open(ChannelId(12), ctx).unwrap();
        channel.set_path("/sim/out.csv").unwrap();
        for _ in 0..10 {
            channel.reload().unwrap();
        }
        // Quiet for well over one download: the burst has been worked off.
        while notices.recv_timeout(Duration::from_millis(500)).is_ok() {}

        assert_eq!(host.max_in_flight.load(Ordering::SeqCst), 1);
        let downloads = host.downloads.load(Ordering::SeqCst);
        assert!((2..=4).contains(&downloads), "{downloads} downloads for 11 requests");
    }

    #[test]
    fn changes_from_replaced_watcher_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _notices) = context(dir.path());
        let mut worker = Worker::new(ChannelId(13), ctx);
        worker.generation = 2;
        let (tx, rx) = crossbeam_channel::unbounded();

        tx.send(event(1, "/old/a.csv")).unwrap();
        tx.send(event(2, "/new/b.csv")).unwrap();
        tx.send(event(2, "/new/c.csv")).unwrap();
        tx.send(event(1, "/old/d.csv")).unwrap();
        let latest = worker.latest_change(event(1, "/old/first.csv"), &rx).unwrap();
        assert_eq!(latest.path, "/new/c.csv");
        assert!(rx.is_empty());

        tx.send(event(1, "/old/e.csv")).unwrap();
        assert!(worker.latest_change(event(1, "/old/f.csv"), &rx).is_none());
        assert!(rx.is_empty());
    }

    #[test]
    fn full_notice_backlog_does_not_stall_refreshes() {
        let dir = tempfile::tempdir().unwrap();
        let (mut ctx, _notices) = context(dir.path());
        let (tx, _undrained) = crossbeam_channel::bounded(1);
        ctx.notices = tx;
        let (mut sink, handle) = PlotSink::new(SinkId(1), "Plot 1");
        let remote = write(dir.path(), "n.csv", "t,v\n0,1\n");

        let mut channel = DataChannel::open(ChannelId(14), ctx).unwrap();
        channel.retarget(vec![handle]).unwrap();
        channel.set_path(&remote).unwrap();
        channel.set_path(&remote).unwrap();

        std::fs::write(&remote, "t,v\n0,1\n1,2\n2,3\n").unwrap();
        channel.reload().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            sink.pump();
            if let Some(Dataset::Series { x, .. }) = sink.get(ChannelId(14)).map(|d| d.as_ref()) {
                if x.values.len() == 3 {
                    break;
                }
            }
            assert!(Instant::now() < deadline, "refresh stalled behind a full notice backlog");
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

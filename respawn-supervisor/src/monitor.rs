//! The supervision state machine.
//!
//! A [`Monitor`] is a cheap handle. All lifecycle state lives in a single
//! actor task which serializes caller requests, child exits and timer
//! expiries, so only one of them is ever acting on the child at a time.
//! Requests never fail at the call site: problems surface as `error` events
//! on the monitor's [`EventBus`].

use arc_swap::ArcSwap;
use bytes::Bytes;
use parking_lot::Mutex;
use respawn_core::policy::decay;
use respawn_core::{
    CommandParser, CommandSpec, Error, EventBus, EventStream, ExitContext, ExitStatus,
    LifecycleState, MonitorConfig, MonitorEvent, RestartDecision, Result, Signal, Snapshot, Uid,
    platform_parser,
};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::kill;
use crate::plugin::Plugin;
use crate::spawner::{SpawnedChild, Spawner};

/// How long an exit waits for the child's output to be forwarded.
const OUTPUT_DRAIN: Duration = Duration::from_millis(100);

/// Callback run with the monitor's snapshot after a start or a terminal exit.
pub type Hook = Arc<dyn Fn(&Snapshot) + Send + Sync>;

enum Request {
    Start { restart: bool },
    Stop { done: oneshot::Sender<()> },
    Restart,
    Kill { force_stop: bool },
    Send(Value),
    DecayRestarts,
}

enum Internal {
    Exited { generation: u64, status: ExitStatus },
    Message { generation: u64, value: Value },
    SpinSleepElapsed { token: u64 },
    GraceElapsed { generation: u64 },
}

struct Inner {
    uid: Uid,
    config: Arc<MonitorConfig>,
    bus: EventBus,
    snapshot: Arc<ArcSwap<Snapshot>>,
    requests: mpsc::UnboundedSender<Request>,
    plugins: Mutex<Vec<Arc<dyn Plugin>>>,
}

/// Handle to one supervised command. Clones share the same child.
///
/// Dropping the last handle shuts the monitor down and kills any live child.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

/// Non-owning handle for collaborators that must not keep a monitor alive.
#[derive(Clone)]
pub struct WeakMonitor {
    inner: Weak<Inner>,
}

impl WeakMonitor {
    pub fn upgrade(&self) -> Option<Monitor> {
        self.inner.upgrade().map(|inner| Monitor { inner })
    }
}

pub struct MonitorBuilder {
    spec: CommandSpec,
    config: MonitorConfig,
    parser: Option<Arc<dyn CommandParser>>,
    after_start: Option<Hook>,
    after_exit: Option<Hook>,
}

impl MonitorBuilder {
    /// Replaces the platform's command-line grammar.
    pub fn parser(mut self, parser: Arc<dyn CommandParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn after_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        self.after_start = Some(Arc::new(hook));
        self
    }

    pub fn after_exit<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        self.after_exit = Some(Arc::new(hook));
        self
    }

    /// Creates the monitor in `Idle`. Must be called inside a tokio runtime.
    pub fn build(self) -> Result<Monitor> {
        self.config.validate()?;
        let uid = match &self.config.uid {
            Some(uid) => Uid::new(uid.as_str())?,
            None => Uid::random(),
        };

        let config = Arc::new(self.config);
        let (command, args) = self.spec.into_parts(&config);
        let parser = self.parser.unwrap_or_else(platform_parser);
        let spawner = Spawner::new(command, args, parser, config.clone());

        let bus = EventBus::new();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let supervision = Supervision::new(
            uid.clone(),
            config.clone(),
            spawner,
            bus.clone(),
            self.after_start,
            self.after_exit,
            internal_tx,
        );
        let snapshot = supervision.snapshot.clone();
        tokio::spawn(supervision.run(request_rx, internal_rx));

        debug!(uid = %uid, "monitor created");
        Ok(Monitor {
            inner: Arc::new(Inner {
                uid,
                config,
                bus,
                snapshot,
                requests: request_tx,
                plugins: Mutex::new(Vec::new()),
            }),
        })
    }
}

impl Monitor {
    pub fn builder(spec: impl Into<CommandSpec>, config: MonitorConfig) -> MonitorBuilder {
        MonitorBuilder {
            spec: spec.into(),
            config,
            parser: None,
            after_start: None,
            after_exit: None,
        }
    }

    /// Monitor with the platform grammar and no hooks. Fails only on an
    /// invalid configuration.
    pub fn new(spec: impl Into<CommandSpec>, config: MonitorConfig) -> Result<Self> {
        Self::builder(spec, config).build()
    }

    fn request(&self, request: Request) -> &Self {
        if self.inner.requests.send(request).is_err() {
            warn!(uid = %self.inner.uid, "monitor task is gone; request dropped");
        }
        self
    }

    pub fn start(&self) -> &Self {
        self.start_with(false)
    }

    /// `restart` marks the start as a restart, which is reported as a
    /// `restart` event rather than `start`.
    pub fn start_with(&self, restart: bool) -> &Self {
        self.request(Request::Start { restart })
    }

    /// Kills the child for good and resolves once its exit has been handled,
    /// or right away when nothing is running. Plugins are detached first.
    pub async fn stop(&self) {
        let plugins: Vec<_> = self.inner.plugins.lock().clone();
        for plugin in plugins {
            plugin.detach(self).await;
        }

        let (done, finished) = oneshot::channel();
        self.request(Request::Stop { done });
        let _ = finished.await;
    }

    /// Kills and respawns the child regardless of the restart policy. On a
    /// stopped monitor this is a plain start reported as `restart`.
    pub fn restart(&self) -> &Self {
        self.request(Request::Restart)
    }

    /// Signals the child with the configured kill signal. With `force_stop`
    /// the exit is terminal; without it the restart policy decides.
    pub fn kill(&self, force_stop: bool) -> &Self {
        self.request(Request::Kill { force_stop })
    }

    /// Delivers `message` over the child's channel.
    pub fn send(&self, message: Value) -> &Self {
        self.request(Request::Send(message))
    }

    /// Halves the restart counter.
    pub fn decay_restarts(&self) -> &Self {
        self.request(Request::DecayRestarts)
    }

    /// Publishes a collaborator-defined event on this monitor's bus.
    pub fn emit(&self, name: impl Into<String>, payload: Value) -> &Self {
        self.inner.bus.publish(MonitorEvent::Custom {
            name: name.into(),
            payload,
        });
        self
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.snapshot.load_full()
    }

    pub fn is_running(&self) -> bool {
        self.inner.snapshot.load().running
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.snapshot.load().state
    }

    pub fn restarts(&self) -> u32 {
        self.inner.snapshot.load().restarts
    }

    pub fn uid(&self) -> &Uid {
        &self.inner.uid
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn subscribe(&self) -> EventStream {
        self.inner.bus.subscribe()
    }

    pub fn downgrade(&self) -> WeakMonitor {
        WeakMonitor {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Attaches a collaborator. It stays attached until [`Monitor::stop`].
    pub async fn use_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<&Self> {
        plugin.attach(self, &self.inner.config).await?;
        debug!(uid = %self.inner.uid, plugin = plugin.name(), "plugin attached");
        self.inner.plugins.lock().push(plugin);
        Ok(self)
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.inner.snapshot.load();
        f.debug_struct("Monitor")
            .field("uid", &self.inner.uid)
            .field("state", &snapshot.state)
            .field("pid", &snapshot.pid)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Progress {
    state: LifecycleState,
    running: bool,
    restarts: u32,
    pid: Option<u32>,
    ctime: Option<u64>,
}

fn compose_snapshot(
    uid: &Uid,
    config: &MonitorConfig,
    spawner: &Spawner,
    progress: &Progress,
) -> Snapshot {
    let (file, args) = Snapshot::split_args(spawner.args(), config.source_dir.as_deref());
    Snapshot {
        uid: uid.clone(),
        id: config.id.clone(),
        state: progress.state,
        running: progress.running,
        restarts: progress.restarts,
        command: spawner.command().to_string(),
        file,
        args,
        pid: progress.pid,
        supervisor_pid: std::process::id(),
        ctime: progress.ctime,
        silent: config.silent,
        cwd: config.working_dir(),
        env: config.env.clone(),
        source_dir: config.source_dir.clone(),
        pid_file: config.pid_file.clone(),
        log_file: config.log_file.clone(),
        out_file: config.out_file.clone(),
        err_file: config.err_file.clone(),
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

struct AttachedChild {
    pid: u32,
    generation: u64,
    alive: bool,
    messages: Option<mpsc::UnboundedSender<Value>>,
    waiter: Option<JoinHandle<()>>,
}

struct Supervision {
    uid: Uid,
    config: Arc<MonitorConfig>,
    spawner: Spawner,
    bus: EventBus,
    snapshot: Arc<ArcSwap<Snapshot>>,
    after_start: Option<Hook>,
    after_exit: Option<Hook>,
    internal_tx: mpsc::UnboundedSender<Internal>,

    progress: Progress,
    started_at: Option<Instant>,
    child: Option<AttachedChild>,
    generation: u64,
    force_stop: bool,
    force_restart: bool,
    /// A kill is in flight; its exit is followed by a `stop` event.
    kill_requested: bool,
    last_spinning: bool,
    spin_timer: Option<(u64, JoinHandle<()>)>,
    spin_token: u64,
    grace_timer: Option<JoinHandle<()>>,
    pending_stops: Vec<oneshot::Sender<()>>,
}

impl Supervision {
    fn new(
        uid: Uid,
        config: Arc<MonitorConfig>,
        spawner: Spawner,
        bus: EventBus,
        after_start: Option<Hook>,
        after_exit: Option<Hook>,
        internal_tx: mpsc::UnboundedSender<Internal>,
    ) -> Self {
        let initial = compose_snapshot(&uid, &config, &spawner, &Progress::default());
        Self {
            uid,
            config,
            spawner,
            bus,
            snapshot: Arc::new(ArcSwap::from_pointee(initial)),
            after_start,
            after_exit,
            internal_tx,
            progress: Progress::default(),
            started_at: None,
            child: None,
            generation: 0,
            force_stop: false,
            force_restart: false,
            kill_requested: false,
            last_spinning: false,
            spin_timer: None,
            spin_token: 0,
            grace_timer: None,
            pending_stops: Vec::new(),
        }
    }

    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            tokio::select! {
                biased;
                Some(event) = internal.recv() => self.handle_internal(event).await,
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => break,
                },
            }
        }
        self.shutdown().await;
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Start { restart } => self.start(restart).await,
            Request::Stop { done } => self.stop(done).await,
            Request::Restart => self.restart().await,
            Request::Kill { force_stop } => self.kill(force_stop).await,
            Request::Send(message) => self.send(message),
            Request::DecayRestarts => {
                let before = self.progress.restarts;
                self.progress.restarts = decay(before);
                debug!(uid = %self.uid, before, after = self.progress.restarts, "restart counter decayed");
                self.refresh_snapshot();
            }
        }
    }

    async fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Exited { generation, status } => self.on_exit(generation, status).await,
            Internal::Message { generation, value } => {
                if self.child.as_ref().is_some_and(|c| c.generation == generation) {
                    self.bus.publish(MonitorEvent::Message(value));
                }
            }
            Internal::SpinSleepElapsed { token } => {
                if self.spin_timer.as_ref().is_some_and(|(t, _)| *t == token) {
                    self.spin_timer = None;
                    self.start(true).await;
                }
            }
            Internal::GraceElapsed { generation } => self.on_grace_elapsed(generation).await,
        }
    }

    fn report(&self, err: Error) {
        error!(uid = %self.uid, "{}", err);
        self.bus.publish(MonitorEvent::error(err));
    }

    fn refresh_snapshot(&mut self) {
        self.progress.pid = self.child.as_ref().map(|c| c.pid);
        let snapshot = compose_snapshot(&self.uid, &self.config, &self.spawner, &self.progress);
        self.snapshot.store(Arc::new(snapshot));
    }

    fn set_state(&mut self, state: LifecycleState) {
        self.progress.state = state;
        self.refresh_snapshot();
    }

    fn live_child(&self) -> Option<&AttachedChild> {
        self.child.as_ref().filter(|c| c.alive)
    }

    fn run_hook(&self, hook: Option<&Hook>, name: &str) {
        if let Some(hook) = hook {
            let snapshot = self.snapshot.load_full();
            if std::panic::catch_unwind(AssertUnwindSafe(|| hook(&snapshot))).is_err() {
                error!(uid = %self.uid, hook = name, "hook panicked");
            }
        }
    }

    async fn start(&mut self, restart: bool) {
        if (self.progress.running && !restart) || self.live_child().is_some() {
            self.report(Error::AlreadyRunning);
            return;
        }
        self.cancel_spin_timer();

        let resuming = self.progress.running;
        let previous = self.progress.state;
        self.set_state(LifecycleState::Starting);

        match self.spawner.try_spawn().await {
            Ok(spawned) => self.attach(spawned, restart),
            Err(err) if resuming => {
                self.report(err);
                self.settle_stopped(self.last_spinning);
            }
            Err(err) => {
                if previous == LifecycleState::Idle {
                    self.set_state(LifecycleState::Idle);
                } else {
                    self.set_state(LifecycleState::Stopped);
                }
                self.report(err);
            }
        }
    }

    fn attach(&mut self, spawned: SpawnedChild, restart: bool) {
        let SpawnedChild {
            mut child,
            pid,
            #[cfg(unix)]
            channel,
        } = spawned;

        self.generation += 1;
        let generation = self.generation;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        #[cfg(unix)]
        let messages = channel.map(|channel| self.wire_channel(channel, generation));
        #[cfg(not(unix))]
        let messages = None;

        self.child = Some(AttachedChild {
            pid,
            generation,
            alive: true,
            messages,
            waiter: None,
        });
        self.started_at = Some(Instant::now());
        self.progress.ctime = Some(epoch_millis());
        self.progress.running = true;
        self.set_state(LifecycleState::Running);

        info!(
            uid = %self.uid,
            pid,
            restarts = self.progress.restarts,
            "{} child",
            if restart { "restarted" } else { "started" }
        );
        let snapshot = self.snapshot.load_full();
        self.bus.publish(if restart {
            MonitorEvent::Restart(snapshot)
        } else {
            MonitorEvent::Start(snapshot)
        });
        self.run_hook(self.after_start.as_ref(), "after_start");

        // Output is forwarded only once the start is announced.
        let mut pumps = Vec::with_capacity(2);
        if let Some(out) = stdout {
            pumps.push(tokio::spawn(pump(out, self.bus.clone(), MonitorEvent::Stdout)));
        }
        if let Some(err) = stderr {
            pumps.push(tokio::spawn(pump(err, self.bus.clone(), MonitorEvent::Stderr)));
        }

        let tx = self.internal_tx.clone();
        let uid = self.uid.clone();
        let waiter = tokio::spawn(async move {
            let status = match child.wait().await {
                Ok(status) => ExitStatus::from_std(status),
                Err(e) => {
                    error!(uid = %uid, pid, "Failed to wait for child: {}", e);
                    ExitStatus::new(None, None)
                }
            };
            // Descendants may keep the pipes open, so draining is bounded.
            for pump in pumps {
                let _ = tokio::time::timeout(OUTPUT_DRAIN, pump).await;
            }
            let _ = tx.send(Internal::Exited { generation, status });
        });
        if let Some(child) = self.child.as_mut() {
            child.waiter = Some(waiter);
        }
    }

    #[cfg(unix)]
    fn wire_channel(
        &self,
        channel: respawn_ipc::ParentChannel,
        generation: u64,
    ) -> mpsc::UnboundedSender<Value> {
        let (mut reader, mut writer) = channel.split();

        let tx = self.internal_tx.clone();
        let uid = self.uid.clone();
        tokio::spawn(async move {
            loop {
                match reader.next().await {
                    Ok(Some(value)) => {
                        if tx.send(Internal::Message { generation, value }).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(uid = %uid, "channel read ended: {}", e);
                        break;
                    }
                }
            }
        });

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
        let uid = self.uid.clone();
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if let Err(e) = writer.send(&message).await {
                    warn!(uid = %uid, "Failed to deliver message to child: {}", e);
                    break;
                }
            }
        });
        out_tx
    }

    async fn on_exit(&mut self, generation: u64, status: ExitStatus) {
        let Some(child) = self
            .child
            .as_mut()
            .filter(|c| c.generation == generation && c.alive)
        else {
            debug!(uid = %self.uid, generation, "ignoring exit of a replaced child");
            return;
        };
        child.alive = false;
        child.messages = None;
        let pid = child.pid;
        self.cancel_grace_timer();

        let spinning = self
            .started_at
            .is_some_and(|at| at.elapsed() < self.config.min_uptime);
        self.last_spinning = spinning;

        self.bus.publish(MonitorEvent::ExitCode {
            code: status.code(),
            signal: status.signal(),
        });
        self.progress.restarts = self.progress.restarts.saturating_add(1);
        self.set_state(LifecycleState::Exiting);

        let decision = RestartDecision::evaluate(&ExitContext {
            spinning,
            restarts: self.progress.restarts,
            max_restarts: self.config.max_restarts,
            spin_sleep: self.config.spin_sleep,
            force_stop: self.force_stop,
            force_restart: self.force_restart,
            clean_exit_ignored: self.config.ignore_clean_exit && status.success(),
        });
        info!(
            uid = %self.uid,
            pid,
            code = ?status.code(),
            signal = ?status.signal(),
            restarts = self.progress.restarts,
            spinning,
            ?decision,
            "child exited"
        );

        self.force_stop = false;
        self.force_restart = false;
        let kill_requested = std::mem::take(&mut self.kill_requested);

        match decision {
            RestartDecision::Stop => self.settle_stopped(spinning),
            RestartDecision::RestartAfter(delay) => self.schedule_restart(delay),
            RestartDecision::RestartNow => {}
        }
        if kill_requested {
            self.finish_stop();
        }
        if decision == RestartDecision::RestartNow {
            self.start(true).await;
        }
    }

    /// Terminal exit: nothing restarts until a caller starts again.
    fn settle_stopped(&mut self, spinning: bool) {
        self.cancel_spin_timer();
        self.force_stop = false;
        self.force_restart = false;
        self.progress.running = false;
        self.set_state(LifecycleState::Stopped);

        if spinning && self.config.spin_sleep.is_none() {
            warn!(uid = %self.uid, "Script restart attempt #{}: child is spinning, not restarting", self.progress.restarts);
        }
        let snapshot = self.snapshot.load_full();
        self.bus.publish(MonitorEvent::Exit { snapshot, spinning });
        self.run_hook(self.after_exit.as_ref(), "after_exit");
    }

    fn finish_stop(&mut self) {
        let snapshot = self.snapshot.load_full();
        self.bus.publish(MonitorEvent::Stop(snapshot));
        for done in self.pending_stops.drain(..) {
            let _ = done.send(());
        }
    }

    fn schedule_restart(&mut self, delay: Duration) {
        self.cancel_spin_timer();
        self.spin_token += 1;
        let token = self.spin_token;
        let tx = self.internal_tx.clone();
        warn!(uid = %self.uid, ?delay, "child is spinning, restarting after a pause");

        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Internal::SpinSleepElapsed { token });
        });
        self.spin_timer = Some((token, timer));
    }

    fn cancel_spin_timer(&mut self) {
        if let Some((_, timer)) = self.spin_timer.take() {
            timer.abort();
        }
    }

    fn cancel_grace_timer(&mut self) {
        if let Some(timer) = self.grace_timer.take() {
            timer.abort();
        }
    }

    async fn kill(&mut self, force_stop: bool) {
        let Some((pid, generation)) = self.live_child().map(|c| (c.pid, c.generation)) else {
            if force_stop && self.spin_timer.is_some() {
                // only a delayed restart is pending
                self.settle_stopped(self.last_spinning);
                self.finish_stop();
            } else {
                self.report(Error::not_running("stop"));
            }
            return;
        };

        if force_stop {
            self.force_stop = true;
            if let Some(grace) = self.config.kill_grace {
                self.arm_grace_timer(grace, generation);
            }
        }

        match kill::terminate(pid, self.config.kill_tree, self.config.kill_signal).await {
            Ok(()) => self.kill_requested = true,
            Err(err) => self.signal_failed(err),
        }
    }

    /// The child was not signalled, so its next exit is an ordinary one.
    fn signal_failed(&mut self, err: Error) {
        self.force_stop = false;
        self.force_restart = false;
        self.cancel_grace_timer();
        self.report(err);
    }

    fn arm_grace_timer(&mut self, grace: Duration, generation: u64) {
        self.cancel_grace_timer();
        let tx = self.internal_tx.clone();
        self.grace_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = tx.send(Internal::GraceElapsed { generation });
        }));
    }

    async fn on_grace_elapsed(&mut self, generation: u64) {
        self.grace_timer = None;
        let Some(pid) = self
            .live_child()
            .filter(|c| c.generation == generation)
            .map(|c| c.pid)
        else {
            return;
        };
        warn!(uid = %self.uid, pid, "child outlived its kill grace period, sending {}", Signal::Kill);
        if let Err(err) = kill::terminate(pid, self.config.kill_tree, Signal::Kill).await {
            self.report(err);
        }
    }

    async fn stop(&mut self, done: oneshot::Sender<()>) {
        self.pending_stops.push(done);
        self.kill(true).await;
        if !self.kill_requested {
            // nothing left to wait for
            for done in self.pending_stops.drain(..) {
                let _ = done.send(());
            }
        }
    }

    async fn restart(&mut self) {
        if !self.progress.running || self.live_child().is_none() {
            // stopped, or a delayed restart is pending; skip the wait
            self.start(true).await;
        } else {
            self.force_restart = true;
            self.kill(false).await;
        }
    }

    fn send(&mut self, message: Value) {
        let outcome = match self.live_child() {
            None => Err(Error::not_running("send to")),
            Some(AttachedChild {
                messages: Some(tx), ..
            }) => tx
                .send(message)
                .map_err(|_| Error::ChannelUnavailable("channel closed".to_string())),
            Some(_) => Err(Error::ChannelUnavailable(
                "child was not started with a message channel".to_string(),
            )),
        };
        if let Err(err) = outcome {
            self.report(err);
        }
    }

    async fn shutdown(&mut self) {
        self.cancel_spin_timer();
        self.cancel_grace_timer();
        if let Some(child) = self.child.take() {
            if child.alive {
                debug!(uid = %self.uid, pid = child.pid, "monitor dropped, killing child");
                if let Err(e) = kill::terminate(child.pid, self.config.kill_tree, Signal::Kill).await {
                    debug!("Failed to kill child on shutdown: {}", e);
                }
            }
            if let Some(waiter) = child.waiter {
                waiter.abort();
            }
        }
        for done in self.pending_stops.drain(..) {
            let _ = done.send(());
        }
    }
}

async fn pump<R>(mut reader: R, bus: EventBus, wrap: fn(Bytes) -> MonitorEvent)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => bus.publish(wrap(Bytes::copy_from_slice(&buf[..n]))),
            Err(e) => {
                debug!("output stream closed: {}", e);
                break;
            }
        }
    }
}

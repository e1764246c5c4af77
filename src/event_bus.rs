//! Event multiplexer.
//!
//! Fan-in from every adapter into one ordered stream, fan-out to every live
//! panel:
//! - Two input lanes: the generic bounded queue ([`EventSender`]) and the
//!   window-manager lane. A single broadcast task drains both, WM lane first,
//!   so every panel observes the same total order.
//! - Command kinds never reach panels. They go to a command task that hands
//!   them to a [`CommandSink`] one at a time.
//! - Each panel has its own bounded queue and delivery task. Under
//!   [`QueuePolicy::Block`] a full queue blocks the broadcast task; under
//!   [`QueuePolicy::DropOldest`] the slow panel skips its oldest events.
//!
//! The subscriber set is fixed when the multiplexer starts. Changing it means
//! stopping this multiplexer and starting a new one.

use crate::config::{QueueConfig, QueuePolicy};
use crate::error::HostError;
use crate::shutdown::{Quit, QuitSignal};
use capy_events::Event;
use log::{debug, info, warn};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Command kinds waiting for the router.
pub const COMMAND_QUEUE_DEPTH: usize = 32;

/// A live receiver of broadcast events.
pub trait Subscriber: Send + Sync + 'static {
    fn id(&self) -> &str;

    /// Deliver one event. Resolves once the receiver has accepted it.
    fn deliver(&self, event: Arc<Event>) -> impl Future<Output = Result<(), HostError>> + Send;
}

/// Where intercepted command events end up.
pub trait CommandSink: Send + Sync + 'static {
    fn dispatch(&self, event: Arc<Event>) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, thiserror::Error)]
#[error("multiplexer stopped, {0} lane closed")]
pub struct Closed(&'static str);

/// Producer handle for one input lane.
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: mpsc::Sender<Arc<Event>>,
    lane: &'static str,
}

impl EventSender {
    /// Enqueue, waiting for room.
    pub async fn submit(&self, event: Event) -> Result<(), Closed> {
        self.tx
            .send(Arc::new(event))
            .await
            .map_err(|_| Closed(self.lane))
    }

    /// Enqueue from a plain thread. Must not be called on the runtime.
    pub fn blocking_submit(&self, event: Event) -> Result<(), Closed> {
        self.tx
            .blocking_send(Arc::new(event))
            .map_err(|_| Closed(self.lane))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

enum PanelTx {
    Block(mpsc::Sender<Arc<Event>>),
    DropOldest(broadcast::Sender<Arc<Event>>),
}

enum PanelRx {
    Block(mpsc::Receiver<Arc<Event>>),
    DropOldest(broadcast::Receiver<Arc<Event>>),
}

fn panel_queue(policy: QueuePolicy, depth: usize) -> (PanelTx, PanelRx) {
    match policy {
        QueuePolicy::Block => {
            let (tx, rx) = mpsc::channel(depth);
            (PanelTx::Block(tx), PanelRx::Block(rx))
        }
        QueuePolicy::DropOldest => {
            let (tx, rx) = broadcast::channel(depth);
            (PanelTx::DropOldest(tx), PanelRx::DropOldest(rx))
        }
    }
}

impl PanelTx {
    /// False once the delivery task is gone.
    async fn push(&self, event: Arc<Event>) -> bool {
        match self {
            PanelTx::Block(tx) => tx.send(event).await.is_ok(),
            PanelTx::DropOldest(tx) => tx.send(event).is_ok(),
        }
    }
}

impl PanelRx {
    async fn recv(&mut self, panel: &str) -> Option<Arc<Event>> {
        match self {
            PanelRx::Block(rx) => rx.recv().await,
            PanelRx::DropOldest(rx) => loop {
                match rx.recv().await {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Panel {} lagging, skipped {} oldest events", panel, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
        }
    }
}

/// Not yet running multiplexer. Adapters can be handed senders before
/// [`start`](Self::start); their events wait in the input queues.
pub struct Multiplexer {
    queue: QueueConfig,
    input_tx: mpsc::Sender<Arc<Event>>,
    input_rx: mpsc::Receiver<Arc<Event>>,
    wm_tx: mpsc::Sender<Arc<Event>>,
    wm_rx: mpsc::Receiver<Arc<Event>>,
}

impl Multiplexer {
    pub fn new(queue: &QueueConfig) -> Self {
        let (input_tx, input_rx) = mpsc::channel(queue.input_depth.max(1));
        let (wm_tx, wm_rx) = mpsc::channel(queue.input_depth.max(1));
        Self {
            queue: queue.clone(),
            input_tx,
            input_rx,
            wm_tx,
            wm_rx,
        }
    }

    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.input_tx.clone(),
            lane: "input",
        }
    }

    pub fn wm_sender(&self) -> EventSender {
        EventSender {
            tx: self.wm_tx.clone(),
            lane: "wm",
        }
    }

    /// Start broadcasting to `subscribers` until stopped or `quit` is set.
    pub fn start<S, C>(self, subscribers: Vec<Arc<S>>, commands: Arc<C>, quit: QuitSignal) -> MuxHandle
    where
        S: Subscriber,
        C: CommandSink,
    {
        let stop = Quit::new();
        let depth = self.queue.panel_depth.max(1);
        let mut workers = Vec::with_capacity(subscribers.len() + 1);
        let mut queues = Vec::with_capacity(subscribers.len());

        for subscriber in subscribers {
            let (tx, rx) = panel_queue(self.queue.policy, depth);
            queues.push((subscriber.id().to_string(), tx));
            workers.push(tokio::spawn(delivery_loop(
                subscriber,
                rx,
                stop.signal(),
                quit.clone(),
            )));
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        workers.push(tokio::spawn(command_loop(
            commands,
            command_rx,
            stop.signal(),
            quit.clone(),
        )));

        info!(
            "Multiplexer running: {} panels, {:?} policy, depth {}",
            queues.len(),
            self.queue.policy,
            depth
        );

        // Dropping our own senders lets the lanes close with their producers.
        let Multiplexer {
            input_rx, wm_rx, ..
        } = self;

        let broadcast = tokio::spawn(broadcast_loop(
            input_rx,
            wm_rx,
            queues,
            command_tx,
            stop.signal(),
            quit,
        ));

        MuxHandle {
            stop,
            broadcast,
            workers,
        }
    }
}

/// Running multiplexer.
pub struct MuxHandle {
    stop: Quit,
    broadcast: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl MuxHandle {
    /// Stop consuming input and wait for the broadcast task to finish.
    /// Events not yet delivered are discarded. Producers see [`Closed`].
    pub async fn stop(self) {
        self.stop.trigger();
        let _ = self.broadcast.await;
        for worker in self.workers {
            worker.abort();
            let _ = worker.await;
        }
        debug!("Multiplexer stopped");
    }
}

async fn broadcast_loop(
    mut input: mpsc::Receiver<Arc<Event>>,
    mut wm: mpsc::Receiver<Arc<Event>>,
    queues: Vec<(String, PanelTx)>,
    commands: mpsc::Sender<Arc<Event>>,
    mut stop: QuitSignal,
    mut quit: QuitSignal,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = stop.wait() => break,
            _ = quit.wait() => break,
            Some(event) = wm.recv() => event,
            Some(event) = input.recv() => event,
        };

        if event.kind().is_command() {
            debug!("Routing {} to command router", event.kind());
            tokio::select! {
                biased;
                _ = stop.wait() => break,
                _ = quit.wait() => break,
                sent = commands.send(event) => {
                    if sent.is_err() {
                        warn!("Command task gone, dropping command");
                    }
                }
            }
            continue;
        }

        let fan_out = async {
            for (panel, queue) in &queues {
                if !queue.push(Arc::clone(&event)).await {
                    debug!("Panel {} queue closed", panel);
                }
            }
        };

        tokio::select! {
            biased;
            _ = stop.wait() => break,
            _ = quit.wait() => break,
            _ = fan_out => {}
        }
    }
}

async fn delivery_loop<S: Subscriber>(
    subscriber: Arc<S>,
    mut rx: PanelRx,
    mut stop: QuitSignal,
    mut quit: QuitSignal,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = stop.wait() => break,
            _ = quit.wait() => break,
            event = rx.recv(subscriber.id()) => match event {
                Some(event) => event,
                None => break,
            },
        };

        if let Err(e) = subscriber.deliver(Arc::clone(&event)).await {
            warn!(
                "Dropping {} for panel {}: {}",
                event.kind(),
                subscriber.id(),
                e
            );
        }
    }
}

async fn command_loop<C: CommandSink>(
    sink: Arc<C>,
    mut rx: mpsc::Receiver<Arc<Event>>,
    mut stop: QuitSignal,
    mut quit: QuitSignal,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = stop.wait() => break,
            _ = quit.wait() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        sink.dispatch(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capy_events::{EventKind, EventPayload, ExecRequest, Hud, WorkspaceChange};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    struct Recorder {
        id: String,
        tx: mpsc::UnboundedSender<Arc<Event>>,
    }

    impl Recorder {
        fn new(id: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<Arc<Event>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    id: id.to_string(),
                    tx,
                }),
                rx,
            )
        }
    }

    impl Subscriber for Recorder {
        fn id(&self) -> &str {
            &self.id
        }

        async fn deliver(&self, event: Arc<Event>) -> Result<(), HostError> {
            let _ = self.tx.send(event);
            Ok(())
        }
    }

    /// Accepts its first event and never returns.
    struct Frozen;

    impl Subscriber for Frozen {
        fn id(&self) -> &str {
            "frozen"
        }

        async fn deliver(&self, _event: Arc<Event>) -> Result<(), HostError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    enum Panel {
        Recorder(Arc<Recorder>),
        Frozen(Arc<Frozen>),
    }

    impl Subscriber for Panel {
        fn id(&self) -> &str {
            match self {
                Panel::Recorder(r) => r.id(),
                Panel::Frozen(f) => f.id(),
            }
        }

        async fn deliver(&self, event: Arc<Event>) -> Result<(), HostError> {
            match self {
                Panel::Recorder(r) => r.deliver(event).await,
                Panel::Frozen(f) => f.deliver(event).await,
            }
        }
    }

    struct Commands {
        tx: mpsc::UnboundedSender<Arc<Event>>,
    }

    impl CommandSink for Commands {
        async fn dispatch(&self, event: Arc<Event>) {
            let _ = self.tx.send(event);
        }
    }

    fn commands() -> (Arc<Commands>, mpsc::UnboundedReceiver<Arc<Event>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Commands { tx }), rx)
    }

    fn workspace(name: &str) -> Event {
        Event::new(EventPayload::WorkspaceChanged(WorkspaceChange {
            id: 1,
            name: name.to_string(),
            monitor: "DP-1".to_string(),
        }))
    }

    fn name_of(event: &Event) -> String {
        match event.payload() {
            EventPayload::WorkspaceChanged(ws) => ws.name.clone(),
            EventPayload::Hud(hud) => hud.title.clone(),
            other => format!("{:?}", other.kind()),
        }
    }

    async fn collect(rx: &mut mpsc::UnboundedReceiver<Arc<Event>>, n: usize) -> Vec<String> {
        let mut names = Vec::with_capacity(n);
        while names.len() < n {
            let event = tokio::time::timeout(WAIT, rx.recv())
                .await
                .expect("timed out waiting for delivery")
                .expect("recorder closed");
            names.push(name_of(&event));
        }
        names
    }

    fn queue(policy: QueuePolicy, panel_depth: usize) -> QueueConfig {
        QueueConfig {
            input_depth: 256,
            panel_depth,
            policy,
        }
    }

    #[tokio::test]
    async fn every_panel_sees_the_same_order() {
        let quit = Quit::new();
        let mux = Multiplexer::new(&QueueConfig::default());
        let sender = mux.sender();
        let (a, mut a_rx) = Recorder::new("a");
        let (b, mut b_rx) = Recorder::new("b");
        let (sink, _cmd_rx) = commands();
        let handle = mux.start(vec![a, b], sink, quit.signal());

        let expected: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        for name in &expected {
            sender.submit(workspace(name)).await.unwrap();
        }

        assert_eq!(collect(&mut a_rx, 50).await, expected);
        assert_eq!(collect(&mut b_rx, 50).await, expected);
        handle.stop().await;
    }

    #[tokio::test]
    async fn workspace_change_reaches_both_panels_before_next_event() {
        let quit = Quit::new();
        let mux = Multiplexer::new(&QueueConfig::default());
        let sender = mux.sender();
        let wm = mux.wm_sender();
        let (a, mut a_rx) = Recorder::new("a");
        let (b, mut b_rx) = Recorder::new("b");
        let (sink, _cmd_rx) = commands();
        let handle = mux.start(vec![a, b], sink, quit.signal());

        wm.submit(workspace("2")).await.unwrap();
        // Submitted only after the first is broadcast, so ordering is fixed.
        tokio::time::sleep(Duration::from_millis(20)).await;
        sender
            .submit(Event::new(EventPayload::Hud(Hud {
                title: "volume".to_string(),
                ..Default::default()
            })))
            .await
            .unwrap();

        assert_eq!(collect(&mut a_rx, 2).await, vec!["2", "volume"]);
        assert_eq!(collect(&mut b_rx, 2).await, vec!["2", "volume"]);
        handle.stop().await;
    }

    #[tokio::test]
    async fn lanes_merge_into_one_order_for_all_panels() {
        let quit = Quit::new();
        let mux = Multiplexer::new(&QueueConfig::default());
        let sender = mux.sender();
        let wm = mux.wm_sender();
        let (a, mut a_rx) = Recorder::new("a");
        let (b, mut b_rx) = Recorder::new("b");
        let (sink, _cmd_rx) = commands();

        for i in 0..20 {
            let lane = if i % 2 == 0 { &wm } else { &sender };
            lane.submit(workspace(&i.to_string())).await.unwrap();
        }
        let handle = mux.start(vec![a, b], sink, quit.signal());

        let seen_a = collect(&mut a_rx, 20).await;
        let seen_b = collect(&mut b_rx, 20).await;
        assert_eq!(seen_a, seen_b);

        // Within a lane, submission order holds.
        let evens: Vec<_> = seen_a
            .iter()
            .filter(|n| n.parse::<u32>().unwrap() % 2 == 0)
            .cloned()
            .collect();
        let expected: Vec<String> = (0..20).step_by(2).map(|i: u32| i.to_string()).collect();
        assert_eq!(evens, expected);
        handle.stop().await;
    }

    #[tokio::test]
    async fn frozen_panel_does_not_starve_others_within_queue_depth() {
        let depth = 8;
        let quit = Quit::new();
        let mux = Multiplexer::new(&queue(QueuePolicy::Block, depth));
        let sender = mux.sender();
        let (live, mut live_rx) = Recorder::new("live");
        let (sink, _cmd_rx) = commands();
        let panels = vec![
            Arc::new(Panel::Frozen(Arc::new(Frozen))),
            Arc::new(Panel::Recorder(live)),
        ];
        let handle = mux.start(panels, sink, quit.signal());

        let expected: Vec<String> = (0..depth).map(|i| i.to_string()).collect();
        for name in &expected {
            sender.submit(workspace(name)).await.unwrap();
        }

        assert_eq!(collect(&mut live_rx, depth).await, expected);
        handle.stop().await;
    }

    #[tokio::test]
    async fn drop_oldest_never_stalls_on_a_frozen_panel() {
        let quit = Quit::new();
        let mux = Multiplexer::new(&queue(QueuePolicy::DropOldest, 2));
        let sender = mux.sender();
        let (live, mut live_rx) = Recorder::new("live");
        let (sink, _cmd_rx) = commands();
        let panels = vec![
            Arc::new(Panel::Frozen(Arc::new(Frozen))),
            Arc::new(Panel::Recorder(live)),
        ];
        let handle = mux.start(panels, sink, quit.signal());

        for i in 0..100 {
            sender.submit(workspace(&i.to_string())).await.unwrap();
        }

        // The live panel may skip some of its own backlog but always gets the
        // newest event, and what it does get stays in order.
        let mut seen = Vec::new();
        loop {
            let event = tokio::time::timeout(WAIT, live_rx.recv())
                .await
                .unwrap()
                .unwrap();
            let n: u32 = name_of(&event).parse().unwrap();
            seen.push(n);
            if n == 99 {
                break;
            }
        }
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        handle.stop().await;
    }

    #[tokio::test]
    async fn commands_are_intercepted() {
        let quit = Quit::new();
        let mux = Multiplexer::new(&QueueConfig::default());
        let sender = mux.sender();
        let (a, mut a_rx) = Recorder::new("a");
        let (sink, mut cmd_rx) = commands();
        let handle = mux.start(vec![a], sink, quit.signal());

        sender
            .submit(Event::new(EventPayload::ExecRequested(ExecRequest {
                command: "foot".to_string(),
            })))
            .await
            .unwrap();
        sender.submit(workspace("3")).await.unwrap();

        let command = tokio::time::timeout(WAIT, cmd_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(command.kind(), EventKind::ExecRequested);
        assert_eq!(collect(&mut a_rx, 1).await, vec!["3"]);
        assert!(a_rx.try_recv().is_err());
        handle.stop().await;
    }

    #[tokio::test]
    async fn stopped_multiplexer_refuses_input() {
        let quit = Quit::new();
        let mux = Multiplexer::new(&QueueConfig::default());
        let sender = mux.sender();
        let (a, _a_rx) = Recorder::new("a");
        let (sink, _cmd_rx) = commands();
        let handle = mux.start(vec![a], sink, quit.signal());

        handle.stop().await;
        assert!(sender.submit(workspace("late")).await.is_err());
        assert!(sender.is_closed());
    }

    #[tokio::test]
    async fn quit_ends_broadcast() {
        let quit = Quit::new();
        let mux = Multiplexer::new(&QueueConfig::default());
        let sender = mux.sender();
        let (a, _a_rx) = Recorder::new("a");
        let (sink, _cmd_rx) = commands();
        let handle = mux.start(vec![a], sink, quit.signal());

        quit.trigger();
        tokio::time::timeout(WAIT, handle.stop()).await.unwrap();
        assert!(sender.is_closed());
    }
}

//! rosbridge-style WebSocket bridge between the [`TopicRegistry`] and a
//! remote client.
//!
//! [`BridgeServer`]:
//!
//! 1. **Routes inbound frames** – `{"op":"publish","topic":...,"msg":...}`
//!    text frames whose topic was registered with
//!    [`BridgeServer::accept_inbound`] are published onto that topic.
//!    Malformed frames are logged and dropped; unknown ops are ignored; the
//!    connection always stays open.
//!
//! 2. **Forwards outbound topics** – every topic registered with
//!    [`BridgeServer::advertise`] gets a subscriber that frames each publish as
//!    a `publish` op and hands it to the single bound client.
//!
//! At most one client is bound at a time ([`ClientLink`]).  A newly accepted
//! connection replaces the previous binding (last-connected-wins) and the
//! displaced client is sent a close frame.  Outbound delivery never blocks the
//! publisher and is latest-value only: each connection has an [`outbox`]
//! holding one pending frame per topic, drained by a writer task, so a slow
//! client skips stale frames instead of building a backlog.  When no client is
//! bound, or delivery fails, the publish degrades to a log line.
//!
//! [`outbox`]: crate::outbox

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use c3sim_types::{BridgeFrame, OP_PUBLISH, SimError};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::outbox::{Offer, OutboxClosed, OutboxSender, outbox};
use crate::topic::{Topic, TopicRegistry};

/// rosbridge control ops that clients send around publishes.  They carry no
/// data for the simulator and are accepted as no-ops.
const CONTROL_OPS: [&str; 4] = ["advertise", "unadvertise", "subscribe", "unsubscribe"];

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Connection binding
// ---------------------------------------------------------------------------

/// Outbound half of an accepted client: a handle onto its outbox.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    peer: SocketAddr,
    tx: OutboxSender,
}

impl Connection {
    /// Wrap the sending side of a client's outbox.
    pub fn new(peer: SocketAddr, tx: OutboxSender) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            tx,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

/// Result of handing one frame to the bound client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The frame was queued for the client.
    Sent,
    /// The frame overwrote an undelivered frame of the same topic.
    Superseded,
    /// No client is bound; the publish stayed local.
    NoConnection,
    /// The message could not be framed.
    Dropped,
    /// The client is gone; the binding has been cleared.
    Failed,
}

/// The single active outbound sink.  Clone it cheaply – all clones share the
/// same slot.
#[derive(Clone, Default)]
pub struct ClientLink {
    slot: Arc<Mutex<Option<Connection>>>,
}

impl ClientLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `connection`, returning the connection it displaced, if any.
    pub fn bind(&self, connection: Connection) -> Option<Connection> {
        lock(&self.slot).replace(connection)
    }

    /// Clear the binding if it still belongs to connection `id`.
    ///
    /// Returns `true` when the binding was cleared.  A connection that has
    /// already been displaced leaves the newer binding untouched.
    pub fn release(&self, id: u64) -> bool {
        let mut slot = lock(&self.slot);
        if slot.as_ref().is_some_and(|c| c.id == id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub fn is_bound(&self) -> bool {
        lock(&self.slot).is_some()
    }

    /// Address of the bound client.
    pub fn peer(&self) -> Option<SocketAddr> {
        lock(&self.slot).as_ref().map(Connection::peer)
    }

    /// Frame `msg` as a `publish` on `topic` and make it the bound client's
    /// pending frame for that topic.
    ///
    /// Never blocks and never fails: every outcome is reported through the
    /// returned [`Delivery`] and a log line.  A closed outbox clears the
    /// binding so later publishes keep degrading until a new client attaches.
    pub fn send_frame(&self, topic: &str, msg: &Value) -> Delivery {
        let text = match BridgeFrame::publish(topic, msg.clone()).to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!(topic, error = %e, "outbound frame could not be serialised");
                return Delivery::Dropped;
            }
        };

        let mut slot = lock(&self.slot);
        let Some(connection) = slot.as_ref() else {
            debug!(topic, "no client bound; publish kept local");
            return Delivery::NoConnection;
        };

        match connection.tx.offer(topic, text) {
            Ok(Offer::Queued) => Delivery::Sent,
            Ok(Offer::Replaced) => {
                debug!(peer = %connection.peer, topic, "client behind; stale frame replaced");
                Delivery::Superseded
            }
            Err(OutboxClosed) => {
                warn!(peer = %connection.peer, topic, "send to client failed; binding cleared");
                *slot = None;
                Delivery::Failed
            }
        }
    }
}

impl std::fmt::Debug for ClientLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientLink").field("peer", &self.peer()).finish()
    }
}

// ---------------------------------------------------------------------------
// BridgeServer
// ---------------------------------------------------------------------------

/// What happened to one inbound text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Published onto the named topic.
    Routed(String),
    /// Well-formed but not acted on (control op, unknown op, unrouted topic).
    Ignored,
    /// Not a valid frame; dropped.
    Malformed,
}

/// Bridge between the topic registry and the bound WebSocket client.
#[derive(Clone)]
pub struct BridgeServer {
    registry: TopicRegistry,
    link: ClientLink,
    inbound: HashMap<String, String>,
    advertised: HashSet<String>,
}

impl BridgeServer {
    /// Create a bridge over `registry` with no routed topics.
    pub fn new(registry: TopicRegistry) -> Self {
        Self {
            registry,
            link: ClientLink::new(),
            inbound: HashMap::new(),
            advertised: HashSet::new(),
        }
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    pub fn link(&self) -> &ClientLink {
        &self.link
    }

    /// Route client `publish` frames on `name` into the registry.
    pub fn accept_inbound(&mut self, name: &str, type_label: &str) -> Arc<Topic> {
        self.inbound.insert(name.to_string(), type_label.to_string());
        self.registry.get_or_create(name, type_label)
    }

    /// Forward every publish on `name` to the bound client.
    ///
    /// Advertising the same topic twice is a no-op, so each publish produces
    /// exactly one frame.
    pub fn advertise(&mut self, name: &str, type_label: &str) -> Arc<Topic> {
        let topic = self.registry.get_or_create(name, type_label);
        if self.advertised.insert(name.to_string()) {
            let link = self.link.clone();
            let topic_name = name.to_string();
            topic.subscribe(move |msg| {
                link.send_frame(&topic_name, msg);
            });
        }
        topic
    }

    /// Decode one inbound text frame and act on it.
    pub fn handle_incoming_text(&self, text: &str) -> InboundOutcome {
        let frame = match BridgeFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "malformed inbound frame dropped");
                return InboundOutcome::Malformed;
            }
        };

        match frame.op.as_str() {
            OP_PUBLISH => {
                let (Some(topic), Some(msg)) = (frame.topic, frame.msg) else {
                    warn!("publish frame without topic or msg dropped");
                    return InboundOutcome::Malformed;
                };
                match self.inbound.get(&topic) {
                    Some(type_label) => {
                        self.registry.get_or_create(&topic, type_label).publish(msg);
                        InboundOutcome::Routed(topic)
                    }
                    None => {
                        debug!(topic = %topic, "publish on unrouted topic ignored");
                        InboundOutcome::Ignored
                    }
                }
            }
            op if CONTROL_OPS.contains(&op) => {
                debug!(op, topic = ?frame.topic, "control op accepted");
                InboundOutcome::Ignored
            }
            op => {
                debug!(op, "unknown op ignored");
                InboundOutcome::Ignored
            }
        }
    }

    // -----------------------------------------------------------------------
    // Socket server
    // -----------------------------------------------------------------------

    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Transport`] if the address cannot be bound.
    pub async fn bind(addr: SocketAddr) -> Result<TcpListener, SimError> {
        TcpListener::bind(addr)
            .await
            .map_err(|e| SimError::Transport(format!("bind error on {addr}: {e}")))
    }

    /// Bind `addr` and serve clients until the task is dropped.
    pub async fn run(self, addr: SocketAddr) -> Result<(), SimError> {
        let listener = Self::bind(addr).await?;
        self.serve(listener).await
    }

    /// Accept clients on `listener` forever.  Each client is handled on its
    /// own task; accept errors are logged and the loop continues.
    pub async fn serve(self, listener: TcpListener) -> Result<(), SimError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "bridge listening");
        }
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let bridge = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = bridge.handle_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept error");
                }
            }
        }
    }

    async fn handle_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), SimError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| SimError::Transport(format!("ws handshake from {peer}: {e}")))?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let (tx, mut rx) = outbox();
        let connection = Connection::new(peer, tx);
        let id = connection.id();
        match self.link.bind(connection) {
            Some(previous) => {
                info!(peer = %peer, displaced = %previous.peer(), "client bound; previous client displaced");
            }
            None => info!(peer = %peer, "client bound"),
        }

        // Ends when the outbox sender is dropped (displaced or released) or
        // the socket rejects a write.
        let writer = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    debug!(peer = %peer, error = %e, "ws write failed");
                    return;
                }
            }
            let _ = ws_tx.close().await;
        });

        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    self.handle_incoming_text(text.as_str());
                }
                Ok(Message::Binary(_)) => warn!(peer = %peer, "binary frame ignored"),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(peer = %peer, error = %e, "ws read failed");
                    break;
                }
            }
        }

        if self.link.release(id) {
            info!(peer = %peer, "client disconnected; binding cleared");
        } else {
            info!(peer = %peer, "displaced client disconnected");
        }
        writer.abort();
        Ok(())
    }
}

impl std::fmt::Debug for BridgeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeServer")
            .field("link", &self.link)
            .field("inbound", &self.inbound.keys().collect::<Vec<_>>())
            .field("advertised", &self.advertised)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::OutboxReceiver;
    use serde_json::json;
    use std::time::Duration;
    use tokio_tungstenite::connect_async;

    const CMD_VEL: &str = "/juliet/cmd_vel";
    const ODOM: &str = "/juliet/odom";

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    fn make_bridge() -> BridgeServer {
        let mut bridge = BridgeServer::new(TopicRegistry::new());
        bridge.accept_inbound(CMD_VEL, "geometry_msgs/Twist");
        bridge
    }

    fn bind_test_client(link: &ClientLink) -> (u64, OutboxReceiver) {
        let (tx, rx) = outbox();
        let connection = Connection::new(peer(), tx);
        let id = connection.id();
        link.bind(connection);
        (id, rx)
    }

    #[test]
    fn inbound_publish_updates_command_topic() {
        let bridge = make_bridge();
        let outcome = bridge.handle_incoming_text(
            r#"{"op":"publish","topic":"/juliet/cmd_vel","msg":{"linear":{"x":0.2},"angular":{"z":0.0}}}"#,
        );
        assert_eq!(outcome, InboundOutcome::Routed(CMD_VEL.to_string()));

        let topic = bridge.registry().get(CMD_VEL).unwrap();
        assert_eq!(
            topic.latest(),
            Some(json!({"linear": {"x": 0.2}, "angular": {"z": 0.0}}))
        );
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let bridge = make_bridge();
        assert_eq!(bridge.handle_incoming_text("{not json"), InboundOutcome::Malformed);
        assert_eq!(bridge.handle_incoming_text(r#"{"topic":"/x"}"#), InboundOutcome::Malformed);
        assert_eq!(
            bridge.handle_incoming_text(r#"{"op":"publish","topic":"/juliet/cmd_vel"}"#),
            InboundOutcome::Malformed
        );
        assert_eq!(bridge.registry().get(CMD_VEL).unwrap().latest(), None);
    }

    #[test]
    fn unknown_and_control_ops_are_ignored() {
        let bridge = make_bridge();
        assert_eq!(
            bridge.handle_incoming_text(r#"{"op":"teleport","topic":"/juliet/cmd_vel","msg":{}}"#),
            InboundOutcome::Ignored
        );
        assert_eq!(
            bridge.handle_incoming_text(
                r#"{"op":"advertise","topic":"/juliet/cmd_vel","type":"geometry_msgs/Twist"}"#
            ),
            InboundOutcome::Ignored
        );
        assert_eq!(bridge.registry().get(CMD_VEL).unwrap().latest(), None);
    }

    #[test]
    fn publish_on_unrouted_topic_is_ignored() {
        let bridge = make_bridge();
        let outcome =
            bridge.handle_incoming_text(r#"{"op":"publish","topic":"/juliet/odom","msg":{}}"#);
        assert_eq!(outcome, InboundOutcome::Ignored);
        assert!(bridge.registry().get(ODOM).is_none());
    }

    #[test]
    fn send_without_client_stays_local() {
        let link = ClientLink::new();
        assert_eq!(link.send_frame(ODOM, &json!({})), Delivery::NoConnection);
        assert!(!link.is_bound());
    }

    #[test]
    fn bound_client_receives_publish_envelope() {
        let link = ClientLink::new();
        let (_, mut rx) = bind_test_client(&link);
        assert_eq!(link.peer(), Some(peer()));

        assert_eq!(link.send_frame(ODOM, &json!({"x": 1})), Delivery::Sent);
        let text = rx.try_recv().unwrap();
        let frame: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(frame, json!({"op": "publish", "topic": ODOM, "msg": {"x": 1}}));
    }

    #[test]
    fn slow_client_always_gets_the_latest_frame() {
        let link = ClientLink::new();
        let (_, mut rx) = bind_test_client(&link);
        assert_eq!(link.send_frame(ODOM, &json!({"seq": 0})), Delivery::Sent);
        for seq in 1..100 {
            assert_eq!(link.send_frame(ODOM, &json!({"seq": seq})), Delivery::Superseded);
        }
        assert!(link.is_bound());

        assert_eq!(rx.len(), 1, "no backlog of stale frames");
        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["msg"]["seq"], json!(99));
    }

    #[test]
    fn pending_frames_are_kept_per_topic() {
        let link = ClientLink::new();
        let (_, mut rx) = bind_test_client(&link);
        link.send_frame(ODOM, &json!(1));
        link.send_frame("/juliet/imu", &json!(1));
        link.send_frame(ODOM, &json!(2));

        let pending: Vec<(Value, Value)> = std::iter::from_fn(|| rx.try_recv())
            .map(|text| serde_json::from_str::<Value>(&text).unwrap())
            .map(|frame| (frame["topic"].clone(), frame["msg"].clone()))
            .collect();
        assert_eq!(
            pending,
            vec![(json!(ODOM), json!(2)), (json!("/juliet/imu"), json!(1))]
        );
    }

    #[test]
    fn send_failure_clears_binding() {
        let link = ClientLink::new();
        let (_, rx) = bind_test_client(&link);
        drop(rx);

        assert_eq!(link.send_frame(ODOM, &json!(1)), Delivery::Failed);
        assert!(!link.is_bound());
        assert_eq!(link.send_frame(ODOM, &json!(2)), Delivery::NoConnection);
    }

    #[tokio::test]
    async fn last_connected_wins() {
        let link = ClientLink::new();
        let (first_id, mut first_rx) = bind_test_client(&link);
        let (second_id, mut second_rx) = bind_test_client(&link);

        // The displaced outbox is closed once its sender is gone.
        assert_eq!(first_rx.recv().await, None);

        assert_eq!(link.send_frame(ODOM, &json!(1)), Delivery::Sent);
        assert!(second_rx.recv().await.is_some());

        assert!(!link.release(first_id), "stale release must not unbind newer client");
        assert!(link.is_bound());
        assert!(link.release(second_id));
        assert!(!link.is_bound());
    }

    #[test]
    fn advertised_topic_is_forwarded_once() {
        let mut bridge = make_bridge();
        let odom = bridge.advertise(ODOM, "nav_msgs/Odometry");
        bridge.advertise(ODOM, "nav_msgs/Odometry");
        let (_, mut rx) = bind_test_client(bridge.link());

        odom.publish(json!({"seq": 1}));

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["topic"], json!(ODOM));
        assert_eq!(frame["msg"], json!({"seq": 1}));
        assert!(rx.try_recv().is_none(), "duplicate subscriber produced a second frame");
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2 s");
    }

    #[tokio::test]
    async fn websocket_round_trip_and_replacement() -> Result<(), Box<dyn std::error::Error>> {
        let mut bridge = make_bridge();
        let odom = bridge.advertise(ODOM, "nav_msgs/Odometry");
        let link = bridge.link().clone();
        let cmd_vel = bridge.registry().get(CMD_VEL).ok_or("cmd_vel missing")?;

        let listener = BridgeServer::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;
        tokio::spawn(bridge.serve(listener));

        let (mut first, _) = connect_async(format!("ws://{addr}")).await?;
        wait_until(|| link.is_bound()).await;

        // Inbound: malformed text first, then a valid command.
        first.send(Message::Text("garbage".into())).await?;
        first
            .send(Message::Text(
                r#"{"op":"publish","topic":"/juliet/cmd_vel","msg":{"linear":{"x":0.2},"angular":{"z":0.1}}}"#.into(),
            ))
            .await?;
        wait_until(|| cmd_vel.latest().is_some()).await;
        assert_eq!(cmd_vel.latest().unwrap()["angular"]["z"], json!(0.1));

        // Outbound.
        odom.publish(json!({"pose": {"position": {"x": 1.0}}}));
        let received = tokio::time::timeout(Duration::from_secs(2), first.next())
            .await?
            .ok_or("stream ended")??;
        let Message::Text(text) = received else {
            return Err("expected text frame".into());
        };
        let frame: Value = serde_json::from_str(text.as_str())?;
        assert_eq!(frame["op"], json!("publish"));
        assert_eq!(frame["topic"], json!(ODOM));

        // A second client displaces the first, which is closed.
        let first_id_peer = link.peer();
        let (mut second, _) = connect_async(format!("ws://{addr}")).await?;
        wait_until(|| link.peer() != first_id_peer).await;

        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match first.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return true,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await?;
        assert!(closed);

        odom.publish(json!({"seq": 2}));
        let received = tokio::time::timeout(Duration::from_secs(2), second.next())
            .await?
            .ok_or("stream ended")??;
        assert!(received.is_text());

        second.close(None).await?;
        wait_until(|| !link.is_bound()).await;
        Ok(())
    }
}

//! The chat service: message routing with mailbox fallback, inbound
//! queueing, and fan-out to registered handlers.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, info, warn};

use postbox_net::{handler_fn, HandlerFailure, Inbound, Transport};
use postbox_shared::constants::{PID_GROUP, PID_MAILBOX_PUT, PID_NORMAL, SUCCESS};
use postbox_shared::{Frame, Gid, Group, GroupMember, Jid, MemberAction, Message, MessageBag, MsgType};
use postbox_store::MailboxStore;

use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::mailbox::Mailbox;
use crate::registry::{HandlerRegistry, MsgHandler};

/// Cheap to clone; all clones share one service.
#[derive(Clone)]
pub struct ChatService {
    inner: Arc<Inner>,
}

struct Inner {
    my_id: Jid,
    homedir: PathBuf,
    transport: Arc<dyn Transport>,
    config: ChatConfig,
    registry: Arc<HandlerRegistry>,
    mailbox: Mailbox,
    inbound_tx: mpsc::Sender<Message>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    stop_tx: watch::Sender<bool>,
}

impl ChatService {
    /// Create a service whose mailbox lives in `<homedir>/mailbox.db`.
    pub fn new(
        my_id: Jid,
        homedir: &Path,
        transport: Arc<dyn Transport>,
        config: ChatConfig,
    ) -> Result<Self> {
        let store = MailboxStore::open(homedir)?;
        Ok(Self::with_store(my_id, homedir, transport, store, config))
    }

    pub fn with_store(
        my_id: Jid,
        homedir: &Path,
        transport: Arc<dyn Transport>,
        store: MailboxStore,
        config: ChatConfig,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (stop_tx, _) = watch::channel(false);
        let mailbox = Mailbox::new(
            store,
            Arc::clone(&transport),
            my_id.clone(),
            config.request_timeout,
        );

        Self {
            inner: Arc::new(Inner {
                my_id,
                homedir: homedir.to_path_buf(),
                transport,
                config,
                registry: Arc::new(HandlerRegistry::new()),
                mailbox,
                inbound_tx,
                inbound_rx: Mutex::new(Some(inbound_rx)),
                stop_tx,
            }),
        }
    }

    pub fn my_id(&self) -> &Jid {
        &self.inner.my_id
    }

    pub fn homedir(&self) -> &Path {
        &self.inner.homedir
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub fn store(&self) -> &MailboxStore {
        self.inner.mailbox.store()
    }

    // ---- Lifecycle ----

    /// Bind the direct-message and mailbox protocols and start dispatching.
    /// A service can be started once.
    pub fn start(&self) -> Result<()> {
        let rx = self
            .inner
            .inbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ChatError::AlreadyStarted)?;

        self.register_normal_handler();
        tokio::spawn(dispatch_loop(
            rx,
            Arc::clone(&self.inner.registry),
            self.inner.stop_tx.subscribe(),
            self.inner.config.max_inflight_handlers.max(1),
        ));
        self.inner.mailbox.start();

        info!(jid = %self.inner.my_id, "Chat service started");
        Ok(())
    }

    /// Stop dispatching and close the mailbox store. Idempotent.
    pub fn stop(&self) -> Result<()> {
        let was_stopped = self.inner.stop_tx.send_replace(true);
        self.inner.mailbox.stop()?;
        if !was_stopped {
            info!(jid = %self.inner.my_id, "Chat service stopped");
        }
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stop_tx.borrow()
    }

    fn register_normal_handler(&self) {
        let tx = self.inner.inbound_tx.clone();
        let stop = self.inner.stop_tx.subscribe();

        self.inner.transport.register_handler(
            PID_NORMAL,
            handler_fn(move |inbound: Inbound| {
                let tx = tx.clone();
                let mut stop = stop.clone();
                async move {
                    let msg = Message::from_frame(&inbound.payload)
                        .map_err(|e| HandlerFailure::with_reply(e.to_string().into_bytes(), e))?;
                    debug!(id = %msg.envelope.id, caller = %inbound.caller, "message received");

                    tokio::select! {
                        sent = tx.send(msg) => {
                            if sent.is_err() {
                                debug!("inbound queue closed, message dropped");
                            }
                        }
                        _ = stop.wait_for(|stopped| *stopped) => {
                            debug!("service stopping, message dropped");
                        }
                    }
                    Ok(SUCCESS.to_vec())
                }
            }),
        );
    }

    // ---- Handlers ----

    /// Register a handler for every message delivered from now on.
    pub fn append_handler(&self, handler: MsgHandler) -> String {
        self.inner.registry.append(handler)
    }

    pub fn drop_handler(&self, id: &str) {
        self.inner.registry.drop_handler(id);
    }

    // ---- Messaging ----

    /// Deliver `msg` directly, falling back to the recipient's mailbox when
    /// the direct attempt fails for any reason.
    pub async fn send_msg(&self, msg: &Message) -> Result<()> {
        let env = &msg.envelope;
        let (direct, direct_protocol, mailbox) = match env.msg_type {
            MsgType::Normal => (env.to.peer_id(), PID_NORMAL, env.to.mail_id()),
            MsgType::Group => (env.gid.peer_id(), PID_GROUP, env.gid.mail_id()),
            other => return Err(ChatError::Unsupported(other.into())),
        };

        let frame = msg.to_frame()?;
        let timeout = self.inner.config.request_timeout;
        let transport = &self.inner.transport;

        match transport
            .request_with_timeout(direct, direct_protocol, frame.clone(), timeout)
            .await
        {
            Ok(_) => {
                debug!(id = %env.id, to = %direct, "delivered directly");
                return Ok(());
            }
            Err(e) => {
                debug!(id = %env.id, to = %direct, error = %e, "direct delivery failed, trying mailbox");
            }
        }

        transport
            .request_with_timeout(mailbox, PID_MAILBOX_PUT, frame, timeout)
            .await
            .map_err(|e| {
                warn!(id = %env.id, mailbox = %mailbox, error = %e, "mailbox delivery failed");
                ChatError::from(e)
            })?;

        debug!(id = %env.id, mailbox = %mailbox, "stored in mailbox");
        Ok(())
    }

    /// Messages waiting in our own mailbox, oldest first.
    pub async fn query_msg(&self) -> Result<MessageBag> {
        self.inner.mailbox.query_msg(&self.inner.my_id).await
    }

    /// Remove delivered messages from our own mailbox.
    pub async fn clean_msg(&self, ids: Vec<String>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.inner.mailbox.clean_msg(&self.inner.my_id, ids).await
    }

    // ---- Groups ----

    /// Create (or, with an existing id, update) a group homed on our mailbox.
    pub async fn create_group(&self, group: Group) -> Result<Group> {
        self.inner.mailbox.gen_group(group).await
    }

    pub async fn update_members(
        &self,
        gid: &Gid,
        action: MemberAction,
        members: Vec<GroupMember>,
    ) -> Result<()> {
        self.inner.mailbox.update_members(gid, action, members).await
    }

    pub async fn query_members(
        &self,
        gid: &Gid,
        start: &Jid,
        action: MemberAction,
    ) -> Result<Vec<GroupMember>> {
        self.inner.mailbox.query_members(gid, start, action).await
    }
}

/// Drain the inbound queue in order, running every registered handler on
/// its own task. At most `max_inflight` handler tasks run at once.
async fn dispatch_loop(
    mut rx: mpsc::Receiver<Message>,
    registry: Arc<HandlerRegistry>,
    mut stop: watch::Receiver<bool>,
    max_inflight: usize,
) {
    let permits = Arc::new(Semaphore::new(max_inflight));

    loop {
        let msg = tokio::select! {
            _ = stop.wait_for(|stopped| *stopped) => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        for handler in registry.snapshot() {
            let permit = tokio::select! {
                _ = stop.wait_for(|stopped| *stopped) => return,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            let msg = msg.clone();
            tokio::spawn(async move {
                handler(msg).await;
                drop(permit);
            });
        }
    }

    debug!("dispatch loop terminated");
}

//! Secondary channels and the registry that allocates them

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::Notify;
use tracing::debug;
use wonderland_util::{channel_path, ChannelId};

/// A secondary communication path handed out to a client.
///
/// The transport behind the path belongs to the implementation. The server
/// only needs the path (to reply with) and a way to wake the channel when a
/// broadcast event is published.
pub trait Channel: Send + Sync + fmt::Debug {
    fn id(&self) -> ChannelId;

    fn path(&self) -> &Path;

    /// Wake the channel so it pulls newly published broadcast events
    fn signal_send(&self);
}

/// Builds channels for the registry.
///
/// Creations are serialized. `create` may read the registry (`channels`,
/// `len`, `get`) but must not call `create_channel` on it.
pub trait ChannelFactory: Send + Sync {
    fn create(&self, id: ChannelId, base_dir: &Path, prefix: &str) -> Arc<dyn Channel>;
}

/// In-process channel that counts wake-ups and lets one waiter sleep on them.
#[derive(Debug)]
pub struct RabbitHole {
    id: ChannelId,
    path: PathBuf,
    pending: AtomicU64,
    notify: Notify,
}

impl RabbitHole {
    pub fn new(id: ChannelId, base_dir: &Path, prefix: &str) -> Self {
        Self {
            id,
            path: channel_path(base_dir, prefix, id),
            pending: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Signals received and not yet taken
    pub fn pending_signals(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }

    /// Take all pending signals, resetting the count
    pub fn take_signals(&self) -> u64 {
        self.pending.swap(0, Ordering::AcqRel)
    }

    /// Wait until the channel is signalled.
    ///
    /// A signal sent while nobody was waiting is kept, so this returns
    /// immediately in that case.
    pub async fn signalled(&self) {
        self.notify.notified().await;
    }
}

impl Channel for RabbitHole {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn signal_send(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.notify.notify_one();
    }
}

/// Factory producing [`RabbitHole`] channels
#[derive(Debug, Default, Clone, Copy)]
pub struct RabbitHoleFactory;

impl ChannelFactory for RabbitHoleFactory {
    fn create(&self, id: ChannelId, base_dir: &Path, prefix: &str) -> Arc<dyn Channel> {
        Arc::new(RabbitHole::new(id, base_dir, prefix))
    }
}

/// Ordered list of every channel allocated since startup.
///
/// Channels are never removed, so a channel's id is also its index.
pub struct ChannelRegistry {
    base_dir: PathBuf,
    prefix: String,
    factory: Box<dyn ChannelFactory>,
    /// Held across a whole creation so ids stay dense
    creating: Mutex<()>,
    channels: RwLock<Vec<Arc<dyn Channel>>>,
}

impl ChannelRegistry {
    pub fn new(base_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self::with_factory(base_dir, prefix, Box::new(RabbitHoleFactory))
    }

    pub fn with_factory(
        base_dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        factory: Box<dyn ChannelFactory>,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            prefix: prefix.into(),
            factory,
            creating: Mutex::new(()),
            channels: RwLock::new(Vec::new()),
        }
    }

    /// Allocate a new channel with the next id
    pub fn create_channel(&self) -> Arc<dyn Channel> {
        let _creating = self.creating.lock().unwrap_or_else(PoisonError::into_inner);

        // Only creations push, so the count cannot move until we do
        let id = ChannelId::new(self.len());
        let channel = self.factory.create(id, &self.base_dir, &self.prefix);
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(channel.clone());

        debug!(channel_id = %id, path = %channel.path().display(), "Channel created");
        channel
    }

    /// Snapshot of all channels, in id order
    pub fn channels(&self) -> Vec<Arc<dyn Channel>> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, id: ChannelId) -> Option<Arc<dyn Channel>> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id.index())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("base_dir", &self.base_dir)
            .field("prefix", &self.prefix)
            .field("len", &self.len())
            .finish()
    }
}

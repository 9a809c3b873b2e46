//! Connection lifecycle for one lock

use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use latch_proto::DiscoveryFilter;
use latch_proto::ble::uuid_from_u16;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::link::{Drops, Endpoints, Link, Notifications, Transport};
use crate::{ConnectError, LinkError, SendError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Bound,
    Disconnected,
}

type NotifyFn = Arc<dyn Fn(Vec<u8>) + Send + Sync>;
type DisconnectFn = Box<dyn FnOnce() + Send>;
type Endpoint<T> = <<T as Transport>::Link as Link>::Endpoint;

/// Lifecycle state shared between the session and its drop watcher
///
/// Every bind bumps `generation`; a drop observed under an older generation
/// refers to a link that has since been rebound and is ignored.
struct Lifecycle {
    state: watch::Sender<LinkState>,
    binding: Mutex<Binding>,
}

struct Binding {
    generation: u64,
    on_disconnect: Option<DisconnectFn>,
}

impl Lifecycle {
    fn new() -> Self {
        let (state, _) = watch::channel(LinkState::Idle);
        Self {
            state,
            binding: Mutex::new(Binding {
                generation: 0,
                on_disconnect: None,
            }),
        }
    }

    fn binding(&self) -> std::sync::MutexGuard<'_, Binding> {
        self.binding.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, state: LinkState) {
        self.state.send_replace(state);
    }

    fn generation(&self) -> u64 {
        self.binding().generation
    }

    /// Enter Bound for a fresh connection with a new disconnect callback
    fn bound(&self, on_disconnect: Option<DisconnectFn>) {
        let mut binding = self.binding();
        binding.generation += 1;
        if on_disconnect.is_some() {
            binding.on_disconnect = on_disconnect;
        }
        self.set(LinkState::Bound);
    }

    /// Forget the callback; later drops can no longer fire it
    fn disarm(&self) {
        let mut binding = self.binding();
        binding.generation += 1;
        binding.on_disconnect = None;
    }

    /// Bound -> Disconnected, firing the callback on the first transition
    ///
    /// With `seen`, only a drop observed under the current generation counts.
    fn dropped(&self, seen: Option<u64>) -> bool {
        let callback = {
            let mut binding = self.binding();
            if seen.is_some_and(|generation| generation != binding.generation) {
                return false;
            }
            let left_bound = self.state.send_if_modified(|state| {
                let bound = *state == LinkState::Bound;
                if bound {
                    *state = LinkState::Disconnected;
                }
                bound
            });
            if !left_bound {
                return false;
            }
            binding.on_disconnect.take()
        };

        tracing::info!("lock disconnected");
        if let Some(callback) = callback {
            callback();
        }
        true
    }
}

/// Exclusive channel to one lock
///
/// Binds the outbound and inbound characteristics on [`connect`](Self::connect)
/// and rebinds them in place when a [`send`](Self::send) finds the link
/// dropped.
pub struct ChannelSession<T: Transport> {
    transport: T,
    link: Option<Arc<T::Link>>,
    endpoints: Option<Endpoints<Endpoint<T>>>,
    filter: Option<DiscoveryFilter>,
    lifecycle: Arc<Lifecycle>,
    on_notify: Option<NotifyFn>,
    notify_task: Option<JoinHandle<()>>,
    drop_task: Option<JoinHandle<()>>,
}

impl<T: Transport> ChannelSession<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            link: None,
            endpoints: None,
            filter: None,
            lifecycle: Arc::new(Lifecycle::new()),
            on_notify: None,
            notify_task: None,
            drop_task: None,
        }
    }

    pub fn state(&self) -> LinkState {
        *self.lifecycle.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.lifecycle.state.subscribe()
    }

    /// Serial of the lock this session is bound to
    pub fn serial(&self) -> Option<u32> {
        self.filter.as_ref().map(DiscoveryFilter::serial)
    }

    /// Discover the lock with `serial` and bind its characteristics
    ///
    /// `on_disconnect` fires once, on the first unsolicited link drop.
    /// `on_notify` receives every inbound payload, including those that arrive
    /// after a rebind.
    pub async fn connect<D, N>(
        &mut self,
        serial: u64,
        on_disconnect: D,
        on_notify: N,
    ) -> Result<(), ConnectError>
    where
        D: FnOnce() + Send + 'static,
        N: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        let filter = DiscoveryFilter::for_serial(serial)?;

        let rebinding = self.link.is_some();
        if rebinding {
            self.disconnect().await?;
        }
        let unbound = if rebinding {
            LinkState::Disconnected
        } else {
            LinkState::Idle
        };

        self.lifecycle.set(LinkState::Connecting);
        tracing::info!(serial, "scanning for lock");
        tracing::debug!(
            prefix = ?filter.prefix,
            mask = ?filter.mask,
            "manufacturer data filter"
        );

        let link = match self.transport.discover(&filter).await {
            Ok(Some(link)) => Arc::new(link),
            Ok(None) => {
                self.lifecycle.set(unbound);
                return Err(ConnectError::DeviceSelectionCancelled);
            }
            Err(e) => {
                self.lifecycle.set(unbound);
                return Err(e.into());
            }
        };

        tracing::info!(device = %link.name(), "connecting to lock");
        let bound = match bind(link.as_ref(), &filter).await {
            Ok(Some(bound)) => bound,
            Ok(None) => {
                tracing::warn!(device = %link.name(), "lock service not found");
                let _ = link.disconnect().await;
                self.lifecycle.set(LinkState::Disconnected);
                return Err(ConnectError::IncorrectDeviceSelected);
            }
            Err(e) => {
                let _ = link.disconnect().await;
                self.lifecycle.set(LinkState::Disconnected);
                return Err(e.into());
            }
        };
        let drops = match link.drops().await {
            Ok(drops) => drops,
            Err(e) => {
                let _ = link.disconnect().await;
                self.lifecycle.set(LinkState::Disconnected);
                return Err(e.into());
            }
        };

        let on_notify: NotifyFn = Arc::new(on_notify);
        self.notify_task = Some(spawn_notify(bound.notifications, on_notify.clone()));
        self.drop_task = Some(spawn_drop_watch(
            drops,
            link.clone(),
            self.lifecycle.clone(),
        ));
        self.on_notify = Some(on_notify);
        self.endpoints = Some(bound.endpoints);
        self.lifecycle.bound(Some(Box::new(on_disconnect)));
        tracing::info!(device = %link.name(), serial, "connected to lock");
        self.filter = Some(filter);
        self.link = Some(link);
        Ok(())
    }

    /// Write `data` to the outbound characteristic, rebinding first if the
    /// link dropped since the last operation
    pub async fn send(&mut self, data: &[u8]) -> Result<(), SendError> {
        let (Some(link), Some(_)) = (&self.link, &self.endpoints) else {
            return Err(SendError::NotConnected);
        };

        if !link.is_connected().await? {
            self.rebind().await?;
        }

        let (Some(link), Some(endpoints)) = (&self.link, &self.endpoints) else {
            return Err(SendError::NotConnected);
        };
        link.write(&endpoints.outbound, data).await?;
        Ok(())
    }

    async fn rebind(&mut self) -> Result<(), SendError> {
        let (Some(link), Some(filter)) = (&self.link, &self.filter) else {
            return Err(SendError::NotConnected);
        };
        // the platform may not have reported this drop yet
        self.lifecycle.dropped(None);
        tracing::info!(device = %link.name(), "link dropped, rebinding");

        let bound = match bind(link.as_ref(), filter).await {
            Ok(Some(bound)) => bound,
            Ok(None) => {
                tracing::warn!(device = %link.name(), "lock service gone after rebind");
                let _ = link.disconnect().await;
                return Err(SendError::IncorrectDeviceSelected);
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        if let Some(on_notify) = &self.on_notify {
            self.notify_task = Some(spawn_notify(bound.notifications, on_notify.clone()));
        }
        self.endpoints = Some(bound.endpoints);
        self.lifecycle.bound(None);
        Ok(())
    }

    /// Tear the link down; safe to call in any state
    ///
    /// The disconnect callback is dropped without firing.
    pub async fn disconnect(&mut self) -> Result<(), LinkError> {
        if let Some(task) = self.drop_task.take() {
            task.abort();
        }
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        self.lifecycle.disarm();
        self.on_notify = None;
        self.endpoints = None;
        self.filter = None;
        self.lifecycle.set(LinkState::Disconnected);

        let Some(link) = self.link.take() else {
            return Ok(());
        };
        if link.is_connected().await? {
            link.disconnect().await?;
        }
        tracing::info!(device = %link.name(), "disconnected from lock");
        Ok(())
    }
}

impl<T: Transport> Drop for ChannelSession<T> {
    fn drop(&mut self) {
        if let Some(task) = self.drop_task.take() {
            task.abort();
        }
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
    }
}

struct Bound<E> {
    endpoints: Endpoints<E>,
    notifications: Notifications,
}

/// Connect if needed, resolve both characteristics under the lock service and
/// subscribe to inbound
async fn bind<L: Link>(
    link: &L,
    filter: &DiscoveryFilter,
) -> Result<Option<Bound<L::Endpoint>>, LinkError> {
    if !link.is_connected().await? {
        link.connect().await?;
    }
    let service = uuid_from_u16(filter.service_id);
    let Some(endpoints) = link.resolve(service).await? else {
        return Ok(None);
    };
    let notifications = link.subscribe(&endpoints.inbound).await?;
    Ok(Some(Bound {
        endpoints,
        notifications,
    }))
}

fn spawn_notify(mut notifications: Notifications, on_notify: NotifyFn) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(payload) = notifications.next().await {
            on_notify(payload);
        }
    })
}

fn spawn_drop_watch<L: Link>(
    mut drops: Drops,
    link: Arc<L>,
    lifecycle: Arc<Lifecycle>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while drops.next().await.is_some() {
            let generation = lifecycle.generation();
            // a send may already have rebound the link
            if link.is_connected().await.unwrap_or(false) {
                continue;
            }
            lifecycle.dropped(Some(generation));
        }
    })
}

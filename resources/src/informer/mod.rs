use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use tokio::{
    net::TcpStream,
    select,
    sync::{mpsc, RwLock},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::objects::Object;
use reflector::{Reflector, ReflectorNotification};

mod reflector;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Shared read cache of watched objects, keyed by object URI.
pub type Store<T> = Arc<RwLock<HashMap<String, T>>>;

pub type CLS<ARG, RES> = Box<dyn Fn(ARG) -> BoxFuture<'static, Result<RES>> + Send + Sync>;

pub struct ListerWatcher<T> {
    pub lister: CLS<(), Vec<T>>,
    pub watcher: CLS<(), WsStream>,
}

pub struct EventHandler<T> {
    pub add_cls: CLS<T, ()>,
    pub update_cls: CLS<(T, T), ()>,
    pub delete_cls: CLS<T, ()>,
}

pub struct ResyncHandler(pub CLS<(), ()>);

/// Seconds between resync rounds.
const RESYNC_PERIOD: u64 = 30;
/// Seconds to back off before relisting after a watch disconnect.
const RELIST_BACKOFF: u64 = 5;

pub struct Informer<T> {
    reflector: Arc<Reflector<T>>,
    store: Store<T>,
    eh: EventHandler<T>,
    rh: ResyncHandler,
}

impl<T: Object> Informer<T> {
    pub fn new(lw: ListerWatcher<T>, eh: EventHandler<T>, rh: ResyncHandler) -> Self {
        let store = Arc::new(RwLock::new(HashMap::new()));
        let reflector = Reflector {
            lw,
            store: store.clone(),
        };
        Self {
            reflector: Arc::new(reflector),
            store,
            eh,
            rh,
        }
    }

    pub fn get_store(&self) -> Store<T> {
        self.store.clone()
    }

    pub async fn run(&self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<ReflectorNotification<T>>(16);
        let reflector = self.reflector.clone();
        let reflector_handle = tokio::spawn(async move {
            loop {
                if let Err(e) = reflector.run(&tx).await {
                    tracing::warn!("Reflector disconnected, will relist: {:#}", e);
                }
                if tx.is_closed() {
                    return Ok::<(), anyhow::Error>(());
                }
                tokio::time::sleep(Duration::from_secs(RELIST_BACKOFF)).await;
            }
        });

        let mut resync_ticker = tokio::time::interval(Duration::from_secs(RESYNC_PERIOD));
        // The first tick fires immediately, skip it.
        resync_ticker.tick().await;

        tracing::info!("Informer started");
        loop {
            select! {
                Some(n) = rx.recv() => {
                    let result = match n {
                        ReflectorNotification::Add(new) => (self.eh.add_cls)(new).await,
                        ReflectorNotification::Update(old, new) => {
                            (self.eh.update_cls)((old, new)).await
                        },
                        ReflectorNotification::Delete(old) => (self.eh.delete_cls)(old).await,
                    };
                    result.with_context(|| "EventHandler error")?;
                },
                _ = resync_ticker.tick() => {
                    (self.rh.0)(()).await.with_context(|| "ResyncHandler error")?;
                },
                else => break,
            }
        }

        reflector_handle.await?
    }
}

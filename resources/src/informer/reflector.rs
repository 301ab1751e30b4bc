use anyhow::{anyhow, Result};
use futures_util::stream::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::{ListerWatcher, Store};
use crate::{models::WatchEvent, objects::Object};

pub(super) struct Reflector<T> {
    pub(super) lw: ListerWatcher<T>,
    pub(super) store: Store<T>,
}

#[derive(Debug)]
pub(super) enum ReflectorNotification<T> {
    Add(T),
    /// old value, new value
    Update(T, T),
    Delete(T),
}

impl<T: Object> Reflector<T> {
    pub(super) async fn run(&self, tx: &mpsc::Sender<ReflectorNotification<T>>) -> Result<()> {
        self.list_and_sync(tx).await?;
        let (_, mut receiver) = (self.lw.watcher)(()).await?.split();

        loop {
            let msg: Message = receiver
                .next()
                .await
                .ok_or_else(|| anyhow!("Failed to receive watch message from api-server"))??;

            if msg.is_close() {
                return Err(anyhow!("Api-server watch disconnect"));
            }

            if let Message::Text(msg) = msg {
                let event: WatchEvent<T> = serde_json::from_str(msg.as_str())?;
                match event {
                    WatchEvent::Put(e) => {
                        let old = self.store.read().await.get(&e.key).cloned();
                        self.store
                            .write()
                            .await
                            .insert(e.key.to_owned(), e.object.clone());
                        match old {
                            Some(old) => {
                                tx.send(ReflectorNotification::Update(old, e.object)).await?
                            },
                            None => tx.send(ReflectorNotification::Add(e.object)).await?,
                        }
                    },
                    WatchEvent::Delete(e) => {
                        if let Some(old) = self.store.write().await.remove(&e.key) {
                            tx.send(ReflectorNotification::Delete(old)).await?;
                        } else {
                            tracing::warn!("Watch inconsistent, key {} already deleted", e.key);
                        }
                    },
                }
            } else {
                tracing::warn!("Receive none text watch message from api-server");
            }
        }
    }

    /// Pull a full list and reconcile it against the store, so relists
    /// after a disconnect surface the changes missed while away.
    async fn list_and_sync(&self, tx: &mpsc::Sender<ReflectorNotification<T>>) -> Result<()> {
        let objects: Vec<T> = (self.lw.lister)(()).await?;
        let mut store = self.store.write().await;

        let mut seen = std::collections::HashSet::new();
        for object in objects {
            let key = object.uri();
            seen.insert(key.to_owned());
            match store.insert(key, object.clone()) {
                Some(old) => {
                    if old != object {
                        tx.send(ReflectorNotification::Update(old, object)).await?;
                    }
                },
                None => tx.send(ReflectorNotification::Add(object)).await?,
            }
        }

        let stale: Vec<String> = store
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();
        for key in stale {
            if let Some(old) = store.remove(&key) {
                tx.send(ReflectorNotification::Delete(old)).await?;
            }
        }
        Ok(())
    }
}

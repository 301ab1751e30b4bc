use anyhow::{anyhow, Error, Result};
use reqwest::Url;
use resources::{
    informer::{EventHandler, Informer, ListerWatcher, ResyncHandler, WsStream},
    models::Response,
    objects::{list_path, uri_of, watch_path, Object},
};
use tokio::sync::mpsc::Sender;
use tokio_tungstenite::connect_async;

use crate::CONFIG;

#[derive(Debug)]
pub enum Event<T> {
    Add(T),
    Update(T, T),
    Delete(T),
}

#[derive(Debug)]
pub struct ResyncNotification;

pub fn create_lister_watcher<T: Object>(namespace: Option<String>) -> ListerWatcher<T> {
    let list_url = format!(
        "{}{}",
        CONFIG.api_server_url,
        list_path::<T>(namespace.as_deref())
    );
    let watch_url = format!(
        "{}{}",
        CONFIG.api_server_watch_url,
        watch_path::<T>(namespace.as_deref())
    );
    ListerWatcher {
        lister: Box::new(move |_| {
            let list_url = list_url.clone();
            Box::pin(async {
                let res = reqwest::get(list_url)
                    .await?
                    .json::<Response<Vec<T>>>()
                    .await?;
                let res = res.data.ok_or_else(|| anyhow!("Lister failed"))?;
                Ok::<Vec<T>, Error>(res)
            })
        }),
        watcher: Box::new(move |_| {
            let watch_url = watch_url.clone();
            Box::pin(async move {
                let url = Url::parse(watch_url.as_str())?;
                let (stream, _) = connect_async(url).await?;
                Ok::<WsStream, Error>(stream)
            })
        }),
    }
}

pub fn create_informer<T: Object>(
    namespace: Option<String>,
    tx: Sender<Event<T>>,
    resync_tx: Sender<ResyncNotification>,
) -> Informer<T> {
    let lw = create_lister_watcher::<T>(namespace);

    let tx_add = tx;
    let tx_update = tx_add.clone();
    let tx_delete = tx_add.clone();
    let eh = EventHandler::<T> {
        add_cls: Box::new(move |new| {
            let tx_add = tx_add.clone();
            Box::pin(async move {
                tx_add.send(Event::Add(new)).await?;
                Ok(())
            })
        }),
        update_cls: Box::new(move |(old, new)| {
            let tx_update = tx_update.clone();
            Box::pin(async move {
                tx_update.send(Event::Update(old, new)).await?;
                Ok(())
            })
        }),
        delete_cls: Box::new(move |old| {
            let tx_delete = tx_delete.clone();
            Box::pin(async move {
                tx_delete.send(Event::Delete(old)).await?;
                Ok(())
            })
        }),
    };
    let rh = ResyncHandler(Box::new(move |()| {
        let resync_tx = resync_tx.clone();
        Box::pin(async move {
            resync_tx.send(ResyncNotification).await?;
            Ok(())
        })
    }));

    Informer::new(lw, eh, rh)
}

pub async fn post_update<T: Object>(object: &T) -> Result<()> {
    let client = reqwest::Client::new();
    let response = client
        .put(format!("{}{}", CONFIG.api_server_url, object.uri()))
        .json(object)
        .send()
        .await?
        .json::<Response<()>>()
        .await?;
    if let Some(msg) = response.msg {
        tracing::debug!("{}", msg);
    }
    Ok(())
}

pub async fn create_object<T: Object>(object: &T) -> Result<()> {
    let client = reqwest::Client::new();
    let response = client
        .post(format!(
            "{}{}",
            CONFIG.api_server_url,
            list_path::<T>(Some(object.namespace().as_str()))
        ))
        .json(object)
        .send()
        .await?
        .json::<Response<()>>()
        .await?;
    if let Some(msg) = response.msg {
        tracing::debug!("{}", msg);
    }
    Ok(())
}

pub async fn delete_object<T: Object>(namespace: &str, name: &str) -> Result<()> {
    let client = reqwest::Client::new();
    let response = client
        .delete(format!(
            "{}{}",
            CONFIG.api_server_url,
            uri_of::<T>(namespace, name)
        ))
        .send()
        .await?
        .json::<Response<()>>()
        .await?;
    if let Some(msg) = response.msg {
        tracing::debug!("{}", msg);
    }
    Ok(())
}

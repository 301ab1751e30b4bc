use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// File names expected inside the certificate directory.
const CA_FILE: &str = "ca.crt";
const CERT_FILE: &str = "tls.crt";
const KEY_FILE: &str = "tls.key";

/// Seconds between checks of the certificate directory.
const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// A complete, consistent set of TLS material.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub ca: Vec<u8>,
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

fn fingerprint(dir: &Path) -> Result<Vec<(PathBuf, SystemTime, u64)>> {
    [CA_FILE, CERT_FILE, KEY_FILE]
        .iter()
        .map(|name| {
            let path = dir.join(name);
            let meta = std::fs::metadata(&path)
                .with_context(|| format!("stat {}", path.display()))?;
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Ok((path, modified, meta.len()))
        })
        .collect()
}

pub fn load(dir: &Path) -> Result<TlsMaterial> {
    let read = |name: &str| {
        let path = dir.join(name);
        std::fs::read(&path).with_context(|| format!("read {}", path.display()))
    };
    Ok(TlsMaterial {
        ca: read(CA_FILE)?,
        cert: read(CERT_FILE)?,
        key: read(KEY_FILE)?,
    })
}

/// Watches a certificate directory and atomically swaps in freshly
/// loaded material; readers always see a matching cert/key/CA triple.
pub struct CertificateStore {
    dir: PathBuf,
    current: RwLock<Arc<TlsMaterial>>,
}

impl CertificateStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        let material = load(&dir)?;
        Ok(CertificateStore {
            dir,
            current: RwLock::new(Arc::new(material)),
        })
    }

    pub fn current(&self) -> Arc<TlsMaterial> {
        self.current.read().clone()
    }

    /// Blocks until the on-disk material changes (returning `true` after
    /// swapping it in) or the token is cancelled (returning `false`).
    pub async fn wait_for_change(&self, token: &CancellationToken) -> bool {
        let mut last = fingerprint(&self.dir).ok();
        loop {
            tokio::select! {
                _ = token.cancelled() => return false,
                _ = tokio::time::sleep(POLL_INTERVAL) => {},
            }

            let next = fingerprint(&self.dir).ok();
            if next.is_some() && next != last {
                match load(&self.dir) {
                    Ok(material) => {
                        *self.current.write() = Arc::new(material);
                        tracing::info!(
                            "Reloaded TLS material from {}",
                            self.dir.display()
                        );
                        return true;
                    },
                    Err(e) => {
                        // Probably caught mid-rotation; keep serving the
                        // previous pair and retry next round.
                        tracing::warn!("TLS material not readable yet: {:#}", e);
                    },
                }
            } else {
                last = next;
            }
        }
    }
}

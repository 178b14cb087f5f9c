//! Lazily loaded TC string codec
//!
//! Pages that never enter protocol mode never pay for the codec. The first
//! caller triggers the factory; concurrent callers wait on the same load.
//! A failed load leaves the cell empty so the next caller retries.

use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tcf_codec::TcStringCodec;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{CmpError, Result};

/// Produces the codec on first use
pub type CodecFactory = Arc<dyn Fn() -> BoxFuture<'static, Result<TcStringCodec>> + Send + Sync>;

pub struct LazyCodec {
    cell: OnceCell<Arc<TcStringCodec>>,
    factory: CodecFactory,
    load_attempts: AtomicUsize,
}

impl LazyCodec {
    pub fn new(factory: CodecFactory) -> Self {
        Self {
            cell: OnceCell::new(),
            factory,
            load_attempts: AtomicUsize::new(0),
        }
    }

    /// Codec with an optional vendor ceiling, built on first use
    pub fn with_max_vendor_id(max_vendor_id: Option<u32>) -> Self {
        Self::new(Arc::new(move || {
            async move { Ok::<_, CmpError>(TcStringCodec::with_max_vendor_id(max_vendor_id)) }
                .boxed()
        }))
    }

    /// Already-loaded codec
    pub fn ready(codec: TcStringCodec) -> Self {
        let lazy = Self::with_max_vendor_id(None);
        // A fresh cell cannot be full
        let _ = lazy.cell.set(Arc::new(codec));
        lazy
    }

    pub async fn get(&self) -> Result<Arc<TcStringCodec>> {
        let codec = self
            .cell
            .get_or_try_init(|| async {
                self.load_attempts.fetch_add(1, Ordering::Relaxed);
                debug!("Loading TC string codec");
                match (self.factory)().await {
                    Ok(codec) => Ok(Arc::new(codec)),
                    Err(e) => {
                        warn!(error = %e, "TC string codec failed to load");
                        Err(e)
                    }
                }
            })
            .await?;
        Ok(Arc::clone(codec))
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    /// Factory invocations so far
    pub fn load_attempts(&self) -> usize {
        self.load_attempts.load(Ordering::Relaxed)
    }
}

impl Default for LazyCodec {
    fn default() -> Self {
        Self::with_max_vendor_id(None)
    }
}

impl fmt::Debug for LazyCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyCodec")
            .field("loaded", &self.is_loaded())
            .field("load_attempts", &self.load_attempts())
            .finish()
    }
}

/// Factory that fails, for hosts where the codec cannot be provided
pub fn unavailable_factory(reason: impl Into<String>) -> CodecFactory {
    let reason = reason.into();
    Arc::new(move || {
        let reason = reason.clone();
        async move { Err::<TcStringCodec, _>(CmpError::CodecUnavailable(reason)) }.boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_load() {
        let lazy = LazyCodec::new(Arc::new(|| {
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, CmpError>(TcStringCodec::new())
            }
            .boxed()
        }));
        assert!(!lazy.is_loaded());

        let (a, b, c) = tokio::join!(lazy.get(), lazy.get(), lazy.get());
        let a = a.unwrap();
        assert!(Arc::ptr_eq(&a, &b.unwrap()));
        assert!(Arc::ptr_eq(&a, &c.unwrap()));
        assert_eq!(lazy.load_attempts(), 1);
        assert!(lazy.is_loaded());
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let lazy = LazyCodec::new(unavailable_factory("offline"));
        assert!(matches!(lazy.get().await, Err(CmpError::CodecUnavailable(_))));
        assert!(lazy.get().await.is_err());
        assert_eq!(lazy.load_attempts(), 2);
        assert!(!lazy.is_loaded());
    }

    #[tokio::test]
    async fn test_ready_codec_skips_factory() {
        let lazy = LazyCodec::ready(TcStringCodec::new());
        assert!(lazy.is_loaded());
        lazy.get().await.unwrap();
        assert_eq!(lazy.load_attempts(), 0);
    }
}

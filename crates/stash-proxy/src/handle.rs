use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::proxy::ProxyId;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

struct TokenInner {
    id: u64,
    valid: AtomicBool,
    bound: Mutex<Option<ProxyId>>,
}

/// Cancellation token held by a client that caches a proxy's object.
///
/// The token is bound to at most one proxy. When that proxy is reset or
/// destroyed the token is invalidated; the holder must check
/// [`ResetToken::is_valid`] before using anything it cached.
#[derive(Clone)]
pub struct ResetToken {
    inner: Arc<TokenInner>,
}

impl ResetToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                id: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
                valid: AtomicBool::new(false),
                bound: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// `true` while the bound proxy has not been reset since binding.
    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::Acquire)
    }

    /// The proxy this token is bound to, if any.
    pub fn bound_to(&self) -> Option<ProxyId> {
        *self.inner.bound.lock().expect("token lock poisoned")
    }

    /// Bind to `proxy`. Fails if already bound to a different proxy.
    pub(crate) fn bind(&self, proxy: ProxyId) -> bool {
        let mut bound = self.inner.bound.lock().expect("token lock poisoned");
        match *bound {
            Some(current) if current != proxy => false,
            _ => {
                *bound = Some(proxy);
                self.inner.valid.store(true, Ordering::Release);
                true
            }
        }
    }

    pub(crate) fn unbind(&self) {
        *self.inner.bound.lock().expect("token lock poisoned") = None;
        self.invalidate();
    }

    /// Mark cached state stale without unbinding.
    pub fn invalidate(&self) {
        self.inner.valid.store(false, Ordering::Release);
    }

    pub(crate) fn same_as(&self, other: &ResetToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for ResetToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResetToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetToken")
            .field("id", &self.id())
            .field("valid", &self.is_valid())
            .finish()
    }
}

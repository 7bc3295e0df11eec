//! Cancellation trees built on channel close.
//!
//! Every context owns a `done` channel that is closed exactly once, when the
//! context is canceled. Canceling a context cancels every context derived from
//! it, down to the leaves.
//!
//! ```
//! use gorun::Context;
//!
//! let root = Context::with_cancel(&Context::background());
//! let leaf = Context::with_cancel(&root);
//! root.cancel();
//! assert!(leaf.done().recv().is_err());
//! assert!(leaf.is_canceled());
//! ```
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::chan::Channel;
use crate::process_impl::spawn_detached;

struct Inner {
    done: Channel<()>,
    canceled: AtomicBool,
    background: bool,
    parent: Option<Context>,
}

#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    fn new(parent: Option<Context>, background: bool) -> Context {
        Context {
            inner: Arc::new(Inner {
                done: Channel::new(0),
                canceled: AtomicBool::new(false),
                background,
                parent,
            }),
        }
    }

    /// The root of every tree, never canceled.
    pub fn background() -> Context {
        static BACKGROUND: OnceLock<Context> = OnceLock::new();
        BACKGROUND.get_or_init(|| Context::new(None, true)).clone()
    }

    /// Derives a context that is canceled with `parent` or on its own
    /// [`cancel`](Context::cancel).
    pub fn with_cancel(parent: &Context) -> Context {
        let child = Context::new(Some(parent.clone()), false);
        if parent.inner.background {
            return child;
        }
        if parent.is_canceled() {
            child.cancel();
            return child;
        }

        // the propagator must not keep the child alive
        let weak = Arc::downgrade(&child.inner);
        let parent_done = parent.done();
        spawn_detached(move || {
            let _ = parent_done.recv();
            if let Some(inner) = weak.upgrade() {
                Context { inner }.cancel();
            }
        });
        child
    }

    /// Cancels this context and, through their propagators, every
    /// descendant. Repeated calls do nothing.
    pub fn cancel(&self) {
        if self.inner.background || self.inner.canceled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.done.close();
    }

    /// A channel closed once the context is canceled.
    pub fn done(&self) -> Channel<()> {
        self.inner.done.clone()
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    pub fn parent(&self) -> Option<&Context> {
        self.inner.parent.as_ref()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.inner.background {
            return f.write_str("Context(background)");
        }
        f.debug_struct("Context")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}
